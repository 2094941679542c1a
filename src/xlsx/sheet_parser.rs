// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

use std::mem;

use log::{debug, warn};
use quick_xml::{encoding::Decoder, events::BytesStart, name::QName};

use super::events::{drive, State, StateStack, XmlHandler};
use super::{
    get_attribute, get_row_column, xml_reader, Archive, WorkbookParts, XlsxError, MAX_ROWS,
};
use crate::datatype::{ExcelDateTime, Value};
use crate::formats::StyleFormat;

/// A `<col>` definition of a worksheet
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnDef {
    /// First column (1 based) the definition applies to
    pub min: u32,
    /// Last column (1 based, inclusive)
    pub max: u32,
    /// Column width, in characters
    pub width: Option<f64>,
    /// Default style id of the cells of the columns
    pub style: Option<usize>,
    /// Columns are hidden
    pub hidden: bool,
    /// Width was set explicitly
    pub custom_width: bool,
}

impl ColumnDef {
    /// Does the definition cover the 0 based column `col`
    pub fn contains(&self, col: usize) -> bool {
        let col = col as u32 + 1;
        self.min <= col && col <= self.max
    }
}

/// A resolved cell value
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct ParsedCell {
    pub(crate) value: Value,
    /// The cell style shows fractions of a second
    pub(crate) sub_second: bool,
}

/// Receives the content of a sheet as it is parsed
pub(crate) trait RowSink {
    /// Column definitions, delivered once `<cols>` closes
    fn on_columns(&mut self, columns: Vec<ColumnDef>);
    /// One physical row, blank rows are delivered as empty rows
    fn on_row(&mut self, row: Vec<ParsedCell>);
}

/// Value of the `t` attribute of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CellType {
    #[default]
    Number,
    SharedString,
    InlineString,
    FormulaString,
    Boolean,
    Error,
    Date,
}

impl CellType {
    fn from_attribute(t: &[u8]) -> CellType {
        match t {
            b"n" => CellType::Number,
            b"s" => CellType::SharedString,
            b"inlineStr" => CellType::InlineString,
            b"str" => CellType::FormulaString,
            b"b" => CellType::Boolean,
            b"e" => CellType::Error,
            b"d" => CellType::Date,
            t => {
                warn!(
                    "unknown cell 't' attribute {:?}, reading as text",
                    String::from_utf8_lossy(t)
                );
                CellType::InlineString
            }
        }
    }
}

#[derive(Debug, Default)]
struct CellBuffer {
    typ: CellType,
    style: Option<usize>,
    col: usize,
    text: String,
}

/// State machine turning a worksheet part into rows
pub(crate) struct SheetParser<'a, S> {
    parts: &'a WorkbookParts,
    sink: &'a mut S,
    sheet: &'a str,
    columns: Vec<ColumnDef>,
    /// 0 based index of the next physical row
    next_row: u32,
    current_row: u32,
    rows: usize,
    row: Vec<ParsedCell>,
    cell: CellBuffer,
}

impl<'a, S: RowSink> SheetParser<'a, S> {
    pub(crate) fn new(parts: &'a WorkbookParts, sink: &'a mut S, sheet: &'a str) -> Self {
        SheetParser {
            parts,
            sink,
            sheet,
            columns: Vec::new(),
            next_row: 0,
            current_row: 0,
            rows: 0,
            row: Vec::new(),
            cell: CellBuffer::default(),
        }
    }

    fn emit_row(&mut self, row: Vec<ParsedCell>) {
        self.rows += 1;
        self.sink.on_row(row);
    }

    fn start_row(&mut self, e: &BytesStart<'_>) -> Result<(), XlsxError> {
        let index = match get_attribute(e.attributes(), QName(b"r"))? {
            Some(r) => match atoi_simd::parse::<u32>(r) {
                Ok(n) if n > MAX_ROWS => {
                    return Err(XlsxError::CellReference(format!(
                        "row {n} in sheet '{}'",
                        self.sheet
                    )))
                }
                Ok(n) if n > 0 => n - 1,
                _ => {
                    warn!(
                        "invalid row number {:?} in sheet '{}'",
                        String::from_utf8_lossy(r),
                        self.sheet
                    );
                    self.next_row
                }
            },
            None => self.next_row,
        };
        // missing physical rows become blank records
        while self.next_row < index {
            self.emit_row(Vec::new());
            self.next_row += 1;
        }
        self.current_row = index.max(self.next_row);
        self.row.clear();
        Ok(())
    }

    fn start_cell(&mut self, e: &BytesStart<'_>) -> Result<(), XlsxError> {
        let mut cell = CellBuffer {
            col: self.row.len(),
            ..CellBuffer::default()
        };
        for a in e.attributes() {
            let a = a?;
            match a.key {
                QName(b"r") => match get_row_column(&a.value) {
                    Ok((_, col)) => cell.col = col as usize,
                    Err(err) => warn!("{err} in sheet '{}'", self.sheet),
                },
                QName(b"t") => cell.typ = CellType::from_attribute(&a.value),
                QName(b"s") => cell.style = atoi_simd::parse::<usize>(&a.value).ok(),
                _ => (),
            }
        }
        self.cell = cell;
        Ok(())
    }

    fn end_cell(&mut self) {
        let cell = mem::take(&mut self.cell);
        let col = cell.col;
        let parsed = self.resolve(cell);
        if col < self.row.len() {
            self.row[col] = parsed;
        } else {
            // missing cells become empty values
            self.row.resize(col, ParsedCell::default());
            self.row.push(parsed);
        }
    }

    fn style_format(&self, style: Option<usize>) -> StyleFormat {
        let id = style.unwrap_or(0);
        match self.parts.styles.get(id) {
            Some(format) => format,
            None => {
                if style.is_some() {
                    warn!("unknown style id {id} in sheet '{}'", self.sheet);
                }
                StyleFormat::default()
            }
        }
    }

    fn resolve(&self, cell: CellBuffer) -> ParsedCell {
        if cell.text.is_empty() {
            return ParsedCell::default();
        }
        let raw = cell.text;
        let mut sub_second = false;
        let value = match cell.typ {
            CellType::SharedString => {
                let index = atoi_simd::parse::<usize>(raw.trim().as_bytes()).ok();
                match index.and_then(|i| self.parts.strings.get(i)) {
                    Some(s) => Value::String(s.clone()),
                    None => {
                        warn!(
                            "shared string index {raw:?} out of range in sheet '{}'",
                            self.sheet
                        );
                        Value::String(String::new())
                    }
                }
            }
            CellType::InlineString | CellType::FormulaString | CellType::Error => {
                Value::String(raw)
            }
            CellType::Boolean => match raw.trim() {
                "1" | "true" | "TRUE" => Value::Boolean(true),
                "0" | "false" | "FALSE" => Value::Boolean(false),
                _ => Value::String(raw),
            },
            CellType::Date => match ExcelDateTime::parse_iso(&raw) {
                Some((dt, kind)) => Value::DateTime(dt).convert(kind),
                None => Value::String(raw),
            },
            CellType::Number => {
                let format = self.style_format(cell.style);
                let number = fast_float2::parse::<f64, _>(raw.trim().as_bytes()).ok();
                match (format.format.field_type(), number) {
                    (Some(kind), Some(serial)) => {
                        sub_second = format.sub_second;
                        let dt = ExcelDateTime::from_workbook_serial(serial, self.parts.manifest.is_1904);
                        Value::DateTime(dt).convert(kind)
                    }
                    _ => Value::parse_number(&raw).unwrap_or(Value::String(raw)),
                }
            }
        };
        ParsedCell { value, sub_second }
    }
}

impl<S: RowSink> XmlHandler for SheetParser<'_, S> {
    fn start_element(
        &mut self,
        stack: &mut StateStack,
        e: &BytesStart<'_>,
        decoder: Decoder,
    ) -> Result<(), XlsxError> {
        let name = e.local_name();
        match (stack.current(), name.as_ref()) {
            (State::Default, b"sheetData") => stack.push(State::SheetData, b"sheetData"),
            (State::Default, b"cols") => stack.push(State::ColumnDefs, b"cols"),
            (State::ColumnDefs, b"col") => {
                let mut column = ColumnDef::default();
                for a in e.attributes() {
                    let a = a?;
                    match a.key {
                        QName(b"min") => column.min = atoi_simd::parse::<u32>(&a.value).unwrap_or(0),
                        QName(b"max") => column.max = atoi_simd::parse::<u32>(&a.value).unwrap_or(0),
                        QName(b"width") => {
                            column.width = fast_float2::parse::<f64, _>(&*a.value).ok()
                        }
                        QName(b"style") => column.style = atoi_simd::parse::<usize>(&a.value).ok(),
                        QName(b"hidden") => {
                            column.hidden = matches!(&*a.decode_and_unescape_value(decoder)?, "1" | "true")
                        }
                        QName(b"customWidth") => {
                            column.custom_width =
                                matches!(&*a.decode_and_unescape_value(decoder)?, "1" | "true")
                        }
                        _ => (),
                    }
                }
                self.columns.push(column);
                Ok(())
            }
            (State::SheetData, b"row") => {
                self.start_row(e)?;
                stack.push(State::Row, b"row")
            }
            (State::Row, b"c") => {
                self.start_cell(e)?;
                stack.push(State::Cell, b"c")
            }
            (State::Cell, b"v" | b"t") => stack.push(State::CellText, name.as_ref()),
            (State::Cell, b"rPh") => stack.push(State::Default, b"rPh"),
            _ => Ok(()),
        }
    }

    fn end_element(&mut self, state: State) -> Result<(), XlsxError> {
        match state {
            State::ColumnDefs => {
                let columns = mem::take(&mut self.columns);
                self.sink.on_columns(columns);
            }
            State::Row => {
                let row = mem::take(&mut self.row);
                self.emit_row(row);
                self.next_row = self.current_row + 1;
            }
            State::Cell => self.end_cell(),
            _ => (),
        }
        Ok(())
    }

    fn characters(&mut self, state: State, text: &str) {
        if state == State::CellText {
            self.cell.text.push_str(text);
        }
    }
}

/// Streams the worksheet part at `path` into `sink`.
///
/// Rows completed before an error have already been delivered.
pub(crate) fn parse_sheet<S: RowSink>(
    zip: &mut Archive,
    path: &str,
    sheet: &str,
    parts: &WorkbookParts,
    sink: &mut S,
) -> Result<(), XlsxError> {
    let mut xml = match xml_reader(zip, path) {
        None => return Err(XlsxError::FileNotFound(path.to_string())),
        Some(x) => x?,
    };
    debug!("parsing sheet '{sheet}' from '{path}'");
    let mut parser = SheetParser::new(parts, sink, sheet);
    let result = drive(&mut xml, &mut parser, path);
    debug!("sheet '{sheet}': {} row(s) read", parser.rows);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::CellFormat;
    use crate::xlsx::StyleFormatTable;
    use quick_xml::Reader as XmlReader;

    #[derive(Default)]
    struct Rows {
        columns: Vec<ColumnDef>,
        rows: Vec<Vec<Value>>,
        sub_second: Vec<bool>,
    }

    impl RowSink for Rows {
        fn on_columns(&mut self, columns: Vec<ColumnDef>) {
            self.columns = columns;
        }

        fn on_row(&mut self, row: Vec<ParsedCell>) {
            self.sub_second.push(row.iter().any(|c| c.sub_second));
            self.rows.push(row.into_iter().map(|c| c.value).collect());
        }
    }

    fn parts() -> WorkbookParts {
        let mut styles = StyleFormatTable::default();
        styles.push(StyleFormat::new(CellFormat::General));
        styles.push(StyleFormat::new(CellFormat::Date));
        styles.push(StyleFormat {
            format: CellFormat::DateTime,
            sub_second: true,
        });
        styles.push(StyleFormat::new(CellFormat::Time));
        WorkbookParts {
            strings: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            styles,
            ..WorkbookParts::default()
        }
    }

    fn parse(parts: &WorkbookParts, sheet_data: &str) -> (Rows, Result<(), XlsxError>) {
        let xml = format!(
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">{sheet_data}</worksheet>"#
        );
        let mut reader = XmlReader::from_str(&xml);
        let config = reader.config_mut();
        config.check_end_names = false;
        config.expand_empty_elements = true;
        let mut rows = Rows::default();
        let result = {
            let mut parser = SheetParser::new(parts, &mut rows, "test");
            drive(&mut reader, &mut parser, "test.xml")
        };
        (rows, result)
    }

    #[test]
    fn test_shared_string_resolution() {
        let parts = parts();
        let (rows, result) = parse(
            &parts,
            r#"<sheetData><row r="1"><c r="A1" t="s"><v>2</v></c><c r="B1" t="s"><v>7</v></c></row></sheetData>"#,
        );
        result.unwrap();
        assert_eq!(
            rows.rows,
            vec![vec![Value::from("c"), Value::String(String::new())]]
        );
    }

    #[test]
    fn test_cell_types() {
        let parts = parts();
        let (rows, result) = parse(
            &parts,
            r#"<sheetData><row r="1">
<c r="A1"><v>42</v></c>
<c r="B1"><v>2.5</v></c>
<c r="C1" t="b"><v>1</v></c>
<c r="D1" t="inlineStr"><is><r><t>in</t></r><r><t>line</t></r><rPh><t>x</t></rPh></is></c>
<c r="E1" t="str"><f>A1&amp;"!"</f><v>42!</v></c>
<c r="F1" t="e"><v>#N/A</v></c>
<c r="G1" t="d"><v>2024-01-15T10:30:00</v></c>
<c r="H1" s="1"><v>45306</v></c>
<c r="I1" s="3"><v>0.5</v></c>
<c r="J1"/>
</row></sheetData>"#,
        );
        result.unwrap();
        let dt = ExcelDateTime::from_ymd_hms_milli(2024, 1, 15, 10, 30, 0, 0).unwrap();
        assert_eq!(
            rows.rows[0],
            vec![
                Value::Integer(42),
                Value::Real(2.5),
                Value::Boolean(true),
                Value::from("inline"),
                Value::from("42!"),
                Value::from("#N/A"),
                Value::DateTime(dt),
                Value::Date(ExcelDateTime::from_ymd(2024, 1, 15).unwrap()),
                Value::Time(ExcelDateTime::from_hms_milli(12, 0, 0, 0).unwrap()),
                Value::Empty,
            ]
        );
    }

    #[test]
    fn test_gaps() {
        let parts = parts();
        let (rows, result) = parse(
            &parts,
            r#"<sheetData>
<row r="2"><c r="B2"><v>1</v></c><c r="D2"><v>2</v></c></row>
<row r="4"><c r="A4"><v>3</v></c></row>
<row><c><v>4</v></c><c><v>5</v></c></row>
</sheetData>"#,
        );
        result.unwrap();
        assert_eq!(
            rows.rows,
            vec![
                vec![],
                vec![Value::Empty, Value::Integer(1), Value::Empty, Value::Integer(2)],
                vec![],
                vec![Value::Integer(3)],
                vec![Value::Integer(4), Value::Integer(5)],
            ]
        );
    }

    #[test]
    fn test_columns_and_sub_second() {
        let parts = parts();
        let (rows, result) = parse(
            &parts,
            r#"<cols><col min="1" max="2" width="12.5" style="2" customWidth="1"/><col min="3" max="3" hidden="1"/></cols>
<sheetData><row r="1"><c r="A1" s="2"><v>45306.25</v></c></row></sheetData>"#,
        );
        result.unwrap();
        assert_eq!(
            rows.columns,
            vec![
                ColumnDef {
                    min: 1,
                    max: 2,
                    width: Some(12.5),
                    style: Some(2),
                    hidden: false,
                    custom_width: true,
                },
                ColumnDef {
                    min: 3,
                    max: 3,
                    hidden: true,
                    ..ColumnDef::default()
                },
            ]
        );
        assert!(rows.columns[0].contains(1));
        assert!(!rows.columns[0].contains(2));
        assert_eq!(rows.sub_second, vec![true]);
        assert_eq!(
            rows.rows[0][0].as_datetime().map(|d| d.time()),
            Some((6, 0, 0, 0))
        );
    }

    #[test]
    fn test_date1904() {
        let mut parts = parts();
        parts.manifest.is_1904 = true;
        let (rows, result) = parse(
            &parts,
            r#"<sheetData><row r="1"><c r="A1" s="1"><v>43844</v></c></row></sheetData>"#,
        );
        result.unwrap();
        assert_eq!(
            rows.rows[0][0],
            Value::Date(ExcelDateTime::from_ymd(2024, 1, 15).unwrap())
        );
    }

    #[test]
    fn test_row_number_out_of_range() {
        let parts = parts();
        let (rows, result) = parse(
            &parts,
            r#"<sheetData><row r="1"><c r="A1"><v>1</v></c></row><row r="1048577"><c><v>2</v></c></row></sheetData>"#,
        );
        assert!(matches!(result, Err(XlsxError::CellReference(_))));
        assert_eq!(rows.rows, vec![vec![Value::Integer(1)]]);

        let (rows, result) = parse(
            &parts,
            r#"<sheetData><row r="4294967295"><c><v>2</v></c></row></sheetData>"#,
        );
        assert!(matches!(result, Err(XlsxError::CellReference(_))));
        assert!(rows.rows.is_empty());
    }

    #[test]
    fn test_truncated_sheet_keeps_rows() {
        let parts = parts();
        let (rows, result) = parse(
            &parts,
            r#"<sheetData><row r="1"><c r="A1"><v>1</v></c></row><row r="2"><c r="A2"><v>2"#,
        );
        assert!(result.is_err());
        assert_eq!(rows.rows, vec![vec![Value::Integer(1)]]);
    }
}
