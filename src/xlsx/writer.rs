// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

//! Writing side of the package: worksheet serialization and patching of
//! the parts that list worksheets (workbook, relationships, content
//! types) and their date styles.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Write};

use log::{debug, warn};
use quick_xml::{
    events::{BytesEnd, BytesStart, Event},
    name::QName,
    Reader, Writer,
};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{
    column_number_to_name, find_part, normalize_target, read_part, read_relationships, Archive,
    ColumnDef, SheetEntry, StyleFormatTable, WorkbookManifest, XlsxError, CALC_CHAIN_PART,
    CONTENT_TYPES_PART, MAX_COLUMNS, MAX_ROWS, STYLES_PART, WORKBOOK_PART, WORKBOOK_RELS_PART,
};
use crate::datatype::{FieldType, Value};
use crate::formats::{CellFormat, StyleFormat};
use crate::layer::SheetTable;
use crate::store::TableStore;

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const WORKSHEET_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
const STYLES_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";
const WORKSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
const STYLES_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";

/// First id available for custom number formats
const FIRST_CUSTOM_NUM_FMT: u32 = 164;

/// Number format of an appended cell style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumFmt {
    Builtin(u32),
    Custom(&'static str),
}

fn num_fmt_for(format: StyleFormat) -> NumFmt {
    match (format.format, format.sub_second) {
        (CellFormat::General, _) => NumFmt::Builtin(0),
        (CellFormat::Date, _) => NumFmt::Builtin(14),
        (CellFormat::Time, false) => NumFmt::Builtin(21),
        (CellFormat::Time, true) => NumFmt::Custom("hh:mm:ss.000"),
        (CellFormat::DateTime, false) => NumFmt::Custom(r"yyyy\-mm\-dd hh:mm:ss"),
        (CellFormat::DateTime, true) => NumFmt::Custom(r"yyyy\-mm\-dd hh:mm:ss.000"),
    }
}

/// Cell styles the written sheets refer to: the existing ones, plus the
/// ones appended to the stylesheet by this write
#[derive(Debug, Clone, Default)]
pub(crate) struct StylePlan {
    table: StyleFormatTable,
    appended: Vec<NumFmt>,
}

impl StylePlan {
    pub(crate) fn new(styles: &StyleFormatTable) -> Self {
        StylePlan {
            table: styles.clone(),
            appended: Vec::new(),
        }
    }

    /// Style id for temporal values of a field, appending a style if the
    /// stylesheet has none of this kind
    pub(crate) fn style_for(&mut self, format: CellFormat, sub_second: bool) -> usize {
        let format = StyleFormat {
            format,
            sub_second: sub_second && format != CellFormat::Date,
        };
        if self.table.is_empty() {
            // style 0 is the default of every cell
            let general = StyleFormat::new(CellFormat::General);
            self.table.push(general);
            self.appended.push(num_fmt_for(general));
        }
        if let Some(id) = self.table.find(format.format, format.sub_second) {
            return id;
        }
        self.appended.push(num_fmt_for(format));
        self.table.push(format)
    }

    fn is_changed(&self) -> bool {
        !self.appended.is_empty()
    }

    fn custom_formats(&self) -> Vec<&'static str> {
        let mut codes = Vec::new();
        for f in &self.appended {
            if let NumFmt::Custom(code) = f {
                if !codes.contains(code) {
                    codes.push(*code);
                }
            }
        }
        codes
    }
}

/// Field type to the format of the style its values are written with
fn field_format(field_type: FieldType) -> Option<CellFormat> {
    match field_type {
        FieldType::Date => Some(CellFormat::Date),
        FieldType::DateTime => Some(CellFormat::DateTime),
        FieldType::Time => Some(CellFormat::Time),
        _ => None,
    }
}

/// Serializes a table into a worksheet part.
///
/// Strings are written inline and temporal values as serial numbers with a
/// date style taken from `styles`. Empty values produce no cell; a record
/// without any value is written as an empty row so its position survives.
pub(crate) fn write_sheet<S: TableStore + Default>(
    table: &SheetTable<S>,
    styles: &mut StylePlan,
    is_1904: bool,
) -> Result<Vec<u8>, XlsxError> {
    let store = table.store();
    let fields = store.fields();
    if fields.len() > MAX_COLUMNS as usize {
        return Err(XlsxError::Unexpected("too many fields for a worksheet"));
    }
    let header = table.header_line() && !fields.is_empty();
    let row_count = store.record_count() + header as usize;
    if row_count > MAX_ROWS as usize {
        return Err(XlsxError::Unexpected("too many records for a worksheet"));
    }
    let cell_styles: Vec<Option<usize>> = fields
        .iter()
        .map(|f| field_format(f.field_type).map(|format| styles.style_for(format, f.sub_second)))
        .collect();
    let columns = (0..fields.len() as u32)
        .map(|c| column_number_to_name(c).map(|n| n.into_iter().map(char::from).collect()))
        .collect::<Result<Vec<String>, _>>()?;

    let mut xml = Vec::with_capacity(256 + row_count * fields.len() * 24);
    write!(
        xml,
        r#"{XML_DECL}<worksheet xmlns="{MAIN_NS}" xmlns:r="{REL_NS}">"#
    )?;
    write_column_defs(&mut xml, table.columns())?;
    if row_count == 0 {
        xml.extend_from_slice(b"<sheetData/>");
    } else {
        xml.extend_from_slice(b"<sheetData>");
        let mut row = 0;
        if header {
            row += 1;
            write!(xml, r#"<row r="{row}">"#)?;
            for (col, field) in columns.iter().zip(fields) {
                write_inline_string(&mut xml, col, row, &field.name)?;
            }
            xml.extend_from_slice(b"</row>");
        }
        for pos in 0..store.record_count() {
            let Some(record) = store.record(pos) else {
                continue;
            };
            row += 1;
            if record.iter().all(Value::is_empty) {
                write!(xml, r#"<row r="{row}"/>"#)?;
                continue;
            }
            write!(xml, r#"<row r="{row}">"#)?;
            for ((col, value), style) in columns.iter().zip(record).zip(&cell_styles) {
                write_cell(&mut xml, col, row, value, *style, is_1904)?;
            }
            xml.extend_from_slice(b"</row>");
        }
        xml.extend_from_slice(b"</sheetData>");
    }
    xml.extend_from_slice(b"</worksheet>");
    debug!(
        "serialized sheet '{}': {} row(s), {} byte(s)",
        table.name(),
        row_count,
        xml.len()
    );
    Ok(xml)
}

fn empty_sheet() -> Vec<u8> {
    format!(r#"{XML_DECL}<worksheet xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><sheetData/></worksheet>"#)
        .into_bytes()
}

fn write_column_defs(xml: &mut Vec<u8>, columns: &[ColumnDef]) -> Result<(), XlsxError> {
    if columns.is_empty() {
        return Ok(());
    }
    xml.extend_from_slice(b"<cols>");
    for c in columns {
        write!(xml, r#"<col min="{}" max="{}""#, c.min, c.max)?;
        if let Some(width) = c.width {
            write!(xml, r#" width="{width}""#)?;
        }
        if let Some(style) = c.style {
            write!(xml, r#" style="{style}""#)?;
        }
        if c.hidden {
            xml.extend_from_slice(br#" hidden="1""#);
        }
        if c.custom_width {
            xml.extend_from_slice(br#" customWidth="1""#);
        }
        xml.extend_from_slice(b"/>");
    }
    xml.extend_from_slice(b"</cols>");
    Ok(())
}

fn write_cell(
    xml: &mut Vec<u8>,
    col: &str,
    row: usize,
    value: &Value,
    style: Option<usize>,
    is_1904: bool,
) -> Result<(), XlsxError> {
    let serial = match value {
        Value::Empty => return Ok(()),
        Value::Integer(i) => {
            write!(xml, r#"<c r="{col}{row}"><v>{i}</v></c>"#)?;
            return Ok(());
        }
        Value::Real(f) if f.is_finite() => {
            // keep the decimal point so the value reads back as a real
            write!(xml, r#"<c r="{col}{row}"><v>{f:?}</v></c>"#)?;
            return Ok(());
        }
        Value::Real(f) => {
            warn!("cell {col}{row}: cannot write non-finite number {f}");
            return Ok(());
        }
        Value::Boolean(b) => {
            write!(xml, r#"<c r="{col}{row}" t="b"><v>{}</v></c>"#, *b as u8)?;
            return Ok(());
        }
        Value::String(s) => return write_inline_string(xml, col, row, s),
        Value::Date(d) | Value::DateTime(d) => d.to_workbook_serial(is_1904),
        // times of day carry no date, they are the same in both systems
        Value::Time(d) => d.as_f64(),
    };
    match style {
        Some(s) => write!(xml, r#"<c r="{col}{row}" s="{s}"><v>{serial:?}</v></c>"#)?,
        None => write!(xml, r#"<c r="{col}{row}"><v>{serial:?}</v></c>"#)?,
    }
    Ok(())
}

fn write_inline_string(xml: &mut Vec<u8>, col: &str, row: usize, s: &str) -> Result<(), XlsxError> {
    if s.is_empty() {
        return Ok(());
    }
    let text: String = s.chars().filter(|c| is_xml_char(*c)).collect();
    if text.len() != s.len() {
        warn!("cell {col}{row}: dropping characters not allowed in xml");
    }
    let space = if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
        r#" xml:space="preserve""#
    } else {
        ""
    };
    write!(
        xml,
        r#"<c r="{col}{row}" t="inlineStr"><is><t{space}>{}</t></is></c>"#,
        quick_xml::escape::escape(text.as_str())
    )?;
    Ok(())
}

fn is_xml_char(c: char) -> bool {
    !matches!(c, '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}')
}

/// One worksheet of the package being written, in tab order
#[derive(Debug)]
pub(crate) struct SheetPlan {
    pub(crate) name: String,
    /// The sheet in the current package, `None` for a new sheet
    pub(crate) entry: Option<SheetEntry>,
    /// New sheet part, `None` to keep the current one
    pub(crate) content: Option<Vec<u8>>,
}

/// A worksheet added to the package
#[derive(Debug)]
struct NewSheet {
    name: String,
    rid: String,
    path: String,
    content: Vec<u8>,
}

/// Relationship file of a part: `dir/_rels/name.rels`
fn rels_path(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/_rels/{name}.rels"),
        None => format!("_rels/{path}.rels"),
    }
}

/// Writes a new package from `zip`, with the worksheets listed in `sheets`.
///
/// Sheets of `manifest` that no plan refers to are removed, plans without
/// an entry become new parts. Every part that does not need a change is
/// copied without recompression.
pub(crate) fn write_package(
    zip: &mut Archive,
    manifest: &WorkbookManifest,
    sheets: Vec<SheetPlan>,
    styles: &StylePlan,
) -> Result<Vec<u8>, XlsxError> {
    let kept: BTreeSet<String> = sheets
        .iter()
        .filter_map(|p| p.entry.as_ref())
        .map(|e| e.rid.clone())
        .collect();
    let removed: Vec<&SheetEntry> = manifest
        .sheets
        .iter()
        .filter(|e| !kept.contains(&e.rid))
        .collect();
    let removed_rids: BTreeSet<String> = removed.iter().map(|e| e.rid.clone()).collect();
    let mut dropped_parts: BTreeSet<String> = removed
        .iter()
        .flat_map(|e| [e.path.to_ascii_lowercase(), rels_path(&e.path).to_ascii_lowercase()])
        .collect();

    let mut rids: BTreeSet<String> = read_relationships(zip)?
        .into_keys()
        .map(|k| String::from_utf8_lossy(&k).into_owned())
        .collect();
    let mut part_names: BTreeSet<String> = zip
        .file_names()
        .map(str::to_ascii_lowercase)
        .collect();
    let mut next_rid = || {
        let mut n = rids.len() + 1;
        while rids.contains(&format!("rId{n}")) {
            n += 1;
        }
        let rid = format!("rId{n}");
        rids.insert(rid.clone());
        rid
    };

    let mut replaced: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut added = Vec::new();
    for plan in sheets {
        match (plan.entry, plan.content) {
            (Some(entry), Some(content)) => {
                debug!("rewriting '{}' for sheet '{}'", entry.path, plan.name);
                replaced.insert(entry.path.to_ascii_lowercase(), content);
            }
            (Some(_), None) => (),
            (None, content) => {
                let mut n = 1;
                while part_names.contains(&format!("xl/worksheets/sheet{n}.xml")) {
                    n += 1;
                }
                let path = format!("xl/worksheets/sheet{n}.xml");
                part_names.insert(path.clone());
                debug!("adding '{path}' for sheet '{}'", plan.name);
                added.push(NewSheet {
                    name: plan.name,
                    rid: next_rid(),
                    path,
                    content: content.unwrap_or_else(empty_sheet),
                });
            }
        }
    }
    let drop_calc_chain = !replaced.is_empty() || !removed.is_empty();
    if drop_calc_chain {
        dropped_parts.insert(CALC_CHAIN_PART.to_ascii_lowercase());
    }

    let styles_part = find_part(zip, STYLES_PART);
    let new_styles = (styles.is_changed() && styles_part.is_none()).then(|| stylesheet(styles));
    let styles_rid = new_styles.as_ref().map(|_| next_rid());

    let mut new_relationships: Vec<(String, &str, String)> = added
        .iter()
        .map(|s| {
            let target = s.path.strip_prefix("xl/").unwrap_or(&s.path).to_string();
            (s.rid.clone(), WORKSHEET_REL, target)
        })
        .collect();
    let mut new_overrides: Vec<(String, &str)> = added
        .iter()
        .map(|s| (format!("/{}", s.path), WORKSHEET_CONTENT_TYPE))
        .collect();
    if let Some(rid) = &styles_rid {
        new_relationships.push((rid.clone(), STYLES_REL, "styles.xml".to_string()));
        new_overrides.push((format!("/{STYLES_PART}"), STYLES_CONTENT_TYPE));
    }

    if let Some(bytes) = read_part(zip, WORKBOOK_PART)? {
        replaced.insert(
            WORKBOOK_PART.to_ascii_lowercase(),
            patch_workbook(&bytes, &removed_rids, &added)?,
        );
    }
    if let Some(bytes) = read_part(zip, WORKBOOK_RELS_PART)? {
        replaced.insert(
            WORKBOOK_RELS_PART.to_ascii_lowercase(),
            patch_relationships(&bytes, &removed_rids, drop_calc_chain, &new_relationships)?,
        );
    }
    if let Some(bytes) = read_part(zip, CONTENT_TYPES_PART)? {
        replaced.insert(
            CONTENT_TYPES_PART.to_ascii_lowercase(),
            patch_content_types(&bytes, &dropped_parts, &new_overrides)?,
        );
    }
    if let (true, Some(path)) = (styles.is_changed(), &styles_part) {
        if let Some(bytes) = read_part(zip, path)? {
            replaced.insert(path.to_ascii_lowercase(), patch_styles(&bytes, styles)?);
        }
    }

    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for i in 0..zip.len() {
        let file = zip.by_index_raw(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let key = name.to_ascii_lowercase();
        if dropped_parts.contains(&key) {
            debug!("dropping '{name}'");
            continue;
        }
        match replaced.remove(&key) {
            Some(bytes) => {
                out.start_file(name, options)?;
                out.write_all(&bytes)?;
            }
            None => out.raw_copy_file(file)?,
        }
    }
    for sheet in added {
        out.start_file(sheet.path, options)?;
        out.write_all(&sheet.content)?;
    }
    if let Some(bytes) = new_styles {
        out.start_file(STYLES_PART, options)?;
        out.write_all(&bytes)?;
    }
    Ok(out.finish()?.into_inner())
}

/// An empty package: workbook without sheets, its relationships, content
/// types and a stylesheet with date, time and datetime styles.
pub(crate) fn new_package() -> Result<Vec<u8>, XlsxError> {
    let mut styles = StylePlan::default();
    for (format, sub_second) in [
        (CellFormat::Date, false),
        (CellFormat::DateTime, false),
        (CellFormat::Time, false),
        (CellFormat::DateTime, true),
        (CellFormat::Time, true),
    ] {
        styles.style_for(format, sub_second);
    }
    let parts: [(&str, Vec<u8>); 5] = [
        (
            CONTENT_TYPES_PART,
            format!(
                r#"{XML_DECL}<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/{WORKBOOK_PART}" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/{STYLES_PART}" ContentType="{STYLES_CONTENT_TYPE}"/></Types>"#
            )
            .into_bytes(),
        ),
        (
            "_rels/.rels",
            format!(
                r#"{XML_DECL}<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="{WORKBOOK_PART}"/></Relationships>"#
            )
            .into_bytes(),
        ),
        (
            WORKBOOK_PART,
            format!(
                r#"{XML_DECL}<workbook xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><workbookPr/><bookViews><workbookView/></bookViews><sheets/></workbook>"#
            )
            .into_bytes(),
        ),
        (
            WORKBOOK_RELS_PART,
            format!(
                r#"{XML_DECL}<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{STYLES_REL}" Target="styles.xml"/></Relationships>"#
            )
            .into_bytes(),
        ),
        (STYLES_PART, stylesheet(&styles)),
    ];
    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in parts {
        out.start_file(name, options)?;
        out.write_all(&bytes)?;
    }
    Ok(out.finish()?.into_inner())
}

/// A whole stylesheet made of the styles of the plan
fn stylesheet(styles: &StylePlan) -> Vec<u8> {
    let codes = styles.custom_formats();
    let mut xml = format!(r#"{XML_DECL}<styleSheet xmlns="{MAIN_NS}">"#);
    if !codes.is_empty() {
        xml.push_str(&format!(r#"<numFmts count="{}">"#, codes.len()));
        for (id, code) in (FIRST_CUSTOM_NUM_FMT..).zip(&codes) {
            xml.push_str(&format!(
                r#"<numFmt numFmtId="{id}" formatCode="{}"/>"#,
                quick_xml::escape::escape(*code)
            ));
        }
        xml.push_str("</numFmts>");
    }
    xml.push_str(concat!(
        r#"<fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts>"#,
        r#"<fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>"#,
        r#"<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>"#,
        r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
    ));
    xml.push_str(&format!(r#"<cellXfs count="{}">"#, styles.appended.len()));
    for f in &styles.appended {
        xml.push_str(&xf_element(*f, &codes, FIRST_CUSTOM_NUM_FMT));
    }
    xml.push_str(concat!(
        "</cellXfs>",
        r#"<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>"#,
        "</styleSheet>"
    ));
    xml.into_bytes()
}

fn num_fmt_id(f: NumFmt, codes: &[&str], first_custom: u32) -> u32 {
    match f {
        NumFmt::Builtin(id) => id,
        NumFmt::Custom(code) => {
            let index = codes.iter().position(|c| *c == code).unwrap_or_default();
            first_custom + index as u32
        }
    }
}

fn xf_element(f: NumFmt, codes: &[&str], first_custom: u32) -> String {
    let id = num_fmt_id(f, codes, first_custom);
    let apply = if id == 0 { "" } else { r#" applyNumberFormat="1""# };
    format!(r#"<xf numFmtId="{id}" fontId="0" fillId="0" borderId="0" xfId="0"{apply}/>"#)
}

/// Copy of `e` with the attribute `key` set to `value`, or removed
fn set_attribute(
    e: &BytesStart<'_>,
    key: &str,
    value: Option<&str>,
) -> Result<BytesStart<'static>, XlsxError> {
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() != key.as_bytes() {
            out.push_attribute(a);
        }
    }
    if let Some(value) = value {
        out.push_attribute((key, value));
    }
    Ok(out)
}

fn element(is_start: bool, e: BytesStart<'static>) -> Event<'static> {
    if is_start {
        Event::Start(e)
    } else {
        Event::Empty(e)
    }
}

fn attribute_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, XlsxError> {
    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() == key {
            return Ok(Some(String::from_utf8_lossy(&a.value).into_owned()));
        }
    }
    Ok(None)
}

/// `local` with the namespace prefix of `like`
fn qualified(like: QName<'_>, local: &str) -> String {
    match like.prefix() {
        Some(p) => format!("{}:{local}", String::from_utf8_lossy(p.as_ref())),
        None => local.to_string(),
    }
}

/// Streams `bytes` through `f`, which writes whatever it keeps
fn patch_part<F>(bytes: &[u8], mut f: F) -> Result<Vec<u8>, XlsxError>
where
    F: FnMut(Event<'_>, &mut Writer<Vec<u8>>) -> Result<(), XlsxError>,
{
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(bytes.len() + 1024));
    let mut buf = Vec::with_capacity(1024);
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            e => f(e, &mut writer)?,
        }
        buf.clear();
    }
    Ok(writer.into_inner())
}

/// Depth of an element being dropped with all its content
#[derive(Debug, Default)]
struct Skip(usize);

impl Skip {
    /// Consumes the event if inside a dropped element
    fn consume(&mut self, event: &Event<'_>) -> bool {
        if self.0 == 0 {
            return false;
        }
        match event {
            Event::Start(_) => self.0 += 1,
            Event::End(_) => self.0 -= 1,
            _ => (),
        }
        true
    }

    /// Drops the element `event` opens
    fn start(&mut self, event: &Event<'_>) {
        if let Event::Start(_) = event {
            self.0 = 1;
        }
    }
}

fn patch_workbook(
    bytes: &[u8],
    removed: &BTreeSet<String>,
    added: &[NewSheet],
) -> Result<Vec<u8>, XlsxError> {
    let mut skip = Skip::default();
    // new position of each sheet of the old tab order
    let mut positions: Vec<Option<usize>> = Vec::new();
    let mut kept = 0;
    let mut max_sheet_id = 0u32;
    let write_added = |w: &mut Writer<Vec<u8>>, tag: &str, mut sheet_id: u32| {
        for sheet in added {
            sheet_id += 1;
            let mut e = BytesStart::new(tag.to_string());
            e.push_attribute(("name", sheet.name.as_str()));
            e.push_attribute(("sheetId", sheet_id.to_string().as_str()));
            e.push_attribute(("r:id", sheet.rid.as_str()));
            w.write_event(Event::Empty(e))?;
        }
        Ok::<_, XlsxError>(())
    };
    patch_part(bytes, |event, w| {
        if skip.consume(&event) {
            return Ok(());
        }
        let is_start = matches!(event, Event::Start(_));
        match &event {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"workbook" if attribute_value(e, b"xmlns:r")?.is_none() => {
                    let e = set_attribute(e, "xmlns:r", Some(REL_NS))?;
                    return Ok(w.write_event(element(is_start, e))?);
                }
                b"workbookView" if !removed.is_empty() => {
                    let e = set_attribute(e, "activeTab", None)?;
                    let e = set_attribute(&e, "firstSheet", None)?;
                    return Ok(w.write_event(element(is_start, e))?);
                }
                b"sheets" if matches!(event, Event::Empty(_)) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    w.write_event(Event::Start(BytesStart::new(tag.clone())))?;
                    write_added(w, &qualified(e.name(), "sheet"), max_sheet_id)?;
                    return Ok(w.write_event(Event::End(BytesEnd::new(tag)))?);
                }
                b"sheet" => {
                    let mut rid = None;
                    for a in e.attributes() {
                        let a = a?;
                        if a.key.as_ref() == b"sheetId" {
                            let id = atoi_simd::parse::<u32>(&a.value).unwrap_or(0);
                            max_sheet_id = max_sheet_id.max(id);
                        } else if a.key.local_name().as_ref() == b"id" && a.key.prefix().is_some() {
                            rid = Some(String::from_utf8_lossy(&a.value).into_owned());
                        }
                    }
                    if rid.is_some_and(|r| removed.contains(&r)) {
                        positions.push(None);
                        skip.start(&event);
                        return Ok(());
                    }
                    positions.push(Some(kept));
                    kept += 1;
                }
                b"definedName" => {
                    let local = attribute_value(e, b"localSheetId")?
                        .and_then(|v| v.trim().parse::<usize>().ok());
                    if let Some(old) = local {
                        match positions.get(old) {
                            Some(None) => {
                                skip.start(&event);
                                return Ok(());
                            }
                            Some(Some(new)) if *new != old => {
                                let e = set_attribute(e, "localSheetId", Some(&new.to_string()))?;
                                return Ok(w.write_event(element(is_start, e))?);
                            }
                            _ => (),
                        }
                    }
                }
                _ => (),
            },
            Event::End(e) if e.local_name().as_ref() == b"sheets" => {
                write_added(w, &qualified(e.name(), "sheet"), max_sheet_id)?;
            }
            _ => (),
        }
        Ok(w.write_event(event)?)
    })
}

fn patch_relationships(
    bytes: &[u8],
    removed: &BTreeSet<String>,
    drop_calc_chain: bool,
    added: &[(String, &str, String)],
) -> Result<Vec<u8>, XlsxError> {
    let mut skip = Skip::default();
    let write_added = |w: &mut Writer<Vec<u8>>, tag: &str| {
        for (id, kind, target) in added {
            let mut e = BytesStart::new(tag.to_string());
            e.push_attribute(("Id", id.as_str()));
            e.push_attribute(("Type", *kind));
            e.push_attribute(("Target", target.as_str()));
            w.write_event(Event::Empty(e))?;
        }
        Ok::<_, XlsxError>(())
    };
    patch_part(bytes, |event, w| {
        if skip.consume(&event) {
            return Ok(());
        }
        match &event {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attribute_value(e, b"Id")?.unwrap_or_default();
                let target = attribute_value(e, b"Target")?.unwrap_or_default();
                if removed.contains(&id)
                    || (drop_calc_chain
                        && normalize_target(&target).eq_ignore_ascii_case(CALC_CHAIN_PART))
                {
                    skip.start(&event);
                    return Ok(());
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"Relationships" => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                w.write_event(Event::Start(e.clone()))?;
                write_added(w, &qualified(e.name(), "Relationship"))?;
                return Ok(w.write_event(Event::End(BytesEnd::new(tag)))?);
            }
            Event::End(e) if e.local_name().as_ref() == b"Relationships" => {
                write_added(w, &qualified(e.name(), "Relationship"))?;
            }
            _ => (),
        }
        Ok(w.write_event(event)?)
    })
}

fn patch_content_types(
    bytes: &[u8],
    dropped_parts: &BTreeSet<String>,
    added: &[(String, &str)],
) -> Result<Vec<u8>, XlsxError> {
    let mut skip = Skip::default();
    patch_part(bytes, |event, w| {
        if skip.consume(&event) {
            return Ok(());
        }
        match &event {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Override" => {
                let part = attribute_value(e, b"PartName")?.unwrap_or_default();
                let part = part.trim_start_matches('/').to_ascii_lowercase();
                if dropped_parts.contains(&part) {
                    skip.start(&event);
                    return Ok(());
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"Types" => {
                let tag = qualified(e.name(), "Override");
                for (part, content_type) in added {
                    let mut o = BytesStart::new(tag.clone());
                    o.push_attribute(("PartName", part.as_str()));
                    o.push_attribute(("ContentType", *content_type));
                    w.write_event(Event::Empty(o))?;
                }
            }
            _ => (),
        }
        Ok(w.write_event(event)?)
    })
}

/// Number of `<numFmt>` and `<xf>` entries of `<cellXfs>`, and the highest
/// number format id in use
#[derive(Debug, Default)]
struct StylesheetCounts {
    has_num_fmts: bool,
    num_fmts: usize,
    cell_xfs: usize,
    max_num_fmt_id: u32,
}

fn count_styles(bytes: &[u8]) -> Result<StylesheetCounts, XlsxError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().expand_empty_elements = true;
    let mut counts = StylesheetCounts::default();
    let mut in_num_fmts = false;
    let mut in_cell_xfs = false;
    let mut depth = 0usize;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                depth += 1;
                match e.local_name().as_ref() {
                    b"numFmts" => {
                        counts.has_num_fmts = true;
                        in_num_fmts = true;
                    }
                    // differential formats carry numFmt elements too
                    b"numFmt" => {
                        counts.num_fmts += in_num_fmts as usize;
                        let id = attribute_value(e, b"numFmtId")?
                            .and_then(|v| v.trim().parse::<u32>().ok())
                            .unwrap_or(0);
                        counts.max_num_fmt_id = counts.max_num_fmt_id.max(id);
                    }
                    b"cellXfs" => in_cell_xfs = true,
                    // only direct children of cellXfs are styles
                    b"xf" if in_cell_xfs && depth == 3 => counts.cell_xfs += 1,
                    _ => (),
                }
            }
            Event::End(ref e) => {
                depth = depth.saturating_sub(1);
                match e.local_name().as_ref() {
                    b"numFmts" => in_num_fmts = false,
                    b"cellXfs" => in_cell_xfs = false,
                    _ => (),
                }
            }
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }
    Ok(counts)
}

/// Appends the styles of the plan to an existing stylesheet
fn patch_styles(bytes: &[u8], styles: &StylePlan) -> Result<Vec<u8>, XlsxError> {
    let counts = count_styles(bytes)?;
    if counts.cell_xfs + styles.appended.len() != styles.table.len() {
        warn!(
            "stylesheet has {} cell style(s), expecting {}",
            counts.cell_xfs,
            styles.table.len() - styles.appended.len()
        );
    }
    let codes = styles.custom_formats();
    let first_custom = FIRST_CUSTOM_NUM_FMT.max(counts.max_num_fmt_id + 1);
    let num_fmt_count = (counts.num_fmts + codes.len()).to_string();
    let xf_count = (counts.cell_xfs + styles.appended.len()).to_string();

    let write_num_fmts = |w: &mut Writer<Vec<u8>>, tag: &str| {
        for (id, code) in (first_custom..).zip(&codes) {
            let mut e = BytesStart::new(tag.to_string());
            e.push_attribute(("numFmtId", id.to_string().as_str()));
            e.push_attribute(("formatCode", *code));
            w.write_event(Event::Empty(e))?;
        }
        Ok::<_, XlsxError>(())
    };
    let write_xfs = |w: &mut Writer<Vec<u8>>, tag: &str| {
        for f in &styles.appended {
            let mut e = BytesStart::new(tag.to_string());
            let id = num_fmt_id(*f, &codes, first_custom);
            e.push_attribute(("numFmtId", id.to_string().as_str()));
            for key in ["fontId", "fillId", "borderId", "xfId"] {
                e.push_attribute((key, "0"));
            }
            if id != 0 {
                e.push_attribute(("applyNumberFormat", "1"));
            }
            w.write_event(Event::Empty(e))?;
        }
        Ok::<_, XlsxError>(())
    };

    patch_part(bytes, |event, w| {
        match &event {
            Event::Start(e) if e.local_name().as_ref() == b"styleSheet" => {
                w.write_event(Event::Start(e.clone()))?;
                if !counts.has_num_fmts && !codes.is_empty() {
                    let tag = qualified(e.name(), "numFmts");
                    let mut start = BytesStart::new(tag.clone());
                    start.push_attribute(("count", num_fmt_count.as_str()));
                    w.write_event(Event::Start(start))?;
                    write_num_fmts(w, &qualified(e.name(), "numFmt"))?;
                    w.write_event(Event::End(BytesEnd::new(tag)))?;
                }
                return Ok(());
            }
            Event::Start(e) if e.local_name().as_ref() == b"numFmts" => {
                let e = set_attribute(e, "count", Some(&num_fmt_count))?;
                return Ok(w.write_event(Event::Start(e))?);
            }
            Event::End(e) if e.local_name().as_ref() == b"numFmts" => {
                write_num_fmts(w, &qualified(e.name(), "numFmt"))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"cellXfs" => {
                let e = set_attribute(e, "count", Some(&xf_count))?;
                return Ok(w.write_event(Event::Start(e))?);
            }
            Event::End(e) if e.local_name().as_ref() == b"cellXfs" => {
                write_xfs(w, &qualified(e.name(), "xf"))?;
            }
            Event::Empty(e) if matches!(e.local_name().as_ref(), b"numFmts" | b"cellXfs") => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let is_num_fmts = e.local_name().as_ref() == b"numFmts";
                let count = if is_num_fmts { &num_fmt_count } else { &xf_count };
                w.write_event(Event::Start(set_attribute(e, "count", Some(count))?))?;
                if is_num_fmts {
                    write_num_fmts(w, &qualified(e.name(), "numFmt"))?;
                } else {
                    write_xfs(w, &qualified(e.name(), "xf"))?;
                }
                return Ok(w.write_event(Event::End(BytesEnd::new(tag)))?);
            }
            _ => (),
        }
        Ok(w.write_event(event)?)
    })
}
