// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

use std::collections::BTreeMap;
use std::io::BufRead;

use log::warn;
use quick_xml::{
    events::{attributes::Attribute, Event},
    name::QName,
    Reader,
};

use crate::formats::{builtin_format_by_id, detect_custom_number_format, CellFormat, StyleFormat};
use crate::xlsx::{xml_reader, Archive, XlsxError, STYLES_PART};

/// Semantic format of every cell style (`<cellXfs>` entry) of a workbook,
/// indexed by style id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleFormatTable {
    formats: Vec<StyleFormat>,
}

impl StyleFormatTable {
    /// Format of a style id, `None` if the id is out of range
    pub fn get(&self, id: usize) -> Option<StyleFormat> {
        self.formats.get(id).copied()
    }

    /// Number of cell styles
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Is the table empty
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// First style id with the given classification
    pub fn find(&self, format: CellFormat, sub_second: bool) -> Option<usize> {
        self.formats
            .iter()
            .position(|f| f.format == format && f.sub_second == sub_second)
    }

    pub(crate) fn push(&mut self, format: StyleFormat) -> usize {
        self.formats.push(format);
        self.formats.len() - 1
    }
}

/// Reads the style table.
///
/// A missing part gives an empty table (every style is general); a
/// malformed one keeps the styles read before the failure.
pub(crate) fn read_styles(zip: &mut Archive) -> StyleFormatTable {
    let mut table = StyleFormatTable::default();
    let mut xml = match xml_reader(zip, STYLES_PART) {
        None => return table,
        Some(Ok(x)) => x,
        Some(Err(e)) => {
            warn!("cannot read styles: {e}");
            return table;
        }
    };
    if let Err(e) = parse_styles(&mut xml, &mut table) {
        warn!("malformed styles, keeping {} cell formats: {e}", table.len());
    }
    table
}

fn parse_styles<B: BufRead>(
    xml: &mut Reader<B>,
    table: &mut StyleFormatTable,
) -> Result<(), XlsxError> {
    let mut number_formats = BTreeMap::new();
    let mut buf = Vec::with_capacity(1024);
    let mut inner_buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"numFmts" => loop {
                inner_buf.clear();
                match xml.read_event_into(&mut inner_buf) {
                    Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"numFmt" => {
                        let mut id = 0u32;
                        let mut format = String::new();
                        for a in e.attributes() {
                            match a.map_err(XlsxError::XmlAttr)? {
                                Attribute {
                                    key: QName(b"numFmtId"),
                                    value: v,
                                } => id = atoi_simd::parse::<u32>(&v).unwrap_or(0),
                                a @ Attribute {
                                    key: QName(b"formatCode"),
                                    ..
                                } => {
                                    format = a.decode_and_unescape_value(xml.decoder())?.into_owned()
                                }
                                _ => (),
                            }
                        }
                        if !format.is_empty() {
                            number_formats.insert(id, format);
                        }
                    }
                    Ok(Event::End(ref e)) if e.local_name().as_ref() == b"numFmts" => break,
                    Ok(Event::Eof) => return Err(XlsxError::XmlEof("numFmts")),
                    Err(e) => return Err(XlsxError::Xml(e)),
                    _ => (),
                }
            },
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"cellXfs" => loop {
                inner_buf.clear();
                match xml.read_event_into(&mut inner_buf) {
                    Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"xf" => {
                        let mut format = StyleFormat::default();
                        for a in e.attributes() {
                            if let Attribute {
                                key: QName(b"numFmtId"),
                                value: v,
                            } = a.map_err(XlsxError::XmlAttr)?
                            {
                                let id = atoi_simd::parse::<u32>(&v).unwrap_or(0);
                                format = match number_formats.get(&id) {
                                    Some(code) => detect_custom_number_format(code),
                                    None => builtin_format_by_id(id),
                                };
                            }
                        }
                        table.push(format);
                    }
                    Ok(Event::End(ref e)) if e.local_name().as_ref() == b"cellXfs" => break,
                    Ok(Event::Eof) => return Err(XlsxError::XmlEof("cellXfs")),
                    Err(e) => return Err(XlsxError::Xml(e)),
                    _ => (),
                }
            },
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"styleSheet" => break,
            Ok(Event::Eof) => return Err(XlsxError::XmlEof("styleSheet")),
            Err(e) => return Err(XlsxError::Xml(e)),
            _ => (),
        }
    }
    Ok(())
}
