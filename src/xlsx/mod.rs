// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

//! Part-level access to an xlsx package: archive helpers, the workbook
//! manifest, relationships and the shared string table.

mod events;
pub(crate) mod sheet_parser;
mod style_parser;
pub(crate) mod writer;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{BufReader, Cursor, Read};
use std::sync::Arc;

use log::{debug, warn};
use quick_xml::{
    encoding::Decoder,
    events::{
        attributes::{Attribute, Attributes},
        BytesStart, Event,
    },
    name::QName,
    Reader as XmlReader,
};
use zip::read::{ZipArchive, ZipFile};
use zip::result::ZipError;

use self::events::{drive, State, StateStack, XmlHandler};
pub use self::sheet_parser::ColumnDef;
pub use self::style_parser::StyleFormatTable;

/// A package held in memory. Cloning shares the bytes and the central
/// directory, so each table can keep its own handle.
pub(crate) type Archive = ZipArchive<Cursor<Arc<[u8]>>>;

pub(crate) type XlReader<'a> = XmlReader<BufReader<ZipFile<'a, Cursor<Arc<[u8]>>>>>;

/// Maximum number of rows allowed in an xlsx file
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of columns allowed in an xlsx file
pub const MAX_COLUMNS: u32 = 16_384;

pub(crate) const WORKBOOK_PART: &str = "xl/workbook.xml";
pub(crate) const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
pub(crate) const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
pub(crate) const STYLES_PART: &str = "xl/styles.xml";
pub(crate) const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub(crate) const CALC_CHAIN_PART: &str = "xl/calcChain.xml";

/// Signature of a compound file, the container of encrypted packages
const CFB_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// An enum for all errors of the crate
#[derive(Debug)]
pub enum XlsxError {
    /// Io error
    Io(std::io::Error),
    /// Zip error
    Zip(zip::result::ZipError),
    /// Xml error
    Xml(quick_xml::Error),
    /// Xml attribute error
    XmlAttr(quick_xml::events::attributes::AttrError),
    /// XML Encoding error
    Encoding(quick_xml::encoding::EncodingError),
    /// `ParseInt` error
    ParseInt(std::num::ParseIntError),
    /// Float error
    ParseFloat(std::num::ParseFloatError),
    /// Unexpected end of xml
    XmlEof(&'static str),
    /// Elements nested deeper than the parser state stack allows
    StateStackOverflow(String),
    /// Too many tokenizer events without any element boundary
    StallDetected {
        /// part being parsed
        part: String,
        /// consecutive events seen
        events: usize,
    },
    /// File not found
    FileNotFound(String),
    /// Workbook is password protected
    Password,
    /// Invalid cell reference
    CellReference(String),
    /// No live record has this id
    FeatureNotFound(i64),
    /// Field index out of range
    FieldIndex(usize),
    /// Field permutation is not a permutation of the field indices
    FieldMap,
    /// Record width does not match the field list
    FieldCount {
        /// number of fields
        expected: usize,
        /// number of values
        found: usize,
    },
    /// Sheet tables have no geometry fields
    GeometryFields,
    /// Dataset is not opened for update
    ReadOnly,
    /// Layer index out of range
    LayerIndex(usize),
    /// Invalid or duplicate sheet name
    SheetName(String),
    /// Unknown value of an open option
    OpenOption(String),
    /// The sheet could not be parsed
    SheetParse {
        /// sheet name
        sheet: String,
        /// error message of the failed parse
        reason: String,
    },
    /// Some sheets could not be written
    Flush(Vec<(String, XlsxError)>),
    /// Unexpected error
    Unexpected(&'static str),
}

from_err!(std::io::Error, XlsxError, Io);
from_err!(zip::result::ZipError, XlsxError, Zip);
from_err!(quick_xml::Error, XlsxError, Xml);
from_err!(std::num::ParseFloatError, XlsxError, ParseFloat);
from_err!(std::num::ParseIntError, XlsxError, ParseInt);
from_err!(quick_xml::encoding::EncodingError, XlsxError, Encoding);
from_err!(quick_xml::events::attributes::AttrError, XlsxError, XmlAttr);

impl std::fmt::Display for XlsxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XlsxError::Io(e) => write!(f, "I/O error: {e}"),
            XlsxError::Zip(e) => write!(f, "Zip error: {e}"),
            XlsxError::Xml(e) => write!(f, "Xml error: {e}"),
            XlsxError::XmlAttr(e) => write!(f, "Xml attribute error: {e}"),
            XlsxError::Encoding(e) => write!(f, "XML encoding error: {e}"),
            XlsxError::ParseInt(e) => write!(f, "Parse integer error: {e}"),
            XlsxError::ParseFloat(e) => write!(f, "Parse float error: {e}"),
            XlsxError::XmlEof(e) => write!(f, "Unexpected end of xml, expecting '</{e}>'"),
            XlsxError::StateStackOverflow(e) => {
                write!(f, "Element '{e}' is nested too deeply")
            }
            XlsxError::StallDetected { part, events } => write!(
                f,
                "Parsing of '{part}' aborted after {events} events without any element"
            ),
            XlsxError::FileNotFound(e) => write!(f, "File not found '{e}'"),
            XlsxError::Password => write!(f, "Workbook is password protected"),
            XlsxError::CellReference(e) => write!(f, "Invalid cell reference '{e}'"),
            XlsxError::FeatureNotFound(fid) => write!(f, "No record with id {fid}"),
            XlsxError::FieldIndex(i) => write!(f, "Field index {i} out of range"),
            XlsxError::FieldMap => write!(f, "Invalid field permutation"),
            XlsxError::FieldCount { expected, found } => {
                write!(f, "Expecting {expected} values, got {found}")
            }
            XlsxError::GeometryFields => write!(f, "Sheet tables have no geometry fields"),
            XlsxError::ReadOnly => write!(f, "Dataset is opened read-only"),
            XlsxError::LayerIndex(i) => write!(f, "Layer index {i} out of range"),
            XlsxError::SheetName(n) => write!(f, "Invalid sheet name '{n}'"),
            XlsxError::OpenOption(o) => write!(f, "Invalid open option '{o}'"),
            XlsxError::SheetParse { sheet, reason } => {
                write!(f, "Sheet '{sheet}' could not be parsed: {reason}")
            }
            XlsxError::Flush(errors) => {
                write!(f, "Failed to write {} sheet(s):", errors.len())?;
                for (sheet, e) in errors {
                    write!(f, " '{sheet}': {e};")?;
                }
                Ok(())
            }
            XlsxError::Unexpected(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for XlsxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            XlsxError::Io(e) => Some(e),
            XlsxError::Zip(e) => Some(e),
            XlsxError::Xml(e) => Some(e),
            XlsxError::XmlAttr(e) => Some(e),
            XlsxError::Encoding(e) => Some(e),
            XlsxError::ParseInt(e) => Some(e),
            XlsxError::ParseFloat(e) => Some(e),
            _ => None,
        }
    }
}

/// A worksheet declared in the workbook part
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SheetEntry {
    pub(crate) name: String,
    pub(crate) rid: String,
    pub(crate) sheet_id: u32,
    /// Part path, normalised to `xl/...`
    pub(crate) path: String,
}

/// Sheets of the workbook part, in tab order
#[derive(Debug, Clone, Default)]
pub(crate) struct WorkbookManifest {
    pub(crate) sheets: Vec<SheetEntry>,
    pub(crate) is_1904: bool,
}

/// The small, whole-file parts read when a package is opened
#[derive(Debug, Default)]
pub(crate) struct WorkbookParts {
    pub(crate) manifest: WorkbookManifest,
    pub(crate) strings: Vec<String>,
    pub(crate) styles: StyleFormatTable,
}

impl WorkbookParts {
    /// Opens the package and reads manifest, shared strings and styles.
    pub(crate) fn read(bytes: Arc<[u8]>) -> Result<(Archive, WorkbookParts), XlsxError> {
        let mut zip = open_archive(bytes)?;
        let relationships = read_relationships(&mut zip)?;
        let manifest = read_workbook(&mut zip, &relationships)?;
        let strings = read_shared_strings(&mut zip);
        let styles = style_parser::read_styles(&mut zip);
        debug!(
            "opened package with {} sheet(s), {} shared string(s), {} style(s)",
            manifest.sheets.len(),
            strings.len(),
            styles.len()
        );
        Ok((
            zip,
            WorkbookParts {
                manifest,
                strings,
                styles,
            },
        ))
    }
}

pub(crate) fn open_archive(bytes: Arc<[u8]>) -> Result<Archive, XlsxError> {
    check_for_password_protected(&bytes)?;
    Ok(ZipArchive::new(Cursor::new(bytes))?)
}

fn check_for_password_protected(bytes: &[u8]) -> Result<(), XlsxError> {
    if bytes.starts_with(&CFB_SIGNATURE) {
        return Err(XlsxError::Password);
    }
    Ok(())
}

/// Actual name of a part, looked up ASCII case-insensitively
pub(crate) fn find_part(zip: &Archive, path: &str) -> Option<String> {
    zip.file_names()
        .find(|n| n.eq_ignore_ascii_case(path))
        .map(str::to_owned)
}

pub(crate) fn xml_reader<'a>(
    zip: &'a mut Archive,
    path: &str,
) -> Option<Result<XlReader<'a>, XlsxError>> {
    let actual_path = find_part(zip, path)?;
    match zip.by_name(&actual_path) {
        Ok(f) => {
            let mut r = XmlReader::from_reader(BufReader::new(f));
            let config = r.config_mut();
            config.check_end_names = false;
            config.trim_text(false);
            config.check_comments = false;
            config.expand_empty_elements = true;
            Some(Ok(r))
        }
        Err(ZipError::FileNotFound) => None,
        Err(e) => Some(Err(e.into())),
    }
}

/// Reads a whole part, `None` if the package does not contain it
pub(crate) fn read_part(zip: &mut Archive, path: &str) -> Result<Option<Vec<u8>>, XlsxError> {
    let Some(actual_path) = find_part(zip, path) else {
        return Ok(None);
    };
    let mut file = zip.by_name(&actual_path)?;
    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

/// search through an Element's attributes for the named one
pub(crate) fn get_attribute<'a>(
    atts: Attributes<'a>,
    n: QName,
) -> Result<Option<&'a [u8]>, XlsxError> {
    for a in atts {
        match a {
            Ok(Attribute {
                key,
                value: Cow::Borrowed(value),
            }) if key == n => return Ok(Some(value)),
            Err(e) => return Err(XlsxError::XmlAttr(e)),
            _ => {} // ignore other attributes
        }
    }
    Ok(None)
}

/// Converts a cell reference (e.g. "C12") into its position (row, column),
/// 0 based.
pub(crate) fn get_row_column(range: &[u8]) -> Result<(u32, u32), XlsxError> {
    let invalid = || XlsxError::CellReference(String::from_utf8_lossy(range).into_owned());
    let split = range
        .iter()
        .position(|c| c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (letters, digits) = range.split_at(split);
    if letters.is_empty() || letters.len() > 3 {
        return Err(invalid());
    }
    let mut col = 0u32;
    for c in letters {
        match c.to_ascii_uppercase() {
            c @ b'A'..=b'Z' => col = col * 26 + (c - b'A') as u32 + 1,
            _ => return Err(invalid()),
        }
    }
    let row = atoi_simd::parse::<u32>(digits).map_err(|_| invalid())?;
    if row == 0 || row > MAX_ROWS || col > MAX_COLUMNS {
        return Err(invalid());
    }
    Ok((row - 1, col - 1))
}

/// Convert the integer to Excelsheet column title.
/// If the column number not in 1~16384, an Error is returned.
pub(crate) fn column_number_to_name(num: u32) -> Result<Vec<u8>, XlsxError> {
    if num >= MAX_COLUMNS {
        return Err(XlsxError::Unexpected("column number overflow"));
    }
    let mut col: Vec<u8> = Vec::new();
    let mut num = num + 1;
    while num > 0 {
        let integer = ((num - 1) % 26 + 65) as u8;
        col.push(integer);
        num = (num - 1) / 26;
    }
    col.reverse();
    Ok(col)
}

/// Shared strings, one entry per `<si>`, rich text runs concatenated
#[derive(Debug, Default)]
struct SharedStringReader {
    strings: Vec<String>,
}

impl XmlHandler for SharedStringReader {
    fn start_element(
        &mut self,
        stack: &mut StateStack,
        e: &BytesStart<'_>,
        _decoder: Decoder,
    ) -> Result<(), XlsxError> {
        match (stack.current(), e.local_name().as_ref()) {
            (State::Default, b"si") => {
                self.strings.push(String::new());
                stack.push(State::SharedStringEntry, b"si")
            }
            (State::SharedStringEntry, b"t") => stack.push(State::SharedStringText, b"t"),
            // phonetic runs carry their own <t>, mask them
            (State::SharedStringEntry, b"rPh") => stack.push(State::Default, b"rPh"),
            _ => Ok(()),
        }
    }

    fn end_element(&mut self, _state: State) -> Result<(), XlsxError> {
        Ok(())
    }

    fn characters(&mut self, state: State, text: &str) {
        if state == State::SharedStringText {
            if let Some(s) = self.strings.last_mut() {
                s.push_str(text);
            }
        }
    }
}

/// Reads the shared string table.
///
/// A missing part gives an empty table; a malformed one keeps the entries
/// read before the failure.
pub(crate) fn read_shared_strings(zip: &mut Archive) -> Vec<String> {
    let mut xml = match xml_reader(zip, SHARED_STRINGS_PART) {
        None => return Vec::new(),
        Some(Ok(x)) => x,
        Some(Err(e)) => {
            warn!("cannot read shared strings: {e}");
            return Vec::new();
        }
    };
    let mut reader = SharedStringReader::default();
    if let Err(e) = drive(&mut xml, &mut reader, SHARED_STRINGS_PART) {
        warn!(
            "malformed shared strings, keeping {} entries: {e}",
            reader.strings.len()
        );
    }
    reader.strings
}

pub(crate) fn read_relationships(
    zip: &mut Archive,
) -> Result<BTreeMap<Vec<u8>, String>, XlsxError> {
    let mut xml = match xml_reader(zip, WORKBOOK_RELS_PART) {
        None => {
            return Err(XlsxError::FileNotFound(WORKBOOK_RELS_PART.to_string()));
        }
        Some(x) => x?,
    };
    let mut relationships = BTreeMap::new();
    let mut buf = Vec::with_capacity(64);
    loop {
        buf.clear();
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"Relationship" => {
                let mut id = Vec::new();
                let mut target = String::new();
                for a in e.attributes() {
                    match a.map_err(XlsxError::XmlAttr)? {
                        Attribute {
                            key: QName(b"Id"),
                            value: v,
                        } => id.extend_from_slice(&v),
                        Attribute {
                            key: QName(b"Target"),
                            value: v,
                        } => target = xml.decoder().decode(&v)?.into_owned(),
                        _ => (),
                    }
                }
                relationships.insert(id, target);
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"Relationships" => break,
            Ok(Event::Eof) => return Err(XlsxError::XmlEof("Relationships")),
            Err(e) => return Err(XlsxError::Xml(e)),
            _ => (),
        }
    }
    Ok(relationships)
}

/// Normalises a relationship target to a package path under `xl/`
pub(crate) fn normalize_target(target: &str) -> String {
    // target may have pre-prended "/xl/" or "xl/" path
    if let Some(stripped) = target.strip_prefix('/') {
        stripped.to_string()
    } else if target.starts_with("xl/") {
        target.to_string()
    } else {
        format!("xl/{target}")
    }
}

pub(crate) fn read_workbook(
    zip: &mut Archive,
    relationships: &BTreeMap<Vec<u8>, String>,
) -> Result<WorkbookManifest, XlsxError> {
    let mut xml = match xml_reader(zip, WORKBOOK_PART) {
        None => return Err(XlsxError::FileNotFound(WORKBOOK_PART.to_string())),
        Some(x) => x?,
    };
    let mut manifest = WorkbookManifest::default();
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"sheet" => {
                let mut name = String::new();
                let mut rid = String::new();
                let mut sheet_id = 0;
                for a in e.attributes() {
                    let a = a.map_err(XlsxError::XmlAttr)?;
                    match a.key {
                        QName(b"name") => {
                            name = a.decode_and_unescape_value(xml.decoder())?.to_string();
                        }
                        QName(b"sheetId") => {
                            sheet_id = atoi_simd::parse::<u32>(&a.value).unwrap_or(0);
                        }
                        key if key.local_name().as_ref() == b"id" && key.prefix().is_some() => {
                            rid = a.decode_and_unescape_value(xml.decoder())?.to_string();
                        }
                        _ => (),
                    }
                }
                let Some(target) = relationships.get(rid.as_bytes()) else {
                    warn!("sheet '{name}' has no relationship '{rid}', skipping it");
                    continue;
                };
                let path = normalize_target(target);
                match path.split('/').nth(1) {
                    Some("worksheets") => manifest.sheets.push(SheetEntry {
                        name,
                        rid,
                        sheet_id,
                        path,
                    }),
                    _ => warn!("sheet '{name}' is not a worksheet ({path}), skipping it"),
                }
            }
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"workbookPr" => {
                manifest.is_1904 = match e.try_get_attribute("date1904")? {
                    Some(c) => ["1", "true"].contains(
                        &c.decode_and_unescape_value(xml.decoder())
                            .map_err(XlsxError::Xml)?
                            .as_ref(),
                    ),
                    None => false,
                };
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"workbook" => break,
            Ok(Event::Eof) => return Err(XlsxError::XmlEof("workbook")),
            Err(e) => return Err(XlsxError::Xml(e)),
            _ => (),
        }
    }
    Ok(manifest)
}
