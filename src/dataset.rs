// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

//! Workbooks as collections of sheet tables, and the options they are
//! opened with.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, warn};

use crate::layer::{ParseState, SheetSource, SheetTable};
use crate::xlsx::writer::{self, SheetPlan, StylePlan};
use crate::xlsx::{Archive, WorkbookParts, XlsxError};

/// Environment variable giving the default [`HeaderMode`]
pub const HEADERS_ENV: &str = "SHEETLAYER_HEADERS";
/// Environment variable giving the default [`FieldTypes`]
pub const FIELD_TYPES_ENV: &str = "SHEETLAYER_FIELD_TYPES";

/// Longest sheet name Excel accepts
const MAX_SHEET_NAME_LEN: usize = 31;

/// Is the first row of a sheet made of field names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderMode {
    /// Decided per sheet from the types of the first two rows
    #[default]
    Auto,
    /// The first row always holds field names
    Force,
    /// The first row is always data
    Disable,
}

impl FromStr for HeaderMode {
    type Err = XlsxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(HeaderMode::Auto),
            "FORCE" => Ok(HeaderMode::Force),
            "DISABLE" => Ok(HeaderMode::Disable),
            _ => Err(XlsxError::OpenOption(format!("HEADERS={s}"))),
        }
    }
}

/// How field types are decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldTypes {
    /// Inferred from the cell values and styles
    #[default]
    Auto,
    /// Every field is a string
    String,
}

impl FromStr for FieldTypes {
    type Err = XlsxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(FieldTypes::Auto),
            "STRING" => Ok(FieldTypes::String),
            _ => Err(XlsxError::OpenOption(format!("FIELD_TYPES={s}"))),
        }
    }
}

/// Options a workbook is opened with
///
/// # Examples
///
/// ```
/// use sheetlayer::{FieldTypes, HeaderMode, OpenOptions};
///
/// let options = OpenOptions::from_pairs(["HEADERS=FORCE", "FIELD_TYPES=string"]).unwrap();
/// assert_eq!(options.headers, HeaderMode::Force);
/// assert_eq!(options.field_types, FieldTypes::String);
/// assert!(!options.update);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenOptions {
    /// Header line handling
    pub headers: HeaderMode,
    /// Field type handling
    pub field_types: FieldTypes,
    /// Tables can be modified and the workbook flushed
    pub update: bool,
}

impl OpenOptions {
    /// Read-only, automatic headers and types
    pub fn new() -> Self {
        OpenOptions::default()
    }

    /// Defaults taken from the `SHEETLAYER_HEADERS` and
    /// `SHEETLAYER_FIELD_TYPES` environment variables. Invalid values are
    /// ignored.
    pub fn from_env() -> Self {
        let mut options = OpenOptions::default();
        if let Ok(v) = std::env::var(HEADERS_ENV) {
            match v.parse() {
                Ok(headers) => options.headers = headers,
                Err(e) => warn!("ignoring {HEADERS_ENV}: {e}"),
            }
        }
        if let Ok(v) = std::env::var(FIELD_TYPES_ENV) {
            match v.parse() {
                Ok(field_types) => options.field_types = field_types,
                Err(e) => warn!("ignoring {FIELD_TYPES_ENV}: {e}"),
            }
        }
        options
    }

    /// Parses `KEY=VALUE` open options (`HEADERS`, `FIELD_TYPES`).
    ///
    /// Keys are case-insensitive, unknown keys are ignored.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, XlsxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = OpenOptions::default();
        for pair in pairs {
            let pair = pair.as_ref();
            let Some((key, value)) = pair.split_once('=') else {
                return Err(XlsxError::OpenOption(pair.to_string()));
            };
            match key.trim().to_ascii_uppercase().as_str() {
                "HEADERS" => options.headers = value.parse()?,
                "FIELD_TYPES" => options.field_types = value.parse()?,
                _ => warn!("ignoring unknown open option '{pair}'"),
            }
        }
        Ok(options)
    }

    /// Sets the header line handling
    pub fn with_headers(mut self, headers: HeaderMode) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the field type handling
    pub fn with_field_types(mut self, field_types: FieldTypes) -> Self {
        self.field_types = field_types;
        self
    }

    /// Opens for update
    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }
}

/// A workbook: its sheets as tables, in tab order.
///
/// Opening reads the workbook part, its relationships, the shared strings
/// and the styles; sheets are parsed when first accessed.
///
/// # Examples
///
/// ```
/// use sheetlayer::{FieldType, Field, Record, WorkbookDataset};
///
/// # fn main() -> Result<(), sheetlayer::XlsxError> {
/// let mut workbook = WorkbookDataset::create_in_memory()?;
/// let table = workbook.create_layer("People")?;
/// table.add_field(Field::new("name", FieldType::String))?;
/// table.add_field(Field::new("age", FieldType::Integer))?;
/// let fid = table.insert_record(Record::new(vec!["Alice".into(), 30i64.into()]))?;
/// workbook.flush()?;
///
/// let mut reopened = WorkbookDataset::from_bytes(workbook.package_bytes().to_vec(), Default::default())?;
/// let table = reopened.layer_by_name("People").unwrap();
/// assert_eq!(table.record(fid)?.get(1).and_then(|v| v.as_i64()), Some(30));
/// # Ok(())
/// # }
/// ```
pub struct WorkbookDataset {
    path: Option<PathBuf>,
    bytes: Arc<[u8]>,
    archive: Archive,
    parts: Arc<WorkbookParts>,
    options: OpenOptions,
    layers: Vec<SheetTable>,
    generation: u64,
    saved_generation: u64,
}

impl std::fmt::Debug for WorkbookDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkbookDataset")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

impl WorkbookDataset {
    /// Opens a workbook file
    pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self, XlsxError> {
        let bytes = fs::read(path.as_ref())?;
        let mut dataset = WorkbookDataset::from_bytes(bytes, options)?;
        dataset.path = Some(path.as_ref().to_path_buf());
        Ok(dataset)
    }

    /// Opens a workbook held in memory
    pub fn from_bytes<B: Into<Arc<[u8]>>>(bytes: B, options: OpenOptions) -> Result<Self, XlsxError> {
        let bytes = bytes.into();
        let (archive, parts) = WorkbookParts::read(bytes.clone())?;
        let parts = Arc::new(parts);
        let layers = parts
            .manifest
            .sheets
            .iter()
            .map(|sheet| {
                let source = SheetSource {
                    archive: archive.clone(),
                    path: sheet.path.clone(),
                    parts: parts.clone(),
                };
                SheetTable::from_source(sheet.name.clone(), source, options, options.update)
            })
            .collect();
        Ok(WorkbookDataset {
            path: None,
            bytes,
            archive,
            parts,
            options,
            layers,
            generation: 0,
            saved_generation: 0,
        })
    }

    /// Creates a workbook file without any sheet. Nothing is written until
    /// the workbook is flushed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, XlsxError> {
        let mut dataset = WorkbookDataset::create_in_memory()?;
        dataset.path = Some(path.as_ref().to_path_buf());
        Ok(dataset)
    }

    /// Creates a workbook without any sheet, opened for update
    pub fn create_in_memory() -> Result<Self, XlsxError> {
        let bytes = writer::new_package()?;
        let mut dataset =
            WorkbookDataset::from_bytes(bytes, OpenOptions::from_env().with_update(true))?;
        dataset.generation = 1;
        Ok(dataset)
    }

    /// File the workbook is flushed to, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The options the workbook was opened with
    pub fn options(&self) -> OpenOptions {
        self.options
    }

    /// Number of sheets
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Sheet names, in tab order
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(SheetTable::name).collect()
    }

    /// Sheet at a tab position
    pub fn layer(&mut self, index: usize) -> Result<&mut SheetTable, XlsxError> {
        self.layers
            .get_mut(index)
            .ok_or(XlsxError::LayerIndex(index))
    }

    /// Sheet by name, an exact match first, then ignoring ASCII case
    pub fn layer_by_name(&mut self, name: &str) -> Option<&mut SheetTable> {
        let index = self
            .layers
            .iter()
            .position(|l| l.name() == name)
            .or_else(|| {
                self.layers
                    .iter()
                    .position(|l| l.name().eq_ignore_ascii_case(name))
            })?;
        self.layers.get_mut(index)
    }

    /// Appends an empty sheet.
    ///
    /// The name must follow the rules of Excel: 1 to 31 characters, none
    /// of `[]:*?/\`, not used by another sheet (ignoring case).
    pub fn create_layer(&mut self, name: &str) -> Result<&mut SheetTable, XlsxError> {
        if !self.options.update {
            return Err(XlsxError::ReadOnly);
        }
        let len = name.chars().count();
        if len == 0
            || len > MAX_SHEET_NAME_LEN
            || name.contains(['[', ']', ':', '*', '?', '/', '\\'])
            || name.starts_with('\'')
            || name.ends_with('\'')
            || self
                .layers
                .iter()
                .any(|l| l.name().to_lowercase() == name.to_lowercase())
        {
            return Err(XlsxError::SheetName(name.to_string()));
        }
        debug!("creating sheet '{name}'");
        self.layers
            .push(SheetTable::new_empty(name.to_string(), self.options));
        self.generation += 1;
        let last = self.layers.len() - 1;
        Ok(&mut self.layers[last])
    }

    /// Removes a sheet
    pub fn delete_layer(&mut self, index: usize) -> Result<(), XlsxError> {
        if !self.options.update {
            return Err(XlsxError::ReadOnly);
        }
        if index >= self.layers.len() {
            return Err(XlsxError::LayerIndex(index));
        }
        let table = self.layers.remove(index);
        debug!("deleting sheet '{}'", table.name());
        self.generation += 1;
        Ok(())
    }

    /// Are there changes not written yet, in any sheet or in the sheet list
    pub fn is_dirty(&self) -> bool {
        self.generation != self.saved_generation || self.layers.iter().any(SheetTable::is_dirty)
    }

    /// The package as of the last open or flush
    pub fn package_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Writes the changes.
    ///
    /// Dirty sheets are serialized again, the others are copied as they
    /// are. A sheet that cannot be written keeps its previous content and
    /// its error is reported in [`XlsxError::Flush`] once every other sheet
    /// has been written.
    pub fn flush(&mut self) -> Result<(), XlsxError> {
        if !self.is_dirty() {
            return Ok(());
        }
        if !self.options.update {
            return Err(XlsxError::ReadOnly);
        }
        let is_1904 = self.parts.manifest.is_1904;
        let mut styles = StylePlan::new(&self.parts.styles);
        let mut errors = Vec::new();
        let mut written = Vec::with_capacity(self.layers.len());
        let mut plans = Vec::with_capacity(self.layers.len());
        for table in &self.layers {
            let entry = table.source().and_then(|source| {
                self.parts
                    .manifest
                    .sheets
                    .iter()
                    .find(|s| s.path == source.path)
                    .cloned()
            });
            let content = if !table.is_dirty() {
                written.push(true);
                None
            } else if let ParseState::Failed(reason) = table.parse_state() {
                errors.push((
                    table.name().to_string(),
                    XlsxError::SheetParse {
                        sheet: table.name().to_string(),
                        reason: reason.clone(),
                    },
                ));
                written.push(false);
                None
            } else {
                match writer::write_sheet(table, &mut styles, is_1904) {
                    Ok(xml) => {
                        written.push(true);
                        Some(xml)
                    }
                    Err(e) => {
                        warn!("cannot write sheet '{}': {e}", table.name());
                        errors.push((table.name().to_string(), e));
                        written.push(false);
                        None
                    }
                }
            };
            plans.push(SheetPlan {
                name: table.name().to_string(),
                entry,
                content,
            });
        }

        let bytes: Arc<[u8]> =
            writer::write_package(&mut self.archive, &self.parts.manifest, plans, &styles)?.into();
        if let Some(path) = &self.path {
            fs::write(path, &bytes)?;
            debug!("flushed {} byte(s) to {}", bytes.len(), path.display());
        }
        let (archive, parts) = WorkbookParts::read(bytes.clone())?;
        let parts = Arc::new(parts);
        for (table, written) in self.layers.iter_mut().zip(written) {
            match parts.manifest.sheets.iter().find(|s| s.name == table.name()) {
                Some(sheet) => table.rebind(SheetSource {
                    archive: archive.clone(),
                    path: sheet.path.clone(),
                    parts: parts.clone(),
                }),
                None => warn!("sheet '{}' missing from the written package", table.name()),
            }
            if written {
                table.mark_saved();
            }
        }
        self.bytes = bytes;
        self.archive = archive;
        self.parts = parts;
        self.saved_generation = self.generation;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(XlsxError::Flush(errors))
        }
    }

    /// Flushes pending changes and closes the workbook
    pub fn close(mut self) -> Result<(), XlsxError> {
        self.flush()
    }
}
