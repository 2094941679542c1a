// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

//! Sheet tables: lazily parsed record collections with stable record ids.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use serde::de::DeserializeOwned;

use crate::dataset::{FieldTypes, HeaderMode, OpenOptions};
use crate::datatype::{merge_types, FieldType, Value};
use crate::de::RecordDeserializer;
use crate::store::{AlterFieldFlags, Field, MemoryStore, Record, TableStore};
use crate::xlsx::sheet_parser::{parse_sheet, ParsedCell, RowSink};
use crate::xlsx::{Archive, ColumnDef, WorkbookParts, XlsxError};

/// Where the parse of a table stands
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParseState {
    /// The sheet part has not been read yet
    #[default]
    NotParsed,
    /// The sheet part is being read
    Parsing,
    /// The sheet part has been read
    Parsed,
    /// Reading the sheet part failed, the table holds the rows read before
    /// the failure
    Failed(String),
}

/// The package part a table is read from
#[derive(Clone)]
pub(crate) struct SheetSource {
    pub(crate) archive: Archive,
    pub(crate) path: String,
    pub(crate) parts: Arc<WorkbookParts>,
}

/// Translation between internal store positions and record ids
#[derive(Debug, Clone)]
enum FidMap {
    /// Record id equals position
    Dense,
    /// Sorted record id of each position
    Sparse(Vec<i64>),
}

/// A worksheet exposed as a table of records.
///
/// The sheet part is parsed on first access. Record ids (FIDs) are 0 based
/// and stable for the lifetime of the table: deleting a record never
/// renumbers the others and ids are never reused.
pub struct SheetTable<S = MemoryStore> {
    name: String,
    store: S,
    source: Option<SheetSource>,
    options: OpenOptions,
    updatable: bool,
    state: ParseState,
    parse_count: usize,
    has_header_line: bool,
    columns: Vec<ColumnDef>,
    fids: FidMap,
    next_fid: i64,
    generation: u64,
    saved_generation: u64,
}

impl<S: fmt::Debug> fmt::Debug for SheetTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetTable")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("has_header_line", &self.has_header_line)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<S: TableStore + Default> SheetTable<S> {
    /// A table backed by a sheet part, parsed on first access
    pub(crate) fn from_source(
        name: String,
        source: SheetSource,
        options: OpenOptions,
        updatable: bool,
    ) -> Self {
        SheetTable {
            name,
            store: S::default(),
            source: Some(source),
            options,
            updatable,
            state: ParseState::NotParsed,
            parse_count: 0,
            has_header_line: false,
            columns: Vec::new(),
            fids: FidMap::Dense,
            next_fid: 0,
            generation: 0,
            saved_generation: 0,
        }
    }

    /// A new empty table, not yet written
    pub(crate) fn new_empty(name: String, options: OpenOptions) -> Self {
        SheetTable {
            name,
            store: S::default(),
            source: None,
            options,
            updatable: true,
            state: ParseState::Parsed,
            parse_count: 0,
            has_header_line: options.headers != HeaderMode::Disable,
            columns: Vec::new(),
            fids: FidMap::Dense,
            next_fid: 0,
            generation: 1,
            saved_generation: 0,
        }
    }

    /// Sheet name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the parse of the sheet part stands
    pub fn parse_state(&self) -> &ParseState {
        &self.state
    }

    /// Number of times the sheet part has been parsed
    pub fn parse_count(&self) -> usize {
        self.parse_count
    }

    /// Are there changes not written yet
    pub fn is_dirty(&self) -> bool {
        self.generation != self.saved_generation
    }

    /// Parses the sheet part if that has not been done yet.
    ///
    /// The parse runs at most once. If it fails the error is returned by
    /// this call only; the rows read before the failure stay in the table
    /// and later calls succeed without parsing again.
    pub fn ensure_initialized(&mut self) -> Result<(), XlsxError> {
        if self.state != ParseState::NotParsed {
            return Ok(());
        }
        let Some(source) = self.source.clone() else {
            self.state = ParseState::Parsed;
            return Ok(());
        };
        self.state = ParseState::Parsing;
        self.parse_count += 1;
        let SheetSource {
            mut archive,
            path,
            parts,
        } = source;
        let mut builder = TableBuilder::default();
        let result = parse_sheet(&mut archive, &path, &self.name, &parts, &mut builder);
        self.build(builder, &parts);
        match result {
            Ok(()) => {
                self.state = ParseState::Parsed;
                Ok(())
            }
            Err(e) => {
                warn!(
                    "sheet '{}' failed to parse, keeping {} record(s): {e}",
                    self.name,
                    self.store.record_count()
                );
                self.state = ParseState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Builds the schema and the records from the buffered rows
    fn build(&mut self, builder: TableBuilder, parts: &WorkbookParts) {
        let TableBuilder { mut rows, columns } = builder;
        let has_header = match self.options.headers {
            HeaderMode::Force => !rows.is_empty(),
            HeaderMode::Disable => false,
            HeaderMode::Auto => detect_header_line(&rows),
        };
        let header = if has_header {
            Some(rows.remove(0))
        } else {
            None
        };
        let width = rows
            .iter()
            .map(Vec::len)
            .chain(header.as_ref().map(Vec::len))
            .max()
            .unwrap_or(0);

        let mut types: Vec<Option<FieldType>> = vec![None; width];
        let mut sub_second = vec![false; width];
        if self.options.field_types == FieldTypes::Auto {
            for row in &rows {
                for (col, cell) in row.iter().enumerate() {
                    if let Some(t) = cell.value.field_type() {
                        types[col] = Some(merge_types(types[col], t));
                        sub_second[col] |= cell.sub_second;
                    }
                }
            }
        }

        for col in 0..width {
            let name = header
                .as_ref()
                .and_then(|h| h.get(col))
                .map(|c| c.value.to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| synthetic_name(col));
            let (field_type, sub_second) = match types[col] {
                Some(t) => (t, sub_second[col] && t.is_temporal()),
                None if self.options.field_types == FieldTypes::Auto => {
                    column_style_type(&columns, parts, col)
                }
                None => (FieldType::String, false),
            };
            self.store.add_field(Field {
                name,
                field_type,
                sub_second,
            });
        }

        for row in rows {
            let values: Vec<Value> = row.into_iter().map(|c| c.value).collect();
            // rows are never wider than the field list
            if let Err(e) = self.store.push_record(Record::new(values)) {
                warn!("dropping row of sheet '{}': {e}", self.name);
            }
        }
        debug!(
            "sheet '{}': {} field(s), {} record(s), header line: {has_header}",
            self.name,
            self.store.fields().len(),
            self.store.record_count()
        );
        self.has_header_line = has_header;
        self.columns = columns;
        self.fids = FidMap::Dense;
        self.next_fid = self.store.record_count() as i64;
    }

    fn check_updatable(&self) -> Result<(), XlsxError> {
        if self.updatable {
            Ok(())
        } else {
            Err(XlsxError::ReadOnly)
        }
    }

    /// Runs a mutation after the read-only check and the lazy parse.
    ///
    /// The table becomes dirty only if `f` succeeds; `f` must validate
    /// its input before changing anything.
    fn mutate<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, XlsxError>,
    ) -> Result<T, XlsxError> {
        self.check_updatable()?;
        self.ensure_initialized()?;
        let out = f(self)?;
        self.generation += 1;
        Ok(out)
    }

    /// Record id of an internal store position
    pub fn fid_of_position(&self, pos: usize) -> Option<i64> {
        match &self.fids {
            FidMap::Dense => (pos < self.store.record_count()).then_some(pos as i64),
            FidMap::Sparse(fids) => fids.get(pos).copied(),
        }
    }

    /// Internal store position of a record id
    pub fn position_of_fid(&self, fid: i64) -> Option<usize> {
        match &self.fids {
            FidMap::Dense => {
                let pos = usize::try_from(fid).ok()?;
                (pos < self.store.record_count()).then_some(pos)
            }
            FidMap::Sparse(fids) => fids.binary_search(&fid).ok(),
        }
    }

    fn position(&self, fid: i64) -> Result<usize, XlsxError> {
        self.position_of_fid(fid)
            .ok_or(XlsxError::FeatureNotFound(fid))
    }

    /// The field list
    pub fn fields(&mut self) -> Result<&[Field], XlsxError> {
        self.ensure_initialized()?;
        Ok(self.store.fields())
    }

    /// Number of live records
    pub fn feature_count(&mut self) -> Result<usize, XlsxError> {
        self.ensure_initialized()?;
        Ok(self.store.record_count())
    }

    /// Iterates over `(record id, record)` in id order
    pub fn records(&mut self) -> Result<Records<'_, S>, XlsxError> {
        self.ensure_initialized()?;
        Ok(Records {
            table: self,
            pos: 0,
        })
    }

    /// Record with the given id
    pub fn record(&mut self, fid: i64) -> Result<&Record, XlsxError> {
        self.ensure_initialized()?;
        let pos = self.position(fid)?;
        self.store
            .record(pos)
            .ok_or(XlsxError::FeatureNotFound(fid))
    }

    /// `<col>` definitions read from the sheet
    pub fn column_defs(&mut self) -> Result<&[ColumnDef], XlsxError> {
        self.ensure_initialized()?;
        Ok(&self.columns)
    }

    /// Is the first sheet row made of field names
    pub fn has_header_line(&mut self) -> Result<bool, XlsxError> {
        self.ensure_initialized()?;
        Ok(self.has_header_line)
    }

    /// Sets whether field names are written as the first sheet row
    pub fn set_has_header_line(&mut self, has_header_line: bool) -> Result<(), XlsxError> {
        self.mutate(|t| {
            t.has_header_line = has_header_line;
            Ok(())
        })
    }

    /// Appends a record, returns its id
    pub fn insert_record(&mut self, record: Record) -> Result<i64, XlsxError> {
        self.mutate(|t| {
            let pos = t.store.push_record(record)?;
            let fid = t.next_fid;
            t.next_fid += 1;
            if let FidMap::Sparse(fids) = &mut t.fids {
                fids.push(fid);
            } else if fid as usize != pos {
                let mut fids: Vec<i64> = (0..pos as i64).collect();
                fids.push(fid);
                t.fids = FidMap::Sparse(fids);
            }
            Ok(fid)
        })
    }

    /// Replaces a whole record
    pub fn set_record(&mut self, fid: i64, record: Record) -> Result<(), XlsxError> {
        self.mutate(|t| {
            let pos = t.position(fid)?;
            let record = record.conform(t.store.fields())?;
            let current = t
                .store
                .record_mut(pos)
                .ok_or(XlsxError::FeatureNotFound(fid))?;
            *current = record;
            Ok(())
        })
    }

    /// Copies the values of `fields` from `record` into the record `fid`.
    ///
    /// Sheet tables have no geometry, a non-empty `geometry_fields` is an
    /// error. Cells carry no style of their own, the style flag has no
    /// effect.
    pub fn update_record(
        &mut self,
        fid: i64,
        record: &Record,
        fields: &[usize],
        geometry_fields: &[usize],
        _update_style: bool,
    ) -> Result<(), XlsxError> {
        if !geometry_fields.is_empty() {
            return Err(XlsxError::GeometryFields);
        }
        self.mutate(|t| {
            let pos = t.position(fid)?;
            let types: Vec<FieldType> = t.store.fields().iter().map(|f| f.field_type).collect();
            if let Some(&i) = fields.iter().find(|&&i| i >= types.len()) {
                return Err(XlsxError::FieldIndex(i));
            }
            let current = t
                .store
                .record_mut(pos)
                .ok_or(XlsxError::FeatureNotFound(fid))?;
            for &i in fields {
                let value = record.get(i).cloned().unwrap_or_default();
                current.set(i, value.convert(types[i]));
            }
            Ok(())
        })
    }

    /// Deletes a record; its id is never reused
    pub fn delete_record(&mut self, fid: i64) -> Result<(), XlsxError> {
        self.mutate(|t| {
            let pos = t.position(fid)?;
            if let FidMap::Dense = t.fids {
                t.fids = FidMap::Sparse((0..t.store.record_count() as i64).collect());
            }
            if let FidMap::Sparse(fids) = &mut t.fids {
                fids.remove(pos);
            }
            t.store.remove_record(pos);
            Ok(())
        })
    }

    /// Appends a field
    pub fn add_field(&mut self, field: Field) -> Result<(), XlsxError> {
        self.mutate(|t| {
            t.store.add_field(field);
            Ok(())
        })
    }

    /// Deletes a field and its values
    pub fn delete_field(&mut self, index: usize) -> Result<Field, XlsxError> {
        self.mutate(|t| t.store.delete_field(index))
    }

    /// Reorders the fields: new field `i` is old field `map[i]`
    pub fn reorder_fields(&mut self, map: &[usize]) -> Result<(), XlsxError> {
        self.mutate(|t| t.store.reorder_fields(map))
    }

    /// Renames and/or retypes a field
    pub fn alter_field(
        &mut self,
        index: usize,
        field: &Field,
        flags: AlterFieldFlags,
    ) -> Result<(), XlsxError> {
        self.mutate(|t| t.store.alter_field(index, field, flags))
    }

    /// Deserializes every record into `T`, matching field names to
    /// struct fields
    pub fn deserialize<T: DeserializeOwned>(
        &mut self,
    ) -> Result<RecordDeserializer<'_, T>, XlsxError> {
        self.ensure_initialized()?;
        let records = (0..self.store.record_count())
            .filter_map(|pos| self.store.record(pos))
            .collect();
        Ok(RecordDeserializer::new(self.store.fields(), records))
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn header_line(&self) -> bool {
        self.has_header_line
    }

    pub(crate) fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub(crate) fn source(&self) -> Option<&SheetSource> {
        self.source.as_ref()
    }

    /// Points the table at a newly written package.
    pub(crate) fn rebind(&mut self, source: SheetSource) {
        self.source = Some(source);
    }

    pub(crate) fn mark_saved(&mut self) {
        self.saved_generation = self.generation;
    }
}

/// Iterator over the records of a table, see [`SheetTable::records`]
pub struct Records<'a, S> {
    table: &'a SheetTable<S>,
    pos: usize,
}

impl<'a, S: TableStore + Default> Iterator for Records<'a, S> {
    type Item = (i64, &'a Record);

    fn next(&mut self) -> Option<Self::Item> {
        let table = self.table;
        let record = table.store.record(self.pos)?;
        let fid = table.fid_of_position(self.pos)?;
        self.pos += 1;
        Some((fid, record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.table.store.record_count().saturating_sub(self.pos);
        (remaining, Some(remaining))
    }
}

/// Buffers the rows of a sheet until the schema can be decided
#[derive(Default)]
struct TableBuilder {
    rows: Vec<Vec<ParsedCell>>,
    columns: Vec<ColumnDef>,
}

impl RowSink for TableBuilder {
    fn on_columns(&mut self, columns: Vec<ColumnDef>) {
        self.columns = columns;
    }

    fn on_row(&mut self, row: Vec<ParsedCell>) {
        self.rows.push(row);
    }
}

fn synthetic_name(col: usize) -> String {
    format!("field_{}", col + 1)
}

/// The first row holds field names if it is made of strings only and the
/// second row has a value of another type. Without a second row there is
/// nothing to compare with and the first row is data.
fn detect_header_line(rows: &[Vec<ParsedCell>]) -> bool {
    let Some(first) = rows.first() else {
        return false;
    };
    let mut first_values = first.iter().filter(|c| !c.value.is_empty()).peekable();
    if first_values.peek().is_none()
        || !first_values.all(|c| c.value.field_type() == Some(FieldType::String))
    {
        return false;
    }
    rows.get(1).is_some_and(|second| {
        second
            .iter()
            .any(|c| c.value.field_type().is_some_and(|t| t != FieldType::String))
    })
}

/// Type of a column without any value, from its `<col>` style
fn column_style_type(
    columns: &[ColumnDef],
    parts: &WorkbookParts,
    col: usize,
) -> (FieldType, bool) {
    columns
        .iter()
        .find(|c| c.contains(col))
        .and_then(|c| c.style)
        .and_then(|style| parts.styles.get(style))
        .and_then(|format| Some((format.format.field_type()?, format.sub_second)))
        .unwrap_or((FieldType::String, false))
}
