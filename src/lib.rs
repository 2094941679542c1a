// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

//! Read xlsx workbooks as typed record tables, edit them, and write them back.
//!
//! # Status
//!
//! **sheetlayer** is a pure Rust library exposing every worksheet of an
//! Office Open XML workbook as a table: a list of typed fields and a list
//! of records with stable ids. Tables are parsed lazily, on first access.
//! Workbooks opened for update can be modified and written back; parts the
//! library does not understand (charts, drawings, themes) are copied as is.
//!
//! # Field types
//!
//! Unless disabled, field types are deduced from the cells of each column:
//! `Integer` is promoted to `Real` and any other mix degrades to `String`.
//! Dates, datetimes and times never mix with numbers or with each other.
//! Whether the first row holds field names is detected as well; see
//! [`HeaderMode`] and [`FieldTypes`].
//!
//! # Examples
//! ```
//! use sheetlayer::{Field, FieldType, OpenOptions, Record, Value, WorkbookDataset};
//!
//! # fn main() -> Result<(), sheetlayer::XlsxError> {
//! // a new workbook with a single table
//! let mut workbook = WorkbookDataset::create_in_memory()?;
//! let table = workbook.create_layer("Measures")?;
//! table.add_field(Field::new("station", FieldType::String))?;
//! table.add_field(Field::new("celsius", FieldType::Real))?;
//! table.insert_record(Record::new(vec!["Brest".into(), 14.5.into()]))?;
//! table.insert_record(Record::new(vec!["Lyon".into(), 21.0.into()]))?;
//! workbook.flush()?;
//!
//! // read it back
//! let bytes = workbook.package_bytes().to_vec();
//! let mut workbook = WorkbookDataset::from_bytes(bytes, OpenOptions::new())?;
//! assert_eq!(workbook.layer_names(), ["Measures"]);
//! let table = workbook.layer(0)?;
//! assert_eq!(table.feature_count()?, 2);
//! for (fid, record) in table.records()? {
//!     println!("{fid}: {} is at {}", record[0], record[1]);
//! }
//! assert_eq!(table.record(1)?[1], Value::Real(21.0));
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod utils;

mod dataset;
mod datatype;
mod de;
mod formats;
mod layer;
mod store;
mod xlsx;

pub use crate::dataset::{FieldTypes, HeaderMode, OpenOptions, WorkbookDataset};
pub use crate::datatype::{ExcelDateTime, FieldType, Value};
pub use crate::de::{DeError, RecordDeserializer};
pub use crate::formats::{builtin_format_by_id, detect_custom_number_format};
pub use crate::formats::{CellFormat, StyleFormat};
pub use crate::layer::{ParseState, Records, SheetTable};
pub use crate::store::{AlterFieldFlags, Field, MemoryStore, Record, TableStore};
pub use crate::xlsx::{ColumnDef, StyleFormatTable, XlsxError, MAX_COLUMNS, MAX_ROWS};
