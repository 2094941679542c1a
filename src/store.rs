// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

//! Generic in-memory record storage the sheet tables are built on.
//!
//! Positions in a store are internal: they compact when a record is
//! removed. Stable record ids are the business of [`crate::SheetTable`].

use std::ops::{BitOr, Index};

use crate::datatype::{FieldType, Value};
use crate::xlsx::XlsxError;

/// A named column with a single type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Column name
    pub name: String,
    /// Type of every value of the column
    pub field_type: FieldType,
    /// Temporal values carry milliseconds
    pub sub_second: bool,
}

impl Field {
    /// Creates a field without sub-second precision
    pub fn new<N: Into<String>>(name: N, field_type: FieldType) -> Self {
        Field {
            name: name.into(),
            field_type,
            sub_second: false,
        }
    }
}

/// The values of one record, in field order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    /// Creates a record
    pub fn new(values: Vec<Value>) -> Self {
        Record { values }
    }

    /// All values
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of a field, `None` if out of range
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Replaces the value of a field, growing the record if needed
    pub fn set<V: Into<Value>>(&mut self, index: usize, value: V) {
        if index >= self.values.len() {
            self.values.resize(index + 1, Value::Empty);
        }
        self.values[index] = value.into();
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Has the record no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the values
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    /// Takes the values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Pads the record to `width` and converts every value to its field type
    pub(crate) fn conform(self, fields: &[Field]) -> Result<Record, XlsxError> {
        if self.values.len() > fields.len() {
            return Err(XlsxError::FieldCount {
                expected: fields.len(),
                found: self.values.len(),
            });
        }
        let mut values = self.values;
        values.resize(fields.len(), Value::Empty);
        let values = values
            .into_iter()
            .zip(fields)
            .map(|(v, f)| v.convert(f.field_type))
            .collect();
        Ok(Record { values })
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Record { values }
    }
}

impl Index<usize> for Record {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// What [`TableStore::alter_field`] changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlterFieldFlags(u8);

impl AlterFieldFlags {
    /// Rename the field
    pub const NAME: AlterFieldFlags = AlterFieldFlags(1);
    /// Change the field type, converting existing values
    pub const TYPE: AlterFieldFlags = AlterFieldFlags(2);
    /// Everything
    pub const ALL: AlterFieldFlags = AlterFieldFlags(3);

    /// Are all flags of `other` set
    pub fn contains(self, other: AlterFieldFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AlterFieldFlags {
    type Output = AlterFieldFlags;

    fn bitor(self, rhs: AlterFieldFlags) -> AlterFieldFlags {
        AlterFieldFlags(self.0 | rhs.0)
    }
}

/// Record and schema storage addressed by internal position
pub trait TableStore {
    /// The field list
    fn fields(&self) -> &[Field];

    /// Number of records
    fn record_count(&self) -> usize;

    /// Record at an internal position
    fn record(&self, pos: usize) -> Option<&Record>;

    /// Mutable record at an internal position
    fn record_mut(&mut self, pos: usize) -> Option<&mut Record>;

    /// Appends a record, padded and converted to the field types.
    ///
    /// Fails with [`XlsxError::FieldCount`] if it has more values than
    /// there are fields.
    fn push_record(&mut self, record: Record) -> Result<usize, XlsxError>;

    /// Removes the record at `pos`; later records move down one position.
    fn remove_record(&mut self, pos: usize) -> Option<Record>;

    /// Appends a field, existing records get an empty value
    fn add_field(&mut self, field: Field);

    /// Removes a field and its values
    fn delete_field(&mut self, index: usize) -> Result<Field, XlsxError>;

    /// Reorders the fields: new field `i` is old field `map[i]`
    fn reorder_fields(&mut self, map: &[usize]) -> Result<(), XlsxError>;

    /// Changes the name and/or the type of a field
    fn alter_field(
        &mut self,
        index: usize,
        field: &Field,
        flags: AlterFieldFlags,
    ) -> Result<(), XlsxError>;
}

/// The default store, fields and records in vectors
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    fields: Vec<Field>,
    records: Vec<Record>,
}

impl TableStore for MemoryStore {
    fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn record_count(&self) -> usize {
        self.records.len()
    }

    fn record(&self, pos: usize) -> Option<&Record> {
        self.records.get(pos)
    }

    fn record_mut(&mut self, pos: usize) -> Option<&mut Record> {
        self.records.get_mut(pos)
    }

    fn push_record(&mut self, record: Record) -> Result<usize, XlsxError> {
        let record = record.conform(&self.fields)?;
        self.records.push(record);
        Ok(self.records.len() - 1)
    }

    fn remove_record(&mut self, pos: usize) -> Option<Record> {
        (pos < self.records.len()).then(|| self.records.remove(pos))
    }

    fn add_field(&mut self, field: Field) {
        self.fields.push(field);
        for r in &mut self.records {
            r.values.push(Value::Empty);
        }
    }

    fn delete_field(&mut self, index: usize) -> Result<Field, XlsxError> {
        if index >= self.fields.len() {
            return Err(XlsxError::FieldIndex(index));
        }
        for r in &mut self.records {
            if index < r.values.len() {
                r.values.remove(index);
            }
        }
        Ok(self.fields.remove(index))
    }

    fn reorder_fields(&mut self, map: &[usize]) -> Result<(), XlsxError> {
        let n = self.fields.len();
        let mut seen = vec![false; n];
        if map.len() != n {
            return Err(XlsxError::FieldMap);
        }
        for &i in map {
            if i >= n || seen[i] {
                return Err(XlsxError::FieldMap);
            }
            seen[i] = true;
        }
        self.fields = map.iter().map(|&i| self.fields[i].clone()).collect();
        for r in &mut self.records {
            let old = std::mem::take(&mut r.values);
            r.values = map
                .iter()
                .map(|&i| old.get(i).cloned().unwrap_or_default())
                .collect();
        }
        Ok(())
    }

    fn alter_field(
        &mut self,
        index: usize,
        field: &Field,
        flags: AlterFieldFlags,
    ) -> Result<(), XlsxError> {
        let current = self
            .fields
            .get_mut(index)
            .ok_or(XlsxError::FieldIndex(index))?;
        if flags.contains(AlterFieldFlags::NAME) {
            current.name.clone_from(&field.name);
        }
        if flags.contains(AlterFieldFlags::TYPE) && current.field_type != field.field_type {
            current.field_type = field.field_type;
            current.sub_second = field.sub_second;
            for r in &mut self.records {
                if let Some(v) = r.values.get_mut(index) {
                    *v = std::mem::take(v).convert(field.field_type);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        let mut store = MemoryStore::default();
        store.add_field(Field::new("name", FieldType::String));
        store.add_field(Field::new("age", FieldType::Integer));
        store
            .push_record(Record::new(vec!["Alice".into(), 30i64.into()]))
            .unwrap();
        store.push_record(Record::new(vec!["Bob".into()])).unwrap();
        store
    }

    #[test]
    fn test_push_pads_and_converts() {
        let mut store = store();
        assert_eq!(store.record(1).unwrap().values(), &[Value::from("Bob"), Value::Empty]);
        let pos = store
            .push_record(Record::new(vec![Value::Integer(7), Value::Real(41.9)]))
            .unwrap();
        assert_eq!(
            store.record(pos).unwrap().values(),
            &[Value::from("7"), Value::Integer(41)]
        );
        assert!(matches!(
            store.push_record(Record::new(vec![Value::Empty; 3])),
            Err(XlsxError::FieldCount {
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn test_schema_changes() {
        let mut store = store();
        store.reorder_fields(&[1, 0]).unwrap();
        assert_eq!(store.fields()[0].name, "age");
        assert_eq!(store.record(0).unwrap().values(), &[Value::Integer(30), Value::from("Alice")]);
        assert!(matches!(store.reorder_fields(&[0, 0]), Err(XlsxError::FieldMap)));

        store
            .alter_field(0, &Field::new("years", FieldType::Real), AlterFieldFlags::ALL)
            .unwrap();
        assert_eq!(store.fields()[0], Field::new("years", FieldType::Real));
        assert_eq!(store.record(0).unwrap()[0], Value::Real(30.));

        store
            .alter_field(1, &Field::new("who", FieldType::Integer), AlterFieldFlags::NAME)
            .unwrap();
        assert_eq!(store.fields()[1], Field::new("who", FieldType::String));

        let removed = store.delete_field(0).unwrap();
        assert_eq!(removed.name, "years");
        assert_eq!(store.record(1).unwrap().values(), &[Value::from("Bob")]);
        assert!(matches!(store.delete_field(5), Err(XlsxError::FieldIndex(5))));
    }

    #[test]
    fn test_remove_compacts() {
        let mut store = store();
        assert!(store.remove_record(0).is_some());
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.record(0).unwrap()[0], Value::from("Bob"));
        assert!(store.remove_record(3).is_none());
    }
}
