// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

//! Deserialization of records into user types with serde.

use serde::de::value::BorrowedStrDeserializer;
use serde::de::{self, DeserializeOwned, DeserializeSeed, SeqAccess, Visitor};
use serde::{forward_to_deserialize_any, Deserialize};
use std::marker::PhantomData;
use std::{fmt, vec};

use crate::datatype::Value;
use crate::store::{Field, Record};

/// A record deserialization specific error enum
#[derive(Debug)]
pub enum DeError {
    /// A record ended before every value was read
    UnexpectedEndOfRecord {
        /// Position of the record in the table
        record: usize,
    },
    /// A value cannot be represented by the requested type
    InvalidValue {
        /// Position of the record in the table
        record: usize,
        /// Field index
        field: usize,
        /// What went wrong
        reason: String,
    },
    /// Serde specific error
    Custom(String),
}

impl fmt::Display for DeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match *self {
            DeError::UnexpectedEndOfRecord { record } => {
                write!(f, "Unexpected end of record {record}")
            }
            DeError::InvalidValue {
                record,
                field,
                ref reason,
            } => write!(f, "Record {record}, field {field}: {reason}"),
            DeError::Custom(ref s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for DeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl de::Error for DeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        DeError::Custom(msg.to_string())
    }
}

/// Iterator deserializing each record of a table into `D`.
///
/// Structs and maps are filled by field name, empty values being skipped,
/// so `Option` members of a struct become `None` and missing ones take
/// their serde default. Tuples and sequences take the values in field
/// order.
///
/// # Example
///
/// ```
/// use serde_derive::Deserialize;
/// use sheetlayer::{Field, FieldType, Record, WorkbookDataset};
///
/// #[derive(Deserialize)]
/// struct Person {
///     name: String,
///     age: Option<u8>,
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut workbook = WorkbookDataset::create_in_memory()?;
/// let table = workbook.create_layer("People")?;
/// table.add_field(Field::new("name", FieldType::String))?;
/// table.add_field(Field::new("age", FieldType::Integer))?;
/// table.insert_record(Record::new(vec!["Alice".into(), 30i64.into()]))?;
/// table.insert_record(Record::new(vec!["Bob".into()]))?;
///
/// let people = table.deserialize::<Person>()?.collect::<Result<Vec<_>, _>>()?;
/// assert_eq!(people[0].age, Some(30));
/// assert_eq!(people[1].name, "Bob");
/// assert_eq!(people[1].age, None);
/// # Ok(())
/// # }
/// ```
pub struct RecordDeserializer<'a, D>
where
    D: DeserializeOwned,
{
    names: Vec<&'a str>,
    records: vec::IntoIter<&'a Record>,
    current: usize,
    _priv: PhantomData<D>,
}

impl<'a, D> RecordDeserializer<'a, D>
where
    D: DeserializeOwned,
{
    pub(crate) fn new(fields: &'a [Field], records: Vec<&'a Record>) -> Self {
        RecordDeserializer {
            names: fields.iter().map(|f| f.name.as_str()).collect(),
            records: records.into_iter(),
            current: 0,
            _priv: PhantomData,
        }
    }
}

impl<'a, D> Iterator for RecordDeserializer<'a, D>
where
    D: DeserializeOwned,
{
    type Item = Result<D, DeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        let de = RowDeserializer::new(&self.names, record, self.current);
        self.current += 1;
        Some(Deserialize::deserialize(de))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

struct RowDeserializer<'header, 'rec> {
    values: &'rec [Value],
    names: &'header [&'header str],
    /// index of the next field to read
    next: usize,
    peek: Option<usize>,
    record: usize,
}

impl<'header, 'rec> RowDeserializer<'header, 'rec> {
    fn new(names: &'header [&'header str], record: &'rec Record, position: usize) -> Self {
        RowDeserializer {
            values: record.values(),
            names,
            next: 0,
            peek: None,
            record: position,
        }
    }

    fn value(&self, field: usize) -> ValueDeserializer<'rec> {
        ValueDeserializer {
            value: self.values.get(field).unwrap_or(&Value::Empty),
            record: self.record,
            field,
        }
    }
}

impl<'de, 'header, 'rec> serde::Deserializer<'de> for RowDeserializer<'header, 'rec>
where
    'header: 'de,
    'rec: 'de,
{
    type Error = DeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_seq(self)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_map(self)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_map(self)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 u8 u16 u32 u64 f32 f64 char str string bytes
        byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct enum identifier ignored_any
    }
}

impl<'de, 'header, 'rec> SeqAccess<'de> for RowDeserializer<'header, 'rec>
where
    'header: 'de,
    'rec: 'de,
{
    type Error = DeError;

    fn next_element_seed<S>(&mut self, seed: S) -> Result<Option<S::Value>, Self::Error>
    where
        S: DeserializeSeed<'de>,
    {
        if self.next >= self.names.len() {
            return Ok(None);
        }
        let field = self.next;
        self.next += 1;
        seed.deserialize(self.value(field)).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.names.len() - self.next)
    }
}

impl<'de, 'header, 'rec> de::MapAccess<'de> for RowDeserializer<'header, 'rec>
where
    'header: 'de,
    'rec: 'de,
{
    type Error = DeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        while self.next < self.names.len() {
            let i = self.next;
            self.next += 1;
            if !self.values.get(i).is_none_or(Value::is_empty) {
                self.peek = Some(i);
                let de = BorrowedStrDeserializer::<Self::Error>::new(self.names[i]);
                return seed.deserialize(de).map(Some);
            }
        }
        Ok(None)
    }

    fn next_value_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<K::Value, Self::Error> {
        let field = self.peek.take().ok_or(DeError::UnexpectedEndOfRecord {
            record: self.record,
        })?;
        seed.deserialize(self.value(field))
    }
}

macro_rules! deserialize_num {
    ($typ:ty, $method:ident, $visit:ident) => {
        fn $method<V>(self, visitor: V) -> Result<V::Value, Self::Error>
        where
            V: Visitor<'de>,
        {
            match self.value {
                Value::Real(v) => visitor.$visit(*v as $typ),
                Value::Integer(v) => visitor.$visit(*v as $typ),
                Value::Boolean(v) => visitor.$visit(*v as u8 as $typ),
                Value::Date(v) | Value::DateTime(v) | Value::Time(v) => {
                    visitor.$visit(v.as_f64() as $typ)
                }
                Value::String(ref s) => {
                    let v = s.trim().parse().map_err(|_| {
                        self.invalid(format!("expecting {}, got '{}'", stringify!($typ), s))
                    })?;
                    visitor.$visit(v)
                }
                Value::Empty => Err(self.invalid(format!(
                    "expecting {}, got an empty value",
                    stringify!($typ)
                ))),
            }
        }
    };
}

/// A deserializer for a single [`Value`]
struct ValueDeserializer<'a> {
    value: &'a Value,
    record: usize,
    field: usize,
}

impl ValueDeserializer<'_> {
    fn invalid(&self, reason: String) -> DeError {
        DeError::InvalidValue {
            record: self.record,
            field: self.field,
            reason,
        }
    }
}

impl<'a, 'de> serde::Deserializer<'de> for ValueDeserializer<'a> {
    type Error = DeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::String(v) => visitor.visit_str(v),
            Value::Real(v) => visitor.visit_f64(*v),
            Value::Boolean(v) => visitor.visit_bool(*v),
            Value::Integer(v) => visitor.visit_i64(*v),
            Value::Empty => visitor.visit_unit(),
            Value::Date(_) | Value::DateTime(_) | Value::Time(_) => {
                visitor.visit_string(self.value.to_string())
            }
        }
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::String(v) => visitor.visit_str(v),
            Value::Empty => visitor.visit_str(""),
            v => visitor.visit_string(v.to_string()),
        }
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::String(v) => visitor.visit_bytes(v.as_bytes()),
            Value::Empty => visitor.visit_bytes(&[]),
            v => Err(self.invalid(format!("expecting bytes, got {v:?}"))),
        }
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_bool<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Boolean(v) => visitor.visit_bool(*v),
            Value::String(ref v) => match &**v {
                "TRUE" | "true" | "True" => visitor.visit_bool(true),
                "FALSE" | "false" | "False" => visitor.visit_bool(false),
                d => Err(self.invalid(format!("expecting bool, got '{d}'"))),
            },
            Value::Empty => visitor.visit_bool(false),
            Value::Real(v) => visitor.visit_bool(*v != 0.),
            Value::Integer(v) => visitor.visit_bool(*v != 0),
            v => Err(self.invalid(format!("expecting bool, got {v:?}"))),
        }
    }

    fn deserialize_char<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        let mut chars = self.value.as_str().unwrap_or_default().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(self.invalid(format!("expecting char, got {:?}", self.value))),
        }
    }

    fn deserialize_unit<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Empty => visitor.visit_unit(),
            v => Err(self.invalid(format!("expecting unit, got {v:?}"))),
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Empty => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_newtype_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        use serde::de::IntoDeserializer;

        match self.value {
            Value::String(s) => visitor.visit_enum(s.as_str().into_deserializer()),
            v => Err(self.invalid(format!("expecting enum, got {v:?}"))),
        }
    }

    deserialize_num!(i64, deserialize_i64, visit_i64);
    deserialize_num!(i32, deserialize_i32, visit_i32);
    deserialize_num!(i16, deserialize_i16, visit_i16);
    deserialize_num!(i8, deserialize_i8, visit_i8);
    deserialize_num!(u64, deserialize_u64, visit_u64);
    deserialize_num!(u32, deserialize_u32, visit_u32);
    deserialize_num!(u16, deserialize_u16, visit_u16);
    deserialize_num!(u8, deserialize_u8, visit_u8);
    deserialize_num!(f64, deserialize_f64, visit_f64);
    deserialize_num!(f32, deserialize_f32, visit_f32);

    forward_to_deserialize_any! {
        unit_struct seq tuple tuple_struct map struct identifier ignored_any
    }
}
