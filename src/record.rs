use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::schema::FieldSchema;

/// Fields scraped from one page. May contain names outside the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PartialRecord {
    fields: BTreeMap<String, String>,
}

impl PartialRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a trimmed value. Blank values are dropped so a missing field
    /// never shows up as an empty string.
    pub fn insert(&mut self, field: impl Into<String>, value: impl AsRef<str>) {
        let value = value.as_ref().trim();
        if !value.is_empty() {
            self.fields.insert(field.into(), value.to_string());
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: AsRef<str>> FromIterator<(K, V)> for PartialRecord {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = PartialRecord::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// A schema field's final value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Present(String),
    /// Not found on any page.
    Absent,
}

impl FieldValue {
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            FieldValue::Present(v) => Some(v),
            FieldValue::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Present(v) => serializer.serialize_str(v),
            FieldValue::Absent => serializer.serialize_none(),
        }
    }
}

/// One value per schema field, in schema order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledRecord {
    entries: Vec<(String, FieldValue)>,
}

impl AssembledRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    /// Present value of `field`, `None` when absent or not in the schema.
    pub fn value(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_deref)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the record has exactly the schema's fields, in order.
    pub fn matches(&self, schema: &FieldSchema) -> bool {
        self.len() == schema.len() && self.fields().zip(schema.iter()).all(|(a, b)| a == b)
    }
}

impl Serialize for AssembledRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Merge partial records into a schema-complete record.
///
/// Later parts win. Schema fields no part provides become [`FieldValue::Absent`];
/// fields outside the schema are dropped.
pub fn assemble(schema: &FieldSchema, parts: &[PartialRecord]) -> AssembledRecord {
    let entries = schema
        .iter()
        .map(|field| {
            let value = parts
                .iter()
                .rev()
                .find_map(|p| p.get(field))
                .map(|v| FieldValue::Present(v.to_string()))
                .unwrap_or(FieldValue::Absent);
            (field.to_string(), value)
        })
        .collect();
    AssembledRecord { entries }
}
