//! Declared payload field types: structural checks and normalization.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::reader::GraphReader;
use crate::types::TypeCode;
use crate::viewer::Viewer;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Bool,
    Int,
    /// Numbers, or strings that parse as a finite number.
    Float,
    String,
    /// RFC 3339 strings or epoch milliseconds.
    Date,
    /// A uuid string, optionally restricted to objects of `allowed_types`.
    Uuid { allowed_types: Vec<TypeCode> },
    /// An array, optionally with a typed element.
    Array(Option<Box<FieldType>>),
    Map {
        key: Box<FieldType>,
        value: Box<FieldType>,
    },
    /// A record whose listed keys, when present, must match.
    Record(BTreeMap<String, FieldType>),
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldType {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    pub fn bool() -> Self {
        Self::new(FieldKind::Bool)
    }

    pub fn int() -> Self {
        Self::new(FieldKind::Int)
    }

    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn date() -> Self {
        Self::new(FieldKind::Date)
    }

    pub fn uuid() -> Self {
        Self::uuid_of(Vec::new())
    }

    pub fn uuid_of(allowed_types: impl Into<Vec<TypeCode>>) -> Self {
        Self::new(FieldKind::Uuid {
            allowed_types: allowed_types.into(),
        })
    }

    pub fn array(element: FieldType) -> Self {
        Self::new(FieldKind::Array(Some(Box::new(element))))
    }

    pub fn array_any() -> Self {
        Self::new(FieldKind::Array(None))
    }

    pub fn map(key: FieldType, value: FieldType) -> Self {
        Self::new(FieldKind::Map {
            key: Box::new(key),
            value: Box::new(value),
        })
    }

    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, FieldType)>) -> Self {
        Self::new(FieldKind::Record(
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn any() -> Self {
        Self::new(FieldKind::Any)
    }

    /// Also accept JSON `null`.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Whether `value` conforms. Composite kinds stop at the first failing
    /// element. Referenced uuids are resolved with the all-seeing companion of
    /// `viewer`; a uuid that does not resolve is accepted.
    pub fn check<'a>(
        &'a self,
        graph: &'a dyn GraphReader,
        viewer: &'a Viewer,
        value: &'a Value,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            if value.is_null() {
                return Ok(self.nullable);
            }
            match &self.kind {
                FieldKind::Bool => Ok(value.is_boolean()),
                FieldKind::Int => Ok(value.is_i64() || value.is_u64()),
                FieldKind::Float => Ok(as_float(value).is_some()),
                FieldKind::String => Ok(value.is_string()),
                FieldKind::Date => Ok(as_date(value).is_some()),
                FieldKind::Any => Ok(true),
                FieldKind::Uuid { allowed_types } => {
                    let Some(id) = value.as_str().and_then(|s| Uuid::parse_str(s).ok()) else {
                        return Ok(false);
                    };
                    if allowed_types.is_empty() {
                        return Ok(true);
                    }
                    match graph.get_object(viewer.read_all_viewer(), id).await? {
                        Some(object) => Ok(allowed_types.contains(&object.object_type())),
                        None => Ok(true),
                    }
                }
                FieldKind::Array(element) => {
                    let Some(items) = value.as_array() else {
                        return Ok(false);
                    };
                    if let Some(element) = element {
                        for item in items {
                            if !element.check(graph, viewer, item).await? {
                                return Ok(false);
                            }
                        }
                    }
                    Ok(true)
                }
                FieldKind::Map { key, value: inner } => {
                    let Some(entries) = value.as_object() else {
                        return Ok(false);
                    };
                    for (k, v) in entries {
                        let k = Value::String(k.clone());
                        if !key.check(graph, viewer, &k).await? {
                            return Ok(false);
                        }
                        if !inner.check(graph, viewer, v).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                FieldKind::Record(schema) => {
                    let Some(entries) = value.as_object() else {
                        return Ok(false);
                    };
                    for (k, field) in schema {
                        if let Some(v) = entries.get(k) {
                            if !field.check(graph, viewer, v).await? {
                                return Ok(false);
                            }
                        }
                    }
                    Ok(true)
                }
            }
        }
        .boxed()
    }

    /// Canonical form of an already checked value.
    pub fn normalize(&self, value: Value) -> Value {
        if value.is_null() {
            return value;
        }
        match &self.kind {
            FieldKind::Float => match as_float(&value) {
                Some(f) => serde_json::Number::from_f64(f).map_or(value, Value::Number),
                None => value,
            },
            FieldKind::Date => match as_date(&value) {
                Some(date) => Value::String(date.to_rfc3339()),
                None => value,
            },
            FieldKind::Uuid { .. } => match value.as_str().and_then(|s| Uuid::parse_str(s).ok()) {
                Some(id) => Value::String(id.hyphenated().to_string()),
                None => value,
            },
            FieldKind::Array(Some(element)) => match value {
                Value::Array(items) => {
                    Value::Array(items.into_iter().map(|v| element.normalize(v)).collect())
                }
                other => other,
            },
            FieldKind::Map { value: inner, .. } => match value {
                Value::Object(entries) => Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k, inner.normalize(v)))
                        .collect(),
                ),
                other => other,
            },
            FieldKind::Record(schema) => match value {
                Value::Object(entries) => Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| match schema.get(&k) {
                            Some(field) => {
                                let v = field.normalize(v);
                                (k, v)
                            }
                            None => (k, v),
                        })
                        .collect(),
                ),
                other => other,
            },
            _ => value,
        }
    }
}

fn as_float(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        _ => None,
    }
}

/// Read a date-typed payload value as epoch milliseconds.
pub fn date_millis(value: &Value) -> Option<i64> {
    as_date(value).map(|d| d.timestamp_millis())
}
