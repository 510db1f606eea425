//! 📦 Common data structures: the building blocks of b1sync
//!
//! 🎬 COLD OPEN. INT. WAREHOUSE OFFICE, 8:59 AM
//!
//! The item-group cron fires in one minute. Somewhere in SAP, a product called
//! "ПОДШИПНИК 6204" waits to be copied into a document store it has never met.
//! It does not know about `SourceRecord`. It does not know about `Operation`.
//! It will learn. They all learn.
//!
//! This module holds the humble structs that carry rows from SAP to the store:
//!
//! - [`SourceRecord`]: one row, as SAP (or the store) handed it to us. A JSON object.
//! - [`Operation`]: one pending upsert: filter, `$set`, `$setOnInsert`.
//! - [`ErrorRecord`]: one row we could not finish, plus the reason why.
//!
//! 🦆

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// 🗂️ A JSON object. Field name → value. The lingua franca of this codebase.
pub(crate) type Fields = Map<String, Value>;

/// 💀 A strict accessor was asked for a field that is missing or wearing the wrong type.
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("field '{field}' is missing")]
    Missing { field: String },
    #[error("field '{field}' should be {expected}, found {found}")]
    WrongType {
        field: String,
        expected: &'static str,
        found: String,
    },
}

/// 📦 One row fetched from SAP, or one document scanned from the store.
///
/// No fixed schema. Transforms read the fields they care about through the accessors
/// below, and there are two flavors of accessor on purpose:
///
/// - lenient (`str_field`, `int_field`, `key_field`): absent or mistyped → `""` / `0`.
///   SAP leaves optional UDFs (`U_direction`, `U_dep`) out of the payload all the time,
///   and a blank reference is still a valid row. Use these when blank is acceptable.
/// - strict (`require_str`, `require_int`): absent or mistyped → [`RecordError`].
///   Use these for natural keys, where silently writing `code: ""` would merge every
///   broken row into one very confused document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRecord(Fields);

impl SourceRecord {
    pub(crate) fn new(fields: Fields) -> Self {
        Self(fields)
    }

    pub(crate) fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub(crate) fn into_fields(self) -> Fields {
        self.0
    }

    /// 🔤 String field, or `""` when absent or not a string.
    pub(crate) fn str_field(&self, field: &str) -> &str {
        self.0.get(field).and_then(Value::as_str).unwrap_or("")
    }

    /// 🔢 Integer field, or `0` when absent or not integral.
    pub(crate) fn int_field(&self, field: &str) -> i64 {
        self.0.get(field).and_then(as_integer).unwrap_or(0)
    }

    /// 🔑 A field rendered as a lookup key: strings as-is, integers stringified,
    /// everything else (absent, null, bool, objects) as `""`.
    ///
    /// SAP says `ItemsGroupCode: 100`, the store says `number: "100"` on a bad day.
    /// Both land on the same key.
    pub(crate) fn key_field(&self, field: &str) -> String {
        match self.0.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => as_integer(other).map(|n| n.to_string()).unwrap_or_default(),
            None => String::new(),
        }
    }

    pub(crate) fn require_str(&self, field: &str) -> Result<&str, RecordError> {
        match self.0.get(field) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(wrong_type(field, "a string", other)),
            None => Err(RecordError::Missing {
                field: field.to_string(),
            }),
        }
    }

    pub(crate) fn require_int(&self, field: &str) -> Result<i64, RecordError> {
        match self.0.get(field) {
            Some(value) => as_integer(value).ok_or_else(|| wrong_type(field, "an integer", value)),
            None => Err(RecordError::Missing {
                field: field.to_string(),
            }),
        }
    }
}

impl From<Fields> for SourceRecord {
    fn from(fields: Fields) -> Self {
        Self(fields)
    }
}

// -- 🔢 JSON integers, plus floats that are secretly integers (100.0). 100.5 is not invited.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        _ => None,
    }
}

fn wrong_type(field: &str, expected: &'static str, found: &Value) -> RecordError {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    };
    RecordError::WrongType {
        field: field.to_string(),
        expected,
        found: found.to_string(),
    }
}

/// ✍️ A pending write: "find the document matching `filter`, apply `set`; if there is
/// no such document, create one from `filter` + `set_on_insert` + `set`."
///
/// Built by a worker, handed to the shared accumulator, finally owned by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub filter: Fields,
    pub set: Fields,
    pub set_on_insert: Fields,
}

impl Operation {
    pub(crate) fn new(filter: Fields, set: Fields, set_on_insert: Fields) -> Self {
        Self {
            filter,
            set,
            set_on_insert,
        }
    }
}

/// 💀 A row that did not make it, and the reason it did not make it.
///
/// Never retried within the run. Reported at the end, like a group project grade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub record: SourceRecord,
    pub reason: String,
}

impl ErrorRecord {
    pub(crate) fn new(record: SourceRecord, reason: impl Into<String>) -> Self {
        Self {
            record,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
pub(crate) fn record(value: Value) -> SourceRecord {
    match value {
        Value::Object(fields) => SourceRecord::new(fields),
        not_an_object => panic!("💀 test records must be JSON objects, got {not_an_object}"),
    }
}
