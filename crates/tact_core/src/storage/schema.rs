//! Collections, their declared indexes, and index-key extraction.
//!
//! Both backends derive index entries through [`index_keys`], which is what
//! keeps compound and multi-entry matching identical between them.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Tasks,
    Events,
    Days,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Tasks, Collection::Events, Collection::Days];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Events => "events",
            Self::Days => "days",
        }
    }

    pub fn indexes(&self) -> &'static [IndexDef] {
        match self {
            Self::Tasks => TASK_INDEXES,
            Self::Events => EVENT_INDEXES,
            Self::Days => DAY_INDEXES,
        }
    }

    pub fn index(&self, name: &str) -> Result<&'static IndexDef, AppError> {
        self.indexes()
            .iter()
            .find(|def| def.name == name)
            .ok_or_else(|| {
                AppError::invalid_input(format!("unknown index {name} on {}", self.as_str()))
            })
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPath {
    Field(&'static str),
    Compound(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub key_path: KeyPath,
    pub multi_entry: bool,
}

const fn field(name: &'static str, path: &'static str) -> IndexDef {
    IndexDef {
        name,
        key_path: KeyPath::Field(path),
        multi_entry: false,
    }
}

pub const BY_DAY_STATUS: &str = "byDayStatus";
pub const BY_COMPLETED_AT: &str = "byCompletedAt";
pub const BY_PROJECT: &str = "byProject";
pub const BY_TAG: &str = "byTag";
pub const BY_CREATED_AT: &str = "byCreatedAt";
pub const BY_TASK: &str = "byTask";
pub const BY_TS: &str = "byTs";
pub const BY_CLOSED_AT: &str = "byClosedAt";

const TASK_INDEXES: &[IndexDef] = &[
    IndexDef {
        name: BY_DAY_STATUS,
        key_path: KeyPath::Compound(&["dayKey", "status"]),
        multi_entry: false,
    },
    field(BY_COMPLETED_AT, "completedAt"),
    field(BY_PROJECT, "projectId"),
    IndexDef {
        name: BY_TAG,
        key_path: KeyPath::Field("tags"),
        multi_entry: true,
    },
    field(BY_CREATED_AT, "createdAt"),
];

const EVENT_INDEXES: &[IndexDef] = &[field(BY_TASK, "taskId"), field(BY_TS, "ts")];

const DAY_INDEXES: &[IndexDef] = &[field(BY_CLOSED_AT, "closedAt")];

/// Primary key of a stored record. Records without a non-empty string `id`
/// cannot be stored.
pub fn record_id(record: &Value) -> Result<&str, AppError> {
    match record.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(AppError::invalid_input("record requires a non-empty string id")),
    }
}

/// Keys a record contributes to `def`.
///
/// Missing or null values are not indexed. A compound key needs every
/// component. A multi-entry index contributes each distinct array element
/// once, so a membership query returns the record at most once.
pub fn index_keys(def: &IndexDef, record: &Value) -> Vec<Value> {
    match def.key_path {
        KeyPath::Field(path) => match record.get(path) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) if def.multi_entry => {
                let mut keys: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    if !item.is_null() && !keys.contains(item) {
                        keys.push(item.clone());
                    }
                }
                keys
            }
            Some(value) => vec![value.clone()],
        },
        KeyPath::Compound(paths) => {
            let mut parts = Vec::with_capacity(paths.len());
            for path in paths {
                match record.get(*path) {
                    None | Some(Value::Null) => return Vec::new(),
                    Some(value) => parts.push(value.clone()),
                }
            }
            vec![Value::Array(parts)]
        }
    }
}

/// Canonical text form of an index key, used for equality matching.
///
/// Integral floats collapse onto integers so `5` and `5.0` name the same key.
pub fn encode_key(key: &Value) -> String {
    canonical(key).to_string()
}

fn canonical(key: &Value) -> Value {
    match key {
        Value::Number(number) => match number.as_f64() {
            Some(float) if number.is_f64() && float.fract() == 0.0 && float.abs() < 9.0e15 => {
                Value::from(float as i64)
            }
            _ => key.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

pub fn matches_key(def: &IndexDef, record: &Value, key: &Value) -> bool {
    let wanted = encode_key(key);
    index_keys(def, record)
        .iter()
        .any(|candidate| encode_key(candidate) == wanted)
}
