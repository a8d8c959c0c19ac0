//! Fallback backend: each collection is a flat serialized array.
//!
//! Index queries are linear scans through the same key extraction the
//! indexed backend uses. When opened on a path, the document on disk is the
//! only state: every operation re-reads it, and every mutation replaces it
//! atomically, so several handles on one file see each other's records.

use super::StorageBackend;
use super::schema::{self, Collection};
use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub const SCHEMA_VERSION: u32 = 1;
pub const STORE_FILE_NAME: &str = "tact.json";

type Collections = BTreeMap<Collection, String>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCollections {
    schema_version: u32,
    #[serde(default)]
    collections: Collections,
}

enum Backing {
    Memory(Collections),
    File(PathBuf),
}

pub struct JsonStore {
    /// Serializes read-modify-write cycles within this process.
    backing: Mutex<Backing>,
}

impl JsonStore {
    pub fn in_memory() -> Self {
        Self {
            backing: Mutex::new(Backing::Memory(BTreeMap::new())),
        }
    }

    /// Validate an existing document, or create an empty one to prove the
    /// location is writable.
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if path.exists() {
            load_collections(path)?;
        } else {
            save_collections(path, &BTreeMap::new())?;
        }

        Ok(Self {
            backing: Mutex::new(Backing::File(path.to_path_buf())),
        })
    }

    fn read(&self, collection: Collection) -> Result<Vec<Value>, AppError> {
        let backing = self
            .backing
            .lock()
            .map_err(|_| AppError::io("fallback store poisoned"))?;
        match &*backing {
            Backing::Memory(state) => decode_collection(state.get(&collection).map(String::as_str)),
            Backing::File(path) => {
                let state = load_or_empty(path)?;
                decode_collection(state.get(&collection).map(String::as_str))
            }
        }
    }

    fn mutate<F>(&self, collection: Collection, op: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut Vec<Value>),
    {
        let mut backing = self
            .backing
            .lock()
            .map_err(|_| AppError::io("fallback store poisoned"))?;
        match &mut *backing {
            Backing::Memory(state) => {
                let next = apply(state.clone(), collection, op)?;
                *state = next;
            }
            Backing::File(path) => {
                let next = apply(load_or_empty(path)?, collection, op)?;
                save_collections(path, &next)?;
            }
        }
        Ok(())
    }
}

fn apply<F>(mut state: Collections, collection: Collection, op: F) -> Result<Collections, AppError>
where
    F: FnOnce(&mut Vec<Value>),
{
    let mut records = decode_collection(state.get(&collection).map(String::as_str))?;
    op(&mut records);
    state.insert(collection, serde_json::to_string(&records)?);
    Ok(state)
}

/// A document deleted behind our back reads as empty.
fn load_or_empty(path: &Path) -> Result<Collections, AppError> {
    if path.exists() {
        load_collections(path)
    } else {
        Ok(BTreeMap::new())
    }
}

fn decode_collection(encoded: Option<&str>) -> Result<Vec<Value>, AppError> {
    match encoded {
        Some(text) => serde_json::from_str(text).map_err(AppError::from),
        None => Ok(Vec::new()),
    }
}

fn sorted_by_id(mut records: Vec<Value>) -> Vec<Value> {
    records.sort_by(|a, b| {
        let a = a.get("id").and_then(Value::as_str).unwrap_or_default();
        let b = b.get("id").and_then(Value::as_str).unwrap_or_default();
        a.cmp(b)
    });
    records
}

fn load_collections(path: &Path) -> Result<Collections, AppError> {
    let content = std::fs::read_to_string(path).map_err(|err| AppError::io(err.to_string()))?;
    let stored: StoredCollections =
        serde_json::from_str(&content).map_err(|err| AppError::invalid_data(err.to_string()))?;

    if !(1..=SCHEMA_VERSION).contains(&stored.schema_version) {
        return Err(AppError::invalid_data("schema_version mismatch"));
    }

    for (collection, encoded) in &stored.collections {
        decode_collection(Some(encoded)).map_err(|err| {
            AppError::invalid_data(format!("{collection}: {}", err.message()))
        })?;
    }

    Ok(stored.collections)
}

fn save_collections(path: &Path, collections: &Collections) -> Result<(), AppError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|err| AppError::io(err.to_string()))?;

    let stored = StoredCollections {
        schema_version: SCHEMA_VERSION,
        collections: collections.clone(),
    };
    let content = serde_json::to_string_pretty(&stored)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;

    // Readers only ever see a complete document.
    let mut staged =
        tempfile::NamedTempFile::new_in(parent).map_err(|err| AppError::io(err.to_string()))?;
    staged
        .write_all(content.as_bytes())
        .map_err(|err| AppError::io(err.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(staged.path(), permissions)
            .map_err(|err| AppError::io(err.to_string()))?;
    }

    staged
        .persist(path)
        .map_err(|err| AppError::io(format!("{}: {}", path.display(), err.error)))?;
    Ok(())
}

#[async_trait]
impl StorageBackend for JsonStore {
    async fn put(&self, collection: Collection, record: Value) -> Result<(), AppError> {
        let id = schema::record_id(&record)?.to_string();
        self.mutate(collection, |records| {
            let existing = records
                .iter()
                .position(|candidate| candidate.get("id").and_then(Value::as_str) == Some(&id));
            match existing {
                Some(index) => records[index] = record,
                None => records.push(record),
            }
        })?;
        debug!(%collection, %id, "record stored in fallback");
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, AppError> {
        Ok(self
            .read(collection)?
            .into_iter()
            .find(|record| record.get("id").and_then(Value::as_str) == Some(id)))
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), AppError> {
        self.mutate(collection, |records| {
            records.retain(|record| record.get("id").and_then(Value::as_str) != Some(id));
        })
    }

    async fn all(&self, collection: Collection) -> Result<Vec<Value>, AppError> {
        Ok(sorted_by_id(self.read(collection)?))
    }

    async fn query_by_index(
        &self,
        collection: Collection,
        index: &str,
        key: &Value,
    ) -> Result<Vec<Value>, AppError> {
        let def = collection.index(index)?;
        let matching = self
            .read(collection)?
            .into_iter()
            .filter(|record| schema::matches_key(def, record, key))
            .collect();
        Ok(sorted_by_id(matching))
    }

    async fn clear(&self, collection: Collection) -> Result<(), AppError> {
        self.mutate(collection, Vec::clear)
    }
}
