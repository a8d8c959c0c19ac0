//! Storage engine: uniform async CRUD and index queries over named
//! collections, served by an indexed SQLite backend or a serialized fallback.
//!
//! The backend is chosen once in [`Storage::open`] and callers never learn
//! which one answered.

pub mod json_store;
pub mod schema;
pub mod sqlite_store;

pub use schema::{Collection, IndexDef, KeyPath};

use crate::error::AppError;
use crate::model::{Day, Event, Task};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Contract both backends satisfy.
///
/// `put` replaces an existing record with the same id wholesale. Reads of a
/// missing id return nothing, and deleting a missing id is a no-op.
/// `all` and `query_by_index` return records ordered by id.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put(&self, collection: Collection, record: Value) -> Result<(), AppError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, AppError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), AppError>;

    async fn all(&self, collection: Collection) -> Result<Vec<Value>, AppError>;

    async fn query_by_index(
        &self,
        collection: Collection,
        index: &str,
        key: &Value,
    ) -> Result<Vec<Value>, AppError>;

    async fn clear(&self, collection: Collection) -> Result<(), AppError>;
}

/// A typed record living in one collection.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;
}

impl Record for Task {
    const COLLECTION: Collection = Collection::Tasks;
}

impl Record for Event {
    const COLLECTION: Collection = Collection::Events;
}

impl Record for Day {
    const COLLECTION: Collection = Collection::Days;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Indexed,
    Fallback,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    #[serde(alias = "sqlite")]
    Indexed,
    #[serde(alias = "json")]
    Fallback,
    Memory,
}

impl BackendPreference {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "indexed" | "sqlite" => Some(Self::Indexed),
            "fallback" | "json" => Some(Self::Fallback),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub preference: BackendPreference,
    pub indexed_path: PathBuf,
    pub fallback_path: PathBuf,
}

impl StorageOptions {
    pub fn in_dir(dir: impl Into<PathBuf>, preference: BackendPreference) -> Self {
        let dir = dir.into();
        Self {
            preference,
            indexed_path: dir.join(sqlite_store::DB_FILE_NAME),
            fallback_path: dir.join(json_store::STORE_FILE_NAME),
        }
    }
}

/// Handle to whichever backend was selected at startup. Cheap to clone.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
    kind: BackendKind,
}

impl Storage {
    /// Select a backend. Never fails: each unavailable choice degrades to the
    /// next one down, ending at an in-memory fallback.
    pub fn open(options: &StorageOptions) -> Self {
        if matches!(
            options.preference,
            BackendPreference::Auto | BackendPreference::Indexed
        ) {
            match sqlite_store::SqliteStore::open(&options.indexed_path) {
                Ok(store) => return Self::from_backend(Arc::new(store), BackendKind::Indexed),
                Err(err) => warn!(
                    error = %err,
                    path = %options.indexed_path.display(),
                    "indexed storage unavailable, using fallback"
                ),
            }
        }

        if options.preference != BackendPreference::Memory {
            match json_store::JsonStore::open(&options.fallback_path) {
                Ok(store) => return Self::from_backend(Arc::new(store), BackendKind::Fallback),
                Err(err) => warn!(
                    error = %err,
                    path = %options.fallback_path.display(),
                    "fallback file unavailable, keeping state in memory"
                ),
            }
        }

        Self::in_memory()
    }

    pub fn in_memory() -> Self {
        Self::from_backend(
            Arc::new(json_store::JsonStore::in_memory()),
            BackendKind::Fallback,
        )
    }

    pub fn from_backend(backend: Arc<dyn StorageBackend>, kind: BackendKind) -> Self {
        debug!(?kind, "storage backend selected");
        Self { backend, kind }
    }

    /// Diagnostics only.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    pub async fn put<R: Record>(&self, record: &R) -> Result<(), AppError> {
        let value = serde_json::to_value(record)?;
        self.backend.put(R::COLLECTION, value).await
    }

    pub async fn get<R: Record>(&self, id: &str) -> Result<Option<R>, AppError> {
        match self.backend.get(R::COLLECTION, id).await? {
            Some(value) => Ok(Some(decode(value)?)),
            None => Ok(None),
        }
    }

    pub async fn delete<R: Record>(&self, id: &str) -> Result<(), AppError> {
        self.backend.delete(R::COLLECTION, id).await
    }

    pub async fn all<R: Record>(&self) -> Result<Vec<R>, AppError> {
        decode_all(self.backend.all(R::COLLECTION).await?)
    }

    pub async fn query_by_index<R: Record>(
        &self,
        index: &str,
        key: &Value,
    ) -> Result<Vec<R>, AppError> {
        decode_all(
            self.backend
                .query_by_index(R::COLLECTION, index, key)
                .await?,
        )
    }

    pub async fn clear(&self, collection: Collection) -> Result<(), AppError> {
        self.backend.clear(collection).await
    }
}

fn decode<R: Record>(value: Value) -> Result<R, AppError> {
    serde_json::from_value(value).map_err(|err| {
        AppError::invalid_data(format!("corrupt {} record: {err}", R::COLLECTION))
    })
}

fn decode_all<R: Record>(values: Vec<Value>) -> Result<Vec<R>, AppError> {
    values.into_iter().map(decode).collect()
}

#[cfg(test)]
mod tests {
    use super::{BackendKind, BackendPreference, Storage, StorageOptions};

    #[test]
    fn backend_preference_parses_aliases() {
        assert_eq!(
            BackendPreference::parse("SQLite"),
            Some(BackendPreference::Indexed)
        );
        assert_eq!(
            BackendPreference::parse(" json "),
            Some(BackendPreference::Fallback)
        );
        assert_eq!(BackendPreference::parse("cloud"), None);
    }

    #[test]
    fn auto_selects_indexed_backend_when_available() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&StorageOptions::in_dir(dir.path(), BackendPreference::Auto));
        assert_eq!(storage.kind(), BackendKind::Indexed);
    }

    #[test]
    fn unusable_indexed_path_degrades_to_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = StorageOptions::in_dir(dir.path(), BackendPreference::Auto);
        // A directory cannot be opened as a database file.
        options.indexed_path = dir.path().to_path_buf();

        let storage = Storage::open(&options);
        assert_eq!(storage.kind(), BackendKind::Fallback);
    }

    #[test]
    fn memory_preference_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let options = StorageOptions::in_dir(dir.path(), BackendPreference::Memory);
        let storage = Storage::open(&options);

        assert_eq!(storage.kind(), BackendKind::Fallback);
        assert!(!options.fallback_path.exists());
        assert!(!options.indexed_path.exists());
    }
}
