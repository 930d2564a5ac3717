//! History storage: trait plus file-backed and in-memory implementations.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use graphmind_core::TenantNamespace;
use parking_lot::RwLock;

use crate::{QueryRecord, RecordId};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Query record not found: {0}")]
    NotFound(RecordId),

    #[error("Integrity check failed for query record {0}: stored hash does not match content")]
    IntegrityViolation(RecordId),

    #[error("Query record has no content hash (not finished)")]
    NotFinalized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Filters for listing records. The namespace is mandatory.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub namespace: TenantNamespace,
    pub user_id: Option<String>,
    /// Only records created at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only records created at or before this time.
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn for_namespace(namespace: TenantNamespace) -> Self {
        Self {
            namespace,
            user_id: None,
            from: None,
            to: None,
            limit: None,
        }
    }

    fn matches(&self, record: &QueryRecord) -> bool {
        if record.namespace != self.namespace {
            return false;
        }
        if let Some(uid) = &self.user_id {
            if &record.user_id != uid {
                return false;
            }
        }
        if let Some(from) = &self.from {
            if &record.created_at < from {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if &record.created_at > to {
                return false;
            }
        }
        true
    }
}

/// Persistence backend for query records.
pub trait HistoryStore: Send + Sync {
    /// Store a finished record. Records without a content hash are refused.
    fn save(&self, record: &QueryRecord) -> Result<(), HistoryError>;

    /// Fetch one record from a namespace, verifying integrity.
    fn get(&self, namespace: &TenantNamespace, id: RecordId) -> Result<QueryRecord, HistoryError>;

    /// Records matching the query, newest first.
    fn list(&self, query: &HistoryQuery) -> Result<Vec<QueryRecord>, HistoryError>;
}

/// Records as JSON files, one directory tree per namespace:
/// ```text
/// {root}/
///   {namespace}/
///     2026/
///       10/
///         18/
///           {record_id}.json
/// ```
pub struct FileHistoryStore {
    root: PathBuf,
}

impl FileHistoryStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &TenantNamespace) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    fn record_path(&self, record: &QueryRecord) -> PathBuf {
        let date = record.created_at.format("%Y/%m/%d");
        self.namespace_dir(&record.namespace)
            .join(format!("{}/{}.json", date, record.id.0))
    }

    fn find_path(&self, namespace: &TenantNamespace, id: RecordId) -> Result<PathBuf, HistoryError> {
        let filename = format!("{}.json", id.0);
        find_file_recursive(&self.namespace_dir(namespace), &filename)
            .ok_or(HistoryError::NotFound(id))
    }
}

impl HistoryStore for FileHistoryStore {
    fn save(&self, record: &QueryRecord) -> Result<(), HistoryError> {
        if record.content_hash.is_none() {
            return Err(HistoryError::NotFinalized);
        }

        let path = self.record_path(record);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(record)?)?;

        tracing::debug!(
            record_id = %record.id,
            namespace = %record.namespace,
            path = %path.display(),
            "Query record saved"
        );
        Ok(())
    }

    fn get(&self, namespace: &TenantNamespace, id: RecordId) -> Result<QueryRecord, HistoryError> {
        let path = self.find_path(namespace, id)?;
        let record: QueryRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;
        if !record.verify_integrity() {
            return Err(HistoryError::IntegrityViolation(id));
        }
        Ok(record)
    }

    fn list(&self, query: &HistoryQuery) -> Result<Vec<QueryRecord>, HistoryError> {
        let mut results = Vec::new();
        collect_records_recursive(&self.namespace_dir(&query.namespace), query, &mut results)?;
        Ok(finish_listing(results, query.limit))
    }
}

/// In-memory store, mostly for tests and the CLI's default.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Vec<QueryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn save(&self, record: &QueryRecord) -> Result<(), HistoryError> {
        if record.content_hash.is_none() {
            return Err(HistoryError::NotFinalized);
        }
        self.records.write().push(record.clone());
        Ok(())
    }

    fn get(&self, namespace: &TenantNamespace, id: RecordId) -> Result<QueryRecord, HistoryError> {
        let records = self.records.read();
        let record = records
            .iter()
            .find(|r| r.id == id && &r.namespace == namespace)
            .cloned()
            .ok_or(HistoryError::NotFound(id))?;
        if !record.verify_integrity() {
            return Err(HistoryError::IntegrityViolation(id));
        }
        Ok(record)
    }

    fn list(&self, query: &HistoryQuery) -> Result<Vec<QueryRecord>, HistoryError> {
        let results = self
            .records
            .read()
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        Ok(finish_listing(results, query.limit))
    }
}

fn finish_listing(mut results: Vec<QueryRecord>, limit: Option<usize>) -> Vec<QueryRecord> {
    results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if let Some(limit) = limit {
        results.truncate(limit);
    }
    results
}

fn find_file_recursive(dir: &Path, filename: &str) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file_recursive(&path, filename) {
                return Some(found);
            }
        } else if path.file_name().and_then(|n| n.to_str()) == Some(filename) {
            return Some(path);
        }
    }

    None
}

fn collect_records_recursive(
    dir: &Path,
    query: &HistoryQuery,
    results: &mut Vec<QueryRecord>,
) -> Result<(), HistoryError> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_records_recursive(&path, query, results)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let record: QueryRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;
            if query.matches(&record) {
                results.push(record);
            }
        }
    }

    Ok(())
}
