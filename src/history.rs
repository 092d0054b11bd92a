//! Generation history
//!
//! Durable snapshots of a task's outline and generated images. Records live as
//! `{root}/{id}.json` with a newest-first `{root}/index.json` summary. The
//! coordinator reports into a [`HistoryReporter`] as a side effect only; generation
//! never depends on history writes succeeding.

use crate::error::StorageError;
use crate::outline::OutlineResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Draft,
    Generating,
    Partial,
    Completed,
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Draft => "draft",
            RecordStatus::Generating => "generating",
            RecordStatus::Partial => "partial",
            RecordStatus::Completed => "completed",
            RecordStatus::Error => "error",
        }
    }

    /// Status after a run given how many of the expected pages have images.
    pub fn from_counts(generated: usize, expected: usize) -> Self {
        if expected > 0 && generated >= expected {
            RecordStatus::Completed
        } else if generated > 0 {
            RecordStatus::Partial
        } else {
            RecordStatus::Error
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(RecordStatus::Draft),
            "generating" => Ok(RecordStatus::Generating),
            "partial" => Ok(RecordStatus::Partial),
            "completed" => Ok(RecordStatus::Completed),
            "error" => Ok(RecordStatus::Error),
            other => Err(format!("Unknown record status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordImages {
    pub task_id: Option<String>,
    #[serde(default)]
    pub generated: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub outline: OutlineResult,
    #[serde(default)]
    pub images: RecordImages,
    pub status: RecordStatus,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Summary row kept in `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RecordStatus,
    #[serde(default)]
    pub thumbnail: Option<String>,
    pub page_count: usize,
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryIndex {
    #[serde(default)]
    records: Vec<IndexEntry>,
}

/// Partial update; `None` fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub outline: Option<OutlineResult>,
    pub images: Option<RecordImages>,
    pub status: Option<RecordStatus>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordPage {
    pub records: Vec<IndexEntry>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryStatistics {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

/// Write side used by the coordinator and pipelines.
pub trait HistoryReporter: Send + Sync {
    fn create(
        &self,
        topic: &str,
        outline: &OutlineResult,
        task_id: Option<&str>,
    ) -> Result<String, StorageError>;

    /// Returns false when no record has this id.
    fn update(&self, record_id: &str, update: RecordUpdate) -> Result<bool, StorageError>;
}

/// JSON-file history store.
pub struct LocalHistoryStore {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl LocalHistoryStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let store = Self {
            root,
            index_lock: Mutex::new(()),
        };
        if !store.index_path().exists() {
            store.save_index(&HistoryIndex::default())?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn record_path(&self, record_id: &str) -> Result<PathBuf, StorageError> {
        record_file(&self.root, record_id)
    }

    fn load_index(&self) -> Result<HistoryIndex, StorageError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(HistoryIndex::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save_index(&self, index: &HistoryIndex) -> Result<(), StorageError> {
        write_json_atomic(&self.index_path(), index)
    }

    pub fn create_record(
        &self,
        topic: &str,
        outline: &OutlineResult,
        task_id: Option<&str>,
    ) -> Result<String, StorageError> {
        let record_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = HistoryRecord {
            id: record_id.clone(),
            title: topic.to_string(),
            created_at: now,
            updated_at: now,
            outline: outline.clone(),
            images: RecordImages {
                task_id: task_id.map(str::to_string),
                generated: Vec::new(),
            },
            status: RecordStatus::Draft,
            thumbnail: None,
        };

        let _guard = self.index_lock.lock();
        write_json_atomic(&self.record_path(&record_id)?, &record)?;
        let mut index = self.load_index()?;
        index.records.insert(
            0,
            IndexEntry {
                id: record_id.clone(),
                title: record.title.clone(),
                created_at: now,
                updated_at: now,
                status: RecordStatus::Draft,
                thumbnail: None,
                page_count: outline.pages.len(),
                task_id: record.images.task_id.clone(),
            },
        );
        self.save_index(&index)?;
        debug!(record_id = %record_id, "History record created");
        Ok(record_id)
    }

    pub fn get_record(&self, record_id: &str) -> Result<Option<HistoryRecord>, StorageError> {
        let path = self.record_path(record_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn update_record(
        &self,
        record_id: &str,
        update: RecordUpdate,
    ) -> Result<bool, StorageError> {
        let _guard = self.index_lock.lock();
        let Some(mut record) = self.get_record(record_id)? else {
            return Ok(false);
        };

        let now = Utc::now();
        record.updated_at = now;
        if let Some(outline) = update.outline {
            record.outline = outline;
        }
        if let Some(images) = update.images {
            record.images = images;
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(thumbnail) = update.thumbnail {
            record.thumbnail = Some(thumbnail);
        }
        write_json_atomic(&self.record_path(record_id)?, &record)?;

        let mut index = self.load_index()?;
        if let Some(entry) = index.records.iter_mut().find(|e| e.id == record_id) {
            entry.updated_at = now;
            entry.status = record.status;
            entry.thumbnail = record.thumbnail.clone();
            entry.page_count = record.outline.pages.len();
            if record.images.task_id.is_some() {
                entry.task_id = record.images.task_id.clone();
            }
        }
        self.save_index(&index)?;
        Ok(true)
    }

    pub fn delete_record(&self, record_id: &str) -> Result<bool, StorageError> {
        let _guard = self.index_lock.lock();
        let path = self.record_path(record_id)?;
        let existed = path.exists();
        if existed {
            std::fs::remove_file(path)?;
        }
        let mut index = self.load_index()?;
        let before = index.records.len();
        index.records.retain(|e| e.id != record_id);
        let removed = index.records.len() != before;
        if removed {
            self.save_index(&index)?;
        }
        Ok(existed || removed)
    }

    /// Newest first; `page` is 1-based.
    pub fn list_records(
        &self,
        page: usize,
        page_size: usize,
        status: Option<RecordStatus>,
    ) -> Result<RecordPage, StorageError> {
        let records: Vec<IndexEntry> = self
            .load_index()?
            .records
            .into_iter()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .collect();

        let paged = paginate(records, page, page_size);
        Ok(RecordPage {
            records: paged.items,
            total: paged.total,
            page: paged.page,
            page_size: paged.page_size,
            total_pages: paged.total_pages,
        })
    }

    /// Case-insensitive title match.
    pub fn search_records(&self, keyword: &str) -> Result<Vec<IndexEntry>, StorageError> {
        let needle = keyword.to_lowercase();
        Ok(self
            .load_index()?
            .records
            .into_iter()
            .filter(|e| e.title.to_lowercase().contains(&needle))
            .collect())
    }

    pub fn statistics(&self) -> Result<HistoryStatistics, StorageError> {
        let index = self.load_index()?;
        let mut by_status = BTreeMap::new();
        for entry in &index.records {
            *by_status.entry(entry.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(HistoryStatistics {
            total: index.records.len(),
            by_status,
        })
    }
}

impl HistoryReporter for LocalHistoryStore {
    fn create(
        &self,
        topic: &str,
        outline: &OutlineResult,
        task_id: Option<&str>,
    ) -> Result<String, StorageError> {
        self.create_record(topic, outline, task_id)
    }

    fn update(&self, record_id: &str, update: RecordUpdate) -> Result<bool, StorageError> {
        self.update_record(record_id, update)
    }
}

/// `{root}/{record_id}.json`; ids are limited to ASCII letters, digits, `-` and `_`.
pub(crate) fn record_file(root: &Path, record_id: &str) -> Result<PathBuf, StorageError> {
    if record_id.is_empty()
        || !record_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StorageError::InvalidPath(record_id.to_string()));
    }
    Ok(root.join(format!("{}.json", record_id)))
}

pub(crate) struct Paged<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

/// One 1-based page of `items`; page and size are clamped to at least 1.
pub(crate) fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Paged<T> {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total = items.len();
    let items = items
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();
    Paged {
        items,
        total,
        page,
        page_size,
        total_pages: total.div_ceil(page_size),
    }
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
