//! Concept run history
//!
//! Same on-disk layout as note history, in its own directory: `{root}/index.json`
//! newest first, plus one `{id}.json` per run holding the article and the final
//! [`ConceptReport`]. The pipeline writes here as a side effect only.

use super::ConceptReport;
use crate::error::{ApiError, StorageError};
use crate::generation::PageStatus;
use crate::history::{paginate, record_file, write_json_atomic};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Subdirectory of the history dir that holds concept records.
pub const CONCEPT_HISTORY_DIR: &str = "concept";

const ARTICLE_PREVIEW_CHARS: usize = 200;
const FALLBACK_TITLE_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptRecordStatus {
    InProgress,
    Completed,
    Partial,
    Error,
}

impl ConceptRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConceptRecordStatus::InProgress => "in_progress",
            ConceptRecordStatus::Completed => "completed",
            ConceptRecordStatus::Partial => "partial",
            ConceptRecordStatus::Error => "error",
        }
    }

    /// Status of a run that reached the end; a run without images counts as completed.
    pub fn from_report(report: &ConceptReport) -> Self {
        match report.summary {
            None => ConceptRecordStatus::Completed,
            Some(summary) if summary.failed == 0 => ConceptRecordStatus::Completed,
            Some(summary) if summary.completed > 0 => ConceptRecordStatus::Partial,
            Some(_) => ConceptRecordStatus::Error,
        }
    }
}

impl std::str::FromStr for ConceptRecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(ConceptRecordStatus::InProgress),
            "completed" => Ok(ConceptRecordStatus::Completed),
            "partial" => Ok(ConceptRecordStatus::Partial),
            "error" => Ok(ConceptRecordStatus::Error),
            other => Err(format!("Unknown concept record status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ConceptRecordStatus,
    pub task_id: String,
    pub style: String,
    pub article_preview: String,
    pub article: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub image_count: usize,
    #[serde(default)]
    pub report: Option<ConceptReport>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptIndexEntry {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ConceptRecordStatus,
    pub task_id: String,
    pub style: String,
    pub article_preview: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub image_count: usize,
}

impl From<&ConceptRecord> for ConceptIndexEntry {
    fn from(record: &ConceptRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            status: record.status,
            task_id: record.task_id.clone(),
            style: record.style.clone(),
            article_preview: record.article_preview.clone(),
            thumbnail: record.thumbnail.clone(),
            image_count: record.image_count,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConceptIndex {
    #[serde(default)]
    records: Vec<ConceptIndexEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConceptRecordPage {
    pub records: Vec<ConceptIndexEntry>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

/// Partial update; `None` fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct ConceptRecordUpdate {
    pub title: Option<String>,
    pub status: Option<ConceptRecordStatus>,
    pub thumbnail: Option<String>,
    pub image_count: Option<usize>,
    pub report: Option<ConceptReport>,
    pub error: Option<String>,
}

impl ConceptRecordUpdate {
    pub fn finished(report: &ConceptReport) -> Self {
        let generated: Vec<&str> = report
            .images
            .iter()
            .filter(|r| r.status == PageStatus::Done)
            .filter_map(|r| r.file_name.as_deref())
            .collect();
        Self {
            status: Some(ConceptRecordStatus::from_report(report)),
            thumbnail: generated.first().map(|name| name.to_string()),
            image_count: Some(generated.len()),
            report: Some(report.clone()),
            ..Default::default()
        }
    }

    pub fn failed(err: &ApiError) -> Self {
        Self {
            status: Some(ConceptRecordStatus::Error),
            error: Some(err.to_string()),
            ..Default::default()
        }
    }
}

/// Write side used by the concept pipeline.
pub trait ConceptHistoryReporter: Send + Sync {
    fn create(
        &self,
        title: &str,
        article: &str,
        task_id: &str,
        style: &str,
    ) -> Result<String, StorageError>;

    /// Returns false when no record has this id.
    fn update(&self, record_id: &str, update: ConceptRecordUpdate) -> Result<bool, StorageError>;
}

/// First characters of the article, used until the analysis names a theme.
pub fn fallback_title(article: &str) -> String {
    let title: String = article.trim().chars().take(FALLBACK_TITLE_CHARS).collect();
    title.trim().to_string()
}

fn article_preview(article: &str) -> String {
    let trimmed = article.trim();
    if trimmed.chars().count() > ARTICLE_PREVIEW_CHARS {
        let head: String = trimmed.chars().take(ARTICLE_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}

pub struct ConceptHistoryStore {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl ConceptHistoryStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let store = Self {
            root,
            index_lock: Mutex::new(()),
        };
        if !store.index_path().exists() {
            store.save_index(&ConceptIndex::default())?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn load_index(&self) -> Result<ConceptIndex, StorageError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(ConceptIndex::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save_index(&self, index: &ConceptIndex) -> Result<(), StorageError> {
        write_json_atomic(&self.index_path(), index)
    }

    pub fn create_record(
        &self,
        title: &str,
        article: &str,
        task_id: &str,
        style: &str,
    ) -> Result<String, StorageError> {
        let record_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let title = if title.trim().is_empty() {
            fallback_title(article)
        } else {
            title.trim().to_string()
        };
        let record = ConceptRecord {
            id: record_id.clone(),
            title,
            created_at: now,
            updated_at: now,
            status: ConceptRecordStatus::InProgress,
            task_id: task_id.to_string(),
            style: style.to_string(),
            article_preview: article_preview(article),
            article: article.to_string(),
            thumbnail: None,
            image_count: 0,
            report: None,
            error: None,
        };

        let _guard = self.index_lock.lock();
        write_json_atomic(&record_file(&self.root, &record_id)?, &record)?;
        let mut index = self.load_index()?;
        index.records.insert(0, ConceptIndexEntry::from(&record));
        self.save_index(&index)?;
        debug!(record_id = %record_id, task_id, "Concept record created");
        Ok(record_id)
    }

    pub fn get_record(&self, record_id: &str) -> Result<Option<ConceptRecord>, StorageError> {
        let path = record_file(&self.root, record_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn update_record(
        &self,
        record_id: &str,
        update: ConceptRecordUpdate,
    ) -> Result<bool, StorageError> {
        let _guard = self.index_lock.lock();
        let Some(mut record) = self.get_record(record_id)? else {
            return Ok(false);
        };

        record.updated_at = Utc::now();
        if let Some(title) = update.title {
            record.title = title;
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(thumbnail) = update.thumbnail {
            record.thumbnail = Some(thumbnail);
        }
        if let Some(image_count) = update.image_count {
            record.image_count = image_count;
        }
        if let Some(report) = update.report {
            record.report = Some(report);
        }
        if let Some(error) = update.error {
            record.error = Some(error);
        }
        write_json_atomic(&record_file(&self.root, record_id)?, &record)?;

        let mut index = self.load_index()?;
        if let Some(entry) = index.records.iter_mut().find(|e| e.id == record_id) {
            *entry = ConceptIndexEntry::from(&record);
        }
        self.save_index(&index)?;
        Ok(true)
    }

    /// Remove a record; returns it so the caller can drop the task's images too.
    pub fn delete_record(&self, record_id: &str) -> Result<Option<ConceptRecord>, StorageError> {
        let _guard = self.index_lock.lock();
        let record = self.get_record(record_id)?;
        if record.is_some() {
            std::fs::remove_file(record_file(&self.root, record_id)?)?;
        }
        let mut index = self.load_index()?;
        let before = index.records.len();
        index.records.retain(|e| e.id != record_id);
        if index.records.len() != before {
            self.save_index(&index)?;
        }
        Ok(record)
    }

    /// Newest first; `page` is 1-based.
    pub fn list_records(
        &self,
        page: usize,
        page_size: usize,
        status: Option<ConceptRecordStatus>,
    ) -> Result<ConceptRecordPage, StorageError> {
        let records: Vec<ConceptIndexEntry> = self
            .load_index()?
            .records
            .into_iter()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .collect();
        let paged = paginate(records, page, page_size);
        Ok(ConceptRecordPage {
            records: paged.items,
            total: paged.total,
            page: paged.page,
            page_size: paged.page_size,
            total_pages: paged.total_pages,
        })
    }

    pub fn find_by_task(&self, task_id: &str) -> Result<Option<ConceptRecord>, StorageError> {
        let entry = self
            .load_index()?
            .records
            .into_iter()
            .find(|e| e.task_id == task_id);
        match entry {
            Some(entry) => self.get_record(&entry.id),
            None => Ok(None),
        }
    }
}

impl ConceptHistoryReporter for ConceptHistoryStore {
    fn create(
        &self,
        title: &str,
        article: &str,
        task_id: &str,
        style: &str,
    ) -> Result<String, StorageError> {
        self.create_record(title, article, task_id, style)
    }

    fn update(&self, record_id: &str, update: ConceptRecordUpdate) -> Result<bool, StorageError> {
        self.update_record(record_id, update)
    }
}
