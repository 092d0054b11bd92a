//! Generated image persistence, namespaced by task id.

use crate::error::StorageError;
use crate::provider::ImageData;
use std::path::{Path, PathBuf};

/// Where a saved image lives and how clients fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub file_name: String,
    pub image_url: String,
}

pub trait ImageStore: Send + Sync {
    fn save(
        &self,
        task_id: &str,
        file_name: &str,
        image: &ImageData,
    ) -> Result<StoredImage, StorageError>;

    fn load(&self, task_id: &str, file_name: &str) -> Result<ImageData, StorageError>;
}

/// Public URL under which a task's image is served.
pub fn image_url(task_id: &str, file_name: &str) -> String {
    format!("/api/images/{}/{}", task_id, file_name)
}

/// Images on the local filesystem at `{root}/{task_id}/{file_name}`.
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, task_id: &str) -> Result<PathBuf, StorageError> {
        validate_segment(task_id)?;
        Ok(self.root.join(task_id))
    }

    /// Delete a task's image directory; false when it never existed.
    pub fn remove_task(&self, task_id: &str) -> Result<bool, StorageError> {
        let dir = self.task_dir(task_id)?;
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(dir)?;
        Ok(true)
    }
}

/// Reject anything that could escape the task directory.
fn validate_segment(segment: &str) -> Result<(), StorageError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
    {
        return Err(StorageError::InvalidPath(segment.to_string()));
    }
    Ok(())
}

impl ImageStore for LocalImageStore {
    fn save(
        &self,
        task_id: &str,
        file_name: &str,
        image: &ImageData,
    ) -> Result<StoredImage, StorageError> {
        validate_segment(file_name)?;
        let dir = self.task_dir(task_id)?;
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(file_name), &image.bytes)?;
        Ok(StoredImage {
            file_name: file_name.to_string(),
            image_url: image_url(task_id, file_name),
        })
    }

    fn load(&self, task_id: &str, file_name: &str) -> Result<ImageData, StorageError> {
        validate_segment(file_name)?;
        let path = self.task_dir(task_id)?.join(file_name);
        Ok(ImageData::from_file(&path)?)
    }
}
