//! Sender-side upload draft: the files picked for sharing and the password,
//! before and while a session is live.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// MIME type used when nothing better is known
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A file chosen for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    /// Display name; the entry's relative path when it came from a folder
    pub name: String,
    pub mime_type: String,
    pub path: Option<PathBuf>,
}

impl PendingFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            path: None,
        }
    }

    /// Use the last path component as the display name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().into_owned();
        Some(Self {
            name,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            path: Some(path.to_path_buf()),
        })
    }
}

/// Where the sender is in the upload flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    /// No files chosen yet
    Initial,
    /// Files chosen; list and password are still editable
    Confirm,
    /// Session is live
    Uploading,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("No file at index {index} (list has {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Cannot start an upload without files")]
    NoFiles,
    #[error("File list is locked while uploading")]
    Locked,
}

#[derive(Debug, Clone)]
pub struct UploadDraft {
    files: Vec<PendingFile>,
    password: String,
    stage: UploadStage,
}

impl Default for UploadDraft {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadDraft {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            password: String::new(),
            stage: UploadStage::Initial,
        }
    }

    pub fn stage(&self) -> UploadStage {
        self.stage
    }

    pub fn files(&self) -> &[PendingFile] {
        &self.files
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Replace the file list (a new drop replaces the previous one).
    pub fn add_files(&mut self, files: Vec<PendingFile>) -> Result<(), UploadError> {
        if self.stage == UploadStage::Uploading {
            return Err(UploadError::Locked);
        }
        self.files = files;
        self.stage = if self.files.is_empty() {
            UploadStage::Initial
        } else {
            UploadStage::Confirm
        };
        Ok(())
    }

    /// Remove the file at `index`, keeping the others in their original order.
    pub fn remove_file(&mut self, index: usize) -> Result<PendingFile, UploadError> {
        if self.stage == UploadStage::Uploading {
            return Err(UploadError::Locked);
        }
        if index >= self.files.len() {
            return Err(UploadError::IndexOutOfRange {
                index,
                len: self.files.len(),
            });
        }
        let removed = self.files.remove(index);
        if self.files.is_empty() {
            self.stage = UploadStage::Initial;
        }
        Ok(removed)
    }

    pub fn set_password(&mut self, password: impl Into<String>) -> Result<(), UploadError> {
        if self.stage == UploadStage::Uploading {
            return Err(UploadError::Locked);
        }
        self.password = password.into();
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), UploadError> {
        if self.files.is_empty() {
            return Err(UploadError::NoFiles);
        }
        self.stage = UploadStage::Uploading;
        Ok(())
    }

    /// Stop sharing but keep the files for another attempt.
    pub fn stop(&mut self) {
        if self.stage == UploadStage::Uploading {
            self.stage = UploadStage::Confirm;
        }
    }

    /// Drop everything and go back to the initial state.
    pub fn cancel(&mut self) {
        self.files.clear();
        self.password.clear();
        self.stage = UploadStage::Initial;
    }
}
