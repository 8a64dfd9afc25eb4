//! Helpers for turning command-line input into an upload draft

use anyhow::{Context, Result};
use std::path::PathBuf;

use filedrop_common::{ConnectionTracker, PendingFile, UploadDraft};

/// Build a draft from the given paths. Every path must be a regular file.
pub fn build_draft(paths: &[PathBuf], password: Option<String>) -> Result<UploadDraft> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        if !path.exists() {
            anyhow::bail!("Path not found: {}", path.display());
        }
        if !path.is_file() {
            anyhow::bail!("Not a regular file: {}", path.display());
        }
        let file = PendingFile::from_path(path)
            .with_context(|| format!("Cannot take a file name from {}", path.display()))?;
        files.push(file);
    }

    let mut draft = UploadDraft::new();
    draft.add_files(files)?;
    if let Some(password) = password {
        draft.set_password(password)?;
    }
    Ok(draft)
}

/// One line per peer, for the end-of-session summary
pub fn summarize(tracker: &ConnectionTracker) -> Vec<String> {
    tracker
        .snapshot()
        .into_iter()
        .map(|(peer, conn)| {
            format!(
                "{}: {} ({}/{} files)",
                peer, conn.status, conn.completed_files, conn.total_files
            )
        })
        .collect()
}
