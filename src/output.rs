//! Result and summary types returned by the formatter and the uploader.

use crate::error::{FileError, UploadError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Formatter ────────────────────────────────────────────────────────────

/// One successfully formatted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedFile {
    /// Source photo.
    pub input: PathBuf,

    /// Written `<stem>_formatted.webp`.
    pub output: PathBuf,

    /// Size of the encoded output in bytes.
    pub bytes: usize,
}

/// Outcome of one file in a formatting batch.
pub type FileResult = Result<FormattedFile, FileError>;

/// Summary of a [`crate::format::format_directory`] run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatSummary {
    /// Files discovered in the input directory.
    pub total: usize,

    /// Files written, sorted by input path.
    pub outputs: Vec<FormattedFile>,

    /// Files that failed, sorted by input path.
    pub failures: Vec<FileError>,

    /// Wall-clock duration of the whole batch.
    pub duration_ms: u64,
}

impl FormatSummary {
    pub fn succeeded(&self) -> usize {
        self.outputs.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

// ── Uploader ─────────────────────────────────────────────────────────────

/// URLs returned by the image host for one accepted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedImage {
    pub url: String,
    pub display_url: String,
    pub delete_url: String,
    /// Status code reported inside the response body.
    pub status: u16,
}

/// Where a single upload task ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Success(HostedImage),
    Failed(UploadError),
}

/// One file's upload, with the key it was assigned and how many tries it took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    pub path: PathBuf,

    /// Key assigned to this file's chunk. Serialised output never carries it.
    #[serde(skip)]
    pub api_key: String,

    /// Attempts made so far, bounded by `retry_limit + 1`.
    pub attempts: u32,

    pub status: UploadStatus,
}

impl UploadTask {
    pub fn new(path: PathBuf, api_key: impl Into<String>) -> Self {
        Self {
            path,
            api_key: api_key.into(),
            attempts: 0,
            status: UploadStatus::Pending,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, UploadStatus::Success(_))
    }

    /// Ledger row for this task, or `None` while it is still pending.
    pub fn to_record(&self) -> Option<UploadRecord> {
        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        match &self.status {
            UploadStatus::Pending => None,
            UploadStatus::Success(hosted) => Some(UploadRecord {
                filename,
                url: hosted.url.clone(),
                display_url: hosted.display_url.clone(),
                delete_url: hosted.delete_url.clone(),
                status: hosted.status.to_string(),
            }),
            UploadStatus::Failed(_) => Some(UploadRecord {
                filename,
                url: String::new(),
                display_url: String::new(),
                delete_url: String::new(),
                status: FAILED_STATUS.to_string(),
            }),
        }
    }
}

/// Status column value for rows written with `record_failures`.
pub const FAILED_STATUS: &str = "failed";

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Display URL")]
    pub display_url: String,
    #[serde(rename = "Delete URL")]
    pub delete_url: String,
    #[serde(rename = "Status")]
    pub status: String,
}

/// A file that exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedUpload {
    pub path: PathBuf,
    pub attempts: u32,
    pub error: UploadError,
}

/// Summary of an [`crate::upload::UploadOrchestrator::run`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadSummary {
    /// Files in the discovered listing.
    pub discovered: usize,

    /// Leading files skipped because the ledger already held their rows.
    pub resumed_from: usize,

    /// Files attempted in this run.
    pub attempted: usize,

    /// Files accepted by the host.
    pub uploaded: usize,

    /// Files that failed every attempt.
    pub failed: Vec<FailedUpload>,

    /// Rows appended to the ledger in this run.
    pub rows_written: usize,

    /// Distinct API keys that served a chunk.
    pub keys_used: usize,

    /// Times the credential provider was asked for a new pool.
    pub refills: usize,

    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosted() -> HostedImage {
        HostedImage {
            url: "https://i.example/a.png".into(),
            display_url: "https://example/a".into(),
            delete_url: "https://example/a/del".into(),
            status: 200,
        }
    }

    #[test]
    fn pending_task_has_no_record() {
        let task = UploadTask::new(PathBuf::from("/p/a.png"), "k1");
        assert!(task.to_record().is_none());
        assert!(!task.is_success());
    }

    #[test]
    fn successful_task_record_uses_file_name() {
        let mut task = UploadTask::new(PathBuf::from("/p/sub/a.png"), "k1");
        task.status = UploadStatus::Success(hosted());
        let rec = task.to_record().unwrap();
        assert_eq!(rec.filename, "a.png");
        assert_eq!(rec.url, "https://i.example/a.png");
        assert_eq!(rec.status, "200");
    }

    #[test]
    fn failed_task_record_is_marked_failed() {
        let mut task = UploadTask::new(PathBuf::from("b.jpg"), "k1");
        task.status = UploadStatus::Failed(UploadError::Transport("reset".into()));
        let rec = task.to_record().unwrap();
        assert_eq!(rec.status, FAILED_STATUS);
        assert!(rec.url.is_empty());
    }

    #[test]
    fn serialized_task_omits_api_key() {
        let task = UploadTask::new(PathBuf::from("c.png"), "secret-key");
        let json = serde_json::to_string(&task).unwrap();
        assert!(!json.contains("secret-key"));
        assert!(json.contains("\"state\":\"pending\""));
    }
}
