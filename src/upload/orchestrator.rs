//! Upload orchestration: key rotation, bounded batches, retries, resume.
//!
//! ```text
//! files ──▶ skip ledger rows ──▶ chunk per key (images_per_key)
//!                                   │
//!                                   ├─ sub-batches, ceil(len / concurrency) each
//!                                   │    one semaphore permit per sub-batch,
//!                                   │    files inside a batch go one by one
//!                                   ├─ flush every save_interval results
//!                                   └─ flush at end of chunk
//! ```
//!
//! Each task moves `Pending → Success | Failed`. A failed attempt of any
//! kind is retried immediately (or after `retry_backoff_ms`) until
//! `retry_limit + 1` attempts have been made.
//!
//! Resuming trusts the ledger row count and a listing that comes back in the
//! same order. Sub-batches finish out of order, so every buffered row keeps
//! its listing index and only the contiguous finished prefix is appended.
//! Rows behind a file still in flight wait, which keeps the ledger equal to
//! the first K files even when a run is interrupted.
//!
//! A file that fails with `record_failures` off has no row. Rows behind it
//! wait until the end of its key chunk and are then written anyway, so the
//! next run skips the failed file and re-uploads the last completed one.
//! Turn `record_failures` on to keep the offset exact.

use super::host::ImageHost;
use super::keys::{redact, ApiKeyPool, CredentialProvider};
use super::ledger::ProgressLedger;
use crate::config::UploadConfig;
use crate::error::{SquareshotError, UploadError};
use crate::output::{FailedUpload, UploadRecord, UploadStatus, UploadSummary, UploadTask};
use crate::pipeline::discover;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// Drives one upload run against an [`ImageHost`], recording results in a
/// [`ProgressLedger`].
///
/// Successful results are buffered in memory and appended to the ledger in
/// batches. After an interrupted [`run`](Self::run), call
/// [`flush_pending`](Self::flush_pending) so buffered rows are not lost.
pub struct UploadOrchestrator {
    host: Arc<dyn ImageHost>,
    ledger: Arc<dyn ProgressLedger>,
    credentials: Arc<dyn CredentialProvider>,
    config: UploadConfig,
    pending: Mutex<PendingRows>,
    /// Serialises ledger appends so batches land in listing order.
    flush_lock: tokio::sync::Mutex<()>,
    rows_written: AtomicUsize,
}

/// Finished tasks keyed by listing index, waiting for the ledger.
///
/// `None` marks a file that finished without a row.
#[derive(Debug, Default)]
struct PendingRows {
    /// Listing index of the first file the ledger does not cover yet.
    next: usize,
    done: BTreeMap<usize, Option<UploadRecord>>,
}

type TakenRows = Vec<(usize, Option<UploadRecord>)>;

impl PendingRows {
    fn reset(&mut self, next: usize) {
        self.next = next;
        self.done.clear();
    }

    fn insert(&mut self, index: usize, record: Option<UploadRecord>) {
        self.done.insert(index, record);
    }

    /// Rows at the front of the buffer that can be appended right now.
    fn ready_len(&self) -> usize {
        let mut index = self.next;
        while let Some(Some(_)) = self.done.get(&index) {
            index += 1;
        }
        index - self.next
    }

    fn buffered(&self) -> usize {
        self.done.values().filter(|r| r.is_some()).count()
    }

    /// Remove the contiguous run of rows starting at `next`. With
    /// `through_gaps`, take everything buffered, skipping over files that
    /// finished without a row.
    fn take(&mut self, through_gaps: bool) -> TakenRows {
        if through_gaps {
            let taken: TakenRows = std::mem::take(&mut self.done).into_iter().collect();
            if let Some((last, _)) = taken.last() {
                self.next = self.next.max(last + 1);
            }
            return taken;
        }
        let mut taken = Vec::new();
        while let Some(Some(_)) = self.done.get(&self.next) {
            if let Some(record) = self.done.remove(&self.next) {
                taken.push((self.next, record));
            }
            self.next += 1;
        }
        taken
    }

    fn restore(&mut self, taken: TakenRows) {
        if let Some((first, _)) = taken.first() {
            self.next = self.next.min(*first);
        }
        self.done.extend(taken);
    }
}

impl UploadOrchestrator {
    pub fn new(
        host: Arc<dyn ImageHost>,
        ledger: Arc<dyn ProgressLedger>,
        credentials: Arc<dyn CredentialProvider>,
        config: UploadConfig,
    ) -> Self {
        Self {
            host,
            ledger,
            credentials,
            config,
            pending: Mutex::new(PendingRows::default()),
            flush_lock: tokio::sync::Mutex::new(()),
            rows_written: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Discover images under `dir` and [`run`](Self::run) them.
    pub async fn upload_directory(
        &self,
        dir: impl AsRef<Path>,
        pool: ApiKeyPool,
    ) -> Result<UploadSummary, SquareshotError> {
        let dir = dir.as_ref().to_path_buf();
        let recursive = self.config.recursive;
        let files = tokio::task::spawn_blocking(move || discover::discover_images(&dir, recursive))
            .await
            .map_err(|e| SquareshotError::Internal(format!("discovery task failed: {e}")))??;
        self.run(&files, pool).await
    }

    /// Upload every file not yet covered by the ledger.
    ///
    /// `files` must be in the same order as on previous runs. When `pool`
    /// runs out, the credential provider is asked for a replacement; an
    /// error from it ends the run after buffered results are flushed.
    ///
    /// # Errors
    /// Ledger failures and credential exhaustion. Per-file upload failures
    /// are reported in [`UploadSummary::failed`].
    pub async fn run(
        &self,
        files: &[PathBuf],
        mut pool: ApiKeyPool,
    ) -> Result<UploadSummary, SquareshotError> {
        let start = Instant::now();
        let total = files.len();
        let resumed_from = self.ledger.completed_count()?.min(total);
        let remaining = &files[resumed_from..];
        let rows_before = self.rows_written.load(Ordering::SeqCst);
        self.lock_pending()?.reset(resumed_from);

        let mut summary = UploadSummary {
            discovered: total,
            resumed_from,
            attempted: remaining.len(),
            ..UploadSummary::default()
        };

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_start(total, resumed_from);
        }
        if resumed_from > 0 {
            info!(
                "Resuming: {} of {} files already recorded in the ledger",
                resumed_from, total
            );
        }
        if remaining.is_empty() {
            info!("Nothing left to upload");
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_run_complete(0, 0);
            }
            return Ok(summary);
        }

        let concurrency = self.config.concurrency.max(1);
        let semaphore = Semaphore::new(concurrency);
        let done = AtomicUsize::new(resumed_from);
        let chunks: Vec<&[PathBuf]> = remaining.chunks(self.config.images_per_key).collect();
        let mut key_index = 0usize;
        let mut chunk_start = resumed_from;

        for (chunk_no, chunk) in chunks.iter().enumerate() {
            if key_index >= pool.len() {
                let left = total - done.load(Ordering::SeqCst);
                pool = self.refill(&pool, left).await?;
                key_index = 0;
                summary.refills += 1;
            }
            let key = pool.get(key_index).unwrap_or_default().to_string();

            info!(
                "Key {}/{} ({}) takes files {}–{} of {}",
                key_index + 1,
                pool.len(),
                redact(&key),
                chunk_start + 1,
                chunk_start + chunk.len(),
                total
            );
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_key_start(key_index, chunk.len());
            }

            let batch_size = chunk.len().div_ceil(concurrency).max(1);
            let batches = chunk.chunks(batch_size).enumerate().map(|(n, batch)| {
                let first = chunk_start + n * batch_size;
                self.run_batch(batch, first, &key, &semaphore, &done, total)
            });
            let tasks: Vec<UploadTask> = join_all(batches).await.into_iter().flatten().collect();

            for task in tasks {
                match task.status {
                    UploadStatus::Success(_) => summary.uploaded += 1,
                    UploadStatus::Failed(error) => summary.failed.push(FailedUpload {
                        path: task.path,
                        attempts: task.attempts,
                        error,
                    }),
                    UploadStatus::Pending => {}
                }
            }

            // Every file of the chunk has finished, so nothing is left to wait for.
            self.flush(true).await?;
            summary.keys_used += 1;
            key_index += 1;
            chunk_start += chunk.len();

            let more = chunk_no + 1 < chunks.len();
            if more && self.config.pause_between_keys_secs > 0 {
                debug!(
                    "Pausing {}s before the next key",
                    self.config.pause_between_keys_secs
                );
                sleep(Duration::from_secs(self.config.pause_between_keys_secs)).await;
            }
        }

        summary.rows_written = self.rows_written.load(Ordering::SeqCst) - rows_before;
        summary.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Upload run finished: {} uploaded, {} failed, {} keys, {}ms",
            summary.uploaded,
            summary.failed.len(),
            summary.keys_used,
            summary.duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_complete(summary.uploaded, summary.failed.len());
        }
        Ok(summary)
    }

    /// Append the buffered rows that directly follow the ledger and return
    /// how many were written.
    ///
    /// Rows queued behind a file that has not finished stay buffered; they
    /// are lost if the process exits, and the next run uploads those files
    /// again. On failure the rows stay buffered so a later flush can retry.
    pub async fn flush_pending(&self) -> Result<usize, SquareshotError> {
        self.flush(false).await
    }

    /// Rows buffered but not yet written.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.buffered()).unwrap_or(0)
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn lock_pending(&self) -> Result<std::sync::MutexGuard<'_, PendingRows>, SquareshotError> {
        self.pending
            .lock()
            .map_err(|_| SquareshotError::Internal("pending buffer lock poisoned".into()))
    }

    async fn flush(&self, through_gaps: bool) -> Result<usize, SquareshotError> {
        let _order = self.flush_lock.lock().await;
        let taken = self.lock_pending()?.take(through_gaps);
        let rows: Vec<UploadRecord> = taken.iter().filter_map(|(_, r)| r.clone()).collect();
        if rows.is_empty() {
            return Ok(0);
        }

        let n = rows.len();
        let ledger = Arc::clone(&self.ledger);
        let appended = tokio::task::spawn_blocking(move || ledger.append(&rows))
            .await
            .map_err(|e| SquareshotError::Internal(format!("ledger task failed: {e}")))
            .and_then(|r| r);

        match appended {
            Ok(()) => {
                self.rows_written.fetch_add(n, Ordering::SeqCst);
                debug!("Flushed {} rows to the ledger", n);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_flush(n);
                }
                Ok(n)
            }
            Err(e) => {
                if let Ok(mut pending) = self.pending.lock() {
                    pending.restore(taken);
                }
                Err(e)
            }
        }
    }

    async fn refill(
        &self,
        exhausted: &ApiKeyPool,
        remaining_files: usize,
    ) -> Result<ApiKeyPool, SquareshotError> {
        warn!(
            "All {} API keys used; {} files remain. Requesting new keys.",
            exhausted.len(),
            remaining_files
        );
        self.flush_pending().await?;

        let pool = self.credentials.refill(exhausted, remaining_files).await?;
        if pool.is_empty() {
            return Err(SquareshotError::CredentialsExhausted {
                remaining: remaining_files,
                hint: "The replacement key list was empty.".into(),
            });
        }
        info!("Received {} replacement API keys", pool.len());
        Ok(pool)
    }

    /// Upload one sub-batch sequentially while holding a single permit.
    /// `first` is the listing index of `batch[0]`.
    async fn run_batch(
        &self,
        batch: &[PathBuf],
        first: usize,
        key: &str,
        semaphore: &Semaphore,
        done: &AtomicUsize,
        total: usize,
    ) -> Vec<UploadTask> {
        // The semaphore is local to the run and never closed.
        let _permit = semaphore.acquire().await.ok();
        let mut tasks = Vec::with_capacity(batch.len());

        for (offset, path) in batch.iter().enumerate() {
            let task = self.upload_with_retry(path, key).await;
            let position = done.fetch_add(1, Ordering::SeqCst) + 1;

            match &task.status {
                UploadStatus::Success(hosted) => {
                    info!("[{}/{}] {} → {}", position, total, path.display(), hosted.url);
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_upload_complete(path, &hosted.url, position, total);
                    }
                }
                UploadStatus::Failed(e) => {
                    error!(
                        "[{}/{}] Giving up on {} after {} attempts: {}",
                        position,
                        total,
                        path.display(),
                        task.attempts,
                        e
                    );
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_upload_failed(path, &e.to_string(), position, total);
                    }
                }
                UploadStatus::Pending => {}
            }

            let record = if task.is_success() || self.config.record_failures {
                task.to_record()
            } else {
                None
            };
            self.buffer(first + offset, record).await;
            tasks.push(task);
        }
        tasks
    }

    /// Queue a finished file and flush once `save_interval` rows are ready.
    async fn buffer(&self, index: usize, record: Option<UploadRecord>) {
        let should_flush = match self.pending.lock() {
            Ok(mut pending) => {
                pending.insert(index, record);
                pending.ready_len() >= self.config.save_interval
            }
            Err(_) => false,
        };
        if should_flush {
            if let Err(e) = self.flush_pending().await {
                warn!("Periodic ledger flush failed, keeping rows buffered: {}", e);
            }
        }
    }

    /// Try a file up to `retry_limit + 1` times, re-reading it each attempt.
    async fn upload_with_retry(&self, path: &Path, key: &str) -> UploadTask {
        let mut task = UploadTask::new(path.to_path_buf(), key);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let max_attempts = self.config.retry_limit + 1;
        let mut last_error = UploadError::Transport("no attempt made".into());

        for attempt in 0..max_attempts {
            if attempt > 0 && self.config.retry_backoff_ms > 0 {
                sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
            }
            task.attempts += 1;

            let result = match tokio::fs::read(path).await {
                Ok(bytes) => self.host.upload(&filename, bytes, key).await,
                Err(e) => Err(UploadError::Read(e.to_string())),
            };

            match result {
                Ok(hosted) => {
                    task.status = UploadStatus::Success(hosted);
                    return task;
                }
                Err(e) => {
                    warn!(
                        "{}: attempt {}/{} failed: {}",
                        path.display(),
                        attempt + 1,
                        max_attempts,
                        e
                    );
                    last_error = e;
                }
            }
        }

        task.status = UploadStatus::Failed(last_error);
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::HostedImage;
    use crate::upload::keys::NoRefill;
    use crate::upload::ledger::MemoryLedger;
    use async_trait::async_trait;

    struct AlwaysOk;

    #[async_trait]
    impl ImageHost for AlwaysOk {
        async fn upload(
            &self,
            filename: &str,
            _bytes: Vec<u8>,
            _api_key: &str,
        ) -> Result<HostedImage, UploadError> {
            Ok(HostedImage {
                url: format!("https://i.example/{filename}"),
                display_url: String::new(),
                delete_url: String::new(),
                status: 200,
            })
        }
    }

    fn files(dir: &Path, n: usize) -> Vec<PathBuf> {
        (0..n)
            .map(|i| {
                let p = dir.join(format!("{i:03}.png"));
                std::fs::write(&p, b"png").unwrap();
                p
            })
            .collect()
    }

    #[tokio::test]
    async fn missing_file_is_a_failed_task_not_a_crash() {
        let ledger = Arc::new(MemoryLedger::new());
        let orch = UploadOrchestrator::new(
            Arc::new(AlwaysOk),
            ledger.clone(),
            Arc::new(NoRefill),
            UploadConfig::builder().retry_limit(1).build().unwrap(),
        );
        let summary = orch
            .run(&[PathBuf::from("/no/such/file.png")], ApiKeyPool::new(["k"]))
            .await
            .unwrap();
        assert_eq!(summary.uploaded, 0);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].attempts, 2);
        assert!(matches!(summary.failed[0].error, UploadError::Read(_)));
        assert!(ledger.rows().is_empty());
    }

    #[tokio::test]
    async fn flush_is_a_no_op_when_nothing_is_buffered() {
        let orch = UploadOrchestrator::new(
            Arc::new(AlwaysOk),
            Arc::new(MemoryLedger::new()),
            Arc::new(NoRefill),
            UploadConfig::default(),
        );
        assert_eq!(orch.flush_pending().await.unwrap(), 0);
        assert_eq!(orch.pending_len(), 0);
    }

    #[tokio::test]
    async fn every_result_reaches_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let list = files(dir.path(), 23);
        let ledger = Arc::new(MemoryLedger::new());
        let orch = UploadOrchestrator::new(
            Arc::new(AlwaysOk),
            ledger.clone(),
            Arc::new(NoRefill),
            UploadConfig::builder()
                .concurrency(4)
                .save_interval(5)
                .build()
                .unwrap(),
        );
        let summary = orch.run(&list, ApiKeyPool::new(["k"])).await.unwrap();
        assert_eq!(summary.uploaded, 23);
        assert_eq!(summary.rows_written, 23);
        assert_eq!(ledger.rows().len(), 23);
        assert_eq!(orch.pending_len(), 0);
    }

    #[tokio::test]
    async fn rows_written_counts_only_the_current_run() {
        let dir = tempfile::tempdir().unwrap();
        let list = files(dir.path(), 5);
        let orch = UploadOrchestrator::new(
            Arc::new(AlwaysOk),
            Arc::new(MemoryLedger::new()),
            Arc::new(NoRefill),
            UploadConfig::default(),
        );
        let first = orch.run(&list[..3], ApiKeyPool::new(["k"])).await.unwrap();
        assert_eq!(first.rows_written, 3);
        let second = orch.run(&list, ApiKeyPool::new(["k"])).await.unwrap();
        assert_eq!(second.resumed_from, 3);
        assert_eq!(second.rows_written, 2);
    }

    fn row(name: &str) -> Option<UploadRecord> {
        Some(UploadRecord {
            filename: name.into(),
            url: String::new(),
            display_url: String::new(),
            delete_url: String::new(),
            status: "200".into(),
        })
    }

    fn indices(taken: &TakenRows) -> Vec<usize> {
        taken.iter().map(|(i, _)| *i).collect()
    }

    #[test]
    fn only_the_contiguous_prefix_is_taken() {
        let mut rows = PendingRows::default();
        rows.reset(10);
        rows.insert(10, row("a"));
        rows.insert(12, row("c"));
        assert_eq!(rows.ready_len(), 1);
        assert_eq!(indices(&rows.take(false)), vec![10]);
        assert_eq!(rows.next, 11);
        assert!(rows.take(false).is_empty());

        rows.insert(11, row("b"));
        assert_eq!(rows.ready_len(), 2);
        assert_eq!(indices(&rows.take(false)), vec![11, 12]);
        assert_eq!(rows.next, 13);
    }

    #[test]
    fn a_file_without_a_row_holds_back_later_rows_until_forced() {
        let mut rows = PendingRows::default();
        rows.insert(0, row("a"));
        rows.insert(1, None);
        rows.insert(2, row("c"));
        assert_eq!(indices(&rows.take(false)), vec![0]);
        assert_eq!(rows.buffered(), 1);

        let forced = rows.take(true);
        assert_eq!(indices(&forced), vec![1, 2]);
        assert_eq!(rows.next, 3);
        assert_eq!(rows.buffered(), 0);
    }

    #[test]
    fn restored_rows_are_taken_again() {
        let mut rows = PendingRows::default();
        rows.insert(0, row("a"));
        rows.insert(1, row("b"));
        let taken = rows.take(false);
        rows.insert(2, row("c"));
        rows.restore(taken);
        assert_eq!(rows.next, 0);
        assert_eq!(indices(&rows.take(false)), vec![0, 1, 2]);
    }
}
