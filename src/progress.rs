//! Progress-callback traits for formatting and upload events.
//!
//! Inject an [`Arc<dyn FormatProgressCallback>`] via
//! [`crate::config::FormatConfigBuilder::progress_callback`] (or the upload
//! equivalent) to receive events as files are processed. The library never
//! draws anything itself; the CLI forwards these events to `indicatif` bars.
//!
//! # Example
//!
//! ```rust
//! use squareshot::{FormatConfig, FormatProgressCallback};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl FormatProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, _input: &Path, _output: &Path, done: usize, total: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{done}/{total}");
//!     }
//! }
//!
//! let config = FormatConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the batch formatter as each file finishes.
///
/// Files are processed concurrently, so `on_file_complete` and
/// `on_file_error` may be called from different tasks at once. `done` is the
/// number of files finished so far (successes plus failures), counted at the
/// moment of the call.
pub trait FormatProgressCallback: Send + Sync {
    /// Called once before any file is decoded.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file has been written.
    fn on_file_complete(&self, input: &Path, output: &Path, done: usize, total: usize) {
        let _ = (input, output, done, total);
    }

    /// Called when a file could not be read, decoded, encoded or written.
    fn on_file_error(&self, input: &Path, error: &str, done: usize, total: usize) {
        let _ = (input, error, done, total);
    }

    /// Called once after every file has been attempted.
    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let _ = (total_files, success_count);
    }
}

/// Called by the upload orchestrator.
///
/// Position arguments (`done`, `total`) are absolute over the whole
/// discovered listing, so a resumed run starts counting at the resume offset.
pub trait UploadProgressCallback: Send + Sync {
    /// Called once after the resume offset is known.
    fn on_run_start(&self, total_files: usize, resumed_from: usize) {
        let _ = (total_files, resumed_from);
    }

    /// Called when a new API key starts serving a chunk. `key_index` is 0-based.
    fn on_key_start(&self, key_index: usize, chunk_len: usize) {
        let _ = (key_index, chunk_len);
    }

    /// Called after a file was accepted by the host.
    fn on_upload_complete(&self, path: &Path, url: &str, done: usize, total: usize) {
        let _ = (path, url, done, total);
    }

    /// Called after a file failed on every attempt.
    fn on_upload_failed(&self, path: &Path, error: &str, done: usize, total: usize) {
        let _ = (path, error, done, total);
    }

    /// Called after buffered rows were appended to the ledger.
    fn on_flush(&self, rows: usize) {
        let _ = rows;
    }

    /// Called once when the run ends normally.
    fn on_run_complete(&self, uploaded: usize, failed: usize) {
        let _ = (uploaded, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl FormatProgressCallback for NoopProgressCallback {}
impl UploadProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::FormatConfig`].
pub type FormatProgress = Arc<dyn FormatProgressCallback>;

/// Type stored in [`crate::config::UploadConfig`].
pub type UploadProgress = Arc<dyn UploadProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        completes: AtomicUsize,
        errors: AtomicUsize,
        flushed: AtomicUsize,
    }

    impl FormatProgressCallback for Tracking {
        fn on_file_complete(&self, _input: &Path, _output: &Path, _done: usize, _total: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_error(&self, _input: &Path, _error: &str, _done: usize, _total: usize) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl UploadProgressCallback for Tracking {
        fn on_flush(&self, rows: usize) {
            self.flushed.fetch_add(rows, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        FormatProgressCallback::on_batch_start(&cb, 3);
        cb.on_file_complete(Path::new("a.png"), Path::new("a_formatted.webp"), 1, 3);
        cb.on_file_error(Path::new("b.png"), "corrupt", 2, 3);
        cb.on_batch_complete(3, 1);
        cb.on_run_start(10, 4);
        cb.on_key_start(0, 6);
        cb.on_upload_complete(Path::new("c.png"), "https://i.example/c", 5, 10);
        cb.on_upload_failed(Path::new("d.png"), "timeout", 6, 10);
        cb.on_flush(2);
        cb.on_run_complete(1, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = Arc::new(Tracking::default());
        let fmt: FormatProgress = tracker.clone();
        let up: UploadProgress = tracker.clone();

        fmt.on_file_complete(Path::new("a"), Path::new("b"), 1, 2);
        fmt.on_file_error(Path::new("c"), "bad", 2, 2);
        up.on_flush(7);
        up.on_flush(3);

        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.flushed.load(Ordering::SeqCst), 10);
    }
}
