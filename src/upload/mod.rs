//! Resumable, key-rotating bulk uploads to an image host.
//!
//! ## Data Flow
//!
//! ```text
//! discover ──▶ ledger offset ──▶ orchestrator ──▶ host ──▶ ledger append
//! (listing)    (rows so far)     (keys, batches,  (HTTP)   (every N rows,
//!                                 retries)                  end of chunk)
//! ```
//!
//! 1. [`keys`]         — the [`ApiKeyPool`] value and the [`CredentialProvider`]
//!    asked for a new pool when it runs dry
//! 2. [`host`]         — the [`ImageHost`] seam and its imgbb implementation
//! 3. [`ledger`]       — append-only [`ProgressLedger`] whose row count is the
//!    resume offset
//! 4. [`orchestrator`] — ties the three together

pub mod host;
pub mod keys;
pub mod ledger;
pub mod orchestrator;

pub use host::{parse_upload_response, ImageHost, ImgbbClient};
pub use keys::{ApiKeyPool, CredentialProvider, NoRefill, ScriptedCredentials};
pub use ledger::{CsvLedger, MemoryLedger, ProgressLedger, LEDGER_HEADER};
pub use orchestrator::UploadOrchestrator;
