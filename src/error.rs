//! Error types for the squareshot library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`SquareshotError`] — **Fatal**: the run cannot proceed at all
//!   (input directory missing, ledger unwritable, no credentials left).
//!   Returned as `Err(SquareshotError)` from the top-level entry points.
//!
//! * [`FileError`] — **Non-fatal**: one photo could not be normalised
//!   (corrupt file, unsupported codec) but every other photo is fine.
//!   Stored inside [`crate::output::FormatSummary`] so a batch of thousands
//!   is never lost to one bad JPEG.
//!
//! * [`UploadError`] — **Non-fatal**: one upload attempt failed. Every
//!   variant is retried by the orchestrator; the last one is kept on the
//!   [`crate::output::UploadTask`] once the retry budget is spent.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the squareshot library.
///
/// Per-file failures use [`FileError`] / [`UploadError`] and are collected
/// into the run summaries rather than propagated here.
#[derive(Debug, Error)]
pub enum SquareshotError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input directory was not found at the given path.
    #[error("Input directory not found: '{path}'\nCheck the path exists and is readable.")]
    InputDirNotFound { path: PathBuf },

    /// Input path exists but is a regular file.
    #[error("Input path is not a directory: '{path}'")]
    NotADirectory { path: PathBuf },

    /// The directory walk itself failed (permissions, vanished mount).
    #[error("Failed to list '{path}': {detail}")]
    DiscoveryFailed { path: PathBuf, detail: String },

    /// In-memory image data could not be decoded.
    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    /// Base64 payload could not be decoded.
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    /// The normalised canvas could not be encoded.
    #[error("Failed to encode output image: {0}")]
    EncodeFailed(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create the output directory.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Ledger errors ─────────────────────────────────────────────────────
    /// The progress ledger exists but cannot be read; resuming would be unsafe.
    #[error("Failed to read progress ledger '{path}': {detail}")]
    LedgerRead { path: PathBuf, detail: String },

    /// Results could not be appended to the progress ledger.
    #[error("Failed to append to progress ledger '{path}': {detail}")]
    LedgerWrite { path: PathBuf, detail: String },

    // ── Credential errors ─────────────────────────────────────────────────
    /// Every key was used and no replacement credentials were supplied.
    #[error("API key pool exhausted with {remaining} files left to upload.\n{hint}")]
    CredentialsExhausted { remaining: usize, hint: String },

    /// The operator declined to confirm the replacement keys.
    #[error("Replacement API keys were not confirmed; stopping the upload run")]
    CredentialsRejected,

    // ── Server errors ─────────────────────────────────────────────────────
    /// The HTTP endpoint could not bind or stopped with an I/O error.
    #[error("HTTP server on '{bind}' failed: {source}")]
    ServerFailed {
        bind: String,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single file in a formatting batch.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum FileError {
    /// The file could not be read from disk.
    #[error("{path}: read failed: {detail}")]
    ReadFailed { path: PathBuf, detail: String },

    /// The bytes are not an image we can decode.
    #[error("{path}: decode failed: {detail}")]
    DecodeFailed { path: PathBuf, detail: String },

    /// Encoding the normalised canvas failed.
    #[error("{path}: encode failed: {detail}")]
    EncodeFailed { path: PathBuf, detail: String },

    /// The formatted file could not be written.
    #[error("{path}: write failed: {detail}")]
    WriteFailed { path: PathBuf, detail: String },

    /// The worker thread panicked while processing this file.
    #[error("{path}: worker panicked: {detail}")]
    WorkerPanicked { path: PathBuf, detail: String },
}

impl FileError {
    /// The input file this error belongs to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            FileError::ReadFailed { path, .. }
            | FileError::DecodeFailed { path, .. }
            | FileError::EncodeFailed { path, .. }
            | FileError::WriteFailed { path, .. }
            | FileError::WorkerPanicked { path, .. } => path,
        }
    }
}

/// A single failed upload attempt.
///
/// A 2xx status alone is not success: the body must also carry
/// `success: true` and a complete `data` block, otherwise the attempt maps
/// to [`UploadError::ApiFailure`] or [`UploadError::Malformed`].
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum UploadError {
    /// The local file could not be read.
    #[error("could not read file: {0}")]
    Read(String),

    /// Connection, TLS or body-transfer failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The host answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Well-formed response with `success: false`.
    #[error("host rejected upload (status {status}): {message}")]
    ApiFailure { status: u16, message: String },

    /// Non-JSON body or missing `data` fields.
    #[error("malformed response: {0}")]
    Malformed(String),
}
