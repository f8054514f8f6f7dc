//! # squareshot
//!
//! Turn messy product photos into uniform square catalogue images, and bulk
//! upload them to an image host.
//!
//! ## Why this crate?
//!
//! Marketplace listings want every product on the same white square, but
//! supplier photos arrive with uneven margins, odd aspect ratios and
//! transparent backgrounds. This crate trims the background, tilts very
//! elongated products so they fill the frame better, centres the result on a
//! white square and writes a compact WebP. A second tool pushes the results
//! to an image host across a rotating pool of API keys, and can pick up where
//! a crashed run left off.
//!
//! ## Pipeline Overview
//!
//! ```text
//! photo
//!  │
//!  ├─ 1. Decode    sniff format, any of jpg/png/bmp/gif/tiff/webp
//!  ├─ 2. Flatten   alpha over white → RGB
//!  ├─ 3. Trim      crop pixels with luma > threshold (default 240)
//!  ├─ 4. Tilt      aspect > 2 → −45°, < 0.5 → +45°, then trim again
//!  ├─ 5. Square    centre on a white square
//!  ├─ 6. Resample  Lanczos3 to 1200 × 1200
//!  └─ 7. Encode    lossy WebP, quality 80
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use squareshot::{format_directory, FormatConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FormatConfig::builder().workers(4).build()?;
//!     let summary = format_directory("photos", "photos/formatted", &config).await?;
//!     eprintln!("{}/{} formatted", summary.succeeded(), summary.total);
//!     for failure in &summary.failures {
//!         eprintln!("  {failure}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Uploading:
//!
//! ```rust,no_run
//! use squareshot::{ApiKeyPool, CsvLedger, ImgbbClient, NoRefill, UploadConfig, UploadOrchestrator};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = UploadConfig::default();
//! let orchestrator = UploadOrchestrator::new(
//!     Arc::new(ImgbbClient::new(&config)?),
//!     Arc::new(CsvLedger::new("upload_progress.csv")),
//!     Arc::new(NoRefill),
//!     config,
//! );
//! let summary = orchestrator
//!     .upload_directory("photos/formatted", ApiKeyPool::new(["key-1", "key-2"]))
//!     .await?;
//! eprintln!("{} uploaded, {} failed", summary.uploaded, summary.failed.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `squareshot` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | Enables [`server`], the `POST /format_image` endpoint (axum) |
//!
//! Disable both when using only the library:
//! ```toml
//! squareshot = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod format;
pub mod output;
pub mod pipeline;
pub mod progress;
#[cfg(feature = "server")]
pub mod server;
pub mod stream;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    FormatConfig, FormatConfigBuilder, NormalizeOptions, ServerConfig, UploadConfig,
    UploadConfigBuilder,
};
pub use error::{FileError, SquareshotError, UploadError};
pub use format::{format_base64, format_bytes, format_directory, format_file, format_sync};
pub use output::{
    FailedUpload, FormatSummary, FormattedFile, HostedImage, UploadRecord, UploadStatus,
    UploadSummary, UploadTask,
};
pub use pipeline::canvas::normalize;
pub use pipeline::trim::{find_content_bbox, trim, BoundingBox};
pub use progress::{
    FormatProgressCallback, NoopProgressCallback, UploadProgressCallback,
};
pub use stream::format_stream;
pub use upload::{
    ApiKeyPool, CredentialProvider, CsvLedger, ImageHost, ImgbbClient, MemoryLedger, NoRefill,
    ProgressLedger, ScriptedCredentials, UploadOrchestrator,
};
