//! Configuration types for formatting, uploading and serving.
//!
//! Every knob lives in one of three structs built through a validating
//! builder: [`FormatConfig`] for the batch formatter, [`UploadConfig`] for the
//! upload orchestrator and [`ServerConfig`] for the HTTP endpoint. The
//! image-level knobs shared by all three entry points sit in
//! [`NormalizeOptions`].

use crate::error::SquareshotError;
use crate::progress::{FormatProgress, UploadProgress};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default luma above which a pixel counts as background.
pub const DEFAULT_THRESHOLD: u8 = 240;

/// Default edge length of the output canvas.
pub const DEFAULT_CANVAS_SIZE: u32 = 1200;

/// Default upload endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.imgbb.com/1/upload";

/// Image-level parameters of the normalisation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizeOptions {
    /// Output dimensions. Default: 1200 × 1200.
    pub final_size: (u32, u32),

    /// Luma above which a pixel is trimmed as background. Default: 240.
    pub threshold: u8,

    /// Lossy WebP quality, 0–100. Default: 80.
    pub webp_quality: f32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            final_size: (DEFAULT_CANVAS_SIZE, DEFAULT_CANVAS_SIZE),
            threshold: DEFAULT_THRESHOLD,
            webp_quality: 80.0,
        }
    }
}

impl NormalizeOptions {
    fn validate(&self) -> Result<(), SquareshotError> {
        let (w, h) = self.final_size;
        if w == 0 || h == 0 {
            return Err(SquareshotError::InvalidConfig(format!(
                "Canvas size must be non-zero, got {w}x{h}"
            )));
        }
        // libwebp refuses anything larger.
        if w > 16383 || h > 16383 {
            return Err(SquareshotError::InvalidConfig(format!(
                "Canvas size must be at most 16383 px per side, got {w}x{h}"
            )));
        }
        if !(0.0..=100.0).contains(&self.webp_quality) {
            return Err(SquareshotError::InvalidConfig(format!(
                "WebP quality must be 0–100, got {}",
                self.webp_quality
            )));
        }
        Ok(())
    }
}

// ── Formatter ────────────────────────────────────────────────────────────

/// Configuration for the batch image formatter.
///
/// Built via [`FormatConfig::builder()`] or [`FormatConfig::default()`].
///
/// # Example
/// ```rust
/// use squareshot::FormatConfig;
///
/// let config = FormatConfig::builder()
///     .workers(4)
///     .threshold(235)
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 4);
/// ```
#[derive(Clone)]
pub struct FormatConfig {
    /// Pipeline parameters applied to every file.
    pub normalize: NormalizeOptions,

    /// Number of files normalised in parallel. Default: available cores.
    ///
    /// Each worker holds one decoded photo plus its canvas in memory, which
    /// for a 6000 × 4000 camera original is well over 100 MB. Lower this on
    /// small machines.
    pub workers: usize,

    /// Appended to the input stem to build the output name. Default: `_formatted`.
    pub output_suffix: String,

    /// Receives per-file events. Default: none.
    pub progress_callback: Option<FormatProgress>,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            normalize: NormalizeOptions::default(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            output_suffix: "_formatted".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for FormatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatConfig")
            .field("normalize", &self.normalize)
            .field("workers", &self.workers)
            .field("output_suffix", &self.output_suffix)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn FormatProgressCallback>"),
            )
            .finish()
    }
}

impl FormatConfig {
    /// Create a new builder for `FormatConfig`.
    pub fn builder() -> FormatConfigBuilder {
        FormatConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`FormatConfig`].
pub struct FormatConfigBuilder {
    config: FormatConfig,
}

impl FormatConfigBuilder {
    pub fn normalize(mut self, options: NormalizeOptions) -> Self {
        self.config.normalize = options;
        self
    }

    pub fn final_size(mut self, width: u32, height: u32) -> Self {
        self.config.normalize.final_size = (width, height);
        self
    }

    pub fn threshold(mut self, threshold: u8) -> Self {
        self.config.normalize.threshold = threshold;
        self
    }

    pub fn webp_quality(mut self, quality: f32) -> Self {
        self.config.normalize.webp_quality = quality;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn output_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.output_suffix = suffix.into();
        self
    }

    pub fn progress_callback(mut self, cb: FormatProgress) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FormatConfig, SquareshotError> {
        self.config.normalize.validate()?;
        if self.config.output_suffix.contains(std::path::is_separator) {
            return Err(SquareshotError::InvalidConfig(format!(
                "Output suffix must not contain path separators, got '{}'",
                self.config.output_suffix
            )));
        }
        Ok(self.config)
    }
}

// ── Uploader ─────────────────────────────────────────────────────────────

/// Configuration for the upload orchestrator.
///
/// # Example
/// ```rust
/// use squareshot::UploadConfig;
///
/// let config = UploadConfig::builder()
///     .concurrency(4)
///     .images_per_key(200)
///     .build()
///     .unwrap();
/// assert_eq!(config.retry_limit, 3);
/// ```
#[derive(Clone)]
pub struct UploadConfig {
    /// Number of sub-batches allowed in flight at once. Default: 10.
    ///
    /// The semaphore is held for a whole sub-batch, so this bounds concurrent
    /// batches; each batch uploads its files one after another.
    pub concurrency: usize,

    /// Extra attempts after the first failure. Default: 3 (four tries total).
    pub retry_limit: u32,

    /// Files uploaded with one API key before rotating to the next. Default: 500.
    pub images_per_key: usize,

    /// Successful results buffered before they are appended to the ledger. Default: 50.
    ///
    /// A crash loses at most this many rows; those files are simply uploaded
    /// again on the next run.
    pub save_interval: usize,

    /// Lifetime of the hosted image in seconds. Default: 86 400 (one day).
    pub expiration_secs: u64,

    /// Upload endpoint URL. Default: the imgbb v1 upload API.
    pub endpoint: String,

    /// Delay before each retry in milliseconds. Default: 0 (immediate).
    pub retry_backoff_ms: u64,

    /// Sleep between API-key chunks in seconds. Default: 0.
    pub pause_between_keys_secs: u64,

    /// Per-request timeout. Default: none (transport defaults).
    pub request_timeout_secs: Option<u64>,

    /// Walk the upload directory recursively. Default: true.
    pub recursive: bool,

    /// Write a `failed` ledger row when a file exhausts its retries. Default: false.
    ///
    /// Off by default: a failed file gets no row. Rows are always appended
    /// in listing order, but a missing row still shifts the resume offset
    /// by one once the rest of its key chunk is written. With this on,
    /// every finished file has a row and the ledger always covers exactly
    /// the leading files of the listing.
    pub record_failures: bool,

    /// Receives per-upload events. Default: none.
    pub progress_callback: Option<UploadProgress>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            retry_limit: 3,
            images_per_key: 500,
            save_interval: 50,
            expiration_secs: 86_400,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            retry_backoff_ms: 0,
            pause_between_keys_secs: 0,
            request_timeout_secs: None,
            recursive: true,
            record_failures: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("concurrency", &self.concurrency)
            .field("retry_limit", &self.retry_limit)
            .field("images_per_key", &self.images_per_key)
            .field("save_interval", &self.save_interval)
            .field("expiration_secs", &self.expiration_secs)
            .field("endpoint", &self.endpoint)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("pause_between_keys_secs", &self.pause_between_keys_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("recursive", &self.recursive)
            .field("record_failures", &self.record_failures)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn UploadProgressCallback>"),
            )
            .finish()
    }
}

impl UploadConfig {
    /// Create a new builder for `UploadConfig`.
    pub fn builder() -> UploadConfigBuilder {
        UploadConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`UploadConfig`].
pub struct UploadConfigBuilder {
    config: UploadConfig,
}

impl UploadConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn retry_limit(mut self, n: u32) -> Self {
        self.config.retry_limit = n;
        self
    }

    pub fn images_per_key(mut self, n: usize) -> Self {
        self.config.images_per_key = n;
        self
    }

    pub fn save_interval(mut self, n: usize) -> Self {
        self.config.save_interval = n;
        self
    }

    pub fn expiration_secs(mut self, secs: u64) -> Self {
        self.config.expiration_secs = secs;
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn pause_between_keys_secs(mut self, secs: u64) -> Self {
        self.config.pause_between_keys_secs = secs;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    pub fn recursive(mut self, v: bool) -> Self {
        self.config.recursive = v;
        self
    }

    pub fn record_failures(mut self, v: bool) -> Self {
        self.config.record_failures = v;
        self
    }

    pub fn progress_callback(mut self, cb: UploadProgress) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<UploadConfig, SquareshotError> {
        let c = &self.config;
        if c.images_per_key == 0 {
            return Err(SquareshotError::InvalidConfig(
                "Images per key must be ≥ 1".into(),
            ));
        }
        if c.save_interval == 0 {
            return Err(SquareshotError::InvalidConfig(
                "Save interval must be ≥ 1".into(),
            ));
        }
        if !(c.endpoint.starts_with("http://") || c.endpoint.starts_with("https://")) {
            return Err(SquareshotError::InvalidConfig(format!(
                "Endpoint must be an HTTP/HTTPS URL, got '{}'",
                c.endpoint
            )));
        }
        Ok(self.config)
    }
}

// ── Server ───────────────────────────────────────────────────────────────

/// Configuration for the normalisation HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on. Default: `0.0.0.0:8000`.
    pub bind: String,

    /// Largest accepted request body in bytes. Default: 32 MiB.
    ///
    /// Base64 inflates by a third, so this admits camera originals of
    /// roughly 24 MB.
    pub max_body_bytes: usize,

    /// Canvas size and WebP quality for every response. The per-request
    /// `threshold` overrides `normalize.threshold`.
    pub normalize: NormalizeOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            max_body_bytes: 32 * 1024 * 1024,
            normalize: NormalizeOptions::default(),
        }
    }
}
