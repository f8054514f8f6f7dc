//! Pipeline stages for product-photo normalisation.
//!
//! Each submodule implements exactly one transformation step, so every stage
//! can be tested on a synthetic image without touching the filesystem.
//!
//! ## Data Flow
//!
//! ```text
//! discover ──▶ decode ──▶ trim ──▶ canvas ──▶ encode
//!  (listing)   (image)   (bbox)   (rotate,    (WebP)
//!                                  square,
//!                                  resize)
//! ```
//!
//! 1. [`discover`] — list allow-listed image files in a stable order and
//!    decode their bytes
//! 2. [`trim`]     — crop near-white margins by a hard luma threshold
//! 3. [`canvas`]   — flatten alpha, tilt very elongated products by 45°,
//!    trim again, centre on a white square and resample to the final size
//! 4. [`encode`]   — lossy WebP for files, base64 for the HTTP endpoint
//!
//! All stages are synchronous and CPU-bound; callers run them inside
//! `spawn_blocking`.

pub mod canvas;
pub mod discover;
pub mod encode;
pub mod trim;
