//! Output encoding: normalised `RgbImage` → lossy WebP bytes.
//!
//! Catalogue platforms re-compress whatever they receive, so the canvas is
//! shipped as lossy WebP at quality 80 by default: a 1200 × 1200 product shot
//! lands around 40–120 KB instead of the 4 MB of a raw PNG. `image`'s own
//! WebP encoder only writes lossless streams, hence libwebp via `webp`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbImage;
use tracing::debug;

/// File extension written by the formatter.
pub const OUTPUT_EXTENSION: &str = "webp";

/// Encode an RGB canvas as lossy WebP at `quality` (0–100).
pub fn encode_webp(img: &RgbImage, quality: f32) -> Result<Vec<u8>, String> {
    let (w, h) = img.dimensions();
    let encoder = webp::Encoder::from_rgb(img.as_raw(), w, h);
    let memory = encoder
        .encode_simple(false, quality.clamp(0.0, 100.0))
        .map_err(|e| format!("libwebp: {e:?}"))?;

    let bytes = memory.to_vec();
    debug!("Encoded {}x{} canvas → {} bytes WebP", w, h, bytes.len());
    Ok(bytes)
}

/// Wrap encoded bytes for a JSON response body.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 request payload.
///
/// Surrounding whitespace and a `data:image/...;base64,` prefix are
/// tolerated since browsers and low-code tools tend to send both.
pub fn from_base64(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = payload.trim();
    let data = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };
    STANDARD.decode(data)
}
