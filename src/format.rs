//! Eager (whole-directory) formatting entry points.
//!
//! [`format_directory`] waits for every file and returns a
//! [`FormatSummary`]. Use [`crate::stream::format_stream`] instead to handle
//! each file as soon as its worker finishes.
//!
//! The per-file work (read, decode, normalise, encode, write) is synchronous
//! and CPU-bound. It always runs on a `spawn_blocking` thread so the async
//! runtime stays free to schedule the next file.

use crate::config::{FormatConfig, NormalizeOptions};
use crate::error::{FileError, SquareshotError};
use crate::output::{FileResult, FormatSummary, FormattedFile};
use crate::pipeline::{canvas, discover, encode};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Normalise every image directly inside `input_dir` into `output_dir`.
///
/// The walk is not recursive. Each file becomes
/// `<stem><output_suffix>.webp`; existing outputs are overwritten, so
/// re-running a batch is idempotent. `output_dir` is created if missing.
/// When it is the input directory, files whose stem already ends with the
/// suffix are earlier outputs and are skipped.
///
/// # Returns
/// `Ok(FormatSummary)` even if some files failed (check `failures`).
///
/// # Errors
/// Only fatal conditions: missing input directory, or an output directory
/// that cannot be created.
pub async fn format_directory(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &FormatConfig,
) -> Result<FormatSummary, SquareshotError> {
    let start = Instant::now();
    let input_dir = input_dir.as_ref();
    let output_dir = output_dir.as_ref();
    info!(
        "Formatting '{}' → '{}' with {} workers",
        input_dir.display(),
        output_dir.display(),
        config.workers
    );

    let files = prepare(input_dir, output_dir, &config.output_suffix).await?;
    let total = files.len();

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let mut stream = crate::stream::stream_files(files, output_dir.to_path_buf(), config);
    let mut summary = FormatSummary {
        total,
        ..FormatSummary::default()
    };

    let mut done = 0usize;
    while let Some(result) = stream.next().await {
        done += 1;
        match result {
            Ok(file) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_file_complete(&file.input, &file.output, done, total);
                }
                summary.outputs.push(file);
            }
            Err(e) => {
                warn!("{}", e);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_file_error(e.path(), &e.to_string(), done, total);
                }
                summary.failures.push(e);
            }
        }
    }

    // Workers finish in any order; report in listing order.
    summary.outputs.sort_by(|a, b| a.input.cmp(&b.input));
    summary.failures.sort_by(|a, b| a.path().cmp(b.path()));
    summary.duration_ms = start.elapsed().as_millis() as u64;

    info!(
        "Formatted {}/{} files ({} failed) in {}ms",
        summary.succeeded(),
        total,
        summary.failed(),
        summary.duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, summary.succeeded());
    }

    Ok(summary)
}

/// Synchronous wrapper around [`format_directory`].
///
/// Creates a temporary tokio runtime internally.
pub fn format_sync(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &FormatConfig,
) -> Result<FormatSummary, SquareshotError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| SquareshotError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(format_directory(input_dir, output_dir, config))
}

/// Normalise a single file into `output_dir`.
pub async fn format_file(
    input: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &FormatConfig,
) -> Result<FormattedFile, FileError> {
    let output_dir = output_dir.as_ref();
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| FileError::WriteFailed {
            path: input.as_ref().to_path_buf(),
            detail: format!("cannot create '{}': {}", output_dir.display(), e),
        })?;
    format_in_worker(
        input.as_ref().to_path_buf(),
        output_dir.to_path_buf(),
        config.output_suffix.clone(),
        config.normalize,
    )
    .await
}

/// Normalise in-memory image bytes and return the encoded WebP.
///
/// The format is sniffed from the content. This is CPU-bound; call it from
/// `spawn_blocking` inside async code.
pub fn format_bytes(bytes: &[u8], options: &NormalizeOptions) -> Result<Vec<u8>, SquareshotError> {
    let image =
        discover::decode_image(bytes).map_err(|e| SquareshotError::InvalidImage(e.to_string()))?;
    let canvas = canvas::normalize(&image, options);
    encode::encode_webp(&canvas, options.webp_quality).map_err(SquareshotError::EncodeFailed)
}

/// Base64 in, base64 WebP out; the contract of the HTTP endpoint.
pub fn format_base64(payload: &str, options: &NormalizeOptions) -> Result<String, SquareshotError> {
    let bytes =
        encode::from_base64(payload).map_err(|e| SquareshotError::InvalidBase64(e.to_string()))?;
    let webp = format_bytes(&bytes, options)?;
    Ok(encode::to_base64(&webp))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Discover the flat listing and make sure the output directory exists.
///
/// Writing next to the inputs leaves earlier outputs in the listing; those
/// are dropped so a rerun does not format them again.
pub(crate) async fn prepare(
    input_dir: &Path,
    output_dir: &Path,
    suffix: &str,
) -> Result<Vec<PathBuf>, SquareshotError> {
    let dir = input_dir.to_path_buf();
    let mut files = tokio::task::spawn_blocking(move || discover::discover_images(&dir, false))
        .await
        .map_err(|e| SquareshotError::Internal(format!("discovery task failed: {e}")))??;

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| SquareshotError::OutputDirFailed {
            path: output_dir.to_path_buf(),
            source: e,
        })?;

    if !suffix.is_empty() && same_directory(input_dir, output_dir).await {
        let before = files.len();
        files.retain(|p| !is_formatted_output(p, suffix));
        if files.len() < before {
            debug!(
                "Skipping {} earlier outputs in '{}'",
                before - files.len(),
                input_dir.display()
            );
        }
    }
    Ok(files)
}

async fn same_directory(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn is_formatted_output(path: &Path, suffix: &str) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem.ends_with(suffix))
}

/// Run [`format_one`] on the blocking pool, turning a panic into a per-file error.
pub(crate) async fn format_in_worker(
    input: PathBuf,
    output_dir: PathBuf,
    suffix: String,
    options: NormalizeOptions,
) -> FileResult {
    let path = input.clone();
    match tokio::task::spawn_blocking(move || format_one(&input, &output_dir, &suffix, &options))
        .await
    {
        Ok(result) => result,
        Err(e) => Err(FileError::WorkerPanicked {
            path,
            detail: e.to_string(),
        }),
    }
}

/// Read, normalise, encode and atomically write one file.
fn format_one(
    input: &Path,
    output_dir: &Path,
    suffix: &str,
    options: &NormalizeOptions,
) -> FileResult {
    let bytes = std::fs::read(input).map_err(|e| FileError::ReadFailed {
        path: input.to_path_buf(),
        detail: e.to_string(),
    })?;

    let image = discover::decode_image(&bytes).map_err(|e| FileError::DecodeFailed {
        path: input.to_path_buf(),
        detail: e.to_string(),
    })?;
    debug!(
        "Decoded {} ({}x{}, {:?})",
        input.display(),
        image.width(),
        image.height(),
        image.color()
    );

    let canvas = canvas::normalize(&image, options);
    let webp = encode::encode_webp(&canvas, options.webp_quality).map_err(|detail| {
        FileError::EncodeFailed {
            path: input.to_path_buf(),
            detail,
        }
    })?;

    let name = discover::formatted_file_name(input, suffix, encode::OUTPUT_EXTENSION);
    let output = output_dir.join(name);
    write_atomic(&output, &webp).map_err(|e| FileError::WriteFailed {
        path: input.to_path_buf(),
        detail: format!("'{}': {}", output.display(), e),
    })?;

    debug!("Wrote {} ({} bytes)", output.display(), webp.len());
    Ok(FormattedFile {
        input: input.to_path_buf(),
        output,
        bytes: webp.len(),
    })
}

/// Write to a temp file in the destination directory, then rename over the target.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn small_options() -> NormalizeOptions {
        NormalizeOptions {
            final_size: (64, 64),
            ..NormalizeOptions::default()
        }
    }

    #[test]
    fn format_bytes_produces_square_webp() {
        let mut img = RgbImage::from_pixel(80, 40, Rgb([255, 255, 255]));
        for y in 10..30 {
            for x in 10..60 {
                img.put_pixel(x, y, Rgb([20, 90, 200]));
            }
        }
        let out = format_bytes(&png_bytes(&img), &small_options()).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn format_bytes_rejects_garbage() {
        let err = format_bytes(b"nope", &small_options()).unwrap_err();
        assert!(matches!(err, SquareshotError::InvalidImage(_)));
    }

    #[test]
    fn format_base64_rejects_bad_payload() {
        let err = format_base64("***", &small_options()).unwrap_err();
        assert!(matches!(err, SquareshotError::InvalidBase64(_)));
    }

    #[test]
    fn format_base64_round_trip() {
        let img = RgbImage::from_pixel(30, 30, Rgb([10, 10, 10]));
        let payload = encode::to_base64(&png_bytes(&img));
        let out = format_base64(&payload, &small_options()).unwrap();
        let webp = encode::from_base64(&out).unwrap();
        assert_eq!(&webp[8..12], b"WEBP");
    }

    #[test]
    fn write_atomic_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x.webp");
        std::fs::write(&target, b"old").unwrap();
        write_atomic(&target, b"new").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        // No stray temp files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn format_file_writes_named_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("Pump 3.PNG");
        let img = RgbImage::from_pixel(20, 50, Rgb([60, 60, 60]));
        std::fs::write(&input, png_bytes(&img)).unwrap();

        let config = FormatConfig::builder().final_size(32, 32).build().unwrap();
        let out_dir = dir.path().join("out");
        let result = format_file(&input, &out_dir, &config).await.unwrap();
        assert_eq!(result.output, out_dir.join("Pump 3_formatted.webp"));
        assert!(result.output.exists());
    }

    #[tokio::test]
    async fn format_file_reports_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.jpg");
        std::fs::write(&input, b"\xFF\xD8 truncated").unwrap();

        let err = format_file(&input, dir.path(), &FormatConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::DecodeFailed { .. }));
        assert_eq!(err.path(), input.as_path());
    }

    #[tokio::test]
    async fn unwritable_target_is_a_per_file_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("chair.png");
        std::fs::write(&input, png_bytes(&RgbImage::from_pixel(20, 20, Rgb([9, 9, 9])))).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir_all(out_dir.join("chair_formatted.webp")).unwrap();

        let config = FormatConfig::builder().final_size(16, 16).build().unwrap();
        let err = format_file(&input, &out_dir, &config).await.unwrap_err();
        assert!(matches!(err, FileError::WriteFailed { .. }), "got {err:?}");
        assert_eq!(err.path(), input.as_path());
    }

    #[test]
    fn earlier_outputs_are_recognised_by_stem_suffix() {
        assert!(is_formatted_output(Path::new("/p/a_formatted.webp"), "_formatted"));
        assert!(!is_formatted_output(Path::new("/p/a.png"), "_formatted"));
        assert!(!is_formatted_output(Path::new("/p/formatted_a.png"), "_formatted"));
    }

    #[tokio::test]
    async fn prepare_skips_earlier_outputs_only_in_place() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "a_formatted.webp"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let in_place = prepare(dir.path(), dir.path(), "_formatted").await.unwrap();
        assert_eq!(in_place, vec![dir.path().join("a.png")]);

        let elsewhere = prepare(dir.path(), &dir.path().join("out"), "_formatted")
            .await
            .unwrap();
        assert_eq!(elsewhere.len(), 2);
    }
}
