//! Streaming formatting API: emit files as their workers finish.
//!
//! Unlike the eager [`crate::format::format_directory`], which returns only
//! after the whole batch, [`format_stream`] yields one [`FileResult`] per
//! file as soon as it is written. Results arrive in completion order, not
//! listing order; sort by `input` if order matters.
//!
//! Progress callbacks configured on the [`FormatConfig`] are not fired here;
//! the consumer of the stream sees every event directly.

use crate::config::FormatConfig;
use crate::error::SquareshotError;
use crate::format::{format_in_worker, prepare};
use crate::output::FileResult;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-file results.
pub type FileStream = Pin<Box<dyn Stream<Item = FileResult> + Send>>;

/// Format a directory, streaming each file's result as it completes.
///
/// Discovery and output-directory creation happen before this returns, so
/// fatal errors surface here and the stream itself only carries per-file
/// outcomes.
///
/// # Example
/// ```rust,no_run
/// use squareshot::{format_stream, FormatConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut files = format_stream("photos", "photos/out", &FormatConfig::default()).await?;
/// while let Some(result) = files.next().await {
///     match result {
///         Ok(f) => println!("{} → {}", f.input.display(), f.output.display()),
///         Err(e) => eprintln!("{e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn format_stream(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &FormatConfig,
) -> Result<FileStream, SquareshotError> {
    let input_dir = input_dir.as_ref();
    let output_dir = output_dir.as_ref();
    info!("Starting streaming format: {}", input_dir.display());

    let files = prepare(input_dir, output_dir, &config.output_suffix).await?;
    Ok(stream_files(files, output_dir.to_path_buf(), config))
}

/// Normalise `files` into `output_dir`, at most `config.workers` at a time.
pub(crate) fn stream_files(
    files: Vec<PathBuf>,
    output_dir: PathBuf,
    config: &FormatConfig,
) -> FileStream {
    let options = config.normalize;
    let suffix = config.output_suffix.clone();
    let s = stream::iter(files.into_iter().map(move |input| {
        format_in_worker(input, output_dir.clone(), suffix.clone(), options)
    }))
    .buffer_unordered(config.workers.max(1));
    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[tokio::test]
    async fn stream_yields_one_result_per_file() {
        let dir = tempfile::tempdir().unwrap();
        for (i, name) in ["a.png", "b.png", "c.png"].iter().enumerate() {
            let img = RgbImage::from_pixel(10 + i as u32, 12, Rgb([30, 30, 30]));
            img.save(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("d.jpg"), b"corrupt").unwrap();

        let config = FormatConfig::builder()
            .final_size(16, 16)
            .workers(2)
            .build()
            .unwrap();
        let out = dir.path().join("out");
        let results: Vec<FileResult> = format_stream(dir.path(), &out, &config)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(results.len(), 4);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    }

    #[tokio::test]
    async fn missing_input_is_fatal_before_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let result = format_stream(dir.path().join("nope"), dir.path(), &FormatConfig::default()).await;
        assert!(matches!(result, Err(SquareshotError::InputDirNotFound { .. })));
    }
}
