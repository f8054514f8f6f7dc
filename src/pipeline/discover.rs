//! Input discovery: find the photos to work on and load them.
//!
//! Both commands start from a directory. The formatter only looks at the top
//! level (its output usually lands next to the inputs), while the uploader
//! walks recursively. Upload resumption counts completed rows and skips that
//! many leading files, so the listing must come back in the same order on
//! every run: entries are sorted by file name within each directory.

use crate::error::SquareshotError;
use image::{DynamicImage, ImageReader};
use jwalk::WalkDir;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions accepted as photos, compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "gif", "tiff", "webp", "heic", "avif",
];

/// Does this path carry an allow-listed image extension?
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// List image files under `dir` in a stable order.
///
/// With `recursive = false` only direct children are returned.
pub fn discover_images(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, SquareshotError> {
    if !dir.exists() {
        return Err(SquareshotError::InputDirNotFound {
            path: dir.to_path_buf(),
        });
    }
    if !dir.is_dir() {
        return Err(SquareshotError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let mut walker = WalkDir::new(dir).sort(true).skip_hidden(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| SquareshotError::DiscoveryFailed {
            path: dir.to_path_buf(),
            detail: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_image_path(&path) {
            files.push(path);
        } else {
            debug!("Skipping non-image file {}", path.display());
        }
    }

    info!(
        "Found {} image files in '{}'{}",
        files.len(),
        dir.display(),
        if recursive { " (recursive)" } else { "" }
    );
    Ok(files)
}

/// Decode image bytes, sniffing the format from content rather than name.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .decode()
}

/// Output file name for a formatted input: `<stem><suffix>.<extension>`.
pub fn formatted_file_name(input: &Path, suffix: &str, extension: &str) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    format!("{stem}{suffix}.{extension}")
}
