//! Border trimming: crop away near-white margins around the product.
//!
//! The test is a hard binary threshold on luminance. A pixel whose luma is
//! strictly above `threshold` is background; anything at or below it is
//! content. There is no feathering, so a 241-luma halo around a product is
//! cut off while a 240-luma one is kept. Downstream catalogues depend on this
//! exact edge, so the luma formula matches the classic ITU-R 601 integer
//! conversion bit for bit rather than `image`'s Rec. 709 `to_luma8`.

use image::RgbImage;

/// A crop rectangle in pixel coordinates.
///
/// `right` and `bottom` are exclusive, so `right - left` is the width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// ITU-R 601-2 luma with 16-bit fixed-point weights and rounding.
#[inline]
pub fn luma_601(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

/// Is this luma value product (as opposed to background)?
///
/// Values above `threshold` are forced to white; inverting then leaves a
/// non-zero value only where the original luma was below 255.
#[inline]
fn is_content(luma: u8, threshold: u8) -> bool {
    luma <= threshold && luma != u8::MAX
}

/// Smallest box containing every content pixel, or `None` if the whole
/// image is background.
pub fn find_content_bbox(image: &RgbImage, threshold: u8) -> Option<BoundingBox> {
    let (width, height) = image.dimensions();
    let mut left = u32::MAX;
    let mut top = u32::MAX;
    let mut right = 0u32;
    let mut bottom = 0u32;

    for (y, row) in image.rows().enumerate() {
        let y = y as u32;
        for (x, px) in row.enumerate() {
            let [r, g, b] = px.0;
            if is_content(luma_601(r, g, b), threshold) {
                let x = x as u32;
                left = left.min(x);
                right = right.max(x + 1);
                top = top.min(y);
                bottom = bottom.max(y + 1);
            }
        }
    }

    if left == u32::MAX || width == 0 || height == 0 {
        return None;
    }

    Some(BoundingBox {
        left,
        top,
        right,
        bottom,
    })
}

/// Crop `image` to its content, or return it unchanged when it has none.
pub fn trim(image: &RgbImage, threshold: u8) -> RgbImage {
    match find_content_bbox(image, threshold) {
        Some(bbox) => {
            image::imageops::crop_imm(image, bbox.left, bbox.top, bbox.width(), bbox.height())
                .to_image()
        }
        None => image.clone(),
    }
}
