//! Square-canvas normalisation: the heart of the formatter.
//!
//! ```text
//! DynamicImage
//!  │
//!  ├─ 1. Flatten   alpha → composite over white; everything → RGB8
//!  ├─ 2. Trim      crop near-white margins
//!  ├─ 3. Aspect    > 2:1 rotate −45°, < 1:2 rotate +45° (expand, white fill), re-trim
//!  ├─ 4. Square    centre on a white max(w, h) square, floor offsets
//!  └─ 5. Resample  Lanczos3 to the final size
//! ```
//!
//! Every step returns a new buffer; the caller's image is never touched.
//! The aspect correction runs at most once, it is not a deskew loop.

use super::trim::trim;
use crate::config::NormalizeOptions;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use tracing::debug;

/// Background colour for every canvas we create.
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Aspect ratio above which a subject is rotated clockwise before squaring.
pub const WIDE_ASPECT: f64 = 2.0;

/// Aspect ratio below which a subject is rotated counter-clockwise.
pub const TALL_ASPECT: f64 = 0.5;

/// Rotation applied to extreme-aspect subjects, in degrees.
const ROTATION_DEGREES: f64 = 45.0;

/// Run the full normalisation pipeline on a decoded image.
///
/// Always returns an opaque RGB image of exactly `options.final_size`.
pub fn normalize(image: &DynamicImage, options: &NormalizeOptions) -> RgbImage {
    let threshold = options.threshold;

    let flat = flatten_transparency(image);
    let mut img = trim(&flat, threshold);

    if let Some(angle) = aspect_rotation(img.width(), img.height()) {
        debug!(
            "Aspect {:.2} out of range, rotating {}°",
            img.width() as f64 / img.height() as f64,
            angle
        );
        img = trim(&rotate_expand(&img, angle, WHITE), threshold);
    }

    let square = square_canvas(&img);
    let (w, h) = options.final_size;
    if square.dimensions() == (w, h) {
        return square;
    }
    imageops::resize(&square, w, h, FilterType::Lanczos3)
}

/// Composite any alpha channel over white and return an opaque RGB8 image.
///
/// Palette images with a transparency key arrive from the decoders already
/// expanded to RGBA, so checking `has_alpha` covers RGBA, LA and keyed
/// palettes alike. Fully opaque pixels come through unchanged.
pub fn flatten_transparency(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut out = RgbImage::new(w, h);
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        *dst = Rgb([blend(r), blend(g), blend(b)]);
    }
    out
}

/// Rotation (degrees, positive = counter-clockwise) for an extreme aspect
/// ratio, or `None` when the subject is already reasonably proportioned.
pub fn aspect_rotation(width: u32, height: u32) -> Option<f64> {
    if width == 0 || height == 0 {
        return None;
    }
    let aspect = width as f64 / height as f64;
    if aspect > WIDE_ASPECT {
        Some(-ROTATION_DEGREES)
    } else if aspect < TALL_ASPECT {
        Some(ROTATION_DEGREES)
    } else {
        None
    }
}

/// Canvas size needed to hold a `width × height` image rotated by `degrees`.
pub fn rotated_bounds(width: u32, height: u32, degrees: f64) -> (u32, u32) {
    let rad = degrees.to_radians();
    let (sin, cos) = (rad.sin().abs(), rad.cos().abs());
    let (w, h) = (width as f64, height as f64);
    // Shave float noise so exact multiples of 90° do not grow by a pixel.
    let new_w = (w * cos + h * sin - 1e-6).ceil().max(1.0) as u32;
    let new_h = (w * sin + h * cos - 1e-6).ceil().max(1.0) as u32;
    (new_w, new_h)
}

/// Rotate around the centre, growing the canvas so nothing is clipped.
///
/// Uses inverse mapping with nearest-neighbour sampling; destination pixels
/// that map outside the source are painted with `fill`.
pub fn rotate_expand(image: &RgbImage, degrees: f64, fill: Rgb<u8>) -> RgbImage {
    let (src_w, src_h) = image.dimensions();
    let (dst_w, dst_h) = rotated_bounds(src_w, src_h, degrees);

    let rad = degrees.to_radians();
    let (sin, cos) = rad.sin_cos();
    let (src_cx, src_cy) = (src_w as f64 / 2.0, src_h as f64 / 2.0);
    let (dst_cx, dst_cy) = (dst_w as f64 / 2.0, dst_h as f64 / 2.0);

    RgbImage::from_fn(dst_w, dst_h, |x, y| {
        // Work from pixel centres.
        let dx = x as f64 + 0.5 - dst_cx;
        let dy = y as f64 + 0.5 - dst_cy;
        // Image y points down, so a visual counter-clockwise turn by θ maps
        // destination back to source with this matrix.
        let sx = dx * cos - dy * sin + src_cx;
        let sy = dx * sin + dy * cos + src_cy;
        if sx < 0.0 || sy < 0.0 {
            return fill;
        }
        let (sx, sy) = (sx.floor() as u32, sy.floor() as u32);
        if sx >= src_w || sy >= src_h {
            fill
        } else {
            *image.get_pixel(sx, sy)
        }
    })
}

/// Centre `image` on a white square whose side is its longer edge.
///
/// Offsets use floor division, so an odd difference leaves the extra pixel
/// of padding on the bottom or right.
pub fn square_canvas(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    let (side, x, y) = if w > h {
        (w, 0, (w - h) / 2)
    } else {
        (h, (h - w) / 2, 0)
    };

    let mut canvas = RgbImage::from_pixel(side, side, WHITE);
    imageops::replace(&mut canvas, image, x as i64, y as i64);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    const RED: Rgb<u8> = Rgb([220, 20, 20]);

    fn small_options() -> NormalizeOptions {
        NormalizeOptions {
            final_size: (120, 120),
            ..NormalizeOptions::default()
        }
    }

    /// Product block of `w × h` centred on a white field with a margin.
    fn product(w: u32, h: u32) -> DynamicImage {
        let margin = 8;
        let mut img = RgbImage::from_pixel(w + 2 * margin, h + 2 * margin, WHITE);
        for y in margin..margin + h {
            for x in margin..margin + w {
                img.put_pixel(x, y, Rgb([90, 110, 130]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn output_is_always_final_size() {
        let opts = small_options();
        for (w, h) in [(300, 30), (200, 40), (150, 70), (100, 100), (70, 150), (40, 200), (30, 300)] {
            let out = normalize(&product(w, h), &opts);
            assert_eq!(out.dimensions(), (120, 120), "input {w}x{h}");
        }
    }

    #[test]
    fn default_final_size_is_1200() {
        let out = normalize(&product(64, 48), &NormalizeOptions::default());
        assert_eq!(out.dimensions(), (1200, 1200));
    }

    #[test]
    fn all_white_input_still_produces_canvas() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 20, WHITE));
        let out = normalize(&img, &small_options());
        assert_eq!(out.dimensions(), (120, 120));
        assert!(out.pixels().all(|p| p.0.iter().all(|&c| c >= 254)));
    }

    #[test]
    fn opaque_alpha_matches_plain_rgb() {
        let rgb = product(40, 25);
        let rgba = DynamicImage::ImageRgba8(rgb.to_rgba8());
        let opts = small_options();
        assert_eq!(normalize(&rgb, &opts), normalize(&rgba, &opts));
    }

    #[test]
    fn transparent_pixels_match_white_background() {
        // Same visible content: a product block, surrounded by transparency
        // in one image and by white in the other.
        let (w, h, m) = (30u32, 20u32, 6u32);
        let mut with_alpha = RgbaImage::from_pixel(w + 2 * m, h + 2 * m, Rgba([13, 77, 201, 0]));
        let mut on_white = RgbImage::from_pixel(w + 2 * m, h + 2 * m, WHITE);
        for y in m..m + h {
            for x in m..m + w {
                with_alpha.put_pixel(x, y, Rgba([90, 110, 130, 255]));
                on_white.put_pixel(x, y, Rgb([90, 110, 130]));
            }
        }

        let opts = small_options();
        assert_eq!(
            normalize(&DynamicImage::ImageRgba8(with_alpha), &opts),
            normalize(&DynamicImage::ImageRgb8(on_white), &opts)
        );
    }

    #[test]
    fn flatten_blends_partial_alpha_over_white() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128])));
        let flat = flatten_transparency(&img);
        // 255 * 127 / 255 = 127, rounded.
        assert_eq!(*flat.get_pixel(0, 0), Rgb([127, 127, 127]));
    }

    #[test]
    fn flatten_handles_luma_alpha() {
        let img = DynamicImage::ImageLumaA8(image::GrayAlphaImage::from_pixel(
            2,
            2,
            image::LumaA([0, 0]),
        ));
        let flat = flatten_transparency(&img);
        assert!(flat.pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn aspect_rotation_thresholds() {
        assert_eq!(aspect_rotation(201, 100), Some(-45.0));
        assert_eq!(aspect_rotation(200, 100), None);
        assert_eq!(aspect_rotation(100, 100), None);
        assert_eq!(aspect_rotation(50, 100), None);
        assert_eq!(aspect_rotation(49, 100), Some(45.0));
    }

    #[test]
    fn rotated_bounds_for_common_angles() {
        assert_eq!(rotated_bounds(100, 50, 0.0), (100, 50));
        assert_eq!(rotated_bounds(100, 50, 90.0), (50, 100));
        // 150 / √2 = 106.07
        assert_eq!(rotated_bounds(100, 50, 45.0), (107, 107));
        assert_eq!(rotated_bounds(100, 50, -45.0), (107, 107));
    }

    #[test]
    fn rotate_expand_fills_corners_white() {
        let img = RgbImage::from_pixel(60, 20, RED);
        let out = rotate_expand(&img, -45.0, WHITE);
        assert_eq!(out.dimensions(), (57, 57));
        assert_eq!(*out.get_pixel(0, 0), WHITE);
        assert_eq!(*out.get_pixel(56, 56), WHITE);
        assert_eq!(*out.get_pixel(28, 28), RED);
    }

    #[test]
    fn clockwise_rotation_tilts_wide_strip_down_to_the_right() {
        let img = RgbImage::from_pixel(100, 10, RED);
        let out = rotate_expand(&img, -45.0, WHITE);
        let (w, h) = out.dimensions();
        // Upper-left and lower-right quadrants carry the strip.
        assert_eq!(*out.get_pixel(w / 4, h / 4), RED);
        assert_eq!(*out.get_pixel(3 * w / 4, 3 * h / 4), RED);
        assert_eq!(*out.get_pixel(3 * w / 4, h / 4), WHITE);
        assert_eq!(*out.get_pixel(w / 4, 3 * h / 4), WHITE);
    }

    #[test]
    fn square_canvas_centres_with_floor_offset() {
        let img = RgbImage::from_pixel(10, 5, RED);
        let sq = square_canvas(&img);
        assert_eq!(sq.dimensions(), (10, 10));
        // (10 - 5) / 2 = 2 rows of padding on top, 3 at the bottom.
        assert_eq!(*sq.get_pixel(0, 1), WHITE);
        assert_eq!(*sq.get_pixel(0, 2), RED);
        assert_eq!(*sq.get_pixel(0, 6), RED);
        assert_eq!(*sq.get_pixel(0, 7), WHITE);

        let tall = RgbImage::from_pixel(3, 8, RED);
        let sq = square_canvas(&tall);
        assert_eq!(sq.dimensions(), (8, 8));
        assert_eq!(*sq.get_pixel(1, 0), WHITE);
        assert_eq!(*sq.get_pixel(2, 0), RED);
        assert_eq!(*sq.get_pixel(4, 0), RED);
        assert_eq!(*sq.get_pixel(5, 0), WHITE);
    }

    #[test]
    fn normalize_does_not_touch_the_input() {
        let img = product(40, 10);
        let before = img.clone();
        let _ = normalize(&img, &small_options());
        assert_eq!(img, before);
    }
}
