//! Integration tests for the HTTP endpoint, driven through the router
//! without binding a socket.

#![cfg(feature = "server")]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use base64::Engine as _;
use image::{GenericImageView, ImageFormat, Rgb, RgbImage};
use squareshot::server::{router, FormatImageResponse};
use squareshot::{NormalizeOptions, ServerConfig};
use tower::ServiceExt;

fn small_server() -> ServerConfig {
    ServerConfig {
        normalize: NormalizeOptions {
            final_size: (64, 64),
            ..NormalizeOptions::default()
        },
        ..ServerConfig::default()
    }
}

/// 90 × 60 white PNG with a gray (luma 180) block in the middle.
fn gray_block_png() -> Vec<u8> {
    let mut img = RgbImage::from_pixel(90, 60, Rgb([255, 255, 255]));
    for y in 20..40 {
        for x in 30..60 {
            img.put_pixel(x, y, Rgb([180, 180, 180]));
        }
    }
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

async fn post(config: &ServerConfig, body: impl Into<Body>) -> (StatusCode, serde_json::Value) {
    let response = router(config)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/format_image")
                .header("content-type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn decode_response(json: serde_json::Value) -> image::DynamicImage {
    let response: FormatImageResponse = serde_json::from_value(json).unwrap();
    let webp = base64::engine::general_purpose::STANDARD
        .decode(response.formatted_image_base64)
        .unwrap();
    image::load_from_memory_with_format(&webp, ImageFormat::WebP).unwrap()
}

#[tokio::test]
async fn formats_a_valid_image() {
    let body = serde_json::json!({ "image_base64": b64(&gray_block_png()) }).to_string();
    let (status, json) = post(&small_server(), body).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(decode_response(json).dimensions(), (64, 64));
}

#[tokio::test]
async fn threshold_override_changes_what_counts_as_background() {
    let png = gray_block_png();

    // Default 240: the gray block is content and fills the canvas.
    let body = serde_json::json!({ "image_base64": b64(&png) }).to_string();
    let (_, json) = post(&small_server(), body).await;
    let corner = decode_response(json).to_rgb8().get_pixel(1, 1).0;
    assert!(corner.iter().all(|&c| c < 215), "corner {corner:?}");

    // 170: everything is background, so nothing is trimmed and the
    // corner stays white.
    let body = serde_json::json!({ "image_base64": b64(&png), "threshold": 170 }).to_string();
    let (status, json) = post(&small_server(), body).await;
    assert_eq!(status, StatusCode::OK);
    let corner = decode_response(json).to_rgb8().get_pixel(1, 1).0;
    assert!(corner.iter().all(|&c| c > 240), "corner {corner:?}");
}

#[tokio::test]
async fn bad_requests_are_400_with_detail() {
    let not_an_image = b64(b"definitely not pixels");
    let cases = [
        serde_json::json!({ "image_base64": "%%% not base64 %%%" }).to_string(),
        serde_json::json!({ "image_base64": not_an_image }).to_string(),
        serde_json::json!({ "image_base64": b64(&gray_block_png()), "threshold": 300 }).to_string(),
        serde_json::json!({ "picture": "abc" }).to_string(),
        "{ this is not json".to_string(),
    ];
    for body in cases {
        let (status, json) = post(&small_server(), body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
        let detail = json["detail"].as_str().unwrap_or_default();
        assert!(!detail.is_empty(), "missing detail for {body}: {json}");
    }
}

#[tokio::test]
async fn oversized_body_is_400_with_detail() {
    let config = ServerConfig {
        max_body_bytes: 1024,
        ..small_server()
    };
    let body = serde_json::json!({ "image_base64": "A".repeat(4096) }).to_string();
    let (status, json) = post(&config, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["detail"].as_str().is_some_and(|d| !d.is_empty()), "{json}");
}

#[tokio::test]
async fn zero_threshold_falls_back_to_the_default() {
    let png = gray_block_png();
    let default = serde_json::json!({ "image_base64": b64(&png) }).to_string();
    let zero = serde_json::json!({ "image_base64": b64(&png), "threshold": 0 }).to_string();
    let (_, a) = post(&small_server(), default).await;
    let (status, b) = post(&small_server(), zero).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(a["formatted_image_base64"], b["formatted_image_base64"]);
}

#[tokio::test]
async fn health_reports_ok() {
    let response = router(&small_server())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ok");
}
