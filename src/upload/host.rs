//! Image-host client: one multipart POST per file.
//!
//! The wire contract is the imgbb v1 API. The file goes in a multipart field
//! named `image`, the key and lifetime travel as `key` and `expiration`
//! query parameters, and a good answer looks like
//!
//! ```json
//! { "success": true, "status": 200,
//!   "data": { "url": "…", "display_url": "…", "delete_url": "…" } }
//! ```
//!
//! A 2xx status is not enough on its own; [`parse_upload_response`] also
//! requires the success flag and all three URLs.

use crate::config::UploadConfig;
use crate::error::{SquareshotError, UploadError};
use crate::output::HostedImage;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 300;

/// Anything that accepts an image and returns its hosted URLs.
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        api_key: &str,
    ) -> Result<HostedImage, UploadError>;
}

/// reqwest-backed client for the imgbb upload endpoint.
///
/// Holds a single connection pool shared by every upload in a run.
#[derive(Debug, Clone)]
pub struct ImgbbClient {
    client: reqwest::Client,
    endpoint: String,
    expiration_secs: u64,
}

impl ImgbbClient {
    pub fn new(config: &UploadConfig) -> Result<Self, SquareshotError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| SquareshotError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            expiration_secs: config.expiration_secs,
        })
    }
}

#[async_trait]
impl ImageHost for ImgbbClient {
    async fn upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        api_key: &str,
    ) -> Result<HostedImage, UploadError> {
        let size = bytes.len();
        let form = Form::new().part("image", Part::bytes(bytes).file_name(filename.to_string()));

        // Strip the URL from transport errors: it carries the key.
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("key", api_key.to_string()),
                ("expiration", self.expiration_secs.to_string()),
            ])
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.without_url().to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(e.without_url().to_string()))?;
        debug!("POST {} ({} bytes) → HTTP {}", filename, size, status);

        parse_upload_response(status, &body)
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    success: bool,
    status: Option<u16>,
    status_code: Option<u16>,
    status_txt: Option<String>,
    data: Option<ApiData>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct ApiData {
    url: Option<String>,
    display_url: Option<String>,
    delete_url: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// Classify an HTTP status and body into a hosted image or an upload error.
pub fn parse_upload_response(http_status: u16, body: &str) -> Result<HostedImage, UploadError> {
    if !(200..300).contains(&http_status) {
        return Err(UploadError::HttpStatus {
            status: http_status,
            body: truncate(body),
        });
    }

    let parsed: ApiResponse = serde_json::from_str(body)
        .map_err(|e| UploadError::Malformed(format!("{e}: {}", truncate(body))))?;
    let status = parsed.status.or(parsed.status_code).unwrap_or(http_status);

    if !parsed.success {
        let message = parsed
            .error
            .and_then(|e| e.message)
            .or(parsed.status_txt)
            .unwrap_or_else(|| "success flag missing or false".to_string());
        return Err(UploadError::ApiFailure { status, message });
    }

    let data = parsed
        .data
        .ok_or_else(|| UploadError::Malformed("response has no data block".into()))?;
    match (data.url, data.display_url, data.delete_url) {
        (Some(url), Some(display_url), Some(delete_url)) => Ok(HostedImage {
            url,
            display_url,
            delete_url,
            status,
        }),
        _ => Err(UploadError::Malformed(
            "data block lacks url, display_url or delete_url".into(),
        )),
    }
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= MAX_ERROR_BODY {
        return trimmed.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}
