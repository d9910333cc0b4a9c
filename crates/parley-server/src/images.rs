//! Image hosting (Cloudinary).
//!
//! Clients either upload directly with a server-issued signature, or send a
//! `data:` URI which the server uploads on their behalf.

use std::collections::BTreeMap;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ImageConfig;
use crate::error::ApiError;

const CLOUDINARY_API: &str = "https://api.cloudinary.com";
/// Digest used by [`sign_params`]; clients must echo it on direct uploads.
pub const SIGNATURE_ALGORITHM: &str = "sha256";

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image uploads are not configured")]
    NotConfigured,
    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("image host rejected upload ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl From<ImageError> for ApiError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::NotConfigured => Self::BadRequest("Image uploads are not configured".into()),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Parameters a client needs for a signed direct upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSignature {
    pub signature: String,
    pub timestamp: i64,
    pub cloud_name: String,
    pub api_key: String,
    pub upload_preset: String,
    pub folder: String,
    pub signature_algorithm: &'static str,
}

#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Upload an inline `data:` URI and return its public HTTPS URL.
    async fn upload_data_uri(&self, data_uri: &str) -> Result<String, ImageError>;

    /// Sign a direct client upload at `timestamp` (unix seconds).
    fn upload_signature(&self, timestamp: i64) -> Result<UploadSignature, ImageError>;
}

/// SHA-256 request signature: `k=v` pairs sorted by key, joined with `&`,
/// followed by the API secret, hex encoded.
pub fn sign_params(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
}

#[derive(Deserialize)]
struct UploadErrorBody {
    error: UploadErrorMessage,
}

#[derive(Deserialize)]
struct UploadErrorMessage {
    message: String,
}

pub struct CloudinaryHost {
    client: reqwest::Client,
    config: ImageConfig,
    base_url: String,
}

impl CloudinaryHost {
    pub fn new(config: ImageConfig) -> Self {
        Self::with_base_url(config, CLOUDINARY_API)
    }

    pub fn with_base_url(config: ImageConfig, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            base_url: base_url.into(),
        }
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/v1_1/{}/image/upload",
            self.base_url.trim_end_matches('/'),
            self.config.cloud_name
        )
    }
}

#[async_trait]
impl ImageHost for CloudinaryHost {
    async fn upload_data_uri(&self, data_uri: &str) -> Result<String, ImageError> {
        if !self.config.is_configured() {
            return Err(ImageError::NotConfigured);
        }

        let timestamp = chrono::Utc::now().timestamp();
        let mut params = BTreeMap::new();
        let _ = params.insert("folder", self.config.folder.clone());
        let _ = params.insert("timestamp", timestamp.to_string());
        let signature = sign_params(&params, self.config.api_secret.expose_secret());

        let form = reqwest::multipart::Form::new()
            .text("file", data_uri.to_string())
            .text("api_key", self.config.api_key.clone())
            .text("folder", self.config.folder.clone())
            .text("timestamp", timestamp.to_string())
            .text("signature", signature)
            .text("signature_algorithm", SIGNATURE_ALGORITHM);

        let resp = self.client.post(self.upload_url()).multipart(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = match resp.json::<UploadErrorBody>().await {
                Ok(body) => body.error.message,
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(ImageError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: UploadResponse = resp.json().await?;
        tracing::info!(url = %body.secure_url, "image uploaded");
        Ok(body.secure_url)
    }

    fn upload_signature(&self, timestamp: i64) -> Result<UploadSignature, ImageError> {
        if !self.config.is_configured() {
            return Err(ImageError::NotConfigured);
        }
        let mut params = BTreeMap::new();
        let _ = params.insert("folder", self.config.folder.clone());
        let _ = params.insert("timestamp", timestamp.to_string());
        let _ = params.insert("upload_preset", self.config.upload_preset.clone());

        Ok(UploadSignature {
            signature: sign_params(&params, self.config.api_secret.expose_secret()),
            timestamp,
            cloud_name: self.config.cloud_name.clone(),
            api_key: self.config.api_key.clone(),
            upload_preset: self.config.upload_preset.clone(),
            folder: self.config.folder.clone(),
            signature_algorithm: SIGNATURE_ALGORITHM,
        })
    }
}
