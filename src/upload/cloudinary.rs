/// Cloudinary image host client
use super::{remove_local_file, ImageUploader, UploadedImage};
use crate::{
    config::UploadConfig,
    error::{AppError, AppResult},
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
    #[serde(default)]
    public_id: String,
}

/// Signed uploads into a single Cloudinary folder
pub struct CloudinaryUploader {
    client: Client,
    endpoint: String,
    api_key: String,
    api_secret: String,
    folder: String,
}

impl CloudinaryUploader {
    pub fn new(config: &UploadConfig) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1_1/{}/auto/upload",
                config.api_base.trim_end_matches('/'),
                config.cloud_name
            ),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            folder: config.folder.clone(),
        })
    }

    async fn send(&self, local_path: &Path) -> AppResult<UploadedImage> {
        let bytes = tokio::fs::read(local_path).await.map_err(|e| {
            tracing::warn!("Staged file {:?} unreadable: {}", local_path, e);
            AppError::Upstream("Local file not found".to_string())
        })?;

        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let timestamp = Utc::now().timestamp();
        let signature = sign_params(&self.folder, timestamp, &self.api_secret);

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp.to_string())
            .text("folder", self.folder.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Image host request failed: {}", e);
                AppError::Upstream("Image host unreachable".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or_default();
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("upload rejected")
                .to_string();

            tracing::error!(%status, "Image host rejected upload: {}", message);
            return Err(AppError::Upstream(message));
        }

        let body: UploadResponse = response.json().await.map_err(|e| {
            tracing::error!("Unexpected image host response: {}", e);
            AppError::Upstream("Unexpected image host response".to_string())
        })?;

        let url = body
            .secure_url
            .or(body.url)
            .ok_or_else(|| AppError::Upstream("Image host returned no URL".to_string()))?;

        tracing::debug!(public_id = %body.public_id, "Image uploaded");

        Ok(UploadedImage {
            url,
            public_id: body.public_id,
        })
    }
}

#[async_trait]
impl ImageUploader for CloudinaryUploader {
    async fn upload(&self, local_path: &Path) -> AppResult<UploadedImage> {
        let result = self.send(local_path).await;
        remove_local_file(local_path).await;
        result
    }
}

/// Hex SHA-256 over the sorted signed params followed by the API secret
fn sign_params(folder: &str, timestamp: i64, api_secret: &str) -> String {
    let payload = format!("folder={}&timestamp={}{}", folder, timestamp, api_secret);
    hex::encode(Sha256::digest(payload.as_bytes()))
}
