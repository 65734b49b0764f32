use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha1::{Digest, Sha1};

use super::{ImageHost, ImageSource, MediaError};
use crate::config::CloudinaryConfig;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    error: Option<UploadError>,
}

#[derive(Debug, Deserialize)]
struct UploadError {
    message: String,
}

/// Signed uploads to the Cloudinary image API.
pub struct CloudinaryClient {
    http: reqwest::Client,
    config: CloudinaryConfig,
}

impl CloudinaryClient {
    pub fn new(config: CloudinaryConfig) -> Result<Self, MediaError> {
        let http = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .user_agent("carupload/0.1")
            .build()?;
        Ok(Self { http, config })
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/v1_1/{}/image/upload",
            self.config.api_base.trim_end_matches('/'),
            self.config.cloud_name
        )
    }

    /// Signed parameters, sorted by name as the signature requires.
    fn signed_params(&self, timestamp: i64) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(2);
        if let Some(folder) = &self.config.folder {
            params.push(("folder", folder.clone()));
        }
        params.push(("timestamp", timestamp.to_string()));
        params
    }
}

/// Hex SHA-1 over `k=v&k=v` followed by the API secret.
pub fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let joined = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha1::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl ImageHost for CloudinaryClient {
    #[tracing::instrument(skip(self, source), fields(source = source.describe()), err)]
    async fn upload(&self, source: ImageSource) -> Result<String, MediaError> {
        let params = self.signed_params(chrono::Utc::now().timestamp());
        let signature = sign(&params, &self.config.api_secret);

        let mut form = Form::new()
            .text("api_key", self.config.api_key.clone())
            .text("signature", signature);
        for (k, v) in params {
            form = form.text(k, v);
        }
        form = match source {
            ImageSource::Bytes { file_name, data } => {
                form.part("file", Part::bytes(data.to_vec()).file_name(file_name))
            }
            ImageSource::Remote(url) => form.text("file", url),
        };

        let resp = self.http.post(self.upload_url()).multipart(form).send().await?;
        let status = resp.status();
        let body: UploadResponse = match resp.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => return Err(MediaError::Status(status.as_u16())),
            Err(e) => return Err(e.into()),
        };

        if let Some(err) = body.error {
            return Err(MediaError::Rejected(err.message));
        }
        if !status.is_success() {
            return Err(MediaError::Status(status.as_u16()));
        }
        let url = body
            .secure_url
            .ok_or_else(|| MediaError::Rejected("response missing secure_url".into()))?;

        tracing::info!(%url, "image uploaded to cloudinary");
        Ok(url)
    }
}
