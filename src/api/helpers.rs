use std::collections::{BTreeMap, HashMap};

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use bytes::Bytes;
use serde_json::Value;

use crate::catalog::ImageSlot;
use crate::error::ApiError;

/// A file part of a multipart request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub data: Bytes,
}

/// Request body accepted by the upload endpoints: either a multipart form
/// carrying files, or a JSON object carrying `image_paths` URLs.
#[derive(Debug)]
pub enum Payload {
    Form {
        fields: HashMap<String, String>,
        files: Vec<UploadedFile>,
    },
    Json(serde_json::Map<String, Value>),
}

impl<S: Send + Sync> FromRequest<S> for Payload {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            let mut fields = HashMap::new();
            let mut files = Vec::new();
            while let Some(field) = multipart.next_field().await? {
                let name = field.name().unwrap_or_default().to_owned();
                if let Some(file_name) = field.file_name().map(str::to_owned) {
                    let data = field.bytes().await?;
                    tracing::info!(field = %name, %file_name, size = data.len(), "received file");
                    files.push(UploadedFile {
                        field: name,
                        file_name,
                        data,
                    });
                } else {
                    fields.insert(name, field.text().await?);
                }
            }
            return Ok(Self::Form { fields, files });
        }

        if content_type.starts_with("application/json") {
            let Json(value) = Json::<Value>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            return match value {
                Value::Object(map) => Ok(Self::Json(map)),
                _ => Err(ApiError::BadRequest("request body must be a JSON object".into())),
            };
        }

        Err(ApiError::UnsupportedMediaType(
            "expected multipart/form-data or application/json".into(),
        ))
    }
}

impl Payload {
    /// Text value of `key`. JSON numbers are rendered as text; JSON null is absent.
    pub fn text(&self, key: &str) -> Option<String> {
        match self {
            Self::Form { fields, .. } => fields.get(key).cloned(),
            Self::Json(map) => match map.get(key)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                Value::Null | Value::Array(_) | Value::Object(_) => None,
            },
        }
    }

    pub fn has(&self, key: &str) -> bool {
        match self {
            Self::Form { fields, .. } => fields.contains_key(key),
            Self::Json(map) => map.contains_key(key),
        }
    }

    pub fn files(&self) -> &[UploadedFile] {
        match self {
            Self::Form { files, .. } => files,
            Self::Json(_) => &[],
        }
    }

    /// The `image_paths` object of a JSON body, keyed by image slot.
    ///
    /// `Ok(None)` when absent or empty. Unknown slot names and non-string
    /// URLs are rejected.
    pub fn image_paths(&self) -> Result<Option<BTreeMap<ImageSlot, String>>, ApiError> {
        let Self::Json(map) = self else {
            return Ok(None);
        };
        let Some(value) = map.get("image_paths") else {
            return Ok(None);
        };
        let Value::Object(paths) = value else {
            return Err(ApiError::BadRequest(
                "image_paths must be an object of column name to URL".into(),
            ));
        };

        let mut out = BTreeMap::new();
        for (column, url) in paths {
            let slot = parse_slot(column)?;
            let Value::String(url) = url else {
                return Err(ApiError::BadRequest(format!(
                    "image_paths.{column} must be a string"
                )));
            };
            out.insert(slot, url.clone());
        }
        Ok((!out.is_empty()).then_some(out))
    }
}

pub fn parse_slot(column: &str) -> Result<ImageSlot, ApiError> {
    column.parse().map_err(|_| {
        let valid: Vec<&str> = ImageSlot::ALL.iter().map(|s| s.column()).collect();
        ApiError::BadRequest(format!(
            "unknown image column '{column}'; valid columns: {valid:?}"
        ))
    })
}

/// File name to hand the image host for bytes fetched from `url`.
pub fn file_name_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_owned))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".into())
}
