use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;

use super::helpers::{Payload, file_name_from_url, parse_slot};
use crate::catalog::{Fleet, ImageSlot};
use crate::error::ApiError;
use crate::inspect::{self, Detector, Verdict};
use crate::media::ImageSource;
use crate::store::AppState;
use crate::validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload-images-with-keys", post(upload_images_with_keys))
        .route("/process-images", post(process_images))
        .route("/upload-images", post(upload_images))
}

/// Per-slot, per-listing result entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotReport {
    pub column: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_image_url: Option<String>,
}

impl SlotReport {
    fn new(slot: ImageSlot, status: impl Into<String>) -> Self {
        Self {
            column: slot.column().to_owned(),
            status: status.into(),
            new_image_url: None,
        }
    }
}

/// Status texts reported by one endpoint family.
struct Wording {
    /// `None` skips listings that have no stored image for the slot.
    no_existing: Option<&'static str>,
    different: &'static str,
    updated: &'static str,
    retained: &'static str,
    db_error: &'static str,
    report_url: bool,
}

const CAR_KEYS: Wording = Wording {
    no_existing: Some("No scratch detected, no update made"),
    different: "No scratch detected, no update made",
    updated: "Updated with scratches detected",
    retained: "No scratch detected, no update made",
    db_error: "Error updating DB",
    report_url: false,
};

const CAR_REMOTE: Wording = Wording {
    no_existing: None,
    different: "No change",
    updated: "scratch detected and image updated",
    retained: "No change",
    db_error: "Error",
    report_url: false,
};

const SCOOTER: Wording = Wording {
    no_existing: Some("No existing image found, no update made."),
    different: "Images are different, no update made.",
    updated: "Scratches detected, image updated",
    retained: "No scratches detected, image retained.",
    db_error: "Database error",
    report_url: true,
};

const UPLOAD_FAILED: &str = "Failed to upload to Cloudinary";
const FETCH_FAILED: &str = "Could not fetch new image";

/// Hosted location of the new photo, uploaded on first need.
enum Hosted {
    Ready(String),
    Pending(ImageSource),
    Failed,
}

impl Hosted {
    async fn url(&mut self, state: &AppState) -> Option<String> {
        if let Self::Pending(source) = self {
            let source = std::mem::replace(source, ImageSource::Remote(String::new()));
            *self = match state.images.upload(source).await {
                Ok(url) => Self::Ready(url),
                Err(e) => {
                    tracing::error!(error = %e, "error uploading image");
                    Self::Failed
                }
            };
        }
        match self {
            Self::Ready(url) => Some(url.clone()),
            Self::Pending(_) | Self::Failed => None,
        }
    }
}

/// Compares new photos of one segment/model against every stored listing.
struct Inspection<'a> {
    state: &'a AppState,
    fleet: Fleet,
    detector: Detector,
    wording: &'static Wording,
    segment_id: i32,
    model_type: String,
}

impl Inspection<'_> {
    async fn slot(
        &self,
        slot: ImageSlot,
        new: &Bytes,
        hosted: &mut Hosted,
    ) -> Result<Vec<SlotReport>, ApiError> {
        let rows = self
            .state
            .catalog
            .image_urls(self.fleet, self.segment_id, &self.model_type, slot)
            .await?;
        tracing::info!(%slot, rows = rows.len(), "comparing against stored images");

        let mut reports = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(existing_url) = row.image_url else {
                if let Some(status) = self.wording.no_existing {
                    reports.push(SlotReport::new(slot, status));
                }
                continue;
            };
            let existing = match self.state.fetcher.fetch(&existing_url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(id = row.id, url = %existing_url, error = %e, "failed to fetch existing image");
                    reports.push(SlotReport::new(slot, self.wording.retained));
                    continue;
                }
            };

            let verdict = inspect::inspect_blocking(self.detector, new.clone(), existing).await;
            let report = match verdict {
                Verdict::Different { .. } => SlotReport::new(slot, self.wording.different),
                v if v.needs_update() => self.replace(slot, hosted).await,
                _ => SlotReport::new(slot, self.wording.retained),
            };
            reports.push(report);
        }
        Ok(reports)
    }

    async fn replace(&self, slot: ImageSlot, hosted: &mut Hosted) -> SlotReport {
        let Some(url) = hosted.url(self.state).await else {
            return SlotReport::new(slot, UPLOAD_FAILED);
        };
        match self
            .state
            .catalog
            .update_image(self.fleet, self.segment_id, &self.model_type, slot, &url)
            .await
        {
            Ok(rows) => {
                tracing::info!(%slot, rows, "image updated");
                let mut report = SlotReport::new(slot, self.wording.updated);
                if self.wording.report_url {
                    report.new_image_url = Some(url);
                }
                report
            }
            Err(e) => {
                tracing::error!(%slot, error = %e, "database error");
                SlotReport::new(slot, format!("{}: {e}", self.wording.db_error))
            }
        }
    }
}

/// Segment id and model type of a re-inspection request, if both are usable.
fn segment_and_model(payload: &Payload) -> Option<(i32, String)> {
    let segment_id = payload.text("segment_id")?.trim().parse().ok()?;
    let model_type = payload.text("model_type").filter(|m| !m.trim().is_empty())?;
    Some((segment_id, model_type))
}

/// Upload each file, then compare it against the stored photos of the same slot.
async fn inspect_files(
    state: &AppState,
    inspection: &Inspection<'_>,
    payload: &Payload,
    report_upload_failure: bool,
) -> Result<Vec<SlotReport>, ApiError> {
    let mut reports = Vec::new();
    for file in payload.files() {
        let slot = parse_slot(&file.field)?;
        let source = ImageSource::Bytes {
            file_name: file.file_name.clone(),
            data: file.data.clone(),
        };
        let mut hosted = Hosted::Pending(source);
        if hosted.url(state).await.is_none() {
            if report_upload_failure {
                reports.push(SlotReport::new(slot, UPLOAD_FAILED));
            }
            continue;
        }
        reports.extend(inspection.slot(slot, &file.data, &mut hosted).await?);
    }
    Ok(reports)
}

#[tracing::instrument(skip_all, err)]
async fn upload_images_with_keys(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<Response, ApiError> {
    let Some((segment_id, model_type)) =
        segment_and_model(&payload).filter(|_| !payload.files().is_empty())
    else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": "Invalid input parameters" })),
        )
            .into_response());
    };
    tracing::info!(segment_id, %model_type, files = payload.files().len(), "re-inspecting car images");

    let inspection = Inspection {
        state: &state,
        fleet: Fleet::Car,
        detector: Detector::coarse(),
        wording: &CAR_KEYS,
        segment_id,
        model_type,
    };
    let data = inspect_files(&state, &inspection, &payload, true).await?;
    Ok(Json(json!({ "status": "success", "data": data })).into_response())
}

#[tracing::instrument(skip_all, err)]
async fn process_images(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<Response, ApiError> {
    let Some((segment_id, model_type)) =
        segment_and_model(&payload).filter(|_| !payload.files().is_empty())
    else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing required parameters" })),
        )
            .into_response());
    };
    tracing::info!(segment_id, %model_type, files = payload.files().len(), "re-inspecting scooter images");

    let inspection = Inspection {
        state: &state,
        fleet: Fleet::Scooter,
        detector: Detector::fine(),
        wording: &SCOOTER,
        segment_id,
        model_type,
    };
    let data = inspect_files(&state, &inspection, &payload, false).await?;
    Ok(Json(data).into_response())
}

#[tracing::instrument(skip_all, err)]
async fn upload_images(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<Response, ApiError> {
    let fleet = match payload.text("fleet").as_deref() {
        None | Some("car") => Fleet::Car,
        Some("scooter") => Fleet::Scooter,
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "unknown fleet '{other}'; expected car or scooter"
            )));
        }
    };

    let paths = payload.image_paths()?;
    let (Some((segment_id, model_type)), Some(paths)) = (segment_and_model(&payload), paths)
    else {
        let body = match fleet {
            Fleet::Car => json!({ "status": "error", "message": "Invalid input parameters" }),
            Fleet::Scooter => json!({ "error": "Missing required parameters" }),
        };
        return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
    };
    for url in paths.values() {
        validation::check_image_url(url, state.config.allow_private_urls)?;
    }

    let (detector, wording) = match fleet {
        Fleet::Car => (Detector::coarse(), &CAR_REMOTE),
        Fleet::Scooter => (Detector::fine(), &SCOOTER),
    };
    let inspection = Inspection {
        state: &state,
        fleet,
        detector,
        wording,
        segment_id,
        model_type,
    };

    let mut data = Vec::new();
    for (slot, url) in paths {
        let new = match state.fetcher.fetch(&url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%slot, %url, error = %e, "failed to fetch new image");
                data.push(SlotReport::new(slot, FETCH_FAILED));
                continue;
            }
        };
        let mut hosted = Hosted::Pending(ImageSource::Bytes {
            file_name: file_name_from_url(&url),
            data: new.clone(),
        });
        data.extend(inspection.slot(slot, &new, &mut hosted).await?);
    }
    Ok(Json(data).into_response())
}
