use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::future::join_all;
use serde_json::json;

use super::helpers::Payload;
use crate::catalog::{Fleet, ImageSlot, Listing};
use crate::error::ApiError;
use crate::media::ImageSource;
use crate::store::{AppState, StoreError};
use crate::validation;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload_car", post(upload_car))
        .route("/upload-scooter", post(upload_scooter))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip_all, err)]
async fn upload_car(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<Response, ApiError> {
    create_listing(&state, Fleet::Car, &payload).await
}

#[tracing::instrument(skip_all, err)]
async fn upload_scooter(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<Response, ApiError> {
    create_listing(&state, Fleet::Scooter, &payload).await
}

// ---------------------------------------------------------------------------
// Listing creation
// ---------------------------------------------------------------------------

fn required_fields(fleet: Fleet) -> [&'static str; 8] {
    let [first, second] = fleet.powertrain_columns();
    [
        fleet.name_column(),
        "segment_id",
        "segment_name",
        "model_type",
        "year",
        first,
        second,
        "price",
    ]
}

fn missing_field(fleet: Fleet, field: &str) -> Response {
    let body = match fleet {
        Fleet::Car => json!({ "error": format!("Missing required field: {field}") }),
        Fleet::Scooter => json!({ "error": "Missing required fields" }),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn duplicate(fleet: Fleet, listing: &Listing) -> Response {
    match fleet {
        Fleet::Car => (
            StatusCode::OK,
            Json(json!({
                "message": format!(
                    "Model '{}' already exists under segment ID '{}' and segment name '{}'.",
                    listing.model_type, listing.segment_id, listing.segment_name
                )
            })),
        )
            .into_response(),
        Fleet::Scooter => (
            StatusCode::CONFLICT,
            Json(json!({ "message": "Scooter model already exists for this segment." })),
        )
            .into_response(),
    }
}

fn created(fleet: Fleet, listing: &Listing) -> Response {
    let message = match fleet {
        Fleet::Car => "Car details inserted successfully.".to_owned(),
        Fleet::Scooter => format!("Scooter '{}' uploaded successfully.", listing.name),
    };
    (StatusCode::CREATED, Json(json!({ "message": message }))).into_response()
}

/// Read and validate the listing fields. `Err(response)` is a ready 400.
fn read_listing(fleet: Fleet, payload: &Payload) -> Result<Result<Listing, Response>, ApiError> {
    let mut values = Vec::with_capacity(8);
    for field in required_fields(fleet) {
        let value = payload.text(field);
        let present = match fleet {
            // Cars only require the key; scooters also reject empty values
            Fleet::Car => payload.has(field) && value.is_some(),
            Fleet::Scooter => value.as_deref().is_some_and(|v| !v.trim().is_empty()),
        };
        if !present {
            return Ok(Err(missing_field(fleet, field)));
        }
        values.push(value.unwrap_or_default());
    }
    if matches!(payload, Payload::Json(_)) {
        let paths = payload.image_paths()?;
        // Cars accept an empty `image_paths` object; scooters need at least one URL
        let present = match fleet {
            Fleet::Car => payload.has("image_paths"),
            Fleet::Scooter => paths.is_some(),
        };
        if !present {
            return Ok(Err(missing_field(fleet, "image_paths")));
        }
    }

    let [name, segment_id, segment_name, model_type, year, first, second, price]: [String; 8] =
        values
            .try_into()
            .map_err(|_| ApiError::Internal(anyhow::anyhow!("field count mismatch")))?;

    validation::check_length(fleet.name_column(), &name, 1, 255)?;
    validation::check_length("segment_name", &segment_name, 1, 255)?;
    validation::check_length("model_type", &model_type, 1, 255)?;
    let year = validation::parse_int("year", &year)?;
    validation::check_year(year)?;

    Ok(Ok(Listing {
        name,
        segment_id: validation::parse_int("segment_id", &segment_id)?,
        segment_name,
        model_type,
        year,
        powertrain: [first, second],
        price: validation::parse_price(&price)?,
        images: BTreeMap::new(),
    }))
}

/// Upload every image of the request. Returns the hosted URLs, or the
/// per-slot failure details when any slot failed.
async fn host_images(
    state: &AppState,
    payload: &Payload,
) -> Result<Result<BTreeMap<ImageSlot, String>, BTreeMap<ImageSlot, String>>, ApiError> {
    let mut errors = BTreeMap::new();
    let mut pending = Vec::new();

    match payload {
        Payload::Json(_) => {
            for (slot, url) in payload.image_paths()?.unwrap_or_default() {
                validation::check_image_url(&url, state.config.allow_private_urls)?;
                pending.push((slot, url, None));
            }
        }
        Payload::Form { .. } => {
            for slot in ImageSlot::ALL {
                match payload.files().iter().find(|f| f.field == slot.column()) {
                    Some(file) => {
                        tracing::info!(%slot, file_name = %file.file_name, "processing image");
                        pending.push((slot, file.file_name.clone(), Some(file.data.clone())));
                    }
                    None => {
                        errors.insert(slot, format!("File not found for {slot}"));
                    }
                }
            }
        }
    }

    let uploads = pending.into_iter().map(|(slot, name_or_url, data)| async move {
        let source = match data {
            Some(data) => ImageSource::Bytes {
                file_name: name_or_url,
                data,
            },
            None => {
                if !state.fetcher.is_accessible(&name_or_url).await {
                    return (slot, Err(format!("S3 URL for {slot} is not accessible")));
                }
                ImageSource::Remote(name_or_url)
            }
        };
        match state.images.upload(source).await {
            Ok(url) => (slot, Ok(url)),
            Err(e) => {
                tracing::error!(%slot, error = %e, "error uploading image");
                (slot, Err(format!("Failed to upload image for {slot}")))
            }
        }
    });

    let mut hosted = BTreeMap::new();
    for (slot, result) in join_all(uploads).await {
        match result {
            Ok(url) => {
                hosted.insert(slot, url);
            }
            Err(detail) => {
                errors.insert(slot, detail);
            }
        }
    }

    Ok(if errors.is_empty() { Ok(hosted) } else { Err(errors) })
}

async fn create_listing(
    state: &AppState,
    fleet: Fleet,
    payload: &Payload,
) -> Result<Response, ApiError> {
    let mut listing = match read_listing(fleet, payload)? {
        Ok(listing) => listing,
        Err(response) => return Ok(response),
    };

    state.catalog.ensure_schema(fleet).await?;
    if state.catalog.exists(fleet, &listing.key()).await? {
        tracing::info!(%fleet, model_type = %listing.model_type, "listing already exists");
        return Ok(duplicate(fleet, &listing));
    }

    match host_images(state, payload).await? {
        Ok(hosted) => listing.images = hosted,
        Err(details) => {
            let details: serde_json::Map<_, _> = details
                .into_iter()
                .map(|(slot, msg)| (slot.column().to_owned(), msg.into()))
                .collect();
            return Ok((
                StatusCode::MULTI_STATUS,
                Json(json!({ "error": "Some images failed to upload", "details": details })),
            )
                .into_response());
        }
    }

    match state.catalog.insert(fleet, &listing).await {
        Ok(id) => {
            tracing::info!(%fleet, id, "listing created");
            Ok(created(fleet, &listing))
        }
        // Lost a race with a concurrent upload of the same listing
        Err(StoreError::Conflict) => Ok(duplicate(fleet, &listing)),
        Err(e) => Err(e.into()),
    }
}
