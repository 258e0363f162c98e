use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::db::{repositories::MAX_RECENT_LIMIT, Reading, ReadingPayload};
use crate::stream::synthetic::generate_backdated_batch;

const TEST_DATA_COUNT: usize = 20;
const MAX_DEVICE_LEN: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct NewReading {
    temperature: Option<f64>,
    device: Option<String>,
}

/// A stored reading as returned over HTTP: the stream payload plus its row id.
#[derive(Debug, Serialize)]
pub struct StoredReading {
    id: Option<i64>,
    #[serde(flatten)]
    payload: ReadingPayload,
}

impl From<&Reading> for StoredReading {
    fn from(reading: &Reading) -> Self {
        Self {
            id: reading.id,
            payload: reading.to_payload(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GeneratedReadings {
    message: String,
    data: Vec<StoredReading>,
}

pub async fn list_readings(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<StoredReading>>, ApiError> {
    let Query(params) = params.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let limit = params
        .limit
        .unwrap_or(state.recent_limit)
        .clamp(1, MAX_RECENT_LIMIT);

    let readings = state.db.get_recent_readings(limit).await?;
    Ok(Json(readings.iter().map(StoredReading::from).collect()))
}

pub async fn create_reading(
    State(state): State<AppState>,
    body: Result<Json<NewReading>, JsonRejection>,
) -> Result<(StatusCode, Json<StoredReading>), ApiError> {
    let Json(body) = body.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let reading = validate(body)?;

    let stored = state.db.insert_reading(&reading).await?;
    info!(
        "Stored reading {:?}: {} - {}°C",
        stored.id, stored.device_id, stored.value
    );
    Ok((StatusCode::CREATED, Json(StoredReading::from(&stored))))
}

pub async fn generate_test_data(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<GeneratedReadings>), ApiError> {
    let stored = state
        .db
        .insert_readings(generate_backdated_batch(TEST_DATA_COUNT))
        .await?;
    info!("Generated {} test readings", stored.len());

    Ok((
        StatusCode::CREATED,
        Json(GeneratedReadings {
            message: format!("Generated {} test readings", stored.len()),
            data: stored.iter().map(StoredReading::from).collect(),
        }),
    ))
}

fn validate(body: NewReading) -> Result<Reading, ApiError> {
    let temperature = body
        .temperature
        .ok_or_else(|| ApiError::bad_request("temperature is required"))?;
    if !temperature.is_finite() {
        return Err(ApiError::bad_request("temperature must be a finite number"));
    }

    let device = body.device.as_deref().map(str::trim).unwrap_or_default();
    if device.is_empty() {
        return Err(ApiError::bad_request("device is required"));
    }
    if device.chars().count() > MAX_DEVICE_LEN {
        return Err(ApiError::bad_request(format!(
            "device must be at most {MAX_DEVICE_LEN} characters"
        )));
    }

    Ok(Reading::new(temperature, device, Utc::now()))
}
