use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::error;

use covtrack_core::types::{CarWithOwner, Claim, PolicyPeriod};
use covtrack_storage::{CarError, NewCar, NewClaim};

use crate::problem::ProblemResponse;
use crate::router::AppState;

const MAX_CLAIM_DESCRIPTION_LEN: usize = 500;

/// A registered car flattened with its owner's contact details.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CarDto {
    pub id: i64,
    pub vin: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: i64,
    pub owner_id: i64,
    pub owner_name: String,
    pub owner_email: Option<String>,
}

impl From<CarWithOwner> for CarDto {
    fn from(car: CarWithOwner) -> Self {
        Self {
            id: car.id,
            vin: car.vin,
            make: car.make,
            model: car.model,
            year: car.year_of_manufacture,
            owner_id: car.owner_id,
            owner_name: car.owner_name,
            owner_email: car.owner_email,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCarRequest {
    pub vin: String,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub year: i64,
    pub owner_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CarCreatedResponse {
    pub id: i64,
    pub vin: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsuranceValidityResponse {
    pub car_id: i64,
    pub date: String,
    pub valid: bool,
}

#[derive(Debug, Deserialize)]
pub struct ValidityQuery {
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClaimRequest {
    pub claim_date: NaiveDate,
    pub description: String,
    pub amount: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDto {
    pub id: i64,
    pub claim_date: NaiveDate,
    pub description: String,
    pub amount: f64,
}

impl From<Claim> for ClaimDto {
    fn from(claim: Claim) -> Self {
        Self {
            id: claim.id,
            claim_date: claim.claim_date,
            description: claim.description,
            amount: claim.amount,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPeriodDto {
    pub id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub provider: String,
}

impl From<PolicyPeriod> for PolicyPeriodDto {
    fn from(policy: PolicyPeriod) -> Self {
        Self {
            id: policy.id,
            start_date: policy.start_date,
            end_date: policy.end_date,
            provider: policy.provider,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CarHistoryDto {
    pub car_id: i64,
    pub policies: Vec<PolicyPeriodDto>,
    pub claims: Vec<ClaimDto>,
}

/// GET /api/cars
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<CarDto>>, ProblemResponse> {
    let cars = state
        .storage()
        .cars()
        .list_with_owners()
        .await
        .map_err(storage_problem)?;

    Ok(Json(cars.into_iter().map(CarDto::from).collect()))
}

/// POST /api/cars
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateCarRequest>,
) -> Result<Response, ProblemResponse> {
    let vin = request.vin.trim();
    if vin.is_empty() {
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_vin",
            "vin must not be empty",
        ));
    }

    if state
        .storage()
        .cars()
        .vin_exists(vin)
        .await
        .map_err(storage_problem)?
    {
        return Err(ProblemResponse::new(
            StatusCode::CONFLICT,
            "duplicate_vin",
            format!("car with VIN {vin} is already registered"),
        ));
    }
    if !state
        .storage()
        .owners()
        .exists(request.owner_id)
        .await
        .map_err(storage_problem)?
    {
        return Err(ProblemResponse::not_found(
            "owner_not_found",
            format!("owner {} not found", request.owner_id),
        ));
    }

    let created = state
        .storage()
        .cars()
        .insert(NewCar {
            vin,
            make: request.make.as_deref(),
            model: request.model.as_deref(),
            year_of_manufacture: request.year,
            owner_id: request.owner_id,
        })
        .await;

    match created {
        Ok(id) => {
            counter!("api_cars_created_total").increment(1);
            Ok((
                StatusCode::CREATED,
                Json(CarCreatedResponse {
                    id,
                    vin: vin.to_string(),
                }),
            )
                .into_response())
        }
        Err(CarError::DuplicateVin) => Err(ProblemResponse::new(
            StatusCode::CONFLICT,
            "duplicate_vin",
            format!("car with VIN {vin} is already registered"),
        )),
        Err(CarError::MissingOwner) => Err(ProblemResponse::not_found(
            "owner_not_found",
            format!("owner {} not found", request.owner_id),
        )),
        Err(err) => Err(storage_problem(err)),
    }
}

/// GET /api/cars/{carId}/insurance-valid?date=YYYY-MM-DD
pub async fn insurance_valid(
    State(state): State<AppState>,
    Path(car_id): Path<i64>,
    Query(query): Query<ValidityQuery>,
) -> Result<Json<InsuranceValidityResponse>, ProblemResponse> {
    let raw = query.date.as_deref().ok_or_else(|| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "missing_date",
            "date query parameter is required",
        )
    })?;
    let date = parse_iso_date(raw).ok_or_else(|| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_date",
            "invalid date format, use YYYY-MM-DD",
        )
    })?;

    ensure_car_exists(&state, car_id).await?;

    let valid = state
        .storage()
        .policies()
        .has_active_on(car_id, date)
        .await
        .map_err(storage_problem)?;

    Ok(Json(InsuranceValidityResponse {
        car_id,
        date: date.to_string(),
        valid,
    }))
}

/// POST /api/cars/{carId}/claims
pub async fn register_claim(
    State(state): State<AppState>,
    Path(car_id): Path<i64>,
    Json(request): Json<CreateClaimRequest>,
) -> Result<Response, ProblemResponse> {
    let description = request.description.trim();
    if description.is_empty() || description.len() > MAX_CLAIM_DESCRIPTION_LEN {
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_description",
            format!("description must be between 1 and {MAX_CLAIM_DESCRIPTION_LEN} characters"),
        ));
    }

    ensure_car_exists(&state, car_id).await?;

    let claim = state
        .storage()
        .claims()
        .insert(NewClaim {
            car_id,
            claim_date: request.claim_date,
            description,
            amount: request.amount,
        })
        .await
        .map_err(storage_problem)?;

    counter!("api_claims_created_total").increment(1);
    Ok((StatusCode::CREATED, Json(ClaimDto::from(claim))).into_response())
}

/// GET /api/cars/{carId}/history
pub async fn history(
    State(state): State<AppState>,
    Path(car_id): Path<i64>,
) -> Result<Json<CarHistoryDto>, ProblemResponse> {
    ensure_car_exists(&state, car_id).await?;

    let policies = state
        .storage()
        .policies()
        .list_for_car(car_id)
        .await
        .map_err(storage_problem)?;
    let claims = state
        .storage()
        .claims()
        .list_for_car(car_id)
        .await
        .map_err(storage_problem)?;

    Ok(Json(CarHistoryDto {
        car_id,
        policies: policies.into_iter().map(PolicyPeriodDto::from).collect(),
        claims: claims.into_iter().map(ClaimDto::from).collect(),
    }))
}

async fn ensure_car_exists(state: &AppState, car_id: i64) -> Result<(), ProblemResponse> {
    let exists = state
        .storage()
        .cars()
        .exists(car_id)
        .await
        .map_err(storage_problem)?;

    if exists {
        Ok(())
    } else {
        Err(ProblemResponse::not_found(
            "car_not_found",
            format!("car {car_id} not found"),
        ))
    }
}

/// Strict `YYYY-MM-DD` parsing. The round trip rejects shorthand inputs
/// such as `2024-1-1` that the parser itself would accept.
fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    (parsed.format("%Y-%m-%d").to_string() == raw).then_some(parsed)
}

fn storage_problem<E: std::fmt::Display>(err: E) -> ProblemResponse {
    error!(stage = "api", error = %err, "storage access failed");
    ProblemResponse::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "storage_error",
        "the storage layer failed",
    )
}
