use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::domain::{CarId, ClaimId, PolicyId};
use super::pagination::{PageQuery, PageRequest};
use super::repository::{InsuranceRepository, RepositoryError};
use super::service::{InsuranceService, ServiceError};
use super::validation::{CarInput, ClaimInput, PolicyInput};

/// HTTP-facing error: service failures plus malformed requests.
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    MalformedBody(String),
    UnknownPath,
}

impl From<ServiceError> for ApiError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        Self::MalformedBody(value.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        Self::UnknownPath
    }
}

impl From<super::pagination::InvalidPage> for ApiError {
    fn from(value: super::pagination::InvalidPage) -> Self {
        Self::Service(ServiceError::InvalidPage(value))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::MalformedBody(detail) => (StatusCode::BAD_REQUEST, json!({ "detail": detail })),
            ApiError::UnknownPath => (StatusCode::NOT_FOUND, json!({ "detail": "Not found." })),
            ApiError::Service(ServiceError::Validation(errors)) => (
                StatusCode::BAD_REQUEST,
                json!({ "detail": errors.detail(), "errors": errors.errors() }),
            ),
            ApiError::Service(err @ ServiceError::NotFound(_))
            | ApiError::Service(err @ ServiceError::InvalidPage(_)) => {
                (StatusCode::NOT_FOUND, json!({ "detail": err.to_string() }))
            }
            ApiError::Service(ServiceError::Repository(RepositoryError::Conflict(detail))) => {
                (StatusCode::CONFLICT, json!({ "detail": detail }))
            }
            ApiError::Service(ServiceError::Repository(RepositoryError::NotFound)) => {
                (StatusCode::NOT_FOUND, json!({ "detail": "Not found." }))
            }
            ApiError::Service(ServiceError::Repository(err)) => {
                error!(error = %err, "repository failure while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": "A server error occurred." }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Router builder exposing the car, policy and claim endpoints.
pub fn insurance_router<R>(service: InsuranceService<R>) -> Router
where
    R: InsuranceRepository + 'static,
{
    Router::new()
        .route("/health", get(health_handler::<R>))
        .route(
            "/api/cars",
            get(list_cars_handler::<R>).post(create_car_handler::<R>),
        )
        .route(
            "/api/cars/:car_id",
            get(get_car_handler::<R>)
                .put(update_car_handler::<R>)
                .patch(patch_car_handler::<R>)
                .delete(delete_car_handler::<R>),
        )
        .route(
            "/api/cars/:car_id/policies",
            axum::routing::post(create_policy_handler::<R>),
        )
        .route(
            "/api/cars/:car_id/claims",
            axum::routing::post(create_claim_handler::<R>),
        )
        .route(
            "/api/cars/:car_id/insurance-valid",
            get(insurance_valid_handler::<R>),
        )
        .route("/api/cars/:car_id/history", get(history_handler::<R>))
        .route("/api/policies", get(list_policies_handler::<R>))
        .route(
            "/api/policies/:policy_id",
            get(get_policy_handler::<R>)
                .put(update_policy_handler::<R>)
                .patch(patch_policy_handler::<R>)
                .delete(delete_policy_handler::<R>),
        )
        .route("/api/claims", get(list_claims_handler::<R>))
        .route(
            "/api/claims/:claim_id",
            get(get_claim_handler::<R>)
                .put(update_claim_handler::<R>)
                .patch(patch_claim_handler::<R>)
                .delete(delete_claim_handler::<R>),
        )
        .route("/api/expiry-logs", get(expiry_log_handler::<R>))
        .with_state(service)
}

fn created<T: serde::Serialize>(location: String, body: T) -> Response {
    (
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(body),
    )
        .into_response()
}

pub(crate) async fn health_handler<R>(State(service): State<InsuranceService<R>>) -> Response
where
    R: InsuranceRepository + 'static,
{
    let database = match service.repository().ping().await {
        Ok(()) => "ok",
        Err(err) => {
            error!(error = %err, "database health check failed");
            "error"
        }
    };
    Json(json!({ "status": "ok", "database": database })).into_response()
}

pub(crate) async fn list_cars_handler<R>(
    State(service): State<InsuranceService<R>>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let request = PageRequest::from_query(&query)?;
    let page = service.list_cars(request).await?;
    Ok(Json(page).into_response())
}

pub(crate) async fn create_car_handler<R>(
    State(service): State<InsuranceService<R>>,
    payload: Result<Json<CarInput>, JsonRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Json(car) = payload?;
    let car = service.create_car(car).await?;
    Ok(created(format!("/api/cars/{}", car.id), car))
}

pub(crate) async fn get_car_handler<R>(
    State(service): State<InsuranceService<R>>,
    car_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(car_id) = car_id?;
    let car = service.get_car(CarId(car_id)).await?;
    Ok(Json(car).into_response())
}

pub(crate) async fn update_car_handler<R>(
    State(service): State<InsuranceService<R>>,
    car_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CarInput>, JsonRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(car_id) = car_id?;
    let Json(car) = payload?;
    let car = service.update_car(CarId(car_id), car).await?;
    Ok(Json(car).into_response())
}

pub(crate) async fn patch_car_handler<R>(
    State(service): State<InsuranceService<R>>,
    car_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CarInput>, JsonRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(car_id) = car_id?;
    let Json(changes) = payload?;
    let car = service.patch_car(CarId(car_id), changes).await?;
    Ok(Json(car).into_response())
}

pub(crate) async fn delete_car_handler<R>(
    State(service): State<InsuranceService<R>>,
    car_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(car_id) = car_id?;
    service.delete_car(CarId(car_id)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) async fn create_policy_handler<R>(
    State(service): State<InsuranceService<R>>,
    car_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<PolicyInput>, JsonRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(car_id) = car_id?;
    let car_id = CarId(car_id);
    let Json(policy) = payload?;
    let policy = service.create_policy(car_id, policy).await?;
    Ok(created(
        format!("/api/cars/{car_id}/policies/{}", policy.id),
        policy,
    ))
}

pub(crate) async fn create_claim_handler<R>(
    State(service): State<InsuranceService<R>>,
    car_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ClaimInput>, JsonRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(car_id) = car_id?;
    let car_id = CarId(car_id);
    let Json(claim) = payload?;
    let claim = service.create_claim(car_id, claim).await?;
    Ok(created(
        format!("/api/cars/{car_id}/claims/{}", claim.id),
        claim,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ValidityQuery {
    #[serde(default)]
    date: Option<String>,
}

pub(crate) async fn insurance_valid_handler<R>(
    State(service): State<InsuranceService<R>>,
    car_id: Result<Path<i64>, PathRejection>,
    Query(query): Query<ValidityQuery>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(car_id) = car_id?;
    let validity = service
        .insurance_validity(CarId(car_id), query.date.as_deref())
        .await?;
    Ok(Json(validity).into_response())
}

pub(crate) async fn history_handler<R>(
    State(service): State<InsuranceService<R>>,
    car_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(car_id) = car_id?;
    let history = service.car_history(CarId(car_id)).await?;
    Ok(Json(history).into_response())
}

pub(crate) async fn list_policies_handler<R>(
    State(service): State<InsuranceService<R>>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let request = PageRequest::from_query(&query)?;
    let page = service.list_policies(request).await?;
    Ok(Json(page).into_response())
}

pub(crate) async fn get_policy_handler<R>(
    State(service): State<InsuranceService<R>>,
    policy_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(policy_id) = policy_id?;
    let policy = service.get_policy(PolicyId(policy_id)).await?;
    Ok(Json(policy).into_response())
}

pub(crate) async fn update_policy_handler<R>(
    State(service): State<InsuranceService<R>>,
    policy_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<PolicyInput>, JsonRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(policy_id) = policy_id?;
    let Json(policy) = payload?;
    let policy = service.update_policy(PolicyId(policy_id), policy).await?;
    Ok(Json(policy).into_response())
}

pub(crate) async fn patch_policy_handler<R>(
    State(service): State<InsuranceService<R>>,
    policy_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<PolicyInput>, JsonRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(policy_id) = policy_id?;
    let Json(changes) = payload?;
    let policy = service.patch_policy(PolicyId(policy_id), changes).await?;
    Ok(Json(policy).into_response())
}

pub(crate) async fn delete_policy_handler<R>(
    State(service): State<InsuranceService<R>>,
    policy_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(policy_id) = policy_id?;
    service.delete_policy(PolicyId(policy_id)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) async fn list_claims_handler<R>(
    State(service): State<InsuranceService<R>>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let request = PageRequest::from_query(&query)?;
    let page = service.list_claims(request).await?;
    Ok(Json(page).into_response())
}

pub(crate) async fn get_claim_handler<R>(
    State(service): State<InsuranceService<R>>,
    claim_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(claim_id) = claim_id?;
    let claim = service.get_claim(ClaimId(claim_id)).await?;
    Ok(Json(claim).into_response())
}

pub(crate) async fn update_claim_handler<R>(
    State(service): State<InsuranceService<R>>,
    claim_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ClaimInput>, JsonRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(claim_id) = claim_id?;
    let Json(claim) = payload?;
    let claim = service.update_claim(ClaimId(claim_id), claim).await?;
    Ok(Json(claim).into_response())
}

pub(crate) async fn patch_claim_handler<R>(
    State(service): State<InsuranceService<R>>,
    claim_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ClaimInput>, JsonRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(claim_id) = claim_id?;
    let Json(changes) = payload?;
    let claim = service.patch_claim(ClaimId(claim_id), changes).await?;
    Ok(Json(claim).into_response())
}

pub(crate) async fn delete_claim_handler<R>(
    State(service): State<InsuranceService<R>>,
    claim_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let Path(claim_id) = claim_id?;
    service.delete_claim(ClaimId(claim_id)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) async fn expiry_log_handler<R>(
    State(service): State<InsuranceService<R>>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Response>
where
    R: InsuranceRepository + 'static,
{
    let request = PageRequest::from_query(&query)?;
    let page = service.list_expiry_log(request).await?;
    Ok(Json(page).into_response())
}
