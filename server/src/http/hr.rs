//! Department and employee endpoints. Every route needs a signed-in user.

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::{StatusCode, request::Parts},
    routing::get,
};
use chrono::Utc;
use platform_api::{ApiError, ApiResult};
use products_hr::{
    DepartmentView, EmployeeView, HrError, departments, employees,
    requests::{DepartmentRequest, EmployeeRequest},
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{AppState, RequestUser};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/departments",
            get(list_departments).post(create_department),
        )
        .route(
            "/api/departments/{id}",
            get(get_department)
                .put(update_department)
                .delete(delete_department),
        )
        .route("/api/departments/{id}/employees", get(department_employees))
        .route("/api/employees", get(list_employees).post(create_employee))
        .route(
            "/api/employees/{id}",
            get(get_employee).put(update_employee).delete(delete_employee),
        )
}

/// `{id}` path segment; a malformed UUID is a 400 in the usual error body.
struct RecordId(Uuid);

impl<S: Send + Sync> FromRequestParts<S> for RecordId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(Self(id))
    }
}

/// Rule violations are expected traffic; log them at the edge and map to HTTP.
fn rejected(err: HrError) -> ApiError {
    match &err {
        HrError::Conflict(message) | HrError::InvalidState(message) => {
            warn!(%message, "business rule rejected request");
        }
        HrError::NotFound { entity, id } => warn!(%entity, %id, "record not found"),
        HrError::Validation(fields) => warn!(fields = fields.len(), "request failed validation"),
        HrError::Db(_) => {}
    }
    err.into()
}

#[instrument(skip_all)]
async fn list_departments(
    State(state): State<AppState>,
    _user: RequestUser,
) -> ApiResult<Json<Vec<DepartmentView>>> {
    let views = departments::list(&state.pool).await.map_err(rejected)?;
    Ok(Json(views))
}

#[instrument(skip_all, fields(user_id = %user.id))]
async fn create_department(
    State(state): State<AppState>,
    user: RequestUser,
    body: Result<Json<DepartmentRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DepartmentView>)> {
    let Json(request) = body?;
    let input = request.validate().map_err(rejected)?;
    let view = departments::create(&state.pool, input)
        .await
        .map_err(rejected)?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip_all, fields(department_id = %id))]
async fn get_department(
    State(state): State<AppState>,
    _user: RequestUser,
    RecordId(id): RecordId,
) -> ApiResult<Json<DepartmentView>> {
    let view = departments::get(&state.pool, id).await.map_err(rejected)?;
    Ok(Json(view))
}

#[instrument(skip_all, fields(department_id = %id, user_id = %user.id))]
async fn update_department(
    State(state): State<AppState>,
    user: RequestUser,
    RecordId(id): RecordId,
    body: Result<Json<DepartmentRequest>, JsonRejection>,
) -> ApiResult<Json<DepartmentView>> {
    let Json(request) = body?;
    let input = request.validate().map_err(rejected)?;
    let view = departments::update(&state.pool, id, input)
        .await
        .map_err(rejected)?;
    Ok(Json(view))
}

#[instrument(skip_all, fields(department_id = %id, user_id = %user.id))]
async fn delete_department(
    State(state): State<AppState>,
    user: RequestUser,
    RecordId(id): RecordId,
) -> ApiResult<StatusCode> {
    departments::delete(&state.pool, id)
        .await
        .map_err(rejected)?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, fields(department_id = %id))]
async fn department_employees(
    State(state): State<AppState>,
    _user: RequestUser,
    RecordId(id): RecordId,
) -> ApiResult<Json<Vec<EmployeeView>>> {
    let views = departments::list_employees(&state.pool, id)
        .await
        .map_err(rejected)?;
    Ok(Json(views))
}

#[instrument(skip_all)]
async fn list_employees(
    State(state): State<AppState>,
    _user: RequestUser,
) -> ApiResult<Json<Vec<EmployeeView>>> {
    let views = employees::list(&state.pool).await.map_err(rejected)?;
    Ok(Json(views))
}

#[instrument(skip_all, fields(user_id = %user.id))]
async fn create_employee(
    State(state): State<AppState>,
    user: RequestUser,
    body: Result<Json<EmployeeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<EmployeeView>)> {
    let Json(request) = body?;
    let input = request
        .validate(Utc::now().date_naive())
        .map_err(rejected)?;
    let view = employees::create(&state.pool, input)
        .await
        .map_err(rejected)?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip_all, fields(employee_id = %id))]
async fn get_employee(
    State(state): State<AppState>,
    _user: RequestUser,
    RecordId(id): RecordId,
) -> ApiResult<Json<EmployeeView>> {
    let view = employees::get(&state.pool, id).await.map_err(rejected)?;
    Ok(Json(view))
}

#[instrument(skip_all, fields(employee_id = %id, user_id = %user.id))]
async fn update_employee(
    State(state): State<AppState>,
    user: RequestUser,
    RecordId(id): RecordId,
    body: Result<Json<EmployeeRequest>, JsonRejection>,
) -> ApiResult<Json<EmployeeView>> {
    let Json(request) = body?;
    let input = request
        .validate(Utc::now().date_naive())
        .map_err(rejected)?;
    let view = employees::update(&state.pool, id, input)
        .await
        .map_err(rejected)?;
    Ok(Json(view))
}

#[instrument(skip_all, fields(employee_id = %id, user_id = %user.id))]
async fn delete_employee(
    State(state): State<AppState>,
    user: RequestUser,
    RecordId(id): RecordId,
) -> ApiResult<StatusCode> {
    employees::delete(&state.pool, id).await.map_err(rejected)?;
    Ok(StatusCode::NO_CONTENT)
}
