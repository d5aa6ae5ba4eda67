use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::{
    error::{NestError, Result},
    services::EnrollmentService,
    types::{ApplicationRequest, NebulaCsr, NebulaCsrResponse, OperationMode},
};

pub struct AppState {
    pub enrollment: Arc<EnrollmentService>,
}

/// Unreadable or ill-typed bodies get the same error schema as every other
/// client error.
fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| NestError::BadRequest(rejection.body_text()))
}

/// Same for path parameters that fail to decode.
fn path_hostname(path: std::result::Result<Path<String>, PathRejection>) -> Result<String> {
    path.map(|Path(hostname)| hostname)
        .map_err(|rejection| NestError::BadRequest(rejection.body_text()))
}

/// POST /ncsr - Apply for enrollment with a bootstrap secret
pub async fn apply(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ApplicationRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = body(payload)?;
    info!("Nebula CSR application: hostname={}", req.hostname);

    let location = state.enrollment.apply(&req).await?;

    Ok((StatusCode::CREATED, [(header::LOCATION, location)]))
}

/// GET /ncsr/:hostname - Enrollment status
pub async fn status(
    State(state): State<Arc<AppState>>,
    path: std::result::Result<Path<String>, PathRejection>,
) -> Result<Json<&'static str>> {
    let hostname = path_hostname(path)?;
    let enrollment_state = state.enrollment.status(&hostname).await?;
    Ok(Json(enrollment_state.as_str()))
}

/// POST /ncsr/:hostname/enroll - Sign a client-generated key
pub async fn enroll(
    state: State<Arc<AppState>>,
    path: std::result::Result<Path<String>, PathRejection>,
    payload: std::result::Result<Json<NebulaCsr>, JsonRejection>,
) -> Result<Json<NebulaCsrResponse>> {
    issue(state, path, payload, OperationMode::Enroll).await
}

/// POST /ncsr/:hostname/reenroll - Renew an issued certificate
pub async fn reenroll(
    state: State<Arc<AppState>>,
    path: std::result::Result<Path<String>, PathRejection>,
    payload: std::result::Result<Json<NebulaCsr>, JsonRejection>,
) -> Result<Json<NebulaCsrResponse>> {
    issue(state, path, payload, OperationMode::Reenroll).await
}

/// POST /ncsr/:hostname/serverkeygen - Enroll with a server-generated key
pub async fn serverkeygen(
    state: State<Arc<AppState>>,
    path: std::result::Result<Path<String>, PathRejection>,
    payload: std::result::Result<Json<NebulaCsr>, JsonRejection>,
) -> Result<Json<NebulaCsrResponse>> {
    issue(state, path, payload, OperationMode::Serverkeygen).await
}

async fn issue(
    State(state): State<Arc<AppState>>,
    path: std::result::Result<Path<String>, PathRejection>,
    payload: std::result::Result<Json<NebulaCsr>, JsonRejection>,
    mode: OperationMode,
) -> Result<Json<NebulaCsrResponse>> {
    let hostname = path_hostname(path)?;
    let csr = body(payload)?;
    info!("Nebula {} request: hostname={}", mode, hostname);

    let resp = state.enrollment.issue(&hostname, csr, mode).await?;
    Ok(Json(resp))
}
