use crate::{
    auth::{
        passkey::{
            relying_party_from_headers, AuthenticationChallenge, AuthenticationResponse,
            PasskeyDevice, RegistrationChallenge, RegistrationResponse,
        },
        UserExtractor,
    },
    error::AppError,
    server::Server,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct RegisterBeginRequest {
    #[serde(default)]
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FinishRequest<T> {
    pub nonce: String,
    pub credential: T,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub device_name: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

pub fn create_passkey_routes() -> Router<Server> {
    Router::new()
        .route("/passkey/login/begin", post(login_begin_handler))
        .route("/passkey/login/finish", post(login_finish_handler))
}

pub fn create_protected_passkey_routes() -> Router<Server> {
    Router::new()
        .route("/passkey/register/begin", post(register_begin_handler))
        .route("/passkey/register/finish", post(register_finish_handler))
        .route("/passkeys", get(list_handler))
        .route("/passkeys/{id}", put(rename_handler).delete(delete_handler))
}

pub async fn register_begin_handler(
    State(server): State<Server>,
    UserExtractor(user): UserExtractor,
    headers: HeaderMap,
    Json(request): Json<RegisterBeginRequest>,
) -> Result<Json<RegistrationChallenge>, AppError> {
    let rp = relying_party_from_headers(&headers)?;
    let challenge = server
        .passkey_engine
        .register_begin(user.id, &rp, request.device_name)
        .await?;
    Ok(Json(challenge))
}

pub async fn register_finish_handler(
    State(server): State<Server>,
    UserExtractor(user): UserExtractor,
    headers: HeaderMap,
    Json(request): Json<FinishRequest<RegistrationResponse>>,
) -> Result<Json<PasskeyDevice>, AppError> {
    let rp = relying_party_from_headers(&headers)?;
    let device = server
        .passkey_engine
        .register_finish(user.id, &rp, &request.nonce, &request.credential)
        .await?;
    Ok(Json(device))
}

pub async fn login_begin_handler(
    State(server): State<Server>,
    headers: HeaderMap,
) -> Result<Json<AuthenticationChallenge>, AppError> {
    let rp = relying_party_from_headers(&headers)?;
    Ok(Json(server.passkey_engine.login_begin(&rp).await?))
}

pub async fn login_finish_handler(
    State(server): State<Server>,
    headers: HeaderMap,
    Json(request): Json<FinishRequest<AuthenticationResponse>>,
) -> Result<Json<TokenResponse>, AppError> {
    let rp = relying_party_from_headers(&headers)?;
    let token = server
        .passkey_engine
        .login_finish(&rp, &request.nonce, &request.credential)
        .await?;
    Ok(Json(TokenResponse { token }))
}

pub async fn list_handler(
    State(server): State<Server>,
    UserExtractor(user): UserExtractor,
) -> Result<Json<Vec<PasskeyDevice>>, AppError> {
    Ok(Json(server.passkey_engine.list(user.id).await?))
}

pub async fn rename_handler(
    State(server): State<Server>,
    UserExtractor(user): UserExtractor,
    Path(id): Path<i32>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<PasskeyDevice>, AppError> {
    let device = server
        .passkey_engine
        .rename(user.id, id, &request.device_name)
        .await?;
    Ok(Json(device))
}

pub async fn delete_handler(
    State(server): State<Server>,
    UserExtractor(user): UserExtractor,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    server.passkey_engine.delete(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
