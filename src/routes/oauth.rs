use crate::{
    auth::{
        oauth::{BindingInfo, ProvidersResponse},
        UserExtractor,
    },
    error::AppError,
    server::Server,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct LoginQuery {
    pub redirect_uri: Option<String>,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denied access
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct BindRequest {
    pub redirect_uri: String,
}

#[derive(Serialize)]
pub struct AuthorizeUrlResponse {
    pub url: String,
}

pub fn create_oauth_routes() -> Router<Server> {
    Router::new()
        .route("/providers", get(providers_handler))
        .route("/oauth/{provider}/login", get(login_handler))
        .route("/oauth/{provider}/callback", get(callback_handler))
}

pub fn create_protected_oauth_routes() -> Router<Server> {
    Router::new()
        .route("/oauth/{provider}/bind", post(bind_handler))
        .route("/oauth/{provider}/info", get(info_handler))
}

pub async fn providers_handler(State(server): State<Server>) -> Json<ProvidersResponse> {
    Json(server.oauth_service.list_providers())
}

pub async fn login_handler(
    State(server): State<Server>,
    Path(provider): Path<String>,
    Query(params): Query<LoginQuery>,
) -> Result<Response, AppError> {
    let redirect_uri = params
        .redirect_uri
        .ok_or_else(|| AppError::Validation("redirect_uri is required".to_string()))?;
    let url = server.oauth_service.begin_login(&provider, &redirect_uri)?;
    found(&url)
}

/// Always answers with a redirect: to the caller's page on success, to the
/// configured failure page otherwise.
pub async fn callback_handler(
    State(server): State<Server>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    let target = match (params.error, params.code, params.state) {
        (None, Some(code), Some(state)) => {
            server
                .oauth_service
                .handle_callback(&provider, &code, &state)
                .await
        }
        (error, _, _) => {
            tracing::warn!(
                provider = %provider,
                provider_error = error.as_deref().unwrap_or("missing code or state"),
                "OAuth callback failed"
            );
            String::new()
        }
    };

    if target.is_empty() {
        found(server.oauth_service.failure_redirect())
    } else {
        found(&target)
    }
}

pub async fn bind_handler(
    State(server): State<Server>,
    Path(provider): Path<String>,
    UserExtractor(user): UserExtractor,
    Json(request): Json<BindRequest>,
) -> Result<Json<AuthorizeUrlResponse>, AppError> {
    let url = server
        .oauth_service
        .begin_bind(user.id, &provider, &request.redirect_uri)
        .await?;
    Ok(Json(AuthorizeUrlResponse { url }))
}

pub async fn info_handler(
    State(server): State<Server>,
    Path(provider): Path<String>,
    UserExtractor(user): UserExtractor,
) -> Result<Json<BindingInfo>, AppError> {
    let info = server
        .oauth_service
        .get_binding_info(user.id, &provider)
        .await?;
    Ok(Json(info))
}

/// `302 Found`; axum's `Redirect::to` answers `303`.
fn found(location: &str) -> Result<Response, AppError> {
    let location = HeaderValue::from_str(location)
        .map_err(|_| AppError::Internal("redirect target is not a valid header".to_string()))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}
