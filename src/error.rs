use crate::auth::oauth::state::StateError;
use crate::auth::oidc::OidcError;
use crate::auth::passkey::CeremonyError;
use crate::cache::CacheError;
use crate::database::DatabaseError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Coarse error classes callers are expected to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Validation,
    Session,
    Authorization,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Transport => "transport_error",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Session => "session_error",
            ErrorKind::Authorization => "authorization_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal_error",
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    Config(config::ConfigError),
    Configuration(String),
    Transport(String),
    Validation(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Jwt(jsonwebtoken::errors::Error),
    State(StateError),
    Oidc(OidcError),
    Ceremony(CeremonyError),
    Database(DatabaseError),
    Cache(CacheError),
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Config(_) | AppError::Configuration(_) => ErrorKind::Configuration,
            AppError::Transport(_) => ErrorKind::Transport,
            AppError::Validation(_) | AppError::State(_) => ErrorKind::Validation,
            AppError::Unauthorized(_) | AppError::Forbidden(_) => ErrorKind::Authorization,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Oidc(err) => match err {
                OidcError::JwksFetch(_) => ErrorKind::Transport,
                _ => ErrorKind::Validation,
            },
            AppError::Ceremony(err) => match err {
                CeremonyError::InvalidSession | CeremonyError::OriginMismatch { .. } => {
                    ErrorKind::Session
                }
                _ => ErrorKind::Validation,
            },
            AppError::Database(err) => match err {
                DatabaseError::NotFound => ErrorKind::NotFound,
                DatabaseError::Constraint(_) => ErrorKind::Validation,
                _ => ErrorKind::Internal,
            },
            AppError::Jwt(_) | AppError::Cache(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => match self.kind() {
                // Runtime configuration errors come from requests naming an unknown,
                // disabled or incomplete provider.
                ErrorKind::Configuration => StatusCode::BAD_REQUEST,
                ErrorKind::Transport => StatusCode::BAD_GATEWAY,
                ErrorKind::Validation | ErrorKind::Session => StatusCode::BAD_REQUEST,
                ErrorKind::Authorization => StatusCode::FORBIDDEN,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "Configuration error: {}", err),
            AppError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Transport(msg) => write!(f, "Transport error: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Jwt(err) => write!(f, "JWT error: {}", err),
            AppError::State(err) => write!(f, "OAuth state error: {}", err),
            AppError::Oidc(err) => write!(f, "ID token error: {}", err),
            AppError::Ceremony(err) => write!(f, "Passkey error: {}", err),
            AppError::Database(err) => write!(f, "Database error: {}", err),
            AppError::Cache(err) => write!(f, "Cache error: {}", err),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::Jwt(err)
    }
}

impl From<StateError> for AppError {
    fn from(err: StateError) -> Self {
        AppError::State(err)
    }
}

impl From<OidcError> for AppError {
    fn from(err: OidcError) -> Self {
        AppError::Oidc(err)
    }
}

impl From<CeremonyError> for AppError {
    fn from(err: CeremonyError) -> Self {
        AppError::Ceremony(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::Database(err)
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::Cache(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = match kind {
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        if kind == ErrorKind::Internal {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": kind.label(),
            "message": message
        }));

        (status, body).into_response()
    }
}
