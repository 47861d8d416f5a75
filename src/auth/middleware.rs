use crate::database::entities::UserRecord;
use crate::database::DatabaseManager;
use crate::error::AppError;
use crate::server::Server;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::{trace, warn};

/// Bearer session token authentication.
///
/// Verifies the token, loads the user it names and makes both the `UserRecord` and
/// the `SessionClaims` available to downstream handlers.
pub async fn auth_middleware(
    State(server): State<Server>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request)?;
    let claims = server.token_issuer.verify(token)?;

    let user = server
        .database
        .users()
        .find_by_id(claims.user_id)
        .await?
        .ok_or_else(|| {
            warn!(user_id = claims.user_id, "session token names an unknown user");
            AppError::Unauthorized("User not found".to_string())
        })?;

    trace!(user_id = user.id, "session authenticated");
    request.extensions_mut().insert(claims);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn bearer_token(request: &Request) -> Result<&str, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid Authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization format".to_string()))
}

/// Custom extractor for the authenticated `UserRecord`
pub struct UserExtractor(pub UserRecord);

impl<S> FromRequestParts<S> for UserExtractor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserRecord>()
            .cloned()
            .map(UserExtractor)
            .ok_or_else(|| AppError::Unauthorized("Missing user authentication".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{SessionClaims, TokenIssuer};
    use crate::database::DatabaseManager;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    async fn whoami(UserExtractor(user): UserExtractor, Extension(claims): Extension<SessionClaims>) -> String {
        format!("{}:{}", user.username, claims.user_id)
    }

    async fn app() -> (Server, Router) {
        let server = crate::test_utils::TestServerBuilder::new().build().await;
        let router = Router::new()
            .route("/me", get(whoami))
            .layer(middleware::from_fn_with_state(server.clone(), auth_middleware))
            .with_state(server.clone());
        (server, router)
    }

    async fn status_with(router: Router, authorization: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/me");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        let response = router.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn test_valid_token_loads_user() {
        let (server, router) = app().await;
        let user = server.database.users().create("alice", false).await.unwrap();
        let token = server.token_issuer.issue(&user).unwrap();

        let (status, body) = status_with(router, Some(&format!("Bearer {}", token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("alice:{}", user.id));
    }

    #[tokio::test]
    async fn test_missing_or_malformed_credentials() {
        let (_server, router) = app().await;
        assert_eq!(status_with(router.clone(), None).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_with(router.clone(), Some("Basic abc")).await.0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_with(router.clone(), Some("Bearer ")).await.0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_with(router, Some("Bearer not-a-jwt")).await.0,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_token_for_unknown_user_rejected() {
        let (server, router) = app().await;
        let ghost = UserRecord::new("ghost").with_id(404);
        let token = server.token_issuer.issue(&ghost).unwrap();

        let (status, _) = status_with(router, Some(&format!("Bearer {}", token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
