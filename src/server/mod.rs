use crate::{
    auth::{
        jwt::{JwtTokenIssuer, TokenIssuer},
        middleware::auth_middleware,
        oauth::{build_http_client, IdentityBinder, OAuthService},
        oidc::{
            jwks::{CachedJwksFetcher, HttpJwksFetcher, JwksFetcher},
            OidcVerifier,
        },
        passkey::PasskeyEngine,
    },
    cache::CacheManager,
    clock::{system_clock, SharedClock},
    config::Config,
    database::{DatabaseManager, DatabaseManagerImpl},
    error::AppError,
    health::HealthService,
    routes::{
        create_health_routes, create_oauth_routes, create_passkey_routes,
        create_protected_oauth_routes, create_protected_passkey_routes,
    },
};
use axum::{extract::DefaultBodyLimit, middleware, Router};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// WebAuthn payloads are a few kilobytes; nothing else here takes a body.
const MAX_BODY_SIZE: usize = 64 * 1024;
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Server {
    pub config: Arc<Config>,
    pub clock: SharedClock,
    pub database: Arc<DatabaseManagerImpl>,
    pub cache: CacheManager,
    pub token_issuer: Arc<dyn TokenIssuer>,
    pub oauth_service: Arc<OAuthService>,
    pub passkey_engine: Arc<PasskeyEngine>,
    pub health_service: Arc<HealthService>,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self, AppError> {
        let clock = system_clock();

        let database = DatabaseManagerImpl::new_from_config(&config.database).await?;
        if config.database.migration_on_startup {
            info!("Running database migrations");
            database.migrate().await?;
        }

        let cache = CacheManager::new_from_config(&config.cache, clock.clone()).await?;

        Self::from_parts(config, clock, Arc::new(database), cache)
    }

    /// Wire the services over already constructed storage and clock.
    pub fn from_parts(
        config: Config,
        clock: SharedClock,
        database: Arc<DatabaseManagerImpl>,
        cache: CacheManager,
    ) -> Result<Self, AppError> {
        let jwt_issuer = JwtTokenIssuer::new(config.jwt.clone(), clock.clone())?;
        let token_issuer: Arc<dyn TokenIssuer> = Arc::new(jwt_issuer.clone());

        let http = build_http_client(config.http.timeout())?;
        let jwks: Arc<dyn JwksFetcher> = Arc::new(CachedJwksFetcher::new(
            Arc::new(HttpJwksFetcher::with_client(http.clone())),
            Duration::from_secs(config.oidc.jwks_cache_ttl),
            clock.clone(),
        ));
        let oidc = OidcVerifier::new(jwks, clock.clone());

        let binder = IdentityBinder::new(database.clone(), token_issuer.clone(), clock.clone());
        let oauth_service = Arc::new(OAuthService::new(
            &config.oauth,
            &config.jwt.secret,
            http,
            oidc,
            binder,
            clock.clone(),
        ));

        let passkey_engine = Arc::new(PasskeyEngine::new(
            config.passkey.clone(),
            &cache,
            database.clone(),
            database.clone(),
            token_issuer.clone(),
            clock.clone(),
        ));

        let mut health_service = HealthService::new();
        health_service.register(Arc::new(cache.clone()));
        health_service.register(database.clone());
        health_service.register(jwt_issuer.health_checker());

        Ok(Self {
            config: Arc::new(config),
            clock,
            database,
            cache,
            token_issuer,
            oauth_service,
            passkey_engine,
            health_service: Arc::new(health_service),
        })
    }

    pub async fn run(&self) -> Result<(), AppError> {
        let purge = self.spawn_cache_purge();
        let app = self.create_app();

        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| AppError::Configuration(format!("Invalid listen address: {}", e)))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to bind to address: {}", e)))?;

        info!("Server listening on http://{}", addr);

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
                info!("Graceful shutdown initiated");
            })
            .await;

        purge.abort();
        result.map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;
        info!("Server shutdown complete");
        Ok(())
    }

    /// Expired ceremony sessions in the memory backend are only dropped when read;
    /// sweep the rest periodically.
    fn spawn_cache_purge(&self) -> tokio::task::JoinHandle<()> {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                cache.purge_expired();
            }
        })
    }

    // Creates an application router
    pub fn create_app(&self) -> Router {
        Router::new()
            .nest("/auth", create_oauth_routes())
            .nest("/auth", create_passkey_routes())
            .nest("/auth", self.protected_auth_routes())
            .nest("/health", create_health_routes())
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
            .with_state(self.clone())
    }

    /// Routes that need a bearer session token
    fn protected_auth_routes(&self) -> Router<Server> {
        create_protected_oauth_routes()
            .merge(create_protected_passkey_routes())
            .layer(middleware::from_fn_with_state(
                self.clone(),
                auth_middleware,
            ))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestServerBuilder;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_public_routes_without_token() {
        let app = TestServerBuilder::new().build().await.create_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/providers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let server = TestServerBuilder::new().build().await;

        for (method, uri) in [
            ("GET", "/auth/passkeys"),
            ("POST", "/auth/passkey/register/begin"),
            ("DELETE", "/auth/passkeys/1"),
            ("GET", "/auth/oauth/github/info"),
        ] {
            let response = server
                .create_app()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);
        }
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = TestServerBuilder::new().build().await.create_app();
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
