use crate::auth::config::JwtConfig;
use crate::clock::SharedClock;
use crate::database::entities::UserRecord;
use crate::error::AppError;
use crate::health::{HealthCheckResult, HealthChecker};
use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// `nbf` is backdated so a token is usable on hosts whose clocks lag slightly.
const NOT_BEFORE_SKEW_SECONDS: i64 = 60;

const SESSION_TOKEN_TYPE: &str = "JWT";

/// Claims of a local session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: i32,
    pub username: String,
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Mints session tokens once an identity has been resolved to a local account.
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, user: &UserRecord) -> Result<String, AppError>;

    /// Checks signature, `nbf` and `exp`; issuer and audience are informational.
    fn verify(&self, token: &str) -> Result<SessionClaims, AppError>;
}

#[derive(Clone)]
pub struct JwtTokenIssuer {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: SharedClock,
}

impl JwtTokenIssuer {
    pub fn new(config: JwtConfig, clock: SharedClock) -> Result<Self, AppError> {
        if config.secret.is_empty() {
            return Err(AppError::Configuration("jwt.secret must not be empty".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            config,
            clock,
        })
    }

    pub fn health_checker(&self) -> Arc<JwtHealthChecker> {
        Arc::new(JwtHealthChecker {
            issuer: self.clone(),
        })
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn issue(&self, user: &UserRecord) -> Result<String, AppError> {
        let now = self.clock.now_timestamp();
        let claims = SessionClaims {
            user_id: user.id,
            username: user.username.clone(),
            iss: self.config.issuer.clone(),
            sub: user.username.clone(),
            aud: self.config.audience.clone(),
            iat: now,
            nbf: now - NOT_BEFORE_SKEW_SECONDS,
            exp: now + self.config.expires as i64,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    fn verify(&self, token: &str) -> Result<SessionClaims, AppError> {
        let invalid = || AppError::Unauthorized("Invalid or expired token".to_string());

        // Time claims are checked against the injected clock below
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let token_data =
            decode::<SessionClaims>(token, &self.decoding_key, &validation).map_err(|_| invalid())?;
        if token_data.header.typ.as_deref() != Some(SESSION_TOKEN_TYPE) {
            return Err(invalid());
        }

        let claims = token_data.claims;
        let now = self.clock.now_timestamp();
        if now < claims.nbf || now >= claims.exp {
            return Err(invalid());
        }

        Ok(claims)
    }
}

pub struct JwtHealthChecker {
    issuer: JwtTokenIssuer,
}

#[async_trait]
impl HealthChecker for JwtHealthChecker {
    fn name(&self) -> &str {
        "jwt"
    }

    async fn check(&self) -> HealthCheckResult {
        let probe = UserRecord::new("health-probe").with_id(0);
        let round_trip = self
            .issuer
            .issue(&probe)
            .and_then(|token| self.issuer.verify(&token));

        match round_trip {
            Ok(claims) if claims.username == probe.username => {
                HealthCheckResult::healthy_with_details(serde_json::json!({
                    "algorithm": "HS256",
                    "issuer": self.issuer.config.issuer
                }))
            }
            Ok(_) => HealthCheckResult::unhealthy("token round trip mismatch".to_string()),
            Err(err) => HealthCheckResult::unhealthy(err.to_string()),
        }
    }
}
