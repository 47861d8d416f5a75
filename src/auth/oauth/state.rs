//! Signed, stateless OAuth `state` parameter.
//!
//! The state carries everything the callback needs (action, caller, redirect,
//! provider, nonce) under an HMAC, so no server-side handshake record is kept.

use crate::clock::SharedClock;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroI32;
use thiserror::Error;

/// OAuth state lifetime (10 minutes)
pub const OAUTH_STATE_TTL_SECONDS: i64 = 600;

/// Distinguishes state tokens from session tokens signed with the same secret
const STATE_TOKEN_TYPE: &str = "oauth-state+jwt";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid state token")]
    InvalidToken,
    #[error("state token expired")]
    Expired,
}

/// What the callback should do once the provider confirms the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthAction {
    Login,
    /// Reserved; no caller produces it.
    Register,
    Bind { user_id: NonZeroI32 },
}

impl OAuthAction {
    fn tag(&self) -> &'static str {
        match self {
            OAuthAction::Login => "login",
            OAuthAction::Register => "register",
            OAuthAction::Bind { .. } => "bind",
        }
    }

    fn user_id(&self) -> i32 {
        match self {
            OAuthAction::Bind { user_id } => user_id.get(),
            _ => 0,
        }
    }

    fn from_claims(action: &str, user_id: i32) -> Result<Self, StateError> {
        match (action, user_id) {
            ("login", 0) => Ok(OAuthAction::Login),
            ("register", 0) => Ok(OAuthAction::Register),
            ("bind", id) => NonZeroI32::new(id)
                .map(|user_id| OAuthAction::Bind { user_id })
                .ok_or(StateError::InvalidToken),
            _ => Err(StateError::InvalidToken),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateClaims {
    action: String,
    user_id: i32,
    nonce: String,
    redirect: String,
    provider: String,
    iat: i64,
    exp: i64,
}

/// Decoded and verified state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    pub action: OAuthAction,
    pub nonce: String,
    pub redirect: String,
    pub provider: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct StateTokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: SharedClock,
}

impl StateTokenCodec {
    pub fn new(secret: &str, clock: SharedClock) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            clock,
        }
    }

    /// Returns the token and the fresh nonce embedded in it
    pub fn encode(
        &self,
        action: OAuthAction,
        redirect: &str,
        provider: &str,
    ) -> Result<(String, String), StateError> {
        let nonce = random_nonce();
        let now = self.clock.now_timestamp();
        let claims = StateClaims {
            action: action.tag().to_string(),
            user_id: action.user_id(),
            nonce: nonce.clone(),
            redirect: redirect.to_string(),
            provider: provider.to_string(),
            iat: now,
            exp: now + OAUTH_STATE_TTL_SECONDS,
        };

        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some(STATE_TOKEN_TYPE.to_string());

        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|_| StateError::InvalidToken)?;
        Ok((token, nonce))
    }

    pub fn decode(&self, token: &str) -> Result<OAuthState, StateError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let token_data = decode::<StateClaims>(token, &self.decoding_key, &validation)
            .map_err(|_| StateError::InvalidToken)?;
        if token_data.header.typ.as_deref() != Some(STATE_TOKEN_TYPE) {
            return Err(StateError::InvalidToken);
        }

        let claims = token_data.claims;
        if self.clock.now_timestamp() > claims.exp {
            return Err(StateError::Expired);
        }

        Ok(OAuthState {
            action: OAuthAction::from_claims(&claims.action, claims.user_id)?,
            nonce: claims.nonce,
            redirect: claims.redirect,
            provider: claims.provider,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
