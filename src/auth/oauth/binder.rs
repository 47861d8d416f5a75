use super::providers::ExternalIdentity;
use super::state::OAuthAction;
use crate::{
    auth::jwt::TokenIssuer,
    clock::SharedClock,
    database::{
        entities::{AuthType, ExternalIdentityRecord},
        IdentityKey, UserStore,
    },
    error::AppError,
};
use std::sync::Arc;

/// Outcome of a resolved callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Session token for the account owning the identity
    Session { user_id: i32, token: String },
    Bound(ExternalIdentityRecord),
}

/// Maps a provider-normalized identity onto a local account.
///
/// Login only ever looks bindings up; accounts are never created here.
#[derive(Clone)]
pub struct IdentityBinder {
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn TokenIssuer>,
    clock: SharedClock,
}

impl IdentityBinder {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn TokenIssuer>,
        clock: SharedClock,
    ) -> Self {
        Self {
            users,
            tokens,
            clock,
        }
    }

    pub async fn resolve(
        &self,
        action: OAuthAction,
        identity: &ExternalIdentity,
    ) -> Result<Resolution, AppError> {
        match action {
            OAuthAction::Login => self.login(identity).await,
            OAuthAction::Bind { user_id } => self
                .bind(user_id.get(), identity)
                .await
                .map(Resolution::Bound),
            OAuthAction::Register => Err(AppError::Validation(
                "registration through an external provider is not supported".to_string(),
            )),
        }
    }

    async fn login(&self, identity: &ExternalIdentity) -> Result<Resolution, AppError> {
        let binding = self
            .users
            .find_by_external_identity(&key(identity))
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no account is bound to this {} identity",
                    identity.provider
                ))
            })?;

        let user = self
            .users
            .get_by_id(binding.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("bound account no longer exists".to_string()))?;

        let token = self.tokens.issue(&user)?;
        tracing::info!(user_id = user.id, provider = %identity.provider, "OAuth login");
        Ok(Resolution::Session {
            user_id: user.id,
            token,
        })
    }

    /// Only administrators may attach an external identity to their account.
    pub async fn bind(
        &self,
        caller_user_id: i32,
        identity: &ExternalIdentity,
    ) -> Result<ExternalIdentityRecord, AppError> {
        self.require_admin(caller_user_id, &identity.provider).await?;

        let record = self
            .users
            .upsert_external_identity(caller_user_id, &key(identity), self.clock.now())
            .await?;
        tracing::info!(
            user_id = caller_user_id,
            provider = %identity.provider,
            "OAuth identity bound"
        );
        Ok(record)
    }

    pub async fn require_admin(&self, user_id: i32, provider: &str) -> Result<(), AppError> {
        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("unknown account".to_string()))?;
        if !user.is_admin {
            return Err(AppError::Forbidden(format!(
                "only administrators may bind a {} account",
                provider
            )));
        }
        Ok(())
    }
}

impl IdentityBinder {
    /// The caller's own binding for a provider slot; administrators only.
    pub async fn binding(
        &self,
        caller_user_id: i32,
        provider: &str,
        issuer: &str,
        auth_type: AuthType,
    ) -> Result<ExternalIdentityRecord, AppError> {
        self.require_admin(caller_user_id, provider).await?;
        self.users
            .find_binding(caller_user_id, provider, issuer, auth_type)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no {} account is bound", provider)))
    }
}

fn key(identity: &ExternalIdentity) -> IdentityKey<'_> {
    IdentityKey {
        provider: &identity.provider,
        external_id: &identity.external_id,
        issuer: &identity.issuer,
        auth_type: identity.auth_type,
    }
}
