use super::{
    binder::{IdentityBinder, Resolution},
    providers::{create_adapter, get_display_name, ProviderAdapter},
    state::{OAuthAction, StateTokenCodec},
};
use crate::{
    auth::{
        config::{apply_predefined_provider_defaults, OAuthConfig},
        oidc::OidcVerifier,
    },
    clock::SharedClock,
    error::AppError,
};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    num::NonZeroI32,
    sync::Arc,
};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderInfo>,
}

/// The caller's binding to one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingInfo {
    pub provider: String,
    pub user_id: i32,
    pub external_id: String,
    pub issuer: String,
    pub auth_type: String,
}

/// OAuth flows exposed to the HTTP layer: authorize URLs out, callbacks in.
pub struct OAuthService {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    disabled: HashSet<String>,
    providers: Vec<ProviderInfo>,
    allowed_redirect_hosts: Vec<String>,
    failure_redirect: String,
    state: StateTokenCodec,
    binder: IdentityBinder,
}

impl OAuthService {
    /// Providers that are disabled or incompletely configured are left out and
    /// rejected per request with a configuration error.
    pub fn new(
        config: &OAuthConfig,
        state_secret: &str,
        http: reqwest::Client,
        oidc: OidcVerifier,
        binder: IdentityBinder,
        clock: SharedClock,
    ) -> Self {
        let mut adapters = HashMap::new();
        let mut disabled = HashSet::new();
        let mut providers = Vec::new();

        for (name, provider) in &config.providers {
            if !provider.enabled {
                disabled.insert(name.clone());
                continue;
            }

            let mut provider = provider.clone();
            apply_predefined_provider_defaults(provider.resolved_kind(name), &mut provider);

            match create_adapter(name, &provider, http.clone(), oidc.clone()) {
                Ok(adapter) => {
                    providers.push(ProviderInfo {
                        name: name.clone(),
                        display_name: get_display_name(name, &provider),
                    });
                    adapters.insert(name.clone(), adapter);
                }
                Err(err) => {
                    tracing::warn!(provider = %name, error = %err, "OAuth provider unusable");
                }
            }
        }
        providers.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            adapters,
            disabled,
            providers,
            allowed_redirect_hosts: config.allowed_redirect_hosts.clone(),
            failure_redirect: config.failure_redirect.clone(),
            state: StateTokenCodec::new(state_secret, clock),
            binder,
        }
    }

    pub fn list_providers(&self) -> ProvidersResponse {
        ProvidersResponse {
            providers: self.providers.clone(),
        }
    }

    /// Where the HTTP layer sends a browser whose callback failed
    pub fn failure_redirect(&self) -> &str {
        &self.failure_redirect
    }

    fn adapter(&self, provider: &str) -> Result<&Arc<dyn ProviderAdapter>, AppError> {
        self.adapters.get(provider).ok_or_else(|| {
            if self.disabled.contains(provider) {
                AppError::Configuration(format!("OAuth provider '{}' is not enabled", provider))
            } else {
                AppError::Configuration(format!("OAuth provider '{}' is not configured", provider))
            }
        })
    }

    /// Absolute http(s) URL, on an allowed host when a list is configured.
    fn validate_redirect(&self, redirect: &str) -> Result<(), AppError> {
        let invalid = || AppError::Validation("redirect_uri must be an absolute http(s) URL".into());

        let url = Url::parse(redirect).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid());
        }
        let host = url.host_str().ok_or_else(invalid)?;

        if !self.allowed_redirect_hosts.is_empty()
            && !self
                .allowed_redirect_hosts
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(host))
        {
            return Err(AppError::Validation(format!(
                "redirect host '{}' is not allowed",
                host
            )));
        }
        Ok(())
    }

    fn authorize(
        &self,
        provider: &str,
        action: OAuthAction,
        redirect: &str,
    ) -> Result<String, AppError> {
        let adapter = self.adapter(provider)?;
        self.validate_redirect(redirect)?;

        let (state, nonce) = self.state.encode(action, redirect, provider)?;
        adapter.authorize_url(&state, &nonce)
    }

    pub fn begin_login(&self, provider: &str, redirect: &str) -> Result<String, AppError> {
        self.authorize(provider, OAuthAction::Login, redirect)
    }

    pub async fn begin_bind(
        &self,
        caller_user_id: i32,
        provider: &str,
        redirect: &str,
    ) -> Result<String, AppError> {
        let user_id = NonZeroI32::new(caller_user_id)
            .ok_or_else(|| AppError::Unauthorized("anonymous caller".to_string()))?;
        self.adapter(provider)?;
        self.binder.require_admin(caller_user_id, provider).await?;

        self.authorize(provider, OAuthAction::Bind { user_id }, redirect)
    }

    /// Returns the URL to send the browser to, or `""` when the callback failed.
    /// Failures are logged, never surfaced.
    pub async fn handle_callback(&self, provider: &str, code: &str, state: &str) -> String {
        match self.complete_callback(provider, code, state).await {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(
                    provider,
                    error_kind = err.kind().label(),
                    error = %err,
                    "OAuth callback failed"
                );
                String::new()
            }
        }
    }

    async fn complete_callback(
        &self,
        provider: &str,
        code: &str,
        state: &str,
    ) -> Result<String, AppError> {
        let adapter = self.adapter(provider)?;
        let state = self.state.decode(state)?;
        if state.provider != provider {
            return Err(AppError::Validation(
                "state was issued for another provider".to_string(),
            ));
        }
        if code.is_empty() {
            return Err(AppError::Validation("missing authorization code".to_string()));
        }

        let tokens = adapter.exchange_code(code).await?;
        let identity = adapter.fetch_identity(&tokens, Some(&state.nonce)).await?;

        match self.binder.resolve(state.action, &identity).await? {
            Resolution::Session { token, .. } => set_query_param(&state.redirect, "token", &token),
            Resolution::Bound(_) => set_query_param(&state.redirect, "bind", "success"),
        }
    }

    pub async fn get_binding_info(
        &self,
        caller_user_id: i32,
        provider: &str,
    ) -> Result<BindingInfo, AppError> {
        let adapter = self.adapter(provider)?;
        let (issuer, auth_type) = adapter.binding_slot();

        let record = self
            .binder
            .binding(caller_user_id, provider, issuer, auth_type)
            .await?;
        Ok(BindingInfo {
            provider: record.provider,
            user_id: record.user_id,
            external_id: record.external_id,
            issuer: record.issuer,
            auth_type: record.auth_type.to_string(),
        })
    }
}

/// Replace any existing `key` in the query with `value`
fn set_query_param(redirect: &str, key: &str, value: &str) -> Result<String, AppError> {
    let mut url = Url::parse(redirect)
        .map_err(|_| AppError::Validation("state carries an invalid redirect".to_string()))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(key, value);

    Ok(url.to_string())
}
