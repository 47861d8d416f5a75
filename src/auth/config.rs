use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default = "default_jwt_issuer")]
    pub issuer: String,
    #[serde(default = "default_jwt_audience")]
    pub audience: String,
    /// Session token lifetime in seconds
    #[serde(default = "default_jwt_expires")]
    pub expires: u64,
}

fn default_jwt_issuer() -> String {
    "federated-auth".to_string()
}

fn default_jwt_audience() -> String {
    "federated-auth".to_string()
}

fn default_jwt_expires() -> u64 {
    86400 // 24 hours
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "change-me-in-production".to_string(),
            issuer: default_jwt_issuer(),
            audience: default_jwt_audience(),
            expires: default_jwt_expires(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub providers: HashMap<String, OAuthProvider>,
    /// Where a failed callback lands
    #[serde(default = "default_failure_redirect")]
    pub failure_redirect: String,
    /// Hosts a post-login redirect may point at; empty allows any http(s) URL
    #[serde(default)]
    pub allowed_redirect_hosts: Vec<String>,
}

fn default_failure_redirect() -> String {
    "/".to_string()
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            failure_redirect: default_failure_redirect(),
            allowed_redirect_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Github,
    Google,
    Qq,
    Custom,
}

impl ProviderKind {
    /// Well-known provider names map to their kind; anything else is custom.
    pub fn from_name(name: &str) -> Self {
        match name {
            "github" => ProviderKind::Github,
            "google" => ProviderKind::Google,
            "qq" => ProviderKind::Qq,
            _ => ProviderKind::Custom,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProvider {
    #[serde(default)]
    pub kind: Option<ProviderKind>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub authorization_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub user_info_url: Option<String>,
    /// QQ only: endpoint resolving an access token to an openid
    #[serde(default)]
    pub openid_url: Option<String>,
    /// Custom only: expect an id_token and verify it against `jwks_url`
    #[serde(default)]
    pub is_oidc: bool,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub jwks_url: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for OAuthProvider {
    fn default() -> Self {
        Self {
            kind: None,
            enabled: true,
            display_name: None,
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: None,
            scopes: Vec::new(),
            authorization_url: None,
            token_url: None,
            user_info_url: None,
            openid_url: None,
            is_oidc: false,
            issuer: None,
            jwks_url: None,
        }
    }
}

impl OAuthProvider {
    pub fn resolved_kind(&self, name: &str) -> ProviderKind {
        self.kind.unwrap_or_else(|| ProviderKind::from_name(name))
    }

    /// Name of the first missing setting, if any
    pub fn missing_setting(&self, kind: ProviderKind) -> Option<&'static str> {
        let empty = |value: &Option<String>| value.as_deref().map_or(true, str::is_empty);

        if self.client_id.is_empty() {
            return Some("client_id");
        }
        if self.client_secret.is_empty() {
            return Some("client_secret");
        }
        if empty(&self.redirect_uri) {
            return Some("redirect_uri");
        }
        if empty(&self.authorization_url) {
            return Some("authorization_url");
        }
        if empty(&self.token_url) {
            return Some("token_url");
        }
        match kind {
            ProviderKind::Qq if empty(&self.openid_url) => Some("openid_url"),
            ProviderKind::Custom if self.is_oidc && empty(&self.jwks_url) => Some("jwks_url"),
            ProviderKind::Custom if !self.is_oidc && empty(&self.user_info_url) => {
                Some("user_info_url")
            }
            ProviderKind::Github | ProviderKind::Google if empty(&self.user_info_url) => {
                Some("user_info_url")
            }
            _ => None,
        }
    }
}

/// Fill in endpoints and scopes for the well-known providers
pub fn apply_predefined_provider_defaults(kind: ProviderKind, provider: &mut OAuthProvider) {
    match kind {
        ProviderKind::Github => apply_github_defaults(provider),
        ProviderKind::Google => apply_google_defaults(provider),
        ProviderKind::Qq => apply_qq_defaults(provider),
        ProviderKind::Custom => {}
    }
}

fn apply_github_defaults(provider: &mut OAuthProvider) {
    if provider.authorization_url.is_none() {
        provider.authorization_url = Some("https://github.com/login/oauth/authorize".to_string());
    }
    if provider.token_url.is_none() {
        provider.token_url = Some("https://github.com/login/oauth/access_token".to_string());
    }
    if provider.user_info_url.is_none() {
        provider.user_info_url = Some("https://api.github.com/user".to_string());
    }
    if provider.scopes.is_empty() {
        provider.scopes = vec!["read:user".to_string()];
    }
}

fn apply_google_defaults(provider: &mut OAuthProvider) {
    if provider.authorization_url.is_none() {
        provider.authorization_url =
            Some("https://accounts.google.com/o/oauth2/v2/auth".to_string());
    }
    if provider.token_url.is_none() {
        provider.token_url = Some("https://oauth2.googleapis.com/token".to_string());
    }
    if provider.user_info_url.is_none() {
        provider.user_info_url =
            Some("https://openidconnect.googleapis.com/v1/userinfo".to_string());
    }
    if provider.scopes.is_empty() {
        provider.scopes = vec![
            "openid".to_string(),
            "email".to_string(),
            "profile".to_string(),
        ];
    }
}

fn apply_qq_defaults(provider: &mut OAuthProvider) {
    if provider.authorization_url.is_none() {
        provider.authorization_url = Some("https://graph.qq.com/oauth2.0/authorize".to_string());
    }
    if provider.token_url.is_none() {
        provider.token_url = Some("https://graph.qq.com/oauth2.0/token".to_string());
    }
    if provider.openid_url.is_none() {
        provider.openid_url = Some("https://graph.qq.com/oauth2.0/me".to_string());
    }
    if provider.scopes.is_empty() {
        provider.scopes = vec!["get_user_info".to_string()];
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Seconds a fetched JWKS is reused; 0 fetches on every verification
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl: u64,
}

fn default_jwks_cache_ttl() -> u64 {
    300
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            jwks_cache_ttl: default_jwks_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasskeyConfig {
    #[serde(default = "default_rp_name")]
    pub rp_name: String,
    /// Seconds a begun ceremony stays finishable
    #[serde(default = "default_session_ttl")]
    pub session_ttl: u64,
    /// Client-side ceremony timeout advertised in the options, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_rp_name() -> String {
    "federated-auth".to_string()
}

fn default_session_ttl() -> u64 {
    300
}

fn default_timeout_ms() -> u64 {
    300_000
}

impl Default for PasskeyConfig {
    fn default() -> Self {
        Self {
            rp_name: default_rp_name(),
            session_ttl: default_session_ttl(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_inferred_from_name() {
        let provider = OAuthProvider::default();
        assert_eq!(provider.resolved_kind("github"), ProviderKind::Github);
        assert_eq!(provider.resolved_kind("qq"), ProviderKind::Qq);
        assert_eq!(provider.resolved_kind("corp-sso"), ProviderKind::Custom);

        let explicit = OAuthProvider {
            kind: Some(ProviderKind::Google),
            ..Default::default()
        };
        assert_eq!(explicit.resolved_kind("work"), ProviderKind::Google);
    }

    #[test]
    fn test_defaults_do_not_override_configured_urls() {
        let mut provider = OAuthProvider {
            token_url: Some("http://localhost/token".to_string()),
            ..Default::default()
        };
        apply_predefined_provider_defaults(ProviderKind::Github, &mut provider);

        assert_eq!(provider.token_url.as_deref(), Some("http://localhost/token"));
        assert_eq!(
            provider.authorization_url.as_deref(),
            Some("https://github.com/login/oauth/authorize")
        );
        assert_eq!(provider.scopes, vec!["read:user".to_string()]);
    }

    #[test]
    fn test_missing_setting() {
        let mut provider = OAuthProvider {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: Some("https://app.example/cb".to_string()),
            ..Default::default()
        };
        assert_eq!(
            provider.missing_setting(ProviderKind::Qq),
            Some("authorization_url")
        );

        apply_predefined_provider_defaults(ProviderKind::Qq, &mut provider);
        assert_eq!(provider.missing_setting(ProviderKind::Qq), None);

        let mut custom = OAuthProvider {
            is_oidc: true,
            authorization_url: Some("https://idp/authorize".to_string()),
            token_url: Some("https://idp/token".to_string()),
            ..provider.clone()
        };
        custom.openid_url = None;
        assert_eq!(custom.missing_setting(ProviderKind::Custom), Some("jwks_url"));
        custom.jwks_url = Some("https://idp/jwks".to_string());
        assert_eq!(custom.missing_setting(ProviderKind::Custom), None);
    }
}
