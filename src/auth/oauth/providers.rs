//! Per-provider code exchange and identity normalization.
//!
//! Every adapter turns an authorization code into an [`ExternalIdentity`] with a
//! single attempt: a non-2xx status, a malformed body, or a missing identity field
//! fails the callback. Nothing here touches storage.

use crate::{
    auth::{
        config::{OAuthProvider, ProviderKind},
        oidc::{OidcVerifier, VerifyParams},
    },
    database::entities::AuthType,
    error::AppError,
};
use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, AuthUrl, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    RedirectUrl, Scope, TokenUrl,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{sync::Arc, time::Duration};

// Avoid oauth2 type madness
pub type Oauth2Client =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Fields probed, in order, for an account id in a generic userinfo response
const USERINFO_ID_FIELDS: [&str; 5] = ["id", "sub", "user_id", "uid", "openid"];

const USER_AGENT: &str = concat!("federated-auth/", env!("CARGO_PKG_VERSION"));

/// Result of a successful code exchange
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderTokens {
    pub access_token: String,
    pub id_token: Option<String>,
}

/// Provider-normalized identity, the key an account binding is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub provider: String,
    pub external_id: String,
    /// `""` unless the identity came from a verified id token
    pub issuer: String,
    pub auth_type: AuthType,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Issuer and auth type this provider's bindings are stored under
    fn binding_slot(&self) -> (&str, AuthType);

    /// `nonce` is only sent to providers that echo it back in an id token.
    fn authorize_url(&self, state: &str, nonce: &str) -> Result<String, AppError>;

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, AppError>;

    async fn fetch_identity(
        &self,
        tokens: &ProviderTokens,
        expected_nonce: Option<&str>,
    ) -> Result<ExternalIdentity, AppError>;
}

/// Provider display name mapping
pub fn get_display_name(provider_name: &str, provider: &OAuthProvider) -> String {
    if let Some(name) = provider.display_name.as_deref().filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    match provider.resolved_kind(provider_name) {
        ProviderKind::Github => "GitHub".to_string(),
        ProviderKind::Google => "Google".to_string(),
        ProviderKind::Qq => "QQ".to_string(),
        ProviderKind::Custom => provider_name.to_string(),
    }
}

/// Outbound client for provider calls. Redirects are never followed.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(timeout)
        // Following redirects opens the client up to SSRF vulnerabilities.
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| AppError::Internal(format!("reqwest build error: {e}")))
}

/// Build the adapter matching the provider's kind.
///
/// The provider must already carry its predefined defaults and pass
/// [`OAuthProvider::missing_setting`].
pub fn create_adapter(
    provider_name: &str,
    provider: &OAuthProvider,
    http: reqwest::Client,
    oidc: OidcVerifier,
) -> Result<Arc<dyn ProviderAdapter>, AppError> {
    let kind = provider.resolved_kind(provider_name);
    if let Some(setting) = provider.missing_setting(kind) {
        return Err(AppError::Configuration(format!(
            "OAuth provider '{}' is missing {}",
            provider_name, setting
        )));
    }

    let endpoints = ProviderEndpoints {
        name: provider_name.to_string(),
        client: create_oauth_client(provider, provider_name)?,
        settings: provider.clone(),
        http,
    };

    Ok(match kind {
        ProviderKind::Github => Arc::new(GithubAdapter { endpoints }),
        ProviderKind::Google => Arc::new(GoogleAdapter { endpoints }),
        ProviderKind::Qq => Arc::new(QqAdapter { endpoints }),
        ProviderKind::Custom => Arc::new(CustomAdapter { endpoints, oidc }),
    })
}

/// Create OAuth client for a single provider
pub fn create_oauth_client(
    provider: &OAuthProvider,
    provider_name: &str,
) -> Result<Oauth2Client, AppError> {
    let invalid = |what: &str, e: url::ParseError| {
        AppError::Configuration(format!(
            "Invalid {} for provider '{}': {}",
            what, provider_name, e
        ))
    };

    let auth_url = AuthUrl::new(provider.authorization_url.clone().unwrap_or_default())
        .map_err(|e| invalid("authorization URL", e))?;
    let token_url = TokenUrl::new(provider.token_url.clone().unwrap_or_default())
        .map_err(|e| invalid("token URL", e))?;
    let redirect_url = RedirectUrl::new(provider.redirect_uri.clone().unwrap_or_default())
        .map_err(|e| invalid("redirect URI", e))?;

    Ok(BasicClient::new(ClientId::new(provider.client_id.clone()))
        .set_client_secret(ClientSecret::new(provider.client_secret.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url))
}

/// Configuration and plumbing shared by every adapter
struct ProviderEndpoints {
    name: String,
    client: Oauth2Client,
    settings: OAuthProvider,
    http: reqwest::Client,
}

impl ProviderEndpoints {
    fn redirect_uri(&self) -> &str {
        self.settings.redirect_uri.as_deref().unwrap_or_default()
    }

    fn token_url(&self) -> &str {
        self.settings.token_url.as_deref().unwrap_or_default()
    }

    fn user_info_url(&self) -> &str {
        self.settings.user_info_url.as_deref().unwrap_or_default()
    }

    fn authorize_url(&self, state: &str, scopes: &[String], extra: &[(&str, &str)]) -> String {
        let mut request = self
            .client
            .authorize_url(|| CsrfToken::new(state.to_string()))
            .add_scopes(scopes.iter().map(|s| Scope::new(s.clone())));
        for (name, value) in extra {
            request = request.add_extra_param(*name, *value);
        }
        let (url, _) = request.url();
        url.to_string()
    }

    fn identity(&self, external_id: String) -> ExternalIdentity {
        ExternalIdentity {
            provider: self.name.clone(),
            external_id,
            issuer: String::new(),
            auth_type: AuthType::OAuth2,
        }
    }

    fn authorization_code_form<'a>(&'a self, code: &'a str) -> [(&'static str, &'a str); 5] {
        [
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri()),
            ("grant_type", "authorization_code"),
        ]
    }

    /// Send, require a 2xx, and hand back the body
    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<String, AppError> {
        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                AppError::Transport(format!("{} {} request failed: {}", self.name, what, e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AppError::Transport(format!("{} {} response unreadable: {}", self.name, what, e))
        })?;

        if !status.is_success() {
            tracing::debug!(provider = %self.name, %status, what, "provider call rejected");
            return Err(AppError::Transport(format!(
                "{} {} returned {}",
                self.name, what, status
            )));
        }
        Ok(body)
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<Map<String, Value>, AppError> {
        let body = self
            .send(
                self.http.get(self.user_info_url()).bearer_auth(access_token),
                "userinfo",
            )
            .await?;
        parse_json_object(&body)
            .ok_or_else(|| AppError::Validation(format!("{} userinfo is not JSON", self.name)))
    }
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl AccessTokenResponse {
    fn into_tokens(self, provider: &str) -> Result<ProviderTokens, AppError> {
        match self.access_token.filter(|t| !t.is_empty()) {
            Some(access_token) => Ok(ProviderTokens {
                access_token,
                id_token: None,
            }),
            None => Err(AppError::Validation(format!(
                "{} token response has no access_token{}",
                provider,
                self.error.map(|e| format!(" ({})", e)).unwrap_or_default()
            ))),
        }
    }
}

fn parse_token_json(provider: &str, body: &str) -> Result<ProviderTokens, AppError> {
    serde_json::from_str::<AccessTokenResponse>(body)
        .map_err(|_| AppError::Validation(format!("{} token response is not JSON", provider)))?
        .into_tokens(provider)
}

fn parse_json_object(body: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Strings and numbers count as identifiers; empty strings do not.
fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty id-like field of a generic userinfo document
pub fn probe_user_id(userinfo: &Map<String, Value>) -> Option<String> {
    USERINFO_ID_FIELDS
        .iter()
        .find_map(|field| userinfo.get(*field).and_then(identifier))
}

/// QQ answers with a JSONP `callback( ... );` wrapper on some endpoints
fn strip_callback(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix("callback(")
        .and_then(|rest| {
            let rest = rest.trim_end();
            rest.strip_suffix(");").or_else(|| rest.strip_suffix(')'))
        })
        .map(str::trim)
        .unwrap_or(raw)
}

/// QQ token responses come as JSON, a query string, or JSONP; tried in that order.
pub fn parse_qq_token_response(body: &str) -> Option<ProviderTokens> {
    let from_json = |raw: &str| {
        parse_json_object(raw)
            .and_then(|map| map.get("access_token").and_then(identifier))
            .map(|access_token| ProviderTokens {
                access_token,
                id_token: None,
            })
    };

    from_json(body)
        .or_else(|| {
            url::form_urlencoded::parse(body.trim().as_bytes())
                .find(|(key, value)| key == "access_token" && !value.is_empty())
                .map(|(_, value)| ProviderTokens {
                    access_token: value.into_owned(),
                    id_token: None,
                })
        })
        .or_else(|| from_json(strip_callback(body)))
}

/// Pull the openid out of a `/oauth2.0/me` response
pub fn parse_qq_openid_response(body: &str) -> Option<String> {
    parse_json_object(strip_callback(body)).and_then(|map| map.get("openid").and_then(identifier))
}

pub struct GithubAdapter {
    endpoints: ProviderEndpoints,
}

#[async_trait]
impl ProviderAdapter for GithubAdapter {
    fn name(&self) -> &str {
        &self.endpoints.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Github
    }

    fn binding_slot(&self) -> (&str, AuthType) {
        ("", AuthType::OAuth2)
    }

    fn authorize_url(&self, state: &str, _nonce: &str) -> Result<String, AppError> {
        Ok(self
            .endpoints
            .authorize_url(state, &self.endpoints.settings.scopes, &[]))
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, AppError> {
        let settings = &self.endpoints.settings;
        let payload = serde_json::json!({
            "client_id": settings.client_id,
            "client_secret": settings.client_secret,
            "code": code,
            "redirect_uri": self.endpoints.redirect_uri(),
        });

        let body = self
            .endpoints
            .send(
                self.endpoints
                    .http
                    .post(self.endpoints.token_url())
                    .json(&payload),
                "token exchange",
            )
            .await?;
        parse_token_json(self.name(), &body)
    }

    async fn fetch_identity(
        &self,
        tokens: &ProviderTokens,
        _expected_nonce: Option<&str>,
    ) -> Result<ExternalIdentity, AppError> {
        let user = self.endpoints.fetch_userinfo(&tokens.access_token).await?;
        // The numeric account id survives renames; the login does not
        let id = user
            .get("id")
            .and_then(identifier)
            .ok_or_else(|| AppError::Validation("GitHub user has no id".to_string()))?;
        Ok(self.endpoints.identity(id))
    }
}

pub struct GoogleAdapter {
    endpoints: ProviderEndpoints,
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> &str {
        &self.endpoints.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn binding_slot(&self) -> (&str, AuthType) {
        ("", AuthType::OAuth2)
    }

    fn authorize_url(&self, state: &str, _nonce: &str) -> Result<String, AppError> {
        Ok(self.endpoints.authorize_url(
            state,
            &self.endpoints.settings.scopes,
            &[("access_type", "offline"), ("prompt", "consent")],
        ))
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, AppError> {
        let form = self.endpoints.authorization_code_form(code);
        let body = self
            .endpoints
            .send(
                self.endpoints
                    .http
                    .post(self.endpoints.token_url())
                    .form(&form),
                "token exchange",
            )
            .await?;
        parse_token_json(self.name(), &body)
    }

    async fn fetch_identity(
        &self,
        tokens: &ProviderTokens,
        _expected_nonce: Option<&str>,
    ) -> Result<ExternalIdentity, AppError> {
        let user = self.endpoints.fetch_userinfo(&tokens.access_token).await?;
        let sub = user
            .get("sub")
            .and_then(identifier)
            .ok_or_else(|| AppError::Validation("Google userinfo has no sub".to_string()))?;
        Ok(self.endpoints.identity(sub))
    }
}

pub struct QqAdapter {
    endpoints: ProviderEndpoints,
}

impl QqAdapter {
    fn openid_url(&self) -> &str {
        self.endpoints
            .settings
            .openid_url
            .as_deref()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProviderAdapter for QqAdapter {
    fn name(&self) -> &str {
        &self.endpoints.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Qq
    }

    fn binding_slot(&self) -> (&str, AuthType) {
        ("", AuthType::OAuth2)
    }

    fn authorize_url(&self, state: &str, _nonce: &str) -> Result<String, AppError> {
        Ok(self.endpoints.authorize_url(
            state,
            &self.endpoints.settings.scopes,
            &[("display", "pc")],
        ))
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, AppError> {
        let form = self.endpoints.authorization_code_form(code);
        let body = self
            .endpoints
            .send(
                self.endpoints
                    .http
                    .get(self.endpoints.token_url())
                    .query(&form)
                    .query(&[("fmt", "json"), ("need_openid", "1")]),
                "token exchange",
            )
            .await?;

        parse_qq_token_response(&body)
            .ok_or_else(|| AppError::Validation("QQ token response is unparseable".to_string()))
    }

    async fn fetch_identity(
        &self,
        tokens: &ProviderTokens,
        _expected_nonce: Option<&str>,
    ) -> Result<ExternalIdentity, AppError> {
        let body = self
            .endpoints
            .send(
                self.endpoints.http.get(self.openid_url()).query(&[
                    ("access_token", tokens.access_token.as_str()),
                    ("fmt", "json"),
                ]),
                "openid",
            )
            .await?;

        let openid = parse_qq_openid_response(&body)
            .ok_or_else(|| AppError::Validation("QQ openid response has no openid".to_string()))?;
        Ok(self.endpoints.identity(openid))
    }
}

pub struct CustomAdapter {
    endpoints: ProviderEndpoints,
    oidc: OidcVerifier,
}

impl CustomAdapter {
    fn is_oidc(&self) -> bool {
        self.endpoints.settings.is_oidc
    }

    fn issuer(&self) -> &str {
        self.endpoints.settings.issuer.as_deref().unwrap_or_default()
    }
}

#[async_trait]
impl ProviderAdapter for CustomAdapter {
    fn name(&self) -> &str {
        &self.endpoints.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Custom
    }

    fn binding_slot(&self) -> (&str, AuthType) {
        if self.is_oidc() {
            (self.issuer(), AuthType::Oidc)
        } else {
            ("", AuthType::OAuth2)
        }
    }

    fn authorize_url(&self, state: &str, nonce: &str) -> Result<String, AppError> {
        let mut scopes = self.endpoints.settings.scopes.clone();
        if !self.is_oidc() {
            return Ok(self.endpoints.authorize_url(state, &scopes, &[]));
        }

        if !scopes.iter().any(|s| s == "openid") {
            scopes.insert(0, "openid".to_string());
        }
        let mut extra = Vec::new();
        if !nonce.is_empty() {
            extra.push(("nonce", nonce));
        }
        Ok(self.endpoints.authorize_url(state, &scopes, &extra))
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, AppError> {
        let form = self.endpoints.authorization_code_form(code);
        let body = self
            .endpoints
            .send(
                self.endpoints
                    .http
                    .post(self.endpoints.token_url())
                    .form(&form),
                "token exchange",
            )
            .await?;

        let response = parse_json_object(&body).ok_or_else(|| {
            AppError::Validation(format!("{} token response is not JSON", self.name()))
        })?;
        let access_token = response
            .get("access_token")
            .and_then(identifier)
            .ok_or_else(|| {
                AppError::Validation(format!("{} token response has no access_token", self.name()))
            })?;

        let id_token = response
            .get("id_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        if self.is_oidc() && id_token.is_none() {
            return Err(AppError::Validation(format!(
                "{} token response has no id_token",
                self.name()
            )));
        }

        Ok(ProviderTokens {
            access_token,
            id_token,
        })
    }

    async fn fetch_identity(
        &self,
        tokens: &ProviderTokens,
        expected_nonce: Option<&str>,
    ) -> Result<ExternalIdentity, AppError> {
        if !self.is_oidc() {
            let userinfo = self.endpoints.fetch_userinfo(&tokens.access_token).await?;
            let id = probe_user_id(&userinfo).ok_or_else(|| {
                AppError::Validation(format!("{} userinfo has no identifier field", self.name()))
            })?;
            return Ok(self.endpoints.identity(id));
        }

        let settings = &self.endpoints.settings;
        let claims = self
            .oidc
            .verify_id_token(
                tokens.id_token.as_deref().unwrap_or_default(),
                VerifyParams {
                    issuer: settings.issuer.as_deref(),
                    jwks_url: settings.jwks_url.as_deref().unwrap_or_default(),
                    audience: &settings.client_id,
                    expected_nonce,
                },
            )
            .await?;

        Ok(ExternalIdentity {
            provider: self.endpoints.name.clone(),
            external_id: claims.sub,
            issuer: self.issuer().to_string(),
            auth_type: AuthType::Oidc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::config::apply_predefined_provider_defaults;
    use crate::auth::oidc::{HttpJwksFetcher, OidcError};
    use crate::clock::system_clock;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &str, kind: ProviderKind) -> OAuthProvider {
        let mut provider = OAuthProvider {
            kind: Some(kind),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: Some("https://blog.example/auth/oauth/cb".to_string()),
            authorization_url: Some(format!("{}/authorize", server)),
            token_url: Some(format!("{}/token", server)),
            user_info_url: Some(format!("{}/user", server)),
            openid_url: Some(format!("{}/me", server)),
            ..Default::default()
        };
        apply_predefined_provider_defaults(kind, &mut provider);
        provider
    }

    fn adapter(name: &str, provider: &OAuthProvider) -> Arc<dyn ProviderAdapter> {
        let http = build_http_client(Duration::from_secs(5)).unwrap();
        let oidc = OidcVerifier::new(
            Arc::new(HttpJwksFetcher::with_client(http.clone())),
            system_clock(),
        );
        create_adapter(name, provider, http, oidc).unwrap()
    }

    fn query(url: &str) -> Vec<(String, String)> {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn has(pairs: &[(String, String)], key: &str, value: &str) -> bool {
        pairs.iter().any(|(k, v)| k == key && v == value)
    }

    #[test]
    fn test_display_names() {
        let plain = OAuthProvider::default();
        assert_eq!(get_display_name("github", &plain), "GitHub");
        assert_eq!(get_display_name("google", &plain), "Google");
        assert_eq!(get_display_name("qq", &plain), "QQ");
        assert_eq!(get_display_name("corp", &plain), "corp");

        let named = OAuthProvider {
            display_name: Some("Corp SSO".to_string()),
            ..Default::default()
        };
        assert_eq!(get_display_name("corp", &named), "Corp SSO");
    }

    #[test]
    fn test_probe_user_id_order() {
        let info = serde_json::json!({"uid": "u-1", "user_id": 42, "sub": ""});
        assert_eq!(
            probe_user_id(info.as_object().unwrap()),
            Some("42".to_string())
        );

        let info = serde_json::json!({"id": null, "openid": "o-9"});
        assert_eq!(
            probe_user_id(info.as_object().unwrap()),
            Some("o-9".to_string())
        );

        let info = serde_json::json!({"name": "alice"});
        assert_eq!(probe_user_id(info.as_object().unwrap()), None);
    }

    #[test]
    fn test_qq_token_formats() {
        let json = parse_qq_token_response(r#"{"access_token":"AT1","expires_in":"7776000"}"#);
        assert_eq!(json.unwrap().access_token, "AT1");

        let query =
            parse_qq_token_response("access_token=AT2&expires_in=7776000&refresh_token=RT");
        assert_eq!(query.unwrap().access_token, "AT2");

        let jsonp = parse_qq_token_response(r#"callback( {"access_token":"AT3"} );"#);
        assert_eq!(jsonp.unwrap().access_token, "AT3");

        assert!(parse_qq_token_response(
            r#"callback( {"error":100020,"error_description":"code is reused error"} );"#
        )
        .is_none());
        assert!(parse_qq_token_response("").is_none());
    }

    #[test]
    fn test_qq_openid_formats() {
        assert_eq!(
            parse_qq_openid_response(r#"{"client_id":"101","openid":"OPENID"}"#),
            Some("OPENID".to_string())
        );
        assert_eq!(
            parse_qq_openid_response("callback( {\"client_id\":\"101\",\"openid\":\"OID\"} );\n"),
            Some("OID".to_string())
        );
        assert_eq!(parse_qq_openid_response(r#"{"error":100016}"#), None);
    }

    #[test]
    fn test_incomplete_provider_rejected() {
        let mut incomplete = provider("https://idp", ProviderKind::Custom);
        incomplete.user_info_url = None;

        let http = build_http_client(Duration::from_secs(5)).unwrap();
        let oidc = OidcVerifier::new(
            Arc::new(HttpJwksFetcher::with_client(http.clone())),
            system_clock(),
        );
        assert!(matches!(
            create_adapter("corp", &incomplete, http, oidc),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_authorize_urls() {
        let github = adapter("github", &provider("https://gh", ProviderKind::Github));
        let pairs = query(&github.authorize_url("S", "N").unwrap());
        assert!(has(&pairs, "client_id", "client-id"));
        assert!(has(&pairs, "state", "S"));
        assert!(has(&pairs, "scope", "read:user"));
        assert!(has(
            &pairs,
            "redirect_uri",
            "https://blog.example/auth/oauth/cb"
        ));
        assert!(!pairs.iter().any(|(k, _)| k == "nonce"));

        let google = adapter("google", &provider("https://g", ProviderKind::Google));
        let pairs = query(&google.authorize_url("S", "N").unwrap());
        assert!(has(&pairs, "response_type", "code"));
        assert!(has(&pairs, "access_type", "offline"));
        assert!(has(&pairs, "prompt", "consent"));
        assert!(has(&pairs, "scope", "openid email profile"));

        let qq = adapter("qq", &provider("https://qq", ProviderKind::Qq));
        let pairs = query(&qq.authorize_url("S", "N").unwrap());
        assert!(has(&pairs, "display", "pc"));

        let mut oidc_provider = provider("https://idp", ProviderKind::Custom);
        oidc_provider.is_oidc = true;
        oidc_provider.jwks_url = Some("https://idp/jwks".to_string());
        oidc_provider.scopes = vec!["email".to_string()];
        let custom = adapter("corp", &oidc_provider);
        let pairs = query(&custom.authorize_url("S", "N").unwrap());
        assert!(has(&pairs, "scope", "openid email"));
        assert!(has(&pairs, "nonce", "N"));
    }

    #[tokio::test]
    async fn test_github_exchange_and_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("accept", "application/json"))
            .and(body_json(serde_json::json!({
                "client_id": "client-id",
                "client_secret": "client-secret",
                "code": "the-code",
                "redirect_uri": "https://blog.example/auth/oauth/cb"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "gho_abc",
                "token_type": "bearer",
                "scope": "read:user"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer gho_abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 12345,
                "login": "octocat"
            })))
            .mount(&server)
            .await;

        let github = adapter("github", &provider(&server.uri(), ProviderKind::Github));
        let tokens = github.exchange_code("the-code").await.unwrap();
        let identity = github.fetch_identity(&tokens, None).await.unwrap();

        assert_eq!(identity.provider, "github");
        assert_eq!(identity.external_id, "12345");
        assert_eq!(identity.issuer, "");
        assert_eq!(identity.auth_type, AuthType::OAuth2);
    }

    #[tokio::test]
    async fn test_github_error_body_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "bad_verification_code"
            })))
            .mount(&server)
            .await;

        let github = adapter("github", &provider(&server.uri(), ProviderKind::Github));
        assert!(matches!(
            github.exchange_code("stale").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_google_form_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=g-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "1098765",
                "email": "a@example.com"
            })))
            .mount(&server)
            .await;

        let google = adapter("google", &provider(&server.uri(), ProviderKind::Google));
        let tokens = google.exchange_code("g-code").await.unwrap();
        assert_eq!(
            google.fetch_identity(&tokens, None).await.unwrap().external_id,
            "1098765"
        );
    }

    #[tokio::test]
    async fn test_qq_two_round_trips() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("code", "qq-code"))
            .and(query_param("fmt", "json"))
            .and(query_param("need_openid", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("access_token=QQAT&expires_in=7776000&refresh_token=R"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(query_param("access_token", "QQAT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"callback( {"client_id":"101","openid":"QQ-OPENID"} );"#),
            )
            .mount(&server)
            .await;

        let qq = adapter("qq", &provider(&server.uri(), ProviderKind::Qq));
        let tokens = qq.exchange_code("qq-code").await.unwrap();
        let identity = qq.fetch_identity(&tokens, None).await.unwrap();
        assert_eq!(identity.external_id, "QQ-OPENID");
    }

    #[tokio::test]
    async fn test_custom_userinfo_probe_and_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "access_token": "custom-at"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "uid": 77,
                "name": "alice"
            })))
            .mount(&server)
            .await;

        let custom = adapter("corp", &provider(&server.uri(), ProviderKind::Custom));
        let tokens = custom.exchange_code("c").await.unwrap();
        let identity = custom.fetch_identity(&tokens, None).await.unwrap();
        assert_eq!(identity.external_id, "77");
        assert_eq!(identity.auth_type, AuthType::OAuth2);

        let down = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&down)
            .await;
        let custom = adapter("corp", &provider(&down.uri(), ProviderKind::Custom));
        assert!(matches!(
            custom.exchange_code("c").await,
            Err(AppError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_custom_oidc_requires_id_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at"
            })))
            .mount(&server)
            .await;

        let mut oidc_provider = provider(&server.uri(), ProviderKind::Custom);
        oidc_provider.is_oidc = true;
        oidc_provider.jwks_url = Some(format!("{}/jwks", server.uri()));
        let custom = adapter("corp", &oidc_provider);

        assert!(matches!(
            custom.exchange_code("c").await,
            Err(AppError::Validation(_))
        ));

        let empty = ProviderTokens {
            access_token: "at".to_string(),
            id_token: None,
        };
        assert!(matches!(
            custom.fetch_identity(&empty, None).await,
            Err(AppError::Oidc(OidcError::EmptyToken))
        ));
    }
}
