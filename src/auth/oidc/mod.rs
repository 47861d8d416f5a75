//! OpenID Connect identity token verification against a provider's JWKS.

pub mod jwks;

pub use jwks::{CachedJwksFetcher, HttpJwksFetcher, JwkSet, JwksFetcher, KeySet, RawJwk};

use crate::clock::SharedClock;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Tolerated clock skew between us and the provider
pub const CLOCK_SKEW_LEEWAY_SECONDS: i64 = 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OidcError {
    #[error("id token is empty")]
    EmptyToken,
    #[error("failed to fetch JWKS: {0}")]
    JwksFetch(String),
    #[error("no signing key matches the token")]
    KeyNotFound,
    #[error("unsupported signing key or algorithm: {0}")]
    UnsupportedKey(String),
    #[error("invalid token signature: {0}")]
    SignatureInvalid(String),
    #[error("issuer mismatch")]
    IssuerMismatch,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("missing or empty subject")]
    MissingOrEmptySub,
    #[error("token not yet valid or expired")]
    NotYetValidOrExpired,
    #[error("nonce mismatch")]
    NonceMismatch,
}

/// Claims of a verified id token. `raw` keeps every claim as sent.
#[derive(Debug, Clone, PartialEq)]
pub struct IdTokenClaims {
    pub sub: String,
    pub iss: Option<String>,
    pub aud: Vec<String>,
    pub azp: Option<String>,
    pub exp: i64,
    pub iat: Option<i64>,
    pub nonce: Option<String>,
    pub raw: Map<String, Value>,
}

/// What a verification is checked against.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyParams<'a> {
    /// Expected `iss`; not checked when empty
    pub issuer: Option<&'a str>,
    pub jwks_url: &'a str,
    /// Client id; not checked when empty
    pub audience: &'a str,
    pub expected_nonce: Option<&'a str>,
}

#[derive(Clone)]
pub struct OidcVerifier {
    fetcher: Arc<dyn JwksFetcher>,
    clock: SharedClock,
}

impl OidcVerifier {
    pub fn new(fetcher: Arc<dyn JwksFetcher>, clock: SharedClock) -> Self {
        Self { fetcher, clock }
    }

    pub async fn verify_id_token(
        &self,
        id_token: &str,
        params: VerifyParams<'_>,
    ) -> Result<IdTokenClaims, OidcError> {
        let id_token = id_token.trim();
        if id_token.is_empty() {
            return Err(OidcError::EmptyToken);
        }

        let header =
            decode_header(id_token).map_err(|e| OidcError::SignatureInvalid(e.to_string()))?;
        if matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(OidcError::UnsupportedKey(format!("{:?}", header.alg)));
        }

        let issuer = params.issuer.unwrap_or_default();
        let kid = header.kid.as_deref();

        let mut keys = KeySet::from_jwks(&self.fetcher.fetch(issuer, params.jwks_url).await?);
        if keys.resolve(kid).is_none() && kid.is_some() {
            // The provider may have rotated keys since we cached them
            tracing::debug!(issuer, kid, "unknown kid, refreshing JWKS");
            self.fetcher.invalidate(issuer, params.jwks_url);
            keys = KeySet::from_jwks(&self.fetcher.fetch(issuer, params.jwks_url).await?);
        }
        let key = keys.resolve(kid).ok_or(OidcError::KeyNotFound)?;

        if !key.family.allows(header.alg) {
            return Err(OidcError::UnsupportedKey(format!(
                "{:?} with {:?} key",
                header.alg, key.family
            )));
        }
        if let Some(pinned) = key.alg.as_deref() {
            if pinned != format!("{:?}", header.alg) {
                return Err(OidcError::UnsupportedKey(format!(
                    "key is pinned to {}",
                    pinned
                )));
            }
        }

        // Time, issuer and audience are checked by hand below, against our clock
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<Map<String, Value>>(id_token, &key.decoding_key, &validation)
            .map_err(|e| OidcError::SignatureInvalid(e.to_string()))?;

        self.check_claims(data.claims, params)
    }

    fn check_claims(
        &self,
        raw: Map<String, Value>,
        params: VerifyParams<'_>,
    ) -> Result<IdTokenClaims, OidcError> {
        let now = self.clock.now_timestamp();

        let exp = raw
            .get("exp")
            .and_then(numeric_date)
            .ok_or(OidcError::NotYetValidOrExpired)?;
        if now > exp + CLOCK_SKEW_LEEWAY_SECONDS {
            return Err(OidcError::NotYetValidOrExpired);
        }
        if let Some(nbf) = raw.get("nbf").and_then(numeric_date) {
            if now + CLOCK_SKEW_LEEWAY_SECONDS < nbf {
                return Err(OidcError::NotYetValidOrExpired);
            }
        }
        let iat = raw.get("iat").and_then(numeric_date);
        if iat.is_some_and(|iat| iat > now + CLOCK_SKEW_LEEWAY_SECONDS) {
            return Err(OidcError::NotYetValidOrExpired);
        }

        let iss = raw.get("iss").and_then(Value::as_str).map(str::to_string);
        if let Some(expected) = params.issuer.filter(|i| !i.is_empty()) {
            if iss.as_deref() != Some(expected) {
                return Err(OidcError::IssuerMismatch);
            }
        }

        let aud: Vec<String> = match raw.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(entries)) => entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        let azp = raw.get("azp").and_then(Value::as_str).map(str::to_string);
        if !params.audience.is_empty() {
            if !aud.iter().any(|a| a == params.audience) {
                return Err(OidcError::AudienceMismatch);
            }
            if aud.len() > 1 && azp.as_deref() != Some(params.audience) {
                return Err(OidcError::AudienceMismatch);
            }
        }

        let sub = match raw.get("sub") {
            Some(Value::String(sub)) => sub.trim().to_string(),
            Some(Value::Number(sub)) => sub.to_string(),
            _ => String::new(),
        };
        if sub.is_empty() {
            return Err(OidcError::MissingOrEmptySub);
        }

        let nonce = raw.get("nonce").and_then(Value::as_str).map(str::to_string);
        if let Some(expected) = params.expected_nonce {
            if nonce.as_deref() != Some(expected) {
                return Err(OidcError::NonceMismatch);
            }
        }

        Ok(IdTokenClaims {
            sub,
            iss,
            aud,
            azp,
            exp,
            iat,
            nonce,
            raw,
        })
    }
}

fn numeric_date(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|secs| secs as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use p256::elliptic_curve::sec1::ToEncodedPoint;
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const NOW: i64 = 1_700_000_000;
    const ISSUER: &str = "https://idp.example";
    const CLIENT_ID: &str = "blog-client";
    const RSA_PEM: &str = include_str!("../../../tests/fixtures/rsa_private.pem");

    /// Serves a fixed key set and counts fetches
    struct StaticFetcher {
        keys: Mutex<JwkSet>,
        fetches: AtomicUsize,
    }

    impl StaticFetcher {
        fn new(keys: Vec<RawJwk>) -> Arc<Self> {
            Arc::new(Self {
                keys: Mutex::new(JwkSet { keys }),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl JwksFetcher for StaticFetcher {
        async fn fetch(&self, _issuer: &str, _jwks_url: &str) -> Result<JwkSet, OidcError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.keys.lock().unwrap().clone())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl JwksFetcher for FailingFetcher {
        async fn fetch(&self, _issuer: &str, _jwks_url: &str) -> Result<JwkSet, OidcError> {
            Err(OidcError::JwksFetch("connection refused".to_string()))
        }
    }

    fn rsa_jwk() -> RawJwk {
        serde_json::from_str(include_str!("../../../tests/fixtures/rsa_jwk.json")).unwrap()
    }

    fn claims() -> Value {
        json!({
            "iss": ISSUER,
            "sub": "248289761001",
            "aud": CLIENT_ID,
            "iat": NOW,
            "exp": NOW + 3600,
            "nonce": "n-0S6_WzA2Mj"
        })
    }

    fn sign_rs256(claims: &Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        encode(
            &header,
            claims,
            &EncodingKey::from_rsa_pem(RSA_PEM.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    fn es256_pair(kid: &str) -> (EncodingKey, RawJwk) {
        let secret = p256::SecretKey::random(&mut rand::rngs::OsRng);
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();
        let point = secret.public_key().to_encoded_point(false);
        let jwk = RawJwk {
            kty: "EC".to_string(),
            key_use: Some("sig".to_string()),
            kid: Some(kid.to_string()),
            crv: Some("P-256".to_string()),
            x: point.x().map(|x| URL_SAFE_NO_PAD.encode(x)),
            y: point.y().map(|y| URL_SAFE_NO_PAD.encode(y)),
            ..Default::default()
        };
        (EncodingKey::from_ec_pem(pem.as_bytes()).unwrap(), jwk)
    }

    fn verifier(fetcher: Arc<dyn JwksFetcher>) -> (OidcVerifier, ManualClock) {
        let clock = ManualClock::at_timestamp(NOW);
        (OidcVerifier::new(fetcher, Arc::new(clock.clone())), clock)
    }

    fn params() -> VerifyParams<'static> {
        VerifyParams {
            issuer: Some(ISSUER),
            jwks_url: "https://idp.example/jwks",
            audience: CLIENT_ID,
            expected_nonce: None,
        }
    }

    #[tokio::test]
    async fn test_valid_rs256_token() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));
        let token = sign_rs256(&claims(), Some("rsa-test"));

        let claims = verifier
            .verify_id_token(
                &token,
                VerifyParams {
                    expected_nonce: Some("n-0S6_WzA2Mj"),
                    ..params()
                },
            )
            .await
            .unwrap();
        assert_eq!(claims.sub, "248289761001");
        assert_eq!(claims.iss.as_deref(), Some(ISSUER));
        assert_eq!(claims.aud, vec![CLIENT_ID.to_string()]);
        assert_eq!(claims.raw["nonce"], "n-0S6_WzA2Mj");
    }

    #[tokio::test]
    async fn test_valid_es256_token() {
        let (key, jwk) = es256_pair("ec-1");
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk(), jwk]));

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some("ec-1".to_string());
        let token = encode(&header, &claims(), &key).unwrap();

        let claims = verifier.verify_id_token(&token, params()).await.unwrap();
        assert_eq!(claims.sub, "248289761001");
    }

    #[tokio::test]
    async fn test_empty_token() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));
        assert_eq!(
            verifier.verify_id_token("  ", params()).await,
            Err(OidcError::EmptyToken)
        );
    }

    #[tokio::test]
    async fn test_wrong_issuer() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));
        let mut claims = claims();
        claims["iss"] = json!("https://evil.example");

        let token = sign_rs256(&claims, Some("rsa-test"));
        assert_eq!(
            verifier.verify_id_token(&token, params()).await,
            Err(OidcError::IssuerMismatch)
        );
    }

    #[tokio::test]
    async fn test_unknown_kid_refetches_once() {
        let fetcher = StaticFetcher::new(vec![rsa_jwk()]);
        let (verifier, _) = verifier(fetcher.clone());

        let token = sign_rs256(&claims(), Some("rotated"));
        assert_eq!(
            verifier.verify_id_token(&token, params()).await,
            Err(OidcError::KeyNotFound)
        );
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_kid_with_several_keys() {
        let (_, jwk) = es256_pair("ec-1");
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk(), jwk]));

        let token = sign_rs256(&claims(), None);
        assert_eq!(
            verifier.verify_id_token(&token, params()).await,
            Err(OidcError::KeyNotFound)
        );
    }

    #[tokio::test]
    async fn test_missing_kid_with_single_key() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));
        let token = sign_rs256(&claims(), None);
        assert!(verifier.verify_id_token(&token, params()).await.is_ok());
    }

    #[tokio::test]
    async fn test_signature_from_other_key() {
        let (key, _) = es256_pair("ec-1");
        let (_, published) = es256_pair("ec-1");
        let (verifier, _) = verifier(StaticFetcher::new(vec![published]));

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some("ec-1".to_string());
        let token = encode(&header, &claims(), &key).unwrap();

        assert!(matches!(
            verifier.verify_id_token(&token, params()).await,
            Err(OidcError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_symmetric_and_unsigned_tokens_rejected() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("rsa-test".to_string());
        let hs = encode(&header, &claims(), &EncodingKey::from_secret(b"guess")).unwrap();
        assert!(matches!(
            verifier.verify_id_token(&hs, params()).await,
            Err(OidcError::UnsupportedKey(_))
        ));

        let unsigned = format!(
            "{}.{}.",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none","kid":"rsa-test"}"#),
            URL_SAFE_NO_PAD.encode(claims().to_string())
        );
        assert!(verifier.verify_id_token(&unsigned, params()).await.is_err());
    }

    #[tokio::test]
    async fn test_algorithm_must_fit_key() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));
        let mut header = Header::new(Algorithm::RS384);
        header.kid = Some("rsa-test".to_string());
        let token = encode(
            &header,
            &claims(),
            &EncodingKey::from_rsa_pem(RSA_PEM.as_bytes()).unwrap(),
        )
        .unwrap();

        // The JWK pins RS256
        assert!(matches!(
            verifier.verify_id_token(&token, params()).await,
            Err(OidcError::UnsupportedKey(_))
        ));
    }

    #[tokio::test]
    async fn test_single_audience_mismatch() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));
        let mut claims = claims();
        claims["aud"] = json!("someone-else");

        let token = sign_rs256(&claims, Some("rsa-test"));
        assert_eq!(
            verifier.verify_id_token(&token, params()).await,
            Err(OidcError::AudienceMismatch)
        );
    }

    #[tokio::test]
    async fn test_multi_audience_requires_azp() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));
        let mut claims = claims();
        claims["aud"] = json!([CLIENT_ID, "another-client"]);

        let without_azp = sign_rs256(&claims, Some("rsa-test"));
        assert_eq!(
            verifier.verify_id_token(&without_azp, params()).await,
            Err(OidcError::AudienceMismatch)
        );

        claims["azp"] = json!("another-client");
        let wrong_azp = sign_rs256(&claims, Some("rsa-test"));
        assert_eq!(
            verifier.verify_id_token(&wrong_azp, params()).await,
            Err(OidcError::AudienceMismatch)
        );

        claims["azp"] = json!(CLIENT_ID);
        let good = sign_rs256(&claims, Some("rsa-test"));
        let verified = verifier.verify_id_token(&good, params()).await.unwrap();
        assert_eq!(verified.aud.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_or_empty_sub() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));

        let mut claims = claims();
        claims["sub"] = json!("");
        let empty = sign_rs256(&claims, Some("rsa-test"));
        assert_eq!(
            verifier.verify_id_token(&empty, params()).await,
            Err(OidcError::MissingOrEmptySub)
        );

        claims.as_object_mut().unwrap().remove("sub");
        let missing = sign_rs256(&claims, Some("rsa-test"));
        assert_eq!(
            verifier.verify_id_token(&missing, params()).await,
            Err(OidcError::MissingOrEmptySub)
        );
    }

    #[tokio::test]
    async fn test_expiry_leeway_boundary() {
        let (verifier, clock) = verifier(StaticFetcher::new(vec![rsa_jwk()]));
        let token = sign_rs256(&claims(), Some("rsa-test"));

        clock.advance(chrono::Duration::seconds(3600 + 60));
        assert!(verifier.verify_id_token(&token, params()).await.is_ok());

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(
            verifier.verify_id_token(&token, params()).await,
            Err(OidcError::NotYetValidOrExpired)
        );
    }

    #[tokio::test]
    async fn test_not_before_leeway_boundary() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));

        let mut claims = claims();
        claims["nbf"] = json!(NOW + 60);
        claims["iat"] = json!(NOW + 60);
        let at_edge = sign_rs256(&claims, Some("rsa-test"));
        assert!(verifier.verify_id_token(&at_edge, params()).await.is_ok());

        claims["nbf"] = json!(NOW + 61);
        let too_early = sign_rs256(&claims, Some("rsa-test"));
        assert_eq!(
            verifier.verify_id_token(&too_early, params()).await,
            Err(OidcError::NotYetValidOrExpired)
        );
    }

    #[tokio::test]
    async fn test_missing_exp_rejected() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));
        let mut claims = claims();
        claims.as_object_mut().unwrap().remove("exp");

        let token = sign_rs256(&claims, Some("rsa-test"));
        assert_eq!(
            verifier.verify_id_token(&token, params()).await,
            Err(OidcError::NotYetValidOrExpired)
        );
    }

    #[tokio::test]
    async fn test_nonce_mismatch() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));
        let token = sign_rs256(&claims(), Some("rsa-test"));

        let result = verifier
            .verify_id_token(
                &token,
                VerifyParams {
                    expected_nonce: Some("other-nonce"),
                    ..params()
                },
            )
            .await;
        assert_eq!(result, Err(OidcError::NonceMismatch));
    }

    #[tokio::test]
    async fn test_unconfigured_issuer_and_audience_skip_checks() {
        let (verifier, _) = verifier(StaticFetcher::new(vec![rsa_jwk()]));
        let mut claims = claims();
        claims["iss"] = json!("https://whoever.example");
        claims["aud"] = json!("anyone");

        let token = sign_rs256(&claims, Some("rsa-test"));
        let result = verifier
            .verify_id_token(
                &token,
                VerifyParams {
                    issuer: None,
                    audience: "",
                    ..params()
                },
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces() {
        let (verifier, _) = verifier(Arc::new(FailingFetcher));
        let token = sign_rs256(&claims(), Some("rsa-test"));
        assert!(matches!(
            verifier.verify_id_token(&token, params()).await,
            Err(OidcError::JwksFetch(_))
        ));
    }
}
