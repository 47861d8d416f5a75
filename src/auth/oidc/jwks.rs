use super::OidcError;
use crate::clock::SharedClock;
use async_trait::async_trait;
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Some providers pad their JWK members, most do not
const JWK_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A JWK as published; members are kept raw so unsupported keys can be skipped
/// without failing the whole set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawJwk {
    pub kty: String,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<RawJwk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    EcP256,
    EcP384,
}

impl KeyFamily {
    pub fn allows(&self, alg: Algorithm) -> bool {
        match self {
            KeyFamily::Rsa => matches!(
                alg,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            KeyFamily::EcP256 => alg == Algorithm::ES256,
            KeyFamily::EcP384 => alg == Algorithm::ES384,
        }
    }
}

#[derive(Clone)]
pub struct VerificationKey {
    pub decoding_key: DecodingKey,
    pub family: KeyFamily,
    /// `alg` pinned by the JWK, if any
    pub alg: Option<String>,
}

/// Usable keys of one JWKS, indexed by `kid`.
pub struct KeySet {
    keys: HashMap<String, VerificationKey>,
}

impl KeySet {
    /// Keep signing keys we can reconstruct; skip the rest.
    pub fn from_jwks(jwks: &JwkSet) -> Self {
        let mut keys = HashMap::new();
        let single = jwks.keys.len() == 1;

        for jwk in &jwks.keys {
            if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
                continue;
            }

            let key = match build_key(jwk) {
                Ok(key) => key,
                Err(reason) => {
                    tracing::debug!(kid = ?jwk.kid, kty = %jwk.kty, %reason, "skipping JWK");
                    continue;
                }
            };

            let index = match (&jwk.kid, &jwk.alg) {
                (Some(kid), _) => kid.clone(),
                (None, Some(alg)) => alg.clone(),
                (None, None) if single => "default".to_string(),
                (None, None) => continue,
            };
            keys.insert(index, key);
        }

        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// A `kid` must match exactly; without one, only an unambiguous set resolves.
    pub fn resolve(&self, kid: Option<&str>) -> Option<&VerificationKey> {
        match kid {
            Some(kid) => self.keys.get(kid),
            None if self.keys.len() == 1 => self.keys.values().next(),
            None => None,
        }
    }
}

fn decode_member(value: &Option<String>, name: &str) -> Result<Vec<u8>, String> {
    let value = value.as_deref().ok_or_else(|| format!("missing {}", name))?;
    JWK_BASE64
        .decode(value)
        .map_err(|e| format!("bad {}: {}", name, e))
}

fn build_key(jwk: &RawJwk) -> Result<VerificationKey, String> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = decode_member(&jwk.n, "n")?;
            let e = decode_member(&jwk.e, "e")?;
            // Rejects degenerate moduli and exponents before they reach the verifier
            rsa::RsaPublicKey::new(
                rsa::BigUint::from_bytes_be(&n),
                rsa::BigUint::from_bytes_be(&e),
            )
            .map_err(|e| format!("invalid RSA key: {}", e))?;

            Ok(VerificationKey {
                decoding_key: DecodingKey::from_rsa_raw_components(&n, &e),
                family: KeyFamily::Rsa,
                alg: jwk.alg.clone(),
            })
        }
        "EC" => {
            let x = decode_member(&jwk.x, "x")?;
            let y = decode_member(&jwk.y, "y")?;
            let (family, size) = match jwk.crv.as_deref() {
                Some("P-256") => (KeyFamily::EcP256, 32),
                Some("P-384") => (KeyFamily::EcP384, 48),
                other => return Err(format!("unsupported curve {:?}", other)),
            };
            if x.len() != size || y.len() != size {
                return Err("coordinate length does not match curve".to_string());
            }

            let mut point = Vec::with_capacity(1 + 2 * size);
            point.push(0x04);
            point.extend_from_slice(&x);
            point.extend_from_slice(&y);

            let on_curve = match family {
                KeyFamily::EcP256 => p256::PublicKey::from_sec1_bytes(&point).is_ok(),
                _ => p384::PublicKey::from_sec1_bytes(&point).is_ok(),
            };
            if !on_curve {
                return Err("point is not on the curve".to_string());
            }

            // The EC decoding key is the uncompressed SEC1 point, despite the name
            Ok(VerificationKey {
                decoding_key: DecodingKey::from_ec_der(&point),
                family,
                alg: jwk.alg.clone(),
            })
        }
        other => Err(format!("unsupported kty {}", other)),
    }
}

/// Source of a provider's published keys.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch(&self, issuer: &str, jwks_url: &str) -> Result<JwkSet, OidcError>;

    /// Forget anything remembered for `issuer`, e.g. after a key rotation.
    fn invalidate(&self, _issuer: &str, _jwks_url: &str) {}
}

/// Single GET per call; redirects are not followed.
#[derive(Clone)]
pub struct HttpJwksFetcher {
    client: reqwest::Client,
}

impl HttpJwksFetcher {
    pub fn new(timeout: Duration) -> Result<Self, OidcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OidcError::JwksFetch(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch(&self, issuer: &str, jwks_url: &str) -> Result<JwkSet, OidcError> {
        tracing::debug!(issuer, jwks_url, "fetching JWKS");

        let response = self
            .client
            .get(jwks_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| OidcError::JwksFetch(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OidcError::JwksFetch(format!(
                "JWKS endpoint returned {}",
                status
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| OidcError::JwksFetch(format!("malformed JWKS: {}", e)))
    }
}

struct CachedKeys {
    jwks_url: String,
    keys: JwkSet,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// Caches JWKS per issuer and collapses concurrent fetches for the same issuer
/// into one upstream request.
pub struct CachedJwksFetcher {
    inner: Arc<dyn JwksFetcher>,
    ttl: chrono::Duration,
    clock: SharedClock,
    slots: DashMap<String, Arc<Mutex<Option<CachedKeys>>>>,
}

impl CachedJwksFetcher {
    pub fn new(inner: Arc<dyn JwksFetcher>, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            inner,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
            clock,
            slots: DashMap::new(),
        }
    }

    fn slot_key(issuer: &str, jwks_url: &str) -> String {
        if issuer.is_empty() {
            jwks_url.to_string()
        } else {
            issuer.to_string()
        }
    }
}

#[async_trait]
impl JwksFetcher for CachedJwksFetcher {
    async fn fetch(&self, issuer: &str, jwks_url: &str) -> Result<JwkSet, OidcError> {
        let slot = self
            .slots
            .entry(Self::slot_key(issuer, jwks_url))
            .or_default()
            .clone();

        // Waiters queue here while the first caller fetches
        let mut cached = slot.lock().await;
        let now = self.clock.now();
        if let Some(entry) = cached.as_ref() {
            if entry.jwks_url == jwks_url && now < entry.expires_at {
                tracing::debug!(issuer, "JWKS cache hit");
                return Ok(entry.keys.clone());
            }
        }

        let keys = self.inner.fetch(issuer, jwks_url).await?;
        if self.ttl > chrono::Duration::zero() {
            *cached = Some(CachedKeys {
                jwks_url: jwks_url.to_string(),
                keys: keys.clone(),
                expires_at: now + self.ttl,
            });
        }
        Ok(keys)
    }

    fn invalidate(&self, issuer: &str, jwks_url: &str) {
        self.slots.remove(&Self::slot_key(issuer, jwks_url));
    }
}
