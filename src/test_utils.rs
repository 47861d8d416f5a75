//! Helpers shared by unit tests and the integration tests under `tests/`.

use crate::{
    auth::config::OAuthProvider,
    auth::passkey::types::{
        encode_b64url, AuthenticationResponse, AuthenticatorAssertionResponse,
        AuthenticatorAttestationResponse, CreationChallengeResponse, RegistrationResponse,
        RequestChallengeResponse,
    },
    auth::passkey::verify::{
        format_aaguid, signed_message, CosePublicKey, COSE_ALG_ES256, FLAG_ATTESTED_CREDENTIAL,
        FLAG_USER_PRESENT, FLAG_USER_VERIFIED,
    },
    cache::CacheManager,
    clock::{ManualClock, SharedClock},
    config::Config,
    database::{DatabaseConfig, DatabaseManager, DatabaseManagerImpl},
    server::Server,
};
use ciborium::value::Value;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

/// Test server builder for creating instances on in-memory backends
pub struct TestServerBuilder {
    config: Config,
    clock: ManualClock,
}

impl TestServerBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.jwt.secret = "test-secret".to_string();
        Self {
            config,
            clock: ManualClock::at_timestamp(1_700_000_000),
        }
    }

    /// Set a custom configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_provider(mut self, name: &str, provider: OAuthProvider) -> Self {
        self.config
            .oauth
            .providers
            .insert(name.to_string(), provider);
        self
    }

    /// Drive token, state, ceremony and JWKS expiry from `clock`
    pub fn with_clock(mut self, clock: ManualClock) -> Self {
        self.clock = clock;
        self
    }

    /// Build the test server; the schema is migrated before it is returned
    pub async fn build(self) -> Server {
        let mut config = self.config;
        config.database = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        config.cache.backend = "memory".to_string();

        let clock: SharedClock = Arc::new(self.clock);
        let database = DatabaseManagerImpl::new_from_config(&config.database)
            .await
            .unwrap();
        database.migrate().await.unwrap();
        let cache = CacheManager::new_memory_with_clock(clock.clone());

        Server::from_parts(config, clock, Arc::new(database), cache).unwrap()
    }
}

impl Default for TestServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A software authenticator holding one P-256 resident credential.
pub struct SoftAuthenticator {
    key: SigningKey,
    pub credential_id: Vec<u8>,
    pub aaguid: [u8; 16],
    user_handle: Mutex<Option<Vec<u8>>>,
}

impl SoftAuthenticator {
    pub fn new() -> Self {
        let mut credential_id = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut credential_id);
        Self {
            key: SigningKey::random(&mut rand::rngs::OsRng),
            credential_id,
            aaguid: [
                0x6f, 0x0f, 0xd1, 0x5c, 0x2a, 0x41, 0x4b, 0x3e, 0x9a, 0x1d, 0x07, 0x58, 0x8c,
                0xe2, 0x31, 0x90,
            ],
            user_handle: Mutex::new(None),
        }
    }

    pub fn aaguid_string(&self) -> String {
        format_aaguid(&self.aaguid)
    }

    pub fn cose_public_key(&self) -> CosePublicKey {
        let point = self.key.verifying_key().to_encoded_point(false);
        CosePublicKey::Es256 {
            x: point.x().map(|x| x.to_vec()).unwrap_or_default(),
            y: point.y().map(|y| y.to_vec()).unwrap_or_default(),
        }
    }

    fn cose_key_bytes(&self) -> Vec<u8> {
        let CosePublicKey::Es256 { x, y } = self.cose_public_key() else {
            unreachable!("soft authenticator keys are P-256");
        };
        cbor(&Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (Value::Integer(3.into()), Value::Integer(COSE_ALG_ES256.into())),
            (Value::Integer((-1).into()), Value::Integer(1.into())),
            (Value::Integer((-2).into()), Value::Bytes(x)),
            (Value::Integer((-3).into()), Value::Bytes(y)),
        ]))
    }

    fn authenticator_data(&self, rp_id: &str, flags: u8, counter: u32, attested: bool) -> Vec<u8> {
        let mut data = Sha256::digest(rp_id.as_bytes()).to_vec();
        data.push(flags);
        data.extend_from_slice(&counter.to_be_bytes());
        if attested {
            data.extend_from_slice(&self.aaguid);
            data.extend_from_slice(&(self.credential_id.len() as u16).to_be_bytes());
            data.extend_from_slice(&self.credential_id);
            data.extend_from_slice(&self.cose_key_bytes());
        }
        data
    }

    /// Authenticator data for an assertion, without attested credential data
    pub fn assertion_data(&self, rp_id: &str, counter: u32) -> Vec<u8> {
        self.authenticator_data(rp_id, FLAG_USER_PRESENT | FLAG_USER_VERIFIED, counter, false)
    }

    /// ASN.1 DER ES256 signature
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.key.sign(message);
        signature.to_der().as_bytes().to_vec()
    }

    /// CBOR attestation object in `none` or `packed` (self attestation) format
    pub fn attestation_object(
        &self,
        rp_id: &str,
        counter: u32,
        format: &str,
        client_data_json: &[u8],
    ) -> Vec<u8> {
        let auth_data = self.authenticator_data(
            rp_id,
            FLAG_USER_PRESENT | FLAG_USER_VERIFIED | FLAG_ATTESTED_CREDENTIAL,
            counter,
            true,
        );
        let statement = match format {
            "packed" => vec![
                (
                    Value::Text("alg".to_string()),
                    Value::Integer(COSE_ALG_ES256.into()),
                ),
                (
                    Value::Text("sig".to_string()),
                    Value::Bytes(self.sign(&signed_message(&auth_data, client_data_json))),
                ),
            ],
            _ => Vec::new(),
        };
        cbor(&Value::Map(vec![
            (
                Value::Text("fmt".to_string()),
                Value::Text(format.to_string()),
            ),
            (Value::Text("attStmt".to_string()), Value::Map(statement)),
            (Value::Text("authData".to_string()), Value::Bytes(auth_data)),
        ]))
    }

    pub fn register(&self, options: &CreationChallengeResponse, origin: &str) -> RegistrationResponse {
        self.register_with_format(options, origin, "none")
    }

    pub fn register_with_format(
        &self,
        options: &CreationChallengeResponse,
        origin: &str,
        format: &str,
    ) -> RegistrationResponse {
        let options = &options.public_key;
        if let Ok(mut handle) = self.user_handle.lock() {
            *handle = Some(options.user.id.0.clone());
        }

        let client_data_json =
            client_data("webauthn.create", options.challenge.as_slice(), origin);
        let attestation_object =
            self.attestation_object(&options.rp.id, 0, format, &client_data_json);

        RegistrationResponse {
            id: encode_b64url(&self.credential_id),
            raw_id: self.credential_id.clone().into(),
            kind: "public-key".to_string(),
            response: AuthenticatorAttestationResponse {
                client_data_json: client_data_json.into(),
                attestation_object: attestation_object.into(),
                transports: vec!["internal".to_string()],
            },
        }
    }

    /// Assert with the user handle remembered from registration
    pub fn authenticate(
        &self,
        options: &RequestChallengeResponse,
        origin: &str,
        counter: u32,
    ) -> AuthenticationResponse {
        let handle = self.user_handle.lock().ok().and_then(|handle| handle.clone());
        self.authenticate_with_handle(options, origin, counter, handle)
    }

    pub fn authenticate_with_handle(
        &self,
        options: &RequestChallengeResponse,
        origin: &str,
        counter: u32,
        user_handle: Option<Vec<u8>>,
    ) -> AuthenticationResponse {
        let options = &options.public_key;
        let client_data_json = client_data("webauthn.get", options.challenge.as_slice(), origin);
        let authenticator_data = self.assertion_data(&options.rp_id, counter);
        let signature = self.sign(&signed_message(&authenticator_data, &client_data_json));

        AuthenticationResponse {
            id: encode_b64url(&self.credential_id),
            raw_id: self.credential_id.clone().into(),
            kind: "public-key".to_string(),
            response: AuthenticatorAssertionResponse {
                client_data_json: client_data_json.into(),
                authenticator_data: authenticator_data.into(),
                signature: signature.into(),
                user_handle: user_handle.map(Into::into),
            },
        }
    }
}

impl Default for SoftAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

fn client_data(kind: &str, challenge: &[u8], origin: &str) -> Vec<u8> {
    serde_json::json!({
        "type": kind,
        "challenge": encode_b64url(challenge),
        "origin": origin,
        "crossOrigin": false
    })
    .to_string()
    .into_bytes()
}

fn cbor(value: &Value) -> Vec<u8> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).unwrap();
    bytes
}
