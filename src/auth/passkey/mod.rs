//! WebAuthn registration and discoverable login.
//!
//! A ceremony is begun and finished in two requests. The begin leg stores a
//! [`CeremonySession`] under a random nonce; the finish leg removes it atomically,
//! so a nonce can be consumed once whether or not the ceremony then succeeds.

pub mod origin;
pub mod session;
pub mod types;
pub mod verify;

pub use origin::{relying_party_from_headers, RelyingParty};
pub use session::{CeremonyKind, CeremonySession};
pub use types::{
    AuthenticationResponse, CreationChallengeResponse, PasskeyDevice, RegistrationResponse,
    RequestChallengeResponse, StoredCredential,
};

use crate::auth::config::PasskeyConfig;
use crate::auth::jwt::TokenIssuer;
use crate::cache::{CacheManager, TypedCache};
use crate::clock::SharedClock;
use crate::database::entities::users::user_handle;
use crate::database::entities::PasskeyRecord;
use crate::database::{CredentialStore, NewPasskey, UserStore};
use crate::error::AppError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use types::{
    decode_b64url, encode_b64url, AuthenticatorSelection, CredentialDescriptor,
    CredentialParameter, PublicKeyCredentialCreationOptions, PublicKeyCredentialRequestOptions,
    RelyingPartyEntity, UserEntity,
};
use verify::{
    format_aaguid, signed_message, AttestationObject, AuthenticatorData, ClientData,
    CosePublicKey, COSE_ALG_ES256, COSE_ALG_RS256, FLAG_BACKUP_ELIGIBLE, FLAG_BACKUP_STATE,
    FLAG_USER_VERIFIED,
};

const DEFAULT_DEVICE_NAME: &str = "Passkey";
const MAX_DEVICE_NAME_LEN: usize = 64;
const USAGE_UPDATE_ATTEMPTS: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CeremonyError {
    #[error("ceremony session is missing, expired or already used")]
    InvalidSession,
    #[error("ceremony began at {expected} but was finished from {actual}")]
    OriginMismatch { expected: String, actual: String },
    #[error("verification failed: {0}")]
    Verification(String),
    #[error("signature counter did not advance (stored {stored}, reported {reported})")]
    CloneSuspected { stored: i64, reported: i64 },
}

/// Options for `navigator.credentials.create()` and the nonce that finishes them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationChallenge {
    pub nonce: String,
    #[serde(flatten)]
    pub options: CreationChallengeResponse,
}

/// Options for `navigator.credentials.get()` and the nonce that finishes them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationChallenge {
    pub nonce: String,
    #[serde(flatten)]
    pub options: RequestChallengeResponse,
}

#[derive(Clone)]
pub struct PasskeyEngine {
    config: PasskeyConfig,
    sessions: TypedCache<CeremonySession>,
    credentials: Arc<dyn CredentialStore>,
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn TokenIssuer>,
    clock: SharedClock,
}

impl PasskeyEngine {
    pub fn new(
        config: PasskeyConfig,
        cache: &CacheManager,
        credentials: Arc<dyn CredentialStore>,
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn TokenIssuer>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            sessions: cache.cache::<CeremonySession>(),
            credentials,
            users,
            tokens,
            clock,
        }
    }

    pub async fn register_begin(
        &self,
        user_id: i32,
        rp: &RelyingParty,
        device_name: Option<String>,
    ) -> Result<RegistrationChallenge, AppError> {
        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("unknown user".to_string()))?;

        let exclude_credentials = self
            .credentials
            .list_by_user(user_id)
            .await?
            .iter()
            .filter_map(descriptor)
            .collect();

        let device_name = device_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        if let Some(name) = &device_name {
            check_device_name(name)?;
        }

        let session = CeremonySession::new(
            CeremonyKind::Registration { user_id },
            &rp.rp_id,
            &rp.origin,
            device_name,
        );
        let nonce = self.store_session(&session).await?;

        let options = PublicKeyCredentialCreationOptions {
            rp: RelyingPartyEntity {
                id: rp.rp_id.clone(),
                name: self.config.rp_name.clone(),
            },
            user: UserEntity {
                id: user.user_handle().to_vec().into(),
                name: user.username.clone(),
                display_name: user.username.clone(),
            },
            challenge: session.challenge.clone().into(),
            pub_key_cred_params: [COSE_ALG_ES256, COSE_ALG_RS256]
                .into_iter()
                .map(|alg| CredentialParameter {
                    kind: "public-key".to_string(),
                    alg,
                })
                .collect(),
            timeout: self.config.timeout_ms,
            exclude_credentials,
            authenticator_selection: AuthenticatorSelection {
                resident_key: "required".to_string(),
                require_resident_key: true,
                user_verification: "preferred".to_string(),
            },
            attestation: "none".to_string(),
        };

        Ok(RegistrationChallenge {
            nonce,
            options: CreationChallengeResponse {
                public_key: options,
            },
        })
    }

    pub async fn register_finish(
        &self,
        user_id: i32,
        rp: &RelyingParty,
        nonce: &str,
        response: &RegistrationResponse,
    ) -> Result<PasskeyDevice, AppError> {
        let session = self
            .take_session(CeremonyKind::Registration { user_id }, nonce, rp)
            .await?;

        let verified = verify_registration(&session, response).inspect_err(|err| {
            warn!(user_id, error = %err, "passkey registration rejected");
        })?;

        let credential_id = encode_b64url(&verified.credential_id);
        if self
            .credentials
            .get_by_credential_id(&credential_id)
            .await?
            .is_some()
        {
            return Err(AppError::Validation(
                "credential is already registered".to_string(),
            ));
        }

        let stored = StoredCredential {
            alg: verified.public_key.alg(),
            attestation_format: verified.attestation_format,
            transports: response.response.transports.clone(),
            user_verified: verified.flags & FLAG_USER_VERIFIED != 0,
            backup_eligible: verified.flags & FLAG_BACKUP_ELIGIBLE != 0,
            backup_state: verified.flags & FLAG_BACKUP_STATE != 0,
        };
        let credential_json = serde_json::to_string(&stored)
            .map_err(|e| AppError::Internal(format!("failed to serialize credential: {}", e)))?;

        let record = self
            .credentials
            .create(
                NewPasskey {
                    user_id,
                    credential_id,
                    credential_json,
                    public_key: encode_b64url(&verified.public_key_cose),
                    sign_count: i64::from(verified.sign_count),
                    device_name: session
                        .device_name
                        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
                    aaguid: format_aaguid(&verified.aaguid),
                },
                self.clock.now(),
            )
            .await?;

        info!(user_id, passkey_id = record.id, "passkey registered");
        Ok(record.into())
    }

    pub async fn login_begin(&self, rp: &RelyingParty) -> Result<AuthenticationChallenge, AppError> {
        let session = CeremonySession::new(CeremonyKind::Authentication, &rp.rp_id, &rp.origin, None);
        let nonce = self.store_session(&session).await?;

        Ok(AuthenticationChallenge {
            nonce,
            options: RequestChallengeResponse {
                public_key: PublicKeyCredentialRequestOptions {
                    challenge: session.challenge.clone().into(),
                    timeout: self.config.timeout_ms,
                    rp_id: rp.rp_id.clone(),
                    // Discoverable login: the authenticator offers its resident credentials
                    allow_credentials: Vec::new(),
                    user_verification: "preferred".to_string(),
                },
            },
        })
    }

    /// Verify an assertion and issue a session token for the credential's owner.
    pub async fn login_finish(
        &self,
        rp: &RelyingParty,
        nonce: &str,
        response: &AuthenticationResponse,
    ) -> Result<String, AppError> {
        let session = self
            .take_session(CeremonyKind::Authentication, nonce, rp)
            .await?;

        let raw_id = if response.raw_id.as_slice().is_empty() {
            decode_b64url(&response.id).unwrap_or_default()
        } else {
            response.raw_id.0.clone()
        };
        let record = self
            .credentials
            .get_by_credential_id(&encode_b64url(&raw_id))
            .await?
            .ok_or_else(|| CeremonyError::Verification("unknown credential".to_string()))?;

        let reported = verify_assertion(&session, &record, response).inspect_err(|err| {
            warn!(
                user_id = record.user_id,
                passkey_id = record.id,
                error = %err,
                "passkey login rejected"
            );
        })?;

        let owner_id = record.user_id;
        self.record_usage(record, reported).await?;

        let user = self
            .users
            .get_by_id(owner_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("credential owner no longer exists".to_string()))?;

        let token = self.tokens.issue(&user)?;
        info!(user_id = user.id, "passkey login");
        Ok(token)
    }

    pub async fn list(&self, user_id: i32) -> Result<Vec<PasskeyDevice>, AppError> {
        Ok(self
            .credentials
            .list_by_user(user_id)
            .await?
            .into_iter()
            .map(PasskeyDevice::from)
            .collect())
    }

    pub async fn rename(
        &self,
        user_id: i32,
        passkey_id: i32,
        device_name: &str,
    ) -> Result<PasskeyDevice, AppError> {
        let device_name = device_name.trim();
        if device_name.is_empty() {
            return Err(AppError::Validation("device name is required".to_string()));
        }
        check_device_name(device_name)?;

        self.owned(user_id, passkey_id).await?;
        let record = self
            .credentials
            .update_device_name(passkey_id, device_name)
            .await?;
        Ok(record.into())
    }

    /// Owners may delete any of their passkeys, including the last one.
    pub async fn delete(&self, user_id: i32, passkey_id: i32) -> Result<(), AppError> {
        self.owned(user_id, passkey_id).await?;
        self.credentials.delete(passkey_id).await?;
        info!(user_id, passkey_id, "passkey deleted");
        Ok(())
    }

    async fn owned(&self, user_id: i32, passkey_id: i32) -> Result<PasskeyRecord, AppError> {
        self.credentials
            .get_by_id(passkey_id)
            .await?
            .filter(|record| record.user_id == user_id)
            .ok_or_else(|| AppError::NotFound("passkey not found".to_string()))
    }

    async fn store_session(&self, session: &CeremonySession) -> Result<String, AppError> {
        let nonce = session::new_nonce();
        self.sessions
            .set_with_ttl(
                &session.cache_key(&nonce),
                session,
                Some(Duration::from_secs(self.config.session_ttl)),
            )
            .await?;
        Ok(nonce)
    }

    async fn take_session(
        &self,
        kind: CeremonyKind,
        nonce: &str,
        rp: &RelyingParty,
    ) -> Result<CeremonySession, AppError> {
        let session = self
            .sessions
            .take(&session::session_key(&kind, nonce))
            .await?
            .filter(|session| session.kind == kind)
            .ok_or(CeremonyError::InvalidSession)?;

        if session.origin != rp.origin {
            warn!(expected = %session.origin, actual = %rp.origin, "passkey ceremony origin mismatch");
            return Err(CeremonyError::OriginMismatch {
                expected: session.origin,
                actual: rp.origin.clone(),
            }
            .into());
        }
        Ok(session)
    }

    /// Store `max(stored, reported)` with a compare-and-swap, re-checking the counter
    /// policy whenever a concurrent login moved the stored value first.
    async fn record_usage(&self, mut record: PasskeyRecord, reported: i64) -> Result<(), AppError> {
        for _ in 0..USAGE_UPDATE_ATTEMPTS {
            check_counter(record.sign_count, reported).inspect_err(|_| {
                warn!(
                    user_id = record.user_id,
                    passkey_id = record.id,
                    stored = record.sign_count,
                    reported,
                    "passkey counter regressed, possible cloned authenticator"
                );
            })?;

            let new_count = record.sign_count.max(reported);
            if self
                .credentials
                .update_usage(record.id, record.sign_count, new_count, self.clock.now())
                .await?
            {
                return Ok(());
            }

            record = self
                .credentials
                .get_by_id(record.id)
                .await?
                .ok_or(CeremonyError::InvalidSession)?;
        }

        Err(AppError::Internal(
            "passkey counter kept changing during login".to_string(),
        ))
    }
}

/// A counter of zero means the authenticator does not keep one.
fn check_counter(stored: i64, reported: i64) -> Result<(), CeremonyError> {
    if reported == 0 || reported > stored {
        Ok(())
    } else {
        Err(CeremonyError::CloneSuspected { stored, reported })
    }
}

fn check_device_name(name: &str) -> Result<(), AppError> {
    if name.chars().count() > MAX_DEVICE_NAME_LEN {
        return Err(AppError::Validation(format!(
            "device name must be at most {} characters",
            MAX_DEVICE_NAME_LEN
        )));
    }
    Ok(())
}

fn descriptor(record: &PasskeyRecord) -> Option<CredentialDescriptor> {
    let transports = serde_json::from_str::<StoredCredential>(&record.credential_json)
        .map(|stored| stored.transports)
        .unwrap_or_default();
    Some(CredentialDescriptor {
        kind: "public-key".to_string(),
        id: decode_b64url(&record.credential_id)?.into(),
        transports,
    })
}

struct VerifiedRegistration {
    credential_id: Vec<u8>,
    public_key: CosePublicKey,
    public_key_cose: Vec<u8>,
    aaguid: [u8; 16],
    sign_count: u32,
    flags: u8,
    attestation_format: String,
}

fn verify_registration(
    session: &CeremonySession,
    response: &RegistrationResponse,
) -> Result<VerifiedRegistration, CeremonyError> {
    let client_data_json = response.response.client_data_json.as_slice();
    ClientData::parse(client_data_json)?.check(
        "webauthn.create",
        &session.challenge,
        &session.origin,
    )?;

    let attestation = AttestationObject::parse(response.response.attestation_object.as_slice())?;
    attestation.auth_data.check_rp_and_presence(&session.rp_id)?;

    let credential = attestation
        .auth_data
        .attested_credential
        .clone()
        .ok_or_else(|| CeremonyError::Verification("no attested credential data".to_string()))?;
    if !response.raw_id.as_slice().is_empty() && response.raw_id.as_slice() != credential.credential_id
    {
        return Err(CeremonyError::Verification(
            "raw id differs from attested credential id".to_string(),
        ));
    }
    attestation.verify_statement(&credential, client_data_json)?;

    Ok(VerifiedRegistration {
        credential_id: credential.credential_id,
        public_key: credential.public_key,
        public_key_cose: credential.public_key_cose,
        aaguid: credential.aaguid,
        sign_count: attestation.auth_data.sign_count,
        flags: attestation.auth_data.flags,
        attestation_format: attestation.format,
    })
}

/// Returns the counter the authenticator reported.
fn verify_assertion(
    session: &CeremonySession,
    record: &PasskeyRecord,
    response: &AuthenticationResponse,
) -> Result<i64, CeremonyError> {
    let assertion = &response.response;

    let handle = assertion
        .user_handle
        .as_ref()
        .filter(|handle| !handle.as_slice().is_empty())
        .ok_or_else(|| CeremonyError::Verification("user handle is required".to_string()))?;
    if handle.as_slice() != user_handle(record.user_id) {
        return Err(CeremonyError::Verification(
            "user handle does not match the credential owner".to_string(),
        ));
    }

    let client_data_json = assertion.client_data_json.as_slice();
    ClientData::parse(client_data_json)?.check("webauthn.get", &session.challenge, &session.origin)?;

    let authenticator_data = assertion.authenticator_data.as_slice();
    let auth_data = AuthenticatorData::parse(authenticator_data)?;
    auth_data.check_rp_and_presence(&session.rp_id)?;

    let public_key = decode_b64url(&record.public_key)
        .ok_or_else(|| CeremonyError::Verification("stored public key is corrupt".to_string()))
        .and_then(|cose| CosePublicKey::from_cbor(&cose))?;
    public_key.verify(
        &signed_message(authenticator_data, client_data_json),
        assertion.signature.as_slice(),
    )?;

    Ok(i64::from(auth_data.sign_count))
}
