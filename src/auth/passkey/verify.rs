//! Authenticator data, COSE keys, attestation objects and assertion signatures.

use super::CeremonyError;
use ciborium::value::Value;
use p256::ecdsa::signature::Verifier;
use serde::Deserialize;
use sha2::{Digest, Sha256};

pub const COSE_ALG_ES256: i64 = -7;
pub const COSE_ALG_RS256: i64 = -257;

const COSE_KTY_EC2: i128 = 2;
const COSE_KTY_RSA: i128 = 3;
const COSE_CRV_P256: i128 = 1;

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_BACKUP_ELIGIBLE: u8 = 0x08;
pub const FLAG_BACKUP_STATE: u8 = 0x10;
pub const FLAG_ATTESTED_CREDENTIAL: u8 = 0x40;

fn invalid(msg: impl Into<String>) -> CeremonyError {
    CeremonyError::Verification(msg.into())
}

/// Credential public key decoded from its COSE form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CosePublicKey {
    Es256 { x: Vec<u8>, y: Vec<u8> },
    Rs256 { n: Vec<u8>, e: Vec<u8> },
}

impl CosePublicKey {
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CeremonyError> {
        let value: Value =
            ciborium::de::from_reader(bytes).map_err(|_| invalid("malformed COSE key"))?;
        Self::from_value(&value)
    }

    fn from_value(value: &Value) -> Result<Self, CeremonyError> {
        let map = value
            .as_map()
            .ok_or_else(|| invalid("COSE key is not a map"))?;

        let kty = int_entry(map, 1).ok_or_else(|| invalid("COSE key has no kty"))?;
        let alg = int_entry(map, 3).ok_or_else(|| invalid("COSE key has no alg"))?;

        match (kty, alg as i64) {
            (COSE_KTY_EC2, COSE_ALG_ES256) => {
                if int_entry(map, -1) != Some(COSE_CRV_P256) {
                    return Err(invalid("unsupported EC2 curve"));
                }
                let x = bytes_entry(map, -2).ok_or_else(|| invalid("EC2 key has no x"))?;
                let y = bytes_entry(map, -3).ok_or_else(|| invalid("EC2 key has no y"))?;
                let key = CosePublicKey::Es256 {
                    x: x.to_vec(),
                    y: y.to_vec(),
                };
                key.es256_verifying_key()?;
                Ok(key)
            }
            (COSE_KTY_RSA, COSE_ALG_RS256) => {
                let n = bytes_entry(map, -1).ok_or_else(|| invalid("RSA key has no n"))?;
                let e = bytes_entry(map, -2).ok_or_else(|| invalid("RSA key has no e"))?;
                let key = CosePublicKey::Rs256 {
                    n: n.to_vec(),
                    e: e.to_vec(),
                };
                key.rsa_public_key()?;
                Ok(key)
            }
            _ => Err(invalid(format!(
                "unsupported credential algorithm (kty {}, alg {})",
                kty, alg
            ))),
        }
    }

    pub fn alg(&self) -> i64 {
        match self {
            CosePublicKey::Es256 { .. } => COSE_ALG_ES256,
            CosePublicKey::Rs256 { .. } => COSE_ALG_RS256,
        }
    }

    fn es256_verifying_key(&self) -> Result<p256::ecdsa::VerifyingKey, CeremonyError> {
        let CosePublicKey::Es256 { x, y } = self else {
            return Err(invalid("not an EC2 key"));
        };
        if x.len() != 32 || y.len() != 32 {
            return Err(invalid("EC2 coordinates have the wrong length"));
        }
        let mut point = Vec::with_capacity(65);
        point.push(0x04);
        point.extend_from_slice(x);
        point.extend_from_slice(y);
        p256::ecdsa::VerifyingKey::from_sec1_bytes(&point)
            .map_err(|_| invalid("EC2 point is not on P-256"))
    }

    fn rsa_public_key(&self) -> Result<rsa::RsaPublicKey, CeremonyError> {
        let CosePublicKey::Rs256 { n, e } = self else {
            return Err(invalid("not an RSA key"));
        };
        rsa::RsaPublicKey::new(
            rsa::BigUint::from_bytes_be(n),
            rsa::BigUint::from_bytes_be(e),
        )
        .map_err(|e| invalid(format!("invalid RSA key: {}", e)))
    }

    /// Verify `signature` over `message` (ES256 signatures are ASN.1 DER).
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CeremonyError> {
        match self {
            CosePublicKey::Es256 { .. } => {
                let key = self.es256_verifying_key()?;
                let signature = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|_| invalid("malformed ES256 signature"))?;
                key.verify(message, &signature)
                    .map_err(|_| invalid("signature mismatch"))
            }
            CosePublicKey::Rs256 { .. } => {
                let key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(self.rsa_public_key()?);
                let signature = rsa::pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| invalid("malformed RS256 signature"))?;
                key.verify(message, &signature)
                    .map_err(|_| invalid("signature mismatch"))
            }
        }
    }
}

fn int_entry(map: &[(Value, Value)], key: i128) -> Option<i128> {
    map.iter()
        .find(|(k, _)| k.as_integer().map(i128::from) == Some(key))
        .and_then(|(_, v)| v.as_integer())
        .map(i128::from)
}

fn bytes_entry(map: &[(Value, Value)], key: i128) -> Option<&[u8]> {
    map.iter()
        .find(|(k, _)| k.as_integer().map(i128::from) == Some(key))
        .and_then(|(_, v)| v.as_bytes())
        .map(Vec::as_slice)
}

fn text_entry<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredential {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// COSE encoding as sent by the authenticator
    pub public_key_cose: Vec<u8>,
    pub public_key: CosePublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredential>,
}

impl AuthenticatorData {
    pub fn parse(data: &[u8]) -> Result<Self, CeremonyError> {
        if data.len() < 37 {
            return Err(invalid("authenticator data is truncated"));
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&data[..32]);
        let flags = data[32];
        let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

        let attested_credential = if flags & FLAG_ATTESTED_CREDENTIAL != 0 {
            Some(parse_attested_credential(&data[37..])?)
        } else {
            None
        };

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        })
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// The authenticator must have hashed the RP ID we expect and seen a user.
    pub fn check_rp_and_presence(&self, rp_id: &str) -> Result<(), CeremonyError> {
        if self.rp_id_hash.as_slice() != Sha256::digest(rp_id.as_bytes()).as_slice() {
            return Err(invalid("RP ID hash mismatch"));
        }
        if !self.has(FLAG_USER_PRESENT) {
            return Err(invalid("user was not present"));
        }
        Ok(())
    }
}

fn parse_attested_credential(data: &[u8]) -> Result<AttestedCredential, CeremonyError> {
    if data.len() < 18 {
        return Err(invalid("attested credential data is truncated"));
    }
    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&data[..16]);

    let id_len = u16::from_be_bytes([data[16], data[17]]) as usize;
    let rest = &data[18..];
    if rest.len() < id_len {
        return Err(invalid("credential id is truncated"));
    }
    let (credential_id, key_and_extensions) = rest.split_at(id_len);

    // The COSE key is followed by optional extensions; measure what it consumed
    let mut reader = key_and_extensions;
    let value: Value =
        ciborium::de::from_reader(&mut reader).map_err(|_| invalid("malformed COSE key"))?;
    let consumed = key_and_extensions.len() - reader.len();

    Ok(AttestedCredential {
        aaguid,
        credential_id: credential_id.to_vec(),
        public_key_cose: key_and_extensions[..consumed].to_vec(),
        public_key: CosePublicKey::from_value(&value)?,
    })
}

/// Collected client data, checked against the ceremony it claims to belong to.
#[derive(Debug, Deserialize)]
pub struct ClientData {
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: String,
    pub origin: String,
}

impl ClientData {
    pub fn parse(raw: &[u8]) -> Result<Self, CeremonyError> {
        serde_json::from_slice(raw).map_err(|_| invalid("malformed client data"))
    }

    pub fn check(
        &self,
        expected_type: &str,
        challenge: &[u8],
        origin: &str,
    ) -> Result<(), CeremonyError> {
        if self.kind != expected_type {
            return Err(invalid(format!("unexpected client data type {}", self.kind)));
        }
        if super::types::decode_b64url(&self.challenge).as_deref() != Some(challenge) {
            return Err(invalid("challenge mismatch"));
        }
        if self.origin != origin {
            return Err(invalid("client data origin mismatch"));
        }
        Ok(())
    }
}

/// `authenticatorData || SHA-256(clientDataJSON)`, the bytes every signature covers
pub fn signed_message(authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let mut message = authenticator_data.to_vec();
    message.extend_from_slice(&Sha256::digest(client_data_json));
    message
}

#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub format: String,
    pub auth_data_raw: Vec<u8>,
    pub auth_data: AuthenticatorData,
    statement: Vec<(Value, Value)>,
}

impl AttestationObject {
    pub fn parse(raw: &[u8]) -> Result<Self, CeremonyError> {
        let value: Value =
            ciborium::de::from_reader(raw).map_err(|_| invalid("malformed attestation object"))?;
        let map = value
            .as_map()
            .ok_or_else(|| invalid("attestation object is not a map"))?;

        let format = text_entry(map, "fmt")
            .and_then(Value::as_text)
            .ok_or_else(|| invalid("attestation has no fmt"))?
            .to_string();
        let auth_data_raw = text_entry(map, "authData")
            .and_then(Value::as_bytes)
            .ok_or_else(|| invalid("attestation has no authData"))?
            .clone();
        let statement = text_entry(map, "attStmt")
            .and_then(Value::as_map)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            format,
            auth_data: AuthenticatorData::parse(&auth_data_raw)?,
            auth_data_raw,
            statement,
        })
    }

    /// `none` is accepted. `packed` without a certificate chain is self attestation and
    /// its signature is checked with the new credential key. Other formats are recorded
    /// but not evaluated, since the options ask for no attestation.
    pub fn verify_statement(
        &self,
        credential: &AttestedCredential,
        client_data_json: &[u8],
    ) -> Result<(), CeremonyError> {
        if self.format != "packed" {
            return Ok(());
        }
        if text_entry(&self.statement, "x5c").is_some() {
            tracing::debug!("packed attestation with certificate chain not evaluated");
            return Ok(());
        }

        let alg = text_entry(&self.statement, "alg")
            .and_then(Value::as_integer)
            .map(i128::from)
            .ok_or_else(|| invalid("packed attestation has no alg"))?;
        if alg != i128::from(credential.public_key.alg()) {
            return Err(invalid("packed attestation alg differs from credential"));
        }
        let sig = text_entry(&self.statement, "sig")
            .and_then(Value::as_bytes)
            .ok_or_else(|| invalid("packed attestation has no sig"))?;

        credential
            .public_key
            .verify(&signed_message(&self.auth_data_raw, client_data_json), sig)
            .map_err(|_| invalid("packed self attestation signature mismatch"))
    }
}

/// Hyphenated lowercase AAGUID
pub fn format_aaguid(aaguid: &[u8; 16]) -> String {
    let hex: String = aaguid.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
