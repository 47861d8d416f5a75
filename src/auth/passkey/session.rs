use super::types::encode_b64url;
use crate::cache::typed_cache;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const NONCE_BYTES: usize = 32;
const CHALLENGE_BYTES: usize = 32;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CeremonyKind {
    Registration { user_id: i32 },
    Authentication,
}

impl CeremonyKind {
    fn key_prefix(&self) -> &'static str {
        match self {
            CeremonyKind::Registration { .. } => "reg",
            CeremonyKind::Authentication => "login",
        }
    }
}

/// Server half of a begun ceremony, stored until the client finishes it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[typed_cache(ttl = 300)]
pub struct CeremonySession {
    pub kind: CeremonyKind,
    pub challenge: Vec<u8>,
    pub rp_id: String,
    pub origin: String,
    pub device_name: Option<String>,
}

impl CeremonySession {
    pub fn new(kind: CeremonyKind, rp_id: &str, origin: &str, device_name: Option<String>) -> Self {
        Self {
            kind,
            challenge: random_bytes(CHALLENGE_BYTES),
            rp_id: rp_id.to_string(),
            origin: origin.to_string(),
            device_name,
        }
    }

    pub fn cache_key(&self, nonce: &str) -> String {
        session_key(&self.kind, nonce)
    }
}

pub fn session_key(kind: &CeremonyKind, nonce: &str) -> String {
    format!("{}:{}", kind.key_prefix(), nonce)
}

pub fn new_nonce() -> String {
    encode_b64url(&random_bytes(NONCE_BYTES))
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
