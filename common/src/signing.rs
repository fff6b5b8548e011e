//! Request signing for the IoT control API.
//!
//! Token requests sign `accessKey + timestamp + nonce + "POST"`. Device calls
//! additionally bind the access token and a SHA-512 digest of the exact body
//! bytes: `accessKey + token + timestamp + nonce + "POST\n" + sha512(body)`.
//! Signatures are HMAC-SHA512 keyed with the secret key, uppercase hex.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};
use uuid::Uuid;

use crate::config::CloudConfig;

type HmacSha512 = Hmac<Sha512>;

const SIGNED_METHOD: &str = "POST";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
    pub body: String,
}

impl SignedRequest {
    pub fn token(cloud: &CloudConfig, timestamp: String) -> Self {
        let nonce = new_nonce(&timestamp);
        let signature = token_signature(&cloud.secret_key, &cloud.access_key, &timestamp, &nonce);
        Self {
            timestamp,
            nonce,
            signature,
            body: "{}".to_string(),
        }
    }

    pub fn ability(cloud: &CloudConfig, token: &str, timestamp: String, body: String) -> Self {
        let nonce = new_nonce(&timestamp);
        let signature = ability_signature(
            &cloud.secret_key,
            &cloud.access_key,
            token,
            &timestamp,
            &nonce,
            &body,
        );
        Self {
            timestamp,
            nonce,
            signature,
            body,
        }
    }
}

pub fn epoch_millis() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

pub fn new_nonce(timestamp: &str) -> String {
    format!("web-{}-{timestamp}", Uuid::new_v4())
}

pub fn trace_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn token_signature(secret_key: &str, access_key: &str, timestamp: &str, nonce: &str) -> String {
    let payload = format!("{access_key}{timestamp}{nonce}{SIGNED_METHOD}");
    hmac_sha512_hex(secret_key, &payload)
}

pub fn ability_signature(
    secret_key: &str,
    access_key: &str,
    token: &str,
    timestamp: &str,
    nonce: &str,
    body: &str,
) -> String {
    let payload = format!(
        "{access_key}{token}{timestamp}{nonce}{SIGNED_METHOD}\n{}",
        sha512_hex(body)
    );
    hmac_sha512_hex(secret_key, &payload)
}

pub fn hmac_sha512_hex(key: &str, data: &str) -> String {
    let mut mac =
        HmacSha512::new_from_slice(key.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(data.as_bytes());
    hex::encode_upper(mac.finalize().into_bytes())
}

pub fn sha512_hex(data: &str) -> String {
    hex::encode(Sha512::digest(data.as_bytes()))
}
