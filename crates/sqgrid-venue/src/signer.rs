//! Request signing for Bitget-style HMAC authentication.
//!
//! Signing rule: `Base64(HMAC_SHA256(timestamp + method + requestPath + body,
//! secretKey))`, with the timestamp in Unix milliseconds.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signer holding the API credentials.
#[derive(Clone)]
pub struct Signer {
    api_key: String,
    secret_key: String,
    passphrase: String,
}

impl Signer {
    pub fn new(
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Sign one request. `request_path` includes the query string.
    pub fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
        let message = format!("{timestamp}{method}{request_path}{body}");
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(message.as_bytes());
        B64.encode(mac.finalize().into_bytes())
    }

    /// Current timestamp in Unix milliseconds, as the venue expects it.
    pub fn timestamp() -> String {
        chrono::Utc::now().timestamp_millis().to_string()
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the secret in logs.
        f.debug_struct("Signer").field("api_key", &self.api_key).finish_non_exhaustive()
    }
}
