//! Signed REST client for the Bitget v2 mix API.

use crate::bitget::model::ApiResponse;
use crate::error::{VenueError, VenueResult};
use crate::signer::Signer;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error codes the venue uses for request throttling.
const RATE_LIMIT_CODES: &[&str] = &["429", "30007", "40429"];
/// Error codes for placements that fail on margin.
const MARGIN_CODES: &[&str] = &["40754", "40762", "43012"];
/// Error codes for credential problems.
const AUTH_CODES: &[&str] = &["40006", "40009", "40012", "40037"];
/// Error codes for operations on orders the venue no longer knows.
const ORDER_NOT_FOUND_CODES: &[&str] = &["43001", "43025"];

/// Classify a venue error code into the neutral error taxonomy.
pub fn classify_code(code: &str, msg: &str) -> VenueError {
    if RATE_LIMIT_CODES.contains(&code) {
        VenueError::RateLimited(format!("{code}: {msg}"))
    } else if MARGIN_CODES.contains(&code) {
        VenueError::MarginInsufficient(format!("{code}: {msg}"))
    } else if AUTH_CODES.contains(&code) {
        VenueError::Auth(format!("{code}: {msg}"))
    } else if ORDER_NOT_FOUND_CODES.contains(&code) {
        VenueError::OrderNotFound(format!("{code}: {msg}"))
    } else {
        VenueError::Rejected { code: code.to_string(), message: msg.to_string() }
    }
}

/// Signed HTTP client. Every call carries the 10-second request deadline.
pub struct RestClient {
    http: Client,
    base_url: String,
    signer: Signer,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, signer: Signer) -> VenueResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VenueError::Transient(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base_url: base_url.into(), signer })
    }

    /// Signed GET. `path_and_query` includes the query string, which is
    /// part of the signed payload.
    pub async fn get<T: DeserializeOwned>(&self, path_and_query: &str) -> VenueResult<T> {
        let timestamp = Signer::timestamp();
        let signature = self.signer.sign(&timestamp, "GET", path_and_query, "");
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!(%path_and_query, "venue GET");

        let response = self
            .http
            .get(&url)
            .header("ACCESS-KEY", self.signer.api_key())
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", timestamp)
            .header("ACCESS-PASSPHRASE", self.signer.passphrase())
            .header("Content-Type", "application/json")
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Signed POST with a JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> VenueResult<T> {
        let payload = serde_json::to_string(body)
            .map_err(|e| VenueError::Malformed(format!("failed to encode request: {e}")))?;
        let timestamp = Signer::timestamp();
        let signature = self.signer.sign(&timestamp, "POST", path, &payload);
        let url = format!("{}{}", self.base_url, path);
        debug!(%path, "venue POST");

        let response = self
            .http
            .post(&url)
            .header("ACCESS-KEY", self.signer.api_key())
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", timestamp)
            .header("ACCESS-PASSPHRASE", self.signer.passphrase())
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Unsigned GET for public market data endpoints.
    pub async fn get_public<T: DeserializeOwned>(&self, path_and_query: &str) -> VenueResult<T> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self.http.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> VenueResult<T> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(VenueError::RateLimited(format!("HTTP {status}")));
        }
        if status.is_server_error() {
            return Err(VenueError::Transient(format!("HTTP {status}")));
        }

        let envelope: ApiResponse<T> = response.json().await?;
        if envelope.code != "00000" {
            return Err(classify_code(&envelope.code, &envelope.msg));
        }
        envelope
            .data
            .ok_or_else(|| VenueError::Malformed("success response without data".to_string()))
    }
}
