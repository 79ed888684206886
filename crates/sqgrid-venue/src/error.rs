//! Venue error classification.
//!
//! Every venue response is classified here, once, at the adapter boundary.
//! Downstream retry and cooldown policy is driven by these variants, never
//! by string matching on venue messages.

use thiserror::Error;

/// Errors surfaced by a venue adapter.
#[derive(Debug, Error, Clone)]
pub enum VenueError {
    /// The venue rejected the request for exceeding its rate limits.
    /// Retried by the executor after the configured rate-limit delay.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Placement failed for insufficient margin. Not retriable within the
    /// same call; the owning slot enters a margin cooldown instead.
    #[error("insufficient margin: {0}")]
    MarginInsufficient(String),

    /// Network failures, 5xx responses, and timeouts. Retried once by the
    /// executor after the short order-retry delay.
    #[error("transient venue error: {0}")]
    Transient(String),

    /// The referenced order does not exist at the venue. Cancels treat
    /// this as success.
    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// Credentials rejected. Fatal.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The venue answered with something the adapter cannot decode.
    #[error("malformed venue response: {0}")]
    Malformed(String),

    /// The stream or adapter has been shut down.
    #[error("venue adapter closed")]
    Closed,

    /// Any other venue-reported rejection (bad symbol, bad precision, ...).
    #[error("venue rejected request: code {code}: {message}")]
    Rejected { code: String, message: String },
}

impl VenueError {
    /// True for errors the executor may retry after a short delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// True for rate-limit errors, which use the longer retry delay.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// True when the failure means the account lacks margin for the order.
    pub fn is_margin_insufficient(&self) -> bool {
        matches!(self, Self::MarginInsufficient(_))
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Self::Transient(e.to_string())
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transient(e.to_string())
        }
    }
}

/// Result alias for venue operations.
pub type VenueResult<T> = std::result::Result<T, VenueError>;
