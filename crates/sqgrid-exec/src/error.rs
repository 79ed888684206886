//! Error types for sqgrid-exec.

use sqgrid_venue::VenueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    /// The single permitted retry was also consumed. Local state is
    /// unchanged; the next adjust cycle may reattempt.
    #[error("venue call failed after retry: {0}")]
    Exhausted(#[source] VenueError),

    #[error(transparent)]
    Venue(#[from] VenueError),
}

impl ExecError {
    /// True when the underlying failure was an insufficient-margin
    /// rejection, which the engine answers with a slot cooldown.
    pub fn is_margin_insufficient(&self) -> bool {
        match self {
            Self::Exhausted(e) | Self::Venue(e) => e.is_margin_insufficient(),
        }
    }
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;
