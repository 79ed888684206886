//! Error types for sqgrid-feed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// No tick arrived within the startup deadline. Fatal: the system
    /// cannot anchor a grid without a price.
    #[error("no price received within {0:?}")]
    StartupTimeout(std::time::Duration),

    #[error("price monitor already running")]
    AlreadyRunning,

    #[error(transparent)]
    Venue(#[from] sqgrid_venue::VenueError),
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;
