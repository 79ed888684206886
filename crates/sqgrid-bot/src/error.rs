//! Application-level errors. Everything here is fatal to the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Feed(#[from] sqgrid_feed::FeedError),

    #[error(transparent)]
    Safety(#[from] sqgrid_safety::SafetyError),

    #[error(transparent)]
    Engine(#[from] sqgrid_engine::EngineError),

    #[error(transparent)]
    Venue(#[from] sqgrid_venue::VenueError),
}

pub type AppResult<T> = std::result::Result<T, AppError>;
