//! Error types for sqgrid-engine.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("position manager not initialized")]
    NotInitialized,

    #[error("position manager already initialized")]
    AlreadyInitialized,

    #[error("cannot anchor grid to price {0:?}")]
    BadAnchor(String),

    /// Pre-existing venue position beyond tolerance at startup.
    #[error("venue position {venue} diverges from local 0 beyond tolerance {tolerance}")]
    PositionDivergence { venue: Decimal, tolerance: Decimal },

    #[error(transparent)]
    Exec(#[from] sqgrid_exec::ExecError),

    #[error(transparent)]
    Venue(#[from] sqgrid_venue::VenueError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
