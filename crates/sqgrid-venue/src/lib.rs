//! Venue adapter contract and implementations.
//!
//! The core trades against the [`Venue`] trait only; everything
//! venue-specific (endpoints, signing, wire shapes, status vocabularies)
//! stays behind it. The crate ships one real adapter, Bitget USDT-margined
//! perpetuals.

pub mod bitget;
pub mod error;
pub mod signer;
pub mod venue;

pub use bitget::BitgetVenue;
pub use error::{VenueError, VenueResult};
pub use venue::{Venue, VenueCredentials};
