//! Single source of truth for the last trade price.
//!
//! The venue's trade stream is the only price source in the system;
//! nothing polls REST for prices. The monitor stores the newest tick for
//! lock-free-ish reads and fans out change events on a `watch` channel,
//! which is intentionally lossy: a slow subscriber observes only the
//! newest price, never a backlog.

pub mod error;
pub mod monitor;

pub use error::{FeedError, FeedResult};
pub use monitor::{PriceChange, PriceMonitor};
