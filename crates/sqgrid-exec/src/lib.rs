//! Order execution layer.
//!
//! Translates slot-level intents into venue calls with a fixed retry
//! policy, and keeps a bounded memo of submitted orders for the cleaner
//! and the reconciler.

pub mod cleaner;
pub mod error;
pub mod executor;
pub mod memo;

pub use cleaner::OrderCleaner;
pub use error::{ExecError, ExecResult};
pub use executor::{BatchOutcome, Executor, OrderExecutor, RetryDelays};
pub use memo::{MemoEntry, OrderMemo};
