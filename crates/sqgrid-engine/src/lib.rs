//! Grid engine: slot state machine, window maintenance, reconciliation.

pub mod error;
pub mod grid;
pub mod manager;
pub mod reconciler;
pub mod slot;

pub use error::{EngineError, EngineResult};
pub use grid::GridSpec;
pub use manager::{EngineConfig, PendingOrderRef, SuperPositionManager};
pub use reconciler::{ReconcileReport, Reconciler};
pub use slot::{Slot, SlotCounts, SlotState};

#[cfg(test)]
mod tests;
