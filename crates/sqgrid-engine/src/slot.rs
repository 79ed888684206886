//! Grid slots.
//!
//! A slot binds one grid price point to the lifecycle of at most one
//! buy/sell order pair. All mutation happens under the slot's own lock;
//! the generation counter lets venue-call results be reapplied later with
//! optimistic revalidation (no lock is ever held across an await).

use sqgrid_core::{ClientOrderId, Px, Qty};
use std::time::{Duration, Instant};

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// No order and no inventory.
    Free,
    /// One live buy order rests at the venue.
    BuyPending,
    /// The buy filled; inventory is held, no live order.
    Holding,
    /// One live paired sell rests at the venue.
    SellPending,
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::BuyPending => write!(f, "buy-pending"),
            Self::Holding => write!(f, "holding"),
            Self::SellPending => write!(f, "sell-pending"),
        }
    }
}

/// One grid slot.
#[derive(Debug)]
pub struct Slot {
    pub index: i64,
    pub state: SlotState,
    /// Intended buy price for this slot.
    pub price: Px,
    /// Intended buy quantity for this slot.
    pub qty: Qty,
    /// Client id of the live order, when one exists.
    pub client_id: Option<ClientOrderId>,
    /// Venue id of the live order, once acknowledged.
    pub order_id: Option<String>,
    pub filled_qty: Qty,
    pub avg_fill_price: Px,
    /// Placement embargo after a margin-insufficient rejection.
    cooldown_until: Option<Instant>,
    /// Bumped on every state change; guards optimistic reapply.
    pub generation: u64,
    /// Venue timestamp of the last applied order update.
    pub last_update_ms: i64,
}

impl Slot {
    pub fn new(index: i64, price: Px, qty: Qty) -> Self {
        Self {
            index,
            state: SlotState::Free,
            price,
            qty,
            client_id: None,
            order_id: None,
            filled_qty: Qty::ZERO,
            avg_fill_price: Px::ZERO,
            cooldown_until: None,
            generation: 0,
            last_update_ms: 0,
        }
    }

    /// Mark a state change.
    pub fn bump(&mut self) {
        self.generation += 1;
    }

    pub fn in_cooldown(&self) -> bool {
        self.cooldown_until.is_some_and(|t| Instant::now() < t)
    }

    pub fn start_cooldown(&mut self, duration: Duration) {
        self.cooldown_until = Some(Instant::now() + duration);
    }

    /// Drop the live-order identity (after cancel, rejection, or fill).
    pub fn clear_order(&mut self) {
        self.client_id = None;
        self.order_id = None;
    }
}

/// Slot totals per state, for status lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotCounts {
    pub free: usize,
    pub buy_pending: usize,
    pub holding: usize,
    pub sell_pending: usize,
}

impl SlotCounts {
    pub fn total(&self) -> usize {
        self.free + self.buy_pending + self.holding + self.sell_pending
    }
}
