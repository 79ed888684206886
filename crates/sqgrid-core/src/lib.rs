//! Core domain types for the sqgrid market maker.
//!
//! This crate provides the fundamental types shared by every component:
//! - `Px`, `Qty`: precision-safe numeric types with venue-decimal rounding
//! - `OrderSide`, `OrderType`, `TimeInForce`, `OrderStatus`: trading enums
//! - `ClientOrderId`: deterministic slot-derived order identifiers
//! - Neutral value records (`OrderRequest`, `OrderResult`, `PositionInfo`,
//!   `AccountSnapshot`, `OrderUpdate`, `TradeTick`, `Candle`) consumed by all
//!   components instead of venue-specific shapes

pub mod decimal;
pub mod error;
pub mod ids;
pub mod order;
pub mod types;

pub use decimal::{Px, Qty};
pub use error::{CoreError, Result};
pub use ids::{ClientOrderId, SlotRole};
pub use order::{OrderSide, OrderStatus, OrderType, TimeInForce};
pub use types::{
    AccountSnapshot, Candle, OrderRequest, OrderResult, OrderUpdate, PositionInfo, TradeTick,
};
