//! Deterministic client order identifiers.
//!
//! The client order id is the only join key between local grid slots and
//! venue order-stream events, and it must survive restarts. It therefore
//! encodes `(slot index, role)` rather than a random value: given a slot,
//! the id is reproducible.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role an order plays in a slot's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotRole {
    /// The entry buy resting below the market.
    Buy,
    /// The paired sell placed after the buy fills.
    Sell,
}

impl SlotRole {
    fn tag(&self) -> char {
        match self {
            Self::Buy => 'b',
            Self::Sell => 's',
        }
    }
}

/// Client order id for a grid slot order.
///
/// Format: `sqg` + role (`b`/`s`) + sign (`p`/`n`) + absolute index.
/// Example: `sqgbn3` is the buy order of the slot at grid index -3.
/// All-alphanumeric and at most 24 characters, which fits every venue's
/// client-id charset and length limits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

const PREFIX: &str = "sqg";

impl ClientOrderId {
    /// Build the id for a slot index and role.
    pub fn for_slot(index: i64, role: SlotRole) -> Self {
        let sign = if index < 0 { 'n' } else { 'p' };
        Self(format!("{PREFIX}{}{}{}", role.tag(), sign, index.unsigned_abs()))
    }

    /// Wrap an id string received from the venue.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Recover `(index, role)` from an id. Returns `None` for ids this
    /// instance did not generate (foreign or malformed).
    pub fn slot(&self) -> Option<(i64, SlotRole)> {
        let rest = self.0.strip_prefix(PREFIX)?;
        let mut chars = rest.chars();
        let role = match chars.next()? {
            'b' => SlotRole::Buy,
            's' => SlotRole::Sell,
            _ => return None,
        };
        let negative = match chars.next()? {
            'p' => false,
            'n' => true,
            _ => return None,
        };
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let abs: i64 = digits.parse().ok()?;
        Some((if negative { -abs } else { abs }, role))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for ClientOrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trips() {
        for index in [-250, -3, -1, 0, 1, 12, 9999] {
            for role in [SlotRole::Buy, SlotRole::Sell] {
                let id = ClientOrderId::for_slot(index, role);
                assert_eq!(id.slot(), Some((index, role)), "id {id}");
            }
        }
    }

    #[test]
    fn test_id_is_deterministic() {
        assert_eq!(
            ClientOrderId::for_slot(-3, SlotRole::Buy),
            ClientOrderId::for_slot(-3, SlotRole::Buy)
        );
        assert_eq!(ClientOrderId::for_slot(-3, SlotRole::Buy).as_str(), "sqgbn3");
        assert_eq!(ClientOrderId::for_slot(12, SlotRole::Sell).as_str(), "sqgsp12");
    }

    #[test]
    fn test_foreign_ids_do_not_parse() {
        for raw in ["", "abc", "sqg", "sqgx3", "sqgb3", "sqgbp", "sqgbp1x", "web_12345"] {
            assert_eq!(ClientOrderId::from_string(raw.to_string()).slot(), None, "{raw}");
        }
    }

    #[test]
    fn test_id_fits_venue_limits() {
        let id = ClientOrderId::for_slot(i64::MIN + 1, SlotRole::Sell);
        assert!(id.as_str().len() <= 24);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_alphanumeric()));
    }
}
