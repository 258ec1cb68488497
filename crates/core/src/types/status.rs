//! Lifecycle statuses for baskets and orders.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Basket lifecycle.
///
/// `Open` baskets accept lines; checkout moves a basket to `Frozen`; a
/// successfully placed order moves it to `Submitted`. There is never a way
/// back from `Submitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BasketStatus {
    #[default]
    Open,
    Frozen,
    Submitted,
}

impl BasketStatus {
    /// Stored and serialized name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Frozen => "Frozen",
            Self::Submitted => "Submitted",
        }
    }

    /// Whether checkout may (re)freeze a basket in this status.
    #[must_use]
    pub const fn can_freeze(&self) -> bool {
        matches!(self, Self::Open | Self::Frozen)
    }
}

impl fmt::Display for BasketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BasketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(Self::Open),
            "Frozen" => Ok(Self::Frozen),
            "Submitted" => Ok(Self::Submitted),
            _ => Err(format!("invalid basket status: {s}")),
        }
    }
}

/// Order status as seen by mobile clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    #[default]
    Complete,
    Cancelled,
}

impl OrderStatus {
    /// Stored and serialized name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Complete" => Ok(Self::Complete),
            "Cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basket_status_roundtrip() {
        for status in [BasketStatus::Open, BasketStatus::Frozen, BasketStatus::Submitted] {
            assert_eq!(status.as_str().parse::<BasketStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_only_unsubmitted_baskets_freeze() {
        assert!(BasketStatus::Open.can_freeze());
        assert!(BasketStatus::Frozen.can_freeze());
        assert!(!BasketStatus::Submitted.can_freeze());
    }

    #[test]
    fn test_order_status_rejects_unknown() {
        assert!("Shipped".parse::<OrderStatus>().is_err());
    }
}
