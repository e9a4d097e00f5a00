//! Validated value objects shared by the whole crate.
//!
//! Every constructor rejects values the game would never produce, so invalid
//! persisted data fails at load time instead of halfway through a run.

use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Identifier of a retainer (never zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct RetainerId(u64);

impl RetainerId {
    pub fn new(value: u64) -> Result<Self> {
        if value == 0 {
            return Err(anyhow!("retainer id cannot be zero"));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for RetainerId {
    type Error = anyhow::Error;

    fn try_from(value: u64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RetainerId> for u64 {
    fn from(id: RetainerId) -> Self {
        id.0
    }
}

impl fmt::Display for RetainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog item identifier (never zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ItemId(u32);

impl ItemId {
    pub fn new(value: u32) -> Result<Self> {
        if value == 0 {
            return Err(anyhow!("item id cannot be zero"));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for ItemId {
    type Error = anyhow::Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ItemId> for u32 {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unit selling price. The minimum tradable unit is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Price(u32);

impl Price {
    pub const MIN: Price = Price(1);

    pub fn new(value: u32) -> Result<Self> {
        if value < 1 {
            return Err(anyhow!("price must be at least 1"));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Price {
    type Error = anyhow::Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Price> for u32 {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} gil", self.0)
    }
}

/// Desired number of listings to maintain (1..=999).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const MAX: u32 = 999;

    pub fn new(value: u32) -> Result<Self> {
        if !(1..=Self::MAX).contains(&value) {
            return Err(anyhow!("quantity must be between 1 and {}", Self::MAX));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Quantity {
    type Error = anyhow::Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Quantity> for u32 {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display name of a retainer (non-blank).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RetainerName(String);

impl RetainerName {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(anyhow!("retainer name cannot be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RetainerName {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RetainerName> for String {
    fn from(name: RetainerName) -> Self {
        name.0
    }
}

impl fmt::Display for RetainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_reject_zero() {
        assert!(RetainerId::new(0).is_err());
        assert!(ItemId::new(0).is_err());
        assert_eq!(RetainerId::new(7).expect("id").value(), 7);
        assert_eq!(ItemId::new(42).expect("id").value(), 42);
    }

    #[test]
    fn price_floor_is_one() {
        assert!(Price::new(0).is_err());
        assert_eq!(Price::new(1).expect("price"), Price::MIN);
        assert_eq!(Price::new(250).expect("price").to_string(), "250 gil");
    }

    #[test]
    fn quantity_bounds() {
        assert!(Quantity::new(0).is_err());
        assert!(Quantity::new(1000).is_err());
        assert_eq!(Quantity::new(999).expect("qty").value(), 999);
    }

    #[test]
    fn retainer_name_rejects_blank() {
        assert!(RetainerName::new("   ").is_err());
        assert_eq!(RetainerName::new("Alys").expect("name").as_str(), "Alys");
    }

    #[test]
    fn deserialize_rejects_invalid_values() {
        let err = serde_json::from_str::<ItemId>("0").unwrap_err();
        assert!(err.to_string().contains("item id cannot be zero"));
        let ok: Quantity = serde_json::from_str("5").expect("quantity");
        assert_eq!(ok.value(), 5);
    }
}
