//! Undercut pricing rule.
//!
//! The only pricing rule: list one unit below the cheapest competing offer,
//! never below the minimum tradable unit.

use serde::{Deserialize, Serialize};

use crate::core::types::Price;

/// One competing offer quoted by the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub unit_price: u32,
    pub quantity: u32,
}

/// Selling price for a given reference price: `max(reference - 1, 1)`.
pub fn undercut(reference: u32) -> Price {
    let value = reference.saturating_sub(1).max(Price::MIN.value());
    Price::new(value).unwrap_or(Price::MIN)
}

/// Lowest quoted unit price, or `None` when there are no offers.
///
/// Offers are not assumed to be sorted. A zero quote is treated as 1.
pub fn lowest_unit_price(listings: &[Listing]) -> Option<u32> {
    listings
        .iter()
        .map(|listing| listing.unit_price.max(1))
        .min()
}

/// Price to list at given the current offers, or `None` when nothing is listed.
pub fn selling_price(listings: &[Listing]) -> Option<Price> {
    lowest_unit_price(listings).map(undercut)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(unit_price: u32) -> Listing {
        Listing {
            unit_price,
            quantity: 1,
        }
    }

    #[test]
    fn undercut_by_one() {
        assert_eq!(undercut(100).value(), 99);
        assert_eq!(undercut(999_999).value(), 999_998);
    }

    #[test]
    fn undercut_floors_at_one() {
        assert_eq!(undercut(2).value(), 1);
        assert_eq!(undercut(1).value(), 1);
        assert_eq!(undercut(0).value(), 1);
    }

    #[test]
    fn lowest_price_ignores_order() {
        let listings = vec![listing(150), listing(100), listing(120)];
        assert_eq!(lowest_unit_price(&listings), Some(100));
        assert_eq!(selling_price(&listings).map(Price::value), Some(99));
    }

    #[test]
    fn no_listings_means_no_price() {
        assert_eq!(selling_price(&[]), None);
    }
}
