//! Per-retainer sell list: which items to keep listed and how many.

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::types::{ItemId, Quantity, RetainerId, RetainerName};

/// One entry of a sell list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellListItem {
    pub item_id: ItemId,
    pub item_name: String,
    pub quantity_to_maintain: Quantity,
}

impl SellListItem {
    pub fn new(item_id: ItemId, item_name: impl Into<String>, quantity: Quantity) -> Result<Self> {
        let item_name = item_name.into();
        if item_name.trim().is_empty() {
            bail!("item name cannot be empty");
        }
        Ok(Self {
            item_id,
            item_name,
            quantity_to_maintain: quantity,
        })
    }
}

/// Ordered, capped, duplicate-free set of items for one retainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellListAggregate {
    retainer_id: RetainerId,
    retainer_name: RetainerName,
    items: Vec<SellListItem>,
}

impl SellListAggregate {
    pub const MAX_ITEMS: usize = 20;

    pub fn new(retainer_id: RetainerId, retainer_name: RetainerName) -> Self {
        Self {
            retainer_id,
            retainer_name,
            items: Vec::new(),
        }
    }

    pub fn with_items(
        retainer_id: RetainerId,
        retainer_name: RetainerName,
        items: Vec<SellListItem>,
    ) -> Result<Self> {
        if items.len() > Self::MAX_ITEMS {
            bail!(
                "cannot create sell list with more than {} items",
                Self::MAX_ITEMS
            );
        }
        let mut duplicates: Vec<String> = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            let seen_before = items[..idx].iter().any(|prev| prev.item_id == item.item_id);
            let id = item.item_id.to_string();
            if seen_before && !duplicates.contains(&id) {
                duplicates.push(id);
            }
        }
        if !duplicates.is_empty() {
            bail!(
                "sell list contains duplicate items: {}",
                duplicates.join(", ")
            );
        }
        Ok(Self {
            retainer_id,
            retainer_name,
            items,
        })
    }

    pub fn retainer_id(&self) -> RetainerId {
        self.retainer_id
    }

    pub fn retainer_name(&self) -> &RetainerName {
        &self.retainer_name
    }

    pub fn items(&self) -> &[SellListItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn remaining_slots(&self) -> usize {
        Self::MAX_ITEMS - self.items.len()
    }

    pub fn can_add_item(&self) -> bool {
        self.items.len() < Self::MAX_ITEMS
    }

    pub fn add_item(&mut self, item: SellListItem) -> Result<()> {
        if !self.can_add_item() {
            bail!(
                "cannot add more than {} items to sell list",
                Self::MAX_ITEMS
            );
        }
        if self.contains_item(item.item_id) {
            bail!(
                "item {} (id {}) already exists in sell list",
                item.item_name,
                item.item_id
            );
        }
        self.items.push(item);
        Ok(())
    }

    pub fn remove_item(&mut self, item_id: ItemId) -> Result<SellListItem> {
        let idx = self
            .position(item_id)
            .ok_or_else(|| anyhow!("item with id {item_id} not found in sell list"))?;
        Ok(self.items.remove(idx))
    }

    /// Change the quantity to maintain; the item keeps its position.
    pub fn update_quantity(&mut self, item_id: ItemId, quantity: Quantity) -> Result<()> {
        let idx = self
            .position(item_id)
            .ok_or_else(|| anyhow!("item with id {item_id} not found in sell list"))?;
        self.items[idx].quantity_to_maintain = quantity;
        Ok(())
    }

    pub fn get_item(&self, item_id: ItemId) -> Option<&SellListItem> {
        self.items.iter().find(|item| item.item_id == item_id)
    }

    pub fn contains_item(&self, item_id: ItemId) -> bool {
        self.position(item_id).is_some()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn position(&self, item_id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.item_id == item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retainer() -> (RetainerId, RetainerName) {
        (
            RetainerId::new(12345).expect("id"),
            RetainerName::new("TestRetainer").expect("name"),
        )
    }

    fn item(id: u32, qty: u32) -> SellListItem {
        SellListItem::new(
            ItemId::new(id).expect("item id"),
            format!("Item{id}"),
            Quantity::new(qty).expect("qty"),
        )
        .expect("item")
    }

    #[test]
    fn new_list_is_empty_with_all_slots() {
        let (id, name) = retainer();
        let list = SellListAggregate::new(id, name);
        assert!(list.is_empty());
        assert_eq!(list.remaining_slots(), 20);
        assert!(list.can_add_item());
    }

    #[test]
    fn with_items_rejects_more_than_cap() {
        let (id, name) = retainer();
        let items = (1..=21).map(|i| item(i, 1)).collect();
        let err = SellListAggregate::with_items(id, name, items).unwrap_err();
        assert!(err.to_string().contains("more than 20 items"));
    }

    #[test]
    fn with_items_rejects_duplicates() {
        let (id, name) = retainer();
        let err = SellListAggregate::with_items(id, name, vec![item(100, 5), item(100, 10)])
            .unwrap_err();
        assert!(err.to_string().starts_with("sell list contains duplicate items: 100"));
    }

    #[test]
    fn add_item_enforces_cap_and_uniqueness() {
        let (id, name) = retainer();
        let mut list = SellListAggregate::new(id, name);
        for i in 1..=20 {
            list.add_item(item(i, 1)).expect("add");
        }
        assert!(list.add_item(item(21, 1)).is_err());

        list.remove_item(ItemId::new(20).expect("id")).expect("remove");
        let err = list.add_item(item(1, 3)).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn update_quantity_keeps_position() {
        let (id, name) = retainer();
        let mut list =
            SellListAggregate::with_items(id, name, vec![item(1, 1), item(2, 1), item(3, 1)])
                .expect("list");
        list.update_quantity(ItemId::new(2).expect("id"), Quantity::new(9).expect("qty"))
            .expect("update");
        let ids: Vec<u32> = list.items().iter().map(|i| i.item_id.value()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(list.items()[1].quantity_to_maintain.value(), 9);
    }

    #[test]
    fn remove_missing_item_errors() {
        let (id, name) = retainer();
        let mut list = SellListAggregate::new(id, name);
        assert!(list.remove_item(ItemId::new(5).expect("id")).is_err());
    }
}
