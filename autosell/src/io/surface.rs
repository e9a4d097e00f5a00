//! Automation surface abstraction.
//!
//! The [`AutomationSurface`] trait is the only way automation steps touch the
//! live game client. Implementations must be non-blocking and must tolerate
//! calls against elements that do not exist (returning `false`/`None`).
//! Tests and the simulator use scripted surfaces that never touch a client.

use serde::{Deserialize, Serialize};

use crate::core::types::{ItemId, Price, RetainerId, RetainerName};

/// Names of the UI elements the sell workflow drives.
pub mod element {
    /// List of all retainers (the summoning bell window).
    pub const RETAINER_LIST: &str = "RetainerList";
    /// Per-retainer action menu.
    pub const RETAINER_MENU: &str = "SelectString";
    /// Sub-surface listing the retainer's market listings.
    pub const SELL_LIST: &str = "RetainerSellList";
    /// Item context menu opened from the retainer inventory.
    pub const CONTEXT_MENU: &str = "ContextMenu";
    /// Listing dialog where the asking price is entered.
    pub const LISTING_DIALOG: &str = "RetainerSell";
    /// Price comparison results opened by `Action::ComparePrices`.
    pub const PRICE_COMPARISON: &str = "ItemSearchResult";
}

/// Option picked from a menu element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuOption {
    /// "Sell items in your retainer's inventory" in the retainer menu.
    SellFromRetainer,
    /// "Put Up for Sale" in the item context menu.
    PutUpForSale,
}

/// Command sent to an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Action {
    SelectRetainer { index: usize },
    SelectMenuOption { option: MenuOption },
    OpenItemMenu { slot: HoldingSlot },
    ComparePrices,
    SubmitPrice { price: Price },
    CancelListing,
}

/// A retainer as reported by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainerSlot {
    /// Position in the retainer list UI.
    pub list_index: usize,
    pub id: RetainerId,
    pub name: RetainerName,
    pub available: bool,
}

/// Location of an item stack in a retainer's inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingSlot {
    pub page: u8,
    pub slot: u32,
    pub quantity: u32,
}

/// Opaque capability over the live target.
pub trait AutomationSurface: Send + Sync {
    /// Whether `element` is open and ready for input.
    fn probe(&self, element: &str) -> bool;

    /// Send `action` to `element`. Returns `false` when the element is not ready
    /// or the action could not be applied.
    fn invoke(&self, element: &str, action: Action) -> bool;

    /// Close `element` if it is open. Returns `false` when it was not open.
    fn close(&self, element: &str) -> bool;

    /// All retainers known to the client, or `None` when the retainer table
    /// itself is unavailable.
    fn retainers(&self) -> Option<Vec<RetainerSlot>>;

    /// Number of market listings of `item` the retainer currently has.
    fn listed_count(&self, retainer: RetainerId, item: ItemId) -> u32;

    /// First inventory stack holding `item`, if any.
    fn find_holding(&self, retainer: RetainerId, item: ItemId) -> Option<HoldingSlot>;
}
