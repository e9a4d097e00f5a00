//! Test-only helpers: fixtures and a recording automation surface.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{TimeZone, Utc};

use crate::core::sell_list::{SellListAggregate, SellListItem};
use crate::core::types::{ItemId, Quantity, RetainerId, RetainerName};
use crate::io::config::Settings;
use crate::io::surface::{Action, AutomationSurface, HoldingSlot, RetainerSlot};
use crate::run_state::{RetainerPlan, RunState};

/// Settings with short delays so tests need few ticks.
pub fn fast_settings() -> Settings {
    Settings {
        max_attempts_default: 5,
        step_timeout_ms: 60_000,
        min_step_interval_ms: 0,
        price_timeout_ms: 50,
        price_settle_ms: 20,
        menu_delay_ms: 10,
        delay_between_retainers_ms: 10,
        delay_between_items_ms: 10,
        wait_for_menu_attempts: 20,
    }
}

/// Sell-list item named `item-<id>`.
pub fn sell_item(item_id: u32, quantity: u32) -> SellListItem {
    SellListItem {
        item_id: item_id_of(item_id),
        item_name: format!("item-{item_id}"),
        quantity_to_maintain: Quantity::new(quantity).unwrap_or_else(|_| panic!("quantity {quantity}")),
    }
}

/// Sell list for retainer `id`, named `R<id>`.
pub fn sell_list(retainer_id: u64, items: Vec<SellListItem>) -> SellListAggregate {
    SellListAggregate::with_items(retainer_id_of(retainer_id), retainer_name_of(retainer_id), items)
        .unwrap_or_else(|err| panic!("sell list: {err}"))
}

/// Available retainer slot at `list_index` for retainer `id`.
pub fn retainer_slot(list_index: usize, retainer_id: u64) -> RetainerSlot {
    RetainerSlot {
        list_index,
        id: retainer_id_of(retainer_id),
        name: retainer_name_of(retainer_id),
        available: true,
    }
}

pub fn plan_for(list_index: usize, retainer_id: u64, items: Vec<SellListItem>) -> RetainerPlan {
    RetainerPlan::new(retainer_slot(list_index, retainer_id), &sell_list(retainer_id, items))
}

pub fn run_state_with(plans: Vec<RetainerPlan>) -> RunState {
    let started = Utc
        .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("fixed timestamp"));
    RunState::new("run-test".to_string(), started, plans)
}

pub fn item_id_of(value: u32) -> ItemId {
    ItemId::new(value).unwrap_or_else(|_| panic!("item id {value}"))
}

pub fn retainer_id_of(value: u64) -> RetainerId {
    RetainerId::new(value).unwrap_or_else(|_| panic!("retainer id {value}"))
}

fn retainer_name_of(value: u64) -> RetainerName {
    RetainerName::new(format!("R{value}")).unwrap_or_else(|_| panic!("retainer name {value}"))
}

#[derive(Debug, Default)]
struct RecordingState {
    closed_elements: HashSet<String>,
    refuse_invoke: HashSet<String>,
    retainers: Option<Vec<RetainerSlot>>,
    listed: HashMap<(RetainerId, ItemId), u32>,
    holdings: HashMap<(RetainerId, ItemId), HoldingSlot>,
    events: Vec<SurfaceEvent>,
}

/// One call the controller made on a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Invoked(String, Action),
    Closed(String),
}

/// Surface where every element is open and every action succeeds unless told
/// otherwise. Records invoked actions and close calls in order.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    state: Mutex<RecordingState>,
}

impl RecordingSurface {
    pub fn ready() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut RecordingState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Open or close `element`. Every element starts open.
    pub fn set_open(&self, element: &str, open: bool) {
        self.with_state(|s| {
            if open {
                s.closed_elements.remove(element);
            } else {
                s.closed_elements.insert(element.to_string());
            }
        });
    }

    /// Make every action sent to `element` fail.
    pub fn refuse_actions_on(&self, element: &str) {
        self.with_state(|s| s.refuse_invoke.insert(element.to_string()));
    }

    pub fn set_retainers(&self, retainers: Option<Vec<RetainerSlot>>) {
        self.with_state(|s| s.retainers = retainers);
    }

    pub fn set_listed(&self, retainer: u64, item: u32, count: u32) {
        self.with_state(|s| {
            s.listed
                .insert((retainer_id_of(retainer), item_id_of(item)), count)
        });
    }

    pub fn hold(&self, retainer: u64, item: u32) {
        self.with_state(|s| {
            s.holdings.insert(
                (retainer_id_of(retainer), item_id_of(item)),
                HoldingSlot {
                    page: 0,
                    slot: item,
                    quantity: 1,
                },
            )
        });
    }

    /// Successful invokes and every close call, interleaved in call order.
    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.with_state(|s| s.events.clone())
    }

    pub fn actions(&self) -> Vec<(String, Action)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SurfaceEvent::Invoked(element, action) => Some((element, action)),
                SurfaceEvent::Closed(_) => None,
            })
            .collect()
    }

    pub fn closes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SurfaceEvent::Closed(element) => Some(element),
                SurfaceEvent::Invoked(..) => None,
            })
            .collect()
    }
}

impl AutomationSurface for RecordingSurface {
    fn probe(&self, element: &str) -> bool {
        self.with_state(|s| !s.closed_elements.contains(element))
    }

    fn invoke(&self, element: &str, action: Action) -> bool {
        self.with_state(|s| {
            if s.closed_elements.contains(element) || s.refuse_invoke.contains(element) {
                return false;
            }
            s.events.push(SurfaceEvent::Invoked(element.to_string(), action));
            true
        })
    }

    fn close(&self, element: &str) -> bool {
        self.with_state(|s| {
            s.events.push(SurfaceEvent::Closed(element.to_string()));
            !s.closed_elements.contains(element)
        })
    }

    fn retainers(&self) -> Option<Vec<RetainerSlot>> {
        self.with_state(|s| s.retainers.clone())
    }

    fn listed_count(&self, retainer: RetainerId, item: ItemId) -> u32 {
        self.with_state(|s| s.listed.get(&(retainer, item)).copied().unwrap_or(0))
    }

    fn find_holding(&self, retainer: RetainerId, item: ItemId) -> Option<HoldingSlot> {
        self.with_state(|s| s.holdings.get(&(retainer, item)).copied())
    }
}
