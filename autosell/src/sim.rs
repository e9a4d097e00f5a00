//! Scripted automation surface for dry runs and end-to-end tests.
//!
//! A [`Scenario`] (TOML) describes the client: retainers, what they hold and
//! already list, what the market quotes per item. [`SimSurface`] plays it
//! back frame by frame: elements open a few frames after the action that
//! opens them, and price comparisons deliver their notification to the
//! oracle after a configurable delay.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::pricing::Listing;
use crate::core::sell_list::SellListAggregate;
use crate::core::types::{ItemId, Price, RetainerId, RetainerName};
use crate::host::Host;
use crate::io::clock::ManualClock;
use crate::io::config::Settings;
use crate::io::run_log::RunReport;
use crate::io::store::{MemorySellListStore, SellListRepository};
use crate::io::surface::{
    Action, AutomationSurface, HoldingSlot, MenuOption, RetainerSlot, element,
};
use crate::oracle::{MarketOfferings, PriceOracle};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimHolding {
    pub item_id: ItemId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimListed {
    pub item_id: ItemId,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRetainer {
    pub id: RetainerId,
    pub name: RetainerName,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub holdings: Vec<SimHolding>,
    #[serde(default)]
    pub listed: Vec<SimListed>,
}

/// Market quotes returned for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimMarket {
    pub item_id: ItemId,
    #[serde(default)]
    pub listings: Vec<Listing>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Simulated time per frame.
    pub frame_ms: u64,
    /// Frames between an action and the element it opens.
    pub latency_frames: u64,
    /// Frames between a price comparison and its notification.
    pub price_delay_frames: u64,
    pub retainer_list_open: bool,
    /// `false` makes the client report no retainer table at all.
    pub retainer_table_available: bool,
    /// Deliver every notification twice (same request id).
    pub duplicate_notifications: bool,
    /// Stamp notifications with the item they answer.
    pub tag_item_ids: bool,
    pub retainers: Vec<SimRetainer>,
    pub markets: Vec<SimMarket>,
    /// Items whose price comparison never produces a notification.
    pub starved_items: Vec<ItemId>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            frame_ms: 16,
            latency_frames: 2,
            price_delay_frames: 5,
            retainer_list_open: true,
            retainer_table_available: true,
            duplicate_notifications: false,
            tag_item_ids: true,
            retainers: Vec::new(),
            markets: Vec::new(),
            starved_items: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn validate(&self) -> Result<()> {
        if self.frame_ms == 0 {
            bail!("frame_ms must be > 0");
        }
        let mut seen = HashSet::new();
        for retainer in &self.retainers {
            if !seen.insert(retainer.id) {
                bail!("duplicate retainer id {}", retainer.id);
            }
        }
        Ok(())
    }

    pub fn frame(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }
}

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let scenario: Scenario =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    scenario
        .validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(scenario)
}

#[derive(Debug, Clone)]
enum SimEvent {
    Open(&'static str),
    Offerings(ItemId),
}

#[derive(Debug, Default)]
struct SimState {
    frame: u64,
    open: HashSet<&'static str>,
    due: Vec<(u64, SimEvent)>,
    selected: Option<RetainerId>,
    current_item: Option<ItemId>,
    listed: HashMap<(RetainerId, ItemId), u32>,
    actions: Vec<(String, Action)>,
    sales: Vec<(RetainerId, ItemId, Price)>,
    next_request_id: u64,
}

impl SimState {
    fn schedule(&mut self, delay: u64, event: SimEvent) {
        self.due.push((self.frame + delay, event));
    }
}

/// Element names the simulator knows how to open.
fn known_element(name: &str) -> Option<&'static str> {
    [
        element::RETAINER_LIST,
        element::RETAINER_MENU,
        element::SELL_LIST,
        element::CONTEXT_MENU,
        element::LISTING_DIALOG,
        element::PRICE_COMPARISON,
    ]
    .into_iter()
    .find(|known| *known == name)
}

pub struct SimSurface {
    scenario: Scenario,
    oracle: Arc<PriceOracle>,
    state: Mutex<SimState>,
}

impl SimSurface {
    pub fn new(scenario: Scenario, oracle: Arc<PriceOracle>) -> Self {
        let mut state = SimState::default();
        if scenario.retainer_list_open {
            state.open.insert(element::RETAINER_LIST);
        }
        for retainer in &scenario.retainers {
            for listed in &retainer.listed {
                state.listed.insert((retainer.id, listed.item_id), listed.count);
            }
        }
        Self {
            scenario,
            oracle,
            state: Mutex::new(state),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Advance one frame and fire whatever became due.
    pub fn advance_frame(&self) {
        let fired = self.with_state(|state| {
            state.frame += 1;
            let frame = state.frame;
            let (ready, waiting): (Vec<_>, Vec<_>) =
                state.due.drain(..).partition(|(due, _)| *due <= frame);
            state.due = waiting;
            let mut offerings = Vec::new();
            for (_, event) in ready {
                match event {
                    SimEvent::Open(name) => {
                        debug!(element = name, frame, "sim element opened");
                        state.open.insert(name);
                    }
                    SimEvent::Offerings(item) => {
                        state.next_request_id += 1;
                        offerings.push(MarketOfferings {
                            request_id: state.next_request_id,
                            item_id: self.scenario.tag_item_ids.then_some(item),
                            listings: self.market_for(item),
                        });
                    }
                }
            }
            offerings
        });
        for offerings in fired {
            self.oracle.on_offerings(&offerings);
            if self.scenario.duplicate_notifications {
                self.oracle.on_offerings(&offerings);
            }
        }
    }

    pub fn set_retainer_list_open(&self, open: bool) {
        self.with_state(|state| {
            if open {
                state.open.insert(element::RETAINER_LIST);
            } else {
                state.open.remove(element::RETAINER_LIST);
            }
        });
    }

    pub fn actions(&self) -> Vec<(String, Action)> {
        self.with_state(|state| state.actions.clone())
    }

    /// Every accepted listing, in order.
    pub fn sales(&self) -> Vec<(RetainerId, ItemId, Price)> {
        self.with_state(|state| state.sales.clone())
    }

    pub fn frame(&self) -> u64 {
        self.with_state(|state| state.frame)
    }

    fn market_for(&self, item: ItemId) -> Vec<Listing> {
        self.scenario
            .markets
            .iter()
            .find(|market| market.item_id == item)
            .map(|market| market.listings.clone())
            .unwrap_or_default()
    }

    fn retainer(&self, id: RetainerId) -> Option<&SimRetainer> {
        self.scenario.retainers.iter().find(|retainer| retainer.id == id)
    }

    fn apply(&self, state: &mut SimState, target: &'static str, action: Action) -> bool {
        let latency = self.scenario.latency_frames;
        match (target, action) {
            (element::RETAINER_LIST, Action::SelectRetainer { index }) => {
                let Some(retainer) = self.scenario.retainers.get(index) else {
                    return false;
                };
                if !retainer.available {
                    return false;
                }
                state.selected = Some(retainer.id);
                state.schedule(latency, SimEvent::Open(element::RETAINER_MENU));
                true
            }
            (
                element::RETAINER_MENU,
                Action::SelectMenuOption {
                    option: MenuOption::SellFromRetainer,
                },
            ) => {
                state.schedule(latency, SimEvent::Open(element::SELL_LIST));
                true
            }
            (element::SELL_LIST, Action::OpenItemMenu { slot }) => {
                let item = state
                    .selected
                    .and_then(|id| self.retainer(id))
                    .and_then(|retainer| retainer.holdings.get(slot.slot as usize))
                    .map(|holding| holding.item_id);
                let Some(item) = item else {
                    return false;
                };
                state.current_item = Some(item);
                state.schedule(latency, SimEvent::Open(element::CONTEXT_MENU));
                true
            }
            (
                element::CONTEXT_MENU,
                Action::SelectMenuOption {
                    option: MenuOption::PutUpForSale,
                },
            ) => {
                state.open.remove(element::CONTEXT_MENU);
                state.schedule(latency, SimEvent::Open(element::LISTING_DIALOG));
                true
            }
            (element::LISTING_DIALOG, Action::ComparePrices) => {
                let Some(item) = state.current_item else {
                    return false;
                };
                state.schedule(latency, SimEvent::Open(element::PRICE_COMPARISON));
                if !self.scenario.starved_items.contains(&item) {
                    state.schedule(self.scenario.price_delay_frames, SimEvent::Offerings(item));
                }
                true
            }
            (element::LISTING_DIALOG, Action::SubmitPrice { price }) => {
                let (Some(retainer), Some(item)) = (state.selected, state.current_item) else {
                    return false;
                };
                state.open.remove(element::LISTING_DIALOG);
                *state.listed.entry((retainer, item)).or_default() += 1;
                state.sales.push((retainer, item, price));
                state.current_item = None;
                true
            }
            (element::LISTING_DIALOG, Action::CancelListing) => {
                state.open.remove(element::LISTING_DIALOG);
                state.current_item = None;
                true
            }
            _ => false,
        }
    }
}

impl AutomationSurface for SimSurface {
    fn probe(&self, target: &str) -> bool {
        self.with_state(|state| state.open.contains(target))
    }

    fn invoke(&self, target: &str, action: Action) -> bool {
        let Some(target) = known_element(target) else {
            return false;
        };
        self.with_state(|state| {
            if !state.open.contains(target) {
                return false;
            }
            let applied = self.apply(state, target, action);
            if applied {
                state.actions.push((target.to_string(), action));
            }
            applied
        })
    }

    fn close(&self, target: &str) -> bool {
        self.with_state(|state| {
            let was_open = state.open.remove(target);
            if target == element::RETAINER_MENU {
                state.selected = None;
            }
            was_open
        })
    }

    fn retainers(&self) -> Option<Vec<RetainerSlot>> {
        if !self.scenario.retainer_table_available {
            return None;
        }
        Some(
            self.scenario
                .retainers
                .iter()
                .enumerate()
                .map(|(list_index, retainer)| RetainerSlot {
                    list_index,
                    id: retainer.id,
                    name: retainer.name.clone(),
                    available: retainer.available,
                })
                .collect(),
        )
    }

    fn listed_count(&self, retainer: RetainerId, item: ItemId) -> u32 {
        self.with_state(|state| state.listed.get(&(retainer, item)).copied().unwrap_or(0))
    }

    fn find_holding(&self, retainer: RetainerId, item: ItemId) -> Option<HoldingSlot> {
        let holdings = &self.retainer(retainer)?.holdings;
        holdings
            .iter()
            .enumerate()
            .find(|(_, holding)| holding.item_id == item)
            .map(|(index, holding)| HoldingSlot {
                page: 0,
                slot: index as u32,
                quantity: holding.quantity,
            })
    }
}

/// Result of one simulated run.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub frames: u64,
    pub report: RunReport,
    pub sales: Vec<(RetainerId, ItemId, Price)>,
    pub actions: Vec<(String, Action)>,
}

/// Drive a complete auto-run against `scenario` on a manual clock.
///
/// The run is started the way a player would: auto-run armed, retainer list
/// opened. `lists` are copied into an in-memory store.
pub fn simulate(
    scenario: Scenario,
    settings: Settings,
    lists: &[SellListAggregate],
    max_frames: u64,
) -> Result<Simulation> {
    scenario.validate()?;
    let frame = scenario.frame();
    let clock = Arc::new(ManualClock::new());
    let oracle = Arc::new(PriceOracle::new());
    let surface = Arc::new(SimSurface::new(scenario, oracle.clone()));

    let mut store = MemorySellListStore::with_lists(lists);
    store.set_auto_run_enabled(true);
    let mut host = Host::new(
        surface.clone(),
        oracle,
        clock.clone(),
        settings,
        Box::new(store),
    );

    for _ in 0..max_frames {
        surface.advance_frame();
        host.update();
        if let Some(report) = host.last_report() {
            info!(frames = surface.frame(), outcome = ?report.outcome, "simulation finished");
            return Ok(Simulation {
                frames: surface.frame(),
                report: report.clone(),
                sales: surface.sales(),
                actions: surface.actions(),
            });
        }
        clock.advance(frame);
    }
    host.shutdown();
    bail!("simulation did not finish within {max_frames} frames");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::item_id_of;

    const SCENARIO: &str = r#"
latency_frames = 1
price_delay_frames = 2
starved_items = [9]

[[retainers]]
id = 1
name = "Mimi"
holdings = [{ item_id = 5, quantity = 20 }, { item_id = 9, quantity = 1 }]
listed = [{ item_id = 7, count = 1 }]

[[retainers]]
id = 2
name = "Bobo"
available = false

[[markets]]
item_id = 5
listings = [{ unit_price = 120, quantity = 3 }, { unit_price = 99, quantity = 1 }]
"#;

    fn surface() -> (SimSurface, Arc<PriceOracle>) {
        let scenario: Scenario = toml::from_str(SCENARIO).expect("scenario");
        let oracle = Arc::new(PriceOracle::new());
        (SimSurface::new(scenario, oracle.clone()), oracle)
    }

    #[test]
    fn parses_scenario_with_defaults() {
        let scenario: Scenario = toml::from_str(SCENARIO).expect("scenario");
        assert_eq!(scenario.frame_ms, 16);
        assert!(scenario.retainer_list_open);
        assert!(scenario.retainers[0].available);
        assert!(!scenario.retainers[1].available);
        assert_eq!(scenario.retainers[0].holdings.len(), 2);
        scenario.validate().expect("valid");
    }

    #[test]
    fn rejects_duplicate_retainers() {
        let mut scenario: Scenario = toml::from_str(SCENARIO).expect("scenario");
        scenario.retainers.push(scenario.retainers[0].clone());
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn elements_open_after_latency() {
        let (surface, _) = surface();
        assert!(surface.invoke(element::RETAINER_LIST, Action::SelectRetainer { index: 0 }));
        assert!(!surface.probe(element::RETAINER_MENU));
        surface.advance_frame();
        assert!(surface.probe(element::RETAINER_MENU));
        assert!(!surface.invoke(element::RETAINER_LIST, Action::SelectRetainer { index: 1 }));
        assert!(!surface.invoke(element::SELL_LIST, Action::ComparePrices));
    }

    #[test]
    fn price_comparison_notifies_oracle() {
        let (surface, oracle) = surface();
        surface.invoke(element::RETAINER_LIST, Action::SelectRetainer { index: 0 });
        surface.advance_frame();
        surface.invoke(
            element::RETAINER_MENU,
            Action::SelectMenuOption {
                option: MenuOption::SellFromRetainer,
            },
        );
        surface.advance_frame();
        let slot = surface
            .find_holding(RetainerId::new(1).unwrap(), item_id_of(5))
            .expect("holding");
        assert!(surface.invoke(element::SELL_LIST, Action::OpenItemMenu { slot }));
        surface.advance_frame();
        surface.invoke(
            element::CONTEXT_MENU,
            Action::SelectMenuOption {
                option: MenuOption::PutUpForSale,
            },
        );
        surface.advance_frame();

        oracle.begin_request(item_id_of(5));
        assert!(surface.invoke(element::LISTING_DIALOG, Action::ComparePrices));
        surface.advance_frame();
        assert_eq!(oracle.try_take(item_id_of(5)), None);
        surface.advance_frame();
        assert_eq!(oracle.try_take(item_id_of(5)), Some(Ok(Price::new(98).unwrap())));
    }

    #[test]
    fn retainer_table_can_be_missing() {
        let mut scenario: Scenario = toml::from_str(SCENARIO).expect("scenario");
        scenario.retainer_table_available = false;
        let surface = SimSurface::new(scenario, Arc::new(PriceOracle::new()));
        assert!(surface.retainers().is_none());
    }
}
