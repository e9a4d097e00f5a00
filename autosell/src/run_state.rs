//! In-memory state of one automation run, shared by every scheduled step.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::core::sell_list::{SellListAggregate, SellListItem};
use crate::core::types::{Price, RetainerId};
use crate::io::clock::Clock;
use crate::io::config::Settings;
use crate::io::run_log::{ItemReport, ItemStatus, RetainerReport, RunOutcome, RunReport};
use crate::io::surface::{AutomationSurface, HoldingSlot, RetainerSlot};
use crate::oracle::{PriceError, PriceOracle};

/// What happened to one item in the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Not decided yet. Remaining steps still act on it.
    Pending,
    AlreadyListed,
    Missing,
    Listed(Price),
    Cancelled(String),
}

impl ItemOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, ItemOutcome::Pending)
    }
}

/// Working data for one sell-list item.
#[derive(Debug, Clone)]
pub struct ItemRun {
    pub item: SellListItem,
    pub outcome: ItemOutcome,
    pub holding: Option<HoldingSlot>,
    pub price_deadline: Option<Instant>,
    pub price: Option<Result<Price, PriceError>>,
}

impl ItemRun {
    fn new(item: SellListItem) -> Self {
        Self {
            item,
            outcome: ItemOutcome::Pending,
            holding: None,
            price_deadline: None,
            price: None,
        }
    }
}

/// One entity (retainer) of the Entity Queue.
#[derive(Debug, Clone)]
pub struct RetainerPlan {
    pub slot: RetainerSlot,
    pub items: Vec<ItemRun>,
}

impl RetainerPlan {
    pub fn new(slot: RetainerSlot, list: &SellListAggregate) -> Self {
        Self {
            slot,
            items: list.items().iter().cloned().map(ItemRun::new).collect(),
        }
    }

    pub fn retainer_id(&self) -> RetainerId {
        self.slot.id
    }
}

/// Entity queue plus a forward-only cursor.
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    plans: Vec<RetainerPlan>,
    cursor: usize,
}

impl RunState {
    pub fn new(run_id: String, started_at: DateTime<Utc>, plans: Vec<RetainerPlan>) -> Self {
        Self {
            run_id,
            started_at,
            plans,
            cursor: 0,
        }
    }

    /// Replace the entity queue (after discovery) and rewind the cursor.
    pub fn load_plans(&mut self, plans: Vec<RetainerPlan>) {
        self.plans = plans;
        self.cursor = 0;
    }

    pub fn plan(&self, entity: usize) -> Option<&RetainerPlan> {
        self.plans.get(entity)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move past `entity`. The cursor never moves backwards.
    pub fn advance_past(&mut self, entity: usize) {
        self.cursor = self.cursor.max(entity + 1);
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.plans.len()
    }

    pub fn item(&self, entity: usize, index: usize) -> Option<&ItemRun> {
        self.plans.get(entity)?.items.get(index)
    }

    pub fn item_mut(&mut self, entity: usize, index: usize) -> Option<&mut ItemRun> {
        self.plans.get_mut(entity)?.items.get_mut(index)
    }

    pub fn report(&self, ended_at: DateTime<Utc>, outcome: RunOutcome) -> RunReport {
        let retainers = self
            .plans
            .iter()
            .map(|plan| RetainerReport {
                retainer_id: plan.slot.id,
                retainer_name: plan.slot.name.clone(),
                items: plan
                    .items
                    .iter()
                    .map(|run| ItemReport {
                        item_id: run.item.item_id,
                        item_name: run.item.item_name.clone(),
                        status: match &run.outcome {
                            ItemOutcome::Pending => ItemStatus::NotReached,
                            ItemOutcome::AlreadyListed => ItemStatus::AlreadyListed,
                            ItemOutcome::Missing => ItemStatus::Missing,
                            ItemOutcome::Listed(price) => ItemStatus::Listed {
                                price: price.value(),
                            },
                            ItemOutcome::Cancelled(reason) => ItemStatus::Cancelled {
                                reason: reason.clone(),
                            },
                        },
                    })
                    .collect(),
            })
            .collect();
        RunReport {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            ended_at,
            outcome,
            retainers,
        }
    }
}

/// Everything a scheduled step may touch.
pub struct WorkflowContext {
    pub surface: Arc<dyn AutomationSurface>,
    pub oracle: Arc<PriceOracle>,
    pub clock: Arc<dyn Clock>,
    pub settings: Settings,
    /// `None` between runs; steps left over from an aborted run see nothing.
    pub run: Option<RunState>,
}

impl WorkflowContext {
    pub fn new(
        surface: Arc<dyn AutomationSurface>,
        oracle: Arc<PriceOracle>,
        clock: Arc<dyn Clock>,
        settings: Settings,
    ) -> Self {
        Self {
            surface,
            oracle,
            clock,
            settings,
            run: None,
        }
    }

    pub fn item(&self, entity: usize, index: usize) -> Option<&ItemRun> {
        self.run.as_ref()?.item(entity, index)
    }

    pub fn item_mut(&mut self, entity: usize, index: usize) -> Option<&mut ItemRun> {
        self.run.as_mut()?.item_mut(entity, index)
    }

    pub fn retainer_id(&self, entity: usize) -> Option<RetainerId> {
        self.run.as_ref()?.plan(entity).map(RetainerPlan::retainer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ItemId, Quantity, RetainerName};
    use chrono::TimeZone;

    fn plan(id: u64, items: &[u32]) -> RetainerPlan {
        let items = items
            .iter()
            .map(|&item| {
                SellListItem::new(
                    ItemId::new(item).unwrap(),
                    format!("item-{item}"),
                    Quantity::new(1).unwrap(),
                )
                .unwrap()
            })
            .collect();
        let name = RetainerName::new(format!("R{id}")).unwrap();
        let list =
            SellListAggregate::with_items(RetainerId::new(id).unwrap(), name.clone(), items)
                .unwrap();
        RetainerPlan::new(
            RetainerSlot {
                list_index: id as usize - 1,
                id: RetainerId::new(id).unwrap(),
                name,
                available: true,
            },
            &list,
        )
    }

    #[test]
    fn cursor_only_moves_forward() {
        let started = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut run = RunState::new("run".into(), started, vec![plan(1, &[1]), plan(2, &[2])]);
        run.advance_past(1);
        assert_eq!(run.cursor(), 2);
        run.advance_past(0);
        assert_eq!(run.cursor(), 2);
        assert!(run.is_finished());
    }

    #[test]
    fn report_maps_outcomes() {
        let started = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut run = RunState::new("run".into(), started, vec![plan(1, &[1, 2, 3])]);
        run.item_mut(0, 0).unwrap().outcome = ItemOutcome::Listed(Price::new(41).unwrap());
        run.item_mut(0, 1).unwrap().outcome = ItemOutcome::Cancelled("no listings".into());

        let report = run.report(started, RunOutcome::Succeeded);
        let statuses: Vec<_> = report.items().map(|item| item.status.clone()).collect();
        assert_eq!(
            statuses,
            vec![
                ItemStatus::Listed { price: 41 },
                ItemStatus::Cancelled {
                    reason: "no listings".into()
                },
                ItemStatus::NotReached,
            ]
        );
    }
}
