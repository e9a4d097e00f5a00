//! Single-item sell pipeline.
//!
//! Every item of a retainer's sell list is listed through the same fixed
//! sequence of steps, all enqueued up front. Once an item is settled (already
//! listed, missing, listed or cancelled) its remaining steps resolve `Done`
//! without touching the surface.

use tracing::{debug, info, warn};

use crate::core::budget::is_expired;
use crate::io::config::Settings;
use crate::io::surface::{Action, MenuOption, element};
use crate::oracle::PriceError;
use crate::run_state::{ItemOutcome, ItemRun, WorkflowContext};
use crate::scheduler::{StepResult, Task, TaskScheduler};

/// Build a step that only runs while item `(entity, index)` is still pending.
fn item_step<F>(label: String, entity: usize, index: usize, mut step: F) -> Task<WorkflowContext>
where
    F: FnMut(&mut WorkflowContext) -> StepResult + 'static,
{
    Task::new(label, move |ctx: &mut WorkflowContext| {
        match ctx.item(entity, index) {
            Some(run) if run.outcome.is_pending() => step(ctx),
            _ => StepResult::Done,
        }
    })
}

fn settle(ctx: &mut WorkflowContext, entity: usize, index: usize, outcome: ItemOutcome) {
    if let Some(run) = ctx.item_mut(entity, index) {
        debug!(item = %run.item.item_id, outcome = ?outcome, "item settled");
        run.outcome = outcome;
    }
}

/// Append the steps that list item `index` of entity `entity`.
pub fn enqueue_item(
    scheduler: &mut TaskScheduler<WorkflowContext>,
    entity: usize,
    index: usize,
    settings: &Settings,
) {
    let tag = format!("{entity}.{index}");

    scheduler.enqueue(item_step(
        format!("check-listed[{tag}]"),
        entity,
        index,
        move |ctx| {
            let Some(retainer) = ctx.retainer_id(entity) else {
                return StepResult::Done;
            };
            let Some(run) = ctx.item(entity, index) else {
                return StepResult::Done;
            };
            let (item_id, wanted) = (run.item.item_id, run.item.quantity_to_maintain.value());
            let listed = ctx.surface.listed_count(retainer, item_id);
            if listed >= wanted {
                info!(retainer = %retainer, item = %item_id, listed, wanted, "already listed, skipping");
                settle(ctx, entity, index, ItemOutcome::AlreadyListed);
            }
            StepResult::Done
        },
    ));

    scheduler.enqueue(item_step(
        format!("locate-holding[{tag}]"),
        entity,
        index,
        move |ctx| {
            let (Some(retainer), Some(item_id)) = (
                ctx.retainer_id(entity),
                ctx.item(entity, index).map(|run| run.item.item_id),
            ) else {
                return StepResult::Done;
            };
            match ctx.surface.find_holding(retainer, item_id) {
                Some(holding) => {
                    if let Some(run) = ctx.item_mut(entity, index) {
                        run.holding = Some(holding);
                    }
                }
                None => {
                    info!(retainer = %retainer, item = %item_id, "item not in retainer inventory");
                    settle(ctx, entity, index, ItemOutcome::Missing);
                }
            }
            StepResult::Done
        },
    ));

    scheduler.enqueue(item_step(
        format!("open-item-menu[{tag}]"),
        entity,
        index,
        move |ctx| {
            let Some(slot) = ctx.item(entity, index).and_then(|run| run.holding) else {
                return StepResult::Retry;
            };
            invoke(ctx, element::SELL_LIST, Action::OpenItemMenu { slot })
        },
    ));
    scheduler.enqueue_delay(format!("menu-delay[{tag}]"), settings.menu_delay());

    scheduler.enqueue(item_step(
        format!("put-up-for-sale[{tag}]"),
        entity,
        index,
        |ctx| {
            if !ctx.surface.probe(element::CONTEXT_MENU) {
                return StepResult::Retry;
            }
            invoke(
                ctx,
                element::CONTEXT_MENU,
                Action::SelectMenuOption {
                    option: MenuOption::PutUpForSale,
                },
            )
        },
    ));

    scheduler.enqueue(
        item_step(format!("wait-listing-dialog[{tag}]"), entity, index, |ctx| {
            if ctx.surface.probe(element::LISTING_DIALOG) {
                StepResult::Done
            } else {
                StepResult::Retry
            }
        })
        .max_attempts(settings.wait_for_menu_attempts),
    );
    scheduler.enqueue_delay(format!("dialog-delay[{tag}]"), settings.menu_delay());

    scheduler.enqueue(item_step(
        format!("compare-prices[{tag}]"),
        entity,
        index,
        move |ctx| {
            let Some(item_id) = ctx.item(entity, index).map(|run| run.item.item_id) else {
                return StepResult::Done;
            };
            ctx.oracle.begin_request(item_id);
            invoke(ctx, element::LISTING_DIALOG, Action::ComparePrices)
        },
    ));
    scheduler.enqueue_delay(format!("price-settle[{tag}]"), settings.price_settle());

    let price_timeout = settings.price_timeout();
    scheduler.enqueue(item_step(
        format!("await-price[{tag}]"),
        entity,
        index,
        move |ctx| {
            let now = ctx.clock.now();
            let oracle = ctx.oracle.clone();
            let Some(run) = ctx.item_mut(entity, index) else {
                return StepResult::Done;
            };
            let item_id = run.item.item_id;
            let deadline = *run.price_deadline.get_or_insert(now + price_timeout);
            match oracle.try_take(item_id) {
                Some(outcome) => {
                    run.price = Some(outcome);
                    StepResult::Done
                }
                None if is_expired(deadline, now) => {
                    oracle.abandon(item_id);
                    warn!(item = %item_id, timeout_ms = price_timeout.as_millis() as u64, "price did not arrive in time");
                    run.price = Some(Err(PriceError::Timeout {
                        item: item_id,
                        waited_ms: price_timeout.as_millis() as u64,
                    }));
                    StepResult::Done
                }
                None => StepResult::Pending,
            }
        },
    ));

    scheduler.enqueue(item_step(
        format!("close-price-comparison[{tag}]"),
        entity,
        index,
        |ctx| {
            ctx.surface.close(element::PRICE_COMPARISON);
            StepResult::Done
        },
    ));
    scheduler.enqueue_delay(format!("close-delay[{tag}]"), settings.menu_delay());

    scheduler.enqueue(item_step(
        format!("submit-or-cancel[{tag}]"),
        entity,
        index,
        move |ctx| {
            let Some(run) = ctx.item(entity, index).cloned() else {
                return StepResult::Done;
            };
            submit_or_cancel(ctx, entity, index, run)
        },
    ));
    scheduler.enqueue_delay(format!("item-delay[{tag}]"), settings.delay_between_items());
}

pub(crate) fn invoke(ctx: &WorkflowContext, target: &str, action: Action) -> StepResult {
    if ctx.surface.invoke(target, action) {
        StepResult::Done
    } else {
        debug!(element = target, action = ?action, "action not applied");
        StepResult::Retry
    }
}

/// Submit the undercut price, or back out of the dialog without listing.
///
/// A missing or failed price never reaches `SubmitPrice`.
fn submit_or_cancel(
    ctx: &mut WorkflowContext,
    entity: usize,
    index: usize,
    run: ItemRun,
) -> StepResult {
    let item_id = run.item.item_id;
    match run.price {
        Some(Ok(price)) => {
            if !ctx.surface.invoke(element::LISTING_DIALOG, Action::SubmitPrice { price }) {
                return StepResult::Retry;
            }
            info!(item = %item_id, price = price.value(), "listed item");
            settle(ctx, entity, index, ItemOutcome::Listed(price));
            StepResult::Done
        }
        other => {
            if !ctx.surface.invoke(element::LISTING_DIALOG, Action::CancelListing) {
                return StepResult::Retry;
            }
            let reason = match other {
                Some(Err(err)) => err.to_string(),
                _ => "no price".to_string(),
            };
            info!(item = %item_id, reason = %reason, "listing cancelled");
            settle(ctx, entity, index, ItemOutcome::Cancelled(reason));
            StepResult::Done
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::pricing::Listing;
    use crate::io::clock::ManualClock;
    use crate::oracle::{MarketOfferings, PriceOracle};
    use crate::scheduler::{SchedulerPolicy, TickOutcome};
    use crate::test_support::{
        RecordingSurface, fast_settings, plan_for, run_state_with, sell_item,
    };

    struct Harness {
        clock: Arc<ManualClock>,
        surface: Arc<RecordingSurface>,
        oracle: Arc<PriceOracle>,
        scheduler: TaskScheduler<WorkflowContext>,
        ctx: WorkflowContext,
    }

    fn harness(listed: u32, holding: bool) -> Harness {
        let clock = Arc::new(ManualClock::new());
        let surface = Arc::new(RecordingSurface::ready());
        if holding {
            surface.hold(1, 5);
        }
        surface.set_listed(1, 5, listed);
        let oracle = Arc::new(PriceOracle::new());
        let settings = fast_settings();
        let mut ctx = WorkflowContext::new(surface.clone(), oracle.clone(), clock.clone(), settings.clone());
        ctx.run = Some(run_state_with(vec![plan_for(0, 1, vec![sell_item(5, 2)])]));
        let mut scheduler = TaskScheduler::new(
            clock.clone(),
            SchedulerPolicy {
                max_attempts_default: 5,
                step_timeout: None,
                min_step_interval: std::time::Duration::ZERO,
            },
        );
        enqueue_item(&mut scheduler, 0, 0, &settings);
        Harness {
            clock,
            surface,
            oracle,
            scheduler,
            ctx,
        }
    }

    impl Harness {
        fn tick_until_idle(&mut self, max_ticks: usize) {
            for _ in 0..max_ticks {
                match self.scheduler.tick(&mut self.ctx) {
                    TickOutcome::Idle => return,
                    TickOutcome::Aborted(err) => panic!("aborted: {err}"),
                    _ => self.clock.advance_ms(10),
                }
            }
            panic!("pipeline did not finish within {max_ticks} ticks");
        }

        fn outcome(&self) -> ItemOutcome {
            self.ctx.item(0, 0).expect("item").outcome.clone()
        }
    }

    #[test]
    fn lists_at_undercut_price() {
        let mut h = harness(0, true);
        for _ in 0..200 {
            if h.oracle.pending_item().is_some() {
                break;
            }
            h.scheduler.tick(&mut h.ctx);
            h.clock.advance_ms(10);
        }
        h.oracle.on_offerings(&MarketOfferings {
            request_id: 1,
            item_id: None,
            listings: vec![Listing {
                unit_price: 100,
                quantity: 3,
            }],
        });
        h.tick_until_idle(500);

        assert_eq!(h.outcome(), ItemOutcome::Listed(crate::core::types::Price::new(99).unwrap()));
        assert!(h.surface.actions().contains(&(
            element::LISTING_DIALOG.to_string(),
            Action::SubmitPrice {
                price: crate::core::types::Price::new(99).unwrap()
            }
        )));
    }

    #[test]
    fn already_listed_item_touches_nothing() {
        let mut h = harness(2, true);
        h.tick_until_idle(500);
        assert_eq!(h.outcome(), ItemOutcome::AlreadyListed);
        assert!(h.surface.actions().is_empty());
    }

    #[test]
    fn missing_holding_is_skipped() {
        let mut h = harness(0, false);
        h.tick_until_idle(500);
        assert_eq!(h.outcome(), ItemOutcome::Missing);
        assert!(h.surface.actions().is_empty());
    }

    /// Verifies a price that never arrives cancels the listing and never submits.
    #[test]
    fn price_timeout_cancels_instead_of_submitting() {
        let mut h = harness(0, true);
        h.tick_until_idle(5_000);

        assert!(matches!(h.outcome(), ItemOutcome::Cancelled(_)));
        let actions = h.surface.actions();
        assert!(
            actions
                .iter()
                .all(|(_, action)| !matches!(action, Action::SubmitPrice { .. }))
        );
        assert!(actions.contains(&(element::LISTING_DIALOG.to_string(), Action::CancelListing)));
    }

    #[test]
    fn refused_price_comparison_aborts_without_submitting() {
        let mut h = harness(0, true);
        h.surface.refuse_actions_on(element::LISTING_DIALOG);
        let mut aborted = None;
        for _ in 0..500 {
            match h.scheduler.tick(&mut h.ctx) {
                TickOutcome::Aborted(err) => {
                    aborted = Some(err);
                    break;
                }
                TickOutcome::Idle => break,
                _ => h.clock.advance_ms(10),
            }
        }

        let err = aborted.expect("scheduler should give up");
        assert_eq!(err.to_string(), "step 'compare-prices[0.0]' failed after 5 attempts");
        assert_eq!(h.outcome(), ItemOutcome::Pending);
        assert!(h.scheduler.is_idle());
    }

    #[test]
    fn no_listings_cancels() {
        let mut h = harness(0, true);
        for _ in 0..200 {
            if h.oracle.pending_item().is_some() {
                break;
            }
            h.scheduler.tick(&mut h.ctx);
            h.clock.advance_ms(10);
        }
        h.oracle.on_offerings(&MarketOfferings {
            request_id: 1,
            item_id: None,
            listings: Vec::new(),
        });
        h.tick_until_idle(500);
        assert_eq!(
            h.outcome(),
            ItemOutcome::Cancelled("market has no listings for item 5".to_string())
        );
    }
}
