//! Multi-retainer iteration controller.
//!
//! Drives one run across every eligible retainer: discovery, then one batch of
//! scheduled steps per retainer, then finishing. The next retainer's batch is
//! only planned once the scheduler has drained the previous one, so the
//! retainer cursor only ever moves forward.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::io::clock::Clock;
use crate::io::config::Settings;
use crate::io::run_log::{RunReport, new_run_id};
use crate::io::store::SellListRepository;
use crate::io::surface::{Action, AutomationSurface, MenuOption, element};
use crate::oracle::PriceOracle;
use crate::pipeline::{self, invoke};
use crate::run_state::{RetainerPlan, RunState, WorkflowContext};
use crate::scheduler::{SchedulerPolicy, StepResult, Task, TaskScheduler, TickOutcome};

pub use crate::io::run_log::RunOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// No run in progress. Holds how the last run ended, if any.
    Idle(Option<RunOutcome>),
    Discovering,
    /// Working through the batch of the retainer at this queue index.
    PerEntity(usize),
    Finishing,
}

/// 1-based position in the retainer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

pub struct IterationController {
    scheduler: TaskScheduler<WorkflowContext>,
    ctx: WorkflowContext,
    phase: Phase,
}

impl IterationController {
    pub fn new(
        surface: Arc<dyn AutomationSurface>,
        oracle: Arc<PriceOracle>,
        clock: Arc<dyn Clock>,
        settings: Settings,
    ) -> Self {
        let scheduler = TaskScheduler::new(clock.clone(), SchedulerPolicy::from(&settings));
        Self {
            scheduler,
            ctx: WorkflowContext::new(surface, oracle, clock, settings),
            phase: Phase::Idle(None),
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.phase, Phase::Idle(_))
    }

    pub fn run(&self) -> Option<&RunState> {
        self.ctx.run.as_ref()
    }

    pub fn current_step(&self) -> Option<&str> {
        self.scheduler.current_label()
    }

    pub fn progress(&self) -> Option<Progress> {
        let total = self.ctx.run.as_ref()?.len();
        match self.phase {
            Phase::PerEntity(entity) => Some(Progress {
                current: entity + 1,
                total,
            }),
            Phase::Finishing => Some(Progress {
                current: total,
                total,
            }),
            Phase::Idle(_) | Phase::Discovering => None,
        }
    }

    /// Failure reason of the last run, if it failed.
    pub fn last_failure(&self) -> Option<&str> {
        match &self.phase {
            Phase::Idle(Some(RunOutcome::Failed(reason))) => Some(reason),
            _ => None,
        }
    }

    /// Begin a new run. Returns `false` if one is already in progress.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            debug!(phase = ?self.phase, "run already in progress");
            return false;
        }
        let started_at = Utc::now();
        let run_id = new_run_id(started_at);
        info!(run_id = %run_id, "starting run");
        let owed = self.ctx.oracle.stale_deliveries();
        if owed > 0 {
            warn!(owed, "late price notifications still expected; the first prices may be cancelled");
        }
        self.scheduler.abort();
        self.scheduler.clear_error();
        self.ctx.run = Some(RunState::new(run_id, started_at, Vec::new()));
        self.phase = Phase::Discovering;
        true
    }

    /// Stop the current run. Queued steps are dropped and any price wait is cancelled.
    pub fn abort(&mut self) -> Option<RunReport> {
        if !self.is_running() {
            return None;
        }
        info!(phase = ?self.phase, "aborting run");
        self.scheduler.abort();
        self.ctx.oracle.cancel();
        self.end_run(RunOutcome::Aborted)
    }

    /// Advance the run by one frame. Returns the report when a run ends.
    pub fn on_frame(&mut self, store: &mut dyn SellListRepository) -> Option<RunReport> {
        match self.phase {
            Phase::Idle(_) => None,
            Phase::Discovering => match self.discover(store) {
                Ok(plans) => {
                    info!(retainers = plans.len(), "discovery complete");
                    if let Some(run) = self.ctx.run.as_mut() {
                        run.load_plans(plans);
                    }
                    self.enter_entity(0);
                    None
                }
                Err(err) => self.fail(store, format!("{err:#}")),
            },
            Phase::PerEntity(entity) => match self.scheduler.tick(&mut self.ctx) {
                TickOutcome::Aborted(err) => self.fail(store, err.to_string()),
                TickOutcome::Idle => {
                    self.next_entity(entity);
                    None
                }
                TickOutcome::Waiting | TickOutcome::Invoked { .. } => None,
            },
            Phase::Finishing => self.finish(store),
        }
    }

    fn discover(&self, store: &dyn SellListRepository) -> Result<Vec<RetainerPlan>> {
        let Some(mut slots) = self.ctx.surface.retainers() else {
            bail!("retainer table unavailable");
        };
        let lists = store.load_all_sell_lists().context("load sell lists")?;
        slots.sort_by_key(|slot| slot.list_index);

        let mut plans = Vec::new();
        for slot in slots {
            if !slot.available {
                debug!(retainer = %slot.name, "retainer unavailable, skipping");
                continue;
            }
            let Some(list) = lists.iter().find(|list| list.retainer_id() == slot.id) else {
                debug!(retainer = %slot.name, "no sell list, skipping");
                continue;
            };
            if list.is_empty() {
                debug!(retainer = %slot.name, "empty sell list, skipping");
                continue;
            }
            plans.push(RetainerPlan::new(slot, list));
        }
        if plans.is_empty() {
            bail!("no available retainers with sell lists");
        }
        Ok(plans)
    }

    fn next_entity(&mut self, entity: usize) {
        let Some(run) = self.ctx.run.as_mut() else {
            self.phase = Phase::Idle(None);
            return;
        };
        run.advance_past(entity);
        if run.is_finished() {
            debug!(retainers = run.len(), "all retainers processed");
            self.phase = Phase::Finishing;
        } else {
            let next = run.cursor();
            self.enter_entity(next);
        }
    }

    fn enter_entity(&mut self, entity: usize) {
        let Some(plan) = self.ctx.run.as_ref().and_then(|run| run.plan(entity)) else {
            self.phase = Phase::Finishing;
            return;
        };
        let list_index = plan.slot.list_index;
        let item_count = plan.items.len();
        info!(entity, retainer = %plan.slot.name, items = item_count, "processing retainer");

        let settings = self.ctx.settings.clone();
        let scheduler = &mut self.scheduler;

        scheduler.enqueue(Task::new(
            format!("select-retainer[{entity}]"),
            move |ctx: &mut WorkflowContext| {
                if !ctx.surface.probe(element::RETAINER_LIST) {
                    return StepResult::Retry;
                }
                invoke(
                    ctx,
                    element::RETAINER_LIST,
                    Action::SelectRetainer { index: list_index },
                )
            },
        ));
        scheduler.enqueue_delay(format!("retainer-delay[{entity}]"), settings.menu_delay());
        scheduler.enqueue(
            Task::new(format!("wait-retainer-menu[{entity}]"), |ctx: &mut WorkflowContext| {
                probe(ctx, element::RETAINER_MENU)
            })
            .max_attempts(settings.wait_for_menu_attempts),
        );
        scheduler.enqueue(Task::new(
            format!("open-sell-list[{entity}]"),
            |ctx: &mut WorkflowContext| {
                invoke(
                    ctx,
                    element::RETAINER_MENU,
                    Action::SelectMenuOption {
                        option: MenuOption::SellFromRetainer,
                    },
                )
            },
        ));
        scheduler.enqueue_delay(format!("sell-list-delay[{entity}]"), settings.menu_delay());
        scheduler.enqueue(
            Task::new(format!("wait-sell-list[{entity}]"), |ctx: &mut WorkflowContext| {
                probe(ctx, element::SELL_LIST)
            })
            .max_attempts(settings.wait_for_menu_attempts),
        );

        for index in 0..item_count {
            pipeline::enqueue_item(scheduler, entity, index, &settings);
        }

        scheduler.enqueue(Task::new(
            format!("close-sell-list[{entity}]"),
            |ctx: &mut WorkflowContext| {
                ctx.surface.close(element::SELL_LIST);
                StepResult::Done
            },
        ));
        scheduler.enqueue_delay(format!("close-list-delay[{entity}]"), settings.menu_delay());
        scheduler.enqueue(Task::new(
            format!("close-retainer-menu[{entity}]"),
            |ctx: &mut WorkflowContext| {
                ctx.surface.close(element::RETAINER_MENU);
                StepResult::Done
            },
        ));
        scheduler.enqueue(Task::new(
            format!("finish-retainer[{entity}]"),
            move |ctx: &mut WorkflowContext| {
                if let Some(run) = ctx.run.as_mut() {
                    run.advance_past(entity);
                }
                StepResult::Done
            },
        ));
        scheduler.enqueue_delay(
            format!("between-retainers[{entity}]"),
            settings.delay_between_retainers(),
        );

        self.phase = Phase::PerEntity(entity);
    }

    fn finish(&mut self, store: &mut dyn SellListRepository) -> Option<RunReport> {
        info!("run finished, disabling auto-run");
        disable_auto_run(store);
        self.end_run(RunOutcome::Succeeded)
    }

    fn fail(&mut self, store: &mut dyn SellListRepository, reason: String) -> Option<RunReport> {
        warn!(reason = %reason, "run failed, disabling auto-run");
        self.scheduler.abort();
        self.ctx.oracle.cancel();
        disable_auto_run(store);
        self.end_run(RunOutcome::Failed(reason))
    }

    fn end_run(&mut self, outcome: RunOutcome) -> Option<RunReport> {
        let report = self
            .ctx
            .run
            .take()
            .map(|run| run.report(Utc::now(), outcome.clone()));
        self.phase = Phase::Idle(Some(outcome));
        report
    }
}

fn probe(ctx: &WorkflowContext, target: &str) -> StepResult {
    if ctx.surface.probe(target) {
        StepResult::Done
    } else {
        StepResult::Retry
    }
}

fn disable_auto_run(store: &mut dyn SellListRepository) {
    store.set_auto_run_enabled(false);
    if let Err(err) = store.save() {
        warn!(error = %format!("{err:#}"), "failed to persist auto-run flag");
    }
}
