//! Host-facing command surface.
//!
//! A frame loop embeds one [`Host`] and calls [`Host::update`] once per frame.
//! Everything else (toggling auto-run, one-shot runs, status for a UI) is a
//! plain method call.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::controller::{IterationController, Phase, Progress, RunOutcome};
use crate::io::clock::Clock;
use crate::io::config::Settings;
use crate::io::run_log::{RunReport, write_run_report};
use crate::io::store::SellListRepository;
use crate::io::surface::{AutomationSurface, element};
use crate::oracle::{MarketOfferings, PriceOracle};

/// Open/close transition of the retainer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEdge {
    Opened,
    Closed,
}

/// Watches the retainer list element for open/close transitions.
#[derive(Debug, Default)]
pub struct ListMonitor {
    was_open: bool,
}

impl ListMonitor {
    pub fn observe(&mut self, open: bool) -> Option<ListEdge> {
        let edge = match (self.was_open, open) {
            (false, true) => Some(ListEdge::Opened),
            (true, false) => Some(ListEdge::Closed),
            _ => None,
        };
        self.was_open = open;
        edge
    }
}

/// Snapshot for status display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStatus {
    pub auto_run: bool,
    pub phase: Phase,
    pub progress: Option<Progress>,
    pub current_step: Option<String>,
    pub last_error: Option<String>,
}

pub struct Host {
    controller: IterationController,
    store: Box<dyn SellListRepository>,
    surface: Arc<dyn AutomationSurface>,
    oracle: Arc<PriceOracle>,
    monitor: ListMonitor,
    report_dir: Option<PathBuf>,
    last_report: Option<RunReport>,
    /// Auto-run was enabled during a one-shot run; the run's disarm must not stick.
    rearm_auto_run: bool,
}

impl Host {
    pub fn new(
        surface: Arc<dyn AutomationSurface>,
        oracle: Arc<PriceOracle>,
        clock: Arc<dyn Clock>,
        settings: Settings,
        store: Box<dyn SellListRepository>,
    ) -> Self {
        let controller =
            IterationController::new(surface.clone(), oracle.clone(), clock, settings);
        Self {
            controller,
            store,
            surface,
            oracle,
            monitor: ListMonitor::default(),
            report_dir: None,
            last_report: None,
            rearm_auto_run: false,
        }
    }

    /// Write a run report into `dir` whenever a run ends.
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    pub fn store(&self) -> &dyn SellListRepository {
        self.store.as_ref()
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    /// Persist the auto-run flag, then start or stop accordingly.
    ///
    /// Enabling while the retainer list is closed only arms the flag; the run
    /// starts when the list next opens. Enabling during a [`Host::run_once`]
    /// run leaves that run alone and keeps the flag armed after it ends.
    pub fn set_auto_run(&mut self, enabled: bool) -> Result<()> {
        let was_enabled = self.store.auto_run_enabled();
        self.store.set_auto_run_enabled(enabled);
        self.store.save().context("persist auto-run flag")?;
        info!(enabled, "auto-run toggled");
        self.rearm_auto_run = enabled && !was_enabled && self.controller.is_running();
        if enabled {
            if !self.controller.is_running() && self.surface.probe(element::RETAINER_LIST) {
                self.controller.start();
            }
        } else if let Some(report) = self.controller.abort() {
            self.record(report);
        }
        Ok(())
    }

    /// Start a run without touching the auto-run flag.
    pub fn run_once(&mut self) -> bool {
        self.controller.start()
    }

    pub fn abort(&mut self) {
        if let Some(report) = self.controller.abort() {
            self.record(report);
        }
    }

    /// Deliver a market notification from the client.
    pub fn on_offerings(&self, offerings: &MarketOfferings) {
        self.oracle.on_offerings(offerings);
    }

    /// Per-frame entry point.
    pub fn update(&mut self) {
        let open = self.surface.probe(element::RETAINER_LIST);
        match self.monitor.observe(open) {
            Some(ListEdge::Opened) => {
                debug!("retainer list opened");
                if self.store.auto_run_enabled() && self.controller.start() {
                    info!("auto-run started by retainer list");
                }
            }
            Some(ListEdge::Closed) => debug!("retainer list closed"),
            None => {}
        }

        if let Some(report) = self.controller.on_frame(self.store.as_mut()) {
            self.record(report);
        }
    }

    /// A failed run's disarm stands even when the flag was enabled mid-run.
    fn restore_rearmed_flag(&mut self, outcome: &RunOutcome) {
        let rearm = std::mem::take(&mut self.rearm_auto_run);
        if !rearm || matches!(outcome, RunOutcome::Failed(_)) || self.store.auto_run_enabled() {
            return;
        }
        self.store.set_auto_run_enabled(true);
        match self.store.save() {
            Ok(()) => info!("auto-run kept armed after one-shot run"),
            Err(err) => warn!(error = %format!("{err:#}"), "failed to persist re-armed auto-run flag"),
        }
    }

    pub fn status(&self) -> HostStatus {
        HostStatus {
            auto_run: self.store.auto_run_enabled(),
            phase: self.controller.phase().clone(),
            progress: self.controller.progress(),
            current_step: self.controller.current_step().map(str::to_string),
            last_error: self.controller.last_failure().map(str::to_string),
        }
    }

    /// Abort any run and refuse further price waits.
    pub fn shutdown(&mut self) {
        self.abort();
        self.oracle.shutdown();
    }

    fn record(&mut self, report: RunReport) {
        info!(run_id = %report.run_id, outcome = ?report.outcome, listed = report.listed_count(), "run ended");
        if let Some(dir) = &self.report_dir
            && let Err(err) = write_run_report(dir, &report)
        {
            warn!(error = %format!("{err:#}"), "failed to write run report");
        }
        self.restore_rearmed_flag(&report.outcome);
        self.last_report = Some(report);
    }
}
