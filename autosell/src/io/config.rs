//! Automation settings stored in `autosell.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Timing and retry settings (TOML).
///
/// Intended to be edited by humans. Missing fields default to values that
/// absorb the client's usual animation and network latency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Attempt budget for steps that do not set their own.
    pub max_attempts_default: u32,

    /// Wall-clock budget for any single in-flight step.
    pub step_timeout_ms: u64,

    /// Minimum spacing between two step invocations.
    pub min_step_interval_ms: u64,

    /// How long to wait for a price notification before cancelling a listing.
    pub price_timeout_ms: u64,

    /// Pause between firing the price comparison and awaiting its result.
    pub price_settle_ms: u64,

    /// Pause after each menu interaction.
    pub menu_delay_ms: u64,

    pub delay_between_retainers_ms: u64,

    pub delay_between_items_ms: u64,

    /// Attempt budget while waiting for the retainer menu to open after selection.
    pub wait_for_menu_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_attempts_default: 50,
            step_timeout_ms: 5 * 60 * 1000,
            min_step_interval_ms: 100,
            price_timeout_ms: 10_000,
            price_settle_ms: 1_500,
            menu_delay_ms: 200,
            delay_between_retainers_ms: 1_000,
            delay_between_items_ms: 500,
            wait_for_menu_attempts: 300,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts_default == 0 {
            return Err(anyhow!("max_attempts_default must be > 0"));
        }
        if self.step_timeout_ms == 0 {
            return Err(anyhow!("step_timeout_ms must be > 0"));
        }
        if self.price_timeout_ms == 0 {
            return Err(anyhow!("price_timeout_ms must be > 0"));
        }
        if self.price_timeout_ms >= self.step_timeout_ms {
            return Err(anyhow!("price_timeout_ms must be < step_timeout_ms"));
        }
        if self.wait_for_menu_attempts == 0 {
            return Err(anyhow!("wait_for_menu_attempts must be > 0"));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn min_step_interval(&self) -> Duration {
        Duration::from_millis(self.min_step_interval_ms)
    }

    pub fn price_timeout(&self) -> Duration {
        Duration::from_millis(self.price_timeout_ms)
    }

    pub fn price_settle(&self) -> Duration {
        Duration::from_millis(self.price_settle_ms)
    }

    pub fn menu_delay(&self) -> Duration {
        Duration::from_millis(self.menu_delay_ms)
    }

    pub fn delay_between_retainers(&self) -> Duration {
        Duration::from_millis(self.delay_between_retainers_ms)
    }

    pub fn delay_between_items(&self) -> Duration {
        Duration::from_millis(self.delay_between_items_ms)
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `Settings::default()`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        debug!(path = %path.display(), "settings file missing, using defaults");
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("settings path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp settings {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace settings {}", path.display()))?;
    Ok(())
}
