//! Data directory layout and scaffolding.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::info;

use super::config::{Settings, write_settings};
use super::store::{StoreDocument, write_store_document};

/// Canonical paths inside an autosell data directory.
#[derive(Debug, Clone)]
pub struct AutosellPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub store_path: PathBuf,
    pub runs_dir: PathBuf,
}

impl AutosellPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_path: root.join("autosell.toml"),
            store_path: root.join("sell_lists.json"),
            runs_dir: root.join("runs"),
            root,
        }
    }
}

/// Write default settings and an empty store. Refuses to overwrite existing files.
pub fn init_data_dir(root: &Path) -> Result<AutosellPaths> {
    let paths = AutosellPaths::new(root);
    for path in [&paths.config_path, &paths.store_path] {
        if path.exists() {
            return Err(anyhow!("{} already exists", path.display()));
        }
    }
    write_settings(&paths.config_path, &Settings::default())?;
    write_store_document(&paths.store_path, &StoreDocument::default())?;
    info!(root = %root.display(), "initialized autosell data directory");
    Ok(paths)
}
