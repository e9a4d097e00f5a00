//! Sell-list persistence.
//!
//! The automation only needs the [`SellListRepository`] trait. The JSON store
//! keeps every retainer's sell list plus the auto-run flag in one document,
//! validated against an embedded JSON Schema on load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::sell_list::{SellListAggregate, SellListItem};
use crate::core::types::{RetainerId, RetainerName};

const STORE_SCHEMA: &str = include_str!("../../schemas/sell_lists.schema.json");
const STORE_VERSION: u32 = 1;

/// Persistence collaborator used by the host and the iteration controller.
pub trait SellListRepository {
    fn load_all_sell_lists(&self) -> Result<Vec<SellListAggregate>>;
    fn get_sell_list(&self, retainer: RetainerId) -> Result<Option<SellListAggregate>>;
    /// Stage `list` in memory; call [`SellListRepository::save`] to persist.
    fn save_sell_list(&mut self, list: &SellListAggregate) -> Result<()>;
    fn remove_sell_list(&mut self, retainer: RetainerId) -> Result<bool>;
    fn auto_run_enabled(&self) -> bool;
    fn set_auto_run_enabled(&mut self, enabled: bool);
    fn save(&mut self) -> Result<()>;
}

/// On-disk shape of one sell list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellListRecord {
    pub retainer_name: RetainerName,
    pub items: Vec<SellListItem>,
}

/// Whole `sell_lists.json` document. Keys are retainer ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub version: u32,
    pub auto_run_enabled: bool,
    pub sell_lists: BTreeMap<u64, SellListRecord>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            auto_run_enabled: false,
            sell_lists: BTreeMap::new(),
        }
    }
}

impl StoreDocument {
    fn aggregates(&self) -> Result<Vec<SellListAggregate>> {
        self.sell_lists
            .iter()
            .map(|(&id, record)| record_to_aggregate(id, record))
            .collect()
    }

    fn get(&self, retainer: RetainerId) -> Result<Option<SellListAggregate>> {
        self.sell_lists
            .get(&retainer.value())
            .map(|record| record_to_aggregate(retainer.value(), record))
            .transpose()
    }

    fn put(&mut self, list: &SellListAggregate) {
        self.sell_lists.insert(
            list.retainer_id().value(),
            SellListRecord {
                retainer_name: list.retainer_name().clone(),
                items: list.items().to_vec(),
            },
        );
    }
}

fn record_to_aggregate(id: u64, record: &SellListRecord) -> Result<SellListAggregate> {
    let retainer_id = RetainerId::new(id)?;
    let items = record
        .items
        .iter()
        .map(|item| {
            SellListItem::new(item.item_id, item.item_name.clone(), item.quantity_to_maintain)
                .with_context(|| format!("item {} of retainer {id}", item.item_id))
        })
        .collect::<Result<Vec<_>>>()?;
    SellListAggregate::with_items(retainer_id, record.retainer_name.clone(), items)
        .with_context(|| format!("sell list for retainer {id}"))
}

/// Parse and validate a store document (schema, then value objects).
pub fn parse_store_document(raw: &str) -> Result<StoreDocument> {
    let value: Value = serde_json::from_str(raw).context("parse sell lists json")?;
    validate_schema(&value)?;
    let document: StoreDocument =
        serde_json::from_value(value).context("deserialize sell lists")?;
    document.aggregates()?;
    Ok(document)
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(STORE_SCHEMA).context("parse embedded schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

/// JSON file store (`sell_lists.json`).
#[derive(Debug)]
pub struct JsonSellListStore {
    path: PathBuf,
    document: StoreDocument,
}

impl JsonSellListStore {
    /// Open the store at `path`. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            parse_store_document(&raw).with_context(|| format!("load {}", path.display()))?
        } else {
            debug!(path = %path.display(), "sell list store missing, starting empty");
            StoreDocument::default()
        };
        debug!(path = %path.display(), lists = document.sell_lists.len(), "sell list store opened");
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &StoreDocument {
        &self.document
    }
}

impl SellListRepository for JsonSellListStore {
    fn load_all_sell_lists(&self) -> Result<Vec<SellListAggregate>> {
        self.document.aggregates()
    }

    fn get_sell_list(&self, retainer: RetainerId) -> Result<Option<SellListAggregate>> {
        self.document.get(retainer)
    }

    fn save_sell_list(&mut self, list: &SellListAggregate) -> Result<()> {
        self.document.put(list);
        Ok(())
    }

    fn remove_sell_list(&mut self, retainer: RetainerId) -> Result<bool> {
        Ok(self.document.sell_lists.remove(&retainer.value()).is_some())
    }

    fn auto_run_enabled(&self) -> bool {
        self.document.auto_run_enabled
    }

    fn set_auto_run_enabled(&mut self, enabled: bool) {
        self.document.auto_run_enabled = enabled;
    }

    fn save(&mut self) -> Result<()> {
        write_store_document(&self.path, &self.document)
    }
}

/// Atomically write a store document (temp file + rename).
pub fn write_store_document(path: &Path, document: &StoreDocument) -> Result<()> {
    debug!(path = %path.display(), lists = document.sell_lists.len(), auto_run = document.auto_run_enabled, "writing sell lists");
    let mut buf = serde_json::to_string_pretty(document).context("serialize sell lists")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp store {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace store {}", path.display()))?;
    Ok(())
}

/// In-memory store. `save` only counts calls.
#[derive(Debug, Default, Clone)]
pub struct MemorySellListStore {
    document: StoreDocument,
    saves: usize,
}

impl MemorySellListStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lists(lists: &[SellListAggregate]) -> Self {
        let mut store = Self::new();
        for list in lists {
            store.document.put(list);
        }
        store
    }

    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl SellListRepository for MemorySellListStore {
    fn load_all_sell_lists(&self) -> Result<Vec<SellListAggregate>> {
        self.document.aggregates()
    }

    fn get_sell_list(&self, retainer: RetainerId) -> Result<Option<SellListAggregate>> {
        self.document.get(retainer)
    }

    fn save_sell_list(&mut self, list: &SellListAggregate) -> Result<()> {
        self.document.put(list);
        Ok(())
    }

    fn remove_sell_list(&mut self, retainer: RetainerId) -> Result<bool> {
        Ok(self.document.sell_lists.remove(&retainer.value()).is_some())
    }

    fn auto_run_enabled(&self) -> bool {
        self.document.auto_run_enabled
    }

    fn set_auto_run_enabled(&mut self, enabled: bool) {
        self.document.auto_run_enabled = enabled;
    }

    fn save(&mut self) -> Result<()> {
        self.saves += 1;
        Ok(())
    }
}
