//! `autosell` command line.
//!
//! Manages the sell lists and settings in a data directory and dry-runs the
//! automation against scripted client scenarios.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use autosell::core::sell_list::{SellListAggregate, SellListItem};
use autosell::core::types::{ItemId, Quantity, RetainerId, RetainerName};
use autosell::exit_codes;
use autosell::io::config::load_settings;
use autosell::io::init::{AutosellPaths, init_data_dir};
use autosell::io::run_log::{ItemStatus, RunOutcome, write_run_report};
use autosell::io::store::{JsonSellListStore, SellListRepository};
use autosell::logging;
use autosell::sim::{load_scenario, simulate};

#[derive(Parser)]
#[command(
    name = "autosell",
    version,
    about = "Keeps retainer sell lists listed on the market board"
)]
struct Cli {
    /// Data directory holding `autosell.toml` and `sell_lists.json`.
    #[arg(short, long, global = true, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write default settings and an empty sell-list store.
    Init,
    /// Check settings and sell lists.
    Validate,
    /// Print every sell list.
    Show {
        /// Print the raw store document as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Persist the auto-run flag.
    SetAutoRun {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Add an item to a retainer's sell list, or update its quantity.
    AddItem {
        #[arg(long)]
        retainer: u64,
        /// Required when the retainer has no sell list yet.
        #[arg(long)]
        retainer_name: Option<String>,
        #[arg(long)]
        item: u32,
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
    },
    /// Remove an item from a retainer's sell list.
    RemoveItem {
        #[arg(long)]
        retainer: u64,
        #[arg(long)]
        item: u32,
    },
    /// Dry-run a full auto-run against a scripted client scenario.
    Simulate {
        scenario: PathBuf,
        #[arg(long, default_value_t = 200_000)]
        max_frames: u64,
        /// Write the run report under `<dir>/runs/`.
        #[arg(long)]
        write_report: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = AutosellPaths::new(&cli.dir);
    match cli.command {
        Command::Init => {
            init_data_dir(&paths.root)?;
            println!("initialized {}", paths.root.display());
            Ok(exit_codes::OK)
        }
        Command::Validate => cmd_validate(&paths),
        Command::Show { json } => cmd_show(&paths, json),
        Command::SetAutoRun { enabled } => {
            let mut store = JsonSellListStore::open(&paths.store_path)?;
            store.set_auto_run_enabled(enabled);
            store.save()?;
            println!("auto-run {}", if enabled { "enabled" } else { "disabled" });
            Ok(exit_codes::OK)
        }
        Command::AddItem {
            retainer,
            retainer_name,
            item,
            name,
            quantity,
        } => cmd_add_item(&paths, retainer, retainer_name, item, name, quantity),
        Command::RemoveItem { retainer, item } => cmd_remove_item(&paths, retainer, item),
        Command::Simulate {
            scenario,
            max_frames,
            write_report,
        } => cmd_simulate(&paths, &scenario, max_frames, write_report),
    }
}

fn cmd_validate(paths: &AutosellPaths) -> Result<i32> {
    load_settings(&paths.config_path).context("load autosell.toml")?;
    let store = JsonSellListStore::open(&paths.store_path).context("load sell_lists.json")?;
    let lists = store.load_all_sell_lists()?;
    println!(
        "ok: {} sell lists, {} items",
        lists.len(),
        lists.iter().map(SellListAggregate::len).sum::<usize>()
    );
    Ok(exit_codes::OK)
}

fn cmd_show(paths: &AutosellPaths, json: bool) -> Result<i32> {
    let store = JsonSellListStore::open(&paths.store_path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(store.document())?);
        return Ok(exit_codes::OK);
    }
    println!(
        "auto-run: {}",
        if store.auto_run_enabled() { "on" } else { "off" }
    );
    for list in store.load_all_sell_lists()? {
        println!(
            "{} ({}) {}/{}",
            list.retainer_name(),
            list.retainer_id(),
            list.len(),
            SellListAggregate::MAX_ITEMS
        );
        for item in list.items() {
            println!(
                "  {:>8}  {:<32} x{}",
                item.item_id.value(),
                item.item_name,
                item.quantity_to_maintain
            );
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_add_item(
    paths: &AutosellPaths,
    retainer: u64,
    retainer_name: Option<String>,
    item: u32,
    name: String,
    quantity: u32,
) -> Result<i32> {
    let mut store = JsonSellListStore::open(&paths.store_path)?;
    let retainer_id = RetainerId::new(retainer)?;
    let mut list = match store.get_sell_list(retainer_id)? {
        Some(list) => list,
        None => {
            let name = retainer_name.ok_or_else(|| {
                anyhow!("retainer {retainer} has no sell list yet; pass --retainer-name")
            })?;
            SellListAggregate::new(retainer_id, RetainerName::new(name)?)
        }
    };
    let item_id = ItemId::new(item)?;
    let quantity = Quantity::new(quantity)?;
    if list.contains_item(item_id) {
        list.update_quantity(item_id, quantity)?;
    } else {
        list.add_item(SellListItem::new(item_id, name, quantity)?)?;
    }
    store.save_sell_list(&list)?;
    store.save()?;
    println!(
        "{}: {}/{} items",
        list.retainer_name(),
        list.len(),
        SellListAggregate::MAX_ITEMS
    );
    Ok(exit_codes::OK)
}

fn cmd_remove_item(paths: &AutosellPaths, retainer: u64, item: u32) -> Result<i32> {
    let mut store = JsonSellListStore::open(&paths.store_path)?;
    let retainer_id = RetainerId::new(retainer)?;
    let mut list = store
        .get_sell_list(retainer_id)?
        .ok_or_else(|| anyhow!("retainer {retainer} has no sell list"))?;
    let removed = list.remove_item(ItemId::new(item)?)?;
    store.save_sell_list(&list)?;
    store.save()?;
    println!("removed {} from {}", removed.item_name, list.retainer_name());
    Ok(exit_codes::OK)
}

fn cmd_simulate(
    paths: &AutosellPaths,
    scenario_path: &Path,
    max_frames: u64,
    write_report: bool,
) -> Result<i32> {
    let settings = load_settings(&paths.config_path)?;
    let lists = JsonSellListStore::open(&paths.store_path)?.load_all_sell_lists()?;
    let scenario = load_scenario(scenario_path)?;

    let simulation = simulate(scenario, settings, &lists, max_frames)?;
    let report = &simulation.report;
    for retainer in &report.retainers {
        println!("{} ({})", retainer.retainer_name, retainer.retainer_id);
        for item in &retainer.items {
            let status = match &item.status {
                ItemStatus::NotReached => "not reached".to_string(),
                ItemStatus::AlreadyListed => "already listed".to_string(),
                ItemStatus::Missing => "not in inventory".to_string(),
                ItemStatus::Listed { price } => format!("listed at {price}"),
                ItemStatus::Cancelled { reason } => format!("cancelled: {reason}"),
            };
            println!("  {:<32} {status}", item.item_name);
        }
    }
    println!(
        "{:?} after {} frames, {} listed",
        report.outcome,
        simulation.frames,
        report.listed_count()
    );
    if write_report {
        let path = write_run_report(&paths.runs_dir, report)?;
        println!("report: {}", path.display());
    }

    Ok(match report.outcome {
        RunOutcome::Succeeded => exit_codes::OK,
        RunOutcome::Failed(_) | RunOutcome::Aborted => exit_codes::RUN_FAILED,
    })
}
