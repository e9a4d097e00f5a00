//! Retainer market-listing automation.
//!
//! Keeps each retainer's sell list stocked on the market by driving the game
//! client's UI one small step per frame. The layers:
//!
//! - **[`core`]**: Pure logic (value objects, undercut pricing, sell lists).
//! - **[`io`]**: Side effects (the client surface, clock, settings, store, reports).
//!
//! [`scheduler`] runs steps frame by frame, [`oracle`] turns market
//! notifications into prices, [`pipeline`] and [`controller`] plan the steps
//! for one item and for a whole run, and [`host`] is what a frame loop embeds.
//! [`sim`] plays a scripted client for dry runs.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod host;
pub mod io;
pub mod logging;
pub mod oracle;
pub mod pipeline;
pub mod run_state;
pub mod scheduler;
pub mod sim;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
