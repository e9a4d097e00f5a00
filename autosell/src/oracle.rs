//! Price oracle: turns an asynchronous market notification into a price.
//!
//! A caller registers interest with [`PriceOracle::begin_request`], fires the
//! comparison action through the surface, and then either blocks on
//! [`PriceOracle::wait`] or polls [`PriceOracle::try_take`] from a scheduler
//! step. The notification side calls [`PriceOracle::on_offerings`] from
//! whatever thread the client delivers it on.
//!
//! There is exactly one outstanding request slot. Starting a new request
//! supersedes the previous one; the old waiter fails with
//! [`PriceError::Superseded`] immediately.
//!
//! A request retired before its notification arrived (superseded, abandoned,
//! timed out or cancelled) still owes one delivery. Untagged notifications are
//! dropped while such deliveries are owed, so a late answer for one item can
//! never price the next. Notifications tagged with an item id are matched
//! against the open request directly.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::budget::remaining;
use crate::core::pricing::{Listing, selling_price};
use crate::core::types::{ItemId, Price};

/// Market notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketOfferings {
    /// Identifier the client stamps on each notification. Repeats are ignored.
    pub request_id: u64,
    /// Item the listings belong to, when the client reports it.
    #[serde(default)]
    pub item_id: Option<ItemId>,
    pub listings: Vec<Listing>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    #[error("no price for item {item} within {waited_ms} ms")]
    Timeout { item: ItemId, waited_ms: u64 },
    #[error("market has no listings for item {item}")]
    NoListings { item: ItemId },
    #[error("price request for item {item} was superseded")]
    Superseded { item: ItemId },
    #[error("price request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotState {
    Waiting,
    Resolved(Result<Price, PriceError>),
}

#[derive(Debug)]
struct Slot {
    item: Option<ItemId>,
    generation: u64,
    state: SlotState,
    last_request_id: Option<u64>,
    shut_down: bool,
    waiters: usize,
    /// Deliveries still expected for requests retired before they resolved.
    stale_deliveries: u32,
}

impl Slot {
    fn is_waiting_for(&self, item: ItemId) -> bool {
        self.item == Some(item)
    }

    fn is_unresolved(&self) -> bool {
        self.item.is_some() && self.state == SlotState::Waiting
    }

    /// Count the open request's notification as owed before retiring it.
    fn retire_unresolved(&mut self) {
        if self.is_unresolved() {
            self.stale_deliveries += 1;
        }
    }

    fn take(&mut self) -> Option<Result<Price, PriceError>> {
        match &self.state {
            SlotState::Waiting => None,
            SlotState::Resolved(outcome) => {
                let outcome = outcome.clone();
                self.item = None;
                self.state = SlotState::Waiting;
                Some(outcome)
            }
        }
    }
}

#[derive(Debug)]
pub struct PriceOracle {
    slot: Mutex<Slot>,
    resolved: Condvar,
}

impl Default for PriceOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceOracle {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                item: None,
                generation: 0,
                state: SlotState::Waiting,
                last_request_id: None,
                shut_down: false,
                waiters: 0,
                stale_deliveries: 0,
            }),
            resolved: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open the slot for `item`, superseding any unresolved request.
    ///
    /// Returns the generation of the new request.
    pub fn begin_request(&self, item: ItemId) -> u64 {
        let mut slot = self.lock();
        let generation = Self::begin_locked(&mut slot, item);
        drop(slot);
        self.resolved.notify_all();
        generation
    }

    fn begin_locked(slot: &mut Slot, item: ItemId) -> u64 {
        if let Some(previous) = slot.item
            && slot.state == SlotState::Waiting
        {
            debug!(previous = %previous, next = %item, "superseding price request");
        }
        slot.retire_unresolved();
        slot.generation += 1;
        slot.item = Some(item);
        slot.state = SlotState::Waiting;
        debug!(item = %item, generation = slot.generation, "price request opened");
        slot.generation
    }

    /// Deliver a market notification.
    pub fn on_offerings(&self, offerings: &MarketOfferings) {
        let mut slot = self.lock();
        let request_id = offerings.request_id;
        if slot.last_request_id == Some(request_id) {
            debug!(request_id, "duplicate offerings ignored");
            return;
        }
        slot.last_request_id = Some(request_id);

        match offerings.item_id {
            Some(tagged) if !slot.is_unresolved() || slot.item != Some(tagged) => {
                slot.stale_deliveries = slot.stale_deliveries.saturating_sub(1);
                debug!(request_id, item = %tagged, "offerings for another request ignored");
                return;
            }
            Some(_) => {}
            None if slot.stale_deliveries > 0 => {
                slot.stale_deliveries -= 1;
                debug!(request_id, owed = slot.stale_deliveries, "offerings for a retired request dropped");
                return;
            }
            None => {}
        }

        let Some(item) = slot.item else {
            debug!(request_id, "offerings with no open request ignored");
            return;
        };
        if slot.state != SlotState::Waiting {
            debug!(item = %item, request_id, "request already resolved");
            return;
        }

        let outcome = match selling_price(&offerings.listings) {
            Some(price) => {
                info!(item = %item, price = price.value(), listings = offerings.listings.len(), "price resolved");
                Ok(price)
            }
            None => {
                info!(item = %item, "market has no listings");
                Err(PriceError::NoListings { item })
            }
        };
        slot.state = SlotState::Resolved(outcome);
        drop(slot);
        self.resolved.notify_all();
    }

    /// Block until the price for `item` is known, or `timeout` elapses.
    ///
    /// If no request for `item` is open, a fresh one is started first.
    /// The blocking budget is measured on the wall clock.
    pub fn wait(&self, item: ItemId, timeout: Duration) -> Result<Price, PriceError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        if !slot.is_waiting_for(item) {
            warn!(item = %item, "awaiting price with no open request; starting one");
            Self::begin_locked(&mut slot, item);
        }
        let generation = slot.generation;
        slot.waiters += 1;
        debug!(item = %item, waiters = slot.waiters, "waiting for price");

        let outcome = loop {
            if slot.shut_down {
                break Err(PriceError::Cancelled);
            }
            if slot.generation != generation {
                break Err(PriceError::Superseded { item });
            }
            if let Some(outcome) = slot.take() {
                break outcome;
            }
            let Some(left) = remaining(deadline, Instant::now()) else {
                slot.retire_unresolved();
                slot.item = None;
                warn!(item = %item, timeout_ms = timeout.as_millis() as u64, "price request timed out");
                break Err(PriceError::Timeout {
                    item,
                    waited_ms: timeout.as_millis() as u64,
                });
            };
            let (guard, _) = self
                .resolved
                .wait_timeout(slot, left)
                .unwrap_or_else(|e| e.into_inner());
            slot = guard;
        };
        slot.waiters -= 1;
        outcome
    }

    /// Non-blocking poll. `None` while the request for `item` is still open.
    pub fn try_take(&self, item: ItemId) -> Option<Result<Price, PriceError>> {
        let mut slot = self.lock();
        if slot.shut_down {
            return Some(Err(PriceError::Cancelled));
        }
        if !slot.is_waiting_for(item) {
            return Some(Err(PriceError::Superseded { item }));
        }
        slot.take()
    }

    /// Drop the open request for `item` so that late notifications are ignored.
    pub fn abandon(&self, item: ItemId) {
        let mut slot = self.lock();
        if slot.is_waiting_for(item) {
            debug!(item = %item, "price request abandoned");
            slot.retire_unresolved();
            slot.item = None;
            slot.state = SlotState::Waiting;
        }
    }

    /// Resolve any open request with [`PriceError::Cancelled`].
    pub fn cancel(&self) {
        let mut slot = self.lock();
        if slot.is_unresolved() {
            debug!(generation = slot.generation, "price request cancelled");
            slot.stale_deliveries += 1;
            slot.state = SlotState::Resolved(Err(PriceError::Cancelled));
        }
        drop(slot);
        self.resolved.notify_all();
    }

    /// Cancel and refuse every later wait.
    pub fn shutdown(&self) {
        let mut slot = self.lock();
        slot.shut_down = true;
        slot.item = None;
        drop(slot);
        self.resolved.notify_all();
    }

    /// Number of threads currently blocked in [`PriceOracle::wait`].
    #[cfg(test)]
    fn waiters(&self) -> usize {
        self.lock().waiters
    }

    /// Deliveries still owed by retired requests.
    pub fn stale_deliveries(&self) -> u32 {
        self.lock().stale_deliveries
    }

    pub fn pending_item(&self) -> Option<ItemId> {
        let slot = self.lock();
        match slot.state {
            SlotState::Waiting => slot.item,
            SlotState::Resolved(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn item(id: u32) -> ItemId {
        ItemId::new(id).expect("item id")
    }

    fn offerings(request_id: u64, prices: &[u32]) -> MarketOfferings {
        MarketOfferings {
            request_id,
            item_id: None,
            listings: prices
                .iter()
                .map(|&unit_price| Listing {
                    unit_price,
                    quantity: 1,
                })
                .collect(),
        }
    }

    #[test]
    fn resolves_waiter_on_another_thread() {
        let oracle = Arc::new(PriceOracle::new());
        oracle.begin_request(item(5));

        let waiter = {
            let oracle = oracle.clone();
            thread::spawn(move || oracle.wait(item(5), Duration::from_secs(5)))
        };
        while oracle.waiters() == 0 {
            thread::yield_now();
        }
        oracle.on_offerings(&offerings(1, &[100, 42, 99]));

        let price = waiter.join().expect("join").expect("price");
        assert_eq!(price.value(), 41);
    }

    #[test]
    fn empty_offerings_are_no_listings() {
        let oracle = PriceOracle::new();
        oracle.begin_request(item(7));
        oracle.on_offerings(&offerings(1, &[]));
        assert_eq!(
            oracle.wait(item(7), Duration::from_millis(10)),
            Err(PriceError::NoListings { item: item(7) })
        );
    }

    #[test]
    fn times_out_without_notification() {
        let oracle = PriceOracle::new();
        oracle.begin_request(item(7));
        let started = Instant::now();
        let outcome = oracle.wait(item(7), Duration::from_millis(50));
        assert!(matches!(outcome, Err(PriceError::Timeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(50));

        // A late notification after the timeout is dropped.
        oracle.on_offerings(&offerings(9, &[10]));
        assert_eq!(oracle.pending_item(), None);
    }

    #[test]
    fn duplicate_request_id_is_ignored() {
        let oracle = PriceOracle::new();
        oracle.begin_request(item(1));
        oracle.on_offerings(&offerings(3, &[50]));
        assert_eq!(oracle.try_take(item(1)), Some(Ok(Price::new(49).expect("price"))));

        oracle.begin_request(item(2));
        oracle.on_offerings(&offerings(3, &[10]));
        assert_eq!(oracle.try_take(item(2)), None);
        oracle.on_offerings(&offerings(4, &[10]));
        assert_eq!(oracle.try_take(item(2)), Some(Ok(Price::new(9).expect("price"))));
    }

    #[test]
    fn superseded_waiter_fails_fast() {
        let oracle = Arc::new(PriceOracle::new());
        oracle.begin_request(item(1));

        let waiter = {
            let oracle = oracle.clone();
            thread::spawn(move || oracle.wait(item(1), Duration::from_secs(30)))
        };
        while oracle.waiters() == 0 {
            thread::yield_now();
        }
        let started = Instant::now();
        oracle.begin_request(item(2));

        let outcome = waiter.join().expect("join");
        assert_eq!(outcome, Err(PriceError::Superseded { item: item(1) }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(oracle.pending_item(), Some(item(2)));
    }

    #[test]
    fn poll_reports_superseded_and_cancelled() {
        let oracle = PriceOracle::new();
        oracle.begin_request(item(1));
        assert_eq!(oracle.try_take(item(1)), None);
        assert_eq!(
            oracle.try_take(item(2)),
            Some(Err(PriceError::Superseded { item: item(2) }))
        );

        oracle.cancel();
        assert_eq!(oracle.try_take(item(1)), Some(Err(PriceError::Cancelled)));
    }

    #[test]
    fn one_notification_resolves_one_request() {
        let oracle = PriceOracle::new();
        oracle.begin_request(item(1));
        oracle.on_offerings(&offerings(1, &[20]));
        oracle.on_offerings(&offerings(2, &[5]));
        assert_eq!(oracle.try_take(item(1)), Some(Ok(Price::new(19).expect("price"))));
    }

    /// Verifies a late answer for an abandoned request never prices the next item.
    #[test]
    fn late_answer_for_abandoned_request_is_dropped() {
        let oracle = PriceOracle::new();
        oracle.begin_request(item(5));
        oracle.abandon(item(5));
        oracle.begin_request(item(6));
        assert_eq!(oracle.stale_deliveries(), 1);

        oracle.on_offerings(&offerings(1, &[10]));
        assert_eq!(oracle.try_take(item(6)), None);
        assert_eq!(oracle.stale_deliveries(), 0);

        oracle.on_offerings(&offerings(2, &[50_000]));
        assert_eq!(oracle.try_take(item(6)), Some(Ok(Price::new(49_999).expect("price"))));
    }

    #[test]
    fn superseded_and_timed_out_requests_owe_a_delivery() {
        let oracle = PriceOracle::new();
        oracle.begin_request(item(1));
        oracle.begin_request(item(2));
        assert_eq!(oracle.stale_deliveries(), 1);
        assert!(matches!(
            oracle.wait(item(2), Duration::from_millis(10)),
            Err(PriceError::Timeout { .. })
        ));
        assert_eq!(oracle.stale_deliveries(), 2);

        // Nothing is open, but both owed deliveries are still consumed.
        oracle.on_offerings(&offerings(1, &[10]));
        oracle.on_offerings(&offerings(2, &[10]));
        assert_eq!(oracle.stale_deliveries(), 0);
        oracle.begin_request(item(3));
        oracle.on_offerings(&offerings(3, &[30]));
        assert_eq!(oracle.try_take(item(3)), Some(Ok(Price::new(29).expect("price"))));
    }

    #[test]
    fn tagged_offerings_only_resolve_their_item() {
        let oracle = PriceOracle::new();
        oracle.begin_request(item(5));
        oracle.abandon(item(5));
        oracle.begin_request(item(6));

        let tagged = |request_id, id, price| MarketOfferings {
            item_id: Some(item(id)),
            ..offerings(request_id, &[price])
        };
        oracle.on_offerings(&tagged(1, 5, 10));
        assert_eq!(oracle.try_take(item(6)), None);
        assert_eq!(oracle.stale_deliveries(), 0);
        oracle.on_offerings(&tagged(2, 6, 80));
        assert_eq!(oracle.try_take(item(6)), Some(Ok(Price::new(79).expect("price"))));
    }

    #[test]
    fn shutdown_refuses_waits() {
        let oracle = PriceOracle::new();
        oracle.shutdown();
        assert_eq!(
            oracle.wait(item(1), Duration::from_secs(1)),
            Err(PriceError::Cancelled)
        );
    }
}
