//! Background tree rebuilds.
//!
//! Rebuilding the backing collection (sort plus catalog computation) is
//! the one expensive operation here, so it runs on a worker thread. A
//! running rebuild is never cancelled: triggers arriving while one is in
//! flight coalesce into exactly one follow-up rebuild using the latest
//! requested inputs, however many triggers arrived.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::bug_set::BugSet;
use crate::matcher::FilterSet;
use crate::model::RecordRef;
use crate::sorter::SortOrder;

/// Everything a rebuild needs, captured at trigger time.
pub struct RebuildRequest {
    pub records: Vec<RecordRef>,
    pub filters: Arc<RwLock<FilterSet>>,
    pub order: SortOrder,
}

/// A finished rebuild, ready to be swapped into the tree model.
pub struct RebuildOutcome {
    pub root: Arc<BugSet>,
    pub order: SortOrder,
}

/// The coalescing rule, separated from the threading so it can be tested
/// as a plain value. At most one rebuild runs and at most one is queued.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoalesceState {
    in_flight: bool,
    pending: bool,
}

impl CoalesceState {
    /// A trigger arrived. True means start a rebuild now; false means one
    /// is running and this trigger folded into the pending follow-up.
    pub fn on_trigger(&mut self) -> bool {
        if self.in_flight {
            self.pending = true;
            false
        } else {
            self.in_flight = true;
            true
        }
    }

    /// A rebuild finished. True means a follow-up must start immediately
    /// (and is counted as in flight); false means we are idle.
    pub fn on_complete(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            true
        } else {
            self.in_flight = false;
            false
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}

pub struct RebuildCoordinator {
    requests: Sender<RebuildRequest>,
    outcomes: Receiver<RebuildOutcome>,
    state: CoalesceState,
    /// Latest inputs seen while a rebuild was in flight; dispatched as the
    /// single follow-up once the running rebuild completes.
    deferred: Option<RebuildRequest>,
    worker: Option<JoinHandle<()>>,
}

impl RebuildCoordinator {
    pub fn new() -> RebuildCoordinator {
        let (request_tx, request_rx) = mpsc::channel::<RebuildRequest>();
        let (outcome_tx, outcome_rx) = mpsc::channel::<RebuildOutcome>();
        let worker = std::thread::Builder::new()
            .name("tree-rebuild".to_string())
            .spawn(move || worker_loop(request_rx, outcome_tx))
            .expect("spawning rebuild worker");
        RebuildCoordinator {
            requests: request_tx,
            outcomes: outcome_rx,
            state: CoalesceState::default(),
            deferred: None,
            worker: Some(worker),
        }
    }

    pub fn is_rebuilding(&self) -> bool {
        self.state.is_in_flight()
    }

    /// Requests a rebuild. Starts one immediately when idle; otherwise the
    /// request replaces any earlier deferred one.
    pub fn trigger(&mut self, request: RebuildRequest) {
        if self.state.on_trigger() {
            self.dispatch(request);
        } else {
            debug!("rebuild in flight, coalescing trigger");
            self.deferred = Some(request);
        }
    }

    /// Non-blocking poll for a finished rebuild, dispatching the deferred
    /// follow-up if one accumulated.
    pub fn try_outcome(&mut self) -> Option<RebuildOutcome> {
        let outcome = self.outcomes.try_recv().ok()?;
        self.finish();
        Some(outcome)
    }

    /// Blocking variant of `try_outcome` with a timeout.
    pub fn wait_outcome(&mut self, timeout: Duration) -> Option<RebuildOutcome> {
        let outcome = self.outcomes.recv_timeout(timeout).ok()?;
        self.finish();
        Some(outcome)
    }

    fn finish(&mut self) {
        if self.state.on_complete() {
            match self.deferred.take() {
                Some(request) => self.dispatch(request),
                None => {
                    // Pending without stored inputs cannot happen through
                    // trigger(); recover to idle rather than wedging.
                    error!("pending rebuild had no request");
                    self.state = CoalesceState::default();
                }
            }
        }
    }

    fn dispatch(&mut self, request: RebuildRequest) {
        if self.requests.send(request).is_err() {
            error!("rebuild worker is gone");
            self.state = CoalesceState::default();
        }
    }
}

impl Default for RebuildCoordinator {
    fn default() -> Self {
        RebuildCoordinator::new()
    }
}

impl Drop for RebuildCoordinator {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        let (closed, _) = mpsc::channel();
        self.requests = closed;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(requests: Receiver<RebuildRequest>, outcomes: Sender<RebuildOutcome>) {
    while let Ok(request) = requests.recv() {
        let records = request.records.len();
        let root = BugSet::new(request.records, request.filters, request.order.order());
        info!(records, "tree rebuild complete");
        if outcomes.send(RebuildOutcome { root, order: request.order }).is_err() {
            return;
        }
    }
}
