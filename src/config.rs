use std::time::Duration;

use crate::ida::IdaParams;

/// Default number of successors a peer tracks; equal to the default fragment
/// count so a key's whole replica set fits in one successor list.
pub const DEFAULT_NUM_SUCCS: usize = 14;

/// How often the maintenance task runs a full cycle.
pub const DEFAULT_STABILIZE_INTERVAL: Duration = Duration::from_secs(5);

/// Worker threads handling incoming requests per peer.
pub const DEFAULT_WORKER_THREADS: usize = 3;

#[derive(Debug, Clone)]
/// Per-peer configuration.
pub struct Config {
    /// Successor list capacity. 14 for DHash, 3 or more is enough for plain Chord.
    pub num_succs: usize,
    /// Pause between maintenance cycles.
    ///
    /// The longer this is, the longer the ring takes to repair after churn.
    /// The shorter it is, the more background traffic every peer generates.
    pub stabilize_interval: Duration,
    /// Size of the worker pool the server dispatches requests onto.
    pub worker_threads: usize,
    /// Dispersal parameters used by DHash peers. Adjustable at runtime
    /// before the first `create` via [crate::DhashPeer::set_ida_params].
    pub ida: IdaParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_succs: DEFAULT_NUM_SUCCS,
            stabilize_interval: DEFAULT_STABILIZE_INTERVAL,
            worker_threads: DEFAULT_WORKER_THREADS,
            ida: IdaParams::default(),
        }
    }
}

impl Config {
    /// Override the successor list capacity.
    pub fn with_num_succs(mut self, num_succs: usize) -> Self {
        self.num_succs = num_succs;
        self
    }

    /// Override the maintenance cadence.
    pub fn with_stabilize_interval(mut self, interval: Duration) -> Self {
        self.stabilize_interval = interval;
        self
    }

    /// Override the dispersal parameters.
    pub fn with_ida(mut self, ida: IdaParams) -> Self {
        self.ida = ida;
        self
    }
}
