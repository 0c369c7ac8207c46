use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of [`FetcherStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetcherStatsSnapshot {
    /// Transfers actually spawned.
    pub transfers_started: u64,
    /// Requests that joined a transfer already in flight.
    pub coalesced_waiters: u64,
    /// In-flight requests dropped by `cancel`.
    pub cancelled: u64,
    /// Transfers that finished after their entry was cancelled or replaced.
    pub discarded_outcomes: u64,
    /// Transfers that ended in a decoded image.
    pub succeeded: u64,
    /// Transfers that ended in an error.
    pub failed: u64,
}

/// Relaxed counters updated by the fetcher.
#[derive(Debug, Default)]
pub struct FetcherStats {
    transfers_started: AtomicU64,
    coalesced_waiters: AtomicU64,
    cancelled: AtomicU64,
    discarded_outcomes: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl FetcherStats {
    /// A new transfer was spawned.
    pub fn on_transfer_started(&self) {
        self.transfers_started.fetch_add(1, Ordering::Relaxed);
    }

    /// A request joined a running transfer.
    pub fn on_coalesced(&self) {
        self.coalesced_waiters.fetch_add(1, Ordering::Relaxed);
    }

    /// An in-flight request was dropped.
    pub fn on_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// A finished transfer had no entry left to complete.
    pub fn on_discarded(&self) {
        self.discarded_outcomes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one terminal result.
    pub fn on_finished(&self, ok: bool) {
        if ok {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> FetcherStatsSnapshot {
        FetcherStatsSnapshot {
            transfers_started: self.transfers_started.load(Ordering::Relaxed),
            coalesced_waiters: self
                .coalesced_waiters
                .load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            discarded_outcomes: self
                .discarded_outcomes
                .load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Per-tier counters, with the fetcher's nested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStatsSnapshot {
    /// Loads answered by the memory tier.
    pub memory_hits: u64,
    /// Loads answered by the disk tier.
    pub disk_hits: u64,
    /// Loads handed to the fetcher.
    pub network_requests: u64,
    /// Raw URLs that failed validation.
    pub rejected_ids: u64,
    /// Fetcher counters at the same moment.
    pub fetcher: FetcherStatsSnapshot,
}

/// Relaxed counters updated by the loader.
#[derive(Debug, Default)]
pub struct LoaderStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    network_requests: AtomicU64,
    rejected_ids: AtomicU64,
}

impl LoaderStats {
    /// Served from memory.
    pub fn on_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Served from disk.
    pub fn on_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Sent to the network tier.
    pub fn on_network_request(&self) {
        self.network_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Rejected before any I/O.
    pub fn on_rejected_id(&self) {
        self.rejected_ids.fetch_add(1, Ordering::Relaxed);
    }

    /// Combine with a fetcher snapshot.
    pub fn snapshot(&self, fetcher: FetcherStatsSnapshot) -> LoaderStatsSnapshot {
        LoaderStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            network_requests: self.network_requests.load(Ordering::Relaxed),
            rejected_ids: self.rejected_ids.load(Ordering::Relaxed),
            fetcher,
        }
    }
}
