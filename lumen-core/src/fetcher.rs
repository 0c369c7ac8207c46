//! Coalescing network tier.
//!
//! At most one transfer per [`ResourceId`] is in flight. Later requests for
//! the same id join the waiter list of the running transfer, and every waiter
//! receives the same classified result exactly once. The pending table is the
//! only shared mutable state; it sits behind one mutex that is never held
//! while a callback runs.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::FutureExt;
use tokio::{runtime::Handle, task::AbortHandle};
use tracing::{debug, trace, warn};

use crate::{
    bitmap::CachedImage,
    dispatch::CallbackDispatcher,
    error::{FetchError, FetchResult, LumenError, Result},
    resource::ResourceId,
    stats::{FetcherStats, FetcherStatsSnapshot},
    transport::{RawResponse, Transport, TransportError},
};

/// Completion callback registered with [`Fetcher::fetch`].
pub type Waiter = Box<dyn FnOnce(FetchResult) + Send + 'static>;

struct PendingRequest {
    /// Distinguishes this transfer from a later one for the same id, so a
    /// transfer that lost a race with `cancel` can never complete its
    /// successor's waiters.
    generation: u64,
    transfer: Option<AbortHandle>,
    waiters: Vec<Waiter>,
}

struct FetcherInner {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<dyn CallbackDispatcher>,
    runtime: Handle,
    pending: Mutex<HashMap<ResourceId, PendingRequest>>,
    next_generation: AtomicU64,
    stats: FetcherStats,
}

/// Network tier that runs at most one transfer per [`ResourceId`].
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<FetcherInner>,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("transport", &self.inner.transport)
            .field("dispatcher", &self.inner.dispatcher)
            .field("pending", &self.pending_count())
            .field("stats", &self.inner.stats.snapshot())
            .finish()
    }
}

impl Fetcher {
    /// Transfers are spawned on the Tokio runtime current at construction.
    pub fn new(
        transport: Arc<dyn Transport>,
        dispatcher: Arc<dyn CallbackDispatcher>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| LumenError::NoRuntime)?;
        Ok(Self {
            inner: Arc::new(FetcherInner {
                transport,
                dispatcher,
                runtime,
                pending: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                stats: FetcherStats::default(),
            }),
        })
    }

    /// Register `on_complete` for `id`, starting a transfer only if none is
    /// already running. Never blocks on I/O.
    pub fn fetch<F>(&self, id: ResourceId, on_complete: F)
    where
        F: FnOnce(FetchResult) + Send + 'static,
    {
        let generation = {
            let mut pending = self.inner.lock_pending();

            if let Some(request) = pending.get_mut(&id) {
                request.waiters.push(Box::new(on_complete));
                self.inner.stats.on_coalesced();
                debug!(
                    %id,
                    waiters = request.waiters.len(),
                    "joined in-flight image transfer"
                );
                return;
            }

            let generation =
                self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            pending.insert(
                id.clone(),
                PendingRequest {
                    generation,
                    transfer: None,
                    waiters: vec![Box::new(on_complete)],
                },
            );
            generation
        };

        self.inner.stats.on_transfer_started();
        debug!(%id, generation, "starting image transfer");

        // Spawned outside the lock: a runtime that is shutting down drops the
        // task right away, and that drop completes the entry.
        let task = self.inner.runtime.spawn(FetcherInner::run_transfer(
            Arc::clone(&self.inner),
            id.clone(),
            generation,
        ));

        let mut pending = self.inner.lock_pending();
        match pending.get_mut(&id) {
            Some(request) if request.generation == generation => {
                request.transfer = Some(task.abort_handle());
            }
            // Cancelled or already finished in the meantime.
            _ => task.abort(),
        }
    }

    /// Abort the transfer for `id` and drop its waiters without calling them.
    ///
    /// Returns `true` when an in-flight request was dropped. Unknown or
    /// already finished ids are a no-op and return `false`; waiters of a
    /// transfer that already finished still receive its result.
    pub fn cancel(&self, id: &ResourceId) -> bool {
        let removed = self.inner.lock_pending().remove(id);

        let Some(request) = removed else {
            trace!(%id, "cancel for idle id ignored");
            return false;
        };
        if let Some(transfer) = request.transfer {
            transfer.abort();
        }
        self.inner.stats.on_cancelled();
        debug!(
            %id,
            dropped_waiters = request.waiters.len(),
            "cancelled image transfer"
        );
        true
    }

    /// Whether a transfer for `id` is in flight.
    pub fn is_pending(&self, id: &ResourceId) -> bool {
        self.inner.lock_pending().contains_key(id)
    }

    /// Number of ids with a transfer in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// Point-in-time copy of the transfer counters.
    pub fn stats(&self) -> FetcherStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

/// Completes the pending entry with an error if the transfer task is dropped
/// before it produced a result (runtime shutdown, abort).
struct TransferGuard {
    inner: Arc<FetcherInner>,
    id: ResourceId,
    generation: u64,
    armed: bool,
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        // An aborted transfer was already removed by `cancel`.
        if self.armed && self.inner.owns(&self.id, self.generation) {
            self.inner.complete(
                &self.id,
                self.generation,
                Err(FetchError::Network(
                    "transfer task ended before completing".into(),
                )),
            );
        }
    }
}

impl FetcherInner {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<ResourceId, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn owns(&self, id: &ResourceId, generation: u64) -> bool {
        self.lock_pending()
            .get(id)
            .is_some_and(|request| request.generation == generation)
    }

    /// The guard is created before the first poll so a task that never runs
    /// still resolves its waiters.
    fn run_transfer(
        self: Arc<Self>,
        id: ResourceId,
        generation: u64,
    ) -> impl Future<Output = ()> + Send + 'static {
        let mut guard = TransferGuard {
            inner: Arc::clone(&self),
            id: id.clone(),
            generation,
            armed: true,
        };

        async move {
            // Capture the whole guard, not just `guard.armed` (edition 2021
            // disjoint capture), so it lives as long as the task.
            let _ = &guard;
            let outcome = match AssertUnwindSafe(self.transport.get(&id))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(%id, %message, "image transport panicked");
                    Err(TransportError(format!("transport panicked: {message}")))
                }
            };

            let result =
                match tokio::task::spawn_blocking(move || classify(outcome)).await {
                    Ok(result) => result,
                    Err(e) => Err(FetchError::InvalidImageData(format!(
                        "decode task failed: {e}"
                    ))),
                };

            guard.armed = false;
            self.complete(&id, generation, result);
        }
    }

    fn complete(&self, id: &ResourceId, generation: u64, result: FetchResult) {
        let waiters = {
            let mut pending = self.lock_pending();
            match pending.get(id) {
                Some(request) if request.generation == generation => pending
                    .remove(id)
                    .map(|request| request.waiters)
                    .unwrap_or_default(),
                _ => {
                    self.stats.on_discarded();
                    debug!(%id, generation, "transfer outcome has no waiters; discarding");
                    return;
                }
            }
        };

        self.stats.on_finished(result.is_ok());
        match &result {
            Ok(image) => debug!(
                %id,
                waiters = waiters.len(),
                width = image.width(),
                height = image.height(),
                "image transfer succeeded"
            ),
            Err(err) => debug!(%id, waiters = waiters.len(), %err, "image transfer failed"),
        }

        for waiter in waiters {
            let result = result.clone();
            self.dispatcher.dispatch(Box::new(move || waiter(result)));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}

/// Map a raw transfer outcome to exactly one terminal result.
pub fn classify(
    outcome: std::result::Result<RawResponse, TransportError>,
) -> FetchResult {
    let response = outcome.map_err(|e| FetchError::Network(e.0))?;

    if !(200..=299).contains(&response.status) {
        return Err(FetchError::HttpStatus(response.status));
    }

    let Some(body) = response.body else {
        return Err(FetchError::NoData);
    };

    if body.is_empty() {
        return Err(FetchError::EmptyPayload);
    }

    CachedImage::decode(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bitmap::test_support::gradient, dispatch::InlineDispatcher};

    fn png_bytes() -> Vec<u8> {
        gradient(4, 4).encode_png().unwrap().into_bytes()
    }

    fn ok(status: u16, body: Option<Vec<u8>>) -> std::result::Result<RawResponse, TransportError> {
        Ok(RawResponse { status, body })
    }

    #[test]
    fn classify_covers_every_terminal_result() {
        assert_eq!(
            classify(Err(TransportError("connection reset".into()))).unwrap_err(),
            FetchError::Network("connection reset".into())
        );
        assert_eq!(
            classify(ok(404, Some(png_bytes()))).unwrap_err(),
            FetchError::HttpStatus(404)
        );
        assert_eq!(
            classify(ok(302, None)).unwrap_err(),
            FetchError::HttpStatus(302)
        );
        assert_eq!(classify(ok(200, None)).unwrap_err(), FetchError::NoData);
        assert_eq!(
            classify(ok(200, Some(Vec::new()))).unwrap_err(),
            FetchError::EmptyPayload
        );
        assert!(matches!(
            classify(ok(200, Some(b"<html>nope</html>".to_vec()))),
            Err(FetchError::InvalidImageData(_))
        ));

        let image = classify(ok(299, Some(png_bytes()))).unwrap();
        assert_eq!((image.width(), image.height()), (4, 4));
    }

    #[derive(Debug)]
    struct Unreachable;

    #[async_trait::async_trait]
    impl Transport for Unreachable {
        async fn get(
            &self,
            _id: &ResourceId,
        ) -> std::result::Result<RawResponse, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_clears_table() {
        let fetcher = Fetcher::new(Arc::new(Unreachable), Arc::new(InlineDispatcher)).unwrap();
        let id = ResourceId::parse("https://example.com/a.png").unwrap();

        assert!(!fetcher.cancel(&id));
        fetcher.fetch(id.clone(), |_| panic!("cancelled waiter must not run"));
        fetcher.fetch(id.clone(), |_| panic!("cancelled waiter must not run"));
        assert!(fetcher.is_pending(&id));
        assert_eq!(fetcher.stats().transfers_started, 1);
        assert_eq!(fetcher.stats().coalesced_waiters, 1);

        assert!(fetcher.cancel(&id));
        assert!(!fetcher.cancel(&id));
        assert!(!fetcher.is_pending(&id));
        assert_eq!(fetcher.pending_count(), 0);
        assert_eq!(fetcher.stats().cancelled, 1);
        assert_eq!(fetcher.stats().discarded_outcomes, 0);
    }

    #[test]
    fn runtime_shutdown_resolves_waiters() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let fetcher = {
            let _guard = runtime.enter();
            Fetcher::new(Arc::new(Unreachable), Arc::new(InlineDispatcher)).unwrap()
        };
        let id = ResourceId::parse("https://example.com/a.png").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            fetcher.fetch(id.clone(), move |result| seen.lock().unwrap().push(result));
        }
        assert!(fetcher.is_pending(&id));

        drop(runtime);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen
            .iter()
            .all(|r| matches!(r, Err(FetchError::Network(msg)) if msg.contains("before completing"))));
        assert!(!fetcher.is_pending(&id));

        // The runtime is gone; a new request is resolved at once.
        let late = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&late);
        fetcher.fetch(id.clone(), move |result| *slot.lock().unwrap() = Some(result));
        assert!(matches!(*late.lock().unwrap(), Some(Err(FetchError::Network(_)))));
        assert!(!fetcher.is_pending(&id));
    }

    #[test]
    fn requires_runtime() {
        let err = Fetcher::new(Arc::new(Unreachable), Arc::new(InlineDispatcher)).unwrap_err();
        assert!(matches!(err, LumenError::NoRuntime));
    }
}
