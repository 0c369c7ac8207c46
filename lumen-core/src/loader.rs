use std::{
    fmt,
    path::PathBuf,
    sync::{Arc, Weak},
};

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::{
    bitmap::CachedImage,
    disk_cache::DiskCache,
    dispatch::CallbackDispatcher,
    error::{FetchError, FetchResult, Result},
    fetcher::Fetcher,
    memory_cache::MemoryCache,
    resource::ResourceId,
    stats::{LoaderStats, LoaderStatsSnapshot},
    transport::{HttpSettings, HttpTransport, Transport},
};

/// Everything [`ImageLoader::new`] needs.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Directory holding `<sha256>.png` entries.
    pub cache_dir: PathBuf,
    /// Settings for the default HTTP transport.
    pub http: HttpSettings,
}

impl LoaderOptions {
    /// Default HTTP settings with the given cache directory.
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            http: HttpSettings::default(),
        }
    }
}

struct LoaderInner {
    memory: MemoryCache,
    disk: DiskCache,
    fetcher: Fetcher,
    dispatcher: Arc<dyn CallbackDispatcher>,
    stats: LoaderStats,
}

/// Single entry point over the three tiers: memory, then disk, then network.
///
/// Every result, cache hit or not, is delivered through the dispatcher given
/// at construction. Network successes are written through to memory and disk
/// before the caller's callback runs.
#[derive(Clone)]
pub struct ImageLoader {
    inner: Arc<LoaderInner>,
}

impl fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageLoader")
            .field("memory_entries", &self.inner.memory.len())
            .field("disk", &self.inner.disk)
            .field("fetcher", &self.inner.fetcher)
            .finish()
    }
}

impl ImageLoader {
    /// Build a loader backed by a real HTTP client. Must be called inside a
    /// Tokio runtime.
    pub fn new(
        options: LoaderOptions,
        dispatcher: Arc<dyn CallbackDispatcher>,
    ) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&options.http)?);
        Self::with_transport(options.cache_dir, transport, dispatcher)
    }

    /// Build with a custom transport, used by tests and embedded hosts.
    pub fn with_transport(
        cache_dir: PathBuf,
        transport: Arc<dyn Transport>,
        dispatcher: Arc<dyn CallbackDispatcher>,
    ) -> Result<Self> {
        let disk = DiskCache::new(cache_dir)?;
        let fetcher = Fetcher::new(transport, Arc::clone(&dispatcher))?;
        Ok(Self {
            inner: Arc::new(LoaderInner {
                memory: MemoryCache::new(),
                disk,
                fetcher,
                dispatcher,
                stats: LoaderStats::default(),
            }),
        })
    }

    /// Resolve `id` through memory, disk, then network.
    ///
    /// `on_complete` runs once through the dispatcher, unless the network
    /// transfer is cancelled first.
    pub fn load<F>(&self, id: ResourceId, on_complete: F)
    where
        F: FnOnce(FetchResult) + Send + 'static,
    {
        let inner = &self.inner;

        if let Some(image) = inner.memory.get(&id) {
            inner.stats.on_memory_hit();
            debug!(%id, "image served from memory");
            inner.deliver(on_complete, Ok(image));
            return;
        }

        if let Some(image) = inner.disk.load_image(&id) {
            inner.memory.put(image.clone(), id.clone());
            inner.stats.on_disk_hit();
            debug!(%id, "image served from disk");
            inner.deliver(on_complete, Ok(image));
            return;
        }

        inner.stats.on_network_request();
        // The waiter lives in the fetcher's pending table, which the loader
        // owns; a strong handle here would keep both alive.
        let populate: Weak<LoaderInner> = Arc::downgrade(inner);
        let key = id.clone();
        inner.fetcher.fetch(id, move |result| {
            if let (Ok(image), Some(inner)) = (&result, populate.upgrade()) {
                inner.write_through(key, image);
            }
            on_complete(result);
        });
    }

    /// Like [`ImageLoader::load`] for raw input; malformed strings resolve to
    /// [`FetchError::InvalidResourceId`] without touching any tier.
    pub fn load_url<F>(&self, raw: &str, on_complete: F)
    where
        F: FnOnce(FetchResult) + Send + 'static,
    {
        match ResourceId::parse(raw) {
            Ok(id) => self.load(id, on_complete),
            Err(err) => {
                self.inner.stats.on_rejected_id();
                debug!(raw, %err, "rejected image url");
                self.inner.deliver(on_complete, Err(err));
            }
        }
    }

    /// Future-based adapter over [`ImageLoader::load`].
    ///
    /// Resolves once the dispatcher runs the completion, so with a
    /// [`crate::CallbackQueue`] the pump has to be driven concurrently.
    /// A cancelled request resolves to [`FetchError::Cancelled`].
    pub async fn load_async(&self, id: ResourceId) -> FetchResult {
        let (tx, rx) = oneshot::channel();
        self.load(id, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(FetchError::Cancelled))
    }

    /// Only network transfers can be cancelled; cache hits complete in
    /// bounded local time. Returns whether an in-flight transfer was dropped,
    /// in which case its callbacks will never run.
    pub fn cancel(&self, id: &ResourceId) -> bool {
        self.inner.fetcher.cancel(id)
    }

    /// Empty memory now and queue a disk wipe.
    pub fn clear_all(&self) {
        let dropped = self.inner.memory.len();
        self.inner.memory.clear();
        self.inner.disk.clear();
        info!(memory_entries = dropped, "cleared image caches");
    }

    /// Wait for queued disk writes and clears to land.
    pub async fn flush_disk(&self) {
        self.inner.disk.flush().await;
    }

    /// The memory tier.
    pub fn memory(&self) -> &MemoryCache {
        &self.inner.memory
    }

    /// The disk tier.
    pub fn disk(&self) -> &DiskCache {
        &self.inner.disk
    }

    /// The network tier.
    pub fn fetcher(&self) -> &Fetcher {
        &self.inner.fetcher
    }

    /// Tier counters, fetcher included.
    pub fn stats(&self) -> LoaderStatsSnapshot {
        self.inner.stats.snapshot(self.inner.fetcher.stats())
    }
}

impl LoaderInner {
    fn deliver<F>(&self, on_complete: F, result: FetchResult)
    where
        F: FnOnce(FetchResult) + Send + 'static,
    {
        self.dispatcher.dispatch(Box::new(move || on_complete(result)));
    }

    /// Every waiter of a coalesced transfer passes through here; only the
    /// first one to reach memory also queues the disk write.
    fn write_through(&self, id: ResourceId, image: &CachedImage) {
        if self.memory.insert_if_absent(image.clone(), id.clone()) {
            self.disk.save_image(image.clone(), &id);
        }
    }
}
