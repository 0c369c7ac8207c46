//! # Lumen Core
//!
//! Layered image acquisition for UI hosts: a volatile in-memory tier, a
//! content-addressed on-disk tier and a network tier that coalesces
//! concurrent requests for the same URL into one transfer.
//!
//! ## Overview
//!
//! - **Content addressing**: [`address`] maps a [`ResourceId`] to a stable
//!   SHA-256 hex key used as the file name on disk.
//! - **Persistent cache**: [`DiskCache`] reads synchronously and writes
//!   atomically from a dedicated writer task.
//! - **Volatile cache**: [`MemoryCache`], best-effort, may be emptied at any
//!   time.
//! - **Deduplicating fetcher**: [`Fetcher`] keeps at most one transfer per id
//!   and fans the classified result out to every waiter.
//! - **Orchestrator**: [`ImageLoader`] ties the tiers together behind
//!   `load` / `cancel` / `clear_all`.
//!
//! Results are never invoked on the caller directly; they go through a
//! [`CallbackDispatcher`], typically a [`CallbackQueue`] drained on the
//! host's UI thread.
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_core::{CallbackQueue, ImageLoader, LoaderOptions, ResourceId};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (queue, mut pump) = CallbackQueue::new();
//! let loader = ImageLoader::new(
//!     LoaderOptions::new("/tmp/ImageCache".into()),
//!     Arc::new(queue),
//! )?;
//!
//! let id = ResourceId::parse("https://picsum.photos/id/1015/800/600")?;
//! loader.load(id.clone(), |result| match result {
//!     Ok(image) => println!("{}x{}", image.width(), image.height()),
//!     Err(err) => eprintln!("placeholder: {err}"),
//! });
//!
//! // On the UI loop:
//! pump.next().await;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod bitmap;
pub mod disk_cache;
pub mod dispatch;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod memory_cache;
pub mod resource;
pub mod stats;
pub mod transport;

pub use address::{ContentAddress, address};
pub use bitmap::{CachedImage, EncodedBlob};
pub use disk_cache::DiskCache;
pub use dispatch::{
    Callback, CallbackDispatcher, CallbackPump, CallbackQueue, InlineDispatcher,
};
pub use error::{FetchError, FetchResult, LumenError, Result};
pub use fetcher::{Fetcher, Waiter, classify};
pub use loader::{ImageLoader, LoaderOptions};
pub use memory_cache::MemoryCache;
pub use resource::{ResourceId, resource_ids_from_strings};
pub use stats::{FetcherStatsSnapshot, LoaderStatsSnapshot};
pub use transport::{
    HttpSettings, HttpTransport, RawResponse, Transport, TransportError,
};
