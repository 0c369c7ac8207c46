use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use lumen_config::{Config, read_url_list};
use lumen_core::{
    CallbackQueue, FetchError, FetchResult, ImageLoader, InlineDispatcher,
    ResourceId, address, resource_ids_from_strings,
};
use tracing::{info, warn};

/// Terminal state of one requested id, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Decoded image dimensions.
    Loaded {
        /// Pixels.
        width: u32,
        /// Pixels.
        height: u32,
    },
    /// Terminal error.
    Failed(FetchError),
    /// Dropped before a result arrived.
    Cancelled,
}

impl Outcome {
    fn from_result(result: &FetchResult) -> Self {
        match result {
            Ok(image) => Outcome::Loaded {
                width: image.width(),
                height: image.height(),
            },
            Err(FetchError::Cancelled) => Outcome::Cancelled,
            Err(err) => Outcome::Failed(err.clone()),
        }
    }

    /// Whether an image was obtained.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Loaded { .. })
    }
}

/// One tab-separated result line: status, detail, url.
pub fn format_line(id: &ResourceId, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Loaded { width, height } => format!("ok\t{width}x{height}\t{id}"),
        Outcome::Failed(err) => format!("error\t{err}\t{id}"),
        Outcome::Cancelled => format!("cancelled\t-\t{id}"),
    }
}

/// Ids named on the command line, else the ones in `config`.
pub fn gather_ids(
    config: &Config,
    urls: &[String],
    file: Option<&Path>,
) -> Result<Vec<ResourceId>> {
    if urls.is_empty() && file.is_none() {
        return config.resource_ids();
    }

    let mut raw = urls.to_vec();
    if let Some(path) = file {
        raw.extend(read_url_list(path)?);
    }
    Ok(resource_ids_from_strings(raw))
}

type Slots = Arc<Mutex<Vec<Option<Outcome>>>>;

/// Drive every id through the loader, running callbacks on this task.
pub async fn fetch(
    config: &Config,
    ids: Vec<ResourceId>,
    cancel_after: Option<Duration>,
) -> Result<Vec<Outcome>> {
    if ids.is_empty() {
        bail!("no valid image urls to fetch");
    }

    let (queue, mut pump) = CallbackQueue::new();
    let loader = ImageLoader::new(config.loader_options(), Arc::new(queue))
        .context("failed to start image loader")?;

    let slots: Slots = Arc::new(Mutex::new(vec![None; ids.len()]));
    for (index, id) in ids.iter().enumerate() {
        let slots = Arc::clone(&slots);
        let key = id.clone();
        loader.load(id.clone(), move |result| {
            let outcome = Outcome::from_result(&result);
            println!("{}", format_line(&key, &outcome));
            slots.lock().unwrap_or_else(PoisonError::into_inner)[index] =
                Some(outcome);
        });
    }

    let deadline = cancel_after.map(|after| tokio::time::Instant::now() + after);
    let mut cancelled = false;
    while unresolved(&slots) > 0 && !cancelled {
        tokio::select! {
            more = pump.next() => {
                if !more {
                    break;
                }
            }
            _ = sleep_until(deadline) => {
                cancelled = true;
            }
        }
    }

    if cancelled {
        let mut dropped: Vec<ResourceId> = Vec::new();
        for index in pending_indices(&slots) {
            let id = &ids[index];
            if !dropped.contains(id) && loader.cancel(id) {
                dropped.push(id.clone());
            }
        }
        mark_cancelled(&slots, &ids, &dropped);
        info!(dropped = dropped.len(), "cancelled outstanding loads");

        // Whatever was not dropped has a result on its way.
        while unresolved(&slots) > 0 {
            if !pump.next().await {
                break;
            }
        }
    }

    loader.flush_disk().await;
    let stats = loader.stats();
    info!(
        memory_hits = stats.memory_hits,
        disk_hits = stats.disk_hits,
        network_requests = stats.network_requests,
        transfers = stats.fetcher.transfers_started,
        coalesced = stats.fetcher.coalesced_waiters,
        "fetch finished"
    );

    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    let outcomes = slots
        .iter_mut()
        .zip(&ids)
        .map(|(slot, id)| {
            slot.take().unwrap_or_else(|| {
                println!("{}", format_line(id, &Outcome::Cancelled));
                Outcome::Cancelled
            })
        })
        .collect();
    Ok(outcomes)
}

fn mark_cancelled(slots: &Slots, ids: &[ResourceId], dropped: &[ResourceId]) {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    for (slot, id) in slots.iter_mut().zip(ids) {
        if slot.is_none() && dropped.contains(id) {
            println!("{}", format_line(id, &Outcome::Cancelled));
            *slot = Some(Outcome::Cancelled);
        }
    }
}

fn unresolved(slots: &Slots) -> usize {
    pending_indices(slots).len()
}

fn pending_indices(slots: &Slots) -> Vec<usize> {
    slots
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| slot.is_none().then_some(index))
        .collect()
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// True when every outcome is a success; logs a summary otherwise.
pub fn all_loaded(outcomes: &[Outcome]) -> bool {
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    if failed > 0 {
        warn!(failed, total = outcomes.len(), "some images did not load");
    }
    failed == 0
}

/// Wipe both cache tiers.
pub async fn clear(config: &Config) -> Result<()> {
    let loader = ImageLoader::new(config.loader_options(), Arc::new(InlineDispatcher))
        .context("failed to start image loader")?;
    loader.clear_all();
    loader.flush_disk().await;
    println!("cleared {}", config.cache_root().display());
    Ok(())
}

/// Print the content address of `raw`.
pub fn print_address(raw: &str) -> Result<()> {
    let id = ResourceId::parse(raw)?;
    println!("{}", address(&id));
    Ok(())
}

/// Print the entry path for `raw` and whether it exists.
pub fn print_location(config: &Config, raw: &str) -> Result<()> {
    let id = ResourceId::parse(raw)?;
    let path = config.cache_root().join(address(&id).file_name());
    let state = if path.is_file() { "cached" } else { "missing" };
    println!("{}\t{state}", path.display());
    Ok(())
}
