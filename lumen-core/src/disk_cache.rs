//! Persistent tier.
//!
//! Entries are raw PNG files named by [`ContentAddress`] under a single root
//! directory. Reads are synchronous. Writes and clears are queued to one
//! writer task so the directory is only ever mutated from that context, in
//! submission order.

use std::{
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{
    io::AsyncWriteExt,
    sync::{mpsc, oneshot},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    address::{ContentAddress, address},
    bitmap::{CachedImage, EncodedBlob},
    error::{LumenError, Result},
    resource::ResourceId,
};

enum DiskJob {
    Save {
        address: ContentAddress,
        blob: EncodedBlob,
    },
    SaveImage {
        address: ContentAddress,
        image: CachedImage,
    },
    Clear,
    Flush(oneshot::Sender<()>),
}

/// Handle to the persistent tier; clones share one writer task.
#[derive(Clone)]
pub struct DiskCache {
    root: Arc<PathBuf>,
    root_ready: Arc<AtomicBool>,
    jobs: mpsc::UnboundedSender<DiskJob>,
}

impl fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskCache")
            .field("root", &self.root)
            .field("writer_alive", &!self.jobs.is_closed())
            .finish()
    }
}

impl DiskCache {
    /// Create the cache and start its writer task on the current Tokio
    /// runtime. The root directory itself is created lazily.
    pub fn new(root: PathBuf) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| LumenError::NoRuntime)?;

        let root = Arc::new(root);
        let root_ready = Arc::new(AtomicBool::new(false));
        let (jobs, rx) = mpsc::unbounded_channel();

        let writer = DiskWriter {
            root: Arc::clone(&root),
            root_ready: Arc::clone(&root_ready),
        };
        handle.spawn(writer.run(rx));

        Ok(Self {
            root,
            root_ready,
            jobs,
        })
    }

    /// Cache directory; may not exist yet.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File an entry for `id` lives at.
    pub fn path_for(&self, id: &ResourceId) -> PathBuf {
        self.root.join(address(id).file_name())
    }

    /// Synchronous lookup. Missing, unreadable and undecodable files are all
    /// a plain miss.
    pub fn load(&self, id: &ResourceId) -> Option<EncodedBlob> {
        self.load_entry(id).map(|(blob, _)| blob)
    }

    /// Like [`DiskCache::load`], returning the decoded image.
    pub fn load_image(&self, id: &ResourceId) -> Option<CachedImage> {
        self.load_entry(id).map(|(_, image)| image)
    }

    fn load_entry(&self, id: &ResourceId) -> Option<(EncodedBlob, CachedImage)> {
        self.ensure_root_sync();
        let path = self.path_for(id);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(%id, "disk cache miss");
                return None;
            }
            Err(e) => {
                warn!(%id, path = %path.display(), err = %e, "disk cache read failed");
                return None;
            }
        };

        let blob = EncodedBlob::new(bytes);
        if blob.is_empty() {
            warn!(%id, path = %path.display(), "disk cache entry is empty; treating as miss");
            return None;
        }
        // A truncated file still carries a valid header.
        match blob.decode() {
            Ok(image) => Some((blob, image)),
            Err(err) => {
                warn!(
                    %id,
                    path = %path.display(),
                    len = blob.len(),
                    %err,
                    "disk cache entry does not decode; treating as miss"
                );
                None
            }
        }
    }

    /// Queue a write of already-encoded bytes. Returns immediately.
    pub fn save(&self, blob: EncodedBlob, id: &ResourceId) {
        self.submit(DiskJob::Save {
            address: address(id),
            blob,
        });
    }

    /// Queue a PNG encode + write of a decoded image. Encoding happens on the
    /// writer's blocking pool, never on the caller.
    pub fn save_image(&self, image: CachedImage, id: &ResourceId) {
        self.submit(DiskJob::SaveImage {
            address: address(id),
            image,
        });
    }

    /// Queue removal of every entry, including saves queued before it.
    pub fn clear(&self) {
        self.submit(DiskJob::Clear);
    }

    /// Wait until every job queued before this call has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.jobs.send(DiskJob::Flush(tx)).is_err() {
            return;
        }
        let _ = rx.await;
    }

    fn submit(&self, job: DiskJob) {
        if self.jobs.send(job).is_err() {
            warn!(root = %self.root.display(), "disk cache writer has stopped; dropping job");
        }
    }

    fn ensure_root_sync(&self) {
        if self.root_ready.load(Ordering::Acquire) {
            return;
        }
        match std::fs::create_dir_all(self.root.as_path()) {
            Ok(()) => self.root_ready.store(true, Ordering::Release),
            Err(e) => warn!(
                root = %self.root.display(),
                err = %e,
                "failed to create disk cache directory"
            ),
        }
    }
}

struct DiskWriter {
    root: Arc<PathBuf>,
    root_ready: Arc<AtomicBool>,
}

impl DiskWriter {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<DiskJob>) {
        while let Some(job) = rx.recv().await {
            match job {
                DiskJob::Save { address, blob } => {
                    self.write_entry(&address, blob.as_bytes()).await;
                }
                DiskJob::SaveImage { address, image } => {
                    match tokio::task::spawn_blocking(move || image.encode_png())
                        .await
                    {
                        Ok(Ok(blob)) => {
                            self.write_entry(&address, blob.as_bytes()).await
                        }
                        Ok(Err(e)) => {
                            warn!(%address, err = %e, "png encode failed; entry not cached")
                        }
                        Err(e) => {
                            warn!(%address, err = %e, "png encode task failed")
                        }
                    }
                }
                DiskJob::Clear => self.clear().await,
                DiskJob::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!(root = %self.root.display(), "disk cache writer stopped");
    }

    async fn ensure_root(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.root.as_path()).await?;
        self.root_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Atomic replace (tmp + rename); last writer wins.
    async fn write_entry(&self, address: &ContentAddress, bytes: &[u8]) {
        if let Err(e) = self.try_write_entry(address, bytes).await {
            warn!(%address, err = %e, "disk cache write failed");
        }
    }

    async fn try_write_entry(
        &self,
        address: &ContentAddress,
        bytes: &[u8],
    ) -> std::io::Result<()> {
        self.ensure_root().await?;
        let file_name = address.file_name();
        let path = self.root.join(&file_name);
        let tmp = self
            .root
            .join(format!("{file_name}.tmp-{}", Uuid::new_v4().simple()));

        let written: std::io::Result<()> = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if written.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        } else {
            debug!(%address, len = bytes.len(), "disk cache entry written");
        }
        written
    }

    async fn clear(&self) {
        self.root_ready.store(false, Ordering::Release);
        match tokio::fs::remove_dir_all(self.root.as_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(root = %self.root.display(), err = %e, "disk cache clear failed")
            }
        }
        if let Err(e) = self.ensure_root().await {
            warn!(root = %self.root.display(), err = %e, "failed to recreate disk cache directory");
        }
        debug!(root = %self.root.display(), "disk cache cleared");
    }
}
