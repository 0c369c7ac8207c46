//! Request coalescing and cancellation in the fetcher, driven by a transport
//! whose responses are held back until the test releases them.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use lumen_core::{
    CachedImage, CallbackQueue, FetchError, FetchResult, Fetcher,
    InlineDispatcher, RawResponse, ResourceId, Transport, TransportError,
};
use tokio::sync::{Semaphore, mpsc};

#[derive(Debug)]
struct GatedTransport {
    gate: Semaphore,
    calls: AtomicUsize,
    status: u16,
    body: Vec<u8>,
}

impl GatedTransport {
    fn new(status: u16, body: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            status,
            body,
        })
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn get(
        &self,
        _id: &ResourceId,
    ) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        permit.forget();
        Ok(RawResponse {
            status: self.status,
            body: Some(self.body.clone()),
        })
    }
}

fn png() -> Vec<u8> {
    let img = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
    CachedImage::new(DynamicImage::ImageRgba8(img))
        .encode_png()
        .unwrap()
        .into_bytes()
}

fn id(raw: &str) -> ResourceId {
    ResourceId::parse(raw).unwrap()
}

fn collector() -> (
    mpsc::UnboundedSender<FetchResult>,
    mpsc::UnboundedReceiver<FetchResult>,
) {
    mpsc::unbounded_channel()
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<FetchResult>) -> FetchResult {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("result within timeout")
        .expect("sender alive")
}

#[tokio::test]
async fn concurrent_fetches_share_one_transfer_and_one_result() {
    let transport = GatedTransport::new(200, png());
    let fetcher =
        Fetcher::new(transport.clone(), Arc::new(InlineDispatcher)).unwrap();
    let r = id("https://example.com/a.png");
    let (tx, mut rx) = collector();

    for _ in 0..5 {
        let tx = tx.clone();
        fetcher.fetch(r.clone(), move |res| {
            let _ = tx.send(res);
        });
    }
    assert_eq!(fetcher.stats().transfers_started, 1);
    assert_eq!(fetcher.stats().coalesced_waiters, 4);
    assert!(fetcher.is_pending(&r));

    transport.release(1);

    let first = recv(&mut rx).await.unwrap();
    for _ in 0..4 {
        let other = recv(&mut rx).await.unwrap();
        assert!(first.ptr_eq(&other), "waiters must share one decoded image");
    }
    assert!(rx.try_recv().is_err(), "exactly one invocation per waiter");
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert!(!fetcher.is_pending(&r));
    assert_eq!(fetcher.stats().succeeded, 1);
}

#[tokio::test]
async fn failures_fan_out_identically() {
    let transport = GatedTransport::new(503, Vec::new());
    let fetcher =
        Fetcher::new(transport.clone(), Arc::new(InlineDispatcher)).unwrap();
    let r = id("https://example.com/busy.png");
    let (tx, mut rx) = collector();

    for _ in 0..3 {
        let tx = tx.clone();
        fetcher.fetch(r.clone(), move |res| {
            let _ = tx.send(res);
        });
    }
    transport.release(1);

    for _ in 0..3 {
        assert_eq!(recv(&mut rx).await.unwrap_err(), FetchError::HttpStatus(503));
    }
    assert_eq!(fetcher.stats().failed, 1);
}

#[tokio::test]
async fn cancel_before_completion_drops_every_waiter() {
    let transport = GatedTransport::new(200, png());
    let fetcher =
        Fetcher::new(transport.clone(), Arc::new(InlineDispatcher)).unwrap();
    let r = id("https://example.com/a.png");
    let (tx, mut rx) = collector();

    for _ in 0..3 {
        let tx = tx.clone();
        fetcher.fetch(r.clone(), move |res| {
            let _ = tx.send(res);
        });
    }
    fetcher.cancel(&r);
    assert!(!fetcher.is_pending(&r));
    assert_eq!(fetcher.pending_count(), 0);

    transport.release(1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    drop(tx);
    assert!(
        rx.recv().await.is_none(),
        "no waiter may be called after cancel"
    );
    assert_eq!(fetcher.stats().cancelled, 1);
}

#[tokio::test]
async fn refetch_after_cancel_starts_fresh_transfer() {
    let transport = GatedTransport::new(200, png());
    let fetcher =
        Fetcher::new(transport.clone(), Arc::new(InlineDispatcher)).unwrap();
    let r = id("https://example.com/a.png");
    let (tx, mut rx) = collector();

    let stale = tx.clone();
    fetcher.fetch(r.clone(), move |res| {
        let _ = stale.send(res);
    });
    fetcher.cancel(&r);

    let fresh = tx.clone();
    fetcher.fetch(r.clone(), move |res| {
        let _ = fresh.send(res);
    });
    assert_eq!(fetcher.stats().transfers_started, 2);

    transport.release(2);
    assert!(recv(&mut rx).await.is_ok());

    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(tx);
    assert!(rx.recv().await.is_none(), "only the fresh waiter is notified");
    assert!(!fetcher.is_pending(&r));
}

#[tokio::test]
async fn cancel_after_completion_is_a_no_op() {
    let transport = GatedTransport::new(200, png());
    let fetcher =
        Fetcher::new(transport.clone(), Arc::new(InlineDispatcher)).unwrap();
    let r = id("https://example.com/a.png");
    let (tx, mut rx) = collector();

    fetcher.fetch(r.clone(), move |res| {
        let _ = tx.send(res);
    });
    transport.release(1);
    assert!(recv(&mut rx).await.is_ok());

    fetcher.cancel(&r);
    assert_eq!(fetcher.stats().cancelled, 0);
    assert_eq!(fetcher.pending_count(), 0);
}

#[tokio::test]
async fn distinct_ids_transfer_independently() {
    let transport = GatedTransport::new(200, png());
    let fetcher =
        Fetcher::new(transport.clone(), Arc::new(InlineDispatcher)).unwrap();
    let (tx, mut rx) = collector();

    for raw in ["https://example.com/a.png", "https://example.com/b.png"] {
        let tx = tx.clone();
        fetcher.fetch(id(raw), move |res| {
            let _ = tx.send(res);
        });
    }
    assert_eq!(fetcher.stats().transfers_started, 2);
    assert_eq!(fetcher.pending_count(), 2);

    transport.release(2);
    assert!(recv(&mut rx).await.is_ok());
    assert!(recv(&mut rx).await.is_ok());
}

#[tokio::test]
async fn results_wait_for_the_callback_pump() {
    let transport = GatedTransport::new(200, png());
    let (queue, mut pump) = CallbackQueue::new();
    let fetcher = Fetcher::new(transport.clone(), Arc::new(queue)).unwrap();
    let r = id("https://example.com/a.png");
    let delivered = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let delivered = Arc::clone(&delivered);
        fetcher.fetch(r.clone(), move |res| {
            assert!(res.is_ok());
            delivered.fetch_add(1, Ordering::SeqCst);
        });
    }
    transport.release(1);

    let mut ran = 0;
    while ran < 2 {
        let more = tokio::time::timeout(Duration::from_secs(5), pump.next())
            .await
            .expect("callback within timeout");
        assert!(more);
        ran += 1;
    }
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
}

/// Panics on the first request, then serves `body`.
#[derive(Debug)]
struct PanicsOnce {
    calls: AtomicUsize,
    body: Vec<u8>,
}

#[async_trait]
impl Transport for PanicsOnce {
    async fn get(
        &self,
        _id: &ResourceId,
    ) -> Result<RawResponse, TransportError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("socket exploded");
        }
        Ok(RawResponse {
            status: 200,
            body: Some(self.body.clone()),
        })
    }
}

#[tokio::test]
async fn panicking_transport_fails_waiters_and_frees_the_id() {
    let transport = Arc::new(PanicsOnce {
        calls: AtomicUsize::new(0),
        body: png(),
    });
    let fetcher =
        Fetcher::new(transport.clone(), Arc::new(InlineDispatcher)).unwrap();
    let r = id("https://example.com/a.png");
    let (tx, mut rx) = collector();

    for _ in 0..2 {
        let tx = tx.clone();
        fetcher.fetch(r.clone(), move |res| {
            let _ = tx.send(res);
        });
    }

    for _ in 0..2 {
        match recv(&mut rx).await {
            Err(FetchError::Network(msg)) => {
                assert!(msg.contains("panicked"), "{msg}");
                assert!(msg.contains("socket exploded"), "{msg}");
            }
            other => panic!("expected network error, got {other:?}"),
        }
    }
    assert!(!fetcher.is_pending(&r));
    assert_eq!(fetcher.stats().failed, 1);

    fetcher.fetch(r.clone(), move |res| {
        let _ = tx.send(res);
    });
    assert!(recv(&mut rx).await.is_ok());
    assert_eq!(fetcher.stats().transfers_started, 2);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}
