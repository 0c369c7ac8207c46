//! Delivery of completion callbacks onto the context the host expects.
//!
//! Every result produced by the loader is handed to a [`CallbackDispatcher`]
//! rather than invoked directly, so a UI host can funnel all of them onto its
//! own thread through a [`CallbackQueue`] and drain it with a
//! [`CallbackPump`].

use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

/// A completion bound to its result, ready to run.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Decides where and when completions run.
///
/// Implementations must run every dispatched callback exactly once, unless
/// the host is shutting down.
pub trait CallbackDispatcher: Send + Sync + fmt::Debug {
    /// Schedule `callback`; may run it before returning.
    fn dispatch(&self, callback: Callback);
}

/// Runs callbacks immediately on whichever thread produced the result.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl CallbackDispatcher for InlineDispatcher {
    fn dispatch(&self, callback: Callback) {
        callback();
    }
}

/// Sending half: hand this to the loader.
#[derive(Clone)]
pub struct CallbackQueue {
    tx: mpsc::UnboundedSender<Callback>,
}

/// Receiving half: owned by the host's UI loop.
pub struct CallbackPump {
    rx: mpsc::UnboundedReceiver<Callback>,
}

impl CallbackQueue {
    /// A connected queue and pump.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (CallbackQueue, CallbackPump) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CallbackQueue { tx }, CallbackPump { rx })
    }
}

impl fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackQueue")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl CallbackDispatcher for CallbackQueue {
    fn dispatch(&self, callback: Callback) {
        if self.tx.send(callback).is_err() {
            debug!("callback pump dropped; discarding completion");
        }
    }
}

impl CallbackPump {
    /// Run everything queued right now without waiting. Returns how many
    /// callbacks ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.rx.try_recv() {
            callback();
            ran += 1;
        }
        ran
    }

    /// Wait for the next callback and run it. `false` once every
    /// [`CallbackQueue`] handle is gone and the queue is drained.
    pub async fn next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Drive callbacks until every sender has been dropped.
    pub async fn run(mut self) {
        while self.next().await {}
    }
}

impl fmt::Debug for CallbackPump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackPump")
            .field("queued", &self.rx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    #[test]
    fn inline_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        InlineDispatcher.dispatch(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queue_defers_until_pumped_in_order() {
        let (queue, mut pump) = CallbackQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            queue.dispatch(Box::new(move || order.lock().unwrap().push(i)));
        }
        assert!(order.lock().unwrap().is_empty());

        assert_eq!(pump.run_pending(), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(pump.run_pending(), 0);
    }

    #[tokio::test]
    async fn pump_stops_when_senders_drop() {
        let (queue, pump) = CallbackQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        queue.dispatch(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        drop(queue);
        pump.run().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
