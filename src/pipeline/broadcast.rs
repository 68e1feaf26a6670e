//! Latest-value fan-out of encoded frames to any number of viewers
//!
//! The producer swaps a single `Arc<EncodedFrame>` into place and wakes
//! whoever is waiting. It never touches the viewer registry and never
//! waits on a viewer. Each viewer keeps its own cursor and takes whatever
//! frame is current when it gets around to asking, so a slow viewer skips
//! frames instead of queueing them.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use crossbeam::utils::CachePadded;
use crossbeam_skiplist::SkipMap;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Compressed frame shared read-only with every viewer
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub data: Bytes,
}

/// A viewer's registration and delivery cursor
#[derive(Debug)]
pub struct ViewerHandle {
    id: u64,
    cursor: u64,
}

impl ViewerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sequence of the last frame handed to this viewer, 0 before the first
    pub fn last_sequence(&self) -> u64 {
        self.cursor
    }
}

#[derive(Debug, Clone)]
struct ViewerInfo {
    peer: Option<SocketAddr>,
    connected_at: Instant,
}

#[derive(Default)]
struct Stats {
    published: AtomicU64,
    rejected: AtomicU64,
}

pub struct Broadcaster {
    current: ArcSwapOption<EncodedFrame>,
    notify: Notify,
    viewers: SkipMap<u64, ViewerInfo>,
    next_id: AtomicU64,
    closed: AtomicBool,
    stats: CachePadded<Stats>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            notify: Notify::new(),
            viewers: SkipMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Replace the current frame. Never waits on viewers.
    ///
    /// Frames must arrive in increasing sequence order; a frame that is not
    /// newer than the current one is rejected and `false` is returned.
    pub fn publish(&self, frame: EncodedFrame) -> bool {
        let current = self.current.load();
        if let Some(current) = &*current {
            if frame.sequence <= current.sequence {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Rejected stale frame {} (current {})",
                    frame.sequence, current.sequence
                );
                return false;
            }
        }

        self.current.store(Some(Arc::new(frame)));
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
        true
    }

    pub fn latest(&self) -> Option<Arc<EncodedFrame>> {
        self.current.load_full()
    }

    pub fn subscribe(&self, peer: Option<SocketAddr>) -> ViewerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.viewers.insert(
            id,
            ViewerInfo {
                peer,
                connected_at: Instant::now(),
            },
        );
        metrics::gauge!("viewers").set(self.viewers.len() as f64);
        debug!("Viewer {} subscribed from {:?}", id, peer);

        ViewerHandle { id, cursor: 0 }
    }

    /// Remove a viewer and wake it if it is waiting. Unknown or already
    /// removed handles are ignored.
    pub fn unsubscribe(&self, handle: &ViewerHandle) -> bool {
        match self.viewers.remove(&handle.id) {
            Some(entry) => {
                let info = entry.value();
                debug!(
                    "Viewer {} from {:?} left after {:?}",
                    handle.id,
                    info.peer,
                    info.connected_at.elapsed()
                );
                metrics::gauge!("viewers").set(self.viewers.len() as f64);
                // A viewer parked in `next_frame` rechecks its registration
                self.notify.notify_waiters();
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, handle: &ViewerHandle) -> bool {
        self.viewers.contains_key(&handle.id)
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Wait for a frame newer than the last one this viewer saw.
    ///
    /// Returns `None` once the broadcaster is closed or the viewer has been
    /// unsubscribed.
    pub async fn next_frame(&self, handle: &mut ViewerHandle) -> Option<Arc<EncodedFrame>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before looking so a publish in between is not missed
            notified.as_mut().enable();

            if self.is_closed() || !self.is_subscribed(handle) {
                return None;
            }

            if let Some(frame) = self.current.load_full() {
                if frame.sequence > handle.cursor {
                    handle.cursor = frame.sequence;
                    return Some(frame);
                }
            }

            notified.await;
        }
    }

    /// Wake every viewer and make further waits return `None`
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// (published, rejected)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.published.load(Ordering::Relaxed),
            self.stats.rejected.load(Ordering::Relaxed),
        )
    }

    /// Register a viewer that unregisters itself when dropped
    pub fn subscribe_owned(self: &Arc<Self>, peer: Option<SocketAddr>) -> Subscription {
        Subscription {
            handle: self.subscribe(peer),
            broadcaster: self.clone(),
        }
    }
}

/// Owned viewer registration, released on drop
pub struct Subscription {
    broadcaster: Arc<Broadcaster>,
    handle: ViewerHandle,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.handle.id
    }

    pub async fn next(&mut self) -> Option<Arc<EncodedFrame>> {
        self.broadcaster.next_frame(&mut self.handle).await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.handle);
    }
}
