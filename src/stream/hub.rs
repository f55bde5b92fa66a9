//! Fan-out of terminal output to attached viewers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::frame::ControlFrame;

/// WebSocket close codes used by the relay.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Server going away (session destroyed, shutdown).
    pub const AWAY: u16 = 1001;
    /// Malformed control frame.
    pub const PROTOCOL: u16 = 1002;
    /// Auth failure or no session to attach to.
    pub const POLICY: u16 = 1008;
    /// Viewer fell too far behind.
    pub const OVERLOADED: u16 = 1013;
}

/// Identifier of one attached viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewerId(u64);

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// One item in a viewer's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Raw terminal bytes.
    Data(Bytes),
    Frame(ControlFrame),
    /// Close the connection after everything queued before it.
    Close { code: u16, reason: String },
}

/// A viewer's handle on the hub.
pub struct Attachment {
    pub id: ViewerId,
    /// Sender into the viewer's own queue, for replies such as pong.
    pub tx: mpsc::Sender<Outbound>,
    pub rx: mpsc::Receiver<Outbound>,
    /// Signalled when the hub drops this viewer without a queued close.
    pub evicted: Arc<Notify>,
}

struct Slot {
    tx: mpsc::Sender<Outbound>,
    evicted: Arc<Notify>,
}

/// Publishes PTY output and notifications to every attached viewer.
///
/// Each viewer has its own bounded queue. Publishing never waits: a viewer
/// whose queue is full is detached and its connection closed, so a slow
/// viewer cannot stall the reader or anyone else.
pub struct ViewerHub {
    viewers: Mutex<HashMap<ViewerId, Slot>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl ViewerHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            viewers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    fn viewers(&self) -> MutexGuard<'_, HashMap<ViewerId, Slot>> {
        self.viewers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a viewer; `greeting` is queued ahead of any output.
    pub fn attach(&self, greeting: Option<ControlFrame>) -> Attachment {
        let id = ViewerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);
        let evicted = Arc::new(Notify::new());

        let mut viewers = self.viewers();
        if let Some(frame) = greeting {
            let _ = tx.try_send(Outbound::Frame(frame));
        }
        viewers.insert(
            id,
            Slot {
                tx: tx.clone(),
                evicted: Arc::clone(&evicted),
            },
        );
        debug!(viewer = %id, count = viewers.len(), "viewer attached");

        Attachment {
            id,
            tx,
            rx,
            evicted,
        }
    }

    /// Remove a viewer from the fan-out set.
    pub fn detach(&self, id: ViewerId) -> bool {
        let removed = self.viewers().remove(&id).is_some();
        if removed {
            debug!(viewer = %id, "viewer detached");
        }
        removed
    }

    /// Queue terminal bytes for every viewer.
    pub fn publish_data(&self, data: Bytes) {
        self.publish(Outbound::Data(data));
    }

    /// Queue a control frame for every viewer.
    pub fn broadcast(&self, frame: ControlFrame) {
        self.publish(Outbound::Frame(frame));
    }

    fn publish(&self, item: Outbound) {
        let mut viewers = self.viewers();
        viewers.retain(|id, slot| match slot.tx.try_send(item.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(viewer = %id, "viewer queue full, disconnecting");
                slot.evicted.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Close every viewer with a notification and empty the set.
    pub fn close_all(&self, reason: &str) {
        let drained: Vec<_> = self.viewers().drain().collect();
        for (id, slot) in drained {
            let _ = slot
                .tx
                .try_send(Outbound::Frame(ControlFrame::log(format!("[SYSTEM] {reason}"))));
            let close = Outbound::Close {
                code: close_code::AWAY,
                reason: reason.to_string(),
            };
            if slot.tx.try_send(close).is_err() {
                slot.evicted.notify_one();
            }
            debug!(viewer = %id, "viewer closed: {}", reason);
        }
    }

    pub fn len(&self) -> usize {
        self.viewers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ViewerHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    #[test]
    fn test_every_viewer_sees_same_sequence() {
        let hub = ViewerHub::new(16);
        let mut a = hub.attach(None);
        let mut b = hub.attach(None);

        hub.publish_data(Bytes::from_static(b"w1"));
        hub.broadcast(ControlFrame::log("note"));
        hub.publish_data(Bytes::from_static(b"w2"));

        let seq_a = drain(&mut a.rx);
        let seq_b = drain(&mut b.rx);
        assert_eq!(seq_a, seq_b);
        assert_eq!(seq_a.len(), 3);
        assert_eq!(seq_a[0], Outbound::Data(Bytes::from_static(b"w1")));
    }

    #[test]
    fn test_greeting_comes_first() {
        let hub = ViewerHub::new(16);
        let mut viewer = hub.attach(Some(ControlFrame::log("hello")));
        hub.publish_data(Bytes::from_static(b"x"));

        let items = drain(&mut viewer.rx);
        assert_eq!(items[0], Outbound::Frame(ControlFrame::log("hello")));
    }

    #[test]
    fn test_full_queue_disconnects_only_slow_viewer() {
        let hub = ViewerHub::new(2);
        let mut fast = hub.attach(None);
        let slow = hub.attach(None);

        for i in 0..5u8 {
            hub.publish_data(Bytes::from(vec![i]));
            drain(&mut fast.rx);
        }

        assert_eq!(hub.len(), 1);
        tokio_test::block_on(async {
            tokio::time::timeout(std::time::Duration::from_secs(1), slow.evicted.notified())
                .await
                .unwrap();
        });
        drop(slow);
        hub.publish_data(Bytes::from_static(b"after"));
        assert_eq!(
            drain(&mut fast.rx),
            vec![Outbound::Data(Bytes::from_static(b"after"))]
        );
    }

    #[test]
    fn test_dropped_receiver_removed() {
        let hub = ViewerHub::new(4);
        let Attachment { rx, tx, .. } = hub.attach(None);
        drop(rx);
        drop(tx);
        hub.publish_data(Bytes::from_static(b"x"));
        assert!(hub.is_empty());
    }

    #[test]
    fn test_close_all_notifies() {
        let hub = ViewerHub::new(8);
        let mut viewer = hub.attach(None);
        hub.close_all("session destroyed");

        let items = drain(&mut viewer.rx);
        assert!(matches!(items.last(), Some(Outbound::Close { code, .. }) if *code == close_code::AWAY));
        assert!(hub.is_empty());
    }

    #[test]
    fn test_detach() {
        let hub = ViewerHub::new(8);
        let viewer = hub.attach(None);
        assert!(hub.detach(viewer.id));
        assert!(!hub.detach(viewer.id));
    }
}
