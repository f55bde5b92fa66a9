//! Merging queued output into as few writes as possible.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use super::frame::ControlFrame;
use super::hub::Outbound;

/// One write for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flush {
    Data(Bytes),
    Frame(ControlFrame),
    Close { code: u16, reason: String },
}

/// Drains a viewer queue, joining consecutive data chunks.
///
/// Chunks are concatenated in queue order up to `limit` bytes. A control
/// item that follows data is held back until the merged data has been
/// flushed, so relative order is preserved exactly.
pub struct Coalescer {
    limit: usize,
    held: Option<Outbound>,
}

impl Coalescer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            held: None,
        }
    }

    /// Wait for the next write. `None` once the queue is closed and empty.
    pub async fn next(&mut self, rx: &mut mpsc::Receiver<Outbound>) -> Option<Flush> {
        let first = match self.held.take() {
            Some(item) => item,
            None => rx.recv().await?,
        };

        let data = match first {
            Outbound::Data(data) => data,
            Outbound::Frame(frame) => return Some(Flush::Frame(frame)),
            Outbound::Close { code, reason } => return Some(Flush::Close { code, reason }),
        };

        if data.len() >= self.limit {
            return Some(Flush::Data(data));
        }

        let mut merged: Option<BytesMut> = None;
        while merged.as_ref().map_or(data.len(), BytesMut::len) < self.limit {
            match rx.try_recv() {
                Ok(Outbound::Data(more)) => {
                    merged
                        .get_or_insert_with(|| BytesMut::from(&data[..]))
                        .extend_from_slice(&more);
                }
                Ok(other) => {
                    self.held = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        Some(Flush::Data(match merged {
            Some(buf) => buf.freeze(),
            None => data,
        }))
    }
}
