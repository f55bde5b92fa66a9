//! Async adapters for PTY I/O.
//!
//! These adapters convert blocking PTY read/write operations into
//! channel-based communication so the tokio runtime never blocks on the
//! terminal.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Serializes geometry changes against output hand-off.
///
/// The reader holds the gate while passing a chunk on; resize holds it
/// while applying the new size. A chunk is therefore published entirely
/// before or entirely after a resize, never straddling it.
#[derive(Debug, Clone, Default)]
pub struct GeometryGate(Arc<Mutex<()>>);

impl GeometryGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the gate.
    pub fn hold<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    }
}

/// Async reader for PTY output.
///
/// Runs in a blocking thread and sends output chunks through a channel.
pub struct AsyncPtyReader<R: Read + Send + 'static> {
    reader: R,
    tx: mpsc::Sender<Bytes>,
    gate: GeometryGate,
    buffer_size: usize,
}

impl<R: Read + Send + 'static> AsyncPtyReader<R> {
    /// Create a new AsyncPtyReader.
    ///
    /// # Arguments
    ///
    /// * `reader` - The PTY reader (blocking).
    /// * `tx` - Channel sender for output data.
    /// * `gate` - Geometry gate shared with the resize path.
    pub fn new(reader: R, tx: mpsc::Sender<Bytes>, gate: GeometryGate) -> Self {
        Self {
            reader,
            tx,
            gate,
            buffer_size: 4096,
        }
    }

    /// Create with custom buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Start the reader loop in a blocking thread.
    ///
    /// Returns when:
    /// - The PTY is closed (read returns 0 or EIO)
    /// - The channel is closed (receiver dropped)
    /// - An unrecoverable error occurs
    pub async fn run(self) {
        let Self {
            mut reader,
            tx,
            gate,
            buffer_size,
        } = self;

        let result = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; buffer_size];

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("PTY reader: EOF");
                        break;
                    }
                    Ok(n) => {
                        trace!("PTY reader: read {} bytes", n);
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if gate.hold(|| tx.blocking_send(chunk)).is_err() {
                            debug!("PTY reader: channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        // EIO on Unix means the slave side closed
                        #[cfg(unix)]
                        if e.raw_os_error() == Some(libc::EIO) {
                            debug!("PTY reader: PTY closed (EIO)");
                            break;
                        }

                        if e.kind() == std::io::ErrorKind::Interrupted {
                            continue;
                        }

                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            debug!("PTY reader: broken pipe");
                            break;
                        }

                        error!("PTY reader error: {}", e);
                        break;
                    }
                }
            }
        })
        .await;

        if let Err(e) = result {
            error!("PTY reader task panicked: {}", e);
        }
    }
}

/// Async writer for PTY input.
///
/// Receives data through a channel and writes to the PTY in a blocking thread.
pub struct AsyncPtyWriter<W: Write + Send + 'static> {
    writer: W,
    rx: mpsc::Receiver<Bytes>,
}

impl<W: Write + Send + 'static> AsyncPtyWriter<W> {
    /// Create a new AsyncPtyWriter.
    pub fn new(writer: W, rx: mpsc::Receiver<Bytes>) -> Self {
        Self { writer, rx }
    }

    /// Start the writer loop in a blocking thread.
    ///
    /// Returns the writer once every sender is dropped, or `None` if a
    /// write failed.
    pub async fn run(self) -> Option<W> {
        let Self { mut writer, mut rx } = self;

        let result = tokio::task::spawn_blocking(move || {
            while let Some(data) = rx.blocking_recv() {
                trace!("PTY writer: writing {} bytes", data.len());
                if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        debug!("PTY writer: broken pipe");
                    } else {
                        error!("PTY writer error: {}", e);
                    }
                    return None;
                }
            }
            debug!("PTY writer: channel closed");
            Some(writer)
        })
        .await;

        match result {
            Ok(writer) => writer,
            Err(e) => {
                error!("PTY writer task panicked: {}", e);
                None
            }
        }
    }
}
