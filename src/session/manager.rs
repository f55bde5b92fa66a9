//! Ownership of the single live PTY session.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use portable_pty::{Child, MasterPty};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::record::{RecordFile, RecoveryOutcome, SessionRecord};
use super::{SessionId, SessionState};
use crate::config::SessionSection;
use crate::detect::{DetectionEvent, PatternDetector, PatternRule};
use crate::error::RelayError;
use crate::process::{self, Signal};
use crate::pty::{AsyncPtyReader, AsyncPtyWriter, GeometryGate, LaunchSpec, NativePty, PtySize};
use crate::stream::{Attachment, ControlFrame, ViewerHub};
use crate::Result;

const OUTPUT_QUEUE: usize = 64;
const INPUT_QUEUE: usize = 256;

/// A detection event tagged with the session whose output produced it.
#[derive(Debug, Clone)]
pub struct SessionDetection {
    pub session: SessionId,
    pub event: DetectionEvent,
}

/// What to run in a new session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LaunchMode {
    /// The configured launch command, through `shell -c`.
    #[default]
    Assistant,
    /// An interactive login shell.
    Shell,
    /// An explicit command line, through `shell -c`.
    Command(String),
}

/// Parameters of a create request.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Defaults to `{default_working_dir}/{session id}`.
    pub working_dir: Option<PathBuf>,
    pub launch: LaunchMode,
    /// Seed the working directory from the template directory.
    pub copy_templates: bool,
}

/// Snapshot of the live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub pid: u32,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub cols: u16,
    pub rows: u16,
}

struct LiveSession {
    id: SessionId,
    pid: u32,
    working_dir: PathBuf,
    state: SessionState,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    size: PtySize,
    input: mpsc::Sender<Bytes>,
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    gate: GeometryGate,
    exited: watch::Receiver<bool>,
    pump: JoinHandle<()>,
}

impl LiveSession {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            state: self.state,
            pid: self.pid,
            working_dir: self.working_dir.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            cols: self.size.cols,
            rows: self.size.rows,
        }
    }

    fn record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id,
            pid: self.pid,
            working_dir: self.working_dir.clone(),
            state: self.state,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

/// Owns the one PTY session a relay instance serves.
///
/// The slot holds at most one live session. Create fails with
/// [`RelayError::Conflict`] while it is occupied; destroy, process exit and
/// shutdown empty it. Output is drained continuously by a pump task that
/// feeds the detector and the viewer hub whether or not anyone is watching.
pub struct SessionManager {
    config: SessionSection,
    rules: Arc<[PatternRule]>,
    hub: Arc<ViewerHub>,
    detections: mpsc::UnboundedSender<SessionDetection>,
    records: RecordFile,
    slot: tokio::sync::Mutex<Option<LiveSession>>,
    current: watch::Sender<Option<SessionId>>,
}

impl SessionManager {
    pub fn new(
        config: SessionSection,
        rules: Arc<[PatternRule]>,
        hub: Arc<ViewerHub>,
        detections: mpsc::UnboundedSender<SessionDetection>,
    ) -> Arc<Self> {
        let records = RecordFile::new(config.state_dir.join("session.json"));
        let (current, _) = watch::channel(None);
        Arc::new(Self {
            config,
            rules,
            hub,
            detections,
            records,
            slot: tokio::sync::Mutex::new(None),
            current,
        })
    }

    /// Resolve a session record left by a previous run.
    pub fn recover_on_start(&self) -> RecoveryOutcome {
        self.records.recover()
    }

    /// Launch a new session.
    pub async fn create(self: &Arc<Self>, opts: CreateOptions) -> Result<SessionInfo> {
        let mut slot = self.slot.lock().await;
        if let Some(live) = slot.as_ref() {
            return Err(RelayError::Conflict(live.id.to_string()));
        }

        let id = SessionId::new();
        let working_dir = self.prepare_working_dir(opts.working_dir.as_deref(), id)?;
        if opts.copy_templates {
            self.copy_templates(&working_dir);
        }

        let spec = match &opts.launch {
            LaunchMode::Assistant => {
                LaunchSpec::command(&self.config.shell, &self.config.launch_command, &working_dir)
            }
            LaunchMode::Shell => LaunchSpec::login_shell(&self.config.shell, &working_dir),
            LaunchMode::Command(command) => {
                LaunchSpec::command(&self.config.shell, command, &working_dir)
            }
        };

        let size = PtySize::new(self.config.rows, self.config.cols);
        let process = NativePty::new().spawn(&spec, size)?;
        let mut state = SessionState::Starting;

        let gate = GeometryGate::new();
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_QUEUE);
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        tokio::spawn(AsyncPtyReader::new(process.reader, output_tx, gate.clone()).run());
        tokio::spawn(async move {
            AsyncPtyWriter::new(process.writer, input_rx).run().await;
        });
        let exited = self.watch_exit(id, process.child);
        let pump = tokio::spawn(pump_output(
            id,
            output_rx,
            PatternDetector::new(Arc::clone(&self.rules)),
            Arc::clone(&self.hub),
            self.detections.clone(),
        ));

        state.transition_to(SessionState::Running)?;
        let now = Utc::now();
        let live = LiveSession {
            id,
            pid: process.pid,
            working_dir,
            state,
            created_at: now,
            last_activity: now,
            size,
            input: input_tx,
            master: Arc::new(Mutex::new(process.master)),
            gate,
            exited,
            pump,
        };

        if let Err(e) = self.records.save(&live.record()) {
            warn!(session_id = %id, "failed to persist session record: {}", e);
        }

        let info = live.info();
        *slot = Some(live);
        self.current.send_replace(Some(id));
        info!(
            session_id = %id,
            pid = info.pid,
            working_dir = %info.working_dir.display(),
            "session started"
        );

        Ok(info)
    }

    /// Forward raw bytes to the process input.
    pub async fn write(&self, data: Bytes) -> Result<()> {
        let input = {
            let mut slot = self.slot.lock().await;
            let live = running(&mut slot)?;
            live.last_activity = Utc::now();
            live.input.clone()
        };
        input.send(data).await.map_err(|_| RelayError::NoSession)
    }

    /// Type a command line followed by a newline.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        self.write(Bytes::from(format!("{command}\n"))).await
    }

    /// Apply new terminal geometry.
    ///
    /// Runs under the geometry gate so no output chunk is handed off while
    /// the size changes.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let size = PtySize::new(rows, cols);
        let (master, gate, id) = {
            let mut slot = self.slot.lock().await;
            let live = running(&mut slot)?;
            live.size = size;
            live.last_activity = Utc::now();
            (Arc::clone(&live.master), live.gate.clone(), live.id)
        };

        tokio::task::spawn_blocking(move || {
            gate.hold(|| {
                let master = master
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                master.resize(size.into())
            })
        })
        .await
        .map_err(|e| RelayError::Pty(e.to_string()))?
        .map_err(|e| RelayError::Pty(e.to_string()))?;

        debug!(session_id = %id, cols, rows, "terminal resized");
        Ok(())
    }

    /// Stop the session. Idempotent when there is none.
    pub async fn destroy(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let Some(live) = slot.take() else {
            return Ok(());
        };
        self.teardown(live, "session destroyed", true).await;
        Ok(())
    }

    /// Attach a viewer to the live session's output.
    pub async fn attach_viewer(&self) -> Result<Attachment> {
        let slot = self.slot.lock().await;
        let live = slot.as_ref().ok_or(RelayError::NoSession)?;
        let attachment = self
            .hub
            .attach(Some(ControlFrame::log("[SYSTEM] terminal attached")));
        debug!(session_id = %live.id, viewer = %attachment.id, "viewer joined session");
        Ok(attachment)
    }

    pub async fn info(&self) -> Option<SessionInfo> {
        self.slot.lock().await.as_ref().map(LiveSession::info)
    }

    pub fn current_id(&self) -> Option<SessionId> {
        *self.current.borrow()
    }

    /// Watch the id of the live session; `None` while there is none.
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionId>> {
        self.current.subscribe()
    }

    /// Terminate the session process as part of server shutdown.
    ///
    /// Viewers stay attached; the caller closes them once tunnels are down.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(live) = slot.take() {
            self.teardown(live, "server shutting down", false).await;
        }
    }

    async fn on_process_exit(&self, id: SessionId) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|live| live.id) != Some(id) {
            return;
        }
        if let Some(live) = slot.take() {
            info!(session_id = %id, "session process exited");
            self.teardown(live, "session process exited", true).await;
        }
    }

    /// Stop the reader, close viewers, then stop the process group.
    async fn teardown(&self, mut live: LiveSession, reason: &str, close_viewers: bool) {
        self.current.send_replace(None);
        let _ = live.state.transition_to(SessionState::Destroyed);

        live.pump.abort();
        if close_viewers {
            self.hub.close_all(reason);
        }
        drop(live.input);

        self.stop_process(live.pid, live.exited).await;

        if let Err(e) = self.records.clear() {
            warn!(session_id = %live.id, "failed to remove session record: {}", e);
        }
        info!(session_id = %live.id, "{}", reason);
    }

    async fn stop_process(&self, pid: u32, mut exited: watch::Receiver<bool>) {
        // Children such as dev servers share the group and may outlive the leader.
        process::signal_group(pid, Signal::Hangup);
        process::signal_group(pid, Signal::Term);
        if *exited.borrow() {
            return;
        }

        let grace = self.config.kill_grace();
        let stopped = tokio::time::timeout(grace, exited.wait_for(|done| *done))
            .await
            .is_ok();
        if !stopped {
            warn!(pid, "session process ignored SIGTERM, sending SIGKILL");
            process::signal_group(pid, Signal::Kill);
            let _ = tokio::time::timeout(grace, exited.wait_for(|done| *done)).await;
        }
    }

    /// Reap the child on a blocking thread and tear the session down when it exits.
    fn watch_exit(
        self: &Arc<Self>,
        id: SessionId,
        mut child: Box<dyn Child + Send + Sync>,
    ) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        let manager = Arc::downgrade(self);
        let runtime = tokio::runtime::Handle::current();

        tokio::task::spawn_blocking(move || {
            match child.wait() {
                Ok(status) => debug!(session_id = %id, ?status, "session process reaped"),
                Err(e) => warn!(session_id = %id, "failed to wait for session process: {}", e),
            }
            tx.send_replace(true);
            if let Some(manager) = manager.upgrade() {
                runtime.spawn(async move { manager.on_process_exit(id).await });
            }
        });

        rx
    }

    fn prepare_working_dir(&self, requested: Option<&Path>, id: SessionId) -> Result<PathBuf> {
        let dir = match requested {
            Some(dir) => dir.to_path_buf(),
            None => self.config.default_working_dir.join(id.to_string()),
        };

        match std::fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(RelayError::Spawn(format!(
                    "{} is not a directory",
                    dir.display()
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&dir).map_err(|e| {
                    RelayError::Spawn(format!("cannot create {}: {e}", dir.display()))
                })?;
            }
            Err(e) => {
                return Err(RelayError::Spawn(format!(
                    "cannot access {}: {e}",
                    dir.display()
                )))
            }
        }

        Ok(dir.canonicalize().unwrap_or(dir))
    }

    fn copy_templates(&self, working_dir: &Path) {
        let Some(template_dir) = self.config.template_dir.as_deref() else {
            debug!("copy_templates requested without a template_dir");
            return;
        };
        match copy_missing(template_dir, working_dir) {
            Ok(count) => debug!(count, "copied template files"),
            Err(e) => warn!(
                template_dir = %template_dir.display(),
                "template copy failed: {}", e
            ),
        }
    }
}

fn running(slot: &mut Option<LiveSession>) -> Result<&mut LiveSession> {
    slot.as_mut()
        .filter(|live| live.state.accepts_input())
        .ok_or(RelayError::NoSession)
}

/// Copy files from `src` into `dst` recursively, leaving existing files alone.
fn copy_missing(src: &Path, dst: &Path) -> io::Result<usize> {
    let mut copied = 0;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            std::fs::create_dir_all(&target)?;
            copied += copy_missing(&entry.path(), &target)?;
        } else if !target.exists() {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Single consumer of PTY output: viewers first, then detection.
async fn pump_output(
    id: SessionId,
    mut output: mpsc::Receiver<Bytes>,
    mut detector: PatternDetector,
    hub: Arc<ViewerHub>,
    detections: mpsc::UnboundedSender<SessionDetection>,
) {
    while let Some(chunk) = output.recv().await {
        hub.publish_data(chunk.clone());
        for event in detector.consume(&chunk) {
            trace!(session_id = %id, rule = event.rule, "detection");
            if detections
                .send(SessionDetection { session: id, event })
                .is_err()
            {
                trace!("no detection subscriber");
            }
        }
    }
    debug!(session_id = %id, "output pump finished");
}
