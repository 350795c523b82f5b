//! # External Process Supervision
//!
//! Runs helper executables (downloader, metadata dump) as jobs:
//!
//! - stdout/stderr are streamed chunk by chunk as they arrive and appended to
//!   the job log in arrival order
//! - stderr chunks additionally raise an error notice, subject to the
//!   [`StderrPolicy`]
//! - the terminal [`JobOutcome`] is reported exactly once, after both streams
//!   have closed
//!
//! A job has two independent consumers: the raw event stream
//! ([`JobHandle::take_events`]) and the structured result
//! ([`JobHandle::wait`]). Dropping the handle never kills the process; use
//! [`JobHandle::cancel`] for that.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ProcessError, ProcessErrorKind};

const READ_CHUNK: usize = 4096;

// ============================================================================
// Job description
// ============================================================================

/// Which stderr chunks count as user-visible errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StderrPolicy {
    /// Every chunk raises an error notice
    #[default]
    ReportAll,
    /// Chunks made only of progress lines are logged but raise no notice
    ProgressAware,
}

impl StderrPolicy {
    pub fn should_report(self, chunk: &str) -> bool {
        match self {
            StderrPolicy::ReportAll => true,
            StderrPolicy::ProgressAware => !chunk
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .all(is_progress_line),
        }
    }
}

fn is_progress_line(line: &str) -> bool {
    if line.starts_with("[download]") || line.contains("ETA") {
        return true;
    }
    // "42.0%" style counters
    line.split_whitespace().any(|word| {
        word.strip_suffix('%')
            .map(|n| !n.is_empty() && n.parse::<f64>().is_ok())
            .unwrap_or(false)
    })
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
    pub stderr_policy: StderrPolicy,
    /// Message used when the process fails without a more specific reason
    pub failure_message: String,
}

impl JobSpec {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            timeout: None,
            stderr_policy: StderrPolicy::default(),
            failure_message: "process failed".to_string(),
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stderr_policy(mut self, policy: StderrPolicy) -> Self {
        self.stderr_policy = policy;
        self
    }

    pub fn failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = message.into();
        self
    }

    fn display_command(&self) -> String {
        self.command.display().to_string()
    }
}

// ============================================================================
// Job results
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded,
    /// Exited normally with a nonzero code
    Failed { code: i32 },
    /// Killed by a signal, or cancelled
    Crashed,
    /// Never ran to a normal exit: could not start, timed out, or lost
    SpawnError {
        kind: ProcessErrorKind,
        reason: String,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }

    pub fn into_result(self, command: &str) -> Result<(), ProcessError> {
        match self {
            JobOutcome::Succeeded => Ok(()),
            JobOutcome::Failed { code } => Err(ProcessError::NonZeroExit {
                command: command.to_string(),
                code,
            }),
            JobOutcome::Crashed => Err(ProcessError::Crashed {
                command: command.to_string(),
            }),
            JobOutcome::SpawnError { kind, reason } => Err(ProcessError::Spawn {
                command: command.to_string(),
                kind,
                reason,
            }),
        }
    }

    /// One user-facing line per outcome. Exit failures use `generic`.
    pub fn describe(&self, generic: &str) -> String {
        match self {
            JobOutcome::Succeeded => "finished".to_string(),
            JobOutcome::Failed { .. } | JobOutcome::Crashed => generic.to_string(),
            JobOutcome::SpawnError { kind, reason } => format!("{}: {}", kind, reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Stdout(String),
    Stderr(String),
    /// A stderr chunk (or stream failure) the user should see
    ErrorNotice(String),
    /// Always the last event of a job
    Exited(JobOutcome),
}

// ============================================================================
// Job handle
// ============================================================================

pub struct JobHandle {
    id: u64,
    command: String,
    args: Vec<String>,
    state: Arc<Mutex<JobState>>,
    log: Arc<Mutex<String>>,
    events: Option<mpsc::UnboundedReceiver<JobEvent>>,
    outcome_rx: Option<oneshot::Receiver<JobOutcome>>,
    outcome: Option<JobOutcome>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn state(&self) -> JobState {
        self.state.lock().clone()
    }

    /// Everything the process wrote so far, stdout and stderr interleaved in
    /// arrival order.
    pub fn log(&self) -> String {
        self.log.lock().clone()
    }

    /// Detach the raw event stream for a separate consumer (e.g. a log view).
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<JobEvent>> {
        self.events.take()
    }

    /// Next raw event, if the stream was not taken. `None` once the job
    /// finished and all events were read.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Wait for the terminal outcome. Repeated calls return the same outcome.
    pub async fn wait(&mut self) -> JobOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let outcome = match self.outcome_rx.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| JobOutcome::SpawnError {
                kind: ProcessErrorKind::Unknown,
                reason: "supervisor task ended without a result".to_string(),
            }),
            None => JobOutcome::SpawnError {
                kind: ProcessErrorKind::Unknown,
                reason: "job result already consumed".to_string(),
            },
        };
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Kill the process. The job then resolves as `Crashed`.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            tracing::info!("Cancelling job {} ({})", self.id, self.command);
            let _ = tx.send(());
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

pub struct ProcessSupervisor {
    runtime: Handle,
    next_id: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
        }
    }

    /// Supervisor on the ambient tokio runtime, if there is one.
    pub fn from_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Start a job. Never fails: a process that cannot start resolves to
    /// `JobOutcome::SpawnError` immediately.
    pub fn run(&self, spec: JobSpec) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(JobState::Running));
        let log = Arc::new(Mutex::new(String::new()));

        let handle = JobHandle {
            id,
            command: spec.display_command(),
            args: spec.args.clone(),
            state: state.clone(),
            log: log.clone(),
            events: Some(events_rx),
            outcome_rx: Some(outcome_rx),
            outcome: None,
            cancel_tx: Some(cancel_tx),
        };

        let sink = JobSink {
            id,
            command: spec.display_command(),
            failure_message: spec.failure_message.clone(),
            stderr_policy: spec.stderr_policy,
            state,
            log,
            events: events_tx,
        };

        let spawned = {
            let _guard = self.runtime.enter();
            Command::new(&spec.command)
                .args(&spec.args)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .spawn()
        };

        match spawned {
            Ok(child) => {
                tracing::info!(
                    "Job {} started: {} {}",
                    id,
                    spec.display_command(),
                    spec.args.join(" ")
                );
                let _task = self
                    .runtime
                    .spawn(supervise(child, sink, spec.timeout, cancel_rx, outcome_tx));
            }
            Err(e) => {
                tracing::warn!("Job {} could not start {}: {}", id, spec.display_command(), e);
                let outcome = JobOutcome::SpawnError {
                    kind: ProcessErrorKind::FailedToStart,
                    reason: e.to_string(),
                };
                sink.finish(outcome, outcome_tx);
            }
        }

        handle
    }
}

/// Producer side of one job.
struct JobSink {
    id: u64,
    command: String,
    failure_message: String,
    stderr_policy: StderrPolicy,
    state: Arc<Mutex<JobState>>,
    log: Arc<Mutex<String>>,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl JobSink {
    // Send failures mean the event consumer went away; the job keeps running.
    fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    fn stdout(&self, chunk: String) {
        self.log.lock().push_str(&chunk);
        self.emit(JobEvent::Stdout(chunk));
    }

    fn stderr(&self, chunk: String) {
        self.log.lock().push_str(&chunk);
        let report = self.stderr_policy.should_report(&chunk);
        if report {
            tracing::warn!("Job {} stderr: {}", self.id, chunk.trim_end());
        } else {
            tracing::debug!("Job {} progress: {}", self.id, chunk.trim_end());
        }
        self.emit(JobEvent::Stderr(chunk.clone()));
        if report {
            self.emit(JobEvent::ErrorNotice(chunk));
        }
    }

    fn stream_failed(&self, stream: &str, error: std::io::Error) {
        let notice = format!("{} ({}: {})", ProcessErrorKind::ReadError, stream, error);
        tracing::warn!("Job {}: {}", self.id, notice);
        self.emit(JobEvent::ErrorNotice(notice));
    }

    fn finish(self, outcome: JobOutcome, outcome_tx: oneshot::Sender<JobOutcome>) {
        let state = if outcome.is_success() {
            JobState::Succeeded
        } else {
            JobState::Failed(outcome.describe(&self.failure_message))
        };
        tracing::info!("Job {} ({}) finished: {:?}", self.id, self.command, outcome);
        *self.state.lock() = state;
        self.emit(JobEvent::Exited(outcome.clone()));
        let _ = outcome_tx.send(outcome);
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        None => Ok(0),
    }
}

/// Resolves to true on cancel; to false if the handle was dropped.
async fn cancelled(rx: &mut Option<oneshot::Receiver<()>>) -> bool {
    match rx {
        Some(r) => r.await.is_ok(),
        None => std::future::pending().await,
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}

/// Decodes one output stream chunk by chunk. A character split across two
/// reads is held back until its remaining bytes arrive.
#[derive(Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        Some(text).filter(|t| !t.is_empty())
    }

    /// End of stream: whatever is still held back is decoded lossily.
    fn finish(&mut self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text).filter(|t| !t.is_empty())
    }
}

enum Ending {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

async fn supervise(
    mut child: Child,
    sink: JobSink,
    timeout: Option<Duration>,
    cancel_rx: oneshot::Receiver<()>,
    outcome_tx: oneshot::Sender<JobOutcome>,
) {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = vec![0u8; READ_CHUNK];
    let mut err_buf = vec![0u8; READ_CHUNK];
    let mut out_text = Utf8Carry::default();
    let mut err_text = Utf8Carry::default();
    let mut cancel_rx = Some(cancel_rx);
    let timer = deadline(timeout);
    tokio::pin!(timer);

    let ending = loop {
        let out_open = stdout.is_some();
        let err_open = stderr.is_some();

        tokio::select! {
            read = read_chunk(&mut stdout, &mut out_buf), if out_open => match read {
                Ok(0) => stdout = None,
                Ok(n) => {
                    if let Some(text) = out_text.push(&out_buf[..n]) {
                        sink.stdout(text);
                    }
                }
                Err(e) => {
                    sink.stream_failed("stdout", e);
                    stdout = None;
                }
            },
            read = read_chunk(&mut stderr, &mut err_buf), if err_open => match read {
                Ok(0) => stderr = None,
                Ok(n) => {
                    if let Some(text) = err_text.push(&err_buf[..n]) {
                        sink.stderr(text);
                    }
                }
                Err(e) => {
                    sink.stream_failed("stderr", e);
                    stderr = None;
                }
            },
            status = child.wait(), if !out_open && !err_open => break Ending::Exited(status),
            cancel = cancelled(&mut cancel_rx) => {
                if cancel {
                    break Ending::Cancelled;
                }
                // Handle dropped: keep running to completion
                cancel_rx = None;
            },
            _ = &mut timer => break Ending::TimedOut(timeout.unwrap_or_default()),
        }
    };

    if let Some(text) = out_text.finish() {
        sink.stdout(text);
    }
    if let Some(text) = err_text.finish() {
        sink.stderr(text);
    }

    let outcome = match ending {
        Ending::Exited(Ok(status)) => match status.code() {
            Some(0) => JobOutcome::Succeeded,
            Some(code) => JobOutcome::Failed { code },
            None => JobOutcome::Crashed,
        },
        Ending::Exited(Err(e)) => JobOutcome::SpawnError {
            kind: ProcessErrorKind::Unknown,
            reason: e.to_string(),
        },
        Ending::Cancelled => {
            if let Err(e) = child.kill().await {
                tracing::warn!("Job {}: kill failed: {}", sink.id, e);
            }
            JobOutcome::Crashed
        }
        Ending::TimedOut(after) => {
            if let Err(e) = child.kill().await {
                tracing::warn!("Job {}: kill failed: {}", sink.id, e);
            }
            JobOutcome::SpawnError {
                kind: ProcessErrorKind::TimedOut,
                reason: format!("no exit after {:?}", after),
            }
        }
    };

    sink.finish(outcome, outcome_tx);
}

// ============================================================================
// Tests
// ============================================================================
