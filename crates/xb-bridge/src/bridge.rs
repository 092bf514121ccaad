//! The stdio command bridge.
//!
//! One reader task parses input lines and dispatches them; each command
//! runs in its own task (or inline, in sequential mode); a single writer
//! task owns the output stream and receives finished lines over a channel,
//! so results never interleave. Every parsed command produces exactly one
//! result line carrying the command's id.

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use xb_core::config::{BridgeConfig, DispatchMode};

use crate::action_registry::{ActionArgs, ActionContext, ActionRegistry};
use crate::error::{ActionError, ErrorKind};
use crate::protocol::{parse_command, Command, CommandResult, READY_LINE};
use crate::shutdown::ShutdownSignal;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Starting,
    Ready,
    Serving,
    Draining,
    Stopped,
    /// Startup failed; nothing was served.
    Failed,
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::Starting => write!(f, "starting"),
            BridgeState::Ready => write!(f, "ready"),
            BridgeState::Serving => write!(f, "serving"),
            BridgeState::Draining => write!(f, "draining"),
            BridgeState::Stopped => write!(f, "stopped"),
            BridgeState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("output closed before the bridge was ready")]
    OutputClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// What a finished run did, for the exit log line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeReport {
    /// Non-blank input lines, including unparseable ones.
    pub lines: u64,
    /// Commands still running at the drain deadline.
    pub aborted: usize,
}

// ---------------------------------------------------------------------------
// Line reading
// ---------------------------------------------------------------------------

enum Line {
    Text(Vec<u8>),
    Oversize,
}

/// Read up to the next `\n`, keeping at most `limit` bytes.
///
/// A longer line is consumed in full and reported as [`Line::Oversize`] so
/// the stream stays aligned on line boundaries. `None` means end of input.
async fn next_line<R>(reader: &mut R, limit: usize) -> io::Result<Option<Line>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut oversize = false;
    let mut read_any = false;

    loop {
        let (done, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                if !read_any {
                    return Ok(None);
                }
                break;
            }
            read_any = true;
            let (chunk, done, used) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (&available[..i], true, i + 1),
                None => (available, false, available.len()),
            };
            if !oversize {
                if buf.len() + chunk.len() > limit {
                    oversize = true;
                    buf = Vec::new();
                } else {
                    buf.extend_from_slice(chunk);
                }
            }
            (done, used)
        };
        reader.consume(used);
        if done {
            break;
        }
    }

    if oversize {
        return Ok(Some(Line::Oversize));
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Some(Line::Text(buf)))
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

async fn write_lines<W>(mut output: W, lines: flume::Receiver<String>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Ok(line) = lines.recv_async().await {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    output.shutdown().await
}

/// Emit the single failure line used when startup fails before serving.
pub async fn write_startup_failure<W>(output: &mut W, message: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = CommandResult::failure(Value::Null, message).to_line();
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one command to a result. Handler panics are caught here and become a
/// failed result for the same id.
async fn execute(registry: Arc<ActionRegistry>, ctx: ActionContext, command: Command) -> CommandResult {
    let Command { id, action, args } = command;
    let outcome = AssertUnwindSafe(registry.dispatch(&action, ctx, ActionArgs::new(args)))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(data)) => {
            debug!("command succeeded");
            CommandResult::success(id, data)
        }
        Ok(Err(err)) => {
            match err.kind() {
                ErrorKind::Validation | ErrorKind::Protocol => debug!(error = %err, "command rejected"),
                ErrorKind::Signing | ErrorKind::Upstream => warn!(error = %err, "command failed"),
                ErrorKind::Internal => error!(error = %err, "command failed"),
            }
            CommandResult::failure(id, err.to_string())
        }
        Err(payload) => {
            let err = ActionError::Panicked(panic_message(payload.as_ref()));
            error!(error = %err, "handler panicked");
            CommandResult::failure(id, err.to_string())
        }
    }
}

/// The one result line owed for a parsed command.
///
/// If the command's future is dropped before [`send`](Self::send) runs
/// (aborted at the drain deadline, or never started because shutdown won
/// the race for a dispatch slot), the guard answers with
/// [`ActionError::Aborted`] on drop.
struct ResultGuard {
    id: Option<Value>,
    out: flume::Sender<String>,
}

impl ResultGuard {
    fn new(id: Value, out: flume::Sender<String>) -> Self {
        Self { id: Some(id), out }
    }

    fn send(mut self, result: CommandResult) {
        self.id = None;
        let _ = self.out.send(result.to_line());
    }
}

impl Drop for ResultGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            warn!(%id, "command dropped before completion");
            let line = CommandResult::failure(id, ActionError::Aborted.to_string()).to_line();
            let _ = self.out.send(line);
        }
    }
}

// ---------------------------------------------------------------------------
// CommandBridge
// ---------------------------------------------------------------------------

/// Serves the line protocol over any async reader/writer pair.
pub struct CommandBridge {
    registry: Arc<ActionRegistry>,
    context: ActionContext,
    config: BridgeConfig,
    shutdown: ShutdownSignal,
    state: watch::Sender<BridgeState>,
}

impl CommandBridge {
    pub fn new(registry: ActionRegistry, context: ActionContext, config: BridgeConfig) -> Self {
        let (state, _) = watch::channel(BridgeState::Starting);
        Self {
            registry: Arc::new(registry),
            context,
            config,
            shutdown: ShutdownSignal::new(),
            state,
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: BridgeState) {
        let prev = self.state.send_replace(next);
        debug!(from = %prev, to = %next, "bridge state");
    }

    /// Serve until end of input, an input error or shutdown, then drain.
    pub async fn run<R, W>(&self, mut input: R, output: W) -> Result<BridgeReport, BridgeError>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = flume::unbounded::<String>();
        let writer = tokio::spawn(write_lines(output, rx));

        if tx.send(READY_LINE.to_string()).is_err() {
            self.set_state(BridgeState::Failed);
            return Err(BridgeError::OutputClosed);
        }
        self.set_state(BridgeState::Ready);
        info!(
            actions = self.registry.count(),
            dispatch = ?self.config.dispatch,
            max_in_flight = self.config.max_in_flight,
            "bridge ready"
        );
        self.set_state(BridgeState::Serving);

        // Sequential mode is a single slot: the next command starts only
        // after the previous one has written its result.
        let limit = match self.config.dispatch {
            DispatchMode::Sequential => 1,
            DispatchMode::Concurrent => self.config.max_in_flight.max(1),
        };
        let permits = Arc::new(Semaphore::new(limit));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut report = BridgeReport::default();

        loop {
            let read = tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    info!("shutdown requested, no further input accepted");
                    break;
                }
                read = next_line(&mut input, self.config.max_line_bytes) => read,
            };

            let line = match read {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "input error");
                    break;
                }
            };

            // Reap finished tasks so the set does not grow with history.
            while let Some(joined) = tasks.try_join_next() {
                log_join_error(joined);
            }

            let text = match line {
                Line::Text(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        report.lines += 1;
                        self.reject(&tx, Value::Null, ActionError::InvalidCommand);
                        continue;
                    }
                },
                Line::Oversize => {
                    report.lines += 1;
                    warn!(limit = self.config.max_line_bytes, "oversize input line discarded");
                    self.reject(&tx, Value::Null, ActionError::InvalidCommand);
                    continue;
                }
            };

            if text.trim().is_empty() {
                continue;
            }
            report.lines += 1;

            let command = match parse_command(&text) {
                Ok(command) => command,
                Err((id, err)) => {
                    self.reject(&tx, id, err);
                    continue;
                }
            };

            let span = info_span!("command", action = %command.action, dispatch_id = %Uuid::new_v4());
            let registry = self.registry.clone();
            let ctx = self.context.clone();
            let answer = ResultGuard::new(command.id.clone(), tx.clone());
            let job = async move {
                let result = execute(registry, ctx, command).await;
                answer.send(result);
            }
            .instrument(span);

            // Acquired before spawning, so at most `limit` commands exist at
            // once and reading pauses at the cap. Shutdown still wins; the
            // dropped job answers for its id.
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    info!("shutdown requested while waiting for a dispatch slot");
                    break;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            tasks.spawn(async move {
                let _permit = permit;
                job.await;
            });

            if writer.is_finished() {
                warn!("output closed, stopping");
                break;
            }
        }

        self.set_state(BridgeState::Draining);
        report.aborted = self.drain(&mut tasks).await;

        drop(tx);
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "output error"),
            Err(e) => error!(error = %e, "writer task failed"),
        }

        self.set_state(BridgeState::Stopped);
        info!(lines = report.lines, aborted = report.aborted, "bridge stopped");
        Ok(report)
    }

    fn reject(&self, tx: &flume::Sender<String>, id: Value, err: ActionError) {
        debug!(error = %err, "line rejected");
        let _ = tx.send(CommandResult::failure(id, err.to_string()).to_line());
    }

    /// Wait up to the drain timeout for in-flight commands, then abort the
    /// rest. Returns how many were aborted. Each aborted command still gets
    /// its failure line from its [`ResultGuard`].
    async fn drain(&self, tasks: &mut JoinSet<()>) -> usize {
        if tasks.is_empty() {
            return 0;
        }
        info!(in_flight = tasks.len(), "draining in-flight commands");

        let waited = tokio::time::timeout(self.config.drain_timeout(), async {
            while let Some(joined) = tasks.join_next().await {
                log_join_error(joined);
            }
        })
        .await;

        if waited.is_ok() {
            return 0;
        }

        let remaining = tasks.len();
        warn!(remaining, "drain timeout, aborting in-flight commands");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        remaining
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if !e.is_cancelled() {
            error!(error = %e, "command task failed");
        }
    }
}
