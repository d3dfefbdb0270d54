//! The steamcmd session.
//!
//! Owns the tool process, its PTY, the line demultiplexer and the command
//! state machine inside one reader task. Everything else talks to that task
//! through a [`Session`] handle: commands go in over a channel, output comes
//! back on a per-command channel keyed by request id.

// The reader loop is long but reads top to bottom
#![allow(clippy::too_many_lines)]

mod command;
mod demux;
mod machine;

pub use command::{AbortReason, Command, CommandResult, RequestId};
pub use demux::{Line, LineDemux};
pub use machine::{Machine, State};

use crate::dialect::{Dialect, SteamCmd};
use crate::events::SessionEvent;
use crate::pty::{self, PtyError, PtyProcess, SpawnOptions};
use command::{Reply, Ticket};
use nix::sys::signal::Signal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Errors that can occur in a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: PtyError,
    },

    #[error("command `{command}` produced no output for {idle:?}")]
    CommandTimeout { command: String, idle: Duration },

    #[error("command `{command}` aborted: {reason}")]
    Aborted { command: String, reason: AbortReason },

    #[error("session is closed")]
    Closed,
}

/// How to start and drive the tool.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Path or name of the steamcmd executable.
    pub program: PathBuf,
    /// Arguments passed on startup.
    pub args: Vec<String>,
    /// Extra environment variables for the tool.
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
    /// How often the PTY is polled for output.
    pub poll_interval: Duration,
    /// Longest a sent command may go without printing anything. Time spent
    /// in the queue is not counted. `None` waits forever.
    pub command_timeout: Option<Duration>,
    /// How long `quit` gets before the process is killed.
    pub quit_grace: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl SessionConfig {
    /// Keep the tool alive when a command fails.
    pub const DEFAULT_ARGS: [&'static str; 2] = ["+@ShutdownOnFailedCommand", "0"];
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("steamcmd"),
            args: Self::DEFAULT_ARGS.iter().map(ToString::to_string).collect(),
            env: Vec::new(),
            rows: 24,
            cols: 200,
            poll_interval: Duration::from_millis(10),
            command_timeout: Some(Duration::from_secs(300)),
            quit_grace: Duration::from_secs(5),
            event_capacity: 1024,
        }
    }
}

enum Input {
    Submit(Ticket),
    /// Written straight to the tool, bypassing the queue.
    Raw(String),
    ClearQueue(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<Option<i32>>),
}

/// Handle to a running session. Cheap to clone; all clones drive the same
/// process.
#[derive(Clone)]
pub struct Session {
    input_tx: mpsc::UnboundedSender<Input>,
    event_tx: broadcast::Sender<SessionEvent>,
    state_rx: watch::Receiver<State>,
    next_id: Arc<AtomicU64>,
    dialect: Arc<dyn Dialect>,
    command_timeout: Option<Duration>,
}

/// Writes to the tool's stdin from inside a [`Session::follow`] callback,
/// e.g. to answer a password prompt.
pub struct Stdin {
    input_tx: mpsc::UnboundedSender<Input>,
}

impl Stdin {
    /// Send a line of input (newline appended) without queueing it.
    pub fn send_line(&self, text: &str) {
        let _ = self.input_tx.send(Input::Raw(format!("{text}\n")));
    }
}

impl Session {
    /// Spawn steamcmd and start reading its output.
    pub fn spawn(config: SessionConfig) -> Result<Self, SessionError> {
        Self::spawn_with_dialect(config, Arc::new(SteamCmd))
    }

    /// Spawn a tool that speaks the given dialect.
    pub fn spawn_with_dialect(
        config: SessionConfig,
        dialect: Arc<dyn Dialect>,
    ) -> Result<Self, SessionError> {
        let program = config.program.to_string_lossy().into_owned();
        let mut cmd = vec![program.clone()];
        cmd.extend(config.args.iter().cloned());

        let opts = SpawnOptions {
            vars: config.env.clone(),
            rows: config.rows,
            cols: config.cols,
            echo: false,
        };
        let pty = pty::spawn(&cmd, &opts).map_err(|source| SessionError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = pty.pid();
        info!(%program, %pid, "Spawned tool");

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(State::Boot);

        let reader = Reader {
            pid,
            pty,
            demux: LineDemux::new(Arc::clone(&dialect)),
            machine: Machine::new(event_tx.clone()),
            input_rx,
            state_tx,
            event_tx: event_tx.clone(),
            poll_interval: config.poll_interval,
            quit_grace: config.quit_grace,
        };
        tokio::spawn(reader.run());

        Ok(Self {
            input_tx,
            event_tx,
            state_rx,
            next_id: Arc::new(AtomicU64::new(1)),
            dialect,
            command_timeout: config.command_timeout,
        })
    }

    /// The output rules this session was started with.
    #[must_use]
    pub fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.dialect)
    }

    /// Current state of the state machine.
    #[must_use]
    pub fn state(&self) -> State {
        *self.state_rx.borrow()
    }

    /// Wait until the tool has printed its first prompt.
    pub async fn ready(&self) -> Result<(), SessionError> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|s| *s != State::Boot)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::Closed)
    }

    /// Subscribe to session events. Only events sent after this call are
    /// received, so subscribe right after [`Session::spawn`] to catch
    /// `BootstrapFinished`.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Publish an event on this session's channel.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Send a command and return all of its output once the tool is back at
    /// its prompt.
    pub async fn wait_for(&self, command: impl Into<Command>) -> Result<CommandResult, SessionError> {
        self.follow(command, |_, _| {}).await
    }

    /// Send a command and call `on_progress` with each new batch of output
    /// lines as it arrives. The last call happens when the command finishes
    /// (its batch may be empty). `Stdin` answers interactive prompts.
    pub async fn follow<F>(
        &self,
        command: impl Into<Command>,
        mut on_progress: F,
    ) -> Result<CommandResult, SessionError>
    where
        F: FnMut(&[Line], &Stdin),
    {
        let command = command.into();
        let label = command.label().to_string();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.input_tx
            .send(Input::Submit(Ticket {
                id,
                command,
                reply: reply_tx,
            }))
            .map_err(|_| SessionError::Closed)?;

        let stdin = Stdin {
            input_tx: self.input_tx.clone(),
        };

        // The idle timer only runs once the command has been written; time
        // spent queued behind other commands or during boot does not count.
        let mut dispatched = false;
        loop {
            let first = match self.command_timeout {
                Some(idle) if dispatched => timeout(idle, reply_rx.recv()).await.map_err(|_| {
                    warn!(id, command = %label, ?idle, "Command timed out");
                    SessionError::CommandTimeout {
                        command: label.clone(),
                        idle,
                    }
                })?,
                _ => reply_rx.recv().await,
            };

            let mut batch = Vec::new();
            let mut next = first;
            loop {
                match next {
                    None => return Err(SessionError::Closed),
                    Some(Reply::Dispatched) => dispatched = true,
                    Some(Reply::Output(line)) => batch.push(line),
                    Some(Reply::Done(result)) => {
                        on_progress(&batch, &stdin);
                        return Ok(result);
                    }
                    Some(Reply::Aborted(reason)) => {
                        return Err(SessionError::Aborted {
                            command: label,
                            reason,
                        });
                    }
                }
                match reply_rx.try_recv() {
                    Ok(reply) => next = Some(reply),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => next = None,
                }
            }
            if !batch.is_empty() {
                on_progress(&batch, &stdin);
            }
        }
    }

    /// Drop queued commands that have not been sent yet. The command in
    /// flight is unaffected.
    pub async fn clear_queue(&self) -> Result<usize, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.input_tx
            .send(Input::ClearQueue(tx))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Ask the tool to quit, kill it if it lingers, and return its exit code.
    pub async fn shutdown(&self) -> Result<Option<i32>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.input_tx
            .send(Input::Shutdown(tx))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// The task that owns the process. Only this task mutates the queue, the
/// state and the output buffer.
struct Reader {
    pid: u32,
    pty: PtyProcess,
    demux: LineDemux,
    machine: Machine,
    input_rx: mpsc::UnboundedReceiver<Input>,
    state_tx: watch::Sender<State>,
    event_tx: broadcast::Sender<SessionEvent>,
    poll_interval: Duration,
    quit_grace: Duration,
}

/// What a poll of the PTY found.
enum Poll {
    Open,
    Exited(Option<i32>),
}

impl Reader {
    async fn run(mut self) {
        let _ = self
            .event_tx
            .send(SessionEvent::BootstrapFinished { pid: self.pid });
        let mut poll = interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                input = self.input_rx.recv() => match input {
                    Some(Input::Submit(ticket)) => {
                        if let Some(wire) = self.machine.enqueue(ticket) {
                            self.write(&wire).await;
                        }
                    }
                    Some(Input::Raw(text)) => self.write(&text).await,
                    Some(Input::ClearQueue(done)) => {
                        let _ = done.send(self.machine.clear_queue());
                    }
                    Some(Input::Shutdown(done)) => {
                        let code = self.quit().await;
                        let _ = done.send(code);
                        return;
                    }
                    None => {
                        debug!("All session handles dropped");
                        self.quit().await;
                        return;
                    }
                },
                _ = poll.tick() => {
                    if let Poll::Exited(code) = self.pump().await {
                        self.exited(code);
                        return;
                    }
                }
            }
            self.state_tx.send_replace(self.machine.state());
        }
    }

    /// Drain whatever the PTY has and feed it through the demux and machine.
    async fn pump(&mut self) -> Poll {
        if self.drain().await.is_err() {
            // Slave side closed: the child is gone or going.
            return Poll::Exited(self.reap().await);
        }

        match self.pty.try_wait() {
            Ok(Some(code)) => {
                // The child may have written its last lines after the drain
                // above and then exited.
                let _ = self.drain().await;
                Poll::Exited(Some(code))
            }
            Ok(None) => Poll::Open,
            Err(e) => {
                warn!(%e, "Failed to poll tool process");
                Poll::Exited(None)
            }
        }
    }

    /// Read until the PTY has nothing buffered. `Err` means the slave side
    /// is closed.
    async fn drain(&mut self) -> Result<(), nix::Error> {
        let mut buf = [0u8; 4096];
        loop {
            match self.pty.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    for line in self.demux.push(&buf[..n]) {
                        if let Some(wire) = self.machine.on_line(&line) {
                            self.write(&wire).await;
                        }
                    }
                }
                Err(nix::Error::EAGAIN | nix::Error::EINTR) => return Ok(()),
                Err(e @ nix::Error::EIO) => return Err(e),
                Err(e) => {
                    warn!(%e, "PTY read error");
                    return Ok(());
                }
            }
        }
    }

    /// Write all of `text`, retrying while the PTY buffer is full.
    async fn write(&self, text: &str) {
        let mut data = text.as_bytes();
        while !data.is_empty() {
            match self.pty.write(data) {
                Ok(n) => data = &data[n..],
                Err(nix::Error::EAGAIN | nix::Error::EINTR) => sleep(Duration::from_millis(1)).await,
                Err(e) => {
                    error!(%e, "Failed to write to tool");
                    return;
                }
            }
        }
    }

    /// Collect the exit code of a child whose PTY has closed.
    async fn reap(&self) -> Option<i32> {
        let deadline = Instant::now() + self.quit_grace;
        loop {
            match self.pty.try_wait() {
                Ok(Some(code)) => return Some(code),
                Ok(None) if Instant::now() < deadline => sleep(self.poll_interval).await,
                Ok(None) | Err(_) => return None,
            }
        }
    }

    fn exited(&mut self, code: Option<i32>) {
        info!(?code, "Tool exited");
        let pending = self.demux.pending();
        if !pending.is_empty() {
            debug!(text = %String::from_utf8_lossy(pending), "Dropping unterminated output");
        }
        self.machine.abort(AbortReason::ProcessExited { code });
        self.state_tx.send_replace(self.machine.state());
        let _ = self.event_tx.send(SessionEvent::ProcessExited { exit_code: code });
    }

    /// Send `quit`, give the tool `quit_grace` to leave, then kill it.
    async fn quit(&mut self) -> Option<i32> {
        info!("Shutting down tool");
        self.machine.abort(AbortReason::Shutdown);
        self.write("quit\n").await;

        let deadline = Instant::now() + self.quit_grace;
        let mut buf = [0u8; 4096];
        let code = loop {
            // Keep the PTY drained so the tool never blocks on output.
            while matches!(self.pty.read(&mut buf), Ok(n) if n > 0) {}
            match self.pty.try_wait() {
                Ok(Some(code)) => break Some(code),
                Ok(None) if Instant::now() < deadline => sleep(self.poll_interval).await,
                Ok(None) => {
                    warn!("Tool ignored quit, killing it");
                    if let Err(e) = self.pty.signal(Signal::SIGKILL) {
                        warn!(%e, "Failed to kill tool");
                    }
                    break self.reap().await;
                }
                Err(e) => {
                    warn!(%e, "Failed to poll tool process");
                    break None;
                }
            }
        };

        self.state_tx.send_replace(self.machine.state());
        let _ = self.event_tx.send(SessionEvent::ProcessExited { exit_code: code });
        code
    }
}
