//! Command queue and session state machine.
//!
//! Pure bookkeeping: the reader task feeds it lines and submissions and
//! writes whatever it hands back to the tool. Nothing here touches the
//! process, so every transition can be exercised directly.

use super::command::{AbortReason, CommandResult, Reply, Ticket};
use super::demux::Line;
use crate::dialect::LineKind;
use crate::events::SessionEvent;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Waiting for the tool's first prompt.
    Boot,
    /// Idle at the prompt.
    PromptReady,
    /// One command in flight.
    Executing,
}

/// Queue + in-flight command. `current` is set exactly when the state is
/// `Executing`.
pub struct Machine {
    state: State,
    queue: VecDeque<Ticket>,
    current: Option<Ticket>,
    buffer: Vec<String>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Machine {
    #[must_use]
    pub const fn new(event_tx: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            state: State::Boot,
            queue: VecDeque::new(),
            current: None,
            buffer: Vec::new(),
            event_tx,
        }
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Commands waiting behind the one in flight.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Append a command. Returns the text to write if it can go out now.
    pub fn enqueue(&mut self, ticket: Ticket) -> Option<String> {
        self.queue.push_back(ticket);
        if let Some(ticket) = self.queue.back() {
            debug!(id = ticket.id, command = ticket.command.label(), queued = self.queued(), "Queued command");
        }
        if self.state == State::PromptReady {
            self.dispatch()
        } else {
            None
        }
    }

    /// Feed one demultiplexed line. Returns the text to write if a queued
    /// command was dispatched as a result.
    pub fn on_line(&mut self, line: &Line) -> Option<String> {
        match (self.state, line.kind) {
            (State::Boot, LineKind::Prompt) => {
                info!("Client ready");
                let _ = self.event_tx.send(SessionEvent::ClientReady);
                self.state = State::PromptReady;
                self.dispatch()
            }
            (State::PromptReady, LineKind::Prompt) => self.dispatch(),
            (State::Executing, LineKind::Prompt) => {
                self.finish();
                self.dispatch()
            }
            (State::Executing, _) => {
                self.record(line);
                None
            }
            (State::Boot | State::PromptReady, _) => {
                debug!(text = %line.text, "Output outside of a command");
                None
            }
        }
    }

    /// Drop every command that has not been sent yet.
    pub fn clear_queue(&mut self) -> usize {
        let count = self.queue.len();
        for ticket in self.queue.drain(..) {
            ticket.send(Reply::Aborted(AbortReason::Cleared));
        }
        if count > 0 {
            info!(count, "Cleared command queue");
        }
        count
    }

    /// Fail the in-flight command and everything queued; the process is gone.
    pub fn abort(&mut self, reason: AbortReason) {
        if let Some(ticket) = self.current.take() {
            ticket.send(Reply::Aborted(reason));
        }
        for ticket in self.queue.drain(..) {
            ticket.send(Reply::Aborted(reason));
        }
        self.buffer.clear();
        self.state = State::Boot;
    }

    /// Pop the next live ticket and mark it in flight.
    fn dispatch(&mut self) -> Option<String> {
        debug_assert!(self.current.is_none());
        while let Some(ticket) = self.queue.pop_front() {
            if ticket.is_abandoned() {
                debug!(id = ticket.id, command = ticket.command.label(), "Skipping abandoned command");
                continue;
            }
            info!(id = ticket.id, command = ticket.command.label(), "Dispatching command");
            let wire = ticket.command.wire().to_string();
            ticket.send(Reply::Dispatched);
            self.buffer.clear();
            self.current = Some(ticket);
            self.state = State::Executing;
            return Some(wire);
        }
        None
    }

    fn record(&mut self, line: &Line) {
        let Some(ticket) = &self.current else {
            return;
        };
        trace!(id = ticket.id, text = %line.text, "Command output");
        self.buffer.push(line.text.clone());
        ticket.send(Reply::Output(line.clone()));
        let _ = self.event_tx.send(SessionEvent::CommandOutput {
            id: ticket.id,
            command: ticket.command.label().to_string(),
            line: Some(line.text.clone()),
            finished: false,
        });
    }

    fn finish(&mut self) {
        self.state = State::PromptReady;
        let Some(ticket) = self.current.take() else {
            return;
        };
        let lines = std::mem::take(&mut self.buffer);
        debug!(id = ticket.id, command = ticket.command.label(), lines = lines.len(), "Command finished");
        let _ = self.event_tx.send(SessionEvent::CommandOutput {
            id: ticket.id,
            command: ticket.command.label().to_string(),
            line: None,
            finished: true,
        });
        ticket.send(Reply::Done(CommandResult {
            id: ticket.id,
            command: ticket.command.label().to_string(),
            lines,
        }));
    }
}
