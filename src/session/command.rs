//! Commands, their results, and the bookkeeping that routes output back to
//! the caller that queued them.

use super::demux::Line;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Identifier assigned when a command is queued. Strictly increasing per
/// session, so two commands with identical text are still told apart.
pub type RequestId = u64;

/// A line of input for the tool.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    label: String,
}

impl Command {
    /// A command whose text is safe to log.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = normalize(text.into());
        let label = text.trim_end().to_string();
        Self { text, label }
    }

    /// A command carrying secrets; only `label` is ever logged or published.
    #[must_use]
    pub fn secret(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: normalize(text.into()),
            label: label.into(),
        }
    }

    /// The exact bytes written to the tool, newline-terminated.
    #[must_use]
    pub fn wire(&self) -> &str {
        &self.text
    }

    /// Loggable form of the command.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

fn normalize(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Command").field(&self.label).finish()
    }
}

/// Everything the tool printed between receiving a command and its next
/// prompt, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: RequestId,
    pub command: String,
    pub lines: Vec<String>,
}

/// Why a command never completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Removed from the queue before it was sent.
    Cleared,
    /// The tool process exited.
    ProcessExited { code: Option<i32> },
    /// The session is shutting down.
    Shutdown,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cleared => f.write_str("removed from the queue"),
            Self::ProcessExited { code: Some(code) } => write!(f, "process exited with code {code}"),
            Self::ProcessExited { code: None } => f.write_str("process exited"),
            Self::Shutdown => f.write_str("session shut down"),
        }
    }
}

/// Messages sent back to the caller that owns a ticket.
#[derive(Debug)]
pub enum Reply {
    /// The command left the queue and was written to the tool.
    Dispatched,
    /// A new line of output while the command runs.
    Output(Line),
    /// The tool is back at its prompt.
    Done(CommandResult),
    Aborted(AbortReason),
}

/// A queued command plus the channel its output is routed to.
#[derive(Debug)]
pub struct Ticket {
    pub id: RequestId,
    pub command: Command,
    pub reply: mpsc::UnboundedSender<Reply>,
}

impl Ticket {
    /// The caller stopped listening (timed out or dropped its future).
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    pub(crate) fn send(&self, reply: Reply) {
        // The caller may be gone; nothing to route to then.
        let _ = self.reply.send(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_is_newline_terminated() {
        let cmd = Command::new("apps_installed");
        assert_eq!(cmd.wire(), "apps_installed\n");
        assert_eq!(cmd.label(), "apps_installed");
        assert_eq!(Command::new("quit\n").wire(), "quit\n");
    }

    #[test]
    fn test_secret_command_hides_text() {
        let cmd = Command::secret("login gaben hunter2", "login gaben");
        assert_eq!(cmd.wire(), "login gaben hunter2\n");
        assert!(!format!("{cmd:?}").contains("hunter2"));
    }
}
