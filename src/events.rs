//! Session lifecycle events.
//!
//! Published on a broadcast channel (see `Session::subscribe`) so a host
//! can react to progress without holding on to the futures that caused it.

use crate::apps::LoginStatus;
use crate::session::RequestId;
use serde::{Deserialize, Serialize};

/// Events streamed from a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The tool process was spawned and its output is being read.
    BootstrapFinished {
        /// Process ID of the tool.
        pid: u32,
    },
    /// The tool printed its first prompt.
    ClientReady,
    /// Output of the command in flight. `finished` is set once, with no
    /// line, when the tool returns to its prompt.
    CommandOutput {
        id: RequestId,
        /// Loggable label of the command.
        command: String,
        line: Option<String>,
        finished: bool,
    },
    LoggedIn {
        status: LoginStatus,
    },
    AppInstalled {
        app_id: u32,
        success: bool,
    },
    AppUpdated {
        app_id: u32,
        success: bool,
    },
    AppUninstalled {
        app_id: u32,
        success: bool,
    },
    InstallProgressed {
        app_id: u32,
        current: u64,
        total: u64,
    },
    /// The tool process is gone.
    ProcessExited {
        exit_code: Option<i32>,
    },
}
