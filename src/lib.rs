//! steamshell — steamcmd over a PTY
//!
//! Runs Valve's steamcmd in a pseudo-terminal and turns its prompt-driven
//! REPL into queued, typed, async commands with progress events.

// Error documentation is deferred - the errors are self-explanatory from types
#![allow(clippy::missing_errors_doc)]

pub mod apps;
pub mod cache;
pub mod cli;
pub mod dialect;
pub mod events;
pub mod kv;
pub mod library;
pub mod pty;
pub mod session;
pub mod testing;

pub use apps::{AppInfo, AppStatus, Credentials, InstallProgress, InstalledApp, LoginStatus};
pub use cache::{Cache, CacheError, CacheFlags, JsonFileCache};
pub use cli::{Cli, CliCommand};
pub use dialect::{Dialect, LineKind, SteamCmd};
pub use events::SessionEvent;
pub use kv::{KeyValueTree, LoadError, ParseError, Value};
pub use library::{Library, LibraryError};
pub use session::{
    AbortReason, Command, CommandResult, Line, LineDemux, RequestId, Session, SessionConfig,
    SessionError, State, Stdin,
};
pub use testing::{FakeScript, FakeSteamCmd};
