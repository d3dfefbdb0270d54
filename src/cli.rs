//! Command-line interface for steamshell.

use crate::apps::Credentials;
use crate::cache::CacheFlags;
use crate::session::SessionConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Drive steamcmd from scripts: typed queries, installs and updates.
#[derive(Debug, Parser)]
#[command(name = "steamshell", version, about)]
pub struct Cli {
    /// Path to the steamcmd executable.
    #[arg(long, env = "STEAMSHELL_STEAMCMD", default_value = "steamcmd")]
    pub steamcmd: PathBuf,

    /// Startup argument for steamcmd (repeatable). Replaces the default
    /// `+@ShutdownOnFailedCommand 0`.
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Account to log in as [default: the last user, else anonymous].
    #[arg(long, env = "STEAMSHELL_USER")]
    pub user: Option<String>,

    /// Account password.
    #[arg(long, env = "STEAMSHELL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Steam Guard / two-factor code.
    #[arg(long)]
    pub tfa: Option<String>,

    /// Seconds a command may go without output before giving up (0 waits
    /// forever).
    #[arg(long, value_name = "SECS", default_value = "300")]
    pub timeout: u64,

    /// Cache directory [default: user cache dir]/steamshell.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Neither read nor write the cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Stream session events to stderr as JSON lines.
    #[arg(long)]
    pub events: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Log in and report the result.
    Login,

    /// List installed apps.
    Installed {
        #[arg(long)]
        json: bool,
    },

    /// List app ids the account has licenses for.
    Licenses {
        #[arg(long)]
        json: bool,
    },

    /// Show an app's info tree.
    Info {
        app_id: u32,
        #[arg(long)]
        json: bool,
    },

    /// Show an app's install status.
    Status {
        app_id: u32,
        #[arg(long)]
        json: bool,
    },

    /// Print the names of the games among the given apps.
    Names {
        #[arg(required = true)]
        app_ids: Vec<u32>,
    },

    /// Install an app.
    Install {
        app_id: u32,
        /// Install under this directory instead of steamcmd's default.
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Update an installed app.
    Update {
        app_id: u32,
        /// Verify every installed file.
        #[arg(long)]
        validate: bool,
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Uninstall an app.
    Uninstall { app_id: u32 },

    /// Run a raw steamcmd command and print its output.
    Exec {
        /// The command line, e.g. `app_status 740`.
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Check the environment for common issues.
    Doctor,
}

impl CliCommand {
    /// Whether the command needs a logged-in session.
    #[must_use]
    pub const fn needs_login(&self) -> bool {
        !matches!(self, Self::Exec { .. } | Self::Doctor)
    }
}

impl Cli {
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig {
            program: self.steamcmd.clone(),
            command_timeout: (self.timeout > 0).then(|| Duration::from_secs(self.timeout)),
            ..SessionConfig::default()
        };
        if !self.args.is_empty() {
            config.args.clone_from(&self.args);
        }
        config
    }

    /// Explicit credentials, or `None` when no `--user` was given and the
    /// previous login should be resumed.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        let mut creds = Credentials::user(self.user.as_deref()?);
        creds.password.clone_from(&self.password);
        creds.tfa.clone_from(&self.tfa);
        Some(creds)
    }

    #[must_use]
    pub const fn cache_flags(&self) -> CacheFlags {
        if self.no_cache {
            CacheFlags::NONE
        } else {
            CacheFlags::ALL
        }
    }
}
