//! Records parsed out of steamcmd output.

use crate::kv::{KeyValueTree, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Outcome of a `login` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    Ok,
    Failed,
    InvalidPassword,
    TwoFactorRequired,
    WaitingGuardConfirm,
}

impl LoginStatus {
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::InvalidPassword => "invalid password",
            Self::TwoFactorRequired => "two-factor code required",
            Self::WaitingGuardConfirm => "waiting for Steam Guard confirmation",
        };
        f.write_str(s)
    }
}

/// Account credentials for `login`.
#[derive(Clone, Default)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
    /// Steam Guard / two-factor code.
    pub tfa: Option<String>,
}

impl Credentials {
    /// Anonymous login, enough for dedicated servers and other free tools.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::user("anonymous")
    }

    #[must_use]
    pub fn user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: None,
            tfa: None,
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_tfa(mut self, code: impl Into<String>) -> Self {
        self.tfa = Some(code.into());
        self
    }
}

// Keep secrets out of debug logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tfa", &self.tfa.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One entry from `apps_installed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub app_id: u32,
    pub name: String,
    pub path: PathBuf,
}

/// Parsed `app_info_print` output for a single app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_id: u32,
    /// The block under the app's quoted id.
    pub tree: KeyValueTree,
}

impl AppInfo {
    fn common(&self, key: &str) -> Option<&str> {
        self.tree.lookup(&["common", key]).and_then(Value::as_str)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.common("name")
    }

    /// `common/type`, e.g. "Game", "Tool", "DLC".
    #[must_use]
    pub fn app_type(&self) -> Option<&str> {
        self.common("type")
    }

    #[must_use]
    pub fn is_game(&self) -> bool {
        self.app_type().is_some_and(|t| t.eq_ignore_ascii_case("game"))
    }

    /// `config/installdir`, the folder name under `steamapps/common`.
    #[must_use]
    pub fn install_dir(&self) -> Option<&str> {
        self.tree.lookup(&["config", "installdir"]).and_then(Value::as_str)
    }
}

/// Parsed `app_status` output: the ` - key: value` lines, verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub app_id: u32,
    pub fields: BTreeMap<String, String>,
}

impl AppStatus {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// e.g. "Fully Installed", "Update Required".
    #[must_use]
    pub fn release_state(&self) -> Option<&str> {
        self.get("release state")
    }

    #[must_use]
    pub fn install_dir(&self) -> Option<&str> {
        self.get("install dir").map(|s| s.trim_matches('"'))
    }
}

/// Byte counts reported by `app_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallProgress {
    pub current: u64,
    pub total: u64,
}

impl InstallProgress {
    /// Percentage in `0.0..=100.0`; zero while the total is still unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // display only
    pub fn percent(self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.current as f64 * 100.0 / self.total as f64
        }
    }
}

/// Where steamcmd puts a game: `<base>/steamapps/common/<game_name>`.
#[must_use]
pub fn install_path(base: &Path, game_name: &str) -> PathBuf {
    base.join("steamapps").join("common").join(game_name)
}
