//! Text-scraping rules for the tool's human-oriented output.
//!
//! Everything that depends on the exact wording of steamcmd's output lives
//! behind [`Dialect`], so the session and library code never match on
//! literal strings themselves.

use crate::apps::{InstallProgress, InstalledApp, LoginStatus};
use crate::kv::{self, KeyValueTree, ParseError};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::LazyLock;

/// The REPL prompt printed when steamcmd is idle.
pub const PROMPT: &str = "Steam>";
/// Printed when steamcmd wants the account password on stdin.
pub const PASSWORD_PROMPT: &str = "password:";
/// Printed when steamcmd wants a Steam Guard / two-factor code on stdin.
pub const GUARD_PROMPTS: [&str; 2] = ["Steam Guard code:", "Two-factor code:"];
/// Marks a completed `app_update`.
pub const SUCCESS: &str = "Success! ";
/// `licenses_print` lines listing app ids start with this.
pub const LICENSE_APPS_PREFIX: &str = " - Apps";

/// Login markers, checked in order for every line. A later match (later
/// line, or later entry on the same line) replaces an earlier one.
pub const LOGIN_MARKERS: [(&str, LoginStatus); 7] = [
    ("Logged in OK", LoginStatus::Ok),
    ("Waiting for user info...OK", LoginStatus::Ok),
    ("FAILED", LoginStatus::Failed),
    ("Invalid Password", LoginStatus::InvalidPassword),
    ("Two-factor code mismatch", LoginStatus::TwoFactorRequired),
    ("need two-factor code", LoginStatus::TwoFactorRequired),
    ("Please confirm the login in the Steam Mobile app", LoginStatus::WaitingGuardConfirm),
];

static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+) / (\d+)\)").expect("progress pattern is valid"));

static INSTALLED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^AppID (\d+) : "(.*)" : (.*)$"#).expect("installed pattern is valid")
});

/// What a demultiplexed line means to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// The tool is idle and ready for the next command.
    Prompt,
    /// Ordinary command output.
    Output,
    /// The tool is waiting for a password.
    Password,
    /// The tool is waiting for a Steam Guard / two-factor code.
    GuardCode,
}

impl LineKind {
    /// Prompts that block the tool until something is written to stdin.
    #[must_use]
    pub const fn is_interactive(self) -> bool {
        matches!(self, Self::Password | Self::GuardCode)
    }
}

/// Output format of the external tool.
pub trait Dialect: Send + Sync + std::fmt::Debug {
    /// Literal prompt marker that starts an idle line.
    fn prompt(&self) -> &str;

    /// Classify a non-prompt line.
    fn classify(&self, line: &str) -> LineKind;

    /// Scan a login transcript. `None` if no marker appeared.
    fn login_status(&self, lines: &[String]) -> Option<LoginStatus>;

    /// Byte progress reported on an `app_update` line.
    fn progress(&self, line: &str) -> Option<InstallProgress>;

    /// Whether an `app_update` line reports success.
    fn is_success(&self, line: &str) -> bool;

    /// Parse `apps_installed`.
    fn installed_apps(&self, lines: &[String]) -> Vec<InstalledApp>;

    /// Parse `licenses_print` into app ids, de-duplicated in first-seen order.
    fn licensed_apps(&self, lines: &[String]) -> Vec<u32>;

    /// Extract and parse the KeyValueText document in `app_info_print`.
    /// `Ok(None)` when the output holds no document.
    fn app_info(&self, lines: &[String]) -> Result<Option<KeyValueTree>, ParseError>;

    /// Parse the ` - key: value` lines of `app_status`.
    fn app_status(&self, lines: &[String]) -> BTreeMap<String, String>;
}

/// The dialect spoken by Valve's steamcmd.
#[derive(Debug, Clone, Copy, Default)]
pub struct SteamCmd;

impl Dialect for SteamCmd {
    fn prompt(&self) -> &str {
        PROMPT
    }

    fn classify(&self, line: &str) -> LineKind {
        if line.contains(PASSWORD_PROMPT) {
            LineKind::Password
        } else if GUARD_PROMPTS.iter().any(|p| line.contains(p)) {
            LineKind::GuardCode
        } else {
            LineKind::Output
        }
    }

    fn login_status(&self, lines: &[String]) -> Option<LoginStatus> {
        let mut status = None;
        for line in lines {
            for (needle, marker) in LOGIN_MARKERS {
                if line.contains(needle) {
                    status = Some(marker);
                }
            }
        }
        status
    }

    fn progress(&self, line: &str) -> Option<InstallProgress> {
        let caps = PROGRESS_RE.captures(line)?;
        Some(InstallProgress {
            current: caps[1].parse().ok()?,
            total: caps[2].parse().ok()?,
        })
    }

    fn is_success(&self, line: &str) -> bool {
        line.contains(SUCCESS)
    }

    fn installed_apps(&self, lines: &[String]) -> Vec<InstalledApp> {
        lines
            .iter()
            .filter_map(|line| {
                let caps = INSTALLED_RE.captures(line.trim_start())?;
                Some(InstalledApp {
                    app_id: caps[1].parse().ok()?,
                    name: caps[2].to_string(),
                    path: PathBuf::from(caps[3].trim()),
                })
            })
            .collect()
    }

    fn licensed_apps(&self, lines: &[String]) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut apps = Vec::new();
        for line in lines {
            let Some(rest) = line.trim_start().strip_prefix(LICENSE_APPS_PREFIX.trim_start()) else {
                continue;
            };
            let rest = rest.trim_start().trim_start_matches(':');
            // Drop the "(N in total)" suffix.
            let list = rest.split_once('(').map_or(rest, |(list, _)| list);
            for id in list.split(',').filter_map(|s| s.trim().parse::<u32>().ok()) {
                if seen.insert(id) {
                    apps.push(id);
                }
            }
        }
        apps
    }

    fn app_info(&self, lines: &[String]) -> Result<Option<KeyValueTree>, ParseError> {
        let Some(start) = lines.iter().position(|l| is_bare_quoted(l.trim())) else {
            return Ok(None);
        };
        let end = lines[start + 1..]
            .iter()
            .position(|l| l.starts_with('}'))
            .map_or(lines.len(), |i| start + 1 + i + 1);
        let text = lines[start..end].join("\n");
        kv::parse(&text).map(Some)
    }

    fn app_status(&self, lines: &[String]) -> BTreeMap<String, String> {
        lines
            .iter()
            .filter_map(|line| {
                let rest = line.trim_start().strip_prefix("- ")?;
                let (key, value) = rest.split_once(':')?;
                Some((key.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

/// A line holding exactly one quoted token, e.g. `"740"`.
fn is_bare_quoted(line: &str) -> bool {
    line.len() >= 2
        && line.starts_with('"')
        && line.ends_with('"')
        && !line[1..line.len() - 1].contains('"')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_classify_interactive_prompts() {
        assert_eq!(SteamCmd.classify("password:"), LineKind::Password);
        assert_eq!(
            SteamCmd.classify("Please check your email for the message from Steam, and enter the Steam Guard code:"),
            LineKind::GuardCode
        );
        assert_eq!(SteamCmd.classify("Two-factor code:"), LineKind::GuardCode);
        assert_eq!(SteamCmd.classify("Loading Steam API...OK"), LineKind::Output);
    }

    #[test]
    fn test_login_last_marker_wins() {
        let out = lines(&["Logging in user 'gaben' to Steam Public...", "Invalid Password", "FAILED"]);
        assert_eq!(SteamCmd.login_status(&out), Some(LoginStatus::Failed));
    }

    #[test]
    fn test_login_later_table_entry_wins_within_line() {
        let out = lines(&["FAILED (Invalid Password)"]);
        assert_eq!(SteamCmd.login_status(&out), Some(LoginStatus::InvalidPassword));
    }

    #[test]
    fn test_login_ok_and_unknown() {
        let out = lines(&[
            "Logging in user 'anonymous' to Steam Public...OK",
            "Waiting for user info...OK",
        ]);
        assert_eq!(SteamCmd.login_status(&out), Some(LoginStatus::Ok));
        assert_eq!(SteamCmd.login_status(&lines(&["Connecting..."])), None);
    }

    #[test]
    fn test_progress_line() {
        let p = SteamCmd
            .progress("Update state (0x61) downloading, progress: 50.0 (500 / 1000)")
            .unwrap();
        assert_eq!(p, InstallProgress { current: 500, total: 1000 });
        assert!(SteamCmd.progress("Update state (0x3) reconfiguring").is_none());
    }

    #[test]
    fn test_success_marker() {
        assert!(SteamCmd.is_success("Success! App '740' fully installed."));
        assert!(!SteamCmd.is_success("Error! App '740' state is 0x202 after update job."));
    }

    #[test]
    fn test_installed_apps() {
        let out = lines(&[
            "2 apps installed:",
            r#"AppID 740 : "Counter-Strike Global Offensive - Dedicated Server" : /srv/steamapps/common/csgo_ds"#,
            r#"AppID 90 : "Half-Life Dedicated Server" : /srv/steamapps/common/Half-Life"#,
        ]);
        let apps = SteamCmd.installed_apps(&out);
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].app_id, 740);
        assert_eq!(apps[0].name, "Counter-Strike Global Offensive - Dedicated Server");
        assert_eq!(apps[1].path, PathBuf::from("/srv/steamapps/common/Half-Life"));
    }

    #[test]
    fn test_licensed_apps_dedup_first_seen() {
        let out = lines(&[
            "License packageID 0:",
            " - Apps : 10, 20,  (2 in total)",
            " - Depots : 11, 21,  (2 in total)",
            "License packageID 1:",
            " - Apps : 20, 30,  (2 in total)",
        ]);
        assert_eq!(SteamCmd.licensed_apps(&out), vec![10, 20, 30]);
    }

    #[test]
    fn test_licensed_apps_skips_garbage_ids() {
        let out = lines(&[" - Apps : 7, abc, , 9,  (3 in total)"]);
        assert_eq!(SteamCmd.licensed_apps(&out), vec![7, 9]);
    }

    #[test]
    fn test_app_info_extracts_document() {
        let out = lines(&[
            "AppID : 740, change number : 1/0, last change : Thu Jan  1 00:00:00 1970",
            "\"740\"",
            "{",
            "\t\"common\"",
            "\t{",
            "\t\t\"name\"\t\t\"CS Server\"",
            "\t}",
            "}",
            "trailing noise",
        ]);
        let tree = SteamCmd.app_info(&out).unwrap().unwrap();
        assert_eq!(
            tree.lookup(&["740", "common", "name"]).and_then(kv::Value::as_str),
            Some("CS Server")
        );
    }

    #[test]
    fn test_app_info_absent_and_malformed() {
        assert!(SteamCmd.app_info(&lines(&["No app info for AppID 1 found"])).unwrap().is_none());
        let broken = lines(&["\"1\"", "{", "\t\"common\""]);
        assert!(SteamCmd.app_info(&broken).is_err());
    }

    #[test]
    fn test_app_status_fields() {
        let out = lines(&[
            "AppID 740 (Counter-Strike Global Offensive - Dedicated Server):",
            " - release state: Fully Installed,",
            " - install dir: \"/srv/steamapps/common/csgo_ds\"",
            " - size on disk: 1234 bytes, BuildID 42",
        ]);
        let fields = SteamCmd.app_status(&out);
        assert_eq!(fields.get("release state").map(String::as_str), Some("Fully Installed,"));
        assert_eq!(fields.get("size on disk").map(String::as_str), Some("1234 bytes, BuildID 42"));
        assert_eq!(fields.len(), 3);
    }
}
