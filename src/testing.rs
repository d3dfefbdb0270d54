//! A scripted stand-in for steamcmd.
//!
//! Builds a POSIX `sh` script that behaves like the tool's REPL: a banner,
//! a `Steam>` prompt with no trailing newline, and canned responses per
//! command. Sessions run it over a real PTY, so tests exercise the same
//! paths as production.
//!
//! ```ignore
//! let fake = FakeSteamCmd::new()
//!     .respond("apps_installed", &[r#"AppID 740 : "CS Server" : /srv/cs"#])
//!     .install()?;
//! let session = fake.spawn()?;
//! let result = session.wait_for("apps_installed").await?;
//! ```

use crate::session::{Session, SessionConfig, SessionError};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

static SCRIPT_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Builder for a fake steamcmd script.
#[derive(Debug, Clone)]
pub struct FakeSteamCmd {
    banner: Vec<String>,
    arms: Vec<(String, String)>,
    quit: bool,
}

impl Default for FakeSteamCmd {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSteamCmd {
    #[must_use]
    pub fn new() -> Self {
        Self {
            banner: vec![
                "Redirecting stderr to '/tmp/steamcmd/logs/stderr.txt'".into(),
                "Loading Steam API...OK".into(),
            ],
            arms: Vec::new(),
            quit: true,
        }
    }

    /// Replace the startup banner.
    #[must_use]
    pub fn banner(mut self, lines: &[&str]) -> Self {
        self.banner = lines.iter().map(ToString::to_string).collect();
        self
    }

    /// Print `lines` when a command matches `pattern`. The pattern is the
    /// whole command line; a trailing `*` matches any suffix.
    #[must_use]
    pub fn respond(self, pattern: &str, lines: &[&str]) -> Self {
        let body = if lines.is_empty() {
            ":".to_string()
        } else {
            let args: Vec<String> = lines.iter().map(|l| sh_quote(l)).collect();
            format!("printf '%s\\n' {}", args.join(" "))
        };
        self.script(pattern, &body)
    }

    /// Run raw shell `body` when a command matches `pattern`. The command's
    /// words are available as `$1`, `$2`, ...
    #[must_use]
    pub fn script(mut self, pattern: &str, body: &str) -> Self {
        self.arms.push((case_pattern(pattern), body.to_string()));
        self
    }

    /// Make `quit` do nothing, so shutdown has to kill the process.
    #[must_use]
    pub const fn ignore_quit(mut self) -> Self {
        self.quit = false;
        self
    }

    /// The script text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("#!/bin/sh\n");
        for line in &self.banner {
            let _ = writeln!(out, "printf '%s\\n' {}", sh_quote(line));
        }
        out.push_str("printf 'Steam>'\n");
        out.push_str("while IFS= read -r line; do\n");
        out.push_str("  set -- $line\n");
        out.push_str("  case \"$line\" in\n");
        if self.quit {
            out.push_str("    quit) exit 0 ;;\n");
        } else {
            out.push_str("    quit) : ;;\n");
        }
        for (pattern, body) in &self.arms {
            let _ = writeln!(out, "    {pattern})\n      {body}\n      ;;");
        }
        out.push_str("    '') : ;;\n");
        out.push_str("    *) printf 'Command not found: %s\\n' \"$1\" ;;\n");
        out.push_str("  esac\n");
        out.push_str("  printf 'Steam>'\n");
        out.push_str("done\n");
        out
    }

    /// Write the script to a fresh temp file.
    pub fn install(&self) -> io::Result<FakeScript> {
        let id = SCRIPT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "steamshell-fake-{}-{id}.sh",
            std::process::id()
        ));
        fs::write(&path, self.render())?;
        set_executable(&path)?;
        Ok(FakeScript { path })
    }
}

fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

/// An installed fake script. Removed on drop.
#[derive(Debug)]
pub struct FakeScript {
    path: PathBuf,
}

impl FakeScript {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Session settings that run this script through `sh`, with short
    /// timeouts suited to tests.
    #[must_use]
    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            program: PathBuf::from("sh"),
            args: vec![self.path.to_string_lossy().into_owned()],
            command_timeout: Some(Duration::from_secs(10)),
            quit_grace: Duration::from_secs(1),
            ..SessionConfig::default()
        }
    }

    /// Start a session running this script.
    pub fn spawn(&self) -> Result<Session, SessionError> {
        Session::spawn(self.config())
    }
}

impl Drop for FakeScript {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Quote `s` for a POSIX shell.
#[must_use]
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn case_pattern(pattern: &str) -> String {
    match pattern.strip_suffix('*') {
        Some(prefix) => format!("{}*", sh_quote(prefix)),
        None => sh_quote(pattern),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sh_quote() {
        assert_eq!(sh_quote("plain"), "'plain'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_render_has_prompt_loop_and_arms() {
        let script = FakeSteamCmd::new()
            .respond("app_status 740", &[" - release state: Fully Installed"])
            .respond("app_update *", &["Success! App '740' fully installed."])
            .render();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("printf 'Steam>'"));
        assert!(script.contains("'app_status 740')"));
        assert!(script.contains("'app_update '*)"));
        assert!(script.contains("quit) exit 0 ;;"));
    }

    #[test]
    fn test_ignore_quit() {
        let script = FakeSteamCmd::new().ignore_quit().render();
        assert!(script.contains("quit) : ;;"));
    }

    #[test]
    fn test_installed_script_is_removed_on_drop() {
        let fake = FakeSteamCmd::new().install().unwrap();
        let path = fake.path().to_path_buf();
        assert!(path.is_file());
        drop(fake);
        assert!(!path.exists());
    }
}
