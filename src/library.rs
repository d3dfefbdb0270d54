//! Typed steamcmd operations.
//!
//! Each operation is one command (or a handful) run through the session,
//! with its output handed to the session's [`Dialect`](crate::dialect::Dialect)
//! to parse. Query results can be served from and stored in a [`Cache`].

use crate::apps::{self, AppInfo, AppStatus, Credentials, InstalledApp, LoginStatus};
use crate::cache::{Cache, CacheError, CacheFlags};
use crate::dialect::LineKind;
use crate::events::SessionEvent;
use crate::kv::ParseError;
use crate::session::{Command, Session, SessionError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const NS_CLIENT: &str = "client";
const NS_LIBRARY: &str = "library";
const NS_APP_INFO: &str = "app_info";
const NS_APP_STATUS: &str = "app_status";

/// Errors from library operations.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("login failed: {status}")]
    Login { status: LoginStatus },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("no previous login to resume")]
    NoLastUser,

    #[error("unreadable app info for {app_id}: {source}")]
    Parse {
        app_id: u32,
        #[source]
        source: ParseError,
    },
}

/// The game library as seen through one steamcmd session.
pub struct Library {
    session: Session,
    cache: Option<Arc<dyn Cache>>,
    logged_in: AtomicBool,
}

impl Library {
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            session,
            cache: None,
            logged_in: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Relaxed)
    }

    /// The user of the last successful login, if the cache remembers one.
    pub fn last_user(&self) -> Result<Option<String>, LibraryError> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        Ok(cache
            .get_json(NS_CLIENT, "lastuser")?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    /// Whether [`Library::relogin`] has a user to log back in as.
    pub fn relogin_available(&self) -> Result<bool, LibraryError> {
        Ok(self.last_user()?.is_some())
    }

    /// Log in again as the last user, without a password. steamcmd reuses
    /// the credentials it cached on the previous login.
    pub async fn relogin(&self) -> Result<(), LibraryError> {
        let user = self.last_user()?.ok_or(LibraryError::NoLastUser)?;
        debug!(%user, "Resuming previous login");
        self.login(&Credentials::user(user)).await
    }

    /// Log in, answering password and Steam Guard prompts from `creds`.
    ///
    /// A prompt `creds` has no answer for gets an empty line, which makes
    /// the tool give up; the attempt then fails with `Failed` (password) or
    /// `TwoFactorRequired` (code).
    pub async fn login(&self, creds: &Credentials) -> Result<(), LibraryError> {
        let mut text = format!("login {}", creds.user);
        if let Some(password) = &creds.password {
            text.push(' ');
            text.push_str(password);
            if let Some(tfa) = &creds.tfa {
                text.push(' ');
                text.push_str(tfa);
            }
        }
        let command = Command::secret(text, format!("login {}", creds.user));

        let mut forced = None;
        let mut password_sent = false;
        let mut tfa_sent = false;
        let result = self
            .session
            .follow(command, |lines, stdin| {
                for line in lines {
                    match line.kind {
                        LineKind::Password => {
                            match creds.password.as_deref().filter(|_| !password_sent) {
                                Some(password) => stdin.send_line(password),
                                None => {
                                    warn!(user = %creds.user, "Password requested but none available");
                                    stdin.send_line("");
                                    forced = Some(LoginStatus::Failed);
                                }
                            }
                            password_sent = true;
                        }
                        LineKind::GuardCode => {
                            match creds.tfa.as_deref().filter(|_| !tfa_sent) {
                                Some(code) => stdin.send_line(code),
                                None => {
                                    warn!(user = %creds.user, "Steam Guard code requested but none available");
                                    stdin.send_line("");
                                    forced = Some(LoginStatus::TwoFactorRequired);
                                }
                            }
                            tfa_sent = true;
                        }
                        LineKind::Prompt | LineKind::Output => {}
                    }
                }
            })
            .await?;

        let status = forced
            .or_else(|| self.session.dialect().login_status(&result.lines))
            .unwrap_or(LoginStatus::Failed);
        info!(user = %creds.user, %status, "Login finished");
        self.session.publish(SessionEvent::LoggedIn { status });

        if !status.is_ok() {
            self.logged_in.store(false, Ordering::Relaxed);
            return Err(LibraryError::Login { status });
        }
        self.logged_in.store(true, Ordering::Relaxed);
        if let Some(cache) = &self.cache {
            cache.save_json(NS_CLIENT, "lastuser", &serde_json::Value::from(creds.user.as_str()))?;
        }
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), LibraryError> {
        self.session.wait_for("logout").await?;
        self.logged_in.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Where subsequent installs go. Must be set before logging in.
    pub async fn set_install_dir(&self, path: &Path) -> Result<(), LibraryError> {
        self.session
            .wait_for(format!("force_install_dir \"{}\"", path.display()))
            .await?;
        Ok(())
    }

    /// Install an app. Returns whether the tool reported success.
    pub async fn install(&self, app_id: u32) -> Result<bool, LibraryError> {
        let success = self.app_update(app_id, false).await?;
        self.session
            .publish(SessionEvent::AppInstalled { app_id, success });
        Ok(success)
    }

    /// Update an app, optionally verifying every installed file.
    pub async fn update(&self, app_id: u32, validate: bool) -> Result<bool, LibraryError> {
        let success = self.app_update(app_id, validate).await?;
        self.session.publish(SessionEvent::AppUpdated { app_id, success });
        Ok(success)
    }

    async fn app_update(&self, app_id: u32, validate: bool) -> Result<bool, LibraryError> {
        let text = if validate {
            format!("app_update {app_id} validate")
        } else {
            format!("app_update {app_id}")
        };
        let dialect = self.session.dialect();
        let mut success = false;
        self.session
            .follow(text, |lines, _| {
                for line in lines {
                    if let Some(progress) = dialect.progress(&line.text) {
                        debug!(
                            app_id,
                            current = progress.current,
                            total = progress.total,
                            percent = progress.percent(),
                            "Install progress"
                        );
                        self.session.publish(SessionEvent::InstallProgressed {
                            app_id,
                            current: progress.current,
                            total: progress.total,
                        });
                    }
                    if dialect.is_success(&line.text) {
                        success = true;
                    }
                }
            })
            .await?;
        info!(app_id, success, "app_update finished");
        Ok(success)
    }

    /// Remove an app. The tool gives no failure signal, so this always
    /// reports success once the command completes.
    pub async fn uninstall(&self, app_id: u32) -> Result<(), LibraryError> {
        self.session
            .wait_for(format!("app_uninstall {app_id}"))
            .await?;
        info!(app_id, "Uninstalled");
        self.session.publish(SessionEvent::AppUninstalled {
            app_id,
            success: true,
        });
        Ok(())
    }

    pub async fn installed_apps(&self, flags: CacheFlags) -> Result<Vec<InstalledApp>, LibraryError> {
        if let Some(apps) = self.load(NS_LIBRARY, "installed", flags) {
            return Ok(apps);
        }
        let result = self.session.wait_for("apps_installed").await?;
        let apps = self.session.dialect().installed_apps(&result.lines);
        self.save(NS_LIBRARY, "installed", flags, &apps)?;
        Ok(apps)
    }

    /// App ids the logged in account has licenses for.
    pub async fn available_apps(&self, flags: CacheFlags) -> Result<Vec<u32>, LibraryError> {
        if let Some(apps) = self.load(NS_LIBRARY, "available", flags) {
            return Ok(apps);
        }
        let result = self.session.wait_for("licenses_print").await?;
        let apps = self.session.dialect().licensed_apps(&result.lines);
        self.save(NS_LIBRARY, "available", flags, &apps)?;
        Ok(apps)
    }

    /// Where an app lands under the install dir `base`, from its
    /// `config/installdir`. `Ok(None)` when the app info does not say.
    pub async fn install_location(
        &self,
        app_id: u32,
        base: &Path,
        flags: CacheFlags,
    ) -> Result<Option<PathBuf>, LibraryError> {
        let info = self.app_info(app_id, flags).await?;
        Ok(info
            .as_ref()
            .and_then(AppInfo::install_dir)
            .map(|dir| apps::install_path(base, dir)))
    }

    /// `Ok(None)` when the tool has no info for the app.
    pub async fn app_info(&self, app_id: u32, flags: CacheFlags) -> Result<Option<AppInfo>, LibraryError> {
        let key = app_id.to_string();
        if let Some(info) = self.load(NS_APP_INFO, &key, flags) {
            return Ok(Some(info));
        }
        let result = self
            .session
            .wait_for(format!("app_info_print {app_id}"))
            .await?;
        let tree = self
            .session
            .dialect()
            .app_info(&result.lines)
            .map_err(|source| LibraryError::Parse { app_id, source })?;
        let Some(tree) = tree.as_ref().and_then(|t| t.get_tree(&key)) else {
            debug!(app_id, "No app info");
            return Ok(None);
        };
        let info = AppInfo {
            app_id,
            tree: tree.clone(),
        };
        self.save(NS_APP_INFO, &key, flags, &info)?;
        Ok(Some(info))
    }

    /// Info for several apps. Apps whose info is missing or unreadable are
    /// left out rather than failing the batch.
    pub async fn app_infos(&self, app_ids: &[u32], flags: CacheFlags) -> Result<Vec<AppInfo>, LibraryError> {
        let mut infos = Vec::with_capacity(app_ids.len());
        for &app_id in app_ids {
            match self.app_info(app_id, flags).await {
                Ok(Some(info)) => infos.push(info),
                Ok(None) => {}
                Err(LibraryError::Parse { app_id, source }) => {
                    warn!(app_id, %source, "Skipping app with unreadable info");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(infos)
    }

    /// Names of the games among `app_ids`, keyed by id. Tools, DLC and
    /// apps without a name are left out.
    pub async fn game_names(&self, app_ids: &[u32], flags: CacheFlags) -> Result<BTreeMap<u32, String>, LibraryError> {
        Ok(self
            .app_infos(app_ids, flags)
            .await?
            .into_iter()
            .filter(AppInfo::is_game)
            .filter_map(|info| Some((info.app_id, info.name()?.to_string())))
            .collect())
    }

    pub async fn app_status(&self, app_id: u32, flags: CacheFlags) -> Result<AppStatus, LibraryError> {
        let key = app_id.to_string();
        if let Some(status) = self.load(NS_APP_STATUS, &key, flags) {
            return Ok(status);
        }
        let result = self
            .session
            .wait_for(format!("app_status {app_id}"))
            .await?;
        let status = AppStatus {
            app_id,
            fields: self.session.dialect().app_status(&result.lines),
        };
        self.save(NS_APP_STATUS, &key, flags, &status)?;
        Ok(status)
    }

    /// A cached answer, if `flags` allow loading and one is usable. Broken
    /// entries are logged and treated as misses.
    fn load<T: DeserializeOwned>(&self, namespace: &str, key: &str, flags: CacheFlags) -> Option<T> {
        let cache = self.cache.as_ref().filter(|_| flags.load())?;
        match cache.get_json(namespace, key) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(namespace, key, %e, "Ignoring stale cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(namespace, key, %e, "Cache read failed");
                None
            }
        }
    }

    fn save<T: Serialize>(&self, namespace: &str, key: &str, flags: CacheFlags, value: &T) -> Result<(), LibraryError> {
        let Some(cache) = self.cache.as_ref().filter(|_| flags.save()) else {
            return Ok(());
        };
        let value = serde_json::to_value(value).map_err(|source| CacheError::Json {
            path: Path::new(namespace).join(key),
            source,
        })?;
        cache.save_json(namespace, key, &value)?;
        Ok(())
    }
}
