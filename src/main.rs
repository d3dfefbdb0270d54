//! steamshell — steamcmd as typed, queued commands

use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use steamshell::{
    kv, CacheFlags, Cli, CliCommand, Credentials, JsonFileCache, Library, LibraryError, Session,
    SessionConfig,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let default = if cli.verbose {
        "steamshell=debug"
    } else {
        "steamshell=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        CliCommand::Doctor => run_doctor(&cli).await,
        _ => run(&cli).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<(), BoxError> {
    let session = Session::spawn(cli.session_config())?;
    let events = cli.events.then(|| stream_events(&session));

    let mut library = Library::new(session.clone());
    let flags = cli.cache_flags();
    if flags != CacheFlags::NONE {
        let cache = match &cli.cache_dir {
            Some(dir) => JsonFileCache::new(dir),
            None => JsonFileCache::user_default()?,
        };
        library = library.with_cache(Arc::new(cache));
    }

    let result = dispatch(cli, &library, flags).await;
    match session.shutdown().await {
        Ok(code) => info!(?code, "steamcmd exited"),
        Err(e) => error!("shutdown failed: {e}"),
    }

    // The stream ends once every sender is gone.
    drop(library);
    drop(session);
    if let Some(events) = events {
        let _ = events.await;
    }
    result
}

#[allow(clippy::too_many_lines)] // Command dispatch function, splitting would reduce clarity
async fn dispatch(cli: &Cli, library: &Library, flags: CacheFlags) -> Result<(), BoxError> {
    let mut out = std::io::stdout().lock();

    match &cli.command {
        CliCommand::Install { dir: Some(dir), .. } | CliCommand::Update { dir: Some(dir), .. } => {
            library.set_install_dir(dir).await?;
        }
        _ => {}
    }

    if cli.command.needs_login() {
        let login = match cli.credentials() {
            Some(creds) => library.login(&creds).await,
            None if library.relogin_available()? => library.relogin().await,
            None => library.login(&Credentials::anonymous()).await,
        };
        match login {
            Ok(()) => {}
            Err(LibraryError::Login { status }) if matches!(cli.command, CliCommand::Login) => {
                writeln!(out, "{status}")?;
                return Err(format!("login failed: {status}").into());
            }
            Err(e) => return Err(e.into()),
        }
    }

    match &cli.command {
        CliCommand::Login => writeln!(out, "ok")?,
        CliCommand::Installed { json } => {
            let apps = library.installed_apps(flags).await?;
            if *json {
                writeln!(out, "{}", serde_json::to_string_pretty(&apps)?)?;
            } else {
                for app in apps {
                    writeln!(out, "{}\t{}\t{}", app.app_id, app.name, app.path.display())?;
                }
            }
        }
        CliCommand::Licenses { json } => {
            let apps = library.available_apps(flags).await?;
            if *json {
                writeln!(out, "{}", serde_json::to_string(&apps)?)?;
            } else {
                for id in apps {
                    writeln!(out, "{id}")?;
                }
            }
        }
        CliCommand::Info { app_id, json } => {
            let Some(info) = library.app_info(*app_id, flags).await? else {
                return Err(format!("no info for app {app_id}").into());
            };
            if *json {
                writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
            } else {
                let mut tree = kv::KeyValueTree::new();
                tree.insert(app_id.to_string(), info.tree);
                write!(out, "{}", kv::serialize(&tree))?;
            }
        }
        CliCommand::Status { app_id, json } => {
            let status = library.app_status(*app_id, flags).await?;
            if *json {
                writeln!(out, "{}", serde_json::to_string_pretty(&status)?)?;
            } else {
                for (key, value) in &status.fields {
                    writeln!(out, "{key}: {value}")?;
                }
            }
        }
        CliCommand::Names { app_ids } => {
            for (id, name) in library.game_names(app_ids, flags).await? {
                writeln!(out, "{id}\t{name}")?;
            }
        }
        CliCommand::Install { app_id, dir } => {
            if !library.install(*app_id).await? {
                return Err(format!("install of app {app_id} failed").into());
            }
            let location = match dir {
                Some(dir) => library.install_location(*app_id, dir, flags).await?,
                None => None,
            };
            match location {
                Some(path) => writeln!(out, "installed {app_id} to {}", path.display())?,
                None => writeln!(out, "installed {app_id}")?,
            }
        }
        CliCommand::Update {
            app_id, validate, ..
        } => {
            if !library.update(*app_id, *validate).await? {
                return Err(format!("update of app {app_id} failed").into());
            }
            writeln!(out, "updated {app_id}")?;
        }
        CliCommand::Uninstall { app_id } => {
            library.uninstall(*app_id).await?;
            writeln!(out, "uninstalled {app_id}")?;
        }
        CliCommand::Exec { text } => {
            let result = library.session().wait_for(text.join(" ")).await?;
            for line in result.lines {
                writeln!(out, "{line}")?;
            }
        }
        CliCommand::Doctor => {}
    }
    Ok(())
}

/// Copy every session event to stderr as a JSON line.
fn stream_events(session: &Session) -> JoinHandle<()> {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        eprintln!("{json}");
                    }
                }
                Err(RecvError::Lagged(n)) => eprintln!(r#"{{"event":"lagged","missed":{n}}}"#),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn run_doctor(cli: &Cli) -> Result<(), BoxError> {
    let mut all_ok = true;
    let config = cli.session_config();
    let program = config.program.to_string_lossy().into_owned();

    // 1. Locate steamcmd
    print!("steamcmd: ");
    match steamshell::pty::resolve_program(&program) {
        Ok(path) => println!("[OK] {}", path.display()),
        Err(e) => {
            println!("[FAIL] {e}");
            all_ok = false;
        }
    }

    // 2. Check PTY allocation
    print!("PTY allocation: ");
    match steamshell::pty::spawn(&["true".to_string()], &steamshell::pty::SpawnOptions::default()) {
        Ok(pty) => {
            let _ = pty.wait();
            println!("[OK]");
        }
        Err(e) => {
            println!("[FAIL] {e}");
            all_ok = false;
        }
    }

    // 3. Reach the prompt
    print!("steamcmd prompt: ");
    if all_ok {
        match reach_prompt(config).await {
            Ok(()) => println!("[OK]"),
            Err(e) => {
                println!("[FAIL] {e}");
                all_ok = false;
            }
        }
    } else {
        println!("[SKIP]");
    }

    // 4. Cache directory
    print!("Cache directory: ");
    let cache = match &cli.cache_dir {
        Some(dir) => Ok(JsonFileCache::new(dir)),
        None => JsonFileCache::user_default(),
    };
    match cache {
        Ok(cache) => println!("[OK] {}", cache.root().display()),
        Err(e) => println!("[WARN] {e}"),
    }

    // Summary
    println!();
    if all_ok {
        println!("All checks passed!");
        Ok(())
    } else {
        Err("Some checks failed".into())
    }
}

async fn reach_prompt(config: SessionConfig) -> Result<(), BoxError> {
    let wait = config
        .command_timeout
        .unwrap_or(std::time::Duration::from_secs(300));
    let session = Session::spawn(config)?;
    let ready = tokio::time::timeout(wait, session.ready()).await;
    let _ = session.shutdown().await;
    ready.map_err(|_| "timed out waiting for the prompt")??;
    Ok(())
}
