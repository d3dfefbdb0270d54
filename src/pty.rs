//! PTY creation and management.
//!
//! Spawns the tool in a pseudo-terminal so it behaves as it does for an
//! interactive user (prompts, password questions), with terminal echo turned
//! off so our own input never shows up as output.
//!
//! # Safety
//!
//! This module uses unsafe code for PTY operations (fork, ioctl, dup2).
//! These are fundamental operations that cannot be done safely.

#![allow(unsafe_code)]

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::signal::{self, Signal};
use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, fork, setsid, ForkResult, Pid};
use std::ffi::CString;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::{AsFd, AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during PTY operations.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open PTY: {0}")]
    OpenPty(#[source] nix::Error),

    #[error("failed to configure terminal: {0}")]
    Termios(#[source] nix::Error),

    #[error("failed to fork: {0}")]
    Fork(#[source] nix::Error),

    #[error("command is empty")]
    EmptyCommand,

    #[error("program not found: {0}")]
    NotFound(String),

    #[error("invalid command string: {0}")]
    InvalidCommand(#[source] std::ffi::NulError),

    #[error("failed to send signal: {0}")]
    Signal(#[source] nix::Error),

    #[error("failed to wait: {0}")]
    Wait(#[source] nix::Error),
}

/// A process running in a PTY.
pub struct PtyProcess {
    /// The master side of the PTY (non-blocking).
    pub master: OwnedFd,
    /// The child process ID.
    pub pid: Pid,
}

impl PtyProcess {
    /// Non-blocking read from the master. `EAGAIN` means no data yet; `EIO`
    /// means the child closed its side.
    pub fn read(&self, buf: &mut [u8]) -> nix::Result<usize> {
        nix::unistd::read(self.master.as_fd(), buf)
    }

    /// Non-blocking write to the master; may write fewer bytes than given.
    pub fn write(&self, data: &[u8]) -> nix::Result<usize> {
        nix::unistd::write(self.master.as_fd(), data)
    }

    /// Send a signal to the child process.
    pub fn signal(&self, sig: Signal) -> Result<(), PtyError> {
        signal::kill(self.pid, sig).map_err(PtyError::Signal)
    }

    /// Check if the child process has exited without blocking.
    /// Returns `Some(exit_code)` if exited, None if still running.
    pub fn try_wait(&self) -> Result<Option<i32>, PtyError> {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)).map_err(PtyError::Wait)? {
            WaitStatus::Exited(_, code) => Ok(Some(code)),
            WaitStatus::Signaled(_, sig, _) => Ok(Some(128 + sig as i32)),
            // All other states (StillAlive, Stopped, Continued, etc.) mean not exited yet
            _ => Ok(None),
        }
    }

    /// Wait for the child process to exit (blocking).
    pub fn wait(&self) -> Result<i32, PtyError> {
        match waitpid(self.pid, None).map_err(PtyError::Wait)? {
            WaitStatus::Exited(_, code) => Ok(code),
            WaitStatus::Signaled(_, sig, _) => Ok(128 + sig as i32),
            status => {
                tracing::warn!(?status, "unexpected wait status");
                Ok(-1)
            }
        }
    }

    #[allow(clippy::cast_sign_loss)] // PIDs are always positive
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }
}

/// How to spawn the child.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Environment variables to set (key, value pairs).
    pub vars: Vec<(String, String)>,
    /// Terminal height in rows.
    pub rows: u16,
    /// Terminal width in columns.
    pub cols: u16,
    /// Keep terminal echo on (off by default).
    pub echo: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            vars: Vec::new(),
            rows: 24,
            cols: 200,
            echo: false,
        }
    }
}

/// Resolve a program the way `execvp` would, so a missing tool is reported
/// before forking.
pub fn resolve_program(program: &str) -> Result<PathBuf, PtyError> {
    let is_executable = |p: &Path| {
        p.metadata()
            .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
    };

    if program.contains('/') {
        let path = PathBuf::from(program);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(PtyError::NotFound(program.to_string()))
        };
    }

    std::env::var_os("PATH")
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| PtyError::NotFound(program.to_string()))
}

/// Spawn a command in a new PTY.
///
/// # Arguments
///
/// * `cmd` - Program and arguments to execute
/// * `opts` - Terminal size, environment and echo setting
///
/// # Returns
///
/// A `PtyProcess` containing the non-blocking master FD and child PID.
pub fn spawn(cmd: &[String], opts: &SpawnOptions) -> Result<PtyProcess, PtyError> {
    let Some(program) = cmd.first() else {
        return Err(PtyError::EmptyCommand);
    };
    resolve_program(program)?;

    // Build everything the child needs before forking.
    let prog = CString::new(program.as_str()).map_err(PtyError::InvalidCommand)?;
    let args: Vec<CString> = cmd
        .iter()
        .map(|s| CString::new(s.as_str()))
        .collect::<Result<_, _>>()
        .map_err(PtyError::InvalidCommand)?;

    let winsize = Winsize {
        ws_row: opts.rows,
        ws_col: opts.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // Open a new PTY pair
    let OpenptyResult { master, slave } = openpty(&winsize, None).map_err(PtyError::OpenPty)?;

    if !opts.echo {
        let mut termios = tcgetattr(slave.as_fd()).map_err(PtyError::Termios)?;
        termios.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(slave.as_fd(), SetArg::TCSANOW, &termios).map_err(PtyError::Termios)?;
    }

    // Fork the process
    match unsafe { fork() }.map_err(PtyError::Fork)? {
        ForkResult::Parent { child } => {
            // Parent: close slave, keep master
            drop(slave);

            // Set master to non-blocking mode for async I/O
            let flags = fcntl(&master, FcntlArg::F_GETFL).map_err(PtyError::OpenPty)?;
            let mut flags = OFlag::from_bits_retain(flags);
            flags.insert(OFlag::O_NONBLOCK);
            fcntl(&master, FcntlArg::F_SETFL(flags)).map_err(PtyError::OpenPty)?;

            Ok(PtyProcess { master, pid: child })
        }
        ForkResult::Child => {
            // Child: never return into the parent's code paths.
            drop(master);

            if setsid().is_err() {
                unsafe { libc::_exit(1) };
            }

            let slave_fd = slave.as_raw_fd();
            unsafe {
                // Set the slave as the controlling terminal
                if libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) < 0 {
                    libc::_exit(1);
                }
                if libc::dup2(slave_fd, libc::STDIN_FILENO) < 0
                    || libc::dup2(slave_fd, libc::STDOUT_FILENO) < 0
                    || libc::dup2(slave_fd, libc::STDERR_FILENO) < 0
                {
                    libc::_exit(1);
                }
            }

            // Close the original slave fd if it's not one of 0, 1, 2
            if slave_fd > 2 {
                drop(slave);
            } else {
                std::mem::forget(slave);
            }

            // SAFETY: We're in a forked child process before exec, so modifying
            // environment is safe (no other threads exist in this process).
            unsafe {
                for (key, value) in &opts.vars {
                    std::env::set_var(key, value);
                }
            }

            let _ = execvp(&prog, &args);
            // execvp only returns on error
            unsafe { libc::_exit(127) }
        }
    }
}
