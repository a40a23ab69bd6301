//! PID-file locking with stale-lock recovery.
//!
//! A pid file holds the decimal pid of the process that owns it. Acquisition
//! is an exclusive create; when the file already exists its owner is probed
//! with a no-op signal and the file is reclaimed only if the owner is gone.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Exclusive-create attempts before acquisition gives up
pub const MAX_PID_ATTEMPTS: usize = 3;

/// Pid file error
#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("pid file {} is held by process {pid} ({}), refusing to start", path.display(), holder(*owned))]
    Held { path: PathBuf, pid: i32, owned: bool },

    #[error("failed to access pid file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to remove stale pid file {}: {source}", path.display())]
    RemoveStale { path: PathBuf, source: io::Error },

    #[error("failed to probe process {pid}: {errno}")]
    Probe { pid: i32, errno: Errno },

    #[error("gave up acquiring pid file {} after {attempts} attempts", path.display())]
    RetriesExhausted { path: PathBuf, attempts: usize },
}

fn holder(owned: bool) -> &'static str {
    if owned {
        "running"
    } else {
        "owned by another user"
    }
}

/// Who, if anyone, holds a pid file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// No pid file
    Absent,
    /// The recorded process is gone, or never finished writing its pid
    Dead,
    /// The recorded process is alive and signalable
    Running(i32),
    /// The recorded process is alive but belongs to another user
    NotOwned(i32),
}

/// Parse pid file content: leading decimal digits, anything else counts as 0.
pub fn parse_pid(content: &str) -> i32 {
    let digits: String = content
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

fn read_pid(path: &Path) -> Result<Option<i32>, PidFileError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(parse_pid(&content))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PidFileError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Interpret the result of a no-op signal sent to `pid`.
pub fn classify_probe(pid: i32, probe: Result<(), Errno>) -> Result<ProcessStatus, PidFileError> {
    match probe {
        Ok(()) => Ok(ProcessStatus::Running(pid)),
        Err(Errno::ESRCH) => Ok(ProcessStatus::Dead),
        Err(Errno::EPERM) => Ok(ProcessStatus::NotOwned(pid)),
        Err(errno) => Err(PidFileError::Probe { pid, errno }),
    }
}

/// Process probing and file removal, as the stale-lock logic sees them.
trait Host {
    /// Send the no-op signal to `pid`.
    fn signal(&self, pid: i32) -> Result<(), Errno>;

    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// The running system.
struct System;

impl Host for System {
    fn signal(&self, pid: i32) -> Result<(), Errno> {
        kill(Pid::from_raw(pid), None)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// Determine the holder of the pid file at `path`.
pub fn process_status(path: &Path) -> Result<ProcessStatus, PidFileError> {
    status_on(&System, path)
}

fn status_on(host: &impl Host, path: &Path) -> Result<ProcessStatus, PidFileError> {
    match read_pid(path)? {
        None => Ok(ProcessStatus::Absent),
        Some(0) => Ok(ProcessStatus::Dead),
        Some(pid) => classify_probe(pid, host.signal(pid)),
    }
}

/// Stale-lock check: succeeds when the path is free or reclaimed, fails when
/// a live process holds it.
pub fn check(path: &Path) -> Result<(), PidFileError> {
    check_on(&System, path)
}

fn check_on(host: &impl Host, path: &Path) -> Result<(), PidFileError> {
    match status_on(host, path)? {
        ProcessStatus::Absent => Ok(()),
        ProcessStatus::Dead => {
            tracing::info!(path = %path.display(), "Removing stale pid file");
            match host.remove(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(PidFileError::RemoveStale {
                    path: path.to_path_buf(),
                    source,
                }),
            }
        }
        ProcessStatus::Running(pid) => Err(PidFileError::Held {
            path: path.to_path_buf(),
            pid,
            owned: true,
        }),
        ProcessStatus::NotOwned(pid) => Err(PidFileError::Held {
            path: path.to_path_buf(),
            pid,
            owned: false,
        }),
    }
}

/// Deletes a pid file if it still records `pid`.
#[derive(Debug, Clone)]
pub struct PidCleanup {
    path: PathBuf,
    pid: i32,
}

impl PidCleanup {
    pub fn run(&self) {
        match read_pid(&self.path) {
            Ok(Some(pid)) if pid == self.pid => {
                if let Err(e) = fs::remove_file(&self.path) {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove pid file");
                } else {
                    tracing::debug!(path = %self.path.display(), "Removed pid file");
                }
            }
            Ok(_) => {
                tracing::debug!(path = %self.path.display(), "Pid file no longer ours, leaving it");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read pid file during cleanup");
            }
        }
    }
}

/// An acquired pid file. Dropping it removes the file if it is still ours.
#[derive(Debug)]
pub struct PidFile {
    cleanup: PidCleanup,
}

impl PidFile {
    /// Write this process's pid to `path` with an exclusive create,
    /// reclaiming stale files.
    pub fn acquire(path: &Path) -> Result<Self, PidFileError> {
        Self::acquire_on(&System, path, std::process::id() as i32)
    }

    fn acquire_on(host: &impl Host, path: &Path, pid: i32) -> Result<Self, PidFileError> {
        for attempt in 1..=MAX_PID_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let written = write!(file, "{}", pid).and_then(|()| file.sync_all());
                    if let Err(source) = written {
                        let _ = fs::remove_file(path);
                        return Err(PidFileError::Io {
                            path: path.to_path_buf(),
                            source,
                        });
                    }
                    tracing::info!(path = %path.display(), pid, "Wrote pid file");
                    return Ok(Self {
                        cleanup: PidCleanup {
                            path: path.to_path_buf(),
                            pid,
                        },
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!(path = %path.display(), attempt, "Pid file exists, checking holder");
                    check_on(host, path)?;
                }
                Err(source) => {
                    return Err(PidFileError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }

        Err(PidFileError::RetriesExhausted {
            path: path.to_path_buf(),
            attempts: MAX_PID_ATTEMPTS,
        })
    }

    pub fn path(&self) -> &Path {
        &self.cleanup.path
    }

    pub fn pid(&self) -> i32 {
        self.cleanup.pid
    }

    /// Cleanup for exit paths that skip destructors.
    pub fn cleanup(&self) -> PidCleanup {
        self.cleanup.clone()
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.cleanup.run();
    }
}
