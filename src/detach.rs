//! Detaching the supervisor from its terminal and session.
//!
//! This is the classic double fork: the launcher returns immediately, the
//! grandchild runs in a fresh session with no controlling terminal, its
//! working directory at `/` and its standard streams pointed at the configured
//! log files (or the null device).
//!
//! `fork()` only copies the calling thread, so [`detach`] must run before any
//! other thread exists, in particular before the tokio runtime is built.

use std::{
    fs::File,
    io,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use nix::unistd::{dup2, fork, setsid, ForkResult};
use thiserror::Error;

use crate::stream::{ensure_parent_dir, open_append, StreamError};

const NULL_DEVICE: &str = "/dev/null";

/// Where the detached supervisor's own stdout and stderr should go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetachOptions {
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum DetachError {
    #[error("fork failed")]
    Fork(#[source] nix::Error),
    #[error("failed to start a new session")]
    Session(#[source] nix::Error),
    #[error("failed to change directory to /")]
    Chdir(#[source] io::Error),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("failed to open {NULL_DEVICE}")]
    Null(#[source] io::Error),
    #[error("failed to redirect descriptor {fd}")]
    Redirect {
        fd: i32,
        #[source]
        source: nix::Error,
    },
}

/// Detaches the current process. Returns in the detached grandchild only.
pub fn detach(options: &DetachOptions) -> Result<(), DetachError> {
    // SAFETY: the caller guarantees the process is still single-threaded, so
    // the child cannot inherit a lock held by another thread.
    if let ForkResult::Parent { .. } = unsafe { fork() }.map_err(DetachError::Fork)? {
        std::process::exit(0);
    }
    setsid().map_err(DetachError::Session)?;
    // SAFETY: still single-threaded, the first child only has the forking thread.
    if let ForkResult::Parent { .. } = unsafe { fork() }.map_err(DetachError::Fork)? {
        std::process::exit(0);
    }
    std::env::set_current_dir("/").map_err(DetachError::Chdir)?;
    redirect_std_streams(options)
}

fn redirect_std_streams(options: &DetachOptions) -> Result<(), DetachError> {
    let stdin = File::open(NULL_DEVICE).map_err(DetachError::Null)?;
    redirect(&stdin, nix::libc::STDIN_FILENO)?;

    let stdout = open_target(options.stdout.as_deref())?;
    redirect(&stdout, nix::libc::STDOUT_FILENO)?;

    let stderr = open_target(options.stderr.as_deref())?;
    redirect(&stderr, nix::libc::STDERR_FILENO)
}

fn open_target(path: Option<&Path>) -> Result<File, DetachError> {
    match path {
        Some(path) => {
            ensure_parent_dir(path)?;
            Ok(open_append(path)?)
        }
        None => File::options()
            .write(true)
            .open(NULL_DEVICE)
            .map_err(DetachError::Null),
    }
}

fn redirect(target: &File, fd: i32) -> Result<(), DetachError> {
    dup2(target.as_raw_fd(), fd)
        .map(drop)
        .map_err(|source| DetachError::Redirect { fd, source })
}
