//! Standard stream endpoints for the supervised child.
//!
//! | destination | detached            | foreground                         |
//! | ----------- | ------------------- | ---------------------------------- |
//! | set         | append to the file  | `tee -a <file>` onto a dup of ours |
//! | unset       | null device         | dup of our own descriptor          |

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io,
    os::fd::{AsFd, OwnedFd},
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::RunConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Stdin,
    Stdout,
    Stderr,
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Where one of the child's streams should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub role: StreamRole,
    pub destination: Option<PathBuf>,
    pub foreground: bool,
}

#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("failed to create log directory {}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("failed to open {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("failed to duplicate the supervisor's {role}")]
    Duplicate {
        role: StreamRole,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("failed to start tee for {}", path.display())]
    Tee {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

/// A resolved stream, ready to be handed to the child.
#[derive(Debug)]
pub enum StreamEndpoint {
    /// Destination file opened for appending.
    File(File),
    /// The child writes into `input`; `tee` copies it to the file and the console.
    Tee { input: Stdio, tee: Child },
    /// Duplicate of one of the supervisor's own descriptors.
    Inherit(OwnedFd),
    Null,
}

impl StreamEndpoint {
    /// Resolves `spec` against the supervisor's own standard stream of the same role.
    pub fn resolve(spec: &StreamSpec) -> Result<Self, StreamError> {
        match spec.role {
            StreamRole::Stdin => Self::resolve_from(spec, io::stdin()),
            StreamRole::Stdout => Self::resolve_from(spec, io::stdout()),
            StreamRole::Stderr => Self::resolve_from(spec, io::stderr()),
        }
    }

    /// Resolves `spec`, duplicating `origin` wherever the console is needed.
    pub fn resolve_from(spec: &StreamSpec, origin: impl AsFd) -> Result<Self, StreamError> {
        let destination = match spec.role {
            StreamRole::Stdin => None,
            StreamRole::Stdout | StreamRole::Stderr => spec.destination.as_deref(),
        };
        match (destination, spec.foreground) {
            (Some(path), false) => {
                ensure_parent_dir(path)?;
                open_append(path).map(Self::File)
            }
            (Some(path), true) => {
                ensure_parent_dir(path)?;
                let console = duplicate(spec.role, origin)?;
                spawn_tee(path, console)
            }
            (None, true) => duplicate(spec.role, origin).map(Self::Inherit),
            (None, false) => Ok(Self::Null),
        }
    }

    /// Splits the endpoint into what the child gets and the tee process to reap later.
    pub fn into_parts(self) -> (Stdio, Option<Child>) {
        match self {
            Self::File(file) => (Stdio::from(file), None),
            Self::Tee { input, tee } => (input, Some(tee)),
            Self::Inherit(fd) => (Stdio::from(fd), None),
            Self::Null => (Stdio::null(), None),
        }
    }
}

/// Creates the parent directory of `path` and any missing ancestors.
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), StreamError> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    match fs::create_dir_all(parent) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(StreamError::CreateDir {
            path: parent.to_path_buf(),
            source: Arc::new(err),
        }),
    }
}

pub(crate) fn open_append(path: &Path) -> Result<File, StreamError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StreamError::Open {
            path: path.to_path_buf(),
            source: Arc::new(e),
        })
}

fn duplicate(role: StreamRole, origin: impl AsFd) -> Result<OwnedFd, StreamError> {
    origin
        .as_fd()
        .try_clone_to_owned()
        .map_err(|e| StreamError::Duplicate {
            role,
            source: Arc::new(e),
        })
}

fn spawn_tee(path: &Path, console: OwnedFd) -> Result<StreamEndpoint, StreamError> {
    let tee_error = |source: io::Error| StreamError::Tee {
        path: path.to_path_buf(),
        source: Arc::new(source),
    };
    // Own process group: a Ctrl-C on the terminal must not kill tee before it drains the child.
    let mut tee = Command::new("tee")
        .arg("-a")
        .arg(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(console))
        .process_group(0)
        .spawn()
        .map_err(tee_error)?;
    let input = tee
        .stdin
        .take()
        .ok_or_else(|| tee_error(io::Error::other("tee has no stdin pipe")))?;
    let input: Stdio = input.try_into().map_err(tee_error)?;
    debug!(path = %path.display(), pid = tee.id(), "started tee");
    Ok(StreamEndpoint::Tee { input, tee })
}

/// The three stdio handles for a child.
#[derive(Debug)]
pub struct ChildStdio {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

/// All streams of one run, plus the tee processes feeding the log files.
#[derive(Debug)]
pub struct StreamSet {
    stdio: Option<ChildStdio>,
    tees: Vec<Child>,
}

impl StreamSet {
    pub fn open(config: &RunConfig) -> Result<Self, StreamError> {
        use StreamRole::{Stderr, Stdin, Stdout};

        let mut tees = Vec::new();
        let mut resolve = |role| -> Result<Stdio, StreamError> {
            let (stdio, tee) = StreamEndpoint::resolve(&config.stream_spec(role))?.into_parts();
            tees.extend(tee);
            Ok(stdio)
        };
        let stdio = ChildStdio {
            stdin: resolve(Stdin)?,
            stdout: resolve(Stdout)?,
            stderr: resolve(Stderr)?,
        };
        Ok(Self {
            stdio: Some(stdio),
            tees,
        })
    }

    /// Hands out the child's stdio. Only the first call returns anything.
    pub fn take_stdio(&mut self) -> Option<ChildStdio> {
        self.stdio.take()
    }

    pub fn tee_count(&self) -> usize {
        self.tees.len()
    }

    /// Waits for every tee to drain and exit, killing any that outlive `grace`.
    ///
    /// A tee only sees end-of-file once every writer is gone, so a background
    /// grandchild still holding the pipe would otherwise stall shutdown.
    pub async fn finish(&mut self, grace: Duration) {
        self.stdio = None;
        for mut tee in self.tees.drain(..) {
            match tokio::time::timeout(grace, tee.wait()).await {
                Ok(Ok(status)) => debug!(%status, "tee exited"),
                Ok(Err(err)) => warn!(error = %err, "failed to wait for tee"),
                Err(_) => {
                    warn!(pid = tee.id(), "tee did not drain in time, killing it");
                    if let Err(err) = tee.kill().await {
                        warn!(error = %err, "failed to kill tee");
                    }
                }
            }
        }
    }
}
