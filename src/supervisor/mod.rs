pub(crate) mod builder;
mod child;
pub(crate) mod handle;
mod shutdown;

use std::{convert::Infallible, fmt, io, sync::Arc, time::Duration};

use nix::sys::signal::Signal;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::{
    config::RunConfig,
    lock::{LockError, PidFile},
    stream::{StreamError, StreamSet},
    user::{resolve_uid, UserError},
};
use child::SupervisedChild;
use handle::{OutcomeSlot, SupervisorHandle, SupervisorMessage};
use shutdown::ShutdownGuard;

#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("failed to wait for child {pid}")]
    Wait {
        pid: u32,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("supervisor stopped without reporting an outcome")]
    Vanished,
}

/// Why the supervisor was asked to stop its child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// SIGINT from the operator.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGHUP, the controlling terminal went away.
    Hangup,
    /// SIGABRT: abnormal termination, the child is killed outright.
    Abort,
}

impl Interruption {
    /// The signal that caused the interruption.
    pub const fn signal(self) -> Signal {
        match self {
            Self::Interrupt => Signal::SIGINT,
            Self::Terminate => Signal::SIGTERM,
            Self::Hangup => Signal::SIGHUP,
            Self::Abort => Signal::SIGABRT,
        }
    }

    /// The signal sent to the child, repeatedly, until it is gone.
    pub const fn child_signal(self) -> Signal {
        if self.is_fault() {
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        }
    }

    pub const fn is_fault(self) -> bool {
        matches!(self, Self::Abort)
    }

    /// Exit status of an interrupted supervisor: `128 + signal`, so 130 for SIGINT.
    pub const fn exit_code(self) -> i32 {
        128 + self.signal() as i32
    }
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signal().as_str())
    }
}

/// Lifecycle of a supervisor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    LockAcquired,
    Spawned,
    Waiting,
    /// The child exited on its own.
    Exited,
    Terminating,
    /// The child was stopped by the supervisor.
    Killed,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::LockAcquired => write!(f, "lock acquired"),
            Self::Spawned => write!(f, "spawned"),
            Self::Waiting => write!(f, "waiting"),
            Self::Exited => write!(f, "exited"),
            Self::Terminating => write!(f, "terminating"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

/// How a supervisor run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// What the supervisor process should exit with.
    pub exit_code: i32,
    pub child_pid: Option<u32>,
    /// Set when the run was cut short by an interruption.
    pub interruption: Option<Interruption>,
    /// Termination signals actually delivered to the child.
    pub signals_sent: u32,
}

impl RunOutcome {
    const fn interrupted_before_spawn(cause: Interruption) -> Self {
        Self {
            exit_code: cause.exit_code(),
            child_pid: None,
            interruption: Some(cause),
            signals_sent: 0,
        }
    }
}

/// Runs one command under supervision.
///
/// The sequence is: take the pid file lock, open the streams, spawn the
/// child, wait for it (or stop it when interrupted), rotate the logs, release
/// the lock and report the child's exit code.
pub struct Supervisor {
    config: RunConfig,
    kill_poll_interval: Duration,
    tee_drain_timeout: Duration,
    tx: mpsc::UnboundedSender<SupervisorMessage>,
    rx: mpsc::UnboundedReceiver<SupervisorMessage>,
    state: watch::Sender<SupervisorState>,
    child_pid: watch::Sender<Option<u32>>,
    outcome: watch::Sender<OutcomeSlot>,
}

impl Supervisor {
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// A handle that can be wired to signal sources before the run starts.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle::new(
            self.tx.clone(),
            self.state.subscribe(),
            self.child_pid.subscribe(),
            self.outcome.subscribe(),
        )
    }

    /// Runs the supervisor on its own task and returns a handle to control it.
    pub fn run(mut self) -> SupervisorHandle {
        let handle = self.handle();
        tokio::spawn(async move {
            let result = self.run_and_supervise().await;
            match &result {
                Ok(outcome) => info!(exit_code = outcome.exit_code, "supervisor finished"),
                Err(err) => error!(error = %err, "supervisor failed"),
            }
            self.outcome.send_replace(Some(result));
        });
        handle
    }

    /// Single-process mode: no supervision, the command replaces this process.
    ///
    /// A configured pid file is locked and then inherited by the new image, so
    /// it stays locked for the command's lifetime. It is neither rotated nor
    /// unlinked. Only returns on failure.
    pub async fn exec(self) -> Result<Infallible, SupervisorError> {
        let uid = self.config.user.as_deref().map(resolve_uid).transpose()?;
        if let Some(path) = &self.config.pid_file {
            let pid_file = PidFile::acquire(path, self.config.lock).await?;
            pid_file.into_inherited()?;
        }
        let mut streams = StreamSet::open(&self.config)?;
        let Some(stdio) = streams.take_stdio() else {
            return Err(SupervisorError::Vanished);
        };
        child::exec(&self.config, stdio, uid)
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.send_replace(state);
        info!(%state, "supervisor state changed");
    }

    fn pending_interruption(&mut self) -> Option<Interruption> {
        match self.rx.try_recv() {
            Ok(SupervisorMessage::Interrupt(cause)) => Some(cause),
            Err(_) => None,
        }
    }

    async fn run_and_supervise(&mut self) -> Result<RunOutcome, SupervisorError> {
        let uid = self.config.user.as_deref().map(resolve_uid).transpose()?;

        let pid_file = match self.config.pid_file.clone() {
            Some(path) => {
                let settings = self.config.lock;
                tokio::select! {
                    acquired = PidFile::acquire(&path, settings) => Some(acquired?),
                    Some(SupervisorMessage::Interrupt(cause)) = self.rx.recv() => {
                        info!(%cause, "interrupted while waiting for the pid file lock");
                        return Ok(RunOutcome::interrupted_before_spawn(cause));
                    }
                }
            }
            None => None,
        };
        let mut shutdown = ShutdownGuard::new(pid_file, self.config.output_specs().to_vec());
        self.set_state(SupervisorState::LockAcquired);

        let mut streams = StreamSet::open(&self.config)?;
        if let Some(cause) = self.pending_interruption() {
            info!(%cause, "interrupted before spawning");
            return Ok(RunOutcome::interrupted_before_spawn(cause));
        }
        let Some(stdio) = streams.take_stdio() else {
            return Err(SupervisorError::Vanished);
        };
        let mut child = SupervisedChild::spawn(&self.config, stdio, uid)?;
        let pid = child.pid();
        shutdown.arm_rotation();
        if let Some(pid_file) = shutdown.pid_file_mut() {
            if let Err(err) = pid_file.write_pid(pid) {
                warn!(pid, error = %err, "failed to record child pid");
            }
        }
        self.child_pid.send_replace(Some(pid));
        self.set_state(SupervisorState::Spawned);

        self.set_state(SupervisorState::Waiting);
        let event = tokio::select! {
            code = child.wait() => ChildEvent::Exited(code),
            Some(SupervisorMessage::Interrupt(cause)) = self.rx.recv() => ChildEvent::Interrupted(cause),
        };

        let result = match event {
            ChildEvent::Exited(Ok(code)) => {
                info!(pid, code, "child exited");
                self.set_state(SupervisorState::Exited);
                Ok(RunOutcome {
                    exit_code: code,
                    child_pid: Some(pid),
                    interruption: None,
                    signals_sent: 0,
                })
            }
            ChildEvent::Exited(Err(err)) => {
                error!(pid, error = %err, "lost track of child, killing it");
                self.set_state(SupervisorState::Terminating);
                child
                    .terminate(Interruption::Abort, &mut self.rx, self.kill_poll_interval)
                    .await;
                self.set_state(SupervisorState::Killed);
                Err(SupervisorError::Wait {
                    pid,
                    source: Arc::new(err),
                })
            }
            ChildEvent::Interrupted(cause) => {
                info!(pid, %cause, "interrupted, stopping child");
                self.set_state(SupervisorState::Terminating);
                let termination = child
                    .terminate(cause, &mut self.rx, self.kill_poll_interval)
                    .await;
                self.set_state(SupervisorState::Killed);
                Ok(RunOutcome {
                    exit_code: termination.cause.exit_code(),
                    child_pid: Some(pid),
                    interruption: Some(termination.cause),
                    signals_sent: termination.signals_sent,
                })
            }
        };

        streams.finish(self.tee_drain_timeout).await;
        shutdown.run();
        result
    }
}

enum ChildEvent {
    Exited(io::Result<i32>),
    Interrupted(Interruption),
}
