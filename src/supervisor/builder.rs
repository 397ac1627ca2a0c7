use std::{path::PathBuf, time::Duration};

use tokio::sync::{mpsc, watch};

use crate::{
    config::RunConfig,
    supervisor::{Supervisor, SupervisorState},
};

/// Builds a `Supervisor` for one command.
///
/// Everything a `RunConfig` holds can be set here, plus the timings of the
/// shutdown sequence.
pub struct SupervisorBuilder {
    config: RunConfig,
    kill_poll_interval: Duration,
    tee_drain_timeout: Duration,
}

impl SupervisorBuilder {
    /// Creates a builder for `command` with default configuration values.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_config(RunConfig::new(command))
    }

    pub fn from_config(config: RunConfig) -> Self {
        Self {
            config,
            kill_poll_interval: Duration::from_secs(1),
            tee_drain_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pid_file = Some(path.into());
        self
    }

    pub fn with_stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.stdout = Some(path.into());
        self
    }

    pub fn with_stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.stderr = Some(path.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_directory = Some(dir.into());
        self
    }

    /// Runs the child as this user (numeric uid or name).
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.config.user = Some(user.into());
        self
    }

    /// Detached runs write straight to files and never touch the console.
    pub fn detached(mut self, detach: bool) -> Self {
        self.config.detach = detach;
        self
    }

    /// Sets how long pid file acquisition retries before giving up.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock.timeout = timeout;
        self
    }

    /// Sets the delay between two attempts on a contended pid file.
    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.config.lock.poll_interval = interval;
        self
    }

    /// Sets how often a terminating child is signalled again.
    pub fn with_kill_poll_interval(mut self, interval: Duration) -> Self {
        self.kill_poll_interval = interval;
        self
    }

    /// Sets how long tee processes may take to drain after the child exits.
    pub fn with_tee_drain_timeout(mut self, timeout: Duration) -> Self {
        self.tee_drain_timeout = timeout;
        self
    }

    /// Constructs the `Supervisor` with the configured settings.
    pub fn build(self) -> Supervisor {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SupervisorState::Idle);
        let (child_pid, _) = watch::channel(None);
        let (outcome, _) = watch::channel(None);
        Supervisor {
            config: self.config,
            kill_poll_interval: self.kill_poll_interval,
            tee_drain_timeout: self.tee_drain_timeout,
            tx,
            rx,
            state,
            child_pid,
            outcome,
        }
    }
}
