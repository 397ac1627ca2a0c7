use std::{
    convert::Infallible,
    os::unix::process::{CommandExt, ExitStatusExt},
    process::ExitStatus,
    sync::Arc,
    time::Duration,
};

use nix::{
    errno::Errno,
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use tokio::{
    process::{Child, Command},
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::RunConfig,
    shell::{command_line, SHELL},
    stream::ChildStdio,
    supervisor::{handle::SupervisorMessage, Interruption, SupervisorError},
};

/// Shell convention: a process killed by signal `n` reports `128 + n`.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

/// How a termination sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Termination {
    /// The cause in force when the child went away (an abort may upgrade an interrupt).
    pub(crate) cause: Interruption,
    pub(crate) signals_sent: u32,
}

/// The one child process of a supervisor run.
#[derive(Debug)]
pub(crate) struct SupervisedChild {
    pid: u32,
    child: Child,
    exit_code: Option<i32>,
}

impl SupervisedChild {
    /// Starts `/bin/sh -c <quoted command>` with the given streams, directory and uid.
    pub(crate) fn spawn(
        config: &RunConfig,
        stdio: ChildStdio,
        uid: Option<u32>,
    ) -> Result<Self, SupervisorError> {
        let line = command_line(&config.command);
        let spawn_error = |source: std::io::Error| SupervisorError::Spawn {
            command: line.clone(),
            source: Arc::new(source),
        };

        // Dropped at the end of this function, closing our copies of the child's pipes.
        let mut command = Command::new(SHELL);
        command
            .arg("-c")
            .arg(&line)
            .stdin(stdio.stdin)
            .stdout(stdio.stdout)
            .stderr(stdio.stderr)
            .kill_on_drop(true);
        if let Some(dir) = &config.working_directory {
            command.current_dir(dir);
        }
        if let Some(uid) = uid {
            command.uid(uid);
        }

        let child = command.spawn().map_err(spawn_error)?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_error(std::io::Error::other("child exited before reporting a pid")))?;
        info!(pid, command = %line, "spawned child");
        Ok(Self {
            pid,
            child,
            exit_code: None,
        })
    }

    pub(crate) const fn pid(&self) -> u32 {
        self.pid
    }

    /// Waits for the child to exit on its own. Once known, the code never changes.
    pub(crate) async fn wait(&mut self) -> std::io::Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let status = self.child.wait().await?;
        let code = exit_code(status);
        self.exit_code = Some(code);
        Ok(code)
    }

    fn signal(&self, signal: Signal) -> bool {
        let Ok(raw) = i32::try_from(self.pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), signal) {
            Ok(()) => {
                debug!(pid = self.pid, %signal, "signalled child");
                true
            }
            // Already gone, the pending wait will notice.
            Err(Errno::ESRCH) => false,
            Err(err) => {
                warn!(pid = self.pid, %signal, error = %err, "failed to signal child");
                false
            }
        }
    }

    /// Signals the child every `poll` until it exits.
    ///
    /// Interrupts send SIGTERM, aborts send SIGKILL. Further interrupts arriving
    /// meanwhile change nothing; an abort upgrades the signal and resends at once.
    pub(crate) async fn terminate(
        &mut self,
        cause: Interruption,
        rx: &mut mpsc::UnboundedReceiver<SupervisorMessage>,
        poll: Duration,
    ) -> Termination {
        let mut termination = Termination {
            cause,
            signals_sent: 0,
        };
        let mut ticker = interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                status = self.wait() => {
                    match status {
                        Ok(code) => debug!(pid = self.pid, code, "child stopped"),
                        Err(err) => warn!(pid = self.pid, error = %err, "failed to reap child"),
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if self.signal(termination.cause.child_signal()) {
                        termination.signals_sent += 1;
                    }
                }
                Some(SupervisorMessage::Interrupt(next)) = rx.recv() => {
                    if next.is_fault() && !termination.cause.is_fault() {
                        info!(pid = self.pid, "abort requested, escalating to SIGKILL");
                        termination.cause = next;
                        ticker.reset_immediately();
                    }
                }
            }
        }
        termination
    }
}

/// Replaces the current process with `/bin/sh -c <quoted command>`.
///
/// Only returns if the `exec` itself failed.
pub(crate) fn exec(config: &RunConfig, stdio: ChildStdio, uid: Option<u32>) -> Result<Infallible, SupervisorError> {
    let line = command_line(&config.command);
    let mut command = std::process::Command::new(SHELL);
    command
        .arg("-c")
        .arg(&line)
        .stdin(stdio.stdin)
        .stdout(stdio.stdout)
        .stderr(stdio.stderr);
    if let Some(dir) = &config.working_directory {
        command.current_dir(dir);
    }
    if let Some(uid) = uid {
        command.uid(uid);
    }
    info!(command = %line, "replacing supervisor with child");
    let source = command.exec();
    Err(SupervisorError::Spawn {
        command: line,
        source: Arc::new(source),
    })
}
