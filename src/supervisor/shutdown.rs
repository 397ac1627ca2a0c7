use tracing::debug;

use crate::{lock::PidFile, rotate, stream::StreamSpec};

/// The run's cleanup: rotate the logs, then release the pid file.
///
/// Runs at most once, whether from the normal exit path, the interrupt path or
/// `Drop` while unwinding. Rotation only happens once a child has been spawned.
#[derive(Debug)]
pub(crate) struct ShutdownGuard {
    pid_file: Option<PidFile>,
    logs: Vec<StreamSpec>,
    rotate_logs: bool,
    done: bool,
}

impl ShutdownGuard {
    pub(crate) fn new(pid_file: Option<PidFile>, logs: Vec<StreamSpec>) -> Self {
        Self {
            pid_file,
            logs,
            rotate_logs: false,
            done: false,
        }
    }

    /// Logs are only worth rotating once the child has had a chance to write them.
    pub(crate) fn arm_rotation(&mut self) {
        self.rotate_logs = true;
    }

    pub(crate) fn pid_file_mut(&mut self) -> Option<&mut PidFile> {
        self.pid_file.as_mut()
    }

    pub(crate) fn run(&mut self) {
        if std::mem::replace(&mut self.done, true) {
            return;
        }
        if self.rotate_logs {
            rotate::rotate_logs(&self.logs);
        }
        if let Some(mut pid_file) = self.pid_file.take() {
            pid_file.release();
        }
        debug!("cleanup finished");
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.run();
    }
}
