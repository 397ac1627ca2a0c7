use std::{path::PathBuf, time::Duration};

use crate::stream::{StreamRole, StreamSpec};

/// How long a pid file acquisition keeps retrying before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
/// Delay between two attempts on a contended pid file.
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Timing of the bounded-retry pid file acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        }
    }
}

/// Everything needed to run one supervised command.
///
/// Built once (usually from the command line) and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// The command and its arguments, passed verbatim to `/bin/sh -c` after quoting.
    pub command: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// No pid file means no locking at all.
    pub pid_file: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    /// Numeric uid or user name applied to the child.
    pub user: Option<String>,
    pub detach: bool,
    pub single_process: bool,
    pub lock: LockSettings,
}

impl RunConfig {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            working_directory: None,
            pid_file: None,
            stdout: None,
            stderr: None,
            user: None,
            detach: false,
            single_process: false,
            lock: LockSettings::default(),
        }
    }

    pub const fn foreground(&self) -> bool {
        !self.detach
    }

    /// Derives the stream description for one of the child's standard streams.
    pub fn stream_spec(&self, role: StreamRole) -> StreamSpec {
        let destination = match role {
            StreamRole::Stdin => None,
            StreamRole::Stdout => self.stdout.clone(),
            StreamRole::Stderr => self.stderr.clone(),
        };
        StreamSpec {
            role,
            destination,
            foreground: self.foreground(),
        }
    }

    /// The stdout and stderr specs, in that order. These are the streams subject to rotation.
    pub fn output_specs(&self) -> [StreamSpec; 2] {
        [
            self.stream_spec(StreamRole::Stdout),
            self.stream_spec(StreamRole::Stderr),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdin_never_has_a_destination() {
        let mut config = RunConfig::new(["true"]);
        config.stdout = Some("/tmp/out.log".into());
        config.stderr = Some("/tmp/err.log".into());

        let stdin = config.stream_spec(StreamRole::Stdin);
        assert_eq!(stdin.destination, None);
        assert!(stdin.foreground);

        let [stdout, stderr] = config.output_specs();
        assert_eq!(stdout.destination.as_deref(), Some("/tmp/out.log".as_ref()));
        assert_eq!(stderr.destination.as_deref(), Some("/tmp/err.log".as_ref()));
    }

    #[test]
    fn test_detach_clears_foreground() {
        let mut config = RunConfig::new(["true"]);
        config.detach = true;
        assert!(!config.stream_spec(StreamRole::Stdout).foreground);
    }
}
