use std::{
    io,
    path::{self, PathBuf},
    time::Duration,
};

use clap::Parser;

use crate::config::{LockSettings, RunConfig};

/// Run a command as a daemon.
#[derive(Debug, Parser)]
#[command(name = "daemon-runner", version, about)]
pub struct Cli {
    /// Run as daemon
    #[arg(short = 'd', long)]
    pub daemon: bool,

    /// Standard output destination
    #[arg(short = 'o', long, value_name = "PATH")]
    pub stdout: Option<PathBuf>,

    /// Standard error destination
    #[arg(short = 'e', long, value_name = "PATH")]
    pub stderr: Option<PathBuf>,

    /// Working directory
    #[arg(short = 'w', long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// PID file location
    #[arg(short = 'p', long, value_name = "PATH")]
    pub pid_file: Option<PathBuf>,

    /// User to run process
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Do not wrap process and just exec the child process
    #[arg(short = 's', long)]
    pub single_process: bool,

    /// Seconds to wait for the PID file lock
    #[arg(long, value_name = "SECS", default_value = "5", value_parser = parse_seconds)]
    pub lock_timeout: Duration,

    /// Marks the start of the command; everything after it is passed through verbatim
    #[arg(short = 'c', long = "command")]
    pub command_marker: bool,

    /// Command to run
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|e| format!("invalid number of seconds: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

impl Cli {
    /// Turns the parsed flags into a `RunConfig`.
    ///
    /// Paths are made absolute against the launch directory, which also
    /// becomes the default working directory: a detached supervisor no longer
    /// runs there.
    pub fn into_config(self) -> io::Result<RunConfig> {
        let absolute = |path: Option<PathBuf>| path.map(path::absolute).transpose();
        Ok(RunConfig {
            command: self.command,
            working_directory: Some(match self.cwd {
                Some(dir) => path::absolute(dir)?,
                None => std::env::current_dir()?,
            }),
            pid_file: absolute(self.pid_file)?,
            stdout: absolute(self.stdout)?,
            stderr: absolute(self.stderr)?,
            user: self.user,
            detach: self.daemon,
            single_process: self.single_process,
            lock: LockSettings {
                timeout: self.lock_timeout,
                ..LockSettings::default()
            },
        })
    }
}
