//! # 🛡️ daemon-runner
//!
//! `daemon-runner` runs a shell command as a supervised, optionally detached
//! process. It serializes concurrent runs through a pid file and keeps the
//! child's output in log files, either directly or teed to the console. When
//! the run is over it rotates those logs, and it makes sure the child is gone
//! before the supervisor exits.
//!
//! ## Quick example
//!
//! ```rust,no_run
//! use daemon_runner::SupervisorBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handle = SupervisorBuilder::new(["python3", "-m", "http.server"])
//!         .with_pid_file("/tmp/http.pid")
//!         .with_stdout("/tmp/http/out.log")
//!         .build()
//!         .run();
//!
//!     let outcome = handle.wait().await?; // the child's exit code, or 130 if interrupted
//!     std::process::exit(outcome.exit_code);
//! }
//! ```
//!
//! ## What you get
//!
//! * **Pid file locking**: one holder at a time, bounded retry, the holder's pid in the error.
//! * **Output wrangling**: append to files when detached, `tee` to the console in the foreground.
//! * **Guaranteed teardown**: SIGTERM until the child is gone, SIGKILL on abort.
//! * **Log rotation**: `out.log` becomes `out-YYYY-MM-DD_HH-MM-SS.log` after every run.
//!
//! ## API overview
//!
//! | SupervisorHandle method | Purpose                                         |
//! | ----------------------- | ----------------------------------------------- |
//! | `interrupt()`           | Stop the child gracefully (SIGTERM, repeated)   |
//! | `abort()`               | Kill the child (SIGKILL, repeated)              |
//! | `state()`               | Current `SupervisorState`                       |
//! | `child_pid()`           | Pid of the running child                        |
//! | `wait().await`          | `RunOutcome` with the exit code to report       |

pub use cli::Cli;
pub use config::{LockSettings, RunConfig};
pub use detach::{detach, DetachError, DetachOptions};
pub use lock::{HolderPid, LockAttempt, LockError, PidFile};
pub use rotate::{rotate_file, rotate_logs, rotate_logs_at, rotated_path};
pub use shell::command_line;
pub use signal::forward_signals;
pub use stream::{ChildStdio, StreamEndpoint, StreamError, StreamRole, StreamSet, StreamSpec};
pub use supervisor::{
    builder::SupervisorBuilder,
    handle::{SupervisorHandle, SupervisorHandleError, SupervisorMessage},
    Interruption, RunOutcome, Supervisor, SupervisorError, SupervisorState,
};
pub use user::{resolve_uid, UserError};

mod cli;
pub mod config;
mod detach;
mod lock;
mod rotate;
pub mod shell;
mod signal;
mod stream;
mod supervisor;
mod user;
