//! `daemon-runner` binary.
//!
//! `main` stays synchronous: detaching forks the process, which is only sound
//! while it is single-threaded. The tokio runtime is built afterwards.

use anyhow::{Context, Result};
use clap::Parser;
use daemon_runner::{
    detach, forward_signals, Cli, DetachOptions, LockError, RunConfig, SupervisorBuilder,
    SupervisorError,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status for failures before the child could be started.
const FAILURE: i32 = 1;

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("daemon-runner: {err:#}");
            FAILURE
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = cli
        .into_config()
        .context("failed to resolve the configured paths")?;

    if config.detach {
        detach(&DetachOptions {
            stdout: config.stdout.clone(),
            stderr: config.stderr.clone(),
        })
        .context("failed to detach")?;
    }
    init_logging();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(supervise(config))
}

/// Logs go to stderr so they never mix with the child's stdout.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn supervise(config: RunConfig) -> Result<i32> {
    let single_process = config.single_process;
    let supervisor = SupervisorBuilder::from_config(config).build();

    if single_process {
        return match supervisor.exec().await {
            Ok(never) => match never {},
            Err(err) => report(err),
        };
    }

    let token = CancellationToken::new();
    let signals = forward_signals(supervisor.handle(), token.clone())
        .context("failed to install signal handlers")?;
    let handle = supervisor.run();
    let result = handle.wait().await;
    token.cancel();
    if let Err(err) = signals.await {
        warn!(error = %err, "signal forwarder did not shut down cleanly");
    }

    match result {
        Ok(outcome) => Ok(outcome.exit_code),
        Err(err) => report(err),
    }
}

fn report(err: SupervisorError) -> Result<i32> {
    match err {
        SupervisorError::Lock(LockError::Timeout { path, holder }) => {
            error!(path = %path.display(), %holder, "pid file lock not acquired");
            eprintln!(
                "Couldn't acquire pidfile lock {}, owned by {holder}",
                path.display()
            );
            Ok(FAILURE)
        }
        err => Err(err).context("supervision failed"),
    }
}
