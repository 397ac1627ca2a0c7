use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use daemon_runner::SupervisorBuilder;

// Helper function to create a detached supervisor with short shutdown timings
#[allow(unused)]
pub fn quick_builder<S: AsRef<str>>(command: &[S]) -> SupervisorBuilder {
    SupervisorBuilder::new(command.iter().map(|arg| arg.as_ref().to_string()))
        .detached(true)
        .with_lock_poll_interval(Duration::from_millis(20))
        .with_kill_poll_interval(Duration::from_millis(100))
        .with_tee_drain_timeout(Duration::from_secs(2))
}

/// `sh -c <script>` as an argument vector.
#[allow(unused)]
pub fn sh(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into()]
}

/// `exec sh -c <script>`: the outer shell is replaced, so the child pid is the script's own.
#[allow(unused)]
pub fn exec_sh(script: &str) -> Vec<String> {
    vec!["exec".into(), "sh".into(), "-c".into(), script.into()]
}

/// Polls until `path` exists or `timeout` elapses.
#[allow(unused)]
pub async fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    path.exists()
}

/// Every entry of `dir`, sorted.
#[allow(unused)]
pub fn entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    entries.sort();
    entries
}
