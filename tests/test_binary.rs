use std::{
    fs,
    path::Path,
    process::{Child, Command, ExitStatus, Output, Stdio},
    thread,
    time::{Duration, Instant},
};

use daemon_runner::{LockSettings, PidFile};
use nix::{
    errno::Errno,
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use tempfile::tempdir;

fn daemon_runner(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_daemon-runner"))
        .args(args)
        .output()
        .unwrap()
}

/// Starts the runner in the background on `script`, run as `exec sh -c <script>`.
fn spawn_daemon_runner(pid_path: &Path, script: &str) -> Child {
    Command::new(env!("CARGO_BIN_EXE_daemon-runner"))
        .arg("-p")
        .arg(pid_path)
        .args(["-c", "exec", "sh", "-c", script])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .unwrap()
}

fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if ready() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    ready()
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() >= deadline {
            child.kill().unwrap();
            panic!("daemon-runner did not exit in time");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Waits until the pid file names a process other than the runner itself.
fn recorded_child_pid(pid_path: &Path, runner: &Child) -> i32 {
    let mut child_pid = None;
    let found = wait_until(Duration::from_secs(5), || {
        child_pid = fs::read_to_string(pid_path)
            .ok()
            .and_then(|content| content.trim().parse::<u32>().ok())
            .filter(|pid| *pid != runner.id());
        child_pid.is_some()
    });
    assert!(found, "pid file never recorded the child");
    i32::try_from(child_pid.unwrap()).unwrap()
}

fn signal_runner(runner: &Child, signal: Signal) {
    kill(Pid::from_raw(i32::try_from(runner.id()).unwrap()), signal).unwrap();
}

#[test]
fn test_exit_code_matches_child() {
    for code in ["0", "1", "42"] {
        let output = daemon_runner(&["-c", "sh", "-c", &format!("exit {code}")]);
        assert_eq!(output.status.code().unwrap().to_string(), code);
    }
}

#[test]
fn test_foreground_output_reaches_console_and_log() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("out.log");
    let log_arg = log.to_string_lossy().into_owned();

    let output = daemon_runner(&["-o", &log_arg, "-c", "echo", "hello world"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello world\n");

    let rotated: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(rotated.len(), 1);
    assert_eq!(fs::read_to_string(&rotated[0]).unwrap(), "hello world\n");
}

#[test]
fn test_single_process_keeps_pid_file_locked() {
    let dir = tempdir().unwrap();
    let pid_path = dir.path().join("exec.pid");
    let pid_arg = pid_path.to_string_lossy().into_owned();

    let child = Command::new(env!("CARGO_BIN_EXE_daemon-runner"))
        .args(["-s", "-p", &pid_arg, "-c", "cat", &pid_arg])
        .output()
        .unwrap();
    assert!(child.status.success());

    // The command replaced the runner, so it saw the runner's own pid.
    let recorded = String::from_utf8_lossy(&child.stdout).into_owned();
    assert!(recorded.trim().parse::<u32>().is_ok(), "{recorded:?}");
    // Nothing cleans up in single-process mode.
    assert_eq!(fs::read_to_string(&pid_path).unwrap(), recorded);
}

#[tokio::test]
async fn test_lock_timeout_exits_with_failure() {
    let dir = tempdir().unwrap();
    let pid_path = dir.path().join("busy.pid");
    let _holder = PidFile::acquire(&pid_path, LockSettings::default())
        .await
        .unwrap();
    let pid_arg = pid_path.to_string_lossy().into_owned();

    let output = tokio::task::spawn_blocking(move || {
        daemon_runner(&["-p", &pid_arg, "--lock-timeout", "0.2", "-c", "true"])
    })
    .await
    .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(&format!(
            "Couldn't acquire pidfile lock {}, owned by {}",
            pid_path.display(),
            std::process::id()
        )),
        "{stderr}"
    );
}

#[test]
fn test_sigint_terminates_child_and_exits_130() {
    let dir = tempdir().unwrap();
    let pid_path = dir.path().join("job.pid");
    let deliveries = dir.path().join("deliveries");
    let ready = dir.path().join("ready");
    let script = format!(
        "n=0; trap 'n=$((n+1)); echo term >> \"{log}\"; if [ \"$n\" -ge 3 ]; then exit 0; fi' TERM; \
         touch \"{ready}\"; while :; do sleep 0.05; done",
        log = deliveries.display(),
        ready = ready.display()
    );

    let mut runner = spawn_daemon_runner(&pid_path, &script);
    recorded_child_pid(&pid_path, &runner);
    assert!(wait_until(Duration::from_secs(5), || ready.exists()));

    signal_runner(&runner, Signal::SIGINT);
    let status = wait_with_timeout(&mut runner, Duration::from_secs(15));

    assert_eq!(status.code(), Some(130));
    let delivered = fs::read_to_string(&deliveries).unwrap().lines().count();
    assert!(delivered > 1, "delivered {delivered}");
    assert!(!pid_path.exists());
}

#[test]
fn test_sigabrt_kills_child_that_ignores_sigterm() {
    let dir = tempdir().unwrap();
    let pid_path = dir.path().join("job.pid");
    let ready = dir.path().join("ready");
    let script = format!(
        "trap '' TERM; touch \"{}\"; while :; do sleep 0.05; done",
        ready.display()
    );

    let mut runner = spawn_daemon_runner(&pid_path, &script);
    let child_pid = recorded_child_pid(&pid_path, &runner);
    assert!(wait_until(Duration::from_secs(5), || ready.exists()));

    signal_runner(&runner, Signal::SIGABRT);
    let status = wait_with_timeout(&mut runner, Duration::from_secs(15));

    assert_eq!(status.code(), Some(134));
    assert_eq!(kill(Pid::from_raw(child_pid), None), Err(Errno::ESRCH));
    assert!(!pid_path.exists());
}
