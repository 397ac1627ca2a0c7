//! Pid file doubling as an exclusive, advisory lock.
//!
//! The file records "who is the active job": the supervisor writes its own pid
//! right after taking the lock and overwrites it with the child's pid once the
//! child is running. The holder unlinks the file on release. A file left
//! behind by a crashed holder is unlocked and can simply be taken over.

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    os::unix::{
        fs::{MetadataExt, OpenOptionsExt},
        io::{AsRawFd, IntoRawFd, RawFd},
    },
    path::{Path, PathBuf},
    sync::Arc,
};

use fs2::FileExt;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::LockSettings;

const PID_FILE_MODE: u32 = 0o644;

/// Pid recorded in a pid file we could not lock, as far as it can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderPid {
    Pid(u32),
    Unknown,
}

impl HolderPid {
    /// Best-effort read of the pid currently stored at `path`.
    pub fn read(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| content.trim().parse().ok())
            .map_or(Self::Unknown, Self::Pid)
    }
}

impl fmt::Display for HolderPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pid(pid) => write!(f, "{pid}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("couldn't acquire pid file lock {}, owned by {holder}", path.display())]
    Timeout { path: PathBuf, holder: HolderPid },
    #[error("pid file {} is unusable", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

impl LockError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }
}

/// Result of a single, non-blocking acquisition attempt.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(PidFile),
    Contended,
}

/// A held pid file lock.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    file: Option<File>,
    held_pid: u32,
}

impl PidFile {
    /// Takes the lock on `path`, retrying every `settings.poll_interval` until
    /// `settings.timeout` has elapsed since the first attempt.
    ///
    /// A timeout too large to be represented as a deadline waits indefinitely.
    pub async fn acquire(path: impl AsRef<Path>, settings: LockSettings) -> Result<Self, LockError> {
        let path = path.as_ref();
        let deadline = Instant::now().checked_add(settings.timeout);
        loop {
            match Self::try_acquire(path)? {
                LockAttempt::Acquired(pid_file) => return Ok(pid_file),
                LockAttempt::Contended if deadline.is_some_and(|d| Instant::now() >= d) => {
                    let holder = HolderPid::read(path);
                    warn!(path = %path.display(), %holder, "pid file lock is still held, giving up");
                    return Err(LockError::Timeout {
                        path: path.to_path_buf(),
                        holder,
                    });
                }
                LockAttempt::Contended => {
                    debug!(path = %path.display(), "pid file lock is held, retrying");
                    sleep(settings.poll_interval).await;
                }
            }
        }
    }

    /// One non-blocking attempt. On success the file holds the current process's pid.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<LockAttempt, LockError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(PID_FILE_MODE)
            .open(path)
            .map_err(|e| LockError::io(path, e))?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Ok(LockAttempt::Contended);
            }
            return Err(LockError::io(path, err));
        }

        // The previous holder may have unlinked the file between our open and our lock.
        if !Self::names_same_file(path, &file) {
            return Ok(LockAttempt::Contended);
        }

        let mut pid_file = Self {
            path: path.to_path_buf(),
            file: Some(file),
            held_pid: 0,
        };
        pid_file
            .write_pid(std::process::id())
            .map_err(|e| LockError::io(path, e))?;
        debug!(path = %path.display(), pid = pid_file.held_pid, "acquired pid file lock");
        Ok(LockAttempt::Acquired(pid_file))
    }

    fn names_same_file(path: &Path, file: &File) -> bool {
        match (fs::metadata(path), file.metadata()) {
            (Ok(on_disk), Ok(held)) => on_disk.dev() == held.dev() && on_disk.ino() == held.ino(),
            _ => false,
        }
    }

    /// Replaces the recorded pid (truncate, write `<pid>\n`, flush).
    pub fn write_pid(&mut self, pid: u32) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("pid file lock already released"))?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(format!("{pid}\n").as_bytes())?;
        file.flush()?;
        self.held_pid = pid;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The pid last written into the file.
    pub const fn held_pid(&self) -> u32 {
        self.held_pid
    }

    pub const fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Unlinks the file and drops the lock. Safe to call any number of times.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        // Unlink while still locked so nobody can lock the doomed inode and believe they own it.
        if let Err(err) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %err, "failed to remove pid file");
        }
        drop(file);
        debug!(path = %self.path.display(), "released pid file lock");
    }

    /// Hands the locked descriptor over to whatever image replaces this process.
    ///
    /// Close-on-exec is cleared, so after an `exec` the new program keeps the
    /// lock until it exits. The file is not unlinked.
    pub fn into_inherited(mut self) -> Result<RawFd, LockError> {
        let Some(file) = self.file.take() else {
            return Err(LockError::io(
                &self.path,
                io::Error::other("pid file lock already released"),
            ));
        };
        fcntl(file.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))
            .map_err(|errno| LockError::io(&self.path, errno.into()))?;
        Ok(file.into_raw_fd())
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_holder_pid_parsing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("holder.pid");

        assert_eq!(HolderPid::read(&path), HolderPid::Unknown);

        fs::write(&path, "1234\n").unwrap();
        assert_eq!(HolderPid::read(&path), HolderPid::Pid(1234));

        fs::write(&path, "not a pid").unwrap();
        assert_eq!(HolderPid::read(&path), HolderPid::Unknown);
        assert_eq!(HolderPid::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_try_acquire_reports_contention() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("busy.pid");

        let LockAttempt::Acquired(first) = PidFile::try_acquire(&path).unwrap() else {
            panic!("first attempt should win");
        };
        assert!(matches!(
            PidFile::try_acquire(&path).unwrap(),
            LockAttempt::Contended
        ));
        drop(first);
        assert!(matches!(
            PidFile::try_acquire(&path).unwrap(),
            LockAttempt::Acquired(_)
        ));
    }

    #[test]
    fn test_unlinked_inode_counts_as_contended() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("moved.pid");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .unwrap();
        fs::remove_file(&path).unwrap();
        assert!(!PidFile::names_same_file(&path, &file));
    }

    #[test]
    fn test_inherited_descriptor_survives_the_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exec.pid");

        let LockAttempt::Acquired(pid_file) = PidFile::try_acquire(&path).unwrap() else {
            panic!("lock should be free");
        };
        let fd = pid_file.into_inherited().unwrap();

        // Still locked and still on disk, even though the handle is gone.
        assert!(path.exists());
        assert!(matches!(
            PidFile::try_acquire(&path).unwrap(),
            LockAttempt::Contended
        ));

        let flags = fcntl(fd, FcntlArg::F_GETFD).unwrap();
        assert!(!FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));
        nix::unistd::close(fd).unwrap();
    }
}
