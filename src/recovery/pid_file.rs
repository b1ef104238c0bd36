// src/recovery/pid_file.rs

//! Guard against two daemons following the same log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::errors::MonitordError;
use crate::fs::FileSystem;

/// Zero-signal check: does a process with this id exist?
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Holds `monitord.pid` for the lifetime of the daemon and removes it on
/// drop.
#[derive(Debug)]
pub struct PidFile {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl PidFile {
    /// Claim the pid file. Fails with [`MonitordError::AlreadyRunning`]
    /// when it names another live process, unless `force` is set.
    pub fn acquire(
        fs: Arc<dyn FileSystem>,
        path: &Path,
        own_pid: u32,
        force: bool,
        alive: fn(i32) -> bool,
    ) -> Result<PidFile> {
        if !force && fs.exists(path) {
            let recorded = fs
                .read_to_string(path)
                .ok()
                .and_then(|text| text.trim().parse::<i32>().ok());
            match recorded {
                Some(pid) if pid as u32 != own_pid && alive(pid) => {
                    return Err(MonitordError::AlreadyRunning { pid }.into());
                }
                Some(pid) => debug!(pid, "ignoring stale pid file"),
                None => warn!(path = %path.display(), "unreadable pid file, overwriting"),
            }
        }
        fs.write(path, format!("{own_pid}\n").as_bytes())?;
        Ok(PidFile {
            fs,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(err) = self.fs.remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "cannot remove pid file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn always(_: i32) -> bool {
        true
    }

    fn never(_: i32) -> bool {
        false
    }

    #[test]
    fn live_owner_blocks_second_instance() {
        let mock = MockFileSystem::new();
        mock.add_file("/run/monitord.pid", "4242\n");
        let fs: Arc<dyn FileSystem> = Arc::new(mock);
        let err = PidFile::acquire(fs, Path::new("/run/monitord.pid"), 1, false, always).unwrap_err();
        match err.downcast_ref::<MonitordError>() {
            Some(MonitordError::AlreadyRunning { pid }) => assert_eq!(*pid, 4242),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn stale_or_forced_pid_file_is_taken_over_and_removed_on_drop() {
        let mock = MockFileSystem::new();
        mock.add_file("/run/monitord.pid", "4242\n");
        let fs: Arc<dyn FileSystem> = Arc::new(mock.clone());
        let path = Path::new("/run/monitord.pid");

        let guard = PidFile::acquire(fs.clone(), path, 7, false, never).unwrap();
        assert_eq!(fs.read_to_string(path).unwrap(), "7\n");
        drop(guard);
        assert!(!fs.exists(path));

        mock.add_file("/run/monitord.pid", "4242\n");
        let _guard = PidFile::acquire(fs, path, 7, true, always).unwrap();
    }

    #[test]
    fn own_process_is_alive() {
        assert!(process_alive(std::process::id() as i32));
        assert!(!process_alive(0));
    }
}
