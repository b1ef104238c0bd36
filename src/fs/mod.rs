// src/fs/mod.rs

//! Filesystem seam used by every component that touches disk, so the
//! tailer and the recovery files can be exercised against memory.

use std::fmt::Debug;
use std::fs;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub mod mock;

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    fn read_to_string(&self, path: &Path) -> Result<String>;
    /// Replace the file contents, creating parent directories.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    /// Append to the file, creating it and its parent directories if needed.
    fn append(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    /// Current size in bytes, or `None` if the file does not exist.
    fn len(&self, path: &Path) -> Result<Option<u64>>;

    /// Read at most `max` bytes starting at `offset`.
    fn read_at(&self, path: &Path, offset: u64, max: usize) -> Result<Vec<u8>>;

    /// Remove a file; a missing file is not an error.
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading file {:?}", path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let mut file = fs::File::create(path).with_context(|| format!("creating file {:?}", path))?;
        file.write_all(contents).with_context(|| format!("writing to file {:?}", path))?;
        Ok(())
    }

    fn append(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening {:?} for append", path))?;
        file.write_all(contents).with_context(|| format!("appending to file {:?}", path))?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn len(&self, path: &Path) -> Result<Option<u64>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("stat {:?}", path)),
        }
    }

    fn read_at(&self, path: &Path, offset: u64, max: usize) -> Result<Vec<u8>> {
        let mut file = fs::File::open(path).with_context(|| format!("opening file {:?}", path))?;
        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("seeking {:?} to {}", path, offset))?;
        let mut buf = Vec::with_capacity(max.min(1 << 20));
        file.take(max as u64)
            .read_to_end(&mut buf)
            .with_context(|| format!("reading {:?} at {}", path, offset))?;
        Ok(buf)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {:?}", path)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).with_context(|| format!("renaming {:?} to {:?}", from, to))
    }
}

/// First free `<path>.NNN` name, used when an existing file must be kept
/// aside before being recreated.
pub fn next_rotation_name(fs: &dyn FileSystem, path: &Path) -> Option<PathBuf> {
    (0..1000).map(|n| rotated_name(path, n)).find(|candidate| !fs.exists(candidate))
}

/// `<path>.NNN`
pub fn rotated_name(path: &Path, n: u32) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(format!(".{:03}", n));
    PathBuf::from(os)
}

/// Move an existing file out of the way, if there is one.
pub fn rotate_file(fs: &dyn FileSystem, path: &Path) -> Result<Option<PathBuf>> {
    if !fs.exists(path) {
        return Ok(None);
    }
    let target = next_rotation_name(fs, path)
        .with_context(|| format!("no free rotation slot left for {:?}", path))?;
    fs.rename(path, &target)?;
    Ok(Some(target))
}
