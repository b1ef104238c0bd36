// src/fs/mock.rs

use super::FileSystem;
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir,
}

/// In-memory filesystem. Clones share the same tree, so a test can keep a
/// handle and grow or shrink a log while the tailer polls it.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, MockEntry>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a file, along with its missing parent directories.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        let mut files = self.entries();
        Self::create_parents(&mut files, path);
        files.insert(path.to_path_buf(), MockEntry::File(content.into()));
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut files = self.entries();
        Self::create_parents(&mut files, path);
        files.entry(path.to_path_buf()).or_insert(MockEntry::Dir);
    }

    /// Append bytes to a file, creating it when missing.
    pub fn append_bytes(&self, path: impl AsRef<Path>, content: &[u8]) {
        let path = path.as_ref();
        let mut files = self.entries();
        if let Some(MockEntry::File(existing)) = files.get_mut(path) {
            existing.extend_from_slice(content);
            return;
        }
        Self::create_parents(&mut files, path);
        files.insert(path.to_path_buf(), MockEntry::File(content.to_vec()));
    }

    fn create_parents(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            files.entry(ancestor.to_path_buf()).or_insert(MockEntry::Dir);
        }
    }

    fn file<T>(&self, path: &Path, read: impl FnOnce(&[u8]) -> T) -> Result<T> {
        match self.entries().get(path) {
            Some(MockEntry::File(content)) => Ok(read(content)),
            Some(MockEntry::Dir) => Err(anyhow!("is a directory: {:?}", path)),
            None => Err(anyhow!("file not found: {:?}", path)),
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.file(path, <[u8]>::to_vec)?;
        String::from_utf8(bytes).map_err(|e| anyhow!("invalid UTF-8 in {:?}: {}", path, e))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn append(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.append_bytes(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.entries().contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.entries().get(path), Some(MockEntry::File(_)))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.entries().get(path), Some(MockEntry::Dir))
    }

    fn len(&self, path: &Path) -> Result<Option<u64>> {
        match self.entries().get(path) {
            Some(MockEntry::File(content)) => Ok(Some(content.len() as u64)),
            Some(MockEntry::Dir) => Err(anyhow!("is a directory: {:?}", path)),
            None => Ok(None),
        }
    }

    fn read_at(&self, path: &Path, offset: u64, max: usize) -> Result<Vec<u8>> {
        self.file(path, |content| {
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
            let end = start.saturating_add(max).min(content.len());
            content[start..end].to_vec()
        })
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut files = self.entries();
        if let Some(MockEntry::File(_)) = files.get(path) {
            files.remove(path);
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.entries();
        let entry = files.remove(from).ok_or_else(|| anyhow!("file not found: {:?}", from))?;
        Self::create_parents(&mut files, to);
        files.insert(to.to_path_buf(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growing_file_is_visible_through_clones() {
        let fs = MockFileSystem::new();
        let handle = fs.clone();
        fs.add_file("/run/wf.dag.dagman.out", "a\n");
        handle.append_bytes("/run/wf.dag.dagman.out", b"b\n");

        let path = Path::new("/run/wf.dag.dagman.out");
        assert_eq!(fs.len(path).unwrap(), Some(4));
        assert_eq!(fs.read_at(path, 2, 10).unwrap(), b"b\n");
        assert!(fs.is_dir(Path::new("/run")));
    }

    #[test]
    fn rename_moves_content() {
        let fs = MockFileSystem::new();
        fs.add_file("/run/jobstate.log", "x");
        fs.rename(Path::new("/run/jobstate.log"), Path::new("/run/jobstate.log.000")).unwrap();
        assert!(!fs.exists(Path::new("/run/jobstate.log")));
        assert_eq!(fs.read_to_string(Path::new("/run/jobstate.log.000")).unwrap(), "x");
    }
}
