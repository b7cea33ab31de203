// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir(Vec<String>), // child names
}

/// In-memory tree used by tests to lay out packages without touching disk.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    entries: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(PathBuf::from("/"), MockEntry::Dir(Vec::new()));
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    /// Add a file, creating its parent directories.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut entries = self.entries.lock();
        entries.insert(path.clone(), MockEntry::File(content.into()));
        if let Some(parent) = path.parent() {
            Self::ensure_dir(&mut entries, parent);
            Self::link_child(&mut entries, parent, &path);
        }
    }

    /// Add an (empty) directory, creating its parents.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut entries = self.entries.lock();
        Self::ensure_dir(&mut entries, path.as_ref());
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut entries = self.entries.lock();
        entries.retain(|p, _| !p.starts_with(path));
        if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
            if let Some(MockEntry::Dir(children)) = entries.get_mut(parent) {
                children.retain(|c| c.as_str() != name.to_string_lossy());
            }
        }
    }

    fn ensure_dir(entries: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        if entries.contains_key(path) {
            return;
        }
        entries.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));
        if let Some(parent) = path.parent() {
            if parent != path && !parent.as_os_str().is_empty() {
                Self::ensure_dir(entries, parent);
                Self::link_child(entries, parent, path);
            }
        }
    }

    fn link_child(entries: &mut HashMap<PathBuf, MockEntry>, parent: &Path, child: &Path) {
        let Some(name) = child.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        if let Some(MockEntry::Dir(children)) = entries.get_mut(parent) {
            if !children.iter().any(|c| c == name) {
                children.push(name.to_string());
            }
        }
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.entries.lock().contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.entries.lock().get(path), Some(MockEntry::File(_)))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.entries.lock().get(path), Some(MockEntry::Dir(_)))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        match self.entries.lock().get(path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some(MockEntry::File(_)) = entries.get(path) {
            return Err(anyhow!("File exists: {:?}", path));
        }
        Self::ensure_dir(&mut entries, path);
        Ok(())
    }
}
