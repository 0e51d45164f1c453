//! Filesystem access used while loading rules.
//!
//! `Include` targets and operator data files are read through this trait so
//! rule sets can be loaded from memory in tests or from an embedded bundle.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Read-only file access for the rule loader.
pub trait Filesystem: Send + Sync + fmt::Debug {
    /// Read a whole file as UTF-8 text.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Expand a glob pattern to matching paths, sorted.
    fn glob(&self, pattern: &str) -> io::Result<Vec<PathBuf>>;
}

/// The host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn glob(&self, pattern: &str) -> io::Result<Vec<PathBuf>> {
        let paths = glob::glob(pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let mut out = Vec::new();
        for entry in paths {
            out.push(entry.map_err(glob::GlobError::into_error)?);
        }
        out.sort();
        Ok(out)
    }
}

/// In-memory files keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilesystem {
    files: HashMap<PathBuf, String>,
}

impl MemoryFilesystem {
    /// Create an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file.
    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }
}

impl Filesystem for MemoryFilesystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn glob(&self, pattern: &str) -> io::Result<Vec<PathBuf>> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let mut out: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|p| pattern.matches_path(p))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_and_glob() {
        let fs = MemoryFilesystem::new()
            .with_file("/rules/b.conf", "B")
            .with_file("/rules/a.conf", "A")
            .with_file("/other/c.txt", "C");
        assert_eq!(fs.read_to_string(Path::new("/rules/a.conf")).unwrap(), "A");
        assert!(fs.read_to_string(Path::new("/missing")).is_err());
        let matched = fs.glob("/rules/*.conf").unwrap();
        assert_eq!(
            matched,
            vec![PathBuf::from("/rules/a.conf"), PathBuf::from("/rules/b.conf")]
        );
    }

    #[test]
    fn test_os_read_and_glob() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.conf"), "SecRuleEngine On").unwrap();
        let fs = OsFilesystem;
        let pattern = format!("{}/*.conf", dir.path().display());
        let found = fs.glob(&pattern).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(fs.read_to_string(&found[0]).unwrap(), "SecRuleEngine On");
    }
}
