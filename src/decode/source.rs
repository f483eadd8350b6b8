use std::io;
use std::path::PathBuf;

/// Resolves a resource identifier to its encoded bytes.
pub trait ResourceSource: Send + Sync {
    fn read(&self, id: &str) -> io::Result<Vec<u8>>;
}

/// Treats resource identifiers as filesystem paths, optionally relative to a root.
#[derive(Debug, Clone, Default)]
pub struct FsSource {
    root: Option<PathBuf>,
}

impl FsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(id),
            None => PathBuf::from(id),
        }
    }
}

impl ResourceSource for FsSource {
    fn read(&self, id: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.path_for(id))
    }
}
