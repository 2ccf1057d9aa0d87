use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Loader abstraction: lets callers control how files and directories are read.
pub trait Loader {
    fn load(&self, path: &Path) -> Result<String>;

    /// Direct children of `dir`, files and directories alike, sorted by path.
    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    fn is_dir(&self, path: &Path) -> bool;

    fn is_file(&self, path: &Path) -> bool {
        !self.is_dir(path) && self.load(path).is_ok()
    }

    /// An owned handle reading the same tree, for scopes that outlive the
    /// borrow this loader was handed out under.
    fn share(&self) -> Arc<dyn Loader + Send + Sync>;
}

/// Reads straight from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl Loader for FsLoader {
    fn load(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(dir)
            .with_context(|| format!("reading directory {}", dir.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn share(&self) -> Arc<dyn Loader + Send + Sync> {
        Arc::new(*self)
    }
}

/// In-memory file tree. Directories exist implicitly as ancestors of files.
#[derive(Debug, Default, Clone)]
pub struct MapLoader {
    files: BTreeMap<PathBuf, String>,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files.insert(path.into(), contents.into());
    }
}

impl Loader for MapLoader {
    fn load(&self, path: &Path) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing file: {}", path.display()))
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = self
            .files
            .keys()
            .filter_map(|file| {
                let rest = file.strip_prefix(dir).ok()?;
                let first = rest.components().next()?;
                Some(dir.join(first))
            })
            .collect();
        if entries.is_empty() && !self.is_dir(dir) {
            anyhow::bail!("missing directory: {}", dir.display());
        }
        entries.sort();
        entries.dedup();
        Ok(entries)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.files
            .keys()
            .any(|file| file != path && file.starts_with(path))
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn share(&self) -> Arc<dyn Loader + Send + Sync> {
        Arc::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_loader_lists_files_and_implied_dirs() {
        let loader = MapLoader::new()
            .with_file("/root/main.tf", "")
            .with_file("/root/vars.tf", "")
            .with_file("/root/mod/main.tf", "");

        let entries = loader.read_dir(Path::new("/root")).unwrap();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/root/main.tf"),
                PathBuf::from("/root/mod"),
                PathBuf::from("/root/vars.tf"),
            ]
        );
        assert!(loader.is_dir(Path::new("/root/mod")));
        assert!(loader.is_file(Path::new("/root/mod/main.tf")));
        assert!(!loader.is_dir(Path::new("/root/main.tf")));
    }

    #[test]
    fn map_loader_missing_directory_is_an_error() {
        let loader = MapLoader::new().with_file("/root/main.tf", "");
        assert!(loader.read_dir(Path::new("/elsewhere")).is_err());
        assert!(loader.load(Path::new("/root/other.tf")).is_err());
    }

    #[test]
    fn fs_loader_reads_real_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.tf"), "locals {}").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let entries = FsLoader.read_dir(dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(FsLoader.is_dir(&dir.path().join("nested")));
        assert_eq!(FsLoader.load(&dir.path().join("main.tf")).unwrap(), "locals {}");
    }
}
