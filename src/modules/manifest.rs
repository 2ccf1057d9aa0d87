use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::frontend::reference::strip_selectors;

pub const MANIFEST_VERSION: &str = "2.0";

/// Download directory, relative to the cache root.
pub const DOWNLOAD_DIR: &str = ".tfgraph/modules";

/// Manifest location, relative to the cache root.
pub const MANIFEST_PATH: &str = ".tfgraph/modules/manifest.json";

/// Persisted record of how each non-local module call was resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub modules: Vec<ManifestModule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestModule {
    /// Dotted module call path, e.g. `network.subnets`.
    pub key: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Directory holding the module, relative to the cache root unless
    /// absolute.
    pub dir: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub download_url: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub public: bool,
}

impl Manifest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            path: path.into(),
            modules: Vec::new(),
        }
    }

    /// Read a manifest. A missing file, or one written in another format
    /// version, yields `Ok(None)`.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading module manifest {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .with_context(|| format!("parsing module manifest {}", path.display()))?;
        if manifest.version != MANIFEST_VERSION {
            log::debug!(
                "ignoring module manifest {} with version {:?}",
                path.display(),
                manifest.version
            );
            return Ok(None);
        }
        Ok(Some(manifest))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing module manifest {}", path.display()))
    }

    pub fn find(&self, key: &str) -> Option<&ManifestModule> {
        self.modules.iter().find(|m| m.key == key)
    }

    /// Insert or replace the entry for `module.key`.
    pub fn upsert(&mut self, module: ManifestModule) {
        match self.modules.iter_mut().find(|m| m.key == module.key) {
            Some(existing) => *existing = module,
            None => self.modules.push(module),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl ManifestModule {
    /// Location of the module. Downloaded modules are stored relative to the
    /// cache root; local ones keep the path they were resolved to.
    pub fn resolved_dir(&self, cache_root: &Path) -> PathBuf {
        let dir = Path::new(&self.dir);
        if dir.is_absolute() || super::source::is_local(&self.source) {
            dir.to_path_buf()
        } else {
            super::source::normalize_path(&cache_root.join(dir))
        }
    }
}

/// Manifest key for a module block's full name: `module.a[0].module.b`
/// becomes `a.b`.
pub fn manifest_key(full_name: &str) -> String {
    let trimmed = full_name.strip_prefix("module.").unwrap_or(full_name);
    strip_selectors(&trimmed.replace(".module.", "."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_drop_module_markers_and_selectors() {
        assert_eq!(manifest_key("module.vpc"), "vpc");
        assert_eq!(manifest_key("module.a[0].module.b"), "a.b");
        assert_eq!(manifest_key("module.a[\"x.y]\"].module.b[\"k\"]"), "a.b");
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_PATH);
        let mut manifest = Manifest::new(dir.path().display().to_string());
        manifest.upsert(ManifestModule {
            key: "vpc".into(),
            source: "registry.terraform.io/terraform-aws-modules/vpc/aws".into(),
            version: "5.1.0".into(),
            dir: ".tfgraph/modules/abc".into(),
            ..Default::default()
        });
        manifest.write(&path).unwrap();

        let read = Manifest::read(&path).unwrap().unwrap();
        assert_eq!(read, manifest);
        assert_eq!(
            read.find("vpc").unwrap().resolved_dir(dir.path()),
            dir.path().join(".tfgraph/modules/abc")
        );
    }

    #[test]
    fn other_versions_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(&path, r#"{"version":"1.0","modules":[]}"#).unwrap();
        assert!(Manifest::read(&path).unwrap().is_none());
        assert!(Manifest::read(&dir.path().join("missing.json")).unwrap().is_none());
    }
}
