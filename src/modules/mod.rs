//! Resolving module call sources to local directories.
//!
//! Resolution order for one call is: a matching manifest entry, a local path,
//! a registry lookup, then any other remote source.

pub mod fetch;
pub mod manifest;
pub mod registry;
pub mod source;
pub mod version;

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::loader::{FsLoader, Loader};
use crate::parser::{self, ModuleCallSpec};
use fetch::PackageFetcher;
use manifest::{Manifest, ManifestModule, DOWNLOAD_DIR, MANIFEST_PATH};
use registry::RegistryClient;
use source::{download_dest, is_local, join_subdir, normalize_path, split_subdir, RegistryAddress};
use version::Constraint;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("invalid version {0:?}")]
    InvalidVersion(String),
    #[error("invalid version constraint {0:?}")]
    InvalidConstraint(String),
    #[error("no matching version found for constraint {constraint:?}")]
    NoMatchingVersion { constraint: String },
    #[error("invalid registry source {addr:?}: {reason}")]
    InvalidRegistrySource { addr: String, reason: String },
    #[error("unsupported module source {0:?}")]
    UnsupportedSource(String),
    #[error("invalid submodule path {0:?}")]
    InvalidSubdir(String),
    #[error("registry request to {url} failed: {message}")]
    Registry { url: String, message: String },
    #[error("download URL {url} has no X-Terraform-Get header (status {status})")]
    MissingDownloadLocation { url: String, status: u16 },
    #[error("failed to fetch {addr}: {message}")]
    Fetch { addr: String, message: String },
    #[error("module {key} with source {addr:?} has not been downloaded")]
    NotDownloaded { key: String, addr: String },
}

/// Settings for a [`ModuleResolver`].
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Directory holding `.tfgraph/modules`. Empty means the project root.
    pub cache_dir: PathBuf,
    pub registry_host: String,
    /// Fixed module service URL, skipping host discovery.
    pub registry_url: Option<String>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::new(),
            registry_host: source::DEFAULT_REGISTRY_HOST.to_string(),
            registry_url: None,
        }
    }
}

pub struct ModuleResolver {
    options: ResolverOptions,
    registry: RegistryClient,
    fetcher: PackageFetcher,
    /// Entries from the manifest found on disk at the start of the run.
    cached: Manifest,
    manifest_existed: bool,
    diagnostics: Vec<Diagnostic>,
    /// Manifest keys of calls that failed to resolve.
    failed: BTreeSet<String>,
}

impl ModuleResolver {
    pub fn new(options: ResolverOptions) -> Result<Self> {
        let mut registry = RegistryClient::new()?;
        if let Some(url) = &options.registry_url {
            registry = registry.with_base_url(url)?;
        }
        let manifest_path = options.cache_dir.join(MANIFEST_PATH);
        let existing = match Manifest::read(&manifest_path) {
            Ok(existing) => existing,
            Err(err) => {
                log::debug!("could not read module manifest: {err:#}");
                None
            }
        };
        Ok(Self {
            registry,
            fetcher: PackageFetcher::new()?,
            manifest_existed: existing.is_some(),
            cached: existing.unwrap_or_default(),
            options,
            diagnostics: Vec::new(),
            failed: BTreeSet::new(),
        })
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.options.cache_dir.join(MANIFEST_PATH)
    }

    fn download_dir(&self) -> PathBuf {
        self.options.cache_dir.join(DOWNLOAD_DIR)
    }

    /// Problems recorded so far, drained.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Keys of the module calls that could not be resolved.
    pub fn failed_keys(&self) -> &BTreeSet<String> {
        &self.failed
    }

    /// Resolve every module call reachable from `root` and persist the
    /// manifest. Calls that fail to resolve are logged and skipped. Failing
    /// to write the manifest is fatal.
    pub fn load(&mut self, loader: &dyn Loader, root: &Path) -> Result<Manifest> {
        let mut manifest = Manifest::new(root.display().to_string());
        self.load_modules(loader, root, "", &mut manifest, 0);

        if !manifest.is_empty() || self.manifest_existed {
            let path = self.manifest_path();
            manifest
                .write(&path)
                .with_context(|| format!("persisting module manifest for {}", root.display()))?;
            self.manifest_existed = true;
        }
        self.cached = manifest.clone();
        Ok(manifest)
    }

    fn load_modules(
        &mut self,
        loader: &dyn Loader,
        dir: &Path,
        prefix: &str,
        manifest: &mut Manifest,
        depth: usize,
    ) {
        // guard against modules that call themselves
        if depth > 32 {
            log::warn!("module nesting too deep at {}", dir.display());
            return;
        }
        let files = match parser::parse_directory(loader, dir, false) {
            Ok((files, _)) => files,
            Err(err) => {
                self.record(prefix.trim_end_matches('.'), &format!("{err:#}"));
                return;
            }
        };
        for call in parser::module_calls(&files) {
            let key = format!("{prefix}{}", call.name);
            match self.resolve_call(loader, &key, &call, dir) {
                Ok(module) => {
                    let module_dir = module.resolved_dir(&self.options.cache_dir);
                    // downloaded modules always live on the real filesystem
                    let child_loader: &dyn Loader = if is_local(&module.source) {
                        loader
                    } else {
                        &FsLoader
                    };
                    if !is_local(&module.source) {
                        manifest.upsert(module);
                    }
                    self.load_modules(child_loader, &module_dir, &format!("{key}."), manifest, depth + 1);
                }
                Err(err) => {
                    log::warn!("failed to load module {key}: {err:#}");
                    self.record(&key, &format!("{err:#}"));
                    self.failed.insert(key);
                }
            }
        }
    }

    fn record(&mut self, key: &str, message: &str) {
        let diag = Diagnostic::new(DiagnosticKind::ModuleLoad, message);
        self.diagnostics.push(if key.is_empty() {
            diag
        } else {
            diag.with_subject(format!("module.{key}"))
        });
    }

    /// Resolve one call, preferring the cached manifest entry.
    pub fn resolve_call(
        &mut self,
        loader: &dyn Loader,
        key: &str,
        call: &ModuleCallSpec,
        parent_dir: &Path,
    ) -> Result<ManifestModule> {
        if let Some(cached) = self.cached_entry(loader, key, call) {
            log::debug!("module {key} already loaded");
            return Ok(cached);
        }

        if is_local(&call.source) {
            let dir = normalize_path(&parent_dir.join(&call.source));
            log::debug!("loading local module {key} from {}", dir.display());
            return Ok(ManifestModule {
                key: key.to_string(),
                source: call.source.clone(),
                dir: dir.display().to_string(),
                ..Default::default()
            });
        }

        let (addr, subdir) = split_subdir(&call.source)?;
        if let Ok(address) = RegistryAddress::parse(&addr, &self.options.registry_host) {
            return self.load_registry_module(key, &address, &subdir, &call.version);
        }
        self.load_remote_module(key, &call.source, &addr, &subdir)
    }

    /// A manifest entry is reused when its source still matches and, if the
    /// call has a constraint, the cached version satisfies it.
    fn cached_entry(&self, loader: &dyn Loader, key: &str, call: &ModuleCallSpec) -> Option<ManifestModule> {
        let entry = self.cached.find(key)?;
        if !same_source(&entry.source, &call.source, &self.options.registry_host) {
            return None;
        }
        if !call.version.is_empty() {
            let constraint: Constraint = call.version.parse().ok()?;
            if !constraint.allows(&entry.version) {
                return None;
            }
        }
        let dir = entry.resolved_dir(&self.options.cache_dir);
        if !loader.is_dir(&dir) && !dir.is_dir() {
            log::debug!("module {key} cannot be loaded from {}, re-loading", dir.display());
            return None;
        }
        Some(entry.clone())
    }

    fn load_registry_module(
        &mut self,
        key: &str,
        address: &RegistryAddress,
        subdir: &str,
        constraint: &str,
    ) -> Result<ManifestModule> {
        let lookup = self
            .registry
            .lookup(address, constraint)
            .with_context(|| format!("looking up registry module {address}"))?;
        let dest = download_dest(&self.download_dir(), &address.to_string(), &lookup.version);
        let download_url = self.registry.download_location(&lookup)?;
        let public = self.registry.is_public(address);

        if !dest.exists() {
            log::info!("downloading module {address} {}", lookup.version);
            self.fetcher.fetch(&download_url, &dest)?;
        }

        Ok(ManifestModule {
            key: key.to_string(),
            source: join_subdir(&address.to_string(), subdir),
            version: lookup.version,
            dir: self.relative_dir(&dest, subdir),
            download_url,
            public,
        })
    }

    fn load_remote_module(
        &mut self,
        key: &str,
        source: &str,
        addr: &str,
        subdir: &str,
    ) -> Result<ManifestModule> {
        let dest = download_dest(&self.download_dir(), addr, "");
        if !dest.exists() {
            self.fetcher.fetch(addr, &dest)?;
        }
        Ok(ManifestModule {
            key: key.to_string(),
            source: source.to_string(),
            dir: self.relative_dir(&dest, subdir),
            ..Default::default()
        })
    }

    fn relative_dir(&self, dest: &Path, subdir: &str) -> String {
        let dir = dest
            .strip_prefix(&self.options.cache_dir)
            .unwrap_or(dest)
            .join(subdir);
        normalize_path(&dir).display().to_string()
    }

    /// Number of remote downloads made this run.
    pub fn downloads(&self) -> usize {
        self.fetcher.downloads()
    }
}

/// Registry sources are stored with their host, while calls may omit the
/// default one.
fn same_source(cached: &str, called: &str, default_host: &str) -> bool {
    if cached == called {
        return true;
    }
    match (split_subdir(cached), split_subdir(called)) {
        (Ok((cached_addr, cached_sub)), Ok((called_addr, called_sub))) if cached_sub == called_sub => {
            match (
                RegistryAddress::parse(&cached_addr, default_host),
                RegistryAddress::parse(&called_addr, default_host),
            ) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MapLoader;

    fn resolver(cache: &Path) -> ModuleResolver {
        ModuleResolver::new(ResolverOptions {
            cache_dir: cache.to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn local_modules_resolve_without_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = MapLoader::new()
            .with_file("root/main.tf", r#"module "net" { source = "./modules/net" }"#)
            .with_file("root/modules/net/main.tf", r#"module "sub" { source = "../sub" }"#)
            .with_file("root/modules/sub/main.tf", "");
        let mut r = resolver(tmp.path());
        let manifest = r.load(&loader, Path::new("root")).unwrap();
        assert!(manifest.is_empty());
        assert!(r.take_diagnostics().is_empty());
        assert!(!r.manifest_path().exists());
    }

    #[test]
    fn unresolvable_calls_become_diagnostics() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = MapLoader::new().with_file(
            "root/main.tf",
            r#"
            module "odd" { source = "ftp-ish/thing" }
            module "xz" { source = "https://example.com/m.tar.xz" }
            "#,
        );
        let mut r = resolver(tmp.path());
        let manifest = r.load(&loader, Path::new("root")).unwrap();
        assert!(manifest.is_empty());
        let diags = r.take_diagnostics();
        assert_eq!(diags.len(), 2);
        assert!(r.failed_keys().contains("odd"));
        assert!(r.failed_keys().contains("xz"));
        assert_eq!(diags[0].subject.as_deref(), Some("module.odd"));
        assert_eq!(diags[1].kind, DiagnosticKind::ModuleLoad);
    }

    #[test]
    fn stale_manifest_entries_are_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let module_dir = tmp.path().join(".tfgraph/modules/cached");
        std::fs::create_dir_all(&module_dir).unwrap();
        let mut existing = Manifest::new("root");
        existing.upsert(ManifestModule {
            key: "vpc".into(),
            source: "registry.terraform.io/terraform-aws-modules/vpc/aws".into(),
            version: "5.1.0".into(),
            dir: ".tfgraph/modules/cached".into(),
            ..Default::default()
        });
        existing.write(&tmp.path().join(MANIFEST_PATH)).unwrap();

        let loader = MapLoader::new().with_file(
            "root/main.tf",
            r#"
            module "vpc" {
              source  = "terraform-aws-modules/vpc/aws"
              version = ">= 5.0"
            }
            "#,
        );
        let mut r = resolver(tmp.path());
        let manifest = r.load(&loader, Path::new("root")).unwrap();
        assert_eq!(manifest.find("vpc").unwrap().version, "5.1.0");
        assert_eq!(r.downloads(), 0);
        assert!(r.take_diagnostics().is_empty());
    }

    #[test]
    fn same_source_ignores_default_host() {
        assert!(same_source(
            "registry.terraform.io/a/b/c//sub",
            "a/b/c//sub",
            source::DEFAULT_REGISTRY_HOST
        ));
        assert!(!same_source("registry.terraform.io/a/b/c", "a/b/d", source::DEFAULT_REGISTRY_HOST));
    }
}
