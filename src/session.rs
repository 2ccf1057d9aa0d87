//! Per-run state shared by every evaluator of one parse.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::diagnostics::Diagnostic;
use crate::frontend::env::InputVars;
use crate::loader::{FsLoader, Loader};
use crate::modules::manifest::{Manifest, ManifestModule, MANIFEST_PATH};
use crate::modules::{ModuleResolver, ResolverOptions};
use crate::parser::{self, ParsedFile};

pub const DEFAULT_MAX_ITERATIONS: usize = 32;

/// How an evaluator orders its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum EvalMode {
    /// Walk the dependency graph, then finish with a fixpoint pass.
    #[default]
    Graph,
    /// Repeat full evaluation passes until nothing changes.
    Loop,
}

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub var_files: Vec<PathBuf>,
    pub inputs: InputVars,
    pub max_iterations: usize,
    pub mode: EvalMode,
    /// Fail on the first file that does not parse.
    pub stop_on_error: bool,
    pub workspace: String,
    /// Resolve and download module sources before evaluating. When off,
    /// an existing manifest is still used.
    pub resolve_modules: bool,
    pub resolver: ResolverOptions,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            var_files: Vec::new(),
            inputs: InputVars::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            mode: EvalMode::default(),
            stop_on_error: false,
            workspace: "default".to_string(),
            resolve_modules: true,
            resolver: ResolverOptions::default(),
        }
    }
}

/// Serializes the parts of graph walks that write to shared scopes.
pub struct EvaluationLock {
    name: &'static str,
    inner: Mutex<()>,
}

impl EvaluationLock {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        log::trace!("acquiring {}", self.name);
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Session<'a> {
    loader: &'a dyn Loader,
    root: PathBuf,
    options: ParseOptions,
    manifest: Mutex<Option<Manifest>>,
    /// Manifest keys the resolver already reported as failed.
    unresolved: Mutex<BTreeSet<String>>,
    parsed: Mutex<HashMap<PathBuf, Vec<ParsedFile>>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
    lock: EvaluationLock,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl<'a> Session<'a> {
    pub fn new(loader: &'a dyn Loader, root: &Path, mut options: ParseOptions) -> Self {
        if options.resolver.cache_dir.as_os_str().is_empty() {
            options.resolver.cache_dir = root.to_path_buf();
        }
        Self {
            loader,
            root: root.to_path_buf(),
            options,
            manifest: Mutex::new(None),
            unresolved: Mutex::new(BTreeSet::new()),
            parsed: Mutex::new(HashMap::new()),
            diagnostics: Mutex::new(Vec::new()),
            lock: EvaluationLock::new("evaluation"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn cache_dir(&self) -> &Path {
        &self.options.resolver.cache_dir
    }

    pub fn lock(&self) -> &EvaluationLock {
        &self.lock
    }

    /// Loader for a module directory. Downloaded modules always live on
    /// the real filesystem.
    pub fn loader_for(&self, remote: bool) -> &dyn Loader {
        if remote {
            &FsLoader
        } else {
            self.loader
        }
    }

    /// Run the module resolver over the root, or fall back to whatever
    /// manifest a previous run left behind.
    pub fn resolve_modules(&self) -> Result<()> {
        let manifest = if self.options.resolve_modules {
            let mut resolver = ModuleResolver::new(self.options.resolver.clone())?;
            let manifest = resolver.load(self.loader, &self.root)?;
            self.extend_diagnostics(resolver.take_diagnostics());
            guard(&self.unresolved).extend(resolver.failed_keys().iter().cloned());
            log::debug!("resolved {} remote modules", manifest.modules.len());
            Some(manifest)
        } else {
            Manifest::read(&self.cache_dir().join(MANIFEST_PATH)).unwrap_or_else(|err| {
                log::debug!("ignoring unreadable module manifest: {err:#}");
                None
            })
        };
        *guard(&self.manifest) = manifest;
        Ok(())
    }

    pub fn manifest_entry(&self, key: &str) -> Option<ManifestModule> {
        guard(&self.manifest).as_ref()?.find(key).cloned()
    }

    /// Whether resolving the call behind `key` already failed this run.
    pub fn resolution_failed(&self, key: &str) -> bool {
        guard(&self.unresolved).contains(key)
    }

    pub fn manifest(&self) -> Option<Manifest> {
        guard(&self.manifest).clone()
    }

    /// Parse a module directory once per run.
    pub fn parse_module(&self, dir: &Path, remote: bool) -> Result<Vec<ParsedFile>> {
        if let Some(files) = guard(&self.parsed).get(dir) {
            return Ok(files.clone());
        }
        let (files, diagnostics) =
            parser::parse_directory(self.loader_for(remote), dir, self.options.stop_on_error)?;
        self.extend_diagnostics(diagnostics);
        guard(&self.parsed).insert(dir.to_path_buf(), files.clone());
        Ok(files)
    }

    pub fn push_diagnostic(&self, diagnostic: Diagnostic) {
        guard(&self.diagnostics).push(diagnostic);
    }

    pub fn extend_diagnostics(&self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        guard(&self.diagnostics).extend(diagnostics);
    }

    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *guard(&self.diagnostics))
    }
}
