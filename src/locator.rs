//! Discovery of independent project roots in a directory tree.

use anyhow::{Context as _, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::loader::Loader;
use crate::modules::source::{is_local, normalize_path};
use crate::parser::{self, ParsedFile};

pub const DEFAULT_MAX_DEPTH: usize = 5;
pub const ALL_PATHS_MAX_DEPTH: usize = 10;

/// Directory names that never hold projects of their own.
const SKIPPED_DIRS: &[&str] = &[".terraform", "node_modules", ".tfgraph", ".git"];

#[derive(Debug, Clone, Default)]
pub struct LocatorOptions {
    /// Globs matched against paths relative to the search root.
    pub exclude_paths: Vec<String>,
    /// Every directory with configuration files is a project, including
    /// module targets.
    pub all_paths: bool,
    /// Overrides the depth limit implied by `all_paths`.
    pub max_depth: Option<usize>,
}

impl LocatorOptions {
    pub fn max_depth(&self) -> usize {
        self.max_depth.unwrap_or(if self.all_paths {
            ALL_PATHS_MAX_DEPTH
        } else {
            DEFAULT_MAX_DEPTH
        })
    }
}

pub struct ProjectLocator<'a> {
    loader: &'a dyn Loader,
    options: LocatorOptions,
    excludes: GlobSet,
}

#[derive(Default)]
struct Walk {
    roots: BTreeSet<PathBuf>,
    module_dirs: BTreeSet<PathBuf>,
}

impl<'a> ProjectLocator<'a> {
    pub fn new(loader: &'a dyn Loader, options: LocatorOptions) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &options.exclude_paths {
            builder.add(
                Glob::new(pattern).with_context(|| format!("invalid exclude pattern {pattern}"))?,
            );
        }
        let excludes = builder.build().context("failed to build exclude patterns")?;
        Ok(Self {
            loader,
            options,
            excludes,
        })
    }

    /// Project roots under `root`, sorted. Directories that are only used
    /// as local module sources are left out unless `all_paths` is set.
    pub fn find_roots(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !self.loader.is_dir(root) {
            anyhow::bail!("{} is not a directory", root.display());
        }
        let root = normalize_path(root);
        let mut walk = Walk::default();
        self.visit(&root, &root, 0, &mut walk);

        let roots: Vec<PathBuf> = walk
            .roots
            .into_iter()
            .filter(|dir| self.options.all_paths || !walk.module_dirs.contains(dir))
            .collect();
        log::info!("found {} projects under {}", roots.len(), root.display());
        Ok(roots)
    }

    fn visit(&self, root: &Path, dir: &Path, depth: usize, walk: &mut Walk) {
        let files = match parser::parse_directory(self.loader, dir, false) {
            Ok((files, diagnostics)) => {
                for diagnostic in diagnostics {
                    log::debug!("{diagnostic}");
                }
                files
            }
            Err(err) => {
                log::warn!("skipping {}: {err:#}", dir.display());
                return;
            }
        };

        for call in parser::module_calls(&files) {
            if is_local(&call.source) {
                walk.module_dirs.insert(normalize_path(&dir.join(&call.source)));
            }
        }

        let has_config = !files.is_empty();
        let is_root = has_config
            && (dir == root || self.options.all_paths || declares_project(&files));
        if is_root {
            log::debug!("project root {}", dir.display());
            walk.roots.insert(dir.to_path_buf());
        }

        if depth >= self.options.max_depth() {
            return;
        }
        let children = self.loader.read_dir(dir).unwrap_or_default();
        for child in children.into_iter().filter(|c| self.loader.is_dir(c)) {
            if self.skip_dir(root, &child, walk) {
                continue;
            }
            self.visit(root, &child, depth + 1, walk);
        }
    }

    fn skip_dir(&self, root: &Path, dir: &Path, walk: &Walk) -> bool {
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.starts_with('.') || SKIPPED_DIRS.contains(&name) {
            return true;
        }
        if !self.options.all_paths && walk.module_dirs.contains(dir) {
            log::debug!("skipping module directory {}", dir.display());
            return true;
        }
        let relative = dir.strip_prefix(root).unwrap_or(dir);
        if self.excludes.is_match(relative) || self.excludes.is_match(dir) {
            log::debug!("excluded {}", dir.display());
            return true;
        }
        false
    }
}

/// A provider block or a `terraform { backend }` block marks a directory as
/// something that is applied on its own.
fn declares_project(files: &[ParsedFile]) -> bool {
    files.iter().any(|file| {
        file.body.blocks().any(|block| match block.identifier() {
            "provider" => true,
            "terraform" => block.body().blocks().any(|b| b.identifier() == "backend"),
            _ => false,
        })
    })
}
