//! Reading configuration directories through a [`Loader`].

use anyhow::{bail, Context, Result};
use hcl::eval::Evaluate;
use std::path::{Path, PathBuf};

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::frontend::builtins::create_context;
use crate::frontend::env::InputVars;
use crate::frontend::json;
use crate::loader::Loader;

/// One parsed configuration file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub path: PathBuf,
    pub body: hcl::Body,
}

/// A `module` block as seen before evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCallSpec {
    pub name: String,
    pub source: String,
    pub version: String,
}

pub fn is_config_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "tf") || is_json_file(path)
}

fn is_json_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(json::is_json_config)
}

/// Parse one configuration file in either syntax.
pub fn parse_file(path: &Path, src: &str) -> Result<hcl::Body> {
    if is_json_file(path) {
        json::body_from_json(src)
    } else {
        hcl::from_str::<hcl::Body>(src).map_err(Into::into)
    }
}

/// `*.tf` and `*.tf.json` files directly inside `dir`, sorted.
pub fn config_files(loader: &dyn Loader, dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = loader
        .read_dir(dir)
        .with_context(|| format!("reading configuration directory {}", dir.display()))?;
    Ok(entries
        .into_iter()
        .filter(|p| is_config_file(p) && !loader.is_dir(p))
        .collect())
}

/// Parse every configuration file in `dir`. Files that fail to parse are
/// reported as diagnostics unless `stop_on_error` is set.
pub fn parse_directory(
    loader: &dyn Loader,
    dir: &Path,
    stop_on_error: bool,
) -> Result<(Vec<ParsedFile>, Vec<Diagnostic>)> {
    let mut files = Vec::new();
    let mut diagnostics = Vec::new();
    for path in config_files(loader, dir)? {
        let src = loader.load(&path)?;
        match parse_file(&path, &src) {
            Ok(body) => files.push(ParsedFile { path, body }),
            Err(err) if stop_on_error => {
                bail!("failed to parse {}: {:#}", path.display(), err)
            }
            Err(err) => {
                log::warn!("skipping {}: {:#}", path.display(), err);
                diagnostics.push(
                    Diagnostic::new(DiagnosticKind::Parse, format!("{err:#}"))
                        .with_subject(path.display().to_string()),
                );
            }
        }
    }
    log::debug!("parsed {} files in {}", files.len(), dir.display());
    Ok((files, diagnostics))
}

/// Module calls declared in `files`, with their statically known source
/// and version. Calls whose source is not a plain string are skipped.
pub fn module_calls(files: &[ParsedFile]) -> Vec<ModuleCallSpec> {
    let mut calls = Vec::new();
    for file in files {
        for block in file.body.blocks().filter(|b| b.identifier() == "module") {
            let Some(name) = block.labels().first().map(|l| l.as_str().to_string()) else {
                continue;
            };
            let Some(source) = static_string(block.body(), "source") else {
                log::debug!("module {name} in {} has no static source", file.path.display());
                continue;
            };
            calls.push(ModuleCallSpec {
                name,
                source,
                version: static_string(block.body(), "version").unwrap_or_default(),
            });
        }
    }
    calls
}

/// Evaluate an attribute with no variables in scope.
pub fn static_string(body: &hcl::Body, name: &str) -> Option<String> {
    let attr = body.attributes().find(|a| a.key() == name)?;
    match attr.expr().evaluate(&create_context()) {
        Ok(hcl::Value::String(s)) => Some(s),
        _ => None,
    }
}

/// Collect input variables in precedence order: `terraform.tfvars`, then
/// `*.auto.tfvars`, then `var_files`, then `inputs`. The JSON form of each
/// file is read alongside it.
///
/// A default or auto file that does not parse is skipped with a diagnostic;
/// an explicitly requested var file that does not parse is an error.
pub fn load_input_vars(
    loader: &dyn Loader,
    dir: &Path,
    var_files: &[PathBuf],
    inputs: &InputVars,
) -> Result<(InputVars, Vec<Diagnostic>)> {
    let mut vars = InputVars::default();
    let mut diagnostics = Vec::new();

    let mut implicit: Vec<PathBuf> = ["terraform.tfvars", "terraform.tfvars.json"]
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| loader.is_file(path))
        .collect();
    let mut auto_files: Vec<PathBuf> = loader
        .read_dir(dir)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".auto.tfvars") || n.ends_with(".auto.tfvars.json"))
        })
        .collect();
    auto_files.sort();
    implicit.extend(auto_files);

    for file in implicit {
        match read_var_file(loader, &file) {
            Ok(file_vars) => vars.extend(file_vars),
            Err(err) => {
                log::warn!("skipping {}: {:#}", file.display(), err);
                diagnostics.push(
                    Diagnostic::new(DiagnosticKind::Parse, format!("{err:#}"))
                        .with_subject(file.display().to_string()),
                );
            }
        }
    }

    for file in var_files {
        let path = if file.is_absolute() {
            file.clone()
        } else {
            dir.join(file)
        };
        vars.extend(read_var_file(loader, &path)?);
    }

    vars.extend(inputs.clone());
    Ok((vars, diagnostics))
}

fn read_var_file(loader: &dyn Loader, path: &Path) -> Result<InputVars> {
    let src = loader.load(path)?;
    let vars = if path.extension().is_some_and(|ext| ext == "json") {
        InputVars::from_tfvars_json(&src)
    } else {
        InputVars::from_tfvars(&src)
    };
    vars.with_context(|| format!("loading variables from {}", path.display()))
}
