use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::frontend::env::InputVars;
use crate::locator::LocatorOptions;
use crate::session::{EvalMode, ParseOptions};

pub const CONFIG_FILE: &str = "tfgraph.toml";

/// Global settings for tfgraph
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Default variable files, relative to the project
    #[serde(default)]
    pub var_files: Vec<String>,
    /// Input variable overrides
    #[serde(default)]
    pub inputs: BTreeMap<String, toml::Value>,
    /// Globs skipped by `tfgraph locate`
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    /// Treat every directory with configuration files as a project
    #[serde(default)]
    pub all_paths: bool,
    pub max_iterations: Option<usize>,
    pub mode: Option<EvalMode>,
    /// Registry used for sources without an explicit host
    pub registry_host: Option<String>,
    #[serde(default)]
    pub stop_on_error: bool,
    pub workspace: Option<String>,
}

/// A named project root with its own inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub var_files: Vec<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, toml::Value>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

impl Settings {
    /// Parse options for a project at `root`; relative var files resolve
    /// against it.
    pub fn parse_options(&self, root: &Path) -> Result<ParseOptions> {
        let mut options = ParseOptions {
            var_files: self.var_files.iter().map(|f| root.join(f)).collect(),
            inputs: input_vars(&self.inputs)?,
            stop_on_error: self.stop_on_error,
            ..ParseOptions::default()
        };
        if let Some(max) = self.max_iterations {
            options.max_iterations = max;
        }
        if let Some(mode) = self.mode {
            options.mode = mode;
        }
        if let Some(workspace) = &self.workspace {
            options.workspace = workspace.clone();
        }
        if let Some(host) = &self.registry_host {
            options.resolver.registry_host = host.clone();
        }
        Ok(options)
    }

    pub fn locator_options(&self) -> LocatorOptions {
        LocatorOptions {
            exclude_paths: self.exclude_paths.clone(),
            all_paths: self.all_paths,
            ..LocatorOptions::default()
        }
    }
}

impl Config {
    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Global settings overlaid with one project's var files and inputs.
    pub fn project_options(&self, project: &ProjectConfig, base: &Path) -> Result<(PathBuf, ParseOptions)> {
        let root = base.join(&project.path);
        let mut options = self.settings.parse_options(&root)?;
        options
            .var_files
            .extend(project.var_files.iter().map(|f| root.join(f)));
        options.inputs.extend(input_vars(&project.inputs)?);
        Ok((root, options))
    }
}

fn input_vars(raw: &BTreeMap<String, toml::Value>) -> Result<InputVars> {
    let mut vars = InputVars::default();
    for (name, value) in raw {
        let json = serde_json::to_value(value)
            .with_context(|| format!("invalid value for input {name}"))?;
        vars.insert_json(name.clone(), json)?;
    }
    Ok(vars)
}

/// Load configuration from tfgraph.toml file
pub fn load_config() -> Result<Option<Config>> {
    load_config_from_path(Path::new(CONFIG_FILE))
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(config))
}
