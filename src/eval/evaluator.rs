use anyhow::{bail, Context as _, Result};
use hcl::value::Map;
use hcl::Value;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use super::module::{Module, ModuleCall};
use crate::context::Context;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::frontend::builtins::filesystem::FileScope;
use crate::frontend::env::InputVars;
use crate::frontend::for_each::key_segment;
use crate::frontend::{Attribute, BlockId};
use crate::graph::Graph;
use crate::modules::manifest::manifest_key;
use crate::modules::source::{is_local, normalize_path};
use crate::modules::ModuleError;
use crate::session::{EvalMode, Session};

/// Module calls nested deeper than this are not instantiated.
const MAX_MODULE_DEPTH: usize = 32;

/// Variable names that usually hold secrets. They are never reported as
/// missing.
const SENSITIVE_NAME_PATTERNS: [&str; 18] = [
    "^image[_|-]",
    "[_|-]image$",
    "saml[_|-]role$",
    "secrets$",
    "aws[_|-]profile$",
    "key[_|-]id$",
    "secret[_|-]key$",
    "access[_|-]key$",
    "[_|-]token$",
    "^token[_|-]",
    "[_|-]secret$",
    "^secret[_|-]",
    "[_|-]password$",
    "^password[_|-]",
    "[_|-]username$",
    "^username[_|-]",
    "api[_|-]key",
    "expiration[_|-]date",
];

fn sensitive_name(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(&SENSITIVE_NAME_PATTERNS.join("|")).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(&name.to_lowercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalState {
    Unevaluated,
    Iterating(usize),
    Converged,
    CeilingReached,
}

/// Resolves the blocks of one module instance, instantiating its module
/// calls with evaluators of their own.
pub struct Evaluator<'a> {
    pub(super) session: &'a Session<'a>,
    pub(super) module: Module,
    inputs: InputVars,
    pub(super) module_calls: BTreeMap<String, ModuleCall>,
    /// Inputs each call was last evaluated with.
    visited: HashMap<String, Value>,
    state: EvalState,
    iterations_used: usize,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(session: &'a Session<'a>, module: Module, inputs: InputVars) -> Self {
        let evaluator = Self {
            session,
            module,
            inputs,
            module_calls: BTreeMap::new(),
            visited: HashMap::new(),
            state: EvalState::Unevaluated,
            iterations_used: 0,
            depth: 0,
        };
        evaluator.seed_context();
        evaluator
    }

    fn seed_context(&self) {
        let ctx = self.module.context();
        ctx.set_files(FileScope::new(
            self.session.loader_for(self.module.remote).share(),
            self.module.path.clone(),
        ));
        ctx.set(&["path", "module"], Value::from(self.module.path.display().to_string()));
        ctx.set(&["path", "root"], Value::from(self.session.root().display().to_string()));
        if let Ok(cwd) = std::env::current_dir() {
            ctx.set(&["path", "cwd"], Value::from(cwd.display().to_string()));
        }
        ctx.set(
            &["terraform", "workspace"],
            Value::from(self.session.options().workspace.clone()),
        );
    }

    pub fn session(&self) -> &'a Session<'a> {
        self.session
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn context(&self) -> &Context {
        self.module.context()
    }

    pub fn state(&self) -> EvalState {
        self.state
    }

    pub fn iterations_used(&self) -> usize {
        self.iterations_used
    }

    /// Whether the last fixpoint pass settled before the ceiling.
    pub fn converged(&self) -> bool {
        self.state == EvalState::Converged
    }

    pub fn module_calls(&self) -> impl Iterator<Item = &ModuleCall> {
        self.module_calls.values()
    }

    /// Evaluate, load module calls, evaluate again, expand, and evaluate a
    /// final time so expanded instances are visible to references.
    pub fn run(&mut self) {
        log::debug!("evaluating {} ({})", self.module.name(), self.module.path.display());
        match self.session.options().mode {
            EvalMode::Loop => self.run_loop(),
            EvalMode::Graph => self.run_graph(),
        }
        self.record_missing_vars();
    }

    fn run_loop(&mut self) {
        self.evaluate();
        self.load_modules();
        self.evaluate();
        let ids = std::mem::take(&mut self.module.blocks);
        self.module.blocks = self.expand_blocks(ids);
        self.sync_module_calls();
        self.evaluate();
    }

    fn run_graph(&mut self) {
        let mut graph = Graph::populate(self);
        graph.reduce_transitively();
        graph.walk(self);
        self.evaluate();
    }

    /// Consume the evaluator, attaching every module call's latest instance
    /// as a child.
    pub fn into_module(self) -> Module {
        let mut module = self.module;
        module.children = self.module_calls.into_values().map(|c| c.module).collect();
        module
    }

    /// Repeat evaluation passes until the scope stops changing or the
    /// iteration ceiling is hit.
    pub fn evaluate(&mut self) {
        let ceiling = self.session.options().max_iterations.max(1);
        for i in 0..ceiling {
            self.state = EvalState::Iterating(i);
            let before = self.context().snapshot();
            self.evaluate_step();
            self.iterations_used += 1;
            if self.context().snapshot() == before {
                log::trace!("{} settled after {} passes", self.module.name(), i + 1);
                self.state = EvalState::Converged;
                return;
            }
        }
        log::debug!(
            "{} did not settle within {} passes, using partial values",
            self.module.name(),
            ceiling
        );
        self.state = EvalState::CeilingReached;
    }

    fn evaluate_step(&mut self) {
        for id in self.module.blocks_of_type("provider") {
            self.set_provider(id);
        }
        for id in self.module.blocks_of_type("variable") {
            if let Err(err) = self.set_variable(id) {
                log::debug!("{err:#}");
            }
        }
        self.refresh_values("data", None);
        for id in self.module.blocks_of_type("locals") {
            self.set_locals(id, None);
        }
        self.refresh_values("resource", None);
        for id in self.module.blocks_of_type("output") {
            self.set_output(id);
        }
        self.evaluate_modules();
    }

    pub(crate) fn set_provider(&self, id: BlockId) {
        let block = self.module.arena.get(id);
        let name = block.label();
        let values = self.module.arena.values(id);
        let alias = values
            .as_object()
            .and_then(|v| v.get("alias"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        match alias {
            Some(alias) => self.context().set(&["provider", &name, &alias], values),
            None => self.context().set(&["provider", &name], values),
        }
    }

    pub(crate) fn set_variable(&self, id: BlockId) -> Result<()> {
        let name = self.module.arena.get(id).label();
        if name.is_empty() {
            bail!("variable without a name in {}", self.module.name());
        }
        if let Some(value) = self.variable_value(id) {
            self.context().replace(&["var", &name], value);
        }
        Ok(())
    }

    /// An input wins over `default`. A variable with neither is unknown.
    fn variable_value(&self, id: BlockId) -> Option<Value> {
        let block = self.module.arena.get(id);
        let type_name = block.attribute("type").and_then(Attribute::root_name);
        if let Some(input) = self.inputs.get(&block.label()) {
            return Some(convert_input(input.clone(), type_name.as_deref()));
        }
        block.attribute("default")?.value().into_known()
    }

    /// Write a `locals` block's attributes, or only `name` when given.
    pub(crate) fn set_locals(&self, id: BlockId, name: Option<&str>) {
        let block = self.module.arena.get(id);
        let eval_ctx = block.context().eval_context();
        for attr in block.attributes() {
            if name.is_some_and(|n| n != attr.name()) {
                continue;
            }
            if let Some(value) = attr.value_in(&eval_ctx).into_known() {
                self.context().replace(&["local", attr.name()], value);
            }
        }
    }

    pub(crate) fn set_output(&self, id: BlockId) {
        let block = self.module.arena.get(id);
        let name = block.label();
        match block.attribute("value").map(|a| a.value().into_known()) {
            Some(Some(value)) => self.context().replace(&["output", &name], value),
            _ => log::trace!("output {name} in {} is unknown", self.module.name()),
        }
    }

    /// Recompute the namespaces of every `block_type` block, or only those
    /// of one resource type. Count instances collect into a tuple under the
    /// bare name, `for_each` instances into an object keyed by instance key.
    pub(crate) fn refresh_values(&self, block_type: &str, only: Option<&str>) {
        let mut grouped: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        for id in self.module.blocks_of_type(block_type) {
            let block = self.module.arena.get(id);
            if only.is_some_and(|t| t != block.type_label()) {
                continue;
            }
            let values = self.module.arena.values(id);
            let names = grouped.entry(block.type_label().to_string()).or_default();
            let name = block.stripped_name().to_string();
            if let Some(index) = block.index() {
                let entry = names.entry(name).or_insert_with(|| Value::Array(Vec::new()));
                if !matches!(entry, Value::Array(_)) {
                    *entry = Value::Array(Vec::new());
                }
                if let Value::Array(items) = entry {
                    if items.len() <= index {
                        items.resize(index + 1, Value::Null);
                    }
                    items[index] = values;
                }
            } else if let Some(key) = block.key() {
                let entry = names.entry(name).or_insert_with(|| Value::Object(Map::new()));
                if !matches!(entry, Value::Object(_)) {
                    *entry = Value::Object(Map::new());
                }
                if let Value::Object(items) = entry {
                    items.insert(key, values);
                }
            } else {
                names.insert(name, values);
            }
        }

        for (type_label, names) in grouped {
            match block_type {
                "data" => self.context().set(&["data", &type_label], Value::Object(names)),
                _ => self.context().set(&[&type_label], Value::Object(names)),
            }
        }
    }

    /// Instantiate every module call whose inputs changed since it was last
    /// evaluated.
    fn evaluate_modules(&mut self) {
        let names: Vec<String> = self.module_calls.keys().cloned().collect();
        for name in names {
            self.evaluate_call(&name);
        }
    }

    pub(crate) fn evaluate_call(&mut self, full_name: &str) {
        let Some(call) = self.module_calls.get(full_name) else {
            return;
        };
        let inputs = self.module.arena.values(call.definition);
        if self.visited.get(full_name) == Some(&inputs) {
            return;
        }
        self.visited.insert(full_name.to_string(), inputs.clone());
        if self.depth >= MAX_MODULE_DEPTH {
            log::warn!("not instantiating {full_name}: modules nested too deeply");
            self.module.warnings.push(
                Diagnostic::new(DiagnosticKind::ModuleLoad, "modules nested too deeply")
                    .with_subject(full_name),
            );
            return;
        }

        let instance = Module::new(
            Some(full_name.to_string()),
            call.module.source.clone(),
            &call.path,
            call.module.raw.clone(),
            self.module.address.clone(),
            call.remote,
        );
        let definition = call.definition;
        let vars: InputVars = match inputs {
            Value::Object(map) => map.into_iter().collect(),
            _ => InputVars::default(),
        };

        log::debug!("instantiating {full_name} from {}", call.path.display());
        let mut child = Evaluator::new(self.session, instance, vars);
        child.depth = self.depth + 1;
        child.run();
        let outputs = child.export_outputs();
        let module = child.into_module();

        {
            let _guard = self.session.lock().acquire();
            self.set_module_outputs(definition, outputs);
        }
        if let Some(call) = self.module_calls.get_mut(full_name) {
            call.module = module;
        }
    }

    fn set_module_outputs(&self, definition: BlockId, outputs: Value) {
        let block = self.module.arena.get(definition);
        let name = block.stripped_name().to_string();
        let ctx = self.context();
        if let Some(index) = block.index() {
            let mut items = match ctx.get(&["module", &name]) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            items[index] = outputs;
            ctx.replace(&["module", &name], Value::Array(items));
        } else if let Some(key) = block.key() {
            ctx.set(&["module", &name, &key], outputs);
        } else {
            ctx.set(&["module", &name], outputs);
        }
    }

    /// Output values of this module as one object.
    pub fn export_outputs(&self) -> Value {
        match self.context().get(&["output"]) {
            Some(Value::Object(outputs)) => Value::Object(outputs),
            _ => Value::Object(Map::new()),
        }
    }

    /// Expand module blocks with a known `count`/`for_each` and bind each
    /// resulting instance to its directory.
    pub(crate) fn load_modules(&mut self) {
        let ids = self.module.blocks_of_type("module");
        let expanded = self.expand_blocks(ids.clone());
        self.module.blocks.retain(|id| !ids.contains(id));
        self.module.blocks.extend(expanded);
        self.sync_module_calls();
    }

    /// Register a call for every top-level module block and forget calls
    /// whose block was replaced by its instances.
    pub(crate) fn sync_module_calls(&mut self) {
        let live: Vec<(String, BlockId)> = self
            .module
            .blocks_of_type("module")
            .into_iter()
            .map(|id| (self.module.arena.full_name(id), id))
            .collect();
        self.module_calls
            .retain(|name, _| live.iter().any(|(live_name, _)| live_name == name));
        self.visited.retain(|name, _| live.iter().any(|(live_name, _)| live_name == name));

        for (name, id) in live {
            if self.module_calls.contains_key(&name) {
                continue;
            }
            match self.load_module(id) {
                Ok(call) => {
                    self.module_calls.insert(name, call);
                }
                Err(err) => {
                    if let Some(ModuleError::NotDownloaded { key, .. }) = err.downcast_ref() {
                        if self.session.resolution_failed(key) {
                            log::debug!("module {name} was not resolved, skipping");
                            continue;
                        }
                    }
                    log::warn!("failed to load module {name}: {err:#}");
                    self.module.warnings.push(
                        Diagnostic::new(DiagnosticKind::ModuleLoad, format!("{err:#}"))
                            .with_subject(name),
                    );
                }
            }
        }
    }

    /// Find the directory behind a module block, from the manifest when it
    /// was downloaded or relative to this module for local sources.
    fn load_module(&self, id: BlockId) -> Result<ModuleCall> {
        let full_name = self.module.arena.full_name(id);
        let block = self.module.arena.get(id);
        let name = block.labels().first().cloned().unwrap_or_default();
        if name.is_empty() {
            bail!("module without label: {full_name}");
        }
        let source = block
            .attribute("source")
            .and_then(Attribute::as_string)
            .filter(|s| !s.is_empty())
            .with_context(|| format!("could not read module source attribute at {full_name}"))?;

        let key = manifest_key(&full_name);
        let (path, remote) = match self.session.manifest_entry(&key) {
            Some(entry) => (
                entry.resolved_dir(self.session.cache_dir()),
                self.module.remote || !is_local(&entry.source),
            ),
            None if is_local(&source) => (
                normalize_path(&self.module.path.join(&source)),
                self.module.remote,
            ),
            None => return Err(ModuleError::NotDownloaded { key, addr: source }.into()),
        };

        let raw = self
            .session
            .parse_module(&path, remote)
            .with_context(|| format!("loading module {full_name} from {}", path.display()))?;
        log::debug!("using path {} for module {full_name}", path.display());

        Ok(ModuleCall {
            name,
            path: path.clone(),
            definition: id,
            module: Module::new(
                Some(full_name),
                source,
                &path,
                raw,
                self.module.address.clone(),
                remote,
            ),
            remote,
        })
    }

    /// Variables with neither an input nor a default. Sensitive variables
    /// and names that look like secrets are left out.
    pub fn missing_vars(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for id in self.module.blocks_of_type("variable") {
            let block = self.module.arena.get(id);
            let name = block.label();
            let sensitive = block
                .attribute("sensitive")
                .and_then(|a| a.value().into_known())
                .is_some_and(|v| v == Value::Bool(true));
            if sensitive || sensitive_name(&name) {
                continue;
            }
            if self.inputs.get(&name).is_none() && !block.has_attribute("default") {
                missing.push(format!("variable.{name}"));
            }
        }
        missing
    }

    fn record_missing_vars(&mut self) {
        let missing = self.missing_vars();
        if missing.is_empty() {
            return;
        }
        log::debug!("{} is missing {}", self.module.name(), missing.join(", "));
        let diagnostic = Diagnostic::missing_vars(&missing).with_subject(self.module.name());
        self.module.warnings.push(diagnostic);
    }

    pub(crate) fn record_vertex_failure(&mut self, vertex: &str, err: &anyhow::Error) {
        log::warn!("skipping {vertex}: {err:#}");
        self.module.warnings.push(
            Diagnostic::new(DiagnosticKind::Vertex, format!("{err:#}")).with_subject(vertex),
        );
    }

    /// Path a top-level block's values live under, including the instance
    /// key for `for_each` instances. Count instances have none, since they
    /// are stored by position.
    pub(super) fn value_path(&self, id: BlockId) -> Option<Vec<String>> {
        let block = self.module.arena.get(id);
        if block.parent().is_some() || block.index().is_some() {
            return None;
        }
        let name = block.stripped_name().to_string();
        let mut path = match block.block_type() {
            "resource" => vec![block.type_label().to_string(), name],
            "data" => vec!["data".to_string(), block.type_label().to_string(), name],
            "module" => vec!["module".to_string(), name],
            _ => return None,
        };
        if let Some(key) = block.key() {
            path.push(key_segment(&Value::from(key)));
        }
        Some(path)
    }
}

/// Coerce string inputs to the variable's declared primitive type.
fn convert_input(value: Value, type_name: Option<&str>) -> Value {
    let raw = match &value {
        Value::String(raw) => raw.clone(),
        _ => return value,
    };
    match type_name {
        Some("number") => raw
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.parse::<f64>().map(Value::from))
            .unwrap_or(value),
        Some("bool") => match raw.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value,
        },
        _ => value,
    }
}

pub(super) fn set_path(ctx: &Context, path: &[String], value: Value) {
    let parts: Vec<&str> = path.iter().map(String::as_str).collect();
    ctx.set(&parts, value);
}

pub(super) fn replace_path(ctx: &Context, path: &[String], value: Value) {
    let parts: Vec<&str> = path.iter().map(String::as_str).collect();
    ctx.replace(&parts, value);
}
