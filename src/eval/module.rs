use hcl::Value;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::context::Context;
use crate::diagnostics::Diagnostic;
use crate::frontend::{BlockArena, BlockId};
use crate::parser::ParsedFile;

/// One instantiation of a configuration directory: the root, or a single
/// instance of a module call.
#[derive(Debug, Clone)]
pub struct Module {
    /// `None` for the root, otherwise the call address such as
    /// `module.a[0].module.b`.
    pub address: Option<String>,
    pub source: String,
    pub path: PathBuf,
    pub arena: BlockArena,
    /// Current top-level blocks. Expansion swaps an original for its
    /// instances.
    pub blocks: Vec<BlockId>,
    /// Parsed files the blocks were built from.
    pub raw: Vec<ParsedFile>,
    pub parent: Option<String>,
    pub children: Vec<Module>,
    pub warnings: Vec<Diagnostic>,
    /// Read from a download directory rather than through the caller's
    /// loader.
    pub remote: bool,
    ctx: Context,
}

impl Module {
    pub fn new(
        address: Option<String>,
        source: impl Into<String>,
        path: &Path,
        raw: Vec<ParsedFile>,
        parent: Option<String>,
        remote: bool,
    ) -> Self {
        let ctx = Context::new();
        let mut arena = BlockArena::new();
        let mut blocks = Vec::new();
        for file in &raw {
            for block in file.body.blocks() {
                blocks.push(arena.build(block, &ctx, address.as_deref(), &file.path, None));
            }
        }
        Self {
            address,
            source: source.into(),
            path: path.to_path_buf(),
            arena,
            blocks,
            raw,
            parent,
            children: Vec::new(),
            warnings: Vec::new(),
            remote,
            ctx,
        }
    }

    /// Scope every top-level block of this instance evaluates in.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn name(&self) -> &str {
        self.address.as_deref().unwrap_or("root")
    }

    pub fn blocks_of_type(&self, block_type: &str) -> Vec<BlockId> {
        self.blocks
            .iter()
            .copied()
            .filter(|id| self.arena.get(*id).block_type() == block_type)
            .collect()
    }

    /// Top-level block with the given fully qualified address.
    pub fn find_block(&self, full_name: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .copied()
            .find(|id| self.arena.full_name(*id) == full_name)
    }

    /// Evaluated value of a top-level block's attribute.
    pub fn block_value(&self, full_name: &str, attribute: &str) -> Option<Value> {
        let id = self.find_block(full_name)?;
        self.arena.values(id).as_object()?.get(attribute).cloned()
    }

    /// Descendant module with the given address.
    pub fn find_module(&self, address: &str) -> Option<&Module> {
        if self.address.as_deref() == Some(address) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_module(address))
    }

    /// Warnings of this module and every descendant.
    pub fn all_warnings(&self) -> Vec<Diagnostic> {
        let mut out = self.warnings.clone();
        for child in &self.children {
            out.extend(child.all_warnings());
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        let blocks: Vec<serde_json::Value> =
            self.blocks.iter().map(|id| self.block_json(*id)).collect();
        json!({
            "address": self.address,
            "source": self.source,
            "path": self.path.display().to_string(),
            "blocks": blocks,
            "modules": self.children.iter().map(Module::to_json).collect::<Vec<_>>(),
            "warnings": self.warnings,
        })
    }

    fn block_json(&self, id: BlockId) -> serde_json::Value {
        let block = self.arena.get(id);
        let values = serde_json::to_value(self.arena.values(id)).unwrap_or_default();
        let mut out = json!({
            "address": self.arena.full_name(id),
            "type": block.block_type(),
            "labels": block.labels(),
            "values": values,
        });
        if !block.children().is_empty() {
            out["blocks"] = block
                .children()
                .iter()
                .map(|c| self.block_json(*c))
                .collect::<Vec<_>>()
                .into();
        }
        out
    }
}

/// A `module` block bound to the directory it resolved to.
#[derive(Debug, Clone)]
pub struct ModuleCall {
    /// Call label including any instance selector, e.g. `vpc["a"]`.
    pub name: String,
    pub path: PathBuf,
    /// The calling block in the parent's arena.
    pub definition: BlockId,
    /// Most recent evaluated instance, or the unevaluated template.
    pub module: Module,
    pub remote: bool,
}
