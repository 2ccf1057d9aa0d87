use anyhow::Result;

use crate::eval::{Evaluator, Module};
use crate::frontend::BlockId;

/// One unit of work in a module's dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vertex {
    Root,
    Variable(BlockId),
    /// A single attribute of a `locals` block.
    Local { block: BlockId, name: String },
    Provider(BlockId),
    Data(BlockId),
    Resource(BlockId),
    Module(BlockId),
    Output(BlockId),
}

impl Vertex {
    /// Vertices contributed by one top-level block. Each local gets a
    /// vertex of its own; blocks of other kinds get none.
    pub fn for_block(module: &Module, id: BlockId) -> Vec<Vertex> {
        let block = module.arena.get(id);
        match block.block_type() {
            "variable" => vec![Vertex::Variable(id)],
            "locals" => block
                .attributes()
                .iter()
                .map(|a| Vertex::Local {
                    block: id,
                    name: a.name().to_string(),
                })
                .collect(),
            "provider" => vec![Vertex::Provider(id)],
            "data" => vec![Vertex::Data(id)],
            "resource" => vec![Vertex::Resource(id)],
            "module" => vec![Vertex::Module(id)],
            "output" => vec![Vertex::Output(id)],
            _ => Vec::new(),
        }
    }

    pub fn block(&self) -> Option<BlockId> {
        match self {
            Vertex::Root => None,
            Vertex::Local { block, .. } => Some(*block),
            Vertex::Variable(id)
            | Vertex::Provider(id)
            | Vertex::Data(id)
            | Vertex::Resource(id)
            | Vertex::Module(id)
            | Vertex::Output(id) => Some(*id),
        }
    }

    /// Graph id: the block's full name, or `local.<name>` for locals, both
    /// prefixed with the module address.
    pub fn id(&self, module: &Module) -> String {
        match self {
            Vertex::Root => "root".to_string(),
            Vertex::Local { name, .. } => match &module.address {
                Some(address) => format!("{address}.local.{name}"),
                None => format!("local.{name}"),
            },
            other => other
                .block()
                .map(|id| module.arena.full_name(id))
                .unwrap_or_default(),
        }
    }

    /// Raw references made by the vertex's expressions.
    pub fn references(&self, module: &Module) -> Vec<String> {
        match self {
            Vertex::Root => Vec::new(),
            Vertex::Local { block, name } => module
                .arena
                .get(*block)
                .attributes()
                .iter()
                .filter(|a| a.name() == name)
                .flat_map(|a| a.references())
                .collect(),
            other => other
                .block()
                .map(|id| module.arena.references(id))
                .unwrap_or_default(),
        }
    }

    /// Write the vertex's value into the module scope.
    pub fn evaluate(&self, ev: &mut Evaluator<'_>) -> Result<()> {
        match self {
            Vertex::Root | Vertex::Module(_) => {}
            Vertex::Variable(id) => ev.set_variable(*id)?,
            Vertex::Local { block, name } => ev.set_locals(*block, Some(name)),
            Vertex::Provider(id) => ev.set_provider(*id),
            Vertex::Data(id) | Vertex::Resource(id) => {
                let block = ev.module().arena.get(*id);
                let block_type = block.block_type().to_string();
                let type_label = block.type_label().to_string();
                ev.refresh_values(&block_type, Some(&type_label));
            }
            Vertex::Output(id) => ev.set_output(*id),
        }
        Ok(())
    }

    /// Expand `count`/`for_each`/`dynamic` and publish the instances.
    pub fn expand(&self, ev: &mut Evaluator<'_>) -> Result<()> {
        match self {
            Vertex::Data(id) | Vertex::Resource(id) | Vertex::Module(id) => {
                ev.expand_vertex(*id)?;
            }
            _ => {}
        }
        Ok(())
    }
}
