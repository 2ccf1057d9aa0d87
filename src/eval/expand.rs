//! `count`, `for_each` and `dynamic` expansion.

use anyhow::Result;
use hcl::value::Map;
use hcl::Value;

use super::evaluator::{replace_path, set_path, Evaluator};
use crate::frontend::for_each::{dynamic_instances, instances, key_segment};
use crate::frontend::{Attribute, BlockId, Instance, Resolved};

impl Evaluator<'_> {
    /// Expand every block in `ids`, returning the list with each expanded
    /// block replaced by its instances. Failures leave the block as is.
    pub(crate) fn expand_blocks(&mut self, ids: Vec<BlockId>) -> Vec<BlockId> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.expand_block(id) {
                Ok(expanded) => out.extend(expanded),
                Err(err) => {
                    log::debug!("could not expand {}: {err:#}", self.module.arena.full_name(id));
                    out.push(id);
                }
            }
        }
        out
    }

    /// Expand one top-level block: `count` first, then `for_each`, then any
    /// `dynamic` children of the result. Blocks that were already expanded,
    /// or whose collection is not known yet, come back unchanged.
    pub(crate) fn expand_block(&mut self, id: BlockId) -> Result<Vec<BlockId>> {
        let block = self.module.arena.get(id);
        let expandable = block.is_expandable() && !block.is_expanded() && block.parent().is_none();
        let expanded = if !expandable {
            vec![id]
        } else if block.has_attribute("count") {
            self.expand_count(id)
        } else if block.has_attribute("for_each") {
            self.expand_for_each(id)?
        } else {
            vec![id]
        };
        for instance in &expanded {
            self.expand_dynamic(*instance)?;
        }
        Ok(expanded)
    }

    /// Expand a top-level block in place, keeping module calls in step.
    pub(crate) fn expand_vertex(&mut self, id: BlockId) -> Result<Vec<BlockId>> {
        let expanded = self.expand_block(id)?;
        if expanded != [id] {
            if let Some(pos) = self.module.blocks.iter().position(|b| *b == id) {
                self.module.blocks.splice(pos..=pos, expanded.iter().copied());
            }
        }
        let block = self.module.arena.get(id);
        let block_type = block.block_type().to_string();
        let type_label = block.type_label().to_string();
        match block_type.as_str() {
            "module" => self.sync_module_calls(),
            "resource" | "data" => self.refresh_values(&block_type, Some(&type_label)),
            _ => {}
        }
        Ok(expanded)
    }

    /// An unknown or invalid count expands to a single instance.
    fn expand_count(&mut self, id: BlockId) -> Vec<BlockId> {
        let count = match self.module.arena.get(id).attribute("count").map(Attribute::value) {
            Some(resolved) => resolved.as_count().unwrap_or_else(|| {
                log::debug!(
                    "count of {} is not a known whole number, using 1",
                    self.module.arena.full_name(id)
                );
                1
            }),
            None => 1,
        };

        let clones: Vec<BlockId> = (0..count)
            .map(|i| self.module.arena.clone_block(id, &Instance::Count(i)))
            .collect();

        if self.module.arena.get(id).block_type() != "module" {
            if let Some(path) = self.value_path(id) {
                let values = clones.iter().map(|c| self.module.arena.values(*c)).collect();
                replace_path(self.context(), &path, Value::Array(values));
            }
        }
        log::debug!("expanded {} into {count} instances", self.module.arena.full_name(id));
        clones
    }

    /// Null or unknown collections leave the block unexpanded.
    fn expand_for_each(&mut self, id: BlockId) -> Result<Vec<BlockId>> {
        let collection = match self.module.arena.get(id).attribute("for_each").map(Attribute::value) {
            Some(Resolved::Known(v)) if !v.is_null() => v,
            _ => return Ok(vec![id]),
        };
        let instances = instances(&collection)?;

        // module instances publish their outputs instead
        let path = match self.module.arena.get(id).block_type() {
            "module" => None,
            _ => self.value_path(id),
        };
        // drop values written before expansion, such as synthetic ids
        if let Some(path) = &path {
            replace_path(self.context(), path, Value::Object(Map::new()));
        }

        let mut clones = Vec::with_capacity(instances.len());
        for instance in &instances {
            let clone = self.module.arena.clone_block(id, instance);
            if let (Some(path), Instance::Each { key, .. }) = (&path, instance) {
                let mut path = path.clone();
                path.push(key_segment(key));
                set_path(self.context(), &path, self.module.arena.values(clone));
            }
            clones.push(clone);
        }
        log::debug!(
            "expanded {} into {} instances",
            self.module.arena.full_name(id),
            clones.len()
        );
        Ok(clones)
    }

    /// Replace every `dynamic` child of `id`, at any depth, with the
    /// `content` of each of its instances.
    pub(crate) fn expand_dynamic(&mut self, id: BlockId) -> Result<()> {
        if !self.module.arena.has_dynamic(id) {
            return Ok(());
        }
        let children = self.module.arena.get(id).children().to_vec();
        for child in children {
            if self.module.arena.get(child).block_type() == "dynamic" {
                self.expand_dynamic_child(id, child)?;
            } else {
                self.expand_dynamic(child)?;
            }
        }
        Ok(())
    }

    fn expand_dynamic_child(&mut self, parent: BlockId, dynamic: BlockId) -> Result<()> {
        let block = self.module.arena.get(dynamic);
        let label = block.type_label().to_string();
        let iterator = block
            .attribute("iterator")
            .and_then(Attribute::root_name)
            .unwrap_or_else(|| label.clone());
        let collection = match block.attribute("for_each").map(Attribute::value) {
            Some(Resolved::Known(v)) if !v.is_null() => v,
            _ => {
                log::debug!(
                    "leaving dynamic {label} in {} unexpanded",
                    self.module.arena.full_name(parent)
                );
                return Ok(());
            }
        };

        let mut contents = Vec::new();
        for instance in dynamic_instances(&collection)? {
            let clone = self.module.arena.clone_block(dynamic, &instance);
            if let Instance::Each { key, value } = &instance {
                let ctx = self.module.arena.get(clone).context().clone();
                for name in [iterator.as_str(), label.as_str()] {
                    ctx.set(&[name, "key"], key.clone());
                    ctx.set(&[name, "value"], value.clone());
                }
            }
            if let Some(content) = self.module.arena.child_block(clone, "content") {
                self.module.arena.inject_block(parent, content, &label);
                contents.push(content);
            }
        }
        self.module.arena.remove_child(parent, dynamic);

        for content in &contents {
            self.expand_dynamic(*content)?;
        }

        if let Some(mut path) = self.value_path(parent) {
            path.push(label);
            let values = contents.iter().map(|c| self.module.arena.values(*c)).collect();
            set_path(self.context(), &path, Value::Array(values));
        }
        Ok(())
    }
}
