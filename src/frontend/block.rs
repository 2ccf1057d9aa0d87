//! Blocks live in a per-module arena and point at each other by [`BlockId`].

use hcl::value::Map;
use hcl::Value;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::attribute::Attribute;
use super::for_each::key_segment;
use super::parse_expression;
use super::reference::{split_key, strip_instance, RefKey, Reference};
use crate::context::Context;

/// Attributes generated for resources that do not set them, so that
/// `type.name.id` style references resolve.
const SYNTHETIC_ATTRIBUTES: [&str; 4] = ["id", "name", "arn", "self_link"];

/// Block types that `count`/`for_each` may expand.
pub const EXPANDABLE_TYPES: [&str; 4] = ["resource", "module", "dynamic", "data"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockId(usize);

/// One instance of an expanded block.
#[derive(Debug, Clone, PartialEq)]
pub enum Instance {
    Count(usize),
    Each { key: Value, value: Value },
}

#[derive(Debug, Clone)]
pub struct Block {
    block_type: String,
    labels: Vec<String>,
    attributes: Vec<Attribute>,
    synthetic: Vec<Attribute>,
    children: Vec<BlockId>,
    parent: Option<BlockId>,
    ctx: Context,
    module_address: Option<String>,
    expanded: bool,
    clone_index: usize,
    original: Option<BlockId>,
    filename: PathBuf,
}

impl Block {
    pub fn block_type(&self) -> &str {
        &self.block_type
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// All labels joined with `.`.
    pub fn label(&self) -> String {
        self.labels.join(".")
    }

    pub fn type_label(&self) -> &str {
        self.labels.first().map(String::as_str).unwrap_or_default()
    }

    pub fn name_label(&self) -> &str {
        self.labels.get(1).map(String::as_str).unwrap_or_default()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn module_address(&self) -> Option<&str> {
        self.module_address.as_deref()
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn children(&self) -> &[BlockId] {
        &self.children
    }

    pub fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    pub fn original(&self) -> Option<BlockId> {
        self.original
    }

    pub fn clone_index(&self) -> usize {
        self.clone_index
    }

    /// True for blocks produced by `count`/`for_each` expansion.
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub(crate) fn mark_expanded(&mut self) {
        self.expanded = true;
    }

    /// Declared attributes, without the synthetic identifiers.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Declared attributes followed by any synthetic identifiers.
    pub fn all_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().chain(self.synthetic.iter())
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.all_attributes().find(|a| a.name() == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name() == name)
    }

    pub fn is_expandable(&self) -> bool {
        EXPANDABLE_TYPES.contains(&self.block_type.as_str())
    }

    /// Count index parsed back out of the name label, e.g. `web[2]`.
    pub fn index(&self) -> Option<usize> {
        match split_key(self.instance_label()) {
            Ok((_, Some(RefKey::Index(i)))) => Some(i),
            _ => None,
        }
    }

    /// `for_each` key parsed back out of the name label, e.g. `web["a"]`.
    pub fn key(&self) -> Option<String> {
        match split_key(self.instance_label()) {
            Ok((_, Some(RefKey::Key(k)))) => Some(k),
            _ => None,
        }
    }

    fn instance_label(&self) -> &str {
        self.labels.last().map(String::as_str).unwrap_or_default()
    }

    /// The label that carries the instance selector, without it.
    pub fn stripped_name(&self) -> &str {
        strip_instance(self.instance_label())
    }

    /// Provider a resource belongs to: the explicit `provider` attribute if
    /// it is a plain traversal, otherwise the prefix of the type label.
    pub fn provider(&self) -> String {
        if let Some(attr) = self.attributes.iter().find(|a| a.name() == "provider") {
            if let Some(r) = attr.references().into_iter().next() {
                return r;
            }
            if let Some(s) = attr.as_string() {
                return s;
            }
        }
        self.type_label()
            .split('_')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

/// Owns every block of one module instance.
#[derive(Debug, Clone, Default)]
pub struct BlockArena {
    blocks: Vec<Block>,
}

impl BlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn get_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    fn alloc(&mut self, block: Block) -> BlockId {
        self.blocks.push(block);
        BlockId(self.blocks.len() - 1)
    }

    /// Convert a parsed block, and everything nested in it, into arena blocks
    /// bound to `ctx`.
    pub fn build(
        &mut self,
        raw: &hcl::Block,
        ctx: &Context,
        module_address: Option<&str>,
        filename: &Path,
        parent: Option<BlockId>,
    ) -> BlockId {
        let block = Block {
            block_type: raw.identifier().to_string(),
            labels: raw.labels().iter().map(|l| l.as_str().to_string()).collect(),
            attributes: raw
                .body()
                .attributes()
                .map(|a| Attribute::new(a.key(), a.expr().clone(), ctx.clone()))
                .collect(),
            synthetic: Vec::new(),
            children: Vec::new(),
            parent,
            ctx: ctx.clone(),
            module_address: module_address.map(str::to_string),
            expanded: false,
            clone_index: 0,
            original: None,
            filename: filename.to_path_buf(),
        };
        let id = self.alloc(block);
        let children = raw
            .body()
            .blocks()
            .map(|child| self.build(child, ctx, module_address, filename, Some(id)))
            .collect();
        self.get_mut(id).children = children;
        if parent.is_none() {
            self.set_synthetic_ids(id);
        }
        id
    }

    /// Address relative to the owning module. Nested blocks are prefixed
    /// with their parent's local name.
    pub fn local_name(&self, id: BlockId) -> String {
        let block = self.get(id);
        if let Some(parent) = block.parent {
            let mut parts = vec![self.local_name(parent), block.block_type.clone()];
            parts.extend(block.labels.iter().cloned());
            return parts.join(".");
        }
        let label = block.label();
        match block.block_type.as_str() {
            "resource" => label,
            "variable" => format!("var.{label}"),
            "provider" => match block
                .attribute("alias")
                .and_then(|a| a.as_string())
            {
                Some(alias) => format!("provider.{label}.{alias}"),
                None => format!("provider.{label}"),
            },
            other if label.is_empty() => other.to_string(),
            other => format!("{other}.{label}"),
        }
    }

    /// Fully qualified address including the module prefix and any
    /// instance selector.
    pub fn full_name(&self, id: BlockId) -> String {
        let local = self.local_name(id);
        match &self.get(id).module_address {
            Some(address) => format!("{address}.{local}"),
            None => local,
        }
    }

    /// Structured address for top-level blocks of an addressable kind.
    pub fn reference(&self, id: BlockId) -> Option<Reference> {
        let block = self.get(id);
        if block.parent.is_some() {
            return None;
        }
        self.local_name(id)
            .parse::<Reference>()
            .ok()
            .map(|r| r.in_module(block.module_address.as_deref()))
    }

    pub fn child_blocks(&self, id: BlockId, block_type: &str) -> Vec<BlockId> {
        self.get(id)
            .children
            .iter()
            .copied()
            .filter(|c| self.get(*c).block_type == block_type)
            .collect()
    }

    pub fn child_block(&self, id: BlockId, block_type: &str) -> Option<BlockId> {
        self.child_blocks(id, block_type).into_iter().next()
    }

    pub fn has_dynamic(&self, id: BlockId) -> bool {
        self.get(id)
            .children
            .iter()
            .any(|c| self.get(*c).block_type == "dynamic" || self.has_dynamic(*c))
    }

    /// Known attribute values as an object. `for_each` is left out and
    /// unknown values are absent. Provider blocks also carry their nested
    /// blocks as lists and a `config_key`.
    pub fn values(&self, id: BlockId) -> Value {
        let block = self.get(id);
        let eval_ctx = block.ctx.eval_context();
        let mut values = Map::new();
        for attr in block.all_attributes() {
            if attr.name() == "for_each" || values.contains_key(attr.name()) {
                continue;
            }
            let resolved = if attr.context().same_scope(&block.ctx) {
                attr.value_in(&eval_ctx)
            } else {
                attr.value()
            };
            if let Some(v) = resolved.into_known() {
                values.insert(attr.name().to_string(), v);
            }
        }

        if block.block_type == "provider" {
            for child in &block.children {
                let child_block = self.get(*child);
                if child_block.block_type == "dynamic" {
                    continue;
                }
                let entry = values
                    .entry(child_block.block_type.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = entry {
                    items.push(self.values(*child));
                }
            }
            let mut config_key = block.label();
            if let Some(alias) = values.get("alias").and_then(|v| v.as_str()) {
                config_key = format!("{config_key}.{alias}");
            }
            if let Some(address) = &block.module_address {
                config_key = format!("{address}:{config_key}");
            }
            values.insert("config_key".to_string(), Value::from(config_key));
        }

        Value::Object(values)
    }

    /// Symbolic references made by the block's attributes and nested blocks.
    /// A `provider` attribute becomes a `provider.` reference and a resource
    /// with no explicit provider depends on the one implied by its type.
    pub fn references(&self, id: BlockId) -> Vec<String> {
        let block = self.get(id);
        let mut refs = Vec::new();
        let mut has_provider_attr = false;
        for attr in &block.attributes {
            if attr.name() == "provider" {
                has_provider_attr = true;
                refs.extend(attr.references().into_iter().map(|r| format!("provider.{r}")));
                continue;
            }
            refs.extend(attr.references());
        }
        for child in &block.children {
            refs.extend(self.references(*child));
        }
        let uses_provider = matches!(block.block_type.as_str(), "resource" | "data");
        if block.parent.is_none() && uses_provider && !has_provider_attr {
            let provider = block.provider();
            if !provider.is_empty() {
                refs.push(format!("provider.{provider}"));
            }
        }
        refs
    }

    /// Deep-copy `id` as one expansion instance. The copy gets a child scope
    /// seeded with `count.index` or `each.key`/`each.value`, a suffixed
    /// label and a link back to its original.
    pub fn clone_block(&mut self, id: BlockId, instance: &Instance) -> BlockId {
        let source = self.get(id);
        let ctx = source.ctx.new_child();
        let suffix = match instance {
            Instance::Count(i) => {
                ctx.set(&["count", "index"], Value::from(*i as u64));
                format!("[{i}]")
            }
            Instance::Each { key, value } => {
                ctx.set(&["each", "key"], key.clone());
                ctx.set(&["each", "value"], value.clone());
                // quoted even when numeric
                format!("[{:?}]", key_segment(key))
            }
        };
        let parent = source.parent;
        let clone = self.copy_subtree(id, &ctx, parent);

        let block = self.get_mut(clone);
        if let Some(last) = block.labels.last_mut() {
            last.push_str(&suffix);
        }
        block.expanded = true;
        block.original = Some(id);

        self.get_mut(id).clone_index += 1;
        clone
    }

    fn copy_subtree(&mut self, id: BlockId, ctx: &Context, parent: Option<BlockId>) -> BlockId {
        let mut block = self.get(id).clone();
        let source_ctx = block.ctx.clone();
        block.ctx = ctx.clone();
        for attr in block.attributes.iter_mut().chain(block.synthetic.iter_mut()) {
            attr.rebind(ctx.clone());
        }
        block.parent = parent;
        let children = std::mem::take(&mut block.children);
        let new_id = self.alloc(block);

        let mut copied = Vec::with_capacity(children.len());
        for child in children {
            let child_ctx = self.get(child).ctx.clone();
            let ctx = if child_ctx.same_scope(&source_ctx) {
                ctx.clone()
            } else {
                let scoped = ctx.new_child();
                for (key, value) in child_ctx.snapshot() {
                    scoped.set(&[key.as_str()], value);
                }
                scoped
            };
            copied.push(self.copy_subtree(child, &ctx, Some(new_id)));
        }
        self.get_mut(new_id).children = copied;
        new_id
    }

    /// Splice a generated block under `parent`, renaming it to `block_type`
    /// and dropping its labels.
    pub fn inject_block(&mut self, parent: BlockId, child: BlockId, block_type: &str) {
        let block = self.get_mut(child);
        block.block_type = block_type.to_string();
        block.labels.clear();
        block.parent = Some(parent);
        self.get_mut(parent).children.push(child);
    }

    pub fn remove_child(&mut self, parent: BlockId, child: BlockId) {
        self.get_mut(parent).children.retain(|c| *c != child);
    }

    /// Give resource and data blocks placeholder `id`/`name`/`arn`/`self_link`
    /// values unless they declare them.
    pub fn set_synthetic_ids(&mut self, id: BlockId) {
        let full_name = self.full_name(id);
        let block = self.get_mut(id);
        if block.block_type != "resource" && block.block_type != "data" {
            return;
        }
        let sha = format!("{:x}", Sha256::digest(full_name.as_bytes()));
        let suffix = if block.has_attribute("for_each") {
            "-${each.key}"
        } else if block.has_attribute("count") {
            "-${count.index}"
        } else {
            ""
        };

        let mut synthetic = Vec::new();
        for name in SYNTHETIC_ATTRIBUTES {
            if block.has_attribute(name) {
                continue;
            }
            let text = if name == "arn" {
                format!("arn:aws:hcl::{sha}{suffix}")
            } else {
                format!("hcl-{sha}{suffix}")
            };
            match parse_expression(&format!("\"{text}\"")) {
                Ok(expr) => synthetic.push(Attribute::new(name, expr, block.ctx.clone())),
                Err(err) => log::debug!("could not build synthetic {name} for {full_name}: {err}"),
            }
        }
        block.synthetic = synthetic;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with(src: &str, ctx: &Context) -> (BlockArena, Vec<BlockId>) {
        let body: hcl::Body = hcl::from_str(src).unwrap();
        let mut arena = BlockArena::new();
        let ids = body
            .blocks()
            .map(|b| arena.build(b, ctx, None, Path::new("main.tf"), None))
            .collect();
        (arena, ids)
    }

    #[test]
    fn full_names_per_block_kind() {
        let ctx = Context::new();
        let (arena, ids) = arena_with(
            r#"
            resource "aws_instance" "web" {
              root_block_device { size = 8 }
            }
            data "aws_ami" "ubuntu" {}
            module "net" { source = "./net" }
            variable "region" {}
            output "ip" { value = 1 }
            provider "aws" { alias = "west" }
            locals { a = 1 }
            "#,
            &ctx,
        );
        let names: Vec<String> = ids.iter().map(|id| arena.full_name(*id)).collect();
        assert_eq!(
            names,
            vec![
                "aws_instance.web",
                "data.aws_ami.ubuntu",
                "module.net",
                "var.region",
                "output.ip",
                "provider.aws.west",
                "locals",
            ]
        );
        let nested = arena.get(ids[0]).children()[0];
        assert_eq!(arena.full_name(nested), "aws_instance.web.root_block_device");
    }

    #[test]
    fn module_address_prefixes_full_name() {
        let ctx = Context::new();
        let body: hcl::Body = hcl::from_str(r#"resource "x" "y" {}"#).unwrap();
        let mut arena = BlockArena::new();
        let raw = body.blocks().next().unwrap();
        let id = arena.build(raw, &ctx, Some("module.a[0]"), Path::new("m.tf"), None);
        assert_eq!(arena.full_name(id), "module.a[0].x.y");
        assert_eq!(
            arena.reference(id).unwrap().module_address().as_deref(),
            Some("module.a[0]")
        );
    }

    #[test]
    fn count_clone_suffixes_label_and_seeds_index() {
        let ctx = Context::new();
        let (mut arena, ids) = arena_with(r#"resource "t" "n" { idx = count.index }"#, &ctx);
        let clone = arena.clone_block(ids[0], &Instance::Count(2));

        let c = arena.get(clone);
        assert_eq!(c.labels(), &["t".to_string(), "n[2]".to_string()]);
        assert!(c.is_expanded());
        assert_eq!(c.original(), Some(ids[0]));
        assert_eq!(c.index(), Some(2));
        assert_eq!(c.stripped_name(), "n");
        assert_eq!(c.context().get(&["count", "index"]), Some(Value::from(2)));
        assert_eq!(c.attribute("idx").unwrap().value().known(), Some(&Value::from(2)));

        let original = arena.get(ids[0]);
        assert!(!original.is_expanded());
        assert_eq!(original.clone_index(), 1);
    }

    #[test]
    fn each_clone_uses_quoted_key() {
        let ctx = Context::new();
        let (mut arena, ids) = arena_with(r#"resource "t" "n" { v = each.value }"#, &ctx);
        let clone = arena.clone_block(
            ids[0],
            &Instance::Each {
                key: Value::from("blue"),
                value: Value::from(7),
            },
        );
        let c = arena.get(clone);
        assert_eq!(c.labels()[1], "n[\"blue\"]");
        assert_eq!(c.key().as_deref(), Some("blue"));
        assert_eq!(c.context().get(&["each", "key"]), Some(Value::from("blue")));
        assert_eq!(arena.values(clone).as_object().unwrap().get("v"), Some(&Value::from(7)));
        assert_eq!(arena.full_name(clone), "t.n[\"blue\"]");
    }

    #[test]
    fn clones_do_not_share_scopes() {
        let ctx = Context::new();
        let (mut arena, ids) = arena_with(r#"resource "t" "n" { inner { i = count.index } }"#, &ctx);
        let a = arena.clone_block(ids[0], &Instance::Count(0));
        let b = arena.clone_block(ids[0], &Instance::Count(1));
        let inner_a = arena.get(a).children()[0];
        let inner_b = arena.get(b).children()[0];
        assert_eq!(arena.get(inner_a).parent(), Some(a));
        assert_eq!(arena.values(inner_a).as_object().unwrap().get("i"), Some(&Value::from(0)));
        assert_eq!(arena.values(inner_b).as_object().unwrap().get("i"), Some(&Value::from(1)));
    }

    #[test]
    fn synthetic_ids_fill_missing_attributes() {
        let ctx = Context::new();
        let (arena, ids) = arena_with(
            r#"
            resource "aws_instance" "web" { name = "explicit" }
            resource "aws_instance" "many" { count = 2 }
            variable "v" {}
            "#,
            &ctx,
        );
        let values = arena.values(ids[0]);
        let obj = values.as_object().unwrap();
        let sha = format!("{:x}", Sha256::digest("aws_instance.web".as_bytes()));
        assert_eq!(obj.get("id"), Some(&Value::from(format!("hcl-{sha}"))));
        assert_eq!(obj.get("name"), Some(&Value::from("explicit")));
        assert_eq!(obj.get("arn"), Some(&Value::from(format!("arn:aws:hcl::{sha}"))));
        assert!(obj.contains_key("self_link"));

        // unexpanded counted blocks have no count.index yet
        assert!(arena.values(ids[1]).as_object().unwrap().get("id").is_none());
        assert!(arena.get(ids[2]).attribute("id").is_none());
    }

    #[test]
    fn synthetic_ids_take_instance_suffix() {
        let ctx = Context::new();
        let (mut arena, ids) = arena_with(r#"resource "aws_instance" "many" { count = 2 }"#, &ctx);
        let clone = arena.clone_block(ids[0], &Instance::Count(1));
        let id = arena.values(clone).as_object().unwrap().get("id").cloned().unwrap();
        assert!(id.as_str().unwrap().ends_with("-1"));
    }

    #[test]
    fn references_include_children_and_implied_provider() {
        let ctx = Context::new();
        let (arena, ids) = arena_with(
            r#"
            resource "aws_instance" "web" {
              ami = data.aws_ami.ubuntu.id
              ebs { size = var.size }
            }
            resource "google_compute_instance" "vm" {
              provider = google.eu
            }
            "#,
            &ctx,
        );
        let refs = arena.references(ids[0]);
        assert!(refs.contains(&"data.aws_ami.ubuntu.id".to_string()));
        assert!(refs.contains(&"var.size".to_string()));
        assert!(refs.contains(&"provider.aws".to_string()));

        let refs = arena.references(ids[1]);
        assert_eq!(refs, vec!["provider.google.eu".to_string()]);
        assert_eq!(arena.get(ids[1]).provider(), "google.eu");
    }

    #[test]
    fn provider_values_carry_children_and_config_key() {
        let ctx = Context::new();
        let (arena, ids) = arena_with(
            r#"
            provider "aws" {
              region = "eu-west-1"
              alias  = "eu"
              assume_role { role_arn = "r" }
            }
            "#,
            &ctx,
        );
        let values = arena.values(ids[0]);
        let obj = values.as_object().unwrap();
        assert_eq!(obj.get("config_key"), Some(&Value::from("aws.eu")));
        assert_eq!(
            obj.get("assume_role").and_then(|v| v.as_array()).map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn inject_renames_and_reparents() {
        let ctx = Context::new();
        let (mut arena, ids) = arena_with(
            r#"
            resource "t" "n" {
              dynamic "rule" {
                for_each = [1]
                content { port = 80 }
              }
            }
            "#,
            &ctx,
        );
        assert!(arena.has_dynamic(ids[0]));
        let dynamic = arena.child_block(ids[0], "dynamic").unwrap();
        let content = arena.child_block(dynamic, "content").unwrap();
        arena.inject_block(ids[0], content, "rule");
        arena.remove_child(ids[0], dynamic);

        assert!(!arena.has_dynamic(ids[0]));
        let rule = arena.child_block(ids[0], "rule").unwrap();
        assert_eq!(arena.full_name(rule), "t.n.rule");
    }
}
