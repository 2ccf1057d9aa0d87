//! Dependency-ordered evaluation of one module instance.

pub mod dag;
pub mod vertex;

use anyhow::Result;
use std::collections::HashMap;

use crate::eval::Evaluator;
use crate::frontend::reference::strip_selectors;
pub use dag::Dag;
pub use vertex::Vertex;

const ROOT: usize = 0;

pub struct Graph {
    dag: Dag,
    vertices: Vec<Vertex>,
    ids: Vec<String>,
    index: HashMap<String, usize>,
}

impl Default for Graph {
    fn default() -> Self {
        let mut dag = Dag::new();
        let root = dag.add_vertex();
        let ids = vec!["root".to_string()];
        let index = HashMap::from([(ids[0].clone(), root)]);
        Self {
            dag,
            vertices: vec![Vertex::Root],
            ids,
            index,
        }
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build vertices for the evaluator's top-level blocks and connect
    /// every producer to its consumers. The root reaches every vertex.
    pub fn populate(ev: &Evaluator<'_>) -> Self {
        let module = ev.module();
        let mut graph = Graph::new();
        for id in &module.blocks {
            for vertex in Vertex::for_block(module, *id) {
                let key = vertex.id(module);
                graph.add_vertex(key, vertex);
            }
        }

        for consumer in 1..graph.vertices.len() {
            for reference in graph.vertices[consumer].references(module) {
                let Some(key) = vertex_key(&reference, module.address.as_deref()) else {
                    continue;
                };
                let Some(&producer) = graph.index.get(&key) else {
                    continue;
                };
                if producer == consumer || graph.dag.has_edge(producer, consumer) {
                    continue;
                }
                if !graph.dag.add_edge(producer, consumer) {
                    log::debug!(
                        "dropping edge {} -> {}, it would create a cycle",
                        graph.ids[producer],
                        graph.ids[consumer]
                    );
                }
            }
        }
        log::debug!(
            "graph for {} has {} vertices",
            module.name(),
            graph.vertices.len()
        );
        graph
    }

    fn add_vertex(&mut self, key: String, vertex: Vertex) {
        if self.index.contains_key(&key) {
            log::debug!("duplicate vertex {key}, keeping the first");
            return;
        }
        let idx = self.dag.add_vertex();
        self.dag.add_edge(ROOT, idx);
        self.index.insert(key.clone(), idx);
        self.ids.push(key);
        self.vertices.push(vertex);
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.len() <= 1
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn depends_on(&self, consumer: &str, producer: &str) -> bool {
        match (self.index.get(producer), self.index.get(consumer)) {
            (Some(p), Some(c)) => self.dag.has_edge(*p, *c),
            _ => false,
        }
    }

    pub fn reduce_transitively(&mut self) {
        self.dag.reduce_transitively();
    }

    /// Vertex ids in the order `walk` visits them.
    pub fn order(&self) -> Vec<&str> {
        self.dag
            .topological_order(ROOT)
            .into_iter()
            .map(|i| self.ids[i].as_str())
            .collect()
    }

    /// Evaluate then expand every vertex in dependency order. Failures are
    /// recorded and the walk moves on.
    pub fn walk(&self, ev: &mut Evaluator<'_>) {
        for idx in self.dag.topological_order(ROOT) {
            let vertex = &self.vertices[idx];
            let result = match vertex {
                Vertex::Root => continue,
                Vertex::Module(id) => walk_module(ev, *id),
                _ => {
                    let _guard = ev.session().lock().acquire();
                    vertex.evaluate(ev).and_then(|_| vertex.expand(ev))
                }
            };
            if let Err(err) = result {
                ev.record_vertex_failure(&self.ids[idx], &err);
            }
        }
    }
}

/// Expand a module block under the evaluation lock, then instantiate each
/// resulting call. Child walks take the lock themselves.
fn walk_module(ev: &mut Evaluator<'_>, id: crate::frontend::BlockId) -> Result<()> {
    let instances = {
        let _guard = ev.session().lock().acquire();
        ev.expand_vertex(id)?
    };
    for instance in instances {
        let name = ev.module().arena.full_name(instance);
        ev.evaluate_call(&name);
    }
    Ok(())
}

/// Vertex a reference points at: selectors are dropped and the address is
/// cut to `data.type.name`, `provider.name.alias` or `kind.name`.
pub fn vertex_key(reference: &str, module_address: Option<&str>) -> Option<String> {
    let stripped = strip_selectors(reference);
    let parts: Vec<&str> = stripped.split('.').collect();
    if parts.len() < 2 {
        return None;
    }
    let keep = match parts[0] {
        "data" | "provider" => 3,
        _ => 2,
    };
    let key = parts[..keep.min(parts.len())].join(".");
    Some(match module_address {
        Some(address) => format!("{address}.{key}"),
        None => key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Module;
    use crate::frontend::env::InputVars;
    use crate::loader::MapLoader;
    use crate::parser::ParsedFile;
    use crate::session::{ParseOptions, Session};
    use std::path::{Path, PathBuf};

    fn module(src: &str, address: Option<&str>) -> Module {
        let raw = vec![ParsedFile {
            path: PathBuf::from("root/main.tf"),
            body: hcl::from_str(src).unwrap(),
        }];
        Module::new(address.map(str::to_string), "", Path::new("root"), raw, None, false)
    }

    #[test]
    fn reference_keys_are_truncated() {
        assert_eq!(vertex_key("aws_instance.web[0].id", None).as_deref(), Some("aws_instance.web"));
        assert_eq!(vertex_key("data.aws_ami.u.id", None).as_deref(), Some("data.aws_ami.u"));
        assert_eq!(vertex_key("provider.aws.west", None).as_deref(), Some("provider.aws.west"));
        assert_eq!(vertex_key("module.net[\"a.b\"].id", None).as_deref(), Some("module.net"));
        assert_eq!(
            vertex_key("local.x", Some("module.m")).as_deref(),
            Some("module.m.local.x")
        );
        assert_eq!(vertex_key("count", None), None);
    }

    #[test]
    fn edges_follow_references() {
        let loader = MapLoader::new();
        let session = Session::new(&loader, Path::new("root"), ParseOptions::default());
        let ev = Evaluator::new(
            &session,
            module(
                r#"
                variable "size" { default = 1 }
                locals {
                  doubled = var.size * 2
                  name    = "n-${local.doubled}"
                }
                provider "aws" {}
                resource "aws_instance" "web" { count = local.doubled }
                output "ids" { value = aws_instance.web[*].id }
                "#,
                None,
            ),
            InputVars::default(),
        );
        let graph = Graph::populate(&ev);
        assert!(graph.depends_on("local.doubled", "var.size"));
        assert!(graph.depends_on("local.name", "local.doubled"));
        assert!(graph.depends_on("aws_instance.web", "local.doubled"));
        assert!(graph.depends_on("aws_instance.web", "provider.aws"));
        assert!(graph.depends_on("output.ids", "aws_instance.web"));

        let order = graph.order();
        let pos = |id: &str| order.iter().position(|o| *o == id).unwrap();
        assert_eq!(order[0], "root");
        assert!(pos("var.size") < pos("local.doubled"));
        assert!(pos("local.doubled") < pos("aws_instance.web"));
        assert!(pos("aws_instance.web") < pos("output.ids"));
    }

    #[test]
    fn cyclic_references_keep_every_vertex_reachable() {
        let loader = MapLoader::new();
        let session = Session::new(&loader, Path::new("root"), ParseOptions::default());
        let ev = Evaluator::new(
            &session,
            module("locals {\n a = local.b\n b = local.a\n}", Some("module.m")),
            InputVars::default(),
        );
        let graph = Graph::populate(&ev);
        assert!(graph.contains("module.m.local.a"));
        // a is scanned first, so b -> a wins and a -> b is dropped
        assert!(graph.depends_on("module.m.local.a", "module.m.local.b"));
        assert!(!graph.depends_on("module.m.local.b", "module.m.local.a"));
        assert_eq!(graph.order().len(), 3);
    }

    #[test]
    fn reduction_keeps_root_reaching_everything() {
        let loader = MapLoader::new();
        let session = Session::new(&loader, Path::new("root"), ParseOptions::default());
        let ev = Evaluator::new(
            &session,
            module(
                "variable \"a\" {}\nlocals {\n b = var.a\n c = local.b\n}",
                None,
            ),
            InputVars::default(),
        );
        let mut graph = Graph::populate(&ev);
        graph.reduce_transitively();
        assert_eq!(graph.order(), vec!["root", "var.a", "local.b", "local.c"]);
    }
}
