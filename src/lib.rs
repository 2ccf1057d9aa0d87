pub mod config;
pub mod context;
pub mod diagnostics;
pub mod eval;
pub mod frontend;
pub mod graph;
pub mod loader;
pub mod locator;
pub mod modules;
pub mod parser;
pub mod session;

use anyhow::{Context as _, Result};
use std::path::Path;

// Public re-exports
pub use context::Context;
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use eval::{EvalState, Evaluator, Module, ModuleCall};
pub use frontend::env::InputVars;
pub use frontend::{Attribute, Block, BlockArena, BlockId, Reference, Resolved};
pub use loader::{FsLoader, Loader, MapLoader};
pub use locator::{LocatorOptions, ProjectLocator};
pub use session::{EvalMode, ParseOptions, Session};

/// Result of evaluating one project root.
#[derive(Debug, Clone)]
pub struct Project {
    /// The root module with every instantiated module call as a child.
    pub module: Module,
    /// Problems found while resolving and parsing, outside of any module.
    pub diagnostics: Vec<Diagnostic>,
    pub iterations_used: usize,
    pub converged: bool,
}

impl Project {
    /// Session diagnostics followed by the warnings of every module.
    pub fn all_diagnostics(&self) -> Vec<Diagnostic> {
        let mut out = self.diagnostics.clone();
        out.extend(self.module.all_warnings());
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "module": self.module.to_json(),
            "diagnostics": self.diagnostics,
            "iterations_used": self.iterations_used,
            "converged": self.converged,
        })
    }
}

// Pure API: resolve modules, parse and evaluate the project at `root` using
// a Loader.
pub fn parse_project(root: &Path, loader: &dyn Loader, options: ParseOptions) -> Result<Project> {
    let session = Session::new(loader, root, options);
    session.resolve_modules()?;

    let (files, diagnostics) = parser::parse_directory(loader, root, session.options().stop_on_error)
        .with_context(|| format!("failed to load project {}", root.display()))?;
    session.extend_diagnostics(diagnostics);

    let opts = session.options();
    let (inputs, var_diagnostics) =
        parser::load_input_vars(loader, root, &opts.var_files, &opts.inputs)?;
    session.extend_diagnostics(var_diagnostics);

    let module = Module::new(None, "", root, files, None, false);
    let mut evaluator = Evaluator::new(&session, module, inputs);
    evaluator.run();
    log::info!(
        "evaluated {} in {} passes",
        root.display(),
        evaluator.iterations_used()
    );

    let iterations_used = evaluator.iterations_used();
    let converged = evaluator.converged();
    let module = evaluator.into_module();
    Ok(Project {
        module,
        diagnostics: session.take_diagnostics(),
        iterations_used,
        converged,
    })
}

/// Evaluate a project on the local filesystem.
pub fn parse_path(root: &Path, options: ParseOptions) -> Result<Project> {
    parse_project(root, &FsLoader, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcl::Value;
    use std::path::PathBuf;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    fn options(mode: EvalMode) -> ParseOptions {
        ParseOptions {
            mode,
            ..ParseOptions::default()
        }
    }

    fn names(module: &Module) -> Vec<String> {
        module
            .blocks
            .iter()
            .map(|id| module.arena.full_name(*id))
            .collect()
    }

    #[test]
    fn variable_default_reaches_resource() {
        let loader = MapLoader::new().with_file(
            "root/main.tf",
            r#"
            variable "instance_type" { default = "t3.medium" }
            resource "widget" "example" { size = var.instance_type }
            "#,
        );
        for mode in [EvalMode::Graph, EvalMode::Loop] {
            let project = parse_project(&p("root"), &loader, options(mode)).unwrap();
            assert_eq!(
                project.module.block_value("widget.example", "size"),
                Some(Value::from("t3.medium"))
            );
            assert!(project.all_diagnostics().is_empty());
        }
    }

    #[test]
    fn count_expands_into_instances() {
        let loader = MapLoader::new().with_file("root/main.tf", r#"resource "x" "y" { count = 3 }"#);
        for mode in [EvalMode::Graph, EvalMode::Loop] {
            let project = parse_project(&p("root"), &loader, options(mode)).unwrap();
            assert_eq!(names(&project.module), vec!["x.y[0]", "x.y[1]", "x.y[2]"]);
        }
    }

    #[test]
    fn overrides_win_over_defaults() {
        let loader = MapLoader::new()
            .with_file(
                "root/main.tf",
                r#"
                variable "x" { default = "a" }
                variable "y" { default = "a" }
                variable "z" { default = "a" }
                "#,
            )
            .with_file("root/terraform.tfvars", "y = \"file\"\nz = \"file\"")
            .with_file("root/b.auto.tfvars", "z = \"auto\"");
        let mut opts = ParseOptions::default();
        opts.inputs.insert_raw("x", "b");
        let project = parse_project(&p("root"), &loader, opts).unwrap();
        let ctx = project.module.context();
        assert_eq!(ctx.get_by_dot("var.x"), Some(Value::from("b")));
        assert_eq!(ctx.get_by_dot("var.y"), Some(Value::from("file")));
        assert_eq!(ctx.get_by_dot("var.z"), Some(Value::from("auto")));
    }

    #[test]
    fn locals_and_outputs_converge() {
        let loader = MapLoader::new().with_file(
            "root/main.tf",
            r#"
            variable "a" { default = 2 }
            locals {
              c = local.b * 10
              b = var.a + 1
            }
            output "o" { value = local.c }
            output "literal" { value = "fixed" }
            "#,
        );
        for mode in [EvalMode::Graph, EvalMode::Loop] {
            let project = parse_project(&p("root"), &loader, options(mode)).unwrap();
            let ctx = project.module.context();
            assert_eq!(ctx.get_by_dot("var.a"), Some(Value::from(2)));
            assert_eq!(ctx.get_by_dot("local.b"), Some(Value::from(3)));
            assert_eq!(ctx.get_by_dot("output.o"), Some(Value::from(30)));
            assert_eq!(ctx.get_by_dot("output.literal"), Some(Value::from("fixed")));
            assert!(project.converged);
            assert!(project.iterations_used <= 2 * ParseOptions::default().max_iterations);
        }
    }

    #[test]
    fn counted_module_instances_are_isolated() {
        let loader = MapLoader::new()
            .with_file(
                "root/main.tf",
                r#"
                module "m" {
                  source = "./mod"
                  count  = 2
                  idx    = count.index
                }
                output "names" { value = module.m[*].name }
                "#,
            )
            .with_file(
                "root/mod/main.tf",
                r#"
                variable "idx" {}
                output "name" { value = "inst-${var.idx}" }
                "#,
            );
        for mode in [EvalMode::Graph, EvalMode::Loop] {
            let project = parse_project(&p("root"), &loader, options(mode)).unwrap();
            assert_eq!(project.module.children.len(), 2);
            let first = project.module.find_module("module.m[0]").unwrap();
            let second = project.module.find_module("module.m[1]").unwrap();
            assert_eq!(first.context().get_by_dot("output.name"), Some(Value::from("inst-0")));
            assert_eq!(second.context().get_by_dot("output.name"), Some(Value::from("inst-1")));
            assert_eq!(
                project.module.context().get_by_dot("output.names"),
                Some(Value::Array(vec![Value::from("inst-0"), Value::from("inst-1")]))
            );
        }
    }

    #[test]
    fn for_each_modules_are_keyed() {
        let loader = MapLoader::new()
            .with_file(
                "root/main.tf",
                r#"
                module "svc" {
                  source   = "./svc"
                  for_each = { api = 2, web = 3 }
                  replicas = each.value
                }
                "#,
            )
            .with_file(
                "root/svc/main.tf",
                r#"
                variable "replicas" {}
                resource "pod" "p" { count = var.replicas }
                output "pods" { value = length(pod.p) }
                "#,
            );
        let project = parse_project(&p("root"), &loader, ParseOptions::default()).unwrap();
        let ctx = project.module.context();
        assert_eq!(ctx.get_by_dot("module.svc.api.pods"), Some(Value::from(2)));
        assert_eq!(ctx.get_by_dot("module.svc.web.pods"), Some(Value::from(3)));
        let web = project.module.find_module("module.svc[\"web\"]").unwrap();
        assert_eq!(web.blocks.len(), 5);
    }

    #[test]
    fn references_to_counted_resources_see_all_instances() {
        let loader = MapLoader::new().with_file(
            "root/main.tf",
            r#"
            resource "x" "y" { count = 3 }
            output "n" { value = length(x.y) }
            "#,
        );
        for mode in [EvalMode::Graph, EvalMode::Loop] {
            let project = parse_project(&p("root"), &loader, options(mode)).unwrap();
            assert_eq!(
                project.module.context().get_by_dot("output.n"),
                Some(Value::from(3))
            );
        }
    }

    #[test]
    fn missing_modules_and_vars_are_diagnostics() {
        let loader = MapLoader::new().with_file(
            "root/main.tf",
            r#"
            variable "region" {}
            variable "db_password" {}
            module "gone" { source = "./nowhere" }
            "#,
        );
        let project = parse_project(&p("root"), &loader, ParseOptions::default()).unwrap();
        let diagnostics = project.all_diagnostics();
        assert!(diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::ModuleLoad && d.subject.as_deref() == Some("module.gone")));
        let missing: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::MissingVars)
            .collect();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].message.contains("variable.region"));
        assert!(!missing[0].message.contains("db_password"));
    }

    #[test]
    fn parse_errors_are_fatal_only_when_asked() {
        let loader = MapLoader::new()
            .with_file("root/main.tf", "locals { a = 1 }")
            .with_file("root/broken.tf", "locals {");
        let project = parse_project(&p("root"), &loader, ParseOptions::default()).unwrap();
        assert_eq!(project.diagnostics.len(), 1);
        assert_eq!(project.diagnostics[0].kind, DiagnosticKind::Parse);

        let strict = ParseOptions {
            stop_on_error: true,
            ..ParseOptions::default()
        };
        assert!(parse_project(&p("root"), &loader, strict).is_err());
    }

    #[test]
    fn broken_default_var_files_do_not_abort() {
        let loader = MapLoader::new()
            .with_file(
                "root/main.tf",
                r#"
                variable "x" { default = "fallback" }
                variable "y" { default = "fallback" }
                "#,
            )
            .with_file("root/terraform.tfvars", "x = local.nope\ny = \"set\"")
            .with_file("root/extra.auto.tfvars", "x = ");
        let project = parse_project(&p("root"), &loader, ParseOptions::default()).unwrap();
        let ctx = project.module.context();
        assert_eq!(ctx.get_by_dot("var.x"), Some(Value::from("fallback")));
        assert_eq!(ctx.get_by_dot("var.y"), Some(Value::from("set")));
        assert_eq!(project.diagnostics.len(), 1);
        assert_eq!(project.diagnostics[0].kind, DiagnosticKind::Parse);
    }

    #[test]
    fn unreadable_root_is_fatal() {
        let loader = MapLoader::new().with_file("root/main.tf", "");
        assert!(parse_project(&p("elsewhere"), &loader, ParseOptions::default()).is_err());
    }

    #[test]
    fn json_rendering_includes_values() {
        let loader = MapLoader::new().with_file(
            "root/main.tf",
            r#"
            resource "aws_instance" "web" {
              instance_type = "t3.micro"
              ebs_block_device { volume_size = 10 }
            }
            "#,
        );
        let project = parse_project(&p("root"), &loader, ParseOptions::default()).unwrap();
        let json = project.to_json();
        let block = &json["module"]["blocks"][0];
        assert_eq!(block["address"], "aws_instance.web");
        assert_eq!(block["values"]["instance_type"], "t3.micro");
        assert_eq!(block["blocks"][0]["type"], "ebs_block_device");
        assert_eq!(json["converged"], true);
    }
}
