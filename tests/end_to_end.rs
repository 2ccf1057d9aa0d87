use hcl::Value;
use std::fs;
use std::path::Path;
use tfgraph::{parse_path, EvalMode, ParseOptions};

const MAIN: &str = r#"
variable "env" {}
variable "replicas" {
  type    = number
  default = 1
}
variable "ports" {
  default = [80, 443]
}

locals {
  prefix = "${var.env}-${terraform.workspace}"
  tags   = { env = var.env, owner = "platform" }
}

data "aws_ami" "ubuntu" {
  most_recent = true
  name_regex  = "ubuntu-${var.env}"
}

resource "aws_instance" "web" {
  count         = var.replicas
  ami           = data.aws_ami.ubuntu.name_regex
  instance_type = "t3.micro"
  tags          = merge(local.tags, { Name = "${local.prefix}-${count.index}" })
}

resource "aws_security_group" "fw" {
  name = "${local.prefix}-fw"
  dynamic "ingress" {
    for_each = var.ports
    content {
      from_port = ingress.value
      to_port   = ingress.value
    }
  }
}

resource "aws_eip" "ip" {
  for_each = toset(["a", "b"])
  instance = aws_instance.web[0].instance_type
  zone     = each.key
}

output "names" {
  value = aws_instance.web[*].tags.Name
}

output "ingress_ports" {
  value = aws_security_group.fw.ingress[*].from_port
}

output "eip_zones" {
  value = [for k, v in aws_eip.ip : v.zone]
}
"#;

fn project_dir() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("main.tf"), MAIN).unwrap();
    fs::write(tmp.path().join("terraform.tfvars"), "env = \"dev\"\n").unwrap();
    fs::write(tmp.path().join("prod.tfvars"), "env = \"prod\"\nreplicas = \"3\"\n").unwrap();
    tmp
}

fn output(project: &tfgraph::Project, name: &str) -> Option<Value> {
    project.module.context().get(&["output", name])
}

fn strings(items: &[&str]) -> Value {
    Value::Array(items.iter().map(|s| Value::from(*s)).collect())
}

fn check_dev(root: &Path, mode: EvalMode) {
    let options = ParseOptions {
        mode,
        ..ParseOptions::default()
    };
    let project = parse_path(root, options).unwrap();
    assert!(project.all_diagnostics().is_empty(), "{:?}", project.all_diagnostics());
    assert_eq!(output(&project, "names"), Some(strings(&["dev-default-0"])));
    assert_eq!(
        output(&project, "ingress_ports"),
        Some(Value::Array(vec![Value::from(80), Value::from(443)]))
    );
    assert_eq!(output(&project, "eip_zones"), Some(strings(&["a", "b"])));
    assert_eq!(
        project.module.block_value("aws_instance.web[0]", "ami"),
        Some(Value::from("ubuntu-dev"))
    );
    assert_eq!(
        project.module.block_value("aws_eip.ip[\"b\"]", "instance"),
        Some(Value::from("t3.micro"))
    );
}

#[test]
fn graph_and_loop_modes_agree() {
    let tmp = project_dir();
    check_dev(tmp.path(), EvalMode::Graph);
    check_dev(tmp.path(), EvalMode::Loop);
}

#[test]
fn var_files_and_workspace_override_defaults() {
    let tmp = project_dir();
    let options = ParseOptions {
        var_files: vec!["prod.tfvars".into()],
        workspace: "blue".to_string(),
        ..ParseOptions::default()
    };
    let project = parse_path(tmp.path(), options).unwrap();
    assert_eq!(
        output(&project, "names"),
        Some(strings(&["prod-blue-0", "prod-blue-1", "prod-blue-2"]))
    );
    let instances = project
        .module
        .blocks
        .iter()
        .filter(|id| project.module.arena.get(**id).type_label() == "aws_instance")
        .count();
    assert_eq!(instances, 3);
}

#[test]
fn missing_inputs_are_reported_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("main.tf"), MAIN).unwrap();
    let project = parse_path(tmp.path(), ParseOptions::default()).unwrap();
    let diagnostics = project.all_diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("variable.env"));
    assert_eq!(
        project.module.block_value("aws_instance.web[0]", "instance_type"),
        Some(Value::from("t3.micro"))
    );
}

#[test]
fn json_output_is_serializable() {
    let tmp = project_dir();
    let project = parse_path(tmp.path(), ParseOptions::default()).unwrap();
    let json = serde_json::to_string(&project.to_json()).unwrap();
    assert!(json.contains("aws_security_group.fw"));
    assert!(json.contains("dev-default-fw"));
}

const MAIN_JSON: &str = r#"{
  "variable": {
    "env": { "default": "dev" },
    "replicas": { "default": 2 }
  },
  "resource": {
    "aws_instance": {
      "web": {
        "count": "${var.replicas}",
        "instance_type": "t3.micro",
        "tags": { "Name": "${var.env}-${count.index}" }
      }
    }
  },
  "output": {
    "names": { "value": "${aws_instance.web[*].tags.Name}" }
  }
}"#;

#[test]
fn json_configuration_is_evaluated() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("main.tf.json"), MAIN_JSON).unwrap();
    fs::write(
        tmp.path().join("extra.tf"),
        "output \"first\" {\n  value = aws_instance.web[0].instance_type\n}\n",
    )
    .unwrap();
    for mode in [EvalMode::Graph, EvalMode::Loop] {
        let options = ParseOptions {
            mode,
            ..ParseOptions::default()
        };
        let project = parse_path(tmp.path(), options).unwrap();
        assert!(project.all_diagnostics().is_empty(), "{:?}", project.all_diagnostics());
        assert_eq!(output(&project, "names"), Some(strings(&["dev-0", "dev-1"])));
        assert_eq!(output(&project, "first"), Some(Value::from("t3.micro")));
    }
}
