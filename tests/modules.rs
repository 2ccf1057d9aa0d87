use hcl::Value;
use std::fs;
use std::path::Path;
use tfgraph::modules::manifest::{Manifest, DOWNLOAD_DIR, MANIFEST_PATH};
use tfgraph::modules::source::download_dest;
use tfgraph::modules::ResolverOptions;
use tfgraph::{parse_path, DiagnosticKind, ParseOptions};

const ROOT: &str = r#"
module "consul" {
  source  = "hashicorp/consul/aws"
  version = ">= 1.1.1"
  servers = 3
}

output "cluster" {
  value = module.consul.cluster_size
}
"#;

const CONSUL: &str = r#"
variable "servers" {
  default = 1
}

output "cluster_size" {
  value = var.servers * 2
}
"#;

fn write(dir: &Path, name: &str, contents: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), contents).unwrap();
}

fn options(server: &mockito::Server) -> ParseOptions {
    ParseOptions {
        resolver: ResolverOptions {
            registry_url: Some(format!("{}/v1/modules/", server.url())),
            ..ResolverOptions::default()
        },
        ..ParseOptions::default()
    }
}

/// Put the module where a download of version 1.1.2 would land, so no git
/// clone is attempted.
fn predownload(root: &Path) {
    let dest = download_dest(
        &root.join(DOWNLOAD_DIR),
        "registry.terraform.io/hashicorp/consul/aws",
        "1.1.2",
    );
    write(&dest, "main.tf", CONSUL);
}

#[test]
fn registry_modules_are_resolved_and_evaluated() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write(root, "main.tf", ROOT);
    predownload(root);

    let mut server = mockito::Server::new();
    let versions = server
        .mock("GET", "/v1/modules/hashicorp/consul/aws/versions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"modules":[{"versions":[{"version":"1.0.0"},{"version":"1.1.2"}]}]}"#)
        .expect(1)
        .create();
    let download = server
        .mock("GET", "/v1/modules/hashicorp/consul/aws/1.1.2/download")
        .with_status(204)
        .with_header("X-Terraform-Get", "git::https://example.com/consul.git?ref=v1.1.2")
        .expect(1)
        .create();
    let _public = server
        .mock("HEAD", "/v1/modules/hashicorp/consul/aws")
        .with_status(200)
        .create();

    let project = parse_path(root, options(&server)).unwrap();
    assert!(project.all_diagnostics().is_empty(), "{:?}", project.all_diagnostics());
    assert_eq!(
        project.module.context().get_by_dot("output.cluster"),
        Some(Value::from(6))
    );
    let child = project.module.find_module("module.consul").unwrap();
    assert!(child.remote);
    assert_eq!(child.source, "hashicorp/consul/aws");

    let manifest = Manifest::read(&root.join(MANIFEST_PATH)).unwrap().unwrap();
    let entry = manifest.find("consul").unwrap();
    assert_eq!(entry.version, "1.1.2");
    assert_eq!(entry.source, "registry.terraform.io/hashicorp/consul/aws");
    assert_eq!(entry.download_url, "git::https://example.com/consul.git?ref=v1.1.2");
    assert!(entry.public);

    // the second run is served from the manifest
    let again = parse_path(root, options(&server)).unwrap();
    assert_eq!(
        again.module.context().get_by_dot("output.cluster"),
        Some(Value::from(6))
    );
    versions.assert();
    download.assert();
}

#[test]
fn existing_manifest_is_used_without_resolving() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write(root, "main.tf", ROOT);
    predownload(root);
    let dest = download_dest(
        &root.join(DOWNLOAD_DIR),
        "registry.terraform.io/hashicorp/consul/aws",
        "1.1.2",
    );

    let mut manifest = Manifest::new(root.display().to_string());
    manifest.upsert(tfgraph::modules::manifest::ManifestModule {
        key: "consul".into(),
        source: "registry.terraform.io/hashicorp/consul/aws".into(),
        version: "1.1.2".into(),
        dir: dest.strip_prefix(root).unwrap().display().to_string(),
        ..Default::default()
    });
    manifest.write(&root.join(MANIFEST_PATH)).unwrap();

    let options = ParseOptions {
        resolve_modules: false,
        ..ParseOptions::default()
    };
    let project = parse_path(root, options).unwrap();
    assert_eq!(
        project.module.context().get_by_dot("output.cluster"),
        Some(Value::from(6))
    );
}

#[test]
fn undownloaded_modules_are_reported() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "main.tf", ROOT);

    let options = ParseOptions {
        resolve_modules: false,
        ..ParseOptions::default()
    };
    let project = parse_path(tmp.path(), options).unwrap();
    let diagnostics = project.all_diagnostics();
    let missing = diagnostics
        .iter()
        .find(|d| d.kind == DiagnosticKind::ModuleLoad)
        .unwrap();
    assert_eq!(missing.subject.as_deref(), Some("module.consul"));
    assert!(missing.message.contains("has not been downloaded"));
    assert!(project.module.children.is_empty());
    assert_eq!(project.module.context().get_by_dot("output.cluster"), None);
}

#[test]
fn nested_local_modules_resolve_relative_to_their_caller() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write(
        root,
        "main.tf",
        r#"
        module "app" {
          source = "./modules/app"
          name   = "web"
        }
        output "fqdn" { value = module.app.fqdn }
        "#,
    );
    write(
        &root.join("modules/app"),
        "main.tf",
        r#"
        variable "name" {}
        module "dns" {
          source = "../dns"
          host   = var.name
        }
        output "fqdn" { value = module.dns.record }
        "#,
    );
    write(
        &root.join("modules/dns"),
        "main.tf",
        r#"
        variable "host" {}
        output "record" { value = "${var.host}.example.com" }
        "#,
    );

    let project = parse_path(root, ParseOptions::default()).unwrap();
    assert!(project.all_diagnostics().is_empty(), "{:?}", project.all_diagnostics());
    assert_eq!(
        project.module.context().get_by_dot("output.fqdn"),
        Some(Value::from("web.example.com"))
    );
    let dns = project.module.find_module("module.app.module.dns").unwrap();
    assert_eq!(dns.parent.as_deref(), Some("module.app"));
    assert!(!root.join(MANIFEST_PATH).exists());
}

fn consul_tar_gz() -> Vec<u8> {
    let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
        Vec::new(),
        flate2::Compression::default(),
    ));
    let mut header = tar::Header::new_gnu();
    header.set_size(CONSUL.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "main.tf", CONSUL.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

#[test]
fn registry_modules_served_as_archives_are_unpacked() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write(root, "main.tf", ROOT);

    let mut server = mockito::Server::new();
    let archive_url = format!("{}/archives/consul-1.1.2.tar.gz", server.url());
    let _versions = server
        .mock("GET", "/v1/modules/hashicorp/consul/aws/versions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"modules":[{"versions":[{"version":"1.1.2"}]}]}"#)
        .create();
    let _download = server
        .mock("GET", "/v1/modules/hashicorp/consul/aws/1.1.2/download")
        .with_status(204)
        .with_header("X-Terraform-Get", &archive_url)
        .create();
    let _public = server
        .mock("HEAD", "/v1/modules/hashicorp/consul/aws")
        .with_status(200)
        .create();
    let archive = server
        .mock("GET", "/archives/consul-1.1.2.tar.gz")
        .with_status(200)
        .with_body(consul_tar_gz())
        .expect(1)
        .create();

    let project = parse_path(root, options(&server)).unwrap();
    assert!(project.all_diagnostics().is_empty(), "{:?}", project.all_diagnostics());
    assert_eq!(
        project.module.context().get_by_dot("output.cluster"),
        Some(Value::from(6))
    );

    let manifest = Manifest::read(&root.join(MANIFEST_PATH)).unwrap().unwrap();
    let entry = manifest.find("consul").unwrap();
    assert_eq!(entry.download_url, archive_url);
    let dest = download_dest(
        &root.join(DOWNLOAD_DIR),
        "registry.terraform.io/hashicorp/consul/aws",
        "1.1.2",
    );
    assert!(dest.join("main.tf").is_file());
    archive.assert();
}

#[test]
fn failed_registry_lookups_are_reported_once() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "main.tf", ROOT);

    let mut server = mockito::Server::new();
    let _versions = server
        .mock("GET", "/v1/modules/hashicorp/consul/aws/versions")
        .with_status(404)
        .create();

    let project = parse_path(tmp.path(), options(&server)).unwrap();
    let module_errors: Vec<_> = project
        .all_diagnostics()
        .into_iter()
        .filter(|d| d.kind == DiagnosticKind::ModuleLoad)
        .collect();
    assert_eq!(module_errors.len(), 1, "{module_errors:?}");
    assert_eq!(module_errors[0].subject.as_deref(), Some("module.consul"));
    assert!(!module_errors[0].message.contains("has not been downloaded"));
    assert!(project.module.children.is_empty());
}
