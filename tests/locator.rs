use std::fs;
use std::path::{Path, PathBuf};
use tfgraph::{FsLoader, LocatorOptions, ProjectLocator};

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn tree() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write(
        &root.join("main.tf"),
        "module \"x\" {\n  source = \"./mod\"\n}\n",
    );
    write(&root.join("mod/main.tf"), "variable \"a\" {}\n");
    write(&root.join(".terraform/modules/x/main.tf"), "provider \"aws\" {}\n");
    write(&root.join("envs/prod/main.tf"), "terraform {\n  backend \"s3\" {}\n}\n");
    write(&root.join("envs/prod/README.md"), "not configuration");
    tmp
}

fn relative(root: &Path, dirs: Vec<PathBuf>) -> Vec<String> {
    dirs.iter()
        .map(|d| {
            d.strip_prefix(root)
                .unwrap()
                .display()
                .to_string()
        })
        .collect()
}

#[test]
fn module_targets_are_not_projects() {
    let tmp = tree();
    let root = tmp.path();
    let locator = ProjectLocator::new(&FsLoader, LocatorOptions::default()).unwrap();
    let roots = locator.find_roots(root).unwrap();
    assert_eq!(relative(root, roots), vec!["", "envs/prod"]);
}

#[test]
fn all_paths_mode_returns_module_targets_too() {
    let tmp = tree();
    let root = tmp.path();
    let options = LocatorOptions {
        all_paths: true,
        ..LocatorOptions::default()
    };
    let locator = ProjectLocator::new(&FsLoader, options).unwrap();
    let roots = locator.find_roots(root).unwrap();
    assert_eq!(relative(root, roots), vec!["", "envs/prod", "mod"]);
}

#[test]
fn excluded_paths_are_skipped() {
    let tmp = tree();
    let root = tmp.path();
    let options = LocatorOptions {
        exclude_paths: vec!["envs/*".to_string()],
        ..LocatorOptions::default()
    };
    let locator = ProjectLocator::new(&FsLoader, options).unwrap();
    let roots = locator.find_roots(root).unwrap();
    assert_eq!(relative(root, roots), vec![""]);
}

#[test]
fn missing_root_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let locator = ProjectLocator::new(&FsLoader, LocatorOptions::default()).unwrap();
    assert!(locator.find_roots(&tmp.path().join("nope")).is_err());
}
