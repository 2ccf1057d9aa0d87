//! Classifying module source strings.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use super::ModuleError;

pub const DEFAULT_REGISTRY_HOST: &str = "registry.terraform.io";

/// Hosts that look like registry addresses but never are.
const NON_REGISTRY_HOSTS: [&str; 2] = ["github.com", "bitbucket.org"];

pub fn is_local(source: &str) -> bool {
    ["./", "../", ".\\", "..\\"]
        .iter()
        .any(|prefix| source.starts_with(prefix))
}

/// Split `addr//sub/dir?query` into `addr?query` and `sub/dir`.
pub fn split_subdir(source: &str) -> Result<(String, String), ModuleError> {
    let (without_query, query) = match source.split_once('?') {
        Some((s, q)) => (s, Some(q)),
        None => (source, None),
    };
    let search_from = without_query.find("://").map(|i| i + 3).unwrap_or(0);
    let (addr, subdir) = match without_query[search_from..].find("//") {
        Some(i) => {
            let at = search_from + i;
            (&without_query[..at], &without_query[at + 2..])
        }
        None => (without_query, ""),
    };
    if subdir.starts_with("../") {
        return Err(ModuleError::InvalidSubdir(subdir.to_string()));
    }
    let addr = match query {
        Some(q) => format!("{addr}?{q}"),
        None => addr.to_string(),
    };
    Ok((addr, subdir.to_string()))
}

pub fn join_subdir(addr: &str, subdir: &str) -> String {
    if subdir.is_empty() {
        return addr.to_string();
    }
    match addr.split_once('?') {
        Some((base, query)) => format!("{base}//{subdir}?{query}"),
        None => format!("{addr}//{subdir}"),
    }
}

/// `[host/]namespace/name/target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAddress {
    pub host: String,
    pub namespace: String,
    pub name: String,
    pub target: String,
}

impl RegistryAddress {
    pub fn parse(addr: &str, default_host: &str) -> Result<Self, ModuleError> {
        let invalid = |reason: &str| ModuleError::InvalidRegistrySource {
            addr: addr.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = addr.split('/').collect();
        let (host, rest) = match parts.len() {
            3 => (default_host.to_string(), &parts[..]),
            4 => (normalize_host(parts[0]).ok_or_else(|| invalid("bad host"))?, &parts[1..]),
            _ => return Err(invalid("expected [host/]namespace/name/target")),
        };
        if NON_REGISTRY_HOSTS.contains(&host.as_str()) {
            return Err(invalid("GitHub and Bitbucket hosts are not registries"));
        }
        if !rest.iter().all(|p| is_registry_name(p)) {
            return Err(invalid("invalid characters"));
        }
        Ok(RegistryAddress {
            host,
            namespace: rest[0].to_string(),
            name: rest[1].to_string(),
            target: rest[2].to_string(),
        })
    }

    /// Path below the registry's module service, e.g. `hashicorp/consul/aws`.
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.name, self.target)
    }
}

impl fmt::Display for RegistryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.path())
    }
}

fn is_registry_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Bare hostname plus any non-default port.
fn normalize_host(host: &str) -> Option<String> {
    let parsed = url::Url::parse(host)
        .ok()
        .filter(|u| u.host_str().is_some())
        .or_else(|| url::Url::parse(&format!("https://{host}")).ok())?;
    let hostname = parsed.host_str()?.to_string();
    match parsed.port() {
        Some(port) if port != 443 => Some(format!("{hostname}:{port}")),
        _ => Some(hostname),
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Download directory for one module address and version.
pub fn download_dest(download_dir: &Path, addr: &str, version: &str) -> PathBuf {
    let digest = md5::compute(format!("{addr}{version}"));
    download_dir.join(format!("{digest:x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_prefixes() {
        assert!(is_local("./vpc"));
        assert!(is_local("../shared/vpc"));
        assert!(is_local("..\\win"));
        assert!(!is_local("hashicorp/consul/aws"));
        assert!(!is_local("git::https://example.com/x.git"));
    }

    #[test]
    fn subdir_splitting_keeps_scheme_and_query() {
        assert_eq!(
            split_subdir("git::https://example.com/repo.git//modules/vpc?ref=v1").unwrap(),
            ("git::https://example.com/repo.git?ref=v1".to_string(), "modules/vpc".to_string())
        );
        assert_eq!(
            split_subdir("hashicorp/consul/aws//modules/server").unwrap(),
            ("hashicorp/consul/aws".to_string(), "modules/server".to_string())
        );
        assert_eq!(
            split_subdir("https://example.com/x.zip").unwrap(),
            ("https://example.com/x.zip".to_string(), String::new())
        );
        assert!(split_subdir("a/b/c//../escape").is_err());
        assert_eq!(join_subdir("a/b/c", "sub"), "a/b/c//sub");
        assert_eq!(join_subdir("git::x.git?ref=1", "sub"), "git::x.git//sub?ref=1");
    }

    #[test]
    fn registry_addresses() {
        let a = RegistryAddress::parse("hashicorp/consul/aws", DEFAULT_REGISTRY_HOST).unwrap();
        assert_eq!(a.to_string(), "registry.terraform.io/hashicorp/consul/aws");

        let b = RegistryAddress::parse("app.terraform.io:443/org/vpc/aws", DEFAULT_REGISTRY_HOST).unwrap();
        assert_eq!(b.host, "app.terraform.io");

        let c = RegistryAddress::parse("localhost:8080/org/vpc/aws", DEFAULT_REGISTRY_HOST).unwrap();
        assert_eq!(c.host, "localhost:8080");
    }

    #[test]
    fn registry_rejections() {
        for bad in [
            "github.com/org/repo/x",
            "bitbucket.org/org/repo/x",
            "org/re po/aws",
            "a/b",
            "a/b/c/d/e",
        ] {
            assert!(
                matches!(
                    RegistryAddress::parse(bad, DEFAULT_REGISTRY_HOST),
                    Err(ModuleError::InvalidRegistrySource { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(normalize_path(Path::new("root/./a/../b")), PathBuf::from("root/b"));
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(normalize_path(Path::new("/r/mods/../vpc")), PathBuf::from("/r/vpc"));
    }

    #[test]
    fn download_dest_is_stable() {
        let a = download_dest(Path::new(".tfgraph/modules"), "a/b/c", "1.0.0");
        let b = download_dest(Path::new(".tfgraph/modules"), "a/b/c", "1.0.0");
        let c = download_dest(Path::new(".tfgraph/modules"), "a/b/c", "1.0.1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
