//! Downloading remote module sources into the local cache.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use git2::{FetchOptions, ObjectType, Repository};
use reqwest::blocking::Client;
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use walkdir::WalkDir;

use super::ModuleError;

const ARCHIVE_SUFFIXES: [(&str, ArchiveKind); 4] = [
    (".tar.gz", ArchiveKind::TarGz),
    (".tgz", ArchiveKind::TarGz),
    (".tar", ArchiveKind::Tar),
    (".zip", ArchiveKind::Zip),
];
const UNSUPPORTED_ARCHIVES: [&str; 4] = [".tar.bz2", ".tbz2", ".tar.xz", ".txz"];
const UNSUPPORTED_SCHEMES: [&str; 4] = ["s3::", "gcs::", "hg::", "file://"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Tar,
    Zip,
}

impl ArchiveKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "tar.gz" | "tgz" => Some(ArchiveKind::TarGz),
            "tar" => Some(ArchiveKind::Tar),
            "zip" => Some(ArchiveKind::Zip),
            _ => None,
        }
    }
}

/// What a non-registry source string points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSource {
    Git { url: String, reference: Option<String> },
    /// An archive downloaded over HTTP and unpacked into the cache.
    Archive { url: String, kind: ArchiveKind },
    Http(String),
}

impl RemoteSource {
    pub fn classify(addr: &str) -> Result<Self, ModuleError> {
        let unsupported = || ModuleError::UnsupportedSource(addr.to_string());
        if UNSUPPORTED_SCHEMES.iter().any(|s| addr.starts_with(s)) {
            return Err(unsupported());
        }
        let (base, query) = match addr.split_once('?') {
            Some((b, q)) => (b, Some(q)),
            None => (addr, None),
        };
        let base_lower = base.to_ascii_lowercase();
        if UNSUPPORTED_ARCHIVES.iter().any(|s| base_lower.ends_with(s)) {
            return Err(unsupported());
        }
        let http = base.starts_with("http://") || base.starts_with("https://");
        if let Some(name) = query.and_then(|q| query_value(q, "archive")) {
            let kind = ArchiveKind::from_name(&name).ok_or_else(unsupported)?;
            if !http {
                return Err(unsupported());
            }
            return Ok(RemoteSource::Archive {
                url: without_query_key(addr, "archive"),
                kind,
            });
        }
        if let Some((_, kind)) = ARCHIVE_SUFFIXES.iter().find(|(s, _)| base_lower.ends_with(s)) {
            if !http {
                return Err(unsupported());
            }
            return Ok(RemoteSource::Archive {
                url: addr.to_string(),
                kind: *kind,
            });
        }
        let reference = query.and_then(|q| query_value(q, "ref"));

        if let Some(git) = base.strip_prefix("git::") {
            return Ok(RemoteSource::Git {
                url: git.to_string(),
                reference,
            });
        }
        for host in ["github.com/", "bitbucket.org/"] {
            if base.starts_with(host) {
                let url = format!("https://{}", base.trim_end_matches('/'));
                let url = if url.ends_with(".git") { url } else { format!("{url}.git") };
                return Ok(RemoteSource::Git { url, reference });
            }
        }
        if base.starts_with("git@") || base.ends_with(".git") {
            return Ok(RemoteSource::Git {
                url: base.to_string(),
                reference,
            });
        }
        if http {
            return Ok(RemoteSource::Http(addr.to_string()));
        }
        Err(unsupported())
    }
}

fn query_value(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| match pair.split_once('=') {
        Some((k, v)) if k == key => Some(v.to_string()),
        _ => None,
    })
}

/// `addr` with every `key=...` query pair removed.
fn without_query_key(addr: &str, key: &str) -> String {
    let Some((base, query)) = addr.split_once('?') else {
        return addr.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| pair.split('=').next() != Some(key))
        .collect();
    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{base}?{}", kept.join("&"))
    }
}

/// Fetches remote sources, remembering every address it has already fetched
/// or failed on during this run.
pub struct PackageFetcher {
    client: Client,
    fetched: HashMap<String, PathBuf>,
    failed: HashMap<String, String>,
}

impl PackageFetcher {
    pub fn new() -> Result<Self, ModuleError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ModuleError::Fetch {
                addr: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            fetched: HashMap::new(),
            failed: HashMap::new(),
        })
    }

    /// Number of addresses actually downloaded so far.
    pub fn downloads(&self) -> usize {
        self.fetched.len()
    }

    pub fn fetch(&mut self, addr: &str, dest: &Path) -> Result<(), ModuleError> {
        if let Some(previous) = self.fetched.get(addr) {
            if previous == dest || dest.exists() {
                log::trace!("cache hit (run): {addr}");
                return Ok(());
            }
            log::debug!("module {addr} already downloaded, copying to {}", dest.display());
            return copy_dir(previous, dest).map_err(|e| ModuleError::Fetch {
                addr: addr.to_string(),
                message: format!("{e:#}"),
            });
        }
        if let Some(message) = self.failed.get(addr) {
            return Err(ModuleError::Fetch {
                addr: addr.to_string(),
                message: message.clone(),
            });
        }

        match self.fetch_from_remote(addr, dest) {
            Ok(()) => {
                self.fetched.insert(addr.to_string(), dest.to_path_buf());
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_dir_all(dest);
                if let ModuleError::Fetch { message, .. } = &err {
                    self.failed.insert(addr.to_string(), message.clone());
                }
                Err(err)
            }
        }
    }

    fn fetch_from_remote(&mut self, addr: &str, dest: &Path) -> Result<(), ModuleError> {
        match RemoteSource::classify(addr)? {
            RemoteSource::Git { url, reference } => {
                log::info!("cloning module {url}");
                clone_repository(&url, reference.as_deref(), dest).map_err(|e| ModuleError::Fetch {
                    addr: addr.to_string(),
                    message: format!("{e:#}"),
                })
            }
            RemoteSource::Archive { url, kind } => {
                log::info!("downloading module archive {url}");
                self.download_archive(&url, kind, dest)
                    .map_err(|e| ModuleError::Fetch {
                        addr: addr.to_string(),
                        message: format!("{e:#}"),
                    })
            }
            RemoteSource::Http(url) => {
                let location = self.follow_http(&url)?;
                if matches!(RemoteSource::classify(&location), Ok(RemoteSource::Http(_))) {
                    return Err(ModuleError::UnsupportedSource(location));
                }
                self.fetch(&location, dest)
            }
        }
    }

    fn download_archive(&self, url: &str, kind: ArchiveKind, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("requesting {url}"))?;
        if !response.status().is_success() {
            bail!("status {}", response.status());
        }
        let bytes = response.bytes().with_context(|| format!("reading {url}"))?;
        unpack_archive(&bytes, kind, dest)
    }

    /// Follow an HTTP source to the location it advertises in
    /// `X-Terraform-Get`.
    fn follow_http(&self, raw: &str) -> Result<String, ModuleError> {
        let fetch_error = |message: String| ModuleError::Fetch {
            addr: raw.to_string(),
            message,
        };
        let mut url = Url::parse(raw).map_err(|e| fetch_error(e.to_string()))?;
        url.query_pairs_mut().append_pair("terraform-get", "1");
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| fetch_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_error(format!("status {}", response.status())));
        }
        let location = response
            .headers()
            .get("X-Terraform-Get")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ModuleError::UnsupportedSource(raw.to_string()))?;
        url.join(location)
            .map(|u| u.to_string())
            .or_else(|_| Ok(location.to_string()))
    }
}

/// Unpack an archive held in memory into `dest`.
pub fn unpack_archive(bytes: &[u8], kind: ArchiveKind, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;
    match kind {
        ArchiveKind::TarGz => tar::Archive::new(GzDecoder::new(Cursor::new(bytes)))
            .unpack(dest)
            .context("unpacking tar.gz archive"),
        ArchiveKind::Tar => tar::Archive::new(Cursor::new(bytes))
            .unpack(dest)
            .context("unpacking tar archive"),
        ArchiveKind::Zip => zip::ZipArchive::new(Cursor::new(bytes))
            .context("reading zip archive")?
            .extract(dest)
            .context("unpacking zip archive"),
    }
}

/// Shallow clone `url` into `dest`, checking out `reference` when given.
fn clone_repository(url: &str, reference: Option<&str>, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    match reference {
        Some(reference) => {
            let repo = shallow_clone(url, dest, Some(reference)).or_else(|_| {
                let _ = fs::remove_dir_all(dest);
                Repository::clone(url, dest).with_context(|| format!("cloning {url}"))
            })?;
            checkout_ref(&repo, reference)
        }
        None => {
            shallow_clone(url, dest, None).or_else(|_| {
                let _ = fs::remove_dir_all(dest);
                Repository::clone(url, dest).with_context(|| format!("cloning {url}"))
            })?;
            Ok(())
        }
    }
}

fn shallow_clone(url: &str, dest: &Path, branch: Option<&str>) -> Result<Repository> {
    let mut fo = FetchOptions::new();
    fo.depth(1);

    let mut builder = git2::build::RepoBuilder::new();
    if let Some(branch) = branch {
        builder.branch(branch);
    }
    builder.fetch_options(fo);

    builder
        .clone(url, dest)
        .with_context(|| format!("shallow clone of {url} failed"))
}

fn checkout_ref(repo: &Repository, reference: &str) -> Result<()> {
    let object = repo
        .revparse_single(reference)
        .or_else(|_| repo.revparse_single(&format!("origin/{reference}")))
        .with_context(|| format!("resolving ref {reference}"))?;

    repo.checkout_tree(&object, None)
        .with_context(|| format!("checking out {reference}"))?;

    if object.kind() == Some(ObjectType::Commit) {
        repo.set_head_detached(object.id())
            .with_context(|| format!("detaching HEAD at {reference}"))?;
    }
    Ok(())
}

/// Copy a fetched module, skipping dotfiles such as `.git`.
fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
    {
        let entry = entry?;
        let rel = entry.path().strip_prefix(from)?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copying {}", entry.path().display()))?;
        }
    }
    Ok(())
}
