//! Client for the module registry protocol.

use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use super::source::RegistryAddress;
use super::version::latest_matching;
use super::ModuleError;

const MODULE_SERVICE_ID: &str = "modules.v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PUBLIC_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct VersionsResponse {
    #[serde(default)]
    modules: Vec<ModuleVersions>,
}

#[derive(Debug, Deserialize)]
struct ModuleVersions {
    #[serde(default)]
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: String,
}

/// Outcome of looking a module up in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLookup {
    pub address: RegistryAddress,
    /// `{service}/{namespace}/{name}/{target}`
    pub location: Url,
    pub version: String,
}

pub struct RegistryClient {
    client: Client,
    /// Fixed module service URL, bypassing discovery.
    base_url: Option<Url>,
    discovered: HashMap<String, Url>,
}

impl RegistryClient {
    pub fn new() -> Result<Self, ModuleError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ModuleError::Registry {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: None,
            discovered: HashMap::new(),
        })
    }

    /// Use `base` as the module service for every host.
    pub fn with_base_url(mut self, base: &str) -> Result<Self, ModuleError> {
        self.base_url = Some(service_url(base)?);
        Ok(self)
    }

    /// Resolve the module service URL for a host via
    /// `/.well-known/terraform.json`.
    fn service_url(&mut self, host: &str) -> Result<Url, ModuleError> {
        if let Some(base) = &self.base_url {
            return Ok(base.clone());
        }
        if let Some(url) = self.discovered.get(host) {
            return Ok(url.clone());
        }
        let root = service_url(&format!("https://{host}/"))?;
        let well_known = join(&root, ".well-known/terraform.json")?;
        let response = self
            .client
            .get(well_known.clone())
            .send()
            .map_err(|e| registry_error(&well_known, e))?;
        if !response.status().is_success() {
            return Err(ModuleError::Registry {
                url: well_known.to_string(),
                message: format!("discovery returned status {}", response.status()),
            });
        }
        let services: HashMap<String, serde_json::Value> =
            response.json().map_err(|e| registry_error(&well_known, e))?;
        let location = services
            .get(MODULE_SERVICE_ID)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ModuleError::Registry {
                url: well_known.to_string(),
                message: format!("host does not offer {MODULE_SERVICE_ID}"),
            })?;
        let url = service_url(join(&root, location)?.as_str())?;
        log::debug!("discovered module service {url} for {host}");
        self.discovered.insert(host.to_string(), url.clone());
        Ok(url)
    }

    /// Find the newest version of `address` allowed by `constraint`.
    pub fn lookup(
        &mut self,
        address: &RegistryAddress,
        constraint: &str,
    ) -> Result<RegistryLookup, ModuleError> {
        let service = self.service_url(&address.host)?;
        let location = join(&service, &address.path())?;
        let versions = self.versions(&location)?;
        if versions.is_empty() {
            return Err(ModuleError::Registry {
                url: location.to_string(),
                message: "no versions found for registry module".to_string(),
            });
        }
        let version = latest_matching(&versions, constraint)?;
        Ok(RegistryLookup {
            address: address.clone(),
            location,
            version,
        })
    }

    fn versions(&self, location: &Url) -> Result<Vec<String>, ModuleError> {
        let url = Url::parse(&format!("{}/versions", location.as_str().trim_end_matches('/')))
            .map_err(|e| registry_error(location, e))?;
        log::debug!("fetching module versions from {url}");
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| registry_error(&url, e))?;
        if !response.status().is_success() {
            return Err(ModuleError::Registry {
                url: url.to_string(),
                message: format!("versions endpoint returned status {}", response.status()),
            });
        }
        let body: VersionsResponse = response.json().map_err(|e| registry_error(&url, e))?;
        let first = body.modules.into_iter().next().ok_or_else(|| ModuleError::Registry {
            url: url.to_string(),
            message: "versions endpoint returned no modules".to_string(),
        })?;
        Ok(first.versions.into_iter().map(|v| v.version).collect())
    }

    /// The real source of a module version, from the `X-Terraform-Get`
    /// header. Relative locations resolve against the module service URL.
    pub fn download_location(&mut self, lookup: &RegistryLookup) -> Result<String, ModuleError> {
        let service = self.service_url(&lookup.address.host)?;
        let url = Url::parse(&format!(
            "{}/{}/download",
            lookup.location.as_str().trim_end_matches('/'),
            lookup.version
        ))
        .map_err(|e| registry_error(&lookup.location, e))?;
        log::debug!("looking up download location for {}", lookup.address);
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| registry_error(&url, e))?;
        let location = response
            .headers()
            .get("X-Terraform-Get")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ModuleError::MissingDownloadLocation {
                url: url.to_string(),
                status: response.status().as_u16(),
            })?
            .to_string();

        if ["/", "./", "../"].iter().any(|p| location.starts_with(p)) {
            return Ok(join(&service, &location)?.to_string());
        }
        Ok(location)
    }

    /// Whether the module page answers without credentials.
    pub fn is_public(&mut self, address: &RegistryAddress) -> bool {
        let Ok(service) = self.service_url(&address.host) else {
            return false;
        };
        let Ok(url) = join(&service, &address.path()) else {
            return false;
        };
        match self.client.head(url).timeout(PUBLIC_CHECK_TIMEOUT).send() {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                log::debug!("public module check for {address} failed: {err}");
                false
            }
        }
    }
}

/// Parse a service URL, making sure it ends in `/` so relative joins
/// extend it instead of replacing its last segment.
fn service_url(raw: &str) -> Result<Url, ModuleError> {
    let mut url = Url::parse(raw).map_err(|e| ModuleError::Registry {
        url: raw.to_string(),
        message: e.to_string(),
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn join(base: &Url, path: &str) -> Result<Url, ModuleError> {
    base.join(path).map_err(|e| registry_error(base, e))
}

fn registry_error(url: &Url, err: impl std::fmt::Display) -> ModuleError {
    ModuleError::Registry {
        url: url.to_string(),
        message: err.to_string(),
    }
}
