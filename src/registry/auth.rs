//! Registry credentials sourced from a Module's pull secret

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde::Deserialize;
use tracing::debug;

use crate::crd::Module;
use crate::error::{Error, Result};

const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
const DOCKER_CFG_KEY: &str = ".dockercfg";

/// Basic credentials for one registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

/// Supplies credentials for registry hosts
#[async_trait]
pub trait RegistryAuthGetter: Send + Sync {
    async fn credentials(&self, host: &str) -> Result<Option<RegistryCredentials>>;
}

/// Builds the auth getter for a given Module
pub trait AuthGetterFactory: Send + Sync {
    fn for_module(&self, module: &Module) -> Box<dyn RegistryAuthGetter>;
}

/// Anonymous access
pub struct NoAuth;

#[async_trait]
impl RegistryAuthGetter for NoAuth {
    async fn credentials(&self, _host: &str) -> Result<Option<RegistryCredentials>> {
        Ok(None)
    }
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfigEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, DockerConfigEntry>,
}

/// Parsed `.dockerconfigjson` / `.dockercfg` contents, keyed by normalized host
#[derive(Debug, Default)]
pub struct DockerConfig {
    entries: BTreeMap<String, RegistryCredentials>,
}

impl DockerConfig {
    /// Parse a `.dockerconfigjson` payload (`{"auths": {...}}`).
    pub fn from_config_json(data: &[u8]) -> Result<Self> {
        let file: DockerConfigFile = serde_json::from_slice(data)?;
        Self::from_entries(file.auths)
    }

    /// Parse a legacy `.dockercfg` payload (the `auths` map at top level).
    pub fn from_dockercfg(data: &[u8]) -> Result<Self> {
        let entries: BTreeMap<String, DockerConfigEntry> = serde_json::from_slice(data)?;
        Self::from_entries(entries)
    }

    fn from_entries(raw: BTreeMap<String, DockerConfigEntry>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (key, entry) in raw {
            let creds = match (entry.username, entry.password, entry.auth) {
                (Some(username), Some(password), _) => RegistryCredentials { username, password },
                (_, _, Some(auth)) => decode_auth(&key, &auth)?,
                _ => continue,
            };
            entries.insert(normalize_host(&key), creds);
        }
        Ok(Self { entries })
    }

    pub fn lookup(&self, host: &str) -> Option<&RegistryCredentials> {
        self.entries.get(&normalize_host(host))
    }
}

fn decode_auth(key: &str, auth: &str) -> Result<RegistryCredentials> {
    let decoded = STANDARD
        .decode(auth.trim())
        .map_err(|e| Error::ConfigError(format!("invalid auth for registry {key}: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|e| Error::ConfigError(format!("invalid auth for registry {key}: {e}")))?;
    let (username, password) = decoded.split_once(':').ok_or_else(|| {
        Error::ConfigError(format!(
            "auth for registry {key} is not in user:password form"
        ))
    })?;
    Ok(RegistryCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// `https://index.docker.io/v1/` -> `docker.io`, `quay.io/` -> `quay.io`
fn normalize_host(key: &str) -> String {
    let host = key
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host);
    match host {
        "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
            "docker.io".to_string()
        }
        other => other.to_string(),
    }
}

/// Reads credentials from a pull secret in the Module's namespace.
///
/// The secret is fetched on every call; nothing is cached across reconciles.
pub struct SecretAuthGetter {
    client: Client,
    namespace: String,
    secret_name: String,
}

impl SecretAuthGetter {
    pub fn new(client: Client, namespace: String, secret_name: String) -> Self {
        Self {
            client,
            namespace,
            secret_name,
        }
    }

    async fn docker_config(&self) -> Result<DockerConfig> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let secret = api.get(&self.secret_name).await?;
        let data = secret.data.unwrap_or_default();

        if let Some(bytes) = data.get(DOCKER_CONFIG_JSON_KEY) {
            DockerConfig::from_config_json(&bytes.0)
        } else if let Some(bytes) = data.get(DOCKER_CFG_KEY) {
            DockerConfig::from_dockercfg(&bytes.0)
        } else {
            Err(Error::ConfigError(format!(
                "secret {}/{} has neither {DOCKER_CONFIG_JSON_KEY} nor {DOCKER_CFG_KEY}",
                self.namespace, self.secret_name
            )))
        }
    }
}

#[async_trait]
impl RegistryAuthGetter for SecretAuthGetter {
    async fn credentials(&self, host: &str) -> Result<Option<RegistryCredentials>> {
        let config = self.docker_config().await?;
        let creds = config.lookup(host).cloned();
        debug!(
            "Credentials for {} from secret {}/{}: {}",
            host,
            self.namespace,
            self.secret_name,
            if creds.is_some() { "found" } else { "none" }
        );
        Ok(creds)
    }
}

/// Uses the Module's `imageRepoSecret` when set, anonymous access otherwise
pub struct KubeAuthGetterFactory {
    client: Client,
}

impl KubeAuthGetterFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl AuthGetterFactory for KubeAuthGetterFactory {
    fn for_module(&self, module: &Module) -> Box<dyn RegistryAuthGetter> {
        match &module.spec.image_repo_secret {
            Some(secret) => Box::new(SecretAuthGetter::new(
                self.client.clone(),
                module.namespace_or_default(),
                secret.name.clone(),
            )),
            None => Box::new(NoAuth),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_json_with_auth_field() {
        // "robot:s3cret"
        let json = br#"{"auths":{"quay.io":{"auth":"cm9ib3Q6czNjcmV0"}}}"#;
        let config = DockerConfig::from_config_json(json).unwrap();
        assert_eq!(
            config.lookup("quay.io"),
            Some(&RegistryCredentials {
                username: "robot".into(),
                password: "s3cret".into()
            })
        );
        assert!(config.lookup("ghcr.io").is_none());
    }

    #[test]
    fn test_config_json_docker_hub_key_is_normalized() {
        let json = br#"{"auths":{"https://index.docker.io/v1/":{"username":"u","password":"p"}}}"#;
        let config = DockerConfig::from_config_json(json).unwrap();
        assert_eq!(config.lookup("docker.io").unwrap().username, "u");
        assert_eq!(config.lookup("registry-1.docker.io").unwrap().password, "p");
    }

    #[test]
    fn test_legacy_dockercfg() {
        let json = br#"{"registry.local:5000":{"auth":"YTpi"}}"#;
        let config = DockerConfig::from_dockercfg(json).unwrap();
        assert_eq!(config.lookup("registry.local:5000").unwrap().username, "a");
    }

    #[test]
    fn test_malformed_auth_is_config_error() {
        // "nocolon"
        let json = br#"{"auths":{"quay.io":{"auth":"bm9jb2xvbg=="}}}"#;
        assert!(matches!(
            DockerConfig::from_config_json(json),
            Err(Error::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_no_auth_returns_none() {
        assert_eq!(NoAuth.credentials("quay.io").await.unwrap(), None);
    }
}
