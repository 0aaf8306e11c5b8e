//! Parsing of container image references

use std::fmt;

use crate::error::{Error, Result};

const DOCKER_HUB_REGISTRY: &str = "registry-1.docker.io";
const DOCKER_HUB_ALIASES: [&str; 2] = ["docker.io", "index.docker.io"];

/// A parsed `registry/repository[:tag|@digest]` reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry host (with optional port) used for API calls
    pub registry: String,
    pub repository: String,
    /// Tag or digest; defaults to `latest`
    pub reference: String,
}

impl ImageRef {
    pub fn parse(image: &str) -> Result<Self> {
        if image.is_empty() || image.chars().any(char::is_whitespace) {
            return Err(Error::ConfigError(format!(
                "invalid image reference {image:?}"
            )));
        }

        let (name, reference) = match image.split_once('@') {
            Some((name, digest)) => (name, digest.to_string()),
            None => {
                let last_slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
                match image[last_slash..].rfind(':') {
                    Some(colon) => {
                        let split = last_slash + colon;
                        (&image[..split], image[split + 1..].to_string())
                    }
                    None => (image, "latest".to_string()),
                }
            }
        };

        if reference.is_empty() {
            return Err(Error::ConfigError(format!(
                "image reference {image:?} has an empty tag or digest"
            )));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (DOCKER_HUB_REGISTRY.to_string(), name.to_string()),
        };

        let registry = if DOCKER_HUB_ALIASES.contains(&registry.as_str()) {
            DOCKER_HUB_REGISTRY.to_string()
        } else {
            registry
        };

        let repository = if registry == DOCKER_HUB_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        if repository.is_empty() {
            return Err(Error::ConfigError(format!(
                "image reference {image:?} has no repository"
            )));
        }

        Ok(Self {
            registry,
            repository,
            reference,
        })
    }

    /// Host name used to look up credentials in a docker config
    pub fn auth_host(&self) -> &str {
        if self.registry == DOCKER_HUB_REGISTRY {
            "docker.io"
        } else {
            &self.registry
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.reference.contains(':') { '@' } else { ':' };
        write!(
            f,
            "{}/{}{}{}",
            self.registry, self.repository, sep, self.reference
        )
    }
}
