//! Image-existence checks against OCI distribution registries

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::auth::{RegistryAuthGetter, RegistryCredentials};
use super::image_ref::ImageRef;
use crate::crd::RegistryTlsOptions;
use crate::error::{Error, Result};

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// Answers whether an image is already present in its registry
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn image_exists(
        &self,
        image: &str,
        tls: &RegistryTlsOptions,
        auth: &dyn RegistryAuthGetter,
    ) -> Result<bool>;
}

/// `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub params: BTreeMap<String, String>,
}

/// Parse `Bearer realm="...",service="...",scope="..."`.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(' ') {
        Some((scheme, rest)) => (scheme, rest),
        None => (header, ""),
    };
    if scheme.is_empty() {
        return None;
    }

    let mut params = BTreeMap::new();
    let mut chars = rest.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }
        let value: String = if chars.peek() == Some(&'"') {
            chars.next();
            let mut value = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    c => value.push(c),
                }
            }
            value
        } else {
            chars.by_ref().take_while(|c| *c != ',').collect()
        };
        params.insert(key.trim().to_ascii_lowercase(), value);
    }

    Some(Challenge {
        scheme: scheme.to_string(),
        params,
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Registry client speaking the OCI distribution API over `reqwest`
#[derive(Clone)]
pub struct OciRegistry {
    http: reqwest::Client,
    http_skip_verify: reqwest::Client,
}

impl OciRegistry {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let http_skip_verify = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            http,
            http_skip_verify,
        })
    }

    fn client(&self, tls: &RegistryTlsOptions) -> &reqwest::Client {
        if tls.insecure_skip_tls_verify {
            &self.http_skip_verify
        } else {
            &self.http
        }
    }

    async fn fetch_token(
        &self,
        client: &reqwest::Client,
        challenge: &Challenge,
        image: &ImageRef,
        creds: Option<&RegistryCredentials>,
    ) -> Result<String> {
        let realm = challenge.params.get("realm").ok_or_else(|| {
            Error::RegistryError(format!(
                "bearer challenge from {} has no realm",
                image.registry
            ))
        })?;
        let scope = challenge
            .params
            .get("scope")
            .cloned()
            .unwrap_or_else(|| format!("repository:{}:pull", image.repository));

        let mut query = vec![("scope", scope)];
        if let Some(service) = challenge.params.get("service") {
            query.push(("service", service.clone()));
        }

        let mut request = client.get(realm).query(&query);
        if let Some(creds) = creds {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::RegistryError(format!(
                "token request to {realm} failed with {}",
                response.status()
            )));
        }

        let body: TokenResponse = response.json().await?;
        body.token.or(body.access_token).ok_or_else(|| {
            Error::RegistryError(format!("token response from {realm} carried no token"))
        })
    }
}

fn manifest_head(client: &reqwest::Client, url: &str) -> RequestBuilder {
    client.head(url).header(ACCEPT, MANIFEST_ACCEPT)
}

fn interpret(image: &ImageRef, status: StatusCode) -> Result<bool> {
    match status {
        StatusCode::OK => Ok(true),
        StatusCode::NOT_FOUND => Ok(false),
        other => Err(Error::RegistryError(format!(
            "unexpected status {other} checking {image}"
        ))),
    }
}

#[async_trait]
impl ImageRegistry for OciRegistry {
    #[instrument(skip(self, tls, auth))]
    async fn image_exists(
        &self,
        image: &str,
        tls: &RegistryTlsOptions,
        auth: &dyn RegistryAuthGetter,
    ) -> Result<bool> {
        let image_ref = ImageRef::parse(image)?;
        let scheme = if tls.insecure { "http" } else { "https" };
        let url = format!(
            "{scheme}://{}/v2/{}/manifests/{}",
            image_ref.registry, image_ref.repository, image_ref.reference
        );
        let client = self.client(tls);

        let response = manifest_head(client, &url).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return interpret(&image_ref, response.status());
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge)
            .ok_or_else(|| {
                Error::RegistryError(format!(
                    "{} answered 401 without an authentication challenge",
                    image_ref.registry
                ))
            })?;

        let creds = auth.credentials(image_ref.auth_host()).await?;
        debug!(
            "Registry {} requested {} auth",
            image_ref.registry, challenge.scheme
        );

        let request = if challenge.scheme.eq_ignore_ascii_case("bearer") {
            let token = self
                .fetch_token(client, &challenge, &image_ref, creds.as_ref())
                .await?;
            manifest_head(client, &url).header(AUTHORIZATION, format!("Bearer {token}"))
        } else if challenge.scheme.eq_ignore_ascii_case("basic") {
            let creds = creds.ok_or_else(|| {
                Error::RegistryError(format!(
                    "{} requires credentials but none are configured",
                    image_ref.registry
                ))
            })?;
            manifest_head(client, &url).basic_auth(creds.username, Some(creds.password))
        } else {
            return Err(Error::RegistryError(format!(
                "unsupported auth scheme {} from {}",
                challenge.scheme, image_ref.registry
            )));
        };

        let response = request.send().await?;
        interpret(&image_ref, response.status())
    }
}
