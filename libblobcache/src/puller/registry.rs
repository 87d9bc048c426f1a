//! Puller backed by an OCI distribution (v2) registry over HTTP.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use oci_spec::image::{ImageIndex, ImageManifest};
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::io::StreamReader;

use super::reference::ImageReference;
use super::{BlobStream, Manifest, Puller};
use crate::digest::Digest;
use crate::error::BoxError;

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
    application/vnd.oci.image.manifest.v1+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.docker.distribution.manifest.v2+json";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("registry denied access to {0}")]
    Unauthorized(String),

    #[error("token endpoint returned no token")]
    MissingToken,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

/// Parses a bearer challenge such as
/// `Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/busybox:pull"`.
pub fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let header = header.trim();
    let (scheme, mut rest) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut params = HashMap::new();
    rest = rest.trim();
    while !rest.is_empty() {
        let (key, after) = rest.split_once('=')?;
        let after = after.trim_start();
        let (value, remainder) = match after.strip_prefix('"') {
            Some(quoted) => {
                let end = quoted.find('"')?;
                (&quoted[..end], &quoted[end + 1..])
            }
            None => match after.find(',') {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            },
        };
        params.insert(key.trim().to_ascii_lowercase(), value.to_string());
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }

    Some(BearerChallenge {
        realm: params.remove("realm")?,
        service: params.remove("service"),
        scope: params.remove("scope"),
    })
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct ManifestProbe {
    manifests: Option<serde_json::Value>,
}

/// Pulls from registries speaking the OCI distribution API.
///
/// Anonymous bearer tokens are obtained on the first `401` and cached per
/// repository for the lifetime of the puller.
pub struct RegistryPuller {
    client: Client,
    insecure: bool,
    tokens: RwLock<HashMap<String, String>>,
}

impl RegistryPuller {
    /// `insecure` selects plain HTTP instead of HTTPS.
    pub fn new(insecure: bool, timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .user_agent(concat!("libblobcache/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .build()?;
        Ok(RegistryPuller {
            client,
            insecure,
            tokens: RwLock::new(HashMap::new()),
        })
    }

    fn repository_url(&self, reference: &ImageReference) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        format!(
            "{scheme}://{}/v2/{}",
            reference.endpoint(),
            reference.repository
        )
    }

    async fn send(
        &self,
        url: &str,
        accept: Option<&str>,
        token: Option<&str>,
    ) -> reqwest::Result<Response> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await
    }

    /// GETs `url`, answering a bearer challenge once if the registry asks.
    async fn get(
        &self,
        reference: &ImageReference,
        url: &str,
        accept: Option<&str>,
    ) -> Result<Response, RegistryError> {
        let token_key = format!("{}/{}", reference.registry, reference.repository);
        let token = self.tokens.read().await.get(&token_key).cloned();
        let response = self.send(url, accept, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response, url);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_challenge)
            .ok_or_else(|| RegistryError::Unauthorized(url.to_string()))?;
        let token = self.fetch_token(&challenge, reference).await?;
        self.tokens.write().await.insert(token_key, token.clone());

        let response = self.send(url, accept, Some(&token)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(RegistryError::Unauthorized(url.to_string()));
        }
        check_status(response, url)
    }

    async fn fetch_token(
        &self,
        challenge: &BearerChallenge,
        reference: &ImageReference,
    ) -> Result<String, RegistryError> {
        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", reference.repository));
        let mut query = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service.clone()));
        }
        tracing::debug!("Requesting anonymous token from {}", challenge.realm);
        let response: TokenResponse = self
            .client
            .get(&challenge.realm)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response
            .token
            .or(response.access_token)
            .ok_or(RegistryError::MissingToken)
    }

    pub async fn fetch_blob(
        &self,
        reference: &ImageReference,
        digest: &Digest,
    ) -> Result<BlobStream, RegistryError> {
        let url = format!("{}/blobs/{}", self.repository_url(reference), digest);
        let response = self.get(reference, &url, None).await?;
        let body = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }

    pub async fn fetch_manifest(
        &self,
        reference: &ImageReference,
    ) -> Result<Manifest, RegistryError> {
        let url = format!(
            "{}/manifests/{}",
            self.repository_url(reference),
            reference.reference
        );
        let body = self
            .get(reference, &url, Some(MANIFEST_ACCEPT))
            .await?
            .bytes()
            .await?;
        parse_manifest(&body)
    }
}

fn check_status(response: Response, url: &str) -> Result<Response, RegistryError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Err(RegistryError::NotFound(url.to_string()));
    }
    Ok(response.error_for_status()?)
}

/// Decodes either an image index (has `manifests`) or an image manifest.
pub fn parse_manifest(body: &[u8]) -> Result<Manifest, RegistryError> {
    let probe: ManifestProbe = serde_json::from_slice(body)?;
    if probe.manifests.is_some() {
        Ok(Manifest::Index(serde_json::from_slice::<ImageIndex>(body)?))
    } else {
        Ok(Manifest::Image(serde_json::from_slice::<ImageManifest>(body)?))
    }
}

#[async_trait]
impl Puller for RegistryPuller {
    async fn pull_blob(&self, image: &str, digest: &Digest) -> Result<BlobStream, BoxError> {
        let reference: ImageReference = image.parse()?;
        Ok(self.fetch_blob(&reference, digest).await?)
    }

    async fn pull_manifest(&self, image: &str) -> Result<Manifest, BoxError> {
        let reference: ImageReference = image.parse()?;
        Ok(self.fetch_manifest(&reference).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_docker_hub_challenge() {
        let challenge = parse_bearer_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/busybox:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:library/busybox:pull")
        );
    }

    #[test]
    fn test_parse_challenge_with_comma_in_scope() {
        let challenge = parse_bearer_challenge(
            r#"bearer realm="https://ghcr.io/token", scope="repository:org/app:pull,push""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://ghcr.io/token");
        assert_eq!(challenge.service, None);
        assert_eq!(challenge.scope.as_deref(), Some("repository:org/app:pull,push"));
    }

    #[test]
    fn test_parse_challenge_rejects_other_schemes() {
        assert!(parse_bearer_challenge(r#"Basic realm="registry""#).is_none());
        assert!(parse_bearer_challenge(r#"Bearer service="no-realm""#).is_none());
    }

    #[test]
    fn test_parse_manifest_kinds() {
        let index = br#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.index.v1+json",
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
                "size": 7143,
                "platform": { "architecture": "amd64", "os": "linux" }
            }]
        }"#;
        assert!(matches!(parse_manifest(index).unwrap(), Manifest::Index(_)));

        let image = br#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
                "size": 7023
            },
            "layers": [{
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": "sha256:486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c62260e9bcb4b",
                "size": 32654
            }]
        }"#;
        match parse_manifest(image).unwrap() {
            Manifest::Image(manifest) => assert_eq!(manifest.layers().len(), 1),
            Manifest::Index(_) => panic!("expected an image manifest"),
        }

        assert!(parse_manifest(b"not json").is_err());
    }
}
