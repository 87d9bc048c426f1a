use std::fmt;
use std::str::FromStr;

use super::registry::RegistryError;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";
const DOCKER_HUB_ENDPOINT: &str = "registry-1.docker.io";

/// A parsed image reference: `[registry/]repository[:tag|@digest]`.
///
/// References without a registry host go to Docker Hub, and single-component
/// Docker Hub repositories get the `library/` prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    /// A tag, or a digest such as `sha256:...`.
    pub reference: String,
}

impl ImageReference {
    /// Host to talk to for this reference's registry.
    pub fn endpoint(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_HUB_ENDPOINT
        } else {
            &self.registry
        }
    }

    pub fn is_digest(&self) -> bool {
        self.reference.contains(':')
    }

    /// The same repository, pinned to `reference`.
    pub fn with_reference(&self, reference: impl Into<String>) -> Self {
        ImageReference {
            reference: reference.into(),
            ..self.clone()
        }
    }
}

impl FromStr for ImageReference {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RegistryError::InvalidReference(s.to_string());

        let (name, reference) = match s.split_once('@') {
            Some((name, digest)) => (name, digest.to_string()),
            None => match s.rfind(':') {
                Some(idx) if !s[idx + 1..].contains('/') => (&s[..idx], s[idx + 1..].to_string()),
                _ => (s, DEFAULT_TAG.to_string()),
            },
        };

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest))
                if host.contains('.') || host.contains(':') || host == "localhost" =>
            {
                (host.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };
        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        let valid_repository = !repository.is_empty()
            && repository.split('/').all(|part| {
                !part.is_empty()
                    && part
                        .bytes()
                        .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-'))
            });
        if !valid_repository || reference.is_empty() {
            return Err(invalid());
        }

        Ok(ImageReference {
            registry,
            repository,
            reference,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.is_digest() { '@' } else { ':' };
        write!(
            f,
            "{}/{}{}{}",
            self.registry, self.repository, sep, self.reference
        )
    }
}
