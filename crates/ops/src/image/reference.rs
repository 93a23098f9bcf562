//! Docker-style image references: `[registry/]repository[:tag][@digest]`.

use std::fmt;

use super::ImageError;

pub const DOCKER_HUB: &str = "docker.io";
/// Host that actually serves the Docker Hub distribution API.
pub const DOCKER_HUB_API: &str = "registry-1.docker.io";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry host (with optional port), `docker.io` for Docker Hub.
    pub registry: String,
    pub repository: String,
    /// Tag or digest used to address the manifest.
    pub reference: String,
}

impl ImageRef {
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        let invalid = || ImageError::InvalidReference(s.to_string());
        if s.is_empty() || s.chars().any(|c| c.is_whitespace()) {
            return Err(invalid());
        }

        let (name, digest) = match s.split_once('@') {
            Some((n, d)) if d.contains(':') => (n, Some(d)),
            Some(_) => return Err(invalid()),
            None => (s, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a registry port.
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match name[last_slash..].rfind(':') {
            Some(i) => (&name[..last_slash + i], Some(&name[last_slash + i + 1..])),
            None => (name, None),
        };
        if path.is_empty() || tag.is_some_and(str::is_empty) {
            return Err(invalid());
        }

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
                (first.to_string(), rest.to_string())
            }
            Some(_) => (DOCKER_HUB.to_string(), path.to_string()),
            None => (DOCKER_HUB.to_string(), format!("library/{path}")),
        };
        let registry = if registry == "index.docker.io" { DOCKER_HUB.to_string() } else { registry };
        if repository.is_empty() || repository.split('/').any(str::is_empty) || repository != repository.to_ascii_lowercase() {
            return Err(invalid());
        }

        let reference = digest.or(tag).unwrap_or("latest").to_string();
        Ok(Self { registry, repository, reference })
    }

    pub fn is_docker_hub(&self) -> bool {
        self.registry == DOCKER_HUB
    }

    /// Host serving the registry API for this image.
    pub fn api_host(&self) -> &str {
        if self.is_docker_hub() { DOCKER_HUB_API } else { &self.registry }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.reference.contains(':') { '@' } else { ':' };
        write!(f, "{}/{}{}{}", self.registry, self.repository, sep, self.reference)
    }
}
