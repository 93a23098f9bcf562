//! Image inspection: reference parsing, pull-secret credentials and the registry client.

pub mod credentials;
pub mod reference;
pub mod registry;

pub use reference::ImageRef;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("invalid image reference {0:?}")]
    InvalidReference(String),
    #[error("resolving registry credentials: {0:#}")]
    Credentials(anyhow::Error),
    #[error("unauthorized to pull {0}")]
    Unauthorized(String),
    #[error("image {0} not found")]
    NotFound(String),
    #[error("registry returned {status} for {url}")]
    Registry { status: u16, url: String },
    #[error("unsupported manifest media type {0:?}")]
    UnsupportedManifest(String),
    #[error("no manifest for platform {platform} in {image}")]
    NoMatchingPlatform { image: String, platform: String },
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decoding {what}: {source}")]
    Decode { what: &'static str, source: serde_json::Error },
}
