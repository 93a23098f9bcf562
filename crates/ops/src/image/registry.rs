//! Minimal OCI distribution client: manifest → (platform manifest) → config blob.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use super::credentials::{resolve_auth, BasicAuth, SecretSource};
use super::{ImageError, ImageRef};
use crate::{Creds, ImageConfig, ImageConfigGetter};

const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

const DEFAULT_OS: &str = "linux";
const DEFAULT_ARCH: &str = "amd64";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    #[serde(default)]
    media_type: Option<String>,
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    manifests: Option<Vec<Descriptor>>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigBlob {
    #[serde(default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    exposed_ports: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

impl ContainerConfig {
    fn into_image_config(self) -> ImageConfig {
        let mut exposed_ports: Vec<i32> = self
            .exposed_ports
            .unwrap_or_default()
            .keys()
            .map(String::as_str)
            .filter_map(parse_port)
            .collect();
        exposed_ports.sort_unstable();
        ImageConfig {
            labels: self.labels.unwrap_or_default(),
            exposed_ports,
            user: self.user.unwrap_or_default(),
        }
    }
}

/// `8080/tcp` or `8080` → 8080; non-tcp ports are not routable and are dropped.
fn parse_port(key: &str) -> Option<i32> {
    let (port, proto) = key.split_once('/').unwrap_or((key, "tcp"));
    if !proto.eq_ignore_ascii_case("tcp") {
        return None;
    }
    port.parse::<i32>().ok().filter(|p| (1..=65535).contains(p))
}

/// Parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Challenge {
    Basic,
    Bearer { realm: String, service: Option<String>, scope: Option<String> },
}

fn parse_challenge(value: &str) -> Option<Challenge> {
    let (scheme, rest) = value.trim().split_once(' ').unwrap_or((value.trim(), ""));
    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let mut params: HashMap<String, String> = HashMap::new();
    // key="value" pairs; values may contain commas (scopes), so split on `",`
    for part in rest.split("\",") {
        if let Some((k, v)) = part.split_once('=') {
            params.insert(k.trim().to_ascii_lowercase(), v.trim().trim_matches('"').to_string());
        }
    }
    Some(Challenge::Bearer {
        realm: params.remove("realm")?,
        service: params.remove("service"),
        scope: params.remove("scope"),
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Clone)]
enum Auth {
    Anonymous,
    Basic(BasicAuth),
    Bearer(String),
}

impl Auth {
    fn apply(&self, rb: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::Anonymous => rb,
            Auth::Basic(b) => rb.basic_auth(&b.username, Some(&b.password)),
            Auth::Bearer(t) => rb.bearer_auth(t),
        }
    }
}

/// Reads image configs straight from the registry using pull-secret credentials.
pub struct RegistryConfigGetter<S> {
    http: reqwest::Client,
    secrets: S,
    insecure_registries: Vec<String>,
}

impl<S: SecretSource> RegistryConfigGetter<S> {
    pub fn new(secrets: S, timeout: Duration, insecure_registries: Vec<String>) -> Result<Self, ImageError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stratus/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, secrets, insecure_registries })
    }

    fn base_url(&self, image: &ImageRef) -> String {
        let host = image.api_host();
        let scheme = if self.insecure_registries.iter().any(|r| r == host) { "http" } else { "https" };
        format!("{scheme}://{host}/v2/{}", image.repository)
    }

    async fn send(&self, method: Method, url: &str, accept: &str, auth: &Auth) -> Result<Response, ImageError> {
        let rb = self.http.request(method, url).header(header::ACCEPT, accept);
        Ok(auth.apply(rb).send().await?)
    }

    /// Turn a 401 challenge into credentials for the retry.
    async fn answer_challenge(&self, resp: &Response, basic: Option<&BasicAuth>, image: &ImageRef) -> Result<Auth, ImageError> {
        let challenge = resp
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge)
            .ok_or_else(|| ImageError::Unauthorized(image.to_string()))?;
        match challenge {
            Challenge::Basic => basic.cloned().map(Auth::Basic).ok_or_else(|| ImageError::Unauthorized(image.to_string())),
            Challenge::Bearer { realm, service, scope } => {
                let scope = scope.unwrap_or_else(|| format!("repository:{}:pull", image.repository));
                let mut query: Vec<(&str, &str)> = vec![("scope", scope.as_str())];
                if let Some(s) = service.as_deref() {
                    query.push(("service", s));
                }
                let mut rb = self.http.get(&realm).query(&query);
                if let Some(b) = basic {
                    rb = rb.basic_auth(&b.username, Some(&b.password));
                }
                let resp = rb.send().await?;
                if !resp.status().is_success() {
                    return Err(ImageError::Unauthorized(image.to_string()));
                }
                let body = resp.bytes().await?;
                let tr: TokenResponse = serde_json::from_slice(&body).map_err(|source| ImageError::Decode { what: "token response", source })?;
                tr.token
                    .or(tr.access_token)
                    .map(Auth::Bearer)
                    .ok_or_else(|| ImageError::Unauthorized(image.to_string()))
            }
        }
    }

    /// GET with a single challenge/response round; `auth` is upgraded in place for later calls.
    async fn get(&self, url: &str, accept: &str, auth: &mut Auth, basic: Option<&BasicAuth>, image: &ImageRef) -> Result<Response, ImageError> {
        let mut resp = self.send(Method::GET, url, accept, auth).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            *auth = self.answer_challenge(&resp, basic, image).await?;
            resp = self.send(Method::GET, url, accept, auth).await?;
        }
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ImageError::Unauthorized(image.to_string())),
            StatusCode::NOT_FOUND => Err(ImageError::NotFound(image.to_string())),
            s => Err(ImageError::Registry { status: s.as_u16(), url: url.to_string() }),
        }
    }

    async fn get_manifest(&self, base: &str, reference: &str, auth: &mut Auth, basic: Option<&BasicAuth>, image: &ImageRef) -> Result<Manifest, ImageError> {
        let accept = [OCI_MANIFEST, DOCKER_MANIFEST, OCI_INDEX, DOCKER_MANIFEST_LIST].join(", ");
        let url = format!("{base}/manifests/{reference}");
        let resp = self.get(&url, &accept, auth, basic, image).await?;
        let header_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string());
        let body = resp.bytes().await?;
        let mut m: Manifest = serde_json::from_slice(&body).map_err(|source| ImageError::Decode { what: "manifest", source })?;
        if m.media_type.is_none() {
            m.media_type = header_type;
        }
        Ok(m)
    }
}

/// Pick the default platform's entry from an index (falls back to the only entry).
fn select_platform(entries: &[Descriptor]) -> Option<&Descriptor> {
    entries
        .iter()
        .find(|d| d.platform.as_ref().is_some_and(|p| p.os == DEFAULT_OS && p.architecture == DEFAULT_ARCH))
        .or_else(|| if entries.len() == 1 { entries.first() } else { None })
}

#[async_trait::async_trait]
impl<S: SecretSource> ImageConfigGetter for RegistryConfigGetter<S> {
    async fn config(&self, creds: &Creds, image_ref: &str) -> Result<ImageConfig, ImageError> {
        let t0 = Instant::now();
        let image = ImageRef::parse(image_ref)?;
        let basic = resolve_auth(&self.secrets, creds, &image.registry)
            .await
            .map_err(ImageError::Credentials)?;
        let mut auth = basic.clone().map(Auth::Basic).unwrap_or(Auth::Anonymous);
        let base = self.base_url(&image);

        let mut manifest = self.get_manifest(&base, &image.reference, &mut auth, basic.as_ref(), &image).await?;
        let platform_digest = match manifest.manifests.as_deref() {
            Some(entries) => {
                let chosen = select_platform(entries).ok_or_else(|| ImageError::NoMatchingPlatform {
                    image: image.to_string(),
                    platform: format!("{DEFAULT_OS}/{DEFAULT_ARCH}"),
                })?;
                debug!(image = %image, digest = %chosen.digest, media_type = ?chosen.media_type, "resolved platform manifest");
                Some(chosen.digest.clone())
            }
            None => None,
        };
        if let Some(digest) = platform_digest {
            manifest = self.get_manifest(&base, &digest, &mut auth, basic.as_ref(), &image).await?;
        }

        let config = manifest
            .config
            .ok_or_else(|| ImageError::UnsupportedManifest(manifest.media_type.unwrap_or_default()))?;
        let url = format!("{base}/blobs/{}", config.digest);
        let resp = self.get(&url, "*/*", &mut auth, basic.as_ref(), &image).await?;
        let body = resp.bytes().await?;
        let blob: ConfigBlob = serde_json::from_slice(&body).map_err(|source| ImageError::Decode { what: "image config", source })?;
        let out = blob.config.unwrap_or_default().into_image_config();

        counter!("registry_fetch_total", 1u64);
        histogram!("registry_fetch_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(image = %image, user = %out.user, ports = ?out.exposed_ports, took_ms = %t0.elapsed().as_millis(), "fetched image config");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_challenge_with_comma_in_scope() {
        let c = parse_challenge(r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:a/b:pull,push""#);
        assert_eq!(
            c,
            Some(Challenge::Bearer {
                realm: "https://auth.example.com/token".into(),
                service: Some("registry.example.com".into()),
                scope: Some("repository:a/b:pull,push".into()),
            })
        );
        assert_eq!(parse_challenge(r#"Basic realm="x""#), Some(Challenge::Basic));
        assert_eq!(parse_challenge("Negotiate"), None);
    }

    #[test]
    fn ports_keep_tcp_only() {
        assert_eq!(parse_port("8080/tcp"), Some(8080));
        assert_eq!(parse_port("9000"), Some(9000));
        assert_eq!(parse_port("53/udp"), None);
        assert_eq!(parse_port("0/tcp"), None);
        assert_eq!(parse_port("x/tcp"), None);
    }

    #[test]
    fn container_config_maps_to_image_config() {
        let blob: ConfigBlob = serde_json::from_str(
            r#"{"config":{"User":"1000","ExposedPorts":{"9090/tcp":{},"8080/tcp":{}},"Labels":{"a":"b"}}}"#,
        )
        .unwrap();
        let cfg = blob.config.unwrap().into_image_config();
        assert_eq!(cfg.user, "1000");
        assert_eq!(cfg.exposed_ports, vec![8080, 9090]);
        assert_eq!(cfg.labels.get("a").map(String::as_str), Some("b"));
    }

    #[test]
    fn platform_selection_prefers_linux_amd64() {
        let entries: Vec<Descriptor> = serde_json::from_str(
            r#"[{"digest":"sha256:arm","platform":{"architecture":"arm64","os":"linux"}},
                {"digest":"sha256:amd","platform":{"architecture":"amd64","os":"linux"}}]"#,
        )
        .unwrap();
        assert_eq!(select_platform(&entries).map(|d| d.digest.as_str()), Some("sha256:amd"));
        assert!(select_platform(&entries[..1]).is_some());
        assert!(select_platform(&[]).is_none());
    }
}
