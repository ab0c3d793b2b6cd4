//! In-process registry used by the integration tests
//!
//! `MockRegistry` implements `RegistryTransport`, so a `Registry` built on it
//! runs the real request pipeline against scripted registry behavior:
//! authentication challenges, `Link` pagination, manifest storage and blobs.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use docker_registry_client::config::RegistryConfig;
use docker_registry_client::image::DigestUtils;
use docker_registry_client::registry::{Registry, RegistryTransport, TransportRequest, TransportResponse};
use docker_registry_client::Result;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

pub const BASE_URL: &str = "https://registry.mock";
pub const REALM: &str = "https://auth.mock/token";
pub const TOKEN: &str = "mock-token";

pub const DOCKER_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_V1_SIGNED: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    Anonymous,
    Basic { username: String, password: String },
    Bearer,
    /// Bearer challenge whose tokens are never accepted
    BearerRejecting,
}

#[derive(Debug, Clone)]
struct StoredManifest {
    body: Bytes,
    media_type: String,
    digest: String,
}

struct State {
    auth: AuthMode,
    head_allowed: bool,
    cursor_key: String,
    page_size: usize,
    cursors: HashMap<String, usize>,
    catalog: Vec<String>,
    tags: HashMap<String, Vec<String>>,
    manifests: HashMap<(String, String), StoredManifest>,
    blobs: HashMap<String, Bytes>,
    blob_length_override: Option<&'static str>,
    requests: Vec<TransportRequest>,
}

pub struct MockRegistry {
    state: Mutex<State>,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                auth: AuthMode::Anonymous,
                head_allowed: true,
                cursor_key: "last".to_string(),
                page_size: 100,
                cursors: HashMap::new(),
                catalog: Vec::new(),
                tags: HashMap::new(),
                manifests: HashMap::new(),
                blobs: HashMap::new(),
                blob_length_override: None,
                requests: Vec::new(),
            }),
        })
    }

    pub fn set_auth(&self, auth: AuthMode) {
        self.state.lock().unwrap().auth = auth;
    }

    pub fn reject_head(&self) {
        self.state.lock().unwrap().head_allowed = false;
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.state.lock().unwrap().page_size = page_size;
    }

    pub fn set_cursor_key(&self, key: &str) {
        self.state.lock().unwrap().cursor_key = key.to_string();
    }

    pub fn set_blob_length(&self, value: &'static str) {
        self.state.lock().unwrap().blob_length_override = Some(value);
    }

    pub fn add_repository(&self, repository: &str) {
        self.state.lock().unwrap().catalog.push(repository.to_string());
    }

    /// Append tag names to the listing without storing manifests
    pub fn add_tags(&self, repository: &str, tags: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let list = state.tags.entry(repository.to_string()).or_default();
        list.extend(tags.iter().map(|t| t.to_string()));
    }

    pub fn add_blob(&self, content: &[u8]) -> String {
        let digest = DigestUtils::compute_docker_digest(content);
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(digest.clone(), Bytes::copy_from_slice(content));
        digest
    }

    /// Store a manifest under `reference` and under its digest
    pub fn add_manifest(&self, repository: &str, reference: &str, media_type: &str, body: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let stored = store_manifest(&mut state, repository, reference, media_type, Bytes::from(body.to_string()));
        stored.digest
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    /// Requests whose URL path ends with `suffix`, optionally filtered by method
    pub fn count(&self, method: Option<Method>, path_contains: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| method.as_ref().is_none_or(|m| &r.method == m))
            .filter(|r| r.url.contains(path_contains))
            .count()
    }

    pub fn registry(self: &Arc<Self>) -> Registry {
        self.registry_with(RegistryConfig::new(BASE_URL).unwrap())
    }

    pub fn registry_with(self: &Arc<Self>, config: RegistryConfig) -> Registry {
        Registry::with_transport(config, self.clone()).unwrap()
    }
}

fn store_manifest(
    state: &mut State,
    repository: &str,
    reference: &str,
    media_type: &str,
    body: Bytes,
) -> StoredManifest {
    let stored = StoredManifest {
        digest: DigestUtils::compute_docker_digest(&body),
        media_type: media_type.to_string(),
        body,
    };
    state
        .manifests
        .insert((repository.to_string(), reference.to_string()), stored.clone());
    state
        .manifests
        .insert((repository.to_string(), stored.digest.clone()), stored.clone());
    if !reference.starts_with("sha256:") {
        let tags = state.tags.entry(repository.to_string()).or_default();
        if !tags.iter().any(|t| t == reference) {
            tags.push(reference.to_string());
        }
    }
    stored
}

fn response(status: u16, headers: Vec<(&str, String)>, body: impl Into<Bytes>) -> TransportResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(&value).unwrap(),
        );
    }
    TransportResponse::from_bytes(StatusCode::from_u16(status).unwrap(), map, body)
}

fn challenge(auth: &AuthMode) -> String {
    match auth {
        AuthMode::Basic { .. } => r#"Basic realm="mock registry""#.to_string(),
        _ => format!(
            r#"Bearer realm="{}",service="registry.mock",scope="repository:app:pull""#,
            REALM
        ),
    }
}

fn authorized(auth: &AuthMode, request: &TransportRequest) -> bool {
    let header = request.header("authorization");
    match auth {
        AuthMode::Anonymous => true,
        AuthMode::Basic { username, password } => {
            header == Some(format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password))).as_str())
        }
        AuthMode::Bearer => header == Some(format!("Bearer {}", TOKEN).as_str()),
        AuthMode::BearerRejecting => false,
    }
}

/// Slice `items` into a page and the `Link` header pointing at the next one
fn paginate(state: &mut State, path: &str, url: &Url, items: &[String]) -> (Vec<String>, Option<String>) {
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let page_size = query
        .get("n")
        .and_then(|n| n.parse().ok())
        .unwrap_or(state.page_size);
    let start = query
        .get(&state.cursor_key)
        .or_else(|| query.get("last"))
        .and_then(|cursor| state.cursors.get(cursor).copied())
        .unwrap_or(0);

    let end = (start + page_size).min(items.len());
    let page = items[start.min(items.len())..end].to_vec();
    let link = if end < items.len() {
        let cursor = items[end - 1].clone();
        state.cursors.insert(cursor.clone(), end);
        Some(format!(
            r#"<{}?n={}&{}={}>; rel="next""#,
            path, page_size, state.cursor_key, cursor
        ))
    } else {
        None
    };
    (page, link)
}

#[async_trait]
impl RegistryTransport for MockRegistry {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        if request.url.starts_with(REALM) {
            let body = if state.auth == AuthMode::BearerRejecting {
                r#"{"access_token": "useless"}"#.to_string()
            } else {
                format!(r#"{{"token": "{}", "expires_in": 300}}"#, TOKEN)
            };
            return Ok(response(200, vec![], body));
        }

        if !authorized(&state.auth, &request) {
            let header = challenge(&state.auth);
            return Ok(response(401, vec![("www-authenticate", header)], "{}"));
        }

        let url = Url::parse(&request.url).unwrap();
        let path = url.path().to_string();

        if path == "/v2/" {
            return Ok(response(200, vec![], "{}"));
        }

        if path == "/v2/_catalog" {
            let catalog = state.catalog.clone();
            let (page, link) = paginate(&mut state, &path, &url, &catalog);
            let body = serde_json::json!({ "repositories": page }).to_string();
            let headers = link.map(|l| vec![("link", l)]).unwrap_or_default();
            return Ok(response(200, headers, body));
        }

        let rest = path.trim_start_matches("/v2/");

        if let Some(repository) = rest.strip_suffix("/tags/list") {
            let Some(tags) = state.tags.get(repository).cloned() else {
                return Ok(response(404, vec![], r#"{"errors":[{"code":"NAME_UNKNOWN"}]}"#));
            };
            let (page, link) = paginate(&mut state, &path, &url, &tags);
            let body = serde_json::json!({ "name": repository, "tags": page }).to_string();
            let headers = link.map(|l| vec![("link", l)]).unwrap_or_default();
            return Ok(response(200, headers, body));
        }

        if let Some((repository, reference)) = rest.split_once("/manifests/") {
            let key = (repository.to_string(), reference.to_string());
            return Ok(match request.method {
                Method::HEAD if !state.head_allowed => response(405, vec![], ""),
                Method::HEAD | Method::GET => match state.manifests.get(&key) {
                    Some(stored) => {
                        let headers = vec![
                            ("content-type", stored.media_type.clone()),
                            ("docker-content-digest", stored.digest.clone()),
                            ("content-length", stored.body.len().to_string()),
                        ];
                        let body = if request.method == Method::GET {
                            stored.body.clone()
                        } else {
                            Bytes::new()
                        };
                        response(200, headers, body)
                    }
                    None => response(404, vec![], r#"{"errors":[{"code":"MANIFEST_UNKNOWN"}]}"#),
                },
                Method::PUT => {
                    let media_type = request.header("content-type").unwrap_or_default().to_string();
                    let body = request.body.clone().unwrap_or_default();
                    let stored = store_manifest(&mut state, repository, reference, &media_type, body);
                    response(201, vec![("docker-content-digest", stored.digest)], "")
                }
                Method::DELETE if !reference.starts_with("sha256:") => {
                    response(400, vec![], r#"{"errors":[{"code":"UNSUPPORTED"}]}"#)
                }
                Method::DELETE => {
                    let before = state.manifests.len();
                    state
                        .manifests
                        .retain(|(repo, _), stored| !(repo == repository && stored.digest == reference));
                    if state.manifests.len() == before {
                        response(404, vec![], r#"{"errors":[{"code":"MANIFEST_UNKNOWN"}]}"#)
                    } else {
                        response(202, vec![], "")
                    }
                }
                _ => response(405, vec![], ""),
            });
        }

        if let Some((_, digest)) = rest.split_once("/blobs/") {
            return Ok(match state.blobs.get(digest) {
                Some(blob) => {
                    let length = state
                        .blob_length_override
                        .map(str::to_string)
                        .unwrap_or_else(|| blob.len().to_string());
                    let body = if request.method == Method::GET {
                        blob.clone()
                    } else {
                        Bytes::new()
                    };
                    response(200, vec![("content-length", length)], body)
                }
                None => response(404, vec![], r#"{"errors":[{"code":"BLOB_UNKNOWN"}]}"#),
            });
        }

        Ok(response(404, vec![], "{}"))
    }
}

/// Schema 2 image manifest referencing `layers`
pub fn image_manifest(registry: &MockRegistry, layers: &[&[u8]]) -> String {
    let config = registry.add_blob(b"{\"architecture\":\"amd64\"}");
    let layers: Vec<serde_json::Value> = layers
        .iter()
        .map(|content| {
            let digest = registry.add_blob(content);
            serde_json::json!({
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": content.len(),
                "digest": digest,
            })
        })
        .collect();

    // Pretty-printed, so any re-serialization would change the bytes
    serde_json::to_string_pretty(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": DOCKER_V2,
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 24,
            "digest": config,
        },
        "layers": layers,
    }))
    .unwrap()
}

/// Schema 1 manifest referencing `layers`
pub fn v1_manifest(registry: &MockRegistry, layers: &[&[u8]]) -> String {
    let fs_layers: Vec<serde_json::Value> = layers
        .iter()
        .map(|content| serde_json::json!({ "blobSum": registry.add_blob(content) }))
        .collect();
    serde_json::json!({
        "schemaVersion": 1,
        "name": "legacy",
        "tag": "old",
        "architecture": "amd64",
        "fsLayers": fs_layers,
        "history": [],
    })
    .to_string()
}

/// Manifest list over `(digest, architecture, os, variant)` entries
pub fn manifest_list(entries: &[(&str, &str, &str, Option<&str>)]) -> String {
    let manifests: Vec<serde_json::Value> = entries
        .iter()
        .map(|(digest, architecture, os, variant)| {
            let mut platform = serde_json::json!({ "architecture": architecture, "os": os });
            if let Some(variant) = variant {
                platform["variant"] = serde_json::json!(variant);
            }
            serde_json::json!({
                "mediaType": DOCKER_V2,
                "size": 528,
                "digest": digest,
                "platform": platform,
            })
        })
        .collect();
    serde_json::json!({
        "schemaVersion": 2,
        "mediaType": DOCKER_LIST,
        "manifests": manifests,
    })
    .to_string()
}
