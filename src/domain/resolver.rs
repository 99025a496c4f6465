//! Path resolution: turns a slash-separated resource path into a live graph
//! node, fetching whatever the collective has not delivered yet.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FetchError, ResolveError};

use super::cache::ResourceCache;
use super::derive::Derivation;
use super::graph::ResourceGraph;
use super::ids;
use super::payload::InitPayload;
use super::resource::ResourceHandle;
use super::types::{ResourceKey, ResourceType};

/// One request against the collective REST API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchRequest {
    Collection(ResourceType),
    Resource { kind: ResourceType, id: String },
    Application(String),
    StandaloneServer,
}

impl FetchRequest {
    /// Path relative to the collective API prefix, ids percent-encoded.
    pub fn relative_path(&self) -> String {
        match self {
            Self::Collection(kind) => kind.as_str().to_string(),
            Self::Resource { kind, id } => {
                let collection = match kind {
                    ResourceType::Host => "hosts",
                    ResourceType::Cluster => "clusters",
                    _ => "servers",
                };
                format!("{}/{}", collection, urlencoding::encode(id))
            }
            Self::Application(id) => format!("applications/{}", urlencoding::encode(id)),
            Self::StandaloneServer => "standaloneServer".to_string(),
        }
    }
}

impl FromStr for FetchRequest {
    type Err = String;

    /// Parse a decoded relative path such as `hosts/localhost`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_matches('/');
        if s == "standaloneServer" {
            return Ok(Self::StandaloneServer);
        }
        let Some((collection, id)) = s.split_once('/') else {
            let kind: ResourceType = s.parse()?;
            if !kind.is_top_level_collection() {
                return Err(format!("'{}' is not a fetchable collection", s));
            }
            return Ok(Self::Collection(kind));
        };
        let id = decode(id);
        let kind = match collection {
            "hosts" => ResourceType::Host,
            "servers" => ResourceType::Server,
            "clusters" => ResourceType::Cluster,
            "applications" => return Ok(Self::Application(id)),
            other => return Err(format!("'{}' resources are not fetched by id", other)),
        };
        Ok(Self::Resource { kind, id })
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_path())
    }
}

/// Source of initialization payloads. `Ok(None)` means the collective does
/// not know the resource.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Option<Value>, FetchError>;
}

/// Serves payloads from memory. Used to replay captured collective state.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    payloads: HashMap<FetchRequest, Value>,
    fetches: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request: FetchRequest, payload: Value) {
        self.payloads.insert(request, payload);
    }

    /// Build from a JSON object keyed by relative path.
    pub fn from_json(value: &Value) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "expected a JSON object keyed by resource path".to_string())?;
        let mut fetcher = Self::new();
        for (path, payload) in object {
            fetcher.insert(path.parse()?, payload.clone());
        }
        Ok(fetcher)
    }

    /// Fetches served so far, including misses.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Option<Value>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.payloads.get(request).cloned())
    }
}

/// What a path names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Collection(ResourceType),
    StandaloneServer,
    Host(String),
    Server(String),
    Cluster(String),
    /// `scope,appName`; whether it lives on a server or a cluster is only
    /// known once the collective answers.
    Application(String),
    Derived(Derivation),
}

fn decode(segment: &str) -> String {
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    }
}

/// Split a path into decoded segments.
///
/// A `runtimes` segment swallows the remainder of the path, since runtime
/// install directories contain slashes.
pub fn tokenize(path: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut segments = path.trim_start_matches('/').split('/');
    while let Some(segment) = segments.next() {
        if segment.is_empty() {
            continue;
        }
        let token = decode(segment);
        let swallow = token == "runtimes";
        tokens.push(token);
        if swallow {
            let rest: Vec<&str> = segments.by_ref().collect();
            let rest = rest.join("/");
            if !rest.trim_end_matches('/').is_empty() {
                tokens.push(decode(rest.trim_end_matches('/')));
            }
        }
    }
    tokens
}

/// Map tokens onto a target. Anything unrecognized yields `None`.
pub fn classify<S: AsRef<str>>(tokens: &[S]) -> Option<Target> {
    let tokens: Vec<&str> = tokens.iter().map(AsRef::as_ref).collect();
    let target = match tokens.as_slice() {
        ["standaloneServer"] => Target::StandaloneServer,
        [collection] => {
            let kind: ResourceType = collection.parse().ok()?;
            if !kind.is_top_level_collection() {
                return None;
            }
            Target::Collection(kind)
        }
        ["hosts", host] => Target::Host(host.to_string()),
        ["hosts", host, "servers"] => Target::Derived(Derivation::ServersOnHost { host: host.to_string() }),
        ["hosts", host, "runtimes"] => Target::Derived(Derivation::RuntimesOnHost { host: host.to_string() }),
        ["hosts", host, "runtimes", path] => Target::Derived(Derivation::Runtime {
            host: host.to_string(),
            path: path.to_string(),
        }),
        ["runtimes", id] => {
            let (host, path) = ids::split_runtime_id(id)?;
            Target::Derived(Derivation::Runtime {
                host: host.to_string(),
                path: path.to_string(),
            })
        }
        ["servers", server] => Target::Server(server.to_string()),
        ["servers", server, "apps"] => Target::Derived(Derivation::AppsOnServer {
            server: server.to_string(),
        }),
        ["servers", server, "apps", app] => Target::Derived(Derivation::AppOnServer {
            server: server.to_string(),
            app: app.to_string(),
        }),
        ["clusters", cluster] => Target::Cluster(cluster.to_string()),
        ["clusters", cluster, "servers"] => Target::Derived(Derivation::ServersOnCluster {
            cluster: cluster.to_string(),
        }),
        ["clusters", cluster, "apps"] => Target::Derived(Derivation::AppsOnCluster {
            cluster: cluster.to_string(),
        }),
        ["clusters", cluster, "apps", app] => Target::Derived(Derivation::AppOnCluster {
            cluster: cluster.to_string(),
            app: app.to_string(),
        }),
        ["clusters", cluster, "apps", app, "instances"] => Target::Derived(Derivation::AppInstancesByCluster {
            cluster: cluster.to_string(),
            app: app.to_string(),
        }),
        ["applications", id] => Target::Application(id.to_string()),
        _ => return None,
    };
    Some(target)
}

/// Resolves paths against a shared graph.
///
/// The graph lock is never held across a fetch. After every await the parent
/// handle is re-checked, and a parent destroyed in the meantime resolves to
/// nothing.
pub struct Resolver {
    graph: Arc<RwLock<ResourceGraph>>,
    fetcher: Arc<dyn Fetcher>,
    cache: ResourceCache,
}

impl Resolver {
    pub fn new(graph: Arc<RwLock<ResourceGraph>>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            graph,
            fetcher,
            cache: ResourceCache::new(),
        }
    }

    pub async fn resolve(&self, path: &str) -> Result<Option<ResourceHandle>, ResolveError> {
        let tokens = tokenize(path);
        let Some(target) = classify(&tokens) else {
            debug!(path, "path does not name a resource");
            return Ok(None);
        };
        self.resolve_target(target).await
    }

    pub async fn resolve_target(&self, target: Target) -> Result<Option<ResourceHandle>, ResolveError> {
        match target {
            Target::Collection(kind) => self.load(FetchRequest::Collection(kind), kind).await,
            Target::StandaloneServer => {
                self.load(FetchRequest::StandaloneServer, ResourceType::StandaloneServer)
                    .await
            }
            Target::Host(id) => self.load_host(&id).await,
            Target::Server(id) => self.load_server(&id).await,
            Target::Cluster(id) => self.load_cluster(&id).await,
            Target::Application(id) => self.resolve_application(&id).await,
            Target::Derived(derivation) => self.resolve_derived(derivation).await,
        }
    }

    /// Fetch and construct through the cache.
    async fn load(&self, request: FetchRequest, kind: ResourceType) -> Result<Option<ResourceHandle>, ResolveError> {
        let fetcher = &self.fetcher;
        let graph = &self.graph;
        let req = &request;
        self.cache
            .get_or_load(req, graph, move || async move {
                let value = fetcher.fetch(req).await.map_err(|source| ResolveError::Fetch {
                    path: req.relative_path(),
                    source,
                })?;
                let Some(value) = value else {
                    debug!(request = %req, "collective has no such resource");
                    return Ok(None);
                };
                let payload = InitPayload::from_value(kind, &value)?;
                Ok::<_, ResolveError>(Some(graph.write().await.construct_from(payload)))
            })
            .await
    }

    async fn load_host(&self, id: &str) -> Result<Option<ResourceHandle>, ResolveError> {
        self.load(
            FetchRequest::Resource {
                kind: ResourceType::Host,
                id: id.to_string(),
            },
            ResourceType::Host,
        )
        .await
    }

    async fn load_cluster(&self, id: &str) -> Result<Option<ResourceHandle>, ResolveError> {
        self.load(
            FetchRequest::Resource {
                kind: ResourceType::Cluster,
                id: id.to_string(),
            },
            ResourceType::Cluster,
        )
        .await
    }

    async fn load_server(&self, id: &str) -> Result<Option<ResourceHandle>, ResolveError> {
        if ids::parse_server_tuple(id).is_none() {
            debug!(server = id, "not a server tuple");
            return Ok(None);
        }
        // The standalone server answers for its own tuple.
        if let Some(node) = self.graph.read().await.server_node(id) {
            return Ok(Some(node.handle()));
        }
        self.load(
            FetchRequest::Resource {
                kind: ResourceType::Server,
                id: id.to_string(),
            },
            ResourceType::Server,
        )
        .await
    }

    /// Load every listed server. Members that cannot be loaded are skipped and
    /// count as unknown in the projections that list them.
    async fn load_members(&self, servers: Vec<String>) {
        for id in servers {
            match self.load_server(&id).await {
                Ok(Some(_)) => {}
                Ok(None) => debug!(server = %id, "member server not found"),
                Err(e) => warn!(server = %id, error = %e, "failed to load member server"),
            }
        }
    }

    async fn host_servers(&self, handle: &ResourceHandle) -> Option<Vec<String>> {
        let graph = self.graph.read().await;
        Some(graph.get(handle)?.as_host()?.servers.list.clone())
    }

    async fn cluster_servers(&self, handle: &ResourceHandle, app: Option<&str>) -> Option<Vec<String>> {
        let graph = self.graph.read().await;
        let cluster = graph.get(handle)?.as_cluster()?;
        match app {
            Some(app) => Some(cluster.app(app)?.servers.clone()),
            None => Some(cluster.servers.list.clone()),
        }
    }

    async fn derive_under(
        &self,
        parent: &ResourceHandle,
        derivation: Derivation,
    ) -> Result<Option<ResourceHandle>, ResolveError> {
        let mut graph = self.graph.write().await;
        if !graph.is_live(parent) {
            debug!(parent = %parent.key, "parent destroyed while resolving");
            return Ok(None);
        }
        Ok(graph.derive(derivation))
    }

    async fn resolve_derived(&self, derivation: Derivation) -> Result<Option<ResourceHandle>, ResolveError> {
        let parent = match &derivation {
            Derivation::AppOnServer { server, .. } | Derivation::AppsOnServer { server } => {
                self.load_server(server).await?
            }
            Derivation::AppsOnCluster { cluster } => self.load_cluster(cluster).await?,
            Derivation::ServersOnCluster { cluster } => {
                let Some(parent) = self.load_cluster(cluster).await? else {
                    return Ok(None);
                };
                let Some(servers) = self.cluster_servers(&parent, None).await else {
                    return Ok(None);
                };
                self.load_members(servers).await;
                Some(parent)
            }
            Derivation::AppOnCluster { cluster, app } | Derivation::AppInstancesByCluster { cluster, app } => {
                let Some(parent) = self.load_cluster(cluster).await? else {
                    return Ok(None);
                };
                let Some(servers) = self.cluster_servers(&parent, Some(app.as_str())).await else {
                    debug!(cluster = %cluster, app = %app, "cluster does not deploy app");
                    return Ok(None);
                };
                self.load_members(servers).await;
                Some(parent)
            }
            Derivation::ServersOnHost { host }
            | Derivation::RuntimesOnHost { host }
            | Derivation::Runtime { host, .. } => self.load_host_with_members(host).await?,
            Derivation::ServersOnRuntime { runtime } => {
                let Some((host, path)) = ids::split_runtime_id(runtime) else {
                    return Ok(None);
                };
                let runtime = Derivation::Runtime {
                    host: host.to_string(),
                    path: path.to_string(),
                };
                let Some(host) = self.load_host_with_members(host).await? else {
                    return Ok(None);
                };
                let Some(runtime) = self.derive_under(&host, runtime).await? else {
                    return Ok(None);
                };
                return self.derive_under(&runtime, derivation).await;
            }
        };
        match parent {
            Some(parent) => self.derive_under(&parent, derivation).await,
            None => Ok(None),
        }
    }

    async fn load_host_with_members(&self, host: &str) -> Result<Option<ResourceHandle>, ResolveError> {
        let Some(parent) = self.load_host(host).await? else {
            return Ok(None);
        };
        let Some(servers) = self.host_servers(&parent).await else {
            return Ok(None);
        };
        self.load_members(servers).await;
        Ok(Some(parent))
    }

    /// `applications/<scope,app>`: ask the collective which kind of app this
    /// is, then resolve the matching projection.
    async fn resolve_application(&self, id: &str) -> Result<Option<ResourceHandle>, ResolveError> {
        let Some((scope, app)) = ids::split_application_id(id) else {
            return Ok(None);
        };
        let request = FetchRequest::Application(id.to_string());
        let payload = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|source| ResolveError::Fetch {
                path: request.relative_path(),
                source,
            })?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let derivation = match payload.get("type").and_then(Value::as_str) {
            Some("appOnServer") => Derivation::AppOnServer {
                server: scope.to_string(),
                app: app.to_string(),
            },
            Some("appOnCluster") => Derivation::AppOnCluster {
                cluster: scope.to_string(),
                app: app.to_string(),
            },
            other => {
                warn!(application = id, kind = ?other, "unrecognized application type");
                return Ok(None);
            }
        };
        self.resolve_derived(derivation).await
    }

    /// Key the path would resolve to, without fetching anything.
    pub fn key_for(target: &Target) -> Option<ResourceKey> {
        match target {
            Target::Collection(kind) => Some(ResourceKey::collection(*kind)),
            Target::Host(id) => Some(ResourceKey::new(ResourceType::Host, id.clone())),
            Target::Server(id) => Some(ResourceKey::new(ResourceType::Server, id.clone())),
            Target::Cluster(id) => Some(ResourceKey::new(ResourceType::Cluster, id.clone())),
            Target::Derived(derivation) => Some(derivation.key()),
            Target::StandaloneServer | Target::Application(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtimes_segment_swallows_the_rest() {
        assert_eq!(
            tokenize("hosts/localhost/runtimes//opt/wlp"),
            vec!["hosts", "localhost", "runtimes", "/opt/wlp"]
        );
        assert_eq!(tokenize("runtimes/localhost,/opt/wlp"), vec!["runtimes", "localhost,/opt/wlp"]);
        assert_eq!(tokenize("/hosts/localhost/runtimes"), vec!["hosts", "localhost", "runtimes"]);
    }

    #[test]
    fn segments_are_percent_decoded() {
        assert_eq!(
            tokenize("servers/localhost%2C%2Fwlp%2Fusr%2Cserver1/apps/snoop"),
            vec!["servers", "localhost,/wlp/usr,server1", "apps", "snoop"]
        );
        assert_eq!(
            tokenize("hosts/h/runtimes/%2Fopt%2Fwlp"),
            vec!["hosts", "h", "runtimes", "/opt/wlp"]
        );
    }

    #[test]
    fn classifies_nested_paths() {
        assert_eq!(classify(&["hosts"]), Some(Target::Collection(ResourceType::Hosts)));
        assert_eq!(
            classify(&["clusters", "c1", "apps", "snoop", "instances"]),
            Some(Target::Derived(Derivation::AppInstancesByCluster {
                cluster: "c1".into(),
                app: "snoop".into()
            }))
        );
        assert_eq!(
            classify(&["runtimes", "localhost,/opt/wlp"]),
            Some(Target::Derived(Derivation::Runtime {
                host: "localhost".into(),
                path: "/opt/wlp".into()
            }))
        );
    }

    #[test]
    fn unknown_paths_classify_to_none() {
        assert_eq!(classify(&["gizmos"]), None);
        assert_eq!(classify(&["host"]), None);
        assert_eq!(classify(&["hosts", "h", "widgets"]), None);
        assert_eq!(classify(&["runtimes", "nocomma"]), None);
        assert_eq!(classify::<&str>(&[]), None);
    }

    #[test]
    fn request_paths_encode_ids() {
        let request = FetchRequest::Resource {
            kind: ResourceType::Server,
            id: "localhost,/wlp/usr,server1".into(),
        };
        assert_eq!(request.relative_path(), "servers/localhost%2C%2Fwlp%2Fusr%2Cserver1");
        assert_eq!(FetchRequest::Collection(ResourceType::Runtimes).relative_path(), "runtimes");
    }

    #[test]
    fn requests_parse_from_fixture_keys() {
        assert_eq!(
            "servers/localhost,/wlp/usr,server1".parse::<FetchRequest>(),
            Ok(FetchRequest::Resource {
                kind: ResourceType::Server,
                id: "localhost,/wlp/usr,server1".into()
            })
        );
        assert_eq!("hosts".parse::<FetchRequest>(), Ok(FetchRequest::Collection(ResourceType::Hosts)));
        assert_eq!("standaloneServer".parse::<FetchRequest>(), Ok(FetchRequest::StandaloneServer));
        assert!("host".parse::<FetchRequest>().is_err());
        assert!("runtimes/localhost,/opt/wlp".parse::<FetchRequest>().is_err());
    }
}
