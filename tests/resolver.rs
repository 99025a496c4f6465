use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use collective_graph::domain::observer::Collection;
use collective_graph::domain::resolver::MemoryFetcher;
use collective_graph::domain::types::{ResourceKey, ResourceType, State};
use collective_graph::{FetchError, FetchRequest, Fetcher, ResolveError, Resolver, ResourceGraph};

const S1: &str = "localhost,/wlp/usr,s1";
const S2: &str = "localhost,/wlp/usr,s2";

fn server(id: &str, state: &str, cluster: Option<&str>) -> Value {
    json!({
        "id": id,
        "state": state,
        "wlpInstallDir": "/opt/wlp",
        "cluster": cluster,
        "apps": {"up": 1, "down": 0, "unknown": 0, "list": [{"name": "snoop", "state": "STARTED"}]}
    })
}

fn cluster(servers: &[&str]) -> Value {
    json!({
        "id": "c1",
        "state": "STARTED",
        "servers": {"up": servers.len(), "down": 0, "unknown": 0, "list": servers},
        "apps": {
            "up": 1, "down": 0, "unknown": 0, "partial": 0,
            "list": [{
                "name": "snoop", "state": "STARTED",
                "servers": {"up": servers.len(), "down": 0, "unknown": 0, "ids": servers}
            }]
        }
    })
}

fn fixtures() -> Arc<MemoryFetcher> {
    let fixtures = json!({
        "hosts/localhost": {
            "id": "localhost",
            "servers": {"up": 1, "down": 1, "unknown": 0, "list": [S1, S2]},
            "runtimes": {"list": [{"id": "localhost,/opt/wlp"}]}
        },
        "hosts/bad": {"id": "bad"},
        "clusters/c1": cluster(&[S1]),
        "servers/localhost,/wlp/usr,s1": server(S1, "STARTED", Some("c1")),
        "applications/c1,snoop": {"type": "appOnCluster", "name": "snoop"},
        "applications/localhost,/wlp/usr,s1,snoop": {"type": "appOnServer", "name": "snoop"},
        "applications": {"up": 1, "down": 0, "unknown": 0, "partial": 0, "list": ["snoop"]}
    });
    Arc::new(MemoryFetcher::from_json(&fixtures).unwrap())
}

fn resolver(fetcher: Arc<MemoryFetcher>) -> (Arc<RwLock<ResourceGraph>>, Resolver) {
    let graph = Arc::new(RwLock::new(ResourceGraph::new()));
    let resolver = Resolver::new(graph.clone(), fetcher);
    (graph, resolver)
}

#[tokio::test]
async fn repeated_resolves_fetch_once() {
    let fetcher = fixtures();
    let (_, resolver) = resolver(fetcher.clone());

    let first = resolver.resolve("hosts/localhost").await.unwrap().unwrap();
    let second = resolver.resolve("/hosts/localhost/").await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(fetcher.fetch_count(), 1);
}

#[tokio::test]
async fn concurrent_resolves_share_the_instance() {
    let fetcher = fixtures();
    let (_, resolver) = resolver(fetcher.clone());

    let (a, b) = tokio::join!(resolver.resolve("applications"), resolver.resolve("applications"));
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());

    assert_eq!(a, b);
    assert_eq!(a.key, ResourceKey::collection(ResourceType::Applications));
    assert_eq!(fetcher.fetch_count(), 1);
}

#[tokio::test]
async fn unknown_resources_are_refetched() {
    let fetcher = fixtures();
    let (graph, resolver) = resolver(fetcher.clone());

    assert!(resolver.resolve("hosts/elsewhere").await.unwrap().is_none());
    assert!(resolver.resolve("hosts/elsewhere").await.unwrap().is_none());

    assert_eq!(fetcher.fetch_count(), 2);
    assert!(graph.read().await.is_empty());
}

#[tokio::test]
async fn unrecognized_paths_fetch_nothing() {
    let fetcher = fixtures();
    let (_, resolver) = resolver(fetcher.clone());

    assert!(resolver.resolve("gizmos/g1").await.unwrap().is_none());
    assert!(resolver.resolve("servers/not-a-tuple").await.unwrap().is_none());
    assert_eq!(fetcher.fetch_count(), 0);
}

#[tokio::test]
async fn destroyed_resources_are_reloaded() {
    let fetcher = fixtures();
    let (graph, resolver) = resolver(fetcher.clone());

    let first = resolver.resolve("hosts/localhost").await.unwrap().unwrap();
    assert!(graph.write().await.destroy(&first));

    let second = resolver.resolve("hosts/localhost").await.unwrap().unwrap();
    assert_eq!(second.key, first.key);
    assert_eq!(second.generation, first.generation + 1);
    assert_eq!(fetcher.fetch_count(), 2);
}

#[tokio::test]
async fn host_servers_load_members_first() {
    let fetcher = fixtures();
    let (graph, resolver) = resolver(fetcher.clone());

    let servers = resolver.resolve("hosts/localhost/servers").await.unwrap().unwrap();

    let graph = graph.read().await;
    let node = graph.get(&servers).unwrap();
    assert_eq!(node.kind(), ResourceType::ServersOnHost);
    assert_eq!(node.list(Collection::Own).unwrap(), vec![S1, S2]);
    // s2 is not known to the collective and counts as unknown.
    let tally = node.tally(Collection::Own).unwrap();
    assert_eq!((tally.up, tally.down, tally.unknown), (1, 0, 1));
    assert!(graph.live(&ResourceKey::new(ResourceType::Server, S1)).is_some());
    assert!(graph.live(&ResourceKey::new(ResourceType::Server, S2)).is_none());
}

#[tokio::test]
async fn runtime_paths_keep_slashes() {
    let fetcher = fixtures();
    let (graph, resolver) = resolver(fetcher);

    let nested = resolver
        .resolve("hosts/localhost/runtimes//opt/wlp")
        .await
        .unwrap()
        .unwrap();
    let runtime = resolver.resolve("runtimes/localhost,/opt/wlp").await.unwrap().unwrap();
    assert_eq!(nested, runtime);

    assert!(resolver
        .resolve("hosts/localhost/runtimes/opt/wlp")
        .await
        .unwrap()
        .is_none());

    let graph = graph.read().await;
    let node = graph.get(&runtime).unwrap();
    assert_eq!(node.id(), "localhost,/opt/wlp");
    assert_eq!(node.list(Collection::Servers).unwrap(), vec![S1]);
    assert_eq!(node.state(), Some(State::Started));
}

#[tokio::test]
async fn applications_resolve_by_reported_type() {
    let fetcher = fixtures();
    let (_, resolver) = resolver(fetcher);

    let on_cluster = resolver.resolve("applications/c1,snoop").await.unwrap().unwrap();
    assert_eq!(on_cluster.key, ResourceKey::new(ResourceType::AppOnCluster, "snoop(c1)"));

    let encoded = format!("applications/{}", urlencoding::encode(&format!("{},snoop", S1)));
    let on_server = resolver.resolve(&encoded).await.unwrap().unwrap();
    assert_eq!(
        on_server.key,
        ResourceKey::new(ResourceType::AppOnServer, format!("snoop({})", S1))
    );

    assert!(resolver.resolve("applications/c1,missing").await.unwrap().is_none());
}

#[tokio::test]
async fn invalid_payload_is_a_construction_error() {
    let fetcher = fixtures();
    let (graph, resolver) = resolver(fetcher);

    let err = resolver.resolve("hosts/bad").await.unwrap_err();
    assert!(matches!(err, ResolveError::Construction(_)), "{err}");
    assert!(graph.read().await.is_empty());
}

struct FailingFetcher;

#[async_trait]
impl Fetcher for FailingFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Option<Value>, FetchError> {
        Err(FetchError::Status {
            url: request.relative_path(),
            status: 503,
        })
    }
}

#[tokio::test]
async fn fetch_failures_surface_with_their_path() {
    let graph = Arc::new(RwLock::new(ResourceGraph::new()));
    let resolver = Resolver::new(graph, Arc::new(FailingFetcher));

    match resolver.resolve("clusters/c1").await {
        Err(ResolveError::Fetch { path, source }) => {
            assert_eq!(path, "clusters/c1");
            assert!(matches!(source, FetchError::Status { status: 503, .. }));
        }
        other => panic!("expected a fetch error, got {other:?}"),
    }
}

/// Destroys cluster `c1` while one of its member servers is being fetched.
struct DestroyingFetcher {
    inner: Arc<MemoryFetcher>,
    graph: OnceLock<Arc<RwLock<ResourceGraph>>>,
}

#[async_trait]
impl Fetcher for DestroyingFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Option<Value>, FetchError> {
        if matches!(request, FetchRequest::Resource { kind: ResourceType::Server, .. }) {
            if let Some(graph) = self.graph.get() {
                let mut graph = graph.write().await;
                if let Some(cluster) = graph.handle(&ResourceKey::new(ResourceType::Cluster, "c1")) {
                    graph.destroy(&cluster);
                }
            }
        }
        self.inner.fetch(request).await
    }
}

#[tokio::test]
async fn parent_destroyed_mid_resolve_yields_nothing() {
    let fetcher = Arc::new(DestroyingFetcher {
        inner: fixtures(),
        graph: OnceLock::new(),
    });
    let graph = Arc::new(RwLock::new(ResourceGraph::new()));
    fetcher.graph.set(graph.clone()).unwrap();
    let resolver = Resolver::new(graph.clone(), fetcher);

    let servers = resolver.resolve("clusters/c1/servers").await.unwrap();

    assert!(servers.is_none());
    let graph = graph.read().await;
    assert!(graph
        .live(&ResourceKey::new(ResourceType::ServersOnCluster, "c1"))
        .is_none());
    assert!(graph.live(&ResourceKey::new(ResourceType::Cluster, "c1")).is_none());
}
