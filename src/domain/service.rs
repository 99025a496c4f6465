//! Collective service: owns the shared graph and its resolver.
//!
//! API handlers go through this type only. Path lookups may fetch from the
//! collective; change-events are applied in the order they are handed over.

use std::sync::Arc;
use std::time::Instant;

use async_graphql::SimpleObject;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ResolveError;

use super::event::ChangeEvent;
use super::graph::ResourceGraph;
use super::observer::{Observer, TracingObserver};
use super::resolver::{Fetcher, Resolver};
use super::resource::{ResourceHandle, ResourceSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct ServiceHealth {
    pub version: String,
    pub uptime_secs: u64,
    /// Live resources currently held in the graph.
    pub resources: u64,
}

pub struct CollectiveService {
    graph: Arc<RwLock<ResourceGraph>>,
    resolver: Resolver,
    started_at: Instant,
}

impl CollectiveService {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        let graph = Arc::new(RwLock::new(ResourceGraph::new()));
        Self {
            resolver: Resolver::new(graph.clone(), fetcher),
            graph,
            started_at: Instant::now(),
        }
    }

    /// Service whose graph logs every notification through `tracing`.
    pub async fn with_tracing(fetcher: Arc<dyn Fetcher>) -> Self {
        let service = Self::new(fetcher);
        service.subscribe_all(Arc::new(TracingObserver)).await;
        service
    }

    pub fn graph(&self) -> Arc<RwLock<ResourceGraph>> {
        self.graph.clone()
    }

    pub async fn subscribe_all(&self, observer: Arc<dyn Observer>) {
        self.graph.write().await.subscribe_all(observer);
    }

    pub async fn resolve_handle(&self, path: &str) -> Result<Option<ResourceHandle>, ResolveError> {
        self.resolver.resolve(path).await
    }

    /// Resolve `path` and copy out the resulting resource.
    pub async fn resolve(&self, path: &str) -> Result<Option<ResourceSnapshot>, ResolveError> {
        let Some(handle) = self.resolver.resolve(path).await? else {
            return Ok(None);
        };
        Ok(self.snapshot(&handle).await)
    }

    pub async fn snapshot(&self, handle: &ResourceHandle) -> Option<ResourceSnapshot> {
        self.graph.read().await.get(handle).map(|node| node.snapshot())
    }

    /// Apply events in order. Returns how many reached a loaded resource.
    pub async fn apply_events(&self, events: &[ChangeEvent]) -> usize {
        let mut graph = self.graph.write().await;
        let applied = events.iter().filter(|event| graph.dispatch(event)).count();
        debug!(received = events.len(), applied, "applied change-events");
        applied
    }

    pub async fn health(&self) -> ServiceHealth {
        let resources = self.graph.read().await.len() as u64;
        ServiceHealth {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            resources,
        }
    }

    /// Log a one-line summary of the graph.
    pub async fn log_summary(&self) {
        let graph = self.graph.read().await;
        info!(resources = graph.len(), "collective graph summary");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resolver::MemoryFetcher;
    use serde_json::json;

    fn fetcher() -> Arc<MemoryFetcher> {
        let fixtures = json!({
            "hosts/localhost": {
                "id": "localhost",
                "servers": {"up": 1, "down": 0, "unknown": 0, "list": ["localhost,/wlp/usr,s1"]}
            },
            "servers/localhost,/wlp/usr,s1": {
                "id": "localhost,/wlp/usr,s1",
                "state": "STARTED",
                "wlpInstallDir": "/opt/wlp",
                "apps": {"up": 1, "down": 0, "unknown": 0, "list": [{"name": "snoop", "state": "STARTED"}]}
            }
        });
        Arc::new(MemoryFetcher::from_json(&fixtures).unwrap())
    }

    #[tokio::test]
    async fn resolves_and_applies_events() {
        let service = CollectiveService::new(fetcher());
        let snapshot = service.resolve("hosts/localhost").await.unwrap().unwrap();
        assert_eq!(snapshot.id, "localhost");

        let mut event = ChangeEvent::new("server", "localhost,/wlp/usr,s1");
        event.state = Some("STOPPED".to_string());
        assert_eq!(service.apply_events(&[event, ChangeEvent::new("host", "elsewhere")]).await, 0);

        service.resolve("servers/localhost,%2Fwlp%2Fusr,s1").await.unwrap().unwrap();
        let mut event = ChangeEvent::new("server", "localhost,/wlp/usr,s1");
        event.state = Some("STOPPED".to_string());
        assert_eq!(service.apply_events(&[event]).await, 1);
    }

    #[tokio::test]
    async fn unknown_paths_resolve_to_none() {
        let service = CollectiveService::new(fetcher());
        assert!(service.resolve("gizmos/1").await.unwrap().is_none());
        assert!(service.resolve("hosts/nowhere").await.unwrap().is_none());
        assert_eq!(service.health().await.resources, 0);
    }
}
