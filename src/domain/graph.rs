//! The resource graph: an arena of nodes keyed by type and id.
//!
//! All mutation goes through here so that one inbound event is applied,
//! notified, and propagated to every dependent projection before the next
//! event is looked at. The graph is deliberately synchronous; async callers
//! hold it behind a lock and never across an await.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ConstructionError;

use super::derive::{Derivation, Projection};
use super::event::ChangeEvent;
use super::ids;
use super::observer::{Notification, Observer, ObserverHub};
use super::payload::{InitPayload, PayloadBody};
use super::resource::{
    AlertsSource, ClusterBody, CollectionBody, HostBody, ResourceBody, ResourceHandle, ResourceNode, ServerBody,
};
use super::types::{MetadataFields, ResourceKey, ResourceType, State};

/// Upper bound on dependent refreshes triggered by one change.
const MAX_PROPAGATION_STEPS: usize = 10_000;

#[derive(Debug, Default)]
pub struct ResourceGraph {
    nodes: HashMap<ResourceKey, ResourceNode>,
    /// Observers that see every notification of every resource.
    global: ObserverHub,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe an observer to every resource, present and future.
    pub fn subscribe_all(&mut self, observer: Arc<dyn Observer>) {
        self.global.subscribe(observer);
    }

    /// Latest instance stored under `key`, destroyed or not.
    pub fn node(&self, key: &ResourceKey) -> Option<&ResourceNode> {
        self.nodes.get(key)
    }

    pub fn live(&self, key: &ResourceKey) -> Option<&ResourceNode> {
        self.nodes.get(key).filter(|n| !n.destroyed)
    }

    /// The exact instance `handle` names. A handle to a replaced instance
    /// resolves to nothing.
    pub fn get(&self, handle: &ResourceHandle) -> Option<&ResourceNode> {
        self.nodes
            .get(&handle.key)
            .filter(|n| n.generation == handle.generation)
    }

    pub fn is_live(&self, handle: &ResourceHandle) -> bool {
        self.get(handle).is_some_and(|n| !n.destroyed)
    }

    pub fn handle(&self, key: &ResourceKey) -> Option<ResourceHandle> {
        self.live(key).map(ResourceNode::handle)
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values().filter(|n| !n.destroyed)
    }

    pub fn len(&self) -> usize {
        self.live_nodes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&mut self, handle: &ResourceHandle, observer: Arc<dyn Observer>) -> bool {
        match self.nodes.get_mut(&handle.key) {
            Some(node) if node.generation == handle.generation && !node.destroyed => {
                node.hub.subscribe(observer);
                true
            }
            _ => false,
        }
    }

    pub fn unsubscribe(&mut self, handle: &ResourceHandle, observer: &Arc<dyn Observer>) -> bool {
        match self.nodes.get_mut(&handle.key) {
            Some(node) if node.generation == handle.generation => {
                node.hub.unsubscribe(observer);
                true
            }
            _ => false,
        }
    }

    fn emit(&self, key: &ResourceKey, notifications: &[Notification]) {
        if notifications.is_empty() {
            return;
        }
        if let Some(node) = self.nodes.get(key) {
            node.hub.notify(key, notifications);
        }
        self.global.notify(key, notifications);
    }

    fn next_generation(&self, key: &ResourceKey) -> u64 {
        self.nodes.get(key).map_or(1, |n| n.generation + 1)
    }

    /// Validate `payload` and construct a resource of `kind` from it.
    pub fn construct(&mut self, kind: ResourceType, payload: &Value) -> Result<ResourceHandle, ConstructionError> {
        let payload = InitPayload::from_value(kind, payload)?;
        Ok(self.construct_from(payload))
    }

    /// Insert a resource built from a validated payload. When a live instance
    /// already exists under the same key it is returned unchanged.
    pub fn construct_from(&mut self, payload: InitPayload) -> ResourceHandle {
        let kind = payload.kind;
        let (key, default_name, state, body) = match payload.body {
            PayloadBody::Collection(c) => (
                ResourceKey::collection(kind),
                kind.as_str().to_string(),
                None,
                ResourceBody::Collection(CollectionBody { own: c.own }),
            ),
            PayloadBody::Host(h) => (
                ResourceKey::new(kind, h.id.as_str()),
                h.id,
                Some(h.servers.tally.aggregate_state()),
                ResourceBody::Host(HostBody {
                    servers: h.servers,
                    runtimes: h.runtimes,
                }),
            ),
            PayloadBody::Server(s) => {
                let (host, userdir, server_name) = match ids::parse_server_tuple(&s.id) {
                    Some(t) => (t.host.to_string(), t.userdir.to_string(), t.name.to_string()),
                    None => (String::new(), String::new(), s.id.clone()),
                };
                (
                    ResourceKey::new(kind, s.id.as_str()),
                    server_name.clone(),
                    Some(s.state),
                    ResourceBody::Server(ServerBody {
                        host,
                        userdir,
                        server_name,
                        wlp_install_dir: s.wlp_install_dir,
                        cluster: s.cluster,
                        scaling_policy: s.scaling_policy,
                        scaling_policy_enabled: s.scaling_policy_enabled,
                        is_collective_controller: s.is_collective_controller,
                        runtime_type: s.runtime_type,
                        container_type: s.container_type,
                        apps: s.apps,
                    }),
                )
            }
            PayloadBody::Cluster(c) => (
                ResourceKey::new(kind, c.id.as_str()),
                c.id,
                Some(c.state),
                ResourceBody::Cluster(ClusterBody {
                    scaling_policy: c.scaling_policy,
                    scaling_policy_enabled: c.scaling_policy_enabled,
                    servers: c.servers,
                    apps: c.apps,
                }),
            ),
        };

        if let Some(existing) = self.live(&key) {
            debug!(resource = %key, "resource already constructed, keeping the live instance");
            return existing.handle();
        }

        let generation = self.next_generation(&key);
        let name = payload.common.name.unwrap_or(default_name);
        let mut node = ResourceNode::new(key.clone(), generation, name, body);
        node.state = state;
        node.metadata = payload.common.metadata;
        node.maintenance_mode = payload.common.maintenance_mode;
        if let Some(alerts) = payload.common.alerts {
            node.alerts_source = AlertsSource::Backend;
            node.alerts = alerts;
        }
        let handle = node.handle();
        self.nodes.insert(key.clone(), node);
        debug!(resource = %key, generation, "resource constructed");

        self.refresh_silently(&key);
        self.propagate(key);
        handle
    }

    /// Create (or return the live) projection described by `derivation`.
    ///
    /// Returns `None` when the parent is not loaded or no longer lists the
    /// entry the projection stands for.
    pub fn derive(&mut self, derivation: Derivation) -> Option<ResourceHandle> {
        let key = derivation.key();
        if let Some(existing) = self.live(&key) {
            return Some(existing.handle());
        }
        let owner = self.derivation_owner(&derivation)?;
        let projection = self.project_derivation(&derivation);
        if projection == Projection::Gone {
            return None;
        }

        let generation = self.next_generation(&key);
        let mut node = ResourceNode::new(key.clone(), generation, derivation.display_name(), derivation.empty_body());
        node.owner = Some(owner);
        node.derivation = Some(derivation);
        node.apply_projection(projection, &mut Vec::new());
        let handle = node.handle();
        self.nodes.insert(key.clone(), node);
        debug!(resource = %key, generation, "projection derived");

        self.propagate(key);
        Some(handle)
    }

    fn derivation_owner(&self, derivation: &Derivation) -> Option<ResourceKey> {
        let key = match derivation {
            Derivation::AppOnServer { server, .. } | Derivation::AppsOnServer { server } => {
                return self.server_node(server).map(|n| n.key().clone());
            }
            Derivation::AppOnCluster { cluster, .. }
            | Derivation::ServersOnCluster { cluster }
            | Derivation::AppsOnCluster { cluster }
            | Derivation::AppInstancesByCluster { cluster, .. } => ResourceKey::new(ResourceType::Cluster, cluster.as_str()),
            Derivation::Runtime { host, .. }
            | Derivation::ServersOnHost { host }
            | Derivation::RuntimesOnHost { host } => ResourceKey::new(ResourceType::Host, host.as_str()),
            Derivation::ServersOnRuntime { runtime } => ResourceKey::new(ResourceType::Runtime, runtime.as_str()),
        };
        self.live(&key).map(|n| n.key().clone())
    }

    /// Key an event is addressed to. Top-level collections may omit the id.
    pub fn event_key(event: &ChangeEvent) -> Option<ResourceKey> {
        let kind: ResourceType = event.kind.parse().ok()?;
        if event.id.is_empty() {
            return kind.is_top_level_collection().then(|| ResourceKey::collection(kind));
        }
        Some(ResourceKey::new(kind, event.id.as_str()))
    }

    /// Apply an event to the resource `target`.
    ///
    /// An event whose type or id does not match `target` is discarded
    /// without touching the resource. Returns whether the event was applied.
    pub fn apply_change_event(&mut self, target: &ResourceKey, event: &ChangeEvent) -> bool {
        if Self::event_key(event).as_ref() != Some(target) {
            warn!(
                resource = %target,
                event_type = %event.kind,
                event_id = %event.id,
                "discarding change-event addressed to a different resource"
            );
            return false;
        }
        let Some(node) = self.nodes.get_mut(target).filter(|n| !n.destroyed) else {
            debug!(resource = %target, "change-event for a resource that is not loaded");
            return false;
        };

        let derived = node.derivation.is_some();
        let outcome = node.apply_event(event);
        if outcome.removed {
            debug!(resource = %target, "collective reported resource removed");
            self.destroy_key(target);
            self.propagate(target.clone());
            return true;
        }

        self.emit(target, &outcome.notifications);
        if target.kind == ResourceType::AppOnCluster && outcome.metadata.any() {
            self.sync_app_metadata(target, outcome.metadata);
        }
        // A projection would overwrite what the event just reported.
        if !derived {
            self.refresh(target);
        }
        self.propagate(target.clone());
        true
    }

    /// Route an event to the resource it names.
    pub fn dispatch(&mut self, event: &ChangeEvent) -> bool {
        match Self::event_key(event) {
            Some(key) => self.apply_change_event(&key, event),
            None => {
                warn!(event_type = %event.kind, event_id = %event.id, "change-event with unrecognized type");
                false
            }
        }
    }

    /// Destroy the instance `handle` names along with everything it owns.
    pub fn destroy(&mut self, handle: &ResourceHandle) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        self.destroy_key(&handle.key);
        self.propagate(handle.key.clone());
        true
    }

    fn destroy_key(&mut self, key: &ResourceKey) {
        match self.nodes.get(key) {
            Some(node) if !node.destroyed => {}
            _ => return,
        }
        self.emit(key, &[Notification::Destroyed]);
        if let Some(node) = self.nodes.get_mut(key) {
            node.destroyed = true;
            node.hub.clear();
        }
        debug!(resource = %key, "resource destroyed");

        let owned: Vec<ResourceKey> = self
            .live_nodes()
            .filter(|n| n.owner.as_ref() == Some(key))
            .map(|n| n.key.clone())
            .collect();
        for child in owned {
            self.destroy_key(&child);
        }
    }

    /// Recompute the node at `key`. Returns whether anything observable
    /// changed, including destruction.
    fn refresh(&mut self, key: &ResourceKey) -> bool {
        match self.project(key) {
            Projection::Nothing => false,
            Projection::Gone => {
                self.destroy_key(key);
                true
            }
            projection => {
                let mut out = Vec::new();
                let Some(node) = self.nodes.get_mut(key) else {
                    return false;
                };
                let metadata = node.apply_projection(projection, &mut out);
                let changed = !out.is_empty();
                self.emit(key, &out);
                if key.kind == ResourceType::AppOnCluster && metadata.any() {
                    self.sync_app_metadata(key, metadata);
                }
                changed
            }
        }
    }

    fn refresh_silently(&mut self, key: &ResourceKey) {
        let projection = self.project(key);
        if let Some(node) = self.nodes.get_mut(key) {
            node.apply_projection(projection, &mut Vec::new());
        }
    }

    fn depends_on(node: &ResourceNode, changed: &ResourceKey) -> bool {
        node.key != *changed && (node.owner.as_ref() == Some(changed) || node.sources.contains(changed))
    }

    /// Refresh everything that reads `origin`, transitively. A node is only
    /// re-queued when its refresh changed something.
    fn propagate(&mut self, origin: ResourceKey) {
        let mut queue = VecDeque::from([origin]);
        let mut steps = 0usize;
        while let Some(changed) = queue.pop_front() {
            let mut dependents: Vec<ResourceKey> = self
                .live_nodes()
                .filter(|n| Self::depends_on(n, &changed))
                .map(|n| n.key.clone())
                .collect();
            dependents.sort();
            for dependent in dependents {
                steps += 1;
                if steps > MAX_PROPAGATION_STEPS {
                    warn!(origin = %changed, "change propagation exceeded its step limit");
                    return;
                }
                if self.refresh(&dependent) {
                    queue.push_back(dependent);
                }
            }
        }
    }

    /// Push the metadata of the AppOnCluster at `key` to every live
    /// AppOnServer standing for the same cluster and application. Every
    /// field in `fields` is re-notified even when the value already matched.
    fn sync_app_metadata(&mut self, key: &ResourceKey, fields: MetadataFields) {
        let Some(source) = self.live(key) else {
            return;
        };
        let ResourceBody::AppOnCluster(body) = &source.body else {
            return;
        };
        let (cluster, app, metadata) = (body.cluster.clone(), body.app.clone(), source.metadata.clone());

        let targets: Vec<ResourceKey> = self
            .live_nodes()
            .filter(|n| match &n.body {
                ResourceBody::AppOnServer(a) => a.app == app && a.cluster.as_deref() == Some(cluster.as_str()),
                _ => false,
            })
            .map(|n| n.key.clone())
            .collect();

        for target in targets {
            let mut out = Vec::new();
            if let Some(node) = self.nodes.get_mut(&target) {
                node.write_metadata(&metadata, fields, &mut out);
            }
            debug!(from = %key, to = %target, "synchronized application metadata");
            self.emit(&target, &out);
        }
    }

    /// Current state of the instance `handle` names, if live.
    pub fn state_of(&self, handle: &ResourceHandle) -> Option<State> {
        self.get(handle).filter(|n| !n.destroyed).and_then(ResourceNode::state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::observer::NotificationLog;
    use serde_json::json;

    fn host_payload() -> Value {
        json!({
            "id": "localhost",
            "servers": {"up": 1, "down": 0, "unknown": 0, "list": ["localhost,/wlp/usr,s1"]},
            "runtimes": {"list": [{"id": "localhost,/opt/wlp"}]}
        })
    }

    #[test]
    fn reconstructing_after_destroy_bumps_generation() {
        let mut graph = ResourceGraph::new();
        let first = graph.construct(ResourceType::Host, &host_payload()).unwrap();
        assert!(graph.destroy(&first));
        assert!(!graph.is_live(&first));

        let second = graph.construct(ResourceType::Host, &host_payload()).unwrap();
        assert_eq!(second.generation, first.generation + 1);
        assert!(graph.is_live(&second));
        assert!(graph.get(&first).is_none());
    }

    #[test]
    fn constructing_a_live_key_returns_the_existing_instance() {
        let mut graph = ResourceGraph::new();
        let first = graph.construct(ResourceType::Host, &host_payload()).unwrap();
        let again = graph.construct(ResourceType::Host, &host_payload()).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn failed_construction_inserts_nothing() {
        let mut graph = ResourceGraph::new();
        assert!(graph.construct(ResourceType::Host, &json!({"id": "h"})).is_err());
        assert!(graph.is_empty());
    }

    #[test]
    fn derive_without_parent_yields_none() {
        let mut graph = ResourceGraph::new();
        assert!(graph
            .derive(Derivation::ServersOnHost {
                host: "missing".into()
            })
            .is_none());
    }

    #[test]
    fn derive_for_unlisted_runtime_yields_none() {
        let mut graph = ResourceGraph::new();
        graph.construct(ResourceType::Host, &host_payload()).unwrap();
        assert!(graph
            .derive(Derivation::Runtime {
                host: "localhost".into(),
                path: "/elsewhere".into()
            })
            .is_none());
    }

    #[test]
    fn global_observers_see_destruction() {
        let mut graph = ResourceGraph::new();
        let log = Arc::new(NotificationLog::new());
        graph.subscribe_all(log.clone());
        let host = graph.construct(ResourceType::Host, &host_payload()).unwrap();
        graph.destroy(&host);
        assert_eq!(log.for_resource(&host.key), vec![Notification::Destroyed]);
    }

    #[test]
    fn events_without_id_reach_top_level_collections() {
        let event = ChangeEvent::new("hosts", "");
        assert_eq!(
            ResourceGraph::event_key(&event),
            Some(ResourceKey::collection(ResourceType::Hosts))
        );
        assert_eq!(ResourceGraph::event_key(&ChangeEvent::new("host", "")), None);
        assert_eq!(ResourceGraph::event_key(&ChangeEvent::new("gizmo", "x")), None);
    }
}
