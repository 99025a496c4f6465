//! Resource nodes: identity, lifecycle state, shared attributes and the
//! type-specific body of every entity held by the graph.

use async_graphql::{ComplexObject, Json, SimpleObject};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use super::alerts::Alerts;
use super::derive::Derivation;
use super::entries::{AppEntry, ClusterAppEntry, RuntimeEntry};
use super::observer::{Collection, Notification, ObserverHub};
use super::payload::TalliedList;
use super::tally::ListEntry;
use super::types::{MaintenanceMode, Metadata, MetadataFields, ResourceKey, ResourceType, State, Tally};

/// Stable reference to one instance of a resource.
///
/// The generation changes whenever a key is re-constructed after its previous
/// instance was destroyed, so a stale handle never aliases the replacement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    pub key: ResourceKey,
    pub generation: u64,
}

/// Where a resource's alerts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertsSource {
    /// Recomputed from the resource and its children.
    Computed,
    /// Reported by the collective; taken as-is.
    Backend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionBody {
    pub own: TalliedList<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostBody {
    pub servers: TalliedList<String>,
    pub runtimes: Vec<RuntimeEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerBody {
    pub host: String,
    pub userdir: String,
    pub server_name: String,
    pub wlp_install_dir: Option<String>,
    pub cluster: Option<String>,
    pub scaling_policy: Option<String>,
    pub scaling_policy_enabled: bool,
    pub is_collective_controller: bool,
    pub runtime_type: Option<String>,
    pub container_type: Option<String>,
    pub apps: TalliedList<AppEntry>,
}

impl ServerBody {
    pub fn app(&self, name: &str) -> Option<&AppEntry> {
        self.apps.list.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterBody {
    pub scaling_policy: Option<String>,
    pub scaling_policy_enabled: bool,
    pub servers: TalliedList<String>,
    pub apps: TalliedList<ClusterAppEntry>,
}

impl ClusterBody {
    pub fn app(&self, name: &str) -> Option<&ClusterAppEntry> {
        self.apps.list.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeBody {
    pub host: String,
    pub path: String,
    pub runtime_type: Option<String>,
    pub container_type: Option<String>,
    pub servers: TalliedList<String>,
    pub entry_metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppOnServerBody {
    pub server: String,
    pub app: String,
    pub cluster: Option<String>,
    /// Metadata last seen on the server's list entry.
    pub entry_metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppOnClusterBody {
    pub cluster: String,
    pub app: String,
    pub instances: TalliedList<String>,
    pub entry_metadata: Option<Metadata>,
}

/// Type-specific state of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceBody {
    Collection(CollectionBody),
    Host(HostBody),
    Server(ServerBody),
    Cluster(ClusterBody),
    Runtime(RuntimeBody),
    AppOnServer(AppOnServerBody),
    AppOnCluster(AppOnClusterBody),
}

#[derive(Debug)]
pub struct ResourceNode {
    pub(super) key: ResourceKey,
    pub(super) generation: u64,
    pub(super) name: String,
    pub(super) state: Option<State>,
    pub(super) destroyed: bool,
    pub(super) alerts: Alerts,
    pub(super) alerts_source: AlertsSource,
    pub(super) metadata: Metadata,
    pub(super) maintenance_mode: Option<MaintenanceMode>,
    /// Resource whose destruction cascades to this one.
    pub(super) owner: Option<ResourceKey>,
    pub(super) derivation: Option<Derivation>,
    /// Keys read the last time this node was recomputed.
    pub(super) sources: Vec<ResourceKey>,
    pub(super) hub: ObserverHub,
    pub(super) body: ResourceBody,
    pub(super) created_at: DateTime<Utc>,
    pub(super) last_event_at: Option<DateTime<Utc>>,
}

impl ResourceNode {
    pub(super) fn new(key: ResourceKey, generation: u64, name: String, body: ResourceBody) -> Self {
        Self {
            key,
            generation,
            name,
            state: None,
            destroyed: false,
            alerts: Alerts::default(),
            alerts_source: AlertsSource::Computed,
            metadata: Metadata::default(),
            maintenance_mode: None,
            owner: None,
            derivation: None,
            sources: Vec::new(),
            hub: ObserverHub::new(),
            body,
            created_at: Utc::now(),
            last_event_at: None,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn kind(&self) -> ResourceType {
        self.key.kind
    }

    pub fn id(&self) -> &str {
        &self.key.id
    }

    pub fn handle(&self) -> ResourceHandle {
        ResourceHandle {
            key: self.key.clone(),
            generation: self.generation,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> Option<State> {
        self.state
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Visible alerts. A structure with nothing in it is not attached.
    pub fn alerts(&self) -> Option<&Alerts> {
        (!self.alerts.is_empty()).then_some(&self.alerts)
    }

    pub fn alerts_source(&self) -> AlertsSource {
        self.alerts_source
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn tags(&self) -> &[String] {
        &self.metadata.tags
    }

    pub fn owner(&self) -> Option<&str> {
        self.metadata.owner.as_deref()
    }

    pub fn contacts(&self) -> &[String] {
        &self.metadata.contacts
    }

    pub fn note(&self) -> Option<&str> {
        self.metadata.note.as_deref()
    }

    pub fn maintenance_mode(&self) -> Option<MaintenanceMode> {
        self.maintenance_mode
    }

    pub fn owner_key(&self) -> Option<&ResourceKey> {
        self.owner.as_ref()
    }

    pub fn body(&self) -> &ResourceBody {
        &self.body
    }

    pub fn observer_count(&self) -> usize {
        self.hub.len()
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    pub fn as_server(&self) -> Option<&ServerBody> {
        match &self.body {
            ResourceBody::Server(server) => Some(server),
            _ => None,
        }
    }

    pub fn as_host(&self) -> Option<&HostBody> {
        match &self.body {
            ResourceBody::Host(host) => Some(host),
            _ => None,
        }
    }

    pub fn as_cluster(&self) -> Option<&ClusterBody> {
        match &self.body {
            ResourceBody::Cluster(cluster) => Some(cluster),
            _ => None,
        }
    }

    pub fn as_runtime(&self) -> Option<&RuntimeBody> {
        match &self.body {
            ResourceBody::Runtime(runtime) => Some(runtime),
            _ => None,
        }
    }

    /// Tally of the named collection, if this resource has one.
    pub fn tally(&self, collection: Collection) -> Option<&Tally> {
        match (&self.body, collection) {
            (ResourceBody::Collection(c), Collection::Own) => Some(&c.own.tally),
            (ResourceBody::Host(h), Collection::Servers) => Some(&h.servers.tally),
            (ResourceBody::Server(s), Collection::Apps) => Some(&s.apps.tally),
            (ResourceBody::Cluster(c), Collection::Servers) => Some(&c.servers.tally),
            (ResourceBody::Cluster(c), Collection::Apps) => Some(&c.apps.tally),
            (ResourceBody::Runtime(r), Collection::Servers) => Some(&r.servers.tally),
            (ResourceBody::AppOnCluster(a), Collection::Instances) => Some(&a.instances.tally),
            _ => None,
        }
    }

    /// Keys of the named collection's list, if this resource has one.
    pub fn list(&self, collection: Collection) -> Option<Vec<String>> {
        match (&self.body, collection) {
            (ResourceBody::Collection(c), Collection::Own) => Some(c.own.keys()),
            (ResourceBody::Host(h), Collection::Servers) => Some(h.servers.keys()),
            (ResourceBody::Host(h), Collection::Runtimes) => {
                Some(h.runtimes.iter().map(|r| r.key().to_string()).collect())
            }
            (ResourceBody::Server(s), Collection::Apps) => Some(s.apps.keys()),
            (ResourceBody::Cluster(c), Collection::Servers) => Some(c.servers.keys()),
            (ResourceBody::Cluster(c), Collection::Apps) => Some(c.apps.keys()),
            (ResourceBody::Runtime(r), Collection::Servers) => Some(r.servers.keys()),
            (ResourceBody::AppOnCluster(a), Collection::Instances) => Some(a.instances.keys()),
            _ => None,
        }
    }

    pub(super) fn set_state(&mut self, next: State, out: &mut Vec<Notification>) {
        if self.state != Some(next) {
            let old = self.state.replace(next);
            out.push(Notification::StateChange { new: next, old });
        }
    }

    /// Replace the alert structure, notifying only when the visible value
    /// changes.
    pub(super) fn set_alerts(&mut self, next: Alerts, out: &mut Vec<Notification>) {
        if self.alerts == next {
            return;
        }
        let old = self.alerts().cloned();
        self.alerts = next;
        let new = self.alerts().cloned();
        if new != old {
            out.push(Notification::AlertsChange { new, old });
        }
    }

    /// Adopt `next` wholesale, notifying for each field that differs.
    pub(super) fn set_metadata(&mut self, next: &Metadata, out: &mut Vec<Notification>) -> MetadataFields {
        let fields = MetadataFields {
            tags: self.metadata.tags != next.tags,
            owner: self.metadata.owner != next.owner,
            contacts: self.metadata.contacts != next.contacts,
            note: self.metadata.note != next.note,
        };
        self.write_metadata(next, fields, out);
        fields
    }

    /// Overwrite the selected metadata fields and notify for each of them,
    /// whether or not the value differs.
    pub(super) fn write_metadata(&mut self, next: &Metadata, fields: MetadataFields, out: &mut Vec<Notification>) {
        if fields.tags {
            let old = std::mem::replace(&mut self.metadata.tags, next.tags.clone());
            out.push(Notification::TagsChange {
                new: next.tags.clone(),
                old,
            });
        }
        if fields.owner {
            let old = std::mem::replace(&mut self.metadata.owner, next.owner.clone());
            out.push(Notification::OwnerChange {
                new: next.owner.clone(),
                old,
            });
        }
        if fields.contacts {
            let old = std::mem::replace(&mut self.metadata.contacts, next.contacts.clone());
            out.push(Notification::ContactsChange {
                new: next.contacts.clone(),
                old,
            });
        }
        if fields.note {
            let old = std::mem::replace(&mut self.metadata.note, next.note.clone());
            out.push(Notification::NoteChange {
                new: next.note.clone(),
                old,
            });
        }
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            kind: self.kind(),
            id: self.key.id.clone(),
            name: self.name.clone(),
            state: self.state,
            destroyed: self.destroyed,
            alerts: self.alerts().cloned(),
            metadata: self.metadata.clone(),
            maintenance_mode: self.maintenance_mode,
            created_at: self.created_at,
            last_event_at: self.last_event_at,
            details: self.details(),
        }
    }

    fn details(&self) -> Value {
        fn tallied<T: ListEntry + Serialize>(list: &TalliedList<T>) -> Value {
            json!({ "tally": list.tally, "list": list.list })
        }
        match &self.body {
            ResourceBody::Collection(c) => tallied(&c.own),
            ResourceBody::Host(h) => json!({
                "servers": tallied(&h.servers),
                "runtimes": h.runtimes,
            }),
            ResourceBody::Server(s) => json!({
                "host": s.host,
                "userdir": s.userdir,
                "serverName": s.server_name,
                "wlpInstallDir": s.wlp_install_dir,
                "cluster": s.cluster,
                "scalingPolicy": s.scaling_policy,
                "scalingPolicyEnabled": s.scaling_policy_enabled,
                "isCollectiveController": s.is_collective_controller,
                "runtimeType": s.runtime_type,
                "containerType": s.container_type,
                "apps": tallied(&s.apps),
            }),
            ResourceBody::Cluster(c) => json!({
                "scalingPolicy": c.scaling_policy,
                "scalingPolicyEnabled": c.scaling_policy_enabled,
                "servers": tallied(&c.servers),
                "apps": tallied(&c.apps),
            }),
            ResourceBody::Runtime(r) => json!({
                "host": r.host,
                "path": r.path,
                "runtimeType": r.runtime_type,
                "containerType": r.container_type,
                "servers": tallied(&r.servers),
            }),
            ResourceBody::AppOnServer(a) => json!({
                "server": a.server,
                "cluster": a.cluster,
            }),
            ResourceBody::AppOnCluster(a) => json!({
                "cluster": a.cluster,
                "instances": tallied(&a.instances),
            }),
        }
    }
}

/// Read-only copy of a resource, as served over the API.
#[derive(Debug, Clone, PartialEq, Serialize, SimpleObject)]
#[serde(rename_all = "camelCase")]
#[graphql(complex)]
pub struct ResourceSnapshot {
    #[serde(rename = "type")]
    #[graphql(name = "type")]
    pub kind: ResourceType,
    pub id: String,
    pub name: String,
    pub state: Option<State>,
    pub destroyed: bool,
    pub alerts: Option<Alerts>,
    pub metadata: Metadata,
    pub maintenance_mode: Option<MaintenanceMode>,
    pub created_at: DateTime<Utc>,
    pub last_event_at: Option<DateTime<Utc>>,
    /// Type-specific attributes, tallies and lists.
    #[graphql(skip)]
    pub details: Value,
}

#[ComplexObject]
impl ResourceSnapshot {
    #[graphql(name = "details")]
    async fn details_json(&self) -> Json<Value> {
        Json(self.details.clone())
    }
}
