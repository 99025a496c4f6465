//! Projections: resources computed from other resources.
//!
//! A derived node never receives its tallies or lists from the collective.
//! Instead the graph recomputes a [`Projection`] from the node's parent (and
//! the servers it lists) whenever one of those sources changes, then applies
//! the difference to the node and notifies its observers.

use super::alerts::{self, Alerts};
use super::entries::RuntimeEntry;
use super::graph::ResourceGraph;
use super::ids;
use super::observer::{Collection, ListChange, Notification};
use super::payload::TalliedList;
use super::resource::{
    AlertsSource, AppOnClusterBody, AppOnServerBody, CollectionBody, ResourceBody, ResourceNode, RuntimeBody,
};
use super::tally::{replace_list, ListDelta, ListEntry};
use super::types::{Metadata, MetadataFields, ResourceKey, ResourceType, State, Tally, TallyField};

/// How a derived resource is computed, and from which parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Derivation {
    AppOnServer { server: String, app: String },
    AppOnCluster { cluster: String, app: String },
    Runtime { host: String, path: String },
    ServersOnHost { host: String },
    RuntimesOnHost { host: String },
    ServersOnCluster { cluster: String },
    AppsOnCluster { cluster: String },
    AppsOnServer { server: String },
    ServersOnRuntime { runtime: String },
    AppInstancesByCluster { cluster: String, app: String },
}

impl Derivation {
    pub fn kind(&self) -> ResourceType {
        match self {
            Self::AppOnServer { .. } => ResourceType::AppOnServer,
            Self::AppOnCluster { .. } => ResourceType::AppOnCluster,
            Self::Runtime { .. } => ResourceType::Runtime,
            Self::ServersOnHost { .. } => ResourceType::ServersOnHost,
            Self::RuntimesOnHost { .. } => ResourceType::RuntimesOnHost,
            Self::ServersOnCluster { .. } => ResourceType::ServersOnCluster,
            Self::AppsOnCluster { .. } => ResourceType::AppsOnCluster,
            Self::AppsOnServer { .. } => ResourceType::AppsOnServer,
            Self::ServersOnRuntime { .. } => ResourceType::ServersOnRuntime,
            Self::AppInstancesByCluster { .. } => ResourceType::AppInstancesByCluster,
        }
    }

    pub fn id(&self) -> String {
        match self {
            Self::AppOnServer { server, app } => ids::app_on_server_id(app, server),
            Self::AppOnCluster { cluster, app } | Self::AppInstancesByCluster { cluster, app } => {
                ids::app_on_cluster_id(app, cluster)
            }
            Self::Runtime { host, path } => ids::runtime_id(host, path),
            Self::ServersOnHost { host } | Self::RuntimesOnHost { host } => host.clone(),
            Self::ServersOnCluster { cluster } | Self::AppsOnCluster { cluster } => cluster.clone(),
            Self::AppsOnServer { server } => server.clone(),
            Self::ServersOnRuntime { runtime } => runtime.clone(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind(), self.id())
    }

    pub(super) fn display_name(&self) -> String {
        match self {
            Self::AppOnServer { app, .. }
            | Self::AppOnCluster { app, .. }
            | Self::AppInstancesByCluster { app, .. } => app.clone(),
            Self::Runtime { path, .. } => path.clone(),
            _ => self.id(),
        }
    }

    pub(super) fn empty_body(&self) -> ResourceBody {
        match self {
            Self::AppOnServer { server, app } => ResourceBody::AppOnServer(AppOnServerBody {
                server: server.clone(),
                app: app.clone(),
                cluster: None,
                entry_metadata: None,
            }),
            Self::AppOnCluster { cluster, app } => ResourceBody::AppOnCluster(AppOnClusterBody {
                cluster: cluster.clone(),
                app: app.clone(),
                instances: TalliedList::empty(TallyField::BASIC),
                entry_metadata: None,
            }),
            Self::Runtime { host, path } => ResourceBody::Runtime(RuntimeBody {
                host: host.clone(),
                path: path.clone(),
                runtime_type: None,
                container_type: None,
                servers: TalliedList::empty(TallyField::BASIC),
                entry_metadata: None,
            }),
            other => ResourceBody::Collection(CollectionBody {
                own: TalliedList::empty(other.kind().tally_fields()),
            }),
        }
    }
}

/// Freshly computed values for a node.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Projection {
    /// Nothing about this node is computed.
    Nothing,
    /// The parent, or the parent's entry for this node, no longer exists.
    Gone,
    Alerts {
        alerts: Alerts,
        sources: Vec<ResourceKey>,
    },
    Collection {
        own: TalliedList<String>,
        sources: Vec<ResourceKey>,
    },
    Runtime {
        state: State,
        servers: TalliedList<String>,
        alerts: Alerts,
        entry: RuntimeEntry,
        sources: Vec<ResourceKey>,
    },
    AppOnServer {
        state: State,
        cluster: Option<String>,
        entry_metadata: Metadata,
        alerts: Alerts,
        sources: Vec<ResourceKey>,
    },
    AppOnCluster {
        state: State,
        instances: TalliedList<String>,
        entry_metadata: Metadata,
        alerts: Alerts,
        sources: Vec<ResourceKey>,
    },
}

/// Bucket of a runtime in a runtimes-on-host tally, from its servers.
pub(super) fn runtime_category(states: &[Option<State>]) -> TallyField {
    if states.is_empty() {
        return TallyField::Empty;
    }
    let categories: Vec<TallyField> = states
        .iter()
        .map(|s| s.map_or(TallyField::Unknown, |s| s.category()))
        .collect();
    let first = categories[0];
    if categories.iter().all(|c| *c == first) && first != TallyField::Partial {
        first
    } else {
        TallyField::Partial
    }
}

fn count_states(states: impl IntoIterator<Item = Option<State>>, fields: &[TallyField]) -> Tally {
    let mut tally = Tally::zeroed(fields);
    for state in states {
        tally.count(state.map_or(TallyField::Unknown, |s| s.category()));
    }
    tally
}

impl ResourceGraph {
    /// Live server node by id, whether it was loaded as a collective member or
    /// as the standalone server.
    pub(super) fn server_node(&self, id: &str) -> Option<&ResourceNode> {
        self.live(&ResourceKey::new(ResourceType::Server, id))
            .or_else(|| self.live(&ResourceKey::new(ResourceType::StandaloneServer, id)))
    }

    pub(super) fn server_key(&self, id: &str) -> ResourceKey {
        match self.server_node(id) {
            Some(node) => node.key().clone(),
            None => ResourceKey::new(ResourceType::Server, id),
        }
    }

    fn server_state(&self, id: &str) -> Option<State> {
        self.server_node(id).and_then(ResourceNode::state)
    }

    fn server_app_state(&self, server: &str, app: &str) -> Option<State> {
        self.server_node(server)
            .and_then(ResourceNode::as_server)
            .and_then(|s| s.app(app))
            .map(|entry| entry.state)
    }

    /// Live servers of `host` installed under `path`, in host list order.
    fn servers_on_runtime(&self, host_servers: &[String], path: &str) -> Vec<String> {
        host_servers
            .iter()
            .filter(|id| {
                self.server_node(id)
                    .and_then(ResourceNode::as_server)
                    .is_some_and(|s| s.wlp_install_dir.as_deref() == Some(path))
            })
            .cloned()
            .collect()
    }

    fn server_view<'a>(&'a self, node: &'a ResourceNode) -> Option<alerts::ServerView<'a>> {
        let server = node.as_server()?;
        Some(alerts::ServerView {
            id: node.id(),
            state: node.state().unwrap_or(State::Unknown),
            apps: server
                .apps
                .list
                .iter()
                .map(|a| alerts::AppStateView {
                    name: &a.name,
                    state: a.state,
                })
                .collect(),
        })
    }

    fn server_views<'a>(&'a self, ids: &'a [String]) -> Vec<alerts::ServerView<'a>> {
        ids.iter()
            .filter_map(|id| self.server_node(id))
            .filter_map(|node| self.server_view(node))
            .collect()
    }

    fn instance_views<'a>(&'a self, servers: &'a [String], app: &str) -> Vec<alerts::AppInstanceView<'a>> {
        servers
            .iter()
            .filter_map(|id| {
                let node = self.server_node(id)?;
                let entry = node.as_server()?.app(app)?;
                Some(alerts::AppInstanceView {
                    server_id: id.as_str(),
                    server_state: node.state().unwrap_or(State::Unknown),
                    app_state: entry.state,
                })
            })
            .collect()
    }

    fn with_servers(&self, parent: ResourceKey, servers: &[String]) -> Vec<ResourceKey> {
        let mut sources = vec![parent];
        sources.extend(servers.iter().map(|id| self.server_key(id)));
        sources
    }

    /// Compute the current projection of the node at `key`.
    pub(super) fn project(&self, key: &ResourceKey) -> Projection {
        let Some(node) = self.live(key) else {
            return Projection::Nothing;
        };
        if let Some(derivation) = &node.derivation {
            return self.project_derivation(derivation);
        }
        if node.alerts_source == AlertsSource::Backend {
            return Projection::Nothing;
        }
        match &node.body {
            ResourceBody::Server(_) => match self.server_view(node) {
                Some(view) => Projection::Alerts {
                    alerts: alerts::find_server_alerts(&view),
                    sources: Vec::new(),
                },
                None => Projection::Nothing,
            },
            ResourceBody::Host(host) => Projection::Alerts {
                alerts: alerts::find_host_alerts(&self.server_views(&host.servers.list), &[]),
                sources: host.servers.list.iter().map(|id| self.server_key(id)).collect(),
            },
            ResourceBody::Cluster(cluster) => {
                let app_ids: Vec<String> = cluster
                    .apps
                    .list
                    .iter()
                    .map(|entry| ids::app_on_cluster_id(&entry.name, node.id()))
                    .collect();
                let apps: Vec<alerts::AppView<'_>> = cluster
                    .apps
                    .list
                    .iter()
                    .zip(&app_ids)
                    .map(|(entry, id)| alerts::AppView {
                        id,
                        kind: ResourceType::AppOnCluster,
                        name: &entry.name,
                        scope: node.id(),
                        state: entry.state,
                        instances: self.instance_views(&entry.servers, &entry.name),
                    })
                    .collect();
                let computed = alerts::find_cluster_alerts(&self.server_views(&cluster.servers.list), &apps);

                let mut servers: Vec<&String> = cluster.servers.list.iter().collect();
                for server in cluster.apps.list.iter().flat_map(|entry| &entry.servers) {
                    if !servers.contains(&server) {
                        servers.push(server);
                    }
                }
                Projection::Alerts {
                    alerts: computed,
                    sources: servers.into_iter().map(|id| self.server_key(id)).collect(),
                }
            }
            _ => Projection::Nothing,
        }
    }

    pub(super) fn project_derivation(&self, derivation: &Derivation) -> Projection {
        let derived_id = derivation.id();
        match derivation {
            Derivation::AppOnServer { server, app } => {
                let Some(node) = self.server_node(server) else {
                    return Projection::Gone;
                };
                let Some(body) = node.as_server() else {
                    return Projection::Gone;
                };
                let Some(entry) = body.app(app) else {
                    return Projection::Gone;
                };
                let view = alerts::AppView {
                    id: &derived_id,
                    kind: ResourceType::AppOnServer,
                    name: app,
                    scope: server,
                    state: entry.state,
                    instances: vec![alerts::AppInstanceView {
                        server_id: server,
                        server_state: node.state().unwrap_or(State::Unknown),
                        app_state: entry.state,
                    }],
                };
                Projection::AppOnServer {
                    state: entry.state,
                    cluster: body.cluster.clone(),
                    entry_metadata: entry.metadata.clone(),
                    alerts: alerts::find_app_alerts(&view),
                    sources: vec![node.key().clone()],
                }
            }
            Derivation::AppOnCluster { cluster, app } => {
                let cluster_key = ResourceKey::new(ResourceType::Cluster, cluster.as_str());
                let Some(entry) = self
                    .live(&cluster_key)
                    .and_then(ResourceNode::as_cluster)
                    .and_then(|c| c.app(app))
                else {
                    return Projection::Gone;
                };
                let tally = count_states(
                    entry.servers.iter().map(|s| self.server_app_state(s, app)),
                    TallyField::BASIC,
                );
                let view = alerts::AppView {
                    id: &derived_id,
                    kind: ResourceType::AppOnCluster,
                    name: app,
                    scope: cluster,
                    state: entry.state,
                    instances: self.instance_views(&entry.servers, app),
                };
                Projection::AppOnCluster {
                    state: entry.state,
                    instances: TalliedList {
                        tally,
                        list: entry.servers.clone(),
                    },
                    entry_metadata: entry.metadata.clone(),
                    alerts: alerts::find_app_alerts(&view),
                    sources: self.with_servers(cluster_key, &entry.servers),
                }
            }
            Derivation::Runtime { host, path } => {
                let host_key = ResourceKey::new(ResourceType::Host, host.as_str());
                let Some(host_body) = self.live(&host_key).and_then(ResourceNode::as_host) else {
                    return Projection::Gone;
                };
                let Some(entry) = host_body.runtimes.iter().find(|r| r.id == derived_id) else {
                    return Projection::Gone;
                };
                let members = self.servers_on_runtime(&host_body.servers.list, path);
                let tally = count_states(members.iter().map(|s| self.server_state(s)), TallyField::BASIC);
                let computed = alerts::combine(
                    members
                        .iter()
                        .filter_map(|id| self.server_node(id))
                        .map(|node| Some(&node.alerts)),
                );
                Projection::Runtime {
                    state: tally.aggregate_state(),
                    servers: TalliedList { tally, list: members },
                    alerts: computed,
                    entry: entry.clone(),
                    sources: self.with_servers(host_key, &host_body.servers.list),
                }
            }
            Derivation::ServersOnHost { host } => {
                let host_key = ResourceKey::new(ResourceType::Host, host.as_str());
                match self.live(&host_key).and_then(ResourceNode::as_host) {
                    Some(body) => self.server_collection(host_key, &body.servers.list, derivation),
                    None => Projection::Gone,
                }
            }
            Derivation::ServersOnCluster { cluster } => {
                let cluster_key = ResourceKey::new(ResourceType::Cluster, cluster.as_str());
                match self.live(&cluster_key).and_then(ResourceNode::as_cluster) {
                    Some(body) => self.server_collection(cluster_key, &body.servers.list, derivation),
                    None => Projection::Gone,
                }
            }
            Derivation::ServersOnRuntime { runtime } => {
                let runtime_key = ResourceKey::new(ResourceType::Runtime, runtime.as_str());
                match self.live(&runtime_key).and_then(ResourceNode::as_runtime) {
                    Some(body) => self.server_collection(runtime_key, &body.servers.list, derivation),
                    None => Projection::Gone,
                }
            }
            Derivation::RuntimesOnHost { host } => {
                let host_key = ResourceKey::new(ResourceType::Host, host.as_str());
                let Some(body) = self.live(&host_key).and_then(ResourceNode::as_host) else {
                    return Projection::Gone;
                };
                let mut tally = Tally::zeroed(derivation.kind().tally_fields());
                for runtime in &body.runtimes {
                    let path = ids::split_runtime_id(&runtime.id).map_or("", |(_, p)| p);
                    let states: Vec<Option<State>> = self
                        .servers_on_runtime(&body.servers.list, path)
                        .iter()
                        .map(|s| self.server_state(s))
                        .collect();
                    tally.count(runtime_category(&states));
                }
                Projection::Collection {
                    own: TalliedList {
                        tally,
                        list: body.runtimes.iter().map(|r| r.id.clone()).collect(),
                    },
                    sources: self.with_servers(host_key, &body.servers.list),
                }
            }
            Derivation::AppsOnCluster { cluster } => {
                let cluster_key = ResourceKey::new(ResourceType::Cluster, cluster.as_str());
                let Some(body) = self.live(&cluster_key).and_then(ResourceNode::as_cluster) else {
                    return Projection::Gone;
                };
                Projection::Collection {
                    own: TalliedList {
                        tally: count_states(
                            body.apps.list.iter().map(|a| Some(a.state)),
                            derivation.kind().tally_fields(),
                        ),
                        list: body
                            .apps
                            .list
                            .iter()
                            .map(|a| ids::app_on_cluster_id(&a.name, cluster))
                            .collect(),
                    },
                    sources: vec![cluster_key],
                }
            }
            Derivation::AppsOnServer { server } => {
                let Some(node) = self.server_node(server) else {
                    return Projection::Gone;
                };
                let Some(body) = node.as_server() else {
                    return Projection::Gone;
                };
                Projection::Collection {
                    own: TalliedList {
                        tally: count_states(
                            body.apps.list.iter().map(|a| Some(a.state)),
                            derivation.kind().tally_fields(),
                        ),
                        list: body
                            .apps
                            .list
                            .iter()
                            .map(|a| ids::app_on_server_id(&a.name, server))
                            .collect(),
                    },
                    sources: vec![node.key().clone()],
                }
            }
            Derivation::AppInstancesByCluster { cluster, app } => {
                let cluster_key = ResourceKey::new(ResourceType::Cluster, cluster.as_str());
                let Some(entry) = self
                    .live(&cluster_key)
                    .and_then(ResourceNode::as_cluster)
                    .and_then(|c| c.app(app))
                else {
                    return Projection::Gone;
                };
                Projection::Collection {
                    own: TalliedList {
                        tally: count_states(
                            entry.servers.iter().map(|s| self.server_app_state(s, app)),
                            derivation.kind().tally_fields(),
                        ),
                        list: entry
                            .servers
                            .iter()
                            .map(|s| ids::app_on_server_id(app, s))
                            .collect(),
                    },
                    sources: self.with_servers(cluster_key, &entry.servers),
                }
            }
        }
    }

    fn server_collection(&self, parent: ResourceKey, servers: &[String], derivation: &Derivation) -> Projection {
        Projection::Collection {
            own: TalliedList {
                tally: count_states(
                    servers.iter().map(|s| self.server_state(s)),
                    derivation.kind().tally_fields(),
                ),
                list: servers.to_vec(),
            },
            sources: self.with_servers(parent, servers),
        }
    }
}

fn list_change<T: ListEntry>(delta: &ListDelta<T>) -> ListChange {
    ListChange {
        new_list: delta.new_list.iter().map(|e| e.key().to_string()).collect(),
        old_list: delta.old_list.iter().map(|e| e.key().to_string()).collect(),
        added: delta.added.iter().map(|e| e.key().to_string()).collect(),
        removed: delta.removed.clone(),
        changed: Vec::new(),
    }
}

fn adopt_tallied(
    current: &mut TalliedList<String>,
    next: TalliedList<String>,
    collection: Collection,
    out: &mut Vec<Notification>,
) {
    if current.tally != next.tally {
        let old = std::mem::replace(&mut current.tally, next.tally);
        out.push(Notification::TallyChange {
            collection,
            new: next.tally,
            old,
        });
    }
    let delta = replace_list(&mut current.list, next.list);
    if !delta.is_empty() {
        out.push(Notification::ListChange {
            collection,
            change: list_change(&delta),
        });
    }
}

fn attribute_change(attribute: &str, new: &Option<String>, old: &Option<String>) -> Notification {
    Notification::AttributeChange {
        attribute: attribute.to_string(),
        new: serde_json::json!(new),
        old: serde_json::json!(old),
    }
}

impl ResourceNode {
    /// Apply a projection, collecting notifications. Returns the metadata
    /// fields that changed because the parent's entry changed.
    pub(super) fn apply_projection(&mut self, projection: Projection, out: &mut Vec<Notification>) -> MetadataFields {
        let mut metadata = MetadataFields::default();
        match projection {
            Projection::Nothing | Projection::Gone => {}
            Projection::Alerts { alerts, sources } => {
                self.sources = sources;
                self.set_alerts(alerts, out);
            }
            Projection::Collection { own, sources } => {
                self.sources = sources;
                if let ResourceBody::Collection(body) = &mut self.body {
                    adopt_tallied(&mut body.own, own, Collection::Own, out);
                }
            }
            Projection::Runtime {
                state,
                servers,
                alerts,
                entry,
                sources,
            } => {
                self.sources = sources;
                self.set_state(state, out);
                let mut entry_metadata = None;
                if let ResourceBody::Runtime(body) = &mut self.body {
                    adopt_tallied(&mut body.servers, servers, Collection::Servers, out);
                    if body.runtime_type != entry.runtime_type {
                        out.push(attribute_change("runtimeType", &entry.runtime_type, &body.runtime_type));
                        body.runtime_type = entry.runtime_type.clone();
                    }
                    if body.container_type != entry.container_type {
                        out.push(attribute_change("containerType", &entry.container_type, &body.container_type));
                        body.container_type = entry.container_type.clone();
                    }
                    if body.entry_metadata.as_ref() != Some(&entry.metadata) {
                        body.entry_metadata = Some(entry.metadata.clone());
                        entry_metadata = Some(entry.metadata);
                    }
                }
                if let Some(next) = entry_metadata {
                    metadata = self.set_metadata(&next, out);
                }
                self.set_alerts(alerts, out);
            }
            Projection::AppOnServer {
                state,
                cluster,
                entry_metadata,
                alerts,
                sources,
            } => {
                self.sources = sources;
                self.set_state(state, out);
                let mut adopt = false;
                if let ResourceBody::AppOnServer(body) = &mut self.body {
                    if body.cluster != cluster {
                        out.push(attribute_change("cluster", &cluster, &body.cluster));
                        body.cluster = cluster;
                    }
                    if body.entry_metadata.as_ref() != Some(&entry_metadata) {
                        body.entry_metadata = Some(entry_metadata.clone());
                        adopt = true;
                    }
                }
                if adopt {
                    metadata = self.set_metadata(&entry_metadata, out);
                }
                self.set_alerts(alerts, out);
            }
            Projection::AppOnCluster {
                state,
                instances,
                entry_metadata,
                alerts,
                sources,
            } => {
                self.sources = sources;
                self.set_state(state, out);
                let mut adopt = false;
                if let ResourceBody::AppOnCluster(body) = &mut self.body {
                    adopt_tallied(&mut body.instances, instances, Collection::Instances, out);
                    if body.entry_metadata.as_ref() != Some(&entry_metadata) {
                        body.entry_metadata = Some(entry_metadata.clone());
                        adopt = true;
                    }
                }
                if adopt {
                    metadata = self.set_metadata(&entry_metadata, out);
                }
                self.set_alerts(alerts, out);
            }
        }
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_categories() {
        assert_eq!(runtime_category(&[]), TallyField::Empty);
        assert_eq!(
            runtime_category(&[Some(State::Started), Some(State::Started)]),
            TallyField::Up
        );
        assert_eq!(
            runtime_category(&[Some(State::Stopped), Some(State::Installed)]),
            TallyField::Down
        );
        assert_eq!(runtime_category(&[None, Some(State::Unknown)]), TallyField::Unknown);
        assert_eq!(
            runtime_category(&[Some(State::Started), Some(State::Stopped)]),
            TallyField::Partial
        );
    }

    #[test]
    fn derivation_ids_follow_collective_formats() {
        let aos = Derivation::AppOnServer {
            server: "h,/u,s1".into(),
            app: "snoop".into(),
        };
        assert_eq!(aos.key(), ResourceKey::new(ResourceType::AppOnServer, "snoop(h,/u,s1)"));

        let runtime = Derivation::Runtime {
            host: "localhost".into(),
            path: "/opt/wlp".into(),
        };
        assert_eq!(runtime.id(), "localhost,/opt/wlp");
        assert_eq!(runtime.display_name(), "/opt/wlp");

        let instances = Derivation::AppInstancesByCluster {
            cluster: "c1".into(),
            app: "snoop".into(),
        };
        assert_eq!(instances.key().kind, ResourceType::AppInstancesByCluster);
        assert_eq!(instances.id(), "snoop(c1)");
    }

    #[test]
    fn empty_bodies_track_the_right_tally_fields() {
        let body = Derivation::RuntimesOnHost { host: "h".into() }.empty_body();
        match body {
            ResourceBody::Collection(c) => assert_eq!(c.own.tally.empty, Some(0)),
            other => panic!("unexpected body {:?}", other),
        }
    }
}
