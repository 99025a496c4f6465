//! Change-event application for a single node.
//!
//! Everything here mutates one node and records what changed; emitting the
//! notifications and propagating to dependents is left to the graph.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use super::entries::{decode_entries, decode_ids, AppEntry, ClusterAppEntry, EntryChange, RuntimeEntry};
use super::event::{ChangeEvent, CollectionDelta};
use super::observer::{Collection, ListChange, Notification};
use super::payload::TalliedList;
use super::resource::{AlertsSource, ResourceBody, ResourceNode};
use super::tally::{reconcile_list, reconcile_tally, ListEntry, TallyUpdate};
use super::types::{Metadata, MetadataFields, ResourceType, State, StateSignal, Tally, TallyField};

/// What applying one event did to a node.
#[derive(Debug, Default)]
pub(super) struct EventOutcome {
    pub notifications: Vec<Notification>,
    /// The event reported the backing entity as gone.
    pub removed: bool,
    /// Metadata fields that now hold a different value.
    pub metadata: MetadataFields,
}

fn update_tally(
    tally: &mut Tally,
    update: &TallyUpdate,
    fields: &[TallyField],
    collection: Collection,
    out: &mut Vec<Notification>,
) {
    if update.is_empty() {
        return;
    }
    let old = reconcile_tally(tally, update, fields);
    if old != *tally {
        out.push(Notification::TallyChange {
            collection,
            new: *tally,
            old,
        });
    }
}

fn update_list<T: ListEntry>(
    list: &mut Vec<T>,
    added: &[T],
    removed: &[String],
    changed: Vec<String>,
    collection: Collection,
    out: &mut Vec<Notification>,
) {
    let delta = reconcile_list(list, added, removed);
    if delta.is_empty() && changed.is_empty() {
        return;
    }
    out.push(Notification::ListChange {
        collection,
        change: ListChange {
            new_list: delta.new_list.iter().map(|e| e.key().to_string()).collect(),
            old_list: delta.old_list.iter().map(|e| e.key().to_string()).collect(),
            added: delta.added.iter().map(|e| e.key().to_string()).collect(),
            removed: delta.removed,
            changed,
        },
    });
}

fn update_ids(
    target: &mut TalliedList<String>,
    delta: &CollectionDelta,
    fields: &[TallyField],
    collection: Collection,
    resource: &str,
    out: &mut Vec<Notification>,
) {
    update_tally(&mut target.tally, &delta.tally(), fields, collection, out);
    let added = decode_ids(&delta.added, resource);
    update_list(&mut target.list, &added, &delta.removed, Vec::new(), collection, out);
}

/// Apply `changed` entries to a list, returning the keys that really changed.
fn apply_entry_changes<T: ListEntry>(
    list: &mut [T],
    changes: &[serde_json::Value],
    resource: &str,
    apply: impl Fn(&EntryChange, &mut T) -> bool,
) -> Vec<String> {
    let mut changed = Vec::new();
    for change in decode_entries::<EntryChange>(changes, resource) {
        match list.iter_mut().find(|e| e.key() == change.name) {
            Some(entry) => {
                if apply(&change, entry) {
                    changed.push(change.name.clone());
                }
            }
            None => debug!(%resource, entry = %change.name, "change for an entry that is not listed"),
        }
    }
    changed
}

fn set_attribute<T>(attribute: &str, current: &mut T, next: T, out: &mut Vec<Notification>)
where
    T: PartialEq + serde::Serialize,
{
    if *current != next {
        let old = std::mem::replace(current, next);
        out.push(Notification::AttributeChange {
            attribute: attribute.to_string(),
            new: json!(current),
            old: json!(old),
        });
    }
}

impl ResourceNode {
    /// Kinds whose state is computed from tallies rather than reported.
    fn derives_state(&self) -> bool {
        matches!(self.kind(), ResourceType::Host | ResourceType::Runtime) || self.kind().is_collection()
    }

    /// Kinds that accept alerts reported by the collective.
    fn accepts_backend_alerts(&self) -> bool {
        matches!(
            self.kind(),
            ResourceType::Host | ResourceType::Server | ResourceType::StandaloneServer | ResourceType::Cluster
        )
    }

    /// Apply an event already known to be addressed to this node.
    pub(super) fn apply_event(&mut self, event: &ChangeEvent) -> EventOutcome {
        let mut outcome = EventOutcome::default();
        let resource = self.key.to_string();
        self.last_event_at = Some(Utc::now());

        if let Some(raw) = &event.state {
            match State::signal(raw) {
                StateSignal::Removed => {
                    outcome.removed = true;
                    return outcome;
                }
                StateSignal::Apply(_) if self.derives_state() => {
                    debug!(%resource, state = %raw, "ignoring reported state of a derived-state resource");
                }
                StateSignal::Apply(incoming) => {
                    let next = match self.state {
                        Some(current) => current.transition(incoming),
                        None => incoming,
                    };
                    self.set_state(next, &mut outcome.notifications);
                }
                StateSignal::Unrecognized => {
                    warn!(%resource, state = %raw, "unrecognized state value, state left unchanged");
                }
            }
        }

        let out = &mut outcome.notifications;
        let kind = self.kind();
        match &mut self.body {
            ResourceBody::Collection(body) => {
                update_tally(&mut body.own.tally, &event.own_tally(), kind.tally_fields(), Collection::Own, out);
                let added = decode_ids(&event.added, &resource);
                update_list(&mut body.own.list, &added, &event.removed, Vec::new(), Collection::Own, out);
            }
            ResourceBody::Host(body) => {
                if let Some(delta) = &event.servers {
                    update_ids(&mut body.servers, delta, TallyField::BASIC, Collection::Servers, &resource, out);
                }
                if let Some(delta) = &event.runtimes {
                    let added: Vec<RuntimeEntry> = decode_entries(&delta.added, &resource);
                    update_list(&mut body.runtimes, &added, &delta.removed, Vec::new(), Collection::Runtimes, out);
                }
                let derived = body.servers.tally.aggregate_state();
                self.set_state(derived, out);
            }
            ResourceBody::Server(body) => {
                if let Some(delta) = &event.apps {
                    update_tally(&mut body.apps.tally, &delta.tally(), TallyField::BASIC, Collection::Apps, out);
                    let changed = apply_entry_changes(&mut body.apps.list, &delta.changed, &resource, |c, e: &mut AppEntry| {
                        c.apply_to_app(e)
                    });
                    let added: Vec<AppEntry> = decode_entries(&delta.added, &resource);
                    update_list(&mut body.apps.list, &added, &delta.removed, changed, Collection::Apps, out);
                }
                if let Some(dir) = &event.wlp_install_dir {
                    set_attribute("wlpInstallDir", &mut body.wlp_install_dir, Some(dir.clone()), out);
                }
                if let Some(cluster) = &event.cluster {
                    set_attribute("cluster", &mut body.cluster, cluster.clone(), out);
                }
                if let Some(policy) = &event.scaling_policy {
                    set_attribute("scalingPolicy", &mut body.scaling_policy, policy.clone(), out);
                }
                if let Some(enabled) = event.scaling_policy_enabled {
                    set_attribute("scalingPolicyEnabled", &mut body.scaling_policy_enabled, enabled, out);
                }
                if let Some(controller) = event.is_collective_controller {
                    set_attribute("isCollectiveController", &mut body.is_collective_controller, controller, out);
                }
            }
            ResourceBody::Cluster(body) => {
                if let Some(delta) = &event.servers {
                    update_ids(&mut body.servers, delta, TallyField::BASIC, Collection::Servers, &resource, out);
                }
                if let Some(delta) = &event.apps {
                    update_tally(
                        &mut body.apps.tally,
                        &delta.tally(),
                        TallyField::WITH_PARTIAL,
                        Collection::Apps,
                        out,
                    );
                    let changed = apply_entry_changes(
                        &mut body.apps.list,
                        &delta.changed,
                        &resource,
                        |c, e: &mut ClusterAppEntry| c.apply_to_cluster_app(e),
                    );
                    let added: Vec<ClusterAppEntry> = decode_entries(&delta.added, &resource);
                    update_list(&mut body.apps.list, &added, &delta.removed, changed, Collection::Apps, out);
                }
                if let Some(policy) = &event.scaling_policy {
                    set_attribute("scalingPolicy", &mut body.scaling_policy, policy.clone(), out);
                }
                if let Some(enabled) = event.scaling_policy_enabled {
                    set_attribute("scalingPolicyEnabled", &mut body.scaling_policy_enabled, enabled, out);
                }
            }
            ResourceBody::Runtime(_) | ResourceBody::AppOnServer(_) | ResourceBody::AppOnCluster(_) => {}
        }

        outcome.metadata = self.apply_metadata_event(event, &mut outcome.notifications);

        if let Some(mode) = event.maintenance_mode {
            if self.maintenance_mode != mode {
                let old = std::mem::replace(&mut self.maintenance_mode, mode);
                outcome
                    .notifications
                    .push(Notification::MaintenanceModeChange { new: mode, old });
            }
        }

        if let Some(alerts) = &event.alerts {
            if self.accepts_backend_alerts() {
                self.alerts_source = AlertsSource::Backend;
                self.set_alerts(alerts.clone(), &mut outcome.notifications);
            } else {
                debug!(%resource, "ignoring reported alerts, this resource computes its own");
            }
        }

        outcome
    }

    fn apply_metadata_event(&mut self, event: &ChangeEvent, out: &mut Vec<Notification>) -> MetadataFields {
        let mut next = Metadata {
            tags: self.metadata.tags.clone(),
            owner: self.metadata.owner.clone(),
            contacts: self.metadata.contacts.clone(),
            note: self.metadata.note.clone(),
        };
        if let Some(tags) = &event.tags {
            next.tags = tags.clone();
        }
        if let Some(owner) = &event.owner {
            next.owner = owner.clone();
        }
        if let Some(contacts) = &event.contacts {
            next.contacts = contacts.clone();
        }
        if let Some(note) = &event.note {
            next.note = note.clone();
        }
        self.set_metadata(&next, out)
    }
}
