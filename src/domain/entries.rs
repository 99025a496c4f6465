//! Shapes of the entries held in resource lists, and the partial updates that
//! `changed` deltas carry for them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use super::event::nullable;
use super::tally::ListEntry;
use super::types::{Metadata, MetadataFields, State};

/// An application deployed to a server, as listed by that server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEntry {
    pub name: String,
    pub state: State,
    #[serde(flatten)]
    pub metadata: Metadata,
}

impl ListEntry for AppEntry {
    fn key(&self) -> &str {
        &self.name
    }
}

/// Server ids of a cluster app: either a bare array, or the collective's
/// tallied `{up, down, unknown, ids}` object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ServerIds {
    Bare(Vec<String>),
    Tallied {
        #[serde(default, alias = "list")]
        ids: Vec<String>,
    },
}

impl From<ServerIds> for Vec<String> {
    fn from(ids: ServerIds) -> Self {
        match ids {
            ServerIds::Bare(ids) | ServerIds::Tallied { ids } => ids,
        }
    }
}

fn server_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    ServerIds::deserialize(deserializer).map(Into::into)
}

fn optional_server_ids<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<ServerIds>::deserialize(deserializer).map(|ids| ids.map(Into::into))
}

/// An application deployed to a cluster, with the servers it runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAppEntry {
    pub name: String,
    pub state: State,
    #[serde(default, deserialize_with = "server_ids")]
    pub servers: Vec<String>,
    #[serde(flatten)]
    pub metadata: Metadata,
}

impl ListEntry for ClusterAppEntry {
    fn key(&self) -> &str {
        &self.name
    }
}

/// A runtime installation listed by a host. `id` is `host,installDir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_type: Option<String>,
    #[serde(flatten)]
    pub metadata: Metadata,
}

impl ListEntry for RuntimeEntry {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Partial update of an existing list entry, keyed by `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryChange {
    pub name: String,
    #[serde(default)]
    pub state: Option<State>,
    #[serde(default, deserialize_with = "optional_server_ids")]
    pub servers: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub owner: Option<Option<String>>,
    #[serde(default)]
    pub contacts: Option<Vec<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub note: Option<Option<String>>,
}

impl EntryChange {
    /// Overwrite the metadata fields this change defines. Returns which
    /// fields ended up with a different value.
    pub fn apply_metadata(&self, metadata: &mut Metadata) -> MetadataFields {
        let mut touched = MetadataFields::default();
        if let Some(tags) = &self.tags {
            touched.tags = metadata.tags != *tags;
            metadata.tags = tags.clone();
        }
        if let Some(owner) = &self.owner {
            touched.owner = metadata.owner != *owner;
            metadata.owner = owner.clone();
        }
        if let Some(contacts) = &self.contacts {
            touched.contacts = metadata.contacts != *contacts;
            metadata.contacts = contacts.clone();
        }
        if let Some(note) = &self.note {
            touched.note = metadata.note != *note;
            metadata.note = note.clone();
        }
        touched
    }

    pub fn apply_to_app(&self, entry: &mut AppEntry) -> bool {
        let mut changed = self.apply_metadata(&mut entry.metadata).any();
        if let Some(state) = self.state {
            changed |= entry.state != state;
            entry.state = state;
        }
        changed
    }

    pub fn apply_to_cluster_app(&self, entry: &mut ClusterAppEntry) -> bool {
        let mut changed = self.apply_metadata(&mut entry.metadata).any();
        if let Some(state) = self.state {
            changed |= entry.state != state;
            entry.state = state;
        }
        if let Some(servers) = &self.servers {
            changed |= entry.servers != *servers;
            entry.servers = servers.clone();
        }
        changed
    }
}

/// Decode raw list entries, skipping the ones that do not fit `T`.
pub fn decode_entries<T>(values: &[Value], resource: &str) -> Vec<T>
where
    T: for<'de> Deserialize<'de>,
{
    values
        .iter()
        .filter_map(|value| match serde_json::from_value::<T>(value.clone()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(%resource, entry = %value, error = %e, "skipping malformed list entry");
                None
            }
        })
        .collect()
}

/// Decode entries that are plain resource ids. Objects with an `id` or
/// `name` are accepted too.
pub fn decode_ids(values: &[Value], resource: &str) -> Vec<String> {
    values
        .iter()
        .filter_map(|value| match super::event::entry_key(value) {
            Some(key) => Some(key.to_string()),
            None => {
                warn!(%resource, entry = %value, "skipping list entry without an id");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn app_entry_metadata_is_flattened() {
        let entry: AppEntry = serde_json::from_value(json!({
            "name": "snoop",
            "state": "STARTED",
            "tags": ["prod"],
            "owner": "ops"
        }))
        .unwrap();
        assert_eq!(entry.metadata.tags, vec!["prod".to_string()]);
        assert_eq!(entry.metadata.owner.as_deref(), Some("ops"));
        assert!(entry.metadata.contacts.is_empty());
    }

    #[test]
    fn restarted_entries_read_as_started() {
        let entry: AppEntry =
            serde_json::from_value(json!({"name": "snoop", "state": "RESTARTED"})).unwrap();
        assert_eq!(entry.state, State::Started);
    }

    #[test]
    fn entry_change_reports_only_real_differences() {
        let mut entry = AppEntry {
            name: "snoop".into(),
            state: State::Started,
            metadata: Metadata {
                tags: vec!["a".into()],
                ..Default::default()
            },
        };
        let same = EntryChange {
            name: "snoop".into(),
            state: Some(State::Started),
            tags: Some(vec!["a".into()]),
            ..Default::default()
        };
        assert!(!same.apply_to_app(&mut entry));

        let stop = EntryChange {
            name: "snoop".into(),
            state: Some(State::Stopped),
            note: Some(None),
            ..Default::default()
        };
        assert!(stop.apply_to_app(&mut entry));
        assert_eq!(entry.state, State::Stopped);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let entries: Vec<AppEntry> = decode_entries(
            &[json!({"name": "ok", "state": "STOPPED"}), json!({"name": "bad", "state": "NAPPING"})],
            "server:s",
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "ok");
    }

    #[test]
    fn cluster_app_servers_accept_the_tallied_form() {
        let entry: ClusterAppEntry = serde_json::from_value(json!({
            "name": "snoop",
            "state": "STARTED",
            "up": 1, "down": 0, "unknown": 0,
            "servers": {"up": 1, "down": 0, "unknown": 0, "ids": ["localhost,/wlp/usr,server1"]},
            "tags": ["tag1"]
        }))
        .unwrap();
        assert_eq!(entry.servers, vec!["localhost,/wlp/usr,server1".to_string()]);
        assert_eq!(entry.metadata.tags, vec!["tag1".to_string()]);

        let bare: ClusterAppEntry =
            serde_json::from_value(json!({"name": "snoop", "state": "STOPPED", "servers": ["a,/u,s"]})).unwrap();
        assert_eq!(bare.servers, vec!["a,/u,s".to_string()]);
    }

    #[test]
    fn cluster_app_change_reads_tallied_servers() {
        let change: EntryChange = serde_json::from_value(json!({
            "name": "snoop",
            "servers": {"up": 0, "down": 2, "unknown": 0, "list": ["a,/u,s1", "a,/u,s2"]}
        }))
        .unwrap();
        assert_eq!(change.servers, Some(vec!["a,/u,s1".to_string(), "a,/u,s2".to_string()]));

        let untouched: EntryChange = serde_json::from_value(json!({"name": "snoop"})).unwrap();
        assert_eq!(untouched.servers, None);
    }
}
