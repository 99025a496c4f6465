//! Inbound change-events.
//!
//! Events are decoded leniently: unrecognized top-level fields are ignored and
//! list entries stay as raw JSON until the receiving resource knows which
//! entry shape it expects.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::alerts::Alerts;
use super::tally::TallyUpdate;
use super::types::MaintenanceMode;

/// Distinguish an absent field (`None`) from an explicit `null`
/// (`Some(None)`), which clears the attribute.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Counts and membership deltas for one nested collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<Value>,
}

impl CollectionDelta {
    pub fn tally(&self) -> TallyUpdate {
        TallyUpdate {
            up: self.up,
            down: self.down,
            unknown: self.unknown,
            partial: self.partial,
            empty: self.empty,
        }
    }
}

/// A change notification for exactly one resource, addressed by `type` + `id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    // Own collection, for events addressed to a collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,

    // Nested collections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers: Option<CollectionDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apps: Option<CollectionDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtimes: Option<CollectionDelta>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub owner: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub note: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub maintenance_mode: Option<Option<MaintenanceMode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerts: Option<Alerts>,

    // Server and cluster attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wlp_install_dir: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub cluster: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub scaling_policy: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_policy_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_collective_controller: Option<bool>,
}

impl ChangeEvent {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    /// Counts addressed to the receiving collection itself.
    pub fn own_tally(&self) -> TallyUpdate {
        TallyUpdate {
            up: self.up,
            down: self.down,
            unknown: self.unknown,
            partial: self.partial,
            empty: self.empty,
        }
    }

    /// Decode one event or an array of events.
    pub fn parse_many(value: Value) -> Result<Vec<ChangeEvent>, serde_json::Error> {
        match value {
            Value::Array(items) => items.into_iter().map(serde_json::from_value).collect(),
            other => Ok(vec![serde_json::from_value(other)?]),
        }
    }
}

/// Key of a list entry delivered as raw JSON: a bare string, or an object
/// carrying `id` or `name`.
pub fn entry_key(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("name"))
            .and_then(Value::as_str),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_null_is_distinct_from_absent() {
        let cleared: ChangeEvent =
            serde_json::from_value(json!({"type": "server", "id": "s", "cluster": null})).unwrap();
        assert_eq!(cleared.cluster, Some(None));
        assert_eq!(cleared.owner, None);

        let set: ChangeEvent =
            serde_json::from_value(json!({"type": "server", "id": "s", "cluster": "c1"})).unwrap();
        assert_eq!(set.cluster, Some(Some("c1".to_string())));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "type": "host",
            "id": "localhost",
            "somethingNew": {"nested": true},
            "servers": {"up": 1, "added": ["localhost,/wlp/usr,s1"]}
        }))
        .unwrap();
        let servers = event.servers.unwrap();
        assert_eq!(servers.up, Some(1));
        assert_eq!(servers.added.len(), 1);
    }

    #[test]
    fn parse_many_accepts_single_objects_and_arrays() {
        let one = ChangeEvent::parse_many(json!({"type": "hosts", "id": "hosts"})).unwrap();
        assert_eq!(one.len(), 1);
        let two = ChangeEvent::parse_many(json!([
            {"type": "hosts", "id": "hosts"},
            {"type": "servers", "id": "servers"}
        ]))
        .unwrap();
        assert_eq!(two[1].kind, "servers");
    }

    #[test]
    fn entry_keys_come_from_strings_or_objects() {
        assert_eq!(entry_key(&json!("snoop")), Some("snoop"));
        assert_eq!(entry_key(&json!({"name": "snoop", "state": "STARTED"})), Some("snoop"));
        assert_eq!(entry_key(&json!({"id": "h,/opt"})), Some("h,/opt"));
        assert_eq!(entry_key(&json!(42)), None);
    }
}
