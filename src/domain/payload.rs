//! Initialization payloads.
//!
//! Payloads arrive as loosely typed JSON from the collective. Each resource
//! validates its required fields up front so that a missing tally or list
//! fails construction with a message naming the resource and the field.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ConstructionError;

use super::alerts::Alerts;
use super::entries::{decode_entries, decode_ids, AppEntry, ClusterAppEntry, RuntimeEntry};
use super::ids;
use super::tally::ListEntry;
use super::types::{MaintenanceMode, Metadata, ResourceType, State, Tally, TallyField};

/// A tally plus the list it counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TalliedList<T> {
    pub tally: Tally,
    pub list: Vec<T>,
}

impl<T: ListEntry> TalliedList<T> {
    pub fn empty(fields: &[TallyField]) -> Self {
        Self {
            tally: Tally::zeroed(fields),
            list: Vec::new(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.list.iter().map(|e| e.key().to_string()).collect()
    }
}

/// Attributes every payload may carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonPayload {
    pub name: Option<String>,
    pub metadata: Metadata,
    pub maintenance_mode: Option<MaintenanceMode>,
    pub alerts: Option<Alerts>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionPayload {
    pub own: TalliedList<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostPayload {
    pub id: String,
    pub servers: TalliedList<String>,
    pub runtimes: Vec<RuntimeEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerPayload {
    pub id: String,
    pub state: State,
    pub wlp_install_dir: Option<String>,
    pub cluster: Option<String>,
    pub scaling_policy: Option<String>,
    pub scaling_policy_enabled: bool,
    pub is_collective_controller: bool,
    pub runtime_type: Option<String>,
    pub container_type: Option<String>,
    pub apps: TalliedList<AppEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPayload {
    pub id: String,
    pub state: State,
    pub scaling_policy: Option<String>,
    pub scaling_policy_enabled: bool,
    pub servers: TalliedList<String>,
    pub apps: TalliedList<ClusterAppEntry>,
}

/// Type-specific part of a validated payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadBody {
    Collection(CollectionPayload),
    Host(HostPayload),
    Server(ServerPayload),
    Cluster(ClusterPayload),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitPayload {
    pub kind: ResourceType,
    pub common: CommonPayload,
    pub body: PayloadBody,
}

impl InitPayload {
    /// Validate a raw payload for a resource of `kind`.
    ///
    /// Only fetchable kinds have payloads; projections are derived from their
    /// parents instead.
    pub fn from_value(kind: ResourceType, value: &Value) -> Result<Self, ConstructionError> {
        let label = kind_label(kind);
        let Some(object) = value.as_object() else {
            return Err(ConstructionError::InvalidPayload {
                resource: label.to_string(),
                reason: "payload is not a JSON object".to_string(),
            });
        };
        let id = object.get("id").and_then(Value::as_str);
        let resource = match id {
            Some(id) if !kind.is_top_level_collection() => format!("{} \"{}\"", label, id),
            _ => label.to_string(),
        };
        let reader = Reader {
            resource: &resource,
            value,
        };

        let body = match kind {
            k if k.is_top_level_collection() => PayloadBody::Collection(CollectionPayload {
                own: reader.tallied_ids(None, k.tally_fields())?,
            }),
            ResourceType::Host => PayloadBody::Host(HostPayload {
                id: reader.required_id()?,
                servers: reader.tallied_ids(Some("servers"), TallyField::BASIC)?,
                runtimes: reader.optional_entries("runtimes")?,
            }),
            ResourceType::Server | ResourceType::StandaloneServer => {
                let id = reader.required_id()?;
                if ids::parse_server_tuple(&id).is_none() {
                    return Err(ConstructionError::InvalidField {
                        resource,
                        field: "id".to_string(),
                        reason: "expected a host,userdir,name tuple".to_string(),
                    });
                }
                PayloadBody::Server(ServerPayload {
                    id,
                    state: reader.state()?,
                    wlp_install_dir: Some(reader.required_string("wlpInstallDir")?),
                    cluster: reader.opt_string("cluster"),
                    scaling_policy: reader.opt_string("scalingPolicy"),
                    scaling_policy_enabled: reader.flag("scalingPolicyEnabled"),
                    is_collective_controller: reader.flag("isCollectiveController"),
                    runtime_type: reader.opt_string("runtimeType"),
                    container_type: reader.opt_string("containerType"),
                    apps: reader.tallied_entries("apps", TallyField::BASIC)?,
                })
            }
            ResourceType::Cluster => PayloadBody::Cluster(ClusterPayload {
                id: reader.required_id()?,
                state: reader.state()?,
                scaling_policy: reader.opt_string("scalingPolicy"),
                scaling_policy_enabled: reader.flag("scalingPolicyEnabled"),
                servers: reader.tallied_ids(Some("servers"), TallyField::BASIC)?,
                apps: reader.tallied_entries("apps", TallyField::WITH_PARTIAL)?,
            }),
            other => {
                return Err(ConstructionError::InvalidPayload {
                    resource,
                    reason: format!("{} resources are derived, not constructed from a payload", other),
                })
            }
        };

        Ok(Self {
            kind,
            common: reader.common()?,
            body,
        })
    }
}

/// Display label used in construction errors, e.g. `Server`.
pub fn kind_label(kind: ResourceType) -> &'static str {
    match kind {
        ResourceType::Host => "Host",
        ResourceType::Server => "Server",
        ResourceType::Cluster => "Cluster",
        ResourceType::Runtime => "Runtime",
        ResourceType::AppOnServer => "AppOnServer",
        ResourceType::AppOnCluster => "AppOnCluster",
        ResourceType::StandaloneServer => "StandaloneServer",
        ResourceType::Applications => "Applications",
        ResourceType::Clusters => "Clusters",
        ResourceType::Hosts => "Hosts",
        ResourceType::Servers => "Servers",
        ResourceType::Runtimes => "Runtimes",
        ResourceType::ServersOnHost => "ServersOnHost",
        ResourceType::RuntimesOnHost => "RuntimesOnHost",
        ResourceType::ServersOnCluster => "ServersOnCluster",
        ResourceType::AppsOnCluster => "AppsOnCluster",
        ResourceType::AppsOnServer => "AppsOnServer",
        ResourceType::ServersOnRuntime => "ServersOnRuntime",
        ResourceType::AppInstancesByCluster => "AppInstancesByCluster",
    }
}

/// Alternative field names used by the collective for tally slots.
fn tally_aliases(field: TallyField) -> &'static [&'static str] {
    match field {
        TallyField::Up => &["up", "allServersRunning"],
        TallyField::Down => &["down", "allServersStopped"],
        TallyField::Unknown => &["unknown", "allServersUnknown"],
        TallyField::Partial => &["partial", "someServersRunning"],
        TallyField::Empty => &["empty", "noServers"],
    }
}

fn tally_name(field: TallyField) -> &'static str {
    tally_aliases(field)[0]
}

struct Reader<'a> {
    resource: &'a str,
    value: &'a Value,
}

impl<'a> Reader<'a> {
    fn missing(&self, field: impl Into<String>) -> ConstructionError {
        ConstructionError::MissingField {
            resource: self.resource.to_string(),
            field: field.into(),
        }
    }

    fn invalid(&self, field: impl Into<String>, reason: impl Into<String>) -> ConstructionError {
        ConstructionError::InvalidField {
            resource: self.resource.to_string(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    fn section(&self, name: Option<&str>) -> Option<&'a Value> {
        match name {
            None => Some(self.value),
            Some(name) => self.value.get(name),
        }
    }

    fn required_id(&self) -> Result<String, ConstructionError> {
        match self.value.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(self.missing("id")),
        }
    }

    fn state(&self) -> Result<State, ConstructionError> {
        let raw = self
            .value
            .get("state")
            .and_then(Value::as_str)
            .ok_or_else(|| self.missing("state"))?;
        match State::signal(raw) {
            super::types::StateSignal::Apply(state) => Ok(state),
            _ => Err(self.invalid("state", format!("unrecognized state '{}'", raw))),
        }
    }

    fn required_string(&self, field: &str) -> Result<String, ConstructionError> {
        match self.value.get(field).and_then(Value::as_str) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(self.missing(field)),
        }
    }

    fn opt_string(&self, field: &str) -> Option<String> {
        self.value.get(field).and_then(Value::as_str).map(str::to_string)
    }

    fn flag(&self, field: &str) -> bool {
        self.value.get(field).and_then(Value::as_bool).unwrap_or(false)
    }

    fn tally(&self, section: Option<&str>, fields: &[TallyField]) -> Result<Tally, ConstructionError> {
        let prefix = section.map(|s| format!("{}.", s)).unwrap_or_default();
        let source = self
            .section(section)
            .ok_or_else(|| self.missing(format!("{}{} tally", prefix, tally_name(fields[0]))))?;
        let mut tally = Tally::zeroed(fields);
        for &field in fields {
            let raw = tally_aliases(field).iter().find_map(|name| source.get(*name));
            let value = raw
                .ok_or_else(|| self.missing(format!("{}{} tally", prefix, tally_name(field))))?
                .as_u64()
                .ok_or_else(|| {
                    self.invalid(
                        format!("{}{} tally", prefix, tally_name(field)),
                        "expected a non-negative integer",
                    )
                })?;
            tally.set(field, u32::try_from(value).unwrap_or(u32::MAX));
        }
        Ok(tally)
    }

    fn raw_list(&self, section: Option<&str>) -> Option<&'a Vec<Value>> {
        let source = self.section(section)?;
        source
            .get("list")
            .or_else(|| source.get("ids"))
            .and_then(Value::as_array)
    }

    fn list_field(section: Option<&str>) -> String {
        match section {
            Some(s) => format!("{}.list", s),
            None => "list".to_string(),
        }
    }

    fn tallied_ids(
        &self,
        section: Option<&str>,
        fields: &[TallyField],
    ) -> Result<TalliedList<String>, ConstructionError> {
        let tally = self.tally(section, fields)?;
        let raw = self
            .raw_list(section)
            .ok_or_else(|| self.missing(Self::list_field(section)))?;
        Ok(TalliedList {
            tally,
            list: decode_ids(raw, self.resource),
        })
    }

    fn tallied_entries<T>(
        &self,
        section: &str,
        fields: &[TallyField],
    ) -> Result<TalliedList<T>, ConstructionError>
    where
        T: DeserializeOwned,
    {
        let tally = self.tally(Some(section), fields)?;
        let raw = self
            .raw_list(Some(section))
            .ok_or_else(|| self.missing(Self::list_field(Some(section))))?;
        // Unlike event deltas, a bad entry here rejects the whole payload.
        let list = raw
            .iter()
            .map(|value| serde_json::from_value::<T>(value.clone()))
            .collect::<Result<Vec<T>, _>>()
            .map_err(|_| {
                self.invalid(
                    Self::list_field(Some(section)),
                    "some elements are not objects with name and state",
                )
            })?;
        Ok(TalliedList { tally, list })
    }

    fn optional_entries<T>(&self, section: &str) -> Result<Vec<T>, ConstructionError>
    where
        T: DeserializeOwned,
    {
        match self.section(Some(section)) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(_) => Ok(self
                .raw_list(Some(section))
                .map(|raw| decode_entries(raw, self.resource))
                .unwrap_or_default()),
        }
    }

    fn common(&self) -> Result<CommonPayload, ConstructionError> {
        let metadata: Metadata = serde_json::from_value(self.value.clone())
            .map_err(|e| self.invalid("metadata", e.to_string()))?;
        let maintenance_mode = match self.value.get("maintenanceMode") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<MaintenanceMode>(raw.clone())
                    .map_err(|e| self.invalid("maintenanceMode", e.to_string()))?,
            ),
        };
        let alerts = match self.value.get("alerts") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<Alerts>(raw.clone())
                    .map_err(|e| self.invalid("alerts", e.to_string()))?,
            ),
        };
        Ok(CommonPayload {
            name: self.opt_string("name"),
            metadata,
            maintenance_mode,
            alerts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_without_apps_tally_names_the_field() {
        let err = InitPayload::from_value(
            ResourceType::Server,
            &json!({
                "id": "localhost,/wlp/usr,server1",
                "state": "STARTED",
                "wlpInstallDir": "/wlp",
                "apps": {"down": 0, "unknown": 0, "list": []}
            }),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Server \"localhost,/wlp/usr,server1\" created without an initial apps.up tally"
        );
    }

    #[test]
    fn server_without_wlp_install_dir_names_the_field() {
        let err = InitPayload::from_value(
            ResourceType::Server,
            &json!({
                "id": "localhost,/wlp/usr,server1",
                "state": "STARTED",
                "apps": {"up": 0, "down": 0, "unknown": 0, "list": []}
            }),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Server \"localhost,/wlp/usr,server1\" created without an initial wlpInstallDir"
        );
    }

    #[test]
    fn server_apps_must_be_named_entries() {
        let err = InitPayload::from_value(
            ResourceType::Server,
            &json!({
                "id": "localhost,/wlp/usr,server1",
                "wlpInstallDir": "/wlp",
                "state": "STARTED",
                "apps": {"up": 0, "down": 0, "unknown": 0, "list": ["app1"]}
            }),
        )
        .unwrap_err();
        assert!(
            matches!(err, ConstructionError::InvalidField { ref field, .. } if field == "apps.list"),
            "{err}"
        );
    }

    #[test]
    fn cluster_apps_must_be_named_entries() {
        let err = InitPayload::from_value(
            ResourceType::Cluster,
            &json!({
                "id": "c1",
                "state": "STARTED",
                "servers": {"up": 0, "down": 0, "unknown": 0, "list": []},
                "apps": {"up": 0, "down": 0, "unknown": 0, "partial": 0, "list": [{"state": "STARTED"}]}
            }),
        )
        .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidField { ref field, .. } if field == "apps.list"));
    }

    #[test]
    fn host_without_servers_fails() {
        let err = InitPayload::from_value(ResourceType::Host, &json!({"id": "localhost"})).unwrap_err();
        assert!(matches!(err, ConstructionError::MissingField { ref field, .. } if field == "servers.up tally"));
    }

    #[test]
    fn collection_payloads_accept_collective_aliases() {
        let payload = InitPayload::from_value(
            ResourceType::Hosts,
            &json!({
                "allServersRunning": 1,
                "allServersStopped": 2,
                "allServersUnknown": 0,
                "someServersRunning": 3,
                "noServers": 4,
                "ids": ["a", "b"]
            }),
        )
        .unwrap();
        let PayloadBody::Collection(collection) = payload.body else {
            panic!("expected a collection payload");
        };
        assert_eq!(collection.own.tally.partial, Some(3));
        assert_eq!(collection.own.tally.empty, Some(4));
        assert_eq!(collection.own.list, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn applications_collection_requires_partial() {
        let err = InitPayload::from_value(
            ResourceType::Applications,
            &json!({"up": 0, "down": 0, "unknown": 0, "list": []}),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Applications created without an initial partial tally");
    }

    #[test]
    fn malformed_server_id_is_rejected() {
        let err = InitPayload::from_value(
            ResourceType::Server,
            &json!({"id": "server1", "state": "STOPPED", "apps": {"up": 0, "down": 0, "unknown": 0, "list": []}}),
        )
        .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidField { .. }));
    }

    #[test]
    fn derived_kinds_have_no_payload() {
        let err = InitPayload::from_value(ResourceType::AppOnServer, &json!({"id": "x"})).unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidPayload { .. }));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(InitPayload::from_value(ResourceType::Hosts, &json!([1, 2])).is_err());
    }
}
