//! Value types shared by every resource: kinds, lifecycle states, tallies and
//! the user-editable metadata block.

use std::fmt;
use std::str::FromStr;

use async_graphql::{Enum, SimpleObject};
use serde::{Deserialize, Serialize};

/// Discriminant of every node the graph can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Enum)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    Host,
    Server,
    Cluster,
    Runtime,
    AppOnServer,
    AppOnCluster,
    StandaloneServer,
    // Top-level collections
    Applications,
    Clusters,
    Hosts,
    Servers,
    Runtimes,
    // Projections owned by a single parent
    ServersOnHost,
    RuntimesOnHost,
    ServersOnCluster,
    AppsOnCluster,
    AppsOnServer,
    ServersOnRuntime,
    AppInstancesByCluster,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Server => "server",
            Self::Cluster => "cluster",
            Self::Runtime => "runtime",
            Self::AppOnServer => "appOnServer",
            Self::AppOnCluster => "appOnCluster",
            Self::StandaloneServer => "standaloneServer",
            Self::Applications => "applications",
            Self::Clusters => "clusters",
            Self::Hosts => "hosts",
            Self::Servers => "servers",
            Self::Runtimes => "runtimes",
            Self::ServersOnHost => "serversOnHost",
            Self::RuntimesOnHost => "runtimesOnHost",
            Self::ServersOnCluster => "serversOnCluster",
            Self::AppsOnCluster => "appsOnCluster",
            Self::AppsOnServer => "appsOnServer",
            Self::ServersOnRuntime => "serversOnRuntime",
            Self::AppInstancesByCluster => "appInstancesByCluster",
        }
    }

    /// Top-level collections fetched directly from the collective.
    pub fn is_top_level_collection(&self) -> bool {
        matches!(
            self,
            Self::Applications | Self::Clusters | Self::Hosts | Self::Servers | Self::Runtimes
        )
    }

    /// Collections projected from a single owning resource.
    pub fn is_derived_collection(&self) -> bool {
        matches!(
            self,
            Self::ServersOnHost
                | Self::RuntimesOnHost
                | Self::ServersOnCluster
                | Self::AppsOnCluster
                | Self::AppsOnServer
                | Self::ServersOnRuntime
                | Self::AppInstancesByCluster
        )
    }

    pub fn is_collection(&self) -> bool {
        self.is_top_level_collection() || self.is_derived_collection()
    }

    /// Tally fields tracked by collections of this kind.
    pub fn tally_fields(&self) -> &'static [TallyField] {
        match self {
            Self::Hosts | Self::Runtimes | Self::RuntimesOnHost => TallyField::ALL,
            Self::Applications | Self::AppsOnCluster => TallyField::WITH_PARTIAL,
            _ => TallyField::BASIC,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "host" => Self::Host,
            "server" => Self::Server,
            "cluster" => Self::Cluster,
            "runtime" => Self::Runtime,
            "appOnServer" => Self::AppOnServer,
            "appOnCluster" => Self::AppOnCluster,
            "standaloneServer" => Self::StandaloneServer,
            "applications" => Self::Applications,
            "clusters" => Self::Clusters,
            "hosts" => Self::Hosts,
            "servers" => Self::Servers,
            "runtimes" => Self::Runtimes,
            "serversOnHost" => Self::ServersOnHost,
            "runtimesOnHost" => Self::RuntimesOnHost,
            "serversOnCluster" => Self::ServersOnCluster,
            "appsOnCluster" => Self::AppsOnCluster,
            "appsOnServer" => Self::AppsOnServer,
            "serversOnRuntime" => Self::ServersOnRuntime,
            "appInstancesByCluster" => Self::AppInstancesByCluster,
            other => return Err(format!("unknown resource type '{}'", other)),
        };
        Ok(kind)
    }
}

/// Identity of a node in the graph. Ids are unique within a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceType,
    pub id: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Top-level collections are addressed by their own type name.
    pub fn collection(kind: ResourceType) -> Self {
        Self::new(kind, kind.as_str())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Lifecycle state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    #[serde(alias = "RESTARTED")]
    Started,
    PartiallyStarted,
    Stopped,
    Starting,
    Stopping,
    Unknown,
    Installed,
}

/// Interpretation of a raw `state` value carried by a change-event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSignal {
    Apply(State),
    /// The backing entity is gone; the resource must be destroyed.
    Removed,
    Unrecognized,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::PartiallyStarted => "PARTIALLY_STARTED",
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Stopping => "STOPPING",
            Self::Unknown => "UNKNOWN",
            Self::Installed => "INSTALLED",
        }
    }

    /// Classify an event state value. `RESTARTED` is a completion signal and
    /// is folded into `STARTED`.
    pub fn signal(raw: &str) -> StateSignal {
        if raw.eq_ignore_ascii_case("removed") {
            return StateSignal::Removed;
        }
        if raw == "RESTARTED" {
            return StateSignal::Apply(Self::Started);
        }
        match raw.parse() {
            Ok(state) => StateSignal::Apply(state),
            Err(_) => StateSignal::Unrecognized,
        }
    }

    /// Next state when `incoming` is reported while in `self`.
    ///
    /// A pending start that reports `STOPPED`, or a pending stop that reports
    /// `STARTED`, contradicts the operation and lands in `UNKNOWN`.
    pub fn transition(self, incoming: State) -> State {
        match (self, incoming) {
            (Self::Starting, Self::Stopped) => Self::Unknown,
            (Self::Stopping, Self::Started) => Self::Unknown,
            (_, next) => next,
        }
    }

    /// Bucket used when counting this state into a tally.
    pub fn category(&self) -> TallyField {
        match self {
            Self::Started => TallyField::Up,
            Self::PartiallyStarted => TallyField::Partial,
            Self::Unknown => TallyField::Unknown,
            Self::Stopped | Self::Starting | Self::Stopping | Self::Installed => TallyField::Down,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "STARTED" => Self::Started,
            "PARTIALLY_STARTED" => Self::PartiallyStarted,
            "STOPPED" => Self::Stopped,
            "STARTING" => Self::Starting,
            "STOPPING" => Self::Stopping,
            "UNKNOWN" => Self::Unknown,
            "INSTALLED" => Self::Installed,
            other => return Err(format!("unrecognized state '{}'", other)),
        };
        Ok(state)
    }
}

/// Named slot of a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TallyField {
    Up,
    Down,
    Unknown,
    Partial,
    Empty,
}

impl TallyField {
    pub const BASIC: &'static [TallyField] = &[Self::Up, Self::Down, Self::Unknown];
    pub const WITH_PARTIAL: &'static [TallyField] =
        &[Self::Up, Self::Down, Self::Unknown, Self::Partial];
    pub const ALL: &'static [TallyField] = &[
        Self::Up,
        Self::Down,
        Self::Unknown,
        Self::Partial,
        Self::Empty,
    ];
}

/// Aggregate counts of a collection's members by state.
///
/// `partial` and `empty` are `None` for collections that do not track them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct Tally {
    pub up: u32,
    pub down: u32,
    pub unknown: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty: Option<u32>,
}

impl Tally {
    /// A zeroed tally tracking exactly `fields`.
    pub fn zeroed(fields: &[TallyField]) -> Self {
        Self {
            up: 0,
            down: 0,
            unknown: 0,
            partial: fields.contains(&TallyField::Partial).then_some(0),
            empty: fields.contains(&TallyField::Empty).then_some(0),
        }
    }

    pub fn get(&self, field: TallyField) -> Option<u32> {
        match field {
            TallyField::Up => Some(self.up),
            TallyField::Down => Some(self.down),
            TallyField::Unknown => Some(self.unknown),
            TallyField::Partial => self.partial,
            TallyField::Empty => self.empty,
        }
    }

    pub fn set(&mut self, field: TallyField, value: u32) {
        match field {
            TallyField::Up => self.up = value,
            TallyField::Down => self.down = value,
            TallyField::Unknown => self.unknown = value,
            TallyField::Partial => self.partial = Some(value),
            TallyField::Empty => self.empty = Some(value),
        }
    }

    /// Count one member into `field`. Buckets the collection does not track
    /// fold into the nearest tracked one: partial into up, empty into down.
    pub fn count(&mut self, field: TallyField) {
        let slot = match field {
            TallyField::Partial if self.partial.is_none() => TallyField::Up,
            TallyField::Empty if self.empty.is_none() => TallyField::Down,
            other => other,
        };
        let current = self.get(slot).unwrap_or(0);
        self.set(slot, current.saturating_add(1));
    }

    /// Sum of every field present. Widened so collective-reported counts
    /// near `u32::MAX` cannot overflow.
    pub fn total(&self) -> u64 {
        [self.up, self.down, self.unknown, self.partial.unwrap_or(0), self.empty.unwrap_or(0)]
            .into_iter()
            .map(u64::from)
            .sum()
    }

    /// State of a group whose members this tally counts. Zero members is
    /// `STOPPED`, not a separate empty state.
    pub fn aggregate_state(&self) -> State {
        if self.up == 0 {
            State::Stopped
        } else if u64::from(self.up) == self.total() {
            State::Started
        } else {
            State::PartiallyStarted
        }
    }
}

/// Maintenance mode reported for hosts and servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[serde(rename_all = "camelCase")]
pub enum MaintenanceMode {
    InMaintenance,
    NotInMaintenance,
    AlternateServerStarting,
    AlternateServerUnavailable,
    TargetInMaintenance,
}

/// User-editable metadata attached to most resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct Metadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub contacts: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Which metadata fields a write touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataFields {
    pub tags: bool,
    pub owner: bool,
    pub contacts: bool,
    pub note: bool,
}

impl MetadataFields {
    pub fn any(&self) -> bool {
        self.tags || self.owner || self.contacts || self.note
    }
}
