//! Alert aggregation: finds alertable conditions and rolls them up.
//!
//! All functions here are pure: they read lightweight views of resources and
//! return a fresh `Alerts` value. Attaching the result to a resource (and
//! notifying observers) is the graph's job.

use async_graphql::SimpleObject;
use serde::{Deserialize, Serialize};

use super::ids;
use super::types::{ResourceType, State};

/// A server identifier inside an app-alert.
pub type ServerRef = String;

/// An alert about a single resource whose state is `UNKNOWN`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct AlertRef {
    pub id: String,
    #[serde(rename = "type")]
    #[graphql(name = "type")]
    pub kind: String,
}

/// An application that is not running where its server is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct AppAlertRef {
    pub name: String,
    #[serde(default)]
    pub servers: Vec<ServerRef>,
}

/// Normalized alert structure attached to resources.
///
/// After any [`merge`], `count == unknown.len() + app.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct Alerts {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub unknown: Vec<AlertRef>,
    #[serde(default)]
    pub app: Vec<AppAlertRef>,
}

impl Alerts {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn push_unknown(&mut self, id: impl Into<String>, kind: ResourceType) {
        let alert = AlertRef {
            id: id.into(),
            kind: kind.as_str().to_string(),
        };
        merge(
            self,
            &Alerts {
                count: 1,
                unknown: vec![alert],
                app: Vec::new(),
            },
        );
    }

    fn push_app(&mut self, name: String, server: &str) {
        merge(
            self,
            &Alerts {
                count: 1,
                unknown: Vec::new(),
                app: vec![AppAlertRef {
                    name,
                    servers: vec![server.to_string()],
                }],
            },
        );
    }
}

/// Union `from` into `into`.
///
/// Unknown alerts are de-duplicated by `(id, type)`, app alerts by `name`
/// with their server lists unioned. `count` is recomputed from the merged
/// lists.
pub fn merge(into: &mut Alerts, from: &Alerts) {
    for alert in &from.unknown {
        if !into.unknown.iter().any(|a| a.id == alert.id && a.kind == alert.kind) {
            into.unknown.push(alert.clone());
        }
    }
    for alert in &from.app {
        match into.app.iter_mut().find(|a| a.name == alert.name) {
            Some(existing) => {
                for server in &alert.servers {
                    if !existing.servers.contains(server) {
                        existing.servers.push(server.clone());
                    }
                }
            }
            None => into.app.push(alert.clone()),
        }
    }
    into.count = u32::try_from(into.unknown.len() + into.app.len()).unwrap_or(u32::MAX);
}

/// Fold the already-computed alerts of child resources into one structure.
pub fn combine<'a>(children: impl IntoIterator<Item = Option<&'a Alerts>>) -> Alerts {
    let mut acc = Alerts::default();
    for alerts in children.into_iter().flatten() {
        merge(&mut acc, alerts);
    }
    acc
}

/// State of one application as listed by a server.
#[derive(Debug, Clone, Copy)]
pub struct AppStateView<'a> {
    pub name: &'a str,
    pub state: State,
}

/// What the aggregator needs to know about a server.
#[derive(Debug, Clone)]
pub struct ServerView<'a> {
    pub id: &'a str,
    pub state: State,
    pub apps: Vec<AppStateView<'a>>,
}

/// One instance of an application on a specific server.
#[derive(Debug, Clone, Copy)]
pub struct AppInstanceView<'a> {
    pub server_id: &'a str,
    pub server_state: State,
    pub app_state: State,
}

/// What the aggregator needs to know about an application projection.
#[derive(Debug, Clone)]
pub struct AppView<'a> {
    pub id: &'a str,
    pub kind: ResourceType,
    pub name: &'a str,
    /// Server tuple or cluster name the app-alert key is scoped by.
    pub scope: &'a str,
    pub state: State,
    pub instances: Vec<AppInstanceView<'a>>,
}

pub fn find_server_alerts(server: &ServerView<'_>) -> Alerts {
    let mut alerts = Alerts::default();
    match server.state {
        State::Unknown => alerts.push_unknown(server.id, ResourceType::Server),
        State::Started => {
            for app in &server.apps {
                match app.state {
                    State::Started | State::PartiallyStarted => {}
                    State::Unknown => alerts.push_unknown(
                        ids::app_on_server_id(app.name, server.id),
                        ResourceType::AppOnServer,
                    ),
                    _ => alerts.push_app(ids::app_alert_name(server.id, app.name), server.id),
                }
            }
        }
        _ => {}
    }
    alerts
}

pub fn find_app_alerts(app: &AppView<'_>) -> Alerts {
    let mut alerts = Alerts::default();
    if app.state == State::Unknown {
        alerts.push_unknown(app.id, app.kind);
    }
    for instance in &app.instances {
        if instance.server_state == State::Started
            && !matches!(instance.app_state, State::Started | State::Unknown)
        {
            alerts.push_app(ids::app_alert_name(app.scope, app.name), instance.server_id);
        }
    }
    alerts
}

fn scan(servers: &[ServerView<'_>], apps: &[AppView<'_>]) -> Alerts {
    let mut alerts = Alerts::default();
    for server in servers {
        merge(&mut alerts, &find_server_alerts(server));
    }
    for app in apps {
        merge(&mut alerts, &find_app_alerts(app));
    }
    alerts
}

pub fn find_cluster_alerts(servers: &[ServerView<'_>], apps: &[AppView<'_>]) -> Alerts {
    scan(servers, apps)
}

pub fn find_host_alerts(servers: &[ServerView<'_>], apps: &[AppView<'_>]) -> Alerts {
    scan(servers, apps)
}

pub fn find_runtime_alerts(servers: &[ServerView<'_>]) -> Alerts {
    scan(servers, &[])
}
