//! Identifier formats used across the collective.
//!
//! Servers are addressed by a `host,userdir,name` tuple, runtimes by
//! `host,installDir`, and application instances by `name(scope)` where the
//! scope is a server tuple or a cluster name.

/// Components of a server tuple id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTuple<'a> {
    pub host: &'a str,
    pub userdir: &'a str,
    pub name: &'a str,
}

/// Split `host,userdir,name`. The userdir may itself contain commas, so the
/// host ends at the first comma and the name starts after the last one.
pub fn parse_server_tuple(id: &str) -> Option<ServerTuple<'_>> {
    let first = id.find(',')?;
    let last = id.rfind(',')?;
    if first == last {
        return None;
    }
    let tuple = ServerTuple {
        host: &id[..first],
        userdir: &id[first + 1..last],
        name: &id[last + 1..],
    };
    if tuple.host.is_empty() || tuple.name.is_empty() {
        return None;
    }
    Some(tuple)
}

pub fn app_on_server_id(app: &str, server: &str) -> String {
    format!("{}({})", app, server)
}

pub fn app_on_cluster_id(app: &str, cluster: &str) -> String {
    format!("{}({})", app, cluster)
}

pub fn runtime_id(host: &str, install_dir: &str) -> String {
    format!("{},{}", host, install_dir)
}

/// Split a runtime id at its first comma into `(host, installDir)`.
pub fn split_runtime_id(id: &str) -> Option<(&str, &str)> {
    let (host, path) = id.split_once(',')?;
    if host.is_empty() || path.is_empty() {
        return None;
    }
    Some((host, path))
}

/// Key of an app-alert: `serverTuple,appName` or `clusterName,appName`.
pub fn app_alert_name(scope: &str, app: &str) -> String {
    format!("{},{}", scope, app)
}

/// Split an application id `scope,appName` at its last comma.
pub fn split_application_id(id: &str) -> Option<(&str, &str)> {
    let idx = id.rfind(',')?;
    let (scope, app) = (&id[..idx], &id[idx + 1..]);
    if scope.is_empty() || app.is_empty() {
        return None;
    }
    Some((scope, app))
}
