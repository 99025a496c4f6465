//! Live observation graph of a managed server collective.
//!
//! Resources (hosts, servers, clusters, runtimes, applications and the
//! collections over them) are fetched once, then kept current by applying
//! change-events. Every change is reported to the resource's observers.

pub mod api;
pub mod client;
pub mod collective_client;
pub mod commands;
pub mod config;
pub mod domain;
pub mod error;
pub mod server;

pub use domain::event::ChangeEvent;
pub use domain::graph::ResourceGraph;
pub use domain::observer::{Notification, Observer};
pub use domain::resolver::{FetchRequest, Fetcher, Resolver};
pub use domain::resource::{ResourceHandle, ResourceSnapshot};
pub use domain::service::CollectiveService;
pub use error::{ConstructionError, FetchError, ResolveError};
