//! Notification hub: per-resource observer lists and the change vocabulary
//! delivered to them.
//!
//! Observers implement only the handlers they care about; every handler has a
//! no-op default. Delivery is synchronous, in subscription order, and each
//! call is isolated so a panicking observer cannot starve the ones after it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use super::alerts::Alerts;
use super::types::{MaintenanceMode, ResourceKey, State, Tally};

/// Which collection of a resource a tally or list notification refers to.
///
/// Collections report on `Own`; hosts, clusters and servers name the nested
/// collection that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Own,
    Servers,
    Apps,
    Runtimes,
    Instances,
}

/// Membership delta of a keyed list. Only entries that actually changed the
/// list are reported in `added` and `removed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChange {
    pub new_list: Vec<String>,
    pub old_list: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Keys of entries that stayed in the list but had fields updated.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<String>,
}

impl ListChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// One attribute change of one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Notification {
    StateChange {
        new: State,
        old: Option<State>,
    },
    TallyChange {
        collection: Collection,
        new: Tally,
        old: Tally,
    },
    ListChange {
        collection: Collection,
        change: ListChange,
    },
    AlertsChange {
        new: Option<Alerts>,
        old: Option<Alerts>,
    },
    TagsChange {
        new: Vec<String>,
        old: Vec<String>,
    },
    OwnerChange {
        new: Option<String>,
        old: Option<String>,
    },
    ContactsChange {
        new: Vec<String>,
        old: Vec<String>,
    },
    NoteChange {
        new: Option<String>,
        old: Option<String>,
    },
    MaintenanceModeChange {
        new: Option<MaintenanceMode>,
        old: Option<MaintenanceMode>,
    },
    /// Type-specific scalar attribute such as a server's `cluster`.
    AttributeChange {
        attribute: String,
        new: Value,
        old: Value,
    },
    /// Terminal signal. Delivered exactly once per resource instance.
    Destroyed,
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChange { .. } => "onStateChange",
            Self::TallyChange { .. } => "onTallyChange",
            Self::ListChange { .. } => "onListChange",
            Self::AlertsChange { .. } => "onAlertsChange",
            Self::TagsChange { .. } => "onTagsChange",
            Self::OwnerChange { .. } => "onOwnerChange",
            Self::ContactsChange { .. } => "onContactsChange",
            Self::NoteChange { .. } => "onNoteChange",
            Self::MaintenanceModeChange { .. } => "onMaintenanceModeChange",
            Self::AttributeChange { .. } => "onAttributeChange",
            Self::Destroyed => "onDestroyed",
        }
    }
}

/// Receiver of resource notifications.
///
/// `observe` routes to the typed handlers; override it only to see every
/// notification in one place.
#[allow(unused_variables)]
pub trait Observer: Send + Sync {
    fn observe(&self, source: &ResourceKey, notification: &Notification) {
        match notification {
            Notification::StateChange { new, old } => self.on_state_change(source, *new, *old),
            Notification::TallyChange { collection, new, old } => {
                self.on_tally_change(source, *collection, new, old)
            }
            Notification::ListChange { collection, change } => {
                self.on_list_change(source, *collection, change)
            }
            Notification::AlertsChange { new, old } => {
                self.on_alerts_change(source, new.as_ref(), old.as_ref())
            }
            Notification::TagsChange { new, old } => self.on_tags_change(source, new, old),
            Notification::OwnerChange { new, old } => {
                self.on_owner_change(source, new.as_deref(), old.as_deref())
            }
            Notification::ContactsChange { new, old } => self.on_contacts_change(source, new, old),
            Notification::NoteChange { new, old } => {
                self.on_note_change(source, new.as_deref(), old.as_deref())
            }
            Notification::MaintenanceModeChange { new, old } => {
                self.on_maintenance_mode_change(source, *new, *old)
            }
            Notification::AttributeChange { attribute, new, old } => {
                self.on_attribute_change(source, attribute, new, old)
            }
            Notification::Destroyed => self.on_destroyed(source),
        }
    }

    fn on_state_change(&self, source: &ResourceKey, new: State, old: Option<State>) {}
    fn on_tally_change(&self, source: &ResourceKey, collection: Collection, new: &Tally, old: &Tally) {}
    fn on_list_change(&self, source: &ResourceKey, collection: Collection, change: &ListChange) {}
    fn on_alerts_change(&self, source: &ResourceKey, new: Option<&Alerts>, old: Option<&Alerts>) {}
    fn on_tags_change(&self, source: &ResourceKey, new: &[String], old: &[String]) {}
    fn on_owner_change(&self, source: &ResourceKey, new: Option<&str>, old: Option<&str>) {}
    fn on_contacts_change(&self, source: &ResourceKey, new: &[String], old: &[String]) {}
    fn on_note_change(&self, source: &ResourceKey, new: Option<&str>, old: Option<&str>) {}
    fn on_maintenance_mode_change(
        &self,
        source: &ResourceKey,
        new: Option<MaintenanceMode>,
        old: Option<MaintenanceMode>,
    ) {
    }
    fn on_attribute_change(&self, source: &ResourceKey, attribute: &str, new: &Value, old: &Value) {}
    fn on_destroyed(&self, source: &ResourceKey) {}
}

/// Ordered set of observers attached to one resource.
#[derive(Default, Clone)]
pub struct ObserverHub {
    observers: Vec<Arc<dyn Observer>>,
}

fn same_observer(a: &Arc<dyn Observer>, b: &Arc<dyn Observer>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `observer` unless the same instance is already subscribed.
    pub fn subscribe(&mut self, observer: Arc<dyn Observer>) {
        if !self.observers.iter().any(|o| same_observer(o, &observer)) {
            self.observers.push(observer);
        }
    }

    pub fn unsubscribe(&mut self, observer: &Arc<dyn Observer>) {
        self.observers.retain(|o| !same_observer(o, observer));
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }

    /// Deliver every notification to every observer, notification-major.
    pub fn notify(&self, source: &ResourceKey, notifications: &[Notification]) {
        for notification in notifications {
            for observer in &self.observers {
                let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                    observer.observe(source, notification)
                }));
                if delivered.is_err() {
                    error!(
                        resource = %source,
                        handler = notification.name(),
                        "observer panicked while handling notification"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for ObserverHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHub")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Logs every notification it receives.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, source: &ResourceKey, notification: &Notification) {
        let detail = serde_json::to_string(notification).unwrap_or_default();
        info!(resource = %source, handler = notification.name(), %detail, "resource changed");
    }
}

/// Keeps every notification in arrival order.
#[derive(Debug, Default)]
pub struct NotificationLog {
    entries: Mutex<Vec<(ResourceKey, Notification)>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(ResourceKey, Notification)> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Notifications received from `source`.
    pub fn for_resource(&self, source: &ResourceKey) -> Vec<Notification> {
        self.entries()
            .into_iter()
            .filter(|(key, _)| key == source)
            .map(|(_, n)| n)
            .collect()
    }

    pub fn take(&self) -> Vec<(ResourceKey, Notification)> {
        match self.entries.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Observer for NotificationLog {
    fn observe(&self, source: &ResourceKey, notification: &Notification) {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push((source.clone(), notification.clone()));
    }
}
