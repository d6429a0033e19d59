//! Session registry.
//!
//! Maps session keys to parked session records so a session outlives the
//! controller that created it. The registry is an explicit, cloneable
//! handle shared by every controller on the same event loop; it performs no
//! I/O and keeps at most one record per key.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info};

use shellmux_core::key::SessionKey;

use crate::connection::Connection;
use crate::terminal::TerminalSurface;

/// A parked session: its surface, its socket (if any), and whether it was
/// connected when parked.
pub struct SessionRecord {
    pub key: SessionKey,
    pub surface: TerminalSurface,
    pub connection: Option<Connection>,
    pub connected: bool,
}

/// Outcome of a checkout: a surface made for this mount, or a parked
/// session taken over from the registry.
pub enum SessionSlot {
    Fresh(TerminalSurface),
    Reused(SessionRecord),
}

/// Shared map of parked sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    records: Rc<RefCell<HashMap<SessionKey, SessionRecord>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the record parked under `key`, or build a fresh surface.
    ///
    /// A reused record leaves the registry; the caller owns it until it is
    /// parked again with [`put`](Self::put).
    pub fn checkout(&self, key: &SessionKey, create: impl FnOnce() -> TerminalSurface) -> SessionSlot {
        let parked = self.records.borrow_mut().remove(key);
        match parked {
            Some(record) => {
                debug!(key = %key, connected = record.connected, "reusing parked session");
                SessionSlot::Reused(record)
            }
            None => SessionSlot::Fresh(create()),
        }
    }

    /// Park a record. An existing record under the same key is replaced,
    /// and its socket and surface are released.
    pub fn put(&self, record: SessionRecord) {
        debug!(key = %record.key, connected = record.connected, "parking session");
        let replaced = self.records.borrow_mut().insert(record.key.clone(), record);
        if let Some(old) = replaced {
            debug!(key = %old.key, "replaced parked session");
            if let Some(connection) = &old.connection {
                connection.close("session replaced");
            }
            old.surface.dispose();
        }
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.records.borrow().contains_key(key)
    }

    /// Whether the record under `key` was connected when parked.
    pub fn is_connected(&self, key: &SessionKey) -> Option<bool> {
        self.records.borrow().get(key).map(|r| r.connected)
    }

    /// Remove every record whose key matches `predicate`. Returns how many
    /// were removed.
    ///
    /// Removed records are dropped after the registry borrow ends, so their
    /// sockets close without holding the map.
    pub fn remove_matching(&self, mut predicate: impl FnMut(&SessionKey) -> bool) -> usize {
        let removed: Vec<SessionRecord> = {
            let mut records = self.records.borrow_mut();
            let keys: Vec<SessionKey> = records.keys().filter(|k| predicate(k)).cloned().collect();
            keys.iter().filter_map(|k| records.remove(k)).collect()
        };
        let count = removed.len();
        for record in removed {
            if let Some(connection) = &record.connection {
                connection.close("session purged");
            }
            record.surface.dispose();
        }
        count
    }

    /// Remove every record belonging to `project`.
    pub fn purge_project(&self, project: &str) -> usize {
        let count = self.remove_matching(|key| key.belongs_to(project));
        if count > 0 {
            info!(project, count, "purged parked sessions");
        }
        count
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        self.records.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}
