//! Live session registry
//!
//! Bookkeeping only: which charge point ids are connected, over which
//! subprotocol and since when. Session state itself never lives here.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

/// One admitted connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Distinguishes reconnects of the same charge point
    pub connection_id: u64,
    pub charge_point_id: String,
    pub subprotocol: String,
    pub remote_addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

/// Thread-safe registry of admitted sessions
pub struct SessionRegistry {
    sessions: DashMap<String, ConnectionInfo>,
    next_connection_id: AtomicU64,
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    /// Record an admitted connection and return its connection id.
    ///
    /// A second connection under the same charge point id replaces the
    /// bookkeeping entry; both sessions keep running independently.
    pub fn register(
        &self,
        charge_point_id: &str,
        subprotocol: &str,
        remote_addr: Option<SocketAddr>,
    ) -> u64 {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let info = ConnectionInfo {
            connection_id,
            charge_point_id: charge_point_id.to_string(),
            subprotocol: subprotocol.to_string(),
            remote_addr,
            connected_at: Utc::now(),
        };

        if let Some(previous) = self.sessions.insert(charge_point_id.to_string(), info) {
            warn!(
                charge_point_id,
                previous_connection = previous.connection_id,
                connection_id,
                "Charge point reconnected while a session was still open"
            );
        } else {
            info!(charge_point_id, subprotocol, connection_id, "Session registered");
        }

        metrics::gauge!("ocpp_sessions_active").set(self.sessions.len() as f64);
        connection_id
    }

    /// Remove the entry if it still belongs to `connection_id`.
    pub fn unregister(&self, charge_point_id: &str, connection_id: u64) {
        let removed = self
            .sessions
            .remove_if(charge_point_id, |_, info| info.connection_id == connection_id);

        if removed.is_some() {
            info!(charge_point_id, connection_id, "Session unregistered");
        }
        metrics::gauge!("ocpp_sessions_active").set(self.sessions.len() as f64);
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.sessions.contains_key(charge_point_id)
    }

    pub fn get(&self, charge_point_id: &str) -> Option<ConnectionInfo> {
        self.sessions.get(charge_point_id).map(|e| e.value().clone())
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
