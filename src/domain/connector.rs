//! Connectors of a single charging station and their availability.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Connector availability as reported through StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Available,
    Occupied,
    Reserved,
    Unavailable,
    Faulted,
}

impl Default for ConnectorStatus {
    fn default() -> Self {
        Self::Available
    }
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "Available",
            Self::Occupied => "Occupied",
            Self::Reserved => "Reserved",
            Self::Unavailable => "Unavailable",
            Self::Faulted => "Faulted",
        };
        f.write_str(s)
    }
}

/// An addressable charging connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    pub id: u32,
    pub status: ConnectorStatus,
    pub metadata: Option<String>,
}

impl Connector {
    pub fn new(id: u32, status: ConnectorStatus) -> Self {
        Self {
            id,
            status,
            metadata: None,
        }
    }
}

/// Per-session connector inventory, keyed and ordered by connector id.
///
/// Never shared between sessions: each session builds its own with
/// [`ConnectorRegistry::initialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<u32, Connector>,
}

impl ConnectorRegistry {
    /// Seed ids `1..=count`, all `Available`.
    pub fn initialize(count: u32) -> Self {
        let connectors = (1..=count)
            .map(|id| (id, Connector::new(id, ConnectorStatus::Available)))
            .collect();
        Self { connectors }
    }

    /// Lowest-id connector that is currently `Available`.
    ///
    /// Pure read: picking a connector does not occupy it.
    pub fn find_available(&self) -> Option<&Connector> {
        self.connectors
            .values()
            .find(|c| c.status == ConnectorStatus::Available)
    }

    /// Set the status of `id`, creating the connector if it is new.
    pub fn set_status(&mut self, id: u32, status: ConnectorStatus) {
        self.connectors
            .entry(id)
            .and_modify(|c| c.status = status)
            .or_insert_with(|| Connector::new(id, status));
    }

    pub fn get(&self, id: u32) -> Option<&Connector> {
        self.connectors.get(&id)
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connector> {
        self.connectors.values()
    }
}
