//! Domain model and record key layout
//!
//! The persisted shapes shared by every barrel process. Records are
//! JSON-encoded under the `/barrel/...` namespace; the key layout is a
//! compatibility surface and must not change.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use barrel_store::StoreRecord;

/// Composite natural identity of a fixed address.
///
/// Never empty in a persisted record; an empty `pool_id` is only legal
/// for pool-less deployments and changes the record key shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ip {
    /// Pool the address belongs to
    pub pool_id: String,
    /// The address itself
    pub address: String,
}

impl Ip {
    /// Create an identity from its parts.
    pub fn new(pool_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            address: address.into(),
        }
    }

    /// Store key of the IP record for this identity.
    pub fn record_key(&self) -> String {
        if self.pool_id.is_empty() {
            format!("/barrel/addresses/{}", self.address)
        } else {
            format!("/barrel/pools/{}/addresses/{}", self.pool_id, self.address)
        }
    }
}

impl std::fmt::Display for Ip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.pool_id.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{}/{}", self.pool_id, self.address)
        }
    }
}

bitflags! {
    /// Status bits of a fixed address record.
    #[derive(Copy, Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
    pub struct IpStatus: u8 {
        /// The address is currently assigned to a live consumer.
        const IN_USE = 1 << 0;
        /// Tombstone marker written just before deletion.
        const RETIRED = 1 << 1;
    }
}

impl IpStatus {
    /// Whether the address is assigned to a live consumer.
    pub fn is_in_use(&self) -> bool {
        self.contains(IpStatus::IN_USE)
    }

    /// Whether the record is tombstoned for deletion.
    pub fn is_retired(&self) -> bool {
        self.contains(IpStatus::RETIRED)
    }
}

impl Default for IpStatus {
    fn default() -> Self {
        IpStatus::empty()
    }
}

/// A container identity as seen by the allocation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container ID
    pub id: String,
    /// Host the container runs on
    pub host_name: String,
}

impl Container {
    /// Create a container identity.
    pub fn new(id: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host_name: host_name.into(),
        }
    }
}

/// Persisted state of a fixed-allocated address.
///
/// A record exists for an identity iff the address is fixed-allocated;
/// absence means "unallocated" and is not an error by itself. The
/// version token travels alongside the decoded record, never inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpRecord {
    /// Pool the address belongs to (identity, immutable)
    pub pool_id: String,
    /// The address (identity, immutable)
    pub address: String,
    /// Status bits
    #[serde(default)]
    pub status: IpStatus,
    /// Ordered multiset of non-owning holders; duplicate equal entries
    /// are kept as-is.
    #[serde(default)]
    pub borrowers: Vec<Container>,
}

impl IpRecord {
    /// Fresh record for a newly fixed-allocated address: both status
    /// bits clear, no borrowers.
    pub fn new(ip: Ip) -> Self {
        Self {
            pool_id: ip.pool_id,
            address: ip.address,
            status: IpStatus::empty(),
            borrowers: Vec::new(),
        }
    }

    /// The identity this record describes.
    pub fn ip(&self) -> Ip {
        Ip::new(self.pool_id.clone(), self.address.clone())
    }
}

impl StoreRecord for IpRecord {
    fn key(&self) -> String {
        self.ip().record_key()
    }
}

/// An endpoint attachment recorded on a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Network the endpoint belongs to
    pub network_id: String,
    /// Endpoint ID within the network
    pub endpoint_id: String,
    /// Address bound to the endpoint
    pub address: String,
}

/// Per-container tracking record.
///
/// CRUD belongs to the caller layer (proxy handlers, reconciliation
/// agent); the allocation engine never mutates it. It lives here so that
/// every process derives the same key and document shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    /// The container this record tracks
    pub container: Container,
    /// Endpoint attachments
    #[serde(default)]
    pub networks: Vec<Network>,
    /// Fixed addresses reserved for this container
    #[serde(default)]
    pub addresses: Vec<Ip>,
}

impl ContainerRecord {
    /// Fresh tracking record with no attachments or addresses.
    pub fn new(container: Container) -> Self {
        Self {
            container,
            networks: Vec::new(),
            addresses: Vec::new(),
        }
    }
}

impl StoreRecord for ContainerRecord {
    fn key(&self) -> String {
        format!(
            "/barrel/hosts/{}/containers/{}",
            self.container.host_name, self.container.id
        )
    }
}
