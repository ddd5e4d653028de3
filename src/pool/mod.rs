//! Resource allocation pools.
//!
//! Three pools hand out unique values per fabric and per category:
//! ASNs (categorized by device role), single IP addresses (categorized by
//! address type) and IP pairs for point-to-point links. All three share
//! [`ResourcePool`]; the differences live in [`PoolKind`].

pub mod expand;
pub mod repository;
pub mod resource_pool;
pub mod types;

// Re-export commonly used types
pub use repository::{InMemoryPoolRepository, PoolRepository, RepositoryError};
pub use resource_pool::{AsnPool, IpPairPool, IpPool, ResourcePool};
pub use types::{AsnKind, DeviceId, FabricId, InterfaceId, IpBinding, IpKind, IpPairKind, PairBinding, PoolKind};

use serde::{Deserialize, Serialize};

/// Pool failures
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("{pool} Pool Initialization Failed for {noun} {category}: {reason}")]
    InitializationFailed {
        pool: &'static str,
        noun: &'static str,
        category: String,
        reason: String,
    },
    #[error("{pool} Exhausted for {fabric_id}")]
    Exhausted { pool: &'static str, fabric_id: FabricId },
    #[error("{pool} not present in the Used {pool} Table for Fabric {fabric_id} {owner}")]
    NotAllocated {
        pool: &'static str,
        fabric_id: FabricId,
        owner: String,
    },
    #[error("{0}")]
    ReservationMismatch(String),
    #[error("{pool} already allocated for Fabric {fabric_id} {owner}")]
    BindingOccupied {
        pool: &'static str,
        fabric_id: FabricId,
        owner: String,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// One range to load into a pool
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PoolRange {
    pub category: String,
    pub range: String,
    #[serde(default)]
    pub allow_small: bool,
}

/// Ranges of every pool of a fabric
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PoolSettings {
    pub asn: Vec<PoolRange>,
    pub ip: Vec<PoolRange>,
    pub ip_pair: Vec<PoolRange>,
}

/// The three pools of a fabric
#[derive(Default)]
pub struct FabricPools {
    pub asn: AsnPool,
    pub ip: IpPool,
    pub ip_pair: IpPairPool,
}

impl FabricPools {
    /// Populate every configured range; stops at the first failing range
    pub fn populate(&self, fabric_id: FabricId, settings: &PoolSettings) -> Result<(), PoolError> {
        for range in &settings.asn {
            self.asn.populate(fabric_id, &range.range, &range.category, range.allow_small)?;
        }
        for range in &settings.ip {
            self.ip.populate(fabric_id, &range.range, &range.category, range.allow_small)?;
        }
        for range in &settings.ip_pair {
            self.ip_pair.populate(fabric_id, &range.range, &range.category, range.allow_small)?;
        }
        Ok(())
    }

    pub fn teardown(&self, fabric_id: FabricId) -> Result<(), PoolError> {
        self.asn.teardown(fabric_id)?;
        self.ip.teardown(fabric_id)?;
        self.ip_pair.teardown(fabric_id)
    }
}
