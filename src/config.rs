//! Fabric description file.
//!
//! A fabric file names the fabric, the pool ranges to load, the desired
//! state of every switch and the MCT clusters to delete, update or create.
//! [`FabricConfig::allocate`] turns it into a [`ConfigFabricRequest`],
//! drawing ASNs and loopback addresses the file leaves unset.

use crate::actions::{PollSettings, MAX_CLUSTER_MEMBERS};
use crate::model::{ClusterBatches, ConfigFabricRequest, ConfigSwitch, FabricType, InterfaceType};
use crate::pool::expand::{expand_asn_range, expand_ip_pairs, expand_ipv4_range};
use crate::pool::{FabricId, FabricPools, IpBinding, PoolError, PoolSettings};
use ipnet::Ipv4Net;
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Pool category loopback addresses are drawn from
pub const LOOPBACK_CATEGORY: &str = "Loopback";

const MAC_PATTERN: &str = r"^[0-9a-fA-F]{4}\.[0-9a-fA-F]{4}\.[0-9a-fA-F]{4}$";

/// Top-level structure of a fabric file
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FabricConfig {
    pub settings: FabricSettings,
    #[serde(default)]
    pub pools: PoolSettings,
    pub switches: Vec<ConfigSwitch>,
    #[serde(default)]
    pub clusters: ClusterBatches,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FabricSettings {
    pub name: String,
    #[serde(default = "default_fabric_id")]
    pub id: FabricId,
    #[serde(default)]
    pub fabric_type: FabricType,
    /// Delay between management cluster status queries
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub cluster_poll_interval: Duration,
    /// Give up waiting for the management cluster after this long
    #[serde(with = "humantime_serde", default = "default_poll_timeout")]
    pub cluster_poll_timeout: Duration,
}

fn default_fabric_id() -> FabricId {
    1
}

fn default_poll_interval() -> Duration {
    PollSettings::default().interval
}

fn default_poll_timeout() -> Duration {
    PollSettings::default().timeout
}

impl FabricConfig {
    /// Validate the fabric file
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.settings.name.is_empty() {
            return Err(ValidationError::InvalidSettings("fabric name cannot be empty".to_string()));
        }
        if self.settings.cluster_poll_interval.is_zero()
            || self.settings.cluster_poll_interval > self.settings.cluster_poll_timeout
        {
            return Err(ValidationError::InvalidSettings(format!(
                "cluster_poll_interval {:?} must be non-zero and not exceed cluster_poll_timeout {:?}",
                self.settings.cluster_poll_interval, self.settings.cluster_poll_timeout
            )));
        }

        self.validate_pools()?;
        self.validate_switches()?;
        self.validate_clusters()?;
        Ok(())
    }

    fn validate_pools(&self) -> Result<(), ValidationError> {
        let pools = &self.pools;
        for range in &pools.asn {
            expand_asn_range(&range.range).map_err(|e| ValidationError::InvalidPool(format!("ASN {}: {}", range.category, e)))?;
        }
        for range in &pools.ip {
            expand_ipv4_range(&range.range, range.allow_small)
                .map_err(|e| ValidationError::InvalidPool(format!("IP {}: {}", range.category, e)))?;
        }
        for range in &pools.ip_pair {
            expand_ip_pairs(&range.range, range.allow_small)
                .map_err(|e| ValidationError::InvalidPool(format!("IP pair {}: {}", range.category, e)))?;
        }
        Ok(())
    }

    fn validate_switches(&self) -> Result<(), ValidationError> {
        let mac = Regex::new(MAC_PATTERN).map_err(|e| ValidationError::InvalidSettings(e.to_string()))?;
        let mut hosts = HashSet::new();

        for sw in &self.switches {
            let invalid = |reason: String| ValidationError::InvalidSwitch {
                host: sw.host.clone(),
                reason,
            };
            if sw.host.is_empty() {
                return Err(invalid("host cannot be empty".to_string()));
            }
            if !hosts.insert(sw.host.as_str()) {
                return Err(invalid("host is listed more than once".to_string()));
            }

            if sw.overlay.enabled {
                if !mac.is_match(&sw.overlay.anycast_mac) {
                    return Err(invalid(format!("anycast_mac {:?} is not of the form xxxx.xxxx.xxxx", sw.overlay.anycast_mac)));
                }
                if !sw.overlay.ipv6_anycast_mac.is_empty() && !mac.is_match(&sw.overlay.ipv6_anycast_mac) {
                    return Err(invalid(format!(
                        "ipv6_anycast_mac {:?} is not of the form xxxx.xxxx.xxxx",
                        sw.overlay.ipv6_anycast_mac
                    )));
                }
            }

            for intf in &sw.interfaces {
                if intf.donor.is_none() && !intf.ip.is_empty() && intf.ip.parse::<Ipv4Net>().is_err() {
                    return Err(invalid(format!(
                        "interface {} {} has malformed address {}",
                        intf.interface_type, intf.name, intf.ip
                    )));
                }
                if intf.interface_type != InterfaceType::Loopback && intf.donor.is_none() && intf.ip.is_empty() {
                    return Err(invalid(format!(
                        "interface {} {} needs an address or a donor",
                        intf.interface_type, intf.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_clusters(&self) -> Result<(), ValidationError> {
        let clusters = &self.clusters;
        for cluster in clusters.delete.iter().chain(&clusters.update).chain(&clusters.create) {
            let invalid = |reason: String| ValidationError::InvalidCluster {
                name: cluster.name.clone(),
                reason,
            };
            if cluster.name.is_empty() {
                return Err(invalid("cluster name cannot be empty".to_string()));
            }
            if cluster.members.is_empty() {
                return Err(invalid("cluster has no member nodes".to_string()));
            }
            if cluster.members.len() > MAX_CLUSTER_MEMBERS {
                return Err(invalid(format!(
                    "Management cluster is supported for a maximum of {} nodes",
                    MAX_CLUSTER_MEMBERS
                )));
            }
        }
        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.settings.cluster_poll_interval,
            timeout: self.settings.cluster_poll_timeout,
        }
    }

    /// Load the configured ranges into `pools` and build the request.
    ///
    /// Switches are numbered from 1 in file order. A zero `local_asn` is drawn
    /// from the ASN pool of the switch's role, a non-zero one is reserved.
    /// Loopbacks without an address get one from the `Loopback` IP pool.
    pub fn allocate(&self, pools: &FabricPools) -> Result<ConfigFabricRequest, PoolError> {
        let fabric_id = self.settings.id;
        let fabric_name = &self.settings.name;
        pools.populate(fabric_id, &self.pools)?;

        let mut switches = self.switches.clone();
        for (index, sw) in switches.iter_mut().enumerate() {
            let device_id = index as u32 + 1;
            let category = sw.role.as_category();
            if sw.fabric.is_empty() {
                sw.fabric = fabric_name.clone();
            }

            if sw.bgp.local_asn == 0 {
                sw.bgp.local_asn = pools.asn.get_next(fabric_id, category, device_id)?;
            } else {
                pools.asn.reserve(fabric_id, category, device_id, sw.bgp.local_asn)?;
            }

            for (position, intf) in sw.interfaces.iter_mut().enumerate() {
                if intf.interface_type != InterfaceType::Loopback || !intf.ip.is_empty() {
                    continue;
                }
                let interface_id = intf.name.parse().unwrap_or(position as u32);
                let binding = IpBinding::new(device_id, interface_id);
                let address = pools.ip.get_next(fabric_id, LOOPBACK_CATEGORY, binding)?;
                intf.ip = format!("{}/32", address);
            }

            for cluster in [&mut sw.configure_mct_neighbors, &mut sw.unconfigure_mct_neighbors] {
                if cluster.fabric_name.is_empty() {
                    cluster.fabric_name = fabric_name.clone();
                }
            }
            info!("[{}] {} with ASN {}", sw.host, sw.role, sw.bgp.local_asn);
        }

        let mut clusters = self.clusters.clone();
        for cluster in clusters
            .delete
            .iter_mut()
            .chain(clusters.update.iter_mut())
            .chain(clusters.create.iter_mut())
        {
            if cluster.fabric_name.is_empty() {
                cluster.fabric_name = fabric_name.clone();
            }
        }

        Ok(ConfigFabricRequest {
            fabric_name: fabric_name.clone(),
            fabric_type: self.settings.fabric_type,
            switches,
            clusters,
        })
    }
}

/// Fabric file validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid fabric settings: {0}")]
    InvalidSettings(String),
    #[error("Invalid pool range: {0}")]
    InvalidPool(String),
    #[error("Invalid switch {host}: {reason}")]
    InvalidSwitch { host: String, reason: String },
    #[error("Invalid cluster {name}: {reason}")]
    InvalidCluster { name: String, reason: String },
}
