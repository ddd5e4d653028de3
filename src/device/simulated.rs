//! In-memory switch fabric implementing [`DeviceAdapter`].
//!
//! Every switch keeps the configuration objects the orchestrator touches and
//! an ordered journal of the operations it received. Faults can be injected
//! per host (login failure, failure of a named operation) and switches can be
//! seeded with pre-existing state such as a foreign overlay gateway.

use super::adapter::{Credentials, DeviceAdapter, DeviceSession};
use super::operations::{
    ClusterState, DeviceOperation, DeviceResponse, ManagementClusterMember, ManagementClusterStatus,
};
use super::DeviceError;
use crate::model::EvpnSettings;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct InterfaceRecord {
    pub address: Option<String>,
    pub donor: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct PortChannel {
    pub speed: String,
    pub members: BTreeSet<String>,
}

/// State of one simulated switch
#[derive(Debug, Serialize, Clone, Default)]
pub struct SimulatedSwitch {
    pub l2_mtu: Option<u32>,
    pub ip_mtu: Option<u32>,
    pub anycast_mac: Option<String>,
    pub interfaces: BTreeMap<String, InterfaceRecord>,
    pub route_map: bool,
    pub local_asn: Option<u32>,
    pub bgp_neighbors: BTreeSet<String>,
    pub router_id: Option<String>,
    pub l2evpn_neighbors: BTreeSet<String>,
    pub encapsulation: String,
    pub mac_and_arp: Option<EvpnSettings>,
    pub evpn_instance: Option<String>,
    pub overlay_gateway: Option<String>,
    pub saved: bool,
    pub node_id: Option<u32>,
    pub control_vlans: BTreeMap<u16, Option<u16>>,
    pub ves: BTreeMap<u16, Option<String>>,
    pub port_channels: BTreeMap<String, PortChannel>,
    pub routes: BTreeSet<(String, String)>,
    pub cluster: Option<ClusterState>,
    pub cluster_deployed: bool,
    pub journal: Vec<DeviceOperation>,
    #[serde(skip)]
    fail_login: bool,
    #[serde(skip)]
    fail_operations: BTreeSet<String>,
    #[serde(skip)]
    status_override: Option<ManagementClusterStatus>,
}

impl SimulatedSwitch {
    fn new() -> Self {
        Self {
            encapsulation: "vxlan".to_string(),
            ..Default::default()
        }
    }
}

/// Pre-existing state loaded into a switch before a run
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct SwitchSeed {
    pub overlay_gateway: Option<String>,
    pub evpn_instance: Option<String>,
    pub anycast_mac: Option<String>,
    pub bgp_neighbors: Vec<String>,
    pub cluster: Option<ClusterState>,
    pub fail_login: bool,
    pub fail_operations: Vec<String>,
}

/// Shared handle on a set of simulated switches
#[derive(Debug, Clone, Default)]
pub struct SimulatedFabric {
    switches: Arc<Mutex<BTreeMap<String, SimulatedSwitch>>>,
}

impl SimulatedFabric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_switches<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fabric = Self::new();
        for host in hosts {
            fabric.add_switch(host);
        }
        fabric
    }

    fn state(&self) -> MutexGuard<'_, BTreeMap<String, SimulatedSwitch>> {
        self.switches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_switch<T>(&self, host: &str, f: impl FnOnce(&mut SimulatedSwitch) -> T) -> Option<T> {
        self.state().get_mut(host).map(f)
    }

    pub fn add_switch(&self, host: impl Into<String>) {
        self.state().entry(host.into()).or_insert_with(SimulatedSwitch::new);
    }

    pub fn hosts(&self) -> Vec<String> {
        self.state().keys().cloned().collect()
    }

    /// Apply pre-existing state, creating the switch if needed
    pub fn seed(&self, host: &str, seed: SwitchSeed) {
        self.add_switch(host);
        self.with_switch(host, |sw| {
            if seed.overlay_gateway.is_some() {
                sw.overlay_gateway = seed.overlay_gateway;
            }
            if seed.evpn_instance.is_some() {
                sw.evpn_instance = seed.evpn_instance;
            }
            if seed.anycast_mac.is_some() {
                sw.anycast_mac = seed.anycast_mac;
            }
            sw.bgp_neighbors.extend(seed.bgp_neighbors);
            if let Some(cluster) = seed.cluster {
                sw.cluster = Some(cluster);
                sw.cluster_deployed = true;
            }
            sw.fail_login |= seed.fail_login;
            sw.fail_operations.extend(seed.fail_operations);
        });
    }

    pub fn fail_login(&self, host: &str) {
        self.with_switch(host, |sw| sw.fail_login = true);
    }

    /// Make every call of the named operation fail on `host`
    pub fn fail_operation(&self, host: &str, operation: &str) {
        self.with_switch(host, |sw| {
            sw.fail_operations.insert(operation.to_string());
        });
    }

    /// Report a fixed management cluster status from `host`
    pub fn set_cluster_status(&self, host: &str, status: ManagementClusterStatus) {
        self.with_switch(host, |sw| sw.status_override = Some(status));
    }

    pub fn switch(&self, host: &str) -> Option<SimulatedSwitch> {
        self.state().get(host).cloned()
    }

    pub fn journal(&self, host: &str) -> Vec<DeviceOperation> {
        self.state().get(host).map(|sw| sw.journal.clone()).unwrap_or_default()
    }

    pub fn overlay_gateway(&self, host: &str) -> Option<String> {
        self.state().get(host).and_then(|sw| sw.overlay_gateway.clone())
    }

    fn execute(&self, host: &str, operation: DeviceOperation) -> Result<DeviceResponse, DeviceError> {
        let name = operation.name();
        let mut switches = self.state();

        let status = match operation {
            DeviceOperation::GetManagementClusterStatus => Some(cluster_status(&switches, host)),
            _ => None,
        };

        let sw = switches.get_mut(host).ok_or_else(|| DeviceError::Rejected {
            operation: name,
            reason: format!("unknown host {}", host),
        })?;
        sw.journal.push(operation.clone());
        debug!("[{}] {}", host, name);

        if sw.fail_operations.contains(name) {
            return Err(DeviceError::Rejected {
                operation: name,
                reason: "injected failure".to_string(),
            });
        }

        if let Some(status) = status {
            return Ok(DeviceResponse::ClusterStatus(status));
        }

        apply(sw, operation).map_err(|reason| DeviceError::Rejected { operation: name, reason })
    }
}

fn cluster_status(switches: &BTreeMap<String, SimulatedSwitch>, host: &str) -> ManagementClusterStatus {
    let Some(sw) = switches.get(host) else {
        return ManagementClusterStatus::default();
    };
    if let Some(status) = &sw.status_override {
        return status.clone();
    }

    let mut members: Vec<String> = match (&sw.cluster, sw.cluster_deployed) {
        (Some(cluster), true) => switches
            .iter()
            .filter(|(_, peer)| {
                peer.cluster_deployed
                    && peer
                        .cluster
                        .as_ref()
                        .map(|c| c.name == cluster.name && c.id == cluster.id)
                        .unwrap_or(false)
            })
            .map(|(peer_host, _)| peer_host.clone())
            .collect(),
        _ => vec![host.to_string()],
    };
    members.sort();

    ManagementClusterStatus {
        members: members
            .iter()
            .enumerate()
            .map(|(index, mgmt_ip)| ManagementClusterMember {
                mgmt_ip: mgmt_ip.clone(),
                is_principal: index == 0,
            })
            .collect(),
    }
}

fn missing(what: impl std::fmt::Display) -> String {
    format!("{} is not configured", what)
}

fn apply(sw: &mut SimulatedSwitch, operation: DeviceOperation) -> Result<DeviceResponse, String> {
    use DeviceOperation::*;

    match operation {
        ConfigureSystemL2Mtu { mtu } => sw.l2_mtu = Some(mtu),
        ConfigureSystemIpMtu { mtu } => sw.ip_mtu = Some(mtu),
        GetAnycastGateway => return Ok(DeviceResponse::Named(sw.anycast_mac.clone())),
        ConfigureAnycastGateway { ipv4_mac, .. } => sw.anycast_mac = Some(ipv4_mac),
        UnconfigureAnycastGateway => {
            sw.anycast_mac.take().ok_or_else(|| missing("anycast gateway"))?;
        }

        ConfigureInterfaceLoopback { name, ip } => {
            sw.interfaces.entry(format!("loopback {}", name)).or_default().address = Some(ip);
        }
        DeleteInterfaceLoopback { name } => {
            let record = sw
                .interfaces
                .get_mut(&format!("loopback {}", name))
                .ok_or_else(|| missing(format!("loopback {}", name)))?;
            record.address = None;
        }
        ConfigureInterfaceNumbered { interface_type, name, ip, .. } => {
            let record = sw.interfaces.entry(format!("{} {}", interface_type, name)).or_default();
            if let Some(donor) = &record.donor {
                return Err(format!("{} {} is unnumbered from {}", interface_type, name, donor));
            }
            record.address = Some(ip);
        }
        UnconfigureInterfaceNumbered { interface_type, name, ip } => {
            let record = sw
                .interfaces
                .get_mut(&format!("{} {}", interface_type, name))
                .filter(|r| r.address.as_deref() == Some(ip.as_str()))
                .ok_or_else(|| missing(format!("address {} on {} {}", ip, interface_type, name)))?;
            record.address = None;
        }
        ConfigureInterfaceUnnumbered { interface_type, name, donor_type, donor_name } => {
            let record = sw.interfaces.entry(format!("{} {}", interface_type, name)).or_default();
            record.address = None;
            record.donor = Some(format!("{} {}", donor_type, donor_name));
        }
        UnconfigureInterfaceUnnumbered { interface_type, name } => {
            if let Some(record) = sw.interfaces.get_mut(&format!("{} {}", interface_type, name)) {
                record.donor = None;
            }
        }
        GetInterface { interface_type, name } => {
            let address = sw
                .interfaces
                .get(&format!("{} {}", interface_type, name))
                .and_then(|r| r.address.clone());
            return Ok(DeviceResponse::Address(address));
        }

        ConfigureNumberedRouteMap => sw.route_map = true,
        ConfigureRouterBgp(bgp) => sw.local_asn = Some(bgp.local_asn),
        ConfigureNonClosRouterBgp(bgp) => sw.local_asn = Some(bgp.local_asn),
        ConfigureRouterBgpNeighbor(neighbor) => {
            sw.bgp_neighbors.insert(neighbor.address);
        }
        ConfigureNonClosEvpnNeighbor { address, .. } => {
            sw.bgp_neighbors.insert(address);
        }
        UnconfigureRouterBgpNeighbor { address, .. } => {
            if !sw.bgp_neighbors.remove(&address) {
                return Err(missing(format!("neighbor {}", address)));
            }
        }
        ConfigureRouterId { router_id } => {
            if router_id.is_empty() {
                return Err("router-id cannot be empty".to_string());
            }
            sw.router_id = Some(router_id);
        }
        GetRouterBgp => {
            let neighbors = sw.bgp_neighbors.union(&sw.l2evpn_neighbors).cloned().collect();
            return Ok(DeviceResponse::Neighbors(neighbors));
        }

        GetL2EvpnNeighborEncapType => return Ok(DeviceResponse::Text(sw.encapsulation.clone())),
        ConfigureL2EvpnNeighbor { peer_ip, peer_loopback_ip, encapsulation, .. } => {
            sw.l2evpn_neighbors.insert(peer_ip);
            sw.l2evpn_neighbors.insert(peer_loopback_ip);
            if !encapsulation.is_empty() {
                sw.encapsulation = encapsulation;
            }
        }
        UnconfigureL2EvpnNeighbor { peer_ip, peer_loopback_ip } => {
            let removed_ip = sw.l2evpn_neighbors.remove(&peer_ip);
            let removed_loopback = sw.l2evpn_neighbors.remove(&peer_loopback_ip);
            if !removed_ip && !removed_loopback {
                return Err(missing(format!("L2 EVPN neighbor {}", peer_ip)));
            }
        }

        ConfigureMacAndArp(settings) => sw.mac_and_arp = Some(settings),
        GetEvpnInstance => return Ok(DeviceResponse::Named(sw.evpn_instance.clone())),
        CreateEvpnInstance { name, .. } => {
            if let Some(existing) = sw.evpn_instance.as_ref().filter(|e| **e != name) {
                return Err(format!("EVPN instance {} exists", existing));
            }
            sw.evpn_instance = Some(name);
        }
        DeleteEvpnInstance { name } => {
            if sw.evpn_instance.as_deref() != Some(name.as_str()) {
                return Err(missing(format!("EVPN instance {}", name)));
            }
            sw.evpn_instance = None;
        }
        ClearBgpEvpnNeighborAll => {}

        GetOverlayGateway => return Ok(DeviceResponse::Named(sw.overlay_gateway.clone())),
        CreateOverlayGateway { name, .. } => {
            if let Some(existing) = sw.overlay_gateway.as_ref().filter(|e| **e != name) {
                return Err(format!("overlay gateway {} exists", existing));
            }
            sw.overlay_gateway = Some(name);
        }
        DeleteOverlayGateway { name } => {
            if sw.overlay_gateway.as_deref() != Some(name.as_str()) {
                return Err(missing(format!("overlay gateway {}", name)));
            }
            sw.overlay_gateway = None;
        }

        PersistConfig => sw.saved = true,

        ConfigureNodeId { node_id } => sw.node_id = Some(node_id),
        UnconfigureNodePrincipalPriority { .. } => {}
        CreateClusterControlVlan { vlan, ve, .. } => {
            sw.control_vlans.insert(vlan, Some(ve));
            sw.ves.entry(ve).or_insert(None);
        }
        GetClusterControlVlan { vlan } => {
            let ve = sw.control_vlans.get(&vlan).copied().flatten();
            return Ok(DeviceResponse::ControlVe(ve));
        }
        DeleteClusterControlVe { vlan, ve } => {
            let bound = sw
                .control_vlans
                .get_mut(&vlan)
                .filter(|bound| **bound == Some(ve))
                .ok_or_else(|| missing(format!("VE {} on VLAN {}", ve, vlan)))?;
            *bound = None;
        }
        DeleteClusterControlVlan { vlan } => {
            sw.control_vlans.remove(&vlan).ok_or_else(|| missing(format!("VLAN {}", vlan)))?;
        }
        CreateInterfacePo { name, speed, .. } => {
            sw.port_channels.entry(name).or_default().speed = speed;
        }
        AddInterfaceToPo { member, port_channel, .. } => {
            let po = sw
                .port_channels
                .get_mut(&port_channel)
                .ok_or_else(|| missing(format!("port-channel {}", port_channel)))?;
            po.members.insert(member);
        }
        DeleteInterfaceFromPo { member, port_channel } => {
            let removed = sw
                .port_channels
                .get_mut(&port_channel)
                .map(|po| po.members.remove(&member))
                .unwrap_or(false);
            if !removed {
                return Err(missing(format!("member {} of port-channel {}", member, port_channel)));
            }
        }
        ConfigureInterfacePoSpeed { port_channel, speed } => {
            let po = sw
                .port_channels
                .get_mut(&port_channel)
                .ok_or_else(|| missing(format!("port-channel {}", port_channel)))?;
            po.speed = speed;
        }
        DeleteInterfacePo { name } => {
            sw.port_channels.remove(&name).ok_or_else(|| missing(format!("port-channel {}", name)))?;
        }
        ConfigureInterfaceVe { ve, ip, .. } | ConfigureInterfaceVeIp { ve, ip } => {
            sw.ves.insert(ve, Some(ip));
        }
        GetInterfaceVe { ve } => {
            return Ok(DeviceResponse::Address(sw.ves.get(&ve).cloned().flatten()));
        }
        UnconfigureInterfaceVeIp { ve, ip } => {
            let address = sw
                .ves
                .get_mut(&ve)
                .filter(|address| address.as_deref() == Some(ip.as_str()))
                .ok_or_else(|| missing(format!("address {} on VE {}", ip, ve)))?;
            *address = None;
        }
        DeleteInterfaceVe { ve } => {
            sw.ves.remove(&ve).ok_or_else(|| missing(format!("VE {}", ve)))?;
        }
        ConfigureIpRoute { prefix, next_hop } => {
            sw.routes.insert((prefix, next_hop));
        }
        DeconfigureIpRoute { prefix, next_hop } => {
            if !sw.routes.remove(&(prefix.clone(), next_hop)) {
                return Err(missing(format!("route {}", prefix)));
            }
        }
        CreateCluster { name, id, peer_interface_type, peer_interface_name, peer_ip } => {
            if let Some(existing) = sw.cluster.as_ref().filter(|c| c.name != name || c.id != id) {
                return Err(format!("cluster {} {} exists", existing.name, existing.id));
            }
            sw.cluster = Some(ClusterState {
                name,
                id,
                control_vlan: None,
                peer_interface_type,
                peer_interface_name,
                peer_ip,
            });
            sw.cluster_deployed = true;
        }
        ConfigureCluster(binding) => {
            let cluster = sw
                .cluster
                .as_mut()
                .filter(|c| c.name == binding.name && c.id == binding.id)
                .ok_or_else(|| missing(format!("cluster {} {}", binding.name, binding.id)))?;
            cluster.control_vlan = Some(binding.control_vlan);
            cluster.peer_ip = binding.peer_ip;
        }
        GetCluster => return Ok(DeviceResponse::Cluster(sw.cluster.clone())),
        DeleteCluster { name, id } => {
            sw.cluster
                .as_ref()
                .filter(|c| c.name == name && c.id == id)
                .ok_or_else(|| missing(format!("cluster {} {}", name, id)))?;
            sw.cluster = None;
            sw.cluster_deployed = false;
        }
        UndeployCluster { name, id } => {
            sw.cluster
                .as_ref()
                .filter(|c| c.name == name && c.id == id)
                .ok_or_else(|| missing(format!("cluster {} {}", name, id)))?;
            sw.cluster_deployed = false;
        }
        ConfigureClusterPeerIp { name, id, peer_ip } => {
            let cluster = sw
                .cluster
                .as_mut()
                .filter(|c| c.name == name && c.id == id)
                .ok_or_else(|| missing(format!("cluster {} {}", name, id)))?;
            cluster.peer_ip = peer_ip;
            sw.cluster_deployed = true;
        }
        UnconfigureClusterPeerIp { name, id, peer_ip } => {
            let cluster = sw
                .cluster
                .as_mut()
                .filter(|c| c.name == name && c.id == id && c.peer_ip == peer_ip)
                .ok_or_else(|| missing(format!("peer-ip {} of cluster {}", peer_ip, name)))?;
            cluster.peer_ip.clear();
        }
        GetManagementClusterStatus => {}
    }

    Ok(DeviceResponse::Ok)
}

#[async_trait]
impl DeviceAdapter for SimulatedFabric {
    async fn login(&self, host: &str, _credentials: &Credentials) -> Result<Box<dyn DeviceSession>, DeviceError> {
        let reachable = self.with_switch(host, |sw| !sw.fail_login);
        match reachable {
            Some(true) => Ok(Box::new(SimulatedSession {
                host: host.to_string(),
                fabric: self.clone(),
            })),
            Some(false) => Err(DeviceError::Login {
                host: host.to_string(),
                reason: "authentication failed".to_string(),
            }),
            None => Err(DeviceError::Login {
                host: host.to_string(),
                reason: "host unreachable".to_string(),
            }),
        }
    }
}

struct SimulatedSession {
    host: String,
    fabric: SimulatedFabric,
}

#[async_trait]
impl DeviceSession for SimulatedSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&mut self, operation: DeviceOperation) -> Result<DeviceResponse, DeviceError> {
        self.fabric.execute(&self.host, operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_login_faults() {
        let fabric = SimulatedFabric::with_switches(["10.0.0.1", "10.0.0.2"]);
        fabric.fail_login("10.0.0.2");

        assert!(fabric.login("10.0.0.1", &Credentials::default()).await.is_ok());
        assert!(matches!(
            fabric.login("10.0.0.2", &Credentials::default()).await,
            Err(DeviceError::Login { .. })
        ));
        assert!(fabric.login("10.0.0.9", &Credentials::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure_is_journaled() {
        let fabric = SimulatedFabric::with_switches(["10.0.0.1"]);
        fabric.fail_operation("10.0.0.1", "Configure System L2 MTU");
        let mut session = fabric.login("10.0.0.1", &Credentials::default()).await.unwrap();

        assert!(session
            .execute(DeviceOperation::ConfigureSystemL2Mtu { mtu: 9216 })
            .await
            .is_err());
        session
            .execute(DeviceOperation::ConfigureSystemIpMtu { mtu: 9100 })
            .await
            .unwrap();

        let journal = fabric.journal("10.0.0.1");
        assert_eq!(journal.len(), 2);
        assert_eq!(fabric.switch("10.0.0.1").unwrap().ip_mtu, Some(9100));
    }

    #[tokio::test]
    async fn test_overlay_gateway_is_device_unique() {
        let fabric = SimulatedFabric::new();
        fabric.seed("10.0.0.1", SwitchSeed { overlay_gateway: Some("OVG_FAIL".to_string()), ..Default::default() });
        let mut session = fabric.login("10.0.0.1", &Credentials::default()).await.unwrap();

        let create = DeviceOperation::CreateOverlayGateway {
            name: "default".to_string(),
            gateway_type: "layer2-extension".to_string(),
            loopback_id: "2".to_string(),
            vni_auto_map: true,
        };
        assert!(session.execute(create.clone()).await.is_err());
        session
            .execute(DeviceOperation::DeleteOverlayGateway { name: "OVG_FAIL".to_string() })
            .await
            .unwrap();
        session.execute(create).await.unwrap();
        assert_eq!(fabric.overlay_gateway("10.0.0.1").as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_cluster_status_follows_cluster_objects() {
        let fabric = SimulatedFabric::with_switches(["10.0.0.2", "10.0.0.1"]);
        let status = cluster_status(&fabric.state(), "10.0.0.2");
        assert!(status.matches(&["10.0.0.2"]));

        for host in ["10.0.0.1", "10.0.0.2"] {
            let mut session = fabric.login(host, &Credentials::default()).await.unwrap();
            session
                .execute(DeviceOperation::CreateCluster {
                    name: "mct".to_string(),
                    id: 1,
                    peer_interface_type: "Port-channel".to_string(),
                    peer_interface_name: "64".to_string(),
                    peer_ip: "10.20.20.1".to_string(),
                })
                .await
                .unwrap();
        }

        let mut session = fabric.login("10.0.0.2", &Credentials::default()).await.unwrap();
        let status = session
            .execute(DeviceOperation::GetManagementClusterStatus)
            .await
            .unwrap()
            .into_cluster_status("Get Management Cluster Status")
            .unwrap();
        assert!(status.matches(&["10.0.0.1", "10.0.0.2"]));
        assert_eq!(status.principal(), Some("10.0.0.1"));
    }
}
