//! Closed set of named device operations and their results.

use crate::model::{BfdSettings, EvpnSettings};
use serde::{Deserialize, Serialize};

use super::DeviceError;

/// How the BGP process redistributes connected routes
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Redistribute {
    Off,
    Connected,
    ConnectedWithRouteMap,
}

/// Router BGP parameters on a CLOS fabric
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RouterBgp {
    pub local_asn: u32,
    pub peer_group: String,
    pub peer_group_description: String,
    pub network: String,
    pub max_paths: u32,
    pub overlay_gateway: bool,
    pub allowas_in: u32,
    pub retain_route_target_all: bool,
    pub next_hop_unchanged: bool,
    pub bfd: BfdSettings,
    pub redistribute: Redistribute,
}

/// Router BGP parameters on a non-CLOS fabric
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NonClosRouterBgp {
    pub local_asn: u32,
    pub networks: Vec<String>,
    pub bfd: BfdSettings,
    pub peer_group: String,
    pub peer_group_description: String,
    pub evpn_peer_group: String,
    pub evpn_peer_group_description: String,
    pub multihop: u32,
    pub max_paths: u32,
    pub encapsulation: String,
    pub next_hop_unchanged: bool,
    pub retain_route_target_all: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BgpNeighbor {
    pub address: String,
    pub remote_as: u32,
    pub peer_group: Option<String>,
    pub multihop: u32,
    pub unnumbered: bool,
    pub is_leaf: bool,
    pub next_hop_self: bool,
    pub bfd: bool,
}

/// Full binding of a management cluster object
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClusterBinding {
    pub name: String,
    pub id: u32,
    pub peer_interface_type: String,
    pub peer_interface_name: String,
    pub peer_ip: String,
    pub peer_loopback_ip: String,
    pub control_vlan: u16,
    pub control_ve: u16,
    pub source_ip: String,
}

/// Cluster object as read back from a device
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ClusterState {
    pub name: String,
    pub id: u32,
    pub control_vlan: Option<u16>,
    pub peer_interface_type: String,
    pub peer_interface_name: String,
    pub peer_ip: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ManagementClusterMember {
    pub mgmt_ip: String,
    pub is_principal: bool,
}

/// Operational view of the management cluster from one node
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ManagementClusterStatus {
    pub members: Vec<ManagementClusterMember>,
}

impl ManagementClusterStatus {
    pub fn principal(&self) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.is_principal)
            .map(|m| m.mgmt_ip.as_str())
    }

    /// Operational membership equals `intended` exactly
    pub fn matches(&self, intended: &[&str]) -> bool {
        self.members.len() == intended.len()
            && self
                .members
                .iter()
                .all(|m| intended.contains(&m.mgmt_ip.as_str()))
    }
}

/// Every operation a switch adapter must support
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum DeviceOperation {
    // System
    ConfigureSystemL2Mtu { mtu: u32 },
    ConfigureSystemIpMtu { mtu: u32 },
    GetAnycastGateway,
    ConfigureAnycastGateway { ipv4_mac: String, ipv6_mac: String },
    UnconfigureAnycastGateway,

    // Interfaces
    ConfigureInterfaceLoopback { name: String, ip: String },
    DeleteInterfaceLoopback { name: String },
    ConfigureInterfaceNumbered { interface_type: String, name: String, ip: String, description: String },
    UnconfigureInterfaceNumbered { interface_type: String, name: String, ip: String },
    ConfigureInterfaceUnnumbered { interface_type: String, name: String, donor_type: String, donor_name: String },
    UnconfigureInterfaceUnnumbered { interface_type: String, name: String },
    GetInterface { interface_type: String, name: String },

    // BGP
    ConfigureNumberedRouteMap,
    ConfigureRouterBgp(RouterBgp),
    ConfigureNonClosRouterBgp(NonClosRouterBgp),
    ConfigureRouterBgpNeighbor(BgpNeighbor),
    ConfigureNonClosEvpnNeighbor {
        address: String,
        remote_as: u32,
        peer_group: String,
        peer_group_description: String,
        update_source_loopback: String,
        multihop: u32,
    },
    UnconfigureRouterBgpNeighbor { address: String, remote_as: u32, peer_group: Option<String> },
    ConfigureRouterId { router_id: String },
    GetRouterBgp,

    // MCT data plane
    GetL2EvpnNeighborEncapType,
    ConfigureL2EvpnNeighbor {
        peer_ip: String,
        peer_loopback_ip: String,
        loopback_number: String,
        peer_asn: u32,
        encapsulation: String,
        bfd_enabled: bool,
    },
    UnconfigureL2EvpnNeighbor { peer_ip: String, peer_loopback_ip: String },

    // EVPN
    ConfigureMacAndArp(EvpnSettings),
    GetEvpnInstance,
    CreateEvpnInstance { name: String, duplicate_mac_timer: u32, duplicate_mac_timer_max_count: u32 },
    DeleteEvpnInstance { name: String },
    ClearBgpEvpnNeighborAll,

    // Overlay gateway
    GetOverlayGateway,
    CreateOverlayGateway { name: String, gateway_type: String, loopback_id: String, vni_auto_map: bool },
    DeleteOverlayGateway { name: String },

    PersistConfig,

    // MCT management cluster
    ConfigureNodeId { node_id: u32 },
    UnconfigureNodePrincipalPriority { node_id: u32 },
    CreateClusterControlVlan { vlan: u16, ve: u16, description: String },
    GetClusterControlVlan { vlan: u16 },
    DeleteClusterControlVe { vlan: u16, ve: u16 },
    DeleteClusterControlVlan { vlan: u16 },
    CreateInterfacePo { name: String, speed: String, description: String, control_vlan: u16 },
    AddInterfaceToPo { member: String, port_channel: String, speed: String },
    DeleteInterfaceFromPo { member: String, port_channel: String },
    ConfigureInterfacePoSpeed { port_channel: String, speed: String },
    DeleteInterfacePo { name: String },
    ConfigureInterfaceVe { ve: u16, ip: String, bfd: BfdSettings },
    GetInterfaceVe { ve: u16 },
    ConfigureInterfaceVeIp { ve: u16, ip: String },
    UnconfigureInterfaceVeIp { ve: u16, ip: String },
    DeleteInterfaceVe { ve: u16 },
    ConfigureIpRoute { prefix: String, next_hop: String },
    DeconfigureIpRoute { prefix: String, next_hop: String },
    CreateCluster { name: String, id: u32, peer_interface_type: String, peer_interface_name: String, peer_ip: String },
    ConfigureCluster(ClusterBinding),
    GetCluster,
    DeleteCluster { name: String, id: u32 },
    UndeployCluster { name: String, id: u32 },
    ConfigureClusterPeerIp { name: String, id: u32, peer_ip: String },
    UnconfigureClusterPeerIp { name: String, id: u32, peer_ip: String },
    GetManagementClusterStatus,
}

impl DeviceOperation {
    /// Human readable operation name
    pub fn name(&self) -> &'static str {
        use DeviceOperation::*;
        match self {
            ConfigureSystemL2Mtu { .. } => "Configure System L2 MTU",
            ConfigureSystemIpMtu { .. } => "Configure System IP MTU",
            GetAnycastGateway => "Get Anycast Gateway",
            ConfigureAnycastGateway { .. } => "Configure Anycast Gateway",
            UnconfigureAnycastGateway => "Unconfigure Anycast Gateway",
            ConfigureInterfaceLoopback { .. } => "Configure Interface Loopback",
            DeleteInterfaceLoopback { .. } => "Delete Interface Loopback",
            ConfigureInterfaceNumbered { .. } => "Configure Interface Numbered",
            UnconfigureInterfaceNumbered { .. } => "Unconfigure Interface Numbered",
            ConfigureInterfaceUnnumbered { .. } => "Configure Interface Unnumbered",
            UnconfigureInterfaceUnnumbered { .. } => "Unconfigure Interface Unnumbered",
            GetInterface { .. } => "Get Interface",
            ConfigureNumberedRouteMap => "Configure Numbered Route Map",
            ConfigureRouterBgp(_) => "Configure Router BGP",
            ConfigureNonClosRouterBgp(_) => "Configure Non-CLOS Router BGP",
            ConfigureRouterBgpNeighbor(_) => "Configure Router BGP Neighbor",
            ConfigureNonClosEvpnNeighbor { .. } => "Configure Non-CLOS EVPN Neighbor",
            UnconfigureRouterBgpNeighbor { .. } => "Unconfigure Router BGP Neighbor",
            ConfigureRouterId { .. } => "Configure Router ID",
            GetRouterBgp => "Get Router BGP",
            GetL2EvpnNeighborEncapType => "Get L2 EVPN Neighbor Encapsulation",
            ConfigureL2EvpnNeighbor { .. } => "Configure L2 EVPN Neighbor",
            UnconfigureL2EvpnNeighbor { .. } => "Unconfigure L2 EVPN Neighbor",
            ConfigureMacAndArp(_) => "Configure Mac And Arp",
            GetEvpnInstance => "Get EVPN Instance",
            CreateEvpnInstance { .. } => "Create EVPN Instance",
            DeleteEvpnInstance { .. } => "Delete EVPN Instance",
            ClearBgpEvpnNeighborAll => "Clear BGP EVPN Neighbor All",
            GetOverlayGateway => "Get Overlay Gateway",
            CreateOverlayGateway { .. } => "Create Overlay Gateway",
            DeleteOverlayGateway { .. } => "Delete Overlay Gateway",
            PersistConfig => "Persist Config",
            ConfigureNodeId { .. } => "Configure Node Id",
            UnconfigureNodePrincipalPriority { .. } => "Unconfigure Node Principal Priority",
            CreateClusterControlVlan { .. } => "Create Cluster Control VLAN",
            GetClusterControlVlan { .. } => "Get Cluster Control VLAN",
            DeleteClusterControlVe { .. } => "Delete Cluster Control VE",
            DeleteClusterControlVlan { .. } => "Delete Cluster Control VLAN",
            CreateInterfacePo { .. } => "Create Interface Port-channel",
            AddInterfaceToPo { .. } => "Add Interface To Port-channel",
            DeleteInterfaceFromPo { .. } => "Delete Interface From Port-channel",
            ConfigureInterfacePoSpeed { .. } => "Configure Port-channel Speed",
            DeleteInterfacePo { .. } => "Delete Interface Port-channel",
            ConfigureInterfaceVe { .. } => "Configure Interface VE",
            GetInterfaceVe { .. } => "Get Interface VE",
            ConfigureInterfaceVeIp { .. } => "Configure Interface VE IP",
            UnconfigureInterfaceVeIp { .. } => "Unconfigure Interface VE IP",
            DeleteInterfaceVe { .. } => "Delete Interface VE",
            ConfigureIpRoute { .. } => "Configure IP Route",
            DeconfigureIpRoute { .. } => "Deconfigure IP Route",
            CreateCluster { .. } => "Create Cluster",
            ConfigureCluster(_) => "Configure Cluster",
            GetCluster => "Get Cluster",
            DeleteCluster { .. } => "Delete Cluster",
            UndeployCluster { .. } => "Undeploy Cluster",
            ConfigureClusterPeerIp { .. } => "Configure Cluster Peer IP",
            UnconfigureClusterPeerIp { .. } => "Unconfigure Cluster Peer IP",
            GetManagementClusterStatus => "Get Management Cluster Status",
        }
    }
}

/// Result of a device operation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum DeviceResponse {
    Ok,
    /// Name of a device-unique object, `None` when absent
    Named(Option<String>),
    /// Configured address of an interface, `None` when unset
    Address(Option<String>),
    Text(String),
    Neighbors(Vec<String>),
    Cluster(Option<ClusterState>),
    /// VE bound to a control VLAN
    ControlVe(Option<u16>),
    ClusterStatus(ManagementClusterStatus),
}

impl DeviceResponse {
    fn unexpected(self, operation: &'static str) -> DeviceError {
        DeviceError::UnexpectedResponse {
            operation,
            response: format!("{:?}", self),
        }
    }

    pub fn into_name(self, operation: &'static str) -> Result<Option<String>, DeviceError> {
        match self {
            DeviceResponse::Named(name) => Ok(name.filter(|n| !n.is_empty())),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_address(self, operation: &'static str) -> Result<Option<String>, DeviceError> {
        match self {
            DeviceResponse::Address(address) => Ok(address.filter(|a| !a.is_empty())),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_text(self, operation: &'static str) -> Result<String, DeviceError> {
        match self {
            DeviceResponse::Text(text) => Ok(text),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_neighbors(self, operation: &'static str) -> Result<Vec<String>, DeviceError> {
        match self {
            DeviceResponse::Neighbors(neighbors) => Ok(neighbors),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_cluster(self, operation: &'static str) -> Result<Option<ClusterState>, DeviceError> {
        match self {
            DeviceResponse::Cluster(cluster) => Ok(cluster),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_control_ve(self, operation: &'static str) -> Result<Option<u16>, DeviceError> {
        match self {
            DeviceResponse::ControlVe(ve) => Ok(ve),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_cluster_status(self, operation: &'static str) -> Result<ManagementClusterStatus, DeviceError> {
        match self {
            DeviceResponse::ClusterStatus(status) => Ok(status),
            other => Err(other.unexpected(operation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(DeviceOperation::GetOverlayGateway.name(), "Get Overlay Gateway");
        assert_eq!(
            DeviceOperation::ConfigureRouterId { router_id: "1.1.1.1".to_string() }.name(),
            "Configure Router ID"
        );
    }

    #[test]
    fn test_empty_name_is_absent() {
        let name = DeviceResponse::Named(Some(String::new())).into_name("Get EVPN Instance").unwrap();
        assert_eq!(name, None);
    }

    #[test]
    fn test_unexpected_response() {
        let err = DeviceResponse::Ok.into_cluster("Get Cluster").unwrap_err();
        assert!(matches!(err, DeviceError::UnexpectedResponse { operation: "Get Cluster", .. }));
    }

    #[test]
    fn test_cluster_membership_match() {
        let status = ManagementClusterStatus {
            members: vec![
                ManagementClusterMember { mgmt_ip: "10.1.1.1".to_string(), is_principal: true },
                ManagementClusterMember { mgmt_ip: "10.1.1.2".to_string(), is_principal: false },
            ],
        };
        assert!(status.matches(&["10.1.1.2", "10.1.1.1"]));
        assert!(!status.matches(&["10.1.1.1"]));
        assert_eq!(status.principal(), Some("10.1.1.1"));
    }
}
