//! Desired-state contracts consumed by the orchestrator.
//!
//! These structures are produced by a planner (or loaded from a fabric
//! file) and describe what every switch and MCT cluster should look like.
//! Every per-item collection carries a [`ConfigType`] so the sequencer can
//! decide between create, drop-and-rebuild, unconfigure and no-op.

use crate::device::Credentials;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Per-item state transition requested by the planner
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConfigType {
    Create,
    Update,
    Delete,
    #[default]
    None,
}

/// Role a switch plays in the fabric
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Spine,
    Leaf,
    Rack,
}

impl DeviceRole {
    /// Pool category used for ASN allocation
    pub fn as_category(&self) -> &'static str {
        match self {
            DeviceRole::Spine => "Spine",
            DeviceRole::Leaf => "Leaf",
            DeviceRole::Rack => "Rack",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_category())
    }
}

/// Fabric topology variant
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum FabricType {
    /// Spine/leaf
    #[default]
    Clos,
    /// Rack-based, racks peer with each other directly
    NonClos,
}

impl FabricType {
    /// The role that carries the EVPN instance and overlay gateway
    pub fn overlay_role(&self) -> DeviceRole {
        match self {
            FabricType::Clos => DeviceRole::Leaf,
            FabricType::NonClos => DeviceRole::Rack,
        }
    }
}

/// Addressing mode of point-to-point fabric links
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum P2pIpType {
    #[default]
    Numbered,
    Unnumbered,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceType {
    Loopback,
    Ethernet,
    Ve,
    PortChannel,
}

impl InterfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Loopback => "loopback",
            InterfaceType::Ethernet => "ethernet",
            InterfaceType::Ve => "ve",
            InterfaceType::PortChannel => "port-channel",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of BGP session, selects the peer group on non-CLOS fabrics
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum NeighborType {
    #[default]
    Fabric,
    Evpn,
    MctL3Loopback,
}

/// Interface lending its address to an unnumbered interface
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Donor {
    pub interface_type: InterfaceType,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigInterface {
    pub name: String,
    pub interface_type: InterfaceType,
    /// Address with prefix length, empty for unnumbered interfaces
    #[serde(default)]
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donor: Option<Donor>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config_type: ConfigType,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigBgpNeighbor {
    pub address: String,
    pub remote_as: u32,
    #[serde(default)]
    pub neighbor_type: NeighborType,
    #[serde(default)]
    pub config_type: ConfigType,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct BfdSettings {
    pub enabled: bool,
    pub tx: u32,
    pub rx: u32,
    pub multiplier: u32,
}

/// Router BGP process parameters
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BgpSettings {
    pub local_asn: u32,
    pub peer_group: String,
    pub peer_group_description: String,
    pub evpn_peer_group: String,
    pub evpn_peer_group_description: String,
    /// Fabric network advertised by the BGP process
    pub network: String,
    /// Additional rack network advertised on non-CLOS fabrics
    pub non_clos_network: String,
    pub max_paths: u32,
    pub allowas_in: u32,
    pub multihop: u32,
    pub p2p_ip_type: P2pIpType,
}

impl Default for BgpSettings {
    fn default() -> Self {
        Self {
            local_asn: 0,
            peer_group: "spine-group".to_string(),
            peer_group_description: "Spine Peer Group".to_string(),
            evpn_peer_group: "overlay-ebgp-group".to_string(),
            evpn_peer_group_description: "Overlay EBGP Peer Group".to_string(),
            network: String::new(),
            non_clos_network: String::new(),
            max_paths: 8,
            allowas_in: 0,
            multihop: 2,
            p2p_ip_type: P2pIpType::Numbered,
        }
    }
}

/// MAC/ARP aging and EVPN duplicate detection timers
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EvpnSettings {
    pub arp_aging_timeout: u32,
    pub mac_aging_timeout: u32,
    pub mac_aging_conversational_timeout: u32,
    pub mac_move_limit: u32,
    pub duplicate_mac_timer: u32,
    pub duplicate_mac_timer_max_count: u32,
}

impl Default for EvpnSettings {
    fn default() -> Self {
        Self {
            arp_aging_timeout: 300,
            mac_aging_timeout: 1800,
            mac_aging_conversational_timeout: 300,
            mac_move_limit: 20,
            duplicate_mac_timer: 5,
            duplicate_mac_timer_max_count: 3,
        }
    }
}

/// VXLAN overlay gateway and anycast gateway parameters
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct OverlaySettings {
    pub enabled: bool,
    pub vtep_loopback: String,
    pub vlan_vni_auto_map: bool,
    pub anycast_mac: String,
    pub ipv6_anycast_mac: String,
}

/// Full desired state of one switch
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigSwitch {
    pub host: String,
    #[serde(default)]
    pub credentials: Credentials,
    pub role: DeviceRole,
    /// Fabric name, also used as the EVPN instance and overlay gateway name
    #[serde(default)]
    pub fabric: String,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    #[serde(default = "default_ip_mtu")]
    pub ip_mtu: u32,
    #[serde(default)]
    pub loopback_port_number: String,
    #[serde(default)]
    pub interfaces: Vec<ConfigInterface>,
    #[serde(default)]
    pub bgp: BgpSettings,
    #[serde(default)]
    pub bfd: BfdSettings,
    #[serde(default)]
    pub neighbors: Vec<ConfigBgpNeighbor>,
    #[serde(default)]
    pub evpn: EvpnSettings,
    #[serde(default)]
    pub overlay: OverlaySettings,
    #[serde(default)]
    pub unconfigure_mct_neighbors: ConfigDataPlaneCluster,
    #[serde(default)]
    pub configure_mct_neighbors: ConfigDataPlaneCluster,
    /// Set during orchestration when the switch is a detected MCT secondary
    #[serde(skip)]
    pub mct_secondary: bool,
}

fn default_mtu() -> u32 {
    9216
}

fn default_ip_mtu() -> u32 {
    9100
}

impl ConfigSwitch {
    /// Router-id taken from the loopback interface matching `loopback_port_number`
    pub fn router_id(&self) -> Option<&str> {
        self.interfaces
            .iter()
            .filter(|intf| {
                intf.interface_type == InterfaceType::Loopback && intf.name == self.loopback_port_number
            })
            .last()
            .map(|intf| intf.ip.split('/').next().unwrap_or_default())
            .filter(|ip| !ip.is_empty())
    }
}

/// Bit-per-attribute marker for incremental MCT cluster updates
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(transparent)]
pub struct OperationBitMap(pub u64);

impl OperationBitMap {
    pub const PEER_IP: OperationBitMap = OperationBitMap(1 << 0);
    pub const REMOTE_PEER_IP: OperationBitMap = OperationBitMap(1 << 1);
    pub const MEMBER_ADD: OperationBitMap = OperationBitMap(1 << 2);
    pub const MEMBER_DEL: OperationBitMap = OperationBitMap(1 << 3);
    pub const SPEED: OperationBitMap = OperationBitMap(1 << 4);
    /// Recreate the cluster from scratch even without `--force`
    pub const FORCE_CREATE: OperationBitMap = OperationBitMap(1 << 30);

    const UPDATES: u64 = Self::PEER_IP.0
        | Self::REMOTE_PEER_IP.0
        | Self::MEMBER_ADD.0
        | Self::MEMBER_DEL.0
        | Self::SPEED.0;

    pub const fn empty() -> Self {
        OperationBitMap(0)
    }

    pub fn contains(&self, other: OperationBitMap) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when at least one recognized update bit is set
    pub fn has_update(&self) -> bool {
        self.0 & Self::UPDATES != 0
    }

    pub fn bits(&self) -> u64 {
        self.0
    }
}

impl BitOr for OperationBitMap {
    type Output = OperationBitMap;

    fn bitor(self, rhs: OperationBitMap) -> OperationBitMap {
        OperationBitMap(self.0 | rhs.0)
    }
}

impl BitOrAssign for OperationBitMap {
    fn bitor_assign(&mut self, rhs: OperationBitMap) {
        self.0 |= rhs.0;
    }
}

/// Peer interface linking the two MCT nodes
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PeerInterface {
    pub interface_type: InterfaceType,
    pub name: String,
    #[serde(default)]
    pub speed: String,
}

/// One member of an MCT management cluster
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClusterMemberNode {
    pub mgmt_ip: String,
    #[serde(default)]
    pub credentials: Credentials,
    pub node_id: u32,
    #[serde(default)]
    pub principal_priority: u32,
    /// Address/prefix configured on this node's control VE
    pub remote_peer_ip: String,
    /// Partner's control VE address
    pub peer_ip: String,
    /// Partner's loopback address
    pub peer_loopback_ip: String,
    pub peer_interface: PeerInterface,
    #[serde(default)]
    pub bfd: BfdSettings,
    /// Physical ports bundled into the peer port-channel
    #[serde(default)]
    pub connecting_ports: Vec<String>,
}

/// Desired MCT management cluster
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigCluster {
    #[serde(default)]
    pub fabric_name: String,
    pub name: String,
    pub id: u32,
    pub control_vlan: u16,
    pub control_ve: u16,
    pub members: Vec<ClusterMemberNode>,
    #[serde(default)]
    pub operation_bitmap: OperationBitMap,
}

/// One node of an MCT data-plane (BGP L2VPN EVPN) pairing
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DataPlaneMemberNode {
    pub mgmt_ip: String,
    #[serde(default)]
    pub credentials: Credentials,
    pub peer_ip: String,
    pub peer_loopback_ip: String,
    pub loopback_number: String,
    pub peer_asn: u32,
    #[serde(default)]
    pub bfd_enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ConfigDataPlaneCluster {
    pub fabric_name: String,
    pub members: Vec<DataPlaneMemberNode>,
    pub operation_bitmap: OperationBitMap,
}

/// Clusters grouped by the batch they run in
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ClusterBatches {
    pub delete: Vec<ConfigCluster>,
    pub update: Vec<ConfigCluster>,
    pub create: Vec<ConfigCluster>,
}

impl ClusterBatches {
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.update.is_empty() && self.create.is_empty()
    }
}

/// Complete desired state of a fabric
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigFabricRequest {
    pub fabric_name: String,
    #[serde(default)]
    pub fabric_type: FabricType,
    pub switches: Vec<ConfigSwitch>,
    #[serde(default)]
    pub clusters: ClusterBatches,
}
