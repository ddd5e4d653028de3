//! Per-switch configuration pipeline.
//!
//! Stages run in a fixed order on one session: system properties,
//! interfaces, BGP, removal of stale data-plane cluster neighbors, EVPN and
//! finally the new data-plane cluster neighbors. A failed login ends the
//! pipeline; any other failed step is reported and the pipeline moves on.

use super::fanout::{fan_out, open_session, report, ErrorSink};
use super::singleton::{ensure_singleton, Singleton};
use crate::device::{
    BgpNeighbor, DeviceAdapter, DeviceError, DeviceOperation, DeviceSession, NonClosRouterBgp, Redistribute,
    RouterBgp,
};
use crate::error::{ActionError, OperationError};
use crate::model::{
    ConfigBgpNeighbor, ConfigInterface, ConfigSwitch, ConfigType, DataPlaneMemberNode, DeviceRole, FabricType,
    InterfaceType, NeighborType, P2pIpType,
};
use log::{debug, error, info, warn};
use std::sync::Arc;

const LOGIN: &str = "Configure Switch Login";
const VXLAN: &str = "vxlan";

/// Reports step outcomes for one host
struct Steps<'a> {
    host: &'a str,
    sink: &'a ErrorSink,
}

impl Steps<'_> {
    /// Log success or push the failure; returns whether the step succeeded
    async fn record(&self, operation: &str, result: Result<(), ActionError>) -> bool {
        match result {
            Ok(()) => {
                info!("[{}] {} done", self.host, operation);
                true
            }
            Err(e) => {
                report(self.sink, OperationError::new(operation, self.host, e)).await;
                false
            }
        }
    }

    async fn forward(&self, errors: Vec<OperationError>) {
        for err in errors {
            if self.sink.send(err).await.is_err() {
                error!("[{}] error collector closed", self.host);
            }
        }
    }
}

async fn run(session: &mut dyn DeviceSession, operation: DeviceOperation) -> Result<(), ActionError> {
    session.execute(operation).await?;
    Ok(())
}

/// Drives one switch from its current state to a [`ConfigSwitch`]
#[derive(Clone)]
pub struct DeviceActionSequencer {
    adapter: Arc<dyn DeviceAdapter>,
    fabric_type: FabricType,
    force: bool,
}

impl DeviceActionSequencer {
    pub fn new(adapter: Arc<dyn DeviceAdapter>, fabric_type: FabricType, force: bool) -> Self {
        Self {
            adapter,
            fabric_type,
            force,
        }
    }

    /// Run every stage on `sw`, reporting failures into `sink`
    pub async fn configure_switch(&self, sw: &ConfigSwitch, sink: &ErrorSink) {
        let Some(mut session) = open_session(self.adapter.as_ref(), &sw.host, &sw.credentials, LOGIN, sink).await
        else {
            return;
        };
        let steps = Steps { host: &sw.host, sink };
        info!("[{}] configuring {} switch", sw.host, sw.role);

        self.configure_system(session.as_mut(), sw, &steps).await;
        self.configure_interfaces(session.as_mut(), sw, &steps).await;
        self.configure_bgp(session.as_mut(), sw, &steps).await;
        self.unconfigure_data_plane_neighbors(sw, &steps).await;
        if sw.role == self.fabric_type.overlay_role() {
            self.configure_evpn(session.as_mut(), sw, &steps).await;
        }
        self.configure_data_plane_neighbors(sw, &steps).await;
    }

    /// Create the overlay gateway named after the fabric
    pub async fn configure_overlay_gateway(&self, sw: &ConfigSwitch, sink: &ErrorSink) {
        const OPERATION: &str = "Configure Overlay Gateway";
        let Some(mut session) = open_session(self.adapter.as_ref(), &sw.host, &sw.credentials, OPERATION, sink).await
        else {
            return;
        };
        let create = DeviceOperation::CreateOverlayGateway {
            name: sw.fabric.clone(),
            gateway_type: "layer2-extension".to_string(),
            loopback_id: sw.overlay.vtep_loopback.clone(),
            vni_auto_map: sw.overlay.vlan_vni_auto_map,
        };
        let result = ensure_singleton(session.as_mut(), Singleton::OverlayGateway, &sw.fabric, create, self.force).await;
        Steps { host: &sw.host, sink }.record(OPERATION, result).await;
    }

    /// Save the running configuration
    pub async fn persist(&self, sw: &ConfigSwitch, sink: &ErrorSink) {
        const OPERATION: &str = "Persist Config";
        let Some(mut session) = open_session(self.adapter.as_ref(), &sw.host, &sw.credentials, OPERATION, sink).await
        else {
            return;
        };
        let result = run(session.as_mut(), DeviceOperation::PersistConfig).await;
        Steps { host: &sw.host, sink }.record(OPERATION, result).await;
    }

    async fn configure_system(&self, session: &mut dyn DeviceSession, sw: &ConfigSwitch, steps: &Steps<'_>) {
        let result = run(session, DeviceOperation::ConfigureSystemL2Mtu { mtu: sw.mtu }).await;
        steps.record("Configure System L2 MTU", result).await;

        let result = run(session, DeviceOperation::ConfigureSystemIpMtu { mtu: sw.ip_mtu }).await;
        steps.record("Configure System IP MTU", result).await;

        if sw.overlay.enabled && sw.role == self.fabric_type.overlay_role() {
            let create = DeviceOperation::ConfigureAnycastGateway {
                ipv4_mac: sw.overlay.anycast_mac.clone(),
                ipv6_mac: sw.overlay.ipv6_anycast_mac.clone(),
            };
            let result =
                ensure_singleton(session, Singleton::AnycastGateway, &sw.overlay.anycast_mac, create, self.force).await;
            steps.record("Configure Anycast Gateway", result).await;
        }
    }

    async fn configure_interfaces(&self, session: &mut dyn DeviceSession, sw: &ConfigSwitch, steps: &Steps<'_>) {
        for intf in &sw.interfaces {
            let result = configure_interface(session, intf).await;
            steps.record("Configure Interface", result).await;
        }
    }

    async fn configure_bgp(&self, session: &mut dyn DeviceSession, sw: &ConfigSwitch, steps: &Steps<'_>) {
        match self.fabric_type {
            FabricType::Clos => self.configure_clos_router_bgp(session, sw, steps).await,
            FabricType::NonClos => {
                let bgp = &sw.bgp;
                let networks = [&bgp.network, &bgp.non_clos_network]
                    .into_iter()
                    .filter(|n| !n.is_empty())
                    .cloned()
                    .collect();
                let router = NonClosRouterBgp {
                    local_asn: bgp.local_asn,
                    networks,
                    bfd: sw.bfd.clone(),
                    peer_group: bgp.peer_group.clone(),
                    peer_group_description: bgp.peer_group_description.clone(),
                    evpn_peer_group: bgp.evpn_peer_group.clone(),
                    evpn_peer_group_description: bgp.evpn_peer_group_description.clone(),
                    multihop: bgp.multihop,
                    max_paths: bgp.max_paths,
                    encapsulation: VXLAN.to_string(),
                    next_hop_unchanged: true,
                    retain_route_target_all: true,
                };
                let result = run(session, DeviceOperation::ConfigureNonClosRouterBgp(router)).await;
                steps.record("BGP Operation", result).await;
            }
        }

        // deletes go out before any create or update
        for neighbor in sw.neighbors.iter().filter(|n| n.config_type == ConfigType::Delete) {
            let operation = DeviceOperation::UnconfigureRouterBgpNeighbor {
                address: neighbor.address.clone(),
                remote_as: neighbor.remote_as,
                peer_group: self.neighbor_peer_group(sw, neighbor),
            };
            steps.record("BGP Neighbor", run(session, operation).await).await;
        }
        for neighbor in sw
            .neighbors
            .iter()
            .filter(|n| matches!(n.config_type, ConfigType::Create | ConfigType::Update))
        {
            let operation = self.neighbor_operation(sw, neighbor);
            steps.record("BGP Neighbor", run(session, operation).await).await;
        }

        let router_id = match sw.router_id() {
            Some(router_id) => router_id.to_string(),
            None => {
                error!(
                    "[{}] no loopback {} address to derive the router-id from",
                    sw.host, sw.loopback_port_number
                );
                String::new()
            }
        };
        let result = run(session, DeviceOperation::ConfigureRouterId { router_id }).await;
        steps.record("Router ID", result).await;
    }

    async fn configure_clos_router_bgp(&self, session: &mut dyn DeviceSession, sw: &ConfigSwitch, steps: &Steps<'_>) {
        let bgp = &sw.bgp;
        let is_spine = sw.role == DeviceRole::Spine;

        let redistribute = if sw.role == DeviceRole::Leaf && !sw.overlay.enabled {
            match bgp.p2p_ip_type {
                P2pIpType::Numbered => {
                    let result = run(session, DeviceOperation::ConfigureNumberedRouteMap).await;
                    steps.record("BGP Operation Route Map", result).await;
                    Redistribute::ConnectedWithRouteMap
                }
                P2pIpType::Unnumbered => Redistribute::Connected,
            }
        } else {
            Redistribute::Off
        };

        let router = RouterBgp {
            local_asn: bgp.local_asn,
            peer_group: bgp.peer_group.clone(),
            peer_group_description: bgp.peer_group_description.clone(),
            network: bgp.network.clone(),
            max_paths: bgp.max_paths,
            overlay_gateway: sw.overlay.enabled,
            allowas_in: bgp.allowas_in,
            retain_route_target_all: is_spine,
            next_hop_unchanged: is_spine,
            bfd: sw.bfd.clone(),
            redistribute,
        };
        let result = run(session, DeviceOperation::ConfigureRouterBgp(router)).await;
        steps.record("BGP Operation", result).await;
    }

    fn neighbor_peer_group(&self, sw: &ConfigSwitch, neighbor: &ConfigBgpNeighbor) -> Option<String> {
        match (self.fabric_type, neighbor.neighbor_type) {
            (FabricType::Clos, _) | (FabricType::NonClos, NeighborType::Fabric) => Some(sw.bgp.peer_group.clone()),
            (FabricType::NonClos, NeighborType::Evpn) => Some(sw.bgp.evpn_peer_group.clone()),
            (FabricType::NonClos, NeighborType::MctL3Loopback) => None,
        }
    }

    fn neighbor_operation(&self, sw: &ConfigSwitch, neighbor: &ConfigBgpNeighbor) -> DeviceOperation {
        let bgp = &sw.bgp;
        let unnumbered = bgp.p2p_ip_type == P2pIpType::Unnumbered;
        let fabric_neighbor = |peer_group: Option<String>, next_hop_self: bool| BgpNeighbor {
            address: neighbor.address.clone(),
            remote_as: neighbor.remote_as,
            peer_group,
            multihop: bgp.multihop,
            unnumbered,
            is_leaf: sw.role == DeviceRole::Leaf,
            next_hop_self,
            bfd: sw.bfd.enabled,
        };

        match (self.fabric_type, neighbor.neighbor_type) {
            (FabricType::NonClos, NeighborType::Evpn) => DeviceOperation::ConfigureNonClosEvpnNeighbor {
                address: neighbor.address.clone(),
                remote_as: neighbor.remote_as,
                peer_group: bgp.evpn_peer_group.clone(),
                peer_group_description: bgp.evpn_peer_group_description.clone(),
                update_source_loopback: sw.loopback_port_number.clone(),
                multihop: bgp.multihop,
            },
            (FabricType::NonClos, NeighborType::MctL3Loopback) => {
                DeviceOperation::ConfigureRouterBgpNeighbor(fabric_neighbor(None, true))
            }
            _ => DeviceOperation::ConfigureRouterBgpNeighbor(fabric_neighbor(self.neighbor_peer_group(sw, neighbor), false)),
        }
    }

    async fn configure_evpn(&self, session: &mut dyn DeviceSession, sw: &ConfigSwitch, steps: &Steps<'_>) {
        let result = run(session, DeviceOperation::ConfigureMacAndArp(sw.evpn.clone())).await;
        steps.record("Mac & Arp", result).await;

        let create = DeviceOperation::CreateEvpnInstance {
            name: sw.fabric.clone(),
            duplicate_mac_timer: sw.evpn.duplicate_mac_timer,
            duplicate_mac_timer_max_count: sw.evpn.duplicate_mac_timer_max_count,
        };
        let result = ensure_singleton(session, Singleton::EvpnInstance, &sw.fabric, create, self.force).await;
        if steps.record("EVPN", result).await {
            let result = run(session, DeviceOperation::ClearBgpEvpnNeighborAll).await;
            steps.record("Clearing All BGP EVPN Neighbour", result).await;
        }
    }

    async fn unconfigure_data_plane_neighbors(&self, sw: &ConfigSwitch, steps: &Steps<'_>) {
        let members = sw.unconfigure_mct_neighbors.members.clone();
        if members.is_empty() {
            return;
        }
        let adapter = self.adapter.clone();
        let errors = fan_out(members, 2, move |node, sink| {
            unconfigure_data_plane_node(adapter.clone(), node, sink)
        })
        .await;
        steps.forward(errors).await;
    }

    async fn configure_data_plane_neighbors(&self, sw: &ConfigSwitch, steps: &Steps<'_>) {
        let members = sw.configure_mct_neighbors.members.clone();
        if members.is_empty() {
            return;
        }
        let adapter = self.adapter.clone();
        let errors = fan_out(members, 2, move |node, sink| configure_data_plane_node(adapter.clone(), node, sink)).await;
        steps.forward(errors).await;
    }
}

async fn configure_interface(session: &mut dyn DeviceSession, intf: &ConfigInterface) -> Result<(), ActionError> {
    let interface_type = intf.interface_type.as_str().to_string();
    let name = intf.name.clone();

    if intf.interface_type == InterfaceType::Loopback {
        return match intf.config_type {
            ConfigType::Create | ConfigType::Update => {
                run(session, DeviceOperation::ConfigureInterfaceLoopback { name, ip: intf.ip.clone() }).await
            }
            ConfigType::Delete => run(session, DeviceOperation::DeleteInterfaceLoopback { name }).await,
            ConfigType::None => Ok(()),
        };
    }

    let clear_unnumbered = DeviceOperation::UnconfigureInterfaceUnnumbered {
        interface_type: interface_type.clone(),
        name: name.clone(),
    };

    match &intf.donor {
        Some(donor) => {
            let configure = DeviceOperation::ConfigureInterfaceUnnumbered {
                interface_type,
                name,
                donor_type: donor.interface_type.as_str().to_string(),
                donor_name: donor.name.clone(),
            };
            match intf.config_type {
                ConfigType::Create => run(session, configure).await,
                ConfigType::Update => {
                    if let Err(e) = session.execute(clear_unnumbered).await {
                        debug!("[{}] {}", session.host(), e);
                    }
                    run(session, configure).await
                }
                ConfigType::Delete => {
                    if let Err(e) = session.execute(clear_unnumbered).await {
                        debug!("[{}] {}", session.host(), e);
                    }
                    Ok(())
                }
                ConfigType::None => Ok(()),
            }
        }
        None => {
            let configure = DeviceOperation::ConfigureInterfaceNumbered {
                interface_type: interface_type.clone(),
                name: name.clone(),
                ip: intf.ip.clone(),
                description: intf.description.clone(),
            };
            match intf.config_type {
                ConfigType::Create => run(session, configure).await,
                ConfigType::Update => {
                    let lookup = DeviceOperation::GetInterface {
                        interface_type: interface_type.clone(),
                        name: name.clone(),
                    };
                    let current = match session
                        .execute(lookup)
                        .await
                        .and_then(|response| response.into_address("Get Interface"))
                    {
                        Ok(current) => current,
                        Err(e) => {
                            warn!("[{}] {}", session.host(), e);
                            None
                        }
                    };
                    if current.as_deref() != Some(intf.ip.as_str()) {
                        if let Some(current) = current {
                            let unconfigure = DeviceOperation::UnconfigureInterfaceNumbered {
                                interface_type: interface_type.clone(),
                                name: name.clone(),
                                ip: current,
                            };
                            if let Err(e) = session.execute(unconfigure).await {
                                warn!("[{}] {}", session.host(), e);
                            }
                        }
                        // an unnumbered binding blocks the new address
                        if let Err(e) = session.execute(clear_unnumbered).await {
                            debug!("[{}] {}", session.host(), e);
                        }
                    }
                    run(session, configure).await
                }
                ConfigType::Delete => {
                    let unconfigure = DeviceOperation::UnconfigureInterfaceNumbered {
                        interface_type,
                        name,
                        ip: intf.ip.clone(),
                    };
                    run(session, unconfigure).await
                }
                ConfigType::None => Ok(()),
            }
        }
    }
}

async fn unconfigure_data_plane_node(adapter: Arc<dyn DeviceAdapter>, node: DataPlaneMemberNode, sink: ErrorSink) {
    const OPERATION: &str = "Unconfigure Data Plane Cluster";
    let Some(mut session) = open_session(adapter.as_ref(), &node.mgmt_ip, &node.credentials, OPERATION, &sink).await
    else {
        return;
    };

    let result: Result<(), DeviceError> = async {
        let neighbors = session
            .execute(DeviceOperation::GetRouterBgp)
            .await?
            .into_neighbors("Get Router BGP")?;
        if neighbors.iter().any(|n| *n == node.peer_ip || *n == node.peer_loopback_ip) {
            session
                .execute(DeviceOperation::UnconfigureL2EvpnNeighbor {
                    peer_ip: node.peer_ip.clone(),
                    peer_loopback_ip: node.peer_loopback_ip.clone(),
                })
                .await?;
        } else {
            debug!("[{}] no data plane neighbor {} to remove", node.mgmt_ip, node.peer_ip);
        }
        Ok(())
    }
    .await;

    Steps { host: &node.mgmt_ip, sink: &sink }.record(OPERATION, result.map_err(ActionError::from)).await;
}

async fn configure_data_plane_node(adapter: Arc<dyn DeviceAdapter>, node: DataPlaneMemberNode, sink: ErrorSink) {
    const OPERATION: &str = "Configure Data Plane Cluster";
    let Some(mut session) = open_session(adapter.as_ref(), &node.mgmt_ip, &node.credentials, OPERATION, &sink).await
    else {
        return;
    };

    let encapsulation = match session
        .execute(DeviceOperation::GetL2EvpnNeighborEncapType)
        .await
        .and_then(|r| r.into_text("Get L2 EVPN Neighbor Encapsulation"))
    {
        Ok(encapsulation) if !encapsulation.is_empty() => encapsulation,
        Ok(_) => VXLAN.to_string(),
        Err(e) => {
            debug!("[{}] {}", node.mgmt_ip, e);
            VXLAN.to_string()
        }
    };

    let configure = DeviceOperation::ConfigureL2EvpnNeighbor {
        peer_ip: node.peer_ip.clone(),
        peer_loopback_ip: node.peer_loopback_ip.clone(),
        loopback_number: node.loopback_number.clone(),
        peer_asn: node.peer_asn,
        encapsulation,
        bfd_enabled: node.bfd_enabled,
    };
    let result = run(session.as_mut(), configure).await;
    Steps { host: &node.mgmt_ip, sink: &sink }.record(OPERATION, result).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimulatedFabric, SwitchSeed};

    const LEAF: &str = r#"
host: 10.24.0.1
role: Leaf
fabric: default
loopback_port_number: "1"
bgp:
  local_asn: 65000
interfaces:
  - name: "1"
    interface_type: Loopback
    ip: 172.31.254.1/32
    config_type: Create
  - name: 0/1
    interface_type: Ethernet
    ip: 10.10.10.1/31
    config_type: Create
"#;

    fn leaf() -> ConfigSwitch {
        serde_yaml::from_str(LEAF).unwrap()
    }

    fn neighbor(address: &str, config_type: ConfigType) -> ConfigBgpNeighbor {
        ConfigBgpNeighbor {
            address: address.to_string(),
            remote_as: 64512,
            neighbor_type: NeighborType::Fabric,
            config_type,
        }
    }

    async fn configure(fabric: &SimulatedFabric, sw: &ConfigSwitch, force: bool) -> Vec<OperationError> {
        let sequencer = DeviceActionSequencer::new(Arc::new(fabric.clone()), FabricType::Clos, force);
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        sequencer.configure_switch(sw, &tx).await;
        drop(tx);
        let mut errors = Vec::new();
        while let Some(e) = rx.recv().await {
            errors.push(e);
        }
        errors
    }

    fn position(journal: &[DeviceOperation], matches: impl Fn(&DeviceOperation) -> bool) -> usize {
        journal.iter().position(matches).unwrap()
    }

    #[tokio::test]
    async fn test_leaf_pipeline_order() {
        let fabric = SimulatedFabric::with_switches(["10.24.0.1"]);
        let errors = configure(&fabric, &leaf(), false).await;
        assert!(errors.is_empty(), "{:?}", errors);

        let names: Vec<&str> = fabric.journal("10.24.0.1").iter().map(|op| op.name()).collect();
        assert_eq!(
            names,
            vec![
                "Configure System L2 MTU",
                "Configure System IP MTU",
                "Configure Interface Loopback",
                "Configure Interface Numbered",
                "Configure Numbered Route Map",
                "Configure Router BGP",
                "Configure Router ID",
                "Configure Mac And Arp",
                "Get EVPN Instance",
                "Create EVPN Instance",
                "Clear BGP EVPN Neighbor All",
            ]
        );
        let sw = fabric.switch("10.24.0.1").unwrap();
        assert_eq!(sw.router_id.as_deref(), Some("172.31.254.1"));
        assert_eq!(sw.evpn_instance.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_bgp_deletes_before_creates() {
        let fabric = SimulatedFabric::new();
        fabric.seed(
            "10.24.0.1",
            SwitchSeed { bgp_neighbors: vec!["10.10.10.4".to_string()], ..Default::default() },
        );
        let mut sw = leaf();
        sw.neighbors = vec![
            neighbor("10.10.10.0", ConfigType::Create),
            neighbor("10.10.10.4", ConfigType::Delete),
            neighbor("10.10.10.2", ConfigType::Update),
            neighbor("10.10.10.6", ConfigType::None),
        ];

        let errors = configure(&fabric, &sw, false).await;
        assert!(errors.is_empty(), "{:?}", errors);

        let journal = fabric.journal("10.24.0.1");
        let delete = position(&journal, |op| matches!(op, DeviceOperation::UnconfigureRouterBgpNeighbor { .. }));
        let first_create = position(&journal, |op| matches!(op, DeviceOperation::ConfigureRouterBgpNeighbor(_)));
        assert!(delete < first_create);
        assert_eq!(
            journal
                .iter()
                .filter(|op| matches!(op, DeviceOperation::ConfigureRouterBgpNeighbor(_)))
                .count(),
            2
        );

        let neighbors = fabric.switch("10.24.0.1").unwrap().bgp_neighbors;
        assert!(neighbors.contains("10.10.10.0"));
        assert!(!neighbors.contains("10.10.10.4"));
        assert!(!neighbors.contains("10.10.10.6"));
    }

    #[tokio::test]
    async fn test_login_failure_stops_pipeline() {
        let fabric = SimulatedFabric::with_switches(["10.24.0.1"]);
        fabric.fail_login("10.24.0.1");

        let errors = configure(&fabric, &leaf(), false).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].operation, "Configure Switch Login");
        assert!(errors[0].is_login());
        assert!(fabric.journal("10.24.0.1").is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_does_not_stop_pipeline() {
        let fabric = SimulatedFabric::with_switches(["10.24.0.1"]);
        fabric.fail_operation("10.24.0.1", "Configure System L2 MTU");

        let errors = configure(&fabric, &leaf(), false).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].operation, "Configure System L2 MTU");
        assert_eq!(errors[0].host, "10.24.0.1");
        assert_eq!(fabric.switch("10.24.0.1").unwrap().evpn_instance.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_missing_router_id_is_still_issued() {
        let fabric = SimulatedFabric::with_switches(["10.24.0.1"]);
        let mut sw = leaf();
        sw.loopback_port_number = "9".to_string();

        let errors = configure(&fabric, &sw, false).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].operation, "Router ID");
        assert!(fabric
            .journal("10.24.0.1")
            .contains(&DeviceOperation::ConfigureRouterId { router_id: String::new() }));
    }

    #[tokio::test]
    async fn test_numbered_update_replaces_address() {
        let fabric = SimulatedFabric::with_switches(["10.24.0.1"]);
        assert!(configure(&fabric, &leaf(), false).await.is_empty());

        let mut sw = leaf();
        sw.interfaces[1].ip = "10.10.10.3/31".to_string();
        sw.interfaces[1].config_type = ConfigType::Update;
        let errors = configure(&fabric, &sw, false).await;
        assert!(errors.is_empty(), "{:?}", errors);

        assert!(fabric.journal("10.24.0.1").contains(&DeviceOperation::UnconfigureInterfaceNumbered {
            interface_type: "ethernet".to_string(),
            name: "0/1".to_string(),
            ip: "10.10.10.1/31".to_string(),
        }));
        let sw = fabric.switch("10.24.0.1").unwrap();
        assert_eq!(sw.interfaces["ethernet 0/1"].address.as_deref(), Some("10.10.10.3/31"));
    }

    #[tokio::test]
    async fn test_unnumbered_create_uses_donor() {
        let fabric = SimulatedFabric::with_switches(["10.24.0.1"]);
        let errors = configure(&fabric, &unnumbered_leaf(ConfigType::Create), false).await;
        assert!(errors.is_empty(), "{:?}", errors);

        let switch = fabric.switch("10.24.0.1").unwrap();
        assert_eq!(switch.interfaces["ethernet 0/1"].donor.as_deref(), Some("loopback 1"));
        assert!(!switch.route_map);
    }

    fn unnumbered_leaf(config_type: ConfigType) -> ConfigSwitch {
        let mut sw = leaf();
        sw.bgp.p2p_ip_type = P2pIpType::Unnumbered;
        sw.interfaces[1].ip.clear();
        sw.interfaces[1].config_type = config_type;
        sw.interfaces[1].donor = Some(crate::model::Donor {
            interface_type: InterfaceType::Loopback,
            name: "1".to_string(),
        });
        sw
    }

    #[tokio::test]
    async fn test_numbered_update_clears_unnumbered_binding() {
        let fabric = SimulatedFabric::with_switches(["10.24.0.1"]);
        assert!(configure(&fabric, &unnumbered_leaf(ConfigType::Create), false).await.is_empty());

        let mut sw = leaf();
        sw.interfaces[1].config_type = ConfigType::Update;
        let errors = configure(&fabric, &sw, false).await;
        assert!(errors.is_empty(), "{:?}", errors);

        let journal = fabric.journal("10.24.0.1");
        let clear = position(&journal, |op| matches!(op, DeviceOperation::UnconfigureInterfaceUnnumbered { .. }));
        let numbered = position(&journal, |op| matches!(op, DeviceOperation::ConfigureInterfaceNumbered { .. }));
        assert!(clear < numbered);
        let sw = fabric.switch("10.24.0.1").unwrap();
        assert_eq!(sw.interfaces["ethernet 0/1"].address.as_deref(), Some("10.10.10.1/31"));
        assert_eq!(sw.interfaces["ethernet 0/1"].donor, None);
    }

    #[tokio::test]
    async fn test_numbered_update_survives_failed_lookup() {
        let fabric = SimulatedFabric::with_switches(["10.24.0.1"]);
        assert!(configure(&fabric, &leaf(), false).await.is_empty());
        fabric.fail_operation("10.24.0.1", "Get Interface");

        let mut sw = leaf();
        sw.interfaces[1].ip = "10.10.10.3/31".to_string();
        sw.interfaces[1].config_type = ConfigType::Update;
        let errors = configure(&fabric, &sw, false).await;
        assert!(errors.is_empty(), "{:?}", errors);

        assert!(fabric.journal("10.24.0.1").contains(&DeviceOperation::ConfigureInterfaceNumbered {
            interface_type: "ethernet".to_string(),
            name: "0/1".to_string(),
            ip: "10.10.10.3/31".to_string(),
            description: sw.interfaces[1].description.clone(),
        }));
        let sw = fabric.switch("10.24.0.1").unwrap();
        assert_eq!(sw.interfaces["ethernet 0/1"].address.as_deref(), Some("10.10.10.3/31"));
    }

    #[tokio::test]
    async fn test_unnumbered_delete_tolerates_failed_clear() {
        let fabric = SimulatedFabric::with_switches(["10.24.0.1"]);
        assert!(configure(&fabric, &unnumbered_leaf(ConfigType::Create), false).await.is_empty());
        fabric.fail_operation("10.24.0.1", "Unconfigure Interface Unnumbered");

        let errors = configure(&fabric, &unnumbered_leaf(ConfigType::Delete), false).await;
        assert!(errors.is_empty(), "{:?}", errors);
        assert!(fabric.journal("10.24.0.1").iter().any(|op| op.name() == "Unconfigure Interface Unnumbered"));
    }

    #[tokio::test]
    async fn test_evpn_conflict_skips_neighbor_clear() {
        let fabric = SimulatedFabric::new();
        fabric.seed("10.24.0.1", SwitchSeed { evpn_instance: Some("OTHER".to_string()), ..Default::default() });

        let errors = configure(&fabric, &leaf(), false).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].operation, "EVPN");
        assert_eq!(errors[0].error.to_string(), "EVPN OTHER already configured on switch");
        assert!(!fabric.journal("10.24.0.1").contains(&DeviceOperation::ClearBgpEvpnNeighborAll));

        let errors = configure(&fabric, &leaf(), true).await;
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(fabric.switch("10.24.0.1").unwrap().evpn_instance.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_data_plane_neighbors_on_member_nodes() {
        let fabric = SimulatedFabric::with_switches(["10.24.0.1", "10.24.0.2"]);
        let member = DataPlaneMemberNode {
            mgmt_ip: "10.24.0.2".to_string(),
            credentials: Default::default(),
            peer_ip: "10.20.20.1".to_string(),
            peer_loopback_ip: "172.31.254.1".to_string(),
            loopback_number: "1".to_string(),
            peer_asn: 65000,
            bfd_enabled: false,
        };
        let mut sw = leaf();
        sw.unconfigure_mct_neighbors.members = vec![member.clone()];
        sw.configure_mct_neighbors.members = vec![member];

        let errors = configure(&fabric, &sw, false).await;
        assert!(errors.is_empty(), "{:?}", errors);

        let journal = fabric.journal("10.24.0.2");
        // nothing to remove yet
        assert!(!journal
            .iter()
            .any(|op| matches!(op, DeviceOperation::UnconfigureL2EvpnNeighbor { .. })));
        assert!(journal.iter().any(|op| matches!(
            op,
            DeviceOperation::ConfigureL2EvpnNeighbor { encapsulation, .. } if encapsulation == "vxlan"
        )));
        assert!(fabric.switch("10.24.0.2").unwrap().l2evpn_neighbors.contains("10.20.20.1"));
    }

    #[tokio::test]
    async fn test_non_clos_evpn_neighbor_uses_overlay_group() {
        let fabric = SimulatedFabric::with_switches(["10.24.0.1"]);
        let mut sw = leaf();
        sw.role = DeviceRole::Rack;
        sw.bgp.network = "172.32.254.0/24".to_string();
        sw.neighbors = vec![ConfigBgpNeighbor {
            neighbor_type: NeighborType::Evpn,
            ..neighbor("172.31.254.2", ConfigType::Create)
        }];

        let sequencer = DeviceActionSequencer::new(Arc::new(fabric.clone()), FabricType::NonClos, false);
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        sequencer.configure_switch(&sw, &tx).await;
        drop(tx);
        assert!(rx.recv().await.is_none());

        let journal = fabric.journal("10.24.0.1");
        assert!(journal.iter().any(|op| matches!(
            op,
            DeviceOperation::ConfigureNonClosEvpnNeighbor { peer_group, update_source_loopback, .. }
                if peer_group == "overlay-ebgp-group" && update_source_loopback == "1"
        )));
        assert!(journal.iter().any(|op| matches!(
            op,
            DeviceOperation::ConfigureNonClosRouterBgp(bgp) if bgp.networks == vec!["172.32.254.0/24".to_string()]
        )));
    }
}
