//! MCT management cluster reconciliation.
//!
//! Create, update, delete and clear run on every member node concurrently.
//! Within a node the steps are fail-fast: later steps depend on the objects
//! the earlier ones created.

use super::fanout::{fan_out, open_session, report, ErrorSink};
use crate::device::{
    ClusterBinding, Credentials, DeviceAdapter, DeviceError, DeviceOperation, DeviceSession,
    ManagementClusterStatus,
};
use crate::error::{ActionError, OperationError};
use crate::model::{ClusterMemberNode, ConfigCluster, InterfaceType, OperationBitMap};
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const MAX_CLUSTER_MEMBERS: usize = 2;

const CONTROL_VLAN_DESCRIPTION: &str = "MCTClusterControlVlan";
const PEER_INTERFACE_DESCRIPTION: &str = "MCTPeerInterface";
const PORT_CHANNEL: &str = "Port-channel";
const POLL_OPERATION: &str = "Poll for management cluster status";

/// Which batch a cluster belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterOp {
    Create,
    Update,
    Delete,
}

/// Readiness polling after cluster changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Brings MCT management clusters to their desired state
#[derive(Clone)]
pub struct ClusterReconciler {
    adapter: Arc<dyn DeviceAdapter>,
    poll: PollSettings,
}

impl ClusterReconciler {
    pub fn new(adapter: Arc<dyn DeviceAdapter>, poll: PollSettings) -> Self {
        Self { adapter, poll }
    }

    pub async fn reconcile(&self, cluster: ConfigCluster, op: ClusterOp, force: bool, sink: &ErrorSink) {
        info!(
            "Reconciling cluster {} {} ({:?}) on {} node(s)",
            cluster.name,
            cluster.id,
            op,
            cluster.members.len()
        );
        let cluster = Arc::new(cluster);
        match op {
            ClusterOp::Create => self.create(cluster, force, sink).await,
            ClusterOp::Update => self.update(cluster, sink).await,
            ClusterOp::Delete => forward(sink, self.per_node(&cluster, Self::delete_node).await).await,
        }
    }

    /// Operational membership as seen from `mgmt_ip`
    pub async fn status(
        &self,
        mgmt_ip: &str,
        credentials: &Credentials,
    ) -> Result<ManagementClusterStatus, ActionError> {
        let mut session = self.adapter.login(mgmt_ip, credentials).await.map_err(ActionError::Login)?;
        let status = session
            .execute(DeviceOperation::GetManagementClusterStatus)
            .await?
            .into_cluster_status("Get Management Cluster Status")?;
        Ok(status)
    }

    async fn create(&self, cluster: Arc<ConfigCluster>, force: bool, sink: &ErrorSink) {
        if cluster.members.len() > MAX_CLUSTER_MEMBERS {
            let host = cluster.members.first().map(|m| m.mgmt_ip.clone()).unwrap_or_default();
            let err = ActionError::Precondition(format!(
                "Management cluster is supported for a maximum of {} nodes",
                MAX_CLUSTER_MEMBERS
            ));
            report(sink, OperationError::new("Configure Management Cluster", host, err)).await;
            return;
        }

        if force {
            // leftovers are expected to be partial, so cleanup failures are only logged
            self.per_node(&cluster, Self::clear_node).await;
            forward(sink, self.per_node(&cluster, Self::poll_singleton_node).await).await;
        }

        let errors = self.per_node(&cluster, Self::create_node).await;
        if !errors.is_empty() {
            forward(sink, errors).await;
            return;
        }
        forward(sink, self.per_node(&cluster, Self::poll_member_node).await).await;
    }

    async fn update(&self, cluster: Arc<ConfigCluster>, sink: &ErrorSink) {
        forward(sink, self.per_node(&cluster, Self::update_node).await).await;
        forward(sink, self.per_node(&cluster, Self::poll_member_node).await).await;
    }

    /// Remove whatever cluster configuration a node currently holds
    pub async fn clear(&self, cluster: ConfigCluster) {
        self.per_node(&Arc::new(cluster), Self::clear_node).await;
    }

    async fn per_node<F, Fut>(&self, cluster: &Arc<ConfigCluster>, task: F) -> Vec<OperationError>
    where
        F: Fn(ClusterReconciler, Arc<ConfigCluster>, ClusterMemberNode, ErrorSink) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let this = self.clone();
        let shared = cluster.clone();
        fan_out(cluster.members.clone(), 2, move |node, sink| {
            task(this.clone(), shared.clone(), node, sink)
        })
        .await
    }

    async fn create_node(self, cluster: Arc<ConfigCluster>, node: ClusterMemberNode, sink: ErrorSink) {
        let operation = "Configure Management Cluster";
        let Some(mut session) =
            open_session(self.adapter.as_ref(), &node.mgmt_ip, &node.credentials, operation, &sink).await
        else {
            return;
        };
        match create_steps(session.as_mut(), &cluster, &node).await {
            Ok(()) => info!("[{}] cluster {} {} configured", node.mgmt_ip, cluster.name, cluster.id),
            Err(e) => report(&sink, e).await,
        }
    }

    async fn update_node(self, cluster: Arc<ConfigCluster>, node: ClusterMemberNode, sink: ErrorSink) {
        let operation = "Update management cluster properties";
        let bitmap = cluster.operation_bitmap;
        if !bitmap.has_update() {
            warn!("[{}] unsupported update operations {}", node.mgmt_ip, bitmap.bits());
            let err = ActionError::UnsupportedClusterOperation { bitmap: bitmap.bits() };
            report(&sink, OperationError::new(operation, &node.mgmt_ip, err)).await;
            return;
        }
        let Some(mut session) =
            open_session(self.adapter.as_ref(), &node.mgmt_ip, &node.credentials, operation, &sink).await
        else {
            return;
        };
        if let Err(e) = update_steps(session.as_mut(), &cluster, &node).await {
            report(&sink, e).await;
        }
    }

    async fn delete_node(self, cluster: Arc<ConfigCluster>, node: ClusterMemberNode, sink: ErrorSink) {
        let operation = "Delete Management Cluster";
        let Some(mut session) =
            open_session(self.adapter.as_ref(), &node.mgmt_ip, &node.credentials, operation, &sink).await
        else {
            return;
        };
        match delete_steps(session.as_mut(), &cluster, &node).await {
            Ok(()) => info!("[{}] cluster {} {} deleted", node.mgmt_ip, cluster.name, cluster.id),
            Err(e) => report(&sink, e).await,
        }
    }

    /// Best-effort cleanup; nothing is reported
    async fn clear_node(self, cluster: Arc<ConfigCluster>, node: ClusterMemberNode, _sink: ErrorSink) {
        let mut session = match self.adapter.login(&node.mgmt_ip, &node.credentials).await {
            Ok(session) => session,
            Err(e) => {
                warn!("[{}] cluster cleanup skipped: {}", node.mgmt_ip, e);
                return;
            }
        };
        clear_steps(session.as_mut(), &cluster, &node).await;
    }

    async fn poll_singleton_node(self, _cluster: Arc<ConfigCluster>, node: ClusterMemberNode, sink: ErrorSink) {
        self.poll_node(&node, &[node.mgmt_ip.as_str()], &sink).await;
    }

    async fn poll_member_node(self, cluster: Arc<ConfigCluster>, node: ClusterMemberNode, sink: ErrorSink) {
        let intended: Vec<&str> = cluster.members.iter().map(|m| m.mgmt_ip.as_str()).collect();
        self.poll_node(&node, &intended, &sink).await;
    }

    async fn poll_node(&self, node: &ClusterMemberNode, intended: &[&str], sink: &ErrorSink) {
        let Some(mut session) =
            open_session(self.adapter.as_ref(), &node.mgmt_ip, &node.credentials, POLL_OPERATION, sink).await
        else {
            return;
        };
        match poll_membership(session.as_mut(), intended, self.poll).await {
            Ok(()) => info!("[{}] management cluster operational with {:?}", node.mgmt_ip, intended),
            Err(e) => report(sink, OperationError::new(POLL_OPERATION, &node.mgmt_ip, e)).await,
        }
    }
}

async fn forward(sink: &ErrorSink, errors: Vec<OperationError>) {
    for err in errors {
        if sink.send(err).await.is_err() {
            warn!("Cluster error collector closed");
        }
    }
}

/// Query status every `interval` until membership equals `intended`
async fn poll_membership(
    session: &mut dyn DeviceSession,
    intended: &[&str],
    poll: PollSettings,
) -> Result<(), ActionError> {
    let waited = tokio::time::timeout(poll.timeout, async {
        loop {
            tokio::time::sleep(poll.interval).await;
            match session
                .execute(DeviceOperation::GetManagementClusterStatus)
                .await
                .and_then(|r| r.into_cluster_status("Get Management Cluster Status"))
            {
                Ok(status) if status.matches(intended) => return,
                Ok(status) => debug!("[{}] cluster members {:?}", session.host(), status.members),
                Err(e) => debug!("[{}] {}", session.host(), e),
            }
        }
    })
    .await;
    waited.map_err(|_| ActionError::PollTimeout)
}

fn failed<'a>(operation: &'static str, host: &'a str) -> impl FnOnce(DeviceError) -> OperationError + 'a {
    move |e| OperationError::new(operation, host, e)
}

async fn create_steps(
    session: &mut dyn DeviceSession,
    cluster: &ConfigCluster,
    node: &ClusterMemberNode,
) -> Result<(), OperationError> {
    let host = node.mgmt_ip.as_str();

    info!("[{}] configuring node-id {}", host, node.node_id);
    session
        .execute(DeviceOperation::ConfigureNodeId { node_id: node.node_id })
        .await
        .map_err(failed("Configure Node Id", host))?;

    info!("[{}] control VLAN {} on VE {}", host, cluster.control_vlan, cluster.control_ve);
    session
        .execute(DeviceOperation::CreateClusterControlVlan {
            vlan: cluster.control_vlan,
            ve: cluster.control_ve,
            description: CONTROL_VLAN_DESCRIPTION.to_string(),
        })
        .await
        .map_err(failed("Create Cluster Control VLAN", host))?;

    let peer = &node.peer_interface;
    if peer.interface_type != InterfaceType::PortChannel {
        return Err(OperationError::new(
            "Configure Cluster Peer Interface",
            host,
            ActionError::Precondition("Cluster peer-interface needs to be a port-channel".to_string()),
        ));
    }
    session
        .execute(DeviceOperation::CreateInterfacePo {
            name: peer.name.clone(),
            speed: peer.speed.clone(),
            description: PEER_INTERFACE_DESCRIPTION.to_string(),
            control_vlan: cluster.control_vlan,
        })
        .await
        .map_err(failed("Configure Cluster Peer Interface", host))?;
    for port in &node.connecting_ports {
        session
            .execute(DeviceOperation::AddInterfaceToPo {
                member: port.clone(),
                port_channel: peer.name.clone(),
                speed: peer.speed.clone(),
            })
            .await
            .map_err(failed("Configure Cluster Peer Interface", host))?;
    }

    session
        .execute(DeviceOperation::ConfigureInterfaceVe {
            ve: cluster.control_ve,
            ip: node.remote_peer_ip.clone(),
            bfd: node.bfd.clone(),
        })
        .await
        .map_err(failed("Configure IRB on Cluster Control VLAN", host))?;

    session
        .execute(DeviceOperation::ConfigureIpRoute {
            prefix: format!("{}/32", node.peer_loopback_ip),
            next_hop: node.peer_ip.clone(),
        })
        .await
        .map_err(failed("Configure IP Route", host))?;

    let source_ip = node.remote_peer_ip.split('/').next().unwrap_or_default().to_string();
    session
        .execute(DeviceOperation::CreateCluster {
            name: cluster.name.clone(),
            id: cluster.id,
            peer_interface_type: PORT_CHANNEL.to_string(),
            peer_interface_name: peer.name.clone(),
            peer_ip: node.peer_ip.clone(),
        })
        .await
        .map_err(failed("Configure Cluster", host))?;
    session
        .execute(DeviceOperation::ConfigureCluster(ClusterBinding {
            name: cluster.name.clone(),
            id: cluster.id,
            peer_interface_type: PORT_CHANNEL.to_string(),
            peer_interface_name: peer.name.clone(),
            peer_ip: node.peer_ip.clone(),
            peer_loopback_ip: node.peer_loopback_ip.clone(),
            control_vlan: cluster.control_vlan,
            control_ve: cluster.control_ve,
            source_ip,
        }))
        .await
        .map_err(failed("Configure Cluster", host))?;
    Ok(())
}

async fn update_steps(
    session: &mut dyn DeviceSession,
    cluster: &ConfigCluster,
    node: &ClusterMemberNode,
) -> Result<(), OperationError> {
    let host = node.mgmt_ip.as_str();
    let bitmap = cluster.operation_bitmap;

    let live = session
        .execute(DeviceOperation::GetCluster)
        .await
        .and_then(|r| r.into_cluster("Get Cluster"))
        .map_err(failed("MCT Cluster Get", host))?
        .unwrap_or_default();
    debug!("[{}] live cluster {:?}", host, live);
    let (name, id) = if live.name.is_empty() {
        (cluster.name.clone(), cluster.id)
    } else {
        (live.name.clone(), live.id)
    };

    if bitmap.contains(OperationBitMap::REMOTE_PEER_IP) {
        let vlan = live.control_vlan.unwrap_or(cluster.control_vlan);
        let ve = session
            .execute(DeviceOperation::GetClusterControlVlan { vlan })
            .await
            .and_then(|r| r.into_control_ve("Get Cluster Control VLAN"))
            .map_err(failed("MCT Cluster Get Control VLAN", host))?
            .unwrap_or(cluster.control_ve);
        let address = session
            .execute(DeviceOperation::GetInterfaceVe { ve })
            .await
            .and_then(|r| r.into_address("Get Interface VE"))
            .map_err(failed("MCT Cluster Get Control VE", host))?;
        if let Some(address) = address {
            session
                .execute(DeviceOperation::UnconfigureInterfaceVeIp { ve, ip: address })
                .await
                .map_err(failed("MCT Cluster Delete VE IP", host))?;
        }
        session
            .execute(DeviceOperation::ConfigureInterfaceVeIp {
                ve,
                ip: node.remote_peer_ip.clone(),
            })
            .await
            .map_err(failed("MCT Cluster Set VE IP", host))?;
    }

    if bitmap.contains(OperationBitMap::PEER_IP) {
        session
            .execute(DeviceOperation::UndeployCluster { name: name.clone(), id })
            .await
            .map_err(failed("MCT Cluster Undeploy", host))?;
        if !live.peer_ip.is_empty() {
            session
                .execute(DeviceOperation::UnconfigureClusterPeerIp {
                    name: name.clone(),
                    id,
                    peer_ip: live.peer_ip.clone(),
                })
                .await
                .map_err(failed("MCT Cluster Delete Peer IP", host))?;
        }
        session
            .execute(DeviceOperation::ConfigureClusterPeerIp {
                name: name.clone(),
                id,
                peer_ip: node.peer_ip.clone(),
            })
            .await
            .map_err(failed("MCT Cluster Set Peer IP", host))?;
    }

    let peer = &node.peer_interface;
    if bitmap.contains(OperationBitMap::MEMBER_ADD) {
        for port in &node.connecting_ports {
            session
                .execute(DeviceOperation::AddInterfaceToPo {
                    member: port.clone(),
                    port_channel: peer.name.clone(),
                    speed: peer.speed.clone(),
                })
                .await
                .map_err(failed("MCT Cluster peer interface add member", host))?;
        }
    }

    if bitmap.contains(OperationBitMap::MEMBER_DEL) {
        for port in &node.connecting_ports {
            session
                .execute(DeviceOperation::DeleteInterfaceFromPo {
                    member: port.clone(),
                    port_channel: peer.name.clone(),
                })
                .await
                .map_err(failed("MCT Cluster peer interface delete member", host))?;
        }
    }

    if bitmap.contains(OperationBitMap::SPEED) {
        session
            .execute(DeviceOperation::ConfigureInterfacePoSpeed {
                port_channel: peer.name.clone(),
                speed: peer.speed.clone(),
            })
            .await
            .map_err(failed("Configure Cluster Peer Interface Speed", host))?;
    }
    Ok(())
}

async fn delete_steps(
    session: &mut dyn DeviceSession,
    cluster: &ConfigCluster,
    node: &ClusterMemberNode,
) -> Result<(), OperationError> {
    let host = node.mgmt_ip.as_str();
    let peer = &node.peer_interface;

    session
        .execute(DeviceOperation::DeleteCluster { name: cluster.name.clone(), id: cluster.id })
        .await
        .map_err(failed("Delete Cluster", host))?;
    session
        .execute(DeviceOperation::DeleteClusterControlVe {
            vlan: cluster.control_vlan,
            ve: cluster.control_ve,
        })
        .await
        .map_err(failed("Delete Cluster Control VE", host))?;
    session
        .execute(DeviceOperation::DeleteInterfaceVe { ve: cluster.control_ve })
        .await
        .map_err(failed("Delete Cluster Control VE", host))?;
    session
        .execute(DeviceOperation::DeconfigureIpRoute {
            prefix: format!("{}/32", node.peer_loopback_ip),
            next_hop: node.peer_ip.clone(),
        })
        .await
        .map_err(failed("Deconfigure IP Route", host))?;
    session
        .execute(DeviceOperation::DeleteClusterControlVlan { vlan: cluster.control_vlan })
        .await
        .map_err(failed("Delete Cluster Control VLAN", host))?;
    for port in &node.connecting_ports {
        session
            .execute(DeviceOperation::DeleteInterfaceFromPo {
                member: port.clone(),
                port_channel: peer.name.clone(),
            })
            .await
            .map_err(failed("Delete Cluster Peer Interface", host))?;
    }
    session
        .execute(DeviceOperation::DeleteInterfacePo { name: peer.name.clone() })
        .await
        .map_err(failed("Delete Cluster Peer Interface", host))?;
    if node.principal_priority != 0 {
        session
            .execute(DeviceOperation::UnconfigureNodePrincipalPriority { node_id: node.node_id })
            .await
            .map_err(failed("Unconfigure Principal Priority", host))?;
    }
    Ok(())
}

/// Remove live cluster objects, then the desired ones; every failure is tolerated
async fn clear_steps(session: &mut dyn DeviceSession, cluster: &ConfigCluster, node: &ClusterMemberNode) {
    let host = node.mgmt_ip.clone();
    let live = match session
        .execute(DeviceOperation::GetCluster)
        .await
        .and_then(|r| r.into_cluster("Get Cluster"))
    {
        Ok(live) => live,
        Err(e) => {
            debug!("[{}] {}", host, e);
            None
        }
    };

    let mut attempts = Vec::new();
    if let Some(live) = &live {
        if !live.name.is_empty() {
            attempts.push(DeviceOperation::DeleteCluster { name: live.name.clone(), id: live.id });
        }
        if let Some(vlan) = live.control_vlan {
            let ve = session
                .execute(DeviceOperation::GetClusterControlVlan { vlan })
                .await
                .and_then(|r| r.into_control_ve("Get Cluster Control VLAN"));
            if let Ok(Some(ve)) = ve {
                attempts.push(DeviceOperation::DeleteClusterControlVe { vlan, ve });
                attempts.push(DeviceOperation::DeleteInterfaceVe { ve });
            }
            attempts.push(DeviceOperation::DeleteClusterControlVlan { vlan });
        }
        let peer_is_ve = live.peer_interface_type.eq_ignore_ascii_case("ve");
        if !peer_is_ve && !live.peer_interface_name.is_empty() {
            attempts.push(DeviceOperation::DeleteInterfacePo { name: live.peer_interface_name.clone() });
        }
    }

    attempts.extend([
        DeviceOperation::DeleteCluster { name: cluster.name.clone(), id: cluster.id },
        DeviceOperation::DeleteClusterControlVe {
            vlan: cluster.control_vlan,
            ve: cluster.control_ve,
        },
        DeviceOperation::DeleteInterfaceVe { ve: cluster.control_ve },
        DeviceOperation::DeleteClusterControlVlan { vlan: cluster.control_vlan },
        DeviceOperation::DeleteInterfacePo { name: node.peer_interface.name.clone() },
    ]);

    for operation in attempts {
        if let Err(e) = session.execute(operation).await {
            debug!("[{}] cleanup: {}", host, e);
        }
    }
    info!("[{}] cluster configuration cleared", host);
}
