//! Fabric orchestrator.
//!
//! This module coordinates a full provisioning run, from the per-switch
//! pipelines through MCT cluster reconciliation to the overlay gateway and
//! the final save of the running configuration.
//!
//! Switch and cluster stages are fail-closed: any error ends the run before
//! the next stage. Overlay and persist stages aggregate their errors and
//! always run to completion.

use crate::actions::{fan_out, ClusterOp, ClusterReconciler, DeviceActionSequencer, PollSettings};
use crate::device::DeviceAdapter;
use crate::error::OperationError;
use crate::model::{ClusterBatches, ConfigCluster, ConfigFabricRequest, ConfigSwitch, OperationBitMap};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Channel slots reserved per switch pipeline
const SWITCH_STEP_WRITERS: usize = 8;
/// Two member nodes, each reporting a configure and a poll error
const CLUSTER_WRITERS: usize = 4;

/// Principal flag per management IP, valid for one run only
pub type ClusterStatusCache = HashMap<String, bool>;

pub struct FabricOrchestrator {
    adapter: Arc<dyn DeviceAdapter>,
    poll: PollSettings,
}

impl FabricOrchestrator {
    pub fn new(adapter: Arc<dyn DeviceAdapter>) -> Self {
        Self {
            adapter,
            poll: PollSettings::default(),
        }
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Push `request` to every switch and cluster it names
    pub async fn configure_fabric(
        &self,
        request: &ConfigFabricRequest,
        force: bool,
        persist: bool,
    ) -> Vec<OperationError> {
        info!(
            "Configuring fabric {} ({:?}, {} switches, force={}, persist={})",
            request.fabric_name,
            request.fabric_type,
            request.switches.len(),
            force,
            persist
        );
        let sequencer = DeviceActionSequencer::new(self.adapter.clone(), request.fabric_type, force);

        let errors = run_switches(&sequencer, request.switches.clone()).await;
        if !errors.is_empty() {
            warn!("{} switch error(s), stopping before cluster configuration", errors.len());
            return errors;
        }

        let errors = self.reconcile_clusters(&request.clusters, force).await;
        if !errors.is_empty() {
            warn!("{} cluster error(s), stopping before overlay configuration", errors.len());
            return errors;
        }

        let cache = self.cluster_status_cache(&request.clusters).await;

        let overlay_role = request.fabric_type.overlay_role();
        let overlay_switches: Vec<ConfigSwitch> = request
            .switches
            .iter()
            .filter(|sw| sw.role == overlay_role && sw.overlay.enabled)
            .cloned()
            .map(|mut sw| {
                sw.mct_secondary = cache.get(&sw.host) == Some(&false);
                sw
            })
            .filter(|sw| {
                if sw.mct_secondary {
                    info!("[{}] MCT secondary, overlay gateway left to the principal", sw.host);
                }
                !sw.mct_secondary
            })
            .collect();

        let seq = sequencer.clone();
        let mut errors = fan_out(overlay_switches, 1, move |sw, sink| {
            let seq = seq.clone();
            async move { seq.configure_overlay_gateway(&sw, &sink).await }
        })
        .await;

        if persist {
            let seq = sequencer.clone();
            let persisted = fan_out(request.switches.clone(), 1, move |sw, sink| {
                let seq = seq.clone();
                async move { seq.persist(&sw, &sink).await }
            })
            .await;
            errors.extend(persisted);
        }

        if errors.is_empty() {
            info!("Fabric {} configured", request.fabric_name);
        }
        errors
    }

    /// Deletes, then updates one cluster at a time, then creates
    async fn reconcile_clusters(&self, clusters: &ClusterBatches, force: bool) -> Vec<OperationError> {
        if clusters.is_empty() {
            return Vec::new();
        }
        let reconciler = ClusterReconciler::new(self.adapter.clone(), self.poll);

        let errors = run_clusters(&reconciler, clusters.delete.clone(), ClusterOp::Delete, force).await;
        if !errors.is_empty() {
            return errors;
        }

        let mut errors = Vec::new();
        for cluster in &clusters.update {
            errors.extend(run_clusters(&reconciler, vec![cluster.clone()], ClusterOp::Update, force).await);
        }
        if !errors.is_empty() {
            return errors;
        }

        run_clusters(&reconciler, clusters.create.clone(), ClusterOp::Create, force).await
    }

    /// Ask the first member of every updated or created cluster who is principal
    async fn cluster_status_cache(&self, clusters: &ClusterBatches) -> ClusterStatusCache {
        let mut cache = ClusterStatusCache::new();
        let reconciler = ClusterReconciler::new(self.adapter.clone(), self.poll);

        for cluster in clusters.update.iter().chain(clusters.create.iter()) {
            let Some(first) = cluster.members.first() else {
                continue;
            };
            if cache.contains_key(&first.mgmt_ip) {
                continue;
            }
            match reconciler.status(&first.mgmt_ip, &first.credentials).await {
                Ok(status) => {
                    for member in status.members {
                        cache.insert(member.mgmt_ip, member.is_principal);
                    }
                }
                Err(e) => warn!("[{}] management cluster status unavailable: {}", first.mgmt_ip, e),
            }
        }
        cache
    }
}

async fn run_switches(sequencer: &DeviceActionSequencer, switches: Vec<ConfigSwitch>) -> Vec<OperationError> {
    let seq = sequencer.clone();
    fan_out(switches, SWITCH_STEP_WRITERS, move |sw, sink| {
        let seq = seq.clone();
        async move { seq.configure_switch(&sw, &sink).await }
    })
    .await
}

async fn run_clusters(
    reconciler: &ClusterReconciler,
    clusters: Vec<ConfigCluster>,
    op: ClusterOp,
    force: bool,
) -> Vec<OperationError> {
    let reconciler = reconciler.clone();
    fan_out(clusters, CLUSTER_WRITERS, move |mut cluster, sink| {
        let reconciler = reconciler.clone();
        let mut force = force;
        if op == ClusterOp::Create && cluster.operation_bitmap.contains(OperationBitMap::FORCE_CREATE) {
            cluster.operation_bitmap = OperationBitMap::empty();
            force = true;
        }
        async move { reconciler.reconcile(cluster, op, force, &sink).await }
    })
    .await
}
