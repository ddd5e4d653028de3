//! # dcfabric - Provisioning for BGP-EVPN data-center fabrics
//!
//! This library turns the desired state of a fabric into ordered,
//! concurrent configuration pushes against its switches.
//!
//! ## Overview
//!
//! A fabric is a set of spine/leaf (CLOS) or rack (non-CLOS) switches
//! running an eBGP underlay and a VXLAN/EVPN overlay. Leaf and rack pairs
//! may form MCT clusters for multi-chassis link aggregation. dcfabric hands
//! out ASNs and addresses from per-fabric pools, pushes every switch in
//! parallel, reconciles the MCT clusters and finally configures the overlay
//! gateway and saves the running configuration.
//!
//! ## Key Features
//!
//! - **Resource Pools**: ASN, IP and IP-pair pools with atomic allocation per category
//! - **Switch Pipelines**: System, interface, BGP, EVPN and data-plane steps per switch
//! - **MCT Clusters**: Create, incremental update, delete and forced cleanup
//! - **Failure Aggregation**: Every failed step is reported with host and operation
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `pool`: ASN, IP and IP-pair allocation pools
//! - `model`: Desired-state structures for switches and clusters
//! - `device`: Adapter seam, device operations and the simulated fabric
//! - `actions`: Per-switch pipeline and MCT cluster reconciliation
//! - `orchestrator`: Stage ordering and error aggregation for a full run
//! - `config`: Fabric file structures, validation and allocation
//! - `config_loader`: Fabric file loading
//! - `error`: Errors reported by device actions
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use dcfabric::{config_loader, device::SimulatedFabric, orchestrator::FabricOrchestrator, pool::FabricPools};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> color_eyre::Result<()> {
//! let config = config_loader::load_config(Path::new("fabric.yaml"))?;
//! let pools = FabricPools::default();
//! let request = config.allocate(&pools)?;
//!
//! let fabric = SimulatedFabric::with_switches(request.switches.iter().map(|sw| sw.host.clone()));
//! let errors = FabricOrchestrator::new(Arc::new(fabric))
//!     .with_poll_settings(config.poll_settings())
//!     .configure_fabric(&request, false, true)
//!     .await;
//! assert!(errors.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! settings:
//!   name: default
//!   fabric_type: Clos
//!   cluster_poll_interval: 15s
//!
//! pools:
//!   asn:
//!     - category: Leaf
//!       range: 65000-65534
//!   ip:
//!     - category: Loopback
//!       range: 172.31.254.0/24
//!
//! switches:
//!   - host: 10.24.0.1
//!     role: Leaf
//! ```
//!
//! ## Error Handling
//!
//! Library modules return typed `thiserror` errors. Device failures never
//! abort a run on their own: they are collected as [`error::OperationError`]
//! values, each naming the host and operation that failed.

pub mod actions;
pub mod config;
pub mod config_loader;
pub mod device;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod pool;
