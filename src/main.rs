use clap::Parser;
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use dcfabric::config_loader;
use dcfabric::device::SimulatedFabric;
use dcfabric::error::OperationErrors;
use dcfabric::model::ConfigFabricRequest;
use dcfabric::orchestrator::FabricOrchestrator;
use dcfabric::pool::FabricPools;
use env_logger::Env;
use log::info;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Provision a BGP-EVPN data-center fabric
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the fabric configuration YAML file
    #[arg(short, long)]
    config: PathBuf,

    /// Replace conflicting overlay gateway, EVPN and cluster objects
    #[arg(long)]
    force: bool,

    /// Save the running configuration after a successful push
    #[arg(long)]
    persist: bool,

    /// YAML file describing state already present on the switches
    #[arg(long)]
    existing: Option<PathBuf>,

    /// Print the operation plan as JSON
    #[arg(long)]
    json: bool,
}

/// Every management address the request touches
fn request_hosts(request: &ConfigFabricRequest) -> Vec<String> {
    let clusters = &request.clusters;
    let cluster_hosts = clusters
        .delete
        .iter()
        .chain(&clusters.update)
        .chain(&clusters.create)
        .flat_map(|cluster| cluster.members.iter().map(|m| m.mgmt_ip.clone()));
    let data_plane_hosts = request.switches.iter().flat_map(|sw| {
        sw.configure_mct_neighbors
            .members
            .iter()
            .chain(&sw.unconfigure_mct_neighbors.members)
            .map(|m| m.mgmt_ip.clone())
    });

    request
        .switches
        .iter()
        .map(|sw| sw.host.clone())
        .chain(cluster_hosts)
        .chain(data_plane_hosts)
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    // Initialize logging with default filter level of "info"
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("Starting dcfabric");
    info!("Configuration file: {:?}", args.config);

    let config = config_loader::load_config(&args.config)
        .wrap_err_with(|| format!("Failed to load fabric configuration '{}'", args.config.display()))?;

    let pools = FabricPools::default();
    let request = config.allocate(&pools).wrap_err("Failed to allocate fabric resources")?;

    // Real platform adapters are external; run against the in-memory fabric
    let fabric = SimulatedFabric::with_switches(request_hosts(&request));
    if let Some(path) = &args.existing {
        let seeds = config_loader::load_seed(path)
            .wrap_err_with(|| format!("Failed to load existing state '{}'", path.display()))?;
        for (host, seed) in seeds {
            fabric.seed(&host, seed);
        }
    }

    let orchestrator = FabricOrchestrator::new(Arc::new(fabric.clone())).with_poll_settings(config.poll_settings());
    let errors = orchestrator.configure_fabric(&request, args.force, args.persist).await;

    let plan: BTreeMap<String, _> = fabric
        .hosts()
        .into_iter()
        .map(|host| {
            let journal = fabric.journal(&host);
            (host, journal)
        })
        .collect();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan).wrap_err("Failed to render plan")?);
    } else {
        for (host, operations) in &plan {
            println!("{}:", host);
            for operation in operations {
                println!("  {}", operation.name());
            }
        }
    }

    if !errors.is_empty() {
        eprintln!("{}", OperationErrors(&errors));
        bail!("{} operation(s) failed on fabric {}", errors.len(), request.fabric_name);
    }

    info!("Fabric {} configured", request.fabric_name);
    Ok(())
}
