//! Kubernetes control loop
//!
//! Watches GCPMachinePools, plus the Cluster API MachinePools that own them
//! so bootstrap data and version changes trigger a pass on the pool.

pub mod bootstrap;
pub mod machine_pool;

pub use bootstrap::SecretBootstrapSource;
pub use machine_pool::{error_policy, reconcile, Context};

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::{debug, info, warn};

use crate::crd::{GcpMachinePool, MachinePool};

/// Watch timeout in seconds, kept below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the GCPMachinePool controller until shutdown
///
/// Watches a single namespace when `namespace` is set, otherwise all of them.
pub async fn run(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    let (pools, machine_pools): (Api<GcpMachinePool>, Api<MachinePool>) = match namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client, ns),
        ),
        None => (Api::all(client.clone()), Api::all(client)),
    };

    info!(namespace = namespace.unwrap_or("*"), "Starting GCPMachinePool controller");

    Controller::new(pools, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .watches(
            machine_pools,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            machine_pool::machine_pool_to_gcp_pool,
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((pool, _action)) => debug!(pool = %pool.name, "Reconciled"),
                Err(e) => warn!(error = %e, "Reconcile loop error"),
            }
        })
        .await;

    info!("GCPMachinePool controller stopped");
}
