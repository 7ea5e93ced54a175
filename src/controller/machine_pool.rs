//! GCPMachinePool reconciliation
//!
//! Resolves the pool's collaborators (owning MachinePool, GCPCluster,
//! bootstrap Secret), hands a scope to the managed instance group service
//! and records the outcome in the pool's status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bootstrap::SecretBootstrapSource;
use crate::crd::{
    Condition, ConditionSeverity, GcpCluster, GcpMachinePool, GcpMachinePoolStatus, MachinePool,
    CLUSTER_API_GROUP, CLUSTER_NAME_LABEL, INSTANCE_TEMPLATE_NOT_READY_REASON,
    INSTANCE_TEMPLATE_READY_CONDITION, MACHINE_POOL_FINALIZER, MIG_NOT_READY_REASON,
    MIG_READY_CONDITION, WAITING_FOR_BOOTSTRAP_DATA_REASON,
    WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON,
};
use crate::domain::ports::{BootstrapDataSourceRef, ComputeProviderRef, FirstZone, ZoneSelectorRef};
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::Metrics;
use crate::scope::MachinePoolScope;
use crate::services::{ReconcileOutcome, Reconciler, Service};

/// Group of the infrastructure resources this operator owns
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// Field manager used for patches
pub const FIELD_MANAGER: &str = "machine-pool-operator";

/// Requeue interval while the cluster infrastructure is not ready
const CLUSTER_NOT_READY_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue interval for errors asking for backoff
const ERROR_REQUEUE: Duration = Duration::from_secs(15);

// =============================================================================
// Context
// =============================================================================

/// Shared state for every reconciliation
pub struct Context {
    pub client: Client,
    pub compute: ComputeProviderRef,
    pub bootstrap: BootstrapDataSourceRef,
    pub zone_selector: ZoneSelectorRef,
    pub metrics: Arc<Metrics>,
    /// Cancelled on shutdown; each pass runs under a child token
    pub shutdown: CancellationToken,
}

impl Context {
    pub fn new(
        client: Client,
        compute: ComputeProviderRef,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bootstrap: Arc::new(SecretBootstrapSource::new(client.clone())),
            client,
            compute,
            zone_selector: Arc::new(FirstZone),
            metrics,
            shutdown,
        }
    }

    pub fn with_zone_selector(mut self, selector: ZoneSelectorRef) -> Self {
        self.zone_selector = selector;
        self
    }
}

// =============================================================================
// Reconcile
// =============================================================================

/// Reconcile a GCPMachinePool
pub async fn reconcile(pool: Arc<GcpMachinePool>, ctx: Arc<Context>) -> Result<Action> {
    let name = pool.name_any();
    let namespace = pool
        .namespace()
        .ok_or_else(|| Error::Precondition(format!("GCPMachinePool {} has no namespace", name)))?;
    let pools: Api<GcpMachinePool> = Api::namespaced(ctx.client.clone(), &namespace);
    let started = Instant::now();

    if pool.is_deleted() {
        if !pool.has_finalizer() {
            return Ok(Action::await_change());
        }
        let result = reconcile_delete(&pool, &pools, &namespace, &ctx).await;
        ctx.metrics
            .record_reconcile("delete", result.is_ok(), started.elapsed());
        return result;
    }

    if !pool.has_finalizer() {
        patch_finalizers(&pools, &name, finalizers_with(&pool)).await?;
        debug!(pool = %name, "Added finalizer");
    }

    let result = reconcile_normal(&pool, &pools, &namespace, &ctx).await;
    ctx.metrics
        .record_reconcile("reconcile", result.is_ok(), started.elapsed());
    result
}

/// Collaborators a pass needs before it can build a scope
struct Resolved {
    machine_pool: MachinePool,
    cluster: GcpCluster,
    cluster_name: String,
}

/// Look up the owning MachinePool and the GCPCluster, `None` while either is missing
async fn resolve(pool: &GcpMachinePool, namespace: &str, client: &Client) -> Result<Option<Resolved>> {
    let name = pool.name_any();

    let Some(owner) = owner_machine_pool_name(pool) else {
        info!(pool = %name, "Waiting for MachinePool controller to set owner reference");
        return Ok(None);
    };

    let machine_pools: Api<MachinePool> = Api::namespaced(client.clone(), namespace);
    let Some(machine_pool) = machine_pools.get_opt(&owner).await? else {
        info!(pool = %name, machine_pool = %owner, "Owner MachinePool not found");
        return Ok(None);
    };

    let Some(cluster_name) = cluster_name(pool, &machine_pool) else {
        info!(pool = %name, "Pool is not associated with a cluster");
        return Ok(None);
    };

    let clusters: Api<GcpCluster> = Api::namespaced(client.clone(), namespace);
    let Some(cluster) = clusters.get_opt(&cluster_name).await? else {
        info!(pool = %name, cluster = %cluster_name, "GCPCluster not found");
        return Ok(None);
    };

    Ok(Some(Resolved {
        machine_pool,
        cluster,
        cluster_name,
    }))
}

async fn reconcile_normal(
    pool: &GcpMachinePool,
    pools: &Api<GcpMachinePool>,
    namespace: &str,
    ctx: &Context,
) -> Result<Action> {
    let name = pool.name_any();
    let Some(resolved) = resolve(pool, namespace, &ctx.client).await? else {
        return Ok(Action::await_change());
    };

    if !resolved.cluster.is_ready() {
        info!(pool = %name, "Cluster infrastructure is not ready yet");
        let status = waiting_status(
            pool.status.as_ref(),
            WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON,
        );
        patch_status(pools, &name, &status).await?;
        return Ok(Action::requeue(CLUSTER_NOT_READY_REQUEUE));
    }

    if resolved
        .machine_pool
        .spec
        .template
        .spec
        .bootstrap
        .data_secret_name
        .is_none()
    {
        info!(pool = %name, "Bootstrap data secret reference is not yet available");
        let status = waiting_status(pool.status.as_ref(), WAITING_FOR_BOOTSTRAP_DATA_REASON);
        patch_status(pools, &name, &status).await?;
        return Ok(Action::await_change());
    }

    let scope = build_scope(pool, namespace, &resolved, ctx.zone_selector.clone());
    let service = Service::new(scope, ctx.compute.clone(), ctx.bootstrap.clone());
    let cancel = ctx.shutdown.child_token();

    match service.reconcile(&cancel).await {
        Ok(outcome) => {
            info!(
                pool = %name,
                template = %outcome.template_name,
                template_created = outcome.template_created,
                group_manager_created = outcome.group_manager_created,
                group_manager_template = %outcome.group_manager_template,
                "Reconciled machine pool"
            );
            let status = ready_status(pool.status.as_ref(), &outcome, pool.spec.target_size);
            patch_status(pools, &name, &status).await?;
            Ok(Action::await_change())
        }
        Err(err) => {
            if !matches!(err, Error::Cancelled { .. }) {
                let status = failed_status(pool.status.as_ref(), &err);
                if let Err(patch_err) = patch_status(pools, &name, &status).await {
                    warn!(pool = %name, error = %patch_err, "Failed to record failure in status");
                }
            }
            Err(err)
        }
    }
}

async fn reconcile_delete(
    pool: &GcpMachinePool,
    pools: &Api<GcpMachinePool>,
    namespace: &str,
    ctx: &Context,
) -> Result<Action> {
    let name = pool.name_any();

    match resolve(pool, namespace, &ctx.client).await? {
        Some(resolved) => {
            let scope = build_scope(pool, namespace, &resolved, ctx.zone_selector.clone());
            let service = Service::new(scope, ctx.compute.clone(), ctx.bootstrap.clone());
            service.delete(&ctx.shutdown.child_token()).await?;
        }
        None => {
            warn!(
                pool = %name,
                "Owner MachinePool or GCPCluster is gone, cannot locate provider resources"
            );
        }
    }

    patch_finalizers(pools, &name, finalizers_without(pool)).await?;
    info!(pool = %name, "Removed finalizer");
    Ok(Action::await_change())
}

/// Requeue policy on reconcile failure
pub fn error_policy(pool: Arc<GcpMachinePool>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        pool = %pool.name_any(),
        error = %error,
        retryable = error.is_retryable(),
        "Reconciliation failed"
    );
    requeue_action(error.action())
}

pub fn requeue_action(action: ErrorAction) -> Action {
    match action {
        ErrorAction::RequeueWithBackoff => Action::requeue(ERROR_REQUEUE),
        ErrorAction::RequeueAfter(after) => Action::requeue(after),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Name of the owning Cluster API MachinePool
pub fn owner_machine_pool_name(pool: &GcpMachinePool) -> Option<String> {
    pool.owner_references()
        .iter()
        .find(|owner| {
            owner.kind == "MachinePool"
                && owner.api_version.split('/').next() == Some(CLUSTER_API_GROUP)
        })
        .map(|owner| owner.name.clone())
}

/// Cluster name from the pool's label, else from the MachinePool spec
pub fn cluster_name(pool: &GcpMachinePool, machine_pool: &MachinePool) -> Option<String> {
    pool.labels()
        .get(CLUSTER_NAME_LABEL)
        .filter(|name| !name.is_empty())
        .cloned()
        .or_else(|| {
            let name = &machine_pool.spec.cluster_name;
            (!name.is_empty()).then(|| name.clone())
        })
}

/// Map a MachinePool to the GCPMachinePool it references
pub fn machine_pool_to_gcp_pool(machine_pool: MachinePool) -> Option<ObjectRef<GcpMachinePool>> {
    let infra = &machine_pool.spec.template.spec.infrastructure_ref;
    if infra.kind != "GCPMachinePool" || infra.group() != INFRASTRUCTURE_GROUP || infra.name.is_empty()
    {
        return None;
    }

    let namespace = infra.namespace.clone().or_else(|| machine_pool.namespace())?;
    Some(ObjectRef::new(&infra.name).within(&namespace))
}

fn build_scope(
    pool: &GcpMachinePool,
    namespace: &str,
    resolved: &Resolved,
    zone_selector: ZoneSelectorRef,
) -> MachinePoolScope {
    let machine = &resolved.machine_pool.spec.template.spec;
    MachinePoolScope::new(
        pool.name_any(),
        namespace,
        pool.spec.clone(),
        resolved.cluster.context(&resolved.cluster_name),
    )
    .with_version(machine.version.clone())
    .with_bootstrap_data_secret(machine.bootstrap.data_secret_name.clone())
    .with_instance_template_name(
        pool.status
            .as_ref()
            .and_then(|status| status.instance_template_name.clone()),
    )
    .with_zone_selector(zone_selector)
}

/// Status after a successful pass
pub fn ready_status(
    previous: Option<&GcpMachinePoolStatus>,
    outcome: &ReconcileOutcome,
    target_size: i32,
) -> GcpMachinePoolStatus {
    let mut status = previous.cloned().unwrap_or_default();
    status.ready = true;
    status.replicas = target_size;
    // Record what the group manager points at, so deletion can find it
    status.instance_template_name = Some(outcome.group_manager_template.clone());
    status.set_condition(Condition::mark_true(INSTANCE_TEMPLATE_READY_CONDITION));
    status.set_condition(Condition::mark_true(MIG_READY_CONDITION));
    status
}

/// Status while waiting on a collaborator
pub fn waiting_status(previous: Option<&GcpMachinePoolStatus>, reason: &str) -> GcpMachinePoolStatus {
    let mut status = previous.cloned().unwrap_or_default();
    status.ready = false;
    status.set_condition(Condition::mark_false(
        MIG_READY_CONDITION,
        reason,
        ConditionSeverity::Info,
        "",
    ));
    status
}

/// Status after a failed pass
pub fn failed_status(previous: Option<&GcpMachinePoolStatus>, error: &Error) -> GcpMachinePoolStatus {
    let mut status = previous.cloned().unwrap_or_default();
    status.ready = false;

    let condition = match error {
        Error::InstanceTemplate { .. } => Condition::mark_false(
            INSTANCE_TEMPLATE_READY_CONDITION,
            INSTANCE_TEMPLATE_NOT_READY_REASON,
            ConditionSeverity::Error,
            error.to_string(),
        ),
        Error::InstanceGroup { .. } => Condition::mark_false(
            MIG_READY_CONDITION,
            MIG_NOT_READY_REASON,
            ConditionSeverity::Error,
            error.to_string(),
        ),
        _ => Condition::mark_false(
            MIG_READY_CONDITION,
            MIG_NOT_READY_REASON,
            ConditionSeverity::Warning,
            error.to_string(),
        ),
    };
    status.set_condition(condition);
    status
}

fn finalizers_with(pool: &GcpMachinePool) -> Vec<String> {
    let mut finalizers = pool.finalizers().to_vec();
    if !finalizers.iter().any(|f| f == MACHINE_POOL_FINALIZER) {
        finalizers.push(MACHINE_POOL_FINALIZER.to_string());
    }
    finalizers
}

fn finalizers_without(pool: &GcpMachinePool) -> Vec<String> {
    pool.finalizers()
        .iter()
        .filter(|f| f.as_str() != MACHINE_POOL_FINALIZER)
        .cloned()
        .collect()
}

async fn patch_finalizers(
    pools: &Api<GcpMachinePool>,
    name: &str,
    finalizers: Vec<String>,
) -> Result<()> {
    let patch = serde_json::json!({
        "metadata": { "finalizers": finalizers }
    });
    pools
        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn patch_status(
    pools: &Api<GcpMachinePool>,
    name: &str,
    status: &GcpMachinePoolStatus,
) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    pools
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
