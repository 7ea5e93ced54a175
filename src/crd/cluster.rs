//! GCPCluster
//!
//! Read-only projection of the infrastructure cluster a pool belongs to.
//! Supplies the project, region, network and failure domains used when
//! building instance templates.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::scope::ClusterContext;

/// Network used when the cluster does not name one
pub const DEFAULT_NETWORK_NAME: &str = "default";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "GCPCluster",
    root = "GcpCluster",
    plural = "gcpclusters",
    status = "GcpClusterStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GcpClusterSpec {
    pub project: String,

    pub region: String,

    #[serde(default)]
    pub network: NetworkSpec,

    /// Labels applied to every provider resource of the cluster
    #[serde(default)]
    pub additional_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NetworkSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcpClusterStatus {
    #[serde(default)]
    pub ready: bool,

    /// Zones available to the cluster, keyed by zone name
    #[serde(default)]
    pub failure_domains: BTreeMap<String, FailureDomainSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomainSpec {
    #[serde(default)]
    pub control_plane: bool,
}

impl GcpCluster {
    /// Whether the cluster infrastructure has been provisioned
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Cluster context for the reconciliation engine
    pub fn context(&self, cluster_name: &str) -> ClusterContext {
        let failure_domains: BTreeSet<String> = self
            .status
            .as_ref()
            .map(|s| s.failure_domains.keys().cloned().collect())
            .unwrap_or_default();

        ClusterContext {
            name: cluster_name.to_string(),
            project: self.spec.project.clone(),
            region: self.spec.region.clone(),
            network_name: self
                .spec
                .network
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_NETWORK_NAME.to_string()),
            failure_domains,
            additional_labels: self.spec.additional_labels.clone(),
        }
    }
}
