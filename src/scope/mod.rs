//! Reconciliation scopes
//!
//! A scope bundles everything one reconciliation pass knows about a pool:
//! its spec, its owner's data and the cluster it belongs to. Building the
//! provider descriptors from a scope is pure.

pub mod machine_pool;

pub use machine_pool::*;

use std::collections::{BTreeMap, BTreeSet};

/// Cluster-wide inputs to descriptor building
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterContext {
    /// Cluster name, used in network tags and labels
    pub name: String,
    pub project: String,
    pub region: String,
    pub network_name: String,
    /// Candidate zones
    pub failure_domains: BTreeSet<String>,
    /// Labels applied to every resource of the cluster
    pub additional_labels: BTreeMap<String, String>,
}
