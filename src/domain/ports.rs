//! Domain Ports - Core trait definitions for the machine pool operator
//!
//! These traits define the boundaries between the reconciliation engine and
//! external systems. Adapters implement these traits to provide concrete
//! functionality: the Compute REST API, an in-memory provider for tests, and
//! the Kubernetes secret store for bootstrap data.

use crate::cloud::compute::{InstanceGroupManager, InstanceTemplate, ResourceKey};
use crate::cloud::errors::ProviderResult;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// Compute Ports
// =============================================================================

/// Port for instance template operations
///
/// Templates are global resources. `get` reports absence as a 404 error.
#[async_trait]
pub trait InstanceTemplates: Send + Sync {
    async fn get(&self, key: &ResourceKey) -> ProviderResult<InstanceTemplate>;

    async fn insert(&self, key: &ResourceKey, template: &InstanceTemplate) -> ProviderResult<()>;

    async fn delete(&self, key: &ResourceKey) -> ProviderResult<()>;
}

/// Port for instance group manager operations
///
/// Group managers are zonal resources. `delete` returns once the group and
/// its instances are gone.
#[async_trait]
pub trait InstanceGroupManagers: Send + Sync {
    async fn get(&self, key: &ResourceKey) -> ProviderResult<InstanceGroupManager>;

    async fn insert(&self, key: &ResourceKey, igm: &InstanceGroupManager) -> ProviderResult<()>;

    async fn delete(&self, key: &ResourceKey) -> ProviderResult<()>;
}

/// A provider offering both compute resource kinds
pub trait ComputeProvider: InstanceTemplates + InstanceGroupManagers {
    /// Provider name, for logs and metrics
    fn provider_name(&self) -> &str;
}

// =============================================================================
// Bootstrap Data Port
// =============================================================================

/// Port for fetching bootstrap payloads
#[async_trait]
pub trait BootstrapDataSource: Send + Sync {
    /// Fetch the payload stored under `name` in `namespace`
    async fn fetch(&self, namespace: &str, name: &str) -> Result<String>;
}

// =============================================================================
// Placement Port
// =============================================================================

/// Picks the zone a pool's group manager lives in
pub trait ZoneSelector: Send + Sync + std::fmt::Debug {
    fn select(&self, failure_domains: &BTreeSet<String>) -> Option<String>;
}

/// Picks the lexicographically first failure domain
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstZone;

impl ZoneSelector for FirstZone {
    fn select(&self, failure_domains: &BTreeSet<String>) -> Option<String> {
        failure_domains.iter().next().cloned()
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ComputeProviderRef = Arc<dyn ComputeProvider>;
pub type BootstrapDataSourceRef = Arc<dyn BootstrapDataSource>;
pub type ZoneSelectorRef = Arc<dyn ZoneSelector>;
