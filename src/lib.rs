//! Machine Pool Operator
//!
//! A Kubernetes operator reconciling Cluster API `GCPMachinePool` resources
//! into a content-named instance template and a managed instance group.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                    Controller (kube-rs runtime)                      │
//! │   GCPMachinePool watch  ◄──  MachinePool watch (bootstrap, version)  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                      MachinePoolScope                                │
//! │   spec + cluster context  ──►  instance template / group manager     │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                 Managed Instance Group Service                       │
//! │   get/insert template  ──►  insert group manager                     │
//! │   delete group manager ──►  delete template (in-use tolerated)       │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                      Compute Providers                               │
//! │  ┌──────────────────────────┐  ┌───────────────────────────────┐     │
//! │  │   Compute Engine REST    │  │         In-memory             │     │
//! │  └──────────────────────────┘  └───────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cloud`]: Resource descriptors, error classification, naming, providers
//! - [`controller`]: kube-rs control loop
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Port traits between the engine and external systems
//! - [`scope`]: Descriptor building from a pool and its cluster
//! - [`services`]: Reconciliation protocol
//! - [`error`]: Error types and handling

pub mod cloud;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod scope;
pub mod services;
pub mod util;

// Re-export commonly used types
pub use cloud::{
    GceCompute, GceConfig, InMemoryCompute, InstanceGroupManager, InstanceTemplate,
    ProviderError, ResourceKey, TokenSource,
};

pub use crd::{
    GcpCluster, GcpInstanceTemplate, GcpMachinePool, GcpMachinePoolSpec, GcpMachinePoolStatus,
    MachinePool,
};

pub use domain::ports::{
    BootstrapDataSource, ComputeProvider, FirstZone, InstanceGroupManagers, InstanceTemplates,
    ZoneSelector,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::{InstrumentedCompute, Metrics};

pub use scope::{ClusterContext, MachinePoolScope};

pub use services::{ReconcileOutcome, Reconciler, Service};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
