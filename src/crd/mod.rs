//! Custom Resource Definitions
//!
//! This module contains the CRD types the operator reads and writes:
//! - GCPMachinePool: the pool this operator reconciles (owned CRD)
//! - MachinePool: Cluster API owner of a pool (read-only projection)
//! - GCPCluster: infrastructure cluster of a pool (read-only projection)

pub mod capi;
pub mod cluster;
pub mod machine_pool;

pub use capi::*;
pub use cluster::*;
pub use machine_pool::*;
