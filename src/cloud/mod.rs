//! Cloud provider layer
//!
//! Resource descriptors, error classification, naming and labelling helpers,
//! plus the two provider adapters:
//! - [`gce::GceCompute`]: Compute Engine REST API
//! - [`memory::InMemoryCompute`]: process-local provider for tests and dry runs

pub mod compute;
pub mod errors;
pub mod gce;
pub mod labels;
pub mod memory;
pub mod naming;

pub use compute::{InstanceGroupManager, InstanceTemplate, KeyScope, ResourceKey};
pub use errors::{Outcome, ProviderError, ProviderResult, ProviderResultExt};
pub use gce::{GceCompute, GceConfig, TokenSource};
pub use memory::InMemoryCompute;
pub use naming::instance_template_name;
