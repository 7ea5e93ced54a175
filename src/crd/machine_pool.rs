//! GCPMachinePool CRD
//!
//! Infrastructure counterpart of a Cluster API MachinePool: describes the
//! instances of a pool and how many of them to run.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finalizer guarding provider cleanup
pub const MACHINE_POOL_FINALIZER: &str = "gcpmachinepool.infrastructure.cluster.x-k8s.io";

// =============================================================================
// Conditions
// =============================================================================

/// Reports the status of the managed instance group
pub const MIG_READY_CONDITION: &str = "MIGReady";

/// Reports the status of the pool's instance template
pub const INSTANCE_TEMPLATE_READY_CONDITION: &str = "InstanceTemplateReady";

/// Waiting for the bootstrap provider to publish bootstrap data
pub const WAITING_FOR_BOOTSTRAP_DATA_REASON: &str = "WaitingForBootstrapData";

/// Waiting for the cluster infrastructure to become ready
pub const WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON: &str = "WaitingForClusterInfrastructure";

/// The instance group was not created successfully
pub const MIG_NOT_READY_REASON: &str = "MIGNotReady";

/// The instance template was not created successfully
pub const INSTANCE_TEMPLATE_NOT_READY_REASON: &str = "InstanceTemplateNotReady";

// =============================================================================
// GCPMachinePool CRD
// =============================================================================

/// GCPMachinePool describes a managed group of identical instances
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "GCPMachinePool",
    root = "GcpMachinePool",
    plural = "gcpmachinepools",
    shortname = "gcpmp",
    category = "cluster-api",
    status = "GcpMachinePoolStatus",
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.ready"}"#,
    printcolumn = r#"{"name": "Replicas", "type": "integer", "jsonPath": ".status.replicas"}"#,
    printcolumn = r#"{"name": "Template", "type": "string", "priority": 1, "jsonPath": ".status.instanceTemplateName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GcpMachinePoolSpec {
    /// Number of instances the group manager should run
    #[serde(default)]
    pub target_size: i32,

    /// Zone override; defaults to the first failure domain of the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Instance template properties
    pub gcp_instance_template: GcpInstanceTemplate,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Instance properties of the pool
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcpInstanceTemplate {
    /// Machine type, e.g. n1-standard-2
    #[serde(default)]
    pub instance_type: String,

    /// Network tags added before the generated cluster tags
    #[serde(default)]
    pub additional_network_tags: Vec<String>,

    /// Labels merged over the cluster's additional labels
    #[serde(default)]
    pub additional_labels: BTreeMap<String, String>,

    /// Run preemptible instances
    #[serde(default, alias = "preemptile")]
    pub preemptible: bool,

    /// IP forwarding, enabled unless set to Disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_forwarding: Option<IpForwarding>,

    /// Full image reference; wins over `imageFamily`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image family reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_family: Option<String>,

    /// Boot disk type, pd-standard when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device_type: Option<DiskType>,

    /// Boot disk size in GB
    #[serde(default)]
    pub root_device_size: i64,

    /// Metadata items, kept in order
    #[serde(default)]
    pub additional_metadata: Vec<MetadataItem>,

    /// Service account attached to the instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccount>,

    /// Attach an external NAT address when set, whatever the value
    #[serde(default, rename = "publicIP", skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<bool>,

    /// Subnetwork name within the cluster region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
}

/// IP forwarding setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum IpForwarding {
    Enabled,
    Disabled,
}

/// Persistent disk type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DiskType {
    #[default]
    #[serde(rename = "pd-standard")]
    PdStandard,
    #[serde(rename = "pd-ssd")]
    PdSsd,
    #[serde(rename = "local-ssd")]
    LocalSsd,
}

impl DiskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskType::PdStandard => "pd-standard",
            DiskType::PdSsd => "pd-ssd",
            DiskType::LocalSsd => "local-ssd",
        }
    }
}

impl std::fmt::Display for DiskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Instance metadata key/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MetadataItem {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Service account email and scopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceAccount {
    pub email: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of the GCPMachinePool
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcpMachinePoolStatus {
    /// Template and group manager exist
    #[serde(default)]
    pub ready: bool,

    /// Target size requested from the group manager
    #[serde(default)]
    pub replicas: i32,

    /// Name of the template the group manager was created from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_template_name: Option<String>,

    /// Conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Condition severity for False conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionSeverity {
    Error,
    Warning,
    Info,
}

/// Pool condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status: True, False, Unknown
    pub status: String,
    /// Severity, set when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    /// A True condition
    pub fn mark_true(r#type: &str) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: "True".to_string(),
            severity: None,
            last_transition_time: Some(Utc::now()),
            reason: None,
            message: None,
        }
    }

    /// A False condition with a reason
    pub fn mark_false(
        r#type: &str,
        reason: &str,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            r#type: r#type.to_string(),
            status: "False".to_string(),
            severity: Some(severity),
            last_transition_time: Some(Utc::now()),
            reason: Some(reason.to_string()),
            message: (!message.is_empty()).then_some(message),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl GcpMachinePool {
    /// Whether deletion has been requested
    pub fn is_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the cleanup finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == MACHINE_POOL_FINALIZER))
    }
}

impl GcpMachinePoolStatus {
    /// Set a condition, keeping the transition time when the status is unchanged
    pub fn set_condition(&mut self, mut condition: Condition) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }

    /// Look up a condition by type
    pub fn condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_deserialization() {
        let spec: GcpMachinePoolSpec = serde_json::from_value(serde_json::json!({
            "targetSize": 3,
            "gcpInstanceTemplate": {
                "instanceType": "n1-standard-2",
                "preemptile": true,
                "ipForwarding": "Disabled",
                "rootDeviceType": "pd-ssd",
                "rootDeviceSize": 50,
                "publicIP": false,
                "additionalMetadata": [{"key": "a", "value": "b"}]
            }
        }))
        .unwrap();

        let template = &spec.gcp_instance_template;
        assert_eq!(spec.target_size, 3);
        assert!(template.preemptible);
        assert_eq!(template.ip_forwarding, Some(IpForwarding::Disabled));
        assert_eq!(template.root_device_type, Some(DiskType::PdSsd));
        assert_eq!(template.public_ip, Some(false));
        assert_eq!(template.additional_metadata.len(), 1);
        assert!(spec.zone.is_none());
    }

    #[test]
    fn test_disk_type_display() {
        assert_eq!(format!("{}", DiskType::PdStandard), "pd-standard");
        assert_eq!(format!("{}", DiskType::LocalSsd), "local-ssd");
    }

    #[test]
    fn test_set_condition() {
        let mut status = GcpMachinePoolStatus::default();
        status.set_condition(Condition::mark_false(
            MIG_READY_CONDITION,
            WAITING_FOR_BOOTSTRAP_DATA_REASON,
            ConditionSeverity::Info,
            "",
        ));
        assert_eq!(status.conditions.len(), 1);
        assert!(status.conditions[0].message.is_none());

        status.set_condition(Condition::mark_true(MIG_READY_CONDITION));
        assert_eq!(status.conditions.len(), 1);
        assert!(status.condition(MIG_READY_CONDITION).unwrap().is_true());

        status.set_condition(Condition::mark_true(INSTANCE_TEMPLATE_READY_CONDITION));
        assert_eq!(status.conditions.len(), 2);
    }

    #[test]
    fn test_set_condition_keeps_transition_time() {
        let mut status = GcpMachinePoolStatus::default();
        let first = Condition::mark_true(MIG_READY_CONDITION);
        let first_time = first.last_transition_time;
        status.set_condition(first);

        let mut again = Condition::mark_true(MIG_READY_CONDITION);
        again.last_transition_time = None;
        status.set_condition(again);

        assert_eq!(
            status.condition(MIG_READY_CONDITION).unwrap().last_transition_time,
            first_time
        );
    }
}
