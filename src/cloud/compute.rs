//! Compute resource descriptors
//!
//! Provider-agnostic descriptions of the two resources a machine pool owns:
//! an immutable instance template and the instance group manager that
//! stamps instances out of it. Field names follow the Compute API JSON so
//! the REST adapter can send them as-is.
//!
//! Only ordered containers are used (`Vec`, `BTreeMap`) so that serializing a
//! descriptor always produces the same bytes for the same content.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OAuth scope granting access to all Cloud APIs
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Access config type for a one-to-one external NAT
pub const ONE_TO_ONE_NAT: &str = "ONE_TO_ONE_NAT";

// =============================================================================
// Resource Keys
// =============================================================================

/// Scope of a provider resource key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyScope {
    Global,
    Zonal(String),
}

/// Key addressing a provider resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub name: String,
    pub scope: KeyScope,
}

impl ResourceKey {
    /// Key for a global resource
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: KeyScope::Global,
        }
    }

    /// Key for a zonal resource
    pub fn zonal(name: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: KeyScope::Zonal(zone.into()),
        }
    }

    /// Zone of a zonal key
    pub fn zone(&self) -> Option<&str> {
        match &self.scope {
            KeyScope::Zonal(zone) => Some(zone),
            KeyScope::Global => None,
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            KeyScope::Global => write!(f, "global/{}", self.name),
            KeyScope::Zonal(zone) => write!(f, "zones/{}/{}", zone, self.name),
        }
    }
}

// =============================================================================
// Relative Resource Identifiers
// =============================================================================

pub fn machine_type_path(zone: &str, machine_type: &str) -> String {
    format!("zones/{}/machineTypes/{}", zone, machine_type)
}

pub fn disk_type_path(zone: &str, disk_type: &str) -> String {
    format!("zones/{}/diskTypes/{}", zone, disk_type)
}

pub fn image_family_path(project: &str, family: &str) -> String {
    format!("projects/{}/global/images/family/{}", project, family)
}

pub fn network_path(project: &str, network: &str) -> String {
    format!("projects/{}/global/networks/{}", project, network)
}

pub fn subnetwork_path(region: &str, subnet: &str) -> String {
    format!("regions/{}/subnetworks/{}", region, subnet)
}

/// Reference to a named instance template, as used by a group manager
pub fn instance_template_path(project: &str, name: &str) -> String {
    format!("projects/{}/global/instanceTemplates/{}", project, name)
}

pub fn instance_group_manager_path(project: &str, zone: &str, name: &str) -> String {
    format!(
        "projects/{}/zones/{}/instanceGroupManagers/{}",
        project, zone, name
    )
}

// =============================================================================
// Instance Template
// =============================================================================

/// Immutable blueprint for the instances of a pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTemplate {
    /// Assigned from the content of `properties`, never part of it
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    pub properties: InstanceProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceProperties {
    pub machine_type: String,

    #[serde(default)]
    pub can_ip_forward: bool,

    #[serde(default)]
    pub tags: Tags,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub scheduling: Scheduling,

    #[serde(default)]
    pub disks: Vec<AttachedDisk>,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub service_accounts: Vec<ServiceAccount>,

    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tags {
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scheduling {
    #[serde(default)]
    pub preemptible: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    pub auto_delete: bool,
    pub boot: bool,
    pub initialize_params: AttachedDiskInitializeParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDiskInitializeParams {
    /// Zero lets the provider size the disk from the image
    #[serde(
        default,
        skip_serializing_if = "is_zero",
        deserialize_with = "int64::deserialize"
    )]
    pub disk_size_gb: i64,
    pub disk_type: String,
    pub source_image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

impl Metadata {
    /// Value of the first item with `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.key == key)
            .and_then(|item| item.value.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub email: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub network: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnetwork: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(rename = "type")]
    pub r#type: String,
    pub name: String,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// The Compute API encodes int64 fields as JSON strings but accepts numbers
mod int64 {
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(i64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

// =============================================================================
// Instance Group Manager
// =============================================================================

/// Zonal group of identical instances created from one template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroupManager {
    pub name: String,
    pub base_instance_name: String,
    /// Relative identifier of the template, never the embedded object
    pub instance_template: String,
    pub target_size: i64,
}

impl InstanceGroupManager {
    /// Name of the template this manager points at
    pub fn template_name(&self) -> &str {
        self.instance_template
            .rsplit('/')
            .next()
            .unwrap_or(&self.instance_template)
    }
}
