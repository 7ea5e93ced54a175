//! Machine pool scope
//!
//! Turns a pool spec plus its cluster context into the instance template and
//! instance group manager descriptors. Defaulting rules:
//!
//! - boot image: explicit image, else image family, else a family derived
//!   from the Kubernetes version (`capi-ubuntu-1804-k8s-v<major>-<minor>`)
//! - boot disk type: `pd-standard` unless overridden
//! - IP forwarding: on unless explicitly `Disabled`
//! - external NAT: attached whenever `publicIP` is present
//! - network tags: user tags, then `<cluster>-node`, then `<cluster>`
//! - labels: ownership and role labels, user labels merged last

use std::sync::Arc;

use tracing::debug;

use crate::cloud::compute::{
    self, AccessConfig, AttachedDisk, AttachedDiskInitializeParams, InstanceGroupManager,
    InstanceProperties, InstanceTemplate, Metadata, MetadataItem, NetworkInterface, ResourceKey,
    Scheduling, ServiceAccount, Tags, CLOUD_PLATFORM_SCOPE, ONE_TO_ONE_NAT,
};
use crate::cloud::labels::{build_labels, merge_labels, BuildParams, ResourceLifecycle};
use crate::crd::{DiskType, GcpMachinePoolSpec, IpForwarding};
use crate::domain::ports::{BootstrapDataSource, FirstZone, ZoneSelectorRef};
use crate::error::{Error, Result};

use super::ClusterContext;

/// Role of every instance created from a pool
pub const NODE_ROLE: &str = "node";

/// Metadata key carrying the bootstrap payload
pub const USER_DATA_METADATA_KEY: &str = "user-data";

/// Prefix of the image family derived from the Kubernetes version
pub const DEFAULT_IMAGE_FAMILY_PREFIX: &str = "capi-ubuntu-1804-k8s-";

const DEFAULT_SERVICE_ACCOUNT_EMAIL: &str = "default";
const EXTERNAL_NAT_NAME: &str = "External NAT";

/// Everything one reconciliation pass knows about a pool
#[derive(Debug, Clone)]
pub struct MachinePoolScope {
    /// Pool name; also the group manager and base instance name
    pub name: String,
    pub namespace: String,
    pub spec: GcpMachinePoolSpec,
    /// Kubernetes version of the owning MachinePool
    pub version: Option<String>,
    /// Secret holding the bootstrap payload, once the bootstrap provider set it
    pub bootstrap_data_secret: Option<String>,
    /// Template last recorded in the pool status
    pub instance_template_name: Option<String>,
    pub cluster: ClusterContext,
    zone_selector: ZoneSelectorRef,
}

impl MachinePoolScope {
    /// Create a scope using the default zone selection
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        spec: GcpMachinePoolSpec,
        cluster: ClusterContext,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            spec,
            version: None,
            bootstrap_data_secret: None,
            instance_template_name: None,
            cluster,
            zone_selector: Arc::new(FirstZone),
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    pub fn with_bootstrap_data_secret(mut self, secret: Option<String>) -> Self {
        self.bootstrap_data_secret = secret;
        self
    }

    pub fn with_instance_template_name(mut self, name: Option<String>) -> Self {
        self.instance_template_name = name.filter(|n| !n.is_empty());
        self
    }

    pub fn with_zone_selector(mut self, selector: ZoneSelectorRef) -> Self {
        self.zone_selector = selector;
        self
    }

    pub fn role(&self) -> &'static str {
        NODE_ROLE
    }

    /// Zone of the pool: the spec override, else the selector's pick
    pub fn zone(&self) -> Result<String> {
        if let Some(zone) = self.spec.zone.as_ref().filter(|z| !z.is_empty()) {
            return Ok(zone.clone());
        }

        self.zone_selector
            .select(&self.cluster.failure_domains)
            .ok_or_else(|| {
                Error::Precondition(format!(
                    "cluster {} has no failure domains to place pool {}",
                    self.cluster.name, self.name
                ))
            })
    }

    /// Fetch the bootstrap payload referenced by the owning MachinePool
    pub async fn bootstrap_data(&self, source: &dyn BootstrapDataSource) -> Result<String> {
        let secret = self.bootstrap_data_secret.as_deref().ok_or_else(|| {
            Error::Precondition(
                "linked MachinePool template's bootstrap.dataSecretName is unset".to_string(),
            )
        })?;

        source.fetch(&self.namespace, secret).await
    }

    // =========================================================================
    // Instance Template
    // =========================================================================

    /// Build the unnamed instance template for this pool
    pub fn instance_template_spec(&self, bootstrap_data: &str) -> Result<InstanceTemplate> {
        let zone = self.zone()?;
        let template = &self.spec.gcp_instance_template;

        let mut tags = template.additional_network_tags.clone();
        tags.push(format!("{}-{}", self.cluster.name, self.role()));
        tags.push(self.cluster.name.clone());

        let additional = merge_labels(&self.cluster.additional_labels, &template.additional_labels);
        let labels = build_labels(BuildParams {
            cluster_name: &self.cluster.name,
            lifecycle: ResourceLifecycle::Owned,
            role: Some(self.role()),
            additional: &additional,
        });

        let can_ip_forward = template.ip_forwarding != Some(IpForwarding::Disabled);

        let mut metadata = self.additional_metadata();
        metadata.items.push(MetadataItem {
            key: USER_DATA_METADATA_KEY.to_string(),
            value: Some(bootstrap_data.to_string()),
        });

        let properties = InstanceProperties {
            machine_type: compute::machine_type_path(&zone, &template.instance_type),
            can_ip_forward,
            tags: Tags { items: tags },
            labels,
            scheduling: Scheduling {
                preemptible: template.preemptible,
            },
            disks: vec![self.boot_disk(&zone)],
            metadata,
            service_accounts: vec![self.service_account()],
            network_interfaces: vec![self.network_interface()],
        };

        debug!(
            pool = %self.name,
            zone = %zone,
            machine_type = %properties.machine_type,
            "Built instance template spec"
        );

        Ok(InstanceTemplate {
            name: String::new(),
            properties,
        })
    }

    /// Source image for the boot disk
    pub fn source_image(&self) -> String {
        let template = &self.spec.gcp_instance_template;
        if let Some(image) = &template.image {
            return image.clone();
        }
        if let Some(family) = &template.image_family {
            return family.clone();
        }

        compute::image_family_path(&self.cluster.project, &self.default_image_family())
    }

    /// Image family derived from the Kubernetes version
    pub fn default_image_family(&self) -> String {
        let version = major_minor(self.version.as_deref().unwrap_or_default())
            .map(|mm| mm.replace('.', "-"))
            .unwrap_or_default();
        format!("{}{}", DEFAULT_IMAGE_FAMILY_PREFIX, version)
    }

    fn boot_disk(&self, zone: &str) -> AttachedDisk {
        let template = &self.spec.gcp_instance_template;
        let disk_type = template.root_device_type.unwrap_or(DiskType::PdStandard);

        AttachedDisk {
            auto_delete: true,
            boot: true,
            initialize_params: AttachedDiskInitializeParams {
                disk_size_gb: template.root_device_size,
                disk_type: compute::disk_type_path(zone, disk_type.as_str()),
                source_image: self.source_image(),
            },
        }
    }

    fn additional_metadata(&self) -> Metadata {
        Metadata {
            items: self
                .spec
                .gcp_instance_template
                .additional_metadata
                .iter()
                .map(|item| MetadataItem {
                    key: item.key.clone(),
                    value: item.value.clone(),
                })
                .collect(),
        }
    }

    fn service_account(&self) -> ServiceAccount {
        match &self.spec.gcp_instance_template.service_account {
            Some(sa) => ServiceAccount {
                email: sa.email.clone(),
                scopes: sa.scopes.clone(),
            },
            None => ServiceAccount {
                email: DEFAULT_SERVICE_ACCOUNT_EMAIL.to_string(),
                scopes: vec![CLOUD_PLATFORM_SCOPE.to_string()],
            },
        }
    }

    fn network_interface(&self) -> NetworkInterface {
        let template = &self.spec.gcp_instance_template;

        // Presence is the signal, the value is not inspected
        let access_configs = match template.public_ip {
            Some(_) => vec![AccessConfig {
                r#type: ONE_TO_ONE_NAT.to_string(),
                name: EXTERNAL_NAT_NAME.to_string(),
            }],
            None => Vec::new(),
        };

        NetworkInterface {
            network: compute::network_path(&self.cluster.project, &self.cluster.network_name),
            subnetwork: template
                .subnet
                .as_ref()
                .map(|subnet| compute::subnetwork_path(&self.cluster.region, subnet)),
            access_configs,
        }
    }

    // =========================================================================
    // Instance Group Manager
    // =========================================================================

    /// Build the group manager referencing the named template
    pub fn instance_group_manager_spec(&self, template_name: &str) -> InstanceGroupManager {
        InstanceGroupManager {
            name: self.name.clone(),
            base_instance_name: self.name.clone(),
            instance_template: compute::instance_template_path(&self.cluster.project, template_name),
            target_size: i64::from(self.spec.target_size),
        }
    }

    /// Zonal key of the group manager
    pub fn instance_group_manager_key(&self) -> Result<ResourceKey> {
        Ok(ResourceKey::zonal(self.name.clone(), self.zone()?))
    }
}

/// `v<major>.<minor>` of a semantic version, `None` when it does not parse
///
/// Patch and pre-release parts are ignored. A leading `v` is optional.
pub fn major_minor(version: &str) -> Option<String> {
    let trimmed = version.strip_prefix('v').unwrap_or(version);
    let core = trimmed.split(['-', '+']).next().unwrap_or_default();
    let mut parts = core.split('.');

    let major = parse_numeric(parts.next()?)?;
    let minor = match parts.next() {
        Some(part) => parse_numeric(part)?,
        None => 0,
    };
    if let Some(patch) = parts.next() {
        parse_numeric(patch)?;
    }
    if parts.next().is_some() {
        return None;
    }

    Some(format!("v{}.{}", major, minor))
}

fn parse_numeric(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // No leading zeros in semantic versions
    if part.len() > 1 && part.starts_with('0') {
        return None;
    }
    part.parse().ok()
}
