//! Managed instance group service
//!
//! Owns two provider resources per pool: a global instance template named
//! after its content, and a zonal instance group manager pointing at it.
//!
//! Create path: get the template by name and insert it when absent, then
//! insert the group manager and treat "already exists" as success.
//!
//! Delete path: delete the group manager first, then the template. The
//! template is located through the group manager's reference, the name
//! recorded in status, or as a last resort by rebuilding it. A template
//! still referenced by another group manager is left for whoever deletes
//! the last reference.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{guarded, ReconcileOutcome, Reconciler};
use crate::cloud::compute::{InstanceGroupManager, InstanceTemplate, ResourceKey};
use crate::cloud::errors::{classify, is_already_exists, is_not_found, Outcome, ProviderResultExt};
use crate::domain::ports::{
    BootstrapDataSourceRef, ComputeProviderRef, InstanceGroupManagers, InstanceTemplates,
};
use crate::error::{Error, Result};
use crate::scope::MachinePoolScope;

/// Reconciles the template and group manager of one pool
pub struct Service {
    scope: MachinePoolScope,
    compute: ComputeProviderRef,
    bootstrap: BootstrapDataSourceRef,
}

impl Service {
    pub fn new(
        scope: MachinePoolScope,
        compute: ComputeProviderRef,
        bootstrap: BootstrapDataSourceRef,
    ) -> Self {
        Self {
            scope,
            compute,
            bootstrap,
        }
    }

    pub fn scope(&self) -> &MachinePoolScope {
        &self.scope
    }

    /// Fetch bootstrap data and build the named template
    async fn named_template(&self, cancel: &CancellationToken) -> Result<InstanceTemplate> {
        let bootstrap = guarded(
            cancel,
            "fetching bootstrap data",
            self.scope.bootstrap_data(self.bootstrap.as_ref()),
        )
        .await??;

        self.scope
            .instance_template_spec(&bootstrap)?
            .with_content_name()
    }

    async fn ensure_template(
        &self,
        cancel: &CancellationToken,
        template: &InstanceTemplate,
    ) -> Result<bool> {
        let key = ResourceKey::global(template.name.clone());
        let compute = self.compute.as_ref();

        let existing = guarded(
            cancel,
            "getting instance template",
            InstanceTemplates::get(compute, &key),
        )
        .await?;
        debug!(resource = "instance_template", key = %key, outcome = %classify(&existing), "Get");

        match existing {
            Ok(_) => Ok(false),
            Err(err) if is_not_found(&err) => {
                guarded(
                    cancel,
                    "inserting instance template",
                    InstanceTemplates::insert(compute, &key, template),
                )
                .await?
                .map_err(|source| Error::InstanceTemplate {
                    operation: "inserting",
                    source,
                })?;
                info!(resource = "instance_template", key = %key, "Created instance template");
                Ok(true)
            }
            Err(source) => Err(Error::InstanceTemplate {
                operation: "getting",
                source,
            }),
        }
    }

    /// Insert the group manager; returns whether it was created and the
    /// template it references
    async fn ensure_group_manager(
        &self,
        cancel: &CancellationToken,
        template_name: &str,
    ) -> Result<(bool, String)> {
        let key = self.scope.instance_group_manager_key()?;
        let igm = self.scope.instance_group_manager_spec(template_name);

        let inserted = guarded(
            cancel,
            "inserting instance group manager",
            InstanceGroupManagers::insert(self.compute.as_ref(), &key, &igm),
        )
        .await?;
        debug!(resource = "instance_group_manager", key = %key, outcome = %classify(&inserted), "Insert");

        match inserted {
            Ok(()) => {
                info!(
                    resource = "instance_group_manager",
                    key = %key,
                    target_size = igm.target_size,
                    "Created instance group manager"
                );
                Ok((true, template_name.to_string()))
            }
            Err(err) if is_already_exists(&err) => {
                let existing = self
                    .group_manager(cancel, &key)
                    .await?
                    .map(|existing| existing.template_name().to_string())
                    .unwrap_or_else(|| template_name.to_string());
                if existing != template_name {
                    info!(
                        resource = "instance_group_manager",
                        key = %key,
                        current = %existing,
                        desired = %template_name,
                        "Group manager references a template from an earlier spec"
                    );
                }
                Ok((false, existing))
            }
            Err(source) => Err(Error::InstanceGroup {
                operation: "inserting",
                source,
            }),
        }
    }

    /// Get the group manager, `None` when it does not exist
    async fn group_manager(
        &self,
        cancel: &CancellationToken,
        key: &ResourceKey,
    ) -> Result<Option<InstanceGroupManager>> {
        let existing = guarded(
            cancel,
            "getting instance group manager",
            InstanceGroupManagers::get(self.compute.as_ref(), key),
        )
        .await?;
        debug!(resource = "instance_group_manager", key = %key, outcome = %classify(&existing), "Get");

        match existing {
            Ok(igm) => Ok(Some(igm)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(source) => Err(Error::InstanceGroup {
                operation: "getting",
                source,
            }),
        }
    }

    /// Delete the group manager, returning the template it referenced
    async fn delete_group_manager(&self, cancel: &CancellationToken) -> Result<Option<String>> {
        let key = match self.scope.instance_group_manager_key() {
            Ok(key) => key,
            Err(Error::Precondition(reason)) => {
                // No zone means no group manager was ever placed
                warn!(reason = %reason, "Cannot locate instance group manager, skipping it");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let referenced = self
            .group_manager(cancel, &key)
            .await?
            .map(|igm| igm.template_name().to_string());

        let deleted = guarded(
            cancel,
            "deleting instance group manager",
            InstanceGroupManagers::delete(self.compute.as_ref(), &key),
        )
        .await?;
        debug!(resource = "instance_group_manager", key = %key, outcome = %classify(&deleted), "Delete");
        deleted
            .ignore_not_found()
            .map_err(|source| Error::InstanceGroup {
                operation: "deleting",
                source,
            })?;

        Ok(referenced)
    }

    /// Name of the template to delete
    ///
    /// The group manager's reference wins, then the name recorded in status.
    /// Recomputing from the spec needs bootstrap data and is the last resort.
    async fn template_to_delete(
        &self,
        cancel: &CancellationToken,
        referenced: Option<String>,
    ) -> Result<Option<String>> {
        if let Some(name) = referenced.or_else(|| self.scope.instance_template_name.clone()) {
            return Ok(Some(name));
        }
        if self.scope.bootstrap_data_secret.is_none() {
            // Templates are only built once bootstrap data exists
            return Ok(None);
        }

        match self.named_template(cancel).await {
            Ok(template) => Ok(Some(template.name)),
            Err(err @ (Error::BootstrapData { .. } | Error::Precondition(_))) => {
                warn!(error = %err, "Cannot compute instance template name, skipping it");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Reconciler for Service {
    #[instrument(skip_all, fields(pool = %self.scope.name, namespace = %self.scope.namespace))]
    async fn reconcile(&self, cancel: &CancellationToken) -> Result<ReconcileOutcome> {
        let template = self.named_template(cancel).await?;
        let template_created = self.ensure_template(cancel, &template).await?;
        let (group_manager_created, group_manager_template) =
            self.ensure_group_manager(cancel, &template.name).await?;

        Ok(ReconcileOutcome {
            template_name: template.name,
            template_created,
            group_manager_created,
            group_manager_template,
        })
    }

    #[instrument(skip_all, fields(pool = %self.scope.name, namespace = %self.scope.namespace))]
    async fn delete(&self, cancel: &CancellationToken) -> Result<()> {
        // Group manager first: the provider refuses to delete a referenced template
        let referenced = self.delete_group_manager(cancel).await?;

        let Some(template_name) = self.template_to_delete(cancel, referenced).await? else {
            info!("No instance template to delete");
            return Ok(());
        };

        let template_key = ResourceKey::global(template_name);
        let deleted = guarded(
            cancel,
            "deleting instance template",
            InstanceTemplates::delete(self.compute.as_ref(), &template_key),
        )
        .await?;
        let outcome = classify(&deleted);
        debug!(resource = "instance_template", key = %template_key, outcome = %outcome, "Delete");
        deleted
            .ignore_not_found()
            .ignore_in_use()
            .map_err(|source| Error::InstanceTemplate {
                operation: "deleting",
                source,
            })?;

        if outcome == Outcome::InUse {
            warn!(key = %template_key, "Instance template still in use, leaving it in place");
        }
        info!("Deleted managed instance group resources");
        Ok(())
    }
}
