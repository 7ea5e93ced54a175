//! In-memory Compute provider
//!
//! Keeps templates and group managers in ordered maps and enforces the same
//! referential rules as the real API:
//! - inserting an existing name fails with 409
//! - reading or deleting a missing name fails with 404
//! - a group manager may only reference an existing template
//! - a template referenced by a group manager cannot be deleted (400, in use)
//!
//! Every call is recorded so tests can assert on the exact call sequence, and
//! a failure can be scripted for the next call of a given kind.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

use super::compute::{InstanceGroupManager, InstanceTemplate, ResourceKey};
use super::errors::{ProviderError, ProviderResult};
use crate::domain::ports::{ComputeProvider, InstanceGroupManagers, InstanceTemplates};

/// Kind of provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallKind {
    GetTemplate,
    InsertTemplate,
    DeleteTemplate,
    GetGroupManager,
    InsertGroupManager,
    DeleteGroupManager,
}

/// A recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeCall {
    pub kind: CallKind,
    pub key: ResourceKey,
}

#[derive(Debug, Default)]
struct State {
    templates: BTreeMap<String, InstanceTemplate>,
    group_managers: BTreeMap<ResourceKey, InstanceGroupManager>,
    calls: Vec<ComputeCall>,
    failures: BTreeMap<CallKind, ProviderError>,
}

impl State {
    /// Record the call and return a scripted failure, if any
    fn enter(&mut self, kind: CallKind, key: &ResourceKey) -> ProviderResult<()> {
        self.calls.push(ComputeCall {
            kind,
            key: key.clone(),
        });
        match self.failures.remove(&kind) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn template_users(&self, name: &str) -> Option<&ResourceKey> {
        self.group_managers
            .iter()
            .find(|(_, igm)| igm.template_name() == name)
            .map(|(key, _)| key)
    }
}

/// Compute provider backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryCompute {
    project: String,
    state: Mutex<State>,
}

impl InMemoryCompute {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Fail the next call of `kind` with `err`
    pub fn fail_next(&self, kind: CallKind, err: ProviderError) {
        self.state.lock().failures.insert(kind, err);
    }

    /// All calls made so far, in order
    pub fn calls(&self) -> Vec<ComputeCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls of `kind` made so far
    pub fn call_count(&self, kind: CallKind) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.kind == kind)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn template_names(&self) -> Vec<String> {
        self.state.lock().templates.keys().cloned().collect()
    }

    pub fn group_manager(&self, key: &ResourceKey) -> Option<InstanceGroupManager> {
        self.state.lock().group_managers.get(key).cloned()
    }

    pub fn group_manager_count(&self) -> usize {
        self.state.lock().group_managers.len()
    }

    /// Seed a template without recording a call
    pub fn seed_template(&self, template: InstanceTemplate) {
        self.state
            .lock()
            .templates
            .insert(template.name.clone(), template);
    }

    /// Seed a group manager without recording a call or checking its template
    pub fn seed_group_manager(&self, key: ResourceKey, igm: InstanceGroupManager) {
        self.state.lock().group_managers.insert(key, igm);
    }

    fn template_path(&self, name: &str) -> String {
        super::compute::instance_template_path(&self.project, name)
    }

    fn group_manager_path(&self, key: &ResourceKey) -> String {
        super::compute::instance_group_manager_path(
            &self.project,
            key.zone().unwrap_or_default(),
            &key.name,
        )
    }
}

#[async_trait]
impl InstanceTemplates for InMemoryCompute {
    async fn get(&self, key: &ResourceKey) -> ProviderResult<InstanceTemplate> {
        let mut state = self.state.lock();
        state.enter(CallKind::GetTemplate, key)?;

        state
            .templates
            .get(&key.name)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(&self.template_path(&key.name)))
    }

    async fn insert(&self, key: &ResourceKey, template: &InstanceTemplate) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.enter(CallKind::InsertTemplate, key)?;

        if state.templates.contains_key(&key.name) {
            return Err(ProviderError::already_exists(&self.template_path(&key.name)));
        }

        let mut stored = template.clone();
        stored.name = key.name.clone();
        state.templates.insert(key.name.clone(), stored);
        debug!(template = %key.name, "Inserted instance template");
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.enter(CallKind::DeleteTemplate, key)?;

        if !state.templates.contains_key(&key.name) {
            return Err(ProviderError::not_found(&self.template_path(&key.name)));
        }
        if let Some(user) = state.template_users(&key.name) {
            return Err(ProviderError::in_use(
                &self.template_path(&key.name),
                &self.group_manager_path(user),
            ));
        }

        state.templates.remove(&key.name);
        debug!(template = %key.name, "Deleted instance template");
        Ok(())
    }
}

#[async_trait]
impl InstanceGroupManagers for InMemoryCompute {
    async fn get(&self, key: &ResourceKey) -> ProviderResult<InstanceGroupManager> {
        let mut state = self.state.lock();
        state.enter(CallKind::GetGroupManager, key)?;

        state
            .group_managers
            .get(key)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(&self.group_manager_path(key)))
    }

    async fn insert(&self, key: &ResourceKey, igm: &InstanceGroupManager) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.enter(CallKind::InsertGroupManager, key)?;

        if state.group_managers.contains_key(key) {
            return Err(ProviderError::already_exists(&self.group_manager_path(key)));
        }
        if !state.templates.contains_key(igm.template_name()) {
            return Err(ProviderError::not_found(&igm.instance_template));
        }

        state.group_managers.insert(key.clone(), igm.clone());
        debug!(group_manager = %key, template = igm.template_name(), "Inserted instance group manager");
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.enter(CallKind::DeleteGroupManager, key)?;

        match state.group_managers.remove(key) {
            Some(_) => {
                debug!(group_manager = %key, "Deleted instance group manager");
                Ok(())
            }
            None => Err(ProviderError::not_found(&self.group_manager_path(key))),
        }
    }
}

impl ComputeProvider for InMemoryCompute {
    fn provider_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::compute::instance_template_path;
    use crate::cloud::errors::{is_already_exists, is_in_use, is_not_found};

    fn template(name: &str) -> InstanceTemplate {
        InstanceTemplate {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn igm(name: &str, template: &str) -> InstanceGroupManager {
        InstanceGroupManager {
            name: name.into(),
            base_instance_name: name.into(),
            instance_template: instance_template_path("proj", template),
            target_size: 2,
        }
    }

    #[tokio::test]
    async fn test_template_lifecycle() {
        let compute = InMemoryCompute::new("proj");
        let key = ResourceKey::global("a1");

        let err = InstanceTemplates::get(&compute, &key).await.unwrap_err();
        assert!(is_not_found(&err));

        InstanceTemplates::insert(&compute, &key, &template("")).await.unwrap();
        let stored = InstanceTemplates::get(&compute, &key).await.unwrap();
        assert_eq!(stored.name, "a1");

        let err = InstanceTemplates::insert(&compute, &key, &template("a1"))
            .await
            .unwrap_err();
        assert!(is_already_exists(&err));

        InstanceTemplates::delete(&compute, &key).await.unwrap();
        let err = InstanceTemplates::delete(&compute, &key).await.unwrap_err();
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn test_group_manager_requires_template() {
        let compute = InMemoryCompute::new("proj");
        let key = ResourceKey::zonal("pool", "us-central1-a");

        let err = InstanceGroupManagers::insert(&compute, &key, &igm("pool", "missing"))
            .await
            .unwrap_err();
        assert!(is_not_found(&err));
        assert_eq!(compute.group_manager_count(), 0);
    }

    #[tokio::test]
    async fn test_referenced_template_is_in_use() {
        let compute = InMemoryCompute::new("proj");
        compute.seed_template(template("a1"));
        let igm_key = ResourceKey::zonal("pool", "us-central1-a");
        InstanceGroupManagers::insert(&compute, &igm_key, &igm("pool", "a1"))
            .await
            .unwrap();

        let err = InstanceTemplates::delete(&compute, &ResourceKey::global("a1"))
            .await
            .unwrap_err();
        assert!(is_in_use(&err));

        InstanceGroupManagers::delete(&compute, &igm_key).await.unwrap();
        InstanceTemplates::delete(&compute, &ResourceKey::global("a1"))
            .await
            .unwrap();
        assert!(compute.template_names().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failure_fires_once() {
        let compute = InMemoryCompute::new("proj");
        compute.fail_next(
            CallKind::GetTemplate,
            ProviderError::api(403, "permission denied"),
        );
        let key = ResourceKey::global("a1");

        let err = InstanceTemplates::get(&compute, &key).await.unwrap_err();
        assert_eq!(err.code(), Some(403));

        let err = InstanceTemplates::get(&compute, &key).await.unwrap_err();
        assert!(is_not_found(&err));
        assert_eq!(compute.call_count(CallKind::GetTemplate), 2);
    }

    #[tokio::test]
    async fn test_calls_are_recorded_in_order() {
        let compute = InMemoryCompute::new("proj");
        let tkey = ResourceKey::global("a1");
        let gkey = ResourceKey::zonal("pool", "us-central1-a");

        let _ = InstanceTemplates::get(&compute, &tkey).await;
        InstanceTemplates::insert(&compute, &tkey, &template("a1")).await.unwrap();
        InstanceGroupManagers::insert(&compute, &gkey, &igm("pool", "a1"))
            .await
            .unwrap();

        let kinds: Vec<_> = compute.calls().into_iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CallKind::GetTemplate,
                CallKind::InsertTemplate,
                CallKind::InsertGroupManager
            ]
        );

        compute.clear_calls();
        assert!(compute.calls().is_empty());
        assert_eq!(compute.provider_name(), "memory");
    }
}
