//! Operator metrics
//!
//! Prometheus collectors for reconciliation passes and provider calls, held
//! in a dedicated registry so tests and embedders can run several operators
//! in one process. [`InstrumentedCompute`] wraps any compute provider and
//! counts its calls by resource, verb and classified outcome.

use async_trait::async_trait;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;

use crate::cloud::compute::{InstanceGroupManager, InstanceTemplate, ResourceKey};
use crate::cloud::errors::{classify, ProviderResult};
use crate::domain::ports::{
    ComputeProvider, ComputeProviderRef, InstanceGroupManagers, InstanceTemplates,
};
use crate::error::{Error, Result};

const NAMESPACE: &str = "machine_pool_operator";

/// Collectors exported on `/metrics`
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Reconciliation passes by operation (reconcile, delete) and result
    pub reconciliations: IntCounterVec,
    /// Reconciliation pass duration by operation
    pub reconcile_duration: HistogramVec,
    /// Provider calls by resource, verb and outcome
    pub provider_calls: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new("reconciliations_total", "Reconciliation passes").namespace(NAMESPACE),
            &["operation", "result"],
        )
        .map_err(metrics_error)?;

        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "reconcile_duration_seconds",
                "Duration of reconciliation passes",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
            &["operation"],
        )
        .map_err(metrics_error)?;

        let provider_calls = IntCounterVec::new(
            Opts::new("provider_calls_total", "Compute provider calls").namespace(NAMESPACE),
            &["resource", "verb", "outcome"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(reconciliations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(reconcile_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(provider_calls.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            reconciliations,
            reconcile_duration,
            provider_calls,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished reconciliation pass
    pub fn record_reconcile(&self, operation: &str, success: bool, elapsed: Duration) {
        let result = if success { "success" } else { "error" };
        self.reconciliations
            .with_label_values(&[operation, result])
            .inc();
        self.reconcile_duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    fn record_call<T>(&self, resource: &str, verb: &str, result: &ProviderResult<T>) {
        let outcome = classify(result).to_string();
        self.provider_calls
            .with_label_values(&[resource, verb, outcome.as_str()])
            .inc();
    }

    /// Render all collectors in the text exposition format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

fn metrics_error(err: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", err))
}

// =============================================================================
// Instrumented Provider
// =============================================================================

const TEMPLATE: &str = "instance_template";
const GROUP_MANAGER: &str = "instance_group_manager";

/// Compute provider decorator counting every call
pub struct InstrumentedCompute {
    inner: ComputeProviderRef,
    metrics: Arc<Metrics>,
}

impl InstrumentedCompute {
    pub fn new(inner: ComputeProviderRef, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl InstanceTemplates for InstrumentedCompute {
    async fn get(&self, key: &ResourceKey) -> ProviderResult<InstanceTemplate> {
        let result = InstanceTemplates::get(self.inner.as_ref(), key).await;
        self.metrics.record_call(TEMPLATE, "get", &result);
        result
    }

    async fn insert(&self, key: &ResourceKey, template: &InstanceTemplate) -> ProviderResult<()> {
        let result = InstanceTemplates::insert(self.inner.as_ref(), key, template).await;
        self.metrics.record_call(TEMPLATE, "insert", &result);
        result
    }

    async fn delete(&self, key: &ResourceKey) -> ProviderResult<()> {
        let result = InstanceTemplates::delete(self.inner.as_ref(), key).await;
        self.metrics.record_call(TEMPLATE, "delete", &result);
        result
    }
}

#[async_trait]
impl InstanceGroupManagers for InstrumentedCompute {
    async fn get(&self, key: &ResourceKey) -> ProviderResult<InstanceGroupManager> {
        let result = InstanceGroupManagers::get(self.inner.as_ref(), key).await;
        self.metrics.record_call(GROUP_MANAGER, "get", &result);
        result
    }

    async fn insert(&self, key: &ResourceKey, igm: &InstanceGroupManager) -> ProviderResult<()> {
        let result = InstanceGroupManagers::insert(self.inner.as_ref(), key, igm).await;
        self.metrics.record_call(GROUP_MANAGER, "insert", &result);
        result
    }

    async fn delete(&self, key: &ResourceKey) -> ProviderResult<()> {
        let result = InstanceGroupManagers::delete(self.inner.as_ref(), key).await;
        self.metrics.record_call(GROUP_MANAGER, "delete", &result);
        result
    }
}

impl ComputeProvider for InstrumentedCompute {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::InMemoryCompute;

    #[test]
    fn test_record_reconcile() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconcile("reconcile", true, Duration::from_millis(250));
        metrics.record_reconcile("reconcile", false, Duration::from_millis(10));
        metrics.record_reconcile("reconcile", true, Duration::from_millis(10));

        assert_eq!(
            metrics
                .reconciliations
                .with_label_values(&["reconcile", "success"])
                .get(),
            2
        );
        assert_eq!(
            metrics
                .reconciliations
                .with_label_values(&["reconcile", "error"])
                .get(),
            1
        );
    }

    #[test]
    fn test_encode() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconcile("delete", true, Duration::from_secs(1));

        let (content_type, body) = metrics.encode().unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("machine_pool_operator_reconciliations_total"));
        assert!(body.contains("machine_pool_operator_reconcile_duration_seconds"));
    }

    #[tokio::test]
    async fn test_instrumented_compute_counts_outcomes() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let compute = InstrumentedCompute::new(
            Arc::new(InMemoryCompute::new("proj")),
            metrics.clone(),
        );
        let key = ResourceKey::global("a1");

        let _ = InstanceTemplates::get(&compute, &key).await;
        InstanceTemplates::insert(&compute, &key, &InstanceTemplate::default())
            .await
            .unwrap();
        let _ = InstanceTemplates::insert(&compute, &key, &InstanceTemplate::default()).await;

        let calls = &metrics.provider_calls;
        assert_eq!(
            calls
                .with_label_values(&[TEMPLATE, "get", "not_found"])
                .get(),
            1
        );
        assert_eq!(
            calls
                .with_label_values(&[TEMPLATE, "insert", "success"])
                .get(),
            1
        );
        assert_eq!(
            calls
                .with_label_values(&[TEMPLATE, "insert", "already_exists"])
                .get(),
            1
        );
        assert_eq!(compute.provider_name(), "memory");
    }
}
