//! Reconciliation services
//!
//! A service drives provider state towards what a scope describes. Every
//! operation is idempotent and resumable: a failed or cancelled pass leaves
//! provider state partially converged and the caller simply runs it again.

pub mod managed_instance_groups;

pub use managed_instance_groups::Service;

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Result of a successful reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Content-derived name of the pool's instance template
    pub template_name: String,
    /// The template was inserted during this pass
    pub template_created: bool,
    /// The group manager was inserted during this pass
    pub group_manager_created: bool,
    /// Template the group manager actually references; differs from
    /// `template_name` when a group manager created from an older spec exists
    pub group_manager_template: String,
}

/// Converges provider state for one resource
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Create whatever is missing
    async fn reconcile(&self, cancel: &CancellationToken) -> Result<ReconcileOutcome>;

    /// Delete everything owned, dependents first
    async fn delete(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn guarded<F>(
    cancel: &CancellationToken,
    operation: &'static str,
    fut: F,
) -> Result<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled { operation }),
        output = fut => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_guarded_runs_future() {
        let cancel = CancellationToken::new();
        let value = guarded(&cancel, "adding", async { 1 + 1 }).await.unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_guarded_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = guarded(&cancel, "waiting", std::future::pending::<()>()).await;
        assert_matches!(result, Err(Error::Cancelled { operation: "waiting" }));
    }
}
