//! Error types for the Machine Pool Operator
//!
//! Provides structured error types for the reconciliation engine, the
//! provider adapters and the Kubernetes control loop.

use std::time::Duration;
use thiserror::Error;

use crate::cloud::errors::ProviderError;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Precondition Errors
    // =========================================================================
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Getting bootstrap data secret {name}: {reason}")]
    BootstrapData { name: String, reason: String },

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    #[error("reconciling instance template: {operation}: {source}")]
    InstanceTemplate {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("reconciling instance group: {operation}: {source}")]
    InstanceGroup {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("Computing instance template name: {0}")]
    Naming(String),

    #[error("Cancelled while {operation}")]
    Cancelled { operation: &'static str },

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Provider Transport Errors
    // =========================================================================
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::Http(_)
            | Error::Cancelled { .. }
            | Error::InstanceTemplate { .. }
            | Error::InstanceGroup { .. } => ErrorAction::RequeueWithBackoff,

            // Bootstrap secret may not have been written yet
            Error::BootstrapData { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Needs an input change or indicates a defect
            Error::Precondition(_) | Error::Configuration(_) | Error::Naming(_) => {
                ErrorAction::NoRequeue
            }

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::Http(_) | Error::Cancelled { .. }
        ) || matches!(
            self,
            Error::InstanceTemplate { source, .. } | Error::InstanceGroup { source, .. }
                if source.is_transport()
        )
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
