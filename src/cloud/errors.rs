//! Provider error classification
//!
//! Maps provider responses onto the outcomes the reconciliation protocol
//! cares about. Expected races (already deleted, already created, still
//! referenced) are absorbed by the `ignore_*` wrappers; everything else is
//! passed through untouched so callers can wrap and surface it.

use thiserror::Error;

/// Marker the provider puts in the message of a 400 response when a resource
/// cannot be deleted because another resource still references it.
pub const RESOURCE_IN_USE_MARKER: &str = "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE";

const STATUS_BAD_REQUEST: u16 = 400;
const STATUS_NOT_FOUND: u16 = 404;
const STATUS_CONFLICT: u16 = 409;

/// Error returned by a provider client call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Structured error response from the provider API
    #[error("googleapi: Error {code}: {message}")]
    Api { code: u16, message: String },

    /// The request never produced a provider response
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Build an API error from a status code and message
    pub fn api(code: u16, message: impl Into<String>) -> Self {
        ProviderError::Api {
            code,
            message: message.into(),
        }
    }

    /// Build a 404 for the given resource path
    pub fn not_found(resource: &str) -> Self {
        Self::api(
            STATUS_NOT_FOUND,
            format!("The resource '{}' was not found", resource),
        )
    }

    /// Build a 409 for the given resource path
    pub fn already_exists(resource: &str) -> Self {
        Self::api(
            STATUS_CONFLICT,
            format!("The resource '{}' already exists", resource),
        )
    }

    /// Build a 400 carrying the in-use marker
    pub fn in_use(resource: &str, user: &str) -> Self {
        Self::api(
            STATUS_BAD_REQUEST,
            format!(
                "{}: The resource '{}' is already being used by '{}'",
                RESOURCE_IN_USE_MARKER, resource, user
            ),
        )
    }

    /// Status code, when the provider answered
    pub fn code(&self) -> Option<u16> {
        match self {
            ProviderError::Api { code, .. } => Some(*code),
            ProviderError::Transport(_) => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}

/// Result of a provider client call
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Semantic outcome of a provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    NotFound,
    AlreadyExists,
    InUse,
    Other,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::NotFound => write!(f, "not_found"),
            Outcome::AlreadyExists => write!(f, "already_exists"),
            Outcome::InUse => write!(f, "in_use"),
            Outcome::Other => write!(f, "error"),
        }
    }
}

// =============================================================================
// Predicates
// =============================================================================

/// Reports whether the provider answered 404
pub fn is_not_found(err: &ProviderError) -> bool {
    err.code() == Some(STATUS_NOT_FOUND)
}

/// Reports whether the provider answered 409
pub fn is_already_exists(err: &ProviderError) -> bool {
    err.code() == Some(STATUS_CONFLICT)
}

/// Reports whether the provider refused a delete because the resource is
/// still referenced
pub fn is_in_use(err: &ProviderError) -> bool {
    match err {
        ProviderError::Api { code, message } => {
            *code == STATUS_BAD_REQUEST && message.contains(RESOURCE_IN_USE_MARKER)
        }
        ProviderError::Transport(_) => false,
    }
}

/// Classify the result of a provider call
pub fn classify<T>(result: &ProviderResult<T>) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(err) if is_not_found(err) => Outcome::NotFound,
        Err(err) if is_already_exists(err) => Outcome::AlreadyExists,
        Err(err) if is_in_use(err) => Outcome::InUse,
        Err(_) => Outcome::Other,
    }
}

// =============================================================================
// Ignore wrappers
// =============================================================================

/// Swallow a 404, pass anything else through
pub fn ignore_not_found(result: ProviderResult<()>) -> ProviderResult<()> {
    match result {
        Err(err) if is_not_found(&err) => Ok(()),
        other => other,
    }
}

/// Swallow a 409, pass anything else through
pub fn ignore_already_exists(result: ProviderResult<()>) -> ProviderResult<()> {
    match result {
        Err(err) if is_already_exists(&err) => Ok(()),
        other => other,
    }
}

/// Swallow an in-use refusal, pass anything else through
pub fn ignore_in_use(result: ProviderResult<()>) -> ProviderResult<()> {
    match result {
        Err(err) if is_in_use(&err) => Ok(()),
        other => other,
    }
}

/// Chained form of the ignore wrappers
pub trait ProviderResultExt: Sized {
    fn ignore_not_found(self) -> Self;
    fn ignore_already_exists(self) -> Self;
    fn ignore_in_use(self) -> Self;
}

impl ProviderResultExt for ProviderResult<()> {
    fn ignore_not_found(self) -> Self {
        ignore_not_found(self)
    }

    fn ignore_already_exists(self) -> Self {
        ignore_already_exists(self)
    }

    fn ignore_in_use(self) -> Self {
        ignore_in_use(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(is_not_found(&ProviderError::not_found("x")));
        assert!(is_already_exists(&ProviderError::already_exists("x")));
        assert!(is_in_use(&ProviderError::in_use("t", "igm")));

        assert!(!is_not_found(&ProviderError::api(500, "backend")));
        assert!(!is_already_exists(&ProviderError::not_found("x")));
    }

    #[test]
    fn test_in_use_requires_marker() {
        let plain_bad_request = ProviderError::api(400, "Invalid value for field 'name'");
        assert!(!is_in_use(&plain_bad_request));

        let wrong_code = ProviderError::api(409, RESOURCE_IN_USE_MARKER);
        assert!(!is_in_use(&wrong_code));
    }

    #[test]
    fn test_transport_errors_never_match() {
        let err = ProviderError::Transport("dns failure".into());
        assert!(!is_not_found(&err));
        assert!(!is_already_exists(&err));
        assert!(!is_in_use(&err));
        assert_eq!(classify::<()>(&Err(err)), Outcome::Other);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&Ok::<_, ProviderError>(42)), Outcome::Success);
        assert_eq!(
            classify::<()>(&Err(ProviderError::not_found("x"))),
            Outcome::NotFound
        );
        assert_eq!(
            classify::<()>(&Err(ProviderError::already_exists("x"))),
            Outcome::AlreadyExists
        );
        assert_eq!(
            classify::<()>(&Err(ProviderError::in_use("t", "g"))),
            Outcome::InUse
        );
        assert_eq!(
            classify::<()>(&Err(ProviderError::api(503, "unavailable"))),
            Outcome::Other
        );
    }

    #[test]
    fn test_ignore_wrappers_pass_success_through() {
        assert_eq!(ignore_not_found(Ok(())), Ok(()));
        assert_eq!(ignore_already_exists(Ok(())), Ok(()));
        assert_eq!(ignore_in_use(Ok(())), Ok(()));
    }

    #[test]
    fn test_ignore_wrappers_only_swallow_their_class() {
        assert_eq!(ignore_not_found(Err(ProviderError::not_found("x"))), Ok(()));
        assert_eq!(
            ignore_already_exists(Err(ProviderError::already_exists("x"))),
            Ok(())
        );

        let conflict = ProviderError::already_exists("x");
        assert_eq!(ignore_not_found(Err(conflict.clone())), Err(conflict));

        let fatal = ProviderError::api(403, "forbidden");
        assert_eq!(ignore_in_use(Err(fatal.clone())), Err(fatal));
    }

    #[test]
    fn test_ignore_wrappers_compose() {
        let nested = |r| ignore_in_use(ignore_not_found(r));
        assert_eq!(nested(Err(ProviderError::not_found("t"))), Ok(()));
        assert_eq!(nested(Err(ProviderError::in_use("t", "g"))), Ok(()));

        let fatal = ProviderError::api(500, "internal");
        assert_eq!(nested(Err(fatal.clone())), Err(fatal));

        let chained: ProviderResult<()> = Err(ProviderError::in_use("t", "g"));
        assert_eq!(chained.ignore_not_found().ignore_in_use(), Ok(()));
    }
}
