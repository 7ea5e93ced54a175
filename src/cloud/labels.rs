//! Provider label builder
//!
//! Every resource created for a cluster carries an ownership label and a role
//! label. Additional user labels are merged last, so a user-supplied key
//! replaces a generated one.

use std::collections::BTreeMap;

/// Prefix shared by all labels this operator generates
pub const LABEL_PREFIX: &str = "capg-";

/// Whether a resource is owned by the cluster or shared with others
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLifecycle {
    Owned,
    Shared,
}

impl std::fmt::Display for ResourceLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceLifecycle::Owned => write!(f, "owned"),
            ResourceLifecycle::Shared => write!(f, "shared"),
        }
    }
}

/// Inputs to [`build_labels`]
#[derive(Debug, Clone)]
pub struct BuildParams<'a> {
    pub cluster_name: &'a str,
    pub lifecycle: ResourceLifecycle,
    pub role: Option<&'a str>,
    pub additional: &'a BTreeMap<String, String>,
}

/// Label key marking membership of a cluster
pub fn cluster_label_key(cluster_name: &str) -> String {
    format!("{}cluster-{}", LABEL_PREFIX, cluster_name.to_lowercase())
}

/// Label key carrying the role of a resource
pub fn role_label_key() -> String {
    format!("{}role", LABEL_PREFIX)
}

/// Build the label set for a provider resource
pub fn build_labels(params: BuildParams<'_>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        cluster_label_key(params.cluster_name),
        params.lifecycle.to_string(),
    );
    if let Some(role) = params.role {
        labels.insert(role_label_key(), role.to_lowercase());
    }

    // Provider labels are lower-case only
    for (key, value) in params.additional {
        labels.insert(key.to_lowercase(), value.to_lowercase());
    }

    labels
}

/// Merge two label sets, `overrides` winning on key collision
pub fn merge_labels(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_labels() {
        let additional = BTreeMap::from([("Team".to_string(), "Infra".to_string())]);
        let labels = build_labels(BuildParams {
            cluster_name: "prod",
            lifecycle: ResourceLifecycle::Owned,
            role: Some("node"),
            additional: &additional,
        });

        assert_eq!(labels.get("capg-cluster-prod").map(String::as_str), Some("owned"));
        assert_eq!(labels.get("capg-role").map(String::as_str), Some("node"));
        assert_eq!(labels.get("team").map(String::as_str), Some("infra"));
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_user_labels_win() {
        let additional = BTreeMap::from([("capg-role".to_string(), "worker".to_string())]);
        let labels = build_labels(BuildParams {
            cluster_name: "prod",
            lifecycle: ResourceLifecycle::Owned,
            role: Some("node"),
            additional: &additional,
        });

        assert_eq!(labels.get("capg-role").map(String::as_str), Some("worker"));
    }

    #[test]
    fn test_role_is_optional() {
        let labels = build_labels(BuildParams {
            cluster_name: "prod",
            lifecycle: ResourceLifecycle::Shared,
            role: None,
            additional: &BTreeMap::new(),
        });
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get("capg-cluster-prod").map(String::as_str), Some("shared"));
    }

    #[test]
    fn test_merge_labels() {
        let base = BTreeMap::from([
            ("env".to_string(), "prod".to_string()),
            ("team".to_string(), "a".to_string()),
        ]);
        let overrides = BTreeMap::from([("team".to_string(), "b".to_string())]);
        let merged = merge_labels(&base, &overrides);
        assert_eq!(merged.get("env").map(String::as_str), Some("prod"));
        assert_eq!(merged.get("team").map(String::as_str), Some("b"));
    }
}
