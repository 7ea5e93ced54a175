//! Bootstrap data from Kubernetes Secrets
//!
//! The bootstrap provider writes the payload into a Secret named by the
//! owning MachinePool, under the `value` key.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::debug;

use crate::domain::ports::BootstrapDataSource;
use crate::error::{Error, Result};

/// Secret key holding the bootstrap payload
pub const BOOTSTRAP_DATA_KEY: &str = "value";

/// Reads bootstrap payloads from Secrets
#[derive(Clone)]
pub struct SecretBootstrapSource {
    client: Client,
}

impl SecretBootstrapSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BootstrapDataSource for SecretBootstrapSource {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<String> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get_opt(name).await?.ok_or_else(|| Error::BootstrapData {
            name: format!("{}/{}", namespace, name),
            reason: "secret not found".to_string(),
        })?;

        debug!(secret = %name, namespace = %namespace, "Fetched bootstrap data secret");
        secret_value(&secret, name)
    }
}

/// Extract the bootstrap payload from a Secret
pub fn secret_value(secret: &Secret, name: &str) -> Result<String> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(BOOTSTRAP_DATA_KEY))
        .ok_or_else(|| Error::BootstrapData {
            name: name.to_string(),
            reason: format!("secret has no {} key", BOOTSTRAP_DATA_KEY),
        })?;

    String::from_utf8(bytes.0.clone()).map_err(|e| Error::BootstrapData {
        name: name.to_string(),
        reason: format!("value is not valid UTF-8: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(key: &str, value: &[u8]) -> Secret {
        Secret {
            data: Some(BTreeMap::from([(
                key.to_string(),
                ByteString(value.to_vec()),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn test_secret_value() {
        let s = secret("value", b"#cloud-config\nruncmd: []\n");
        assert_eq!(
            secret_value(&s, "pool-0-bootstrap").unwrap(),
            "#cloud-config\nruncmd: []\n"
        );
    }

    #[test]
    fn test_missing_value_key() {
        let s = secret("format", b"cloud-config");
        assert_matches!(
            secret_value(&s, "pool-0-bootstrap"),
            Err(Error::BootstrapData { .. })
        );
        assert_matches!(
            secret_value(&Secret::default(), "pool-0-bootstrap"),
            Err(Error::BootstrapData { .. })
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let s = secret("value", &[0xff, 0xfe]);
        let err = secret_value(&s, "pool-0-bootstrap").unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }
}
