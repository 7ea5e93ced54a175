//! Content-addressed instance template names
//!
//! Instance templates cannot be updated, so a template is named after its
//! content: any change to the properties yields a new name and therefore a
//! new provider resource, while re-reconciling an unchanged pool finds the
//! template it created before.
//!
//! Names are 63 characters: a leading `a` (names must start with a letter)
//! followed by 62 base-36 symbols. That satisfies the provider's
//! `[a-z]([-a-z0-9]*[a-z0-9])?` pattern and its length limit.

use crate::cloud::compute::InstanceTemplate;
use crate::error::{Error, Result};
use crate::util::hash::base36_truncated_hash;

/// Number of digest bytes in a template name
pub const TEMPLATE_HASH_LENGTH: usize = 62;

const TEMPLATE_NAME_PREFIX: &str = "a";

/// Compute the name of a template from its properties
pub fn instance_template_name(template: &InstanceTemplate) -> Result<String> {
    let canonical = serde_json::to_vec(&template.properties)
        .map_err(|e| Error::Naming(format!("serializing instance template: {}", e)))?;
    let hash = base36_truncated_hash(&canonical, TEMPLATE_HASH_LENGTH)?;

    Ok(format!("{}{}", TEMPLATE_NAME_PREFIX, hash))
}

impl InstanceTemplate {
    /// Stamp the content-derived name onto this template
    pub fn with_content_name(mut self) -> Result<Self> {
        self.name = instance_template_name(&self)?;
        Ok(self)
    }
}

/// Check a name against the provider's resource name rules
pub fn is_valid_resource_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };

    bytes.len() <= 63
        && first.is_ascii_lowercase()
        && (last.is_ascii_lowercase() || last.is_ascii_digit())
        && bytes
            .iter()
            .all(|c| *c == b'-' || c.is_ascii_lowercase() || c.is_ascii_digit())
}
