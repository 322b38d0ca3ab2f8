//! Per-container encryption settings, as held by the container cache.

use tracing::{debug, warn};

use crate::client::ClientInner;
use crate::error::{EncryptionError, Result};
use crate::policy::{ClientEncryptionPolicy, MAX_SUPPORTED_POLICY_FORMAT_VERSION};

#[derive(Debug, Clone)]
pub struct ContainerSettings {
    pub container_id: String,
    /// Store-assigned id; differs after the container is recreated.
    pub resource_id: String,
    pub partition_key_path: String,
    pub policy: Option<ClientEncryptionPolicy>,
}

impl ContainerSettings {
    pub fn has_encrypted_paths(&self) -> bool {
        self.policy
            .as_ref()
            .is_some_and(|p| !p.included_paths.is_empty())
    }
}

/// Read a container's properties and check its policy version.
pub(crate) async fn fetch_container_settings(
    inner: &ClientInner,
    database_id: &str,
    container_id: &str,
) -> Result<ContainerSettings> {
    let properties = inner.cosmos.read_container(database_id, container_id).await?;
    if let Some(policy) = &properties.client_encryption_policy {
        if policy.policy_format_version > MAX_SUPPORTED_POLICY_FORMAT_VERSION {
            warn!(
                database_id,
                container_id,
                version = policy.policy_format_version,
                "container policy format version is not supported"
            );
            return Err(EncryptionError::UnsupportedPolicyVersion {
                version: policy.policy_format_version,
            });
        }
    }
    debug!(database_id, container_id, resource_id = %properties.resource_id, "resolved container settings");
    Ok(ContainerSettings {
        container_id: properties.id,
        resource_id: properties.resource_id,
        partition_key_path: properties.partition_key_path,
        policy: properties.client_encryption_policy,
    })
}
