//! Client encryption policy: which top-level paths of a container's items
//! are encrypted, under which key, and how.

use cosmos_crypto::{EncryptionType, AEAD_AES_256_CBC_HMAC_SHA256};
use serde::{Deserialize, Serialize};

use crate::error::{EncryptionError, Result};

/// Highest policy format version this library understands.
pub const MAX_SUPPORTED_POLICY_FORMAT_VERSION: u32 = 1;

/// Data encryption algorithms accepted for keys and included paths.
pub const SUPPORTED_ALGORITHMS: &[&str] = &[AEAD_AES_256_CBC_HMAC_SHA256];

/// `Invalid Encryption Algorithm '<name>'` unless `algorithm` is on the allow-list.
pub(crate) fn check_algorithm(algorithm: &str) -> Result<()> {
    if SUPPORTED_ALGORITHMS.contains(&algorithm) {
        Ok(())
    } else {
        Err(EncryptionError::Validation(format!(
            "Invalid Encryption Algorithm '{}'",
            algorithm
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEncryptionIncludedPath {
    /// Top-level path such as `/sensitiveString`.
    pub path: String,
    pub client_encryption_key_id: String,
    pub encryption_type: EncryptionType,
    pub encryption_algorithm: String,
}

impl ClientEncryptionIncludedPath {
    pub fn new(
        path: impl Into<String>,
        client_encryption_key_id: impl Into<String>,
        encryption_type: EncryptionType,
    ) -> Self {
        Self {
            path: path.into(),
            client_encryption_key_id: client_encryption_key_id.into(),
            encryption_type,
            encryption_algorithm: AEAD_AES_256_CBC_HMAC_SHA256.to_string(),
        }
    }

    /// Property name under the document root (`/a` → `a`).
    pub fn property_name(&self) -> &str {
        self.path.trim_start_matches('/')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEncryptionPolicy {
    pub included_paths: Vec<ClientEncryptionIncludedPath>,
    pub policy_format_version: u32,
}

impl ClientEncryptionPolicy {
    /// Build and validate a version 1 policy.
    pub fn new(included_paths: Vec<ClientEncryptionIncludedPath>) -> Result<Self> {
        let policy = Self {
            included_paths,
            policy_format_version: MAX_SUPPORTED_POLICY_FORMAT_VERSION,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Structural checks that do not need the container.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for included in &self.included_paths {
            let path = included.path.as_str();
            if !path.starts_with('/') {
                return Err(EncryptionError::Validation("Path needs to start with /".to_string()));
            }
            if path.len() < 2 || path[1..].contains('/') {
                return Err(EncryptionError::Validation(format!(
                    "Only top level paths can be encrypted. Invalid path: {}",
                    path
                )));
            }
            if path == "/id" {
                return Err(EncryptionError::Validation(
                    "Path /id cannot be encrypted".to_string(),
                ));
            }
            if !seen.insert(path) {
                return Err(EncryptionError::Validation(format!(
                    "Duplicate Path found: {}",
                    path
                )));
            }
            if included.client_encryption_key_id.trim().is_empty() {
                return Err(EncryptionError::Validation(format!(
                    "Client encryption key id cannot be empty for path {}",
                    path
                )));
            }
            check_algorithm(&included.encryption_algorithm)?;
        }
        Ok(())
    }

    /// Checks against the container the policy is attached to.
    pub fn validate_for_container(&self, partition_key_path: &str) -> Result<()> {
        self.validate()?;
        if self.policy_format_version > MAX_SUPPORTED_POLICY_FORMAT_VERSION {
            return Err(EncryptionError::UnsupportedPolicyVersion {
                version: self.policy_format_version,
            });
        }
        let partition_root = partition_key_path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default();
        if let Some(included) = self.included_path(partition_root) {
            return Err(EncryptionError::Validation(format!(
                "Path {} which is part of the partition key cannot be encrypted with policy format version {}",
                included.path, self.policy_format_version
            )));
        }
        Ok(())
    }

    pub fn included_path(&self, property: &str) -> Option<&ClientEncryptionIncludedPath> {
        self.included_paths
            .iter()
            .find(|p| p.property_name() == property)
    }

    /// Distinct key ids in declaration order.
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for included in &self.included_paths {
            if !ids.contains(&included.client_encryption_key_id.as_str()) {
                ids.push(&included.client_encryption_key_id);
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn path(p: &str, ty: EncryptionType) -> ClientEncryptionIncludedPath {
        ClientEncryptionIncludedPath::new(p, "key1", ty)
    }

    fn message(result: Result<ClientEncryptionPolicy>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn valid_policy_serializes_camel_case() {
        let policy = ClientEncryptionPolicy::new(vec![path("/a", EncryptionType::Deterministic)]).unwrap();
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["policyFormatVersion"], 1);
        assert_eq!(json["includedPaths"][0]["clientEncryptionKeyId"], "key1");
        assert_eq!(json["includedPaths"][0]["encryptionType"], "Deterministic");
    }

    #[test]
    fn rejects_bad_paths() {
        assert_eq!(
            message(ClientEncryptionPolicy::new(vec![path("a", EncryptionType::Randomized)])),
            "Path needs to start with /"
        );
        assert!(message(ClientEncryptionPolicy::new(vec![path("/a/b", EncryptionType::Randomized)]))
            .contains("Only top level paths"));
        assert!(message(ClientEncryptionPolicy::new(vec![path("/id", EncryptionType::Randomized)]))
            .contains("/id"));
        assert_eq!(
            message(ClientEncryptionPolicy::new(vec![
                path("/a", EncryptionType::Randomized),
                path("/a", EncryptionType::Deterministic),
            ])),
            "Duplicate Path found: /a"
        );
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let mut p = path("/a", EncryptionType::Randomized);
        p.encryption_algorithm = "AEAD_AES_256_CBC_HMAC_SHA256_Typo".to_string();
        let err = ClientEncryptionPolicy::new(vec![p]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid Encryption Algorithm 'AEAD_AES_256_CBC_HMAC_SHA256_Typo'"
        );
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn partition_key_cannot_be_encrypted() {
        let policy = ClientEncryptionPolicy::new(vec![path("/mypk", EncryptionType::Deterministic)]).unwrap();
        assert!(policy.validate_for_container("/mypk").is_err());
        assert!(policy.validate_for_container("/other").is_ok());
    }

    #[test]
    fn newer_format_version_is_rejected() {
        let mut policy = ClientEncryptionPolicy::new(vec![path("/a", EncryptionType::Deterministic)]).unwrap();
        policy.policy_format_version = 2;
        let err = policy.validate_for_container("/pk").unwrap_err();
        assert_eq!(err.to_string(), crate::error::UNSUPPORTED_POLICY_VERSION_MESSAGE);
    }

    #[test]
    fn key_ids_are_deduplicated() {
        let mut other = path("/c", EncryptionType::Randomized);
        other.client_encryption_key_id = "key2".to_string();
        let policy = ClientEncryptionPolicy::new(vec![
            path("/a", EncryptionType::Deterministic),
            path("/b", EncryptionType::Randomized),
            other,
        ])
        .unwrap();
        assert_eq!(policy.key_ids(), vec!["key1", "key2"]);
    }
}
