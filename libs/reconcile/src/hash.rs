//! Deterministic payload hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hash of a payload's JSON form.
///
/// Used as the dedup key when materializing job descriptors, so re-running a
/// creator over unchanged input maps onto the same stored job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadHash(String);

impl PayloadHash {
    /// Hash the compact serialization of `json`.
    ///
    /// `serde_json::Map` keeps keys sorted, so equal objects hash equally
    /// whatever order they were built in.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let digest = Sha256::digest(json.to_string().as_bytes());
        Self(format!("sha256:{}", hex::encode(&digest[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PayloadHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_hash_ignores_key_order() {
        let json1 = serde_json::json!({"b": 2, "a": {"y": 1, "x": 2}});
        let json2 = serde_json::json!({"a": {"x": 2, "y": 1}, "b": 2});

        assert_eq!(PayloadHash::from_json(&json1), PayloadHash::from_json(&json2));
    }

    #[test]
    fn test_payload_hash_distinguishes_values() {
        let a = PayloadHash::from_json(&serde_json::json!({"binary_id": 1}));
        let b = PayloadHash::from_json(&serde_json::json!({"binary_id": 2}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_payload_hash_format() {
        let hash = PayloadHash::from_json(&serde_json::json!({"binary_id": 1}));
        assert!(hash.as_str().starts_with("sha256:"));
        assert_eq!(hash.as_str().len(), "sha256:".len() + 32);
    }
}
