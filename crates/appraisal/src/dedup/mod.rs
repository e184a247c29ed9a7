//! Content hashing and tenant-scoped duplicate detection.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DedupError;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryDedupIndex;
pub use sqlite::SqliteDedupIndex;

/// SHA-256 of sanitized content, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of claiming a digest within a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Fresh,
    Duplicate { upload_id: String },
}

/// Shared index of digests seen per tenant.
///
/// `claim` must be an atomic check-and-insert: of several concurrent claims
/// for the same `(tenant, digest)`, exactly one observes `Fresh`.
pub trait DedupIndex: Send + Sync {
    fn claim(
        &self,
        tenant_id: &str,
        digest: &ContentDigest,
        upload_id: &str,
    ) -> Result<Claim, DedupError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    pub digest: ContentDigest,
    pub tenant_id: String,
    pub is_duplicate: bool,
    pub duplicate_of: Option<String>,
}

/// Hashes sanitized bytes and records them against the tenant's index.
pub fn hash_and_claim(
    index: &dyn DedupIndex,
    sanitized: &[u8],
    tenant_id: &str,
    upload_id: &str,
) -> Result<HashRecord, DedupError> {
    let digest = ContentDigest::of(sanitized);
    let claim = index.claim(tenant_id, &digest, upload_id)?;

    let duplicate_of = match claim {
        Claim::Fresh => None,
        Claim::Duplicate { upload_id } => Some(upload_id),
    };

    Ok(HashRecord {
        digest,
        tenant_id: tenant_id.to_string(),
        is_duplicate: duplicate_of.is_some(),
        duplicate_of,
    })
}
