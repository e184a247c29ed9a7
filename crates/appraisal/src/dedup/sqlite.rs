use super::{Claim, ContentDigest, DedupIndex};
use crate::db::{hash_repo, Database};
use crate::error::DedupError;

/// Persistent index over the `content_hashes` table.
#[derive(Debug, Clone)]
pub struct SqliteDedupIndex {
    db: Database,
}

impl SqliteDedupIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl DedupIndex for SqliteDedupIndex {
    fn claim(
        &self,
        tenant_id: &str,
        digest: &ContentDigest,
        upload_id: &str,
    ) -> Result<Claim, DedupError> {
        let owner = hash_repo::claim(&self.db, tenant_id, digest.as_str(), upload_id)?;
        Ok(match owner {
            None => Claim::Fresh,
            Some(upload_id) => Claim::Duplicate { upload_id },
        })
    }
}
