//! Content hash repository for atomic claims on the `content_hashes` table.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// Records `upload_id` as the owner of `(tenant_id, digest)` unless another
/// upload already owns it.
///
/// Returns `None` when `upload_id` holds the claim (including a repeated
/// claim by the same upload), or `Some(owner)` when an earlier upload won.
/// The insert relies on the table's UNIQUE constraint, so concurrent
/// claimants can never both succeed.
pub fn claim(
    db: &Database,
    tenant_id: &str,
    digest: &str,
    upload_id: &str,
) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO content_hashes (tenant_id, digest, upload_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (tenant_id, digest) DO NOTHING",
            params![tenant_id, digest, upload_id, chrono::Utc::now().to_rfc3339()],
        )?;

        let owner: String = conn.query_row(
            "SELECT upload_id FROM content_hashes WHERE tenant_id = ?1 AND digest = ?2",
            params![tenant_id, digest],
            |r| r.get(0),
        )?;

        Ok((owner != upload_id).then_some(owner))
    })
}

/// Looks up the upload that owns a digest within a tenant.
pub fn find_owner(
    db: &Database,
    tenant_id: &str,
    digest: &str,
) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let owner = conn
            .query_row(
                "SELECT upload_id FROM content_hashes WHERE tenant_id = ?1 AND digest = ?2",
                params![tenant_id, digest],
                |r| r.get(0),
            )
            .optional()?;
        Ok(owner)
    })
}
