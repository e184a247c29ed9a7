use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::StorageError;

const MAX_SEGMENT_LEN: usize = 255;

/// Tenant-scoped address of a stored artifact:
/// `{env}/{tenant_id}/{workfile_id}/{upload_id}/{filename}`.
///
/// Every segment is validated on construction, so an `ArtifactPath` can never
/// point outside its tenant's subtree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArtifactPath {
    environment: String,
    tenant_id: String,
    workfile_id: String,
    upload_id: String,
    filename: String,
}

impl ArtifactPath {
    pub fn new(
        environment: &str,
        tenant_id: &str,
        workfile_id: &str,
        upload_id: &str,
        filename: &str,
    ) -> Result<Self, StorageError> {
        Self::validate_segment(environment)?;
        Self::validate_segment(tenant_id)?;
        Self::validate_segment(workfile_id)?;
        Self::validate_segment(upload_id)?;

        let filename = final_component(filename);
        Self::validate_segment(filename)?;

        Ok(Self {
            environment: environment.to_string(),
            tenant_id: tenant_id.to_string(),
            workfile_id: workfile_id.to_string(),
            upload_id: upload_id.to_string(),
            filename: filename.to_string(),
        })
    }

    /// Another artifact stored beside this one.
    pub fn sibling(&self, filename: &str) -> Result<Self, StorageError> {
        Self::new(
            &self.environment,
            &self.tenant_id,
            &self.workfile_id,
            &self.upload_id,
            filename,
        )
    }

    pub fn validate_segment(segment: &str) -> Result<(), StorageError> {
        let reject = |reason: &str| {
            Err(StorageError::InvalidSegment {
                segment: segment.escape_debug().to_string(),
                reason: reason.to_string(),
            })
        };

        if segment.trim().is_empty() {
            return reject("segment is empty");
        }
        if segment == "." || segment == ".." {
            return reject("relative path components are not allowed");
        }
        if segment.contains('/') || segment.contains('\\') {
            return reject("path separators are not allowed");
        }
        if segment.chars().any(char::is_control) {
            return reject("control characters are not allowed");
        }
        if segment.len() > MAX_SEGMENT_LEN {
            return reject("segment is too long");
        }
        Ok(())
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn workfile_id(&self) -> &str {
        &self.workfile_id
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The path relative to a store root.
    pub fn relative(&self) -> PathBuf {
        [
            &self.environment,
            &self.tenant_id,
            &self.workfile_id,
            &self.upload_id,
            &self.filename,
        ]
        .iter()
        .collect()
    }
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.environment, self.tenant_id, self.workfile_id, self.upload_id, self.filename
        )
    }
}

fn final_component(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
}
