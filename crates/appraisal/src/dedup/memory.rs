use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{Claim, ContentDigest, DedupIndex};
use crate::error::DedupError;

/// Process-local index. The map entry API under one lock makes the
/// check-and-insert atomic.
#[derive(Debug, Default)]
pub struct MemoryDedupIndex {
    entries: Mutex<HashMap<(String, ContentDigest), String>>,
}

impl MemoryDedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DedupIndex for MemoryDedupIndex {
    fn claim(
        &self,
        tenant_id: &str,
        digest: &ContentDigest,
        upload_id: &str,
    ) -> Result<Claim, DedupError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| DedupError::Unavailable("index lock poisoned".to_string()))?;

        match entries.entry((tenant_id.to_string(), digest.clone())) {
            Entry::Vacant(slot) => {
                slot.insert(upload_id.to_string());
                Ok(Claim::Fresh)
            }
            Entry::Occupied(owner) if owner.get() == upload_id => Ok(Claim::Fresh),
            Entry::Occupied(owner) => Ok(Claim::Duplicate {
                upload_id: owner.get().clone(),
            }),
        }
    }
}
