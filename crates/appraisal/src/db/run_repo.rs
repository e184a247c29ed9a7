//! Run repository: finished pipeline runs in the `upload_runs` table.

use rusqlite::{params, Row};

use crate::pipeline::{PipelineOutcome, PipelineRun, ProcessingStage};

use super::{Database, DatabaseError};

/// A raw run row from the database. `stages` and `threats` hold JSON.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub upload_id: String,
    pub tenant_id: String,
    pub workfile_id: String,
    pub filename: String,
    pub declared_mime: String,
    pub state: String,
    pub stage: Option<String>,
    pub detail: Option<String>,
    pub digest: Option<String>,
    pub duplicate_of: Option<String>,
    pub threats: Option<String>,
    pub stages: String,
    pub finished_at: String,
}

impl RunRow {
    pub fn from_run(run: &PipelineRun) -> Result<Self, DatabaseError> {
        let stages = serde_json::to_string(&run.stages).map_err(|e| DatabaseError::Json {
            column: "stages",
            source: e,
        })?;
        let threats = run
            .scan
            .as_ref()
            .filter(|scan| !scan.threats.is_empty())
            .map(|scan| serde_json::to_string(&scan.threats))
            .transpose()
            .map_err(|e| DatabaseError::Json {
                column: "threats",
                source: e,
            })?;

        let detail = match &run.outcome {
            PipelineOutcome::Failed { detail, .. } => Some(detail.clone()),
            _ => None,
        };
        let hash = run.hash();

        Ok(Self {
            upload_id: run.upload_id.clone(),
            tenant_id: run.tenant_id.clone(),
            workfile_id: run.workfile_id.clone(),
            filename: run.filename.clone(),
            declared_mime: run.declared_mime.clone(),
            state: run.state.as_str().to_string(),
            stage: run.state.stopped_at().map(|s| s.as_str().to_string()),
            detail,
            digest: hash.map(|h| h.digest.as_str().to_string()),
            duplicate_of: hash.and_then(|h| h.duplicate_of.clone()),
            threats,
            stages,
            finished_at: run.finished_at.to_rfc3339(),
        })
    }

    /// Decodes the stored stage log.
    pub fn stage_log(&self) -> Result<Vec<ProcessingStage>, DatabaseError> {
        serde_json::from_str(&self.stages).map_err(|e| DatabaseError::Json {
            column: "stages",
            source: e,
        })
    }

    /// Decodes the stored threat labels (empty for clean scans).
    pub fn threat_labels(&self) -> Result<Vec<String>, DatabaseError> {
        match &self.threats {
            Some(json) => serde_json::from_str(json).map_err(|e| DatabaseError::Json {
                column: "threats",
                source: e,
            }),
            None => Ok(Vec::new()),
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            upload_id: row.get("upload_id")?,
            tenant_id: row.get("tenant_id")?,
            workfile_id: row.get("workfile_id")?,
            filename: row.get("filename")?,
            declared_mime: row.get("declared_mime")?,
            state: row.get("state")?,
            stage: row.get("stage")?,
            detail: row.get("detail")?,
            digest: row.get("digest")?,
            duplicate_of: row.get("duplicate_of")?,
            threats: row.get("threats")?,
            stages: row.get("stages")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Persists a finished run verbatim.
pub fn insert(db: &Database, run: &PipelineRun) -> Result<(), DatabaseError> {
    let row = RunRow::from_run(run)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO upload_runs (upload_id, tenant_id, workfile_id, filename, declared_mime,
             state, stage, detail, digest, duplicate_of, threats, stages, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                row.upload_id,
                row.tenant_id,
                row.workfile_id,
                row.filename,
                row.declared_mime,
                row.state,
                row.stage,
                row.detail,
                row.digest,
                row.duplicate_of,
                row.threats,
                row.stages,
                row.finished_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a run by its upload ID.
pub fn find_by_id(db: &Database, upload_id: &str) -> Result<Option<RunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM upload_runs WHERE upload_id = ?1")?;
        let mut rows = stmt.query_map(params![upload_id], RunRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// All runs of one workfile, oldest first. Scoped to the tenant.
pub fn list_by_workfile(
    db: &Database,
    tenant_id: &str,
    workfile_id: &str,
) -> Result<Vec<RunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM upload_runs WHERE tenant_id = ?1 AND workfile_id = ?2
             ORDER BY finished_at ASC, upload_id ASC",
        )?;
        let rows = stmt
            .query_map(params![tenant_id, workfile_id], RunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts a tenant's runs per final state.
pub fn count_by_state(db: &Database, tenant_id: &str) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT state, COUNT(*) FROM upload_runs WHERE tenant_id = ?1
             GROUP BY state ORDER BY state",
        )?;
        let counts = stmt
            .query_map(params![tenant_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineState, StageLog, StageName};
    use crate::scanner::ScanResult;
    use chrono::Utc;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn failed_run(upload_id: &str, tenant_id: &str, workfile_id: &str) -> PipelineRun {
        let mut log = StageLog::new();
        log.begin(StageName::Scan).unwrap();
        log.fail(StageName::Scan, "threats detected: signature:eicar-test".into())
            .unwrap();

        PipelineRun {
            upload_id: upload_id.to_string(),
            tenant_id: tenant_id.to_string(),
            workfile_id: workfile_id.to_string(),
            filename: "rents.csv".to_string(),
            declared_mime: "text/csv".to_string(),
            state: log.state(),
            stages: log.into_stages(),
            scan: Some(ScanResult {
                clean: false,
                threats: vec!["signature:eicar-test".to_string()],
                scanned_at: Utc::now(),
            }),
            outcome: PipelineOutcome::Failed {
                stage: StageName::Scan,
                detail: "threats detected: signature:eicar-test".to_string(),
            },
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let run = failed_run("u1", "t1", "wf1");
        insert(&db, &run).unwrap();

        let row = find_by_id(&db, "u1").unwrap().unwrap();
        assert_eq!(row.state, "failed");
        assert_eq!(row.stage.as_deref(), Some("scan"));
        assert_eq!(
            row.detail.as_deref(),
            Some("threats detected: signature:eicar-test")
        );
        assert!(row.digest.is_none());
        assert_eq!(row.threat_labels().unwrap(), vec!["signature:eicar-test"]);

        let stages = row.stage_log().unwrap();
        assert_eq!(stages.len(), 5);
        assert_eq!(stages, run.stages);
        assert_eq!(run.state, PipelineState::Failed(StageName::Scan));
    }

    #[test]
    fn test_find_missing() {
        let db = test_db();
        assert!(find_by_id(&db, "nope").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_upload_id_rejected() {
        let db = test_db();
        insert(&db, &failed_run("u1", "t1", "wf1")).unwrap();
        assert!(insert(&db, &failed_run("u1", "t1", "wf1")).is_err());
    }

    #[test]
    fn test_list_is_tenant_scoped() {
        let db = test_db();
        insert(&db, &failed_run("u1", "t1", "wf1")).unwrap();
        insert(&db, &failed_run("u2", "t1", "wf1")).unwrap();
        insert(&db, &failed_run("u3", "t2", "wf1")).unwrap();
        insert(&db, &failed_run("u4", "t1", "wf2")).unwrap();

        let rows = list_by_workfile(&db, "t1", "wf1").unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.upload_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"u1") && ids.contains(&"u2"));
    }

    #[test]
    fn test_count_by_state() {
        let db = test_db();
        insert(&db, &failed_run("u1", "t1", "wf1")).unwrap();
        insert(&db, &failed_run("u2", "t1", "wf2")).unwrap();
        insert(&db, &failed_run("u3", "t2", "wf1")).unwrap();

        assert_eq!(
            count_by_state(&db, "t1").unwrap(),
            vec![("failed".to_string(), 2)]
        );
        assert!(count_by_state(&db, "t3").unwrap().is_empty());
    }
}
