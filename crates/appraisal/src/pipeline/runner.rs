use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, info_span, warn};

use crate::db::{run_repo, Database};
use crate::dedup::{hash_and_claim, DedupIndex};
use crate::error::{panic_message, ProcessError};
use crate::preview::{PreviewGenerator, PreviewRef, PREVIEW_FILENAME, PREVIEW_FORMAT};
use crate::processor::{ExtractionResult, ProcessorRegistry, TextRecognizer};
use crate::sanitize;
use crate::scanner::{IntegrityScanner, ThreatEngine};
use crate::scrub::MetadataScrubber;
use crate::storage::{ArtifactPath, ArtifactStore};
use crate::upload::{DocumentFormat, Upload};

use super::cancel::CancelFlag;
use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;
use super::outcome::{IngestedDocument, PipelineOutcome, PipelineRun};
use super::progress::{ProgressReporter, StageEvent, StageEventKind};
use super::state::{PipelineState, StageName};

/// How often a waiting extraction checks for cancellation.
const EXTRACTION_POLL: Duration = Duration::from_millis(50);

/// Preview name used when the upload itself is called `preview.png`.
const FALLBACK_PREVIEW_FILENAME: &str = "preview-derived.png";

/// What one stage step decided. Infrastructure faults travel separately as
/// `Err(PipelineError)`.
enum StepResult {
    Completed(Option<String>),
    Skipped(String),
    Failed(String),
    Cancelled,
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    scanner: IntegrityScanner,
    scrubber: MetadataScrubber,
    processor: Arc<ProcessorRegistry>,
    previewer: PreviewGenerator,
    dedup: Arc<dyn DedupIndex>,
    store: ArtifactStore,
    run_log: Option<Database>,
}

impl Pipeline {
    /// Production constructor. Builds all sub-components from config; the
    /// dedup index is shared with every other pipeline of the process.
    pub fn from_config(config: Arc<PipelineConfig>, dedup: Arc<dyn DedupIndex>) -> Self {
        Self {
            scanner: IntegrityScanner::new(&config.scanner),
            scrubber: MetadataScrubber::new(),
            processor: Arc::new(ProcessorRegistry::from_config(&config.ocr)),
            previewer: PreviewGenerator::new(&config.preview),
            store: ArtifactStore::new(&config.storage_root),
            dedup,
            run_log: None,
            config,
        }
    }

    /// Persist every finished run to `upload_runs`.
    pub fn with_run_log(mut self, db: Database) -> Self {
        self.run_log = Some(db);
        self
    }

    pub fn with_threat_engine(mut self, engine: Arc<dyn ThreatEngine>) -> Self {
        self.scanner = self.scanner.with_engine(engine);
        self
    }

    /// Replaces the configured recognizer (`None` disables OCR).
    pub fn with_recognizer(mut self, recognizer: Option<Arc<dyn TextRecognizer>>) -> Self {
        self.processor = Arc::new(ProcessorRegistry::new(recognizer, self.config.ocr.dpi));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Drives one upload through scan, scrub, extract, preview and dedupe.
    ///
    /// Stage failures and cancellation come back as a finished run. `Err` is
    /// reserved for faults outside the upload: storage, the dedup index, the
    /// threat engine or the run log.
    pub fn process(
        &self,
        upload: Upload,
        cancel: &CancelFlag,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineRun, PipelineError> {
        let filename = sanitize::redact_filename(&upload.filename);
        let _pipeline_span = info_span!("pipeline",
            upload_id = %upload.upload_id,
            tenant_id = %upload.tenant_id,
            filename = %filename,
        )
        .entered();

        let artifact = ArtifactPath::new(
            &self.config.environment,
            &upload.tenant_id,
            &upload.workfile_id,
            &upload.upload_id,
            &upload.filename,
        )?;
        let mut ctx = PipelineContext::new(upload, artifact);

        for stage in StageName::ALL {
            if !self.run_stage(&mut ctx, stage, cancel, progress)? {
                break;
            }
        }

        let run = self.finish(ctx)?;
        if let Some(db) = &self.run_log {
            run_repo::insert(db, &run)?;
        }

        debug!(state = %run.state, "Pipeline finished");
        progress.report(StageEvent::new(
            &run.upload_id,
            StageEventKind::Finished { state: run.state },
        ));
        Ok(run)
    }

    /// Runs one stage and records its status. Returns whether the next stage
    /// may start.
    fn run_stage(
        &self,
        ctx: &mut PipelineContext,
        stage: StageName,
        cancel: &CancelFlag,
        progress: &dyn ProgressReporter,
    ) -> Result<bool, PipelineError> {
        let upload_id = ctx.upload.upload_id.clone();
        let report = |kind| progress.report(StageEvent::new(&upload_id, kind));

        if cancel.is_cancelled() {
            ctx.log.cancel(stage)?;
            report(StageEventKind::Cancelled { stage });
            return Ok(false);
        }

        ctx.log.begin(stage)?;
        report(StageEventKind::Started { stage });
        let _step = stage_span(stage).entered();

        let step = catch_unwind(AssertUnwindSafe(|| match stage {
            StageName::Scan => self.step_scan(ctx, cancel),
            StageName::Scrub => self.step_scrub(ctx),
            StageName::Extract => self.step_extract(ctx, cancel),
            StageName::Preview => self.step_preview(ctx),
            StageName::Dedupe => self.step_dedupe(ctx),
        }));

        let step = match step {
            Ok(Ok(step)) => step,
            Ok(Err(e)) => {
                let detail = e.to_string();
                ctx.log.fail(stage, detail.clone())?;
                report(StageEventKind::Failed { stage, detail });
                return Err(e);
            }
            Err(panic) => {
                StepResult::Failed(format!("internal fault: {}", panic_message(panic.as_ref())))
            }
        };

        match step {
            StepResult::Completed(detail) => {
                debug!(stage = %stage, "Stage completed");
                ctx.log.complete(stage, detail.clone())?;
                report(StageEventKind::Completed { stage, detail });
                Ok(true)
            }
            StepResult::Skipped(reason) => {
                debug!(stage = %stage, reason = %reason, "Stage skipped");
                ctx.log.skip(stage, reason.clone())?;
                report(StageEventKind::Skipped { stage, reason });
                Ok(true)
            }
            StepResult::Failed(detail) => {
                warn!(stage = %stage, detail = %detail, "Stage failed");
                ctx.log.fail(stage, detail.clone())?;
                report(StageEventKind::Failed { stage, detail });
                Ok(false)
            }
            StepResult::Cancelled => {
                debug!(stage = %stage, "Stage cancelled");
                ctx.log.cancel(stage)?;
                report(StageEventKind::Cancelled { stage });
                Ok(false)
            }
        }
    }

    fn step_scan(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancelFlag,
    ) -> Result<StepResult, PipelineError> {
        let scan = self
            .scanner
            .scan_with_cancel(ctx.upload.bytes(), &ctx.upload.declared_mime, cancel)
            .map_err(|e| PipelineError::ScannerUnavailable(e.to_string()))?;

        let step = if scan.clean {
            StepResult::Completed(None)
        } else if scan.is_incomplete() && cancel.is_cancelled() {
            StepResult::Cancelled
        } else {
            StepResult::Failed(format!("threats detected: {}", scan.threats.join(", ")))
        };

        ctx.scan = Some(scan);
        Ok(step)
    }

    fn step_scrub(&self, ctx: &mut PipelineContext) -> Result<StepResult, PipelineError> {
        let Some(format) = ctx.format else {
            return Ok(StepResult::Failed(unsupported(&ctx.upload)));
        };

        match self.scrubber.scrub(ctx.upload.bytes(), format) {
            Ok(outcome) => {
                let detail = if outcome.had_metadata {
                    "embedded metadata removed"
                } else {
                    "no embedded metadata"
                };
                ctx.had_metadata = outcome.had_metadata;
                ctx.sanitized = Some(Arc::from(outcome.bytes));
                Ok(StepResult::Completed(Some(detail.to_string())))
            }
            Err(e) => Ok(StepResult::Failed(e.to_string())),
        }
    }

    fn step_extract(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancelFlag,
    ) -> Result<StepResult, PipelineError> {
        let (Some(format), Some(bytes)) = (ctx.format, ctx.sanitized.clone()) else {
            return Ok(StepResult::Failed(unsupported(&ctx.upload)));
        };

        match self.extract_with_timeout(bytes, format, cancel) {
            Ok(Some(extraction)) => {
                let summary = extraction.summary();
                if extraction.is_degraded() {
                    warn!(summary = %summary, "Extraction degraded");
                }
                ctx.extraction = Some(extraction);
                Ok(StepResult::Completed(Some(summary)))
            }
            Ok(None) => Ok(StepResult::Cancelled),
            Err(e) => Ok(StepResult::Failed(e.to_string())),
        }
    }

    /// Runs extraction on its own thread and waits at most the configured
    /// timeout. `Ok(None)` means the run was cancelled while waiting. A
    /// timed-out thread is left to finish on its own; its result is dropped.
    fn extract_with_timeout(
        &self,
        bytes: Arc<[u8]>,
        format: DocumentFormat,
        cancel: &CancelFlag,
    ) -> Result<Option<ExtractionResult>, ProcessError> {
        let timeout = self.config.extraction_timeout;
        let deadline = Instant::now() + timeout;
        let (tx, rx) = bounded(1);
        let processor = Arc::clone(&self.processor);
        let span = tracing::Span::current();

        thread::Builder::new()
            .name("extract".to_string())
            .spawn(move || {
                let _entered = span.entered();
                let result = catch_unwind(AssertUnwindSafe(|| processor.extract(&bytes, format)))
                    .unwrap_or_else(|panic| {
                        Err(ProcessError::WorkerPanicked(panic_message(panic.as_ref())))
                    });
                // The receiver is gone once the stage timed out.
                let _ = tx.send(result);
            })
            .map_err(|e| ProcessError::WorkerPanicked(format!("could not start: {}", e)))?;

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ProcessError::TimedOut {
                    secs: timeout.as_secs(),
                });
            }
            match rx.recv_timeout(EXTRACTION_POLL.min(deadline - now)) {
                Ok(result) => return result.map(Some),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ProcessError::WorkerPanicked(
                        "extraction thread exited without a result".to_string(),
                    ))
                }
            }
        }
    }

    fn step_preview(&self, ctx: &mut PipelineContext) -> Result<StepResult, PipelineError> {
        let (Some(format), Some(bytes)) = (ctx.format, ctx.sanitized.clone()) else {
            return Ok(StepResult::Failed(unsupported(&ctx.upload)));
        };
        if !format.supports_preview() {
            return Ok(StepResult::Skipped(format!("no preview for {}", format)));
        }

        let image = match self.previewer.generate(&bytes, format) {
            Ok(image) => image,
            Err(e) => return Ok(StepResult::Failed(e.to_string())),
        };

        let name = if ctx.artifact.filename() == PREVIEW_FILENAME {
            FALLBACK_PREVIEW_FILENAME
        } else {
            PREVIEW_FILENAME
        };
        let path = ctx.artifact.sibling(name)?;
        self.store.write(&path, &image.bytes)?;

        let detail = format!("{}x{} {}", image.width, image.height, PREVIEW_FORMAT);
        ctx.preview = Some(PreviewRef {
            path: path.to_string(),
            width: image.width,
            height: image.height,
            format: PREVIEW_FORMAT.to_string(),
        });
        Ok(StepResult::Completed(Some(detail)))
    }

    fn step_dedupe(&self, ctx: &mut PipelineContext) -> Result<StepResult, PipelineError> {
        let Some(bytes) = ctx.sanitized.clone() else {
            return Ok(StepResult::Failed(unsupported(&ctx.upload)));
        };

        // The digest is claimed only once the artifact exists, so a failed
        // write never leaves a claim pointing at nothing.
        let written = self.store.write(&ctx.artifact, &bytes)?;
        let record = match hash_and_claim(
            self.dedup.as_ref(),
            &bytes,
            &ctx.upload.tenant_id,
            &ctx.upload.upload_id,
        ) {
            Ok(record) => record,
            Err(e) => {
                if let Err(remove) = std::fs::remove_file(&written) {
                    warn!(path = %written.display(), error = %remove, "Unclaimed artifact left behind");
                }
                return Err(e.into());
            }
        };
        debug!(
            digest = %sanitize::short_digest(record.digest.as_str()),
            duplicate = record.is_duplicate,
            "Content hashed"
        );

        let detail = match &record.duplicate_of {
            Some(original) => format!("duplicate of {}", original),
            None => format!("digest {}", sanitize::short_digest(record.digest.as_str())),
        };
        ctx.hash = Some(record);
        ctx.stored_at = Some(ctx.artifact.to_string());
        Ok(StepResult::Completed(Some(detail)))
    }

    fn finish(&self, ctx: PipelineContext) -> Result<PipelineRun, PipelineError> {
        let state = ctx.log.state();
        let outcome = match state {
            PipelineState::Failed(stage) => PipelineOutcome::Failed {
                stage,
                detail: ctx.log.stage(stage).detail.clone().unwrap_or_default(),
            },
            PipelineState::Cancelled(stage) => PipelineOutcome::Cancelled { stage },
            PipelineState::Completed => match (ctx.sanitized, ctx.extraction, ctx.hash, ctx.stored_at)
            {
                (Some(sanitized), Some(extraction), Some(hash), Some(stored_at)) => {
                    PipelineOutcome::Completed(Box::new(IngestedDocument {
                        sanitized,
                        had_metadata: ctx.had_metadata,
                        extraction,
                        preview: ctx.preview,
                        hash,
                        stored_at,
                    }))
                }
                _ => return Err(PipelineError::Unfinished(state)),
            },
            other => return Err(PipelineError::Unfinished(other)),
        };

        Ok(PipelineRun {
            upload_id: ctx.upload.upload_id,
            tenant_id: ctx.upload.tenant_id,
            workfile_id: ctx.upload.workfile_id,
            filename: ctx.upload.filename,
            declared_mime: ctx.upload.declared_mime,
            state,
            stages: ctx.log.into_stages(),
            scan: ctx.scan,
            outcome,
            finished_at: Utc::now(),
        })
    }
}

fn stage_span(stage: StageName) -> tracing::Span {
    match stage {
        StageName::Scan => info_span!("scan"),
        StageName::Scrub => info_span!("scrub"),
        StageName::Extract => info_span!("extract"),
        StageName::Preview => info_span!("preview"),
        StageName::Dedupe => info_span!("dedupe"),
    }
}

fn unsupported(upload: &Upload) -> String {
    format!("unsupported document type '{}'", upload.declared_mime)
}
