use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::pipeline::{CancelFlag, NoopProgress, Pipeline, PipelineError, PipelineRun, ProgressReporter};
use crate::upload::Upload;

/// An upload waiting for a worker, with the flag its submitter can trip.
struct QueuedUpload {
    upload: Upload,
    cancel: CancelFlag,
}

/// Result of one upload's pipeline run.
#[derive(Debug)]
pub struct PoolResult {
    pub upload_id: String,
    pub result: Result<PipelineRun, PipelineError>,
}

pub struct WorkerPool {
    job_sender: Sender<QueuedUpload>,
    result_receiver: Receiver<PoolResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, worker_count: usize) -> Result<Self, WorkerError> {
        Self::with_progress(pipeline, worker_count, Arc::new(NoopProgress))
    }

    /// Creates a pool whose workers share one pipeline and one progress
    /// reporter. A `worker_count` of 0 starts a single worker.
    pub fn with_progress(
        pipeline: Arc<Pipeline>,
        worker_count: usize,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = bounded::<QueuedUpload>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<PoolResult>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_pipeline = Arc::clone(&pipeline);
            let worker_progress = Arc::clone(&progress);

            let handle = thread::Builder::new()
                .name(format!("ingest-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        job_rx,
                        result_tx,
                        shutdown_flag,
                        worker_pipeline,
                        worker_progress,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        })
    }

    /// Queues an upload, blocking while the queue is full. The returned flag
    /// cancels this upload only.
    pub fn submit(&self, upload: Upload) -> Result<CancelFlag, WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        let cancel = CancelFlag::new();
        self.job_sender
            .send(QueuedUpload {
                upload,
                cancel: cancel.clone(),
            })
            .map_err(|_| WorkerError::ChannelClosed)?;
        Ok(cancel)
    }

    pub fn try_recv_result(&self) -> Option<PoolResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<PoolResult> {
        self.result_receiver.recv().ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<QueuedUpload>,
    result_sender: Sender<PoolResult>,
    shutdown: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
    progress: Arc<dyn ProgressReporter>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        // After shutdown the queue is drained without blocking; every upload
        // still waiting is run cancelled so its submitter gets a result.
        let job = if shutdown.load(Ordering::Relaxed) {
            match job_receiver.try_recv() {
                Ok(job) => job,
                Err(_) => {
                    debug!("Worker {} received shutdown signal", worker_id);
                    break;
                }
            }
        } else {
            match job_receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(job) => job,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    debug!("Worker {} job channel disconnected", worker_id);
                    break;
                }
            }
        };

        let QueuedUpload { upload, cancel } = job;
        if shutdown.load(Ordering::Relaxed) {
            cancel.cancel();
        }
        debug!("Worker {} processing upload {}", worker_id, upload.upload_id);

        let upload_id = upload.upload_id.clone();
        let result = pipeline.process(upload, &cancel, progress.as_ref());

        if let Err(e) = result_sender.send(PoolResult { upload_id, result }) {
            error!("Worker {} failed to send result: {}", worker_id, e);
            break;
        }
    }

    debug!("Worker {} stopped", worker_id);
}
