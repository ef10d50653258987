//! Bounded index job queue.
//!
//! Publishing or editing a document submits an [`IndexJob`] and returns
//! immediately; a fixed pool of worker tasks drains the queue. Each job
//! reports its result through a [`JobHandle`] the caller may await or
//! drop.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::IndexError;
use crate::indexer::{IndexOutcome, Indexer};
use crate::progress::ReindexProgress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexJob {
    Index(String),
    Delete(String),
    ReindexAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Indexed(IndexOutcome),
    Deleted,
    Reindexed(ReindexProgress),
}

type Reply = oneshot::Sender<Result<JobResult, IndexError>>;

struct Envelope {
    job: IndexJob,
    reply: Reply,
}

/// Completion of one submitted job.
pub struct JobHandle {
    rx: oneshot::Receiver<Result<JobResult, IndexError>>,
}

impl JobHandle {
    pub async fn wait(self) -> Result<JobResult, IndexError> {
        self.rx.await.unwrap_or(Err(IndexError::QueueClosed))
    }
}

pub struct IndexQueue {
    tx: mpsc::Sender<Envelope>,
    workers: Vec<JoinHandle<()>>,
}

impl IndexQueue {
    /// Spawn `workers` tasks consuming a queue of `capacity` jobs.
    pub fn start(indexer: Arc<Indexer>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Envelope>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let indexer = indexer.clone();
                tokio::spawn(async move {
                    loop {
                        let next = { rx.lock().await.recv().await };
                        let Some(Envelope { job, reply }) = next else {
                            break;
                        };
                        tracing::debug!(worker, ?job, "index job started");
                        let result = run_job(&indexer, &job).await;
                        if let Err(e) = &result {
                            tracing::warn!(worker, ?job, error = %e, "index job failed");
                        }
                        // the submitter may have dropped its handle
                        let _ = reply.send(result);
                    }
                    tracing::debug!(worker, "index worker stopped");
                })
            })
            .collect();

        Self { tx, workers }
    }

    /// Enqueue a job, waiting for room if the queue is full.
    pub async fn submit(&self, job: IndexJob) -> Result<JobHandle, IndexError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { job, reply })
            .await
            .map_err(|_| IndexError::QueueClosed)?;
        Ok(JobHandle { rx })
    }

    /// Enqueue a job or fail immediately if the queue is full.
    pub fn try_submit(&self, job: IndexJob) -> Result<JobHandle, IndexError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(Envelope { job, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => IndexError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => IndexError::QueueClosed,
            })?;
        Ok(JobHandle { rx })
    }

    /// Stop accepting jobs, let workers drain the queue, and wait for them.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn run_job(indexer: &Indexer, job: &IndexJob) -> Result<JobResult, IndexError> {
    match job {
        IndexJob::Index(id) => indexer.index_document(id).await.map(JobResult::Indexed),
        IndexJob::Delete(id) => indexer
            .delete_document_index(id)
            .await
            .map(|_| JobResult::Deleted),
        IndexJob::ReindexAll => indexer.reindex_all().await.map(JobResult::Reindexed),
    }
}
