//! The Job Processor: a thin fire-and-forget dispatch layer in
//! front of background work. The strategy — hand messages to a `JobQueue`
//! adapter and drain them with a consumer task, or run each job inline on
//! a spawned task — is picked once from whichever `JobQueue` the
//! `ModelManager` was built with, not per call.

use futures::future;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use registry_core::Ctx;
use registry_core::ModelManager;
use registry_core::model::artifact::ArtifactBmc;
use registry_core::model::token::TokenBmc;
use registry_core::store::JobQueue;

/// Background work units. Each handler failure is logged and swallowed —
/// a job is never retried and never fails the request that enqueued it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Job {
    TokenTouched { token_id: String, ts: i64 },
    ArtifactDownloaded { artifact_id: i64, ts: i64 },
    RepositorySync { repo_id: String },
}

#[derive(Clone)]
enum Strategy {
    Queued(Arc<dyn JobQueue>),
    Inline,
}

#[derive(Clone)]
pub struct JobProcessor {
    mm: ModelManager,
    strategy: Strategy,
}

impl JobProcessor {
    pub fn new(mm: ModelManager) -> Self {
        let strategy = match mm.job_queue.clone() {
            Some(q) => Strategy::Queued(q),
            None => Strategy::Inline,
        };
        Self { mm, strategy }
    }

    pub async fn enqueue(&self, job: Job) {
        self.enqueue_all(vec![job]).await;
    }

    pub async fn enqueue_all(&self, jobs: Vec<Job>) {
        match &self.strategy {
            Strategy::Queued(queue) => {
                let messages = jobs
                    .iter()
                    .filter_map(|job| serde_json::to_string(job).ok())
                    .collect();
                if let Err(e) = queue.send_batch(messages).await {
                    tracing::warn!(error = %e, "failed to enqueue jobs");
                }
            }
            Strategy::Inline => {
                let mm = self.mm.clone();
                tokio::spawn(async move {
                    future::join_all(jobs.into_iter().map(|job| run_job(&mm, job))).await;
                });
            }
        }
    }

    /// Drains a queue's receiving half, running each decoded job as it
    /// arrives. Spawned once at startup when a `JobQueue` is configured.
    pub async fn run_consumer(mm: ModelManager, mut rx: mpsc::Receiver<String>) {
        while let Some(message) = rx.recv().await {
            match serde_json::from_str::<Job>(&message) {
                Ok(job) => run_job(&mm, job).await,
                Err(e) => tracing::warn!(error = %e, "failed to decode job message"),
            }
        }
    }
}

async fn run_job(mm: &ModelManager, job: Job) {
    if let Err(e) = handle_job(mm, job).await {
        tracing::warn!(error = %e, "job handler failed");
    }
}

async fn handle_job(mm: &ModelManager, job: Job) -> anyhow::Result<()> {
    let ctx = Ctx::system();
    match job {
        Job::TokenTouched { token_id, ts } => {
            TokenBmc::touch(&ctx, mm, &token_id, ts).await?;
        }
        Job::ArtifactDownloaded { artifact_id, ts } => {
            ArtifactBmc::record_download(&ctx, mm, artifact_id, ts).await?;
        }
        Job::RepositorySync { repo_id } => {
            crate::sync::sync_repository(mm, &repo_id).await?;
        }
    }
    Ok(())
}
