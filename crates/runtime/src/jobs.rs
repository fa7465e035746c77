//! Post-turn background work: compaction probe and fact extraction,
//! handed off to worker tasks over a bounded channel so the request that
//! triggered them can return immediately once its own turn is persisted.

use std::sync::Arc;

use compactor::HistoryCompactor;
use factextractor::FactExtractor;
use tokio::sync::mpsc;

use crate::history::ChatHistoryStore;

pub struct PostTurnJob {
    pub session_id: String,
    pub user_id: String,
    pub context_window: u32,
    pub user_message: String,
    pub assistant_reply: String,
}

#[derive(Clone)]
pub struct JobSender(mpsc::Sender<PostTurnJob>);

impl JobSender {
    /// Enqueue a job. Never blocks the caller on a full queue — a job that
    /// can't be enqueued is logged and dropped; background work is
    /// best-effort and has no external cancellation contract to violate.
    pub fn submit(&self, job: PostTurnJob) {
        if let Err(err) = self.0.try_send(job) {
            tracing::warn!(error = %err, "post-turn job queue full, dropping job");
        }
    }
}

const QUEUE_CAPACITY: usize = 256;
const WORKER_COUNT: usize = 4;

/// Spawn the worker pool that drains post-turn jobs. Each worker reuses the
/// shared pool-backed stores, which hand out their own connection per
/// query — satisfying the "isolated DB session" requirement without a
/// dedicated connection-per-worker.
pub fn spawn_workers(
    compactor: Arc<HistoryCompactor<ChatHistoryStore>>,
    fact_extractor: Arc<FactExtractor>,
) -> JobSender {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    for _ in 0..WORKER_COUNT {
        let rx = rx.clone();
        let compactor = compactor.clone();
        let fact_extractor = fact_extractor.clone();
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                let Some(job) = job else { break };
                run_job(&compactor, &fact_extractor, job).await;
            }
        });
    }

    JobSender(tx)
}

async fn run_job(
    compactor: &HistoryCompactor<ChatHistoryStore>,
    fact_extractor: &FactExtractor,
    job: PostTurnJob,
) {
    if let Err(err) = compactor.probe(&job.session_id, job.context_window).await {
        tracing::warn!(session_id = %job.session_id, error = %err, "compaction probe failed");
    }

    if let Err(err) = fact_extractor
        .extract_and_store(&job.user_id, &job.user_message, &job.assistant_reply)
        .await
    {
        tracing::warn!(user_id = %job.user_id, error = %err, "fact extraction failed");
    }
}
