use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{ItemContext, PipelineError, RunSummary, WorkQueue};

/// Worker loop: dequeue, fetch, log, complete; until cancelled or the queue closes.
///
/// Cancellation is observed both while waiting for an item and while the
/// item's page is being fetched.
pub(super) async fn run_worker(
    id: usize,
    queue: WorkQueue,
    ctx: Arc<ItemContext>,
    cancel: CancellationToken,
) -> Result<RunSummary, PipelineError> {
    tracing::debug!(worker = id, "Worker started");
    let mut summary = RunSummary::default();

    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = queue.dequeue() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = ctx.process(&job.url) => outcome?,
        };
        ctx.record(&mut summary, outcome);
        job.complete();
    }

    tracing::debug!(
        worker = id,
        processed = summary.processed,
        failed = summary.failed,
        "Worker stopped"
    );
    Ok(summary)
}
