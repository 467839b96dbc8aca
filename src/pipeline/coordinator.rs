use std::sync::Arc;

use futures::StreamExt;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::worker::run_worker;
use super::{open_feed, ItemContext, PipelineError, RunSummary, WorkQueue};
use crate::config::Settings;

/// Runs the feed through a bounded worker pool.
///
/// # Lifecycle
///
/// 1. Starts `settings.workers` workers, all bound to one [`WorkQueue`] of the
///    same capacity.
/// 2. Streams the feed and enqueues every item URL; enqueue suspends while the
///    queue is full, so slow pages throttle the download.
/// 3. Once the feed is exhausted, waits until every enqueued item is completed.
/// 4. Cancels the workers and joins all of them.
/// 5. Drops the HTTP client after the last task has settled.
///
/// A failing worker is noticed while producing or draining. Under
/// [`FailurePolicy::Abort`](super::FailurePolicy::Abort) the first error stops
/// production, the remaining workers are cancelled and joined, and that error
/// is returned.
pub async fn run_concurrent(
    client: reqwest::Client,
    settings: &Settings,
) -> Result<RunSummary, PipelineError> {
    let span = tracing::info_span!("run", mode = "concurrent", workers = settings.workers);
    coordinate(client, settings).instrument(span).await
}

async fn coordinate(
    client: reqwest::Client,
    settings: &Settings,
) -> Result<RunSummary, PipelineError> {
    let queue = WorkQueue::new(settings.workers);
    let cancel = CancellationToken::new();
    let ctx = Arc::new(ItemContext::new(client.clone(), settings));

    let mut workers = JoinSet::new();
    for id in 0..queue.capacity() {
        workers.spawn(
            run_worker(id, queue.clone(), Arc::clone(&ctx), cancel.clone()).in_current_span(),
        );
    }

    let mut summary = RunSummary::default();

    let produced = {
        let produce = async {
            let mut items = open_feed(&client, settings).await?;
            let mut extracted = 0;
            while let Some(url) = items.next().await {
                queue.enqueue(url?).await?;
                extracted += 1;
            }
            tracing::debug!(extracted, "Feed exhausted, waiting for queue to drain");
            queue.wait_drained().await;
            Ok::<_, PipelineError>(extracted)
        };
        tokio::pin!(produce);

        loop {
            tokio::select! {
                result = &mut produce => break result,
                joined = workers.join_next() => match joined.map(settle) {
                    // Before cancellation a worker only stops on its own when it failed.
                    Some(Ok(report)) => summary.absorb(report),
                    Some(Err(e)) => break Err(e),
                    None => break Err(PipelineError::Task("all workers exited early".into())),
                },
            }
        }
    };

    cancel.cancel();
    queue.close();

    let mut failure = produced.is_err();
    let mut worker_error = None;
    while let Some(joined) = workers.join_next().await {
        match settle(joined) {
            Ok(report) => summary.absorb(report),
            Err(e) if failure => tracing::debug!(error = %e, "Suppressed worker error after failure"),
            Err(e) => {
                failure = true;
                worker_error = Some(e);
            }
        }
    }

    drop(ctx);
    drop(client);
    tracing::debug!("HTTP client released");

    let extracted = produced?;
    if let Some(e) = worker_error {
        return Err(e);
    }
    summary.extracted = extracted;
    Ok(summary)
}

fn settle(joined: Result<Result<RunSummary, PipelineError>, JoinError>) -> Result<RunSummary, PipelineError> {
    joined.map_err(|e| PipelineError::Task(e.to_string()))?
}
