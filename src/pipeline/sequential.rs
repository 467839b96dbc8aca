use futures::StreamExt;
use tracing::Instrument;

use super::{open_feed, ItemContext, PipelineError, RunSummary};
use crate::config::Settings;

/// Processes every feed item in turn: extract one URL, fetch its page, log,
/// then pull the next URL.
///
/// The download is suspended while a page is being fetched, so at most one
/// request is active at any time.
pub async fn run_sequential(
    client: reqwest::Client,
    settings: &Settings,
) -> Result<RunSummary, PipelineError> {
    let span = tracing::info_span!("run", mode = "sequential");
    async move {
        let ctx = ItemContext::new(client, settings);
        let mut items = open_feed(&ctx.client, settings).await?;

        let mut summary = RunSummary::default();
        while let Some(url) = items.next().await {
            let url = url?;
            summary.extracted += 1;
            let outcome = ctx.process(&url).await?;
            ctx.record(&mut summary, outcome);
        }
        Ok(summary)
    }
    .instrument(span)
    .await
}
