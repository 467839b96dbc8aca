//! Drivers that connect the feed extractor to page fetching.
//!
//! - [`run_sequential`] - one item at a time, no overlap between parsing and
//!   fetching; the baseline the concurrent mode is checked against
//! - [`run_concurrent`] - a [`WorkQueue`] with a fixed pool of workers, fed by
//!   the extractor while the feed is still downloading
//!
//! Both drivers report through `tracing` inside a `run` span and apply the
//! same [`FailurePolicy`] to item pages.

mod coordinator;
mod queue;
mod sequential;
mod worker;

pub use coordinator::run_concurrent;
pub use queue::{Job, QueueClosed, WorkQueue};
pub use sequential::run_sequential;

use serde::Deserialize;
use thiserror::Error;

use crate::config::Settings;
use crate::feed::{self, FeedError, ItemStream};
use crate::page::{self, PageError, PageReport, TitleSelector};

/// What to do when a single item page fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the whole run on the first failed item.
    #[default]
    Abort,
    /// Log the failure and keep processing the remaining items.
    Isolate,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Feed extraction failed: {0}")]
    Feed(#[from] FeedError),

    #[error("Item {url} failed: {source}")]
    Page {
        url: String,
        #[source]
        source: PageError,
    },

    /// A worker panicked or was aborted.
    #[error("Worker task failed: {0}")]
    Task(String),

    #[error("Work queue closed before the feed was exhausted")]
    QueueClosed(#[from] QueueClosed),
}

/// Counts for one run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Items whose page was fetched and logged.
    pub processed: usize,
    /// Items yielded by the extractor.
    pub extracted: usize,
    /// Items skipped under [`FailurePolicy::Isolate`].
    pub failed: usize,
    /// Successful items in completion order, only kept when
    /// [`Settings::keep_reports`] is set.
    pub reports: Vec<PageReport>,
}

impl RunSummary {
    fn absorb(&mut self, other: RunSummary) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.reports.extend(other.reports);
    }
}

/// Per-item processing shared by the sequential driver and every worker.
pub(crate) struct ItemContext {
    pub client: reqwest::Client,
    pub selector: TitleSelector,
    pub policy: FailurePolicy,
    pub keep_reports: bool,
}

impl ItemContext {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            selector: settings.title.clone(),
            policy: settings.policy,
            keep_reports: settings.keep_reports,
        }
    }

    /// Counts one outcome of [`process`](Self::process) into `summary`.
    pub fn record(&self, summary: &mut RunSummary, outcome: Option<PageReport>) {
        match outcome {
            Some(report) => {
                summary.processed += 1;
                if self.keep_reports {
                    summary.reports.push(report);
                }
            }
            None => summary.failed += 1,
        }
    }

    /// Fetches one page and logs its title.
    ///
    /// Returns `Ok(None)` for a failure isolated by the policy.
    pub async fn process(&self, url: &str) -> Result<Option<PageReport>, PipelineError> {
        match page::fetch_title(&self.client, url, &self.selector).await {
            Ok(report) => {
                tracing::info!(size_kb = report.size_kb(), "{}", report);
                Ok(Some(report))
            }
            Err(e) => match self.policy {
                FailurePolicy::Abort => Err(PipelineError::Page {
                    url: url.to_string(),
                    source: e,
                }),
                FailurePolicy::Isolate => {
                    tracing::warn!(url = %url, error = %e, "Item failed, continuing");
                    Ok(None)
                }
            },
        }
    }
}

/// Starts a new download of the feed and returns its item URL stream.
pub(crate) async fn open_feed(
    client: &reqwest::Client,
    settings: &Settings,
) -> Result<ItemStream, FeedError> {
    let mut chunks = feed::open_chunks(client, &settings.feed_url, settings.chunk_size).await?;
    if settings.gzip {
        chunks = feed::gunzip_chunks(chunks);
    }
    Ok(feed::extract_items(chunks, settings.item.clone()))
}
