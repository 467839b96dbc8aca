//! Memory-profiling harness for the streaming parser.
//!
//! Streams a large gzip-compressed XML file through the same downloader and
//! [`ParseCursor`] the scraper uses, logging the cursor's retained bytes next
//! to each captured entry. Nothing is fetched per entry; the point is to watch
//! the footprint stay flat while the document grows.

use futures::StreamExt;
use tracing::Instrument;

use crate::config::ProfileSettings;
use crate::feed::{gunzip_chunks, open_chunks, ChunkStream, ClosedElement, FeedError, ItemSpec, ParseCursor};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProfileReport {
    pub entries: usize,
    pub peak_footprint: usize,
    pub decompressed_bytes: u64,
}

/// Downloads and gunzips `settings.url`, profiling every captured entry.
pub async fn run_profile(
    client: reqwest::Client,
    settings: &ProfileSettings,
) -> Result<ProfileReport, FeedError> {
    let span = tracing::info_span!("profile", item = %settings.item.tag);
    async move {
        let chunks = open_chunks(&client, &settings.url, settings.chunk_size).await?;
        let report = profile_chunks(gunzip_chunks(chunks), &settings.item).await?;
        tracing::info!(
            entries = report.entries,
            peak_mb = %format!("{:.2}", report.peak_footprint as f64 / BYTES_PER_MB),
            decompressed_mb = %format!("{:.2}", report.decompressed_bytes as f64 / BYTES_PER_MB),
            "Profile finished"
        );
        Ok(report)
    }
    .instrument(span)
    .await
}

/// Feeds already-decoded chunks to a cursor and records its peak footprint.
pub async fn profile_chunks(
    mut chunks: ChunkStream,
    item: &ItemSpec,
) -> Result<ProfileReport, FeedError> {
    let mut cursor = ParseCursor::new(item.tag.clone());
    let mut report = ProfileReport::default();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        report.decompressed_bytes += chunk.len() as u64;
        cursor.feed(&chunk);
        report.peak_footprint = report.peak_footprint.max(cursor.footprint());

        let closed = cursor.poll_events()?;
        record(&mut report, &cursor, item, closed)?;
    }
    let closed = cursor.finish()?;
    record(&mut report, &cursor, item, closed)?;

    Ok(report)
}

fn record(
    report: &mut ProfileReport,
    cursor: &ParseCursor,
    item: &ItemSpec,
    closed: Vec<ClosedElement>,
) -> Result<(), FeedError> {
    for ClosedElement { element, .. } in closed {
        report.entries += 1;
        let text = item.path.first_text(&element).ok_or_else(|| FeedError::MissingField {
            item: report.entries,
            path: item.path.to_string(),
        })?;
        tracing::debug!(
            entry = report.entries,
            "MEM: {:.2} MB | Sequence data: {}",
            cursor.footprint() as f64 / BYTES_PER_MB,
            text
        );
    }
    Ok(())
}
