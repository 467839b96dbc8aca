use std::collections::VecDeque;

use futures::stream::{self, BoxStream, StreamExt};

use super::cursor::{ClosedElement, ParseCursor};
use super::download::ChunkStream;
use super::path::ItemSpec;
use super::FeedError;

/// Lazy sequence of values extracted from feed items, in document order.
pub type ItemStream = BoxStream<'static, Result<String, FeedError>>;

struct Extraction {
    chunks: ChunkStream,
    cursor: ParseCursor,
    spec: ItemSpec,
    /// Values extracted from the last chunk; a failure is queued behind them.
    ready: VecDeque<Result<String, FeedError>>,
    done: bool,
    items: usize,
    peak_footprint: usize,
}

impl Extraction {
    /// Pulls the configured field out of each closed item, then drops the item.
    fn take(&mut self, closed: Vec<ClosedElement>) -> Result<(), FeedError> {
        for ClosedElement { element, .. } in closed {
            self.items += 1;
            let value = self
                .spec
                .path
                .first_text(&element)
                .ok_or_else(|| FeedError::MissingField {
                    item: self.items,
                    path: self.spec.path.to_string(),
                })?;
            self.ready.push_back(Ok(value));
        }
        Ok(())
    }

    async fn advance(&mut self) {
        if let Err(e) = self.step().await {
            self.ready.push_back(Err(e));
            self.done = true;
        }
    }

    async fn step(&mut self) -> Result<(), FeedError> {
        match self.chunks.next().await {
            Some(chunk) => {
                self.cursor.feed(&chunk?);
                self.peak_footprint = self.peak_footprint.max(self.cursor.footprint());
                let closed = self.cursor.poll_events()?;
                self.take(closed)
            }
            None => {
                self.done = true;
                let closed = self.cursor.finish()?;
                self.take(closed)?;
                tracing::debug!(
                    items = self.items,
                    peak_footprint = self.peak_footprint,
                    "Feed extraction finished"
                );
                Ok(())
            }
        }
    }
}

/// Feeds `chunks` into a fresh [`ParseCursor`] and yields the text at
/// `spec.path` for every element named `spec.tag`.
///
/// Chunks are pulled only when no extracted value is waiting, so a slow
/// consumer throttles the download. The first error ends the stream; an item
/// without a match for the path, or whose match is blank, is such an error.
pub fn extract_items(chunks: ChunkStream, spec: ItemSpec) -> ItemStream {
    let state = Extraction {
        chunks,
        cursor: ParseCursor::new(spec.tag.clone()),
        spec,
        ready: VecDeque::new(),
        done: false,
        items: 0,
        peak_footprint: 0,
    };

    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            if let Some(next) = state.ready.pop_front() {
                let state = next.is_ok().then_some(state);
                return Some((next, state));
            }
            if state.done {
                return None;
            }
            state.advance().await;
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::download::{rechunk, DownloadError};
    use bytes::Bytes;
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    const NS: &str = "http://www.zbozi.cz/ns/offer/1.0";

    fn spec() -> ItemSpec {
        let ns = HashMap::from([("zbozi".to_string(), NS.to_string())]);
        ItemSpec::resolve("zbozi:SHOPITEM", "//zbozi:URL", &ns).unwrap()
    }

    fn chunks(doc: &str, size: usize) -> ChunkStream {
        let body = Bytes::from(doc.to_string());
        rechunk(stream::iter(vec![Ok(body)]), size).boxed()
    }

    #[tokio::test]
    async fn test_yields_one_url_per_item() {
        let doc = r#"<?xml version="1.0"?>
<SHOP xmlns="http://www.zbozi.cz/ns/offer/1.0">
  <SHOPITEM><ITEM_ID>1</ITEM_ID><URL>https://shop.example/1</URL></SHOPITEM>
  <SHOPITEM><URL>
      https://shop.example/2
  </URL><PRICE_VAT>10</PRICE_VAT></SHOPITEM>
  <SHOPITEM><URL>https://shop.example/3?a=1&amp;b=2</URL></SHOPITEM>
</SHOP>"#;

        let urls: Vec<String> = extract_items(chunks(doc, 7), spec())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            urls,
            vec![
                "https://shop.example/1",
                "https://shop.example/2",
                "https://shop.example/3?a=1&b=2",
            ]
        );
    }

    #[tokio::test]
    async fn test_item_without_url_fails_run() {
        let doc = r#"<SHOP xmlns="http://www.zbozi.cz/ns/offer/1.0">
  <SHOPITEM><URL>https://shop.example/1</URL></SHOPITEM>
  <SHOPITEM><PRODUCTNAME>no link</PRODUCTNAME></SHOPITEM>
  <SHOPITEM><URL>https://shop.example/3</URL></SHOPITEM>
</SHOP>"#;

        let mut items = extract_items(chunks(doc, 1024), spec());
        assert_eq!(items.next().await.unwrap().unwrap(), "https://shop.example/1");
        match items.next().await {
            Some(Err(FeedError::MissingField { item: 2, path })) => assert_eq!(path, "//zbozi:URL"),
            other => panic!("Expected MissingField for item 2, got {:?}", other),
        }
        assert!(items.next().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_url_fails_run() {
        let doc = r#"<SHOP xmlns="http://www.zbozi.cz/ns/offer/1.0">
  <SHOPITEM><URL>https://shop.example/1</URL></SHOPITEM>
  <SHOPITEM><URL></URL></SHOPITEM>
  <SHOPITEM><URL/></SHOPITEM>
</SHOP>"#;

        let results: Vec<Result<String, FeedError>> =
            extract_items(chunks(doc, 9), spec()).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "https://shop.example/1");
        assert!(matches!(
            results[1],
            Err(FeedError::MissingField { item: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_unterminated_feed_fails_after_complete_items() {
        let doc = r#"<SHOP xmlns="http://www.zbozi.cz/ns/offer/1.0">
  <SHOPITEM><URL>https://shop.example/1</URL></SHOPITEM>
  <SHOPITEM><URL>https://shop.example/2</URL>"#;

        let results: Vec<Result<String, FeedError>> =
            extract_items(chunks(doc, 16), spec()).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "https://shop.example/1");
        assert!(matches!(results[1], Err(FeedError::Unterminated(_))));
    }

    #[tokio::test]
    async fn test_download_error_propagates() {
        let items = vec![
            Ok(Bytes::from_static(b"<SHOP xmlns=\"http://www.zbozi.cz/ns/offer/1.0\">")),
            Err(DownloadError::HttpStatus(502)),
        ];
        let results: Vec<Result<String, FeedError>> =
            extract_items(stream::iter(items).boxed(), spec()).collect().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(FeedError::Download(DownloadError::HttpStatus(502)))
        ));
    }

    #[tokio::test]
    async fn test_empty_feed_yields_nothing() {
        let doc = r#"<SHOP xmlns="http://www.zbozi.cz/ns/offer/1.0"></SHOP>"#;
        let urls: Vec<String> = extract_items(chunks(doc, 4), spec())
            .try_collect()
            .await
            .unwrap();
        assert!(urls.is_empty());
    }
}
