use std::io::Write;

use bytes::Bytes;
use flate2::write::GzDecoder;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use thiserror::Error;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Lazy, finite sequence of feed body chunks in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// Errors that can occur while streaming a feed body.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS, connection, TLS, body read)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Body is not a valid gzip stream
    #[error("Gzip decode failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Opens a streamed GET for `url` and splits the body into chunks of at most
/// `chunk_size` bytes.
///
/// Logs the declared size in MB when the server sends a `Content-Length`.
/// A missing length is not an error.
///
/// # Errors
///
/// Connection failures and non-2xx statuses fail the call itself. Failures
/// while reading the body are yielded as the last item of the stream.
pub async fn open_chunks(
    client: &reqwest::Client,
    url: &str,
    chunk_size: usize,
) -> Result<ChunkStream, DownloadError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus(response.status().as_u16()));
    }

    match response.content_length() {
        Some(len) => tracing::info!(
            url = %url,
            size_mb = %format!("{:.2}", len as f64 / BYTES_PER_MB),
            "Downloading feed"
        ),
        None => tracing::info!(url = %url, "Downloading feed (size unknown)"),
    }

    let body = response.bytes_stream().map_err(DownloadError::Network);
    Ok(rechunk(body, chunk_size).boxed())
}

/// Splits every chunk larger than `chunk_size` into slices of at most that size.
///
/// Slicing `Bytes` shares the allocation, so no data is copied.
pub fn rechunk<S, E>(chunks: S, chunk_size: usize) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let chunk_size = chunk_size.max(1);
    chunks.flat_map(move |item| {
        let pieces = match item {
            Ok(mut bytes) => {
                let mut pieces = Vec::with_capacity(bytes.len().div_ceil(chunk_size));
                while !bytes.is_empty() {
                    let take = chunk_size.min(bytes.len());
                    pieces.push(Ok(bytes.split_to(take)));
                }
                pieces
            }
            Err(e) => vec![Err(e)],
        };
        stream::iter(pieces)
    })
}

/// Decompresses a gzip-encoded chunk stream incrementally.
///
/// Each input chunk is pushed through the decoder and whatever it produced so
/// far is yielded; nothing beyond the decoder's window is buffered.
pub fn gunzip_chunks(chunks: ChunkStream) -> ChunkStream {
    let state = Some((chunks, GzDecoder::new(Vec::new())));

    stream::unfold(state, |state| async move {
        let (mut chunks, mut decoder) = state?;
        loop {
            match chunks.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = decoder.write_all(&chunk).and_then(|()| decoder.flush()) {
                        return Some((Err(DownloadError::Decompress(e)), None));
                    }
                    let out = std::mem::take(decoder.get_mut());
                    if !out.is_empty() {
                        return Some((Ok(Bytes::from(out)), Some((chunks, decoder))));
                    }
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    if let Err(e) = decoder.try_finish() {
                        return Some((Err(DownloadError::Decompress(e)), None));
                    }
                    let out = std::mem::take(decoder.get_mut());
                    return (!out.is_empty()).then(|| (Ok(Bytes::from(out)), None));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(stream: ChunkStream) -> Result<Vec<Bytes>, DownloadError> {
        stream.try_collect().await
    }

    #[tokio::test]
    async fn test_chunks_are_bounded_and_complete() {
        let body = "x".repeat(5000);
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed.xml", mock_server.uri());
        let chunks = collect(open_chunks(&client, &url, 1024).await.unwrap())
            .await
            .unwrap();

        assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= 1024));
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, body.as_bytes());
    }

    #[tokio::test]
    async fn test_http_error_status_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed.xml", mock_server.uri());
        match open_chunks(&client, &url, 1024).await {
            Err(DownloadError::HttpStatus(404)) => {}
            Err(e) => panic!("Expected HttpStatus(404), got {:?}", e),
            Ok(_) => panic!("Expected HttpStatus(404), got a stream"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let client = reqwest::Client::new();
        // Port 9 (discard) on localhost is normally closed.
        let result = open_chunks(&client, "http://127.0.0.1:9/feed.xml", 1024).await;
        assert!(matches!(result, Err(DownloadError::Network(_))));
    }

    #[tokio::test]
    async fn test_rechunk_splits_large_pieces() {
        let input = stream::iter(vec![
            Ok::<_, DownloadError>(Bytes::from_static(b"abcdefg")),
            Ok(Bytes::from_static(b"hi")),
        ]);
        let pieces: Vec<Bytes> = rechunk(input, 3).try_collect().await.unwrap();
        assert_eq!(
            pieces,
            vec![
                Bytes::from_static(b"abc"),
                Bytes::from_static(b"def"),
                Bytes::from_static(b"g"),
                Bytes::from_static(b"hi"),
            ]
        );
    }

    #[tokio::test]
    async fn test_gunzip_restores_payload() {
        let payload = "<ProteinDatabase>".to_string() + &"<ProteinEntry/>".repeat(500);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload.as_bytes()).unwrap();
        let compressed = Bytes::from(encoder.finish().unwrap());

        let chunks = rechunk(stream::iter(vec![Ok(compressed)]), 64).boxed();
        let out = collect(gunzip_chunks(chunks)).await.unwrap();
        let joined: Vec<u8> = out.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, payload.as_bytes());
    }

    #[tokio::test]
    async fn test_gunzip_rejects_plain_input() {
        let chunks = stream::iter(vec![Ok(Bytes::from_static(b"<not gzip/>"))]).boxed();
        let result = collect(gunzip_chunks(chunks)).await;
        assert!(matches!(result, Err(DownloadError::Decompress(_))));
    }
}
