//! Feed download and incremental extraction.
//!
//! This module turns a remote XML feed into a lazy stream of per-item values
//! without ever holding the whole document:
//!
//! - [`download`] - Streamed GET split into bounded byte chunks
//! - [`cursor`] - Push-based tokenizer state (element stack, namespace scopes,
//!   trailing partial markup) that materializes only the captured items
//! - [`path`] - Expanded names and the small path language used to locate a
//!   field inside one item
//! - [`extract`] - Glue: chunks in, one extracted string per item out
//!
//! # Example
//!
//! ```ignore
//! use feedskim::feed::{extract_items, open_chunks, ItemSpec};
//!
//! let chunks = open_chunks(&client, url, 1024).await?;
//! let mut urls = extract_items(chunks, spec);
//! while let Some(url) = urls.next().await {
//!     println!("{}", url?);
//! }
//! ```

pub mod cursor;
pub mod download;
pub mod extract;
pub mod path;

pub use cursor::{ClosedElement, Element, ParseCursor};
pub use download::{gunzip_chunks, open_chunks, ChunkStream, DownloadError};
pub use extract::{extract_items, ItemStream};
pub use path::{ExpandedName, ItemPath, ItemSpec};

use thiserror::Error;

/// Errors raised while extracting items from a feed.
///
/// Every variant is fatal for the extraction run: the item stream ends after
/// yielding it.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The underlying chunk stream failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Tokenizer rejected the input.
    #[error("XML error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    /// Closing tag does not match the innermost open element.
    #[error("Mismatched closing tag: expected </{expected}>, found </{found}>")]
    MismatchedEnd { expected: String, found: String },

    /// Closing tag with no open element.
    #[error("Unexpected closing tag </{0}>")]
    UnexpectedEnd(String),

    /// Input ended while an element was still open.
    #[error("Feed ended inside unterminated element <{0}>")]
    Unterminated(String),

    /// Input ended in the middle of a markup construct.
    #[error("Feed ended inside unterminated markup ({0} bytes pending)")]
    TruncatedMarkup(usize),

    /// Prefix not bound by any namespace declaration in scope.
    #[error("Unbound namespace prefix '{0}'")]
    UnboundPrefix(String),

    /// Item path expression could not be parsed.
    #[error("Invalid item path '{0}'")]
    InvalidPath(String),

    /// Element nesting exceeds the safety limit.
    #[error("Feed nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// A single markup construct grew past the pending-bytes limit.
    #[error("Incomplete markup exceeds {0} bytes")]
    PendingTooLarge(usize),

    /// An item has no element at the configured path.
    #[error("Item #{item} has no element matching '{path}'")]
    MissingField { item: usize, path: String },
}
