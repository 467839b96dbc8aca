//! Item page fetching and title extraction.
use std::fmt;

use scraper::{Html, Selector};
use thiserror::Error;

const BYTES_PER_KB: f64 = 1024.0;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("No element matching '{selector}' on page")]
    MissingTitle { selector: String },
}

/// CSS selector for the element whose text is the page title.
#[derive(Debug, Clone)]
pub struct TitleSelector {
    source: String,
    selector: Selector,
}

impl TitleSelector {
    pub fn parse(source: &str) -> Result<Self, String> {
        let selector = Selector::parse(source).map_err(|e| e.to_string())?;
        Ok(Self {
            source: source.to_string(),
            selector,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Default for TitleSelector {
    fn default() -> Self {
        Self {
            source: "h1".to_string(),
            selector: Selector::parse("h1").expect("static 'h1' CSS selector is valid"),
        }
    }
}

/// Outcome of one processed item page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageReport {
    pub title: String,
    /// Final URL after redirects.
    pub url: String,
    pub size_bytes: usize,
}

impl PageReport {
    pub fn size_kb(&self) -> f64 {
        self.size_bytes as f64 / BYTES_PER_KB
    }
}

impl fmt::Display for PageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({:.2} KB)", self.title, self.url, self.size_kb())
    }
}

/// Fetches one item page and extracts its title.
///
/// The whole body is buffered; item pages are expected to be small.
///
/// # Errors
///
/// - [`PageError::Network`] - Connection failure or body read error
/// - [`PageError::HttpStatus`] - Non-2xx HTTP response
/// - [`PageError::MissingTitle`] - No element matches the title selector
pub async fn fetch_title(
    client: &reqwest::Client,
    url: &str,
    selector: &TitleSelector,
) -> Result<PageReport, PageError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(PageError::HttpStatus(response.status().as_u16()));
    }

    let final_url = response.url().to_string();
    let body = response.bytes().await?;
    let html = String::from_utf8_lossy(&body);

    let title = extract_title(&html, selector).ok_or_else(|| PageError::MissingTitle {
        selector: selector.as_str().to_string(),
    })?;

    Ok(PageReport {
        title,
        url: final_url,
        size_bytes: body.len(),
    })
}

/// Returns the whitespace-normalized text of the first matching element.
pub fn extract_title(html: &str, selector: &TitleSelector) -> Option<String> {
    let document = Html::parse_document(html);
    document.select(&selector.selector).next().map(|el| {
        el.text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ")
    })
}
