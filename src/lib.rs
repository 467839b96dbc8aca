//! Streaming scraper for large XML product feeds.
//!
//! The feed is downloaded in bounded chunks and tokenized incrementally, so
//! memory stays proportional to one item rather than to the whole document.
//! Every item URL is then fetched and the page title logged, either one at a
//! time ([`pipeline::run_sequential`]) or through a bounded worker pool that
//! overlaps parsing with fetching ([`pipeline::run_concurrent`]).

pub mod config;
pub mod feed;
pub mod page;
pub mod pipeline;
pub mod profile;
