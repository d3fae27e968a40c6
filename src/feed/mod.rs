//! Stories feed retrieval and decoding.
//!
//! - [`parser`] - JSON feed body into [`Company`](crate::model::Company) values
//! - [`fetcher`] - GET through a [`Network`](crate::net::Network) and decode

mod fetcher;
mod parser;

use thiserror::Error;

use crate::net::NetworkError;

pub use fetcher::fetch_companies;
pub use parser::{parse_feed, parse_link, ParseResult};

/// Errors that can occur while retrieving the feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Feed request failed: {0}")]
    Network(#[from] NetworkError),
    /// Server answered but reported failure
    #[error("Feed rejected by server (success = {0})")]
    Rejected(i64),
    #[error("Malformed feed: {0}")]
    Malformed(String),
}
