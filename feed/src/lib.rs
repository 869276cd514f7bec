//! Feed assembly and date-label resolution for the camera-roll feed.

mod assembler;
mod resolver;
mod types;

pub use assembler::{assemble, build_feed_state, resource_urls, FeedConfig};
pub use resolver::{normalize_date_text, DateMap, DateResolver};
pub use types::{FeedState, MediaEntry, MediaKind, SharedFeedState};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Date Map Error: {0}")]
    DateMapError(String),
}
