//! Utility functions for common operations.
//!
//! - **URL handling**: request URL checks and swipe-up link normalisation
//! - **Elapsed labels**: compact "posted N ago" strings for story headers

mod elapsed;
mod links;

pub use elapsed::elapsed_label;
pub use links::{normalize_link, parse_request_url, UrlValidationError};
