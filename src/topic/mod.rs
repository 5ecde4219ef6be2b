//! Topic patterns and the relay's subscription scope
//!
//! Patterns are validated once, when configuration is loaded; matching is
//! infallible afterwards.

mod filter;
mod pattern;

pub use filter::TopicFilter;
pub use pattern::{matches, PatternError, TopicPattern};
