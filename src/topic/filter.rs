//! Configured subscription set
//!
//! Decides whether an inbound topic is in scope for relaying and which
//! configured pattern it belongs to.

use super::pattern::{PatternError, TopicPattern};

/// An ordered, de-duplicated, non-empty set of topic patterns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    patterns: Vec<TopicPattern>,
}

impl TopicFilter {
    /// Build from already-validated patterns, dropping duplicates while keeping order
    pub fn new(patterns: impl IntoIterator<Item = TopicPattern>) -> Self {
        let mut unique: Vec<TopicPattern> = Vec::new();
        for pattern in patterns {
            if !unique.contains(&pattern) {
                unique.push(pattern);
            }
        }
        Self { patterns: unique }
    }

    /// Validate every pattern string; the first malformed one fails the whole set
    pub fn parse<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed = patterns
            .into_iter()
            .map(|p| TopicPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(parsed))
    }

    /// The single pattern matching every non-reserved topic
    pub fn match_all() -> Self {
        Self::new([TopicPattern::parse("#").expect("'#' is a valid pattern")])
    }

    pub fn patterns(&self) -> &[TopicPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True if at least one pattern matches; overlapping patterns still count once
    pub fn matches(&self, topic: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(topic))
    }
}

impl Default for TopicFilter {
    fn default() -> Self {
        Self::match_all()
    }
}
