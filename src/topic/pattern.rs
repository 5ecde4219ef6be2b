//! Topic patterns (subscription filters) and matching
//!
//! Key rules:
//! - `/` is the level separator; levels may be empty
//! - Single-level wildcard (`+`) must occupy an entire level
//! - Multi-level wildcard (`#`) must occupy an entire level and be the last one
//! - Topics starting with `$` are reserved and not matched by a leading wildcard
//! - Shared subscriptions (`$share/{group}/{filter}`) match on `{filter}`

use std::fmt;
use std::str::FromStr;

const SHARE_PREFIX: &str = "$share/";
const MAX_LEN: usize = 65535;

/// Reasons a pattern is rejected at configuration time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// Pattern is the empty string
    Empty,
    /// Pattern exceeds the 65535 byte limit of the wire format
    TooLong,
    /// Pattern contains a NUL character
    NullCharacter,
    /// `+` or `#` shares a level with other characters, e.g. `sensor+`
    PartialWildcard(String),
    /// `#` appears somewhere other than the last level
    MultiLevelNotLast(String),
    /// `$share/` pattern without a valid group or filter
    InvalidSharedSubscription(String),
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::Empty => write!(f, "topic pattern cannot be empty"),
            PatternError::TooLong => write!(f, "topic pattern exceeds maximum length"),
            PatternError::NullCharacter => {
                write!(f, "topic pattern cannot contain null character")
            }
            PatternError::PartialWildcard(p) => {
                write!(f, "wildcard must occupy an entire level: '{}'", p)
            }
            PatternError::MultiLevelNotLast(p) => {
                write!(f, "multi-level wildcard must be the last level: '{}'", p)
            }
            PatternError::InvalidSharedSubscription(p) => {
                write!(f, "invalid shared subscription: '{}'", p)
            }
        }
    }
}

impl std::error::Error for PatternError {}

/// A validated subscription filter
///
/// Construction is the only place the grammar is checked, so matching can
/// never fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    raw: String,
    /// Byte offset of the filter proper (non-zero for `$share/` patterns)
    filter_start: usize,
}

impl TopicPattern {
    /// Validate and build a pattern
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        if pattern.len() > MAX_LEN {
            return Err(PatternError::TooLong);
        }
        if pattern.contains('\0') {
            return Err(PatternError::NullCharacter);
        }

        let filter_start = match pattern.strip_prefix(SHARE_PREFIX) {
            Some(rest) => {
                let invalid = || PatternError::InvalidSharedSubscription(pattern.to_string());
                let (group, filter) = rest.split_once('/').ok_or_else(invalid)?;
                if group.is_empty() || group.contains(['+', '#']) || filter.is_empty() {
                    return Err(invalid());
                }
                SHARE_PREFIX.len() + group.len() + 1
            }
            None => 0,
        };

        let filter = &pattern[filter_start..];
        let level_count = filter.split('/').count();
        for (i, level) in filter.split('/').enumerate() {
            if level.contains('#') {
                if level != "#" {
                    return Err(PatternError::PartialWildcard(pattern.to_string()));
                }
                if i != level_count - 1 {
                    return Err(PatternError::MultiLevelNotLast(pattern.to_string()));
                }
            }
            if level.contains('+') && level != "+" {
                return Err(PatternError::PartialWildcard(pattern.to_string()));
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            filter_start,
        })
    }

    /// The pattern exactly as it is sent in SUBSCRIBE
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The filter used for matching (without any `$share/{group}/` prefix)
    pub fn filter(&self) -> &str {
        &self.raw[self.filter_start..]
    }

    /// Shared subscription group, if any
    pub fn share_group(&self) -> Option<&str> {
        if self.filter_start == 0 {
            return None;
        }
        Some(&self.raw[SHARE_PREFIX.len()..self.filter_start - 1])
    }

    /// Check whether a topic name falls under this pattern
    pub fn matches(&self, topic: &str) -> bool {
        filter_matches(self.filter(), topic)
    }
}

impl FromStr for TopicPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for TopicPattern {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// Check a validated pattern against a topic name
pub fn matches(pattern: &TopicPattern, topic: &str) -> bool {
    pattern.matches(topic)
}

/// Match a filter already known to be well-formed against a topic name
fn filter_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    for filter_level in filter.split('/') {
        if filter_level == "#" {
            return true;
        }
        match topic_levels.next() {
            Some(_) if filter_level == "+" => {}
            Some(level) if level == filter_level => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}
