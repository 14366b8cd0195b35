//! MQTT topic names and topic filters.
//!
//! Filters follow broker semantics: `+` matches exactly one level, `#`
//! matches the remaining levels (including none, so `a/#` matches `a`) and
//! must be the final level. Filters that start with a wildcard never match
//! topics beginning with `$`, which brokers reserve for system topics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

const MAX_TOPIC_LEN: usize = 65_535;

const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

// ── TopicFilter ──────────────────────────────────────────────────────

/// A validated subscription filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Parse and validate a filter.
    pub fn new(filter: impl Into<String>) -> Result<Self, Error> {
        let filter = filter.into();
        validate_filter(&filter)?;
        Ok(Self(filter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Test a concrete topic name against this filter.
    pub fn matches(&self, topic: &str) -> bool {
        if topic.starts_with('$')
            && (self.0.starts_with(SINGLE_LEVEL) || self.0.starts_with(MULTI_LEVEL))
        {
            return false;
        }

        let mut filter_levels = self.0.split('/');
        let mut topic_levels = topic.split('/');

        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some(MULTI_LEVEL), _) => return true,
                (Some(SINGLE_LEVEL), Some(_)) => {}
                (Some(expected), Some(actual)) if expected == actual => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TopicFilter {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TopicFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TopicFilter {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopicFilter> for String {
    fn from(filter: TopicFilter) -> Self {
        filter.0
    }
}

// ── Validation ───────────────────────────────────────────────────────

fn validate_filter(filter: &str) -> Result<(), Error> {
    let invalid = |reason| Error::InvalidTopicFilter {
        filter: filter.to_owned(),
        reason,
    };

    if filter.is_empty() {
        return Err(invalid("filter is empty"));
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err(invalid("filter exceeds 65535 bytes"));
    }
    if filter.contains('\0') {
        return Err(invalid("filter contains a NUL character"));
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') {
            if level != MULTI_LEVEL {
                return Err(invalid("'#' must occupy a whole level"));
            }
            if levels.peek().is_some() {
                return Err(invalid("multi-level wildcard must be last"));
            }
        }
        if level.contains('+') && level != SINGLE_LEVEL {
            return Err(invalid("'+' must occupy a whole level"));
        }
    }

    Ok(())
}

/// Validate a concrete topic name used for publishing.
pub fn validate_topic_name(topic: &str) -> Result<(), Error> {
    let invalid = |reason| Error::InvalidTopic {
        topic: topic.to_owned(),
        reason,
    };

    if topic.is_empty() {
        return Err(invalid("topic is empty"));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(invalid("topic exceeds 65535 bytes"));
    }
    if topic.contains(['+', '#']) {
        return Err(invalid("wildcards are not allowed in topic names"));
    }
    if topic.contains('\0') {
        return Err(invalid("topic contains a NUL character"));
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────
