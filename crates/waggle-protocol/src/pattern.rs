//! Wildcard topic patterns for the broker binding.
//!
//! Patterns use `+` for exactly one topic segment and `#` for one or more
//! trailing segments. They are translated to anchored regular expressions
//! once, at registration time, so matching is a single regex test.

use regex::Regex;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PatternError {
    #[error("empty topic pattern")]
    Empty,
    #[error("'#' must be the last segment of the pattern: {0}")]
    MultiLevelNotTerminal(String),
    #[error("wildcards must stand alone in a segment: {0}")]
    WildcardInSegment(String),
}

/// A compiled topic pattern.
#[derive(Debug, Clone)]
pub struct TopicPattern {
    raw: String,
    regex: Regex,
}

impl TopicPattern {
    /// Compile a pattern, rejecting malformed wildcard placement eagerly.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let segments: Vec<&str> = pattern.split('/').collect();
        let mut parts = Vec::with_capacity(segments.len());
        for (index, segment) in segments.iter().enumerate() {
            match *segment {
                "+" => parts.push("[^/]+".to_string()),
                "#" => {
                    if index != segments.len() - 1 {
                        return Err(PatternError::MultiLevelNotTerminal(pattern.to_string()));
                    }
                    parts.push(".+".to_string());
                }
                other if other.contains('+') || other.contains('#') => {
                    return Err(PatternError::WildcardInSegment(pattern.to_string()));
                }
                other => parts.push(regex::escape(other)),
            }
        }

        let anchored = format!("^{}$", parts.join("/"));
        let regex = Regex::new(&anchored).expect("escaped pattern is always a valid regex");
        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    /// Exact, wildcard-free pattern. Used by the group binding where matching
    /// is by room name only.
    pub fn literal(topic: &str) -> Self {
        let regex = Regex::new(&format!("^{}$", regex::escape(topic)))
            .expect("escaped literal is always a valid regex");
        Self {
            raw: topic.to_string(),
            regex,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }
}
