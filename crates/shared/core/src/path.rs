//! Signal path patterns.
//!
//! Paths are dot-separated segments (`Signal.Cabin.Door.Row1.Left.IsLocked`).
//! A pattern may contain `*` segments. A `*` consumes one or more whole
//! segments, so a trailing `*` covers the entire remaining subtree:
//!
//! ```text
//! Signal.Cabin.Door.*   matches  Signal.Cabin.Door.Row1.Left.IsLocked
//! Signal.*.IsLocked     matches  Signal.Body.Trunk.IsLocked
//! Signal.Body.Trunk     matches  Signal.Body.Trunk   (and nothing else)
//! ```

use std::fmt;
use thiserror::Error;

pub const SEPARATOR: char = '.';
pub const WILDCARD: &str = "*";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("invalid pattern: pattern is empty")]
    Empty,

    #[error("invalid pattern '{0}': empty segment")]
    EmptySegment(String),

    #[error("invalid pattern '{pattern}': wildcard must be a whole segment, got '{segment}'")]
    PartialWildcard { pattern: String, segment: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatcher {
    pattern: String,
    segments: Vec<Segment>,
}

impl PathMatcher {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let segments = pattern
            .split(SEPARATOR)
            .map(|segment| match segment {
                "" => Err(PatternError::EmptySegment(pattern.to_string())),
                WILDCARD => Ok(Segment::Wildcard),
                s if s.contains('*') => Err(PatternError::PartialWildcard {
                    pattern: pattern.to_string(),
                    segment: s.to_string(),
                }),
                s => Ok(Segment::Literal(s.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PathMatcher {
            pattern: pattern.to_string(),
            segments,
        })
    }

    /// Test a concrete path against the pattern. The whole path must be consumed.
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split(SEPARATOR).collect();
        match_segments(&self.segments, &parts)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True when the pattern has no wildcard and can only match itself.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }
}

impl fmt::Display for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl TryFrom<&str> for PathMatcher {
    type Error = PatternError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        PathMatcher::compile(value)
    }
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::Literal(literal), rest)) => match path.split_first() {
            Some((head, tail)) => head == literal && match_segments(rest, tail),
            None => false,
        },
        // A wildcard takes at least one segment, then tries every split point.
        Some((Segment::Wildcard, rest)) => {
            (1..=path.len()).any(|taken| match_segments(rest, &path[taken..]))
        }
    }
}

/// True when `path` ends with the whole segments of `suffix`.
///
/// `Signal.Cabin.Door.Row1.Right.IsLocked` ends with `Right.IsLocked` but not
/// with `ight.IsLocked`.
pub fn ends_with_segments(path: &str, suffix: &str) -> bool {
    if suffix.is_empty() {
        return false;
    }
    match path.strip_suffix(suffix) {
        Some("") => true,
        Some(head) => head.ends_with(SEPARATOR),
        None => false,
    }
}
