use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::path::{PathMatcher, PatternError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown access level '{0}'")]
pub struct ParseAccessLevelError(pub String);

/// Access granted by one permission entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AccessLevel {
    Read,
    Write,
    ReadWrite,
}

impl AccessLevel {
    pub fn can_read(self) -> bool {
        matches!(self, AccessLevel::Read | AccessLevel::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, AccessLevel::Write | AccessLevel::ReadWrite)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::ReadWrite => "readwrite",
        }
    }
}

impl FromStr for AccessLevel {
    type Err = ParseAccessLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" | "r" => Ok(AccessLevel::Read),
            "write" | "w" => Ok(AccessLevel::Write),
            "readwrite" | "rw" => Ok(AccessLevel::ReadWrite),
            _ => Err(ParseAccessLevelError(s.to_string())),
        }
    }
}

impl TryFrom<String> for AccessLevel {
    type Error = ParseAccessLevelError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccessLevel> for String {
    fn from(value: AccessLevel) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled pattern → access table granted to one session.
///
/// Keys are unique; inserting an existing pattern replaces its level.
#[derive(Debug, Clone, Default)]
pub struct PermissionMap {
    grants: Vec<(PathMatcher, AccessLevel)>,
}

impl PermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a raw grant table, keeping every valid entry.
    ///
    /// Entries with malformed patterns are returned alongside so the caller
    /// can report them; they never grant anything.
    pub fn compile<I, K>(grants: I) -> (Self, Vec<PatternError>)
    where
        I: IntoIterator<Item = (K, AccessLevel)>,
        K: AsRef<str>,
    {
        let mut map = PermissionMap::new();
        let mut rejected = Vec::new();
        for (pattern, level) in grants {
            if let Err(e) = map.insert(pattern.as_ref(), level) {
                rejected.push(e);
            }
        }
        (map, rejected)
    }

    pub fn insert(&mut self, pattern: &str, level: AccessLevel) -> Result<(), PatternError> {
        let matcher = PathMatcher::compile(pattern)?;
        match self
            .grants
            .iter_mut()
            .find(|(existing, _)| existing.pattern() == pattern)
        {
            Some(entry) => entry.1 = level,
            None => self.grants.push((matcher, level)),
        }
        Ok(())
    }

    /// Some entry whose pattern accepts `path` grants read.
    pub fn can_read(&self, path: &str) -> bool {
        self.grants
            .iter()
            .any(|(matcher, level)| level.can_read() && matcher.matches(path))
    }

    /// Some entry whose pattern accepts `path` grants write.
    pub fn can_write(&self, path: &str) -> bool {
        self.grants
            .iter()
            .any(|(matcher, level)| level.can_write() && matcher.matches(path))
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Plain pattern → level view, e.g. for echoing back to a client.
    pub fn to_grants(&self) -> BTreeMap<String, AccessLevel> {
        self.grants
            .iter()
            .map(|(matcher, level)| (matcher.pattern().to_string(), *level))
            .collect()
    }
}
