//! Dot-separated field paths

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PathError;

/// A parsed field path such as `products.brand_name`.
///
/// Segments are never empty: `""`, `".a"`, `"a."` and `"a..b"` are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(input: &str) -> Result<Self, PathError> {
        if input.is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments = Vec::new();
        for (position, segment) in input.split('.').enumerate() {
            if segment.is_empty() {
                return Err(PathError::EmptySegment {
                    path: input.to_string(),
                    position,
                });
            }
            segments.push(segment.to_string());
        }

        Ok(Self { segments })
    }

    /// Parse a list of paths, failing on the first malformed one.
    pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<Self>, PathError> {
        inputs.iter().map(|s| Self::parse(s.as_ref())).collect()
    }

    /// Build a path from a single key, which may itself contain dots.
    ///
    /// Used for document keys that are taken literally rather than parsed.
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            segments: vec![key.into()],
        }
    }

    /// Extend the path by one literal key.
    pub fn join(mut self, key: impl Into<String>) -> Self {
        self.segments.push(key.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first(&self) -> &str {
        &self.segments[0]
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
