//! Error types for the document crate

use thiserror::Error;

/// Field path parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("field path is empty")]
    Empty,

    #[error("field path '{path}' has an empty segment at position {position}")]
    EmptySegment { path: String, position: usize },
}

/// XML normalization errors
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(#[from] roxmltree::Error),
}
