//! Splitting of raw input lines into `<tag>: <payload>`.

use crate::error::{Error, Result};

/// A line split at its first `:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub tag: String,
    pub payload: String,
}

impl ParsedLine {
    /// Splits `raw` at the first `:`; both halves are trimmed.
    pub fn parse(raw: &str) -> Result<Self> {
        let (tag, payload) = raw.split_once(':').ok_or(Error::MalformedLine)?;
        Ok(Self {
            tag: tag.trim().to_string(),
            payload: payload.trim().to_string(),
        })
    }
}
