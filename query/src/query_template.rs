//! Rendered statement templates.

use std::fmt;

/// Placeholder replaced with a chunk number when concrete query text is
/// generated.
pub const CHUNK_TAG: &str = "%CC%";

/// Placeholder replaced with a sub-chunk number.
pub const SUBCHUNK_TAG: &str = "%SS%";

/// A statement rendered to phrases, chunk placeholders intact. Phrases are
/// joined with single spaces; each phrase carries its own internal spacing
/// so a round trip through the frontend reproduces an equivalent statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTemplate {
    entries: Vec<String>,
}

impl QueryTemplate {
    /// Empty template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one phrase; empty phrases are dropped.
    pub fn append(&mut self, phrase: impl Into<String>) {
        let phrase = phrase.into();
        if !phrase.is_empty() {
            self.entries.push(phrase);
        }
    }

    /// True when nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the rendered text mentions either chunk placeholder.
    pub fn has_chunk_tags(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.contains(CHUNK_TAG) || e.contains(SUBCHUNK_TAG))
    }
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entries.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_phrases_and_detects_tags() {
        let mut t = QueryTemplate::new();
        t.append("SELECT *");
        t.append("FROM");
        t.append(format!("LSST.Object_{CHUNK_TAG} AS o"));
        t.append("");
        assert_eq!(t.to_string(), "SELECT * FROM LSST.Object_%CC% AS o");
        assert!(t.has_chunk_tags());
    }
}
