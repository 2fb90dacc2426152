use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A retrieved passage cited by a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub page_content: String,
    #[serde(default)]
    pub metadata: SourceMetadata,
}

impl Source {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: SourceMetadata::default(),
        }
    }

    pub fn with_lines(mut self, from: u32, to: u32) -> Self {
        self.metadata.loc = Some(Location {
            lines: LineRange { from, to },
        });
        self
    }

    pub fn lines(&self) -> Option<&LineRange> {
        self.metadata.loc.as_ref().map(|loc| &loc.lines)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<Location>,
    /// Provider-specific keys, carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lines: LineRange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub from: u32,
    pub to: u32,
}

/// Reverse offset of the message at `display_index` in a transcript of
/// `transcript_len` messages. The newest message has index 0.
pub fn reverse_index(transcript_len: usize, display_index: usize) -> Option<usize> {
    transcript_len.checked_sub(1)?.checked_sub(display_index)
}

/// Sources per message, keyed by the decimal reverse message index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceAttachment(BTreeMap<String, Vec<Source>>);

impl SourceAttachment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins per index.
    pub fn merge(&mut self, index: impl Into<String>, sources: Vec<Source>) {
        self.0.insert(index.into(), sources);
    }

    pub fn get(&self, index: &str) -> Option<&[Source]> {
        self.0.get(index).map(Vec::as_slice)
    }

    /// Sources for the message at `display_index` given the current
    /// transcript length.
    pub fn for_display(&self, transcript_len: usize, display_index: usize) -> Option<&[Source]> {
        let index = reverse_index(transcript_len, display_index)?;
        self.get(&index.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Source])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_wire_shape() {
        let source = Source::new("passage").with_lines(3, 9);
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["pageContent"], "passage");
        assert_eq!(json["metadata"]["loc"]["lines"]["from"], 3);
        assert_eq!(json["metadata"]["loc"]["lines"]["to"], 9);
    }

    #[test]
    fn unknown_metadata_is_preserved() {
        let json = r#"{"pageContent":"p","metadata":{"source":"doc.md","loc":{"lines":{"from":1,"to":2}}}}"#;
        let source: Source = serde_json::from_str(json).unwrap();
        assert_eq!(source.lines(), Some(&LineRange { from: 1, to: 2 }));
        assert_eq!(source.metadata.extra["source"], "doc.md");

        let back = serde_json::to_value(&source).unwrap();
        assert_eq!(back["metadata"]["source"], "doc.md");
    }

    #[test]
    fn missing_metadata_defaults() {
        let source: Source = serde_json::from_str(r#"{"pageContent":"p"}"#).unwrap();
        assert!(source.lines().is_none());
    }

    #[test]
    fn reverse_index_counts_from_the_end() {
        assert_eq!(reverse_index(2, 1), Some(0));
        assert_eq!(reverse_index(2, 0), Some(1));
        assert_eq!(reverse_index(5, 2), Some(2));
        assert_eq!(reverse_index(2, 2), None);
        assert_eq!(reverse_index(0, 0), None);
        // The mapping is its own inverse.
        assert_eq!(reverse_index(4, 3), Some(0));
    }

    #[test]
    fn merge_is_last_write_wins() {
        let mut attachment = SourceAttachment::new();
        attachment.merge("0", vec![Source::new("a")]);
        attachment.merge("0", vec![Source::new("b"), Source::new("c")]);
        attachment.merge("2", vec![Source::new("d")]);

        assert_eq!(attachment.len(), 2);
        assert_eq!(attachment.get("0").unwrap().len(), 2);
        assert_eq!(attachment.get("0").unwrap()[0].page_content, "b");
        assert!(attachment.get("1").is_none());
    }

    #[test]
    fn lookup_by_display_position() {
        let mut attachment = SourceAttachment::new();
        attachment.merge("0", vec![Source::new("latest")]);
        assert_eq!(attachment.for_display(2, 1).unwrap()[0].page_content, "latest");
        assert!(attachment.for_display(2, 0).is_none());
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut attachment = SourceAttachment::new();
        attachment.merge("1", vec![Source::new("x")]);
        let json = serde_json::to_value(&attachment).unwrap();
        assert_eq!(json["1"][0]["pageContent"], "x");
    }
}
