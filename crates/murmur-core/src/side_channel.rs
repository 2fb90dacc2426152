//! Out-of-band citation metadata for streamed responses.
//!
//! Sources travel in two response headers next to a plain-text body: the
//! base64-encoded JSON array under [`SOURCES_HEADER`] and the reverse message
//! index under [`MESSAGE_INDEX_HEADER`]. The body never carries any of it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::sources::Source;

pub const SOURCES_HEADER: &str = "x-sources";
pub const MESSAGE_INDEX_HEADER: &str = "x-message-index";

/// Encoded header values, ready to be attached to a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideChannel {
    pub sources: String,
    pub message_index: String,
}

impl SideChannel {
    /// Header name/value pairs in emission order.
    pub fn headers(&self) -> [(&'static str, &str); 2] {
        [
            (SOURCES_HEADER, self.sources.as_str()),
            (MESSAGE_INDEX_HEADER, self.message_index.as_str()),
        ]
    }
}

/// Encode `sources` for the message at reverse `index`. Returns `None` when
/// there is nothing to attach, in which case no headers are emitted.
pub fn encode(index: usize, sources: &[Source]) -> Option<SideChannel> {
    if sources.is_empty() {
        return None;
    }
    let json = serde_json::to_vec(sources).ok()?;
    Some(SideChannel {
        sources: STANDARD.encode(json),
        message_index: index.to_string(),
    })
}

/// Decode the side channel through a header lookup. Anything missing or
/// malformed decodes as "no sources".
pub fn decode<'a, F>(lookup: F) -> Option<(String, Vec<Source>)>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let index = lookup(MESSAGE_INDEX_HEADER)?.trim().to_string();
    let encoded = lookup(SOURCES_HEADER)?;

    let bytes = match STANDARD.decode(encoded.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "side channel sources are not valid base64");
            return None;
        }
    };
    let sources: Vec<Source> = match serde_json::from_slice(&bytes) {
        Ok(sources) => sources,
        Err(e) => {
            tracing::debug!(error = %e, "side channel sources are not a source array");
            return None;
        }
    };

    if sources.is_empty() {
        return None;
    }
    Some((index, sources))
}
