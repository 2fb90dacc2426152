use serde::{Deserialize, Serialize};

/// Raw events emitted by the agent while it runs, keyed by event type.
///
/// Only `ChatModelStream` carries answer text; every other variant describes
/// the reasoning trace (model turns, tool selection and execution) and is
/// never forwarded to a streaming client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum AgentEvent {
    #[serde(rename = "on_chat_model_start")]
    ChatModelStart {
        #[serde(default)]
        name: String,
    },

    #[serde(rename = "on_chat_model_stream")]
    ChatModelStream {
        #[serde(default)]
        content: String,
    },

    #[serde(rename = "on_chat_model_end")]
    ChatModelEnd {
        #[serde(default)]
        name: String,
    },

    #[serde(rename = "on_tool_start")]
    ToolStart {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(rename = "on_tool_end")]
    ToolEnd {
        name: String,
        #[serde(default)]
        output: String,
    },

    /// Any other event type (chain/graph lifecycle, retriever events, ...).
    #[serde(rename = "other")]
    Other {
        #[serde(rename = "type")]
        event_type: String,
    },
}

impl AgentEvent {
    pub fn token(content: impl Into<String>) -> Self {
        Self::ChatModelStream {
            content: content.into(),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::ChatModelStart { .. } => "on_chat_model_start",
            Self::ChatModelStream { .. } => "on_chat_model_stream",
            Self::ChatModelEnd { .. } => "on_chat_model_end",
            Self::ToolStart { .. } => "on_tool_start",
            Self::ToolEnd { .. } => "on_tool_end",
            Self::Other { event_type } => event_type.as_str(),
        }
    }

    /// Answer text carried by this event, if it is a non-empty model token.
    /// Tool-selecting model turns stream tokens with no content.
    pub fn answer_text(&self) -> Option<&str> {
        match self {
            Self::ChatModelStream { content } if !content.is_empty() => Some(content.as_str()),
            _ => None,
        }
    }

    pub fn is_tool_event(&self) -> bool {
        matches!(self, Self::ToolStart { .. } | Self::ToolEnd { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_non_empty_tokens_are_answer_text() {
        assert_eq!(AgentEvent::token("hi").answer_text(), Some("hi"));
        assert_eq!(AgentEvent::token("").answer_text(), None);
        let tool = AgentEvent::ToolStart {
            name: "search".into(),
            input: serde_json::json!({"q": "x"}),
        };
        assert_eq!(tool.answer_text(), None);
        assert!(tool.is_tool_event());
    }

    #[test]
    fn event_type_strings() {
        assert_eq!(AgentEvent::token("x").event_type(), "on_chat_model_stream");
        let other = AgentEvent::Other {
            event_type: "on_chain_start".into(),
        };
        assert_eq!(other.event_type(), "on_chain_start");
    }

    #[test]
    fn tagged_serialization() {
        let json = serde_json::to_value(AgentEvent::token("abc")).unwrap();
        assert_eq!(json["event"], "on_chat_model_stream");
        assert_eq!(json["content"], "abc");

        let parsed: AgentEvent =
            serde_json::from_str(r#"{"event":"on_tool_end","name":"search","output":"done"}"#).unwrap();
        assert_eq!(
            parsed,
            AgentEvent::ToolEnd {
                name: "search".into(),
                output: "done".into()
            }
        );
    }
}
