//! Request and response bodies exchanged between client and server.

use serde::{Deserialize, Serialize};

use crate::messages::Message;
use crate::steps::Step;

pub const CHAT_PATH: &str = "/api/chat";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub show_intermediate_steps: bool,
}

impl ChatRequest {
    pub fn streaming(messages: Vec<Message>) -> Self {
        Self {
            messages,
            show_intermediate_steps: false,
        }
    }

    pub fn with_steps(messages: Vec<Message>) -> Self {
        Self {
            messages,
            show_intermediate_steps: true,
        }
    }
}

/// Body of a full-mode (intermediate steps) response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FullResponse {
    pub messages: Vec<Message>,
    /// Steps derived by the server. Older servers send only `messages`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
}

impl FullResponse {
    pub fn final_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;

    #[test]
    fn request_defaults_to_streaming() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"What is X?"}]}"#).unwrap();
        assert!(!req.show_intermediate_steps);
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
    }

    #[test]
    fn request_serializes_flag() {
        let json = serde_json::to_value(ChatRequest::with_steps(vec![])).unwrap();
        assert_eq!(json["show_intermediate_steps"], true);
    }

    #[test]
    fn full_response_without_steps() {
        let body = r#"{"messages":[{"role":"user","content":"q"},{"role":"assistant","content":"a"}]}"#;
        let resp: FullResponse = serde_json::from_str(body).unwrap();
        assert!(resp.steps.is_none());
        assert_eq!(resp.final_message().unwrap().content, "a");
    }

    #[test]
    fn error_body_shape() {
        let json = serde_json::to_string(&ErrorBody { error: "boom".into() }).unwrap();
        assert_eq!(json, r#"{"error":"boom"}"#);
    }
}
