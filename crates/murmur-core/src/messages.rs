use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::MessageId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    /// Roles the agent is allowed to see as prior context.
    pub fn is_conversational(&self) -> bool {
        matches!(self, Self::User | Self::Assistant)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation requested by the agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: MessageId,
    pub role: Role,
    #[serde(default, deserialize_with = "nullable_string")]
    pub content: String,
    #[serde(
        default,
        rename = "tool_calls",
        alias = "toolCalls",
        deserialize_with = "nullable_vec",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tool_calls: Vec<ToolCall>,
}

// --- Convenience constructors ---

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    /// Assistant turn that requests tools instead of answering.
    pub fn tool_request(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::assistant("")
        }
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// True for the messages that make up an intermediate step: an assistant
    /// turn carrying tool calls, or a tool result.
    pub fn is_tool_related(&self) -> bool {
        match self.role {
            Role::Assistant => self.has_tool_calls(),
            Role::Tool => true,
            _ => false,
        }
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), r#""tool""#);
        let parsed: Role = serde_json::from_str(r#""system""#).unwrap();
        assert_eq!(parsed, Role::System);
    }

    #[test]
    fn conversational_roles() {
        assert!(Role::User.is_conversational());
        assert!(Role::Assistant.is_conversational());
        assert!(!Role::System.is_conversational());
        assert!(!Role::Tool.is_conversational());
    }

    #[test]
    fn request_message_without_id_parses() {
        let msg: Message = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "hi");
        assert!(msg.tool_calls.is_empty());
        assert!(msg.id.as_str().starts_with("msg_"));
    }

    #[test]
    fn null_content_and_tool_calls_parse() {
        let json = r#"{"id":"4","role":"assistant","content":null,"tool_calls":null}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.content, "");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn camel_case_tool_calls_accepted() {
        let json = r#"{
            "role": "assistant",
            "content": "",
            "toolCalls": [{"name": "search_latest_knowledge", "args": {"query": "x"}, "id": "call_1", "type": "tool_call"}]
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].name, "search_latest_knowledge");
        assert_eq!(msg.tool_calls[0].id.as_deref(), Some("call_1"));
        assert!(msg.is_tool_related());
    }

    #[test]
    fn empty_tool_calls_not_serialized() {
        let msg = Message::assistant("hello").with_id(MessageId::at_position(1));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["id"], "1");
        assert_eq!(json["role"], "assistant");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn tool_related_classification() {
        let call = ToolCall::new("lookup", serde_json::json!({}));
        assert!(Message::tool_request(vec![call]).is_tool_related());
        assert!(Message::tool("result").is_tool_related());
        assert!(!Message::assistant("answer").is_tool_related());
        assert!(!Message::user("question").is_tool_related());
        assert!(!Message::system("note").is_tool_related());
    }
}
