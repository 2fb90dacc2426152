use serde::{Deserialize, Serialize};

use crate::ids::MessageId;
use crate::messages::Message;
use crate::steps::Step;

/// The client's append-only view of a conversation.
///
/// Every appended message is re-identified with its arrival position, so ids
/// are unique and increase monotonically regardless of where the message came
/// from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> MessageId {
        MessageId::at_position(self.messages.len())
    }

    /// Append `message`, assigning it the next transcript id.
    pub fn push(&mut self, mut message: Message) -> &Message {
        message.id = self.next_id();
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> &Message {
        self.push(Message::user(content))
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> &Message {
        self.push(Message::assistant(content))
    }

    /// Append a display-only step record.
    pub fn push_step(&mut self, step: &Step) -> &Message {
        let record = step.to_record(self.next_id());
        self.messages.push(record);
        &self.messages[self.messages.len() - 1]
    }

    /// Extend the content of an existing message in place. Returns false if
    /// no message has that id.
    pub fn append_to(&mut self, id: &MessageId, delta: &str) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                message.content.push_str(delta);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Prior context for the agent: user and assistant turns only.
    pub fn agent_input(&self) -> Vec<Message> {
        agent_input(&self.messages)
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// Drop every message the agent must not see (step records, tool traffic
/// replayed for display, system notes).
pub fn agent_input(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| m.role.is_conversational())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Role, ToolCall};
    use serde_json::json;

    #[test]
    fn ids_follow_arrival_order() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        transcript.push(Message::assistant("hello").with_id(MessageId::from_raw("upstream-id")));
        transcript.push_user("again");

        let ids: Vec<&str> = transcript.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
    }

    #[test]
    fn append_to_extends_content() {
        let mut transcript = Transcript::new();
        let id = transcript.push_assistant("").id.clone();
        assert!(transcript.append_to(&id, "X"));
        assert!(transcript.append_to(&id, " is"));
        assert_eq!(transcript.get(&id).unwrap().content, "X is");
        assert!(!transcript.append_to(&MessageId::from_raw("missing"), "x"));
    }

    #[test]
    fn steps_are_system_records() {
        let mut transcript = Transcript::new();
        transcript.push_user("q");
        let step = Step {
            action: Some(ToolCall::new("lookup", json!({"q": "x"}))),
            observation: "obs".into(),
        };
        let record = transcript.push_step(&step);
        assert_eq!(record.role, Role::System);
        assert_eq!(record.id.as_str(), "1");
        assert_eq!(Step::from_record(record), Some(step));
    }

    #[test]
    fn agent_input_keeps_user_and_assistant() {
        let mut transcript = Transcript::new();
        transcript.push_user("q");
        transcript.push(Message::system("step"));
        transcript.push(Message::tool("obs"));
        transcript.push_assistant("a");

        let input = transcript.agent_input();
        assert_eq!(input.len(), 2);
        assert_eq!(input[0].role, Role::User);
        assert_eq!(input[1].role, Role::Assistant);
        // Display transcript is untouched.
        assert_eq!(transcript.len(), 4);
    }

    #[test]
    fn position_and_last() {
        let mut transcript = Transcript::new();
        assert!(transcript.last().is_none());
        transcript.push_user("a");
        let id = transcript.push_assistant("b").id.clone();
        assert_eq!(transcript.position(&id), Some(1));
        assert_eq!(transcript.last().unwrap().content, "b");
        assert_eq!(transcript.get(&id).unwrap().role, Role::Assistant);
    }
}
