use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use murmur_core::ids::{MessageId, ThreadId};
use murmur_core::messages::Message;

/// Id of the single thread slot used when callers don't key threads per
/// message. Every branch opened this way replaces the previous one.
pub const DEFAULT_THREAD_ID: &str = "default";

/// A sub-conversation hanging off one assistant message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub title: String,
    pub messages: Vec<Message>,
    /// Assistant message the thread branches from. Unset means the thread id
    /// names that message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<MessageId>,
}

impl Thread {
    pub fn new(id: ThreadId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            messages: Vec::new(),
            anchor: None,
        }
    }

    pub fn anchor(&self) -> MessageId {
        self.anchor
            .clone()
            .unwrap_or_else(|| MessageId::from(&self.id))
    }
}

/// Threads keyed by id. Shared by `Arc`; never touches the transcript.
#[derive(Debug, Default)]
pub struct ThreadStore {
    threads: DashMap<ThreadId, Thread>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the thread `id` with an empty message list.
    pub fn add_thread(&self, id: ThreadId, title: impl Into<String>) {
        let thread = Thread::new(id.clone(), title);
        if let Some(previous) = self.threads.insert(id, thread) {
            tracing::debug!(thread_id = %previous.id, "thread replaced");
        }
    }

    /// Append to an existing thread; unknown ids are ignored.
    pub fn add_message(&self, thread_id: &ThreadId, message: Message) {
        match self.threads.get_mut(thread_id) {
            Some(mut thread) => thread.messages.push(message),
            None => tracing::debug!(thread_id = %thread_id, "message for unknown thread ignored"),
        }
    }

    pub fn remove_thread(&self, id: &ThreadId) {
        self.threads.remove(id);
    }

    /// Point an existing thread at an assistant message.
    pub fn set_anchor(&self, thread_id: &ThreadId, message_id: MessageId) {
        if let Some(mut thread) = self.threads.get_mut(thread_id) {
            thread.anchor = Some(message_id);
        }
    }

    pub fn get(&self, id: &ThreadId) -> Option<Thread> {
        self.threads.get(id).map(|t| t.value().clone())
    }

    pub fn contains(&self, id: &ThreadId) -> bool {
        self.threads.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tid(s: &str) -> ThreadId {
        ThreadId::from_raw(s)
    }

    #[test]
    fn add_then_remove_leaves_store_empty() {
        let store = ThreadStore::new();
        store.add_thread(tid("t1"), "What is X?");
        assert!(store.contains(&tid("t1")));
        assert_eq!(store.get(&tid("t1")).unwrap().title, "What is X?");

        store.remove_thread(&tid("t1"));
        assert!(store.is_empty());
    }

    #[test]
    fn add_message_to_unknown_thread_is_noop() {
        let store = ThreadStore::new();
        store.add_message(&tid("missing"), Message::user("hi"));
        assert!(store.is_empty());
        assert!(store.get(&tid("missing")).is_none());
    }

    #[test]
    fn add_message_appends_in_order() {
        let store = ThreadStore::new();
        store.add_thread(tid("t"), "title");
        store.add_message(&tid("t"), Message::user("one"));
        store.add_message(&tid("t"), Message::assistant("two"));
        let thread = store.get(&tid("t")).unwrap();
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.messages[1].content, "two");
    }

    #[test]
    fn add_thread_overwrites() {
        let store = ThreadStore::new();
        store.add_thread(tid("t"), "first");
        store.add_message(&tid("t"), Message::user("old"));
        store.add_thread(tid("t"), "second");
        let thread = store.get(&tid("t")).unwrap();
        assert_eq!(thread.title, "second");
        assert!(thread.messages.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let store = ThreadStore::new();
        store.add_thread(tid("keep"), "k");
        store.remove_thread(&tid("other"));
        assert!(store.contains(&tid("keep")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn anchor_defaults_to_thread_id() {
        let store = ThreadStore::new();
        store.add_thread(tid("3"), "branch");
        assert_eq!(store.get(&tid("3")).unwrap().anchor(), MessageId::from_raw("3"));

        store.set_anchor(&tid("3"), MessageId::from_raw("5"));
        assert_eq!(store.get(&tid("3")).unwrap().anchor(), MessageId::from_raw("5"));

        store.set_anchor(&tid("nope"), MessageId::from_raw("1"));
        assert!(!store.contains(&tid("nope")));
    }

    #[test]
    fn shared_across_tasks() {
        let store = Arc::new(ThreadStore::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.add_thread(tid(&format!("t{i}")), "x"))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 4);
    }
}
