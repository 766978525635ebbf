//! Per-connection conversation memory.
//!
//! A bounded FIFO of recent turns, keyed by connection id. At 12 entries
//! (6 question/answer pairs) the oldest entry is evicted on push. Cleared
//! when the connection closes; never persisted.

use std::collections::VecDeque;

use dashmap::DashMap;

use culvert_llm::{ChatMessage, Role};

/// Default memory depth (6 turns).
pub const DEFAULT_CAPACITY: usize = 12;

#[derive(Debug, Clone)]
struct MemoryEntry {
    role: Role,
    content: String,
}

/// Conversation windows for every connected client.
pub struct SessionMemory {
    entries: DashMap<String, VecDeque<MemoryEntry>>,
    capacity: usize,
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SessionMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, client_id: &str, role: Role, content: String) {
        let mut window = self.entries.entry(client_id.to_string()).or_default();
        window.push_back(MemoryEntry { role, content });
        while window.len() > self.capacity {
            let _ = window.pop_front();
        }
    }

    pub fn push_user(&self, client_id: &str, content: impl Into<String>) {
        self.push(client_id, Role::User, content.into());
    }

    pub fn push_assistant(&self, client_id: &str, content: impl Into<String>) {
        self.push(client_id, Role::Assistant, content.into());
    }

    /// Snapshot the window as chat turns, oldest first.
    pub fn history(&self, client_id: &str) -> Vec<ChatMessage> {
        self.entries.get(client_id).map_or_else(Vec::new, |window| {
            window
                .iter()
                .map(|e| match e.role {
                    Role::User => ChatMessage::user(e.content.clone()),
                    Role::Assistant => ChatMessage::assistant(e.content.clone()),
                    Role::System => ChatMessage::system(e.content.clone()),
                })
                .collect()
        })
    }

    /// Drop the window for a disconnected client.
    pub fn clear(&self, client_id: &str) {
        let _ = self.entries.remove(client_id);
    }

    pub fn len(&self, client_id: &str) -> usize {
        self.entries.get(client_id).map_or(0, |w| w.len())
    }
}
