use crate::message::{ChatExchange, Message, Role};

/// Bounded, oldest-first view over stored conversation history.
///
/// Built fresh for every request and never persisted. Stores may hand back
/// rows newest-first; the window re-sorts by timestamp before bounding, and
/// anything older than the bound is dropped.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct ConversationWindow {
    messages: Vec<Message>,
}

impl ConversationWindow {
    /// Keeps the `max_pairs` most recent exchanges, in any input order.
    pub fn from_exchanges(exchanges: &[ChatExchange], max_pairs: usize) -> Self {
        let mut ordered: Vec<&ChatExchange> = exchanges.iter().collect();
        ordered.sort_by_key(|exchange| exchange.created_at);
        let start = ordered.len().saturating_sub(max_pairs);

        let messages = ordered[start..]
            .iter()
            .flat_map(|exchange| exchange.to_messages())
            .collect();
        Self { messages }
    }

    /// Keeps the `max_entries` most recent messages.
    pub fn bounded(messages: &[Message], max_entries: usize) -> Self {
        let mut ordered = messages.to_vec();
        // a question and its reply share a timestamp; the question goes first
        ordered.sort_by_key(|message| (message.timestamp, message.role == Role::Assistant));
        let start = ordered.len().saturating_sub(max_entries);
        ordered.drain(..start);
        Self { messages: ordered }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
