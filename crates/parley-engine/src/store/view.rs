use crate::{ConversationId, Message, Role};

/// Immutable snapshot of one conversation.
///
/// Confirmed messages come from the server; optimistic ones were written
/// locally since the last confirmed fetch and always display after them.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub(crate) id: ConversationId,
    pub(crate) title: Option<String>,
    pub(crate) confirmed: Vec<Message>,
    pub(crate) optimistic: Vec<Message>,
    pub(crate) streaming: Option<String>,
    pub(crate) loaded: bool,
    pub(crate) revision: u64,
}

impl ConversationView {
    pub(crate) fn new(id: ConversationId) -> Self {
        Self {
            id,
            title: None,
            confirmed: Vec::new(),
            optimistic: Vec::new(),
            streaming: None,
            loaded: false,
            revision: 0,
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Display order: confirmed, then optimistic.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.confirmed.iter().chain(self.optimistic.iter())
    }

    pub fn confirmed(&self) -> &[Message] {
        &self.confirmed
    }

    pub fn optimistic(&self) -> &[Message] {
        &self.optimistic
    }

    pub fn len(&self) -> usize {
        self.confirmed.len() + self.optimistic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Partial assistant text, present only while a stream is live.
    pub fn streaming_text(&self) -> Option<&str> {
        self.streaming.as_deref()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    /// True once a confirmed list has been applied.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.optimistic
            .iter()
            .rev()
            .chain(self.confirmed.iter().rev())
            .find(|m| m.role == Role::User)
    }

    pub fn find(&self, id: &crate::MessageId) -> Option<&Message> {
        self.messages().find(|m| &m.id == id)
    }
}
