pub mod reconciler;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::protocol::{HistoryEntry, ImageRef, Role};

pub use reconciler::PlaceholderReconciler;

/// Conversation handle shared between the client, the reconciler and the
/// progress timers.
pub type SharedConversation = Arc<Mutex<Conversation>>;

/// Identifier of a message, unique within its conversation and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// Lifecycle flag of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Placeholder still receiving updates.
    Open,
    Complete,
    /// Terminal error; the content is the user-facing error text.
    Failed,
    /// The owning request was cancelled before resolving.
    Cancelled,
}

impl MessageStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, MessageStatus::Open)
    }
}

/// Advisory progress shown on an open placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub label: String,
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub image_ref: Option<ImageRef>,
    pub status: MessageStatus,
    pub progress: Option<Progress>,
}

impl Message {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == MessageStatus::Open
    }

    /// Text to render: the progress prefix while open, then the content.
    #[must_use]
    pub fn display_text(&self) -> String {
        match &self.progress {
            Some(progress) if self.is_open() => {
                let prefix = format!("{} ({}s)", progress.label, progress.elapsed_secs);
                if self.content.is_empty() {
                    prefix
                } else {
                    format!("{prefix}\n{}", self.content)
                }
            }
            _ => self.content.clone(),
        }
    }

    fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            role: self.role,
            content: self.content.clone(),
            image_url: self.image_ref.clone(),
        }
    }
}

/// Ordered, append-only message log.
///
/// Committed messages are never edited. Only an `Open` placeholder can be
/// mutated, and only through the crate-internal `with_open` accessor that the
/// reconciler and timers use.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    next_id: u64,
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> SharedConversation {
        Arc::new(Mutex::new(Self::new()))
    }

    fn allocate_id(&mut self) -> MessageId {
        self.next_id += 1;
        MessageId(self.next_id)
    }

    /// Append a completed user message.
    pub fn push_user(&mut self, content: impl Into<String>, image_ref: Option<ImageRef>) -> MessageId {
        let id = self.allocate_id();
        self.messages.push(Message {
            id,
            role: Role::User,
            content: content.into(),
            image_ref,
            status: MessageStatus::Complete,
            progress: None,
        });
        id
    }

    /// Append an empty open assistant placeholder.
    pub(crate) fn open_assistant(&mut self, label: impl Into<String>) -> MessageId {
        let id = self.allocate_id();
        self.messages.push(Message {
            id,
            role: Role::Assistant,
            content: String::new(),
            image_ref: None,
            status: MessageStatus::Open,
            progress: Some(Progress {
                label: label.into(),
                elapsed_secs: 0,
            }),
        });
        id
    }

    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        // Ids are allocated in push order, so the log is sorted by id.
        self.messages
            .binary_search_by_key(&id, |message| message.id)
            .ok()
            .map(|index| &self.messages[index])
    }

    /// Mutate a message only while it is still open. Returns `None` when the
    /// message is missing or already terminal.
    pub(crate) fn with_open<R>(&mut self, id: MessageId, f: impl FnOnce(&mut Message) -> R) -> Option<R> {
        let index = self
            .messages
            .binary_search_by_key(&id, |message| message.id)
            .ok()?;
        let message = &mut self.messages[index];
        if !message.is_open() {
            return None;
        }
        Some(f(message))
    }

    /// Drop a placeholder that never resolved. Committed messages are kept.
    pub(crate) fn remove_unresolved(&mut self, id: MessageId) -> bool {
        let Ok(index) = self.messages.binary_search_by_key(&id, |message| message.id) else {
            return false;
        };
        if self.messages[index].status != MessageStatus::Cancelled {
            return false;
        }
        self.messages.remove(index);
        true
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.messages.iter().filter(|message| message.is_open()).count()
    }

    /// Context sent with a new request: every resolved message, in order.
    /// Open and cancelled placeholders are not part of the history.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|message| {
                matches!(message.status, MessageStatus::Complete | MessageStatus::Failed)
            })
            .map(Message::history_entry)
            .collect()
    }

    /// Clear the log. Ids keep increasing so old ids never match new messages.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
