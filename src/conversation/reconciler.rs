use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use super::{Message, MessageId, MessageStatus, SharedConversation};
use crate::error::ReconcileError;
use crate::generation::timer::ProgressTimer;
use crate::protocol::ImageRef;
use crate::state::RequestId;

/// Where a request's placeholder stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Registered, no placeholder created yet.
    Pending,
    Open,
    Resolved,
    Cancelled,
}

struct Slot {
    message: Option<MessageId>,
    state: SlotState,
    token: CancellationToken,
    timer: Option<ProgressTimer>,
}

impl Slot {
    fn check_writable(&self, request_id: RequestId) -> Result<(), ReconcileError> {
        if self.state == SlotState::Cancelled || self.token.is_cancelled() {
            return Err(ReconcileError::Cancelled(request_id.get()));
        }
        if self.state == SlotState::Resolved {
            return Err(ReconcileError::AlreadyResolved(request_id.get()));
        }
        Ok(())
    }

    fn stop_timer(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
    }
}

/// Owns the single work-in-progress assistant message of each request.
///
/// Keyed by request id, never by message content. Every operation first
/// checks the request's cancellation token, so nothing a cancelled request
/// does can reach the conversation.
pub struct PlaceholderReconciler {
    conversation: SharedConversation,
    slots: Mutex<FxHashMap<RequestId, Slot>>,
    tick: Duration,
    drop_cancelled: bool,
    live_timers: Arc<AtomicUsize>,
}

impl PlaceholderReconciler {
    #[must_use]
    pub fn new(conversation: SharedConversation, tick: Duration, drop_cancelled: bool) -> Self {
        Self {
            conversation,
            slots: Mutex::new(FxHashMap::default()),
            tick,
            drop_cancelled,
            live_timers: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn conversation(&self) -> &SharedConversation {
        &self.conversation
    }

    /// Register a request before any event for it is applied.
    pub fn begin(&self, request_id: RequestId, token: CancellationToken) {
        let previous = self.slots.lock().insert(
            request_id,
            Slot {
                message: None,
                state: SlotState::Pending,
                token,
                timer: None,
            },
        );
        if previous.is_some() {
            tracing::warn!(request_id = %request_id, "request registered twice, previous slot replaced");
        }
    }

    /// Create the placeholder on first call; later calls return the same id.
    ///
    /// # Errors
    ///
    /// Rejects unknown, resolved and cancelled requests.
    pub fn ensure_open(&self, request_id: RequestId, label: &str) -> Result<MessageId, ReconcileError> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(&request_id)
            .ok_or(ReconcileError::UnknownRequest(request_id.get()))?;
        slot.check_writable(request_id)?;
        if let Some(message_id) = slot.message {
            return Ok(message_id);
        }

        let message_id = self.conversation.lock().open_assistant(label);
        slot.timer = Some(ProgressTimer::start(
            self.conversation.clone(),
            message_id,
            self.tick,
            self.live_timers.clone(),
        ));
        slot.message = Some(message_id);
        slot.state = SlotState::Open;
        tracing::debug!(request_id = %request_id, message_id = %message_id, label, "placeholder opened");
        Ok(message_id)
    }

    /// Replace the placeholder's text with `text`.
    ///
    /// # Errors
    ///
    /// Rejects requests without an open placeholder.
    pub fn update_content(&self, request_id: RequestId, text: &str) -> Result<(), ReconcileError> {
        self.mutate_open(request_id, |message| {
            message.content.clear();
            message.content.push_str(text);
        })
    }

    /// Show a new preview image on the placeholder.
    ///
    /// # Errors
    ///
    /// Rejects requests without an open placeholder.
    pub fn update_preview(&self, request_id: RequestId, image: ImageRef) -> Result<(), ReconcileError> {
        self.mutate_open(request_id, |message| message.image_ref = Some(image))
    }

    /// Replace the advisory progress label.
    ///
    /// # Errors
    ///
    /// Rejects requests without an open placeholder.
    pub fn update_label(&self, request_id: RequestId, label: &str) -> Result<(), ReconcileError> {
        self.mutate_open(request_id, |message| {
            if let Some(progress) = message.progress.as_mut() {
                progress.label.clear();
                progress.label.push_str(label);
            }
        })
    }

    fn mutate_open(
        &self,
        request_id: RequestId,
        f: impl FnOnce(&mut Message),
    ) -> Result<(), ReconcileError> {
        let slots = self.slots.lock();
        let slot = slots
            .get(&request_id)
            .ok_or(ReconcileError::UnknownRequest(request_id.get()))?;
        slot.check_writable(request_id)?;
        let message_id = slot
            .message
            .ok_or(ReconcileError::NotOpen(request_id.get()))?;
        self.conversation
            .lock()
            .with_open(message_id, f)
            .ok_or(ReconcileError::NotOpen(request_id.get()))
    }

    /// Freeze the placeholder with its final text and image. Creates the
    /// placeholder first if the request never opened one.
    ///
    /// # Errors
    ///
    /// A second terminal call for the same request is rejected, as are calls
    /// for cancelled or unknown requests.
    pub fn commit(
        &self,
        request_id: RequestId,
        text: String,
        image: Option<ImageRef>,
    ) -> Result<MessageId, ReconcileError> {
        self.resolve(request_id, text, image, MessageStatus::Complete)
    }

    /// Freeze the placeholder with an error text and no image.
    ///
    /// # Errors
    ///
    /// Same discipline as [`commit`](Self::commit).
    pub fn fail(&self, request_id: RequestId, message: String) -> Result<MessageId, ReconcileError> {
        self.resolve(request_id, message, None, MessageStatus::Failed)
    }

    fn resolve(
        &self,
        request_id: RequestId,
        content: String,
        image: Option<ImageRef>,
        status: MessageStatus,
    ) -> Result<MessageId, ReconcileError> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(&request_id)
            .ok_or(ReconcileError::UnknownRequest(request_id.get()))?;
        slot.check_writable(request_id)?;

        let mut conversation = self.conversation.lock();
        let message_id = match slot.message {
            Some(message_id) => message_id,
            None => {
                let message_id = conversation.open_assistant("");
                slot.message = Some(message_id);
                message_id
            }
        };
        let applied = conversation.with_open(message_id, |message| {
            message.content = content;
            message.image_ref = image;
            message.status = status;
            message.progress = None;
        });
        drop(conversation);

        slot.state = SlotState::Resolved;
        slot.stop_timer();
        if applied.is_none() {
            // Only reachable if the message vanished under us (conversation cleared).
            tracing::warn!(request_id = %request_id, message_id = %message_id, "placeholder missing at resolve time");
            return Err(ReconcileError::NotOpen(request_id.get()));
        }
        tracing::debug!(request_id = %request_id, message_id = %message_id, ?status, "placeholder resolved");
        Ok(message_id)
    }

    /// Mark the request cancelled: stop its timer and retire its placeholder
    /// without committing content. Returns `false` (and does nothing) if the
    /// request is unknown or already terminal.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&request_id) else {
            return false;
        };
        if matches!(slot.state, SlotState::Resolved | SlotState::Cancelled) {
            return false;
        }
        slot.state = SlotState::Cancelled;
        slot.stop_timer();
        if let Some(message_id) = slot.message {
            let mut conversation = self.conversation.lock();
            conversation.with_open(message_id, |message| {
                message.status = MessageStatus::Cancelled;
                message.progress = None;
            });
            if self.drop_cancelled {
                conversation.remove_unresolved(message_id);
            }
        }
        tracing::debug!(request_id = %request_id, "placeholder cancelled");
        true
    }

    /// Forget a finished request. An unresolved request is cancelled first so
    /// no placeholder stays open and no timer keeps running.
    pub fn finish(&self, request_id: RequestId) {
        let unresolved = self
            .slots
            .lock()
            .get(&request_id)
            .is_some_and(|slot| matches!(slot.state, SlotState::Pending | SlotState::Open));
        if unresolved {
            tracing::warn!(request_id = %request_id, "request finished without resolving, retiring placeholder");
            self.cancel(request_id);
        }
        self.slots.lock().remove(&request_id);
    }

    #[must_use]
    pub fn state(&self, request_id: RequestId) -> Option<SlotState> {
        self.slots.lock().get(&request_id).map(|slot| slot.state)
    }

    #[must_use]
    pub fn placeholder(&self, request_id: RequestId) -> Option<MessageId> {
        self.slots.lock().get(&request_id).and_then(|slot| slot.message)
    }

    /// Progress timers currently running.
    #[must_use]
    pub fn active_timers(&self) -> usize {
        self.live_timers.load(Ordering::Acquire)
    }
}
