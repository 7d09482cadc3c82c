pub mod cancel;
pub mod policy;
pub mod timer;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::conversation::{MessageId, PlaceholderReconciler};
use crate::error::ReconcileError;
use crate::fallback::APOLOGY_MESSAGE;
use crate::protocol::ImageRef;
use crate::state::RequestId;
use crate::stream::EventHandler;

pub use cancel::CancellationController;
pub use policy::StatusPolicy;
pub use timer::ProgressTimer;

pub const TEXT_PLACEHOLDER_LABEL: &str = "Thinking...";
pub const IMAGE_PLACEHOLDER_LABEL: &str = "Generating image...";
pub const EMPTY_RESPONSE_MESSAGE: &str = "The assistant returned an empty response.";
pub const MISSING_IMAGE_MESSAGE: &str = "Image generation finished without a final image.";

/// Which kind of answer a request turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Undetermined,
    Text,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Idle,
    AwaitingFirstEvent,
    /// A placeholder exists (or is about to) for the given classification.
    Open(Classification),
    CommittedText,
    CommittedImage,
    Errored,
    Cancelled,
}

impl GenerationPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GenerationPhase::CommittedText
                | GenerationPhase::CommittedImage
                | GenerationPhase::Errored
                | GenerationPhase::Cancelled
        )
    }
}

/// Per-request state machine turning stream events into placeholder calls.
///
/// Classification is fixed by the first disambiguating event and never
/// changes. Events of the other kind are counted and dropped. One terminal
/// transition per request; everything after it, or after cancellation, is a
/// no-op.
pub struct GenerationMachine {
    request_id: RequestId,
    reconciler: Arc<PlaceholderReconciler>,
    policy: Arc<StatusPolicy>,
    token: CancellationToken,
    phase: GenerationPhase,
    classification: Classification,
    text: String,
    last_status: Option<String>,
    last_preview_index: Option<u64>,
    opened: bool,
    resolved: Option<MessageId>,
    cross_events: u32,
}

impl GenerationMachine {
    #[must_use]
    pub fn new(
        request_id: RequestId,
        reconciler: Arc<PlaceholderReconciler>,
        policy: Arc<StatusPolicy>,
        token: CancellationToken,
    ) -> Self {
        Self {
            request_id,
            reconciler,
            policy,
            token,
            phase: GenerationPhase::Idle,
            classification: Classification::Undetermined,
            text: String::new(),
            last_status: None,
            last_preview_index: None,
            opened: false,
            resolved: None,
            cross_events: 0,
        }
    }

    /// The request went out; wait for the first event.
    pub fn start(&mut self) {
        if self.phase == GenerationPhase::Idle {
            self.phase = GenerationPhase::AwaitingFirstEvent;
        }
    }

    #[must_use]
    pub fn phase(&self) -> GenerationPhase {
        self.phase
    }

    #[must_use]
    pub fn classification(&self) -> Classification {
        self.classification
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// The committed message, once a terminal event resolved the request.
    #[must_use]
    pub fn resolved_message(&self) -> Option<MessageId> {
        self.resolved
    }

    /// Resolved by a terminal stream event (commit or error).
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    #[must_use]
    pub fn cross_events(&self) -> u32 {
        self.cross_events
    }

    /// Move to `Cancelled` and retire the placeholder. No-op once terminal.
    pub fn cancel(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = GenerationPhase::Cancelled;
        self.reconciler.cancel(self.request_id);
        true
    }

    fn accepting(&mut self, event: &'static str) -> bool {
        if self.token.is_cancelled() {
            self.cancel();
            tracing::debug!(request_id = %self.request_id, event, "ignoring event after cancellation");
            return false;
        }
        if self.phase.is_terminal() {
            tracing::debug!(request_id = %self.request_id, event, phase = ?self.phase, "ignoring event after terminal");
            return false;
        }
        self.start();
        true
    }

    fn classify(&mut self, classification: Classification) {
        if self.classification != Classification::Undetermined {
            return;
        }
        self.classification = classification;
        self.phase = GenerationPhase::Open(classification);
        tracing::debug!(request_id = %self.request_id, ?classification, "response classified");
    }

    /// True when the event belongs to the other path and must be dropped.
    fn crosses(&mut self, wanted: Classification, event: &'static str) -> bool {
        if self.classification == Classification::Undetermined || self.classification == wanted {
            return false;
        }
        self.cross_events += 1;
        tracing::warn!(
            request_id = %self.request_id,
            event,
            classification = ?self.classification,
            "ignoring event for the other response kind"
        );
        true
    }

    fn label_or(&self, default: &str) -> String {
        self.last_status
            .clone()
            .unwrap_or_else(|| default.to_string())
    }

    fn open(&mut self, label: &str) -> bool {
        match self.reconciler.ensure_open(self.request_id, label) {
            Ok(_) => {
                self.opened = true;
                true
            }
            Err(err) => {
                self.absorb(&err);
                false
            }
        }
    }

    fn absorb(&mut self, err: &ReconcileError) {
        if matches!(err, ReconcileError::Cancelled(_)) {
            self.cancel();
            return;
        }
        tracing::warn!(request_id = %self.request_id, error = %err, "placeholder update rejected");
    }

    fn finalize(&mut self, result: Result<MessageId, ReconcileError>, phase: GenerationPhase) {
        match result {
            Ok(message_id) => {
                self.resolved = Some(message_id);
                self.phase = phase;
                tracing::debug!(request_id = %self.request_id, message_id = %message_id, ?phase, "request resolved from stream");
            }
            Err(err) => self.absorb(&err),
        }
    }
}

impl EventHandler for GenerationMachine {
    fn on_status(&mut self, message: String) {
        if !self.accepting("status") {
            return;
        }
        // Undetermined also means no text delta has been seen yet.
        if self.classification == Classification::Undetermined
            && self.policy.implies_image(&message)
        {
            self.classify(Classification::Image);
            self.open(&message);
        } else if self.opened {
            if let Err(err) = self.reconciler.update_label(self.request_id, &message) {
                self.absorb(&err);
            }
        }
        self.last_status = Some(message);
    }

    fn on_text(&mut self, delta: String) {
        if !self.accepting("text") || self.crosses(Classification::Text, "text") {
            return;
        }
        self.classify(Classification::Text);
        self.text.push_str(&delta);
        let label = self.label_or(TEXT_PLACEHOLDER_LABEL);
        if !self.open(&label) {
            return;
        }
        if let Err(err) = self.reconciler.update_content(self.request_id, &self.text) {
            self.absorb(&err);
        }
    }

    fn on_partial_image(&mut self, image_b64: String, index: u64) {
        if !self.accepting("partial_image") || self.crosses(Classification::Image, "partial_image")
        {
            return;
        }
        self.classify(Classification::Image);
        if let Some(last) = self.last_preview_index {
            if index <= last {
                tracing::debug!(request_id = %self.request_id, index, last, "preview index did not increase");
            }
        }
        self.last_preview_index = Some(index);
        let label = self.label_or(IMAGE_PLACEHOLDER_LABEL);
        if !self.open(&label) {
            return;
        }
        if let Err(err) = self
            .reconciler
            .update_preview(self.request_id, ImageRef::Inline(image_b64))
        {
            self.absorb(&err);
        }
    }

    fn on_image(&mut self, image_url: String, _content: Option<String>) {
        if !self.accepting("image_solo") || self.crosses(Classification::Image, "image_solo") {
            return;
        }
        self.classify(Classification::Image);
        let result =
            self.reconciler
                .commit(self.request_id, String::new(), Some(ImageRef::from_wire(image_url)));
        self.finalize(result, GenerationPhase::CommittedImage);
    }

    fn on_result(&mut self, content: String, image_url: Option<String>) {
        if !self.accepting("result") {
            return;
        }
        let (classification, phase, event) = if image_url.is_some() {
            (Classification::Image, GenerationPhase::CommittedImage, "both")
        } else {
            (Classification::Text, GenerationPhase::CommittedText, "text_solo")
        };
        if self.crosses(classification, event) {
            return;
        }
        self.classify(classification);
        let result = self
            .reconciler
            .commit(self.request_id, content, image_url.map(ImageRef::from_wire));
        self.finalize(result, phase);
    }

    fn on_done(&mut self) {
        if !self.accepting("done") {
            return;
        }
        match self.classification {
            Classification::Text => {
                let text = std::mem::take(&mut self.text);
                let result = self.reconciler.commit(self.request_id, text, None);
                self.finalize(result, GenerationPhase::CommittedText);
            }
            Classification::Image => {
                tracing::warn!(request_id = %self.request_id, "stream done before a final image arrived");
                let result = self
                    .reconciler
                    .fail(self.request_id, MISSING_IMAGE_MESSAGE.to_string());
                self.finalize(result, GenerationPhase::Errored);
            }
            Classification::Undetermined => {
                tracing::warn!(request_id = %self.request_id, "stream done without any content");
                let result = self
                    .reconciler
                    .fail(self.request_id, EMPTY_RESPONSE_MESSAGE.to_string());
                self.finalize(result, GenerationPhase::Errored);
            }
        }
    }

    fn on_error(&mut self, message: String) {
        if !self.accepting("error") {
            return;
        }
        tracing::warn!(request_id = %self.request_id, error = %message, "producer reported an error");
        let message = if message.trim().is_empty() {
            APOLOGY_MESSAGE.to_string()
        } else {
            message
        };
        let result = self.reconciler.fail(self.request_id, message);
        self.finalize(result, GenerationPhase::Errored);
    }

    fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }
}
