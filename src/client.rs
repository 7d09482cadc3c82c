use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::validation::validate_config;
use crate::config::ClientConfig;
use crate::conversation::reconciler::SlotState;
use crate::conversation::{
    Conversation, Message, MessageId, PlaceholderReconciler, SharedConversation,
};
use crate::error::ChatError;
use crate::fallback::{FallbackInvoker, FallbackOutcome};
use crate::generation::{CancellationController, GenerationMachine, GenerationPhase, StatusPolicy};
use crate::observability::log_request_resolved;
use crate::protocol::{ChatInput, ChatRequestBody};
use crate::state::request_id::RequestIdGenerator;
use crate::state::RequestId;
use crate::stream::{frame_stream, pump, StreamEnd};
use crate::transport::{ChatBackend, HttpBackend};

/// How a request ended. Every request ends in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Committed from a terminal stream event.
    Streamed(MessageId),
    /// Committed from the non-streaming fallback call.
    Fallback(MessageId),
    /// An error message was committed in place of an answer.
    Failed(MessageId),
    Cancelled,
}

impl Resolution {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Streamed(_) => "stream",
            Resolution::Fallback(_) => "fallback",
            Resolution::Failed(_) => "failed",
            Resolution::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Resolution::Streamed(id) | Resolution::Fallback(id) | Resolution::Failed(id) => {
                Some(*id)
            }
            Resolution::Cancelled => None,
        }
    }
}

/// A submitted request that has not been run yet.
///
/// The user message is already in the conversation and the request can
/// already be cancelled through [`ChatClient::cancel`]. Dropping it, whether
/// unrun or with its [`ChatClient::run`] future abandoned mid-flight, releases
/// its cancellation token and retires its placeholder slot.
pub struct PendingRequest {
    id: RequestId,
    uuid: uuid::Uuid,
    user_message: MessageId,
    input: ChatInput,
    body: ChatRequestBody,
    token: CancellationToken,
    started: Instant,
    controller: Arc<CancellationController>,
    reconciler: Arc<PlaceholderReconciler>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("uuid", &self.uuid)
            .field("user_message", &self.user_message)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.controller.release(self.id);
        self.reconciler.finish(self.id);
    }
}

impl PendingRequest {
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Correlation id sent to the backend as `x-request-id`.
    #[must_use]
    pub fn uuid(&self) -> uuid::Uuid {
        self.uuid
    }

    #[must_use]
    pub fn user_message(&self) -> MessageId {
        self.user_message
    }

    #[must_use]
    pub fn input(&self) -> &ChatInput {
        &self.input
    }

    /// Payload for both endpoints, history included.
    #[must_use]
    pub fn body(&self) -> &ChatRequestBody {
        &self.body
    }
}

/// Chat session against one backend: conversation, placeholders and the
/// requests in flight.
///
/// Methods take `&self`; share the client behind an `Arc` to cancel from
/// another task while a request runs.
pub struct ChatClient<B: ChatBackend = HttpBackend> {
    backend: B,
    config: ClientConfig,
    conversation: SharedConversation,
    reconciler: Arc<PlaceholderReconciler>,
    controller: Arc<CancellationController>,
    policy: Arc<StatusPolicy>,
    ids: RequestIdGenerator,
}

impl ChatClient<HttpBackend> {
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] for an invalid config and
    /// [`ChatError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ChatError> {
        let backend = HttpBackend::new(&config)?;
        Self::with_backend(backend, config)
    }
}

impl<B: ChatBackend> ChatClient<B> {
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] for an invalid config.
    pub fn with_backend(backend: B, config: ClientConfig) -> Result<Self, ChatError> {
        validate_config(&config)?;
        let conversation = Conversation::shared();
        let reconciler = Arc::new(PlaceholderReconciler::new(
            conversation.clone(),
            config.progress_tick(),
            config.drop_cancelled_placeholders,
        ));
        Ok(Self {
            backend,
            policy: Arc::new(StatusPolicy::from_config(&config)),
            config,
            conversation,
            reconciler,
            controller: Arc::new(CancellationController::new()),
            ids: RequestIdGenerator::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Append the user message and register a new request.
    pub fn submit(&self, input: ChatInput) -> PendingRequest {
        let (history, user_message) = {
            let mut conversation = self.conversation.lock();
            let history = conversation.history();
            let user_message = conversation.push_user(input.text.clone(), input.image.clone());
            (history, user_message)
        };
        let id = self.ids.next_id();
        let token = self.controller.register(id);
        self.reconciler.begin(id, token.clone());
        tracing::debug!(
            request_id = %id,
            message_id = %user_message,
            history = history.len(),
            edit = input.edit.is_some(),
            "request submitted"
        );
        let body = ChatRequestBody::new(&input, history);
        PendingRequest {
            id,
            uuid: self.ids.request_uuid(id),
            user_message,
            input,
            body,
            token,
            started: Instant::now(),
            controller: self.controller.clone(),
            reconciler: self.reconciler.clone(),
        }
    }

    /// Drive a submitted request to its resolution: stream first, fallback
    /// if the stream breaks before a terminal event.
    pub async fn run(&self, pending: PendingRequest) -> Resolution {
        let resolution = self
            .drive(pending.id, pending.uuid, &pending.body, &pending.token)
            .await;

        let (id, started) = (pending.id, pending.started);
        drop(pending);
        log_request_resolved(id, &resolution, started);
        resolution
    }

    /// [`submit`](Self::submit) then [`run`](Self::run).
    pub async fn send(&self, input: ChatInput) -> Resolution {
        let pending = self.submit(input);
        self.run(pending).await
    }

    /// Cancel one in-flight request. Unknown, finished or already resolved
    /// ids are a no-op.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        if self.reconciler.state(request_id) == Some(SlotState::Resolved) {
            return false;
        }
        if !self.controller.cancel(request_id) {
            return false;
        }
        self.reconciler.cancel(request_id);
        true
    }

    #[must_use]
    pub fn is_in_flight(&self, request_id: RequestId) -> bool {
        self.controller.is_active(request_id)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.controller.in_flight()
    }

    /// Snapshot of the conversation in display order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.conversation.lock().messages().to_vec()
    }

    #[must_use]
    pub fn conversation(&self) -> SharedConversation {
        self.conversation.clone()
    }

    /// Progress timers still running; zero whenever no request is open.
    #[must_use]
    pub fn active_timers(&self) -> usize {
        self.reconciler.active_timers()
    }

    /// Cancel everything in flight and start an empty conversation.
    pub fn clear(&self) {
        for request_id in self.controller.cancel_all() {
            self.reconciler.cancel(request_id);
        }
        self.conversation.lock().clear();
        tracing::info!("conversation cleared");
    }

    async fn drive(
        &self,
        id: RequestId,
        uuid: uuid::Uuid,
        body: &ChatRequestBody,
        token: &CancellationToken,
    ) -> Resolution {
        let mut machine =
            GenerationMachine::new(id, self.reconciler.clone(), self.policy.clone(), token.clone());
        if token.is_cancelled() {
            machine.cancel();
            return Resolution::Cancelled;
        }
        machine.start();

        let opened = tokio::select! {
            biased;
            () = token.cancelled() => None,
            result = self.backend.open_stream(body, uuid) => Some(result),
        };
        let Some(opened) = opened else {
            machine.cancel();
            return Resolution::Cancelled;
        };

        let failure = match opened {
            Ok(bytes) => {
                let (end, stats) = pump(frame_stream(bytes, token.clone()), &mut machine).await;
                tracing::debug!(
                    request_id = %id,
                    frames = stats.frames,
                    unknown = stats.unknown,
                    malformed = stats.malformed,
                    cross = machine.cross_events(),
                    "stream closed"
                );
                match end {
                    // A committed message outranks a cancel that raced the read loop.
                    StreamEnd::Cancelled if machine.resolved_message().is_some() => None,
                    StreamEnd::Cancelled => {
                        machine.cancel();
                        return Resolution::Cancelled;
                    }
                    StreamEnd::Settled => None,
                    StreamEnd::Failed(err) => Some(err),
                    StreamEnd::Finished => Some(ChatError::Decode(
                        "stream ended without a terminal event".to_string(),
                    )),
                }
            }
            Err(err) => Some(err),
        };

        match (machine.phase(), machine.resolved_message()) {
            (GenerationPhase::CommittedText | GenerationPhase::CommittedImage, Some(message)) => {
                return Resolution::Streamed(message);
            }
            (GenerationPhase::Errored, Some(message)) => return Resolution::Failed(message),
            (GenerationPhase::Cancelled, _) => return Resolution::Cancelled,
            _ => {}
        }

        let Some(err) = failure else {
            return Resolution::Cancelled;
        };
        tracing::warn!(
            request_id = %id,
            error = %err,
            category = ?err.category(),
            "stream failed before a terminal event, falling back"
        );
        match FallbackInvoker::new(&self.backend, &self.reconciler)
            .resolve(id, uuid, body, token)
            .await
        {
            FallbackOutcome::Committed(message) => Resolution::Fallback(message),
            FallbackOutcome::Failed(message) => Resolution::Failed(message),
            FallbackOutcome::Abandoned => Resolution::Cancelled,
        }
    }
}
