use tokio_util::sync::CancellationToken;

use crate::conversation::{MessageId, PlaceholderReconciler};
use crate::error::ReconcileError;
use crate::protocol::ChatRequestBody;
use crate::state::RequestId;
use crate::transport::ChatBackend;

/// Shown to the user when both the stream and the fallback call failed.
pub const APOLOGY_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackOutcome {
    Committed(MessageId),
    Failed(MessageId),
    /// Cancelled before or during the call, or the placeholder could no
    /// longer be written. Nothing was committed.
    Abandoned,
}

/// Recovers a request whose stream broke before any terminal event.
pub struct FallbackInvoker<'a, B: ChatBackend> {
    backend: &'a B,
    reconciler: &'a PlaceholderReconciler,
}

impl<'a, B: ChatBackend> FallbackInvoker<'a, B> {
    #[must_use]
    pub fn new(backend: &'a B, reconciler: &'a PlaceholderReconciler) -> Self {
        Self {
            backend,
            reconciler,
        }
    }

    /// Make exactly one non-streaming call with the original payload and
    /// resolve the request's placeholder with its result.
    pub async fn resolve(
        &self,
        request_id: RequestId,
        request_uuid: uuid::Uuid,
        body: &ChatRequestBody,
        token: &CancellationToken,
    ) -> FallbackOutcome {
        if token.is_cancelled() {
            self.reconciler.cancel(request_id);
            return FallbackOutcome::Abandoned;
        }

        let result = tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!(request_id = %request_id, "fallback call cancelled");
                self.reconciler.cancel(request_id);
                return FallbackOutcome::Abandoned;
            }
            result = self.backend.complete(body, request_uuid) => result,
        };

        match result {
            Ok(response) => {
                tracing::debug!(request_id = %request_id, kind = ?response.kind, "fallback call succeeded");
                let image = response.committed_image();
                self.settle(
                    request_id,
                    self.reconciler.commit(request_id, response.content, image),
                    FallbackOutcome::Committed,
                )
            }
            Err(err) => {
                tracing::error!(
                    request_id = %request_id,
                    error = %err,
                    category = ?err.category(),
                    "fallback call failed"
                );
                self.settle(
                    request_id,
                    self.reconciler.fail(request_id, APOLOGY_MESSAGE.to_string()),
                    FallbackOutcome::Failed,
                )
            }
        }
    }

    fn settle(
        &self,
        request_id: RequestId,
        result: Result<MessageId, ReconcileError>,
        outcome: fn(MessageId) -> FallbackOutcome,
    ) -> FallbackOutcome {
        match result {
            Ok(message_id) => outcome(message_id),
            Err(ReconcileError::Cancelled(_)) => FallbackOutcome::Abandoned,
            Err(err) => {
                tracing::warn!(request_id = %request_id, error = %err, "fallback result rejected");
                FallbackOutcome::Abandoned
            }
        }
    }
}
