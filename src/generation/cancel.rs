use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::state::RequestId;

/// Registry of cancellation tokens for in-flight requests.
///
/// Each request gets its own token, so cancelling one never affects another.
#[derive(Default)]
pub struct CancellationController {
    tokens: Mutex<FxHashMap<RequestId, CancellationToken>>,
}

impl CancellationController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and remember the token for `request_id`.
    pub fn register(&self, request_id: RequestId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(request_id, token.clone());
        token
    }

    /// Signal the request's token. Returns `false` for unknown, released or
    /// already cancelled requests; those calls change nothing.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let tokens = self.tokens.lock();
        let Some(token) = tokens.get(&request_id) else {
            tracing::debug!(request_id = %request_id, "cancel ignored: request not in flight");
            return false;
        };
        if token.is_cancelled() {
            return false;
        }
        token.cancel();
        tracing::info!(request_id = %request_id, "cancellation requested");
        true
    }

    /// Signal every in-flight request. Returns the ids that were signalled.
    pub fn cancel_all(&self) -> Vec<RequestId> {
        let tokens = self.tokens.lock();
        let mut cancelled: Vec<RequestId> = tokens
            .iter()
            .filter(|(_, token)| !token.is_cancelled())
            .map(|(request_id, token)| {
                token.cancel();
                *request_id
            })
            .collect();
        cancelled.sort_unstable();
        if !cancelled.is_empty() {
            tracing::info!(count = cancelled.len(), "cancelling all in-flight requests");
        }
        cancelled
    }

    /// Forget a request that reached a terminal state.
    pub fn release(&self, request_id: RequestId) {
        self.tokens.lock().remove(&request_id);
    }

    #[must_use]
    pub fn is_active(&self, request_id: RequestId) -> bool {
        self.tokens
            .lock()
            .get(&request_id)
            .is_some_and(|token| !token.is_cancelled())
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tokens.lock().len()
    }
}
