use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local identifier of one outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Hands out sequential request ids plus a correlation UUID per request.
///
/// The UUID travels to the backend as `x-request-id`; the seed keeps ids from
/// two client instances distinct in shared backend logs.
pub(crate) struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> RequestId {
        RequestId(self.counter.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub(crate) fn request_uuid(&self, request_id: RequestId) -> uuid::Uuid {
        uuid::Uuid::from_u128(self.seed ^ u128::from(request_id.0))
    }
}
