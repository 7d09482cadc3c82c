pub mod dispatch;
pub mod frame;

pub use dispatch::{dispatch, dispatch_event, parse_event, DispatchOutcome, EventHandler};
pub use frame::{frame_stream, FrameDecoder, DATA_PREFIX};

use futures_util::{Stream, StreamExt};

use crate::error::ChatError;

/// How the read loop ended.
#[derive(Debug)]
pub enum StreamEnd {
    /// The transport closed the stream normally.
    Finished,
    /// The handler reached a terminal state; the rest of the body was dropped
    /// unread.
    Settled,
    /// The cancellation token fired; the transport was released.
    Cancelled,
    /// The transport failed mid-stream.
    Failed(ChatError),
}

/// Per-request frame counters, logged when the stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames: u32,
    pub handled: u32,
    pub unknown: u32,
    pub malformed: u32,
}

impl StreamStats {
    fn record(&mut self, outcome: DispatchOutcome) {
        self.frames += 1;
        match outcome {
            DispatchOutcome::Handled(_) => self.handled += 1,
            DispatchOutcome::Unknown => self.unknown += 1,
            DispatchOutcome::Malformed => self.malformed += 1,
        }
    }
}

/// Dispatch every frame of `frames` to `handler`, strictly in arrival order.
///
/// Recoverable frame problems are counted and skipped. The loop ends early on
/// cancellation or transport failure, and as soon as the handler reports it is
/// finished, in which case the frame stream (and with it the body) is dropped.
pub async fn pump<S, H>(frames: S, handler: &mut H) -> (StreamEnd, StreamStats)
where
    S: Stream<Item = Result<String, ChatError>>,
    H: EventHandler + ?Sized,
{
    let mut frames = std::pin::pin!(frames);
    let mut stats = StreamStats::default();
    while let Some(item) = frames.next().await {
        match item {
            Ok(payload) => {
                stats.record(dispatch(&payload, handler));
                if handler.is_finished() {
                    return (StreamEnd::Settled, stats);
                }
            }
            Err(ChatError::Cancelled) => return (StreamEnd::Cancelled, stats),
            Err(err) => return (StreamEnd::Failed(err), stats),
        }
    }
    (StreamEnd::Finished, stats)
}
