use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::conversation::{MessageId, SharedConversation};

/// Wall-clock ticker attached to one open placeholder.
///
/// Writes elapsed whole seconds into the placeholder's progress on every tick.
/// Stopping is idempotent and also happens on drop, so a timer owned by a
/// reconciler slot cannot outlive that slot.
pub struct ProgressTimer {
    stop: CancellationToken,
    started: Instant,
    live: Arc<AtomicUsize>,
    stopped: bool,
}

impl ProgressTimer {
    /// Start ticking for `message_id`.
    ///
    /// Outside a tokio runtime the timer records its start time but never
    /// ticks; stop semantics are unchanged.
    pub fn start(
        conversation: SharedConversation,
        message_id: MessageId,
        tick: Duration,
        live: Arc<AtomicUsize>,
    ) -> Self {
        let stop = CancellationToken::new();
        let started = Instant::now();
        live.fetch_add(1, Ordering::AcqRel);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(tick_loop(
                    conversation,
                    message_id,
                    tick,
                    started,
                    stop.clone(),
                ));
            }
            Err(_) => {
                tracing::debug!(message_id = %message_id, "no runtime, progress timer will not tick");
            }
        }

        Self {
            stop,
            started,
            live,
            stopped: false,
        }
    }

    /// Stop the ticker. Returns `false` if it was already stopped.
    pub fn stop(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.stopped = true;
        self.stop.cancel();
        self.live.fetch_sub(1, Ordering::AcqRel);
        true
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.stopped
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for ProgressTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick_loop(
    conversation: SharedConversation,
    message_id: MessageId,
    tick: Duration,
    started: Instant,
    stop: CancellationToken,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = interval.tick() => {}
        }
        let secs = started.elapsed().as_secs();
        let still_open = conversation
            .lock()
            .with_open(message_id, |message| {
                if let Some(progress) = message.progress.as_mut() {
                    progress.elapsed_secs = progress.elapsed_secs.max(secs);
                }
            })
            .is_some();
        if !still_open {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Conversation;

    fn elapsed_of(conversation: &SharedConversation, id: MessageId) -> u64 {
        conversation
            .lock()
            .get(id)
            .and_then(|m| m.progress.as_ref())
            .map_or(0, |p| p.elapsed_secs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_are_monotonic_and_stop_freezes() {
        let conversation = Conversation::shared();
        let id = conversation.lock().open_assistant("Generating image");
        let live = Arc::new(AtomicUsize::new(0));
        let mut timer = ProgressTimer::start(
            conversation.clone(),
            id,
            Duration::from_millis(250),
            live.clone(),
        );
        assert_eq!(live.load(Ordering::Acquire), 1);

        let mut last = 0;
        for _ in 0..12 {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let now = elapsed_of(&conversation, id);
            assert!(now >= last);
            last = now;
        }
        assert!(last >= 2);

        assert!(timer.stop());
        assert!(!timer.stop());
        assert_eq!(live.load(Ordering::Acquire), 0);

        let frozen = elapsed_of(&conversation, id);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(elapsed_of(&conversation, id), frozen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_timer() {
        let conversation = Conversation::shared();
        let id = conversation.lock().open_assistant("Thinking...");
        let live = Arc::new(AtomicUsize::new(0));
        {
            let _timer =
                ProgressTimer::start(conversation, id, Duration::from_millis(100), live.clone());
            assert_eq!(live.load(Ordering::Acquire), 1);
        }
        assert_eq!(live.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_start_without_runtime() {
        let conversation = Conversation::shared();
        let id = conversation.lock().open_assistant("Thinking...");
        let live = Arc::new(AtomicUsize::new(0));
        let mut timer =
            ProgressTimer::start(conversation, id, Duration::from_millis(100), live.clone());
        assert!(timer.is_running());
        assert!(timer.stop());
        assert!(!timer.is_running());
        assert_eq!(live.load(Ordering::Acquire), 0);
    }
}
