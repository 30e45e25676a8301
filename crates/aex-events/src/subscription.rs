use aex_core::NormalizedEvent;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::warn;

/// A lazy, restartable subscription: historical events first, then live
/// events as they are appended. Live delivery is one-shot per subscriber —
/// each appended event is offered exactly once.
pub struct EventSubscription {
    buffered: VecDeque<NormalizedEvent>,
    live: broadcast::Receiver<NormalizedEvent>,
    last_seq: u64,
}

impl EventSubscription {
    pub(crate) fn new(
        historical: Vec<NormalizedEvent>,
        last_seq: u64,
        live: broadcast::Receiver<NormalizedEvent>,
    ) -> Self {
        Self {
            buffered: historical.into(),
            live,
            last_seq,
        }
    }

    /// The next event in the subscription, or `None` once the owning store
    /// has been dropped.
    pub async fn next_event(&mut self) -> Option<NormalizedEvent> {
        if let Some(ev) = self.buffered.pop_front() {
            self.last_seq = ev.seq;
            return Some(ev);
        }
        loop {
            match self.live.recv().await {
                Ok(ev) if ev.seq > self.last_seq => {
                    self.last_seq = ev.seq;
                    return Some(ev);
                }
                // Already delivered from the historical buffer during the
                // overlap window between reading history and subscribing.
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event subscriber lagged behind the live feed");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
