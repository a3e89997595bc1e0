#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use crate::Event;

/// Broadcast fan-out for core events.
///
/// One bus per session: the pipelines, the quality selector and the session
/// loop hold clones and publish into the same channel, so every subscriber
/// observes the merged `Abr`/`Pipeline`/`Playback` stream in publish order.
///
/// Publishing is synchronous and cannot stall the core: with nobody
/// listening the event is dropped, and a subscriber that falls behind the
/// channel capacity sees `RecvError::Lagged` on its own receiver instead of
/// applying backpressure to the producers.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fan an event out to the current subscribers.
    ///
    /// Sub-enum values convert in place, so call sites write
    /// `bus.publish(PipelineEvent::BufferLevelUpdated { level })` without
    /// wrapping.
    pub fn publish<E: Into<Event>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    /// Open an independent receiver for everything published from here on.
    /// Events from before the subscription are not replayed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
