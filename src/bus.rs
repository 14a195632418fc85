use async_broadcast::{broadcast, InactiveReceiver, RecvError, Sender, TryRecvError};

use crate::events::IncomingEvent;

const DEFAULT_CAPACITY: usize = 256;


/// Fan-out of classified inbound events to any number of independent subscribers.
///
/// Every subscriber sees every event published after it subscribed.
/// Subscribers that fall more than `capacity` events behind lose the oldest ones.
#[derive(Clone)]
pub struct EventBus {
    events_send: Sender<IncomingEvent>,

    // keeps the channel open while nobody is subscribed
    _events_keepalive: InactiveReceiver<IncomingEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (mut events_send, events_recv) = broadcast(capacity);

        events_send.set_overflow(true);
        events_send.set_await_active(false);

        Self {
            events_send,
            _events_keepalive: events_recv.deactivate(),
        }
    }

    /// Publish an event to every current subscriber. Returns the number of subscribers.
    pub fn publish(&self, event: IncomingEvent) -> usize {
        let receivers = self.events_send.receiver_count();

        if receivers == 0 {
            tracing::trace!(source = %event.source_id, "no subscribers, event dropped");
            return 0
        }

        match self.events_send.try_broadcast(event) {
            Ok(_) => receivers,
            Err(err) => {
                tracing::debug!("event not published: {err}");
                0
            }
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            events: self.events_send.new_receiver(),
        }
    }

    /// Stop the bus. Subscribers drain what is queued and then see the end of the stream.
    pub fn close(&self) -> bool {
        self.events_send.close()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events_send.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}


/// One subscriber's view of an [EventBus]. Dropping it unsubscribes.
pub struct Subscription {
    events: async_broadcast::Receiver<IncomingEvent>,
}

impl Subscription {
    /// The next event, or `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<IncomingEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Overflowed(missed)) => {
                    tracing::warn!(missed, "subscriber lagging, events lost");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The next already queued event, if any.
    pub fn try_recv(&mut self) -> Option<IncomingEvent> {
        loop {
            match self.events.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Overflowed(missed)) => {
                    tracing::warn!(missed, "subscriber lagging, events lost");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
