//! Lifecycle and progress events.
//!
//! The [`EventBus`] has one channel per [`EventKind`]. Handlers registered on
//! a channel run synchronously on the session worker, in registration
//! order, before the worker processes the next chunk of the same request.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::warn;

use crate::error::CancellationDetails;
use crate::request::WordBoundary;

/// Event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Started,
    Synthesizing,
    WordBoundary,
    Completed,
    Canceled,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Started,
        EventKind::Synthesizing,
        EventKind::WordBoundary,
        EventKind::Completed,
        EventKind::Canceled,
    ];

    fn index(self) -> usize {
        match self {
            EventKind::Started => 0,
            EventKind::Synthesizing => 1,
            EventKind::WordBoundary => 2,
            EventKind::Completed => 3,
            EventKind::Canceled => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Started => "started",
            EventKind::Synthesizing => "synthesizing",
            EventKind::WordBoundary => "word_boundary",
            EventKind::Completed => "completed",
            EventKind::Canceled => "canceled",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific event data.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Started,
    /// One backend audio chunk.
    Synthesizing { chunk: Bytes, total_bytes: usize },
    WordBoundary(WordBoundary),
    Completed {
        audio_len: usize,
        audio_duration: Duration,
    },
    Canceled(CancellationDetails),
}

/// An event published by a session.
#[derive(Debug, Clone)]
pub struct SynthesisEvent {
    pub request_id: u64,
    pub result_id: String,
    pub payload: EventPayload,
}

impl SynthesisEvent {
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Started => EventKind::Started,
            EventPayload::Synthesizing { .. } => EventKind::Synthesizing,
            EventPayload::WordBoundary(_) => EventKind::WordBoundary,
            EventPayload::Completed { .. } => EventKind::Completed,
            EventPayload::Canceled(_) => EventKind::Canceled,
        }
    }
}

/// Error a handler may return. It is logged and otherwise ignored.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Event handler function type.
pub type HandlerFunc = dyn Fn(&SynthesisEvent) -> Result<(), HandlerError> + Send + Sync;

/// Identifies a registered handler within its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Channel = RwLock<BTreeMap<SubscriptionId, Arc<HandlerFunc>>>;

/// Publish/subscribe registry keyed by [`EventKind`].
pub struct EventBus {
    // Ids only grow, so key order is registration order.
    channels: [Channel; 5],
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: Default::default(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a handler on the given channel.
    ///
    /// # Example
    ///
    /// ```
    /// use giztoy_synthesis::{EventBus, EventKind};
    ///
    /// let bus = EventBus::new();
    /// bus.connect(EventKind::WordBoundary, |evt| {
    ///     println!("word boundary: {:?}", evt.payload);
    ///     Ok(())
    /// });
    /// assert_eq!(bus.handler_count(EventKind::WordBoundary), 1);
    /// ```
    pub fn connect<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SynthesisEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.channels[kind.index()].write().insert(id, Arc::new(handler));
        id
    }

    /// Removes one handler. Returns false if it was not registered.
    pub fn disconnect(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.channels[kind.index()].write().remove(&id).is_some()
    }

    /// Removes every handler from the channel.
    pub fn disconnect_all(&self, kind: EventKind) {
        self.channels[kind.index()].write().clear();
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.channels[kind.index()].read().len()
    }

    /// Delivers an event to every handler on its channel.
    ///
    /// Handler errors and panics are logged; delivery continues with the
    /// next handler.
    pub(crate) fn emit(&self, event: &SynthesisEvent) {
        let kind = event.kind();
        let handlers: Vec<(SubscriptionId, Arc<HandlerFunc>)> = self.channels[kind.index()]
            .read()
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();

        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        kind = %kind,
                        request_id = event.request_id,
                        subscription = id.0,
                        "event handler failed: {}",
                        e
                    );
                }
                Err(_) => {
                    warn!(
                        kind = %kind,
                        request_id = event.request_id,
                        subscription = id.0,
                        "event handler panicked"
                    );
                }
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("EventBus");
        for kind in EventKind::ALL {
            d.field(kind.as_str(), &self.handler_count(kind));
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn started(request_id: u64) -> SynthesisEvent {
        SynthesisEvent {
            request_id,
            result_id: format!("r{request_id}"),
            payload: EventPayload::Started,
        }
    }

    #[test]
    fn test_delivery_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let log = log.clone();
            bus.connect(EventKind::Started, move |_| {
                log.lock().push(name);
                Ok(())
            });
        }
        bus.emit(&started(1));
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_channels_are_separate() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.connect(EventKind::Completed, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.emit(&started(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disconnect() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.connect(EventKind::Started, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.connect(EventKind::Started, |_| Ok(()));
        assert!(bus.disconnect(EventKind::Started, id));
        assert!(!bus.disconnect(EventKind::Started, id));
        bus.emit(&started(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.handler_count(EventKind::Started), 1);

        bus.disconnect_all(EventKind::Started);
        assert_eq!(bus.handler_count(EventKind::Started), 0);
    }

    #[test]
    fn test_failing_handlers_do_not_stop_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.connect(EventKind::Started, |_| Err("boom".into()));
        bus.connect(EventKind::Started, |_| panic!("handler bug"));
        let c = count.clone();
        bus.connect(EventKind::Started, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.emit(&started(1));
        bus.emit(&started(2));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_may_reenter_bus() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.connect(EventKind::Started, move |_| {
            inner.connect(EventKind::Completed, |_| Ok(()));
            Ok(())
        });
        bus.emit(&started(1));
        assert_eq!(bus.handler_count(EventKind::Completed), 1);
    }
}
