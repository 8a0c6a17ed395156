//! Event callback registry.
//!
//! Callbacks are kept in registration order per event name. Firing takes a
//! snapshot of the list and releases the lock before invoking anything, so a
//! callback may register further callbacks (even for the event being fired)
//! without deadlocking; those run from the next firing on.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::frame::{Command, Frame};

/// Connection lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// CONNECTED received and version negotiated
    Established,
    /// A liveness check failed; advisory
    Died,
    /// The stream failed and was torn down
    Terminated,
    /// The client disconnected or closed the connection
    Closed,
}

/// Frame events, fired on the transmit and receive paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameEvent {
    BeforeTransmitting,
    AfterTransmitting,
    AfterReceiving,
    /// A client frame with this command is about to be written
    Before(Command),
    /// A broker frame with this command was received
    On(Command),
    BeforeBeat,
    OnBeat,
}

impl FrameEvent {
    /// Verb event for a client frame.
    pub fn before(frame: &Frame) -> Self {
        frame.command.map(FrameEvent::Before).unwrap_or(FrameEvent::BeforeBeat)
    }

    /// Verb event for a broker frame.
    pub fn on(frame: &Frame) -> Self {
        frame.command.map(FrameEvent::On).unwrap_or(FrameEvent::OnBeat)
    }
}

pub type FrameCallback = Arc<dyn Fn(&Frame) + Send + Sync>;
pub type LifecycleCallback = Arc<dyn Fn(LifecycleEvent) + Send + Sync>;

/// Something the receive path hands every inbound frame to, in order,
/// before frame events fire.
pub(crate) trait Interceptor: Send + Sync {
    fn intercept(&self, frame: &Frame);
}

#[derive(Default)]
pub struct EventRegistry {
    frame: Mutex<HashMap<FrameEvent, Vec<FrameCallback>>>,
    lifecycle: Mutex<HashMap<LifecycleEvent, Vec<LifecycleCallback>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame<F>(&self, event: FrameEvent, callback: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.frame
            .lock()
            .entry(event)
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn on_lifecycle<F>(&self, event: LifecycleEvent, callback: F)
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        self.lifecycle
            .lock()
            .entry(event)
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn fire_frame(&self, event: FrameEvent, frame: &Frame) {
        let callbacks = self.frame.lock().get(&event).cloned().unwrap_or_default();
        for callback in callbacks {
            callback(frame);
        }
    }

    pub fn fire_lifecycle(&self, event: LifecycleEvent) {
        let callbacks = self
            .lifecycle
            .lock()
            .get(&event)
            .cloned()
            .unwrap_or_default();
        for callback in callbacks {
            callback(event);
        }
    }

    /// `BeforeTransmitting` then the verb event for an outbound frame.
    pub(crate) fn before_transmit(&self, frame: &Frame) {
        self.fire_frame(FrameEvent::BeforeTransmitting, frame);
        self.fire_frame(FrameEvent::before(frame), frame);
    }

    /// `AfterReceiving` then the verb event for an inbound frame.
    pub(crate) fn after_receive(&self, frame: &Frame) {
        self.fire_frame(FrameEvent::AfterReceiving, frame);
        self.fire_frame(FrameEvent::on(frame), frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn callbacks_fire_in_registration_order() {
        let registry = EventRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            registry.on_frame(FrameEvent::On(Command::Message), move |_| order.lock().push(i));
        }
        registry.fire_frame(FrameEvent::On(Command::Message), &Frame::new(Command::Message));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn heartbeats_route_to_beat_events() {
        assert_eq!(FrameEvent::on(&Frame::heartbeat()), FrameEvent::OnBeat);
        assert_eq!(FrameEvent::before(&Frame::heartbeat()), FrameEvent::BeforeBeat);
        assert_eq!(
            FrameEvent::before(&Frame::new(Command::Send)),
            FrameEvent::Before(Command::Send)
        );
    }

    #[test]
    fn registering_during_dispatch_neither_deadlocks_nor_double_fires() {
        let registry = Arc::new(EventRegistry::new());
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let registry2 = registry.clone();
            let fired = fired.clone();
            registry.on_lifecycle(LifecycleEvent::Established, move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
                let fired = fired.clone();
                registry2.on_lifecycle(LifecycleEvent::Established, move |_| {
                    fired.fetch_add(10, Ordering::SeqCst);
                });
            });
        }
        registry.fire_lifecycle(LifecycleEvent::Established);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        registry.fire_lifecycle(LifecycleEvent::Established);
        assert_eq!(fired.load(Ordering::SeqCst), 1 + 1 + 10);
    }
}
