use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::StompError;
use crate::events::Interceptor;
use crate::frame::{Command, Frame};

/// Callback invoked with every MESSAGE a subscription matches.
pub type MessageCallback = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Subscription acknowledgement modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

impl FromStr for AckMode {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(StompError::Argument(format!("unknown ack mode '{}'", other))),
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when a SUBSCRIBE must carry an id for its messages to be routable:
/// a selector or a non-auto ack mode was requested.
pub fn requires_id(frame: &Frame) -> bool {
    frame.headers.has("selector")
        || frame
            .get_header("ack")
            .is_some_and(|ack| ack.parse::<AckMode>().map_or(true, |m| m != AckMode::Auto))
}

/// A registered subscription.
///
/// A subscription without an id or selector and with `auto` acknowledgement
/// is *naive*: it is matched purely by destination.
pub struct Subscription {
    /// Cleared until the SUBSCRIBE frame has gone out
    active: AtomicBool,
    id: Option<String>,
    destination: String,
    ack: AckMode,
    selector: Option<String>,
    frame: Frame,
    callback: MessageCallback,
}

impl Subscription {
    /// Build a subscription from the SUBSCRIBE frame that established it.
    pub fn from_frame(frame: Frame, callback: MessageCallback) -> Result<Self, StompError> {
        let destination = frame
            .get_header("destination")
            .ok_or_else(|| StompError::Argument("SUBSCRIBE requires a destination".into()))?
            .to_string();
        let ack = match frame.get_header("ack") {
            Some(ack) => ack.parse()?,
            None => AckMode::Auto,
        };
        Ok(Self {
            active: AtomicBool::new(true),
            id: frame.get_header("id").map(str::to_string),
            selector: frame.get_header("selector").map(str::to_string),
            destination,
            ack,
            frame,
            callback,
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn ack(&self) -> AckMode {
        self.ack
    }

    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    /// The SUBSCRIBE frame, re-sent after a reconnect.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn is_naive(&self) -> bool {
        self.id.is_none() && self.selector.is_none() && self.ack == AckMode::Auto
    }

    /// Whether a MESSAGE frame belongs to this subscription.
    ///
    /// A `subscription` header is matched against the id exactly. Without
    /// one, only naive subscriptions match, by destination; anything that
    /// asked for manual acks or filtering never sees such a message.
    pub fn matches(&self, message: &Frame) -> bool {
        match message.get_header("subscription") {
            Some(sub) => self.id.as_deref() == Some(sub),
            None => self.is_naive() && message.get_header("destination") == Some(&self.destination),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("ack", &self.ack)
            .field("selector", &self.selector)
            .finish()
    }
}

/// What an UNSUBSCRIBE refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeKey {
    Id(String),
    Destination(String),
}

/// Active subscriptions in registration order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<Vec<Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscription: Subscription) -> Arc<Subscription> {
        let subscription = Arc::new(subscription);
        self.entries.lock().push(subscription.clone());
        subscription
    }

    /// Register a subscription whose SUBSCRIBE frame is still in flight.
    /// It already receives messages but is not re-sent by [`Self::frames`]
    /// until [`Self::activate`] is called.
    pub fn add_pending(&self, subscription: Subscription) -> Arc<Subscription> {
        subscription.active.store(false, Ordering::SeqCst);
        self.add(subscription)
    }

    pub fn activate(&self, subscription: &Arc<Subscription>) {
        subscription.active.store(true, Ordering::SeqCst);
    }

    /// Drop one specific registration.
    pub fn discard(&self, subscription: &Arc<Subscription>) {
        self.entries
            .lock()
            .retain(|s| !Arc::ptr_eq(s, subscription));
    }

    /// Resolve a caller-supplied string: a registered id wins, otherwise it
    /// is taken as a destination.
    pub fn resolve(&self, id_or_destination: &str) -> UnsubscribeKey {
        let known_id = self
            .entries
            .lock()
            .iter()
            .any(|s| s.id() == Some(id_or_destination));
        if known_id {
            UnsubscribeKey::Id(id_or_destination.to_string())
        } else {
            UnsubscribeKey::Destination(id_or_destination.to_string())
        }
    }

    /// Resolve a previously sent SUBSCRIBE frame.
    pub fn resolve_frame(frame: &Frame) -> Option<UnsubscribeKey> {
        frame
            .get_header("id")
            .map(|id| UnsubscribeKey::Id(id.to_string()))
            .or_else(|| {
                frame
                    .get_header("destination")
                    .map(|d| UnsubscribeKey::Destination(d.to_string()))
            })
    }

    /// Remove every subscription the key selects. A destination only
    /// removes naive subscriptions.
    pub fn remove(&self, key: &UnsubscribeKey) -> Vec<Arc<Subscription>> {
        let mut entries = self.entries.lock();
        let (removed, kept): (Vec<_>, Vec<_>) =
            entries.drain(..).partition(|s| match key {
                UnsubscribeKey::Id(id) => s.id() == Some(id.as_str()),
                UnsubscribeKey::Destination(d) => s.is_naive() && s.destination() == d,
            });
        *entries = kept;
        removed
    }

    /// SUBSCRIBE frames of every active subscription, in order.
    pub fn frames(&self) -> Vec<Frame> {
        self.entries
            .lock()
            .iter()
            .filter(|s| s.active.load(Ordering::SeqCst))
            .map(|s| s.frame().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Hand a MESSAGE to every matching subscription, returning how many
    /// callbacks ran.
    pub fn dispatch(&self, message: &Frame) -> usize {
        if !message.is(Command::Message) {
            return 0;
        }
        let matching: Vec<MessageCallback> = self
            .entries
            .lock()
            .iter()
            .filter(|s| s.matches(message))
            .map(|s| s.callback.clone())
            .collect();
        for callback in &matching {
            callback(message);
        }
        matching.len()
    }
}

impl Interceptor for SubscriptionRegistry {
    fn intercept(&self, frame: &Frame) {
        self.dispatch(frame);
    }
}
