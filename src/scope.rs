//! The frame-sending surface and the scopes layered on it.
//!
//! [`Transmit`] is implemented by the connection itself and by every scope
//! that decorates frames on their way to it. The protocol verbs are provided
//! methods, so a verb issued through a scope picks up that scope's headers,
//! receipts or transaction id without knowing about them.

use async_trait::async_trait;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::{Result, StompError};
use crate::frame::{Body, Frame};
use crate::headers::Headers;
use crate::protocol::AckTarget;
use crate::subscription::{
    MessageCallback, Subscription, SubscriptionRegistry, UnsubscribeKey, requires_id,
};
use crate::transaction::Transaction;

/// What [`Transmit::unsubscribe`] should remove.
#[derive(Debug, Clone, Copy)]
pub enum UnsubscribeTarget<'a> {
    /// A subscription id, or a destination when no registered id matches
    Key(&'a str),
    /// The SUBSCRIBE frame that created the subscription
    Frame(&'a Frame),
}

impl<'a> From<&'a str> for UnsubscribeTarget<'a> {
    fn from(key: &'a str) -> Self {
        UnsubscribeTarget::Key(key)
    }
}

impl<'a> From<&'a Frame> for UnsubscribeTarget<'a> {
    fn from(frame: &'a Frame) -> Self {
        UnsubscribeTarget::Frame(frame)
    }
}

impl<'a> From<&'a Subscription> for UnsubscribeTarget<'a> {
    fn from(subscription: &'a Subscription) -> Self {
        UnsubscribeTarget::Frame(subscription.frame())
    }
}

#[async_trait]
pub trait Transmit: Send + Sync {
    /// The connection frames eventually go out on.
    fn connection(&self) -> &Connection;

    /// Write a frame, applying whatever this layer adds to it.
    async fn transmit(&self, frame: Frame) -> Result<()>;

    async fn send(&self, destination: &str, body: Body, headers: Headers) -> Result<()> {
        self.transmit(Frame::send(destination, body).with_headers(headers))
            .await
    }

    /// Subscribe to `destination`; `callback` runs for every matching MESSAGE.
    ///
    /// An `id` header is generated only when a selector or a non-auto ack
    /// mode is requested and none was given.
    async fn subscribe(
        &self,
        destination: &str,
        headers: Headers,
        callback: MessageCallback,
    ) -> Result<Arc<Subscription>> {
        let mut frame = Frame::subscribe(destination).with_headers(headers);
        if requires_id(&frame) && !frame.headers.has("id") {
            let id = self.connection().ids().subscription_id();
            frame.headers.set("id", id);
        }
        let registry = self.connection().subscriptions();
        let subscription = registry.add_pending(Subscription::from_frame(frame.clone(), callback)?);
        match self.transmit(frame).await {
            Ok(()) => {
                registry.activate(&subscription);
                Ok(subscription)
            }
            Err(e) => {
                registry.discard(&subscription);
                Err(e)
            }
        }
    }

    /// Remove subscriptions and tell the broker.
    async fn unsubscribe(&self, target: UnsubscribeTarget<'_>, headers: Headers) -> Result<()> {
        let registry = self.connection().subscriptions();
        let key = match target {
            UnsubscribeTarget::Key(key) => registry.resolve(key),
            UnsubscribeTarget::Frame(frame) => SubscriptionRegistry::resolve_frame(frame)
                .ok_or_else(|| {
                    StompError::Argument("frame names no subscription id or destination".into())
                })?,
        };
        registry.remove(&key);
        let frame = match &key {
            UnsubscribeKey::Id(id) => Frame::unsubscribe().header("id", id.as_str()),
            UnsubscribeKey::Destination(d) => Frame::unsubscribe().header("destination", d.as_str()),
        };
        self.transmit(frame.with_headers(headers)).await
    }

    async fn ack(
        &self,
        target: AckTarget<'_>,
        subscription: Option<&str>,
        headers: Headers,
    ) -> Result<()> {
        let frame = self
            .connection()
            .version()
            .ack_frame(target, subscription, headers)?;
        self.transmit(frame).await
    }

    async fn nack(
        &self,
        target: AckTarget<'_>,
        subscription: Option<&str>,
        headers: Headers,
    ) -> Result<()> {
        let frame = self
            .connection()
            .version()
            .nack_frame(target, subscription, headers)?;
        self.transmit(frame).await
    }

    async fn begin(&self, transaction: &str, headers: Headers) -> Result<()> {
        self.transmit(Frame::begin(transaction).with_headers(headers))
            .await
    }

    async fn commit(&self, transaction: &str, headers: Headers) -> Result<()> {
        self.transmit(Frame::commit(transaction).with_headers(headers))
            .await
    }

    async fn abort(&self, transaction: &str, headers: Headers) -> Result<()> {
        self.transmit(Frame::abort(transaction).with_headers(headers))
            .await
    }

    /// Frames sent through the returned scope carry `headers` unless they
    /// already set those names.
    fn with_headers(&self, headers: Headers) -> HeaderScope<Self>
    where
        Self: Clone + Sized,
    {
        HeaderScope {
            parent: self.clone(),
            headers,
        }
    }

    /// Every frame sent through the returned scope requests a receipt, and
    /// `callback` runs when it arrives.
    fn with_receipt<F>(&self, callback: F) -> ReceiptScope<Self>
    where
        Self: Clone + Sized,
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        ReceiptScope {
            parent: self.clone(),
            callback: Arc::new(callback),
        }
    }

    /// A transaction layered on this sender. It begins lazily on the first
    /// SEND, ACK or NACK.
    fn transaction(&self, headers: Headers) -> Transaction<Self>
    where
        Self: Clone + Sized,
    {
        Transaction::new(self.clone(), headers)
    }
}

/// Adds default headers to frames.
#[derive(Clone)]
pub struct HeaderScope<T> {
    parent: T,
    headers: Headers,
}

impl<T> HeaderScope<T> {
    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

#[async_trait]
impl<T: Transmit> Transmit for HeaderScope<T> {
    fn connection(&self) -> &Connection {
        self.parent.connection()
    }

    async fn transmit(&self, mut frame: Frame) -> Result<()> {
        if !frame.is_heartbeat() {
            frame.headers.merge_missing(&self.headers);
        }
        self.parent.transmit(frame).await
    }
}

/// Requests a receipt for each frame and routes the RECEIPT to a callback.
#[derive(Clone)]
pub struct ReceiptScope<T> {
    parent: T,
    callback: Arc<dyn Fn(&Frame) + Send + Sync>,
}

#[async_trait]
impl<T: Transmit> Transmit for ReceiptScope<T> {
    fn connection(&self) -> &Connection {
        self.parent.connection()
    }

    async fn transmit(&self, mut frame: Frame) -> Result<()> {
        if frame.is_heartbeat() || frame.headers.has("receipt") {
            return self.parent.transmit(frame).await;
        }
        let receipts = self.connection().receipts();
        let receipt_id = self.connection().ids().receipt_id();
        let callback = self.callback.clone();
        receipts.register(receipt_id.as_str(), move |receipt| callback(receipt));
        frame.headers.set("receipt", receipt_id.as_str());
        let result = self.parent.transmit(frame).await;
        if result.is_err() {
            receipts.cancel(&receipt_id);
        }
        result
    }
}
