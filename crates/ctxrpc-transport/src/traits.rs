use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::Result;

/// One message on the wire: JSON data plus out-of-band binary buffers.
///
/// Buffers in `transfer` are handed over by reference where the channel
/// allows it (in-process adapters clone the `Bytes` handle) and are framed
/// after the JSON by stream adapters. The JSON refers to them by index.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// JSON-compatible message body.
    pub data: serde_json::Value,
    /// Transferable binary payloads referenced from `data`.
    pub transfer: Vec<Bytes>,
}

impl Packet {
    /// A packet with no transferables.
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            transfer: Vec::new(),
        }
    }

    /// A packet carrying transferables.
    pub fn with_transfer(data: serde_json::Value, transfer: Vec<Bytes>) -> Self {
        Self { data, transfer }
    }
}

/// Callback invoked for every inbound packet.
pub type MessageHandler = Arc<dyn Fn(Packet) + Send + Sync>;

/// The contract every channel adapter satisfies.
///
/// Implementations must be object-safe so the router can hold an
/// `Arc<dyn Transport>`. `send` must not block on the remote side: it either
/// hands the packet to the channel or fails immediately.
pub trait Transport: Send + Sync + 'static {
    /// Send one packet to the other side.
    fn send(&self, packet: Packet) -> Result<()>;

    /// Subscribe to inbound packets. Dropping the returned
    /// [`Subscription`] unsubscribes.
    fn on_message(&self, handler: MessageHandler) -> Subscription;

    /// Close the channel. Subsequent sends fail with `TransportError::Closed`.
    fn close(&self) -> Result<()>;
}

/// Handle returned by [`Transport::on_message`].
#[must_use = "dropping a subscription unsubscribes the handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// A subscription that runs `cancel` when dropped.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to undo.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Unsubscribe now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Handler bookkeeping shared by the adapters in this crate.
#[derive(Default)]
pub struct Handlers {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, MessageHandler)>>,
}

impl Handlers {
    /// Create an empty handler set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a handler; the subscription removes it again.
    pub fn subscribe(self: &Arc<Self>, handler: MessageHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, handler));

        let weak = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(handlers) = weak.upgrade() {
                handlers.entries.lock().retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Deliver a packet to every current handler, in subscription order.
    ///
    /// Handlers run without the lock held, so a handler may subscribe or
    /// unsubscribe while being invoked.
    pub fn dispatch(&self, packet: Packet) {
        let handlers: Vec<MessageHandler> = self
            .entries
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let Some((last, rest)) = handlers.split_last() else {
            tracing::trace!("no handlers subscribed, dropping packet");
            return;
        };
        for handler in rest {
            handler(packet.clone());
        }
        last(packet);
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of subscribed handlers.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if no handler is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
