use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::traits::{Handlers, MessageHandler, Packet, Subscription, Transport};

/// Inbound side of an in-process adapter.
///
/// Packets queue in the channel until the first handler subscribes; a Tokio
/// task then drains them in order and fans each one out to the handlers.
pub(crate) struct Mailbox {
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
    handlers: Arc<Handlers>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Mailbox {
    pub(crate) fn new(inbound: mpsc::UnboundedReceiver<Packet>) -> Self {
        Self {
            inbound: Mutex::new(Some(inbound)),
            handlers: Handlers::new(),
            pump: Mutex::new(None),
        }
    }

    pub(crate) fn subscribe(&self, handler: MessageHandler) -> Subscription {
        let subscription = self.handlers.subscribe(handler);
        self.start_pump();
        subscription
    }

    fn start_pump(&self) {
        let mut pump = self.pump.lock();
        if pump.is_some() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(error = %err, "no tokio runtime; inbound packets stay queued");
                return;
            }
        };

        let Some(mut inbound) = self.inbound.lock().take() else {
            return;
        };
        let handlers = Arc::clone(&self.handlers);
        *pump = Some(runtime.spawn(async move {
            while let Some(packet) = inbound.recv().await {
                handlers.dispatch(packet);
            }
            debug!("in-process channel drained");
        }));
    }

    pub(crate) fn shutdown(&self) {
        self.handlers.clear();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.inbound.lock().take();
    }
}

/// One end of an entangled in-process channel.
///
/// Create both ends with [`MemoryTransport::pair`]. Delivery is asynchronous
/// and ordered, like a message port: `send` enqueues and returns, and the
/// other end's handlers run later on the Tokio runtime.
pub struct MemoryTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    mailbox: Mailbox,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();
        (Self::new(left_tx, left_rx), Self::new(right_tx, right_rx))
    }

    fn new(outbound: mpsc::UnboundedSender<Packet>, inbound: mpsc::UnboundedReceiver<Packet>) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            mailbox: Mailbox::new(inbound),
            closed: AtomicBool::new(false),
        }
    }

    /// True once [`Transport::close`] has been called on this end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn send(&self, packet: Packet) -> Result<()> {
        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(TransportError::Closed)?;
        sender.send(packet).map_err(|_| TransportError::Closed)
    }

    fn on_message(&self, handler: MessageHandler) -> Subscription {
        if self.is_closed() {
            return Subscription::noop();
        }
        self.mailbox.subscribe(handler)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.outbound.lock().take();
        self.mailbox.shutdown();
        debug!("in-process channel closed");
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;

    fn collect_into(tx: mpsc::UnboundedSender<Packet>) -> MessageHandler {
        Arc::new(move |packet| {
            let _ = tx.send(packet);
        })
    }

    #[tokio::test]
    async fn packets_cross_in_order() {
        let (left, right) = MemoryTransport::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = right.on_message(collect_into(tx));

        left.send(Packet::new(json!(1))).unwrap();
        left.send(Packet::new(json!(2))).unwrap();
        left.send(Packet::new(json!(3))).unwrap();

        for expected in 1..=3 {
            let packet = rx.recv().await.unwrap();
            assert_eq!(packet.data, json!(expected));
        }
    }

    #[tokio::test]
    async fn packets_sent_before_subscribe_are_queued() {
        let (left, right) = MemoryTransport::pair();
        left.send(Packet::new(json!("early"))).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = right.on_message(collect_into(tx));
        assert_eq!(rx.recv().await.unwrap().data, json!("early"));
    }

    #[tokio::test]
    async fn transfer_buffers_are_shared_not_copied() {
        let (left, right) = MemoryTransport::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = right.on_message(collect_into(tx));

        let buffer = Bytes::from(vec![7u8; 1024]);
        left.send(Packet::with_transfer(json!({"slot": 0}), vec![buffer.clone()]))
            .unwrap();

        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.transfer[0].as_ptr(), buffer.as_ptr());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (left, _right) = MemoryTransport::pair();
        left.close().unwrap();
        assert!(left.is_closed());
        assert!(matches!(
            left.send(Packet::new(json!(null))),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn send_to_dropped_peer_fails() {
        let (left, right) = MemoryTransport::pair();
        drop(right);
        assert!(matches!(
            left.send(Packet::new(json!(null))),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn unsubscribed_handler_stops_receiving() {
        let (left, right) = MemoryTransport::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = right.on_message(collect_into(tx));

        left.send(Packet::new(json!("kept"))).unwrap();
        assert_eq!(rx.recv().await.unwrap().data, json!("kept"));

        sub.unsubscribe();
        left.send(Packet::new(json!("lost"))).unwrap();
        let outcome = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(!matches!(outcome, Ok(Some(_))));
    }
}
