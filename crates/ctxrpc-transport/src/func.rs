use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, TransportError};
use crate::traits::{MessageHandler, Packet, Subscription, Transport};

type SendFn = Box<dyn Fn(Packet) -> Result<()> + Send + Sync>;

/// A transport made from a bare send function.
///
/// There is no inbound side: whoever owns the real channel forwards inbound
/// packets to the router by hand (`Rpc::receive`).
pub struct FnTransport {
    send: SendFn,
    closed: AtomicBool,
}

impl FnTransport {
    /// Wrap a send function.
    pub fn new(send: impl Fn(Packet) -> Result<()> + Send + Sync + 'static) -> Self {
        Self {
            send: Box::new(send),
            closed: AtomicBool::new(false),
        }
    }
}

impl Transport for FnTransport {
    fn send(&self, packet: Packet) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        (self.send)(packet)
    }

    fn on_message(&self, _handler: MessageHandler) -> Subscription {
        Subscription::noop()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for FnTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransport")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
