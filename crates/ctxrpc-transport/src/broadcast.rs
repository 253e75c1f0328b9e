use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::memory::Mailbox;
use crate::traits::{MessageHandler, Packet, Subscription, Transport};

type Outbox = (u64, mpsc::UnboundedSender<Packet>);

/// A named in-process broadcast channel.
///
/// Every packet sent by one member is delivered to all other members, never
/// back to the sender.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    members: Arc<Mutex<Vec<Outbox>>>,
    next_member: Arc<AtomicU64>,
}

impl BroadcastHub {
    /// Create a hub with no members.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the hub as a new member.
    pub fn join(&self) -> BroadcastMember {
        let id = self.next_member.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.members.lock().push((id, tx));
        BroadcastMember {
            id,
            hub: self.clone(),
            mailbox: Mailbox::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of members currently joined.
    pub fn member_count(&self) -> usize {
        self.members.lock().len()
    }

    fn leave(&self, id: u64) {
        self.members.lock().retain(|(member, _)| *member != id);
    }
}

/// One participant of a [`BroadcastHub`].
pub struct BroadcastMember {
    id: u64,
    hub: BroadcastHub,
    mailbox: Mailbox,
    closed: AtomicBool,
}

impl Transport for BroadcastMember {
    fn send(&self, packet: Packet) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let recipients: Vec<mpsc::UnboundedSender<Packet>> = self
            .hub
            .members
            .lock()
            .iter()
            .filter(|(member, _)| *member != self.id)
            .map(|(_, tx)| tx.clone())
            .collect();
        for recipient in recipients {
            // A member that went away between the snapshot and the send is not an error.
            let _ = recipient.send(packet.clone());
        }
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) -> Subscription {
        if self.closed.load(Ordering::SeqCst) {
            return Subscription::noop();
        }
        self.mailbox.subscribe(handler)
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.hub.leave(self.id);
            self.mailbox.shutdown();
            debug!(member = self.id, "left broadcast hub");
        }
        Ok(())
    }
}

impl Drop for BroadcastMember {
    fn drop(&mut self) {
        self.hub.leave(self.id);
    }
}
