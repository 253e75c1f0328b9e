use std::collections::HashMap;
use std::sync::Arc;

use ctxrpc_transport::{Packet, Subscription, Transport};
use ctxrpc_wire::{id, Message};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::RpcConfig;
use crate::error::Result;
use crate::implementation::Implementation;
use crate::port::Port;
use crate::proxy::Proxy;

/// A set of named endpoints for one participant, sharing one transport.
///
/// Inbound packets are routed by the participant and endpoint segments of
/// their correlation id. Packets that are malformed, addressed to another
/// participant, or addressed to an endpoint that does not exist here are
/// dropped.
///
/// ```no_run
/// # async fn demo() -> ctxrpc_port::Result<()> {
/// use std::sync::Arc;
/// use ctxrpc_port::{Implementation, Rpc, Value};
/// use ctxrpc_transport::MemoryTransport;
///
/// let (left, right) = MemoryTransport::pair();
/// let server = Rpc::new("app", Arc::new(left))?;
/// server.register("math", Implementation::new().sync_method("sum", |args| {
///     Ok(Value::from(args.iter().filter_map(Value::as_i64).sum::<i64>()))
/// }))?;
///
/// let client = Rpc::new("app", Arc::new(right))?;
/// let math = client.acquire("math")?;
/// let six = math.call("sum", vec![1.into(), 2.into(), 3.into()]).await?;
/// assert_eq!(six, Value::from(6));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Rpc {
    inner: Arc<RpcInner>,
}

struct RpcInner {
    participant: String,
    transport: Arc<dyn Transport>,
    config: RpcConfig,
    ports: RwLock<HashMap<String, Port>>,
    subscription: Mutex<Option<Subscription>>,
}

impl Rpc {
    /// Create a router with default configuration.
    ///
    /// Fails if `participant` contains the id separator.
    pub fn new(participant: impl Into<String>, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_config(participant, transport, RpcConfig::default())
    }

    /// Create a router and subscribe it to the transport.
    pub fn with_config(
        participant: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: RpcConfig,
    ) -> Result<Self> {
        let participant = participant.into();
        id::validate(&participant)?;

        let inner = Arc::new(RpcInner {
            participant,
            transport: Arc::clone(&transport),
            config,
            ports: RwLock::new(HashMap::new()),
            subscription: Mutex::new(None),
        });

        let router = Arc::downgrade(&inner);
        let subscription = transport.on_message(Arc::new(move |packet| {
            if let Some(router) = router.upgrade() {
                router.receive(packet);
            }
        }));
        *inner.subscription.lock() = Some(subscription);

        debug!(participant = %inner.participant, "router ready");
        Ok(Self { inner })
    }

    pub fn participant(&self) -> &str {
        &self.inner.participant
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Serve `implementation` on endpoint `name`, replacing any previous
    /// implementation there.
    pub fn register(&self, name: &str, implementation: Implementation) -> Result<Port> {
        let port = self.inner.port(name)?;
        port.set_implementation(implementation);
        info!(participant = %self.inner.participant, endpoint = name, "registered endpoint");
        Ok(port)
    }

    /// A proxy for calling endpoint `name` on the other side.
    pub fn acquire(&self, name: &str) -> Result<Proxy> {
        Ok(Proxy::new(self.inner.port(name)?))
    }

    /// Route one inbound packet. For transports without an inbound side,
    /// forward packets here by hand.
    pub fn receive(&self, packet: Packet) {
        self.inner.receive(packet);
    }

    /// The endpoint `name`, if it exists.
    pub fn port(&self, name: &str) -> Option<Port> {
        self.inner.ports.read().get(name).cloned()
    }

    /// Names of the endpoints created so far, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.ports.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop listening and close the shared transport. Endpoints stay in
    /// place; calls still waiting for a return never settle unless a
    /// deadline is configured.
    pub fn close(&self) -> Result<()> {
        self.inner.subscription.lock().take();
        self.inner.transport.close()?;
        debug!(participant = %self.inner.participant, "router closed");
        Ok(())
    }
}

impl std::fmt::Debug for Rpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rpc")
            .field("participant", &self.inner.participant)
            .field("endpoints", &self.endpoints())
            .finish()
    }
}

impl RpcInner {
    fn port(&self, name: &str) -> Result<Port> {
        id::validate(name)?;
        if let Some(port) = self.ports.read().get(name) {
            return Ok(port.clone());
        }
        let mut ports = self.ports.write();
        let port = ports.entry(name.to_string()).or_insert_with(|| {
            Port::new(
                &self.participant,
                name,
                Arc::clone(&self.transport),
                self.config.clone(),
            )
        });
        Ok(port.clone())
    }

    fn receive(&self, packet: Packet) {
        let Packet { data, transfer } = packet;
        let message = match Message::from_json(data) {
            Ok(message) => message,
            Err(err) => {
                debug!(error = %err, "dropping malformed message");
                return;
            }
        };

        if message.id.participant != self.participant {
            debug!(
                expected = %self.participant,
                got = %message.id.participant,
                "dropping message for another participant"
            );
            return;
        }

        let port = self.ports.read().get(&message.id.endpoint).cloned();
        match port {
            Some(port) => port.receive(message, transfer),
            None => debug!(endpoint = %message.id.endpoint, "dropping message for unknown endpoint"),
        }
    }
}

#[cfg(test)]
mod tests {
    use ctxrpc_transport::FnTransport;
    use serde_json::json;

    use super::*;
    use crate::error::RpcError;
    use crate::value::Value;

    fn recording_rpc() -> (Rpc, Arc<Mutex<Vec<Packet>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let transport = FnTransport::new(move |packet| {
            sink.lock().push(packet);
            Ok(())
        });
        (Rpc::new("main", Arc::new(transport)).unwrap(), sent)
    }

    #[test]
    fn separator_in_names_fails_before_sending() {
        let transport: Arc<dyn Transport> = Arc::new(FnTransport::new(|_packet| Ok(())));
        assert!(matches!(
            Rpc::new("ma/in", Arc::clone(&transport)),
            Err(RpcError::Wire(_))
        ));

        let (rpc, sent) = recording_rpc();
        assert!(rpc.register("a/b", Implementation::new()).is_err());
        assert!(rpc.acquire("a/b").is_err());
        assert!(rpc.endpoints().is_empty());
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn acquire_and_register_share_the_port() {
        let (rpc, _sent) = recording_rpc();
        let proxy = rpc.acquire("math").unwrap();
        rpc.register("math", Implementation::new().sync_method("sum", |_| Ok(0.into())))
            .unwrap();

        assert_eq!(rpc.endpoints(), vec!["math"]);
        assert!(proxy.port().implementation().contains("sum"));
    }

    #[test]
    fn register_replaces_implementation() {
        let (rpc, _sent) = recording_rpc();
        rpc.register("math", Implementation::new().sync_method("a", |_| Ok(Value::Null)))
            .unwrap();
        rpc.register("math", Implementation::new().sync_method("b", |_| Ok(Value::Null)))
            .unwrap();
        assert_eq!(rpc.port("math").unwrap().implementation().names(), vec!["b"]);
    }

    #[tokio::test]
    async fn malformed_and_misaddressed_packets_are_dropped() {
        let (rpc, sent) = recording_rpc();
        rpc.register("math", Implementation::new().sync_method("sum", |_| Ok(0.into())))
            .unwrap();

        rpc.receive(Packet::new(json!("garbage")));
        rpc.receive(Packet::new(json!({"id": "main/math", "_meta": {"action": "call", "timestamp": 1}})));
        rpc.receive(Packet::new(json!({
            "id": "other/math/a1", "_meta": {"action": "call", "timestamp": 1},
            "method": "sum", "params": []
        })));
        rpc.receive(Packet::new(json!({
            "id": "main/nowhere/a2", "_meta": {"action": "call", "timestamp": 1},
            "method": "sum", "params": []
        })));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn close_closes_transport() {
        let (rpc, sent) = recording_rpc();
        rpc.close().unwrap();
        let proxy = rpc.acquire("math").unwrap();
        assert!(matches!(
            proxy.start("sum", vec![]).err(),
            Some(RpcError::Transport(_))
        ));
        assert!(sent.lock().is_empty());
    }
}
