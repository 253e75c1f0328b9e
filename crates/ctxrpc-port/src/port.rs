use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use ctxrpc_transport::{Packet, Transport};
use ctxrpc_wire::{Body, CorrelationId, ErrorDescriptor, Message, Outcome, WireValue};
use futures_util::future;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::RpcConfig;
use crate::deserialize::deserialize;
use crate::error::{Result, RpcError};
use crate::function::{CallFuture, Function, RemoteLink};
use crate::implementation::Implementation;
use crate::serialize::{serialize, Serialized};
use crate::value::Value;

type Completion = oneshot::Sender<Result<Value>>;

/// One named endpoint: a local implementation paired with the shared
/// transport.
///
/// A port issues outbound calls, serves inbound calls from its
/// implementation or from the functions it has handed out, and matches
/// returns to the calls waiting on them. Ports are created by [`crate::Rpc`]
/// and live as long as the router that owns them.
#[derive(Clone)]
pub struct Port {
    inner: Arc<PortInner>,
}

struct PortInner {
    participant: String,
    name: String,
    scope: String,
    transport: Arc<dyn Transport>,
    config: RpcConfig,
    implementation: RwLock<Implementation>,
    /// Functions handed out as tokens, by registry id.
    registry: Mutex<HashMap<String, Function>>,
    /// Outbound calls waiting for a return, by action id.
    pending: Mutex<HashMap<String, Completion>>,
    this: Weak<PortInner>,
}

impl Port {
    /// Names must already be validated.
    pub(crate) fn new(
        participant: &str,
        name: &str,
        transport: Arc<dyn Transport>,
        config: RpcConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| PortInner {
            participant: participant.to_string(),
            name: name.to_string(),
            scope: format!("{participant}/{name}"),
            transport,
            config,
            implementation: RwLock::new(Implementation::new()),
            registry: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            this: this.clone(),
        });
        Self { inner }
    }

    pub fn participant(&self) -> &str {
        &self.inner.participant
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `participant/name`, the scope stamped on tokens this port emits.
    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    /// Replace the local implementation. Pending calls and handed-out
    /// functions are unaffected.
    pub fn set_implementation(&self, implementation: Implementation) {
        *self.inner.implementation.write() = implementation;
    }

    /// A copy of the local implementation.
    pub fn implementation(&self) -> Implementation {
        self.inner.implementation.read().clone()
    }

    /// Start a call to `method` on the other side.
    ///
    /// Everything up to and including the send happens before this returns,
    /// so transport errors surface here. The returned future settles when the
    /// matching return arrives (or the configured deadline passes).
    pub fn invoke_remote(&self, method: &str, args: Vec<Value>) -> Result<CallFuture> {
        self.inner.invoke_remote(method, args)
    }

    /// Handle one decoded inbound message addressed to this port.
    pub fn receive(&self, message: Message, transfer: Vec<Bytes>) {
        self.inner.receive(message, transfer);
    }

    /// Number of functions currently handed out.
    pub fn registry_len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Number of outbound calls waiting for a return.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("scope", &self.inner.scope)
            .field("registry", &self.registry_len())
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl PortInner {
    fn id(&self, action: impl Into<String>) -> CorrelationId {
        CorrelationId {
            participant: self.participant.clone(),
            endpoint: self.name.clone(),
            action: action.into(),
        }
    }

    fn link(&self) -> Weak<dyn RemoteLink> {
        self.this.clone()
    }

    fn send(&self, message: &Message, transfer: Vec<Bytes>) -> Result<()> {
        let data = message.to_json()?;
        trace!(id = %message.id, action = message.action().as_str(), "sending");
        self.transport.send(Packet::with_transfer(data, transfer))?;
        Ok(())
    }

    fn register(&self, functions: Vec<(String, Function)>) -> Vec<String> {
        if functions.is_empty() {
            return Vec::new();
        }
        let ids = functions.iter().map(|(id, _)| id.clone()).collect();
        self.registry.lock().extend(functions);
        ids
    }

    fn unregister(&self, ids: &[String]) {
        let removed: Vec<Function> = {
            let mut registry = self.registry.lock();
            ids.iter().filter_map(|id| registry.remove(id)).collect()
        };
        drop(removed);
    }

    fn invoke_remote(&self, method: &str, args: Vec<Value>) -> Result<CallFuture> {
        let action = Uuid::new_v4().to_string();
        let Serialized {
            values,
            functions,
            transfer,
        } = serialize(&self.scope, &args);
        let registered = self.register(functions);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(action.clone(), tx);

        let message = Message::call(self.id(action.clone()), method, values);
        if let Err(err) = self.send(&message, transfer) {
            self.pending.lock().remove(&action);
            self.unregister(&registered);
            return Err(err);
        }

        let deadline = self.config.call_timeout;
        let port = self.this.clone();
        Ok(async move {
            let settled = match deadline {
                None => rx.await,
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(settled) => settled,
                    Err(_) => {
                        if let Some(port) = port.upgrade() {
                            port.pending.lock().remove(&action);
                        }
                        debug!(action = %action, ?limit, "call timed out");
                        return Err(RpcError::Timeout(limit));
                    }
                },
            };
            settled.unwrap_or(Err(RpcError::Closed))
        }
        .boxed())
    }

    fn receive(&self, message: Message, transfer: Vec<Bytes>) {
        let Message { id, body, .. } = message;
        match body {
            Body::Call { method, params } => self.handle_call(id, method, params, transfer),
            Body::Return(outcome) => self.handle_return(id, outcome, transfer),
            Body::Cleanup => self.handle_cleanup(&id.action),
        }
    }

    fn handle_call(
        &self,
        id: CorrelationId,
        method: String,
        params: Vec<WireValue>,
        transfer: Vec<Bytes>,
    ) {
        let args = match deserialize(params, &transfer, &self.link()) {
            Ok(args) => args,
            Err(err) => {
                debug!(id = %id, error = %err, "undecodable params");
                self.reply(id, Err(RpcError::Remote(ErrorDescriptor::invalid_params(err.to_string()))));
                return;
            }
        };

        let own = self.implementation.read().get(&method);
        let target = match own {
            Some(function) => Some(function),
            None => self.registry.lock().get(&method).cloned(),
        };
        let Some(function) = target else {
            debug!(id = %id, method = %method, "method not found");
            self.reply(id, Err(RpcError::Remote(ErrorDescriptor::method_not_found(&method))));
            return;
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(id = %id, error = %err, "no tokio runtime to run inbound call");
                self.reply(id, Err(RpcError::failed("no async runtime available")));
                return;
            }
        };

        // Synchronous bodies run inside `call`; async bodies inside the future.
        let running = match std::panic::catch_unwind(AssertUnwindSafe(|| function.call(args))) {
            Ok(running) => running,
            Err(panic) => {
                self.reply(id, Err(panicked(panic)));
                return;
            }
        };

        let port = self.this.clone();
        runtime.spawn(async move {
            let outcome = match AssertUnwindSafe(running).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(panicked(panic)),
            };
            match port.upgrade() {
                Some(port) => port.reply(id, outcome),
                None => debug!(id = %id, "endpoint dropped before call finished"),
            }
        });
    }

    /// Send the single return for a call.
    fn reply(&self, id: CorrelationId, outcome: Result<Value>) {
        let (outcome, transfer, registered) = match outcome {
            Ok(value) => {
                let Serialized {
                    values,
                    functions,
                    transfer,
                } = serialize(&self.scope, std::slice::from_ref(&value));
                let result = values.into_iter().next().unwrap_or(WireValue::Null);
                (Outcome::Result(result), transfer, self.register(functions))
            }
            Err(err) => (Outcome::Error(err.to_descriptor()), Vec::new(), Vec::new()),
        };

        let message = Message::reply(id.clone(), outcome);
        let Err(err) = self.send(&message, transfer) else {
            return;
        };
        self.unregister(&registered);
        if !matches!(message.body, Body::Return(Outcome::Result(_))) {
            warn!(id = %id, error = %err, "failed to send error return");
            return;
        }

        // Nothing went out, so an error return still keeps it to one.
        warn!(id = %id, error = %err, "failed to send result, returning error instead");
        let fallback = Message::reply(id.clone(), Outcome::Error(ErrorDescriptor::internal(err.to_string())));
        if let Err(err) = self.send(&fallback, Vec::new()) {
            warn!(id = %id, error = %err, "failed to send error return");
        }
    }

    fn handle_return(&self, id: CorrelationId, outcome: Outcome, transfer: Vec<Bytes>) {
        let Some(completion) = self.pending.lock().remove(&id.action) else {
            debug!(id = %id, "dropping return for unknown call");
            return;
        };

        let settled = match outcome {
            Outcome::Result(value) => deserialize(vec![value], &transfer, &self.link())
                .map(|mut values| values.pop().unwrap_or_default())
                .map_err(RpcError::from),
            Outcome::Error(descriptor) => Err(RpcError::Remote(descriptor)),
        };
        if completion.send(settled).is_err() {
            trace!(id = %id, "caller stopped waiting");
        }
    }

    fn handle_cleanup(&self, function_id: &str) {
        let removed = self.registry.lock().remove(function_id);
        match removed {
            Some(_) => debug!(scope = %self.scope, function = function_id, "released function"),
            None => trace!(scope = %self.scope, function = function_id, "cleanup for unknown function"),
        }
    }
}

impl RemoteLink for PortInner {
    fn invoke(&self, function_id: &str, args: Vec<Value>) -> CallFuture {
        match self.invoke_remote(function_id, args) {
            Ok(call) => call,
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    fn release(&self, function_id: &str) {
        let message = Message::cleanup(self.id(function_id));
        if let Err(err) = self.send(&message, Vec::new()) {
            warn!(scope = %self.scope, function = function_id, error = %err, "failed to send cleanup notice");
        }
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> RpcError {
    let message = if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "function panicked".to_string()
    };
    RpcError::Failed(message)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ctxrpc_transport::FnTransport;
    use serde_json::json;

    use super::*;

    fn recording_port() -> (Port, Arc<Mutex<Vec<Packet>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let transport = FnTransport::new(move |packet| {
            sink.lock().push(packet);
            Ok(())
        });
        let port = Port::new("main", "math", Arc::new(transport), RpcConfig::default());
        (port, sent)
    }

    fn sent_message(sent: &Mutex<Vec<Packet>>, index: usize) -> Message {
        Message::from_json(sent.lock()[index].data.clone()).unwrap()
    }

    async fn wait_for_packets(sent: &Mutex<Vec<Packet>>, count: usize) {
        for _ in 0..200 {
            if sent.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} packets, saw {}", sent.lock().len());
    }

    #[tokio::test]
    async fn outbound_call_registers_callbacks_and_tracks_pending() {
        let (port, sent) = recording_port();
        let callback = Function::from_sync(|_| Ok(Value::Null));

        let _call = port.invoke_remote("run", vec![callback.into()]).unwrap();
        assert_eq!(port.pending_len(), 1);
        assert_eq!(port.registry_len(), 1);

        let message = sent_message(&sent, 0);
        assert_eq!(message.id.participant, "main");
        assert_eq!(message.id.endpoint, "math");
        let Body::Call { method, params } = message.body else {
            panic!("expected a call");
        };
        assert_eq!(method, "run");
        assert!(matches!(params[0], WireValue::Node(ctxrpc_wire::WireNode::Callback(_))));
    }

    #[tokio::test]
    async fn send_failure_surfaces_immediately_and_leaves_no_state() {
        let transport = FnTransport::new(|_packet| Err(ctxrpc_transport::TransportError::Closed));
        let port = Port::new("main", "math", Arc::new(transport), RpcConfig::default());

        let callback = Function::from_sync(|_| Ok(Value::Null));
        let err = port.invoke_remote("run", vec![callback.into()]).err().unwrap();
        assert!(matches!(err, RpcError::Transport(_)));
        assert_eq!(port.pending_len(), 0);
        assert_eq!(port.registry_len(), 0);
    }

    #[tokio::test]
    async fn return_settles_the_matching_call() {
        let (port, sent) = recording_port();
        let call = port.invoke_remote("sum", vec![]).unwrap();
        let id = sent_message(&sent, 0).id;

        port.receive(Message::reply(id, Outcome::Result(WireValue::Number(6.into()))), vec![]);
        assert_eq!(call.await.unwrap(), Value::from(6));
        assert_eq!(port.pending_len(), 0);
    }

    #[tokio::test]
    async fn error_return_rejects_with_descriptor() {
        let (port, sent) = recording_port();
        let call = port.invoke_remote("fail", vec![]).unwrap();
        let id = sent_message(&sent, 0).id;

        let descriptor = ErrorDescriptor::internal("boom").with_stack("at fail");
        port.receive(Message::reply(id, Outcome::Error(descriptor.clone())), vec![]);
        let err = call.await.unwrap_err();
        assert_eq!(err.remote(), Some(&descriptor));
    }

    #[tokio::test]
    async fn unmatched_return_is_ignored() {
        let (port, sent) = recording_port();
        let _call = port.invoke_remote("sum", vec![]).unwrap();

        let stray = CorrelationId::new("main", "math", "no-such-call").unwrap();
        port.receive(Message::reply(stray, Outcome::Result(WireValue::Null)), vec![]);
        assert_eq!(port.pending_len(), 1);
        assert_eq!(sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn inbound_call_gets_one_return() {
        let (port, sent) = recording_port();
        port.set_implementation(Implementation::new().sync_method("double", |args| {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Value::from(n * 2))
        }));

        let id = CorrelationId::new("main", "math", "a1").unwrap();
        port.receive(Message::call(id.clone(), "double", vec![WireValue::Number(21.into())]), vec![]);
        wait_for_packets(&sent, 1).await;

        let reply = sent_message(&sent, 0);
        assert_eq!(reply.id, id);
        assert_eq!(reply.body, Body::Return(Outcome::Result(WireValue::Number(42.into()))));
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let (port, sent) = recording_port();
        let id = CorrelationId::new("main", "math", "a2").unwrap();
        port.receive(Message::call(id, "missing", vec![]), vec![]);

        let reply = sent_message(&sent, 0);
        let Body::Return(Outcome::Error(descriptor)) = reply.body else {
            panic!("expected an error return");
        };
        assert_eq!(descriptor.code, ctxrpc_wire::codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_params_are_invalid_params() {
        let (port, sent) = recording_port();
        port.set_implementation(Implementation::new().sync_method("noop", |_| Ok(Value::Null)));
        let id = CorrelationId::new("main", "math", "a3").unwrap();
        let params = vec![ctxrpc_wire::WireNode::Ref { id: 4 }.into()];
        port.receive(Message::call(id, "noop", params), vec![]);

        let Body::Return(Outcome::Error(descriptor)) = sent_message(&sent, 0).body else {
            panic!("expected an error return");
        };
        assert_eq!(descriptor.code, ctxrpc_wire::codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn cleanup_removes_registry_entry() {
        let (port, sent) = recording_port();
        let callback = Function::from_sync(|_| Ok(Value::Null));
        let _call = port.invoke_remote("run", vec![callback.into()]).unwrap();

        let data = sent.lock()[0].data.clone();
        let function_id = data["params"][0]["id"].as_str().unwrap().to_string();
        port.receive(Message::cleanup(CorrelationId::new("main", "math", function_id).unwrap()), vec![]);
        assert_eq!(port.registry_len(), 0);

        // Absent entries are not an error.
        port.receive(Message::cleanup(CorrelationId::new("main", "math", "gone").unwrap()), vec![]);
        assert_eq!(port.registry_len(), 0);
    }

    #[tokio::test]
    async fn deadline_removes_pending_call() {
        let transport = FnTransport::new(|_packet| Ok(()));
        let config = RpcConfig::default().with_call_timeout(Duration::from_millis(20));
        let port = Port::new("main", "math", Arc::new(transport), config);

        let err = port.invoke_remote("slow", vec![]).unwrap().await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
        assert_eq!(port.pending_len(), 0);
    }

    #[test]
    fn cleanup_message_carries_function_id() {
        let (port, sent) = recording_port();
        RemoteLink::release(port.inner.as_ref(), "fn-9");
        let data = sent.lock()[0].data.clone();
        assert_eq!(data["id"], json!("main/math/fn-9"));
        assert_eq!(data["_meta"]["action"], "cleanup");
        assert_eq!(data.as_object().unwrap().len(), 2);
    }
}
