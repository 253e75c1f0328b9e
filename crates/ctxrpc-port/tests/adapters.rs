//! Routers over the stream and broadcast adapters.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ctxrpc_port::{Function, Implementation, Rpc, RpcConfig, Value};
use ctxrpc_transport::{BroadcastHub, StreamTransport};

fn files() -> Implementation {
    Implementation::new()
        .sync_method("size", |args| {
            let size = args.first().and_then(Value::as_bytes).map_or(0, Bytes::len);
            Ok(Value::from(size))
        })
        .method("each", each)
        .sync_method("echo", |args| Ok(args.into_iter().next().unwrap_or_default()))
}

/// Calls the visitor (second argument) once per element of the first.
async fn each(args: Vec<Value>) -> ctxrpc_port::Result<Value> {
    let mut args = args.into_iter();
    let items = args.next().unwrap_or_default();
    let Some(visit) = args.next().and_then(|f| f.as_function().cloned()) else {
        return Ok(Value::Null);
    };
    let items = items.as_array().map(|array| array.to_vec()).unwrap_or_default();
    let mut count = 0i64;
    for item in items {
        visit.call(vec![item]).await?;
        count += 1;
    }
    Ok(Value::from(count))
}

#[tokio::test]
async fn routers_over_a_byte_stream() {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let server = Rpc::new("node", Arc::new(StreamTransport::new(a).unwrap())).unwrap();
    server.register("files", files()).unwrap();
    let client = Rpc::new("node", Arc::new(StreamTransport::new(b).unwrap())).unwrap();
    let proxy = client.acquire("files").unwrap();

    let blob = Bytes::from(vec![1u8; 100_000]);
    let size = proxy.call("size", vec![blob.into()]).await.unwrap();
    assert_eq!(size, Value::from(100_000));

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let visit = Function::from_sync(move |args| {
        log.lock().push(args.first().and_then(Value::as_i64).unwrap_or(-1));
        Ok(Value::Null)
    });
    let items = Value::from(vec![1.into(), 2.into(), 3.into()]);
    let count = proxy.call("each", vec![items, visit.into()]).await.unwrap();
    assert_eq!(count, Value::from(3));
    assert_eq!(*seen.lock(), vec![1, 2, 3]);
}

#[tokio::test]
async fn deeply_nested_argument_over_a_byte_stream() {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let server = Rpc::new("node", Arc::new(StreamTransport::new(a).unwrap())).unwrap();
    server.register("files", files()).unwrap();
    let config = RpcConfig::default().with_call_timeout(Duration::from_secs(5));
    let client = Rpc::with_config("node", Arc::new(StreamTransport::new(b).unwrap()), config).unwrap();
    let proxy = client.acquire("files").unwrap();

    let mut deep = serde_json::json!("bottom");
    for _ in 0..50 {
        deep = serde_json::json!({ "k": deep });
    }
    let echoed = proxy.call("echo", vec![Value::from_json(deep.clone())]).await.unwrap();
    assert_eq!(echoed.to_json().unwrap(), deep);

    let after = proxy.call("echo", vec![Value::from(7)]).await.unwrap();
    assert_eq!(after, Value::from(7));
}

#[tokio::test]
async fn broadcast_members_ignore_endpoints_they_do_not_host() {
    let hub = BroadcastHub::new();
    let server = Rpc::new("tabs", Arc::new(hub.join())).unwrap();
    server.register("files", files()).unwrap();
    let bystander = Rpc::new("tabs", Arc::new(hub.join())).unwrap();
    let config = RpcConfig::default().with_call_timeout(Duration::from_secs(5));
    let client = Rpc::with_config("tabs", Arc::new(hub.join()), config).unwrap();

    let size = client
        .acquire("files")
        .unwrap()
        .call("size", vec![Bytes::from_static(b"four").into()])
        .await
        .unwrap();
    assert_eq!(size, Value::from(4));
    assert!(bystander.endpoints().is_empty());
}
