//! Two routers over an in-process channel: a "worker" that walks a list and
//! reports progress through a callback supplied by the caller.
//!
//! Run with: `cargo run -p ctxrpc --example callbacks`

use std::sync::Arc;

use ctxrpc::transport::MemoryTransport;
use ctxrpc::{Function, Implementation, Object, Rpc, RpcError, Value};

async fn process(args: Vec<Value>) -> ctxrpc::Result<Value> {
    let mut args = args.into_iter();
    let items = args
        .next()
        .and_then(|items| items.as_array().map(|array| array.to_vec()))
        .ok_or_else(|| RpcError::failed("expected a list of items"))?;
    let progress = args.next().and_then(|f| f.as_function().cloned());

    let report = Object::new();
    let mut total = 0i64;
    for (done, item) in items.iter().enumerate() {
        total += item.as_i64().unwrap_or(0);
        if let Some(progress) = &progress {
            progress.call(vec![Value::from(done + 1), Value::from(items.len())]).await?;
        }
    }
    report.insert("count", items.len());
    report.insert("total", total);
    Ok(report.into())
}

#[tokio::main]
async fn main() -> ctxrpc::Result<()> {
    let (main_side, worker_side) = MemoryTransport::pair();

    let worker = Rpc::new("example", Arc::new(worker_side))?;
    worker.register("jobs", Implementation::new().method("process", process))?;

    let main = Rpc::new("example", Arc::new(main_side))?;
    let jobs = main.acquire("jobs")?;

    let progress = Function::from_sync(|args| {
        let done = args.first().and_then(Value::as_i64).unwrap_or(0);
        let of = args.get(1).and_then(Value::as_i64).unwrap_or(0);
        println!("progress: {done}/{of}");
        Ok(Value::Null)
    });

    let items = Value::from(vec![3.into(), 4.into(), 5.into()]);
    let report = jobs.call("process", vec![items, progress.into()]).await?;
    println!("report: {}", report.to_json()?);

    main.close()?;
    worker.close()?;
    Ok(())
}
