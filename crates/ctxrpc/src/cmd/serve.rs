use std::path::Path;
use std::sync::Arc;

use ctxrpc_port::{Implementation, Rpc, RpcError, Value};
use ctxrpc_transport::StreamTransport;
use ctxrpc_wire::ErrorDescriptor;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::cmd::{runtime, ServeArgs};
use crate::exit::{io_error, CliError, CliResult, INTERNAL, SUCCESS};

pub const DEMO_ENDPOINT: &str = "demo";

/// Server-defined code returned by `demo.fail`.
pub const DEMO_FAILURE_CODE: i64 = -32001;

pub fn run(args: ServeArgs, participant: &str) -> CliResult<i32> {
    runtime()?.block_on(serve(&args.path, participant))
}

async fn serve(path: &Path, participant: &str) -> CliResult<i32> {
    let listener = UnixListener::bind(path)
        .map_err(|err| io_error(&format!("bind {} failed", path.display()), err))?;
    info!(path = %path.display(), participant, endpoint = DEMO_ENDPOINT, "serving");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => break Err(io_error("accept failed", err)),
                };
                let participant = participant.to_string();
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, &participant).await {
                        warn!(error = %err, "connection ended with error");
                    }
                });
            }
            signal = &mut shutdown => {
                break match signal {
                    Ok(()) => {
                        info!("interrupted, shutting down");
                        Ok(SUCCESS)
                    }
                    Err(err) => Err(CliError::new(
                        INTERNAL,
                        format!("signal handler setup failed: {err}"),
                    )),
                };
            }
        }
    };

    if let Err(err) = std::fs::remove_file(path) {
        debug!(error = %err, "socket file not removed");
    }
    outcome
}

/// One router per client connection, alive until the client hangs up.
async fn serve_connection(stream: UnixStream, participant: &str) -> ctxrpc_port::Result<()> {
    let transport = Arc::new(StreamTransport::new(stream)?);
    let rpc = Rpc::new(participant, transport.clone())?;
    rpc.register(DEMO_ENDPOINT, demo())?;
    debug!("client connected");

    transport.wait_closed().await;
    rpc.close()?;
    debug!("client disconnected");
    Ok(())
}

/// The methods served under [`DEMO_ENDPOINT`].
pub fn demo() -> Implementation {
    Implementation::new()
        .sync_method("echo", |args| Ok(args.into_iter().next().unwrap_or_default()))
        .sync_method("sum", |args| sum(&args))
        .sync_method("upper", |args| match args.first().and_then(Value::as_str) {
            Some(text) => Ok(Value::from(text.to_uppercase())),
            None => Err(RpcError::from(ErrorDescriptor::invalid_params(
                "upper expects a string",
            ))),
        })
        .sync_method("fail", |args| {
            let message = args
                .first()
                .and_then(Value::as_str)
                .unwrap_or("requested failure")
                .to_string();
            Err(RpcError::from(ErrorDescriptor::server(
                DEMO_FAILURE_CODE,
                message,
            )))
        })
}

/// Adds numbers given either as separate arguments or as one array.
fn sum(args: &[Value]) -> ctxrpc_port::Result<Value> {
    let items = match args {
        [Value::Array(array)] => array.to_vec(),
        _ => args.to_vec(),
    };

    let mut whole = 0i64;
    let mut fractional = 0f64;
    let mut integral = true;
    for item in &items {
        match (item.as_i64(), item.as_f64()) {
            (Some(n), _) => whole = whole.saturating_add(n),
            (None, Some(n)) => {
                integral = false;
                fractional += n;
            }
            (None, None) => {
                return Err(RpcError::from(ErrorDescriptor::invalid_params(format!(
                    "sum expects numbers, got {}",
                    item.kind()
                ))))
            }
        }
    }

    if integral {
        Ok(Value::from(whole))
    } else {
        Ok(Value::from(whole as f64 + fractional))
    }
}
