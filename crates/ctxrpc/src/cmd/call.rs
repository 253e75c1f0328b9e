use std::sync::Arc;
use std::time::{Duration, Instant};

use ctxrpc_port::{Rpc, RpcConfig, Value};
use ctxrpc_transport::StreamTransport;
use tracing::debug;

use crate::cmd::{runtime, CallArgs};
use crate::exit::{rpc_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_call, CallOutput, OutputFormat};

pub fn run(args: CallArgs, participant: &str, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let params = parse_params(args.args.as_deref())?;

    let (result, elapsed) = runtime()?.block_on(call(&args, participant, params, timeout))?;
    let out = CallOutput::new(participant, &args.endpoint, &args.method, result, elapsed);
    print_call(&out, format);
    Ok(SUCCESS)
}

async fn call(
    args: &CallArgs,
    participant: &str,
    params: Vec<Value>,
    timeout: Duration,
) -> CliResult<(serde_json::Value, Duration)> {
    let transport = match tokio::time::timeout(timeout, StreamTransport::connect_unix(&args.path)).await
    {
        Ok(connected) => connected.map_err(|err| transport_error("connect failed", err))?,
        Err(_) => {
            return Err(CliError::new(
                TIMEOUT,
                format!("connect timed out after {timeout:?}"),
            ))
        }
    };

    let config = RpcConfig::default().with_call_timeout(timeout);
    let rpc = Rpc::with_config(participant, Arc::new(transport), config)
        .map_err(|err| CliError::new(USAGE, format!("invalid participant: {err}")))?;
    let proxy = rpc
        .acquire(&args.endpoint)
        .map_err(|err| CliError::new(USAGE, format!("invalid endpoint: {err}")))?;

    debug!(endpoint = %args.endpoint, method = %args.method, "calling");
    let started = Instant::now();
    let outcome = proxy.call(&args.method, params).await;
    let elapsed = started.elapsed();
    if let Err(err) = rpc.close() {
        debug!(error = %err, "close failed");
    }

    let result = outcome.map_err(|err| rpc_error("call failed", err))?;
    let json = result
        .to_json()
        .map_err(|err| rpc_error("result cannot be printed", err))?;
    Ok((json, elapsed))
}

fn parse_params(input: Option<&str>) -> CliResult<Vec<Value>> {
    let Some(input) = input else {
        return Ok(Vec::new());
    };
    match serde_json::from_str::<serde_json::Value>(input) {
        Ok(serde_json::Value::Array(items)) => Ok(items.into_iter().map(Value::from_json).collect()),
        Ok(_) => Err(CliError::new(USAGE, "--args must be a JSON array")),
        Err(err) => Err(CliError::new(USAGE, format!("--args is not valid JSON: {err}"))),
    }
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
