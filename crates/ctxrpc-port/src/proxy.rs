use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::function::{CallFuture, Function};
use crate::port::Port;
use crate::value::Value;

/// Calls methods on the endpoint of the same name on the other side.
#[derive(Clone, Debug)]
pub struct Proxy {
    port: Port,
}

impl Proxy {
    pub(crate) fn new(port: Port) -> Self {
        Self { port }
    }

    /// The endpoint name this proxy calls into.
    pub fn endpoint(&self) -> &str {
        self.port.name()
    }

    /// The local port backing this proxy.
    pub fn port(&self) -> &Port {
        &self.port
    }

    /// Send the call now and return a future for its result. A transport
    /// failure is returned here, before anything is awaited.
    pub fn start(&self, method: &str, args: Vec<Value>) -> Result<CallFuture> {
        self.port.invoke_remote(method, args)
    }

    /// Call `method` and wait for its result.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.start(method, args)?.await
    }

    /// Call `method` and convert the result into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T> {
        self.call(method, args).await?.deserialize_into()
    }

    /// `method` as a first-class function, e.g. to pass along as a callback.
    pub fn method(&self, name: &str) -> Function {
        let port = self.port.clone();
        let name = name.to_string();
        Function::new(move |args| {
            let started = port.invoke_remote(&name, args);
            async move {
                match started {
                    Ok(call) => call.await,
                    Err(err) => Err(err),
                }
            }
        })
    }
}
