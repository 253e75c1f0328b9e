use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use ctxrpc_wire::FunctionToken;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use tracing::debug;

use crate::error::{Result, RpcError};
use crate::value::Value;

/// Future returned by every function call.
pub type CallFuture = BoxFuture<'static, Result<Value>>;

type Body = dyn Fn(Vec<Value>) -> CallFuture + Send + Sync;

/// What a remote function proxy needs from the endpoint that created it.
pub trait RemoteLink: Send + Sync {
    /// Call the function registered under `function_id` on the other side.
    fn invoke(&self, function_id: &str, args: Vec<Value>) -> CallFuture;

    /// Tell the other side `function_id` is no longer needed.
    fn release(&self, function_id: &str);
}

/// A callable value.
///
/// Local functions wrap a closure. Remote functions are proxies created when
/// a callback token arrives; calling one sends a call back to the side that
/// owns the real function. Clones share the same function.
#[derive(Clone)]
pub struct Function {
    inner: Arc<Inner>,
}

struct Inner {
    body: Box<Body>,
    remote: Option<RemoteHandle>,
}

impl Function {
    /// Wrap an async closure.
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::from_body(Box::new(move |args| body(args).boxed()), None)
    }

    /// Wrap a synchronous closure. It runs when the function is called, not
    /// when the returned future is polled.
    pub fn from_sync<F>(body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self::from_body(
            Box::new(move |args| future::ready(body(args)).boxed()),
            None,
        )
    }

    pub(crate) fn remote(token: FunctionToken, link: Weak<dyn RemoteLink>) -> Self {
        let id = token.id.clone();
        let invoker = link.clone();
        let body: Box<Body> = Box::new(move |args| match invoker.upgrade() {
            Some(link) => link.invoke(&id, args),
            None => future::ready(Err(RpcError::Closed)).boxed(),
        });
        Self::from_body(
            body,
            Some(RemoteHandle {
                token,
                link,
                released: AtomicBool::new(false),
            }),
        )
    }

    fn from_body(body: Box<Body>, remote: Option<RemoteHandle>) -> Self {
        Self {
            inner: Arc::new(Inner { body, remote }),
        }
    }

    /// Call the function.
    ///
    /// Calling a released remote function fails with
    /// [`RpcError::Released`] without sending anything.
    pub fn call(&self, args: Vec<Value>) -> CallFuture {
        if let Some(remote) = &self.inner.remote {
            if remote.is_released() {
                return future::ready(Err(RpcError::Released(remote.token.id.clone()))).boxed();
            }
        }
        (self.inner.body)(args)
    }

    /// Release a remote function now. The owner drops its registry entry
    /// and later calls through any clone fail. No-op for local functions
    /// and for handles already released.
    pub fn release(&self) {
        if let Some(remote) = &self.inner.remote {
            remote.release();
        }
    }

    pub fn is_remote(&self) -> bool {
        self.inner.remote.is_some()
    }

    /// True once a remote function has been released.
    pub fn is_released(&self) -> bool {
        self.inner
            .remote
            .as_ref()
            .is_some_and(RemoteHandle::is_released)
    }

    /// Registry id on the owning side, for remote functions.
    pub fn remote_id(&self) -> Option<&str> {
        self.inner.remote.as_ref().map(|remote| remote.token.id.as_str())
    }

    /// True if both handles refer to the same function.
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.remote {
            Some(remote) => write!(f, "Function(remote {}/{})", remote.token.scope, remote.token.id),
            None => write!(f, "Function(@{:#x})", self.addr()),
        }
    }
}

/// Lifecycle of a remote function proxy.
///
/// The cleanup notice goes out on explicit release or, failing that, when the
/// last clone of the function is dropped. Never more than once.
struct RemoteHandle {
    token: FunctionToken,
    link: Weak<dyn RemoteLink>,
    released: AtomicBool,
}

impl RemoteHandle {
    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.link.upgrade() {
            Some(link) => link.release(&self.token.id),
            None => debug!(function = %self.token.id, "endpoint gone, skipping cleanup notice"),
        }
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;

    use super::*;

    /// Records invocations and releases instead of sending them anywhere.
    #[derive(Default)]
    pub(crate) struct RecordingLink {
        pub(crate) calls: Mutex<Vec<(String, Vec<Value>)>>,
        pub(crate) released: Mutex<Vec<String>>,
    }

    impl RemoteLink for RecordingLink {
        fn invoke(&self, function_id: &str, args: Vec<Value>) -> CallFuture {
            self.calls.lock().push((function_id.to_string(), args));
            future::ready(Ok(Value::from("remote"))).boxed()
        }

        fn release(&self, function_id: &str) {
            self.released.lock().push(function_id.to_string());
        }
    }

    pub(crate) fn link_to(recorder: &Arc<RecordingLink>) -> Weak<dyn RemoteLink> {
        let link: Arc<dyn RemoteLink> = recorder.clone();
        Arc::downgrade(&link)
    }

    fn token(id: &str) -> FunctionToken {
        FunctionToken {
            scope: "main/math".into(),
            id: id.into(),
        }
    }

    #[tokio::test]
    async fn local_functions_run_their_closure() {
        let add = Function::new(|args: Vec<Value>| async move {
            let total: i64 = args.iter().filter_map(Value::as_i64).sum();
            Ok(Value::from(total))
        });
        assert_eq!(add.call(vec![1.into(), 2.into()]).await.unwrap(), Value::from(3));
        assert!(!add.is_remote());
        add.release();
        assert!(add.call(vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn remote_functions_forward_to_link() {
        let recorder = Arc::new(RecordingLink::default());
        let function = Function::remote(token("f1"), link_to(&recorder));

        let result = function.call(vec![Value::from("x")]).await.unwrap();
        assert_eq!(result, Value::from("remote"));
        let calls = recorder.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "f1");
        assert_eq!(calls[0].1, vec![Value::from("x")]);
    }

    #[tokio::test]
    async fn release_notifies_once_and_blocks_calls() {
        let recorder = Arc::new(RecordingLink::default());
        let function = Function::remote(token("f2"), link_to(&recorder));
        let clone = function.clone();

        function.release();
        clone.release();
        drop(function);
        drop(clone);
        assert_eq!(*recorder.released.lock(), vec!["f2".to_string()]);
    }

    #[tokio::test]
    async fn released_function_refuses_calls() {
        let recorder = Arc::new(RecordingLink::default());
        let function = Function::remote(token("f3"), link_to(&recorder));
        function.release();

        let err = function.call(vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Released(id) if id == "f3"));
        assert!(recorder.calls.lock().is_empty());
    }

    #[test]
    fn dropping_last_clone_sends_cleanup() {
        let recorder = Arc::new(RecordingLink::default());
        let function = Function::remote(token("f4"), link_to(&recorder));
        let clone = function.clone();

        drop(function);
        assert!(recorder.released.lock().is_empty());
        drop(clone);
        assert_eq!(*recorder.released.lock(), vec!["f4".to_string()]);
    }

    #[tokio::test]
    async fn dead_link_fails_with_closed() {
        let recorder = Arc::new(RecordingLink::default());
        let function = Function::remote(token("f5"), link_to(&recorder));
        drop(recorder);
        assert!(matches!(function.call(vec![]).await, Err(RpcError::Closed)));
    }
}
