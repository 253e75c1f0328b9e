use std::collections::HashMap;
use std::future::Future;

use crate::error::Result;
use crate::function::Function;
use crate::value::Value;

/// The methods an endpoint serves, by name.
///
/// ```
/// use ctxrpc_port::{Implementation, Value};
///
/// let math = Implementation::new()
///     .sync_method("sum", |args| {
///         let total: f64 = args.iter().filter_map(Value::as_f64).sum();
///         Ok(Value::from(total))
///     })
///     .method("echo", |args| async move { Ok(args.into_iter().next().unwrap_or_default()) });
/// assert_eq!(math.names(), vec!["echo", "sum"]);
/// ```
#[derive(Clone, Default)]
pub struct Implementation {
    methods: HashMap<String, Function>,
}

impl Implementation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an async method.
    pub fn method<F, Fut>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.with(name, Function::new(body))
    }

    /// Add a synchronous method.
    pub fn sync_method<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.with(name, Function::from_sync(body))
    }

    /// Add an existing function as a method.
    pub fn with(mut self, name: impl Into<String>, function: Function) -> Self {
        self.insert(name, function);
        self
    }

    /// Add or replace a method, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, function: Function) -> Option<Function> {
        self.methods.insert(name.into(), function)
    }

    pub fn get(&self, name: &str) -> Option<Function> {
        self.methods.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Method names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for Implementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Implementation")
            .field("methods", &self.names())
            .finish()
    }
}
