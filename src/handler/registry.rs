//! Route table mapping route keys to handlers.
//!
//! Every handler shape is resolved to an `Arc<dyn Handler>` when it is
//! registered, so dispatch never inspects what kind of handler it holds.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::Service;
use crate::codec::JsonCodec;
use crate::error::HandlerError;
use crate::protocol::Request;
use crate::transport::BoxFuture;

/// Result type for handler invocations.
pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// Trait for route handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle a request, producing the reply data.
    fn invoke(&self, request: Request) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that serializes the closure's return value.
pub struct FnHandler<F, R, E, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    R: Serialize + Send + 'static,
    E: Into<HandlerError> + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> (R, E, Fut)>,
}

impl<F, R, E, Fut> FnHandler<F, R, E, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    R: Serialize + Send + 'static,
    E: Into<HandlerError> + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    /// Create a new function handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, R, E, Fut> Handler for FnHandler<F, R, E, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    R: Serialize + Send + 'static,
    E: Into<HandlerError> + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    fn invoke(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        let fut = (self.handler)(request);
        Box::pin(async move {
            let value = fut.await.map_err(Into::into)?;
            JsonCodec::to_value(&value).map_err(HandlerError::Infrastructure)
        })
    }
}

/// Registry mapping route keys to handlers.
#[derive(Default, Clone)]
pub struct RouteTable {
    routes: HashMap<String, Arc<dyn Handler>>,
}

impl RouteTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure for `route`. Re-registering a route replaces it.
    pub fn register<F, R, E, Fut>(&mut self, route: &str, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        R: Serialize + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.insert(route, Arc::new(FnHandler::new(handler)));
    }

    /// Register a [`Service`]; a fresh `S::default()` handles every call.
    pub fn register_service<S: Service>(&mut self, route: &str) {
        self.register(route, |request| S::default().invoke(request));
    }

    /// Register a named method of `S`; a fresh `S::default()` handles every call.
    pub fn register_method<S, M, R, E, Fut>(&mut self, route: &str, method: M)
    where
        S: Default + Send + 'static,
        M: Fn(S, Request) -> Fut + Send + Sync + 'static,
        R: Serialize + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.register(route, move |request| method(S::default(), request));
    }

    /// Register an already-built handler.
    pub fn insert(&mut self, route: &str, handler: Arc<dyn Handler>) {
        if self.routes.insert(route.to_string(), handler).is_some() {
            tracing::debug!("Replaced handler for route '{}'", route);
        }
    }

    /// Get a handler by route.
    pub fn get(&self, route: &str) -> Option<Arc<dyn Handler>> {
        self.routes.get(route).cloned()
    }

    pub fn contains(&self, route: &str) -> bool {
        self.routes.contains_key(route)
    }

    /// Registered routes, sorted.
    pub fn routes(&self) -> Vec<&str> {
        let mut routes: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        routes.sort_unstable();
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
