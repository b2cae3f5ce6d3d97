//! Router - resolves a request's route to a handler and replies.
//!
//! Dispatch never fails because of a handler: a missing route becomes a 404
//! reply, a handler error, rejected input or panic becomes a 500, and a
//! handler that hit a transport failure or returned a value that cannot be
//! encoded becomes a 503. Only publishing the
//! reply itself can return an error.
//!
//! # Example
//!
//! ```ignore
//! use rabbitwire::{Endpoint, HandlerError, Router};
//!
//! let mut router = Router::new()
//!     .route("ping", |_req| async { Ok::<_, HandlerError>("pong") })
//!     .service::<Billing>("charge");
//!
//! let mut endpoint = Endpoint::connect(connector).await?;
//! endpoint.queue("billing").await?;
//! endpoint.listen(&mut router).await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::endpoint::{Consumer, DeliveryContext};
use crate::error::{HandlerError, RabbitwireError, Result};
use crate::handler::{Handler, RouteTable, Service};
use crate::protocol::{codes, Payload, Reply, Request};
use crate::transport::BoxFuture;

/// Result of running a request through the route table.
#[derive(Debug)]
pub enum Outcome {
    /// Handler returned a value.
    Success(Value),
    /// No handler for the route.
    NotFound,
    /// Handler failed, see [`HandlerError`].
    Failed(HandlerError),
}

impl Outcome {
    /// Reply status code for this outcome.
    pub fn code(&self) -> u16 {
        match self {
            Outcome::Success(_) => codes::OK,
            Outcome::NotFound => codes::NOT_FOUND,
            Outcome::Failed(e) if e.is_infrastructure() => codes::INFRASTRUCTURE_FAILED,
            Outcome::Failed(_) => codes::HANDLER_FAILED,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Build the reply. Failure data is always null.
    pub fn to_reply(&self) -> Reply {
        match self {
            Outcome::Success(value) => Reply::ok(value.clone()),
            other => Reply::status(other.code()),
        }
    }
}

/// Hook for failed fire-and-forget requests.
pub type ErrorHook = Box<dyn Fn(&Request, &Outcome) + Send + Sync>;

/// Maps routes to handlers and answers requests.
#[derive(Default)]
pub struct Router {
    table: RouteTable,
    on_error: Option<ErrorHook>,
}

impl Router {
    /// Create a router with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an existing route table.
    pub fn from_table(table: RouteTable) -> Self {
        Self {
            table,
            on_error: None,
        }
    }

    /// Route to a closure returning a future.
    pub fn route<F, R, E, Fut>(mut self, route: &str, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        R: Serialize + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.table.register(route, handler);
        self
    }

    /// Route to a [`Service`] type, instantiated per request.
    pub fn service<S: Service>(mut self, route: &str) -> Self {
        self.table.register_service::<S>(route);
        self
    }

    /// Route to a method of `S`, instantiated per request.
    pub fn method<S, M, R, E, Fut>(mut self, route: &str, method: M) -> Self
    where
        S: Default + Send + 'static,
        M: Fn(S, Request) -> Fut + Send + Sync + 'static,
        R: Serialize + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.table.register_method(route, method);
        self
    }

    /// Route to an already-built handler.
    pub fn handler(mut self, route: &str, handler: Arc<dyn Handler>) -> Self {
        self.table.insert(route, handler);
        self
    }

    /// Observe failures of requests that asked for no reply.
    ///
    /// Without a hook such failures are only logged: the sender asked for
    /// no answer, so nothing goes back on the wire.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Outcome) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Run the matching handler without any transport activity.
    ///
    /// The handler runs on its own task so that a panic is caught and turned
    /// into a failure instead of unwinding through the caller.
    pub async fn handle(&self, request: &Request) -> Outcome {
        let Some(handler) = self.table.get(&request.route) else {
            return Outcome::NotFound;
        };

        let request = request.clone();
        let task = tokio::spawn(async move { handler.invoke(request).await });

        match task.await {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(e)) => Outcome::Failed(e),
            Err(e) if e.is_panic() => Outcome::Failed(HandlerError::failed("handler panicked")),
            Err(e) => Outcome::Failed(HandlerError::Infrastructure(RabbitwireError::Transport(
                format!("handler task aborted: {}", e),
            ))),
        }
    }

    /// Handle `request` and publish the reply if one was asked for.
    ///
    /// Returns whether a reply was sent. Errors come only from opening the
    /// reply endpoint or publishing on it.
    pub async fn dispatch(&self, ctx: &DeliveryContext, request: Request) -> Result<bool> {
        let outcome = self.handle(&request).await;

        match &outcome {
            Outcome::Success(_) => {}
            Outcome::NotFound => {
                tracing::warn!("No handler for route '{}' on '{}'", request.route, ctx.queue())
            }
            Outcome::Failed(e) => {
                tracing::warn!("Handler for route '{}' failed: {}", request.route, e)
            }
        }

        let Some(reply_queue) = request.reply_on_queue.as_deref() else {
            if !outcome.is_success() {
                if let Some(hook) = &self.on_error {
                    hook(&request, &outcome);
                }
            }
            return Ok(false);
        };

        let reply = outcome.to_reply();
        let mut endpoint = ctx.reply_to(reply_queue).await?;
        let sent = match endpoint.with(&reply) {
            Ok(endpoint) => endpoint.send("", "").await,
            Err(e) => Err(e),
        };
        let closed = endpoint.close().await;

        if let Err(e) = &sent {
            tracing::error!("Failed to reply on '{}': {}", reply_queue, e);
        }
        sent?;
        closed?;

        tracing::debug!("Replied {} on '{}'", reply.code, reply_queue);
        Ok(true)
    }
}

impl Consumer for Router {
    fn deliver<'a>(
        &'a mut self,
        ctx: &'a mut DeliveryContext,
        payload: Payload,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match payload {
                Payload::Request(request) => self.dispatch(ctx, request).await.map(|_| ()),
                Payload::Reply(reply) => {
                    tracing::warn!(
                        "Router on '{}' ignoring reply with code {}",
                        ctx.queue(),
                        reply.code
                    );
                    Ok(())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::transport::{Connector, MemoryBroker};
    use serde_json::json;
    use std::sync::Mutex;

    fn setup() -> (MemoryBroker, DeliveryContext) {
        let broker = MemoryBroker::new();
        let connector: Arc<dyn Connector> =
            Arc::new(broker.connector(ConnectionConfig::default()).unwrap());
        (broker, DeliveryContext::new(connector, "rpc", 1))
    }

    fn replies(broker: &MemoryBroker, queue: &str) -> Vec<Value> {
        broker
            .published(queue)
            .iter()
            .map(|body| serde_json::from_slice(body).unwrap())
            .collect()
    }

    fn router() -> Router {
        Router::new()
            .route("ping", |_req| async { Ok::<_, HandlerError>("pong") })
            .route("fail", |_req| async {
                Err::<(), _>(HandlerError::failed("intentional"))
            })
            .route("decode", |req: Request| async move {
                let n: u32 = req.data_as()?;
                Ok::<_, HandlerError>(n)
            })
            .route("broker", |_req| async {
                Err::<(), _>(RabbitwireError::Transport("connection reset".into()))
            })
            .route("panic", |_req| async {
                if true {
                    panic!("handler bug");
                }
                Ok::<_, HandlerError>(())
            })
    }

    #[tokio::test]
    async fn test_success_reply() {
        let (broker, ctx) = setup();
        let request = Request::new("ping", Value::Null).reply_on("q1");

        assert!(router().dispatch(&ctx, request).await.unwrap());
        assert_eq!(replies(&broker, "q1"), vec![json!({"code": 200, "data": "pong"})]);
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_not_found_reply() {
        let (broker, ctx) = setup();
        let request = Request::new("missing", Value::Null).reply_on("q1");

        assert!(router().dispatch(&ctx, request).await.unwrap());
        assert_eq!(replies(&broker, "q1"), vec![json!({"code": 404, "data": null})]);
    }

    #[tokio::test]
    async fn test_handler_failure_reply() {
        let (broker, ctx) = setup();
        let request = Request::new("fail", Value::Null).reply_on("q1");

        assert!(router().dispatch(&ctx, request).await.unwrap());
        assert_eq!(replies(&broker, "q1"), vec![json!({"code": 500, "data": null})]);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let (broker, ctx) = setup();
        let request = Request::new("panic", Value::Null).reply_on("q1");

        assert!(router().dispatch(&ctx, request).await.unwrap());
        assert_eq!(replies(&broker, "q1"), vec![json!({"code": 500, "data": null})]);
    }

    #[tokio::test]
    async fn test_bad_input_is_handler_failure() {
        let (broker, ctx) = setup();
        let request = Request::new("decode", json!("not a number")).reply_on("q1");

        assert!(router().dispatch(&ctx, request).await.unwrap());
        assert_eq!(replies(&broker, "q1"), vec![json!({"code": 500, "data": null})]);
    }

    #[tokio::test]
    async fn test_infrastructure_failure_distinguished() {
        let (broker, ctx) = setup();
        let request = Request::new("broker", Value::Null).reply_on("q1");

        assert!(router().dispatch(&ctx, request).await.unwrap());
        assert_eq!(replies(&broker, "q1"), vec![json!({"code": 503, "data": null})]);
    }

    #[tokio::test]
    async fn test_no_reply_queue_no_publish() {
        let (broker, ctx) = setup();
        let router = router();

        for route in ["ping", "missing", "fail"] {
            let sent = router
                .dispatch(&ctx, Request::new(route, Value::Null))
                .await
                .unwrap();
            assert!(!sent);
        }
        assert!(broker.queue_names().is_empty());
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_error_hook_only_for_fire_and_forget_failures() {
        let (_broker, ctx) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let router = router().on_error(move |request, outcome| {
            sink.lock().unwrap().push((request.route.clone(), outcome.code()));
        });

        router.dispatch(&ctx, Request::new("ping", Value::Null)).await.unwrap();
        router.dispatch(&ctx, Request::new("missing", Value::Null)).await.unwrap();
        router.dispatch(&ctx, Request::new("fail", Value::Null)).await.unwrap();
        router
            .dispatch(&ctx, Request::new("fail", Value::Null).reply_on("q1"))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("missing".to_string(), 404), ("fail".to_string(), 500)]
        );
    }

    #[derive(Default)]
    struct Greeter;

    impl Service for Greeter {
        type Output = String;

        async fn invoke(self, request: Request) -> std::result::Result<String, HandlerError> {
            let name: String = request.data_as()?;
            Ok(format!("hello {}", name))
        }
    }

    impl Greeter {
        async fn shout(self, request: Request) -> std::result::Result<String, HandlerError> {
            let name: String = request.data_as()?;
            Ok(format!("HELLO {}", name.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_service_and_method_routes() {
        let router = Router::new()
            .service::<Greeter>("greet")
            .method("shout", Greeter::shout);

        let outcome = router.handle(&Request::new("greet", json!("ann"))).await;
        assert_eq!(outcome.to_reply(), Reply::ok(json!("hello ann")));

        let outcome = router.handle(&Request::new("shout", json!("ann"))).await;
        assert_eq!(outcome.to_reply(), Reply::ok(json!("HELLO ANN")));
    }

    #[test]
    fn test_outcome_codes() {
        assert_eq!(Outcome::Success(Value::Null).code(), 200);
        assert_eq!(Outcome::NotFound.code(), 404);
        assert_eq!(Outcome::Failed(HandlerError::failed("x")).code(), 500);
        assert_eq!(
            Outcome::Failed(RabbitwireError::Transport("down".into()).into()).code(),
            503
        );
    }
}
