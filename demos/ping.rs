//! Ping - a router and a caller sharing an in-memory broker.
//!
//! This example demonstrates:
//! - Registering closure and service routes on a [`Router`]
//! - Serving requests with `Endpoint::listen`
//! - Waiting for correlated replies with `catch_reply` and `call`
//!
//! Run with `RUST_LOG=debug cargo run --example ping` to see the queue traffic.

use std::sync::Arc;

use rabbitwire::transport::BoxFuture;
use rabbitwire::{
    ConnectionConfig, Connector, Consumer, DeliveryContext, Endpoint, HandlerError, MemoryBroker,
    Payload, Request, Router, Service,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Deserialize, Debug)]
struct AddInput {
    a: i64,
    b: i64,
}

#[derive(Serialize, Debug)]
struct AddOutput {
    sum: i64,
}

#[derive(Default)]
struct Calculator;

impl Service for Calculator {
    type Output = AddOutput;

    async fn invoke(self, request: Request) -> Result<AddOutput, HandlerError> {
        let input: AddInput = request.data_as()?;
        Ok(AddOutput {
            sum: input.a + input.b,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let broker = MemoryBroker::new();
    let connector: Arc<dyn Connector> = Arc::new(broker.connector(ConnectionConfig::default())?);

    let mut server = Endpoint::connect(connector.clone()).await?;
    server.queue("demo").await?;

    let mut router = Router::new()
        .route("ping", |_req| async { Ok::<_, HandlerError>("pong") })
        .route("shutdown", |_req| async { Ok::<_, HandlerError>(()) })
        .service::<Calculator>("add")
        .on_error(|request, outcome| {
            eprintln!("fire-and-forget '{}' failed with {}", request.route, outcome.code());
        });

    let client = async {
        let mut client = Endpoint::connect(connector.clone()).await?;
        client.queue("demo").await?;

        client
            .catch_reply(|reply| println!("ping -> {} {}", reply.code, reply.data))
            .send("ping", "")
            .await?;

        let reply = client
            .with(&serde_json::json!({"a": 2, "b": 40}))?
            .call("add", "-1")
            .await?;
        println!("add -> {} {}", reply.code, reply.data);

        let reply = client.call("unknown", "").await?;
        println!("unknown -> {}", reply.code);

        // Nobody hears about this failure except the error hook.
        client.send("unknown", "").await?;

        client.send("shutdown", "").await?;
        client.close().await?;
        Ok::<_, rabbitwire::RabbitwireError>(())
    };

    let (served, called) = tokio::join!(serve(&mut server, &mut router), client);
    served?;
    called?;

    server.close().await?;
    println!("queues left: {:?}", broker.queue_names());
    Ok(())
}

/// Serve until a `shutdown` request arrives.
async fn serve(server: &mut Endpoint, router: &mut Router) -> rabbitwire::Result<()> {
    let mut consumer = ShutdownAware { router };
    server.listen(&mut consumer).await
}

struct ShutdownAware<'r> {
    router: &'r mut Router,
}

impl Consumer for ShutdownAware<'_> {
    fn deliver<'a>(
        &'a mut self,
        ctx: &'a mut DeliveryContext,
        payload: Payload,
    ) -> BoxFuture<'a, rabbitwire::Result<()>> {
        if payload.as_request().map(|r| r.route.as_str()) == Some("shutdown") {
            ctx.stop_consuming();
        }
        self.router.deliver(ctx, payload)
    }
}
