use std::sync::Arc;

use dead_letter_office::{
    Cause, Config, DeadLetterRecoverer, Envelope, FailureHandler, HeaderName, InfoStamper,
    MessageProperties, Routed,
    transport::{InMemory, Transport, layers::InfoLayer},
};
use tracing_error::ErrorLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const CONFIG: &str = r#"
[dead_letter]
routing_key_template = "{queue}.dlq"

[dead_letter.exchange]
name = "dlx.exchange"

[info]
application_name = "orders-service"
"#;

#[derive(Debug)]
struct PaymentDeclined;

impl std::fmt::Display for PaymentDeclined {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("payment declined")
    }
}

impl std::error::Error for PaymentDeclined {}

/// Pretends to open an incident ticket.
struct Alerting;

#[async_trait::async_trait]
impl FailureHandler<String> for Alerting {
    async fn handle(
        &self,
        envelope: &Envelope<MessageProperties, String>,
        cause: Option<&Cause>,
    ) -> Result<(), tower::BoxError> {
        tracing::info!(
            queue = %envelope.headers.consumer_queue,
            cause = cause.map(tracing::field::display),
            "Incident opened"
        );
        Ok(())
    }
}

#[tracing::instrument]
fn process(order: &str) -> Result<(), Cause> {
    Err(Cause::new(PaymentDeclined))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .with(ErrorLayer::default())
        .init();

    let config = Config::from_toml_str(CONFIG)?;
    let stamper = config
        .info
        .as_ref()
        .map(InfoStamper::from)
        .unwrap_or_else(|| InfoStamper::new("demo"));

    // Normal producer path: outbound messages get the info header.
    let outbound: InMemory<Routed, String> = InMemory::default();
    let producer = Transport::new(outbound.clone()).layer(InfoLayer::new(stamper));
    producer
        .send(Envelope {
            headers: Routed::new("orders", "orders.created", MessageProperties::default()),
            message: r#"{"order":"A-17"}"#.to_owned(),
        })
        .await?;

    // Failure path: the recoverer republishes headers exactly as recovered.
    let dead_letters: InMemory<Routed, String> = InMemory::default();
    let recoverer = Arc::new(
        DeadLetterRecoverer::new(
            config.dead_letter.clone(),
            Transport::new(dead_letters.clone()),
        )
        .with_handler(Alerting),
    );

    for published in outbound.take_sent_messages().await {
        let mut envelope = Envelope {
            headers: published
                .headers
                .headers
                .with_received_exchange(published.headers.exchange)
                .with_received_routing_key(published.headers.routing_key)
                .with_consumer_queue("orders.process"),
            message: published.message,
        };

        if let Err(cause) = process("A-17") {
            recoverer.recover(&mut envelope, Some(&cause)).await?;
        }
    }

    for dead_letter in dead_letters.sent_messages().await {
        let headers = &dead_letter.headers.headers.headers;
        println!(
            "{} / {} (info: {}): {}",
            dead_letter.headers.exchange,
            dead_letter.headers.routing_key,
            headers
                .get(HeaderName::Info)
                .map(ToString::to_string)
                .unwrap_or_default(),
            headers
                .get(HeaderName::ExceptionStacktrace)
                .map(ToString::to_string)
                .unwrap_or_default()
        );
    }

    Ok(())
}
