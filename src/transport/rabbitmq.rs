use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use lapin::{
    BasicProperties,
    message::Delivery,
    options::BasicPublishOptions,
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString},
};
use tokio::sync::Mutex;
use tracing_error::SpanTrace;

use crate::{
    Envelope, MessageProperties,
    headers::{HeaderValue, Headers},
    transport::{Route, Routed, Sender, ToBytes},
};

/// RabbitMQ transport sender.
///
/// Publishes messages through a shared `lapin::Channel`.
///
/// ## Design
///
/// - Exchange and routing key come from the envelope headers ([`Route`])
/// - Envelope headers are mapped to **AMQP message properties**
/// - The message payload is published as bytes using `ToBytes`
///
/// The channel is wrapped in `Arc<Mutex<_>>` because `Sender::send` is async
/// and clones of the sender may publish concurrently.
pub struct RabbitMq<M> {
    /// Shared AMQP channel used for publishing.
    channel: Arc<Mutex<lapin::Channel>>,
    /// Marker for the message type.
    msg: std::marker::PhantomData<M>,
}

impl<M> RabbitMq<M> {
    /// Create a sender publishing on `channel`.
    ///
    /// Enable publisher confirms on the channel beforehand: `send` waits for
    /// the broker confirmation and fails when the broker nacks the message.
    /// Without confirms the publish is reported as sent once written.
    pub fn new(channel: lapin::Channel) -> Self {
        Self {
            channel: Arc::new(Mutex::new(channel)),
            msg: std::marker::PhantomData,
        }
    }
}

impl<M> Clone for RabbitMq<M> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            msg: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<H, M> Sender<H, M> for RabbitMq<M>
where
    H: Route + AmqpProperties + Send + Sync + 'static,
    M: ToBytes + Send + Sync,
{
    type Error = RabbitMqError;

    /// Publish a message to RabbitMQ.
    ///
    /// ## Mapping
    ///
    /// - `Envelope.headers.exchange()` → AMQP exchange
    /// - `Envelope.headers.routing_key()` → AMQP routing key
    /// - `Envelope.headers.basic_properties()` → AMQP properties
    /// - `Envelope.message` → message body
    #[tracing::instrument(skip_all, fields(exchange = envelope.headers.exchange(), routing_key = envelope.headers.routing_key()))]
    async fn send(&mut self, envelope: Envelope<H, M>) -> Result<(), Self::Error> {
        let properties = envelope.headers.basic_properties();

        let channel = self.channel.lock().await;
        let confirmation = channel
            .basic_publish(
                envelope.headers.exchange(),
                envelope.headers.routing_key(),
                BasicPublishOptions::default(),
                envelope.message.to_bytes(),
                properties,
            )
            .await
            .map_err(RabbitMqError::lapin)?
            .await
            .map_err(RabbitMqError::lapin)?;

        check_confirmation(confirmation)
    }
}

/// Map a publisher confirmation to the outcome of the publish.
fn check_confirmation(confirmation: Confirmation) -> Result<(), RabbitMqError> {
    if confirmation.is_nack() {
        return Err(RabbitMqError::nacked());
    }
    Ok(())
}

/// Error returned by the RabbitMQ sender.
#[derive(Debug)]
pub struct RabbitMqError {
    context: SpanTrace,
    kind: RabbitMqErrorKind,
}

/// RabbitMQ sender error kinds.
#[derive(Debug)]
pub enum RabbitMqErrorKind {
    /// Channel or connection failure.
    Lapin(lapin::Error),
    /// The broker refused the message.
    Nacked,
}

impl RabbitMqError {
    fn lapin(err: lapin::Error) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: RabbitMqErrorKind::Lapin(err),
        }
    }

    fn nacked() -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: RabbitMqErrorKind::Nacked,
        }
    }

    pub fn kind(&self) -> &RabbitMqErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for RabbitMqError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            RabbitMqErrorKind::Lapin(err) => writeln!(f, "RabbitMQ error: {err}"),
            RabbitMqErrorKind::Nacked => writeln!(f, "Message nacked by the broker"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for RabbitMqError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            RabbitMqErrorKind::Lapin(err) => Some(err),
            RabbitMqErrorKind::Nacked => None,
        }
    }
}

/// Provides the AMQP properties a message is published with.
pub trait AmqpProperties {
    fn basic_properties(&self) -> BasicProperties;
}

impl AmqpProperties for MessageProperties {
    fn basic_properties(&self) -> BasicProperties {
        let properties = BasicProperties::default().with_headers(to_field_table(&self.headers));
        match &self.correlation_id {
            Some(id) => properties.with_correlation_id(ShortString::from(id.clone())),
            None => properties,
        }
    }
}

impl<H: AmqpProperties> AmqpProperties for Routed<H> {
    fn basic_properties(&self) -> BasicProperties {
        self.headers.basic_properties()
    }
}

impl MessageProperties {
    /// Properties of a message consumed from `consumer_queue`.
    pub fn from_delivery(delivery: &Delivery, consumer_queue: impl Into<String>) -> Self {
        MessageProperties {
            headers: delivery
                .properties
                .headers()
                .as_ref()
                .map(from_field_table)
                .unwrap_or_default(),
            received_exchange: delivery.exchange.as_str().to_owned(),
            received_routing_key: delivery.routing_key.as_str().to_owned(),
            consumer_queue: consumer_queue.into(),
            correlation_id: delivery
                .properties
                .correlation_id()
                .as_ref()
                .map(|id| id.as_str().to_owned()),
        }
    }
}

/// Envelope of a consumed delivery, taking ownership of its body.
pub fn envelope_from_delivery(
    delivery: Delivery,
    consumer_queue: impl Into<String>,
) -> Envelope<MessageProperties, Vec<u8>> {
    let headers = MessageProperties::from_delivery(&delivery, consumer_queue);
    Envelope {
        headers,
        message: delivery.data,
    }
}

/// Convert headers into an AMQP field table.
pub fn to_field_table(headers: &Headers) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(ShortString::from(key.clone()), to_amqp_value(value));
    }
    table
}

/// Convert a header value into an AMQP value.
///
/// Timestamps are written as RFC 3339 strings; AMQP timestamps only carry
/// whole seconds.
pub fn to_amqp_value(value: &HeaderValue) -> AMQPValue {
    match value {
        HeaderValue::Void => AMQPValue::Void,
        HeaderValue::Bool(b) => AMQPValue::Boolean(*b),
        HeaderValue::Long(n) => AMQPValue::LongLongInt(*n),
        HeaderValue::Double(n) => AMQPValue::Double(*n),
        HeaderValue::String(s) => AMQPValue::LongString(LongString::from(s.as_str())),
        HeaderValue::Timestamp(t) => AMQPValue::LongString(LongString::from(
            t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )),
        HeaderValue::Array(values) => AMQPValue::FieldArray(FieldArray::from(
            values.iter().map(to_amqp_value).collect::<Vec<_>>(),
        )),
        HeaderValue::Table(table) => AMQPValue::FieldTable(to_field_table(table)),
    }
}

/// Convert an AMQP field table into headers.
pub fn from_field_table(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .map(|(key, value)| (key.as_str().to_owned(), from_amqp_value(value)))
        .collect()
}

/// Convert an AMQP value into a header value.
pub fn from_amqp_value(value: &AMQPValue) -> HeaderValue {
    match value {
        AMQPValue::Boolean(b) => HeaderValue::Bool(*b),
        AMQPValue::ShortShortInt(n) => HeaderValue::Long(i64::from(*n)),
        AMQPValue::ShortShortUInt(n) => HeaderValue::Long(i64::from(*n)),
        AMQPValue::ShortInt(n) => HeaderValue::Long(i64::from(*n)),
        AMQPValue::ShortUInt(n) => HeaderValue::Long(i64::from(*n)),
        AMQPValue::LongInt(n) => HeaderValue::Long(i64::from(*n)),
        AMQPValue::LongUInt(n) => HeaderValue::Long(i64::from(*n)),
        AMQPValue::LongLongInt(n) => HeaderValue::Long(*n),
        AMQPValue::Float(n) => HeaderValue::Double(f64::from(*n)),
        AMQPValue::Double(n) => HeaderValue::Double(*n),
        AMQPValue::DecimalValue(d) => {
            HeaderValue::Double(f64::from(d.value) / 10f64.powi(i32::from(d.scale)))
        }
        AMQPValue::ShortString(s) => HeaderValue::String(s.as_str().to_owned()),
        AMQPValue::LongString(s) => {
            HeaderValue::String(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        AMQPValue::ByteArray(bytes) => {
            HeaderValue::String(String::from_utf8_lossy(bytes.as_slice()).into_owned())
        }
        AMQPValue::Timestamp(secs) => i64::try_from(*secs)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(HeaderValue::Timestamp)
            .unwrap_or(HeaderValue::Void),
        AMQPValue::FieldArray(values) => {
            HeaderValue::Array(values.as_slice().iter().map(from_amqp_value).collect())
        }
        AMQPValue::FieldTable(table) => HeaderValue::Table(from_field_table(table)),
        AMQPValue::Void => HeaderValue::Void,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use lapin::acker::Acker;

    use super::*;
    use crate::headers::HeaderName;

    fn delivery(properties: BasicProperties) -> Delivery {
        Delivery {
            delivery_tag: 7,
            exchange: "orders".into(),
            routing_key: "orders.created".into(),
            redelivered: true,
            properties,
            data: b"{\"id\":1}".to_vec(),
            acker: Acker::default(),
        }
    }

    #[test]
    fn nacked_publish_is_an_error() {
        let err = check_confirmation(Confirmation::Nack(None)).unwrap_err();
        assert!(matches!(err.kind(), RabbitMqErrorKind::Nacked));
        assert!(err.to_string().starts_with("Message nacked by the broker"));

        assert!(check_confirmation(Confirmation::Ack(None)).is_ok());
        assert!(check_confirmation(Confirmation::NotRequested).is_ok());
    }

    #[test]
    fn delivery_properties_keep_routing_info_and_headers() {
        let mut table = FieldTable::default();
        table.insert(
            "correlation-id".into(),
            AMQPValue::LongString("order-42".into()),
        );
        let properties = BasicProperties::default()
            .with_headers(table)
            .with_correlation_id("amqp-id".into());

        let props = MessageProperties::from_delivery(&delivery(properties), "orders.process");

        assert_eq!(props.received_exchange, "orders");
        assert_eq!(props.received_routing_key, "orders.created");
        assert_eq!(props.consumer_queue, "orders.process");
        assert_eq!(props.correlation_id.as_deref(), Some("amqp-id"));
        assert_eq!(
            props.headers.get_str(HeaderName::CorrelationId),
            Some("order-42")
        );
    }

    #[test]
    fn delivery_without_headers_has_empty_header_map() {
        let envelope = envelope_from_delivery(delivery(BasicProperties::default()), "q");

        assert!(envelope.headers.headers.is_empty());
        assert_eq!(envelope.headers.correlation_id, None);
        assert_eq!(envelope.headers.consumer_queue, "q");
        assert_eq!(envelope.message, b"{\"id\":1}".to_vec());
    }

    #[test]
    fn recover_time_keeps_sub_second_precision() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let value = to_amqp_value(&HeaderValue::Timestamp(at));

        assert_eq!(
            value,
            AMQPValue::LongString(LongString::from("2023-11-14T22:13:20.123456789Z"))
        );
    }

    #[test]
    fn properties_carry_headers_and_correlation_id() {
        let mut properties = MessageProperties::default().with_correlation_id("order-42");
        properties
            .headers
            .insert(HeaderName::DeadLetterQueue, "orders.process.dlq");

        let basic = Routed::new("dlx", "orders.process.dlq", properties).basic_properties();

        assert_eq!(
            basic.correlation_id().as_ref().map(|id| id.as_str()),
            Some("order-42")
        );
        let table = basic.headers().as_ref().unwrap();
        assert_eq!(
            from_field_table(table).get_str(HeaderName::DeadLetterQueue),
            Some("orders.process.dlq")
        );
    }

    #[test]
    fn death_history_is_read_as_array_of_tables() {
        let mut death = FieldTable::default();
        death.insert("queue".into(), AMQPValue::LongString("orders.process".into()));
        death.insert("count".into(), AMQPValue::LongLongInt(3));
        let mut table = FieldTable::default();
        table.insert(
            "x-death".into(),
            AMQPValue::FieldArray(FieldArray::from(vec![AMQPValue::FieldTable(death)])),
        );
        table.insert("flag".into(), AMQPValue::ShortShortUInt(1));

        let headers = from_field_table(&table);

        let Some(HeaderValue::Array(deaths)) = headers.get("x-death") else {
            panic!("x-death is not an array");
        };
        let first = deaths[0].as_table().unwrap();
        assert_eq!(first.get_str("queue"), Some("orders.process"));
        assert_eq!(first.get("count"), Some(&HeaderValue::Long(3)));
        assert_eq!(headers.get("flag"), Some(&HeaderValue::Long(1)));
    }
}
