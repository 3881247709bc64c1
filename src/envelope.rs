use crate::headers::Headers;

/// Message container used by the recovery and delivery pipeline.
///
/// `Envelope` bundles a message payload together with its associated headers.
/// It is intentionally generic and transport-agnostic.
///
/// ## Design
///
/// - `H` represents message metadata. Consumed messages use
///   [`MessageProperties`]; outbound dead letters use
///   [`Routed`](crate::transport::Routed) properties.
/// - `M` represents the actual message payload
///
/// ## Conversion
///
/// `Envelope` implements `From<(H, M)>` for ergonomic construction when headers
/// and payload are already available as a tuple.
///
/// ## Example
///
/// ```rust
/// use dead_letter_office::{Envelope, MessageProperties};
///
/// let properties = MessageProperties::default()
///     .with_received_exchange("orders")
///     .with_consumer_queue("orders.process");
///
/// let envelope: Envelope<_, _> = (properties, b"payload".to_vec()).into();
/// assert_eq!(envelope.headers.consumer_queue, "orders.process");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<H, M> {
    /// Message metadata.
    pub headers: H,
    /// Message payload.
    pub message: M,
}

impl<H, M> From<(H, M)> for Envelope<H, M> {
    fn from(value: (H, M)) -> Self {
        Envelope {
            headers: value.0,
            message: value.1,
        }
    }
}

/// Transport metadata of a consumed message.
///
/// The `received_*` fields and `consumer_queue` describe where the message
/// came from. They are not validated and may be empty when unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    /// Application headers.
    pub headers: Headers,
    /// Exchange the message was published to.
    pub received_exchange: String,
    /// Routing key the message was published with.
    pub received_routing_key: String,
    /// Queue the message was consumed from.
    pub consumer_queue: String,
    /// First-class correlation id property.
    pub correlation_id: Option<String>,
}

impl MessageProperties {
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_received_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.received_exchange = exchange.into();
        self
    }

    pub fn with_received_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.received_routing_key = routing_key.into();
        self
    }

    pub fn with_consumer_queue(mut self, queue: impl Into<String>) -> Self {
        self.consumer_queue = queue.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Mutable access to the header map of a message.
///
/// Implemented by every header type that can pass through the
/// [`InfoLayer`](crate::transport::layers::InfoLayer).
pub trait HeadersMut {
    fn headers_mut(&mut self) -> &mut Headers;
}

impl HeadersMut for Headers {
    fn headers_mut(&mut self) -> &mut Headers {
        self
    }
}

impl HeadersMut for MessageProperties {
    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
}
