//! Dead-letter recovery.
//!
//! Once the consumer-dispatch layer gives up on a message it hands it to a
//! [`DeadLetterRecoverer`], which:
//!
//! - Resolves the dead-letter destination from the consuming queue
//! - Writes diagnostic headers describing the failure
//! - Runs the registered [`FailureHandler`]s, isolating their failures
//! - Republishes the message to the dead-letter exchange, exactly once
//!
//! Send failures are returned to the caller. Handler failures never are; they
//! are reported through the [`RecovererHook`].

pub mod handler;
pub mod hook;

use std::{panic::AssertUnwindSafe, sync::Arc};

use chrono::{DateTime, Utc};
use futures::FutureExt as _;
use tower::Service;
use tracing_error::SpanTrace;

use crate::{
    Envelope, MessageProperties,
    cause::Cause,
    config::{ConfigError, DeadLetterNaming},
    headers::HeaderName,
    transport::{Routed, Transport, TransportError},
};

use handler::{AdditionalHeaders, FailureHandler, HandlerFault, NoAdditionalHeaders};
use hook::{DefaultRecovererHook, RecovererHook};

/// Where a dead letter is republished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterDestination {
    pub exchange: String,
    pub routing_key: String,
}

/// Entry point used by consumer-dispatch machinery once retries are
/// exhausted.
#[async_trait::async_trait]
pub trait MessageRecoverer<M>: Send + Sync {
    async fn recover(
        &self,
        envelope: &mut Envelope<MessageProperties, M>,
        cause: Option<&Cause>,
    ) -> Result<(), RecoverError>;
}

/// Republishes failed messages to a dead-letter exchange.
///
/// Generic parameters:
/// - `M`: Envelope message type
/// - `N`: Dead-letter naming configuration
/// - `T`: Transport service type
/// - `A`: Additional headers extension point
/// - `HK`: Hook implementation for recovery events
///
/// Everything held here is read-only once built; a recoverer can be shared
/// behind an `Arc` and used from concurrent consumers.
pub struct DeadLetterRecoverer<M, N, T, A = NoAdditionalHeaders, HK = DefaultRecovererHook> {
    naming: N,
    transport: Transport<T>,
    handlers: Vec<Arc<dyn FailureHandler<M>>>,
    additional_headers: A,
    hook: HK,
}

impl<M, N, T> DeadLetterRecoverer<M, N, T> {
    /// Create a recoverer without handlers, extra headers, or custom hook.
    pub fn new(naming: N, transport: Transport<T>) -> Self {
        Self {
            naming,
            transport,
            handlers: Vec::new(),
            additional_headers: NoAdditionalHeaders,
            hook: DefaultRecovererHook,
        }
    }
}

impl<M, N, T, A, HK> DeadLetterRecoverer<M, N, T, A, HK> {
    /// Register a failure handler. Handlers run in registration order.
    pub fn with_handler(mut self, handler: impl FailureHandler<M> + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Register already shared failure handlers, keeping their order.
    pub fn with_handlers(
        mut self,
        handlers: impl IntoIterator<Item = Arc<dyn FailureHandler<M>>>,
    ) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Replace the additional headers extension point.
    pub fn with_additional_headers<A2: AdditionalHeaders<M>>(
        self,
        additional_headers: A2,
    ) -> DeadLetterRecoverer<M, N, T, A2, HK> {
        DeadLetterRecoverer {
            naming: self.naming,
            transport: self.transport,
            handlers: self.handlers,
            additional_headers,
            hook: self.hook,
        }
    }

    /// Replace the recovery hook.
    pub fn with_hook<HK2: RecovererHook<M>>(
        self,
        hook: HK2,
    ) -> DeadLetterRecoverer<M, N, T, A, HK2> {
        DeadLetterRecoverer {
            naming: self.naming,
            transport: self.transport,
            handlers: self.handlers,
            additional_headers: self.additional_headers,
            hook,
        }
    }

    pub fn handlers(&self) -> &[Arc<dyn FailureHandler<M>>] {
        &self.handlers
    }
}

impl<M, N, T, A, HK> DeadLetterRecoverer<M, N, T, A, HK>
where
    N: DeadLetterNaming,
{
    /// Dead-letter destination for messages consumed from `queue`.
    pub fn destination_for(&self, queue: &str) -> Result<DeadLetterDestination, ConfigError> {
        Ok(DeadLetterDestination {
            exchange: self.naming.exchange_name()?,
            routing_key: self.naming.routing_key_for(queue)?,
        })
    }
}

impl<M, N, T, A, HK> DeadLetterRecoverer<M, N, T, A, HK>
where
    M: Clone + Send + Sync + 'static,
    N: DeadLetterNaming,
    T: Service<Envelope<Routed, M>> + Clone + Send + Sync + 'static,
    T::Future: Send + 'static,
    T::Error: Into<tower::BoxError>,
    A: AdditionalHeaders<M>,
    HK: RecovererHook<M>,
{
    /// Dead-letter `envelope`.
    ///
    /// The envelope's headers are updated in place and stay updated even
    /// when the final send fails. The destination is resolved before anything
    /// is touched, so a configuration error leaves the envelope unchanged.
    #[tracing::instrument(skip_all, fields(queue = %envelope.headers.consumer_queue))]
    pub async fn recover(
        &self,
        envelope: &mut Envelope<MessageProperties, M>,
        cause: Option<&Cause>,
    ) -> Result<(), RecoverError> {
        let destination = self
            .destination_for(&envelope.headers.consumer_queue)
            .map_err(RecoverError::missing_config)?;
        self.hook.on_recover_start(envelope, &destination);

        let properties = &mut envelope.headers;
        write_diagnostics(properties, cause, Utc::now());
        properties
            .headers
            .insert(HeaderName::DeadLetterExchange, destination.exchange.as_str());
        properties
            .headers
            .insert(HeaderName::DeadLetterQueue, destination.routing_key.as_str());
        if let Some(correlation_id) = properties.headers.get(HeaderName::CorrelationId) {
            properties.correlation_id = Some(correlation_id.to_string());
        }

        let additional = self.additional_headers.additional_headers(envelope, cause);
        envelope.headers.headers.extend(additional);

        self.run_handlers(envelope, cause).await;

        let dead_letter = Envelope {
            headers: Routed::new(
                destination.exchange.as_str(),
                destination.routing_key.as_str(),
                envelope.headers.clone(),
            ),
            message: envelope.message.clone(),
        };
        if let Err(err) = self.transport.send(dead_letter).await {
            self.hook.on_send_error(&destination, &err);
            return Err(RecoverError::send(err));
        }

        self.hook.on_recovered(envelope, &destination, cause);
        Ok(())
    }

    async fn run_handlers(
        &self,
        envelope: &Envelope<MessageProperties, M>,
        cause: Option<&Cause>,
    ) {
        for handler in &self.handlers {
            let fault = match AssertUnwindSafe(handler.handle(envelope, cause))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => HandlerFault::Failed(err),
                Err(panic) => HandlerFault::panicked(panic),
            };
            self.hook.on_handler_error(handler.name(), &fault, cause);
        }
    }
}

#[async_trait::async_trait]
impl<M, N, T, A, HK> MessageRecoverer<M> for DeadLetterRecoverer<M, N, T, A, HK>
where
    M: Clone + Send + Sync + 'static,
    N: DeadLetterNaming,
    T: Service<Envelope<Routed, M>> + Clone + Send + Sync + 'static,
    T::Future: Send + 'static,
    T::Error: Into<tower::BoxError>,
    A: AdditionalHeaders<M>,
    HK: RecovererHook<M>,
{
    async fn recover(
        &self,
        envelope: &mut Envelope<MessageProperties, M>,
        cause: Option<&Cause>,
    ) -> Result<(), RecoverError> {
        DeadLetterRecoverer::recover(self, envelope, cause).await
    }
}

/// Overwrite the failure description headers.
///
/// Without a cause the exception headers are empty strings.
fn write_diagnostics(
    properties: &mut MessageProperties,
    cause: Option<&Cause>,
    recovered_at: DateTime<Utc>,
) {
    let (stacktrace, message, root_cause) = match cause {
        Some(cause) => (cause.report(), cause.message(), cause.root_cause_message()),
        None => Default::default(),
    };

    let headers = &mut properties.headers;
    headers.insert(HeaderName::ExceptionStacktrace, stacktrace);
    headers.insert(HeaderName::ExceptionMessage, message);
    headers.insert(HeaderName::ExceptionRootCauseMessage, root_cause);
    headers.insert(HeaderName::OriginalExchange, properties.received_exchange.as_str());
    headers.insert(HeaderName::OriginalRoutingKey, properties.received_routing_key.as_str());
    headers.insert(HeaderName::OriginalQueue, properties.consumer_queue.as_str());
    headers.insert(HeaderName::RecoverTime, recovered_at);
}

/// Error returned when a message could not be dead-lettered.
#[derive(Debug)]
pub struct RecoverError {
    context: SpanTrace,
    kind: RecoverErrorKind,
}

/// Classification of recovery errors.
#[derive(Debug)]
pub enum RecoverErrorKind {
    /// The dead-letter destination could not be resolved.
    MissingConfig(ConfigError),
    /// Republishing to the dead-letter exchange failed.
    Send(TransportError),
}

impl RecoverError {
    fn missing_config(error: ConfigError) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: RecoverErrorKind::MissingConfig(error),
        }
    }

    fn send(error: TransportError) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: RecoverErrorKind::Send(error),
        }
    }

    pub fn kind(&self) -> &RecoverErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for RecoverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            RecoverErrorKind::MissingConfig(err) => writeln!(f, "Configuration error: {}", err),
            RecoverErrorKind::Send(err) => writeln!(f, "Dead-letter send error: {}", err),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for RecoverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            RecoverErrorKind::MissingConfig(err) => Some(err),
            RecoverErrorKind::Send(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        config::{ConfigErrorKind, DeadLetterConfig},
        headers::{HeaderValue, Headers},
        recoverer::{handler::headers_fn, hook::tests::CapturedLogs},
        stamper::InfoStamper,
        transport::{InMemory, Sender, SenderService, layers::InfoLayer},
    };

    type Body = Vec<u8>;
    type Backend = InMemory<Routed, Body>;

    #[derive(Debug)]
    struct NullPointer(&'static str);

    impl std::fmt::Display for NullPointer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for NullPointer {}

    /// Records calls into a shared log and optionally fails.
    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        outcome: Outcome,
    }

    enum Outcome {
        Succeed,
        Fail,
        Panic,
    }

    #[async_trait::async_trait]
    impl FailureHandler<Body> for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(
            &self,
            envelope: &Envelope<MessageProperties, Body>,
            _cause: Option<&Cause>,
        ) -> Result<(), tower::BoxError> {
            let queue = envelope
                .headers
                .headers
                .get_str(HeaderName::DeadLetterQueue)
                .unwrap_or("<unset>")
                .to_owned();
            self.log.lock().unwrap().push(format!("{}:{}", self.name, queue));
            match self.outcome {
                Outcome::Succeed => Ok(()),
                Outcome::Fail => Err("handler exploded".into()),
                Outcome::Panic => panic!("handler panicked"),
            }
        }
    }

    #[derive(Clone, Default)]
    struct Counting {
        handler_errors: Arc<Mutex<Vec<String>>>,
        send_errors: Arc<AtomicUsize>,
        recovered: Arc<AtomicUsize>,
    }

    impl<M> RecovererHook<M> for Counting {
        fn on_recover_start(&self, _: &Envelope<MessageProperties, M>, _: &DeadLetterDestination) {}

        fn on_handler_error(&self, handler: &str, fault: &HandlerFault, _: Option<&Cause>) {
            self.handler_errors
                .lock()
                .unwrap()
                .push(format!("{handler}: {fault}"));
        }

        fn on_send_error(&self, _: &DeadLetterDestination, _: &TransportError) {
            self.send_errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_recovered(
            &self,
            _: &Envelope<MessageProperties, M>,
            _: &DeadLetterDestination,
            _: Option<&Cause>,
        ) {
            self.recovered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone)]
    struct Unreachable;

    #[async_trait::async_trait]
    impl Sender<Routed, Body> for Unreachable {
        type Error = std::io::Error;

        async fn send(&mut self, _: Envelope<Routed, Body>) -> Result<(), Self::Error> {
            Err(std::io::Error::other("broker unreachable"))
        }
    }

    fn envelope() -> Envelope<MessageProperties, Body> {
        Envelope {
            headers: MessageProperties::default()
                .with_received_exchange("orders")
                .with_received_routing_key("orders.created")
                .with_consumer_queue("orders.process"),
            message: b"{\"id\":1}".to_vec(),
        }
    }

    fn recoverer(
        backend: &Backend,
    ) -> DeadLetterRecoverer<Body, DeadLetterConfig, SenderService<Backend>> {
        DeadLetterRecoverer::new(
            DeadLetterConfig::new("dlx.exchange"),
            Transport::new(backend.clone()),
        )
    }

    #[tokio::test]
    async fn republishes_to_derived_destination() {
        let backend = Backend::default();
        let mut envelope = envelope();
        let cause = Cause::new(NullPointer("boom"));

        recoverer(&backend)
            .recover(&mut envelope, Some(&cause))
            .await
            .unwrap();

        let headers = &envelope.headers.headers;
        assert_eq!(headers.get_str(HeaderName::DeadLetterExchange), Some("dlx.exchange"));
        assert_eq!(headers.get_str(HeaderName::DeadLetterQueue), Some("orders.process.dlq"));
        assert_eq!(headers.get_str(HeaderName::ExceptionMessage), Some("boom"));
        assert_eq!(
            headers.get_str(HeaderName::ExceptionRootCauseMessage),
            Some("NullPointer: boom")
        );
        assert_eq!(headers.get_str(HeaderName::OriginalExchange), Some("orders"));
        assert_eq!(headers.get_str(HeaderName::OriginalRoutingKey), Some("orders.created"));
        assert_eq!(headers.get_str(HeaderName::OriginalQueue), Some("orders.process"));
        assert!(matches!(
            headers.get(HeaderName::RecoverTime),
            Some(HeaderValue::Timestamp(_))
        ));

        let sent = backend.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].headers.exchange, "dlx.exchange");
        assert_eq!(sent[0].headers.routing_key, "orders.process.dlq");
        assert_eq!(sent[0].headers.headers, envelope.headers);
        assert_eq!(sent[0].message, envelope.message);
    }

    #[tokio::test]
    async fn dead_letter_is_not_stamped_by_producer_layer() {
        let backend = Backend::default();
        let producer = Transport::new(backend.clone())
            .layer(InfoLayer::new(InfoStamper::new("orders-service")));
        producer
            .send(Envelope {
                headers: Routed::new("orders", "orders.created", MessageProperties::default()),
                message: Vec::new(),
            })
            .await
            .unwrap();

        let mut envelope = envelope();
        recoverer(&backend)
            .recover(&mut envelope, Some(&Cause::new(NullPointer("boom"))))
            .await
            .unwrap();

        let sent = backend.sent_messages().await;
        assert_eq!(sent.len(), 2);
        assert!(sent[0].headers.headers.headers.contains(HeaderName::Info));
        assert!(!sent[1].headers.headers.headers.contains(HeaderName::Info));
        assert_eq!(sent[1].headers.headers, envelope.headers);
    }

    #[tokio::test]
    async fn diagnostic_headers_are_empty_without_cause() {
        let backend = Backend::default();
        let mut envelope = Envelope {
            headers: MessageProperties::default(),
            message: Vec::new(),
        };

        recoverer(&backend).recover(&mut envelope, None).await.unwrap();

        let headers = &envelope.headers.headers;
        for name in [
            HeaderName::ExceptionStacktrace,
            HeaderName::ExceptionMessage,
            HeaderName::ExceptionRootCauseMessage,
            HeaderName::OriginalExchange,
            HeaderName::OriginalRoutingKey,
            HeaderName::OriginalQueue,
        ] {
            assert_eq!(headers.get_str(name), Some(""), "{name}");
        }
        assert!(headers.contains(HeaderName::RecoverTime));
        assert_eq!(headers.get_str(HeaderName::DeadLetterQueue), Some(".dlq"));
    }

    #[tokio::test]
    async fn diagnostic_headers_overwrite_previous_failure() {
        let backend = Backend::default();
        let mut envelope = envelope();
        envelope
            .headers
            .headers
            .insert(HeaderName::ExceptionMessage, "old failure");

        recoverer(&backend)
            .recover(&mut envelope, Some(&Cause::new(NullPointer("new failure"))))
            .await
            .unwrap();

        assert_eq!(
            envelope.headers.headers.get_str(HeaderName::ExceptionMessage),
            Some("new failure")
        );
    }

    #[tokio::test]
    async fn correlation_id_header_is_propagated() {
        let backend = Backend::default();
        let mut envelope = envelope();
        envelope.headers.correlation_id = Some("stale".into());
        envelope
            .headers
            .headers
            .insert(HeaderName::CorrelationId, "order-42");

        recoverer(&backend).recover(&mut envelope, None).await.unwrap();

        assert_eq!(envelope.headers.correlation_id.as_deref(), Some("order-42"));
        let sent = backend.sent_messages().await;
        assert_eq!(sent[0].headers.headers.correlation_id.as_deref(), Some("order-42"));
    }

    #[tokio::test]
    async fn correlation_id_is_untouched_without_header() {
        let backend = Backend::default();
        let mut with_id = envelope();
        with_id.headers.correlation_id = Some("kept".into());
        let mut without_id = envelope();

        let recoverer = recoverer(&backend);
        recoverer.recover(&mut with_id, None).await.unwrap();
        recoverer.recover(&mut without_id, None).await.unwrap();

        assert_eq!(with_id.headers.correlation_id.as_deref(), Some("kept"));
        assert_eq!(without_id.headers.correlation_id, None);
    }

    #[tokio::test]
    async fn additional_headers_override_but_never_remove() {
        let backend = Backend::default();
        let mut envelope = envelope();
        envelope.headers.headers.insert("tenant", "acme");

        let recoverer = recoverer(&backend).with_additional_headers(headers_fn(
            |envelope: &Envelope<MessageProperties, Body>, _: Option<&Cause>| {
                let mut extra = Headers::new();
                extra.insert(HeaderName::DeadLetterQueue, "custom.dlq");
                extra.insert("x-retries", envelope.message.len() as i64);
                extra
            },
        ));
        recoverer
            .recover(&mut envelope, Some(&Cause::new(NullPointer("boom"))))
            .await
            .unwrap();

        let headers = &envelope.headers.headers;
        assert_eq!(headers.get_str(HeaderName::DeadLetterQueue), Some("custom.dlq"));
        assert_eq!(headers.get(HeaderName::ExceptionMessage), Some(&HeaderValue::from("boom")));
        assert_eq!(headers.get_str("tenant"), Some("acme"));
        assert_eq!(headers.get("x-retries"), Some(&HeaderValue::Long(8)));

        // routing is fixed before the extension point runs
        let sent = backend.sent_messages().await;
        assert_eq!(sent[0].headers.routing_key, "orders.process.dlq");
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_fan_out_or_send() {
        let backend = Backend::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = Counting::default();

        let recoverer = recoverer(&backend)
            .with_handler(Recording {
                name: "first",
                log: log.clone(),
                outcome: Outcome::Fail,
            })
            .with_handler(Recording {
                name: "second",
                log: log.clone(),
                outcome: Outcome::Succeed,
            })
            .with_hook(hook.clone());

        let mut envelope = envelope();
        recoverer
            .recover(&mut envelope, Some(&Cause::new(NullPointer("boom"))))
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:orders.process.dlq", "second:orders.process.dlq"]
        );
        assert_eq!(
            *hook.handler_errors.lock().unwrap(),
            vec!["first: Handler failed: handler exploded"]
        );
        assert_eq!(backend.sent_messages().await.len(), 1);
        assert_eq!(hook.recovered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_hook_logs_one_entry_per_failing_handler() {
        let backend = Backend::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let recoverer = recoverer(&backend)
            .with_handler(Recording {
                name: "first",
                log: log.clone(),
                outcome: Outcome::Fail,
            })
            .with_handler(Recording {
                name: "second",
                log: log.clone(),
                outcome: Outcome::Succeed,
            });

        let logs = CapturedLogs::default();
        {
            let _guard = logs.install();
            recoverer.recover(&mut envelope(), None).await.unwrap();
        }

        let output = logs.contents();
        assert_eq!(output.matches("Failure handler raised an error").count(), 1);
        assert!(output.contains("handler exploded"));
        assert_eq!(output.matches("Republished failed message").count(), 1);
        assert_eq!(backend.sent_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        let backend = Backend::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = Counting::default();

        let recoverer = recoverer(&backend)
            .with_handler(Recording {
                name: "panics",
                log: log.clone(),
                outcome: Outcome::Panic,
            })
            .with_handler(Recording {
                name: "after",
                log: log.clone(),
                outcome: Outcome::Succeed,
            })
            .with_hook(hook.clone());

        recoverer.recover(&mut envelope(), None).await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(
            *hook.handler_errors.lock().unwrap(),
            vec!["panics: Handler panicked: handler panicked"]
        );
        assert_eq!(backend.sent_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn send_is_attempted_even_when_every_handler_fails() {
        let backend = Backend::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = Counting::default();

        let recoverer = recoverer(&backend)
            .with_handlers([
                Arc::new(Recording {
                    name: "a",
                    log: log.clone(),
                    outcome: Outcome::Fail,
                }) as Arc<dyn FailureHandler<Body>>,
                Arc::new(Recording {
                    name: "b",
                    log: log.clone(),
                    outcome: Outcome::Fail,
                }),
            ])
            .with_hook(hook.clone());

        recoverer.recover(&mut envelope(), None).await.unwrap();

        assert_eq!(recoverer.handlers().len(), 2);
        assert_eq!(hook.handler_errors.lock().unwrap().len(), 2);
        assert_eq!(backend.sent_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn send_failure_propagates_after_handlers_ran() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = Counting::default();
        let recoverer = DeadLetterRecoverer::new(
            DeadLetterConfig::new("dlx.exchange"),
            Transport::new(Unreachable),
        )
        .with_handler(Recording {
            name: "only",
            log: log.clone(),
            outcome: Outcome::Succeed,
        })
        .with_hook(hook.clone());

        let mut envelope = envelope();
        let err = recoverer.recover(&mut envelope, None).await.unwrap_err();

        assert!(matches!(err.kind(), RecoverErrorKind::Send(_)));
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(hook.send_errors.load(Ordering::SeqCst), 1);
        assert_eq!(hook.recovered.load(Ordering::SeqCst), 0);
        // headers stay mutated
        assert!(envelope.headers.headers.contains(HeaderName::DeadLetterExchange));
    }

    #[tokio::test]
    async fn missing_exchange_fails_before_anything_happens() {
        let backend = Backend::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let recoverer = DeadLetterRecoverer::new(
            DeadLetterConfig::default(),
            Transport::new(backend.clone()),
        )
        .with_handler(Recording {
            name: "never",
            log: log.clone(),
            outcome: Outcome::Succeed,
        });

        let mut envelope = envelope();
        let err = recoverer.recover(&mut envelope, None).await.unwrap_err();

        match err.kind() {
            RecoverErrorKind::MissingConfig(config) => {
                assert!(matches!(config.kind(), ConfigErrorKind::MissingExchange))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(log.lock().unwrap().is_empty());
        assert!(backend.sent_messages().await.is_empty());
        assert!(envelope.headers.headers.is_empty());
    }

    #[tokio::test]
    async fn concurrent_recoveries_share_one_recoverer() {
        let backend = Backend::default();
        let recoverer: Arc<dyn MessageRecoverer<Body>> = Arc::new(recoverer(&backend));

        let tasks: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|queue| {
                let recoverer = Arc::clone(&recoverer);
                tokio::spawn(async move {
                    let mut envelope = Envelope {
                        headers: MessageProperties::default().with_consumer_queue(queue),
                        message: Vec::new(),
                    };
                    let cause = Cause::new(NullPointer("boom"));
                    recoverer.recover(&mut envelope, Some(&cause)).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut routing_keys: Vec<_> = backend
            .sent_messages()
            .await
            .into_iter()
            .map(|e| e.headers.routing_key)
            .collect();
        routing_keys.sort();
        assert_eq!(routing_keys, vec!["a.dlq", "b.dlq", "c.dlq"]);
    }
}
