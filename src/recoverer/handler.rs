use std::{any::Any, fmt};

use crate::{Envelope, MessageProperties, cause::Cause, headers::Headers};

/// Plugin invoked for every message being dead-lettered.
///
/// Handlers run in registration order, after the diagnostic headers are set
/// and before the message is republished. A handler returning an error or
/// panicking is reported and skipped; it never stops recovery.
#[async_trait::async_trait]
pub trait FailureHandler<M>: Send + Sync {
    /// Identity used when reporting a failure of this handler.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(
        &self,
        envelope: &Envelope<MessageProperties, M>,
        cause: Option<&Cause>,
    ) -> Result<(), tower::BoxError>;
}

/// Why a failure handler did not complete.
#[derive(Debug)]
pub enum HandlerFault {
    /// The handler returned an error.
    Failed(tower::BoxError),
    /// The handler panicked, with the panic message when it had one.
    Panicked(String),
}

impl HandlerFault {
    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        HandlerFault::Panicked(message)
    }
}

impl fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerFault::Failed(err) => write!(f, "Handler failed: {err}"),
            HandlerFault::Panicked(msg) => write!(f, "Handler panicked: {msg}"),
        }
    }
}

impl std::error::Error for HandlerFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HandlerFault::Failed(err) => Some(err.as_ref()),
            HandlerFault::Panicked(_) => None,
        }
    }
}

/// Extension point adding domain specific headers to a dead letter.
///
/// The returned entries are merged into the message headers after the
/// diagnostic headers, replacing entries with the same name. Entries not
/// mentioned are left alone.
pub trait AdditionalHeaders<M>: Send + Sync {
    fn additional_headers(
        &self,
        envelope: &Envelope<MessageProperties, M>,
        cause: Option<&Cause>,
    ) -> Headers;
}

/// Adds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdditionalHeaders;

impl<M> AdditionalHeaders<M> for NoAdditionalHeaders {
    fn additional_headers(
        &self,
        envelope: &Envelope<MessageProperties, M>,
        cause: Option<&Cause>,
    ) -> Headers {
        tracing::info!(
            queue = %envelope.headers.consumer_queue,
            cause = cause.map(tracing::field::display),
            "No additional headers added"
        );
        Headers::new()
    }
}

/// [`AdditionalHeaders`] backed by a closure, see [`headers_fn`].
#[derive(Clone)]
pub struct HeadersFn<F>(F);

/// Use a closure as the [`AdditionalHeaders`] extension point.
pub fn headers_fn<F, M>(f: F) -> HeadersFn<F>
where
    F: Fn(&Envelope<MessageProperties, M>, Option<&Cause>) -> Headers + Send + Sync,
{
    HeadersFn(f)
}

impl<F, M> AdditionalHeaders<M> for HeadersFn<F>
where
    F: Fn(&Envelope<MessageProperties, M>, Option<&Cause>) -> Headers + Send + Sync,
{
    fn additional_headers(
        &self,
        envelope: &Envelope<MessageProperties, M>,
        cause: Option<&Cause>,
    ) -> Headers {
        (self.0)(envelope, cause)
    }
}
