use crate::{
    Envelope, MessageProperties, cause::Cause, recoverer::DeadLetterDestination,
    recoverer::handler::HandlerFault, transport::TransportError,
};

/// Hook trait for observing recovery events.
///
/// Hooks are invoked synchronously and should avoid heavy or blocking work.
/// Typical use cases include logging, metrics, and alerting.
pub trait RecovererHook<M>: Send + Sync {
    fn on_recover_start(
        &self,
        envelope: &Envelope<MessageProperties, M>,
        destination: &DeadLetterDestination,
    );
    fn on_handler_error(&self, handler: &str, fault: &HandlerFault, cause: Option<&Cause>);
    fn on_send_error(&self, destination: &DeadLetterDestination, error: &TransportError);
    fn on_recovered(
        &self,
        envelope: &Envelope<MessageProperties, M>,
        destination: &DeadLetterDestination,
        cause: Option<&Cause>,
    );
}

/// Default recoverer hook implementation.
///
/// Logs recovery events using `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRecovererHook;

impl<M> RecovererHook<M> for DefaultRecovererHook {
    fn on_recover_start(
        &self,
        _envelope: &Envelope<MessageProperties, M>,
        destination: &DeadLetterDestination,
    ) {
        tracing::debug!(
            exchange = %destination.exchange,
            routing_key = %destination.routing_key,
            "Recovering failed message"
        );
    }

    fn on_handler_error(&self, handler: &str, fault: &HandlerFault, cause: Option<&Cause>) {
        tracing::error!(
            handler,
            error = %fault,
            cause = cause.map(tracing::field::display),
            "Failure handler raised an error"
        );
    }

    fn on_send_error(&self, destination: &DeadLetterDestination, error: &TransportError) {
        tracing::error!(
            exchange = %destination.exchange,
            routing_key = %destination.routing_key,
            ?error,
            "Failed to republish message to dead-letter exchange"
        );
    }

    fn on_recovered(
        &self,
        envelope: &Envelope<MessageProperties, M>,
        destination: &DeadLetterDestination,
        cause: Option<&Cause>,
    ) {
        tracing::warn!(
            exchange = %destination.exchange,
            routing_key = %destination.routing_key,
            message = ?envelope.headers,
            cause = cause.map(tracing::field::display),
            "Republished failed message"
        );
    }
}
