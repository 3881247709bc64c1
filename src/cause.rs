//! The failure that made a consumer give up on a message.

use std::{error::Error, fmt, fmt::Write as _};

use tracing_error::{SpanTrace, SpanTraceStatus};

/// Error that caused a message to be dead-lettered.
///
/// Wraps the consumer's error together with the [`SpanTrace`] active where
/// the `Cause` was built. Build it as close to the failure as possible so the
/// span trace describes the failing consumer.
///
/// The short type name of the wrapped error is kept when it is known
/// statically ([`Cause::new`]); it is lost for already boxed errors
/// ([`Cause::from_boxed`]).
#[derive(Debug)]
pub struct Cause {
    error: tower::BoxError,
    type_name: Option<&'static str>,
    context: SpanTrace,
}

impl Cause {
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            error: Box::new(error),
            type_name: Some(short_type_name(std::any::type_name::<E>())),
            context: SpanTrace::capture(),
        }
    }

    pub fn from_boxed(error: tower::BoxError) -> Self {
        Self {
            error,
            type_name: None,
            context: SpanTrace::capture(),
        }
    }

    /// The wrapped error.
    pub fn error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// Short type name of the wrapped error, if known.
    pub fn type_name(&self) -> Option<&'static str> {
        self.type_name
    }

    pub fn span_trace(&self) -> &SpanTrace {
        &self.context
    }

    /// Display text of the wrapped error.
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    /// Deepest error of the `source()` chain.
    pub fn root_cause(&self) -> &(dyn Error + 'static) {
        self.root_with_depth().0
    }

    /// `"<Type>: <message>"` for the root cause.
    ///
    /// The type label is only available when the root is the wrapped error
    /// itself; deeper sources render as their message alone, since `source()`
    /// erases their type. An empty message renders as the bare type label.
    /// Consumers matching on `x-exception-root-cause-message` should not
    /// expect a `<Type>:` prefix for chained errors.
    pub fn root_cause_message(&self) -> String {
        let (root, depth) = self.root_with_depth();
        let label = if depth == 0 { self.type_name } else { None };
        labelled(label, &root.to_string())
    }

    /// Full textual report: the error, each `Caused by:` source, then the
    /// captured span trace when there is one.
    pub fn report(&self) -> String {
        let mut out = labelled(self.type_name, &self.error.to_string());

        let mut source = self.error.as_ref().source();
        while let Some(err) = source {
            let _ = write!(out, "\nCaused by: {err}");
            source = err.source();
        }

        if self.context.status() == SpanTraceStatus::CAPTURED {
            let _ = write!(out, "\n{}", self.context);
        }
        out
    }

    fn root_with_depth(&self) -> (&(dyn Error + 'static), usize) {
        let mut current: &(dyn Error + 'static) = self.error.as_ref();
        let mut depth = 0;
        while let Some(next) = current.source() {
            current = next;
            depth += 1;
        }
        (current, depth)
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl From<tower::BoxError> for Cause {
    fn from(error: tower::BoxError) -> Self {
        Cause::from_boxed(error)
    }
}

fn labelled(label: Option<&str>, message: &str) -> String {
    match label {
        Some(label) if message.is_empty() => label.to_owned(),
        Some(label) => format!("{label}: {message}"),
        None => message.to_owned(),
    }
}

/// `"a::b::Error<c::D>"` -> `"Error"`.
fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
