#![doc = include_str!("../README.md")]

pub mod cause;
pub mod config;
pub mod envelope;
pub mod headers;
pub mod recoverer;
pub mod stamper;
pub mod transport;

#[doc(inline)]
pub use cause::Cause;

#[doc(inline)]
pub use config::{Config, ConfigError, DeadLetterConfig, DeadLetterNaming, InfoConfig};

#[doc(inline)]
pub use envelope::{Envelope, MessageProperties};

#[doc(inline)]
pub use headers::{HeaderName, HeaderValue, Headers};

#[doc(inline)]
pub use recoverer::{
    DeadLetterDestination, DeadLetterRecoverer, MessageRecoverer, RecoverError, RecoverErrorKind,
    handler::{AdditionalHeaders, FailureHandler, HandlerFault, NoAdditionalHeaders, headers_fn},
    hook::{DefaultRecovererHook, RecovererHook},
};

#[doc(inline)]
pub use stamper::InfoStamper;

#[doc(inline)]
pub use transport::{Routed, Transport, TransportError, TransportErrorKind};
