//! Outbound info header.
//!
//! Every outbound message gets an `info` header holding a small table:
//! the configured static entries, the `application-name` and the
//! `execution-time` of the send. Callers that already attached an `info`
//! header keep theirs untouched.

use chrono::Utc;

use crate::{
    config::InfoConfig,
    headers::{HeaderName, HeaderValue, Headers},
};

/// Stamps the `info` header on outbound messages.
#[derive(Debug, Clone)]
pub struct InfoStamper {
    application_name: String,
    info: Headers,
}

impl InfoStamper {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            info: Headers::new(),
        }
    }

    /// Add a static entry to the info block.
    ///
    /// An entry named `application-name` takes precedence over the
    /// configured application name.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.info.insert(key, value);
        self
    }

    /// Build the info block for one message.
    pub fn info_block(&self) -> Headers {
        let mut block = self.info.clone();
        block.insert_if_absent(HeaderName::ApplicationName, self.application_name.as_str());
        block.insert(HeaderName::ExecutionTime, Utc::now());
        block
    }

    /// Stamp `headers`.
    ///
    /// Returns `true` if the `info` header was set by this call, `false` if
    /// one was already present.
    pub fn stamp(&self, headers: &mut Headers) -> bool {
        if headers.contains(HeaderName::Info) {
            tracing::trace!("Info header already present");
            return false;
        }
        headers.insert(HeaderName::Info, self.info_block());
        true
    }
}

impl From<&InfoConfig> for InfoStamper {
    fn from(config: &InfoConfig) -> Self {
        config
            .headers
            .iter()
            .fold(InfoStamper::new(&config.application_name), |stamper, (k, v)| {
                stamper.with_entry(k.as_str(), v.as_str())
            })
    }
}
