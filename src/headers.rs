//! Header names and the header map carried by every message.
//!
//! [`HeaderName`] is the fixed registry of wire keys written by the
//! recoverer and the info stamper. Consumers on the other side of the
//! dead-letter queue match on these exact strings, so they must never change.
//!
//! [`Headers`] is the mutable key/value map attached to a message. Values are
//! [`HeaderValue`]s, a broker-agnostic subset of what AMQP header tables can
//! carry.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    fmt,
    str::FromStr,
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Well-known header keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderName {
    ExceptionStacktrace,
    ExceptionMessage,
    ExceptionRootCauseMessage,
    OriginalExchange,
    OriginalRoutingKey,
    OriginalQueue,
    RecoverTime,
    DeadLetterExchange,
    DeadLetterQueue,
    CorrelationId,
    ApplicationName,
    ExecutionTime,
    Info,
}

impl HeaderName {
    /// Every registered header, in declaration order.
    pub const ALL: [HeaderName; 13] = [
        HeaderName::ExceptionStacktrace,
        HeaderName::ExceptionMessage,
        HeaderName::ExceptionRootCauseMessage,
        HeaderName::OriginalExchange,
        HeaderName::OriginalRoutingKey,
        HeaderName::OriginalQueue,
        HeaderName::RecoverTime,
        HeaderName::DeadLetterExchange,
        HeaderName::DeadLetterQueue,
        HeaderName::CorrelationId,
        HeaderName::ApplicationName,
        HeaderName::ExecutionTime,
        HeaderName::Info,
    ];

    /// The wire-level key.
    pub const fn as_str(self) -> &'static str {
        match self {
            HeaderName::ExceptionStacktrace => "x-exception-stacktrace",
            HeaderName::ExceptionMessage => "x-exception-message",
            HeaderName::ExceptionRootCauseMessage => "x-exception-root-cause-message",
            HeaderName::OriginalExchange => "x-original-exchange",
            HeaderName::OriginalRoutingKey => "x-original-routingKey",
            HeaderName::OriginalQueue => "x-original-queue",
            HeaderName::RecoverTime => "x-recover-time",
            HeaderName::DeadLetterExchange => "x-dead-letter-exchange",
            HeaderName::DeadLetterQueue => "x-dead-letter-queue",
            HeaderName::CorrelationId => "correlation-id",
            HeaderName::ApplicationName => "application-name",
            HeaderName::ExecutionTime => "execution-time",
            HeaderName::Info => "info",
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for HeaderName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<HeaderName> for String {
    fn from(value: HeaderName) -> Self {
        value.as_str().to_owned()
    }
}

/// Returned when parsing a string that is not a registered header key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownHeaderName(pub String);

impl fmt::Display for UnknownHeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown header name: {}", self.0)
    }
}

impl std::error::Error for UnknownHeaderName {}

impl FromStr for HeaderName {
    type Err = UnknownHeaderName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HeaderName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownHeaderName(s.to_owned()))
    }
}

/// A single header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderValue {
    Void,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<HeaderValue>),
    Table(Headers),
}

impl HeaderValue {
    /// Borrow the value as a string slice if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the value as a nested table if it is one.
    pub fn as_table(&self) -> Option<&Headers> {
        match self {
            HeaderValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, HeaderValue::Void)
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Void => Ok(()),
            HeaderValue::Bool(b) => write!(f, "{b}"),
            HeaderValue::Long(n) => write!(f, "{n}"),
            HeaderValue::Double(n) => write!(f, "{n}"),
            HeaderValue::String(s) => f.write_str(s),
            HeaderValue::Timestamp(t) => {
                f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            HeaderValue::Array(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            HeaderValue::Table(t) => {
                f.write_str("{")?;
                for (i, (k, v)) in t.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Long(value)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Double(value)
    }
}

impl From<DateTime<Utc>> for HeaderValue {
    fn from(value: DateTime<Utc>) -> Self {
        HeaderValue::Timestamp(value)
    }
}

impl From<Vec<HeaderValue>> for HeaderValue {
    fn from(value: Vec<HeaderValue>) -> Self {
        HeaderValue::Array(value)
    }
}

impl From<Headers> for HeaderValue {
    fn from(value: Headers) -> Self {
        HeaderValue::Table(value)
    }
}

/// Message header map.
///
/// Keys are unique. Iteration is ordered by key so rendered headers are
/// stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, HeaderValue>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing and returning any previous one.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<HeaderValue>,
    ) -> Option<HeaderValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Insert a value only if the key is not present.
    ///
    /// Returns `true` when the value was inserted.
    pub fn insert_if_absent(
        &mut self,
        key: impl Into<String>,
        value: impl Into<HeaderValue>,
    ) -> bool {
        match self.0.entry(key.into()) {
            Entry::Vacant(entry) => {
                entry.insert(value.into());
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, key: impl AsRef<str>) -> Option<&HeaderValue> {
        self.0.get(key.as_ref())
    }

    /// Shortcut for string-valued headers.
    pub fn get_str(&self, key: impl AsRef<str>) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    pub fn contains(&self, key: impl AsRef<str>) -> bool {
        self.0.contains_key(key.as_ref())
    }

    pub fn remove(&mut self, key: impl AsRef<str>) -> Option<HeaderValue> {
        self.0.remove(key.as_ref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.0.iter()
    }
}

impl<K, V> Extend<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<HeaderValue>,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<HeaderValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        headers.extend(iter);
        headers
    }
}

impl IntoIterator for Headers {
    type Item = (String, HeaderValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, HeaderValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a String, &'a HeaderValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, HeaderValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
