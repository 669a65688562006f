//! The reply model, error kinds, and the `ToRedisArgs`/`FromRedisValue` conversion
//! traits that let callers write `.arg(42)` and `query::<String>()` instead of
//! hand-rolling `Value` plumbing at every call site.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::string::FromUtf8Error;

use strum_macros::Display;

/// A decoded RESP2 reply.
///
/// This is a sum type over the five wire-level reply shapes (§4.1 of the
/// design): simple string, error, integer, bulk string, array. Bulk strings
/// and arrays are nullable on the wire (`$-1\r\n`, `*-1\r\n`), represented
/// here as `Value::Nil`.
#[derive(Clone, PartialEq)]
pub enum Value {
    /// A `+OK\r\n`-style simple string, or any other simple status reply.
    Status(String),
    /// The literal `OK` status, kept distinct so callers can match it cheaply
    /// without allocating/comparing a `String`.
    Okay,
    /// A `:<n>\r\n` integer reply.
    Int(i64),
    /// A `$<len>\r\n<bytes>\r\n` bulk string, decoded as raw bytes.
    Data(Vec<u8>),
    /// A `*<n>\r\n` array of nested replies.
    Bulk(Vec<Value>),
    /// A null bulk string or null array (`$-1\r\n` / `*-1\r\n`).
    Nil,
    /// A server error reply (`-ERR ...\r\n`), already classified into an
    /// `ErrorKind`. Surfaces out of a connection as `Err(RedisError)`; appears
    /// as a `Value` only inside a pipeline's raw result buffer, before
    /// `Pipeline::make_pipeline_results` turns it back into an `Err`.
    ServerError(ServerError),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Status(s) => write!(f, "Status({s:?})"),
            Value::Okay => write!(f, "Okay"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Data(d) => match std::str::from_utf8(d) {
                Ok(s) => write!(f, "Data({s:?})"),
                Err(_) => write!(f, "Data({d:?})"),
            },
            Value::Bulk(items) => write!(f, "Bulk({items:?})"),
            Value::Nil => write!(f, "Nil"),
            Value::ServerError(e) => write!(f, "ServerError({e:?})"),
        }
    }
}

impl Value {
    /// Converts a `Value::ServerError` into an `Err(RedisError)`; leaves
    /// every other variant as `Ok(value)`. Used right before handing a reply
    /// back to the caller that issued the command.
    pub fn extract_error(self) -> RedisResult<Value> {
        match self {
            Value::ServerError(e) => Err(e.into()),
            other => Ok(other),
        }
    }

    /// True for the handful of pub/sub confirmation/push shapes described in
    /// §4.3: a two/three element array whose first element is one of
    /// `message`, `pmessage`, `subscribe`, `unsubscribe`, `psubscribe`,
    /// `punsubscribe`.
    pub fn as_pubsub_kind(&self) -> Option<PubSubKind> {
        let Value::Bulk(items) = self else {
            return None;
        };
        let Some(Value::Data(first)) = items.first() else {
            return None;
        };
        PubSubKind::from_bytes(first)
    }
}

/// Which of the six pub/sub push shapes a reply array represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PubSubKind {
    /// `["message", channel, payload]`
    Message,
    /// `["pmessage", pattern, channel, payload]`
    PMessage,
    /// `["subscribe", channel, count]`
    Subscribe,
    /// `["unsubscribe", channel, count]`
    Unsubscribe,
    /// `["psubscribe", pattern, count]`
    PSubscribe,
    /// `["punsubscribe", pattern, count]`
    PUnsubscribe,
}

impl PubSubKind {
    fn from_bytes(word: &[u8]) -> Option<Self> {
        Some(match word {
            b"message" => PubSubKind::Message,
            b"pmessage" => PubSubKind::PMessage,
            b"subscribe" => PubSubKind::Subscribe,
            b"unsubscribe" => PubSubKind::Unsubscribe,
            b"psubscribe" => PubSubKind::PSubscribe,
            b"punsubscribe" => PubSubKind::PUnsubscribe,
            _ => return None,
        })
    }

    /// Whether this push also completes an in-flight `SUBSCRIBE`/`UNSUBSCRIBE`
    /// command, rather than being purely out-of-band (§4.3).
    pub fn is_confirmation(self) -> bool {
        matches!(
            self,
            PubSubKind::Subscribe
                | PubSubKind::Unsubscribe
                | PubSubKind::PSubscribe
                | PubSubKind::PUnsubscribe
        )
    }
}

/// A decoded server error: the RESP error's leading word (its "kind", e.g.
/// `MOVED`, `ASK`, `ERR`) and the rest of the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerError {
    pub(crate) code: Option<String>,
    pub(crate) detail: String,
}

impl ServerError {
    pub(crate) fn parse(message: &str) -> Self {
        match message.split_once(' ') {
            Some((code, rest)) if code.chars().all(|c| c.is_ascii_uppercase()) && !code.is_empty() => {
                ServerError {
                    code: Some(code.to_string()),
                    detail: rest.to_string(),
                }
            }
            _ => ServerError {
                code: None,
                detail: message.to_string(),
            },
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Stable error classification, per §7 of the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Malformed RESP on the wire; fatal for the connection.
    Protocol,
    /// A generic server-side error reply.
    Reply,
    /// `MOVED <slot> <host>:<port>`.
    Moved,
    /// `ASK <slot> <host>:<port>`.
    Ask,
    /// `TRYAGAIN`.
    TryAgain,
    /// `CLUSTERDOWN`.
    ClusterDown,
    /// `NOSCRIPT`.
    NoScript,
    /// `EXECABORT`.
    ExecAbort,
    /// An in-flight or just-submitted command found no writable stream.
    ConnectionClosed,
    /// The connect phase exceeded `connect_timeout`.
    ConnectTimeout,
    /// `max_retries_per_request` was reached.
    MaxRetries,
    /// `max_redirections` was exhausted while following MOVED/ASK.
    MaxRedirections,
    /// A pipeline's keys span more than one hash slot.
    CrossSlot,
    /// A custom (non-table) command was submitted inside a cluster pipeline.
    CustomInPipeline,
    /// A command not valid in subscriber mode was submitted while subscribed.
    SubscriberMode,
    /// A command not valid in monitor mode was submitted while monitoring.
    MonitorMode,
    /// No cluster node could be reached; carries the last node-level error.
    ClusterAllFailed,
    /// An unrecoverable abort (e.g. `MaxRetries` is always also an abort).
    AbortError,
    /// A reply did not have the shape the caller's `FromRedisValue` expected.
    TypeError,
    /// A config value was invalid (e.g. a zero timeout).
    InvalidClientConfig,
    /// I/O failure underneath the transport.
    IoError,
}

impl ErrorKind {
    /// Classifies a server error's leading word into one of the redirection
    /// or scripting kinds, falling back to `Reply` for anything else.
    pub(crate) fn from_server_error(err: &ServerError) -> ErrorKind {
        match err.code() {
            Some("MOVED") => ErrorKind::Moved,
            Some("ASK") => ErrorKind::Ask,
            Some("TRYAGAIN") => ErrorKind::TryAgain,
            Some("CLUSTERDOWN") => ErrorKind::ClusterDown,
            Some("NOSCRIPT") => ErrorKind::NoScript,
            Some("EXECABORT") => ErrorKind::ExecAbort,
            _ => ErrorKind::Reply,
        }
    }

    /// Whether the router should treat this as a retriable redirection per
    /// §4.9's cluster-aware pipeline retry table.
    pub fn is_cluster_retriable(self) -> bool {
        matches!(
            self,
            ErrorKind::Moved
                | ErrorKind::Ask
                | ErrorKind::TryAgain
                | ErrorKind::ClusterDown
                | ErrorKind::ConnectionClosed
        )
    }
}

/// The error type returned by every fallible operation in this crate.
#[derive(Debug, Clone)]
pub struct RedisError {
    kind: ErrorKind,
    message: String,
    server_error: Option<ServerError>,
    /// Populated when `show_friendly_error_stack` is enabled at submission time.
    caller_stack: Option<String>,
}

impl RedisError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RedisError {
            kind,
            message: message.into(),
            server_error: None,
            caller_stack: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    /// The server error's raw code word (e.g. `"MOVED"`), if this error
    /// originated from a server reply.
    pub fn code(&self) -> Option<&str> {
        self.server_error.as_ref().and_then(|e| e.code())
    }

    pub fn is_cluster_retriable(&self) -> bool {
        self.kind.is_cluster_retriable()
    }

    /// Decorates this error with the caller's submission-time stack, mirroring
    /// `show_friendly_error_stack` in the configuration table (§6).
    pub fn with_caller_stack(mut self, stack: String) -> Self {
        self.caller_stack = Some(stack);
        self
    }

    pub fn caller_stack(&self) -> Option<&str> {
        self.caller_stack.as_deref()
    }

    /// Parses a MOVED/ASK error's `<slot> <host>:<port>` payload.
    pub fn redirect_target(&self) -> Option<(u16, String)> {
        if !matches!(self.kind, ErrorKind::Moved | ErrorKind::Ask) {
            return None;
        }
        let detail = self.server_error.as_ref()?.detail();
        let mut parts = detail.split_whitespace();
        let slot: u16 = parts.next()?.parse().ok()?;
        let addr = parts.next()?.to_string();
        Some((slot, addr))
    }
}

impl fmt::Display for RedisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for RedisError {}

impl From<ServerError> for RedisError {
    fn from(err: ServerError) -> Self {
        let kind = ErrorKind::from_server_error(&err);
        let message = err.detail.clone();
        RedisError {
            kind,
            message,
            server_error: Some(err),
            caller_stack: None,
        }
    }
}

impl From<(ErrorKind, &'static str)> for RedisError {
    fn from((kind, msg): (ErrorKind, &'static str)) -> Self {
        RedisError::new(kind, msg)
    }
}

impl From<(ErrorKind, &'static str, String)> for RedisError {
    fn from((kind, msg, detail): (ErrorKind, &'static str, String)) -> Self {
        RedisError::new(kind, format!("{msg}: {detail}"))
    }
}

impl From<io::Error> for RedisError {
    fn from(err: io::Error) -> Self {
        RedisError::new(ErrorKind::IoError, err.to_string())
    }
}

impl From<FromUtf8Error> for RedisError {
    fn from(err: FromUtf8Error) -> Self {
        RedisError::new(ErrorKind::TypeError, err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type RedisResult<T> = Result<T, RedisError>;

/// How bulk-string/array replies should be decoded for a given command:
/// as UTF-8 text (optionally stringifying out-of-range integers) or as raw
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyEncoding {
    #[default]
    Text,
    Binary,
}

/// Values beyond this magnitude lose precision when represented as `f64`,
/// and per §4.1 must be stringified when `stringify_numbers` is set.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_992; // 2^53

/// Recursively converts any `Value::Int` outside of `±MAX_SAFE_INTEGER` into
/// its decimal string form, leaving everything else untouched. Used by the
/// `stringify_numbers` client option (§4.1) so large integers survive a round
/// trip through languages whose native number type is an `f64`.
pub fn stringify_large_integers(value: Value) -> Value {
    match value {
        Value::Int(n) if n > MAX_SAFE_INTEGER || n < -MAX_SAFE_INTEGER => Value::Data(n.to_string().into_bytes()),
        Value::Bulk(items) => Value::Bulk(items.into_iter().map(stringify_large_integers).collect()),
        other => other,
    }
}

/// Converts a single Rust value into one or more RESP command arguments.
pub trait ToRedisArgs {
    fn write_redis_args(&self, out: &mut Vec<Vec<u8>>);

    fn to_redis_args(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        self.write_redis_args(&mut out);
        out
    }

    /// Most scalar types produce exactly one argument; collections override
    /// this to `false` so `Cmd::arg` can flatten them.
    fn is_single_arg(&self) -> bool {
        true
    }
}

macro_rules! impl_to_redis_args_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToRedisArgs for $ty {
                fn write_redis_args(&self, out: &mut Vec<Vec<u8>>) {
                    out.push(self.to_string().into_bytes());
                }
            }
        )*
    };
}

impl_to_redis_args_display!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool);

impl ToRedisArgs for String {
    fn write_redis_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.clone().into_bytes());
    }
}

impl ToRedisArgs for str {
    fn write_redis_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_bytes().to_vec());
    }
}

impl ToRedisArgs for &str {
    fn write_redis_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_bytes().to_vec());
    }
}

impl ToRedisArgs for Vec<u8> {
    fn write_redis_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.clone());
    }
}

impl ToRedisArgs for &[u8] {
    fn write_redis_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.to_vec());
    }
}

impl<T: ToRedisArgs> ToRedisArgs for Vec<T> {
    fn write_redis_args(&self, out: &mut Vec<Vec<u8>>) {
        for item in self {
            item.write_redis_args(out);
        }
    }

    fn is_single_arg(&self) -> bool {
        false
    }
}

impl<T: ToRedisArgs> ToRedisArgs for &[T] {
    fn write_redis_args(&self, out: &mut Vec<Vec<u8>>) {
        for item in self.iter() {
            item.write_redis_args(out);
        }
    }

    fn is_single_arg(&self) -> bool {
        false
    }
}

impl<T: ToRedisArgs> ToRedisArgs for Option<T> {
    fn write_redis_args(&self, out: &mut Vec<Vec<u8>>) {
        if let Some(value) = self {
            value.write_redis_args(out);
        }
    }
}

/// Converts a decoded `Value` (or a full pipeline's `Value::Bulk`) back into
/// a Rust type the caller asked for.
pub trait FromRedisValue: Sized {
    fn from_redis_value(value: &Value) -> RedisResult<Self>;

    fn from_owned_redis_value(value: Value) -> RedisResult<Self> {
        Self::from_redis_value(&value)
    }
}

fn type_error(value: &Value, expected: &'static str) -> RedisError {
    RedisError::new(
        ErrorKind::TypeError,
        format!("expected {expected}, got {value:?}"),
    )
}

impl FromRedisValue for Value {
    fn from_redis_value(value: &Value) -> RedisResult<Self> {
        Ok(value.clone())
    }
    fn from_owned_redis_value(value: Value) -> RedisResult<Self> {
        Ok(value)
    }
}

impl FromRedisValue for () {
    fn from_redis_value(_value: &Value) -> RedisResult<Self> {
        Ok(())
    }
}

impl FromRedisValue for String {
    fn from_redis_value(value: &Value) -> RedisResult<Self> {
        match value {
            Value::Data(bytes) => Ok(String::from_utf8(bytes.clone())?),
            Value::Status(s) => Ok(s.clone()),
            Value::Okay => Ok("OK".to_string()),
            Value::Int(i) => Ok(i.to_string()),
            _ => Err(type_error(value, "a string-compatible reply")),
        }
    }
}

macro_rules! impl_from_redis_value_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromRedisValue for $ty {
                fn from_redis_value(value: &Value) -> RedisResult<Self> {
                    match value {
                        Value::Int(i) => <$ty>::try_from(*i)
                            .map_err(|_| type_error(value, "an integer in range")),
                        Value::Data(bytes) => std::str::from_utf8(bytes)
                            .ok()
                            .and_then(|s| s.parse().ok())
                            .ok_or_else(|| type_error(value, "an integer-compatible reply")),
                        Value::Status(s) => s
                            .parse()
                            .map_err(|_| type_error(value, "an integer-compatible reply")),
                        _ => Err(type_error(value, "an integer-compatible reply")),
                    }
                }
            }
        )*
    };
}

impl_from_redis_value_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl FromRedisValue for bool {
    fn from_redis_value(value: &Value) -> RedisResult<Self> {
        match value {
            Value::Int(0) => Ok(false),
            Value::Int(_) => Ok(true),
            Value::Okay | Value::Status(_) => Ok(true),
            Value::Nil => Ok(false),
            _ => Err(type_error(value, "a boolean-compatible reply")),
        }
    }
}

impl<T: FromRedisValue> FromRedisValue for Option<T> {
    fn from_redis_value(value: &Value) -> RedisResult<Self> {
        match value {
            Value::Nil => Ok(None),
            other => T::from_redis_value(other).map(Some),
        }
    }
}

impl<T: FromRedisValue> FromRedisValue for Vec<T> {
    fn from_redis_value(value: &Value) -> RedisResult<Self> {
        match value {
            Value::Bulk(items) => items.iter().map(T::from_redis_value).collect(),
            Value::Nil => Ok(Vec::new()),
            _ => Err(type_error(value, "an array reply")),
        }
    }
}

impl<K: FromRedisValue + Eq + std::hash::Hash, V: FromRedisValue> FromRedisValue
    for std::collections::HashMap<K, V>
{
    fn from_redis_value(value: &Value) -> RedisResult<Self> {
        let Value::Bulk(items) = value else {
            return Err(type_error(value, "a flattened key/value array"));
        };
        if items.len() % 2 != 0 {
            return Err(type_error(value, "an even-length key/value array"));
        }
        let mut map = std::collections::HashMap::with_capacity(items.len() / 2);
        let mut iter = items.iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            map.insert(K::from_redis_value(k)?, V::from_redis_value(v)?);
        }
        Ok(map)
    }
}

macro_rules! impl_from_redis_value_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: FromRedisValue),+> FromRedisValue for ($($name,)+) {
            fn from_redis_value(value: &Value) -> RedisResult<Self> {
                let Value::Bulk(items) = value else {
                    return Err(type_error(value, "an array reply matching the tuple arity"));
                };
                let expected = 0 $(+ { let _ = $idx; 1 })+;
                if items.len() != expected {
                    return Err(type_error(value, "an array of matching arity"));
                }
                Ok(($($name::from_redis_value(&items[$idx])?,)+))
            }
        }
    };
}

impl_from_redis_value_tuple!(A: 0);
impl_from_redis_value_tuple!(A: 0, B: 1);
impl_from_redis_value_tuple!(A: 0, B: 1, C: 2);
impl_from_redis_value_tuple!(A: 0, B: 1, C: 2, D: 3);

/// Free function mirroring `FromRedisValue::from_owned_redis_value`, kept for
/// call sites that read more naturally without the trait in scope.
pub fn from_owned_redis_value<T: FromRedisValue>(value: Value) -> RedisResult<T> {
    T::from_owned_redis_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_parses_code_and_detail() {
        let e = ServerError::parse("MOVED 3999 127.0.0.1:6381");
        assert_eq!(e.code(), Some("MOVED"));
        assert_eq!(e.detail(), "3999 127.0.0.1:6381");
    }

    #[test]
    fn server_error_without_code_keeps_full_message() {
        let e = ServerError::parse("no such key");
        assert_eq!(e.code(), None);
        assert_eq!(e.detail(), "no such key");
    }

    #[test]
    fn redis_error_exposes_redirect_target() {
        let err: RedisError = ServerError::parse("MOVED 3999 127.0.0.1:6381").into();
        assert_eq!(err.kind(), ErrorKind::Moved);
        assert_eq!(
            err.redirect_target(),
            Some((3999, "127.0.0.1:6381".to_string()))
        );
    }

    #[test]
    fn from_redis_value_round_trips_strings_and_ints() {
        assert_eq!(
            String::from_redis_value(&Value::Data(b"bar".to_vec())).unwrap(),
            "bar"
        );
        assert_eq!(i64::from_redis_value(&Value::Int(42)).unwrap(), 42);
    }

    #[test]
    fn from_redis_value_hashmap_from_flattened_array() {
        let value = Value::Bulk(vec![
            Value::Data(b"a".to_vec()),
            Value::Int(1),
            Value::Data(b"b".to_vec()),
            Value::Int(2),
        ]);
        let map: std::collections::HashMap<String, i64> =
            FromRedisValue::from_redis_value(&value).unwrap();
        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(map.get("b"), Some(&2));
    }
}
