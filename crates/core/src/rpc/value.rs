//! Lenient views over the `xmlrpc` value model.
//!
//! rTorrent answers some numeric commands with strings and reports flags as
//! `i8`, so the strict accessors on [`Value`] are not enough on their own.

pub use xmlrpc::Value;

/// rTorrent-flavoured accessors for [`Value`].
pub trait ValueExt {
    /// Integer view over `i4`, `i8`, booleans and numeric strings.
    fn as_integer(&self) -> Option<i64>;

    /// Interpret a 0/1 flag the way rTorrent reports them.
    fn as_flag(&self) -> Option<bool>;

    /// Consume the value into an owned string, if it is one.
    fn into_text(self) -> Option<String>;

    /// Short type name for error messages.
    fn kind(&self) -> &'static str;
}

impl ValueExt for Value {
    fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(i64::from(*n)),
            Value::Int64(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_flag(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            other => other.as_integer().map(|n| n != 0),
        }
    }

    fn into_text(self) -> Option<String> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "i4",
            Value::Int64(_) => "i8",
            Value::Bool(_) => "boolean",
            Value::String(_) => "string",
            Value::Double(_) => "double",
            Value::DateTime(_) => "dateTime.iso8601",
            Value::Base64(_) => "base64",
            Value::Struct(_) => "struct",
            Value::Array(_) => "array",
            Value::Nil => "nil",
        }
    }
}
