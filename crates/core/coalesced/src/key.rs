use std::{fmt, sync::Arc};

use serde_json::Value;

use crate::stable_stringify;

/// A value that identifies one lookup.
///
/// Keys only need to be cloned and sent across tasks, equality is decided
/// on the cache key projected from them. Implement this for your own id
/// types with an empty `impl Key for MyId {}`.
pub trait Key: Clone + fmt::Debug + Send + Sync + 'static {
    /// Check this value names exactly one record.
    fn validate(&self) -> Result<(), InvalidKey> {
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
/// Reason a key was rejected by [`Key::validate`].
pub enum InvalidKey {
    /// No value was given
    Undefined,
    /// A sequence was given where a single key is expected, use `load_many`
    Sequence,
}

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidKey::Undefined => write!(f, "load() must be called with a value"),
            InvalidKey::Sequence => {
                write!(f, "load() called with a sequence, load_many() must be used")
            }
        }
    }
}

impl std::error::Error for InvalidKey {}

macro_rules! impl_key {
    ( $( $ty: ty ),* ) => {
        $( impl Key for $ty {} )*
    };
}

impl_key!(
    String, &'static str, Arc<str>, char, bool,
    u8, u16, u32, u64, u128, usize,
    i8, i16, i32, i64, i128, isize
);

impl<T: Key> Key for Option<T> {
    fn validate(&self) -> Result<(), InvalidKey> {
        match self {
            Some(key) => key.validate(),
            None => Err(InvalidKey::Undefined),
        }
    }
}

impl<T: Key> Key for Vec<T> {
    fn validate(&self) -> Result<(), InvalidKey> {
        Err(InvalidKey::Sequence)
    }
}

impl<A: Key, B: Key> Key for (A, B) {
    fn validate(&self) -> Result<(), InvalidKey> {
        self.0.validate()?;
        self.1.validate()
    }
}

impl Key for Value {
    fn validate(&self) -> Result<(), InvalidKey> {
        match self {
            Value::Null => Err(InvalidKey::Undefined),
            Value::Array(_) => Err(InvalidKey::Sequence),
            _ => Ok(()),
        }
    }
}

/// Coerce a JSON key into its string form.
///
/// Strings are taken verbatim so `"1"` and `1` land on the same entry,
/// objects are encoded with sorted keys.
pub fn string_key(value: &Value) -> String {
    match value {
        Value::String(string) => string.clone(),
        Value::Object(_) | Value::Array(_) => stable_stringify(value),
        other => other.to_string(),
    }
}
