use std::fmt;

use crate::InvalidKey;

#[derive(Clone, PartialEq, Eq, Debug)]
/// Error settled into a load, or returned when a load cannot be issued.
pub enum Error<E> {
    /// The key passed to `load` or `load_many` cannot identify a single record
    InvalidArgument(InvalidKey),
    /// The batch function broke its contract, every entry of that batch receives this
    ContractViolation(String),
    /// The batch function reported a failure for this key (or for the whole batch)
    Fetch(E),
    /// The task settling this entry went away before sending a value
    RecvError,
}

impl<E> Error<E> {
    /// Returns the fetch error, if this is one.
    pub fn fetch_error(&self) -> Option<&E> {
        match self {
            Error::Fetch(error) => Some(error),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(key) => write!(f, "Invalid key: {key}"),
            Error::ContractViolation(detail) => write!(f, "Batch function contract violated: {detail}"),
            Error::Fetch(error) => write!(f, "{error}"),
            Error::RecvError => write!(f, "Unable to receive data from the channel"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Error<E> {}
