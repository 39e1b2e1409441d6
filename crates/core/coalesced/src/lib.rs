#[macro_use]
extern crate log;

#[macro_use]
extern crate async_trait;

mod align;
mod batch;
mod cache;
mod config;
mod error;
mod key;
mod service;
mod source;
mod stringify;
mod unique;

pub use align::{align, field, AlignOptions, Page, ResultSet, ResultShape, Slot, UnknownShape, Violation};
pub use batch::{batch_fn, BatchFn, BatchResult, FnBatch};
pub use cache::{CacheMap, MemoryCache};
pub use self::config::CoalescerConfig;
pub use error::Error;
pub use key::{string_key, InvalidKey, Key};
pub use service::{Coalescer, LoadFuture, LoadResult};
pub use source::{source_loader, RecordSource, SourceBatch};
pub use stringify::stable_stringify;
pub use unique::{unique, unique_by, Deduplicated};

#[cfg(test)]
mod test;
