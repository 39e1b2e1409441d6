use std::path::Path;

use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

static DEFAULTS: &str = include_str!("../Coalescer.toml");

#[derive(Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(default)]
/// Config values for [`Coalescer`](crate::Coalescer).
pub struct CoalescerConfig {
    /// Whether loads issued in the same turn are queued into one batch
    pub batch: bool,
    /// Whether futures are memoized per cache key
    pub cache: bool,
    /// How many queued entries go into one batch call, `None` or `0` for unbounded
    pub max_batch_size: Option<usize>,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            batch: true,
            cache: true,
            max_batch_size: None,
        }
    }
}

impl CoalescerConfig {
    /// Read the `[coalescer]` table from a TOML string, layered over the defaults.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Self::build(File::from_str(source, FileFormat::Toml))
    }

    /// Read the `[coalescer]` table from a TOML file, layered over the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::build(File::from(path.as_ref()).format(FileFormat::Toml))
    }

    fn build<S>(source: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            .add_source(source)
            .build()?
            .get::<Self>("coalescer")
    }

    /// The chunk size to split a flushed queue by, if any.
    pub(crate) fn chunk_size(&self) -> Option<usize> {
        self.max_batch_size.filter(|size| *size > 0)
    }
}
