use serde_json::Value;

use crate::{
    align, field, string_key, AlignOptions, BatchFn, BatchResult, Coalescer, CoalescerConfig,
    LoadFuture, MemoryCache, ResultSet, ResultShape, Slot,
};

/// Store able to answer a bulk "field is one of these ids" query.
#[async_trait]
pub trait RecordSource: Send + Sync + 'static {
    type Error: Clone + Send + Sync + 'static;

    /// Find every record whose `field` equals one of `ids`.
    async fn find_in(&self, field: &str, ids: &[Value]) -> Result<ResultSet<Value>, Self::Error>;
}

/// Batch function querying a [`RecordSource`] and aligning records by `field`.
pub struct SourceBatch<S> {
    source: S,
    field: String,
    shape: ResultShape,
}

impl<S: RecordSource> SourceBatch<S> {
    pub fn new(source: S, field: impl Into<String>, shape: ResultShape) -> Self {
        Self {
            source,
            field: field.into(),
            shape,
        }
    }
}

#[async_trait]
impl<S: RecordSource> BatchFn<Value, Slot<Value>> for SourceBatch<S> {
    type Error = S::Error;

    async fn load(&self, keys: &[Value]) -> BatchResult<Slot<Value>, S::Error> {
        let results = self.source.find_in(&self.field, keys).await?;
        let ids: Vec<String> = keys.iter().map(string_key).collect();

        let slots = align(
            &ids,
            results,
            field(&self.field),
            self.shape,
            AlignOptions::new()
                .on_error(|violation| warn!("Aligning records by {}: {violation}", self.field)),
        );

        Ok(slots.into_iter().map(Ok).collect())
    }
}

/// Coalescer over a [`RecordSource`], keyed by JSON ids compared in string form.
pub fn source_loader<S: RecordSource>(
    source: S,
    field: impl Into<String>,
    shape: ResultShape,
    config: CoalescerConfig,
) -> Coalescer<Value, Slot<Value>, S::Error, String> {
    Coalescer::from_cache(
        SourceBatch::new(source, field, shape),
        config,
        string_key,
        MemoryCache::<String, LoadFuture<Slot<Value>, S::Error>>::new(),
    )
}
