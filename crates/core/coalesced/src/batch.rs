use std::{fmt, future::Future, marker::PhantomData};

/// What a batch function resolves to.
///
/// The outer error fails every key of the batch, inner errors fail only
/// their own key. The vector must hold one slot per key, in key order.
pub type BatchResult<V, E> = Result<Vec<Result<V, E>>, E>;

/// Bulk lookup backing a [`Coalescer`](crate::Coalescer).
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync + 'static {
    /// Error reported for a failed key or batch.
    type Error;

    /// Load every key in `keys`, which never contains the same cache key twice.
    async fn load(&self, keys: &[K]) -> BatchResult<V, Self::Error>;
}

/// Closure adapter created by [`batch_fn`].
pub struct FnBatch<F, K> {
    func: F,
    _key: PhantomData<fn(Vec<K>)>,
}

/// Use an async closure taking the distinct keys as a batch function.
///
/// ```ignore
/// let users = Coalescer::new(batch_fn(|ids: Vec<u64>| async move {
///     Ok(ids.into_iter().map(|id| Ok(format!("user {id}"))).collect())
/// }));
/// ```
pub fn batch_fn<F, K>(func: F) -> FnBatch<F, K> {
    FnBatch {
        func,
        _key: PhantomData,
    }
}

impl<F, K> fmt::Debug for FnBatch<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnBatch").finish_non_exhaustive()
    }
}

#[async_trait]
impl<K, V, E, F, Fut> BatchFn<K, V> for FnBatch<F, K>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    E: Clone + Send + Sync + 'static,
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BatchResult<V, E>> + Send,
{
    type Error = E;

    async fn load(&self, keys: &[K]) -> BatchResult<V, E> {
        (self.func)(keys.to_vec()).await
    }
}
