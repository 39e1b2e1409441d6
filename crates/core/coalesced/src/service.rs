use std::{
    fmt,
    hash::Hash,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use futures::{
    future::{self, join_all, BoxFuture, JoinAll, Shared},
    FutureExt,
};
use tokio::sync::oneshot;

use crate::{unique_by, BatchFn, CacheMap, CoalescerConfig, Error, Key, MemoryCache};

/// Settled value of one load.
pub type LoadResult<V, E> = Result<V, Error<E>>;

/// Memoized handle to one load, clones observe the same result.
pub type LoadFuture<V, E> = Shared<BoxFuture<'static, LoadResult<V, E>>>;

type CacheKeyFn<K, C> = dyn Fn(&K) -> C + Send + Sync;

struct PendingEntry<K, V, E> {
    key: K,
    sender: oneshot::Sender<LoadResult<V, E>>,
}

struct State<K, V, E, C> {
    queue: Vec<PendingEntry<K, V, E>>,
    /// Bumped whenever the queue is taken, entries only flush their own generation
    generation: u64,
    cache: Box<dyn CacheMap<C, LoadFuture<V, E>>>,
}

/// Everything a load future needs to run a batch, without the cache.
struct Dispatcher<K, V, E, C> {
    config: CoalescerConfig,
    batch_fn: Box<dyn BatchFn<K, V, Error = E>>,
    cache_key_fn: Box<CacheKeyFn<K, C>>,
}

/// How a freshly queued entry reaches the batch function.
enum Flush<K, V, E> {
    /// Yield once, then take the queue if it is still this generation's.
    Deferred(u64),
    /// The queue was taken inside `load` and is run on first poll.
    Now(Vec<PendingEntry<K, V, E>>),
}

/// Coalesces single key loads into batched calls and memoizes their futures.
///
/// Batches run inside whichever load future is polled first once the issuing
/// task yields, so loads work on any executor. Cancelling that future before
/// it settles leaves the rest of its batch pending.
pub struct Coalescer<K, V, E, C = K> {
    dispatcher: Arc<Dispatcher<K, V, E, C>>,
    state: Arc<Mutex<State<K, V, E, C>>>,
}

impl<K, V, E> Coalescer<K, V, E, K>
where
    K: Key + Hash + Eq,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new<B>(batch_fn: B) -> Self
    where
        B: BatchFn<K, V, Error = E>,
    {
        Self::from_config(batch_fn, CoalescerConfig::default())
    }

    pub fn from_config<B>(batch_fn: B, config: CoalescerConfig) -> Self
    where
        B: BatchFn<K, V, Error = E>,
    {
        Self::from_cache(
            batch_fn,
            config,
            K::clone,
            MemoryCache::<K, LoadFuture<V, E>>::new(),
        )
    }
}

impl<K, V, E, C> Coalescer<K, V, E, C>
where
    K: Key,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    C: Hash + Eq + Clone + Send + 'static,
{
    /// Build a coalescer with a custom cache key projection and store.
    ///
    /// `cache_key_fn` decides which keys count as the same entry, both for
    /// memoization and for deduplicating a batch.
    pub fn from_cache<B, F, M>(batch_fn: B, config: CoalescerConfig, cache_key_fn: F, cache: M) -> Self
    where
        B: BatchFn<K, V, Error = E>,
        F: Fn(&K) -> C + Send + Sync + 'static,
        M: CacheMap<C, LoadFuture<V, E>> + 'static,
    {
        Self {
            dispatcher: Arc::new(Dispatcher {
                config,
                batch_fn: Box::new(batch_fn),
                cache_key_fn: Box::new(cache_key_fn),
            }),
            state: Arc::new(Mutex::new(State {
                queue: Vec::new(),
                generation: 0,
                cache: Box::new(cache),
            })),
        }
    }

    pub fn config(&self) -> &CoalescerConfig {
        &self.dispatcher.config
    }

    /// Load one key.
    ///
    /// Returns the memoized future when one exists, otherwise queues the key
    /// for the next batch. Every load issued before the calling task first
    /// awaits one of the returned futures lands in the same batch.
    pub fn load(&self, key: K) -> Result<LoadFuture<V, E>, Error<E>> {
        key.validate().map_err(Error::InvalidArgument)?;
        Ok(self.enqueue(key))
    }

    /// Load several keys, resolving to one result per key in the same order.
    ///
    /// Nothing is queued if any key is invalid.
    pub fn load_many<I>(&self, keys: I) -> Result<JoinAll<LoadFuture<V, E>>, Error<E>>
    where
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<K> = keys.into_iter().collect();
        for key in &keys {
            key.validate().map_err(Error::InvalidArgument)?;
        }

        Ok(join_all(keys.into_iter().map(|key| self.enqueue(key))))
    }

    /// Forget the memoized future for `key`.
    pub fn clear(&self, key: &K) -> &Self {
        let cache_key = (self.dispatcher.cache_key_fn)(key);
        self.state().cache.delete(&cache_key);
        self
    }

    /// Forget every memoized future.
    pub fn clear_all(&self) -> &Self {
        self.state().cache.clear();
        self
    }

    /// Seed the cache with a settled value, unless `key` already has an entry.
    pub fn prime(&self, key: K, value: Result<V, E>) -> &Self {
        let cache_key = (self.dispatcher.cache_key_fn)(&key);
        let mut state = self.state();

        if state.cache.get(&cache_key).is_none() {
            let future = future::ready(value.map_err(Error::Fetch)).boxed().shared();
            state.cache.set(cache_key, future);
        }

        drop(state);
        self
    }

    /// Number of entries waiting for the next flush.
    pub fn current_queue_len(&self) -> usize {
        self.state().queue.len()
    }

    fn state(&self) -> MutexGuard<'_, State<K, V, E, C>> {
        lock(&self.state)
    }

    fn enqueue(&self, key: K) -> LoadFuture<V, E> {
        let dispatcher = &self.dispatcher;
        let cache_key = dispatcher.config.cache.then(|| (dispatcher.cache_key_fn)(&key));
        let mut state = self.state();

        if let Some(cache_key) = &cache_key {
            if let Some(future) = state.cache.get(cache_key) {
                return future;
            }
        }

        let (sender, receiver) = oneshot::channel();
        state.queue.push(PendingEntry { key, sender });

        let flush = if !dispatcher.config.batch {
            state.generation += 1;
            Flush::Now(mem::take(&mut state.queue))
        } else {
            Flush::Deferred(state.generation)
        };

        let future = settle(dispatcher.clone(), Arc::downgrade(&self.state), flush, receiver)
            .boxed()
            .shared();

        if let Some(cache_key) = cache_key {
            state.cache.set(cache_key, future.clone());
        }

        future
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drive the entry's batch if nobody else has, then wait for its value.
async fn settle<K, V, E, C>(
    dispatcher: Arc<Dispatcher<K, V, E, C>>,
    state: Weak<Mutex<State<K, V, E, C>>>,
    flush: Flush<K, V, E>,
    receiver: oneshot::Receiver<LoadResult<V, E>>,
) -> LoadResult<V, E>
where
    K: Key,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    C: Hash + Eq + Clone + Send + 'static,
{
    let queue = match flush {
        Flush::Now(queue) => queue,
        Flush::Deferred(generation) => {
            tokio::task::yield_now().await;
            state
                .upgrade()
                .map(|state| take_queue(&state, generation))
                .unwrap_or_default()
        }
    };

    if !queue.is_empty() {
        dispatcher.dispatch(queue).await;
    }

    receiver.await.unwrap_or(Err(Error::RecvError))
}

fn take_queue<K, V, E, C>(state: &Mutex<State<K, V, E, C>>, generation: u64) -> Vec<PendingEntry<K, V, E>> {
    let mut state = lock(state);
    if state.generation != generation {
        return Vec::new();
    }

    state.generation += 1;
    mem::take(&mut state.queue)
}

impl<K, V, E, C> Dispatcher<K, V, E, C>
where
    K: Key,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    C: Hash + Eq + Clone + Send + 'static,
{
    /// Run the queue as one batch per `max_batch_size` chunk, concurrently.
    async fn dispatch(&self, mut queue: Vec<PendingEntry<K, V, E>>) {
        let mut batches = Vec::new();
        if let Some(size) = self.config.chunk_size() {
            while queue.len() > size {
                let rest = queue.split_off(size);
                batches.push(mem::replace(&mut queue, rest));
            }
        }

        batches.push(queue);
        join_all(batches.into_iter().map(|batch| self.dispatch_batch(batch))).await;
    }

    async fn dispatch_batch(&self, batch: Vec<PendingEntry<K, V, E>>) {
        let (keys, senders): (Vec<K>, Vec<_>) = batch
            .into_iter()
            .map(|entry| (entry.key, entry.sender))
            .unzip();

        let distinct = unique_by(&keys, |key| (self.cache_key_fn)(key));
        debug!(
            "Dispatching batch of {} keys ({} distinct)",
            keys.len(),
            distinct.keys.len()
        );

        let values = match self.batch_fn.load(&distinct.keys).await {
            Ok(values) => values,
            Err(error) => {
                debug!("Batch of {} keys failed", distinct.keys.len());
                for sender in senders {
                    let _ = sender.send(Err(Error::Fetch(error.clone())));
                }

                return;
            }
        };

        if values.len() != distinct.keys.len() {
            let detail = format!(
                "returned {} values for {} keys {:?}",
                values.len(),
                distinct.keys.len(),
                distinct.keys
            );

            error!("Batch function contract violated: {detail}");
            for sender in senders {
                let _ = sender.send(Err(Error::ContractViolation(detail.clone())));
            }

            return;
        }

        for (sender, position) in senders.into_iter().zip(distinct.positions) {
            // receiver dropped means nobody is waiting on this entry anymore
            let _ = sender.send(values[position].clone().map_err(Error::Fetch));
        }
    }
}

impl<K, V, E, C> Clone for Coalescer<K, V, E, C> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            state: self.state.clone(),
        }
    }
}

impl<K, V, E, C> fmt::Debug for Coalescer<K, V, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coalescer")
            .field("config", &self.dispatcher.config)
            .finish_non_exhaustive()
    }
}
