use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{executor::block_on, future::join_all, join};

use crate::{batch_fn, BatchFn, BatchResult, Coalescer, CoalescerConfig, Error, InvalidKey};

/// Batch function recording every key list it is called with
#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<Vec<u32>>>>,
}

impl Recorder {
    fn calls(&self) -> Vec<Vec<u32>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchFn<u32, String> for Recorder {
    type Error = String;

    async fn load(&self, keys: &[u32]) -> BatchResult<String, String> {
        self.calls.lock().unwrap().push(keys.to_vec());
        tokio::time::sleep(Duration::from_millis(1)).await;

        Ok(keys
            .iter()
            .map(|key| match key {
                13 => Err(format!("no value for {key}")),
                key => Ok(format!("value {key}")),
            })
            .collect())
    }
}

fn loader(config: CoalescerConfig) -> (Coalescer<u32, String, String>, Recorder) {
    let recorder = Recorder::default();
    (Coalescer::from_config(recorder.clone(), config), recorder)
}

#[tokio::test]
async fn same_turn_loads_share_one_batch() {
    let (loader, recorder) = loader(CoalescerConfig::default());

    let one = loader.load(1).unwrap();
    let two = loader.load(2).unwrap();
    let three = loader.load(3).unwrap();
    assert_eq!(loader.current_queue_len(), 3);

    let (one, two, three) = join!(one, two, three);
    assert_eq!(one.unwrap(), "value 1");
    assert_eq!(two.unwrap(), "value 2");
    assert_eq!(three.unwrap(), "value 3");

    assert_eq!(recorder.calls(), vec![vec![1, 2, 3]]);
    assert_eq!(loader.current_queue_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_turn_loads_share_one_batch_across_workers() {
    for _ in 0..20 {
        let (loader, recorder) = loader(CoalescerConfig::default());

        let pending: Vec<_> = (1000..3000).map(|key| loader.load(key).unwrap()).collect();
        let results = join_all(pending).await;
        assert!(results.iter().all(Result::is_ok));

        let calls = recorder.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (1000..3000).collect::<Vec<_>>());
    }
}

#[test]
fn loads_without_a_runtime() {
    let loader: Coalescer<u32, u32, String> = Coalescer::new(batch_fn(|keys: Vec<u32>| async move {
        Ok(keys.into_iter().map(|key| Ok(key * 2)).collect())
    }));

    let one = loader.load(1).unwrap();
    let many = loader.load_many([2, 3]).unwrap();
    let (one, many) = block_on(async { join!(one, many) });

    assert_eq!(one, Ok(2));
    assert_eq!(many, vec![Ok(4), Ok(6)]);
}

#[tokio::test]
async fn later_turns_open_a_new_batch() {
    let (loader, recorder) = loader(CoalescerConfig::default());

    assert_eq!(loader.load(1).unwrap().await.unwrap(), "value 1");
    assert_eq!(loader.load(2).unwrap().await.unwrap(), "value 2");

    assert_eq!(recorder.calls(), vec![vec![1], vec![2]]);
}

#[tokio::test]
async fn memoizes_futures_per_key() {
    let (loader, recorder) = loader(CoalescerConfig::default());

    let first = loader.load(5).unwrap();
    let second = loader.load(5).unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(loader.current_queue_len(), 1);

    assert_eq!(first.await.unwrap(), "value 5");
    assert_eq!(second.await.unwrap(), "value 5");

    // settled entries stay memoized
    assert_eq!(loader.load(5).unwrap().await.unwrap(), "value 5");
    assert_eq!(recorder.calls(), vec![vec![5]]);
}

#[tokio::test]
async fn without_cache_duplicates_are_deduplicated_per_batch() {
    let (loader, recorder) = loader(CoalescerConfig {
        cache: false,
        ..Default::default()
    });

    let first = loader.load(7).unwrap();
    let second = loader.load(7).unwrap();
    let other = loader.load(8).unwrap();
    assert!(!first.ptr_eq(&second));

    let (first, second, other) = join!(first, second, other);
    assert_eq!(first.unwrap(), "value 7");
    assert_eq!(second.unwrap(), "value 7");
    assert_eq!(other.unwrap(), "value 8");

    assert_eq!(recorder.calls(), vec![vec![7, 8]]);

    loader.load(7).unwrap().await.unwrap();
    assert_eq!(recorder.calls().len(), 2);
}

#[tokio::test]
async fn without_batching_each_load_dispatches_alone() {
    let (loader, recorder) = loader(CoalescerConfig {
        batch: false,
        ..Default::default()
    });

    let one = loader.load(1).unwrap();
    let two = loader.load(2).unwrap();
    assert_eq!(loader.current_queue_len(), 0);

    let (one, two) = join!(one, two);
    assert_eq!(one.unwrap(), "value 1");
    assert_eq!(two.unwrap(), "value 2");

    assert_eq!(recorder.calls(), vec![vec![1], vec![2]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn without_batching_calls_follow_load_order() {
    let (loader, recorder) = loader(CoalescerConfig {
        batch: false,
        ..Default::default()
    });

    let pending: Vec<_> = (1..=5).map(|key| loader.load(key).unwrap()).collect();
    join_all(pending).await;

    assert_eq!(recorder.calls(), vec![vec![1], vec![2], vec![3], vec![4], vec![5]]);
}

#[tokio::test]
async fn per_key_errors_are_isolated() {
    let (loader, recorder) = loader(CoalescerConfig::default());

    let results = loader.load_many([12, 13, 14]).unwrap().await;

    assert_eq!(
        results,
        vec![
            Ok("value 12".to_string()),
            Err(Error::Fetch("no value for 13".to_string())),
            Ok("value 14".to_string()),
        ]
    );
    assert_eq!(recorder.calls(), vec![vec![12, 13, 14]]);
}

#[tokio::test]
async fn load_many_matches_individual_loads() {
    let (loader, _) = loader(CoalescerConfig::default());

    let many = loader.load_many(vec![4, 13]).unwrap();
    let four = loader.load(4).unwrap();
    let thirteen = loader.load(13).unwrap();

    let (many, four, thirteen) = join!(many, four, thirteen);
    assert_eq!(many, vec![four, thirteen]);
}

#[tokio::test]
async fn invalid_keys_are_rejected_synchronously() {
    let loader: Coalescer<Option<u32>, u32, String> = Coalescer::new(batch_fn(|keys: Vec<Option<u32>>| async move {
        Ok(keys.into_iter().map(|key| Ok(key.unwrap_or_default())).collect())
    }));

    assert_eq!(loader.load(None).err(), Some(Error::InvalidArgument(InvalidKey::Undefined)));
    assert_eq!(
        loader.load_many([Some(1), None]).err(),
        Some(Error::InvalidArgument(InvalidKey::Undefined))
    );
    assert_eq!(loader.current_queue_len(), 0);

    assert_eq!(loader.load(Some(3)).unwrap().await, Ok(3));
}

#[tokio::test]
async fn prime_never_overwrites() {
    let (loader, recorder) = loader(CoalescerConfig::default());

    loader.prime(1, Ok("primed".to_string()));
    loader.prime(1, Ok("again".to_string()));
    loader.prime(2, Err("broken".to_string()));

    assert_eq!(loader.load(1).unwrap().await.unwrap(), "primed");
    assert_eq!(loader.load(2).unwrap().await, Err(Error::Fetch("broken".to_string())));

    let pending = loader.load(3).unwrap();
    loader.prime(3, Ok("late".to_string()));
    assert_eq!(pending.await.unwrap(), "value 3");

    assert_eq!(recorder.calls(), vec![vec![3]]);
}

#[tokio::test]
async fn clear_forces_a_fresh_fetch() {
    let (loader, recorder) = loader(CoalescerConfig::default());

    loader.load_many([1, 2]).unwrap().await;
    loader.clear(&1);
    loader.clear(&99);

    loader.load(1).unwrap().await.unwrap();
    loader.load(2).unwrap().await.unwrap();
    assert_eq!(recorder.calls(), vec![vec![1, 2], vec![1]]);

    loader.clear_all();
    loader.load_many([1, 2]).unwrap().await;
    assert_eq!(recorder.calls(), vec![vec![1, 2], vec![1], vec![1, 2]]);
}

#[tokio::test]
async fn clear_chains() {
    let (loader, _) = loader(CoalescerConfig::default());

    loader.prime(1, Ok("a".into())).prime(2, Ok("b".into())).clear(&1).clear_all();
    assert_eq!(loader.load(2).unwrap().await.unwrap(), "value 2");
}

#[tokio::test]
async fn max_batch_size_splits_the_queue() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();

    let loader: Coalescer<u32, u32, String> = Coalescer::from_config(
        batch_fn(move |keys: Vec<u32>| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push(keys.clone());
                if keys.contains(&3) {
                    return Err("chunk failed".to_string());
                }

                Ok(keys.into_iter().map(Ok).collect())
            }
        }),
        CoalescerConfig {
            max_batch_size: Some(2),
            ..Default::default()
        },
    );

    let results = loader.load_many(1..=5).unwrap().await;

    assert_eq!(
        results,
        vec![
            Ok(1),
            Ok(2),
            Err(Error::Fetch("chunk failed".to_string())),
            Err(Error::Fetch("chunk failed".to_string())),
            Ok(5),
        ]
    );

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls, vec![vec![1, 2], vec![3, 4], vec![5]]);
}

#[tokio::test]
async fn wrong_length_is_a_contract_violation() {
    let loader: Coalescer<u32, u32, String> =
        Coalescer::new(batch_fn(|_: Vec<u32>| async move { Ok(vec![Ok(1)]) }));

    let results = loader.load_many([1, 2]).unwrap().await;

    assert!(results
        .iter()
        .all(|result| matches!(result, Err(Error::ContractViolation(_)))));
}

#[tokio::test]
async fn custom_cache_key_and_store() {
    let loader: Coalescer<String, usize, String, String> = Coalescer::from_cache(
        batch_fn(|keys: Vec<String>| async move { Ok(keys.iter().map(|key| Ok(key.len())).collect()) }),
        CoalescerConfig::default(),
        |key: &String| key.to_lowercase(),
        HashMap::new(),
    );

    let upper = loader.load("ABC".to_string()).unwrap();
    let lower = loader.load("abc".to_string()).unwrap();
    assert!(upper.ptr_eq(&lower));
    assert_eq!(upper.await, Ok(3));

    loader.clear(&"aBc".to_string());
    assert!(!loader.load("abc".to_string()).unwrap().ptr_eq(&lower));
}

#[cfg(feature = "lru")]
#[tokio::test]
async fn bounded_store_refetches_evicted_keys() {
    use std::num::NonZeroUsize;

    let recorder = Recorder::default();
    let loader: Coalescer<u32, String, String> = Coalescer::from_cache(
        recorder.clone(),
        CoalescerConfig::default(),
        |key: &u32| *key,
        lru::LruCache::new(NonZeroUsize::new(1).unwrap()),
    );

    loader.load(1).unwrap().await.unwrap();
    loader.load(2).unwrap().await.unwrap();
    loader.load(1).unwrap().await.unwrap();

    assert_eq!(recorder.calls(), vec![vec![1], vec![2], vec![1]]);
}
