//! In-process [`ObjectStore`] with failure injection and instrumentation.
//!
//! Holds buckets and objects in memory, can be told to fail specific keys,
//! can add artificial latency to transfers, and records how many transfers
//! were in flight at once. Used by the test suites and handy for dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::digest::bytes_digest;
use crate::store::{CreateBucketOutcome, ObjectMeta, ObjectStore, ObjectSummary, StoreError};

/// An object held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object body.
    pub data: Vec<u8>,
    /// User metadata.
    pub metadata: HashMap<String, String>,
}

impl StoredObject {
    fn meta(&self) -> ObjectMeta {
        ObjectMeta {
            size: self.data.len() as u64,
            etag: Some(format!("\"{}\"", bytes_digest(&self.data))),
            metadata: self.metadata.clone(),
        }
    }
}

/// Call counters and concurrency high-water mark.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// `PutObject` calls, including failed ones.
    pub put_calls: u64,
    /// `GetObject` calls, including failed ones.
    pub get_calls: u64,
    /// `HeadObject` calls, including failed ones.
    pub head_calls: u64,
    /// `CreateBucket` calls, including failed ones.
    pub create_bucket_calls: u64,
    /// Highest number of concurrent transfers observed.
    pub max_in_flight: usize,
}

#[derive(Default)]
struct State {
    buckets: HashSet<String>,
    objects: HashMap<String, BTreeMap<String, StoredObject>>,
    hidden_buckets: HashSet<String>,
    failing_puts: HashSet<String>,
    failing_gets: HashSet<String>,
    failing_heads: HashSet<String>,
    fail_bucket_creation: bool,
}

#[derive(Default)]
struct Counters {
    put_calls: AtomicU64,
    get_calls: AtomicU64,
    head_calls: AtomicU64,
    create_bucket_calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// In-memory S3-compatible store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    counters: Counters,
    latency: Option<Duration>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("stats", &self.stats())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

/// Decrements the in-flight counter when a transfer ends.
struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn injected(message: &str) -> Box<dyn std::error::Error + Send + Sync> {
    message.to_string().into()
}

impl MemoryStore {
    /// Creates an empty store with no buckets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `latency` to every `PutObject` and `GetObject`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates `bucket` directly.
    pub fn insert_bucket(&self, bucket: &str) {
        let mut state = self.state();
        state.buckets.insert(bucket.to_string());
        state.objects.entry(bucket.to_string()).or_default();
    }

    /// Stores an object directly, creating the bucket if needed.
    pub fn insert_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        metadata: HashMap<String, String>,
    ) {
        let mut state = self.state();
        state.buckets.insert(bucket.to_string());
        state
            .objects
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), StoredObject { data, metadata });
    }

    /// Returns a copy of the object at `key`.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state()
            .objects
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    /// Returns every key in `bucket`, sorted.
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .objects
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes `HeadBucket` report `bucket` as missing even when it exists.
    pub fn hide_bucket_from_head(&self, bucket: &str) {
        self.state().hidden_buckets.insert(bucket.to_string());
    }

    /// Makes every `PutObject` to `key` fail.
    pub fn fail_puts_for(&self, key: &str) {
        self.state().failing_puts.insert(key.to_string());
    }

    /// Makes every `GetObject` of `key` fail.
    pub fn fail_gets_for(&self, key: &str) {
        self.state().failing_gets.insert(key.to_string());
    }

    /// Makes every `HeadObject` of `key` fail.
    pub fn fail_heads_for(&self, key: &str) {
        self.state().failing_heads.insert(key.to_string());
    }

    /// Makes `CreateBucket` fail.
    pub fn fail_bucket_creation(&self) {
        self.state().fail_bucket_creation = true;
    }

    /// Snapshot of the call counters.
    #[must_use]
    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            put_calls: self.counters.put_calls.load(Ordering::SeqCst),
            get_calls: self.counters.get_calls.load(Ordering::SeqCst),
            head_calls: self.counters.head_calls.load(Ordering::SeqCst),
            create_bucket_calls: self.counters.create_bucket_calls.load(Ordering::SeqCst),
            max_in_flight: self.counters.max_in_flight.load(Ordering::SeqCst),
        }
    }

    /// Resets the call counters, keeping stored data.
    pub fn reset_stats(&self) {
        for counter in [
            &self.counters.put_calls,
            &self.counters.get_calls,
            &self.counters.head_calls,
            &self.counters.create_bucket_calls,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        self.counters.max_in_flight.store(0, Ordering::SeqCst);
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn head_bucket(&self, bucket: &str) -> Result<bool, StoreError> {
        let state = self.state();
        Ok(state.buckets.contains(bucket) && !state.hidden_buckets.contains(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<CreateBucketOutcome, StoreError> {
        self.counters
            .create_bucket_calls
            .fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        if state.fail_bucket_creation {
            return Err(StoreError::CreateBucket {
                bucket: bucket.to_string(),
                source: injected("injected CreateBucket failure"),
            });
        }
        if state.buckets.insert(bucket.to_string()) {
            state.objects.entry(bucket.to_string()).or_default();
            Ok(CreateBucketOutcome::Created)
        } else {
            Ok(CreateBucketOutcome::AlreadyExists)
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        self.counters.put_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters);

        let data = tokio::fs::read(source).await?;
        self.simulate_latency().await;

        let put_error = |message: &str| StoreError::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: injected(message),
        };

        let mut state = self.state();
        if state.failing_puts.contains(key) {
            return Err(put_error("injected PutObject failure"));
        }
        let Some(objects) = state.objects.get_mut(bucket) else {
            return Err(put_error("NoSuchBucket"));
        };
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<Option<ObjectMeta>, StoreError> {
        self.counters.get_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters);

        self.simulate_latency().await;

        let object = {
            let state = self.state();
            if state.failing_gets.contains(key) {
                return Err(StoreError::Get {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    source: injected("injected GetObject failure"),
                });
            }
            state
                .objects
                .get(bucket)
                .and_then(|objects| objects.get(key))
                .cloned()
        };

        let Some(object) = object else {
            return Ok(None);
        };
        tokio::fs::write(dest, &object.data).await?;
        Ok(Some(object.meta()))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        self.counters.head_calls.fetch_add(1, Ordering::SeqCst);

        let state = self.state();
        if state.failing_heads.contains(key) {
            return Err(StoreError::Head {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: injected("injected HeadObject failure"),
            });
        }
        Ok(state
            .objects
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(StoredObject::meta))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, StoreError> {
        let state = self.state();
        let Some(objects) = state.objects.get(bucket) else {
            return Err(StoreError::List {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                source: injected("NoSuchBucket"),
            });
        };
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
            })
            .collect())
    }
}
