//! Keyed query cache: deduplication, staleness, invalidation.
//!
//! The cache maps a [`QueryKey`] to the last fetched value for that key
//! plus its status, error and freshness metadata. Reads follow three
//! paths:
//!
//! 1. Fresh hit - the entry is younger than its staleness window; the
//!    cached value is returned with no network call.
//! 2. Age-stale hit - the cached value is returned immediately while one
//!    background refetch revalidates it (stale-while-revalidate).
//! 3. Miss or invalidated - the read awaits a fetch. Concurrent readers of
//!    the same key share a single underlying call: the first becomes the
//!    leader and runs the fetch, the rest await its completion.
//!
//! Invalidation is hard staleness: it bumps the entry's generation, so a
//! read issued after `invalidate` always observes a refetch, and an older
//! in-flight response is discarded on arrival instead of overwriting the
//! refetched value. The same generation check makes late responses for
//! removed (unsubscribed, garbage-collected) keys harmless.
//!
//! The entry map is the single mutable shared resource. It is guarded by a
//! plain mutex and never held across an await.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, trace};

use super::key::QueryKey;
use crate::error::ApiError;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  Idle,
  Loading,
  Success,
  Error,
}

/// Where the data in a [`QueryResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
  /// Resolved by the fetch this read performed or awaited
  Network,
  /// Served from cache within its staleness window
  CacheFresh,
  /// Served from cache past its staleness window, revalidation in flight
  CacheStale,
}

/// What a read hands back to the caller.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
  pub data: Option<T>,
  pub error: Option<Arc<ApiError>>,
  /// A fetch for this key is still in flight (background revalidation
  /// included).
  pub is_loading: bool,
  pub source: Option<DataSource>,
}

impl<T> QueryResult<T> {
  fn parked() -> Self {
    Self {
      data: None,
      error: None,
      is_loading: false,
      source: None,
    }
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }
}

/// Per-read options.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
  /// While false the read is parked: no fetch, no entry, no staleness
  /// bookkeeping. Used to hold a query back until, say, a token exists.
  pub enabled: bool,
  /// Staleness window for this key; the client default when absent.
  pub stale_after: Option<Duration>,
}

impl Default for ReadOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      stale_after: None,
    }
  }
}

impl ReadOptions {
  pub fn stale_after(duration: Duration) -> Self {
    Self {
      enabled: true,
      stale_after: Some(duration),
    }
  }

  pub fn enabled(enabled: bool) -> Self {
    Self {
      enabled,
      stale_after: None,
    }
  }
}

struct Entry {
  data: Option<Value>,
  error: Option<Arc<ApiError>>,
  status: QueryStatus,
  fetched_at: Option<Instant>,
  stale_after: Duration,
  /// Bumped by every invalidation; a fetch result is applied only if the
  /// generation it started under is still current.
  generation: u64,
  invalidated: bool,
  /// Completion signal of the fetch currently in flight, if any.
  inflight: Option<watch::Receiver<bool>>,
  subscribers: usize,
  last_touched: Instant,
}

impl Entry {
  fn new(stale_after: Duration) -> Self {
    Self {
      data: None,
      error: None,
      status: QueryStatus::Idle,
      fetched_at: None,
      stale_after,
      generation: 0,
      invalidated: false,
      inflight: None,
      subscribers: 0,
      last_touched: Instant::now(),
    }
  }

  fn age_stale(&self) -> bool {
    self
      .fetched_at
      .map(|t| t.elapsed() >= self.stale_after)
      .unwrap_or(true)
  }

  fn decode<T: DeserializeOwned>(&self, source: DataSource) -> QueryResult<T> {
    let (data, error) = match &self.data {
      Some(value) => match serde_json::from_value::<T>(value.clone()) {
        Ok(data) => (Some(data), self.error.clone()),
        Err(e) => (None, Some(Arc::new(ApiError::Decode(e)))),
      },
      None => (None, self.error.clone()),
    };

    QueryResult {
      data,
      error,
      is_loading: self.inflight.is_some(),
      source: Some(source),
    }
  }
}

/// What a read decided to do while it held the lock.
enum Plan<T> {
  Return(QueryResult<T>),
  AwaitInflight(watch::Receiver<bool>),
  Revalidate {
    snapshot: QueryResult<T>,
    generation: u64,
    done: watch::Sender<bool>,
  },
  Lead {
    prior: Option<Value>,
    generation: u64,
    done: watch::Sender<bool>,
  },
}

/// The keyed query cache shared by every view of the application.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

struct Inner {
  entries: Mutex<HashMap<QueryKey, Entry>>,
  default_stale_after: Duration,
  gc_after: Duration,
}

impl Default for QueryClient {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryClient {
  /// Cache with the stock windows: entries stale after an hour, evicted
  /// five minutes after their last subscriber and read are gone.
  pub fn new() -> Self {
    Self::with_windows(Duration::from_secs(60 * 60), Duration::from_secs(5 * 60))
  }

  pub fn with_windows(default_stale_after: Duration, gc_after: Duration) -> Self {
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        default_stale_after,
        gc_after,
      }),
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
    // A poisoning panic cannot leave the map half-written: every critical
    // section only moves complete values in or out.
    self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Read a key, fetching through `fetch` when the cache cannot answer.
  ///
  /// Concurrent reads of the same absent key perform exactly one
  /// underlying fetch. A stale-by-age hit returns the cached value at once
  /// and revalidates in the background; a read after invalidation awaits a
  /// fresh fetch and returns its result.
  pub async fn read<T, F, Fut>(
    &self,
    key: &QueryKey,
    options: ReadOptions,
    fetch: F,
  ) -> QueryResult<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    if !options.enabled {
      // Parked: hand back whatever is cached without touching the entry.
      return match self.entries().get(key) {
        Some(entry) => entry.decode(DataSource::CacheFresh),
        None => QueryResult::parked(),
      };
    }

    let mut fetch = Some(fetch);

    loop {
      let plan: Plan<T> = {
        let mut entries = self.entries();
        let entry = entries
          .entry(key.clone())
          .or_insert_with(|| Entry::new(options.stale_after.unwrap_or(self.inner.default_stale_after)));

        if let Some(stale_after) = options.stale_after {
          entry.stale_after = stale_after;
        }
        entry.last_touched = Instant::now();

        if entry.invalidated || entry.data.is_none() {
          // Nothing trustworthy to serve; join or start a fetch.
          match &entry.inflight {
            Some(rx) => Plan::AwaitInflight(rx.clone()),
            None => {
              let (tx, rx) = watch::channel(false);
              entry.inflight = Some(rx);
              entry.status = QueryStatus::Loading;
              trace!(%key, "fetch started");
              Plan::Lead {
                prior: entry.data.clone(),
                generation: entry.generation,
                done: tx,
              }
            }
          }
        } else if entry.age_stale() || entry.status == QueryStatus::Error {
          // Serve the retained value now; one revalidation in the
          // background. A read of an errored entry is the new attempt
          // that supersedes the stored error.
          if entry.inflight.is_none() {
            let (tx, rx) = watch::channel(false);
            entry.inflight = Some(rx);
            let snapshot = entry.decode(DataSource::CacheStale);
            trace!(%key, "background revalidation started");
            Plan::Revalidate {
              snapshot,
              generation: entry.generation,
              done: tx,
            }
          } else {
            Plan::Return(entry.decode(DataSource::CacheStale))
          }
        } else {
          Plan::Return(entry.decode(DataSource::CacheFresh))
        }
      };

      match plan {
        Plan::Return(result) => return result,

        Plan::AwaitInflight(mut rx) => {
          // Wakes on completion, or on sender drop if the result was
          // discarded; either way re-read and re-classify.
          let _ = rx.changed().await;
        }

        Plan::Revalidate {
          snapshot,
          generation,
          done,
        } => {
          let Some(fetch) = fetch.take() else {
            return snapshot;
          };
          let client = self.clone();
          let key = key.clone();
          let future = fetch();
          tokio::spawn(async move {
            let outcome = encode_outcome(future.await);
            client.complete(&key, generation, outcome, done);
          });
          return snapshot;
        }

        Plan::Lead {
          prior,
          generation,
          done,
        } => {
          let Some(fetch) = fetch.take() else {
            drop(done);
            return match self.entries().get(key) {
              Some(entry) => entry.decode(DataSource::CacheFresh),
              None => QueryResult::parked(),
            };
          };

          // Apply to the cache (unless superseded), then answer the caller
          // with this fetch's own outcome.
          return match fetch().await {
            Ok(data) => match serde_json::to_value(&data) {
              Ok(value) => {
                self.complete(key, generation, Ok(value), done);
                QueryResult {
                  data: Some(data),
                  error: None,
                  is_loading: false,
                  source: Some(DataSource::Network),
                }
              }
              Err(e) => {
                let error = Arc::new(ApiError::Decode(e));
                self.complete(key, generation, Err(error.clone()), done);
                QueryResult {
                  data: None,
                  error: Some(error),
                  is_loading: false,
                  source: Some(DataSource::Network),
                }
              }
            },
            Err(e) => {
              let error = Arc::new(e);
              self.complete(key, generation, Err(error.clone()), done);
              // An invalidated entry keeps its last value through a failed
              // refetch, so the caller still sees it next to the error.
              let data = prior.and_then(|v| serde_json::from_value::<T>(v).ok());
              QueryResult {
                data,
                error: Some(error),
                is_loading: false,
                source: Some(DataSource::Network),
              }
            }
          };
        }
      }
    }
  }

  /// Apply a finished fetch to its entry, unless the entry was removed or
  /// invalidated after the fetch began.
  fn complete(
    &self,
    key: &QueryKey,
    generation: u64,
    outcome: Result<Value, Arc<ApiError>>,
    done: watch::Sender<bool>,
  ) {
    {
      let mut entries = self.entries();
      match entries.get_mut(key) {
        Some(entry) if entry.generation == generation => {
          match outcome {
            Ok(value) => {
              entry.data = Some(value);
              entry.error = None;
              entry.status = QueryStatus::Success;
              entry.fetched_at = Some(Instant::now());
              entry.invalidated = false;
              trace!(%key, "fetch stored");
            }
            Err(error) => {
              // Keep the previous value; the error rides alongside it
              // until a later attempt replaces both.
              entry.error = Some(error);
              entry.status = QueryStatus::Error;
              trace!(%key, "fetch failed");
            }
          }
          entry.inflight = None;
        }
        _ => {
          debug!(%key, "discarding fetch result for a superseded generation");
        }
      }
    }

    // Wake every reader awaiting this fetch, then drop the sender.
    let _ = done.send(true);
  }

  /// Mark every entry of `resource` untrustworthy, parameters ignored.
  ///
  /// The next read of any matching key awaits a fresh fetch; responses of
  /// fetches already in flight are discarded on arrival.
  pub fn invalidate(&self, resource: &str) {
    let mut entries = self.entries();
    let mut n = 0usize;
    for (key, entry) in entries.iter_mut() {
      if key.resource() == resource {
        entry.invalidated = true;
        entry.generation += 1;
        entry.inflight = None;
        n += 1;
      }
    }
    debug!(resource, entries = n, "invalidated");
  }

  /// Drop a single entry outright. A late response for it is discarded.
  pub fn remove(&self, key: &QueryKey) {
    self.entries().remove(key);
  }

  /// Whether an entry exists for this key.
  pub fn contains(&self, key: &QueryKey) -> bool {
    self.entries().contains_key(key)
  }

  /// Register interest in a key, pinning its entry against [`gc`](Self::gc)
  /// until the returned guard is dropped.
  pub fn subscribe(&self, key: &QueryKey) -> QuerySubscription {
    let mut entries = self.entries();
    let entry = entries
      .entry(key.clone())
      .or_insert_with(|| Entry::new(self.inner.default_stale_after));
    entry.subscribers += 1;

    QuerySubscription {
      inner: Arc::clone(&self.inner),
      key: key.clone(),
    }
  }

  /// Evict entries nobody subscribes to that have not been read within the
  /// inactivity window. Entries with a fetch in flight are left for the
  /// generation check to clean up after.
  pub fn gc(&self) {
    let gc_after = self.inner.gc_after;
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|_, entry| entry.subscribers > 0 || entry.last_touched.elapsed() < gc_after);
    let evicted = before - entries.len();
    if evicted > 0 {
      debug!(evicted, "cache gc");
    }
  }
}

/// RAII registration of a live reader of one key; see
/// [`QueryClient::subscribe`].
pub struct QuerySubscription {
  inner: Arc<Inner>,
  key: QueryKey,
}

impl Drop for QuerySubscription {
  fn drop(&mut self) {
    let mut entries = self
      .inner
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if let Some(entry) = entries.get_mut(&self.key) {
      entry.subscribers = entry.subscribers.saturating_sub(1);
      entry.last_touched = Instant::now();
    }
  }
}

fn encode_outcome<T: Serialize>(result: Result<T, ApiError>) -> Result<Value, Arc<ApiError>> {
  match result {
    Ok(data) => serde_json::to_value(&data).map_err(|e| Arc::new(ApiError::Decode(e))),
    Err(e) => Err(Arc::new(e)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::future::join_all;
  use std::sync::atomic::{AtomicU32, Ordering};
  use tokio::time::sleep;

  fn key(resource: &str, id: u32) -> QueryKey {
    QueryKey::new(resource, &serde_json::json!({ "id": id }))
  }

  #[tokio::test]
  async fn test_concurrent_reads_share_one_fetch() {
    let client = QueryClient::new();
    let k = key("parts", 1);
    let calls = Arc::new(AtomicU32::new(0));

    let readers = (0..5).map(|_| {
      let client = client.clone();
      let k = k.clone();
      let calls = calls.clone();
      tokio::spawn(async move {
        client
          .read::<u32, _, _>(&k, ReadOptions::default(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(40)).await;
            Ok(42)
          })
          .await
      })
    });

    let results = join_all(readers).await;
    for result in results {
      assert_eq!(result.unwrap().data, Some(42));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_fresh_hit_performs_no_fetch() {
    let client = QueryClient::new();
    let k = key("parts", 1);
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
      let calls = calls.clone();
      let result = client
        .read::<u32, _, _>(&k, ReadOptions::stale_after(Duration::from_secs(60)), move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(7)
        })
        .await;
      assert_eq!(result.data, Some(7));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_hit_served_while_revalidating() {
    let client = QueryClient::new();
    let k = key("parts", 1);
    let options = ReadOptions::stale_after(Duration::from_millis(50));

    let first = client
      .read::<u32, _, _>(&k, options, || async { Ok(1) })
      .await;
    assert_eq!(first.data, Some(1));
    assert_eq!(first.source, Some(DataSource::Network));

    sleep(Duration::from_millis(60)).await;

    // The old value comes back immediately while the refetch runs.
    let stale = client
      .read::<u32, _, _>(&k, options, || async {
        sleep(Duration::from_millis(20)).await;
        Ok(2)
      })
      .await;
    assert_eq!(stale.data, Some(1));
    assert_eq!(stale.source, Some(DataSource::CacheStale));
    assert!(stale.is_loading);

    sleep(Duration::from_millis(30)).await;

    let refreshed = client
      .read::<u32, _, _>(&k, options, || async { Ok(99) })
      .await;
    assert_eq!(refreshed.data, Some(2));
    assert_eq!(refreshed.source, Some(DataSource::CacheFresh));
  }

  #[tokio::test]
  async fn test_invalidate_forces_refetch_across_parameters() {
    let client = QueryClient::new();
    let page1 = key("parts", 1);
    let page2 = key("parts", 2);
    let other = key("stores", 1);
    let calls = Arc::new(AtomicU32::new(0));

    for k in [&page1, &page2, &other] {
      let calls = calls.clone();
      client
        .read::<u32, _, _>(k, ReadOptions::default(), move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(0)
        })
        .await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    client.invalidate("parts");

    // Both parts keys refetch despite their individual freshness...
    for k in [&page1, &page2] {
      let calls = calls.clone();
      let result = client
        .read::<u32, _, _>(k, ReadOptions::default(), move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(1)
        })
        .await;
      assert_eq!(result.data, Some(1));
      assert_eq!(result.source, Some(DataSource::Network));
    }
    // ...while the stores key is untouched.
    let result = client
      .read::<u32, _, _>(&other, ReadOptions::default(), || async { Ok(1) })
      .await;
    assert_eq!(result.data, Some(0));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
  }

  #[tokio::test]
  async fn test_invalidation_discards_older_inflight_response() {
    let client = QueryClient::new();
    let k = key("parts", 1);
    let options = ReadOptions::stale_after(Duration::from_millis(10));

    client
      .read::<String, _, _>(&k, options, || async { Ok("seed".to_string()) })
      .await;
    sleep(Duration::from_millis(20)).await;

    // Stale read starts a slow background revalidation that will resolve
    // to "old" long after the invalidation below.
    client
      .read::<String, _, _>(&k, options, || async {
        sleep(Duration::from_millis(80)).await;
        Ok("old".to_string())
      })
      .await;

    client.invalidate("parts");

    let fresh = client
      .read::<String, _, _>(&k, options, || async { Ok("new".to_string()) })
      .await;
    assert_eq!(fresh.data.as_deref(), Some("new"));

    // Let the abandoned revalidation land; it must not clobber "new".
    sleep(Duration::from_millis(100)).await;
    let snapshot = client
      .read::<String, _, _>(&k, ReadOptions::enabled(false), || async {
        Ok(String::new())
      })
      .await;
    assert_eq!(snapshot.data.as_deref(), Some("new"));
  }

  #[tokio::test]
  async fn test_abandoned_key_does_not_resurrect() {
    let client = QueryClient::new();
    let k1 = key("parts", 1);
    let k2 = key("parts", 2);

    // Start a slow read of k1, then abandon the key before it resolves.
    let slow = {
      let client = client.clone();
      let k1 = k1.clone();
      tokio::spawn(async move {
        client
          .read::<String, _, _>(&k1, ReadOptions::default(), || async {
            sleep(Duration::from_millis(60)).await;
            Ok("late".to_string())
          })
          .await
      })
    };
    sleep(Duration::from_millis(10)).await;
    client.remove(&k1);

    let result = client
      .read::<String, _, _>(&k2, ReadOptions::default(), || async { Ok("k2".to_string()) })
      .await;
    assert_eq!(result.data.as_deref(), Some("k2"));

    // The late response arrives; the abandoned caller still gets its own
    // value, but neither entry is written.
    assert_eq!(slow.await.unwrap().data.as_deref(), Some("late"));
    assert!(!client.contains(&k1));

    let k2_snapshot = client
      .read::<String, _, _>(&k2, ReadOptions::enabled(false), || async {
        Ok(String::new())
      })
      .await;
    assert_eq!(k2_snapshot.data.as_deref(), Some("k2"));
  }

  #[tokio::test]
  async fn test_error_surfaced_then_superseded_by_next_attempt() {
    let client = QueryClient::new();
    let k = key("parts", 1);
    let calls = Arc::new(AtomicU32::new(0));

    let failed = {
      let calls = calls.clone();
      client
        .read::<u32, _, _>(&k, ReadOptions::default(), move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Err(ApiError::Server {
            status: 500,
            message: "boom".to_string(),
          })
        })
        .await
    };
    assert!(failed.data.is_none());
    assert!(failed.is_error());

    // The next read is the new attempt.
    let calls2 = calls.clone();
    let recovered = client
      .read::<u32, _, _>(&k, ReadOptions::default(), move || async move {
        calls2.fetch_add(1, Ordering::SeqCst);
        Ok(5)
      })
      .await;
    assert_eq!(recovered.data, Some(5));
    assert!(!recovered.is_error());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_failed_revalidation_keeps_serving_prior_data() {
    let client = QueryClient::new();
    let k = key("parts", 1);
    let options = ReadOptions::stale_after(Duration::from_millis(10));

    client
      .read::<u32, _, _>(&k, options, || async { Ok(1) })
      .await;
    sleep(Duration::from_millis(20)).await;

    // Background revalidation fails; the stale value stays on display.
    let during = client
      .read::<u32, _, _>(&k, options, || async {
        Err(ApiError::Server {
          status: 500,
          message: "down".to_string(),
        })
      })
      .await;
    assert_eq!(during.data, Some(1));
    sleep(Duration::from_millis(20)).await;

    // The stored error now rides alongside the retained value.
    let after = client
      .read::<u32, _, _>(&k, options, || async {
        Err(ApiError::Server {
          status: 500,
          message: "still down".to_string(),
        })
      })
      .await;
    assert_eq!(after.data, Some(1));
    assert!(after.is_error());
  }

  #[tokio::test]
  async fn test_disabled_read_is_parked() {
    let client = QueryClient::new();
    let k = key("parts", 1);
    let calls = Arc::new(AtomicU32::new(0));

    let calls_in = calls.clone();
    let result = client
      .read::<u32, _, _>(&k, ReadOptions::enabled(false), move || async move {
        calls_in.fetch_add(1, Ordering::SeqCst);
        Ok(1)
      })
      .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(result.data.is_none());
    assert!(!result.is_loading);
    // Parked reads leave no entry behind either.
    assert!(!client.contains(&k));
  }

  #[tokio::test]
  async fn test_gc_respects_subscriptions() {
    let client = QueryClient::with_windows(Duration::from_secs(3600), Duration::ZERO);
    let k = key("parts", 1);

    client
      .read::<u32, _, _>(&k, ReadOptions::default(), || async { Ok(1) })
      .await;

    let subscription = client.subscribe(&k);
    client.gc();
    assert!(client.contains(&k));

    drop(subscription);
    client.gc();
    assert!(!client.contains(&k));
  }
}
