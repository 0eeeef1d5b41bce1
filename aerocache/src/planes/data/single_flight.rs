use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use shared::{Error, FetchError, Result};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Flight<T> {
    result: SharedResult<T>,
    abort: AbortHandle,
}

/// Whether a caller started the work or joined work already running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// In-flight table that collapses concurrent requests for the same key
/// into one execution whose result every caller receives.
///
/// The work runs on its own task, so a caller dropping its future does not
/// cancel it for the others. The entry is removed by the task itself when
/// the work ends, whether it completed or was aborted.
pub struct SingleFlight<K, T>
where
    K: Eq + Hash,
{
    flights: Arc<DashMap<K, Flight<T>>>,
}

struct FlightGuard<K, T>
where
    K: Eq + Hash,
{
    flights: Arc<DashMap<K, Flight<T>>>,
    key: K,
}

impl<K, T> Drop for FlightGuard<K, T>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.flights.remove(&self.key);
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }

    /// Runs `work` unless a flight for `key` is already up, in which case
    /// the caller waits for that one and `work` is dropped unpolled.
    ///
    /// An aborted or panicked flight resolves every waiter with
    /// `SourceFetchFailed { cause: Cancelled }` for `identifier`.
    pub async fn run<F>(&self, key: K, identifier: &str, work: F) -> (Result<T>, Role)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (result, role) = match self.flights.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!("Joining in-flight fetch for {:?}", key);
                (entry.get().result.clone(), Role::Follower)
            }
            Entry::Vacant(entry) => {
                let guard = FlightGuard {
                    flights: Arc::clone(&self.flights),
                    key,
                };
                let handle = tokio::spawn(async move {
                    let _guard = guard;
                    work.await
                });
                let abort = handle.abort_handle();

                let identifier = identifier.to_string();
                let result = async move {
                    handle.await.unwrap_or_else(|err| {
                        if err.is_panic() {
                            warn!("Fetch for '{}' panicked", identifier);
                        }
                        Err(Error::SourceFetchFailed {
                            identifier,
                            cause: FetchError::Cancelled,
                        })
                    })
                }
                .boxed()
                .shared();

                entry.insert(Flight {
                    result: result.clone(),
                    abort,
                });
                (result, Role::Leader)
            }
        };

        (result.await, role)
    }

    /// Aborts the flight for `key`, failing all of its waiters alike.
    /// Returns false when nothing was in flight.
    pub fn cancel(&self, key: &K) -> bool {
        // Clone the handle out so the map shard is not locked while aborting.
        let abort = self.flights.get(key).map(|flight| flight.abort.clone());
        match abort {
            Some(abort) => {
                debug!("Cancelling in-flight fetch for {:?}", key);
                abort.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights.contains_key(key)
    }

    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Debug for SingleFlight<K, T>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn gated(
        calls: &Arc<AtomicUsize>,
        gate: &Arc<Notify>,
        outcome: Result<u32>,
    ) -> impl Future<Output = Result<u32>> + Send + 'static {
        let calls = Arc::clone(calls);
        let gate = Arc::clone(gate);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            outcome
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_one_execution() {
        let flights = SingleFlight::<u8, u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let runs = (0..8).map(|_| flights.run(1, "IAD", gated(&calls, &gate, Ok(42))));
        let release = async {
            tokio::task::yield_now().await;
            gate.notify_one();
        };
        let (results, ()) = tokio::join!(join_all(runs), release);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|(result, _)| matches!(result, Ok(42))));
        let leaders = results.iter().filter(|(_, role)| *role == Role::Leader).count();
        assert_eq!(leaders, 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let flights = SingleFlight::<u8, u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let failure = Err(Error::SourceFetchFailed {
            identifier: "IAD".to_string(),
            cause: FetchError::Status(500),
        });

        let runs = (0..4).map(|_| flights.run(1, "IAD", gated(&calls, &gate, failure.clone())));
        let release = async {
            tokio::task::yield_now().await;
            gate.notify_one();
        };
        let (results, ()) = tokio::join!(join_all(runs), release);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|(result, _)| matches!(
            result,
            Err(Error::SourceFetchFailed {
                cause: FetchError::Status(500),
                ..
            })
        )));
    }

    #[tokio::test]
    async fn test_cancel_releases_all_waiters() {
        let flights = SingleFlight::<u8, u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let runs = (0..3).map(|_| flights.run(7, "SFO", gated(&calls, &gate, Ok(1))));
        let cancel = async {
            tokio::task::yield_now().await;
            assert!(flights.cancel(&7));
        };
        let (results, ()) = tokio::join!(join_all(runs), cancel);

        assert!(results.iter().all(|(result, _)| matches!(
            result,
            Err(Error::SourceFetchFailed {
                cause: FetchError::Cancelled,
                ..
            })
        )));
        assert!(!flights.is_in_flight(&7));
        assert!(!flights.cancel(&7));
    }

    #[tokio::test]
    async fn test_finished_flight_is_not_reused() {
        let flights = SingleFlight::<u8, u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in 1..=2 {
            let calls_in = Arc::clone(&calls);
            let (result, role) = flights
                .run(3, "ORD", async move { Ok(calls_in.fetch_add(1, Ordering::SeqCst) as u32) })
                .await;
            assert_eq!(role, Role::Leader);
            assert_eq!(result.unwrap(), expected - 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flights = SingleFlight::<u8, u32>::new();
        let (a, b) = tokio::join!(
            flights.run(1, "A", async { Ok(1) }),
            flights.run(2, "B", async { Ok(2) }),
        );
        assert_eq!((a.0.unwrap(), a.1), (1, Role::Leader));
        assert_eq!((b.0.unwrap(), b.1), (2, Role::Leader));
    }
}
