use dashmap::DashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Collapses concurrent calls for the same key into one execution.
///
/// Every caller that arrives while a flight for its key is open waits for that
/// flight and receives a clone of its output. If the caller running the work
/// is cancelled, one of the waiters runs its own work instead. A flight is
/// forgotten as soon as it completes, so later calls start a new one.
pub struct SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    flights: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            flights: DashMap::new(),
        }
    }

    pub async fn run<F, Fut>(&self, key: &K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let flight = self.flights.entry(key.clone()).or_default().value().clone();
        let guard = FlightGuard {
            flights: &self.flights,
            key,
            flight,
        };
        guard.flight.get_or_init(work).await.clone()
    }

    /// Number of keys with an open flight.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

/// Closes the flight when its caller finishes or is dropped.
///
/// A completed flight is removed at once. An abandoned one is removed only
/// by the last caller holding it, so remaining waiters can still take over.
struct FlightGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
{
    flights: &'a DashMap<K, Arc<OnceCell<V>>>,
    key: &'a K,
    flight: Arc<OnceCell<V>>,
}

impl<K, V> Drop for FlightGuard<'_, K, V>
where
    K: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        // Callers clone the cell under the shard lock, so the count is stable here.
        self.flights.remove_if(self.key, |_, current| {
            Arc::ptr_eq(current, &self.flight)
                && (self.flight.initialized() || Arc::strong_count(current) <= 2)
        });
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Debug for SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_execution() {
        let flights = Arc::new(SingleFlight::<String, usize>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run(&"key".to_string(), || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        runs.fetch_add(1, Ordering::SeqCst) + 1
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flights = SingleFlight::<&str, usize>::new();
        let runs = AtomicUsize::new(0);

        for want in 1..=3 {
            let got = flights
                .run(&"key", || async { runs.fetch_add(1, Ordering::SeqCst) + 1 })
                .await;
            assert_eq!(got, want);
        }
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share() {
        let flights = SingleFlight::<&str, &str>::new();
        let (a, b) = tokio::join!(
            flights.run(&"a", || async { "from a" }),
            flights.run(&"b", || async { "from b" }),
        );
        assert_eq!((a, b), ("from a", "from b"));
    }

    #[tokio::test]
    async fn test_cancelled_sole_caller_closes_flight() {
        let flights = SingleFlight::<String, usize>::new();

        for i in 0..100 {
            let key = format!("key-{i}");
            let call = flights.run(&key, || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                0
            });
            let timed_out = tokio::time::timeout(Duration::from_millis(1), call).await;
            assert!(timed_out.is_err());
        }

        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_waiter_takes_over_cancelled_leader() {
        let flights = Arc::new(SingleFlight::<&'static str, &'static str>::new());

        let leader = {
            let flights = flights.clone();
            tokio::spawn(async move {
                flights
                    .run(&"key", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        "leader"
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let flights = flights.clone();
            tokio::spawn(async move { flights.run(&"key", || async { "waiter" }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        let got = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, "waiter");
        assert_eq!(flights.in_flight(), 0);
    }
}
