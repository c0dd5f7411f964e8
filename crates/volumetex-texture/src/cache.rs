//! Single-flight build cache.
//!
//! A [`BuildCache`] holds at most one finished value and at most one build in
//! flight. Callers that ask while a build is running join it instead of
//! starting another; blocking callers wait on a condition variable and async
//! callers are woken through their [`Waker`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::{Condvar, Mutex};

enum Slot<T> {
    Absent,
    /// Value built before the last invalidation.
    Stale(Arc<T>),
    Building {
        flight: Arc<Flight<T>>,
        /// The data changed after `flight` started; its result is not cached.
        invalidated: bool,
        /// Rebuild requested while an invalidated build was running. It starts
        /// once `flight` completes.
        queued: Option<Arc<Flight<T>>>,
    },
    Ready(Arc<T>),
}

impl<T> Slot<T> {
    fn building(flight: Arc<Flight<T>>) -> Self {
        Self::Building {
            flight,
            invalidated: false,
            queued: None,
        }
    }

    fn settled(value: Option<Arc<T>>) -> Self {
        value.map_or(Self::Absent, Self::Stale)
    }
}

struct FlightState<T> {
    previous: Option<Arc<T>>,
    outcome: Option<Option<Arc<T>>>,
    wakers: Vec<Waker>,
}

/// A build in progress, shared by everyone waiting for it.
pub struct Flight<T> {
    state: Mutex<FlightState<T>>,
    finished: Condvar,
}

impl<T> Flight<T> {
    fn new(previous: Option<Arc<T>>) -> Self {
        Self {
            state: Mutex::new(FlightState {
                previous,
                outcome: None,
                wakers: Vec::new(),
            }),
            finished: Condvar::new(),
        }
    }

    /// Value that was cached before this build started.
    pub fn previous(&self) -> Option<Arc<T>> {
        self.state.lock().previous.clone()
    }

    fn set_previous(&self, previous: Option<Arc<T>>) {
        self.state.lock().previous = previous;
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    /// Block until the build finishes.
    pub fn wait(&self) -> Option<Arc<T>> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.finished.wait(&mut state);
        }
    }

    fn poll_outcome(&self, cx: &Context<'_>) -> Poll<Option<Arc<T>>> {
        let mut state = self.state.lock();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }

    fn finish(&self, outcome: Option<Arc<T>>) {
        let wakers = {
            let mut state = self.state.lock();
            state.outcome = Some(outcome);
            std::mem::take(&mut state.wakers)
        };
        self.finished.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Outcome of [`BuildCache::claim`].
pub enum Claim<T> {
    /// A finished value is cached.
    Ready(Arc<T>),
    /// Another caller's build is running, or a rebuild is queued behind it.
    Joined(Arc<Flight<T>>),
    /// The caller must run the build and then call [`BuildCache::complete`].
    Started(Arc<Flight<T>>),
}

/// Result of [`BuildCache::complete`].
pub struct Completion<T> {
    /// What the flight's waiters received.
    pub outcome: Option<Arc<T>>,
    /// Queued rebuild the caller must run next, then complete in turn.
    pub next: Option<Arc<Flight<T>>>,
}

/// Cached value with single-flight rebuilds.
///
/// At most one build runs at a time. Invalidating during a build lets it
/// finish for its waiters without caching its result, and any request made
/// meanwhile queues one rebuild that starts when the running build completes.
pub struct BuildCache<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Default for BuildCache<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot::Absent),
        }
    }
}

impl<T> BuildCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value, including one that was invalidated or is being rebuilt.
    pub fn current(&self) -> Option<Arc<T>> {
        match &*self.slot.lock() {
            Slot::Absent => None,
            Slot::Stale(value) | Slot::Ready(value) => Some(value.clone()),
            Slot::Building { flight, .. } => flight.previous(),
        }
    }

    /// Value that is valid for the current data.
    pub fn ready(&self) -> Option<Arc<T>> {
        match &*self.slot.lock() {
            Slot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn is_building(&self) -> bool {
        matches!(&*self.slot.lock(), Slot::Building { .. })
    }

    /// Get the cached value, join the running build, or start a new one.
    ///
    /// While an invalidated build is still running this never returns
    /// [`Claim::Started`]; the caller joins the rebuild queued behind it.
    pub fn claim(&self) -> Claim<T> {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Ready(value) => return Claim::Ready(value.clone()),
            Slot::Building {
                flight,
                invalidated: false,
                ..
            } => return Claim::Joined(flight.clone()),
            Slot::Building {
                flight,
                invalidated: true,
                queued,
            } => {
                let next =
                    queued.get_or_insert_with(|| Arc::new(Flight::new(flight.previous())));
                return Claim::Joined(next.clone());
            }
            Slot::Absent | Slot::Stale(_) => {}
        }

        let previous = match std::mem::replace(&mut *slot, Slot::Absent) {
            Slot::Stale(value) => Some(value),
            _ => None,
        };
        let flight = Arc::new(Flight::new(previous));
        *slot = Slot::building(flight.clone());
        Claim::Started(flight)
    }

    /// Finish `flight` and wake everyone waiting on it.
    ///
    /// A successful build becomes the cached value. A failed build (`None`)
    /// leaves the previous value in place, and waiters receive it. An
    /// invalidated build hands its outcome to its waiters only, and a rebuild
    /// queued behind it is returned in [`Completion::next`].
    pub fn complete(&self, flight: &Arc<Flight<T>>, built: Option<Arc<T>>) -> Completion<T> {
        let succeeded = built.is_some();
        let outcome = built.or_else(|| flight.previous());
        let next = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Absent) {
                Slot::Building {
                    flight: running,
                    invalidated,
                    queued,
                } if Arc::ptr_eq(&running, flight) => match (invalidated, queued) {
                    (false, _) => {
                        *slot = match &outcome {
                            Some(value) if succeeded => Slot::Ready(value.clone()),
                            _ => Slot::settled(outcome.clone()),
                        };
                        None
                    }
                    (true, Some(next)) => {
                        next.set_previous(outcome.clone());
                        *slot = Slot::building(next.clone());
                        Some(next)
                    }
                    (true, None) => {
                        *slot = Slot::settled(outcome.clone());
                        None
                    }
                },
                other => {
                    *slot = other;
                    None
                }
            }
        };
        flight.finish(outcome.clone());
        Completion { outcome, next }
    }

    /// Mark the cached value stale so the next claim rebuilds it.
    ///
    /// A running build keeps running but its result is not cached.
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock();
        *slot = match std::mem::replace(&mut *slot, Slot::Absent) {
            Slot::Absent => Slot::Absent,
            Slot::Stale(value) | Slot::Ready(value) => Slot::Stale(value),
            Slot::Building { flight, queued, .. } => Slot::Building {
                flight,
                invalidated: true,
                queued,
            },
        };
    }
}

enum Pending<T> {
    Ready(Option<Arc<T>>),
    Flight(Arc<Flight<T>>),
}

/// Value of a cache lookup that may still be building.
///
/// Await it, or call [`BuildFuture::wait`] to block.
pub struct BuildFuture<T> {
    pending: Pending<T>,
}

impl<T> BuildFuture<T> {
    pub const fn ready(value: Option<Arc<T>>) -> Self {
        Self {
            pending: Pending::Ready(value),
        }
    }

    pub const fn flight(flight: Arc<Flight<T>>) -> Self {
        Self {
            pending: Pending::Flight(flight),
        }
    }

    /// Block the current thread until the value is available.
    pub fn wait(self) -> Option<Arc<T>> {
        match self.pending {
            Pending::Ready(value) => value,
            Pending::Flight(flight) => flight.wait(),
        }
    }
}

impl<T> Future for BuildFuture<T> {
    type Output = Option<Arc<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().pending {
            Pending::Ready(value) => Poll::Ready(value.take()),
            Pending::Flight(flight) => flight.poll_outcome(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn started(cache: &BuildCache<u32>) -> Arc<Flight<u32>> {
        match cache.claim() {
            Claim::Started(flight) => flight,
            _ => panic!("expected a new build"),
        }
    }

    #[test]
    fn concurrent_claims_share_one_flight() {
        let cache = BuildCache::new();
        let flight = started(&cache);
        assert!(cache.is_building());

        let Claim::Joined(joined) = cache.claim() else {
            panic!("expected to join the running build");
        };
        assert!(Arc::ptr_eq(&flight, &joined));

        let value = Arc::new(7);
        cache.complete(&flight, Some(value.clone()));
        assert!(Arc::ptr_eq(&joined.wait().unwrap(), &value));

        let Claim::Ready(cached) = cache.claim() else {
            panic!("expected the cached value");
        };
        assert!(Arc::ptr_eq(&cached, &value));
    }

    #[test]
    fn failed_rebuild_keeps_previous() {
        let cache = BuildCache::new();
        let first = Arc::new(1);
        cache.complete(&started(&cache), Some(first.clone()));

        cache.invalidate();
        assert_eq!(cache.ready(), None);
        assert_eq!(cache.current(), Some(first.clone()));

        let flight = started(&cache);
        assert_eq!(flight.previous(), Some(first.clone()));
        let completion = cache.complete(&flight, None);
        assert!(Arc::ptr_eq(&completion.outcome.unwrap(), &first));
        assert!(completion.next.is_none());
        assert_eq!(cache.current(), Some(first));

        // Stale value triggers a retry
        assert!(matches!(cache.claim(), Claim::Started(_)));
    }

    #[test]
    fn failed_first_build_yields_nothing() {
        let cache: BuildCache<u32> = BuildCache::new();
        let flight = started(&cache);
        assert_eq!(cache.complete(&flight, None).outcome, None);
        assert_eq!(cache.current(), None);
        assert!(!cache.is_building());
    }

    #[test]
    fn invalidated_build_is_not_cached() {
        let cache = BuildCache::new();
        let flight = started(&cache);
        cache.invalidate();
        assert!(cache.is_building());

        let completion = cache.complete(&flight, Some(Arc::new(3)));
        assert_eq!(completion.outcome.as_deref(), Some(&3));
        assert!(completion.next.is_none());
        assert_eq!(cache.ready(), None);
        assert_eq!(cache.current().as_deref(), Some(&3));
        assert!(matches!(cache.claim(), Claim::Started(_)));
    }

    #[test]
    fn rebuild_waits_for_invalidated_build() {
        let cache = BuildCache::new();
        let flight = started(&cache);
        cache.invalidate();

        let Claim::Joined(queued) = cache.claim() else {
            panic!("expected to queue behind the running build");
        };
        assert!(!Arc::ptr_eq(&queued, &flight));
        let Claim::Joined(again) = cache.claim() else {
            panic!("expected to join the queued rebuild");
        };
        assert!(Arc::ptr_eq(&queued, &again));

        let completion = cache.complete(&flight, Some(Arc::new(3)));
        assert_eq!(completion.outcome.as_deref(), Some(&3));
        let next = completion.next.unwrap();
        assert!(Arc::ptr_eq(&next, &queued));
        assert!(cache.is_building());
        assert!(!queued.is_finished());
        assert_eq!(cache.current().as_deref(), Some(&3));

        // Requests made now join the promoted rebuild
        let Claim::Joined(joined) = cache.claim() else {
            panic!("expected to join the rebuild");
        };
        assert!(Arc::ptr_eq(&joined, &queued));

        let completion = cache.complete(&next, Some(Arc::new(4)));
        assert!(completion.next.is_none());
        assert_eq!(queued.wait().as_deref(), Some(&4));
        assert_eq!(cache.ready().as_deref(), Some(&4));
    }

    #[test]
    fn failed_rebuild_after_invalidation_falls_back() {
        let cache = BuildCache::new();
        let flight = started(&cache);
        cache.invalidate();
        let Claim::Joined(queued) = cache.claim() else {
            panic!("expected to queue behind the running build");
        };

        let next = cache.complete(&flight, Some(Arc::new(3))).next.unwrap();
        let completion = cache.complete(&next, None);
        assert_eq!(completion.outcome.as_deref(), Some(&3));
        assert_eq!(queued.wait().as_deref(), Some(&3));
        assert_eq!(cache.ready(), None);
        assert!(!cache.is_building());
    }

    #[test]
    fn blocking_waiter_is_released() {
        let cache = Arc::new(BuildCache::new());
        let flight = started(&cache);

        let waiter = {
            let flight = flight.clone();
            thread::spawn(move || flight.wait())
        };
        cache.complete(&flight, Some(Arc::new(11)));
        assert_eq!(waiter.join().unwrap().as_deref(), Some(&11));
        assert!(flight.is_finished());
    }

    #[test]
    fn future_resolves_when_build_finishes() {
        let cache = Arc::new(BuildCache::new());
        let flight = started(&cache);
        let future = BuildFuture::flight(flight.clone());

        let builder = {
            let cache = cache.clone();
            thread::spawn(move || {
                cache.complete(&flight, Some(Arc::new(5)));
            })
        };
        assert_eq!(pollster::block_on(future).as_deref(), Some(&5));
        builder.join().unwrap();

        assert_eq!(
            pollster::block_on(BuildFuture::<u32>::ready(None)),
            None
        );
    }
}
