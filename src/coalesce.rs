// Coalesced async operations
// At most one operation runs at a time; concurrent callers attach to it

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type SharedOp<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// What the first caller decides to do when nothing is in flight
pub enum Start<T, E> {
    /// Run this operation and share it with every concurrent caller
    Run(BoxFuture<'static, Result<T, E>>),
    /// Resolve immediately without installing anything
    Skip(Result<T, E>),
}

struct InFlight<T, E> {
    id: u64,
    op: SharedOp<T, E>,
}

/// Single-flight slot for one kind of operation
pub struct Coalescer<T, E> {
    slot: Arc<Mutex<Option<InFlight<T, E>>>>,
    next_id: AtomicU64,
}

/// Handle returned by [`Coalescer::attach`]
pub struct Pending<T, E> {
    state: PendingState<T, E>,
}

enum PendingState<T, E> {
    Ready(Result<T, E>),
    Started(SharedOp<T, E>),
    Joined(SharedOp<T, E>),
}

impl<T, E> Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<tokio::task::JoinError> + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Join the in-flight operation, or let `start` decide what to do.
    ///
    /// The check and the install happen under one lock, so two callers can
    /// never both observe an empty slot and start separate operations.
    /// `start` runs while the lock is held and must not block.
    ///
    /// A started operation is spawned onto the runtime: it runs to completion
    /// even if every caller stops waiting, and it empties the slot before its
    /// result is visible to any waiter.
    pub fn attach<F>(&self, start: F) -> Pending<T, E>
    where
        F: FnOnce() -> Start<T, E>,
    {
        let mut slot = lock(&self.slot);

        if let Some(in_flight) = slot.as_ref() {
            return Pending {
                state: PendingState::Joined(in_flight.op.clone()),
            };
        }

        let op = match start() {
            Start::Skip(result) => {
                return Pending {
                    state: PendingState::Ready(result),
                }
            }
            Start::Run(op) => op,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task_slot = Arc::clone(&self.slot);
        let handle = tokio::spawn(async move {
            // Also runs on panic or runtime shutdown
            let release = ReleaseSlot {
                slot: task_slot,
                id,
            };
            let result = op.await;
            drop(release);
            result
        });

        let shared = flatten_join(handle).boxed().shared();
        *slot = Some(InFlight {
            id,
            op: shared.clone(),
        });

        Pending {
            state: PendingState::Started(shared),
        }
    }

    /// Whether an operation is currently outstanding
    pub fn is_in_flight(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

impl<T, E> Default for Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<tokio::task::JoinError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Pending<T, E>
where
    T: Clone,
    E: Clone,
{
    /// True if this caller attached to an operation someone else started
    pub fn is_joined(&self) -> bool {
        matches!(self.state, PendingState::Joined(_))
    }

    /// True if this caller started the operation
    pub fn is_started(&self) -> bool {
        matches!(self.state, PendingState::Started(_))
    }

    pub async fn wait(self) -> Result<T, E> {
        match self.state {
            PendingState::Ready(result) => result,
            PendingState::Started(op) | PendingState::Joined(op) => op.await,
        }
    }
}

struct ReleaseSlot<T, E> {
    slot: Arc<Mutex<Option<InFlight<T, E>>>>,
    id: u64,
}

impl<T, E> Drop for ReleaseSlot<T, E> {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|f| f.id == self.id) {
            *slot = None;
        }
    }
}

fn flatten_join<T, E>(
    handle: tokio::task::JoinHandle<Result<T, E>>,
) -> impl Future<Output = Result<T, E>> + Send
where
    T: Send + 'static,
    E: From<tokio::task::JoinError> + Send + 'static,
{
    handle.map(|joined| joined.unwrap_or_else(|e| Err(E::from(e))))
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefreshFailure;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    type TestCoalescer = Coalescer<u32, RefreshFailure>;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let coalescer = TestCoalescer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let first = {
            let runs = runs.clone();
            coalescer.attach(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                Start::Run(
                    async move {
                        let _ = gate.await;
                        Ok(7)
                    }
                    .boxed(),
                )
            })
        };
        assert!(first.is_started());
        assert!(coalescer.is_in_flight());

        let mut joined = Vec::new();
        for _ in 0..4 {
            let runs = runs.clone();
            let pending = coalescer.attach(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                Start::Skip(Ok(0))
            });
            assert!(pending.is_joined());
            joined.push(pending);
        }

        release.send(()).unwrap();

        assert_eq!(first.wait().await, Ok(7));
        for pending in joined {
            assert_eq!(pending.wait().await, Ok(7));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!coalescer.is_in_flight());
    }

    #[tokio::test]
    async fn test_failure_clears_slot() {
        let coalescer = TestCoalescer::new();

        let pending =
            coalescer.attach(|| Start::Run(async { Err(RefreshFailure::NoRefreshToken) }.boxed()));
        assert_eq!(pending.wait().await, Err(RefreshFailure::NoRefreshToken));
        assert!(!coalescer.is_in_flight());

        // A later caller starts a fresh operation
        let pending = coalescer.attach(|| Start::Run(async { Ok(1) }.boxed()));
        assert!(pending.is_started());
        assert_eq!(pending.wait().await, Ok(1));
    }

    #[tokio::test]
    async fn test_skip_installs_nothing() {
        let coalescer = TestCoalescer::new();
        let pending = coalescer.attach(|| Start::Skip(Ok(3)));
        assert!(!pending.is_started());
        assert!(!pending.is_joined());
        assert!(!coalescer.is_in_flight());
        assert_eq!(pending.wait().await, Ok(3));
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_wedge_slot() {
        let coalescer = TestCoalescer::new();

        let pending = coalescer.attach(|| {
            Start::Run(
                async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(5)
                }
                .boxed(),
            )
        });
        drop(pending);
        assert!(coalescer.is_in_flight());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!coalescer.is_in_flight());
    }

    #[tokio::test]
    async fn test_panicking_operation_reports_abort() {
        let coalescer = TestCoalescer::new();
        fn explode() -> u32 {
            panic!("refresh blew up");
        }

        let pending = coalescer.attach(|| Start::Run(async { Ok(explode()) }.boxed()));

        assert!(matches!(
            pending.wait().await,
            Err(RefreshFailure::Aborted(_))
        ));
        assert!(!coalescer.is_in_flight());

        let next = coalescer.attach(|| Start::Skip(Ok(9)));
        assert!(!next.is_joined());
        assert_eq!(next.wait().await, Ok(9));
    }
}
