//! Worker pool for work that must not run on a module loop.
//!
//! Work runs on tokio's blocking threads, at most `threads` at a time. Its
//! completion is queued back to the owning module, which runs it on the
//! loop via [`WorkerPool::dispatch`]. Work must not touch module state.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Semaphore};

use crate::recovery;
use crate::types::{Error, Result};

/// Completion closure run on the module loop.
pub struct Completion(Box<dyn FnOnce() + Send>);

impl Completion {
    fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

type Job = Box<dyn FnOnce() -> Completion + Send>;

/// Wrap `work` and `done` into a job that yields the completion to queue.
fn job<T, W, D>(work: W, done: D) -> Job
where
    T: Send + 'static,
    W: FnOnce() -> T + Send + 'static,
    D: FnOnce(Result<T>) + Send + 'static,
{
    Box::new(move || {
        let outcome = recovery::with_recovery(|| Ok(work()), "worker");
        Completion(Box::new(move || done(outcome)))
    })
}

/// Receiving side of a module's worker pool.
#[derive(Debug)]
pub struct WorkerPool {
    handle: WorkerHandle,
    rx: mpsc::Receiver<Completion>,
}

impl WorkerPool {
    /// `capacity` bounds queued completions (zero disables the pool);
    /// `threads` bounds concurrently running work.
    pub fn new(capacity: usize, threads: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            handle: WorkerHandle {
                tx,
                enabled: capacity > 0,
                pending: Arc::new(AtomicUsize::new(0)),
                permits: Arc::new(Semaphore::new(threads.max(1))),
            },
            rx,
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub async fn next_completion(&mut self) -> Option<Completion> {
        self.rx.recv().await
    }

    /// Run one completion on the calling (module) task.
    pub fn dispatch(&self, completion: Completion) {
        self.handle.settle();
        if let Err(fault) = recovery::catch(|| completion.run()) {
            tracing::error!(trace = fault.trace().unwrap_or(""), "worker completion {}", fault);
        }
    }

    /// Wait for and dispatch completions until nothing is pending.
    pub async fn close(&mut self) {
        while !self.is_idle() {
            match self.rx.recv().await {
                Some(completion) => self.dispatch(completion),
                None => break,
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.handle.pending() == 0
    }

    pub fn pending(&self) -> usize {
        self.handle.pending()
    }
}

/// Cloneable submission side of a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Completion>,
    enabled: bool,
    pending: Arc<AtomicUsize>,
    permits: Arc<Semaphore>,
}

impl WorkerHandle {
    /// Run `work` on a pool thread, then `done` with its result on the module loop.
    ///
    /// A panic in `work` reaches `done` as `Err(Error::Fault)`.
    pub fn go<T, W, D>(&self, work: W, done: D) -> Result<()>
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        D: FnOnce(Result<T>) + Send + 'static,
    {
        if !self.enabled {
            return Err(Error::Unavailable("worker pool"));
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        let job = job(work, done);
        let worker = self.clone();
        tokio::spawn(async move {
            worker.execute(job).await;
        });
        Ok(())
    }

    /// Context whose work runs one item at a time, in submission order.
    pub fn linear(&self) -> Result<LinearContext> {
        if !self.enabled {
            return Err(Error::Unavailable("worker pool"));
        }
        Ok(LinearContext {
            pool: self.clone(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            running: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    async fn execute(&self, job: Job) {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::error!("worker semaphore closed, job dropped");
                self.settle();
                return;
            }
        };
        let completion = match tokio::task::spawn_blocking(job).await {
            Ok(completion) => completion,
            Err(err) => {
                tracing::error!("worker thread failed: {}", err);
                self.settle();
                return;
            }
        };
        drop(permit);

        if self.tx.send(completion).await.is_err() {
            tracing::warn!("worker pool closed, completion dropped");
        }
    }

    fn settle(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Serialised submission onto a worker pool.
#[derive(Clone)]
pub struct LinearContext {
    pool: WorkerHandle,
    queue: Arc<Mutex<VecDeque<Job>>>,
    running: Arc<tokio::sync::Mutex<()>>,
}

impl LinearContext {
    /// Like [`WorkerHandle::go`], but work items never overlap and start in
    /// the order they were submitted.
    pub fn go<T, W, D>(&self, work: W, done: D)
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        D: FnOnce(Result<T>) + Send + 'static,
    {
        self.pool.pending.fetch_add(1, Ordering::AcqRel);
        match self.queue.lock() {
            Ok(mut queue) => queue.push_back(job(work, done)),
            Err(poisoned) => poisoned.into_inner().push_back(job(work, done)),
        }

        let ctx = self.clone();
        tokio::spawn(async move {
            // Whoever holds `running` takes the oldest job, so order holds
            // even if these tasks wake out of order.
            let _running = ctx.running.lock().await;
            let next = match ctx.queue.lock() {
                Ok(mut queue) => queue.pop_front(),
                Err(poisoned) => poisoned.into_inner().pop_front(),
            };
            if let Some(job) = next {
                ctx.pool.execute(job).await;
            }
        });
    }
}

impl fmt::Debug for LinearContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearContext").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completion_receives_work_result() {
        let mut pool = WorkerPool::new(4, 2);
        let seen = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&seen);
        pool.handle()
            .go(|| 6 * 7, move |r| *sink.lock().unwrap() = Some(r.unwrap()))
            .unwrap();
        assert!(!pool.is_idle());

        let completion = pool.next_completion().await.unwrap();
        pool.dispatch(completion);
        assert_eq!(*seen.lock().unwrap(), Some(42));
        assert!(pool.is_idle());
    }

    #[tokio::test]
    async fn test_panicking_work_still_completes() {
        let mut pool = WorkerPool::new(4, 2);
        let seen = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&seen);
        pool.handle()
            .go(
                || -> u8 { panic!("work failed") },
                move |r| *sink.lock().unwrap() = Some(r.unwrap_err().to_string()),
            )
            .unwrap();

        pool.close().await;
        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some("handler fault: work failed")
        );
    }

    #[tokio::test]
    async fn test_zero_capacity_is_unavailable() {
        let pool = WorkerPool::new(0, 1);
        let err = pool.handle().go(|| (), |_| ()).unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        assert!(pool.handle().linear().is_err());
    }

    #[tokio::test]
    async fn test_close_drains_all_pending() {
        let mut pool = WorkerPool::new(8, 4);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let done = Arc::clone(&done);
            pool.handle()
                .go(
                    || std::thread::sleep(Duration::from_millis(5)),
                    move |_| {
                        done.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .unwrap();
        }

        pool.close().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert!(pool.is_idle());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_linear_context_preserves_order() {
        let mut pool = WorkerPool::new(16, 4);
        let linear = pool.handle().linear().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10u32 {
            let order = Arc::clone(&order);
            linear.go(
                move || {
                    std::thread::sleep(Duration::from_millis(u64::from(10 - i)));
                    order.lock().unwrap().push(i);
                },
                |_| (),
            );
        }

        pool.close().await;
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }
}
