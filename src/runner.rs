use crate::{
    queue::{CompletionQueue, Event},
    Error, Result,
};
use parking_lot::Mutex;
use std::{
    cell::Cell,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, trace, warn};

static NEXT_POOL: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the pool whose poll loop runs on this thread; 0 for none.
    static POLLING: Cell<u64> = const { Cell::new(0) };
}

/// OS threads blocked on a [`CompletionQueue`].
pub(crate) struct WorkerPool {
    id: u64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self {
            id: NEXT_POOL.fetch_add(1, Ordering::Relaxed),
            workers: Mutex::default(),
        }
    }
}

impl WorkerPool {
    pub(crate) fn spawn<T, F>(&self, name: &str, queue: Arc<CompletionQueue<T>>, dispatch: Arc<F>) -> Result<()>
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let mut workers = self.workers.lock();
        let index = workers.len();
        let pool = self.id;
        let handle = thread::Builder::new()
            .name(format!("{name}-{index}"))
            .spawn(move || poll_loop(pool, &queue, &*dispatch))
            .map_err(Error::Spawn)?;
        workers.push(handle);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.lock().len()
    }

    /// Whether the current thread runs one of this pool's poll loops.
    pub(crate) fn owns_current_thread(&self) -> bool {
        POLLING.with(Cell::get) == self.id
    }

    /// Joins every worker except the calling thread, which finishes its own
    /// loop once the queue drains.
    pub(crate) fn join(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        let me = thread::current().id();
        for worker in workers {
            if worker.thread().id() == me {
                continue;
            }
            let name = worker.thread().name().map(str::to_owned);
            if worker.join().is_err() {
                warn!(worker = name.as_deref().unwrap_or("?"), "worker panicked");
            }
        }
    }
}

fn poll_loop<T, F: Fn(T)>(pool: u64, queue: &CompletionQueue<T>, dispatch: &F) {
    POLLING.with(|polling| polling.set(pool));
    while let Some(Event { tag, ok }) = queue.next() {
        if !ok {
            // Cancelled or failed: not dispatched, disposed here.
            trace!("not-ok completion");
            drop(tag);
            continue;
        }
        // The record unwinds with the panic and is disposed; the loop goes on.
        if panic::catch_unwind(AssertUnwindSafe(|| dispatch(tag))).is_err() {
            warn!("dispatch panicked, record dropped");
        }
    }
    debug!("completion queue drained");
}
