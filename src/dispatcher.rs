use crate::{
    calling::{CallStats, Ledger},
    queue::CompletionQueue,
    runner::WorkerPool,
    Error, Result,
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, warn};

const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Owns a [`CompletionQueue`], the transport runtime that feeds it and the
/// worker threads polling it.
///
/// Workers are started with [`run`](Self::run). [`shutdown`](Self::shutdown)
/// stops new work, waits up to the drain timeout for outstanding records,
/// cancels whatever is left and joins the workers. Dropping the dispatcher
/// shuts it down, so workers never outlive it.
pub struct CompletionDispatcher<T> {
    name: &'static str,
    queue: Arc<CompletionQueue<T>>,
    transport: Handle,
    runtime: Mutex<Option<Runtime>>,
    pool: WorkerPool,
    drain_timeout: Duration,
    stopping: AtomicBool,
}

impl<T: Send + 'static> CompletionDispatcher<T> {
    pub fn new(name: &'static str, transport_threads: usize, drain_timeout: Duration) -> Result<Self> {
        Self::with_ledger(name, transport_threads, drain_timeout, Arc::default())
    }

    /// Like [`new`](Self::new), counting records in an existing ledger.
    pub fn with_ledger(
        name: &'static str,
        transport_threads: usize,
        drain_timeout: Duration,
        ledger: Arc<Ledger>,
    ) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(transport_threads.max(1))
            .thread_name(format!("{name}-io"))
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        Ok(Self {
            name,
            queue: Arc::new(CompletionQueue::new(ledger)),
            transport: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            pool: WorkerPool::default(),
            drain_timeout,
            stopping: AtomicBool::new(false),
        })
    }

    /// Starts `threads` poll loops, each handing ok completions to `dispatch`.
    pub fn run<F>(&self, threads: usize, dispatch: F) -> Result<()>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        if threads == 0 {
            return Err(Error::NoWorkers);
        }
        if self.stopping.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        let dispatch = Arc::new(dispatch);
        for _ in 0..threads {
            self.pool
                .spawn(self.name, Arc::clone(&self.queue), Arc::clone(&dispatch))?;
        }
        debug!(name = self.name, threads, "dispatcher running");
        Ok(())
    }
}

impl<T> CompletionDispatcher<T> {
    pub fn queue(&self) -> &Arc<CompletionQueue<T>> {
        &self.queue
    }

    /// Handle of the runtime transport operations run on.
    pub fn transport(&self) -> &Handle {
        &self.transport
    }

    pub fn stats(&self) -> CallStats {
        self.queue.ledger().stats()
    }

    /// Worker threads started and not yet joined.
    pub fn workers(&self) -> usize {
        self.pool.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.shutdown_with(|| {});
    }

    /// Shuts down, running `stop_accepting` once the queue is sealed and
    /// before draining. Only the first call has any effect.
    pub fn shutdown_with(&self, stop_accepting: impl FnOnce()) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.seal();
        stop_accepting();

        // A poll loop waiting here could be holding one of the records.
        if self.pool.owns_current_thread() {
            debug!(name = self.name, "shutdown from a poll loop, not draining");
        } else if !self.queue.ledger().wait_idle(self.drain_timeout) {
            warn!(
                name = self.name,
                live = self.stats().live(),
                "drain timed out, cancelling outstanding calls"
            );
        }

        self.queue.close();
        if let Some(runtime) = self.runtime.lock().take() {
            // Cancelled operations drop their records on the transport
            // threads; wait for that unless we are inside a runtime.
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(CANCEL_GRACE);
            }
        }
        self.pool.join();
        debug!(name = self.name, stats = ?self.stats(), "dispatcher stopped");
    }
}

impl<T> Drop for CompletionDispatcher<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
