//! The shared completion queue.
//!
//! A record travels through the queue by value: registering yields a
//! [`Registration`], the transport consumes it together with the record when
//! the operation finishes, and exactly one worker receives the record back from
//! [`CompletionQueue::next`]. Nothing is ever addressed by pointer, so a record
//! cannot be completed twice or freed while still registered.

use crate::calling::Ledger;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::trace;

/// One completed operation.
#[derive(Debug)]
pub struct Event<T> {
    pub tag: T,
    /// `false` when the operation was cancelled or could not be carried out.
    pub ok: bool,
}

pub struct CompletionQueue<T> {
    sender: Mutex<Option<Sender<Event<T>>>>,
    receiver: Receiver<Event<T>>,
    sealed: AtomicBool,
    ledger: Arc<Ledger>,
}

impl<T> CompletionQueue<T> {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            sealed: AtomicBool::new(false),
            ledger,
        }
    }

    /// Registers a new operation. `None` once the queue is sealed.
    pub fn register(&self) -> Option<Registration<T>> {
        if self.sealed.load(Ordering::Acquire) {
            return None;
        }
        self.register_continuation()
    }

    /// Registers a follow-up operation of a call that already surfaced, such
    /// as writing a server response. Still allowed while sealed; `None` once
    /// closed.
    pub fn register_continuation(&self) -> Option<Registration<T>> {
        self.sender.lock().as_ref().map(|sender| Registration {
            sender: sender.clone(),
        })
    }

    /// Blocks until an event is available. Returns `None` once the queue is
    /// closed and every outstanding registration has completed or been dropped.
    pub fn next(&self) -> Option<Event<T>> {
        self.receiver.recv().ok()
    }

    /// Stops new work from being registered. Idempotent.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Stops all registrations. Idempotent; returns whether this call closed it.
    pub fn close(&self) -> bool {
        self.seal();
        self.sender.lock().take().is_some()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }
}

/// The right to deliver exactly one completion.
pub struct Registration<T> {
    sender: Sender<Event<T>>,
}

impl<T> Registration<T> {
    pub fn complete(self, tag: T, ok: bool) {
        // The receiver only goes away together with the queue; the record is
        // disposed right here in that case.
        if self.sender.send(Event { tag, ok }).is_err() {
            trace!("completion queue gone, disposing record");
        }
    }
}
