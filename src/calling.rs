use crate::{net::server::Responder, types::Status, RpcMethod};
use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Counts call records created and disposed by one dispatcher.
#[derive(Debug, Default)]
pub struct Ledger {
    created: AtomicU64,
    disposed: AtomicU64,
    lock: Mutex<()>,
    idle: Condvar,
}

impl Ledger {
    pub fn stats(&self) -> CallStats {
        CallStats {
            created: self.created.load(Ordering::Acquire),
            disposed: self.disposed.load(Ordering::Acquire),
        }
    }

    /// Blocks until every record has been disposed, or `timeout` elapses.
    /// Returns whether the ledger went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while self.stats().live() > 0 {
            if self.idle.wait_until(&mut guard, deadline).timed_out() {
                return self.stats().live() == 0;
            }
        }
        true
    }

    fn track(self: &Arc<Self>) -> Tracked {
        self.created.fetch_add(1, Ordering::AcqRel);
        Tracked(Arc::clone(self))
    }
}

/// Snapshot of a [`Ledger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStats {
    pub created: u64,
    pub disposed: u64,
}

impl CallStats {
    /// Records currently alive: registered, in a worker's hands, or in flight.
    pub fn live(&self) -> u64 {
        self.created.saturating_sub(self.disposed)
    }
}

/// Held by every record; disposal is counted when it drops.
struct Tracked(Arc<Ledger>);

impl Drop for Tracked {
    fn drop(&mut self) {
        let _guard = self.0.lock.lock();
        self.0.disposed.fetch_add(1, Ordering::AcqRel);
        self.0.idle.notify_all();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Pending,
    Completed,
}

/// State of a client-issued call.
pub struct ClientCall<M: RpcMethod> {
    status: ClientStatus,
    deadline: Instant,
    request: M::Request,
    response: M::Response,
    outcome: Status,
    _tracked: Tracked,
    _method: PhantomData<fn() -> M>,
}

impl<M: RpcMethod> ClientCall<M> {
    pub(crate) fn new(request: M::Request, deadline: Instant, ledger: &Arc<Ledger>) -> Self {
        Self {
            status: ClientStatus::Pending,
            deadline,
            request,
            response: M::Response::default(),
            outcome: Status::unknown("call has not completed"),
            _tracked: ledger.track(),
            _method: PhantomData,
        }
    }

    pub fn method(&self) -> &'static str {
        M::NAME
    }

    pub fn status(&self) -> ClientStatus {
        self.status
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn request(&self) -> &M::Request {
        &self.request
    }

    /// Only meaningful when [`outcome`](Self::outcome) is ok.
    pub fn response(&self) -> &M::Response {
        &self.response
    }

    pub fn outcome(&self) -> &Status {
        &self.outcome
    }

    pub fn into_response(self) -> Result<M::Response, Status> {
        if self.outcome.is_ok() {
            Ok(self.response)
        } else {
            Err(self.outcome)
        }
    }

    pub(crate) fn complete(&mut self, reply: Result<Vec<u8>, Status>) {
        self.status = ClientStatus::Completed;
        match reply.and_then(|bytes| crate::types::decode::<M::Response>(&bytes)) {
            Ok(response) => {
                self.response = response;
                self.outcome = Status::ok();
            }
            Err(status) => self.outcome = status,
        }
    }
}

impl<M: RpcMethod> fmt::Debug for ClientCall<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCall")
            .field("method", &M::NAME)
            .field("status", &self.status)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

/// Which transport operation a server record is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Allocated, not yet registered as an acceptor.
    Created,
    /// Registered as an acceptor; surfaces once a request arrived.
    Processing,
    /// Response write started; surfaces once it finished.
    Finished,
}

/// State of a server-accepted call.
pub struct ServerCall<M: RpcMethod> {
    pub(crate) status: CallStatus,
    pub(crate) deadline: Option<Instant>,
    pub(crate) request: M::Request,
    pub(crate) response: M::Response,
    pub(crate) outcome: Status,
    pub(crate) responder: Option<Responder>,
    _tracked: Tracked,
    _method: PhantomData<fn() -> M>,
}

impl<M: RpcMethod> ServerCall<M> {
    pub(crate) fn new(ledger: &Arc<Ledger>) -> Self {
        Self {
            status: CallStatus::Created,
            deadline: None,
            request: M::Request::default(),
            response: M::Response::default(),
            outcome: Status::unknown("call has not been processed"),
            responder: None,
            _tracked: ledger.track(),
            _method: PhantomData,
        }
    }

    pub fn method(&self) -> &'static str {
        M::NAME
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// Set on receipt from the caller's remaining timeout.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn request(&self) -> &M::Request {
        &self.request
    }

    pub fn response(&self) -> &M::Response {
        &self.response
    }

    pub fn outcome(&self) -> &Status {
        &self.outcome
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

impl<M: RpcMethod> fmt::Debug for ServerCall<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCall")
            .field("method", &M::NAME)
            .field("status", &self.status)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}
