use crate::{
    calling::{CallStats, CallStatus, Ledger, ServerCall},
    config::ServerConfig,
    dispatcher::CompletionDispatcher,
    net::server::{AcceptSlots, Incoming, Listener, PendingAccept},
    queue::{CompletionQueue, Registration},
    types::{decode, encode, Status},
    Error, MethodHandler, Result, RpcMethod,
};
use parking_lot::Mutex;
use std::{
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tokio::{net::TcpListener, runtime::Handle};
use tracing::{debug, info, trace, warn};

/// The closed set of server call records a host dispatches, usually declared
/// with [`server_calls!`](crate::server_calls).
pub trait ServerCalls: Send + Sized + 'static {
    type Service: Send + Sync + 'static;

    /// Registers the initial acceptor of every method.
    fn ready(host: &HostHandle<Self>) -> Result<()>;

    /// Advances a surfaced record.
    fn process(self, service: &Self::Service, host: &HostHandle<Self>);
}

/// What poll loops use to register acceptors and finish calls.
pub struct HostHandle<C> {
    queue: Arc<CompletionQueue<C>>,
    slots: Arc<AcceptSlots>,
    transport: Handle,
}

impl<C> Clone for HostHandle<C> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            slots: Arc::clone(&self.slots),
            transport: self.transport.clone(),
        }
    }
}

impl<C: Send + 'static> HostHandle<C> {
    /// Registers a fresh acceptor for `M`.
    pub fn accept<M>(&self) -> Result<()>
    where
        M: RpcMethod,
        C: From<ServerCall<M>>,
    {
        let registration = self.queue.register().ok_or(Error::ShutDown)?;
        let mut call = ServerCall::<M>::new(self.queue.ledger());
        call.status = CallStatus::Processing;
        self.slots
            .register(M::NAME, Box::new(Acceptor { call, registration }));
        Ok(())
    }

    /// Starts writing the response; the record surfaces again as `Finished`.
    fn finish<M>(&self, mut call: ServerCall<M>)
    where
        M: RpcMethod,
        C: From<ServerCall<M>>,
    {
        let Some(responder) = call.responder.take() else {
            return;
        };
        let Some(registration) = self.queue.register_continuation() else {
            debug!(method = M::NAME, "queue closed, dropping response");
            return;
        };
        let result = if call.outcome.is_ok() {
            encode(&call.response)
        } else {
            Err(call.outcome.clone())
        };
        call.status = CallStatus::Finished;
        self.transport.spawn(async move {
            let written = responder.send(result).await;
            registration.complete(C::from(call), written);
        });
    }
}

/// A server record waiting in an accept slot.
struct Acceptor<M: RpcMethod, C> {
    call: ServerCall<M>,
    registration: Registration<C>,
}

impl<M, C> PendingAccept for Acceptor<M, C>
where
    M: RpcMethod,
    C: From<ServerCall<M>> + Send + 'static,
{
    fn offer(self: Box<Self>, incoming: Incoming) -> Option<Box<dyn PendingAccept>> {
        let request = match decode::<M::Request>(incoming.payload()) {
            Ok(request) => request,
            Err(status) => {
                incoming.reject(status);
                return Some(self);
            }
        };
        let Acceptor {
            mut call,
            registration,
        } = *self;
        call.request = request;
        call.deadline = Some(incoming.deadline());
        call.responder = Some(incoming.into_responder());
        registration.complete(C::from(call), true);
        None
    }

    fn cancel(self: Box<Self>) {
        let Acceptor { call, registration } = *self;
        registration.complete(C::from(call), false);
    }
}

impl<M: RpcMethod> ServerCall<M> {
    /// Runs the step this record's status calls for: a received request gets
    /// a replacement acceptor, then the handler, then the response write; a
    /// finished write disposes the record.
    pub fn advance<S, C>(mut self, service: &S, host: &HostHandle<C>)
    where
        S: MethodHandler<M>,
        C: From<ServerCall<M>> + Send + 'static,
    {
        match self.status {
            CallStatus::Processing => {
                if let Err(e) = host.accept::<M>() {
                    debug!(method = M::NAME, "acceptor not replaced: {e}");
                }
                let result = if self.is_expired() {
                    Err(Status::deadline_exceeded("deadline passed before processing"))
                } else {
                    panic::catch_unwind(AssertUnwindSafe(|| service.call(&self.request)))
                        .unwrap_or_else(|_| {
                            warn!(method = M::NAME, "handler panicked");
                            Err(Status::internal("handler panicked"))
                        })
                };
                match result {
                    Ok(response) => {
                        self.response = response;
                        self.outcome = Status::ok();
                    }
                    Err(status) => self.outcome = status,
                }
                host.finish(self);
            }
            CallStatus::Finished | CallStatus::Created => {
                trace!(method = M::NAME, outcome = %self.outcome, "call done");
            }
        }
    }
}

struct Running<C> {
    dispatcher: CompletionDispatcher<C>,
    slots: Arc<AcceptSlots>,
    listener: Listener,
    local_addr: SocketAddr,
}

/// A listening endpoint serving the methods of `C`.
///
/// Every method keeps one acceptor registered while the host runs; a received
/// request registers the next one before it is processed.
pub struct ServerHost<C: ServerCalls> {
    service: Arc<C::Service>,
    ledger: Arc<Ledger>,
    running: Mutex<Option<Running<C>>>,
}

impl<C: ServerCalls> ServerHost<C> {
    pub fn new(service: C::Service) -> Self {
        Self {
            service: Arc::new(service),
            ledger: Arc::default(),
            running: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &C::Service {
        &self.service
    }

    /// Binds the listener, starts the workers and registers the initial
    /// acceptors. Fails without starting anything on a bad configuration.
    pub fn run(&self, config: &ServerConfig) -> Result<()> {
        if config.address.is_empty() {
            return Err(Error::EmptyAddress);
        }
        if config.threads == 0 {
            return Err(Error::NoWorkers);
        }
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let identity = config.identity()?.map(Arc::new);

        let dispatcher = CompletionDispatcher::with_ledger(
            "cqrpc-server",
            config.transport_threads,
            config.drain_timeout(),
            Arc::clone(&self.ledger),
        )?;
        let listener = bind(&config.address, dispatcher.transport())?;
        let local_addr = listener.local_addr()?;

        let slots = Arc::new(AcceptSlots::default());
        let host = HostHandle {
            queue: Arc::clone(dispatcher.queue()),
            slots: Arc::clone(&slots),
            transport: dispatcher.transport().clone(),
        };
        let service = Arc::clone(&self.service);
        let worker_host = host.clone();
        dispatcher.run(config.threads, move |call: C| call.process(&service, &worker_host))?;
        if let Err(e) = C::ready(&host) {
            dispatcher.shutdown_with(|| slots.close());
            return Err(e);
        }

        let secure = identity.is_some();
        let listener = Listener::spawn(dispatcher.transport(), listener, Arc::clone(&slots), identity);
        info!(address = %local_addr, threads = config.threads, secure, "server listening");
        *running = Some(Running {
            dispatcher,
            slots,
            listener,
            local_addr,
        });
        Ok(())
    }

    /// Stops the listener, drains outstanding calls and joins the workers.
    /// Idempotent, callable from any thread.
    pub fn shutdown(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let Running {
            dispatcher,
            slots,
            listener,
            local_addr,
        } = running;
        dispatcher.shutdown_with(|| {
            listener.stop();
            slots.close();
        });
        info!(address = %local_addr, stats = ?dispatcher.stats(), "server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Bound address while running; useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local_addr)
    }

    /// Worker threads currently alive.
    pub fn workers(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map_or(0, |running| running.dispatcher.workers())
    }

    /// Records created and disposed over the host's lifetime.
    pub fn stats(&self) -> CallStats {
        self.ledger.stats()
    }
}

impl<C: ServerCalls> Drop for ServerHost<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bind(address: &str, transport: &Handle) -> Result<TcpListener> {
    let bind_error = |source| Error::Bind {
        address: address.to_owned(),
        source,
    };
    let listener = std::net::TcpListener::bind(address).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;
    let _entered = transport.enter();
    TcpListener::from_std(listener).map_err(bind_error)
}
