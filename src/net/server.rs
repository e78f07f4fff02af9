use crate::{
    credentials::ServerIdentity,
    net::{Request, Response},
    types::{deadline_after, Status},
};
use async_bincode::tokio::{AsyncBincodeReader, AsyncBincodeWriter};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    io::BufReader,
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    runtime::Handle,
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, info, trace, warn};

struct WriteOp {
    frame: Response,
    done: Option<oneshot::Sender<bool>>,
}

type ReplySink = mpsc::UnboundedSender<WriteOp>;

/// A call read off a connection, waiting for an acceptor.
pub(crate) struct Incoming {
    id: u64,
    method: String,
    deadline: Instant,
    payload: Vec<u8>,
    sink: ReplySink,
}

impl Incoming {
    pub(crate) fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Answers without involving a call record.
    pub(crate) fn reject(self, status: Status) {
        trace!(id = self.id, method = %self.method, %status, "rejecting call");
        let frame = Response::Reply {
            id: self.id,
            result: Err(status),
        };
        _ = self.sink.send(WriteOp { frame, done: None });
    }

    pub(crate) fn into_responder(self) -> Responder {
        Responder {
            id: self.id,
            sink: self.sink,
        }
    }
}

/// Completion handle of an accepted call: the way back to its connection.
pub(crate) struct Responder {
    id: u64,
    sink: ReplySink,
}

impl Responder {
    /// Writes the reply; resolves to whether it reached the socket.
    pub(crate) async fn send(self, result: Result<Vec<u8>, Status>) -> bool {
        let (done, written) = oneshot::channel();
        let frame = Response::Reply {
            id: self.id,
            result,
        };
        if self.sink.send(WriteOp { frame, done: Some(done) }).is_err() {
            return false;
        }
        written.await.unwrap_or(false)
    }
}

/// An acceptor registered for one method.
pub(crate) trait PendingAccept: Send {
    /// Hands over an incoming call. Returns the acceptor back if the call was
    /// rejected instead of accepted.
    fn offer(self: Box<Self>, incoming: Incoming) -> Option<Box<dyn PendingAccept>>;

    /// Completes the acceptor as not-ok.
    fn cancel(self: Box<Self>);
}

#[derive(Default)]
struct MethodSlot {
    acceptors: VecDeque<Box<dyn PendingAccept>>,
    backlog: VecDeque<Incoming>,
}

#[derive(Default)]
struct SlotTable {
    closed: bool,
    methods: HashMap<&'static str, MethodSlot>,
}

/// Matches incoming calls with registered acceptors, per method.
///
/// A call that finds no acceptor waits in the method's backlog until the next
/// registration, so calls are never refused while the host runs.
#[derive(Default)]
pub(crate) struct AcceptSlots {
    table: Mutex<SlotTable>,
}

impl AcceptSlots {
    pub(crate) fn register(&self, method: &'static str, mut acceptor: Box<dyn PendingAccept>) {
        let mut table = self.table.lock();
        if table.closed {
            drop(table);
            acceptor.cancel();
            return;
        }
        let slot = table.methods.entry(method).or_default();
        while let Some(incoming) = slot.backlog.pop_front() {
            match acceptor.offer(incoming) {
                None => return,
                Some(unused) => acceptor = unused,
            }
        }
        slot.acceptors.push_back(acceptor);
    }

    fn deliver(&self, incoming: Incoming) {
        let mut table = self.table.lock();
        if table.closed {
            drop(table);
            incoming.reject(Status::unavailable("server is shutting down"));
            return;
        }
        let Some(slot) = table.methods.get_mut(incoming.method.as_str()) else {
            let status = Status::unimplemented(format!("no method named {}", incoming.method));
            incoming.reject(status);
            return;
        };
        match slot.acceptors.pop_front() {
            Some(acceptor) => {
                if let Some(unused) = acceptor.offer(incoming) {
                    slot.acceptors.push_front(unused);
                }
            }
            None => slot.backlog.push_back(incoming),
        }
    }

    /// Cancels every pending acceptor and rejects the backlog. Later
    /// registrations are cancelled on arrival.
    pub(crate) fn close(&self) {
        let methods = {
            let mut table = self.table.lock();
            table.closed = true;
            std::mem::take(&mut table.methods)
        };
        for (method, slot) in methods {
            debug!(method, acceptors = slot.acceptors.len(), backlog = slot.backlog.len(), "closing accept slot");
            slot.acceptors.into_iter().for_each(|acceptor| acceptor.cancel());
            for incoming in slot.backlog {
                incoming.reject(Status::unavailable("server is shutting down"));
            }
        }
    }

    #[cfg(test)]
    fn waiting(&self, method: &str) -> (usize, usize) {
        let table = self.table.lock();
        table
            .methods
            .get(method)
            .map_or((0, 0), |slot| (slot.acceptors.len(), slot.backlog.len()))
    }
}

/// Stops the accept loop when dropped or stopped.
pub(crate) struct Listener {
    stop: watch::Sender<bool>,
}

impl Listener {
    pub(crate) fn spawn(
        transport: &Handle,
        listener: TcpListener,
        slots: Arc<AcceptSlots>,
        identity: Option<Arc<ServerIdentity>>,
    ) -> Self {
        let (stop, stopped) = watch::channel(false);
        transport.spawn(accept_loop(listener, slots, identity, stopped));
        Self { stop }
    }

    pub(crate) fn stop(&self) {
        _ = self.stop.send(true);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    slots: Arc<AcceptSlots>,
    identity: Option<Arc<ServerIdentity>>,
    mut stopped: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stopped.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((sock, peer)) => {
                    tokio::spawn(serve_connection(sock, peer, Arc::clone(&slots), identity.clone()));
                }
                Err(e) => warn!("accepting connection: {e}"),
            },
        }
    }
    info!("listener stopped");
}

async fn serve_connection(
    sock: TcpStream,
    peer: SocketAddr,
    slots: Arc<AcceptSlots>,
    identity: Option<Arc<ServerIdentity>>,
) {
    _ = sock.set_nodelay(true);
    let (read, write) = sock.into_split();
    let mut frames = AsyncBincodeReader::<_, Request>::from(BufReader::new(read));
    let (sink, queued) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(write, queued));

    match frames.next().await {
        Some(Ok(Request::Hello {
            certificate,
            authority,
        })) => {
            if let Err(status) = authenticate(identity.as_deref(), certificate.as_deref()) {
                debug!(%peer, %status, "handshake rejected");
                _ = sink.send(WriteOp {
                    frame: Response::Rejected(status),
                    done: None,
                });
                return;
            }
            debug!(%peer, authority = authority.as_deref(), "handshake accepted");
            _ = sink.send(WriteOp {
                frame: Response::Accepted,
                done: None,
            });
        }
        Some(Ok(Request::Call { .. })) => {
            let status = Status::unauthenticated("call before handshake");
            _ = sink.send(WriteOp {
                frame: Response::Rejected(status),
                done: None,
            });
            return;
        }
        Some(Err(e)) => {
            debug!(%peer, "reading handshake: {e}");
            return;
        }
        None => return,
    }

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Request::Call {
                id,
                method,
                timeout_ms,
                payload,
            }) => slots.deliver(Incoming {
                id,
                method,
                deadline: deadline_after(Duration::from_millis(timeout_ms)),
                payload,
                sink: sink.clone(),
            }),
            Ok(Request::Hello { .. }) => debug!(%peer, "ignoring repeated handshake"),
            Err(e) => {
                debug!(%peer, "reading frame: {e}");
                break;
            }
        }
    }
    trace!(%peer, "connection reader done");
}

async fn write_loop(write: OwnedWriteHalf, mut queued: mpsc::UnboundedReceiver<WriteOp>) {
    let mut writer = AsyncBincodeWriter::<_, Response, _>::from(write).for_async();
    while let Some(WriteOp { frame, done }) = queued.recv().await {
        let written = writer.send(frame).await.is_ok();
        if let Some(done) = done {
            _ = done.send(written);
        }
        if !written {
            break;
        }
    }
}

/// A server with an identity only talks to clients that trust its
/// certificate; a server without one only to unauthenticated clients.
fn authenticate(identity: Option<&ServerIdentity>, presented: Option<&[u8]>) -> Result<(), Status> {
    match (identity, presented) {
        (None, None) => Ok(()),
        (Some(identity), Some(certificate)) if identity.certificate().as_bytes() == certificate => Ok(()),
        (Some(_), Some(_)) => Err(Status::unauthenticated("certificate is not trusted by this server")),
        (Some(_), None) => Err(Status::unauthenticated("server requires a secure channel")),
        (None, Some(_)) => Err(Status::unauthenticated("server does not offer a secure channel")),
    }
}
