use crate::{
    calling::{CallStats, ClientCall},
    config::{ClientConfig, ConnectionConfig},
    credentials::ChannelCredentials,
    dispatcher::CompletionDispatcher,
    net::client::Channel,
    queue::CompletionQueue,
    types::{deadline_after, encode},
    CallbackHandler, Error, Result, RpcMethod,
};
use std::{sync::Arc, time::Duration};
use tokio::runtime::Handle;
use tracing::{debug, trace};

/// The client side dispatcher: a completion queue shared by any number of
/// [`ClientConnection`]s, whose completed calls are handed to one
/// [`CallbackHandler`].
pub struct Client<C> {
    dispatcher: CompletionDispatcher<C>,
}

impl<C: Send + 'static> Client<C> {
    pub fn run<H>(config: &ClientConfig, handler: H) -> Result<Self>
    where
        H: CallbackHandler<C> + 'static,
    {
        if config.threads == 0 {
            return Err(Error::NoWorkers);
        }
        let dispatcher = CompletionDispatcher::new(
            "cqrpc-client",
            config.transport_threads,
            config.drain_timeout(),
        )?;
        dispatcher.run(config.threads, move |call| handler.on_message(call))?;
        Ok(Self { dispatcher })
    }

    /// Opens a connection whose calls complete on this client's queue.
    pub fn connect(&self, config: &ConnectionConfig) -> Result<ClientConnection<C>> {
        ClientConnection::new(config, self)
    }
}

impl<C> Client<C> {
    pub fn stats(&self) -> CallStats {
        self.dispatcher.stats()
    }

    pub fn workers(&self) -> usize {
        self.dispatcher.workers()
    }

    /// Waits for outstanding calls (up to the drain timeout) and joins the
    /// workers. Idempotent.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

/// A channel to one server address.
pub struct ClientConnection<C> {
    channel: Channel,
    deadline: Duration,
    queue: Arc<CompletionQueue<C>>,
    transport: Handle,
}

impl<C: Send + 'static> ClientConnection<C> {
    /// Loads the channel's credentials, if any. Nothing touches the network
    /// until the first call.
    pub fn new(config: &ConnectionConfig, client: &Client<C>) -> Result<Self> {
        if config.address.is_empty() {
            return Err(Error::EmptyAddress);
        }
        let credentials = config
            .certificate
            .as_ref()
            .map(|path| ChannelCredentials::load(path, config.target_domain.clone()))
            .transpose()?;
        let channel = Channel::new(&config.address, credentials);
        debug!(address = %config.address, secure = channel.is_secure(), "connection configured");
        Ok(Self {
            channel,
            deadline: config.deadline(),
            queue: Arc::clone(client.dispatcher.queue()),
            transport: client.dispatcher.transport().clone(),
        })
    }

    pub fn address(&self) -> &str {
        self.channel.address()
    }

    pub fn is_secure(&self) -> bool {
        self.channel.is_secure()
    }

    /// Starts `M` with the connection's default deadline.
    pub fn begin_call<M>(&self, request: M::Request) -> Result<()>
    where
        M: RpcMethod,
        C: From<ClientCall<M>>,
    {
        self.begin_call_with_timeout::<M>(request, self.deadline)
    }

    /// Starts `M`; the handler receives the record once it completes.
    pub fn begin_call_with_timeout<M>(&self, request: M::Request, timeout: Duration) -> Result<()>
    where
        M: RpcMethod,
        C: From<ClientCall<M>>,
    {
        let registration = self.queue.register().ok_or(Error::ShutDown)?;
        let mut call = ClientCall::<M>::new(request, deadline_after(timeout), self.queue.ledger());
        let channel = self.channel.clone();
        trace!(method = M::NAME, address = channel.address(), "call started");
        self.transport.spawn(async move {
            let reply = match encode(call.request()) {
                Ok(payload) => channel.invoke(M::NAME, payload, call.deadline()).await,
                Err(status) => Err(status),
            };
            call.complete(reply);
            registration.complete(C::from(call), true);
        });
        Ok(())
    }
}
