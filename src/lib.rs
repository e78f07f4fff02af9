//! Asynchronous remote calls dispatched through a shared completion queue.
//!
//! Every outstanding call, client-issued or server-accepted, is a typed record
//! ([`ClientCall`], [`ServerCall`]) that travels by value: it is handed to the
//! transport together with a [`Registration`], and comes back on the
//! [`CompletionQueue`] when the operation finishes. A fixed pool of worker
//! threads polls the queue and hands each record to the code for its method.
//!
//! The records a queue carries form a closed enum declared with
//! [`client_calls!`] or [`server_calls!`], so resolving a completion is an
//! exhaustive `match`.
//!
//! ```ignore
//! rpc_method!(pub SayHello(HelloRequest) -> HelloReply);
//!
//! client_calls! {
//!     pub enum Reply { SayHello(SayHello) }
//! }
//!
//! let client = Client::run(&ClientConfig::default(), |reply: Reply| match reply {
//!     Reply::SayHello(call) => println!("{:?}", call.into_response()),
//! })?;
//! let conn = client.connect(&ConnectionConfig::new("127.0.0.1:50051"))?;
//! conn.begin_call::<SayHello>(HelloRequest { name: "World".into() })?;
//! ```

mod calling;
mod client;
pub mod config;
mod credentials;
mod dispatcher;
mod error;
mod macros;
mod net;
mod queue;
mod runner;
mod server;
mod types;

pub use calling::{CallStats, CallStatus, ClientCall, ClientStatus, Ledger, ServerCall};
pub use client::{Client, ClientConnection};
pub use config::{ClientConfig, Config, ConnectionConfig, ServerConfig, TlsConfig};
pub use credentials::{ChannelCredentials, Credential, ServerIdentity};
pub use dispatcher::CompletionDispatcher;
pub use error::{Error, Result};
pub use queue::{CompletionQueue, Event, Registration};
pub use server::{HostHandle, ServerCalls, ServerHost};
pub use types::{Code, Payload, Status};

/// A remote method: a name and a request/response payload pair.
pub trait RpcMethod: 'static {
    const NAME: &'static str;
    type Request: Payload;
    type Response: Payload;
}

/// Server-side logic of one method.
pub trait MethodHandler<M: RpcMethod> {
    fn call(&self, request: &M::Request) -> Result<M::Response, Status>;
}

/// Receives every completed client call of a [`Client`].
///
/// Runs on the client's worker threads; the record is disposed when it is
/// dropped.
pub trait CallbackHandler<C>: Send + Sync {
    fn on_message(&self, call: C);
}

impl<C, F> CallbackHandler<C> for F
where
    F: Fn(C) + Send + Sync,
{
    fn on_message(&self, call: C) {
        self(call)
    }
}
