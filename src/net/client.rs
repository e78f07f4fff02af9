use super::{Request, Response};
use crate::{credentials::ChannelCredentials, types::Status};
use async_bincode::{tokio::AsyncBincodeStream, AsyncDestination};
use futures::{SinkExt, StreamExt};
use std::{io, sync::Arc, time::Instant};
use tokio::{io::BufStream, net::TcpStream};
use tracing::debug;

type Framed = AsyncBincodeStream<BufStream<TcpStream>, Response, Request, AsyncDestination>;

/// Where and how calls of one connection are sent.
#[derive(Clone)]
pub(crate) struct Channel {
    address: Arc<str>,
    credentials: Option<Arc<ChannelCredentials>>,
}

impl Channel {
    pub(crate) fn new(address: &str, credentials: Option<ChannelCredentials>) -> Self {
        Self {
            address: address.into(),
            credentials: credentials.map(Arc::new),
        }
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn is_secure(&self) -> bool {
        self.credentials.is_some()
    }

    /// Sends one call and waits for its reply, bounded by `deadline`.
    pub(crate) async fn invoke(
        &self,
        method: &'static str,
        payload: Vec<u8>,
        deadline: Instant,
    ) -> Result<Vec<u8>, Status> {
        let timeout_ms = deadline
            .saturating_duration_since(Instant::now())
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX);
        let exchange = async {
            let mut sock = self.handshake().await?;
            let call = Request::Call {
                id: 0,
                method: method.to_owned(),
                timeout_ms,
                payload,
            };
            sock.send(call).await.map_err(transport_error)?;
            match next_frame(&mut sock).await? {
                Response::Reply { result, .. } => result,
                Response::Rejected(status) => Err(status),
                Response::Accepted => Err(Status::internal("unexpected handshake frame")),
            }
        };
        tokio::time::timeout_at(deadline.into(), exchange)
            .await
            .unwrap_or_else(|_| Err(Status::deadline_exceeded(format!("{method} timed out"))))
    }

    async fn connect(&self) -> io::Result<Framed> {
        let sock = TcpStream::connect(&*self.address).await?;
        sock.set_nodelay(true)?;
        let sock = BufStream::new(sock);
        let sock = AsyncBincodeStream::from(sock).for_async();
        Ok(sock)
    }

    async fn handshake(&self) -> Result<Framed, Status> {
        let mut sock = self
            .connect()
            .await
            .map_err(|e| Status::unavailable(format!("connecting to {}: {e}", self.address)))?;
        let hello = Request::Hello {
            certificate: self
                .credentials
                .as_ref()
                .map(|c| c.root_certificate().as_bytes().to_vec()),
            authority: self
                .credentials
                .as_ref()
                .and_then(|c| c.target_name_override().map(str::to_owned)),
        };
        sock.send(hello).await.map_err(transport_error)?;
        match next_frame(&mut sock).await? {
            Response::Accepted => {
                debug!(address = %self.address, secure = self.is_secure(), "channel established");
                Ok(sock)
            }
            Response::Rejected(status) => Err(status),
            Response::Reply { .. } => Err(Status::internal("reply before handshake")),
        }
    }
}

async fn next_frame(sock: &mut Framed) -> Result<Response, Status> {
    sock.next()
        .await
        .ok_or_else(|| Status::unavailable("connection closed by server"))?
        .map_err(transport_error)
}

fn transport_error(e: bincode::Error) -> Status {
    Status::unavailable(format!("transport: {e}"))
}
