pub(crate) mod client;
pub(crate) mod server;

use crate::types::Status;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub(crate) enum Request {
    /// First frame on every connection.
    Hello {
        certificate: Option<Vec<u8>>,
        authority: Option<String>,
    },
    Call {
        id: u64,
        method: String,
        timeout_ms: u64,
        payload: Vec<u8>,
    },
}

#[derive(Serialize, Deserialize, Debug)]
pub(crate) enum Response {
    Accepted,
    Rejected(Status),
    Reply {
        id: u64,
        result: Result<Vec<u8>, Status>,
    },
}
