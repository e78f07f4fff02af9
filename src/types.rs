use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt,
    time::{Duration, Instant},
};
use thiserror::Error;

/// Outcome class of a finished call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    Unimplemented,
    Unavailable,
    Unauthenticated,
    Internal,
}

impl Code {
    fn name(&self) -> &'static str {
        use Code::*;
        match self {
            Ok => "ok",
            Cancelled => "cancelled",
            Unknown => "unknown",
            InvalidArgument => "invalid argument",
            DeadlineExceeded => "deadline exceeded",
            NotFound => "not found",
            Unimplemented => "unimplemented",
            Unavailable => "unavailable",
            Unauthenticated => "unauthenticated",
            Internal => "internal",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status code plus a human readable message, set on a record when its call
/// completes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
#[error("{code}: {message}")]
pub struct Status {
    code: Code,
    message: String,
}

macro_rules! status_constructors {
    ($($fn_name:ident => $code:ident),* $(,)?) => {
        $(
            pub fn $fn_name(message: impl Into<String>) -> Self {
                Self::new(Code::$code, message)
            }
        )*
    };
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    status_constructors! {
        cancelled => Cancelled,
        unknown => Unknown,
        invalid_argument => InvalidArgument,
        deadline_exceeded => DeadlineExceeded,
        not_found => NotFound,
        unimplemented => Unimplemented,
        unavailable => Unavailable,
        unauthenticated => Unauthenticated,
        internal => Internal,
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

/// A request or response body.
///
/// Payloads start out as `Default` buffers and are filled exactly once: the
/// request before submission (client) or on receipt (server), the response by
/// the handler (server) or from the reply (client).
pub trait Payload: Serialize + DeserializeOwned + Default + Send + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Default + Send + 'static {}

/// Deadlines past this are treated as "never".
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `timeout` from now, clamped so huge timeouts cannot overflow.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE))
        .or_else(|| now.checked_add(Duration::from_secs(86400)))
        .unwrap_or(now)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Status> {
    bincode::serialize(value).map_err(|e| Status::internal(format!("encoding payload: {e}")))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Status> {
    bincode::deserialize(bytes)
        .map_err(|e| Status::invalid_argument(format!("decoding payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        name: String,
        times: u32,
    }

    #[test]
    fn payload_survives_the_wire() {
        let greeting = Greeting {
            name: "World".into(),
            times: 3,
        };
        let bytes = encode(&greeting).unwrap();
        assert_eq!(decode::<Greeting>(&bytes).unwrap(), greeting);
    }

    #[test]
    fn garbage_is_an_invalid_argument() {
        let err = decode::<Greeting>(&[0xff]).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn huge_timeouts_are_clamped() {
        let soon = deadline_after(Duration::from_secs(5));
        assert!(soon > Instant::now());
        let never = deadline_after(Duration::from_secs(u64::MAX));
        assert!(never >= Instant::now() + Duration::from_secs(86400 * 365));
        assert!(deadline_after(Duration::MAX) > soon);
    }

    #[test]
    fn status_display() {
        let status = Status::unavailable("connection refused");
        assert_eq!(status.to_string(), "unavailable: connection refused");
        assert!(!status.is_ok());
        assert!(Status::ok().is_ok());
    }
}
