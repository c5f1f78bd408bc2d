use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the RPC client.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// The WebSocket could not be established
    #[error("Dial error: {0}")]
    Dial(String),

    /// `connect` was asked for a second host while the first is still bound
    #[error("Connection conflict between {current} and {requested}")]
    Conflict { current: String, requested: String },

    /// An incoming frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// An outgoing message could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Message too large")]
    MessageTooLarge,

    /// The socket failed while reading; fatal to the dispatch task
    #[error("Read error: {0}")]
    Read(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("'{method}' rpc timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// The server answered with an error object
    #[error("'{method}' rpc ({id}) failed ({code}): {message}")]
    Server {
        method: String,
        id: u32,
        code: i64,
        message: String,
    },

    #[error("Connection is closed")]
    Closed,

    /// A request id was registered twice; the allocator never hands out duplicates
    #[error("rpc request id {0} is in use")]
    InUse(u32),

    #[error("No namespace")]
    NoNamespace,

    #[error("Index {index} out of range for {len} results")]
    OutOfRange { index: usize, len: usize },

    /// A statement of a query batch failed; carries the server's message
    #[error("{0}")]
    Query(String),

    /// Every failure collected while tearing a connection down
    #[error("{}", join_errors(.0))]
    Close(Vec<ClientError>),
}

pub type ClientResult<T> = Result<T, ClientError>;

fn join_errors(errors: &[ClientError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
