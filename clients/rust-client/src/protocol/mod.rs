//! Wire protocol definitions for the RPC client
//!
//! Every frame is one CBOR message carried in a binary WebSocket frame.

pub mod codec;
pub mod error;
pub mod response;
pub mod types;

pub use ciborium::Value;
pub use codec::{
    decode_message, decode_response, encode_message, encode_request, MAX_MESSAGE_SIZE,
    SUB_PROTOCOL,
};
pub use error::{ClientError, ClientResult};
pub use response::{QueryResult, Response, RpcErr, STATUS_ERR, STATUS_OK};
pub use types::{Datetime, NsUserAuth, Request, TAG_DATETIME};
