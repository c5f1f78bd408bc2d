use super::error::{ClientError, ClientResult};
use super::response::Response;
use super::types::Request;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// WebSocket sub-protocol that selects CBOR framing on the server
pub const SUB_PROTOCOL: &str = "cbor";

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub fn encode_request<P: Serialize>(req: &Request<P>) -> ClientResult<Vec<u8>> {
    encode_message(req)
}

pub fn decode_response(data: &[u8]) -> ClientResult<Response> {
    decode_message(data)
}

pub fn encode_message<T: Serialize>(msg: &T) -> ClientResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(msg, &mut payload)
        .map_err(|e| ClientError::Encode(format!("Serialization failed: {}", e)))?;

    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ClientError::MessageTooLarge);
    }

    Ok(payload)
}

pub fn decode_message<T: DeserializeOwned>(data: &[u8]) -> ClientResult<T> {
    ciborium::from_reader(data)
        .map_err(|e| ClientError::Decode(format!("Deserialization failed: {}", e)))
}
