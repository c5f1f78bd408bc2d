use super::error::{ClientError, ClientResult};
use ciborium::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Status the server reports for a statement that succeeded
pub const STATUS_OK: &str = "OK";
/// Status the server reports for a statement that failed
pub const STATUS_ERR: &str = "ERR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErr {
    pub code: i64,
    pub message: String,
}

/// An RPC response. `result` stays an undecoded CBOR tree until a caller
/// asks for a concrete type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Response {
    pub fn ok(id: u32, result: Value) -> Self {
        Response {
            id,
            error: None,
            result: Some(result),
        }
    }

    pub fn ok_empty(id: u32) -> Self {
        Response {
            id,
            error: None,
            result: None,
        }
    }

    pub fn error(id: u32, code: i64, message: &str) -> Self {
        Response {
            id,
            error: Some(RpcErr {
                code,
                message: message.to_string(),
            }),
            result: None,
        }
    }

    /// Turn the envelope into the call's outcome.
    pub fn into_result(self, method: &str) -> ClientResult<Value> {
        match self.error {
            Some(err) => Err(ClientError::Server {
                method: method.to_string(),
                id: self.id,
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Outcome of one statement in a query batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub status: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl QueryResult {
    pub fn ok(result: Value) -> Self {
        QueryResult {
            status: STATUS_OK.to_string(),
            result: Some(result),
            time: None,
        }
    }

    pub fn err(message: &str) -> Self {
        QueryResult {
            status: STATUS_ERR.to_string(),
            result: Some(Value::Text(message.to_string())),
            time: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Decode the statement's result into `T`.
    ///
    /// A failed statement carries its error text as the result; that text
    /// becomes a [`ClientError::Query`].
    pub fn take<T: DeserializeOwned>(&self) -> ClientResult<T> {
        let raw = self.result.as_ref().unwrap_or(&Value::Null);

        if !self.is_ok() {
            let message: String = raw.deserialized().map_err(|e| {
                ClientError::Decode(format!("Invalid error message in query result: {}", e))
            })?;
            return Err(ClientError::Query(message));
        }

        raw.deserialized()
            .map_err(|e| ClientError::Decode(format!("Invalid query result: {}", e)))
    }
}
