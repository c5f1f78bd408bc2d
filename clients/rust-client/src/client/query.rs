use super::Connection;
use crate::protocol::{ClientError, ClientResult, QueryResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Empty variable bindings; encodes as an empty map.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NoVars {}

impl Connection {
    /// Run one or more statements and return one result per statement, in
    /// statement order.
    pub async fn query<V: Serialize>(
        &self,
        statement: &str,
        vars: V,
    ) -> ClientResult<Vec<QueryResult>> {
        let raw = self.call("query", (statement, vars)).await?;

        raw.deserialized()
            .map_err(|e| ClientError::Decode(format!("Invalid query response: {}", e)))
    }
}

/// Decode the result of statement `index` of a batch into `T`.
pub fn at<T: DeserializeOwned>(results: &[QueryResult], index: usize) -> ClientResult<T> {
    let result = results.get(index).ok_or(ClientError::OutOfRange {
        index,
        len: results.len(),
    })?;

    result.take()
}
