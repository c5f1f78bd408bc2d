use std::time::Duration;

use ciborium::Value;
use futures::SinkExt;
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;

use super::{wait_until, Connection, Session};
use crate::protocol::{encode_request, ClientError, ClientResult, Request};
use crate::serial::Serial;

impl Connection {
    /// Send `method` with `params` and wait for the matching response.
    ///
    /// Returns the undecoded result, `Value::Null` for methods without one.
    /// Nothing is retried.
    pub async fn call<P: Serialize>(&self, method: &str, params: P) -> ClientResult<Value> {
        let session = self.session().await?;
        session
            .call(&self.ids, self.config.timeout, method, params)
            .await
    }
}

impl Session {
    pub(crate) async fn call<P: Serialize>(
        &self,
        ids: &Serial,
        timeout: Duration,
        method: &str,
        params: P,
    ) -> ClientResult<Value> {
        let mut closing = self.closing.subscribe();
        if *closing.borrow_and_update() {
            return Err(self.closing_error());
        }

        let id = ids.next_id();
        let mut pending = self.pending.register(id)?;

        let request = Request {
            id,
            method: method.to_string(),
            params,
        };
        let frame = encode_request(&request)?;

        // The window opens before the write
        let deadline = tokio::time::Instant::now() + timeout;
        let written = tokio::select! {
            result = self.write(frame) => Some(result),
            _ = tokio::time::sleep_until(deadline) => None,
            _ = wait_until(&mut closing, |closing| *closing) => return Err(self.closing_error()),
        };
        match written {
            Some(Ok(())) => {}
            Some(Err(_)) if self.is_closing() => return Err(self.closing_error()),
            Some(Err(e)) => return Err(e),
            None => {
                tracing::debug!(id, method, "rpc write timed out");
                return Err(ClientError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                });
            }
        }
        tracing::trace!(id = pending.id(), method, "rpc sent");

        tokio::select! {
            response = pending.recv() => match response {
                Some(response) => response.into_result(method),
                None => Err(self.closing_error()),
            },
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!(id, method, "rpc timed out");
                Err(ClientError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
            _ = wait_until(&mut closing, |closing| *closing) => Err(self.closing_error()),
        }
    }

    fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Writes are serialized: the socket takes one writer at a time.
    async fn write(&self, frame: Vec<u8>) -> ClientResult<()> {
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Binary(frame.into()))
            .await
            .map_err(|e| ClientError::Write(format!("Write failed: {}", e)))
    }
}
