use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::pending::PendingTable;
use super::{wait_until, WsReader};
use crate::protocol::{decode_response, ClientError};

/// Background reader of one connection. Routes every decoded response to the
/// caller waiting for its id and runs until the connection closes.
pub(crate) struct Dispatcher {
    pending: Arc<PendingTable>,
    closing: watch::Receiver<bool>,
    failure: watch::Sender<Option<ClientError>>,
}

impl Dispatcher {
    pub(crate) fn new(
        pending: Arc<PendingTable>,
        closing: watch::Receiver<bool>,
        failure: watch::Sender<Option<ClientError>>,
    ) -> Self {
        Self {
            pending,
            closing,
            failure,
        }
    }

    pub(crate) async fn run(mut self, mut reader: WsReader) {
        loop {
            let message = tokio::select! {
                biased;
                _ = wait_until(&mut self.closing, |closing| *closing) => break,
                message = reader.next() => message,
            };

            match message {
                Some(Ok(Message::Binary(data))) => self.dispatch(&data),
                Some(Ok(Message::Text(text))) => self.dispatch(text.as_str().as_bytes()),
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) => format!("Connection closed by peer: {}", frame),
                        None => "Connection closed by peer".to_string(),
                    };
                    self.fail(ClientError::Read(reason)).await;
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(WsError::AlreadyClosed | WsError::ConnectionClosed)) => {
                    tracing::debug!("Socket closed locally, dispatch task exiting");
                    break;
                }
                Some(Err(e)) => {
                    self.fail(ClientError::Read(format!("Read failed: {}", e)))
                        .await;
                    break;
                }
                None => {
                    self.fail(ClientError::Read("Connection closed".to_string()))
                        .await;
                    break;
                }
            }
        }
    }

    fn dispatch(&self, data: &[u8]) {
        match decode_response(data) {
            Ok(response) => {
                self.pending.deliver(response);
            }
            Err(e) => tracing::warn!("Dropping undecodable frame ({} bytes): {}", data.len(), e),
        }
    }

    /// Record a fatal read error, then hold the task until `close` has run so
    /// teardown never races the reader.
    async fn fail(&mut self, error: ClientError) {
        tracing::warn!("{}", error);
        self.failure.send_replace(Some(error));
        wait_until(&mut self.closing, |closing| *closing).await;
    }
}
