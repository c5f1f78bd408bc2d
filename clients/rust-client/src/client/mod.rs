mod builder;
mod dispatch;
mod pending;
mod query;
mod rpc;
mod session;

#[cfg(test)]
mod tests;

pub use builder::{ClientConfig, ConnectionBuilder};
pub use query::{at, NoVars};

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{watch, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use self::dispatch::Dispatcher;
use self::pending::PendingTable;
use crate::protocol::{ClientError, ClientResult, SUB_PROTOCOL};
use crate::serial::Serial;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsWriter = futures::stream::SplitSink<WsStream, Message>;
pub(crate) type WsReader = futures::stream::SplitStream<WsStream>;

/// Everything that exists only while connected. Dropped as a whole on close.
pub(crate) struct Session {
    host: String,
    namespace: RwLock<Option<String>>,
    database: RwLock<Option<String>>,
    pending: Arc<PendingTable>,
    writer: tokio::sync::Mutex<WsWriter>,
    closing: watch::Sender<bool>,
    failure: watch::Receiver<Option<ClientError>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// The error a call reports when the connection goes away underneath it.
    fn closing_error(&self) -> ClientError {
        self.failure.borrow().clone().unwrap_or(ClientError::Closed)
    }
}

/// A single multiplexed RPC connection.
///
/// Calls may be issued concurrently from any number of tasks through a shared
/// reference; responses are matched to callers by request id, not by order.
/// A closed connection can be connected again, to the same or another host.
pub struct Connection {
    config: ClientConfig,
    ids: Serial,
    state: AsyncRwLock<Option<Arc<Session>>>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            ids: Serial::new(),
            state: AsyncRwLock::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open the socket to `host` (`host:port`) and start the dispatch task.
    ///
    /// Connecting again to the host already bound is a no-op; connecting to
    /// another one fails until [`Connection::close`] has run.
    pub async fn connect(&self, host: &str) -> ClientResult<()> {
        let mut state = self.state.write().await;

        if let Some(session) = state.as_ref() {
            if session.host == host {
                return Ok(());
            }
            return Err(ClientError::Conflict {
                current: session.host.clone(),
                requested: host.to_string(),
            });
        }

        let url = self.config.rpc_url(host)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Dial(format!("Invalid url {}: {}", url, e)))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUB_PROTOCOL));

        let (ws, _) = tokio::time::timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                ClientError::Dial(format!(
                    "Connecting to {} timed out after {:?}",
                    url, self.config.connect_timeout
                ))
            })?
            .map_err(|e| ClientError::Dial(format!("Failed to connect to {}: {}", url, e)))?;

        let (writer, reader) = ws.split();
        let (closing, closing_rx) = watch::channel(false);
        let (failure_tx, failure) = watch::channel(None);
        let pending = Arc::new(PendingTable::default());

        self.ids.reset();
        let dispatcher = Dispatcher::new(Arc::clone(&pending), closing_rx, failure_tx);
        let handle = tokio::spawn(dispatcher.run(reader));

        *state = Some(Arc::new(Session {
            host: host.to_string(),
            namespace: RwLock::new(None),
            database: RwLock::new(None),
            pending,
            writer: tokio::sync::Mutex::new(writer),
            closing,
            failure,
            dispatch: Mutex::new(Some(handle)),
        }));

        tracing::info!("Connected to {}", url);
        Ok(())
    }

    /// Tear the connection down and return to the disconnected state.
    ///
    /// Every in-flight call is released with the closing error. Calling it on
    /// a disconnected connection does nothing. Failures while sending the
    /// close frame and closing the socket are all reported together.
    pub async fn close(&self) -> ClientResult<()> {
        let mut state = self.state.write().await;
        let Some(session) = state.take() else {
            return Ok(());
        };

        session.closing.send_replace(true);

        let mut errors = Vec::new();
        let limit = self.config.close_timeout;
        let handshake = async {
            // Calls blocked on a write give the lock up once closing is set
            let mut writer = session.writer.lock().await;

            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: Utf8Bytes::from_static(""),
            };
            let sent = writer
                .send(Message::Close(Some(frame)))
                .await
                .map_err(|e| ClientError::Write(format!("Failed to send close frame: {}", e)));

            let closed = match writer.close().await {
                Err(e) if !is_expected_close(&e) => {
                    Err(ClientError::Write(format!("Failed to close socket: {}", e)))
                }
                _ => Ok(()),
            };
            (sent, closed)
        };
        match tokio::time::timeout(limit, handshake).await {
            Ok((sent, closed)) => errors.extend(sent.err().into_iter().chain(closed.err())),
            Err(_) => errors.push(ClientError::Write(format!(
                "Closing handshake with {} timed out after {:?}",
                session.host, limit
            ))),
        }

        let handle = session.dispatch.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Dispatch task for {} ended abnormally: {}", session.host, e);
            }
        }

        self.ids.reset();
        tracing::info!("Closed connection to {}", session.host);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ClientError::Close(errors))
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_some()
    }

    pub async fn host(&self) -> Option<String> {
        self.state.read().await.as_ref().map(|s| s.host.clone())
    }

    pub async fn namespace(&self) -> Option<String> {
        let session = self.state.read().await.clone()?;
        let namespace = session.namespace.read().clone();
        namespace
    }

    pub async fn database(&self) -> Option<String> {
        let session = self.state.read().await.clone()?;
        let database = session.database.read().clone();
        database
    }

    /// The read failure recorded by the dispatch task, if any.
    pub async fn closing_error(&self) -> Option<ClientError> {
        let session = self.state.read().await.clone()?;
        let failure = session.failure.borrow().clone();
        failure
    }

    /// Resolves once the connection is closing or its socket has failed.
    /// Resolves immediately when not connected.
    pub async fn closed(&self) {
        let Some(session) = self.state.read().await.clone() else {
            return;
        };

        let mut closing = session.closing.subscribe();
        let mut failure = session.failure.clone();
        drop(session);

        tokio::select! {
            _ = wait_until(&mut closing, |closing| *closing) => {}
            _ = wait_until(&mut failure, |failure| failure.is_some()) => {}
        }
    }

    pub(crate) async fn session(&self) -> ClientResult<Arc<Session>> {
        self.state.read().await.clone().ok_or(ClientError::Closed)
    }

    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        match self.state.read().await.as_ref() {
            Some(session) => session.pending.len(),
            None => 0,
        }
    }
}

/// Wait until `ready` holds for the watched value, or the sender is gone.
pub(crate) async fn wait_until<T>(rx: &mut watch::Receiver<T>, mut ready: impl FnMut(&T) -> bool) {
    loop {
        let done = ready(&*rx.borrow_and_update());
        if done || rx.changed().await.is_err() {
            return;
        }
    }
}

/// Close outcomes that mean the socket is already down the normal way:
/// a completed handshake, a going-away peer, or an abnormal drop.
fn is_expected_close(err: &WsError) -> bool {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => true,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}
