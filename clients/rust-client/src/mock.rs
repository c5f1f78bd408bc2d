//! In-process stand-in for the database's RPC endpoint.
//!
//! Accepts WebSocket connections, echoes the requested sub-protocol, decodes
//! every request and answers according to a handler. Used by this crate's
//! tests and, with the `mock` feature, by dependents.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ciborium::Value;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request as HsRequest, Response as HsResponse};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use crate::protocol::{decode_message, encode_message, QueryResult, Request, Response};

/// What the mock does with one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(Response),
    /// Respond later without holding up other requests.
    Delayed(Duration, Response),
    /// Send these bytes as a binary frame.
    Raw(Vec<u8>),
    /// Never answer.
    Silent,
    /// Drop the TCP connection without a close handshake.
    Hangup,
    /// Keep the connection open but never read from it again.
    Stall,
}

pub type Handler = Arc<dyn Fn(&Request<Value>) -> Vec<Reply> + Send + Sync>;

type Writer = futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

pub struct MockServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Request<Value>>>>,
    connections: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start<F>(handler: F) -> std::io::Result<Self>
    where
        F: Fn(&Request<Value>) -> Vec<Reply> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handler: Handler = Arc::new(handler);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_task = {
            let requests = Arc::clone(&requests);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        stream,
                        Arc::clone(&handler),
                        Arc::clone(&requests),
                    ));
                }
            })
        };

        Ok(Self {
            addr,
            requests,
            connections,
            accept_task,
        })
    }

    /// A small fake database: `use` and `signin` succeed, `query` answers
    /// each statement of the batch (see [`answer_statement`]).
    pub async fn database() -> std::io::Result<Self> {
        let counter = Arc::new(AtomicI64::new(0));
        Self::start(move |req| match req.method.as_str() {
            "use" => vec![Reply::Respond(Response::ok(req.id, Value::Null))],
            "signin" => vec![Reply::Respond(Response::ok(
                req.id,
                Value::Text("token".to_string()),
            ))],
            "query" => {
                let statement = match &req.params {
                    Value::Array(params) => params.first().and_then(|s| s.as_text()).unwrap_or(""),
                    _ => "",
                };
                let results: Vec<QueryResult> = split_statements(statement)
                    .iter()
                    .map(|s| answer_statement(s, &counter))
                    .collect();
                match Value::serialized(&results) {
                    Ok(value) => vec![Reply::Respond(Response::ok(req.id, value))],
                    Err(e) => vec![Reply::Respond(Response::error(req.id, -32000, &e.to_string()))],
                }
            }
            other => vec![Reply::Respond(Response::error(
                req.id,
                -32601,
                &format!("Method not found: {}", other),
            ))],
        })
        .await
    }

    /// `host:port` to hand to `Connection::connect`.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<Request<Value>> {
        self.requests.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Split a batch on `;`, dropping comment lines and empty statements.
pub fn split_statements(batch: &str) -> Vec<String> {
    batch
        .split(';')
        .map(|part| {
            part.lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// `RETURN 1+1` yields 2, `UPSERT ...` yields the previous counter value and
/// bumps it, `THROW "msg"` fails with `msg`; anything else yields null.
pub fn answer_statement(statement: &str, counter: &AtomicI64) -> QueryResult {
    if statement == "RETURN 1+1" {
        QueryResult::ok(Value::Integer(2.into()))
    } else if statement.starts_with("UPSERT") {
        QueryResult::ok(Value::Integer(counter.fetch_add(1, Ordering::SeqCst).into()))
    } else if let Some(message) = statement.strip_prefix("THROW ") {
        QueryResult::err(message.trim().trim_matches('"'))
    } else {
        QueryResult::ok(Value::Null)
    }
}

fn negotiate(request: &HsRequest, mut response: HsResponse) -> Result<HsResponse, ErrorResponse> {
    if let Some(protocol) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, protocol.clone());
    }
    Ok(response)
}

async fn serve(stream: TcpStream, handler: Handler, requests: Arc<Mutex<Vec<Request<Value>>>>) {
    let ws = match accept_hdr_async(stream, negotiate).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!("mock handshake failed: {}", e);
            return;
        }
    };
    let (writer, mut reader) = ws.split();
    let writer = Arc::new(tokio::sync::Mutex::new(writer));

    while let Some(message) = reader.next().await {
        let data = match message {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => continue,
            Ok(_) => continue,
            Err(_) => break,
        };

        let request: Request<Value> = match decode_message(&data) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("mock got undecodable request: {}", e);
                continue;
            }
        };
        requests.lock().push(request.clone());

        for reply in handler(&request) {
            match reply {
                Reply::Respond(response) => send(&writer, &response).await,
                Reply::Delayed(delay, response) => {
                    let writer = Arc::clone(&writer);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        send(&writer, &response).await;
                    });
                }
                Reply::Raw(bytes) => {
                    let _ = writer.lock().await.send(Message::Binary(bytes.into())).await;
                }
                Reply::Silent => {}
                Reply::Hangup => return,
                Reply::Stall => {
                    // the socket stays open for as long as this task is parked
                    std::future::pending::<()>().await;
                    return;
                }
            }
        }
    }
}

async fn send(writer: &tokio::sync::Mutex<Writer>, response: &Response) {
    if let Ok(bytes) = encode_message(response) {
        let _ = writer.lock().await.send(Message::Binary(bytes.into())).await;
    }
}
