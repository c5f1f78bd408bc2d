//! Runs the child command and ships its output to the log sink.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use anyhow::Context;
use gol_client::{Connection, ConnectionBuilder};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{child_env, Args};
use crate::output::{OutData, OutputBuffer};
use crate::sink::LogSink;

const CHUNK_SIZE: usize = 32 * 1024;
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => write!(f, "stdout"),
            Stream::Stderr => write!(f, "stderr"),
        }
    }
}

enum Stop {
    Exited(ExitStatus),
    Interrupted,
    Disconnected,
}

/// Run `args.command` to completion and return the exit code to leave with.
///
/// Setup failures are errors. Once the child is running, everything short of
/// losing the child is logged and the run carries on.
pub async fn run(args: &Args) -> anyhow::Result<i32> {
    let (program, program_args) = args
        .command
        .split_first()
        .context("Usage: gol <command> [args...]")?;

    let database = hostname::get()
        .context("Failed to read host name")?
        .to_string_lossy()
        .into_owned();

    let conn = ConnectionBuilder::new(&args.host)
        .timeout_ms(args.timeout_ms)
        .namespace(&args.ns)
        .auth(&args.user, &args.pass)
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", args.host))?;

    let sink = match LogSink::open(&conn, &database).await {
        Ok(sink) => sink,
        Err(e) => {
            close(&conn).await;
            return Err(e).context("Failed to prepare log table");
        }
    };

    let mut child = match Command::new(program)
        .args(program_args)
        .env_clear()
        .envs(child_env(std::env::vars_os()))
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::error!("Failed to start {}: {}", program, e);
            close(&conn).await;
            return Ok(1);
        }
    };
    tracing::info!("Started {} (pid {:?})", program, child.id());

    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let stdout = child.stdout.take().map(|r| pump(r, Stream::Stdout, tx.clone()));
    let stderr = child.stderr.take().map(|r| pump(r, Stream::Stderr, tx.clone()));
    drop(tx);

    // One listener for the whole run, so a signal landing mid-insert is kept
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut listening = true;

    let stop = loop {
        tokio::select! {
            Some((stream, data)) = rx.recv() => {
                tokio::select! {
                    _ = forward(&sink, stream, &data) => {}
                    _ = interrupted(ctrl_c.as_mut(), &mut listening) => {
                        tracing::info!("Interrupted, stopping {}", program);
                        break Stop::Interrupted;
                    }
                }
            }
            status = child.wait() => match status {
                Ok(status) => break Stop::Exited(status),
                Err(e) => {
                    tracing::error!("Failed to wait for {}: {}", program, e);
                    break Stop::Interrupted;
                }
            },
            _ = interrupted(ctrl_c.as_mut(), &mut listening) => {
                tracing::info!("Interrupted, stopping {}", program);
                break Stop::Interrupted;
            }
            _ = conn.closed() => break Stop::Disconnected,
        }
    };

    let status = match stop {
        Stop::Exited(status) => Some(status),
        Stop::Interrupted => kill(&mut child).await,
        Stop::Disconnected => {
            match conn.closing_error().await {
                Some(e) => tracing::error!("Lost connection: {}", e),
                None => tracing::error!("Lost connection"),
            }
            let status = kill(&mut child).await;
            close(&conn).await;
            return Ok(exit_code(status));
        }
    };

    // The pipes outlive the child until their last bytes are read.
    while let Some((stream, data)) = rx.recv().await {
        forward(&sink, stream, &data).await;
    }
    for (stream, handle) in [(Stream::Stderr, stderr), (Stream::Stdout, stdout)] {
        if let Some(rest) = join(handle).await {
            forward(&sink, stream, &rest).await;
        }
    }

    if let Some(status) = status {
        let (stream, data) = status_record(&status);
        forward(&sink, stream, &data).await;
    }

    close(&conn).await;
    tracing::info!("{} finished", program);
    Ok(exit_code(status))
}

/// Resolves once the signal fires. A listener that failed is never polled
/// again and this stays pending.
async fn interrupted<F>(signal: Pin<&mut F>, listening: &mut bool)
where
    F: Future<Output = io::Result<()>>,
{
    if *listening {
        match signal.await {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                *listening = false;
            }
        }
    }
    std::future::pending::<()>().await
}

/// Read `reader` to EOF, sending every completed record. Returns the
/// unfinished tail, if any.
fn pump<R>(
    mut reader: R,
    stream: Stream,
    tx: mpsc::Sender<(Stream, OutData)>,
) -> JoinHandle<Option<OutData>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = OutputBuffer::new();
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    for data in buffer.write(&chunk[..n]) {
                        if tx.send((stream, data)).await.is_err() {
                            return None;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to read child {}: {}", stream, e);
                    break;
                }
            }
        }
        if buffer.is_empty() {
            None
        } else {
            Some(buffer.consume())
        }
    })
}

async fn join(handle: Option<JoinHandle<Option<OutData>>>) -> Option<OutData> {
    match handle?.await {
        Ok(rest) => rest,
        Err(e) => {
            tracing::warn!("Output reader failed: {}", e);
            None
        }
    }
}

async fn forward(sink: &LogSink<'_>, stream: Stream, data: &OutData) {
    let result = match stream {
        Stream::Stdout => sink.stdout(data).await,
        Stream::Stderr => sink.stderr(data).await,
    };
    if let Err(e) = result {
        tracing::warn!("Failed to store {} record: {}", stream, e);
    }
}

async fn kill(child: &mut Child) -> Option<ExitStatus> {
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill child: {}", e);
    }
    child.wait().await.ok()
}

async fn close(conn: &Connection) {
    if let Err(e) = conn.close().await {
        tracing::warn!("Failed to close connection: {}", e);
    }
}

/// The exit status as one record: stderr when the child failed.
pub fn status_record(status: &ExitStatus) -> (Stream, OutData) {
    let stream = if status.success() {
        Stream::Stdout
    } else {
        Stream::Stderr
    };
    let mut buffer = OutputBuffer::new();
    buffer.write(status.to_string().as_bytes());
    (stream, buffer.consume())
}

pub fn exit_code(status: Option<ExitStatus>) -> i32 {
    status.and_then(|s| s.code()).unwrap_or(1)
}
