//! Line-framed JSON-RPC transport over a child process's stdio.
//!
//! Every message is preceded by `Content-Length: N\r\n\r\n`, then `N` bytes
//! of UTF-8 JSON. One writer task serializes outgoing frames; one reader task
//! routes responses to waiting callers by request id and dispatches
//! server-initiated traffic. Many callers may [`Transport::call`]
//! concurrently; each blocks on its own completion slot.
//!
//! When the stream closes, every outstanding call fails with
//! [`TransportError::Closed`] and the transport stays poisoned; further calls
//! fail immediately.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};

use crate::error::TransportError;

/// Handler for a server-initiated notification. Runs on the reader task and
/// must not block; long work is handed off by the handler itself.
pub type NotificationHandler = Box<dyn Fn(Value) + Send + Sync>;

type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value, TransportError>>>>>;
type Handlers = Arc<Mutex<HashMap<String, NotificationHandler>>>;

/// JSON-RPC transport speaking LSP framing to one peer.
pub struct Transport {
    next_id: AtomicI64,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pending: Pending,
    handlers: Handlers,
    closed: Arc<AtomicBool>,
    requests_sent: Arc<AtomicU64>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("requests_sent", &self.requests_sent.load(Ordering::SeqCst))
            .finish()
    }
}

impl Transport {
    /// Spawns `command` with piped stdio and attaches a transport to it.
    ///
    /// Returns the child handle so the owner can wait for or kill the
    /// process; the transport only owns the streams. The child's stderr is
    /// drained to the log.
    pub fn spawn(
        command: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<(Self, Child), TransportError> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::other("failed to capture child stdout"))
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::other("failed to capture child stdin"))
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr));
        }

        Ok((Self::from_streams(stdout, stdin), child))
    }

    /// Attaches a transport to an arbitrary stream pair.
    ///
    /// Used by [`spawn`](Self::spawn) for real subprocesses and directly by
    /// in-process peers (tests connect a scripted server over duplex pipes).
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let handlers: Handlers = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(
            writer,
            outgoing_rx,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));
        tokio::spawn(read_loop(
            reader,
            outgoing_tx.clone(),
            Arc::clone(&pending),
            Arc::clone(&handlers),
            Arc::clone(&closed),
        ));

        Self {
            next_id: AtomicI64::new(1),
            outgoing: outgoing_tx,
            pending,
            handlers,
            closed,
            requests_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sends a request and waits for the matching response.
    ///
    /// On timeout the local slot is dropped and the id stays reserved; the
    /// eventual response is discarded. The peer is not asked to cancel.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending table lock")
            .insert(id, tx);

        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))?;
        if self.outgoing.send(frame(body)).is_err() {
            self.pending.lock().expect("pending table lock").remove(&id);
            return Err(TransportError::Closed);
        }
        self.requests_sent.fetch_add(1, Ordering::SeqCst);

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.pending.lock().expect("pending table lock").remove(&id);
                Err(TransportError::Timeout(timeout))
            }
            // Slot dropped while the stream was being torn down.
            Ok(Err(_)) => Err(TransportError::Closed),
            Ok(Ok(result)) => result,
        }
    }

    /// Sends a notification (no id, no response).
    pub fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))?;
        self.outgoing
            .send(frame(body))
            .map_err(|_| TransportError::Closed)
    }

    /// Registers a handler for a server-initiated notification method.
    ///
    /// Handlers run on the reader task and must return quickly.
    pub fn on_notification<F>(&self, method: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .expect("handler table lock")
            .insert(method.to_string(), Box::new(handler));
    }

    /// True once the stream has closed; calls fail fast from then on.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests written so far (notifications excluded).
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::SeqCst)
    }
}

/// Frames a JSON body with the `Content-Length` header.
fn frame(body: Vec<u8>) -> Vec<u8> {
    let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    out.extend_from_slice(&body);
    out
}

/// Writes a single framed message to `writer`.
pub async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    writer.write_all(&frame(body)).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a single framed message. Returns `None` on clean EOF before any
/// header byte.
pub async fn read_frame<R>(reader: &mut BufReader<R>) -> Result<Option<Value>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    let mut saw_header = false;

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if saw_header {
                return Err(TransportError::MalformedFrame("EOF inside headers".into()));
            }
            return Ok(None);
        }
        saw_header = true;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let len = value.trim().parse::<usize>().map_err(|_| {
                    TransportError::MalformedFrame(format!("bad Content-Length: {trimmed:?}"))
                })?;
                content_length = Some(len);
            }
            // Content-Type and unknown headers are skipped.
        } else {
            return Err(TransportError::MalformedFrame(format!(
                "bad header line: {trimmed:?}"
            )));
        }
    }

    let len = content_length
        .ok_or_else(|| TransportError::MalformedFrame("missing Content-Length".into()))?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

async fn write_loop<W>(
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = outgoing.recv().await {
        if writer.write_all(&bytes).await.is_err() || writer.flush().await.is_err() {
            fail_all(&pending, &closed);
            return;
        }
    }
}

async fn read_loop<R>(
    reader: R,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pending: Pending,
    handlers: Handlers,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let message = match read_frame(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "language server stream error");
                break;
            }
        };
        dispatch_incoming(message, &outgoing, &pending, &handlers);
    }
    fail_all(&pending, &closed);
}

fn dispatch_incoming(
    message: Value,
    outgoing: &mpsc::UnboundedSender<Vec<u8>>,
    pending: &Pending,
    handlers: &Handlers,
) {
    let method = message.get("method").and_then(Value::as_str);
    let id = message.get("id").cloned();

    match (method, id) {
        // Response to one of our requests: route by id, exactly once.
        (None, Some(id)) => {
            let Some(id) = id.as_i64() else {
                tracing::warn!(?id, "response with non-numeric id");
                return;
            };
            let slot = pending.lock().expect("pending table lock").remove(&id);
            match slot {
                Some(tx) => {
                    let outcome = if let Some(error) = message.get("error") {
                        Err(TransportError::Rpc {
                            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                            message: error
                                .get("message")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown error")
                                .to_string(),
                        })
                    } else {
                        Ok(message.get("result").cloned().unwrap_or(Value::Null))
                    };
                    let _ = tx.send(outcome);
                }
                // Caller timed out and abandoned the slot.
                None => tracing::debug!(id, "discarding late response"),
            }
        }
        // Server-to-client request: acknowledge applyEdit, refuse the rest.
        (Some(method), Some(id)) => {
            let response = if method == "workspace/applyEdit" {
                json!({"jsonrpc": "2.0", "id": id, "result": {"applied": true}})
            } else {
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": format!("method not found: {method}")},
                })
            };
            if let Ok(body) = serde_json::to_vec(&response) {
                let _ = outgoing.send(frame(body));
            }
        }
        // Notification: hand to the registered handler, if any.
        (Some(method), None) => {
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            if let Some(handler) = handlers.lock().expect("handler table lock").get(method) {
                handler(params);
            } else {
                tracing::trace!(method, "unhandled notification");
            }
        }
        (None, None) => tracing::warn!("message with neither method nor id"),
    }
}

/// Poisons the transport and fails every outstanding call.
fn fail_all(pending: &Pending, closed: &Arc<AtomicBool>) {
    closed.store(true, Ordering::SeqCst);
    let slots: Vec<_> = pending
        .lock()
        .expect("pending table lock")
        .drain()
        .collect();
    for (_, tx) in slots {
        let _ = tx.send(Err(TransportError::Closed));
    }
}

async fn drain_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "ls_stderr", "{}", line.trim_end());
    }
}
