//! Multiplexed request/response connection over a frame transport
//!
//! A [`Connection`] owns two background tasks: a writer draining an outbound
//! queue and a reader that completes pending calls and hands incoming calls
//! to a [`Dispatcher`]. Both sides of the link may issue calls concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::error::IpcError;
use crate::protocol::{CallId, Fault, Frame, ServiceId};
use crate::transport::{FrameReader, FrameWriter};

/// Handles calls arriving from the counterpart
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn dispatch(
        &self,
        service: ServiceId,
        method: String,
        payload: JsonValue,
    ) -> Result<JsonValue, Fault>;
}

type PendingMap = HashMap<CallId, oneshot::Sender<Result<JsonValue, IpcError>>>;

struct Shared {
    outbound: mpsc::Sender<Frame>,
    pending: Mutex<PendingMap>,
    next_call_id: AtomicU64,
    stop: CancellationToken,
    closed: CancellationToken,
}

impl Shared {
    fn closed_error(&self) -> IpcError {
        if self.stop.is_cancelled() {
            IpcError::Cancelled
        } else {
            IpcError::ConnectionClosed
        }
    }

    fn fail_all(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending calls");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(self.closed_error()));
        }
    }
}

/// Removes a pending entry if the caller stops waiting
struct PendingGuard<'a> {
    shared: &'a Shared,
    call_id: CallId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.call_id);
    }
}

/// Cloneable handle to a running connection
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Start the reader and writer tasks for a transport
    ///
    /// The connection closes when the peer hangs up, when the transport
    /// fails, when [`Connection::close`] is called or when `stop` fires.
    pub fn spawn<R, W>(
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
        dispatcher: Arc<dyn Dispatcher>,
        outbound_buffer: usize,
        stop: CancellationToken,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::channel(outbound_buffer.max(1));
        let closed = stop.child_token();
        let shared = Arc::new(Shared {
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
            stop,
            closed,
        });

        tokio::spawn(write_loop(writer, outbound_rx, shared.clone()));
        tokio::spawn(read_loop(reader, shared.clone(), dispatcher));

        Self { shared }
    }

    /// Invoke `method` on the counterpart's service `service`
    pub async fn call(
        &self,
        service: ServiceId,
        method: &str,
        payload: JsonValue,
    ) -> Result<JsonValue, IpcError> {
        let shared = &*self.shared;
        if shared.closed.is_cancelled() {
            return Err(shared.closed_error());
        }

        let call_id = shared.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().insert(call_id, tx);
        let _guard = PendingGuard { shared, call_id };

        trace!(call_id, service, method, "sending call");
        let frame = Frame::Call {
            call_id,
            service,
            method: method.to_string(),
            payload,
        };

        let sent = tokio::select! {
            biased;
            _ = shared.closed.cancelled() => false,
            res = shared.outbound.send(frame) => res.is_ok(),
        };
        if !sent {
            return Err(shared.closed_error());
        }

        tokio::select! {
            biased;
            res = rx => res.unwrap_or_else(|_| Err(shared.closed_error())),
            _ = shared.closed.cancelled() => Err(shared.closed_error()),
        }
    }

    /// Close the connection without firing the shared stop signal
    pub fn close(&self) {
        self.shared.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Resolves once the connection has closed for any reason
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }

    /// Stop signal this connection was spawned with
    pub fn stop_token(&self) -> CancellationToken {
        self.shared.stop.clone()
    }

    /// Number of calls awaiting a reply
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.lock().len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

async fn write_loop<W>(mut writer: FrameWriter<W>, mut outbound: mpsc::Receiver<Frame>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.closed.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = writer.write_frame(&frame).await {
            error!(error = %e, "failed to write frame");
            shared.closed.cancel();
            break;
        }
    }

    if let Err(e) = writer.close().await {
        debug!(error = %e, "error while shutting down writer");
    }
}

async fn read_loop<R>(mut reader: FrameReader<R>, shared: Arc<Shared>, dispatcher: Arc<dyn Dispatcher>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.closed.cancelled() => break,
            next = reader.read_frame() => next,
        };

        match next {
            Ok(Some(frame)) => handle_frame(&shared, &dispatcher, frame),
            Ok(None) => {
                debug!("peer closed the connection");
                break;
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "connection failed");
                break;
            }
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }

    shared.closed.cancel();
    shared.fail_all();
}

fn handle_frame(shared: &Arc<Shared>, dispatcher: &Arc<dyn Dispatcher>, frame: Frame) {
    match frame {
        Frame::Call {
            call_id,
            service,
            method,
            payload,
        } => {
            let shared = shared.clone();
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = shared.closed.cancelled() => return,
                    result = dispatcher.dispatch(service, method, payload) => result,
                };

                let reply = match result {
                    Ok(payload) => Frame::Reply { call_id, payload },
                    Err(fault) => Frame::Fault { call_id, fault },
                };
                if shared.outbound.send(reply).await.is_err() {
                    trace!(call_id, "connection closed before reply was sent");
                }
            });
        }
        Frame::Reply { call_id, payload } => complete(shared, call_id, Ok(payload)),
        Frame::Fault { call_id, fault } => complete(shared, call_id, Err(IpcError::Remote(fault))),
    }
}

fn complete(shared: &Shared, call_id: CallId, result: Result<JsonValue, IpcError>) {
    match shared.pending.lock().remove(&call_id) {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => debug!(call_id, "reply for unknown or abandoned call"),
    }
}
