//! Handles to services registered by the counterpart

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ocrloop_ipc::{Connection, IpcError, ServiceId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::trace;

use crate::error::{BrokerError, BrokerResult};
use crate::resource::{Closer, Resource};

struct ClientInner {
    conn: Connection,
    service: ServiceId,
    name: String,
    closed: AtomicBool,
    open_dials: Arc<AtomicUsize>,
}

/// A dialed service: a service id on a shared base connection
///
/// Closing is local and idempotent. The remote endpoint stays registered
/// until its owner releases it.
#[derive(Clone)]
pub struct ClientConn {
    inner: Arc<ClientInner>,
}

impl ClientConn {
    pub(crate) fn new(conn: Connection, service: ServiceId, name: impl Into<String>, open_dials: Arc<AtomicUsize>) -> Self {
        open_dials.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::new(ClientInner {
                conn,
                service,
                name: name.into(),
                closed: AtomicBool::new(false),
                open_dials,
            }),
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.inner.service
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.conn.is_closed()
    }

    /// Forward an already-encoded call
    pub async fn call_raw(&self, method: &str, payload: JsonValue) -> BrokerResult<JsonValue> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BrokerError::closed(&self.inner.name));
        }
        trace!(service = %self.inner.name, service_id = self.inner.service, method, "calling");
        Ok(self.inner.conn.call(self.inner.service, method, payload).await?)
    }

    /// Typed call: serialize `request`, deserialize the reply
    pub async fn call<Req, Resp>(&self, method: &str, request: &Req) -> BrokerResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)
            .map_err(|e| BrokerError::Ipc(IpcError::SerializationError(e.to_string())))?;
        let reply = self.call_raw(method, payload).await?;
        serde_json::from_value(reply).map_err(|e| BrokerError::Ipc(IpcError::DeserializationError(e.to_string())))
    }

    /// Mark the handle closed; returns false if it already was
    pub fn close(&self) -> bool {
        let first = !self.inner.closed.swap(true, Ordering::AcqRel);
        if first {
            self.inner.open_dials.fetch_sub(1, Ordering::AcqRel);
        }
        first
    }

    /// Wrap this handle as a [`Resource`] that closes it
    pub fn resource(&self) -> Resource {
        Resource::new(self.inner.name.clone(), self.clone())
    }
}

#[async_trait]
impl Closer for ClientConn {
    async fn close(&self) -> BrokerResult<()> {
        ClientConn::close(self);
        Ok(())
    }
}

impl fmt::Debug for ClientConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConn")
            .field("name", &self.inner.name)
            .field("service", &self.inner.service)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// How a dependency is backed, decided when it is handed to the broker
#[derive(Debug, Clone, Copy)]
pub enum Backing<'a> {
    /// Already a dialed connection; expose it by reference
    Connected(&'a ClientConn),
    /// A local implementation; register a fresh endpoint for it
    NeedsRegistration,
}

impl Backing<'_> {
    pub fn is_connected(&self) -> bool {
        matches!(self, Backing::Connected(_))
    }
}
