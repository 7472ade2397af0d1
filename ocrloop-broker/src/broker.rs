//! The broker: registration and dialing of sub-services

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ocrloop_config::BrokerConfig;
use ocrloop_ipc::{Connection, Dispatcher, Fault, FaultKind, FrameReader, FrameWriter, ServiceId, IPC_PROTOCOL_VERSION};
use ocrloop_logging::ScopedName;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::client::ClientConn;
use crate::control::{
    DialRequest, DialResponse, DispenseRequest, DispenseResponse, PingResponse, ReleaseRequest, ReleaseResponse,
    CONTROL_SERVICE, DIAL, DISPENSE, PING, RELEASE,
};
use crate::error::{BrokerError, BrokerResult};
use crate::resource::{Closer, Resource};
use crate::server::{decode_request, encode_response, unknown_method, Server};
use crate::table::{Endpoint, ServiceTable, Target};

/// Snapshot of a broker's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerStats {
    /// Locally registered fresh endpoints
    pub endpoints: usize,
    /// Locally registered proxy endpoints
    pub proxies: usize,
    /// Dialed handles not yet closed
    pub open_dials: usize,
}

/// A plugin the counterpart offers for dispensing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispensed {
    pub id: ServiceId,
    pub interfaces: Vec<String>,
}

/// Registers and dials sub-services over one base connection
#[derive(Clone)]
pub struct Broker {
    conn: Connection,
    table: Arc<ServiceTable>,
    open_dials: Arc<AtomicUsize>,
    name: ScopedName,
}

impl Broker {
    /// Start a broker on a frame transport
    ///
    /// The broker lives as long as the base connection. When the connection
    /// closes every local endpoint is released along with its dependents.
    pub fn new<R, W>(
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
        config: &BrokerConfig,
        stop: CancellationToken,
        name: ScopedName,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let offered = CancellationToken::new();
        offered.cancel();
        Self::start(reader, writer, config, stop, name, offered)
    }

    /// Start a broker whose dispense replies wait for the returned gate
    ///
    /// Plugins registered before the gate opens are visible to the first
    /// dispense the counterpart sends, however early it arrives.
    pub fn new_gated<R, W>(
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
        config: &BrokerConfig,
        stop: CancellationToken,
        name: ScopedName,
    ) -> (Self, DispenseGate)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let offered = CancellationToken::new();
        let broker = Self::start(reader, writer, config, stop, name, offered.clone());
        (broker, DispenseGate { offered })
    }

    fn start<R, W>(
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
        config: &BrokerConfig,
        stop: CancellationToken,
        name: ScopedName,
        offered: CancellationToken,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let table = Arc::new(ServiceTable::new());
        let dispatcher = Arc::new(BrokerDispatcher {
            table: table.clone(),
            name: name.clone(),
            offered,
        });
        let conn = Connection::spawn(reader, writer, dispatcher, config.outbound_buffer, stop);

        let watcher = conn.clone();
        let teardown = table.clone();
        tokio::spawn(
            async move {
                watcher.closed().await;
                let endpoints = teardown.drain();
                if !endpoints.is_empty() {
                    debug!(count = endpoints.len(), "releasing endpoints after connection closed");
                }
                for endpoint in endpoints {
                    let name = endpoint.name.clone();
                    if let Err(e) = endpoint.release().await {
                        warn!(endpoint = %name, error = %e, "failed to release endpoint");
                    }
                }
            }
            .instrument(name.span()),
        );

        Self {
            conn,
            table,
            open_dials: Arc::new(AtomicUsize::new(0)),
            name,
        }
    }

    /// Same broker, logging under a child name
    pub fn with_name(&self, name: &str) -> Self {
        Self {
            name: self.name.child(name),
            ..self.clone()
        }
    }

    pub fn name(&self) -> &ScopedName {
        &self.name
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.conn.stop_token()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Resolves once the base connection has closed
    pub async fn closed(&self) {
        self.conn.closed().await
    }

    /// Close the base connection; local endpoints are released
    pub fn close(&self) {
        info!(logger = %self.name, "closing broker");
        self.conn.close();
    }

    /// Register a fresh endpoint built by `register`
    ///
    /// `deps` are owned by the endpoint from now on and are released, in
    /// reverse order, when the endpoint is. If the broker is already closed
    /// they are released immediately and an error is returned.
    pub async fn serve_new<F>(&self, name: &str, register: F, deps: Vec<Resource>) -> BrokerResult<(ServiceId, Resource)>
    where
        F: FnOnce(&mut Server),
    {
        let mut server = Server::new(name);
        register(&mut server);
        self.insert(name, Target::Fresh(Arc::new(server)), deps).await
    }

    /// Expose an already-dialed connection under a new id
    ///
    /// Calls to the new id are forwarded to `conn` unchanged. Releasing the
    /// returned resource removes the proxy but leaves `conn` open.
    pub async fn serve(&self, name: &str, conn: ClientConn) -> BrokerResult<(ServiceId, Resource)> {
        self.insert(name, Target::Proxy(conn), Vec::new()).await
    }

    /// Register a plugin the counterpart may obtain with [`Broker::dispense`]
    pub async fn serve_plugin<F>(&self, name: &str, register: F) -> BrokerResult<(ServiceId, Resource)>
    where
        F: FnOnce(&mut Server),
    {
        let (id, resource) = self.serve_new(name, register, Vec::new()).await?;
        self.table.mark_dispensable(name, id);
        Ok((id, resource))
    }

    async fn insert(&self, name: &str, target: Target, deps: Vec<Resource>) -> BrokerResult<(ServiceId, Resource)> {
        if self.conn.is_closed() {
            let endpoint = Endpoint {
                name: name.to_string(),
                target,
                deps,
            };
            if let Err(e) = endpoint.release().await {
                warn!(logger = %self.name, endpoint = name, error = %e, "failed to release dependents");
            }
            return Err(BrokerError::closed(self.name.to_string()));
        }

        let proxy = matches!(target, Target::Proxy(_));
        let id = self.table.insert(Endpoint {
            name: name.to_string(),
            target,
            deps,
        });
        debug!(logger = %self.name, service_id = id, endpoint = name, proxy, "registered endpoint");

        let closer = EndpointCloser {
            table: self.table.clone(),
            id,
        };
        Ok((id, Resource::new(name, closer)))
    }

    /// Resolve a counterpart-issued id to a usable handle
    pub async fn dial(&self, name: &str, id: ServiceId) -> BrokerResult<ClientConn> {
        let reply: BrokerResult<DialResponse> = self.control(DIAL, &DialRequest { id }).await;
        match reply {
            Ok(reply) => {
                debug!(logger = %self.name, service_id = id, name, remote_name = %reply.name, "dialed");
                Ok(ClientConn::new(self.conn.clone(), id, name, self.open_dials.clone()))
            }
            Err(e) => {
                warn!(logger = %self.name, service_id = id, name, error = %e, "dial failed");
                Err(BrokerError::dial(name, id, e))
            }
        }
    }

    /// Ask the counterpart to release an endpoint it registered
    ///
    /// Returns whether the id was still registered there.
    pub async fn release_remote(&self, id: ServiceId) -> BrokerResult<bool> {
        let reply: ReleaseResponse = self.control(RELEASE, &ReleaseRequest { id }).await?;
        Ok(reply.released)
    }

    /// Round trip to the counterpart's control service
    pub async fn ping(&self) -> BrokerResult<u32> {
        let reply: PingResponse = self.control(PING, &()).await?;
        Ok(reply.protocol_version)
    }

    /// Look up a plugin the counterpart registered with [`Broker::serve_plugin`]
    pub async fn dispense(&self, name: &str) -> BrokerResult<Dispensed> {
        let reply: DispenseResponse = self
            .control(
                DISPENSE,
                &DispenseRequest {
                    name: name.to_string(),
                },
            )
            .await?;
        Ok(Dispensed {
            id: reply.id,
            interfaces: reply.interfaces,
        })
    }

    pub fn stats(&self) -> BrokerStats {
        let (endpoints, proxies) = self.table.counts();
        BrokerStats {
            endpoints,
            proxies,
            open_dials: self.open_dials.load(Ordering::Acquire),
        }
    }

    async fn control<Req, Resp>(&self, method: &str, request: &Req) -> BrokerResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)
            .map_err(|e| BrokerError::Ipc(ocrloop_ipc::IpcError::SerializationError(e.to_string())))?;
        let reply = self.conn.call(CONTROL_SERVICE, method, payload).await?;
        serde_json::from_value(reply)
            .map_err(|e| BrokerError::Ipc(ocrloop_ipc::IpcError::DeserializationError(e.to_string())))
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("name", &self.name.to_string())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Holds dispense requests until the local plugins are registered
///
/// Dropping the gate opens it.
#[must_use = "dispense requests wait until the gate is opened"]
#[derive(Debug)]
pub struct DispenseGate {
    offered: CancellationToken,
}

impl DispenseGate {
    pub fn open(self) {
        self.offered.cancel();
    }
}

impl Drop for DispenseGate {
    fn drop(&mut self) {
        self.offered.cancel();
    }
}

/// Removes an endpoint from the table and releases its dependents
struct EndpointCloser {
    table: Arc<ServiceTable>,
    id: ServiceId,
}

#[async_trait]
impl Closer for EndpointCloser {
    async fn close(&self) -> BrokerResult<()> {
        match self.table.remove(self.id) {
            Some(endpoint) => {
                debug!(service_id = self.id, endpoint = %endpoint.name, "releasing endpoint");
                endpoint.release().await
            }
            None => Ok(()),
        }
    }
}

/// Answers calls arriving on the base connection
struct BrokerDispatcher {
    table: Arc<ServiceTable>,
    name: ScopedName,
    offered: CancellationToken,
}

impl BrokerDispatcher {
    async fn control(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
        match method {
            PING => encode_response(&PingResponse {
                protocol_version: IPC_PROTOCOL_VERSION,
            }),
            DIAL => {
                let request: DialRequest = decode_request(payload)?;
                let name = self
                    .table
                    .name_of(request.id)
                    .ok_or_else(|| unknown_service(request.id))?;
                encode_response(&DialResponse { name })
            }
            RELEASE => {
                let request: ReleaseRequest = decode_request(payload)?;
                let released = match self.table.remove(request.id) {
                    Some(endpoint) => {
                        debug!(service_id = request.id, endpoint = %endpoint.name, "released by counterpart");
                        endpoint.release().await.map_err(|e| e.to_fault())?;
                        true
                    }
                    None => false,
                };
                encode_response(&ReleaseResponse { released })
            }
            DISPENSE => {
                let request: DispenseRequest = decode_request(payload)?;
                self.offered.cancelled().await;
                let (id, interfaces) = self.table.dispensable(&request.name).ok_or_else(|| {
                    Fault::new(
                        FaultKind::UnknownService,
                        format!("no plugin named {:?}", request.name),
                    )
                })?;
                encode_response(&DispenseResponse { id, interfaces })
            }
            other => match other.split_once('/') {
                Some((interface, method)) => Err(unknown_method(interface, method)),
                None => Err(unknown_method("Control", other)),
            },
        }
    }
}

#[async_trait]
impl Dispatcher for BrokerDispatcher {
    async fn dispatch(&self, service: ServiceId, method: String, payload: JsonValue) -> Result<JsonValue, Fault> {
        self.route(service, method, payload).instrument(self.name.span()).await
    }
}

impl BrokerDispatcher {
    async fn route(&self, service: ServiceId, method: String, payload: JsonValue) -> Result<JsonValue, Fault> {
        if service == CONTROL_SERVICE {
            return self.control(&method, payload).await;
        }

        let (name, target) = self.table.lookup(service).ok_or_else(|| unknown_service(service))?;
        match target {
            Target::Fresh(server) => server.dispatch(&method, payload).await,
            Target::Proxy(conn) => conn
                .call_raw(&method, payload)
                .await
                .map_err(|e| e.to_fault().with_service(name)),
        }
    }
}

fn unknown_service(id: ServiceId) -> Fault {
    BrokerError::UnknownService { id }.to_fault()
}
