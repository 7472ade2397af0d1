//! Id-keyed table of locally registered endpoints

use std::collections::HashMap;
use std::sync::Arc;

use ocrloop_ipc::ServiceId;
use parking_lot::Mutex;

use crate::client::ClientConn;
use crate::control::CONTROL_SERVICE;
use crate::error::BrokerResult;
use crate::resource::{close_all, Resource};
use crate::server::Server;

/// What answers calls addressed to an endpoint
#[derive(Clone)]
pub(crate) enum Target {
    Fresh(Arc<Server>),
    Proxy(ClientConn),
}

pub(crate) struct Endpoint {
    pub name: String,
    pub target: Target,
    /// Released with the endpoint, in reverse order
    pub deps: Vec<Resource>,
}

impl Endpoint {
    pub async fn release(self) -> BrokerResult<()> {
        close_all(self.deps.iter().rev()).await
    }
}

struct Inner {
    endpoints: HashMap<ServiceId, Endpoint>,
    dispensable: HashMap<String, ServiceId>,
    next_id: ServiceId,
}

pub(crate) struct ServiceTable {
    inner: Mutex<Inner>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                endpoints: HashMap::new(),
                dispensable: HashMap::new(),
                next_id: CONTROL_SERVICE + 1,
            }),
        }
    }

    /// Record an endpoint under a fresh id; ids are never reused
    pub fn insert(&self, endpoint: Endpoint) -> ServiceId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.endpoints.insert(id, endpoint);
        id
    }

    pub fn lookup(&self, id: ServiceId) -> Option<(String, Target)> {
        self.inner
            .lock()
            .endpoints
            .get(&id)
            .map(|endpoint| (endpoint.name.clone(), endpoint.target.clone()))
    }

    pub fn name_of(&self, id: ServiceId) -> Option<String> {
        self.inner.lock().endpoints.get(&id).map(|e| e.name.clone())
    }

    pub fn remove(&self, id: ServiceId) -> Option<Endpoint> {
        let mut inner = self.inner.lock();
        inner.dispensable.retain(|_, dispensed| *dispensed != id);
        inner.endpoints.remove(&id)
    }

    /// Remove every endpoint, highest id first
    pub fn drain(&self) -> Vec<Endpoint> {
        let mut inner = self.inner.lock();
        inner.dispensable.clear();
        let mut drained: Vec<_> = inner.endpoints.drain().collect();
        drained.sort_by(|a, b| b.0.cmp(&a.0));
        drained.into_iter().map(|(_, endpoint)| endpoint).collect()
    }

    pub fn mark_dispensable(&self, name: impl Into<String>, id: ServiceId) {
        self.inner.lock().dispensable.insert(name.into(), id);
    }

    /// Resolve a dispensable plugin to its id and served interfaces
    pub fn dispensable(&self, name: &str) -> Option<(ServiceId, Vec<String>)> {
        let inner = self.inner.lock();
        let id = *inner.dispensable.get(name)?;
        let interfaces = match &inner.endpoints.get(&id)?.target {
            Target::Fresh(server) => server.interfaces(),
            Target::Proxy(_) => Vec::new(),
        };
        Some((id, interfaces))
    }

    /// (fresh endpoints, proxy endpoints)
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        let proxies = inner
            .endpoints
            .values()
            .filter(|e| matches!(e.target, Target::Proxy(_)))
            .count();
        (inner.endpoints.len() - proxies, proxies)
    }
}
