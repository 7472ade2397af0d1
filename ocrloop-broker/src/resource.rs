//! Owned handles with an explicit, once-only release

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{BrokerResult, CloseErrors};

/// Release operation behind a [`Resource`]
#[async_trait]
pub trait Closer: Send + Sync + 'static {
    async fn close(&self) -> BrokerResult<()>;
}

struct ResourceInner {
    name: String,
    closer: Box<dyn Closer>,
    closed: AtomicBool,
}

/// A named, releasable handle
///
/// Clones share state: the underlying closer runs at most once no matter
/// how many clones call [`Resource::close`].
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Resource {
    pub fn new(name: impl Into<String>, closer: impl Closer) -> Self {
        Self {
            inner: Arc::new(ResourceInner {
                name: name.into(),
                closer: Box::new(closer),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Release the handle; later calls are no-ops
    pub async fn close(&self) -> BrokerResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(resource = %self.inner.name, "resource already closed");
            return Ok(());
        }
        self.inner.closer.close().await
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Close `resources` in the order given
///
/// Every resource is attempted even if earlier ones fail; failures are
/// collected into [`CloseErrors`].
pub async fn close_all<'a, I>(resources: I) -> BrokerResult<()>
where
    I: IntoIterator<Item = &'a Resource>,
{
    let mut errors = CloseErrors::default();
    for resource in resources {
        if let Err(e) = resource.close().await {
            errors.push(resource.name(), e);
        }
    }
    errors.into_result()
}

/// Resources accumulated while satisfying one composite request
#[derive(Debug, Default)]
pub struct ResourceSet {
    resources: Vec<Resource>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Hand the accumulated resources to a new owner, in acquisition order
    pub fn into_vec(self) -> Vec<Resource> {
        self.resources
    }

    /// Close everything in reverse acquisition order
    pub async fn close_all(self) -> BrokerResult<()> {
        close_all(self.resources.iter().rev()).await
    }

    /// Unwind after a failed composite step, logging any close failures
    pub async fn rollback(self) {
        let count = self.resources.len();
        if let Err(e) = self.close_all().await {
            warn!(error = %e, "rollback left close failures");
        } else if count > 0 {
            debug!(count, "rolled back acquired resources");
        }
    }
}
