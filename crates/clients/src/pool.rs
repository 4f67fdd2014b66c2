//! Bounded lease pool for upstream client handles.
//!
//! The three client pools (STT, TTS, LLM) are the only shared mutable
//! singletons in the process. A pool hands out exclusive leases up to its
//! configured size; further acquires wait. Returned handles go back to an
//! idle list for reuse; a handle that saw an upstream error is discarded
//! so the next lease dials fresh.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use vb_domain::error::{Error, Result};

/// Dials new handles when the idle list is empty.
#[async_trait::async_trait]
pub trait ClientFactory<R>: Send + Sync {
    async fn connect(&self) -> Result<R>;

    /// Service name for logs and readiness ("stt", "tts", "llm").
    fn service(&self) -> &str;
}

struct PoolInner<R> {
    factory: Arc<dyn ClientFactory<R>>,
    idle: Mutex<Vec<R>>,
    permits: Arc<Semaphore>,
    size: usize,
    leased: AtomicUsize,
}

/// A bounded pool of exclusive client handles. Cheap to clone; clones
/// share the same pool.
pub struct ClientPool<R> {
    inner: Arc<PoolInner<R>>,
}

impl<R> Clone for ClientPool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Send + 'static> ClientPool<R> {
    pub fn new(factory: Arc<dyn ClientFactory<R>>, size: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(PoolInner {
                factory,
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(size)),
                size,
                leased: AtomicUsize::new(0),
            }),
        })
    }

    /// Acquire an exclusive handle, dialing a fresh one when none is idle.
    /// Waits when the pool is exhausted.
    pub async fn acquire(&self, session_id: &str) -> Result<Lease<R>> {
        let inner = self.inner.clone();
        let permit = inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal(format!("{} pool closed", inner.factory.service())))?;

        let reused = inner.idle.lock().pop();
        let resource = match reused {
            Some(r) => r,
            None => match inner.factory.connect().await {
                Ok(r) => r,
                Err(e) => {
                    // Permit is released by drop; the lease never existed.
                    drop(permit);
                    return Err(e);
                }
            },
        };

        inner.leased.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            service = inner.factory.service(),
            session_id,
            leased = inner.leased.load(Ordering::SeqCst),
            capacity = inner.size,
            "pool handle leased"
        );

        Ok(Lease {
            resource: Some(resource),
            pool: inner,
            _permit: permit,
            discarded: false,
        })
    }

    pub fn service(&self) -> &str {
        self.inner.factory.service()
    }

    pub fn capacity(&self) -> usize {
        self.inner.size
    }

    pub fn leased(&self) -> usize {
        self.inner.leased.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }
}

/// An exclusive lease on one pooled handle.
///
/// Dropping the lease returns the handle to the idle list; [`Lease::discard`]
/// destroys it instead (used after upstream errors).
pub struct Lease<R: Send + 'static> {
    resource: Option<R>,
    pool: Arc<PoolInner<R>>,
    _permit: OwnedSemaphorePermit,
    discarded: bool,
}

impl<R: Send + 'static> Lease<R> {
    /// Destroy the handle instead of returning it to the pool.
    pub fn discard(mut self) {
        self.discarded = true;
        self.resource.take();
        // Drop runs next and releases the permit.
    }
}

impl<R: Send + 'static> Deref for Lease<R> {
    type Target = R;
    fn deref(&self) -> &R {
        self.resource.as_ref().expect("lease resource present")
    }
}

impl<R: Send + 'static> DerefMut for Lease<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().expect("lease resource present")
    }
}

impl<R: Send + 'static> Drop for Lease<R> {
    fn drop(&mut self) {
        self.pool.leased.fetch_sub(1, Ordering::SeqCst);
        if let Some(resource) = self.resource.take() {
            if !self.discarded {
                self.pool.idle.lock().push(resource);
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
