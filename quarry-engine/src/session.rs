//! Sessions
//!
//! A session is the scope of a batch of root requests: it carries
//! cancellation and an optional deadline, and keeps the engine's interest
//! tracking honest. Cached node results outlive every session; only
//! in-flight work keyed to a cancelled session gets parked.

use crate::error::EngineError;
use crate::graph::{NodeId, SessionId};
use crate::params::Params;
use crate::scheduler::{Engine, RootDemand};
use crate::value::{Product, Value};
use quarry_types::ProductType;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State shared between a session handle and the scheduler.
#[derive(Debug, Default)]
pub(crate) struct SessionShared {
    cancelled: AtomicBool,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        SessionShared::default()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// A request scope on an engine.
///
/// Results computed here land in the engine's shared node graph and are
/// visible to every other session. Dropping the session cancels any work
/// that no other live session is also waiting on.
pub struct Session<'e> {
    engine: &'e Engine,
    id: SessionId,
    shared: Arc<SessionShared>,
    deadline: Option<Instant>,
}

/// How often a waiting request re-checks cancellation and its deadline.
const WAIT_TICK: Duration = Duration::from_millis(25);

impl<'e> Session<'e> {
    pub(crate) fn new(engine: &'e Engine, id: SessionId, shared: Arc<SessionShared>) -> Self {
        Session {
            engine,
            id,
            shared,
            deadline: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Fail requests still outstanding after `timeout` with
    /// [`EngineError::Timeout`]. Measured from now, not per request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Cancel the session. Outstanding requests return
    /// [`EngineError::Cancelled`]; work wanted only by this session is
    /// parked, not discarded.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Request a product at the root, blocking until it is available.
    pub fn request(&self, product: ProductType, params: Params) -> Result<Value, EngineError> {
        if self.shared.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        match self.engine.inner().demand_root(self.id, product, &params)? {
            RootDemand::Immediate(value) => Ok(value),
            RootDemand::Node(id) => self.wait_for(id),
        }
    }

    /// Typed convenience over [`Session::request`].
    pub fn product<T: Product>(&self, params: Params) -> Result<Arc<T>, EngineError> {
        let value = self.request(ProductType::of::<T>(), params)?;
        value.into_arc::<T>().ok_or_else(|| EngineError::WrongType {
            expected: ProductType::of::<T>().name().to_string(),
        })
    }

    /// Batched, typed variant of [`Session::product`]: one request per
    /// params set, all for the same product type.
    pub fn products<T: Product>(
        &self,
        params: impl IntoIterator<Item = Params>,
    ) -> Vec<Result<Arc<T>, EngineError>> {
        let product = ProductType::of::<T>();
        self.request_all(params.into_iter().map(|p| (product, p)).collect())
            .into_iter()
            .map(|result| {
                result.and_then(|value| {
                    value.into_arc::<T>().ok_or_else(|| EngineError::WrongType {
                        expected: product.name().to_string(),
                    })
                })
            })
            .collect()
    }

    /// Submit several root requests at once and wait for all of them.
    ///
    /// All roots are demanded before any waiting starts, so independent
    /// subgraphs run concurrently across the worker pool. One root's
    /// failure does not abort the others.
    pub fn request_all(
        &self,
        requests: Vec<(ProductType, Params)>,
    ) -> Vec<Result<Value, EngineError>> {
        let demands: Vec<Result<RootDemand, EngineError>> = requests
            .into_iter()
            .map(|(product, params)| {
                if self.shared.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                self.engine.inner().demand_root(self.id, product, &params)
            })
            .collect();

        demands
            .into_iter()
            .map(|demand| match demand? {
                RootDemand::Immediate(value) => Ok(value),
                RootDemand::Node(id) => self.wait_for(id),
            })
            .collect()
    }

    /// Block until the node is final, returning its result.
    fn wait_for(&self, id: NodeId) -> Result<Value, EngineError> {
        loop {
            let receiver = {
                let mut graph = self.engine.inner().graph.lock();
                // Revive covers the race where the node was parked or
                // invalidated between being demanded and being awaited.
                let mut visited = HashSet::new();
                if self
                    .engine
                    .inner()
                    .revive(&mut graph, id, &[self.id], &mut visited)
                {
                    let entry = graph.node(id);
                    let finished = entry.finished().expect("final node has a result");
                    return finished.result.clone();
                }
                let (tx, rx) = channel();
                graph.node_mut(id).waiters.push(tx);
                rx
            };

            loop {
                if self.shared.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                if let Some(deadline) = self.deadline {
                    if Instant::now() >= deadline {
                        self.cancel();
                        return Err(EngineError::Timeout);
                    }
                }
                match receiver.recv_timeout(WAIT_TICK) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.shared.cancel();
        self.engine.inner().sessions.remove(&self.id);
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
