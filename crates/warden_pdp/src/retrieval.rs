//! Policy retrieval point.
//!
//! Consumes the policy source collaborator's stream of policy-set-changed
//! events, recompiles the canonical index wholesale on every update, and
//! publishes each new snapshot through an atomic swap. In-flight matches
//! keep the snapshot they started with; readers never observe a partially
//! built index.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use warden_index::{CanonicalIndexContainer, IndexCompiler, MatchingMode};
use warden_lang::Policy;

/// A policy-set-changed event carrying the full current set.
#[derive(Debug, Clone, Default)]
pub struct PolicyUpdate {
    /// All policies of the set, in document order
    pub policies: Vec<Arc<Policy>>,
}

impl PolicyUpdate {
    /// Update carrying the given policies
    #[must_use]
    pub fn new(policies: Vec<Arc<Policy>>) -> Self {
        Self { policies }
    }
}

/// Supplies the stream of policy-set-changed events. The engine never
/// reads files or the network itself.
pub trait PolicySource: Send + Sync {
    /// Open the update stream. The first element should carry the current
    /// set.
    fn updates(&self) -> BoxStream<'static, PolicyUpdate>;
}

/// In-memory policy source for embedding the engine and for tests.
#[derive(Debug)]
pub struct InMemoryPolicySource {
    tx: watch::Sender<PolicyUpdate>,
}

impl InMemoryPolicySource {
    /// Source starting with an empty policy set
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PolicyUpdate::default());
        Self { tx }
    }

    /// Source starting with the given policy set
    #[must_use]
    pub fn with_policies(policies: Vec<Arc<Policy>>) -> Self {
        let (tx, _rx) = watch::channel(PolicyUpdate::new(policies));
        Self { tx }
    }

    /// Replace the policy set; every subscriber sees the new set.
    pub fn publish(&self, policies: Vec<Arc<Policy>>) {
        self.tx.send_replace(PolicyUpdate::new(policies));
    }
}

impl Default for InMemoryPolicySource {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicySource for InMemoryPolicySource {
    fn updates(&self) -> BoxStream<'static, PolicyUpdate> {
        let rx = self.tx.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if first {
                let current = rx.borrow_and_update().clone();
                return Some((current, (rx, false)));
            }
            match rx.changed().await {
                Ok(()) => {
                    let current = rx.borrow_and_update().clone();
                    Some((current, (rx, false)))
                }
                Err(_) => None,
            }
        })
        .boxed()
    }
}

/// Owns the current canonical index snapshot.
///
/// A driving task compiles every incoming policy set and swaps the new
/// snapshot in atomically. Dropping the retrieval point cancels the task.
#[derive(Debug)]
pub struct PolicyRetrievalPoint {
    snapshot_tx: watch::Sender<Arc<CanonicalIndexContainer>>,
    task: Option<JoinHandle<()>>,
}

impl PolicyRetrievalPoint {
    /// Retrieval point fed by the given policy source.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(source: &dyn PolicySource, mode: MatchingMode) -> Self {
        let compiler = IndexCompiler::new(mode);
        let (snapshot_tx, _rx) = watch::channel(Arc::new(CanonicalIndexContainer::empty()));
        let task_tx = snapshot_tx.clone();
        let mut updates = source.updates();
        let task = tokio::spawn(async move {
            while let Some(update) = updates.next().await {
                let compiled = compiler.compile(&update.policies);
                debug!(
                    policies = compiled.container.policies().len(),
                    excluded = compiled.errors.len(),
                    "swapping in new index snapshot"
                );
                if task_tx.send(compiled.container).is_err() {
                    break;
                }
            }
        });
        Self {
            snapshot_tx,
            task: Some(task),
        }
    }

    /// Retrieval point over a fixed policy set, compiled synchronously.
    /// Usable outside a runtime.
    #[must_use]
    pub fn with_policies(policies: &[Arc<Policy>], mode: MatchingMode) -> Self {
        let compiled = IndexCompiler::new(mode).compile(policies);
        let (snapshot_tx, _rx) = watch::channel(compiled.container);
        Self {
            snapshot_tx,
            task: None,
        }
    }

    /// The current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<CanonicalIndexContainer> {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot swaps
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<CanonicalIndexContainer>> {
        self.snapshot_tx.subscribe()
    }
}

impl Drop for PolicyRetrievalPoint {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
