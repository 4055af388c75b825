//! Attribute source collaborator.
//!
//! Attribute lookups are the only suspension points of an evaluation:
//! given a name, arguments and variable bindings, a source returns a live
//! sequence of values, finite or infinite, restartable per subscription.
//! The core treats sources as opaque and must tolerate slow, erroring, or
//! never-ending ones.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;

use warden_core::{EngineError, Val, VariableContext};

use crate::streams::{ValStream, distinct_until_changed, once_val};

/// A live external attribute source.
pub trait AttributeSource: Send + Sync {
    /// Open a fresh value stream for one subscription.
    fn attribute_stream(&self, name: &str, args: &[Val], variables: &VariableContext) -> ValStream;
}

/// Name-indexed registry of attribute sources, built once at startup.
#[derive(Clone, Default)]
pub struct AttributeRegistry {
    sources: HashMap<String, Arc<dyn AttributeSource>>,
}

impl AttributeRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its fully qualified attribute name.
    pub fn register(&mut self, name: impl Into<String>, source: Arc<dyn AttributeSource>) {
        self.sources.insert(name.into(), source);
    }

    /// Register a source, consuming self. Builder form of
    /// [`AttributeRegistry::register`].
    #[must_use]
    pub fn with_source(mut self, name: impl Into<String>, source: Arc<dyn AttributeSource>) -> Self {
        self.register(name, source);
        self
    }

    /// Open a value stream for the named attribute. Unknown names produce
    /// a single resolution-error value. Consecutive duplicates from the
    /// source are suppressed.
    #[must_use]
    pub fn evaluate_attribute(
        &self,
        name: &str,
        args: &[Val],
        variables: &VariableContext,
    ) -> ValStream {
        match self.sources.get(name) {
            Some(source) => {
                distinct_until_changed(source.attribute_stream(name, args, variables))
            }
            None => once_val(
                EngineError::AttributeResolution {
                    attribute: name.to_string(),
                    reason: "no source registered".to_string(),
                }
                .into(),
            ),
        }
    }
}

impl fmt::Debug for AttributeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("AttributeRegistry")
            .field("sources", &names)
            .finish()
    }
}

/// Source that emits one fixed value and completes.
#[derive(Debug, Clone)]
pub struct StaticAttributeSource {
    value: Val,
}

impl StaticAttributeSource {
    /// Source always answering with `value`
    #[must_use]
    pub fn new(value: Val) -> Self {
        Self { value }
    }
}

impl AttributeSource for StaticAttributeSource {
    fn attribute_stream(&self, _name: &str, _args: &[Val], _variables: &VariableContext) -> ValStream {
        once_val(self.value.clone())
    }
}

/// Source backed by a watch channel. Every open stream first sees the
/// current value, then every published update. The stream ends when the
/// source is dropped.
#[derive(Debug)]
pub struct PublishedAttributeSource {
    tx: watch::Sender<Val>,
}

impl PublishedAttributeSource {
    /// Source with the given initial value
    #[must_use]
    pub fn new(initial: Val) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a new value to every open stream.
    pub fn publish(&self, value: Val) {
        // send_replace never fails; streams hold their own receivers.
        self.tx.send_replace(value);
    }

    /// Number of currently open streams over this source.
    ///
    /// Cancelled subscriptions drop their stream, so the count shrinks once
    /// the evaluation that opened it is torn down.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl AttributeSource for PublishedAttributeSource {
    fn attribute_stream(&self, _name: &str, _args: &[Val], _variables: &VariableContext) -> ValStream {
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
