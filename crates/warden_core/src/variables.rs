//! Variable bindings available during policy evaluation.

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::error::{EngineError, EngineResult};
use crate::subscription::AuthorizationSubscription;
use crate::value::Val;

/// Names bound from the subscription; environment variables cannot shadow
/// them.
pub const RESERVED_NAMES: [&str; 4] = ["subject", "action", "resource", "environment"];

/// Variable bindings seeded from an authorization subscription plus
/// environment variables configured on the decision point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableContext {
    bindings: IndexMap<String, Json>,
}

impl VariableContext {
    /// Empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded with the four subscription components
    #[must_use]
    pub fn from_subscription(subscription: &AuthorizationSubscription) -> Self {
        let mut bindings = IndexMap::new();
        bindings.insert("subject".to_string(), subscription.subject.clone());
        bindings.insert("action".to_string(), subscription.action.clone());
        bindings.insert("resource".to_string(), subscription.resource.clone());
        bindings.insert("environment".to_string(), subscription.environment.clone());
        Self { bindings }
    }

    /// Bind a variable, overwriting any previous binding of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error when attempting to overwrite a reserved
    /// subscription name.
    pub fn put(&mut self, name: impl Into<String>, value: Json) -> EngineResult<()> {
        let name = name.into();
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(EngineError::Evaluation {
                message: format!("cannot overwrite reserved variable '{}'", name),
            });
        }
        self.bindings.insert(name, value);
        Ok(())
    }

    /// Bind a set of environment variables, consuming self.
    ///
    /// # Errors
    ///
    /// Returns an error when a reserved name is among the keys.
    pub fn with_variables(
        mut self,
        variables: impl IntoIterator<Item = (String, Json)>,
    ) -> EngineResult<Self> {
        for (name, value) in variables {
            self.put(name, value)?;
        }
        Ok(self)
    }

    /// Look up a variable. Unknown names yield [`Val::Undefined`].
    #[must_use]
    pub fn get(&self, name: &str) -> Val {
        match self.bindings.get(name) {
            Some(value) => Val::of(value.clone()),
            None => Val::undefined(),
        }
    }

    /// True if the variable is bound
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}
