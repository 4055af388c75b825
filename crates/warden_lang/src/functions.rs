//! Function library collaborator.
//!
//! Functions are pure and synchronous: fully qualified name plus argument
//! values in, one value out. The registry is built explicitly at startup
//! and resolved by name lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use warden_core::Val;

/// A pure policy function.
pub type PolicyFunction = dyn Fn(&[Val]) -> Val + Send + Sync;

/// Name-indexed registry of pure functions.
#[derive(Clone, Default)]
pub struct FunctionLibrary {
    functions: HashMap<String, Arc<PolicyFunction>>,
}

impl FunctionLibrary {
    /// Empty library
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under its fully qualified name, replacing any
    /// previous registration.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        function: impl Fn(&[Val]) -> Val + Send + Sync + 'static,
    ) {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Register a function, consuming self. Builder form of
    /// [`FunctionLibrary::register`].
    #[must_use]
    pub fn with_function(
        mut self,
        name: impl Into<String>,
        function: impl Fn(&[Val]) -> Val + Send + Sync + 'static,
    ) -> Self {
        self.register(name, function);
        self
    }

    /// True if a function is registered under the name
    #[must_use]
    pub fn provides(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Apply the named function to the arguments. Unknown names produce an
    /// error value.
    #[must_use]
    pub fn evaluate(&self, name: &str, args: &[Val]) -> Val {
        match self.functions.get(name) {
            Some(function) => function(args),
            None => Val::error(format!("Unknown function: '{}'.", name)),
        }
    }
}

impl fmt::Debug for FunctionLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionLibrary")
            .field("functions", &names)
            .finish()
    }
}
