//! Evaluation context shared by every node of one evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use warden_core::VariableContext;

use crate::attributes::AttributeRegistry;
use crate::expression::resolve_name;
use crate::functions::FunctionLibrary;

/// Everything an expression needs to evaluate: variable bindings, the
/// attribute registry, the function library, and the import map of the
/// policy being evaluated.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    variables: VariableContext,
    attributes: Arc<AttributeRegistry>,
    functions: Arc<FunctionLibrary>,
    imports: Arc<HashMap<String, String>>,
}

impl EvaluationContext {
    /// Context with no imports
    #[must_use]
    pub fn new(
        variables: VariableContext,
        attributes: Arc<AttributeRegistry>,
        functions: Arc<FunctionLibrary>,
    ) -> Self {
        Self {
            variables,
            attributes,
            functions,
            imports: Arc::new(HashMap::new()),
        }
    }

    /// Same context under a policy's import map
    #[must_use]
    pub fn with_imports(&self, imports: Arc<HashMap<String, String>>) -> Self {
        Self {
            variables: self.variables.clone(),
            attributes: self.attributes.clone(),
            functions: self.functions.clone(),
            imports,
        }
    }

    /// Variable bindings
    #[must_use]
    pub fn variables(&self) -> &VariableContext {
        &self.variables
    }

    /// Attribute registry
    #[must_use]
    pub fn attributes(&self) -> &AttributeRegistry {
        &self.attributes
    }

    /// Function library
    #[must_use]
    pub fn functions(&self) -> &FunctionLibrary {
        &self.functions
    }

    /// Import map of the policy under evaluation
    #[must_use]
    pub fn imports(&self) -> &HashMap<String, String> {
        &self.imports
    }

    /// Resolve a function or attribute name through the import map
    #[must_use]
    pub fn resolve(&self, name: &str) -> String {
        resolve_name(name, &self.imports).to_string()
    }
}
