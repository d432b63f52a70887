//! Handler factory: construct [`OperationHandler`]s from operation names and
//! resolved parameters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ff_core::{Error, Result};

use crate::handler::OperationHandler;
use crate::params::ResolvedParams;

/// Builds a handler from its resolved parameters.
pub type HandlerConstructor =
    Arc<dyn Fn(&ResolvedParams) -> Result<Arc<dyn OperationHandler>> + Send + Sync>;

/// Maps operation names to handler constructors.
///
/// [`HandlerRegistry::builtin`] contains every operation shipped with
/// fileforge; callers may [`register`](HandlerRegistry::register) their own.
#[derive(Clone)]
pub struct HandlerRegistry {
    constructors: HashMap<String, HandlerConstructor>,
}

impl HandlerRegistry {
    /// A registry with no operations.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry with the built-in operations.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        crate::handlers::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&ResolvedParams) -> Result<Arc<dyn OperationHandler>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered operation names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Construct the handler for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown operation name, or whatever
    /// the constructor rejects (typically [`Error::MissingParam`]).
    pub fn create(&self, name: &str, params: &ResolvedParams) -> Result<Arc<dyn OperationHandler>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| Error::config(format!("unknown operation: {name}")))?;
        constructor(params)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("operations", &self.names())
            .finish()
    }
}
