//! Function registry: user-defined functions, host-supplied native functions
//! and the static built-in table.
//!
//! Lookup order is user → native → built-in, so a `.create-or-alter function`
//! can shadow anything. The registry is shared between the evaluation thread
//! and management callers, so both maps sit behind `RwLock`s.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use kql_parser::{UserFunction, Value, parse_query_file_str};

use crate::aggregation;
use crate::error::{EvalError, Result};
use crate::functions::{self, BuiltinFn};

/// A host-registered function implemented in Rust.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// What a function name resolved to.
#[derive(Clone)]
pub enum Resolved {
    User(Arc<UserFunction>),
    Native(NativeFn),
    Builtin(BuiltinFn),
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::User(func) => write!(f, "User({})", func.name),
            Resolved::Native(_) => write!(f, "Native"),
            Resolved::Builtin(_) => write!(f, "Builtin"),
        }
    }
}

static GLOBAL: LazyLock<Arc<FunctionRegistry>> =
    LazyLock::new(|| Arc::new(FunctionRegistry::new()));

#[derive(Default)]
pub struct FunctionRegistry {
    user: RwLock<HashMap<String, Arc<UserFunction>>>,
    native: RwLock<HashMap<String, NativeFn>>,
}

impl FunctionRegistry {
    /// An empty registry. Built-ins are always available and need no setup.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<FunctionRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Register (or replace) a user-defined function. Returns the previous
    /// definition with the same name.
    pub fn add_function(&self, function: UserFunction) -> Option<Arc<UserFunction>> {
        log::debug!("registering function '{}'", function.name);
        self.user
            .write()
            .insert(function.name.clone(), Arc::new(function))
    }

    /// Parse `.create-or-alter function` text (one or more blank-line
    /// separated definitions) and register every function in it.
    ///
    /// Nothing is registered if any definition fails to parse.
    pub fn add_function_text(&self, text: &str) -> Result<Vec<String>> {
        let file = parse_query_file_str(text);
        if !file.errors.is_empty() {
            return Err(EvalError::InvalidArgument(format!(
                "invalid function definition: {}",
                file.errors.join("; ")
            )));
        }
        if file.functions.is_empty() {
            return Err(EvalError::InvalidArgument(
                "no function definition found".to_string(),
            ));
        }

        let names = file.functions.iter().map(|f| f.name.clone()).collect();
        for function in file.functions {
            self.add_function(function);
        }
        Ok(names)
    }

    pub fn remove_function(&self, name: &str) -> bool {
        self.user.write().remove(name).is_some()
    }

    pub fn get_function(&self, name: &str) -> Option<Arc<UserFunction>> {
        self.user.read().get(name).cloned()
    }

    /// Names of the registered user functions, sorted.
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.user.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Register a native function. It shadows any built-in of the same name.
    pub fn add_native<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.native.write().insert(name.into(), Arc::new(function));
    }

    pub fn remove_native(&self, name: &str) -> bool {
        self.native.write().remove(name).is_some()
    }

    /// Resolve a function name for a call.
    pub fn resolve(&self, name: &str) -> Option<Resolved> {
        if let Some(function) = self.user.read().get(name) {
            return Some(Resolved::User(Arc::clone(function)));
        }
        if let Some(function) = self.native.read().get(name) {
            return Some(Resolved::Native(Arc::clone(function)));
        }
        functions::builtin(name).map(Resolved::Builtin)
    }

    /// `true` for names that are aggregation functions (valid only inside
    /// `summarize`).
    pub fn is_aggregation(name: &str) -> bool {
        aggregation::is_aggregation(name)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("user", &self.function_names())
            .field("native", &self.native.read().len())
            .finish()
    }
}
