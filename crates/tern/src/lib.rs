//! tern: an S-expression language compiled to a portable stack bytecode.
//!
//! This crate bundles the reader, compiler and VM behind a small embedding API.
//!
//! # Quick Start
//!
//! ```
//! use tern::{Runtime, Value};
//!
//! let mut rt = Runtime::new();
//! let (val, out) = rt.eval_captured("(begin (println \"hi\") (+ 1 2))").unwrap();
//! assert_eq!(val, Value::Number(3));
//! assert_eq!(out, "hi\n3\n");
//! ```

pub mod config;

use std::collections::HashMap;
use std::io::Stdout;
use std::rc::Rc;
use std::sync::{Arc, RwLock};

use tracing::debug;

// Re-export core types.
pub use tern_core::{intern, resolve, Env, Instruction, Op, TernError, Value};
pub use tern_reader::{read, read_many};
pub use tern_vm::{
    compile, compile_many, deserialize, deserialize_with_table, disassemble, serialize,
    StringTable, Vm,
};

pub type Result<T> = std::result::Result<T, TernError>;

/// A key/value namespace shared between hosts.
///
/// Values are stored in their readable text form so any host can read
/// them back.
pub trait SharedNamespace: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: String);
    /// Where the namespace lives, for display.
    fn label(&self) -> &str;
}

/// In-process [`SharedNamespace`].
pub struct LocalNamespace {
    label: String,
    entries: RwLock<HashMap<String, String>>,
}

impl LocalNamespace {
    pub fn new(label: impl Into<String>) -> Self {
        LocalNamespace {
            label: label.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SharedNamespace for LocalNamespace {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, value: String) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), value);
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Builder for configuring and constructing a [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    namespace: Option<Arc<dyn SharedNamespace>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a shared namespace handle.
    pub fn with_namespace(mut self, namespace: Arc<dyn SharedNamespace>) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            vm: Vm::new(),
            namespace: self.namespace,
        }
    }
}

/// A VM plus the process-wide symbol table and an optional shared namespace.
///
/// Definitions persist across calls, so a function defined by one `eval`
/// can be used by the next.
pub struct Runtime {
    vm: Vm<Stdout>,
    namespace: Option<Arc<dyn SharedNamespace>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Read every form in `input` and compile them into one program.
    pub fn compile_source(&self, input: &str) -> Result<Vec<Instruction>> {
        let forms = read_many(input)?;
        compile_many(&forms)
    }

    /// Compile and run `input`. Output goes to standard output.
    pub fn eval(&mut self, input: &str) -> Result<Value> {
        let code = self.compile_source(input)?;
        self.run(code)
    }

    /// Compile and run a single already-read form.
    pub fn eval_form(&mut self, form: &Value) -> Result<Value> {
        let code = compile(form)?;
        self.run(code)
    }

    /// Run a compiled program against this runtime's definitions.
    pub fn run(&mut self, code: Vec<Instruction>) -> Result<Value> {
        debug!(instructions = code.len(), "running program");
        self.vm.execute(code)
    }

    /// Like [`eval`](Self::eval), but returns what the program wrote instead
    /// of printing it.
    pub fn eval_captured(&mut self, input: &str) -> Result<(Value, String)> {
        let code = self.compile_source(input)?;
        let mut vm = Vm::with_globals(Vec::new(), self.vm.globals().clone());
        let result = vm.execute(code);
        let out = String::from_utf8_lossy(&vm.into_output()).into_owned();
        Ok((result?, out))
    }

    pub fn globals(&self) -> &Rc<Env> {
        self.vm.globals()
    }

    /// Error from the most recent run, if it escaped.
    pub fn last_error(&self) -> Option<&TernError> {
        self.vm.result_error()
    }

    pub fn namespace(&self) -> Option<&Arc<dyn SharedNamespace>> {
        self.namespace.as_ref()
    }

    /// Publish a top-level binding to the shared namespace.
    pub fn share(&self, name: &str) -> Result<()> {
        let namespace = self.require_namespace()?;
        let val = self
            .globals()
            .get(intern(name))
            .ok_or_else(|| TernError::Unbound(name.to_string()))?;
        if matches!(
            val,
            Value::Closure(_) | Value::Environment(_) | Value::Array(_) | Value::HashMap(_)
        ) {
            return Err(TernError::type_error("readable value", val.type_name()));
        }
        namespace.put(name, val.to_string());
        debug!(name, namespace = namespace.label(), "shared binding");
        Ok(())
    }

    /// Define a top-level binding from the shared namespace.
    pub fn import(&self, name: &str) -> Result<Value> {
        let namespace = self.require_namespace()?;
        let text = namespace
            .get(name)
            .ok_or_else(|| TernError::Unbound(name.to_string()))?;
        let val = read(&text)?;
        self.globals().define(intern(name), val.clone());
        Ok(val)
    }

    fn require_namespace(&self) -> Result<&Arc<dyn SharedNamespace>> {
        self.namespace
            .as_ref()
            .ok_or_else(|| TernError::Unsupported("no shared namespace attached".to_string()))
    }

    /// Number of distinct symbols and strings interned in this process.
    pub fn symbol_count(&self) -> usize {
        tern_core::symbol::len()
    }
}
