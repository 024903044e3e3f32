//! The `Runtime`: one isolated language instance.
//!
//! Owns the heap, the global symbol table, the loaded functions, the native
//! table, the live call stack, and the debugger state. Instances share
//! nothing; the host may run any number side by side. Teardown is `Drop`:
//! dropping the runtime releases every pooled object exactly once.

use crate::debug::{DebugHooks, Flags};
use crate::error::{Error, ErrorRecord};
use crate::frame::Frame;
use crate::heap::{Heap, HeapObject, HeapStats};
use crate::host::{self, HostFn, NativeEntry};
use crate::serialize::{self, TypedValue};
use crate::value::{FuncId, Value};
use lingc::compile;
use linguine_core::{Function, Image};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct LoadedFunction {
    pub func: Rc<Function>,
    /// Where the source came from; error records point here.
    pub file: Rc<str>,
}

pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) globals: HashMap<String, Value>,
    pub(crate) functions: Vec<LoadedFunction>,
    pub(crate) natives: Vec<NativeEntry>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) hooks: DebugHooks,
    pub(crate) hooks_enabled: bool,
    flags: Arc<Flags>,
    last_error: Option<ErrorRecord>,
}

impl Runtime {
    /// A fresh instance with the intrinsics installed.
    pub fn new() -> Runtime {
        let mut rt = Runtime {
            heap: Heap::new(),
            globals: HashMap::new(),
            functions: Vec::new(),
            natives: Vec::new(),
            frames: Vec::new(),
            hooks: DebugHooks::default(),
            hooks_enabled: false,
            flags: Flags::new(),
            last_error: None,
        };
        crate::intrinsics::install(&mut rt);
        rt
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Compile `text` and install its functions. On failure the error is
    /// also recorded for [`Runtime::last_error`], attributed to `filename`.
    pub fn load_source(&mut self, filename: &str, text: &str) -> Result<(), Error> {
        match compile(text) {
            Ok(image) => self.install(image, filename),
            Err(e) => {
                let line = e.line().unwrap_or(0);
                let err: Error = e.into();
                self.record_error(filename, line, &err);
                Err(err)
            }
        }
    }

    /// Install an already-compiled image.
    pub fn load_image(&mut self, image: Image) -> Result<(), Error> {
        self.install(image, "<image>")
    }

    /// Decode and install a serialized image.
    pub fn load_image_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let image = Image::from_bytes(bytes).map_err(|e| {
            let err = Error::Format(e);
            self.record_error("<image>", 0, &err);
            err
        })?;
        self.install(image, "<image>")
    }

    fn install(&mut self, image: Image, file: &str) -> Result<(), Error> {
        let file: Rc<str> = Rc::from(file);
        for func in image.functions {
            func.validate()?;
            let idx = self.functions.len() as u32;
            let name = func.name.clone();
            self.functions.push(LoadedFunction { func: Rc::new(func), file: file.clone() });
            self.globals.insert(name, Value::Func(FuncId::Script(idx)));
        }
        debug!(file = %file, functions = self.functions.len(), "installed image");
        Ok(())
    }

    /// Register a host callable under `name`.
    pub fn register_func(
        &mut self,
        name: &str,
        f: impl Fn(&mut Runtime, Option<Value>, &[Value]) -> Result<Value, Error> + 'static,
    ) -> Result<(), Error> {
        self.add_native(name, Rc::new(f))
    }

    pub(crate) fn add_native(&mut self, name: &str, f: HostFn) -> Result<(), Error> {
        host::validate_name(name)?;
        let idx = self.natives.len() as u32;
        self.natives.push(NativeEntry { name: name.to_string(), f });
        self.globals.insert(name.to_string(), Value::Func(FuncId::Native(idx)));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Calling
    // ------------------------------------------------------------------

    /// Call a global function by name. The returned value, if it lives on
    /// the heap, is pinned; release it when done holding it.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, Error> {
        self.last_error = None;
        self.flags.set_error(false);
        let callee = match self.globals.get(name).copied() {
            Some(v @ Value::Func(_)) => v,
            _ => {
                let err = Error::Name(name.to_string());
                self.record_error("<host>", 0, &err);
                self.flags.set_error(true);
                return Err(err);
            }
        };
        match self.call_value(callee, None, args) {
            Ok(value) => {
                self.heap.retain(value);
                Ok(value)
            }
            Err(e) => {
                self.flags.set_error(true);
                // Frames are already unwound; sweep what they abandoned.
                self.collect_now();
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Errors & debugging
    // ------------------------------------------------------------------

    /// Where the most recent failed call went wrong.
    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.last_error.as_ref()
    }

    pub(crate) fn record_error(&mut self, file: &str, line: u32, err: &Error) {
        if self.last_error.is_none() {
            self.last_error =
                Some(ErrorRecord { file: file.to_string(), line, message: err.to_string() });
        }
    }

    /// Record the failure site and return the error, for `?`-chaining.
    /// Keeps the innermost record when errors propagate outward.
    pub(crate) fn fail(&mut self, file: &str, line: u32, err: Error) -> Error {
        self.record_error(file, line, &err);
        self.flags.set_error(true);
        err
    }

    /// Shared flag block; hand a clone to a watchdog thread to cancel, or
    /// to a debugger front end to drive stop/single-step.
    pub fn flags(&self) -> Arc<Flags> {
        self.flags.clone()
    }

    pub(crate) fn flags_ref(&self) -> &Flags {
        &self.flags
    }

    /// Install (or clear) the per-instruction debug hooks.
    pub fn set_debug_hooks(&mut self, hooks: DebugHooks) {
        self.hooks_enabled = !hooks.is_empty();
        self.hooks = hooks;
    }

    // ------------------------------------------------------------------
    // Heap control
    // ------------------------------------------------------------------

    /// Force a collection now.
    pub fn gc(&mut self) {
        self.collect_now();
    }

    pub(crate) fn maybe_gc(&mut self) {
        if self.heap.wants_collection() {
            self.collect_now();
        }
    }

    pub(crate) fn collect_now(&mut self) {
        let Runtime { heap, frames, globals, .. } = self;
        let roots = frames
            .iter()
            .flat_map(|f| f.regs.iter().copied())
            .chain(globals.values().copied());
        heap.collect(roots);
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Pin a value the host wants to keep across calls.
    pub fn retain(&mut self, value: Value) {
        self.heap.retain(value);
    }

    /// Release a pinned value.
    pub fn release(&mut self, value: Value) {
        self.heap.release(value);
    }

    // ------------------------------------------------------------------
    // Read-only inspection
    // ------------------------------------------------------------------

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }

    /// Bind a global directly from the host.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn str_value(&self, value: Value) -> Option<&str> {
        match value {
            Value::Str(h) => Some(self.heap.str_at(h)),
            _ => None,
        }
    }

    pub fn array_len(&self, value: Value) -> Option<usize> {
        match value {
            Value::Array(h) => match self.heap.get(h) {
                HeapObject::Array(items) => Some(items.len()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn array_get(&self, value: Value, index: usize) -> Option<Value> {
        match value {
            Value::Array(h) => match self.heap.get(h) {
                HeapObject::Array(items) => items.get(index).copied(),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn dict_len(&self, value: Value) -> Option<usize> {
        match value {
            Value::Dict(h) => match self.heap.get(h) {
                HeapObject::Dict(dict) => Some(dict.len()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn dict_get(&self, value: Value, key: &str) -> Option<Value> {
        match value {
            Value::Dict(h) => match self.heap.get(h) {
                HeapObject::Dict(dict) => dict.get(key),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn dict_key_at(&self, value: Value, index: usize) -> Option<&str> {
        match value {
            Value::Dict(h) => match self.heap.get(h) {
                HeapObject::Dict(dict) => dict.key_at(index),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn dict_val_at(&self, value: Value, index: usize) -> Option<Value> {
        match value {
            Value::Dict(h) => match self.heap.get(h) {
                HeapObject::Dict(dict) => dict.val_at(index),
                _ => None,
            },
            _ => None,
        }
    }

    /// Global name of a callable.
    pub fn func_name(&self, id: FuncId) -> Option<&str> {
        match id {
            FuncId::Script(i) => self.functions.get(i as usize).map(|l| l.func.name.as_str()),
            FuncId::Native(i) => self.natives.get(i as usize).map(|n| n.name.as_str()),
        }
    }

    /// Render a value in its default decimal form.
    pub fn display_value(&self, value: Value) -> String {
        crate::ops::display(&self.heap, value)
    }

    /// Deep-copy a value out of the runtime.
    pub fn to_typed(&self, value: Value) -> Result<TypedValue, Error> {
        serialize::to_typed(self, value)
    }

    /// Build a runtime value from exchange data.
    pub fn from_typed(&mut self, typed: &TypedValue) -> Result<Value, Error> {
        serialize::from_typed(self, typed)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}
