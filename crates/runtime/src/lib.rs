//! Linguine runtime: the embeddable interpreter.
//!
//! A [`Runtime`] is one isolated language instance: load source or a
//! compiled image, register host functions, call script functions, inspect
//! the results. Execution is single-threaded and cooperative; the host can
//! cancel long-running scripts through the shared [`Flags`] block and can
//! observe every instruction through [`DebugHooks`].
//!
//! ```rust
//! use linguine_runtime::{Runtime, Value};
//!
//! let mut rt = Runtime::new();
//! rt.load_source("demo.lin", "func main() { return 1 + 2 * 3; }").unwrap();
//! assert_eq!(rt.call("main", &[]).unwrap(), Value::Int(7));
//! ```
//!
//! # Modules
//!
//! - `value`: the tagged `Value` representation and handles
//! - `heap`: the object pool and its mark-and-sweep collector
//! - `ops`: operator semantics (promotion, equality, rendering)
//! - `frame`: activation records and the call-depth limit
//! - `interp`: the dispatch loop
//! - `intrinsics`: built-in functions
//! - `host`: native-callable registration
//! - `debug`: per-instruction hooks and the shared flag block
//! - `serialize`: deep-copy `TypedValue` exchange form
//! - `error`: the error taxonomy and `last_error` records

pub mod debug;
pub mod error;
pub mod frame;
pub mod heap;
pub mod host;
mod interp;
mod intrinsics;
pub mod ops;
pub mod runtime;
pub mod serialize;
pub mod value;

pub use debug::{DebugHooks, Flags, HookContext, HookFn};
pub use error::{Error, ErrorRecord};
pub use frame::MAX_CALL_DEPTH;
pub use heap::{Dict, Heap, HeapObject, HeapStats};
pub use host::HostFn;
pub use runtime::Runtime;
pub use serialize::TypedValue;
pub use value::{FuncId, Handle, Value};
