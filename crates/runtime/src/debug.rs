//! Debugger hook interface.
//!
//! The host installs a pre- and/or post-instruction callback; the
//! interpreter consults them around every instruction while hooks are
//! enabled. The [`Flags`] block is shared with the host as an `Arc` so a
//! watchdog thread can request cancellation, and so an interactive
//! front end can drive stop/single-step:
//!
//! - `stop`: while set, the interpreter blocks after the pre-hook until the
//!   host clears it.
//! - `single_step`: the post-hook re-arms `stop` as soon as execution moves
//!   to a different source line.
//! - `cancel`: checked at every backward jump and call; unwinds with
//!   `Cancelled`.
//! - `error`: set by the runtime when an execution error unwinds.
//!
//! Hook callbacks get a read-only [`HookContext`]; inspecting registers
//! through it neither allocates nor mutates.

use crate::value::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct Flags {
    pub stop: AtomicBool,
    pub single_step: AtomicBool,
    pub cancel: AtomicBool,
    pub error: AtomicBool,
}

impl Flags {
    pub fn new() -> Arc<Flags> {
        Arc::new(Flags::default())
    }

    pub fn stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn set_stop(&self, on: bool) {
        self.stop.store(on, Ordering::Release);
    }

    pub fn single_step(&self) -> bool {
        self.single_step.load(Ordering::Acquire)
    }

    pub fn set_single_step(&self, on: bool) {
        self.single_step.store(on, Ordering::Release);
    }

    pub fn cancel(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn set_cancel(&self, on: bool) {
        self.cancel.store(on, Ordering::Release);
    }

    pub fn error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    pub(crate) fn set_error(&self, on: bool) {
        self.error.store(on, Ordering::Release);
    }
}

/// What a hook is allowed to see: the instruction about to run (or just
/// run) and the frame it runs in.
pub struct HookContext<'a> {
    pub function: &'a str,
    pub pc: u32,
    pub line: u16,
    pub(crate) regs: &'a [Value],
}

impl HookContext<'_> {
    pub fn tmpvar_count(&self) -> usize {
        self.regs.len()
    }

    pub fn tmpvar(&self, index: usize) -> Option<Value> {
        self.regs.get(index).copied()
    }
}

pub type HookFn = Box<dyn Fn(&HookContext<'_>)>;

/// Pre/post-instruction callbacks. Either side may be absent.
#[derive(Default)]
pub struct DebugHooks {
    pub pre: Option<HookFn>,
    pub post: Option<HookFn>,
}

impl DebugHooks {
    pub fn is_empty(&self) -> bool {
        self.pre.is_none() && self.post.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_clear() {
        let flags = Flags::new();
        assert!(!flags.stop());
        assert!(!flags.single_step());
        assert!(!flags.cancel());
        assert!(!flags.error());
    }

    #[test]
    fn hook_context_reads_registers() {
        let regs = [Value::Int(7), Value::Float(1.0)];
        let ctx = HookContext { function: "main", pc: 3, line: 2, regs: &regs };
        assert_eq!(ctx.tmpvar(0), Some(Value::Int(7)));
        assert_eq!(ctx.tmpvar(5), None);
        assert_eq!(ctx.tmpvar_count(), 2);
    }
}
