//! The dispatch loop.
//!
//! One `exec` activation per frame, dispatching on [`Instr`] exhaustively.
//! Calls re-enter through `call_value`, so the Rust call stack mirrors the
//! language call stack; the frame vector exists for GC roots, hooks, and
//! the depth limit. Errors record their site and unwind every frame back
//! to the host entrypoint.
//!
//! Invariants the loop relies on (checked at install time, not here):
//! every register operand is inside the frame's register file, every
//! constant operand inside its pool, every jump target inside the code.

use crate::debug::HookContext;
use crate::error::Error;
use crate::frame::{Frame, MAX_CALL_DEPTH};
use crate::heap::HeapObject;
use crate::ops;
use crate::runtime::Runtime;
use crate::value::{FuncId, Value};
use linguine_core::{Function, Instr};
use std::rc::Rc;

impl Runtime {
    /// Invoke any callable value. `this` is the `->` receiver and becomes
    /// the implicit first argument for script callees.
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        this: Option<Value>,
        args: &[Value],
    ) -> Result<Value, Error> {
        if self.flags_ref().cancel() {
            return Err(Error::Cancelled);
        }
        match callee {
            Value::Func(FuncId::Script(i)) => self.run_script(i, this, args),
            Value::Func(FuncId::Native(i)) => {
                let f = match self.natives.get(i as usize) {
                    Some(entry) => Rc::clone(&entry.f),
                    None => return Err(Error::Type("dangling function reference".to_string())),
                };
                f(self, this, args)
            }
            other => Err(Error::Type(format!("{} value is not callable", other.kind()))),
        }
    }

    fn run_script(
        &mut self,
        idx: u32,
        this: Option<Value>,
        args: &[Value],
    ) -> Result<Value, Error> {
        let (func, file) = {
            let loaded = &self.functions[idx as usize];
            (Rc::clone(&loaded.func), Rc::clone(&loaded.file))
        };
        let first_line = func.line_for_pc(0).unwrap_or(0) as u32;

        let argc = this.is_some() as usize + args.len();
        if argc > func.params.len() {
            let err = Error::Type(format!(
                "'{}' takes {} arguments, got {}",
                func.name,
                func.params.len(),
                argc
            ));
            return Err(self.fail(&file, first_line, err));
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(self.fail(&file, first_line, Error::StackOverflow));
        }

        // Missing trailing arguments stay Int(0), like every other slot.
        let mut frame = Frame::new(idx, func.tmpvar_count);
        for (i, v) in this.into_iter().chain(args.iter().copied()).enumerate() {
            frame.regs[i] = v;
        }
        self.frames.push(frame);
        let result = self.exec(&func, &file);
        self.frames.pop();
        result
    }

    fn exec(&mut self, func: &Function, file: &Rc<str>) -> Result<Value, Error> {
        let fi = self.frames.len() - 1;
        let ret_slot = func.params.len();
        let mut pc: usize = 0;
        let mut line: u16 = func.line_for_pc(0).unwrap_or(0);

        loop {
            // Between instructions is the only safe point to collect.
            self.maybe_gc();

            if pc >= func.code.len() {
                // Ran past the end: the frame's result is the return slot.
                return Ok(self.frames[fi].regs.get(ret_slot).copied().unwrap_or_default());
            }
            line = func.line_for_pc(pc as u32).unwrap_or(line);

            if self.hooks_enabled {
                self.hooks_pre(func, fi, pc as u32, line)
                    .map_err(|e| self.fail(file, line as u32, e))?;
            }

            let instr = &func.code[pc];
            let mut next_pc = pc + 1;
            match instr {
                Instr::Nop => {}
                Instr::LineInfo { line: l } => line = *l,
                Instr::Assign { dst, src } => {
                    let v = self.reg(fi, *src);
                    self.set_reg(fi, *dst, v);
                }
                Instr::IConst { dst, value } => self.set_reg(fi, *dst, Value::Int(*value)),
                Instr::FConst { dst, idx } => {
                    self.set_reg(fi, *dst, Value::Float(func.const_floats[*idx as usize]));
                }
                Instr::SConst { dst, idx } => {
                    let v = self.heap.alloc_str(func.const_strs[*idx as usize].as_str());
                    self.set_reg(fi, *dst, v);
                }
                Instr::AConst { dst } => {
                    let v = self.heap.alloc_array();
                    self.set_reg(fi, *dst, v);
                }
                Instr::DConst { dst } => {
                    let v = self.heap.alloc_dict();
                    self.set_reg(fi, *dst, v);
                }
                Instr::Inc { dst, src } => {
                    let v = match self.reg(fi, *src) {
                        Value::Int(v) => Value::Int(v.wrapping_add(1)),
                        Value::Float(v) => Value::Float(v + 1.0),
                        other => {
                            let err = Error::Type(format!("cannot increment {}", other.kind()));
                            return Err(self.fail(file, line as u32, err));
                        }
                    };
                    self.set_reg(fi, *dst, v);
                }
                Instr::Neg { dst, src } => {
                    let v = match self.reg(fi, *src) {
                        Value::Int(v) => Value::Int(!v),
                        Value::Float(v) => Value::Float(-v),
                        other => {
                            let err = Error::Type(format!("cannot negate {}", other.kind()));
                            return Err(self.fail(file, line as u32, err));
                        }
                    };
                    self.set_reg(fi, *dst, v);
                }
                Instr::Bin { op, dst, a, b } => {
                    let (a, b) = (self.reg(fi, *a), self.reg(fi, *b));
                    match ops::binary(&mut self.heap, *op, a, b) {
                        Ok(v) => self.set_reg(fi, *dst, v),
                        Err(e) => return Err(self.fail(file, line as u32, e)),
                    }
                }
                Instr::LoadArray { dst, arr, idx } => {
                    let (c, i) = (self.reg(fi, *arr), self.reg(fi, *idx));
                    match self.load_index(c, i) {
                        Ok(v) => self.set_reg(fi, *dst, v),
                        Err(e) => return Err(self.fail(file, line as u32, e)),
                    }
                }
                Instr::StoreArray { arr, idx, src } => {
                    let (c, i, v) = (self.reg(fi, *arr), self.reg(fi, *idx), self.reg(fi, *src));
                    if let Err(e) = self.store_index(c, i, v) {
                        return Err(self.fail(file, line as u32, e));
                    }
                }
                Instr::Len { dst, src } => {
                    let v = self.reg(fi, *src);
                    match self.value_len(v) {
                        Ok(n) => self.set_reg(fi, *dst, Value::Int(n)),
                        Err(e) => return Err(self.fail(file, line as u32, e)),
                    }
                }
                Instr::GetDictKeyByIndex { dst, dict, idx } => {
                    let (c, i) = (self.reg(fi, *dict), self.reg(fi, *idx));
                    match self.positional_key(c, i) {
                        Ok(v) => self.set_reg(fi, *dst, v),
                        Err(e) => return Err(self.fail(file, line as u32, e)),
                    }
                }
                Instr::GetDictValByIndex { dst, dict, idx } => {
                    let (c, i) = (self.reg(fi, *dict), self.reg(fi, *idx));
                    match self.positional_val(c, i) {
                        Ok(v) => self.set_reg(fi, *dst, v),
                        Err(e) => return Err(self.fail(file, line as u32, e)),
                    }
                }
                Instr::LoadDot { dst, obj, name } => {
                    let obj_v = self.reg(fi, *obj);
                    let field = func.const_strs[*name as usize].as_str();
                    match self.load_dot(obj_v, field) {
                        Ok(v) => self.set_reg(fi, *dst, v),
                        Err(e) => return Err(self.fail(file, line as u32, e)),
                    }
                }
                Instr::StoreDot { obj, name, src } => {
                    let (obj_v, v) = (self.reg(fi, *obj), self.reg(fi, *src));
                    let field = func.const_strs[*name as usize].as_str();
                    if let Err(e) = self.store_dot(obj_v, field, v) {
                        return Err(self.fail(file, line as u32, e));
                    }
                }
                Instr::LoadSymbol { dst, name } => {
                    let symbol = func.const_strs[*name as usize].as_str();
                    let resolved = self.globals.get(symbol).copied();
                    match resolved {
                        Some(v) => self.set_reg(fi, *dst, v),
                        None => {
                            let err = Error::Name(symbol.to_string());
                            return Err(self.fail(file, line as u32, err));
                        }
                    }
                }
                Instr::StoreSymbol { name, src } => {
                    let v = self.reg(fi, *src);
                    let symbol = func.const_strs[*name as usize].clone();
                    self.globals.insert(symbol, v);
                }
                Instr::Call { dst, callee, args } => {
                    let callee_v = self.reg(fi, *callee);
                    let argv: Vec<Value> = args.iter().map(|&a| self.reg(fi, a)).collect();
                    match self.call_value(callee_v, None, &argv) {
                        Ok(v) => self.set_reg(fi, *dst, v),
                        Err(e) => return Err(self.fail(file, line as u32, e)),
                    }
                }
                Instr::ThisCall { dst, recv, name, args } => {
                    let recv_v = self.reg(fi, *recv);
                    let method = func.const_strs[*name as usize].as_str();
                    let callee_v = self.resolve_method(recv_v, method);
                    let Some(callee_v) = callee_v else {
                        let err = Error::Name(method.to_string());
                        return Err(self.fail(file, line as u32, err));
                    };
                    let argv: Vec<Value> = args.iter().map(|&a| self.reg(fi, a)).collect();
                    match self.call_value(callee_v, Some(recv_v), &argv) {
                        Ok(v) => self.set_reg(fi, *dst, v),
                        Err(e) => return Err(self.fail(file, line as u32, e)),
                    }
                }
                Instr::Jmp { target } => {
                    if (*target as usize) <= pc && self.flags_ref().cancel() {
                        return Err(self.fail(file, line as u32, Error::Cancelled));
                    }
                    next_pc = *target as usize;
                }
                Instr::JmpIfTrue { target, src } => {
                    if matches!(self.reg(fi, *src), Value::Int(1)) {
                        if (*target as usize) <= pc && self.flags_ref().cancel() {
                            return Err(self.fail(file, line as u32, Error::Cancelled));
                        }
                        next_pc = *target as usize;
                    }
                }
                Instr::JmpIfFalse { target, src } => {
                    if !matches!(self.reg(fi, *src), Value::Int(1)) {
                        if (*target as usize) <= pc && self.flags_ref().cancel() {
                            return Err(self.fail(file, line as u32, Error::Cancelled));
                        }
                        next_pc = *target as usize;
                    }
                }
            }

            if self.hooks_enabled {
                let next_line = if next_pc < func.code.len() {
                    func.line_for_pc(next_pc as u32).unwrap_or(line)
                } else {
                    line
                };
                self.hooks_post(func, fi, pc as u32, line, next_line);
            }
            pc = next_pc;
        }
    }

    // ------------------------------------------------------------------
    // Register file
    // ------------------------------------------------------------------

    fn reg(&self, fi: usize, i: u16) -> Value {
        self.frames[fi].regs[i as usize]
    }

    fn set_reg(&mut self, fi: usize, i: u16, v: Value) {
        self.frames[fi].regs[i as usize] = v;
    }

    // ------------------------------------------------------------------
    // Container semantics
    // ------------------------------------------------------------------

    pub(crate) fn value_len(&self, v: Value) -> Result<i32, Error> {
        match v {
            Value::Str(h) => Ok(self.heap.str_at(h).chars().count() as i32),
            Value::Array(h) => match self.heap.get(h) {
                HeapObject::Array(items) => Ok(items.len() as i32),
                _ => Err(Error::Type("corrupt array handle".to_string())),
            },
            Value::Dict(h) => match self.heap.get(h) {
                HeapObject::Dict(dict) => Ok(dict.len() as i32),
                _ => Err(Error::Type("corrupt dict handle".to_string())),
            },
            other => Err(Error::Type(format!("{} has no length", other.kind()))),
        }
    }

    fn load_index(&mut self, container: Value, index: Value) -> Result<Value, Error> {
        match (container, index) {
            (Value::Array(h), Value::Int(i)) => {
                let HeapObject::Array(items) = self.heap.get(h) else {
                    return Err(Error::Type("corrupt array handle".to_string()));
                };
                items.get(usize_index(i, items.len())?).copied().ok_or_else(|| {
                    Error::Index(format!("array index {i} out of range (len {})", items.len()))
                })
            }
            (Value::Dict(_), Value::Int(_)) => self.positional_val(container, index),
            (Value::Dict(h), Value::Str(k)) => {
                let HeapObject::Dict(dict) = self.heap.get(h) else {
                    return Err(Error::Type("corrupt dict handle".to_string()));
                };
                let key = self.heap.str_at(k);
                dict.get(key).ok_or_else(|| Error::Index(format!("no key '{key}'")))
            }
            (Value::Str(h), Value::Int(i)) => {
                let (ch, count) = {
                    let s = self.heap.str_at(h);
                    let ch = if i >= 0 { s.chars().nth(i as usize) } else { None };
                    (ch, s.chars().count())
                };
                match ch {
                    Some(ch) => Ok(self.heap.alloc_str(ch.to_string())),
                    None => Err(Error::Index(format!(
                        "string index {i} out of range (len {count})"
                    ))),
                }
            }
            (c, i) => {
                Err(Error::Type(format!("cannot index {} with {}", c.kind(), i.kind())))
            }
        }
    }

    fn store_index(&mut self, container: Value, index: Value, v: Value) -> Result<(), Error> {
        match (container, index) {
            (Value::Array(h), Value::Int(i)) => {
                let HeapObject::Array(items) = self.heap.get_mut(h) else {
                    return Err(Error::Type("corrupt array handle".to_string()));
                };
                let len = items.len();
                if i < 0 || i as usize > len {
                    return Err(Error::Index(format!(
                        "array store index {i} out of range (len {len})"
                    )));
                }
                // Storing one past the end appends.
                if i as usize == len {
                    items.push(v);
                } else {
                    items[i as usize] = v;
                }
                Ok(())
            }
            (Value::Array(_), other) => {
                Err(Error::Type(format!("array index must be an int, not {}", other.kind())))
            }
            (Value::Dict(h), Value::Str(k)) => {
                let key = self.heap.str_at(k).to_string();
                let HeapObject::Dict(dict) = self.heap.get_mut(h) else {
                    return Err(Error::Type("corrupt dict handle".to_string()));
                };
                dict.set(&key, v);
                Ok(())
            }
            (Value::Dict(_), other) => {
                Err(Error::Type(format!("dict key must be a string, not {}", other.kind())))
            }
            (Value::Str(_), _) => Err(Error::Type("strings are immutable".to_string())),
            (c, _) => Err(Error::Type(format!("cannot index {}", c.kind()))),
        }
    }

    /// Position → key. For a dictionary that is the stored key; for an
    /// array the position itself, which is what gives `for (k, v in array)`
    /// its index/element pairs.
    fn positional_key(&mut self, container: Value, index: Value) -> Result<Value, Error> {
        let Value::Int(i) = index else {
            return Err(Error::Type(format!("position must be an int, not {}", index.kind())));
        };
        match container {
            Value::Dict(h) => {
                let HeapObject::Dict(dict) = self.heap.get(h) else {
                    return Err(Error::Type("corrupt dict handle".to_string()));
                };
                let key = dict
                    .key_at(usize_index(i, dict.len())?)
                    .ok_or_else(|| Error::Index(format!("dict position {i} out of range")))?
                    .to_string();
                Ok(self.heap.alloc_str(key))
            }
            Value::Array(h) => {
                let HeapObject::Array(items) = self.heap.get(h) else {
                    return Err(Error::Type("corrupt array handle".to_string()));
                };
                usize_index(i, items.len())?;
                Ok(Value::Int(i))
            }
            other => Err(Error::Type(format!("{} has no positions", other.kind()))),
        }
    }

    fn positional_val(&self, container: Value, index: Value) -> Result<Value, Error> {
        let Value::Int(i) = index else {
            return Err(Error::Type(format!("position must be an int, not {}", index.kind())));
        };
        match container {
            Value::Dict(h) => {
                let HeapObject::Dict(dict) = self.heap.get(h) else {
                    return Err(Error::Type("corrupt dict handle".to_string()));
                };
                dict.val_at(usize_index(i, dict.len())?)
                    .ok_or_else(|| Error::Index(format!("dict position {i} out of range")))
            }
            Value::Array(h) => {
                let HeapObject::Array(items) = self.heap.get(h) else {
                    return Err(Error::Type("corrupt array handle".to_string()));
                };
                items
                    .get(usize_index(i, items.len())?)
                    .copied()
                    .ok_or_else(|| Error::Index(format!("array position {i} out of range")))
            }
            other => Err(Error::Type(format!("{} has no positions", other.kind()))),
        }
    }

    fn load_dot(&self, obj: Value, field: &str) -> Result<Value, Error> {
        match obj {
            Value::Dict(h) => match self.heap.get(h) {
                HeapObject::Dict(dict) => {
                    dict.get(field).ok_or_else(|| Error::Index(format!("no key '{field}'")))
                }
                _ => Err(Error::Type("corrupt dict handle".to_string())),
            },
            other => Err(Error::Type(format!("{} has no fields", other.kind()))),
        }
    }

    fn store_dot(&mut self, obj: Value, field: &str, v: Value) -> Result<(), Error> {
        match obj {
            Value::Dict(h) => {
                let HeapObject::Dict(dict) = self.heap.get_mut(h) else {
                    return Err(Error::Type("corrupt dict handle".to_string()));
                };
                dict.set(field, v);
                Ok(())
            }
            other => Err(Error::Type(format!("cannot set a field on {}", other.kind()))),
        }
    }

    /// `recv->name(...)`: a Dict receiver holding `name` wins, the global
    /// symbol table is the fallback. The receiver becomes argument zero
    /// either way.
    fn resolve_method(&self, recv: Value, name: &str) -> Option<Value> {
        if let Value::Dict(h) = recv {
            if let HeapObject::Dict(dict) = self.heap.get(h) {
                if let Some(v) = dict.get(name) {
                    return Some(v);
                }
            }
        }
        self.globals.get(name).copied()
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    fn hooks_pre(&self, func: &Function, fi: usize, pc: u32, line: u16) -> Result<(), Error> {
        if let Some(pre) = &self.hooks.pre {
            let ctx = HookContext { function: &func.name, pc, line, regs: &self.frames[fi].regs };
            pre(&ctx);
        }
        // Stopped: wait for the host to clear the flag (or cancel).
        while self.flags_ref().stop() {
            if self.flags_ref().cancel() {
                return Err(Error::Cancelled);
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    fn hooks_post(&self, func: &Function, fi: usize, pc: u32, line: u16, next_line: u16) {
        if let Some(post) = &self.hooks.post {
            let ctx = HookContext { function: &func.name, pc, line, regs: &self.frames[fi].regs };
            post(&ctx);
        }
        if self.flags_ref().single_step() && next_line != line {
            self.flags_ref().set_stop(true);
        }
    }
}

/// Bounds-check a signed index against a length.
fn usize_index(i: i32, len: usize) -> Result<usize, Error> {
    if i >= 0 && (i as usize) < len {
        Ok(i as usize)
    } else {
        Err(Error::Index(format!("index {i} out of range (len {len})")))
    }
}

#[cfg(test)]
mod tests {
    //! Opcode-level tests through hand-built images, for the VM surface the
    //! compiler does not currently emit.

    use super::*;
    use linguine_core::{BinOp, Image, LineEntry};

    fn one_function(code: Vec<Instr>, tmpvar_count: u16) -> Image {
        Image {
            functions: vec![Function {
                name: "t".to_string(),
                params: vec![],
                tmpvar_count,
                const_ints: vec![],
                const_floats: vec![2.5],
                const_strs: vec![],
                code,
                lines: vec![LineEntry { pc: 0, line: 1 }],
            }],
        }
    }

    fn run(code: Vec<Instr>, tmpvar_count: u16) -> Result<Value, Error> {
        let mut rt = Runtime::new();
        rt.load_image(one_function(code, tmpvar_count))?;
        rt.call("t", &[])
    }

    #[test]
    fn neg_is_bitwise_complement_on_int() {
        let v = run(
            vec![
                Instr::IConst { dst: 1, value: 5 },
                Instr::Neg { dst: 0, src: 1 },
            ],
            2,
        )
        .unwrap();
        assert_eq!(v, Value::Int(!5));
    }

    #[test]
    fn neg_negates_floats() {
        let v = run(
            vec![
                Instr::FConst { dst: 1, idx: 0 },
                Instr::Neg { dst: 0, src: 1 },
            ],
            2,
        )
        .unwrap();
        assert_eq!(v, Value::Float(-2.5));
    }

    #[test]
    fn xor_works_on_ints() {
        let v = run(
            vec![
                Instr::IConst { dst: 1, value: 0b1100 },
                Instr::IConst { dst: 2, value: 0b1010 },
                Instr::Bin { op: BinOp::Xor, dst: 0, a: 1, b: 2 },
            ],
            3,
        )
        .unwrap();
        assert_eq!(v, Value::Int(0b0110));
    }

    #[test]
    fn jmpiftrue_requires_exactly_one() {
        // r1 = 2; JMPIFTRUE over the assignment of 99 — must not jump.
        let v = run(
            vec![
                Instr::IConst { dst: 1, value: 2 },
                Instr::JmpIfTrue { target: 3, src: 1 },
                Instr::IConst { dst: 0, value: 99 },
                Instr::Nop,
            ],
            2,
        )
        .unwrap();
        assert_eq!(v, Value::Int(99));

        let v = run(
            vec![
                Instr::IConst { dst: 1, value: 1 },
                Instr::JmpIfTrue { target: 3, src: 1 },
                Instr::IConst { dst: 0, value: 99 },
                Instr::Nop,
            ],
            2,
        )
        .unwrap();
        assert_eq!(v, Value::Int(0));
    }

    #[test]
    fn lineinfo_updates_error_position() {
        // No line table at all: positions come from LINEINFO markers.
        let mut rt = Runtime::new();
        rt.load_image(Image {
            functions: vec![Function {
                name: "t".to_string(),
                params: vec![],
                tmpvar_count: 3,
                const_ints: vec![],
                const_floats: vec![],
                const_strs: vec![],
                code: vec![
                    Instr::LineInfo { line: 41 },
                    Instr::IConst { dst: 1, value: 1 },
                    Instr::IConst { dst: 2, value: 0 },
                    Instr::Bin { op: BinOp::Div, dst: 0, a: 1, b: 2 },
                ],
                lines: vec![],
            }],
        })
        .unwrap();
        assert_eq!(rt.call("t", &[]), Err(Error::DivideByZero));
        assert_eq!(rt.last_error().unwrap().line, 41);
    }

    #[test]
    fn inc_promotes_float_and_rejects_strings() {
        let v = run(
            vec![Instr::FConst { dst: 1, idx: 0 }, Instr::Inc { dst: 0, src: 1 }],
            2,
        )
        .unwrap();
        assert_eq!(v, Value::Float(3.5));
    }

    #[test]
    fn falling_off_the_end_returns_int_zero() {
        let v = run(vec![Instr::Nop], 1).unwrap();
        assert_eq!(v, Value::Int(0));
    }
}
