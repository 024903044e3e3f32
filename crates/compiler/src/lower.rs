//! AST → bytecode lowering.
//!
//! Each function lowers independently. Parameters occupy `tmpvar[0..argc)`,
//! the register after them is the return slot, and every subexpression
//! materializes into a freshly allocated register from a high-water
//! allocator. Control flow is emitted with forward-patched jumps; `break`
//! and `continue` keep patch lists per enclosing loop. There is no return
//! opcode: `return e;` assigns the return slot and jumps to a trailing
//! `NOP`, and falling past it ends the frame.
//!
//! Source lines are recorded in a parallel table, one entry per statement
//! line change.

use crate::ast::{self, Expr, Func, Program, Span, Stmt};
use crate::error::CompileError;
use linguine_core::{BinOp, Function, Image, Instr, LineEntry};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Lower a parsed program into a bytecode image.
pub fn lower(program: &Program) -> Result<Image, CompileError> {
    let mut seen = HashSet::new();
    let mut functions = Vec::with_capacity(program.funcs.len());
    for func in &program.funcs {
        if !seen.insert(func.name.clone()) {
            return Err(CompileError::DuplicateFunction {
                name: func.name.clone(),
                span: func.span,
            });
        }
        functions.push(FuncLowerer::new(func)?.run(func)?);
    }
    Ok(Image { functions })
}

struct LoopCtx {
    /// Jumps to patch to the loop's end.
    breaks: Vec<usize>,
    /// Jumps to patch to the loop's increment step (counted loops only).
    continues: Vec<usize>,
    /// Where `continue` goes when the target is already known (`while`).
    continue_to: Option<u32>,
}

struct FuncLowerer {
    name: String,
    code: Vec<Instr>,
    const_floats: Vec<f64>,
    float_index: HashMap<u64, u16>,
    const_strs: Vec<String>,
    str_index: HashMap<String, u16>,
    params: HashMap<String, u16>,
    param_names: Vec<String>,
    ret_slot: u16,
    next_tmp: u32,
    loops: Vec<LoopCtx>,
    returns: Vec<usize>,
    lines: Vec<LineEntry>,
    last_line: u32,
}

impl FuncLowerer {
    fn new(func: &Func) -> Result<Self, CompileError> {
        let mut params = HashMap::new();
        let mut param_names = Vec::with_capacity(func.params.len());
        for (i, p) in func.params.iter().enumerate() {
            if params.insert(p.name.clone(), i as u16).is_some() {
                return Err(CompileError::DuplicateParam {
                    func: func.name.clone(),
                    name: p.name.clone(),
                    span: p.span,
                });
            }
            param_names.push(p.name.clone());
        }
        let ret_slot = func.params.len() as u16;
        Ok(FuncLowerer {
            name: func.name.clone(),
            code: Vec::new(),
            const_floats: Vec::new(),
            float_index: HashMap::new(),
            const_strs: Vec::new(),
            str_index: HashMap::new(),
            params,
            param_names,
            ret_slot,
            next_tmp: func.params.len() as u32 + 1,
            loops: Vec::new(),
            returns: Vec::new(),
            lines: Vec::new(),
            last_line: 0,
        })
    }

    fn run(mut self, func: &Func) -> Result<Function, CompileError> {
        self.lower_stmts(&func.body)?;

        // Every return jumps here; falling through leaves Int(0) in the
        // return slot, which frames initialize to.
        let end = self.code.len() as u32;
        self.emit(Instr::Nop);
        for at in std::mem::take(&mut self.returns) {
            self.patch(at, end);
        }

        debug!(
            func = %self.name,
            instrs = self.code.len(),
            tmpvars = self.next_tmp,
            "lowered function"
        );

        Ok(Function {
            name: self.name,
            params: self.param_names,
            tmpvar_count: self.next_tmp as u16,
            const_ints: Vec::new(),
            const_floats: self.const_floats,
            const_strs: self.const_strs,
            code: self.code,
            lines: self.lines,
        })
    }

    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    fn emit(&mut self, instr: Instr) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    fn patch(&mut self, at: usize, target: u32) {
        match &mut self.code[at] {
            Instr::Jmp { target: t }
            | Instr::JmpIfTrue { target: t, .. }
            | Instr::JmpIfFalse { target: t, .. } => *t = target,
            other => unreachable!("patching non-jump {other:?}"),
        }
    }

    fn alloc_tmp(&mut self) -> Result<u16, CompileError> {
        // tmpvar_count itself is a u16, so the last usable index is 65534.
        if self.next_tmp >= u16::MAX as u32 {
            return Err(CompileError::TooManyRegisters { func: self.name.clone() });
        }
        let reg = self.next_tmp as u16;
        self.next_tmp += 1;
        Ok(reg)
    }

    fn float_const(&mut self, value: f64) -> Result<u16, CompileError> {
        if let Some(&idx) = self.float_index.get(&value.to_bits()) {
            return Ok(idx);
        }
        if self.const_floats.len() > u16::MAX as usize {
            return Err(CompileError::TooManyConstants { func: self.name.clone() });
        }
        let idx = self.const_floats.len() as u16;
        self.const_floats.push(value);
        self.float_index.insert(value.to_bits(), idx);
        Ok(idx)
    }

    fn str_const(&mut self, value: &str) -> Result<u16, CompileError> {
        if let Some(&idx) = self.str_index.get(value) {
            return Ok(idx);
        }
        if self.const_strs.len() > u16::MAX as usize {
            return Err(CompileError::TooManyConstants { func: self.name.clone() });
        }
        let idx = self.const_strs.len() as u16;
        self.const_strs.push(value.to_string());
        self.str_index.insert(value.to_string(), idx);
        Ok(idx)
    }

    fn note_line(&mut self, span: Span) {
        if span.first_line != self.last_line {
            self.last_line = span.first_line;
            self.lines.push(LineEntry {
                pc: self.code.len() as u32,
                line: span.first_line.min(u16::MAX as u32) as u16,
            });
        }
    }

    /// Store a register into a named variable: a parameter register if the
    /// name is one, the global symbol table otherwise.
    fn store_var(&mut self, name: &str, src: u16) -> Result<(), CompileError> {
        if let Some(&reg) = self.params.get(name) {
            self.emit(Instr::Assign { dst: reg, src });
        } else {
            let id = self.str_const(name)?;
            self.emit(Instr::StoreSymbol { name: id, src });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn lower_stmts(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        let mut i = 0;
        while i < stmts.len() {
            match &stmts[i] {
                Stmt::If { .. } => i = self.lower_if_chain(stmts, i)?,
                Stmt::Elif { span, .. } | Stmt::Else { span, .. } => {
                    return Err(CompileError::DanglingElse { span: *span });
                }
                other => {
                    self.lower_stmt(other)?;
                    i += 1;
                }
            }
        }
        Ok(())
    }

    /// Lower an `if` and any `else if`/`else` statements directly after it
    /// as one conditional. Returns the index past the chain.
    fn lower_if_chain(&mut self, stmts: &[Stmt], mut i: usize) -> Result<usize, CompileError> {
        let Stmt::If { cond, body, span } = &stmts[i] else {
            unreachable!("lower_if_chain starts at an if");
        };
        let mut end_jumps = Vec::new();
        let (mut cond, mut body, mut span) = (cond, body, *span);
        loop {
            self.note_line(span);
            let c = self.lower_expr(cond)?;
            let jf = self.emit(Instr::JmpIfFalse { target: 0, src: c });
            self.lower_stmts(body)?;
            i += 1;
            match stmts.get(i) {
                Some(Stmt::Elif { cond: next_cond, body: next_body, span: next_span }) => {
                    end_jumps.push(self.emit(Instr::Jmp { target: 0 }));
                    let here = self.code.len() as u32;
                    self.patch(jf, here);
                    cond = next_cond;
                    body = next_body;
                    span = *next_span;
                }
                Some(Stmt::Else { body: else_body, span: else_span }) => {
                    end_jumps.push(self.emit(Instr::Jmp { target: 0 }));
                    let here = self.code.len() as u32;
                    self.patch(jf, here);
                    self.note_line(*else_span);
                    self.lower_stmts(else_body)?;
                    i += 1;
                    break;
                }
                _ => {
                    let here = self.code.len() as u32;
                    self.patch(jf, here);
                    break;
                }
            }
        }
        let end = self.code.len() as u32;
        for at in end_jumps {
            self.patch(at, end);
        }
        Ok(i)
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr { expr, span } => {
                self.note_line(*span);
                self.lower_expr(expr)?;
                Ok(())
            }
            Stmt::Assign { target, value, span } => {
                self.note_line(*span);
                self.lower_assign(target, value)
            }
            Stmt::While { cond, body, span } => {
                self.note_line(*span);
                let top = self.code.len() as u32;
                let c = self.lower_expr(cond)?;
                let jf = self.emit(Instr::JmpIfFalse { target: 0, src: c });
                self.loops.push(LoopCtx {
                    breaks: Vec::new(),
                    continues: Vec::new(),
                    continue_to: Some(top),
                });
                self.lower_stmts(body)?;
                self.emit(Instr::Jmp { target: top });
                self.finish_loop(jf, None)
            }
            Stmt::ForRange { var, from, to, body, span } => {
                self.note_line(*span);
                let from_reg = self.lower_expr(from)?;
                let cur = self.alloc_tmp()?;
                self.emit(Instr::Assign { dst: cur, src: from_reg });
                let to_reg = self.lower_expr(to)?;
                let limit = self.alloc_tmp()?;
                self.emit(Instr::Assign { dst: limit, src: to_reg });

                let top = self.code.len() as u32;
                let c = self.alloc_tmp()?;
                self.emit(Instr::Bin { op: BinOp::Lt, dst: c, a: cur, b: limit });
                let jf = self.emit(Instr::JmpIfFalse { target: 0, src: c });
                self.store_var(var, cur)?;
                self.loops.push(LoopCtx {
                    breaks: Vec::new(),
                    continues: Vec::new(),
                    continue_to: None,
                });
                self.lower_stmts(body)?;
                let step = self.code.len() as u32;
                self.emit(Instr::Inc { dst: cur, src: cur });
                self.emit(Instr::Jmp { target: top });
                self.finish_loop(jf, Some(step))
            }
            Stmt::ForV { value, container, body, span } => {
                self.lower_for_each(None, value, container, body, *span)
            }
            Stmt::ForKV { key, value, container, body, span } => {
                self.lower_for_each(Some(key.as_str()), value, container, body, *span)
            }
            Stmt::Return { expr, span } => {
                self.note_line(*span);
                let v = self.lower_expr(expr)?;
                self.emit(Instr::Assign { dst: self.ret_slot, src: v });
                let j = self.emit(Instr::Jmp { target: 0 });
                self.returns.push(j);
                Ok(())
            }
            Stmt::Break { span } => {
                self.note_line(*span);
                let j = self.emit(Instr::Jmp { target: 0 });
                match self.loops.last_mut() {
                    Some(ctx) => {
                        ctx.breaks.push(j);
                        Ok(())
                    }
                    None => Err(CompileError::BreakOutsideLoop { span: *span }),
                }
            }
            Stmt::Continue { span } => {
                self.note_line(*span);
                let Some(continue_to) = self.loops.last().map(|ctx| ctx.continue_to) else {
                    return Err(CompileError::ContinueOutsideLoop { span: *span });
                };
                match continue_to {
                    Some(target) => {
                        self.emit(Instr::Jmp { target });
                    }
                    None => {
                        // Target is the loop's increment step, patched when
                        // the loop closes.
                        let j = self.emit(Instr::Jmp { target: 0 });
                        if let Some(ctx) = self.loops.last_mut() {
                            ctx.continues.push(j);
                        }
                    }
                }
                Ok(())
            }
            Stmt::If { .. } | Stmt::Elif { .. } | Stmt::Else { .. } => {
                unreachable!("conditional chains are lowered by lower_stmts")
            }
        }
    }

    /// `for (v in c)` and `for (k, v in c)` share one desugaring: an index
    /// loop over `len(c)` reading position keys and values. The positional
    /// opcodes treat an array as mapping index → element, which gives the
    /// array form `k` = index, `v` = element.
    fn lower_for_each(
        &mut self,
        key: Option<&str>,
        value: &str,
        container: &Expr,
        body: &[Stmt],
        span: Span,
    ) -> Result<(), CompileError> {
        self.note_line(span);
        let obj = self.lower_expr(container)?;
        let len = self.alloc_tmp()?;
        self.emit(Instr::Len { dst: len, src: obj });
        let idx = self.alloc_tmp()?;
        self.emit(Instr::IConst { dst: idx, value: 0 });

        let top = self.code.len() as u32;
        let c = self.alloc_tmp()?;
        self.emit(Instr::Bin { op: BinOp::Lt, dst: c, a: idx, b: len });
        let jf = self.emit(Instr::JmpIfFalse { target: 0, src: c });

        if let Some(key) = key {
            let k = self.alloc_tmp()?;
            self.emit(Instr::GetDictKeyByIndex { dst: k, dict: obj, idx });
            self.store_var(key, k)?;
        }
        let v = self.alloc_tmp()?;
        self.emit(Instr::GetDictValByIndex { dst: v, dict: obj, idx });
        self.store_var(value, v)?;

        self.loops.push(LoopCtx { breaks: Vec::new(), continues: Vec::new(), continue_to: None });
        self.lower_stmts(body)?;
        let step = self.code.len() as u32;
        self.emit(Instr::Inc { dst: idx, src: idx });
        self.emit(Instr::Jmp { target: top });
        self.finish_loop(jf, Some(step))
    }

    /// Patch the loop-exit jump, pending breaks, and pending continues.
    fn finish_loop(&mut self, jf: usize, step: Option<u32>) -> Result<(), CompileError> {
        let end = self.code.len() as u32;
        self.patch(jf, end);
        let ctx = self.loops.pop().expect("loop context is pushed before finish_loop");
        for at in ctx.breaks {
            self.patch(at, end);
        }
        for at in ctx.continues {
            let target = step.expect("patch-list continues only exist in counted loops");
            self.patch(at, target);
        }
        Ok(())
    }

    fn lower_assign(&mut self, target: &Expr, value: &Expr) -> Result<(), CompileError> {
        match target {
            Expr::Symbol { name, .. } => {
                let v = self.lower_expr(value)?;
                self.store_var(name, v)
            }
            Expr::Subscript { base, index, .. } => {
                let b = self.lower_expr(base)?;
                let ix = self.lower_expr(index)?;
                let v = self.lower_expr(value)?;
                self.emit(Instr::StoreArray { arr: b, idx: ix, src: v });
                Ok(())
            }
            Expr::Dot { base, field, .. } => {
                let b = self.lower_expr(base)?;
                let v = self.lower_expr(value)?;
                let name = self.str_const(field)?;
                self.emit(Instr::StoreDot { obj: b, name, src: v });
                Ok(())
            }
            other => Err(CompileError::InvalidAssignTarget { span: other.span() }),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn lower_expr(&mut self, expr: &Expr) -> Result<u16, CompileError> {
        match expr {
            Expr::Int { value, .. } => {
                let dst = self.alloc_tmp()?;
                self.emit(Instr::IConst { dst, value: *value });
                Ok(dst)
            }
            Expr::Float { value, .. } => {
                let idx = self.float_const(*value)?;
                let dst = self.alloc_tmp()?;
                self.emit(Instr::FConst { dst, idx });
                Ok(dst)
            }
            Expr::Str { value, .. } => {
                let idx = self.str_const(value)?;
                let dst = self.alloc_tmp()?;
                self.emit(Instr::SConst { dst, idx });
                Ok(dst)
            }
            Expr::Symbol { name, .. } => {
                let dst = self.alloc_tmp()?;
                if let Some(&reg) = self.params.get(name) {
                    self.emit(Instr::Assign { dst, src: reg });
                } else {
                    let id = self.str_const(name)?;
                    self.emit(Instr::LoadSymbol { dst, name: id });
                }
                Ok(dst)
            }
            Expr::Bin { op, lhs, rhs, .. } => {
                let a = self.lower_expr(lhs)?;
                let b = self.lower_expr(rhs)?;
                let dst = self.alloc_tmp()?;
                self.emit(Instr::Bin { op: bin_op(*op), dst, a, b });
                Ok(dst)
            }
            Expr::Neg { operand, .. } => match operand.as_ref() {
                // Fold literal negation so `-5` is one ICONST.
                Expr::Int { value, .. } => {
                    let dst = self.alloc_tmp()?;
                    self.emit(Instr::IConst { dst, value: value.wrapping_neg() });
                    Ok(dst)
                }
                Expr::Float { value, .. } => {
                    let idx = self.float_const(-*value)?;
                    let dst = self.alloc_tmp()?;
                    self.emit(Instr::FConst { dst, idx });
                    Ok(dst)
                }
                other => {
                    // 0 - x; the promotion table makes this negate Floats too.
                    let zero = self.alloc_tmp()?;
                    self.emit(Instr::IConst { dst: zero, value: 0 });
                    let x = self.lower_expr(other)?;
                    let dst = self.alloc_tmp()?;
                    self.emit(Instr::Bin { op: BinOp::Sub, dst, a: zero, b: x });
                    Ok(dst)
                }
            },
            Expr::Subscript { base, index, .. } => {
                let b = self.lower_expr(base)?;
                let ix = self.lower_expr(index)?;
                let dst = self.alloc_tmp()?;
                self.emit(Instr::LoadArray { dst, arr: b, idx: ix });
                Ok(dst)
            }
            Expr::Dot { base, field, .. } => {
                let b = self.lower_expr(base)?;
                let name = self.str_const(field)?;
                let dst = self.alloc_tmp()?;
                self.emit(Instr::LoadDot { dst, obj: b, name });
                Ok(dst)
            }
            Expr::Call { callee, args, span } => {
                let c = self.lower_expr(callee)?;
                let arg_regs = self.lower_args(args, *span)?;
                let dst = self.alloc_tmp()?;
                self.emit(Instr::Call { dst, callee: c, args: arg_regs });
                Ok(dst)
            }
            Expr::ThisCall { recv, method, args, span } => {
                let r = self.lower_expr(recv)?;
                let name = self.str_const(method)?;
                let arg_regs = self.lower_args(args, *span)?;
                let dst = self.alloc_tmp()?;
                self.emit(Instr::ThisCall { dst, recv: r, name, args: arg_regs });
                Ok(dst)
            }
            Expr::ArrayLit { items, .. } => {
                let dst = self.alloc_tmp()?;
                self.emit(Instr::AConst { dst });
                for (i, item) in items.iter().enumerate() {
                    let idx = self.alloc_tmp()?;
                    self.emit(Instr::IConst { dst: idx, value: i as i32 });
                    let v = self.lower_expr(item)?;
                    self.emit(Instr::StoreArray { arr: dst, idx, src: v });
                }
                Ok(dst)
            }
            Expr::DictLit { entries, .. } => {
                let dst = self.alloc_tmp()?;
                self.emit(Instr::DConst { dst });
                for (key, value) in entries {
                    let name = self.str_const(key)?;
                    let v = self.lower_expr(value)?;
                    self.emit(Instr::StoreDot { obj: dst, name, src: v });
                }
                Ok(dst)
            }
        }
    }

    fn lower_args(&mut self, args: &[Expr], span: Span) -> Result<Vec<u16>, CompileError> {
        if args.len() > u8::MAX as usize {
            return Err(CompileError::TooManyArgs { func: self.name.clone(), span });
        }
        let mut regs = Vec::with_capacity(args.len());
        for arg in args {
            regs.push(self.lower_expr(arg)?);
        }
        Ok(regs)
    }
}

fn bin_op(op: ast::BinOp) -> BinOp {
    match op {
        ast::BinOp::Or => BinOp::Or,
        ast::BinOp::And => BinOp::And,
        ast::BinOp::Eq => BinOp::Eq,
        ast::BinOp::Neq => BinOp::Neq,
        ast::BinOp::Lt => BinOp::Lt,
        ast::BinOp::Lte => BinOp::Lte,
        ast::BinOp::Gt => BinOp::Gt,
        ast::BinOp::Gte => BinOp::Gte,
        ast::BinOp::Add => BinOp::Add,
        ast::BinOp::Sub => BinOp::Sub,
        ast::BinOp::Mul => BinOp::Mul,
        ast::BinOp::Div => BinOp::Div,
        ast::BinOp::Mod => BinOp::Mod,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn lower_source(source: &str) -> Image {
        lower(&parse(source).unwrap()).unwrap()
    }

    #[test]
    fn arithmetic_expression_shape() {
        let image = lower_source("func main() { return 1 + 2 * 3; }");
        let main = image.find("main").unwrap();
        // ret slot is t0; constants, MUL before ADD, return assign, end NOP.
        assert_eq!(
            main.code,
            vec![
                Instr::IConst { dst: 1, value: 1 },
                Instr::IConst { dst: 2, value: 2 },
                Instr::IConst { dst: 3, value: 3 },
                Instr::Bin { op: BinOp::Mul, dst: 4, a: 2, b: 3 },
                Instr::Bin { op: BinOp::Add, dst: 5, a: 1, b: 4 },
                Instr::Assign { dst: 0, src: 5 },
                Instr::Jmp { target: 7 },
                Instr::Nop,
            ]
        );
        assert_eq!(main.tmpvar_count, 6);
    }

    #[test]
    fn params_resolve_to_registers_and_globals_to_symbols() {
        let image = lower_source("func f(n) { n = n - 1; total = n; }");
        let f = image.find("f").unwrap();
        // `n` reads copy out of t0 (t1 is the return slot, temps follow).
        assert!(f.code.contains(&Instr::Assign { dst: 2, src: 0 }));
        let sym = f.const_strs.iter().position(|s| s == "total").unwrap() as u16;
        assert!(f.code.iter().any(|i| matches!(i, Instr::StoreSymbol { name, .. } if *name == sym)));
    }

    #[test]
    fn every_function_ends_with_nop() {
        let image = lower_source("func a() { 1; } func b(x) { return x; }");
        for func in &image.functions {
            assert_eq!(func.code.last(), Some(&Instr::Nop));
            func.validate().unwrap();
        }
    }

    #[test]
    fn if_chain_has_single_exit() {
        let image = lower_source(
            "func f(x) { if (x == 1) { return 10; } else if (x == 2) { return 20; } else { return 30; } }",
        );
        let f = image.find("f").unwrap();
        f.validate().unwrap();
        // All conditional paths converge before the trailing NOP.
        let nop = (f.code.len() - 1) as u32;
        let jumps: Vec<u32> = f
            .code
            .iter()
            .filter_map(|i| match i {
                Instr::Jmp { target } => Some(*target),
                _ => None,
            })
            .collect();
        assert!(jumps.iter().all(|t| *t <= nop));
    }

    #[test]
    fn while_loop_branches_backward() {
        let image = lower_source("func f(n) { while (n > 0) { n = n - 1; } return n; }");
        let f = image.find("f").unwrap();
        f.validate().unwrap();
        let has_backward = f.code.iter().enumerate().any(|(pc, i)| match i {
            Instr::Jmp { target } => (*target as usize) < pc,
            _ => false,
        });
        assert!(has_backward, "while must loop back: {f}");
    }

    #[test]
    fn for_range_uses_inc() {
        let image = lower_source("func f() { s = 0; for (i in 0..5) { s = s + i; } return s; }");
        let f = image.find("f").unwrap();
        f.validate().unwrap();
        assert!(f.code.iter().any(|i| matches!(i, Instr::Inc { .. })));
        assert!(f.code.iter().any(|i| matches!(i, Instr::Bin { op: BinOp::Lt, .. })));
    }

    #[test]
    fn for_each_reads_positional_pairs() {
        let image = lower_source("func f(d) { for (k, v in d) { k; v; } }");
        let f = image.find("f").unwrap();
        assert!(f.code.iter().any(|i| matches!(i, Instr::GetDictKeyByIndex { .. })));
        assert!(f.code.iter().any(|i| matches!(i, Instr::GetDictValByIndex { .. })));
        assert!(f.code.iter().any(|i| matches!(i, Instr::Len { .. })));
    }

    #[test]
    fn break_and_continue_patch_into_loop() {
        let image = lower_source(
            "func f() { for (i in 0..10) { if (i == 3) { continue; } if (i == 5) { break; } } }",
        );
        image.find("f").unwrap().validate().unwrap();
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let program = parse("func f() { break; }").unwrap();
        assert!(matches!(lower(&program), Err(CompileError::BreakOutsideLoop { .. })));
    }

    #[test]
    fn dangling_else_is_rejected() {
        let program = parse("func f() { else { 1; } }").unwrap();
        assert!(matches!(lower(&program), Err(CompileError::DanglingElse { .. })));
    }

    #[test]
    fn duplicate_param_is_rejected() {
        let program = parse("func f(a, a) { return a; }").unwrap();
        assert!(matches!(lower(&program), Err(CompileError::DuplicateParam { .. })));
    }

    #[test]
    fn duplicate_function_is_rejected() {
        let program = parse("func f() { 1; } func f() { 2; }").unwrap();
        assert!(matches!(lower(&program), Err(CompileError::DuplicateFunction { .. })));
    }

    #[test]
    fn string_constants_are_pooled_once() {
        let image = lower_source(r#"func f() { a = "x"; b = "x"; c = "x"; }"#);
        let f = image.find("f").unwrap();
        assert_eq!(f.const_strs.iter().filter(|s| s.as_str() == "x").count(), 1);
    }

    #[test]
    fn negative_literals_fold() {
        let image = lower_source("func f() { return -7; }");
        let f = image.find("f").unwrap();
        assert!(f.code.contains(&Instr::IConst { dst: 1, value: -7 }));
        assert!(!f.code.iter().any(|i| matches!(i, Instr::Bin { op: BinOp::Sub, .. })));
    }

    #[test]
    fn dict_literal_stores_by_name() {
        let image = lower_source("func f() { return {a: 1, b: 2}; }");
        let f = image.find("f").unwrap();
        let stores = f.code.iter().filter(|i| matches!(i, Instr::StoreDot { .. })).count();
        assert_eq!(stores, 2);
        assert_eq!(f.const_strs, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn line_table_tracks_statements() {
        let image = lower_source("func f() {\n  a = 1;\n  b = 2;\n}");
        let f = image.find("f").unwrap();
        let lines: Vec<u16> = f.lines.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3]);
    }

    #[test]
    fn lowering_is_deterministic() {
        let src = r#"
func helper(a, b) { return a * b + len(a); }
func main() {
    d = {x: 1, y: 2};
    t = 0;
    for (k, v in d) { t = t + v; }
    return helper(t, 3);
}
"#;
        let first = lower(&parse(src).unwrap()).unwrap().to_bytes();
        let second = lower(&parse(src).unwrap()).unwrap().to_bytes();
        assert_eq!(first, second);
    }

    #[test]
    fn compiled_image_round_trips_through_bytes() {
        let image = lower_source(
            "func fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }",
        );
        let back = Image::from_bytes(&image.to_bytes()).unwrap();
        assert_eq!(image, back);
    }
}
