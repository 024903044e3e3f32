//! Compiled function and image model, plus the wire format.
//!
//! An [`Image`] is one compilation unit: an ordered list of named functions,
//! each carrying its own constant pools, code, and line map. Images are
//! immutable once built and can be persisted in a versioned little-endian
//! binary layout:
//!
//! ```text
//! Header:  magic "LNGU" | u16 version | u16 flags | u32 func_count
//! Function:
//!   u16 name_len | name_bytes
//!   u16 param_count | (u16 param_name_len | param_name_bytes)*
//!   u16 tmpvar_count
//!   u32 const_int_count  | i64[]
//!   u32 const_float_count| f64[]
//!   u32 const_str_count  | (u16 len | bytes)[]
//!   u32 code_len         | u8[] instructions
//!   u32 line_map_len     | (u32 pc_start, u16 line)[]
//! ```
//!
//! `code_len` and the line-map `pc_start` are byte positions; in-memory code
//! is a vector of [`Instr`] with absolute instruction indices, and the two
//! views convert losslessly because instruction boundaries are fixed.

use crate::opcode::{BinOp, Instr, Opcode};
use crate::{IMAGE_MAGIC, IMAGE_VERSION};
use std::fmt;

/// One entry of a function's line map: all instructions from `pc` (an
/// instruction index) up to the next entry come from source line `line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub pc: u32,
    pub line: u16,
}

/// A compiled function.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    /// Register file size for each activation of this function.
    pub tmpvar_count: u16,
    pub const_ints: Vec<i64>,
    pub const_floats: Vec<f64>,
    pub const_strs: Vec<String>,
    pub code: Vec<Instr>,
    /// Sorted by `pc`, ascending.
    pub lines: Vec<LineEntry>,
}

/// A compilation unit: an ordered list of compiled functions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    pub functions: Vec<Function>,
}

/// Errors produced while decoding or validating an image.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatError {
    /// The input does not start with the `LNGU` magic.
    BadMagic,
    /// The version field is one this build does not read.
    UnsupportedVersion(u16),
    /// The input ended in the middle of a field.
    UnexpectedEof,
    /// A name or string constant is not valid UTF-8.
    BadUtf8,
    /// An unknown opcode byte inside a function body.
    BadOpcode { func: String, offset: usize, byte: u8 },
    /// A tmpvar operand at or beyond the function's register file size.
    TmpvarOutOfRange { func: String, pc: u32, index: u16 },
    /// A constant-pool operand beyond the pool it indexes.
    ConstOutOfRange { func: String, pc: u32, index: u16 },
    /// A jump whose target lies outside the function's code.
    JumpOutOfRange { func: String, pc: u32 },
    /// A jump landing between instruction boundaries.
    JumpMisaligned { func: String, pc: u32 },
    /// Bytes left over after the declared contents.
    TrailingBytes,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::BadMagic => write!(f, "not a Linguine image (bad magic)"),
            FormatError::UnsupportedVersion(v) => {
                write!(f, "unsupported image version {v} (expected {IMAGE_VERSION})")
            }
            FormatError::UnexpectedEof => write!(f, "truncated image"),
            FormatError::BadUtf8 => write!(f, "invalid UTF-8 in image string"),
            FormatError::BadOpcode { func, offset, byte } => {
                write!(f, "unknown opcode 0x{byte:02x} at byte {offset} in '{func}'")
            }
            FormatError::TmpvarOutOfRange { func, pc, index } => {
                write!(f, "tmpvar t{index} out of range at pc {pc} in '{func}'")
            }
            FormatError::ConstOutOfRange { func, pc, index } => {
                write!(f, "constant #{index} out of range at pc {pc} in '{func}'")
            }
            FormatError::JumpOutOfRange { func, pc } => {
                write!(f, "jump target out of range at pc {pc} in '{func}'")
            }
            FormatError::JumpMisaligned { func, pc } => {
                write!(f, "jump target between instructions at pc {pc} in '{func}'")
            }
            FormatError::TrailingBytes => write!(f, "trailing bytes after image contents"),
        }
    }
}

impl std::error::Error for FormatError {}

impl Function {
    /// Source line for an instruction index, if the line map covers it.
    pub fn line_for_pc(&self, pc: u32) -> Option<u16> {
        match self.lines.binary_search_by(|e| e.pc.cmp(&pc)) {
            Ok(i) => Some(self.lines[i].line),
            Err(0) => None,
            Err(i) => Some(self.lines[i - 1].line),
        }
    }

    /// Byte size of the function's code in the wire encoding.
    pub fn code_byte_len(&self) -> usize {
        self.code.iter().map(Instr::encoded_len).sum()
    }

    /// Check every operand against this function's own bounds.
    ///
    /// Decoded images are validated as part of [`Image::from_bytes`]; the
    /// compiler guarantees these properties by construction and the test
    /// suites assert them through this method.
    pub fn validate(&self) -> Result<(), FormatError> {
        let code_len = self.code.len() as u32;
        let check_tmp = |pc: u32, t: u16| {
            if t >= self.tmpvar_count {
                Err(FormatError::TmpvarOutOfRange { func: self.name.clone(), pc, index: t })
            } else {
                Ok(())
            }
        };
        let check_str = |pc: u32, i: u16| {
            if (i as usize) >= self.const_strs.len() {
                Err(FormatError::ConstOutOfRange { func: self.name.clone(), pc, index: i })
            } else {
                Ok(())
            }
        };
        let check_target = |pc: u32, target: u32| {
            if target >= code_len {
                Err(FormatError::JumpOutOfRange { func: self.name.clone(), pc })
            } else {
                Ok(())
            }
        };
        if (self.params.len() as u32) > self.tmpvar_count as u32 {
            return Err(FormatError::TmpvarOutOfRange {
                func: self.name.clone(),
                pc: 0,
                index: self.params.len() as u16,
            });
        }
        for (i, instr) in self.code.iter().enumerate() {
            let pc = i as u32;
            match instr {
                Instr::Nop | Instr::LineInfo { .. } => {}
                Instr::Assign { dst, src }
                | Instr::Inc { dst, src }
                | Instr::Neg { dst, src }
                | Instr::Len { dst, src } => {
                    check_tmp(pc, *dst)?;
                    check_tmp(pc, *src)?;
                }
                Instr::IConst { dst, .. } => check_tmp(pc, *dst)?,
                Instr::FConst { dst, idx } => {
                    check_tmp(pc, *dst)?;
                    if (*idx as usize) >= self.const_floats.len() {
                        return Err(FormatError::ConstOutOfRange {
                            func: self.name.clone(),
                            pc,
                            index: *idx,
                        });
                    }
                }
                Instr::SConst { dst, idx } => {
                    check_tmp(pc, *dst)?;
                    check_str(pc, *idx)?;
                }
                Instr::AConst { dst } | Instr::DConst { dst } => check_tmp(pc, *dst)?,
                Instr::Bin { dst, a, b, .. } => {
                    check_tmp(pc, *dst)?;
                    check_tmp(pc, *a)?;
                    check_tmp(pc, *b)?;
                }
                Instr::LoadArray { dst, arr, idx } => {
                    check_tmp(pc, *dst)?;
                    check_tmp(pc, *arr)?;
                    check_tmp(pc, *idx)?;
                }
                Instr::StoreArray { arr, idx, src } => {
                    check_tmp(pc, *arr)?;
                    check_tmp(pc, *idx)?;
                    check_tmp(pc, *src)?;
                }
                Instr::GetDictKeyByIndex { dst, dict, idx }
                | Instr::GetDictValByIndex { dst, dict, idx } => {
                    check_tmp(pc, *dst)?;
                    check_tmp(pc, *dict)?;
                    check_tmp(pc, *idx)?;
                }
                Instr::LoadDot { dst, obj, name } => {
                    check_tmp(pc, *dst)?;
                    check_tmp(pc, *obj)?;
                    check_str(pc, *name)?;
                }
                Instr::StoreDot { obj, name, src } => {
                    check_tmp(pc, *obj)?;
                    check_str(pc, *name)?;
                    check_tmp(pc, *src)?;
                }
                Instr::LoadSymbol { dst, name } => {
                    check_tmp(pc, *dst)?;
                    check_str(pc, *name)?;
                }
                Instr::StoreSymbol { name, src } => {
                    check_str(pc, *name)?;
                    check_tmp(pc, *src)?;
                }
                Instr::Call { dst, callee, args } => {
                    check_tmp(pc, *dst)?;
                    check_tmp(pc, *callee)?;
                    for a in args {
                        check_tmp(pc, *a)?;
                    }
                }
                Instr::ThisCall { dst, recv, name, args } => {
                    check_tmp(pc, *dst)?;
                    check_tmp(pc, *recv)?;
                    check_str(pc, *name)?;
                    for a in args {
                        check_tmp(pc, *a)?;
                    }
                }
                Instr::Jmp { target } => check_target(pc, *target)?,
                Instr::JmpIfTrue { target, src } | Instr::JmpIfFalse { target, src } => {
                    check_target(pc, *target)?;
                    check_tmp(pc, *src)?;
                }
            }
        }
        Ok(())
    }
}

impl Image {
    pub fn find(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Serialize to the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&IMAGE_MAGIC);
        put_u16(&mut out, IMAGE_VERSION);
        put_u16(&mut out, 0); // flags
        put_u32(&mut out, self.functions.len() as u32);
        for func in &self.functions {
            encode_function(&mut out, func);
        }
        out
    }

    /// Parse and validate the wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Image, FormatError> {
        let mut r = Reader { buf: bytes, pos: 0 };
        let magic = r.take(4)?;
        if magic != IMAGE_MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version = r.u16()?;
        if version != IMAGE_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let _flags = r.u16()?;
        let func_count = r.u32()?;
        let mut functions = Vec::with_capacity(func_count as usize);
        for _ in 0..func_count {
            let func = decode_function(&mut r)?;
            func.validate()?;
            functions.push(func);
        }
        if r.pos != bytes.len() {
            return Err(FormatError::TrailingBytes);
        }
        Ok(Image { functions })
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func {}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        writeln!(f, ") tmpvars={}", self.tmpvar_count)?;
        for (i, v) in self.const_floats.iter().enumerate() {
            writeln!(f, "  f#{i} = {v}")?;
        }
        for (i, s) in self.const_strs.iter().enumerate() {
            writeln!(f, "  s#{i} = {s:?}")?;
        }
        for (pc, instr) in self.code.iter().enumerate() {
            let line = self.line_for_pc(pc as u32);
            match line {
                Some(l) => writeln!(f, "  {pc:4}: {instr}    ; line {l}")?,
                None => writeln!(f, "  {pc:4}: {instr}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    put_u16(out, s.len() as u16);
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if self.pos + n > self.buf.len() {
            return Err(FormatError::UnexpectedEof);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, FormatError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, FormatError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, FormatError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String, FormatError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::BadUtf8)
    }
}

fn encode_function(out: &mut Vec<u8>, func: &Function) {
    put_str(out, &func.name);
    put_u16(out, func.params.len() as u16);
    for p in &func.params {
        put_str(out, p);
    }
    put_u16(out, func.tmpvar_count);
    put_u32(out, func.const_ints.len() as u32);
    for v in &func.const_ints {
        out.extend_from_slice(&v.to_le_bytes());
    }
    put_u32(out, func.const_floats.len() as u32);
    for v in &func.const_floats {
        out.extend_from_slice(&v.to_le_bytes());
    }
    put_u32(out, func.const_strs.len() as u32);
    for s in &func.const_strs {
        put_str(out, s);
    }

    // Byte offset of every instruction, plus one entry for end-of-code.
    let mut offsets = Vec::with_capacity(func.code.len() + 1);
    let mut at = 0usize;
    for instr in &func.code {
        offsets.push(at);
        at += instr.encoded_len();
    }
    offsets.push(at);

    put_u32(out, at as u32);
    for (i, instr) in func.code.iter().enumerate() {
        let next = offsets[i] + instr.encoded_len();
        let rel = |target: u32| (offsets[target as usize] as i64 - next as i64) as i32;
        out.push(instr.opcode() as u8);
        match instr {
            Instr::Nop => {}
            Instr::Assign { dst, src }
            | Instr::Inc { dst, src }
            | Instr::Neg { dst, src }
            | Instr::Len { dst, src } => {
                put_u16(out, *dst);
                put_u16(out, *src);
            }
            Instr::IConst { dst, value } => {
                put_u16(out, *dst);
                put_i32(out, *value);
            }
            Instr::FConst { dst, idx } | Instr::SConst { dst, idx } => {
                put_u16(out, *dst);
                put_u16(out, *idx);
            }
            Instr::AConst { dst } | Instr::DConst { dst } => put_u16(out, *dst),
            Instr::Bin { dst, a, b, .. } => {
                put_u16(out, *dst);
                put_u16(out, *a);
                put_u16(out, *b);
            }
            Instr::LoadArray { dst, arr, idx } => {
                put_u16(out, *dst);
                put_u16(out, *arr);
                put_u16(out, *idx);
            }
            Instr::StoreArray { arr, idx, src } => {
                put_u16(out, *arr);
                put_u16(out, *idx);
                put_u16(out, *src);
            }
            Instr::GetDictKeyByIndex { dst, dict, idx }
            | Instr::GetDictValByIndex { dst, dict, idx } => {
                put_u16(out, *dst);
                put_u16(out, *dict);
                put_u16(out, *idx);
            }
            Instr::LoadDot { dst, obj, name } => {
                put_u16(out, *dst);
                put_u16(out, *obj);
                put_u16(out, *name);
            }
            Instr::StoreDot { obj, name, src } => {
                put_u16(out, *obj);
                put_u16(out, *name);
                put_u16(out, *src);
            }
            Instr::LoadSymbol { dst, name } => {
                put_u16(out, *dst);
                put_u16(out, *name);
            }
            Instr::StoreSymbol { name, src } => {
                put_u16(out, *name);
                put_u16(out, *src);
            }
            Instr::Call { dst, callee, args } => {
                put_u16(out, *dst);
                put_u16(out, *callee);
                out.push(args.len() as u8);
                for a in args {
                    put_u16(out, *a);
                }
            }
            Instr::ThisCall { dst, recv, name, args } => {
                put_u16(out, *dst);
                put_u16(out, *recv);
                put_u16(out, *name);
                out.push(args.len() as u8);
                for a in args {
                    put_u16(out, *a);
                }
            }
            Instr::Jmp { target } => put_i32(out, rel(*target)),
            Instr::JmpIfTrue { target, src } | Instr::JmpIfFalse { target, src } => {
                put_i32(out, rel(*target));
                put_u16(out, *src);
            }
            Instr::LineInfo { line } => put_u16(out, *line),
        }
    }

    put_u32(out, func.lines.len() as u32);
    for entry in &func.lines {
        put_u32(out, offsets[entry.pc as usize] as u32);
        put_u16(out, entry.line);
    }
}

/// A decoded instruction whose jump target is still a byte offset relative
/// to the next instruction; resolved to an index once all boundaries are
/// known.
enum PendingTarget {
    None,
    Rel(i32),
}

fn decode_function(r: &mut Reader<'_>) -> Result<Function, FormatError> {
    let name = r.string()?;
    let param_count = r.u16()?;
    let mut params = Vec::with_capacity(param_count as usize);
    for _ in 0..param_count {
        params.push(r.string()?);
    }
    let tmpvar_count = r.u16()?;
    let const_int_count = r.u32()?;
    let mut const_ints = Vec::with_capacity(const_int_count as usize);
    for _ in 0..const_int_count {
        const_ints.push(r.i64()?);
    }
    let const_float_count = r.u32()?;
    let mut const_floats = Vec::with_capacity(const_float_count as usize);
    for _ in 0..const_float_count {
        const_floats.push(r.f64()?);
    }
    let const_str_count = r.u32()?;
    let mut const_strs = Vec::with_capacity(const_str_count as usize);
    for _ in 0..const_str_count {
        const_strs.push(r.string()?);
    }

    let code_len = r.u32()? as usize;
    let code_bytes = r.take(code_len)?;
    let (code, offsets) = decode_code(&name, code_bytes)?;

    let line_map_len = r.u32()?;
    let mut lines = Vec::with_capacity(line_map_len as usize);
    for _ in 0..line_map_len {
        let pc_start = r.u32()?;
        let line = r.u16()?;
        let pc = offsets
            .binary_search(&(pc_start as usize))
            .map_err(|_| FormatError::JumpMisaligned { func: name.clone(), pc: pc_start })?;
        lines.push(LineEntry { pc: pc as u32, line });
    }

    Ok(Function { name, params, tmpvar_count, const_ints, const_floats, const_strs, code, lines })
}

/// Decode a code section into instructions with absolute targets.
///
/// Returns the instructions and the byte offset of each boundary (one entry
/// per instruction, plus the end offset).
fn decode_code(func: &str, bytes: &[u8]) -> Result<(Vec<Instr>, Vec<usize>), FormatError> {
    let mut r = Reader { buf: bytes, pos: 0 };
    let mut code = Vec::new();
    let mut offsets = Vec::new();
    let mut pending = Vec::new();

    while r.pos < bytes.len() {
        let offset = r.pos;
        offsets.push(offset);
        let byte = r.u8()?;
        let op = Opcode::try_from(byte)
            .map_err(|b| FormatError::BadOpcode { func: func.to_string(), offset, byte: b })?;
        let mut target = PendingTarget::None;
        let instr = match op {
            Opcode::Nop => Instr::Nop,
            Opcode::Assign => Instr::Assign { dst: r.u16()?, src: r.u16()? },
            Opcode::IConst => Instr::IConst { dst: r.u16()?, value: r.i32()? },
            Opcode::FConst => Instr::FConst { dst: r.u16()?, idx: r.u16()? },
            Opcode::SConst => Instr::SConst { dst: r.u16()?, idx: r.u16()? },
            Opcode::AConst => Instr::AConst { dst: r.u16()? },
            Opcode::DConst => Instr::DConst { dst: r.u16()? },
            Opcode::Inc => Instr::Inc { dst: r.u16()?, src: r.u16()? },
            Opcode::Neg => Instr::Neg { dst: r.u16()?, src: r.u16()? },
            Opcode::Add => bin(BinOp::Add, &mut r)?,
            Opcode::Sub => bin(BinOp::Sub, &mut r)?,
            Opcode::Mul => bin(BinOp::Mul, &mut r)?,
            Opcode::Div => bin(BinOp::Div, &mut r)?,
            Opcode::Mod => bin(BinOp::Mod, &mut r)?,
            Opcode::And => bin(BinOp::And, &mut r)?,
            Opcode::Or => bin(BinOp::Or, &mut r)?,
            Opcode::Xor => bin(BinOp::Xor, &mut r)?,
            Opcode::Lt => bin(BinOp::Lt, &mut r)?,
            Opcode::Lte => bin(BinOp::Lte, &mut r)?,
            Opcode::Gt => bin(BinOp::Gt, &mut r)?,
            Opcode::Gte => bin(BinOp::Gte, &mut r)?,
            Opcode::Eq => bin(BinOp::Eq, &mut r)?,
            Opcode::Neq => bin(BinOp::Neq, &mut r)?,
            Opcode::LoadArray => {
                Instr::LoadArray { dst: r.u16()?, arr: r.u16()?, idx: r.u16()? }
            }
            Opcode::StoreArray => {
                Instr::StoreArray { arr: r.u16()?, idx: r.u16()?, src: r.u16()? }
            }
            Opcode::Len => Instr::Len { dst: r.u16()?, src: r.u16()? },
            Opcode::GetDictKeyByIndex => {
                Instr::GetDictKeyByIndex { dst: r.u16()?, dict: r.u16()?, idx: r.u16()? }
            }
            Opcode::GetDictValByIndex => {
                Instr::GetDictValByIndex { dst: r.u16()?, dict: r.u16()?, idx: r.u16()? }
            }
            Opcode::LoadDot => Instr::LoadDot { dst: r.u16()?, obj: r.u16()?, name: r.u16()? },
            Opcode::StoreDot => Instr::StoreDot { obj: r.u16()?, name: r.u16()?, src: r.u16()? },
            Opcode::LoadSymbol => Instr::LoadSymbol { dst: r.u16()?, name: r.u16()? },
            Opcode::StoreSymbol => Instr::StoreSymbol { name: r.u16()?, src: r.u16()? },
            Opcode::Call => {
                let dst = r.u16()?;
                let callee = r.u16()?;
                let argc = r.u8()?;
                let mut args = Vec::with_capacity(argc as usize);
                for _ in 0..argc {
                    args.push(r.u16()?);
                }
                Instr::Call { dst, callee, args }
            }
            Opcode::ThisCall => {
                let dst = r.u16()?;
                let recv = r.u16()?;
                let name = r.u16()?;
                let argc = r.u8()?;
                let mut args = Vec::with_capacity(argc as usize);
                for _ in 0..argc {
                    args.push(r.u16()?);
                }
                Instr::ThisCall { dst, recv, name, args }
            }
            Opcode::Jmp => {
                target = PendingTarget::Rel(r.i32()?);
                Instr::Jmp { target: 0 }
            }
            Opcode::JmpIfTrue => {
                target = PendingTarget::Rel(r.i32()?);
                Instr::JmpIfTrue { target: 0, src: r.u16()? }
            }
            Opcode::JmpIfFalse => {
                target = PendingTarget::Rel(r.i32()?);
                Instr::JmpIfFalse { target: 0, src: r.u16()? }
            }
            Opcode::LineInfo => Instr::LineInfo { line: r.u16()? },
        };
        if let PendingTarget::Rel(rel) = target {
            pending.push((code.len(), offset as u32, r.pos as i64 + rel as i64));
        }
        code.push(instr);
    }
    offsets.push(bytes.len());

    // Resolve relative byte targets to absolute instruction indices. A
    // target must land on an instruction boundary strictly inside the code.
    for (i, pc_bytes, abs_byte) in pending {
        if abs_byte < 0 || abs_byte >= bytes.len() as i64 {
            return Err(FormatError::JumpOutOfRange { func: func.to_string(), pc: pc_bytes });
        }
        let index = offsets
            .binary_search(&(abs_byte as usize))
            .map_err(|_| FormatError::JumpMisaligned { func: func.to_string(), pc: pc_bytes })?;
        match &mut code[i] {
            Instr::Jmp { target }
            | Instr::JmpIfTrue { target, .. }
            | Instr::JmpIfFalse { target, .. } => *target = index as u32,
            _ => unreachable!("only jumps carry pending targets"),
        }
    }

    Ok((code, offsets))
}

fn bin(op: BinOp, r: &mut Reader<'_>) -> Result<Instr, FormatError> {
    Ok(Instr::Bin { op, dst: r.u16()?, a: r.u16()?, b: r.u16()? })
}
