//! Opcode set and the typed instruction form.
//!
//! Every opcode is one byte on the wire, followed by a fixed operand layout
//! (tmpvar and constant indices are u16, `ICONST` immediates are i32, jump
//! offsets are i32 relative to the next instruction). In memory the same
//! instruction is an [`Instr`] variant with absolute jump targets, which is
//! what the interpreter dispatches on.

use std::fmt;

/// One-byte operation codes of the Linguine VM.
///
/// The numeric values are the wire encoding and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Assign = 0x01,
    IConst = 0x02,
    FConst = 0x03,
    SConst = 0x04,
    AConst = 0x05,
    DConst = 0x06,
    Inc = 0x07,
    Neg = 0x08,
    Add = 0x09,
    Sub = 0x0a,
    Mul = 0x0b,
    Div = 0x0c,
    Mod = 0x0d,
    And = 0x0e,
    Or = 0x0f,
    Xor = 0x10,
    Lt = 0x11,
    Lte = 0x12,
    Gt = 0x13,
    Gte = 0x14,
    Eq = 0x15,
    Neq = 0x16,
    LoadArray = 0x17,
    StoreArray = 0x18,
    Len = 0x19,
    GetDictKeyByIndex = 0x1a,
    GetDictValByIndex = 0x1b,
    LoadDot = 0x1c,
    StoreDot = 0x1d,
    LoadSymbol = 0x1e,
    StoreSymbol = 0x1f,
    Call = 0x20,
    ThisCall = 0x21,
    Jmp = 0x22,
    JmpIfTrue = 0x23,
    JmpIfFalse = 0x24,
    LineInfo = 0x25,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(b: u8) -> Result<Self, u8> {
        use Opcode::*;
        Ok(match b {
            0x00 => Nop,
            0x01 => Assign,
            0x02 => IConst,
            0x03 => FConst,
            0x04 => SConst,
            0x05 => AConst,
            0x06 => DConst,
            0x07 => Inc,
            0x08 => Neg,
            0x09 => Add,
            0x0a => Sub,
            0x0b => Mul,
            0x0c => Div,
            0x0d => Mod,
            0x0e => And,
            0x0f => Or,
            0x10 => Xor,
            0x11 => Lt,
            0x12 => Lte,
            0x13 => Gt,
            0x14 => Gte,
            0x15 => Eq,
            0x16 => Neq,
            0x17 => LoadArray,
            0x18 => StoreArray,
            0x19 => Len,
            0x1a => GetDictKeyByIndex,
            0x1b => GetDictValByIndex,
            0x1c => LoadDot,
            0x1d => StoreDot,
            0x1e => LoadSymbol,
            0x1f => StoreSymbol,
            0x20 => Call,
            0x21 => ThisCall,
            0x22 => Jmp,
            0x23 => JmpIfTrue,
            0x24 => JmpIfFalse,
            0x25 => LineInfo,
            other => return Err(other),
        })
    }
}

/// Three-operand operators sharing the `dst, a, b` layout.
///
/// Arithmetic follows the promotion table (Int ⊕ Int stays Int and wraps,
/// anything touching Float becomes Float). Comparisons always produce
/// `Int(0)` or `Int(1)`. `And`/`Or`/`Xor` are integer bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
}

impl BinOp {
    pub fn opcode(self) -> Opcode {
        match self {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mul,
            BinOp::Div => Opcode::Div,
            BinOp::Mod => Opcode::Mod,
            BinOp::And => Opcode::And,
            BinOp::Or => Opcode::Or,
            BinOp::Xor => Opcode::Xor,
            BinOp::Lt => Opcode::Lt,
            BinOp::Lte => Opcode::Lte,
            BinOp::Gt => Opcode::Gt,
            BinOp::Gte => Opcode::Gte,
            BinOp::Eq => Opcode::Eq,
            BinOp::Neq => Opcode::Neq,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "ADD",
            BinOp::Sub => "SUB",
            BinOp::Mul => "MUL",
            BinOp::Div => "DIV",
            BinOp::Mod => "MOD",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Xor => "XOR",
            BinOp::Lt => "LT",
            BinOp::Lte => "LTE",
            BinOp::Gt => "GT",
            BinOp::Gte => "GTE",
            BinOp::Eq => "EQ",
            BinOp::Neq => "NEQ",
        }
    }
}

/// A decoded instruction.
///
/// `dst`, `src`, and friends are tmpvar indices into the frame's register
/// file. `name` and `idx` operands index the function's string constant
/// pool. Jump `target`s are absolute instruction indices; the wire form
/// stores them as byte offsets relative to the next instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Nop,
    /// dst = src
    Assign { dst: u16, src: u16 },
    /// dst = immediate 32-bit integer
    IConst { dst: u16, value: i32 },
    /// dst = float constant pool entry
    FConst { dst: u16, idx: u16 },
    /// dst = fresh string from the string constant pool
    SConst { dst: u16, idx: u16 },
    /// dst = fresh empty array
    AConst { dst: u16 },
    /// dst = fresh empty dictionary
    DConst { dst: u16 },
    /// dst = src + 1
    Inc { dst: u16, src: u16 },
    /// dst = bitwise complement (Int) or arithmetic negation (Float) of src
    Neg { dst: u16, src: u16 },
    /// dst = a <op> b
    Bin { op: BinOp, dst: u16, a: u16, b: u16 },
    /// dst = container[idx]
    LoadArray { dst: u16, arr: u16, idx: u16 },
    /// container[idx] = src
    StoreArray { arr: u16, idx: u16, src: u16 },
    /// dst = element count of src
    Len { dst: u16, src: u16 },
    /// dst = key at position idx
    GetDictKeyByIndex { dst: u16, dict: u16, idx: u16 },
    /// dst = value at position idx
    GetDictValByIndex { dst: u16, dict: u16, idx: u16 },
    /// dst = obj.<name>
    LoadDot { dst: u16, obj: u16, name: u16 },
    /// obj.<name> = src
    StoreDot { obj: u16, name: u16, src: u16 },
    /// dst = global symbol <name>
    LoadSymbol { dst: u16, name: u16 },
    /// global symbol <name> = src
    StoreSymbol { name: u16, src: u16 },
    /// dst = callee(args...)
    Call { dst: u16, callee: u16, args: Vec<u16> },
    /// dst = recv.<name>(recv, args...)
    ThisCall { dst: u16, recv: u16, name: u16, args: Vec<u16> },
    Jmp { target: u32 },
    /// Taken iff src holds exactly Int(1).
    JmpIfTrue { target: u32, src: u16 },
    /// Taken iff src holds anything other than Int(1).
    JmpIfFalse { target: u32, src: u16 },
    /// Source line marker; a no-op that updates the current line.
    LineInfo { line: u16 },
}

impl Instr {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instr::Nop => Opcode::Nop,
            Instr::Assign { .. } => Opcode::Assign,
            Instr::IConst { .. } => Opcode::IConst,
            Instr::FConst { .. } => Opcode::FConst,
            Instr::SConst { .. } => Opcode::SConst,
            Instr::AConst { .. } => Opcode::AConst,
            Instr::DConst { .. } => Opcode::DConst,
            Instr::Inc { .. } => Opcode::Inc,
            Instr::Neg { .. } => Opcode::Neg,
            Instr::Bin { op, .. } => op.opcode(),
            Instr::LoadArray { .. } => Opcode::LoadArray,
            Instr::StoreArray { .. } => Opcode::StoreArray,
            Instr::Len { .. } => Opcode::Len,
            Instr::GetDictKeyByIndex { .. } => Opcode::GetDictKeyByIndex,
            Instr::GetDictValByIndex { .. } => Opcode::GetDictValByIndex,
            Instr::LoadDot { .. } => Opcode::LoadDot,
            Instr::StoreDot { .. } => Opcode::StoreDot,
            Instr::LoadSymbol { .. } => Opcode::LoadSymbol,
            Instr::StoreSymbol { .. } => Opcode::StoreSymbol,
            Instr::Call { .. } => Opcode::Call,
            Instr::ThisCall { .. } => Opcode::ThisCall,
            Instr::Jmp { .. } => Opcode::Jmp,
            Instr::JmpIfTrue { .. } => Opcode::JmpIfTrue,
            Instr::JmpIfFalse { .. } => Opcode::JmpIfFalse,
            Instr::LineInfo { .. } => Opcode::LineInfo,
        }
    }

    /// Size of this instruction in the wire encoding, in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Instr::Nop => 1,
            Instr::Assign { .. } | Instr::Inc { .. } | Instr::Neg { .. } => 5,
            Instr::IConst { .. } => 7,
            Instr::FConst { .. } | Instr::SConst { .. } => 5,
            Instr::AConst { .. } | Instr::DConst { .. } => 3,
            Instr::Bin { .. } => 7,
            Instr::LoadArray { .. } | Instr::StoreArray { .. } => 7,
            Instr::Len { .. } => 5,
            Instr::GetDictKeyByIndex { .. } | Instr::GetDictValByIndex { .. } => 7,
            Instr::LoadDot { .. } | Instr::StoreDot { .. } => 7,
            Instr::LoadSymbol { .. } | Instr::StoreSymbol { .. } => 5,
            Instr::Call { args, .. } => 1 + 2 + 2 + 1 + 2 * args.len(),
            Instr::ThisCall { args, .. } => 1 + 2 + 2 + 2 + 1 + 2 * args.len(),
            Instr::Jmp { .. } => 5,
            Instr::JmpIfTrue { .. } | Instr::JmpIfFalse { .. } => 7,
            Instr::LineInfo { .. } => 3,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Nop => write!(f, "NOP"),
            Instr::Assign { dst, src } => write!(f, "ASSIGN t{dst}, t{src}"),
            Instr::IConst { dst, value } => write!(f, "ICONST t{dst}, {value}"),
            Instr::FConst { dst, idx } => write!(f, "FCONST t{dst}, f#{idx}"),
            Instr::SConst { dst, idx } => write!(f, "SCONST t{dst}, s#{idx}"),
            Instr::AConst { dst } => write!(f, "ACONST t{dst}"),
            Instr::DConst { dst } => write!(f, "DCONST t{dst}"),
            Instr::Inc { dst, src } => write!(f, "INC t{dst}, t{src}"),
            Instr::Neg { dst, src } => write!(f, "NEG t{dst}, t{src}"),
            Instr::Bin { op, dst, a, b } => {
                write!(f, "{} t{dst}, t{a}, t{b}", op.mnemonic())
            }
            Instr::LoadArray { dst, arr, idx } => {
                write!(f, "LOADARRAY t{dst}, t{arr}, t{idx}")
            }
            Instr::StoreArray { arr, idx, src } => {
                write!(f, "STOREARRAY t{arr}, t{idx}, t{src}")
            }
            Instr::Len { dst, src } => write!(f, "LEN t{dst}, t{src}"),
            Instr::GetDictKeyByIndex { dst, dict, idx } => {
                write!(f, "GETDICTKEYBYINDEX t{dst}, t{dict}, t{idx}")
            }
            Instr::GetDictValByIndex { dst, dict, idx } => {
                write!(f, "GETDICTVALBYINDEX t{dst}, t{dict}, t{idx}")
            }
            Instr::LoadDot { dst, obj, name } => {
                write!(f, "LOADDOT t{dst}, t{obj}, s#{name}")
            }
            Instr::StoreDot { obj, name, src } => {
                write!(f, "STOREDOT t{obj}, s#{name}, t{src}")
            }
            Instr::LoadSymbol { dst, name } => write!(f, "LOADSYMBOL t{dst}, s#{name}"),
            Instr::StoreSymbol { name, src } => write!(f, "STORESYMBOL s#{name}, t{src}"),
            Instr::Call { dst, callee, args } => {
                write!(f, "CALL t{dst}, t{callee}")?;
                for a in args {
                    write!(f, ", t{a}")?;
                }
                Ok(())
            }
            Instr::ThisCall { dst, recv, name, args } => {
                write!(f, "THISCALL t{dst}, t{recv}, s#{name}")?;
                for a in args {
                    write!(f, ", t{a}")?;
                }
                Ok(())
            }
            Instr::Jmp { target } => write!(f, "JMP @{target}"),
            Instr::JmpIfTrue { target, src } => write!(f, "JMPIFTRUE @{target}, t{src}"),
            Instr::JmpIfFalse { target, src } => write!(f, "JMPIFFALSE @{target}, t{src}"),
            Instr::LineInfo { line } => write!(f, "LINEINFO {line}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for b in 0u8..=0x25 {
            let op = Opcode::try_from(b).expect("every byte in range is a valid opcode");
            assert_eq!(op as u8, b);
        }
        assert!(Opcode::try_from(0x26).is_err());
        assert!(Opcode::try_from(0xff).is_err());
    }

    #[test]
    fn binop_opcodes_are_distinct() {
        let ops = [
            BinOp::Add,
            BinOp::Sub,
            BinOp::Mul,
            BinOp::Div,
            BinOp::Mod,
            BinOp::And,
            BinOp::Or,
            BinOp::Xor,
            BinOp::Lt,
            BinOp::Lte,
            BinOp::Gt,
            BinOp::Gte,
            BinOp::Eq,
            BinOp::Neq,
        ];
        let mut seen = std::collections::HashSet::new();
        for op in ops {
            assert!(seen.insert(op.opcode() as u8), "{:?} reuses an opcode", op);
        }
    }

    #[test]
    fn encoded_len_counts_call_args() {
        let call = Instr::Call { dst: 0, callee: 1, args: vec![2, 3, 4] };
        assert_eq!(call.encoded_len(), 1 + 2 + 2 + 1 + 6);
        let this_call = Instr::ThisCall { dst: 0, recv: 1, name: 0, args: vec![] };
        assert_eq!(this_call.encoded_len(), 8);
    }

    #[test]
    fn display_is_stable() {
        assert_eq!(
            Instr::Bin { op: BinOp::Add, dst: 2, a: 0, b: 1 }.to_string(),
            "ADD t2, t0, t1"
        );
        assert_eq!(
            Instr::Call { dst: 5, callee: 1, args: vec![2, 3] }.to_string(),
            "CALL t5, t1, t2, t3"
        );
        assert_eq!(Instr::Jmp { target: 9 }.to_string(), "JMP @9");
    }
}
