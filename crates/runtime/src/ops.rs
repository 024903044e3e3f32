//! Operator semantics over [`Value`]s.
//!
//! The promotion table for `+ - * / %`:
//!
//! - Int ⊕ Int → Int, wrapping two's-complement
//! - Int ⊕ Float (either side) → Float
//! - Float ⊕ Float → Float
//! - `+` concatenates two strings; string + number stringifies the number
//! - Int `/` or `%` by zero fails; Float follows IEEE-754
//!
//! Comparisons yield `Int(0)` or `Int(1)`. Equality is structural for
//! primitives (with Int/Float cross-comparing numerically) and identity
//! for arrays, dictionaries, and functions. `AND`/`OR`/`XOR` are integer
//! bitwise operators.

use crate::error::Error;
use crate::heap::{Heap, HeapObject};
use crate::value::{Handle, Value};
use linguine_core::BinOp;

pub fn binary(heap: &mut Heap, op: BinOp, a: Value, b: Value) -> Result<Value, Error> {
    use BinOp::*;
    match op {
        Add => add(heap, a, b),
        Sub => arith(op, a, b, |x, y| x.wrapping_sub(y), |x, y| x - y),
        Mul => arith(op, a, b, |x, y| x.wrapping_mul(y), |x, y| x * y),
        Div => match (a, b) {
            (Value::Int(_), Value::Int(0)) => Err(Error::DivideByZero),
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_div(y))),
            _ => arith(op, a, b, |_, _| 0, |x, y| x / y),
        },
        Mod => match (a, b) {
            (Value::Int(_), Value::Int(0)) => Err(Error::DivideByZero),
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_rem(y))),
            _ => arith(op, a, b, |_, _| 0, |x, y| x % y),
        },
        And | Or | Xor => match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(match op {
                And => x & y,
                Or => x | y,
                _ => x ^ y,
            })),
            _ => Err(type_error(op, a, b)),
        },
        Lt | Lte | Gt | Gte => relational(heap, op, a, b),
        Eq => Ok(bool_value(semantic_eq(heap, a, b))),
        Neq => Ok(bool_value(!semantic_eq(heap, a, b))),
    }
}

fn bool_value(b: bool) -> Value {
    Value::Int(if b { 1 } else { 0 })
}

fn type_error(op: BinOp, a: Value, b: Value) -> Error {
    Error::Type(format!("'{}' is not defined on {} and {}", op.mnemonic(), a.kind(), b.kind()))
}

/// Numeric-only operator with the standard promotion.
fn arith(
    op: BinOp,
    a: Value,
    b: Value,
    int_op: impl Fn(i32, i32) -> i32,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value, Error> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(int_op(x, y))),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(float_op(x as f64, y))),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(float_op(x, y as f64))),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(float_op(x, y))),
        _ => Err(type_error(op, a, b)),
    }
}

fn add(heap: &mut Heap, a: Value, b: Value) -> Result<Value, Error> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => {
            let joined = format!("{}{}", heap.str_at(x), heap.str_at(y));
            Ok(heap.alloc_str(joined))
        }
        (Value::Str(x), Value::Int(_) | Value::Float(_)) => {
            let joined = format!("{}{}", heap.str_at(x), display(heap, b));
            Ok(heap.alloc_str(joined))
        }
        (Value::Int(_) | Value::Float(_), Value::Str(y)) => {
            let joined = format!("{}{}", display(heap, a), heap.str_at(y));
            Ok(heap.alloc_str(joined))
        }
        _ => arith(BinOp::Add, a, b, |x, y| x.wrapping_add(y), |x, y| x + y),
    }
}

fn relational(heap: &Heap, op: BinOp, a: Value, b: Value) -> Result<Value, Error> {
    let ordering = |lt: bool, lte: bool| match op {
        BinOp::Lt => lt,
        BinOp::Lte => lte,
        BinOp::Gt => !lte,
        _ => !lt, // Gte
    };
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(bool_value(ordering(x < y, x <= y))),
        (Value::Str(x), Value::Str(y)) => {
            let (x, y) = (heap.str_at(x), heap.str_at(y));
            Ok(bool_value(ordering(x < y, x <= y)))
        }
        _ => {
            let (x, y) = (as_f64(a), as_f64(b));
            match (x, y) {
                (Some(x), Some(y)) => Ok(bool_value(ordering(x < y, x <= y))),
                _ => Err(type_error(op, a, b)),
            }
        }
    }
}

fn as_f64(v: Value) -> Option<f64> {
    match v {
        Value::Int(x) => Some(x as f64),
        Value::Float(x) => Some(x),
        _ => None,
    }
}

/// Language equality. Structural for Int/Float/Str (Int/Float cross-compare
/// numerically), identity for containers and functions, `false` across
/// differing kinds otherwise.
pub fn semantic_eq(heap: &Heap, a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) => (x as f64) == y,
        (Value::Float(x), Value::Int(y)) => x == (y as f64),
        (Value::Str(x), Value::Str(y)) => x == y || heap.str_at(x) == heap.str_at(y),
        (Value::Array(x), Value::Array(y)) => x == y,
        (Value::Dict(x), Value::Dict(y)) => x == y,
        (Value::Func(x), Value::Func(y)) => x == y,
        _ => false,
    }
}

/// Default decimal rendering of a value.
///
/// Top-level strings render bare; strings inside containers are quoted.
/// Cyclic containers print an ellipsis where they close over themselves.
pub fn display(heap: &Heap, value: Value) -> String {
    let mut out = String::new();
    let mut visiting = Vec::new();
    fmt_value(heap, value, false, &mut visiting, &mut out);
    out
}

fn fmt_value(heap: &Heap, value: Value, nested: bool, visiting: &mut Vec<Handle>, out: &mut String) {
    match value {
        Value::Int(v) => out.push_str(&v.to_string()),
        Value::Float(v) => out.push_str(&v.to_string()),
        Value::Str(h) => {
            if nested {
                out.push('"');
                out.push_str(heap.str_at(h));
                out.push('"');
            } else {
                out.push_str(heap.str_at(h));
            }
        }
        Value::Func(id) => {
            out.push_str(&format!("<function {id}>"));
        }
        Value::Array(h) => {
            if visiting.contains(&h) {
                out.push_str("[...]");
                return;
            }
            visiting.push(h);
            out.push('[');
            if let HeapObject::Array(items) = heap.get(h) {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    fmt_value(heap, *item, true, visiting, out);
                }
            }
            out.push(']');
            visiting.pop();
        }
        Value::Dict(h) => {
            if visiting.contains(&h) {
                out.push_str("{...}");
                return;
            }
            visiting.push(h);
            out.push('{');
            if let HeapObject::Dict(dict) = heap.get(h) {
                for (i, (key, val)) in dict.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(key);
                    out.push_str(": ");
                    fmt_value(heap, val, true, visiting, out);
                }
            }
            out.push('}');
            visiting.pop();
        }
    }
}
