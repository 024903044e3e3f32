//! Deep-copy exchange form for host code.
//!
//! [`TypedValue`] mirrors [`Value`] with the handles resolved: strings and
//! containers are copied out of the pool into plain Rust data, so the host
//! can hold, serialize, or ship them without keeping the runtime alive.
//! Functions export by name and resolve back through the global symbol
//! table.

use crate::error::Error;
use crate::heap::HeapObject;
use crate::runtime::Runtime;
use crate::value::{Handle, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    Int(i32),
    Float(f64),
    Str(String),
    Array(Vec<TypedValue>),
    /// Entries in insertion order.
    Dict(Vec<(String, TypedValue)>),
    /// A callable, by its global name.
    Func(String),
}

pub(crate) fn to_typed(rt: &Runtime, value: Value) -> Result<TypedValue, Error> {
    let mut visiting = Vec::new();
    convert_out(rt, value, &mut visiting)
}

fn convert_out(rt: &Runtime, value: Value, visiting: &mut Vec<Handle>) -> Result<TypedValue, Error> {
    match value {
        Value::Int(v) => Ok(TypedValue::Int(v)),
        Value::Float(v) => Ok(TypedValue::Float(v)),
        Value::Str(h) => Ok(TypedValue::Str(rt.heap.str_at(h).to_string())),
        Value::Func(id) => match rt.func_name(id) {
            Some(name) => Ok(TypedValue::Func(name.to_string())),
            None => Err(Error::Type("function value has no name".to_string())),
        },
        Value::Array(h) => {
            if visiting.contains(&h) {
                return Err(Error::Type("cyclic value cannot be exported".to_string()));
            }
            visiting.push(h);
            let items = match rt.heap.get(h) {
                HeapObject::Array(items) => items.clone(),
                _ => Vec::new(),
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(convert_out(rt, item, visiting)?);
            }
            visiting.pop();
            Ok(TypedValue::Array(out))
        }
        Value::Dict(h) => {
            if visiting.contains(&h) {
                return Err(Error::Type("cyclic value cannot be exported".to_string()));
            }
            visiting.push(h);
            let entries: Vec<(String, Value)> = match rt.heap.get(h) {
                HeapObject::Dict(dict) => {
                    dict.iter().map(|(k, v)| (k.to_string(), v)).collect()
                }
                _ => Vec::new(),
            };
            let mut out = Vec::with_capacity(entries.len());
            for (key, val) in entries {
                out.push((key, convert_out(rt, val, visiting)?));
            }
            visiting.pop();
            Ok(TypedValue::Dict(out))
        }
    }
}

pub(crate) fn from_typed(rt: &mut Runtime, typed: &TypedValue) -> Result<Value, Error> {
    match typed {
        TypedValue::Int(v) => Ok(Value::Int(*v)),
        TypedValue::Float(v) => Ok(Value::Float(*v)),
        TypedValue::Str(s) => Ok(rt.heap.alloc_str(s.as_str())),
        TypedValue::Func(name) => match rt.global(name) {
            Some(v @ Value::Func(_)) => Ok(v),
            _ => Err(Error::Name(name.clone())),
        },
        TypedValue::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(from_typed(rt, item)?);
            }
            Ok(rt.heap.alloc_array_from(values))
        }
        TypedValue::Dict(entries) => {
            let value = rt.heap.alloc_dict();
            let handle = value.handle().expect("fresh dict handle");
            for (key, item) in entries {
                let converted = from_typed(rt, item)?;
                if let HeapObject::Dict(dict) = rt.heap.get_mut(handle) {
                    dict.set(key, converted);
                }
            }
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_data() {
        let mut rt = Runtime::new();
        let typed = TypedValue::Dict(vec![
            ("hp".to_string(), TypedValue::Int(100)),
            ("pos".to_string(), TypedValue::Array(vec![TypedValue::Float(1.5), TypedValue::Float(-2.0)])),
            ("name".to_string(), TypedValue::Str("slime".to_string())),
        ]);
        let value = rt.from_typed(&typed).unwrap();
        let back = rt.to_typed(value).unwrap();
        assert_eq!(back, typed);
    }

    #[test]
    fn exports_function_by_name() {
        let mut rt = Runtime::new();
        rt.load_source("t.lin", "func hero() { return 1; }").unwrap();
        let v = rt.global("hero").unwrap();
        assert_eq!(rt.to_typed(v).unwrap(), TypedValue::Func("hero".to_string()));
        let back = rt.from_typed(&TypedValue::Func("hero".to_string())).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn unknown_function_fails_to_import() {
        let mut rt = Runtime::new();
        assert!(matches!(
            rt.from_typed(&TypedValue::Func("missing".to_string())),
            Err(Error::Name(_))
        ));
    }

    #[test]
    fn cycles_are_rejected_not_looped() {
        let mut rt = Runtime::new();
        rt.load_source("t.lin", "func make() { a = []; a[0] = a; return a; }").unwrap();
        let v = rt.call("make", &[]).unwrap();
        assert!(matches!(rt.to_typed(v), Err(Error::Type(_))));
    }

    #[test]
    fn serializes_to_json() {
        let typed = TypedValue::Array(vec![TypedValue::Int(1), TypedValue::Str("x".to_string())]);
        let json = serde_json::to_string(&typed).unwrap();
        let back: TypedValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, typed);
    }
}
