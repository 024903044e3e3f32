//! Built-in functions.
//!
//! Installed into the global symbol table when a runtime is created, so a
//! script cannot tell them from its own functions or from host-registered
//! ones. All of them accept a `->` receiver as their first argument, which
//! is how `arr->push(3)` works.
//!
//! | name     | effect |
//! |----------|--------|
//! | `len`    | element count (chars for strings) |
//! | `push`   | append to an array, returns the array |
//! | `pop`    | remove and return the last element |
//! | `remove` | remove by index (array) or key (dict), returns the removed value |
//! | `keys`   | dict keys as a new array, insertion order |
//! | `values` | dict values as a new array, insertion order |
//! | `int`    | convert to Int |
//! | `float`  | convert to Float |
//! | `str`    | default decimal rendering |
//! | `print`  | write the rendering and a newline to stdout |

use crate::error::Error;
use crate::heap::HeapObject;
use crate::host::arg_list;
use crate::ops;
use crate::runtime::Runtime;
use crate::value::Value;

pub(crate) fn install(rt: &mut Runtime) {
    let bind = |rt: &mut Runtime,
                name: &str,
                f: fn(&mut Runtime, &[Value]) -> Result<Value, Error>| {
        rt.register_func(name, move |rt, this, args| f(rt, &arg_list(this, args)))
            .expect("intrinsic names are valid");
    };
    bind(rt, "len", len);
    bind(rt, "push", push);
    bind(rt, "pop", pop);
    bind(rt, "remove", remove);
    bind(rt, "keys", keys);
    bind(rt, "values", values);
    bind(rt, "int", to_int);
    bind(rt, "float", to_float);
    bind(rt, "str", to_str);
    bind(rt, "print", print);
}

fn arity<'a>(name: &str, args: &'a [Value], n: usize) -> Result<&'a [Value], Error> {
    if args.len() == n {
        Ok(args)
    } else {
        Err(Error::Type(format!("'{name}' takes {n} argument(s), got {}", args.len())))
    }
}

fn len(rt: &mut Runtime, args: &[Value]) -> Result<Value, Error> {
    let args = arity("len", args, 1)?;
    rt.value_len(args[0]).map(Value::Int)
}

fn push(rt: &mut Runtime, args: &[Value]) -> Result<Value, Error> {
    let args = arity("push", args, 2)?;
    match args[0] {
        Value::Array(h) => {
            let HeapObject::Array(items) = rt.heap.get_mut(h) else {
                return Err(Error::Type("corrupt array handle".to_string()));
            };
            items.push(args[1]);
            Ok(args[0])
        }
        other => Err(Error::Type(format!("'push' needs an array, got {}", other.kind()))),
    }
}

fn pop(rt: &mut Runtime, args: &[Value]) -> Result<Value, Error> {
    let args = arity("pop", args, 1)?;
    match args[0] {
        Value::Array(h) => {
            let HeapObject::Array(items) = rt.heap.get_mut(h) else {
                return Err(Error::Type("corrupt array handle".to_string()));
            };
            items.pop().ok_or_else(|| Error::Index("pop from empty array".to_string()))
        }
        other => Err(Error::Type(format!("'pop' needs an array, got {}", other.kind()))),
    }
}

fn remove(rt: &mut Runtime, args: &[Value]) -> Result<Value, Error> {
    let args = arity("remove", args, 2)?;
    match (args[0], args[1]) {
        (Value::Array(h), Value::Int(i)) => {
            let HeapObject::Array(items) = rt.heap.get_mut(h) else {
                return Err(Error::Type("corrupt array handle".to_string()));
            };
            if i >= 0 && (i as usize) < items.len() {
                Ok(items.remove(i as usize))
            } else {
                Err(Error::Index(format!("remove index {i} out of range (len {})", items.len())))
            }
        }
        (Value::Dict(h), Value::Str(k)) => {
            let key = rt.heap.str_at(k).to_string();
            let HeapObject::Dict(dict) = rt.heap.get_mut(h) else {
                return Err(Error::Type("corrupt dict handle".to_string()));
            };
            dict.remove(&key).ok_or_else(|| Error::Index(format!("no key '{key}'")))
        }
        (c, k) => Err(Error::Type(format!(
            "'remove' takes (array, int) or (dict, string), got ({}, {})",
            c.kind(),
            k.kind()
        ))),
    }
}

fn keys(rt: &mut Runtime, args: &[Value]) -> Result<Value, Error> {
    let args = arity("keys", args, 1)?;
    match args[0] {
        Value::Dict(h) => {
            let names: Vec<String> = match rt.heap.get(h) {
                HeapObject::Dict(dict) => dict.iter().map(|(k, _)| k.to_string()).collect(),
                _ => return Err(Error::Type("corrupt dict handle".to_string())),
            };
            let items: Vec<Value> = names.into_iter().map(|k| rt.heap.alloc_str(k)).collect();
            Ok(rt.heap.alloc_array_from(items))
        }
        other => Err(Error::Type(format!("'keys' needs a dict, got {}", other.kind()))),
    }
}

fn values(rt: &mut Runtime, args: &[Value]) -> Result<Value, Error> {
    let args = arity("values", args, 1)?;
    match args[0] {
        Value::Dict(h) => {
            let items: Vec<Value> = match rt.heap.get(h) {
                HeapObject::Dict(dict) => dict.iter().map(|(_, v)| v).collect(),
                _ => return Err(Error::Type("corrupt dict handle".to_string())),
            };
            Ok(rt.heap.alloc_array_from(items))
        }
        other => Err(Error::Type(format!("'values' needs a dict, got {}", other.kind()))),
    }
}

fn to_int(rt: &mut Runtime, args: &[Value]) -> Result<Value, Error> {
    let args = arity("int", args, 1)?;
    match args[0] {
        Value::Int(v) => Ok(Value::Int(v)),
        Value::Float(v) => Ok(Value::Int(v as i32)),
        Value::Str(h) => {
            let s = rt.heap.str_at(h).trim();
            s.parse::<i32>()
                .map(Value::Int)
                .map_err(|_| Error::Type(format!("cannot convert \"{s}\" to int")))
        }
        other => Err(Error::Type(format!("cannot convert {} to int", other.kind()))),
    }
}

fn to_float(rt: &mut Runtime, args: &[Value]) -> Result<Value, Error> {
    let args = arity("float", args, 1)?;
    match args[0] {
        Value::Int(v) => Ok(Value::Float(v as f64)),
        Value::Float(v) => Ok(Value::Float(v)),
        Value::Str(h) => {
            let s = rt.heap.str_at(h).trim();
            s.parse::<f64>()
                .map(Value::Float)
                .map_err(|_| Error::Type(format!("cannot convert \"{s}\" to float")))
        }
        other => Err(Error::Type(format!("cannot convert {} to float", other.kind()))),
    }
}

fn to_str(rt: &mut Runtime, args: &[Value]) -> Result<Value, Error> {
    let args = arity("str", args, 1)?;
    let rendered = ops::display(&rt.heap, args[0]);
    Ok(rt.heap.alloc_str(rendered))
}

fn print(rt: &mut Runtime, args: &[Value]) -> Result<Value, Error> {
    let args = arity("print", args, 1)?;
    println!("{}", ops::display(&rt.heap, args[0]));
    Ok(Value::Int(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt_with(source: &str) -> Runtime {
        let mut rt = Runtime::new();
        rt.load_source("t.lin", source).unwrap();
        rt
    }

    #[test]
    fn len_counts_chars_and_elements() {
        let mut rt = rt_with(
            r#"
func string_len() { return len("héllo"); }
func array_len() { a = [1, 2, 3]; return len(a); }
func dict_len() { return len({a: 1, b: 2}); }
"#,
        );
        assert_eq!(rt.call("string_len", &[]).unwrap(), Value::Int(5));
        assert_eq!(rt.call("array_len", &[]).unwrap(), Value::Int(3));
        assert_eq!(rt.call("dict_len", &[]).unwrap(), Value::Int(2));
    }

    #[test]
    fn push_and_pop_through_method_syntax() {
        let mut rt = rt_with(
            r#"
func t() {
    a = [];
    a->push(10);
    a->push(20);
    last = a->pop();
    return [len(a), last];
}
"#,
        );
        let v = rt.call("t", &[]).unwrap();
        assert_eq!(rt.array_get(v, 0), Some(Value::Int(1)));
        assert_eq!(rt.array_get(v, 1), Some(Value::Int(20)));
    }

    #[test]
    fn pop_from_empty_is_index_error() {
        let mut rt = rt_with("func t() { a = []; return pop(a); }");
        assert!(matches!(rt.call("t", &[]), Err(Error::Index(_))));
    }

    #[test]
    fn remove_by_index_and_key() {
        let mut rt = rt_with(
            r#"
func from_array() { a = [1, 2, 3]; removed = remove(a, 1); return [removed, len(a)]; }
func from_dict() { d = {x: 7, y: 8}; remove(d, "x"); return len(d); }
"#,
        );
        let v = rt.call("from_array", &[]).unwrap();
        assert_eq!(rt.array_get(v, 0), Some(Value::Int(2)));
        assert_eq!(rt.array_get(v, 1), Some(Value::Int(2)));
        assert_eq!(rt.call("from_dict", &[]).unwrap(), Value::Int(1));
    }

    #[test]
    fn keys_and_values_preserve_order() {
        let mut rt = rt_with("func t() { return keys({b: 1, a: 2, c: 3}); }");
        let v = rt.call("t", &[]).unwrap();
        let names: Vec<String> = (0..3)
            .map(|i| rt.str_value(rt.array_get(v, i).unwrap()).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        let mut rt = rt_with("func t() { return values({b: 1, a: 2}); }");
        let v = rt.call("t", &[]).unwrap();
        assert_eq!(rt.array_get(v, 0), Some(Value::Int(1)));
        assert_eq!(rt.array_get(v, 1), Some(Value::Int(2)));
    }

    #[test]
    fn conversions() {
        let mut rt = rt_with(
            r#"
func a() { return int("42"); }
func b() { return int(3.9); }
func c() { return float("1.5"); }
func d() { return float(2); }
func e() { return str(12) + str(3.5); }
func bad() { return int("not a number"); }
"#,
        );
        assert_eq!(rt.call("a", &[]).unwrap(), Value::Int(42));
        assert_eq!(rt.call("b", &[]).unwrap(), Value::Int(3));
        assert_eq!(rt.call("c", &[]).unwrap(), Value::Float(1.5));
        assert_eq!(rt.call("d", &[]).unwrap(), Value::Float(2.0));
        let v = rt.call("e", &[]).unwrap();
        assert_eq!(rt.str_value(v), Some("123.5"));
        assert!(matches!(rt.call("bad", &[]), Err(Error::Type(_))));
    }

    #[test]
    fn wrong_arity_is_a_type_error() {
        let mut rt = rt_with("func t() { return len(); }");
        assert!(matches!(rt.call("t", &[]), Err(Error::Type(_))));
    }
}
