//! Host bridge: native callables registered by name.
//!
//! The engine (or any embedding application) extends the language by
//! registering named callables; scripts call them exactly like their own
//! functions. The runtime's intrinsics go through the same table, so the
//! call path cannot tell the two apart.

use crate::error::Error;
use crate::runtime::Runtime;
use crate::value::Value;
use std::rc::Rc;

/// A native callable.
///
/// Receives the runtime (re-entering the interpreter from inside is
/// allowed), the receiver for `->` method calls, and the evaluated
/// arguments. Returns one value or an error message that surfaces to the
/// script's caller as `HostError`.
pub type HostFn = Rc<dyn Fn(&mut Runtime, Option<Value>, &[Value]) -> Result<Value, Error>>;

pub(crate) struct NativeEntry {
    pub name: String,
    pub f: HostFn,
}

/// Check a name is registrable: ASCII letters, digits, and underscores,
/// not starting with a digit.
pub(crate) fn validate_name(name: &str) -> Result<(), Error> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Host(format!("'{name}' is not a valid function name")))
    }
}

/// Prepend the method receiver, when there is one, to the argument list.
/// This is what makes `arr->push(3)` and `push(arr, 3)` the same call.
pub(crate) fn arg_list(this: Option<Value>, args: &[Value]) -> Vec<Value> {
    this.into_iter().chain(args.iter().copied()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(validate_name("spawn_enemy").is_ok());
        assert!(validate_name("_x9").is_ok());
        assert!(validate_name("9lives").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("bad-name").is_err());
        assert!(validate_name("bad.name").is_err());
    }

    #[test]
    fn receiver_prepends() {
        let args = [Value::Int(2)];
        assert_eq!(arg_list(Some(Value::Int(1)), &args), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(arg_list(None, &args), vec![Value::Int(2)]);
    }
}
