//! Host embedding surface: registration, re-entry, cancellation, hooks,
//! collection behavior, and image loading.

use linguine_runtime::{DebugHooks, Error, Runtime, Value};
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;

#[test]
fn host_function_is_callable_from_scripts() {
    let mut rt = Runtime::new();
    rt.register_func("roll", |_, _, args| {
        let Some(Value::Int(sides)) = args.first().copied() else {
            return Err(Error::Type("roll takes an int".to_string()));
        };
        Ok(Value::Int(sides)) // loaded dice
    })
    .unwrap();
    rt.load_source("t.lin", "func main() { return roll(6) + 1; }").unwrap();
    assert_eq!(rt.call("main", &[]).unwrap(), Value::Int(7));
}

#[test]
fn host_error_propagates_with_message_and_site() {
    let mut rt = Runtime::new();
    rt.register_func("explode", |_, _, _| Err(Error::Host("disk on fire".to_string())))
        .unwrap();
    rt.load_source("t.lin", "func main() {\n  return explode();\n}").unwrap();
    assert_eq!(rt.call("main", &[]), Err(Error::Host("disk on fire".to_string())));
    let record = rt.last_error().unwrap();
    assert_eq!(record.line, 2);
    assert!(record.message.contains("disk on fire"));
}

#[test]
fn host_function_can_reenter_the_interpreter() {
    let mut rt = Runtime::new();
    rt.register_func("call_back", |rt, _, args| rt.call("helper", args)).unwrap();
    rt.load_source(
        "t.lin",
        "func helper(n) { return n * 2; } func main() { return call_back(21); }",
    )
    .unwrap();
    assert_eq!(rt.call("main", &[]).unwrap(), Value::Int(42));
}

#[test]
fn invalid_registration_names_are_rejected() {
    let mut rt = Runtime::new();
    assert!(rt.register_func("bad name", |_, _, _| Ok(Value::Int(0))).is_err());
    assert!(rt.register_func("", |_, _, _| Ok(Value::Int(0))).is_err());
    assert!(rt.register_func("good_name", |_, _, _| Ok(Value::Int(0))).is_ok());
}

#[test]
fn cancel_flag_unwinds_a_running_loop() {
    let mut rt = Runtime::new();
    // The script itself trips the flag, standing in for a watchdog thread.
    rt.register_func("trip", |rt, _, _| {
        rt.flags().set_cancel(true);
        Ok(Value::Int(0))
    })
    .unwrap();
    rt.load_source("t.lin", "func main() { while (1 == 1) { trip(); } return 0; }")
        .unwrap();
    assert_eq!(rt.call("main", &[]), Err(Error::Cancelled));

    // Clearing the flag makes the runtime usable again.
    rt.flags().set_cancel(false);
    rt.load_source("u.lin", "func ok() { return 5; }").unwrap();
    assert_eq!(rt.call("ok", &[]).unwrap(), Value::Int(5));
}

#[test]
fn cancel_before_call_prevents_execution() {
    let mut rt = Runtime::new();
    rt.load_source("t.lin", "func main() { return 1; }").unwrap();
    rt.flags().set_cancel(true);
    assert_eq!(rt.call("main", &[]), Err(Error::Cancelled));
}

#[test]
fn single_step_stops_at_each_line() {
    let mut rt = Runtime::new();
    rt.load_source(
        "t.lin",
        "func main() {\n  a = 1;\n  b = 2;\n  return a + b;\n}",
    )
    .unwrap();

    let flags = rt.flags();
    flags.set_single_step(true);
    let stops: Rc<RefCell<Vec<u16>>> = Rc::new(RefCell::new(Vec::new()));
    let seen = stops.clone();
    let hook_flags = flags.clone();
    rt.set_debug_hooks(DebugHooks {
        pre: Some(Box::new(move |ctx| {
            // Acting as the interactive front end: note the stop, resume.
            if hook_flags.stop() {
                seen.borrow_mut().push(ctx.line);
                hook_flags.set_stop(false);
            }
        })),
        post: None,
    });

    assert_eq!(rt.call("main", &[]).unwrap(), Value::Int(3));
    // Stopped on entering line 3 and line 4.
    assert_eq!(*stops.borrow(), vec![3, 4]);
}

#[test]
fn hooks_can_inspect_registers() {
    let mut rt = Runtime::new();
    rt.load_source("t.lin", "func main(seed) { return seed + 1; }").unwrap();

    let max_seen: Rc<RefCell<i32>> = Rc::new(RefCell::new(i32::MIN));
    let cell = max_seen.clone();
    rt.set_debug_hooks(DebugHooks {
        pre: None,
        post: Some(Box::new(move |ctx| {
            for i in 0..ctx.tmpvar_count() {
                if let Some(Value::Int(v)) = ctx.tmpvar(i) {
                    let mut max = cell.borrow_mut();
                    *max = (*max).max(v);
                }
            }
        })),
    });

    rt.call("main", &[Value::Int(41)]).unwrap();
    assert_eq!(*max_seen.borrow(), 42);
}

#[test]
fn allocation_pressure_triggers_collection() {
    let mut rt = Runtime::new();
    rt.load_source(
        "gc.lin",
        r#"func churn(n) { for (i in 0..n) { s = "waste " + i; } return 0; }"#,
    )
    .unwrap();
    rt.call("churn", &[Value::Int(2000)]).unwrap();
    let stats = rt.heap_stats();
    assert!(stats.collections >= 1, "no collection after {stats:?}");
    // A final sweep leaves only the last string bound to the global `s`.
    rt.gc();
    assert_eq!(rt.heap_stats().live, 1);
}

#[test]
fn returned_values_stay_pinned_until_released() {
    let mut rt = Runtime::new();
    rt.load_source("t.lin", "func make() { return [1, 2, 3]; }").unwrap();
    let v = rt.call("make", &[]).unwrap();
    rt.gc();
    assert_eq!(rt.array_len(v), Some(3));
    assert_eq!(rt.array_get(v, 2), Some(Value::Int(3)));

    rt.release(v);
    rt.gc();
    assert_eq!(rt.heap_stats().live, 0);
}

#[test]
fn cyclic_structures_are_collected_after_error_unwind() {
    let mut rt = Runtime::new();
    rt.load_source(
        "t.lin",
        r#"
func main() {
    a = [];
    d = {};
    a[0] = d;
    d.back = a;
    keep_local = [a];
    return 1 / 0;
}
"#,
    )
    .unwrap();
    assert_eq!(rt.call("main", &[]), Err(Error::DivideByZero));
    // a and d are still global, but the error path swept everything the
    // abandoned frame held beyond them.
    let live = rt.heap_stats().live;
    assert!(live <= 3, "abandoned frame leaked: {live} live objects");
}

#[test]
fn images_round_trip_through_disk() {
    let source = r#"
func greet(who) { return "hello, " + who; }
func main() { return greet("world"); }
"#;
    let image = lingc::compile(source).unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&image.to_bytes()).unwrap();

    let mut bytes = Vec::new();
    let mut reopened = file.reopen().unwrap();
    reopened.read_to_end(&mut bytes).unwrap();

    let mut rt = Runtime::new();
    rt.load_image_bytes(&bytes).unwrap();
    let v = rt.call("main", &[]).unwrap();
    assert_eq!(rt.str_value(v), Some("hello, world"));
}

#[test]
fn corrupt_image_is_rejected_with_format_error() {
    let mut rt = Runtime::new();
    let err = rt.load_image_bytes(b"not an image").unwrap_err();
    assert!(matches!(err, Error::Format(_)));
    assert!(rt.last_error().is_some());
}

#[test]
fn typed_values_cross_the_boundary_both_ways() {
    use linguine_runtime::TypedValue;
    let mut rt = Runtime::new();
    rt.load_source(
        "t.lin",
        "func pick(cfg) { return cfg.speed * cfg.scale; }",
    )
    .unwrap();
    let cfg = rt
        .from_typed(&TypedValue::Dict(vec![
            ("speed".to_string(), TypedValue::Int(6)),
            ("scale".to_string(), TypedValue::Int(7)),
        ]))
        .unwrap();
    assert_eq!(rt.call("pick", &[cfg]).unwrap(), Value::Int(42));
}
