//! End-to-end scenarios: whole programs through compile, load, and call.

use linguine_runtime::{Error, Runtime, TypedValue, Value};

fn load(source: &str) -> Runtime {
    let mut rt = Runtime::new();
    rt.load_source("test.lin", source).expect("source compiles");
    rt
}

fn run_main(source: &str) -> (Runtime, Result<Value, Error>) {
    let mut rt = load(source);
    let result = rt.call("main", &[]);
    (rt, result)
}

#[test]
fn arithmetic_precedence() {
    let (_, result) = run_main("func main() { return 1 + 2 * 3; }");
    assert_eq!(result.unwrap(), Value::Int(7));
}

#[test]
fn range_loop_builds_array() {
    let (rt, result) = run_main("func main() { a = []; for (i in 0..5) { a[len(a)] = i; } return a; }");
    let v = result.unwrap();
    assert_eq!(
        rt.to_typed(v).unwrap(),
        TypedValue::Array((0..5).map(TypedValue::Int).collect())
    );
}

#[test]
fn dict_iteration_sums_values() {
    let (_, result) =
        run_main("func main() { d = {a: 1, b: 2}; s = 0; for (k, v in d) { s = s + v; } return s; }");
    assert_eq!(result.unwrap(), Value::Int(3));
}

#[test]
fn recursive_fibonacci() {
    let (_, result) = run_main(
        "func fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); } func main() { return fib(10); }",
    );
    assert_eq!(result.unwrap(), Value::Int(55));
}

#[test]
fn divide_by_zero_reports_line_one() {
    let (rt, result) = run_main("func main() { return 1 / 0; }");
    assert_eq!(result, Err(Error::DivideByZero));
    let record = rt.last_error().expect("error recorded");
    assert_eq!(record.file, "test.lin");
    assert_eq!(record.line, 1);
    assert!(record.message.contains("division by zero"));
}

#[test]
fn unbound_symbol_is_a_name_error() {
    let (rt, result) = run_main("func main() { return x; }");
    assert_eq!(result, Err(Error::Name("x".to_string())));
    assert!(rt.last_error().unwrap().message.contains("'x'"));
}

#[test]
fn else_if_chain_picks_one_branch() {
    let source = r#"
func classify(n) {
    if (n < 0) { return "negative"; }
    else if (n == 0) { return "zero"; }
    else { return "positive"; }
}
"#;
    let mut rt = load(source);
    for (input, expected) in [(-5, "negative"), (0, "zero"), (3, "positive")] {
        let v = rt.call("classify", &[Value::Int(input)]).unwrap();
        assert_eq!(rt.str_value(v), Some(expected));
    }
}

#[test]
fn while_loop_with_break_and_continue() {
    let (_, result) = run_main(
        r#"
func main() {
    s = 0;
    i = 0;
    while (i < 100) {
        i = i + 1;
        if (i % 2 == 0) { continue; }
        if (i > 10) { break; }
        s = s + i;
    }
    return s;
}
"#,
    );
    // 1 + 3 + 5 + 7 + 9 = 25
    assert_eq!(result.unwrap(), Value::Int(25));
}

#[test]
fn for_over_array_yields_index_and_element() {
    let (_, result) = run_main(
        r#"
func main() {
    a = [10, 20, 30];
    weighted = 0;
    for (i, x in a) { weighted = weighted + i * x; }
    return weighted;
}
"#,
    );
    // 0*10 + 1*20 + 2*30 = 80
    assert_eq!(result.unwrap(), Value::Int(80));
}

#[test]
fn for_over_array_single_variable_yields_elements() {
    let (_, result) = run_main(
        "func main() { a = [4, 5, 6]; s = 0; for (x in a) { s = s + x; } return s; }",
    );
    assert_eq!(result.unwrap(), Value::Int(15));
}

#[test]
fn array_append_law() {
    let (rt, result) = run_main(
        r#"
func main() {
    a = [1, 2];
    before = len(a);
    a[len(a)] = 99;
    return [before, len(a), a[len(a) - 1]];
}
"#,
    );
    let v = result.unwrap();
    assert_eq!(rt.array_get(v, 0), Some(Value::Int(2)));
    assert_eq!(rt.array_get(v, 1), Some(Value::Int(3)));
    assert_eq!(rt.array_get(v, 2), Some(Value::Int(99)));
}

#[test]
fn array_store_past_end_fails() {
    let (rt, result) = run_main("func main() { a = []; a[2] = 1; return a; }");
    assert!(matches!(result, Err(Error::Index(_))));
    assert_eq!(rt.last_error().unwrap().line, 1);
}

#[test]
fn array_read_out_of_range_fails() {
    let (_, result) = run_main("func main() { a = [1]; return a[5]; }");
    assert!(matches!(result, Err(Error::Index(_))));
}

#[test]
fn dict_subscript_by_key_string() {
    let (_, result) =
        run_main(r#"func main() { d = {hp: 7}; k = "hp"; return d[k]; }"#);
    assert_eq!(result.unwrap(), Value::Int(7));
}

#[test]
fn dict_positional_subscript() {
    let (_, result) = run_main("func main() { d = {a: 5, b: 6}; return d[1]; }");
    assert_eq!(result.unwrap(), Value::Int(6));
}

#[test]
fn missing_dict_key_fails() {
    let (_, result) = run_main("func main() { d = {}; return d.hp; }");
    assert!(matches!(result, Err(Error::Index(_))));
}

#[test]
fn dot_store_creates_and_updates() {
    let (_, result) = run_main(
        "func main() { d = {}; d.hp = 10; d.hp = d.hp - 3; return d.hp; }",
    );
    assert_eq!(result.unwrap(), Value::Int(7));
}

#[test]
fn method_call_on_dict_passes_receiver() {
    let (_, result) = run_main(
        r#"
func hit(self, dmg) {
    self.hp = self.hp - dmg;
    return self.hp;
}
func main() {
    enemy = {hp: 10, hit: hit};
    enemy->hit(3);
    return enemy->hit(2);
}
"#,
    );
    assert_eq!(result.unwrap(), Value::Int(5));
}

#[test]
fn method_call_falls_back_to_globals() {
    let (_, result) = run_main(
        r#"
func double(self) { return self.x * 2; }
func main() { return {x: 21}->double(); }
"#,
    );
    assert_eq!(result.unwrap(), Value::Int(42));
}

#[test]
fn string_concat_and_index() {
    let (rt, result) = run_main(
        r#"
func main() {
    name = "hero";
    banner = "hp: " + 12 + " for " + name;
    first = name[0];
    return banner + "!" + first;
}
"#,
    );
    let v = result.unwrap();
    assert_eq!(rt.str_value(v), Some("hp: 12 for hero!h"));
}

#[test]
fn string_equality_is_structural() {
    let (_, result) = run_main(r#"func main() { return "ab" + "c" == "abc"; }"#);
    assert_eq!(result.unwrap(), Value::Int(1));
}

#[test]
fn float_arithmetic_promotes() {
    let (_, result) = run_main("func main() { return 1 + 0.5; }");
    assert_eq!(result.unwrap(), Value::Float(1.5));
    let (_, result) = run_main("func main() { return 7.0 / 2; }");
    assert_eq!(result.unwrap(), Value::Float(3.5));
}

#[test]
fn unary_minus_on_expressions() {
    let (_, result) = run_main("func main() { x = 5; return -x + 1; }");
    assert_eq!(result.unwrap(), Value::Int(-4));
    let (_, result) = run_main("func main() { return -2.5 * 2; }");
    assert_eq!(result.unwrap(), Value::Float(-5.0));
}

#[test]
fn logic_operators_combine_comparisons() {
    let mut rt = load(
        "func both(a, b) { return a > 0 && b > 0; } func either(a, b) { return a > 0 || b > 0; }",
    );
    assert_eq!(rt.call("both", &[Value::Int(1), Value::Int(1)]).unwrap(), Value::Int(1));
    assert_eq!(rt.call("both", &[Value::Int(1), Value::Int(-1)]).unwrap(), Value::Int(0));
    assert_eq!(rt.call("either", &[Value::Int(-1), Value::Int(1)]).unwrap(), Value::Int(1));
    assert_eq!(rt.call("either", &[Value::Int(-1), Value::Int(-1)]).unwrap(), Value::Int(0));
}

#[test]
fn functions_are_first_class_values() {
    let (_, result) = run_main(
        r#"
func inc(n) { return n + 1; }
func apply_twice(f, x) { return f(f(x)); }
func main() { return apply_twice(inc, 5); }
"#,
    );
    assert_eq!(result.unwrap(), Value::Int(7));
}

#[test]
fn missing_arguments_default_to_zero() {
    let mut rt = load("func pad(a, b) { return a + b; }");
    assert_eq!(rt.call("pad", &[Value::Int(4)]).unwrap(), Value::Int(4));
}

#[test]
fn too_many_arguments_fail() {
    let mut rt = load("func one(a) { return a; }");
    assert!(matches!(
        rt.call("one", &[Value::Int(1), Value::Int(2)]),
        Err(Error::Type(_))
    ));
}

#[test]
fn infinite_recursion_overflows_cleanly() {
    let (mut rt, result) = run_main("func main() { return main(); }");
    assert_eq!(result, Err(Error::StackOverflow));
    // The stack unwound completely: the runtime still works.
    rt.load_source("second.lin", "func ok() { return 1; }").unwrap();
    assert_eq!(rt.call("ok", &[]).unwrap(), Value::Int(1));
}

#[test]
fn error_in_nested_call_reports_innermost_site() {
    let (rt, result) = run_main(
        "func boom() {\n  return 1 / 0;\n}\nfunc main() {\n  return boom();\n}",
    );
    assert_eq!(result, Err(Error::DivideByZero));
    assert_eq!(rt.last_error().unwrap().line, 2);
}

#[test]
fn globals_persist_between_calls() {
    let mut rt = load("func set() { counter = 10; return 0; } func bump() { counter = counter + 1; return counter; }");
    rt.call("set", &[]).unwrap();
    assert_eq!(rt.call("bump", &[]).unwrap(), Value::Int(11));
    assert_eq!(rt.call("bump", &[]).unwrap(), Value::Int(12));
}

#[test]
fn int_overflow_wraps() {
    let (_, result) = run_main("func main() { return 2147483647 + 1; }");
    assert_eq!(result.unwrap(), Value::Int(i32::MIN));
}

#[test]
fn nested_containers_round_trip_out() {
    let (rt, result) = run_main(
        r#"func main() { return {name: "slime", drops: [1, 2.5, "gel"]}; }"#,
    );
    let v = result.unwrap();
    assert_eq!(
        rt.to_typed(v).unwrap(),
        TypedValue::Dict(vec![
            ("name".to_string(), TypedValue::Str("slime".to_string())),
            (
                "drops".to_string(),
                TypedValue::Array(vec![
                    TypedValue::Int(1),
                    TypedValue::Float(2.5),
                    TypedValue::Str("gel".to_string()),
                ])
            ),
        ])
    );
}
