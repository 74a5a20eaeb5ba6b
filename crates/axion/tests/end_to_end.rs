//! End-to-end scenarios: source text in, printed output out.
//!
//! Everything runs through the full pipeline (lex, parse, analyze, codegen,
//! emit, execute from a memory stream) with output captured.

use axion::{CaptureWriter, run_source};
use pretty_assertions::assert_eq;

fn run(source: &str) -> String {
    let mut writer = CaptureWriter::new();
    let (output, result) = run_source(source, "test.ax", &mut writer);
    assert!(
        output.bytecode.is_some(),
        "compilation failed:\n{}",
        output.report()
    );
    if let Err(failure) = result {
        panic!("execution failed: {failure}\noutput so far: {:?}", writer.output);
    }
    writer.output
}

fn run_with_input(source: &str, input: &[&str]) -> String {
    let mut writer = CaptureWriter::with_input(input);
    let (output, result) = run_source(source, "test.ax", &mut writer);
    assert!(output.bytecode.is_some(), "compilation failed:\n{}", output.report());
    result.unwrap();
    writer.output
}

#[test]
fn folded_arithmetic() {
    assert_eq!(run("module M; print(2 + 3 * 4);"), "14\n");
}

#[test]
fn for_loop_accumulates() {
    let source = "module M; var x = 0; for (var i = 1; i <= 4; i += 1) { x += i; } print(x);";
    assert_eq!(run(source), "10\n");
}

#[test]
fn recursive_factorial() {
    let source = "module M; func fact(n) { if n <= 1: return 1; return n * fact(n - 1); } print(fact(6));";
    assert_eq!(run(source), "720\n");
}

#[test]
fn while_loop_builds_string() {
    let source = "module M; var s = ''; var i = 0; while i < 3 { s += 'a'; i += 1; } print(s);";
    assert_eq!(run(source), "aaa\n");
}

#[test]
fn try_catch_recovers_from_null_member() {
    let source = "module M; try { var a = null; a.x = 1; } catch (e) { print('caught'); }";
    assert_eq!(run(source), "caught\n");
}

#[test]
fn enum_members_auto_increment() {
    let source = "module M; enum Color { Red, Green = 10, Blue } print(Color.Red, ',', Color.Green, ',', Color.Blue);";
    assert_eq!(run(source), "0,10,11\n");
}

#[test]
fn print_arguments_left_to_right() {
    assert_eq!(run("module M; print(1, ' ', 2, ' ', 3);"), "1 2 3\n");
}

#[test]
fn integer_division_truncates() {
    let source = "module M; var a = 9; var b = 4; print(a + b, ',', a - b, ',', a * b, ',', a / b, ',', a % b);";
    assert_eq!(run(source), "13,5,36,2,1\n");
}

#[test]
fn runtime_comparisons() {
    let source = "module M; var x = 2; print(x < 3, x == 2, x != 2, x >= 3);";
    assert_eq!(run(source), "1100\n");
}

#[test]
fn greater_comparisons_swap_operands() {
    let source = "module M; var a = 5; var b = 3; print(a > b, a >= b, b > a);";
    assert_eq!(run(source), "110\n");
}

#[test]
fn logical_operators_on_integers() {
    let source = "module M; var t = 1; var f = 0; print(t && f, t || f);";
    assert_eq!(run(source), "01\n");
}

#[test]
fn short_circuit_operators_fold() {
    assert_eq!(run("module M; print(0 && 9, 1 || 7);"), "01\n");
}

#[test]
fn bitwise_and_shifts() {
    let source = "module M; var a = 6; var b = 3; print(a & b, ',', a | b, ',', a ^ b, ',', 1 << 4, ',', 16 >> 2);";
    assert_eq!(run(source), "2,7,5,16,4\n");
}

#[test]
fn power_operator() {
    let source = "module M; var two = 2; print(2 ** 10, ',', two ** 8);";
    assert_eq!(run(source), "1024,256\n");
}

#[test]
fn unary_operators() {
    let source = "module M; var v = 3; print(-v, !0, !1, ~0);";
    assert_eq!(run(source), "-310-1\n");
}

#[test]
fn float_promotion_and_formatting() {
    assert_eq!(run("module M; print(1 + 0.5);"), "1.5\n");
    assert_eq!(run("module M; print(2.0);"), "2.0\n");
    assert_eq!(run("module M; var h = 5; print(h \\ 2.0);"), "2.5\n");
}

#[test]
fn string_concatenation_coerces_either_side() {
    assert_eq!(run("module M; var n = 7; print('n=' + n);"), "n=7\n");
    assert_eq!(run("module M; var n = 7; print(n + '!');"), "7!\n");
}

#[test]
fn string_ordering_is_lexicographic() {
    let source = "module M; var s = 'abc'; print(s == 'abc', s < 'abd', s < 'ab');";
    assert_eq!(run(source), "110\n");
}

#[test]
fn null_comparisons() {
    let source = "module M; var n = null; print(n == null, n != null);";
    assert_eq!(run(source), "10\n");
    assert_eq!(run("module M; print(null);"), "<null>\n");
}

#[test]
fn if_else_takes_the_right_branch() {
    let source = "module M; var x = 5; if x < 3: print('small'); else: print('big');";
    assert_eq!(run(source), "big\n");

    let source = "module M; var x = 1; if x < 3 { print('small'); } else { print('big'); }";
    assert_eq!(run(source), "small\n");
}

#[test]
fn string_escapes_round_trip() {
    assert_eq!(run(r"module M; print('a\tb');"), "a\tb\n");
    assert_eq!(run("module M; print('''two\nlines''');"), "two\nlines\n");
}

#[test]
fn comments_are_ignored() {
    let source = "module M; // line comment\nprint(1); /* block\ncomment */ print(2);";
    assert_eq!(run(source), "1\n2\n");
}

#[test]
fn typeof_reports_promotion() {
    assert_eq!(
        run("module M; var a = 1; var b = 2; print(Reflection.typeof(a + b));"),
        "integer\n"
    );
    assert_eq!(
        run("module M; var a = 1; var b = 2; print(Reflection.typeof(a / b));"),
        "integer\n"
    );
    assert_eq!(
        run("module M; var a = 1; print(Reflection.typeof(a + 0.5));"),
        "float\n"
    );
    assert_eq!(run("module M; print(Reflection.typeof('s'));"), "string\n");
}

#[test]
fn convert_module() {
    assert_eq!(run("module M; print(Convert.toInt('42') + 1);"), "43\n");
    assert_eq!(run("module M; print(Convert.toInt('0x10'));"), "16\n");
    assert_eq!(run("module M; print(Convert.toInt(3.9));"), "3\n");
    assert_eq!(run("module M; print(Convert.toFloat('2.5'));"), "2.5\n");
    assert_eq!(run("module M; print(Convert.toString(12) + '!');"), "12!\n");
    assert_eq!(run("module M; print(Convert.toBool('true'), Convert.toBool(0));"), "10\n");
}

#[test]
fn console_println_and_readln() {
    assert_eq!(
        run_with_input("module M; print(Console.readln());", &["hello"]),
        "hello\n"
    );
    // println writes its own newline; its null result is discarded
    assert_eq!(run("module M; Console.println('a', 1);"), "a1\n");
}

#[test]
fn clock_measures_float_seconds() {
    let source = "module M; Clock.start(); print(Reflection.typeof(Clock.stop()));";
    assert_eq!(run(source), "float\n");
}

#[test]
fn using_desugars_to_alias() {
    let source = "module M; using Console.println; println('w');";
    assert_eq!(run(source), "w\n");
}

#[test]
fn alias_reads_current_value() {
    let source = "module M; var x = 1; x = 2; alias y = x; print(y);";
    assert_eq!(run(source), "2\n");
}

#[test]
fn function_expression_value() {
    let source = "module M; var f = func -> return 4; print(f());";
    assert_eq!(run(source), "4\n");
}

#[test]
fn nested_function_definition() {
    let source = "module M; func outer() { func inner() { return 5; } return inner(); } print(outer());";
    assert_eq!(run(source), "5\n");
}

#[test]
fn inline_function_splices_at_call_site() {
    let source = "module M; attribute { 'inline' } func double(x) { return x * 2; } print(double(4));";
    assert_eq!(run(source), "8\n");
}

#[test]
fn function_without_return_yields_null() {
    let source = "module M; func f { print('body'); } print(f());";
    assert_eq!(run(source), "body\n<null>\n");
}

#[test]
fn division_by_zero_is_catchable() {
    let source = "module M; var d = 0; try { print(1 / d); } catch { print('div'); }";
    assert_eq!(run(source), "div\n");
}

#[test]
fn catch_binds_exception_object() {
    let source = "module M; try { var a = null; a.x = 1; } catch (e) { print('got', e); }";
    assert_eq!(run(source), "got<null>\n");
}

#[test]
fn functions_call_functions() {
    let source = "module M; func add(a, b) { return a + b; } func twice(n) { return add(n, n); } print(twice(21));";
    assert_eq!(run(source), "42\n");
}

#[test]
fn early_return_from_loop_inside_function() {
    let source = "module M;
func firstOver(limit) {
    for (var i = 1; i <= 100; i += 1) {
        if i * i > limit: return i;
    }
    return 0;
}
print(firstOver(10), ',', firstOver(100));";
    assert_eq!(run(source), "4,11\n");
}

#[test]
fn globals_visible_inside_functions() {
    let source = "module M; var base = 100; func bump(n) { base += n; return base; } print(bump(1)); print(bump(2));";
    assert_eq!(run(source), "101\n103\n");
}

#[test]
fn print_arguments_evaluate_right_to_left() {
    // arguments are emitted in reverse so the VM's pops come out left to
    // right; evaluation order follows the emission order
    let source = "module M; var n = 0; func next() { n += 1; return n; } print(next(), ',', next());";
    assert_eq!(run(source), "2,1\n");
}
