//! Diagnostic behavior of the build pipeline: what is fatal, what warns,
//! what is informational, and how fatals gate bytecode emission.

use axion::{ErrorLevel, ErrorType, Script};

fn compile(source: &str) -> (bool, Vec<(ErrorLevel, ErrorType)>) {
    let output = Script::new(source, "test.ax").compile();
    let messages = output.messages.iter().map(|m| (m.level, m.error_type)).collect();
    (output.bytecode.is_some(), messages)
}

fn has(messages: &[(ErrorLevel, ErrorType)], level: ErrorLevel, error_type: ErrorType) -> bool {
    messages.iter().any(|(l, t)| *l == level && *t == error_type)
}

#[test]
fn missing_module_header_is_fatal() {
    let (emitted, messages) = compile("print(1);");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::ExpectedModule));
}

#[test]
fn undeclared_identifier_blocks_emission() {
    let (emitted, messages) = compile("module M; print(ghost);");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::UndeclaredIdentifier));
}

#[test]
fn redeclaration_in_same_scope_is_fatal() {
    let (emitted, messages) = compile("module M; var x = 1; var x = 2; print(x);");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::RedeclaredIdentifier));
}

#[test]
fn inner_scope_names_stay_inner() {
    let source = "module M; var c = 1; if c: { var inner = 2; print(inner); } print(inner);";
    let (emitted, messages) = compile(source);
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::UndeclaredIdentifier));
}

#[test]
fn shadowing_in_inner_scope_is_fine() {
    let source = "module M; var x = 1; if x: { var x = 2; print(x); } print(x);";
    let (emitted, messages) = compile(source);
    assert!(emitted, "{messages:?}");
}

#[test]
fn const_assignment_is_fatal() {
    let (emitted, messages) = compile("module M; try { print(1); } catch (e) { e = 2; }");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::ConstIdentifier));
}

#[test]
fn assignment_target_must_be_identifier() {
    let (emitted, messages) = compile("module M; 1 = 2;");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::ExpectedIdentifier));
}

#[test]
fn else_without_if_is_fatal() {
    let (emitted, messages) = compile("module M; else: print(1);");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::ElseOutsideIf));
}

#[test]
fn unterminated_string_is_fatal() {
    let (emitted, messages) = compile("module M; print('oops);");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::UnterminatedStringLiteral));
}

#[test]
fn unknown_escape_is_fatal() {
    let (emitted, messages) = compile(r"module M; print('a\qb');");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::UnrecognizedEscapeSequence));
}

#[test]
fn alias_requires_assignment() {
    let (emitted, messages) = compile("module M; alias a;");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::AliasMissingAssignment));
}

#[test]
fn using_module_is_unsupported() {
    let (emitted, messages) = compile("module M; using module Anything;");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::UnsupportedFeature));
}

#[test]
fn inline_function_cannot_be_referenced_as_value() {
    let source = "module M; attribute { 'inline' } func f { return 1; } var g = f; print(g);";
    let (emitted, messages) = compile(source);
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::ProhibitedActionAttribute));
}

#[test]
fn declaring_a_module_name_is_fatal() {
    let (emitted, messages) = compile("module M; var Console = 1; print(Console);");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::IdentifierIsModule));
}

#[test]
fn unreachable_code_warns_but_compiles() {
    let source = "module M; func f { return 1; print(2); } print(f());";
    let (emitted, messages) = compile(source);
    assert!(emitted);
    assert!(has(&messages, ErrorLevel::Warning, ErrorType::UnreachableCode));
}

#[test]
fn missing_semicolon_warns_but_compiles() {
    let source = "module M; var x = 1 var y = 2; print(x, y);";
    let (emitted, messages) = compile(source);
    assert!(emitted, "{messages:?}");
    assert!(has(&messages, ErrorLevel::Warning, ErrorType::ExpectedSemicolon));
}

#[test]
fn missing_final_return_is_info() {
    let source = "module M; func f { print(1); } print(f());";
    let (emitted, messages) = compile(source);
    assert!(emitted);
    assert!(has(&messages, ErrorLevel::Info, ErrorType::MissingFinalReturn));
}

#[test]
fn unused_identifier_is_info() {
    let (emitted, messages) = compile("module M; var lonely = 1;");
    assert!(emitted);
    assert!(has(&messages, ErrorLevel::Info, ErrorType::UnusedIdentifier));
}

#[test]
fn naming_conventions_are_info() {
    let (_, messages) = compile("module lower; var Upper = 1; func Shout { return 1; } print(Upper, Shout());");
    assert!(has(&messages, ErrorLevel::Info, ErrorType::ModuleNameBeginsLowercase));
    assert!(has(&messages, ErrorLevel::Info, ErrorType::VariableNameBeginsUppercase));
    assert!(has(&messages, ErrorLevel::Info, ErrorType::FunctionNameBeginsUppercase));
}

#[test]
fn importing_the_current_file_is_fatal() {
    let (emitted, messages) = compile("module M; import 'test.ax';");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::ImportCurrentFile));
}

#[test]
fn unsupported_compound_assignment_is_fatal() {
    let (emitted, messages) = compile("module M; var x = 6; x %= 4; print(x);");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::UnsupportedFeature));
}

#[test]
fn increment_operator_is_unsupported() {
    let (emitted, messages) = compile("module M; var x = 1; print(++x);");
    assert!(!emitted);
    assert!(has(&messages, ErrorLevel::Fatal, ErrorType::UnsupportedFeature));
}

#[test]
fn report_groups_by_file_and_position() {
    let output = Script::new("module M; print(ghost); print(phantom);", "test.ax").compile();
    let report = output.report();
    assert!(report.starts_with("test.ax\n"), "{report}");
    let ghost = report.find("ghost").unwrap();
    let phantom = report.find("phantom").unwrap();
    assert!(ghost < phantom);
}
