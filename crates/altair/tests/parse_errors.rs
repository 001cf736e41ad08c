//! Compile-time error reporting.

mod common;

use altair::{CollectStringPrint, World};
use pretty_assertions::assert_eq;

fn compile_error(command: &str) -> String {
    let mut world = World::with_console(Box::new(CollectStringPrint::new()));
    match world.compile_command(command, false) {
        Ok(_) => panic!("expected {command:?} to fail"),
        Err(error) => error.message().to_owned(),
    }
}

fn compile_file_error(source: &str) -> String {
    let mut world = World::with_console(Box::new(CollectStringPrint::new()));
    match world.compile_file("test.q", source.as_bytes(), "test", 1) {
        Ok(_) => panic!("expected script to fail"),
        Err(error) => error.message().to_owned(),
    }
}

#[test]
fn test_expression_errors() {
    assert_eq!(compile_error("A := "), "Invalid expression");
    assert_eq!(compile_error("A := 1 2"), "Expected operator");
    assert_eq!(compile_error("A := (1"), "Expecting \")\"");
    assert_eq!(compile_error("A := f(1,"), "Invalid expression");
    assert_eq!(compile_error("A := x->"), "Expecting identifier, member name");
}

#[test]
fn test_unterminated_string() {
    assert_eq!(compile_error("Print 'oops"), "Unterminated string");
}

#[test]
fn test_break_continue_outside_loop() {
    assert_eq!(compile_error("Break"), "\"Break\" not allowed here");
    assert_eq!(compile_error("Continue"), "\"Continue\" not allowed here");
}

#[test]
fn test_misplaced_keywords() {
    assert_eq!(compile_error("Loop"), "\"LOOP\" not allowed here");
    assert_eq!(compile_error("EndStruct"), "\"EndStruct\" not allowed here");
    assert_eq!(compile_error("Until"), "\"Until\" not allowed here");
}

#[test]
fn test_blocks_refused_in_one_line_context() {
    assert_eq!(compile_error("If 1"), "Multiline statements not allowed here");
    assert_eq!(compile_error("Do"), "Multiline statements not allowed here");
    assert_eq!(
        compile_error("Sub f"),
        "Multiline statements not allowed here"
    );
}

#[test]
fn test_reserved_names() {
    assert_eq!(compile_error("Dim Print"), "\"PRINT\" is a reserved name");
    assert_eq!(
        compile_file_error("Struct Integer\nEndStruct"),
        "\"INTEGER\" is a reserved type name"
    );
}

#[test]
fn test_unterminated_blocks() {
    assert_eq!(
        compile_file_error("If 1 Then\nA := 2"),
        "Unexpected end of script"
    );
    assert_eq!(
        compile_file_error("Do\nA := 2"),
        "Unexpected end of script"
    );
    assert_eq!(
        compile_file_error("Select Case 1"),
        "Unexpected end of script"
    );
}

#[test]
fn test_statement_syntax() {
    assert_eq!(compile_error("For x"), "Expecting \"=\" or \":=\"");
    assert_eq!(
        compile_file_error("For i := 1 To 3\nA := 1\nLoop"),
        "Expecting \"Next\""
    );
    assert_eq!(compile_error("With 1 A := 2"), "Expecting \"Do\"");
    assert_eq!(compile_error("Abort 1, 2"), "Too many arguments to \"Abort\"");
    assert_eq!(compile_error("Eval"), "Too few arguments to \"Eval\"");
}

#[test]
fn test_option_errors() {
    assert_eq!(
        compile_error("Option Optimize(1)"),
        "Multiline statements not allowed here"
    );
    assert_eq!(
        compile_file_error("Option Optimize(7)"),
        "Range error"
    );
    assert_eq!(
        compile_file_error("Option Encoding('klingon')"),
        "Unknown encoding, klingon"
    );
}

#[test]
fn test_compile_errors_carry_file_trace() {
    let mut world = World::with_console(Box::new(CollectStringPrint::new()));
    let error = world
        .compile_file("test.q", b"A := 1\nB := ", "test", 1)
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "Invalid expression\nin line 2 of file \"test.q\""
    );
}

#[test]
fn test_garbage_after_statement() {
    assert_eq!(compile_error("Stop now"), "Expected end of statement");
    assert_eq!(compile_error("Return 1 2"), "Expected end of statement");
}

#[test]
fn test_duplicate_struct_field() {
    assert_eq!(
        compile_file_error("Struct P\nX, x\nEndStruct"),
        "Duplicate field name"
    );
}

#[test]
fn test_invalid_character() {
    assert_eq!(compile_error("A := @"), "Invalid expression");
}
