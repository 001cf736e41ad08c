//! End-to-end language tests: compile with the real compiler, run on the
//! real VM, observe through globals and the console sink.

mod common;

use altair::{ProcessState, Value, World};
use common::{ListContext, eval, eval_in, run_ok, run_script};
use pretty_assertions::assert_eq;

/* ---------------- expressions ---------------- */

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(eval("2+3*4").unwrap(), Value::Int(14));
    assert_eq!(eval("(2+3)*4").unwrap(), Value::Int(20));
    assert_eq!(eval("2^10").unwrap(), Value::Int(1024));
    assert_eq!(eval("-2^2").unwrap(), Value::Int(-4));
    assert_eq!(eval("7 \\ 2").unwrap(), Value::Int(3));
    assert_eq!(eval("7 Mod 2").unwrap(), Value::Int(1));
    assert_eq!(eval("5/2").unwrap(), Value::Float(2.5));
    assert_eq!(eval("6/2").unwrap(), Value::Int(3));
}

#[test]
fn test_null_propagation() {
    assert_eq!(eval("1 + Z(0)").unwrap(), Value::Null);
    assert_eq!(eval("Z(0) = Z(0)").unwrap(), Value::Null);
    assert_eq!(eval("'a' & Z(0)").unwrap(), Value::str("a"));
    assert_eq!(eval("'a' # Z(0)").unwrap(), Value::Null);
    assert_eq!(eval("IsEmpty(Z(0))").unwrap(), Value::Bool(true));
}

#[test]
fn test_ternary_logic() {
    assert_eq!(eval("False And Z(0)").unwrap(), Value::Bool(false));
    assert_eq!(eval("True And Z(0)").unwrap(), Value::Null);
    assert_eq!(eval("Z(0) Or True").unwrap(), Value::Bool(true));
    assert_eq!(eval("Not Z(0)").unwrap(), Value::Null);
    assert_eq!(eval("True Xor True").unwrap(), Value::Bool(false));
}

#[test]
fn test_comparisons_are_case_blind() {
    assert_eq!(eval("'abc' = 'ABC'").unwrap(), Value::Bool(true));
    assert_eq!(eval("'abc' < 'ABD'").unwrap(), Value::Bool(true));
    assert_eq!(eval("1 < 2.5").unwrap(), Value::Bool(true));
}

#[test]
fn test_builtin_functions() {
    assert_eq!(eval("Abs(-5)").unwrap(), Value::Int(5));
    assert_eq!(eval("Len('hello')").unwrap(), Value::Int(5));
    assert_eq!(eval("Trim('  x ')").unwrap(), Value::str("x"));
    assert_eq!(eval("Chr(65)").unwrap(), Value::str("A"));
    assert_eq!(eval("Asc('A')").unwrap(), Value::Int(65));
    assert_eq!(eval("Val('42')").unwrap(), Value::Int(42));
    assert_eq!(eval("Val('x')").unwrap(), Value::Null);
    assert_eq!(eval("Min(3, 1, 2)").unwrap(), Value::Int(1));
    assert_eq!(eval("Max(3, 1, 2)").unwrap(), Value::Int(3));
    assert_eq!(eval("If(1 < 2, 'yes', 'no')").unwrap(), Value::str("yes"));
    assert_eq!(eval("If(1 > 2, 'yes')").unwrap(), Value::Null);
}

#[test]
fn test_readable_text_round_trips() {
    for value in [
        Value::Null,
        Value::Int(-17),
        Value::Bool(true),
        Value::Bool(false),
        Value::Float(2.5),
        Value::str("hello \"there\""),
    ] {
        let quoted = value.to_text(true);
        assert_eq!(eval(&quoted).unwrap(), value, "via {quoted}");
    }
}

/* ---------------- statements ---------------- */

#[test]
fn test_local_assignment() {
    let run = run_ok("Local x := 2+3*4\nA := x");
    assert_eq!(run.global("A"), Value::Int(14));
}

#[test]
fn test_local_reads_null_before_write() {
    let run = run_ok("Local q\nA := IsEmpty(q)");
    assert_eq!(run.global("A"), Value::Bool(true));
}

#[test]
fn test_subroutine_locals_do_not_leak() {
    let run = run_ok(
        "Local i = 1\n\
         Sub f\n\
         Local i\n\
         i := 2\n\
         EndSub\n\
         f\n\
         A := i",
    );
    assert_eq!(run.global("A"), Value::Int(1));
}

#[test]
fn test_if_false_never_executes() {
    let run = run_ok("If False Then Abort \"no\"\nA := 1");
    assert_eq!(run.global("A"), Value::Int(1));
}

#[test]
fn test_if_else_chain() {
    let run = run_ok(
        "A := 7\n\
         If A < 5\n\
         B := 'small'\n\
         Else If A < 10 Then\n\
         B := 'medium'\n\
         Else\n\
         B := 'large'\n\
         EndIf",
    );
    assert_eq!(run.global("B"), Value::str("medium"));
}

#[test]
fn test_do_loop_conditions() {
    // head condition false: zero iterations
    let run = run_ok("A := 0\nDo While False\nA := A + 1\nLoop");
    assert_eq!(run.global("A"), Value::Int(0));

    // tail condition: exactly one iteration
    let run = run_ok("A := 0\nDo\nA := A + 1\nLoop Until True");
    assert_eq!(run.global("A"), Value::Int(1));

    // break and continue
    let run = run_ok(
        "A := 0\n\
         B := 0\n\
         Do\n\
         A := A + 1\n\
         If A > 4 Then Break\n\
         If A Mod 2 = 0 Then Continue\n\
         B := B + 1\n\
         Loop",
    );
    assert_eq!(run.global("A"), Value::Int(5));
    assert_eq!(run.global("B"), Value::Int(3));
}

#[test]
fn test_for_loop_entry_cases() {
    // literal bounds, provably entered
    let run = run_ok("A := 0\nFor I := 1 To 4 Do A := A + I");
    assert_eq!(run.global("A"), Value::Int(10));

    // equal bounds: exactly once
    let run = run_ok("A := 0\nFor I := 3 To 3 Do A := A + 1");
    assert_eq!(run.global("A"), Value::Int(1));

    // variable end bound, zero iterations when start > end
    let run = run_ok("A := 0\nB := 0\nFor I := 3 To B Do A := A + 1");
    assert_eq!(run.global("A"), Value::Int(0));

    // variable end bound, normal counting
    let run = run_ok("A := 0\nB := 3\nFor I := 1 To B\nA := A + I\nNext");
    assert_eq!(run.global("A"), Value::Int(6));
}

#[test]
fn test_for_loop_break_restores_stack() {
    let run = run_ok(
        "A := 0\n\
         B := 5\n\
         For I := 1 To B\n\
         If I = 3 Then Break\n\
         A := A + I\n\
         Next",
    );
    assert_eq!(run.global("A"), Value::Int(3));
    assert_eq!(
        run.world.process_list().get(run.pid).unwrap().stack_depth(),
        0
    );
}

#[test]
fn test_select_case() {
    let source = |value: i32| {
        format!(
            "A := {value}\n\
             Select Case A\n\
             Case 1, 3, 5\n\
             B := 'odd'\n\
             Case Is > 10\n\
             B := 'big'\n\
             Case Else\n\
             B := 'other'\n\
             EndSelect"
        )
    };
    assert_eq!(run_ok(&source(3)).global("B"), Value::str("odd"));
    assert_eq!(run_ok(&source(11)).global("B"), Value::str("big"));
    assert_eq!(run_ok(&source(2)).global("B"), Value::str("other"));
}

#[test]
fn test_try_catches_abort() {
    let run = run_ok(
        "Try\n\
         Abort \"boom\"\n\
         Else\n\
         A := System.Err\n\
         EndTry",
    );
    assert_eq!(run.global("A"), Value::str("boom"));
}

#[test]
fn test_try_catches_runtime_error() {
    let run = run_ok("Try A := 1/0\nB := System.Err");
    assert_eq!(run.global("B"), Value::str("Divide by zero"));
    assert_eq!(run.global("A"), Value::Null);
}

#[test]
fn test_try_restores_stack_depth() {
    // the failing expression leaves temporaries; the handler drops them
    let run = run_ok(
        "Try\n\
         A := 1 + (2 * NoSuchVar)\n\
         Else\n\
         B := 1\n\
         EndTry",
    );
    assert_eq!(run.global("B"), Value::Int(1));
    assert_eq!(
        run.world.process_list().get(run.pid).unwrap().stack_depth(),
        0
    );
}

#[test]
fn test_uncaught_error_fails_process() {
    let run = run_script("A := NoSuchName");
    assert_eq!(run.state(), ProcessState::Failed);
    assert_eq!(run.error_message(), "Unknown identifier: NOSUCHNAME");
}

#[test]
fn test_subroutine_arguments() {
    let run = run_ok(
        "Sub Pick(a, Optional b)\n\
         If IsEmpty(b) Then b := -1\n\
         A := a\n\
         B := b\n\
         EndSub\n\
         Pick 4",
    );
    assert_eq!(run.global("A"), Value::Int(4));
    assert_eq!(run.global("B"), Value::Int(-1));
}

#[test]
fn test_varargs_collect_into_array() {
    let run = run_ok(
        "Sub Tally(first, rest())\n\
         A := first + rest(0) + rest(1)\n\
         EndSub\n\
         Tally 1, 2, 3",
    );
    assert_eq!(run.global("A"), Value::Int(6));
}

#[test]
fn test_function_return_value() {
    let run = run_ok(
        "Function Twice(n)\n\
         Return 2 * n\n\
         EndFunction\n\
         A := Twice(21)",
    );
    assert_eq!(run.global("A"), Value::Int(42));
}

#[test]
fn test_function_without_return_yields_null() {
    let run = run_ok(
        "Function Nothing()\n\
         EndFunction\n\
         A := IsEmpty(Nothing())",
    );
    assert_eq!(run.global("A"), Value::Bool(true));
}

#[test]
fn test_argument_count_errors() {
    let run = run_script("Sub One(a)\nEndSub\nOne 1, 2");
    assert_eq!(run.state(), ProcessState::Failed);
    assert_eq!(run.error_message(), "Too many arguments to \"ONE\"");
}

/* ---------------- ambiguous statements ---------------- */

#[test]
fn test_single_word_statement_calls_procedure() {
    let run = run_ok("Sub Hi\nA := 5\nEndSub\nHi");
    assert_eq!(run.global("A"), Value::Int(5));
}

#[test]
fn test_runtime_switch_picks_procedure() {
    let run = run_ok(
        "Sub Bump(n)\n\
         A := A + n\n\
         EndSub\n\
         A := 1\n\
         Bump +2",
    );
    assert_eq!(run.global("A"), Value::Int(3));
}

#[test]
fn test_runtime_switch_picks_expression() {
    // `arr (2)` compiles as both call and subscript; arr holds an array,
    // not a procedure, so the statement runs as an expression
    let run = run_ok("Dim arr(5)\narr (2)");
    assert_eq!(run.state(), ProcessState::Ended);
}

#[test]
fn test_call_statement() {
    let run = run_ok(
        "Sub Store(n)\n\
         A := n\n\
         EndSub\n\
         Call Store, 9",
    );
    assert_eq!(run.global("A"), Value::Int(9));
}

/* ---------------- data structures ---------------- */

#[test]
fn test_arrays() {
    let run = run_ok(
        "Dim arr(3) As Integer\n\
         arr(0) := 5\n\
         A := arr(0) + arr(2)",
    );
    assert_eq!(run.global("A"), Value::Int(5));
}

#[test]
fn test_array_out_of_range_fails() {
    let run = run_script("Dim arr(2)\narr(5) := 1");
    assert_eq!(run.state(), ProcessState::Failed);
    assert_eq!(run.error_message(), "Range error");
}

#[test]
fn test_redim_preserves_values() {
    let run = run_ok(
        "Dim arr(2)\n\
         arr(1) := 9\n\
         ReDim arr(5)\n\
         A := arr(1)\n\
         B := IsEmpty(arr(4))",
    );
    assert_eq!(run.global("A"), Value::Int(9));
    assert_eq!(run.global("B"), Value::Bool(true));
}

#[test]
fn test_hashes() {
    let run = run_ok(
        "Dim h As Hash\n\
         h('k') := 3\n\
         A := h('k')\n\
         B := IsEmpty(h('missing'))",
    );
    assert_eq!(run.global("A"), Value::Int(3));
    assert_eq!(run.global("B"), Value::Bool(true));
}

#[test]
fn test_structs() {
    let run = run_ok(
        "Struct Pair\n\
         First, Second := 2\n\
         EndStruct\n\
         Dim p As Pair\n\
         p->First := 1\n\
         With p Do Second := Second + 40\n\
         A := p->First + p->Second",
    );
    assert_eq!(run.global("A"), Value::Int(43));
}

#[test]
fn test_multidim_array_with_type() {
    let run = run_ok(
        "Dim m(2, 3) As String\n\
         A := m(1, 2)\n\
         m(1, 2) := 'x'\n\
         B := m(1, 2) & m(0, 0)",
    );
    assert_eq!(run.global("A"), Value::str(""));
    assert_eq!(run.global("B"), Value::str("x"));
}

/* ---------------- host contexts ---------------- */

#[test]
fn test_foreach_named_counts_objects() {
    let sink = altair::CollectStringPrint::new();
    let mut world = World::with_console(Box::new(sink));
    let (value, _ids) = ListContext::new_value(vec![10, 20, 30]);
    world.set_new_global_value("PLANET", value);

    let pid = common::start_script(
        &mut world,
        "A := 0\nForEach Planet As p Do A := A + 1",
    );
    world.run();
    assert_eq!(
        world.process_list().get(pid).unwrap().state(),
        ProcessState::Ended
    );
    assert_eq!(world.get_global_value("A"), Value::Int(3));
}

#[test]
fn test_foreach_unnamed_sees_properties() {
    let mut world = World::with_console(Box::new(altair::CollectStringPrint::new()));
    let (value, _ids) = ListContext::new_value(vec![10, 20, 30]);
    world.set_new_global_value("PLANET", value);

    let pid = common::start_script(&mut world, "A := 0\nForEach Planet Do A := A + ID");
    world.run();
    assert_eq!(
        world.process_list().get(pid).unwrap().state(),
        ProcessState::Ended
    );
    assert_eq!(world.get_global_value("A"), Value::Int(60));
}

#[test]
fn test_foreach_empty_set_runs_zero_times() {
    let mut world = World::with_console(Box::new(altair::CollectStringPrint::new()));
    let (value, _ids) = ListContext::new_value(vec![]);
    world.set_new_global_value("PLANET", value);

    let pid = common::start_script(&mut world, "A := 0\nForEach Planet Do A := A + 1");
    world.run();
    assert_eq!(
        world.process_list().get(pid).unwrap().state(),
        ProcessState::Ended
    );
    assert_eq!(world.get_global_value("A"), Value::Int(0));
}

#[test]
fn test_with_writes_through_context() {
    let mut world = World::with_console(Box::new(altair::CollectStringPrint::new()));
    let (value, ids) = ListContext::new_value(vec![1]);
    world.set_new_global_value("PLANET", value);

    let pid = common::start_script(&mut world, "With Planet Do ID := 77");
    world.run();
    assert_eq!(
        world.process_list().get(pid).unwrap().state(),
        ProcessState::Ended
    );
    assert_eq!(ids.borrow()[0], 77);
}

/* ---------------- printing ---------------- */

#[test]
fn test_print_concatenates_and_skips_null() {
    let run = run_ok("Print 'x', Z(0), 42");
    assert_eq!(*run.output.borrow(), ["x42"]);
}

#[test]
fn test_print_all_null_prints_nothing() {
    let run = run_ok("Print Z(0)");
    assert!(run.output.borrow().is_empty());
}

/* ---------------- eval, hooks, keymaps, locks ---------------- */

#[test]
fn test_eval_statement() {
    let run = run_ok("Eval \"A := 7\"");
    assert_eq!(run.global("A"), Value::Int(7));
}

#[test]
fn test_eval_multiline() {
    let run = run_ok("A := 7\nEval \"If A = 7\", \"A := 8\", \"EndIf\"");
    assert_eq!(run.global("A"), Value::Int(8));
}

#[test]
fn test_hooks_run_in_registration_order() {
    let run = run_ok(
        "A := ''\n\
         On Setup Do A := A & 'x'\n\
         On Setup Do A := A & 'y'\n\
         RunHook Setup\n\
         RunHook ByName('SET' & 'UP')",
    );
    assert_eq!(run.global("A"), Value::str("xyxy"));
}

#[test]
fn test_keymaps_bind_and_inherit() {
    let run = run_ok(
        "CreateKeymap Base\n\
         CreateKeymap Derived(Base)\n\
         Bind Base 'q' := 'CmdQ'\n\
         Bind Derived 'w' := 'CmdW'",
    );
    let keymaps = run.world.keymaps();
    let derived = keymaps.lookup("DERIVED").unwrap();
    let q = altair::parse_key("q").unwrap();
    let command = keymaps.lookup_command(derived, q).unwrap();
    assert_eq!(run.world.atom_table().get_by_id(command), "CmdQ");
}

#[test]
fn test_locks() {
    let run = run_ok("Lock 'Target', 'editing'\nA := GetLockInfo('Target')");
    assert_eq!(run.global("A"), Value::str("editing"));
    // the lock dies with its process
    let mut run = run;
    run.world.remove_terminated_processes();
    assert_eq!(run.world.mutex_list().info("TARGET"), None);
}

#[test]
fn test_local_subs_option() {
    let run = run_ok(
        "Option LocalSubs(1)\n\
         Local Sub Inner\n\
         A := 42\n\
         EndSub\n\
         Inner",
    );
    assert_eq!(run.global("A"), Value::Int(42));
}

#[test]
fn test_load_runs_file() {
    let dir = std::env::temp_dir().join(format!("altair-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("lib.q"), "A := 123\n").unwrap();

    let mut world = World::with_console(Box::new(altair::CollectStringPrint::new()));
    world.set_local_load_directory(Some(dir.clone()));
    let pid = common::start_script(&mut world, "Load 'lib.q'\nB := A + 1");
    world.run();
    assert_eq!(
        world.process_list().get(pid).unwrap().state(),
        ProcessState::Ended
    );
    assert_eq!(world.get_global_value("B"), Value::Int(124));

    // TryLoad swallows only file-not-found
    let pid = common::start_script(&mut world, "TryLoad 'missing.q'\nC := 1");
    world.run();
    assert_eq!(
        world.process_list().get(pid).unwrap().state(),
        ProcessState::Ended
    );
    assert_eq!(world.get_global_value("C"), Value::Int(1));

    let pid = common::start_script(&mut world, "Load 'missing.q'");
    world.run();
    assert_eq!(
        world.process_list().get(pid).unwrap().state(),
        ProcessState::Failed
    );

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_atoms_in_expressions() {
    let mut world = World::with_console(Box::new(altair::CollectStringPrint::new()));
    let id = eval_in(&mut world, "Atom('CMD')").unwrap();
    let Value::Int(id) = id else { panic!() };
    assert_eq!(
        eval_in(&mut world, &format!("AtomStr({id})")).unwrap(),
        Value::str("CMD")
    );
}
