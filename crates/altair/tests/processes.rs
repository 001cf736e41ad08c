//! Process life cycle and scheduler tests.

mod common;

use std::{cell::RefCell, rc::Rc};

use altair::{
    CollectStringPrint, ProcessGroupId, ProcessState, Value, World,
};
use common::{run_script, start_script};
use pretty_assertions::assert_eq;

#[test]
fn test_end_statement_terminates() {
    let run = run_script("A := 1\nEnd\nA := 2");
    assert_eq!(run.state(), ProcessState::Terminated);
    assert_eq!(run.global("A"), Value::Int(1));
}

#[test]
fn test_stop_suspends_and_resumes() {
    let mut run = run_script("A := 1\nStop\nA := 2");
    assert_eq!(run.state(), ProcessState::Suspended);
    assert_eq!(run.global("A"), Value::Int(1));

    // Suspended -> Runnable -> Running -> Ended
    run.resume();
    assert_eq!(run.state(), ProcessState::Ended);
    assert_eq!(run.global("A"), Value::Int(2));
}

#[test]
fn test_group_signal_fires_exactly_once() {
    let mut world = World::with_console(Box::new(CollectStringPrint::new()));
    let events: Rc<RefCell<Vec<(ProcessGroupId, ProcessState)>>> =
        Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    world
        .process_list_mut()
        .on_process_group_finish(Box::new(move |group, state| {
            sink.borrow_mut().push((group, state));
        }));

    let first = world
        .compile_file("a.q", b"A := A + 1", "test", 1)
        .unwrap();
    let second = world
        .compile_file("b.q", b"A := A + 10", "test", 1)
        .unwrap();
    world.set_new_global_value("A", Value::Int(0));

    let group = world.process_list_mut().allocate_process_group();
    let mut principal = None;
    for bco in [first, second] {
        let pid = world.process_list_mut().create_process("member", 50);
        principal.get_or_insert(pid);
        world
            .process_list_mut()
            .get_mut(pid)
            .unwrap()
            .push_frame(bco, false);
        world.process_list_mut().resume_process(pid, group).unwrap();
    }
    world.process_list_mut().start_process_group(group);
    world.run();

    assert_eq!(world.get_global_value("A"), Value::Int(11));
    assert_eq!(*events.borrow(), [(group, ProcessState::Ended)]);

    // an idle second run must not fire the signal again
    world.run();
    assert_eq!(events.borrow().len(), 1);
}

#[test]
fn test_priority_orders_execution() {
    let mut world = World::with_console(Box::new(CollectStringPrint::new()));
    world.set_new_global_value("A", Value::str(""));

    let late = world
        .compile_file("late.q", b"A := A & 'late '", "test", 1)
        .unwrap();
    let early = world
        .compile_file("early.q", b"A := A & 'early '", "test", 1)
        .unwrap();

    let group = world.process_list_mut().allocate_process_group();
    let late_pid = world.process_list_mut().create_process("late", 90);
    let early_pid = world.process_list_mut().create_process("early", 10);
    world
        .process_list_mut()
        .get_mut(late_pid)
        .unwrap()
        .push_frame(late, false);
    world
        .process_list_mut()
        .get_mut(early_pid)
        .unwrap()
        .push_frame(early, false);
    world
        .process_list_mut()
        .resume_process(late_pid, group)
        .unwrap();
    world
        .process_list_mut()
        .resume_process(early_pid, group)
        .unwrap();
    world.process_list_mut().start_process_group(group);
    world.run();

    assert_eq!(world.get_global_value("A"), Value::str("early late "));
}

#[test]
fn test_continue_with_failure_raises_at_suspension_point() {
    let mut world = World::with_console(Box::new(CollectStringPrint::new()));
    let pid = start_script(
        &mut world,
        "Try\nStop\nA := 'resumed'\nElse\nA := System.Err\nEndTry",
    );
    world.run();
    assert_eq!(
        world.process_list().get(pid).unwrap().state(),
        ProcessState::Suspended
    );

    world
        .process_list_mut()
        .continue_process_with_failure(pid, altair::Error::new("cancelled"))
        .unwrap();
    world.run();
    assert_eq!(
        world.process_list().get(pid).unwrap().state(),
        ProcessState::Ended
    );
    assert_eq!(world.get_global_value("A"), Value::str("cancelled"));
}

#[test]
fn test_failed_process_is_kept_for_inspection() {
    let mut world = World::with_console(Box::new(CollectStringPrint::new()));
    let pid = start_script(&mut world, "Abort 'goodbye'");
    let group = world.process_list().get(pid).unwrap().group().unwrap();
    world.process_list_mut().add_group_wait(group);
    world.run();

    assert_eq!(
        world.process_list().get(pid).unwrap().state(),
        ProcessState::Failed
    );
    world.remove_terminated_processes();
    assert!(world.process_list().get(pid).is_some());

    world.process_list_mut().remove_group_wait(group);
    world.remove_terminated_processes();
    assert!(world.process_list().get(pid).is_none());
}

#[test]
fn test_finalizer_runs_once_and_errors_are_logged() {
    let sink = CollectStringPrint::new();
    let trace = sink.trace();
    let mut world = World::with_console(Box::new(sink));
    let pid = start_script(&mut world, "A := 1");
    let ran: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&ran);
    world
        .process_list_mut()
        .get_mut(pid)
        .unwrap()
        .set_finalizer(Box::new(move |_process| {
            *counter.borrow_mut() += 1;
            Err(altair::Error::new("finalizer hiccup"))
        }));
    world.run();
    world.run();

    assert_eq!(*ran.borrow(), 1);
    assert!(
        trace
            .borrow()
            .iter()
            .any(|line| line.contains("finalizer hiccup"))
    );
}

#[test]
fn test_failed_process_error_is_logged_with_trace() {
    let sink = CollectStringPrint::new();
    let trace = sink.trace();
    let mut world = World::with_console(Box::new(sink));
    start_script(&mut world, "Sub Inner\nAbort 'deep'\nEndSub\nInner");
    world.run();

    let trace = trace.borrow();
    let message = trace.join("\n");
    assert!(message.contains("deep"), "log: {message}");
    assert!(message.contains("INNER"), "log: {message}");
    assert!(message.contains("test.q"), "log: {message}");
}

#[test]
fn test_detached_process_completes_alone() {
    let mut world = World::with_console(Box::new(CollectStringPrint::new()));
    let events: Rc<RefCell<Vec<ProcessGroupId>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    world
        .process_list_mut()
        .on_process_group_finish(Box::new(move |group, _state| {
            sink.borrow_mut().push(group);
        }));

    let pid = start_script(&mut world, "A := 1");
    let fresh = world.process_list_mut().detach_process(pid).unwrap();
    world.run();

    assert_eq!(*events.borrow(), [fresh]);
    assert_eq!(world.get_global_value("A"), Value::Int(1));
}
