//! Shared fixtures for the integration tests.
#![allow(dead_code, reason = "each test binary uses a subset")]

use std::{cell::RefCell, rc::Rc};

use altair::{
    CollectStringPrint, Context, ContextValue, Error, ProcessId, ProcessState, PropertyAcceptor,
    Value, World,
};

/// A finished (or suspended) script run.
pub struct Run {
    pub world: World,
    pub pid: ProcessId,
    pub output: Rc<RefCell<Vec<String>>>,
}

impl Run {
    pub fn state(&self) -> ProcessState {
        self.world.process_list().get(self.pid).unwrap().state()
    }

    pub fn error_message(&self) -> String {
        self.world
            .process_list()
            .get(self.pid)
            .unwrap()
            .error()
            .map(|e| e.message().to_owned())
            .unwrap_or_default()
    }

    pub fn global(&self, name: &str) -> Value {
        self.world.get_global_value(name)
    }

    /// Continues a stopped process and runs the scheduler again.
    pub fn resume(&mut self) {
        self.world
            .process_list_mut()
            .continue_process(self.pid)
            .unwrap();
        self.world.run();
    }
}

/// Compiles and runs a script in a fresh world.
pub fn run_script(source: &str) -> Run {
    let sink = CollectStringPrint::new();
    let output = sink.output();
    let mut world = World::with_console(Box::new(sink));
    let pid = start_script(&mut world, source);
    world.run();
    Run { world, pid, output }
}

/// Compiles a script and schedules it in an existing world.
pub fn start_script(world: &mut World, source: &str) -> ProcessId {
    let bco = world
        .compile_file("test.q", source.as_bytes(), "test", 1)
        .expect("script should compile");
    let pid = world.process_list_mut().create_process("test", 50);
    let group = world.process_list_mut().allocate_process_group();
    world
        .process_list_mut()
        .get_mut(pid)
        .unwrap()
        .push_frame(bco, false);
    world.process_list_mut().resume_process(pid, group).unwrap();
    world.process_list_mut().start_process_group(group);
    pid
}

/// Runs a script and asserts it ended cleanly.
pub fn run_ok(source: &str) -> Run {
    let run = run_script(source);
    assert_eq!(
        run.state(),
        ProcessState::Ended,
        "script failed: {}",
        run.error_message()
    );
    run
}

/// Evaluates a single expression in a fresh world.
pub fn eval(expr: &str) -> Result<Value, Error> {
    let mut world = World::with_console(Box::new(CollectStringPrint::new()));
    eval_in(&mut world, expr)
}

/// Evaluates a single expression in an existing world.
pub fn eval_in(world: &mut World, expr: &str) -> Result<Value, Error> {
    let (bco, has_result) = world.compile_command(expr, true)?;
    assert!(has_result, "not an expression: {expr}");
    let pid = world.process_list_mut().create_process("expr", 50);
    let group = world.process_list_mut().allocate_process_group();
    world
        .process_list_mut()
        .get_mut(pid)
        .unwrap()
        .push_frame(bco, true);
    world.process_list_mut().resume_process(pid, group).unwrap();
    world.process_list_mut().start_process_group(group);
    world.run();
    let process = world.process_list().get(pid).unwrap();
    match process.state() {
        ProcessState::Ended => Ok(process.result().cloned().unwrap_or(Value::Null)),
        ProcessState::Failed => Err(process.error().cloned().unwrap()),
        other => panic!("unexpected state {other:?}"),
    }
}

/// An iterable host context over a shared list of ids, exposing a
/// writable `ID` property. Stands in for the game's object lists.
pub struct ListContext {
    ids: Rc<RefCell<Vec<i32>>>,
    position: usize,
}

impl ListContext {
    pub fn new_value(ids: Vec<i32>) -> (Value, Rc<RefCell<Vec<i32>>>) {
        let ids = Rc::new(RefCell::new(ids));
        let context = Self {
            ids: Rc::clone(&ids),
            position: 0,
        };
        (Value::Context(Rc::new(RefCell::new(context))), ids)
    }
}

impl Context for ListContext {
    fn lookup(&mut self, name: &str) -> Option<usize> {
        (name == "ID").then_some(0)
    }

    fn get(&mut self, _index: usize) -> Result<Value, Error> {
        Ok(self
            .ids
            .borrow()
            .get(self.position)
            .copied()
            .map_or(Value::Null, Value::Int))
    }

    fn set(&mut self, _index: usize, value: Value) -> Result<(), Error> {
        let Value::Int(id) = value else {
            return Err(Error::type_error());
        };
        let mut ids = self.ids.borrow_mut();
        let position = self.position;
        *ids.get_mut(position).ok_or_else(Error::range_error)? = id;
        Ok(())
    }

    fn next(&mut self) -> bool {
        if self.position + 1 < self.ids.borrow().len() {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn clone_context(&self) -> ContextValue {
        Rc::new(RefCell::new(Self {
            ids: Rc::clone(&self.ids),
            position: self.position,
        }))
    }

    fn enum_properties(&self, acceptor: &mut dyn PropertyAcceptor) {
        acceptor.add_property("ID");
    }

    fn context_text(&self, _readable: bool) -> String {
        "#<list>".to_owned()
    }

    fn first_context(&self) -> Result<Option<ContextValue>, Error> {
        if self.ids.borrow().is_empty() {
            Ok(None)
        } else {
            Ok(Some(Rc::new(RefCell::new(Self {
                ids: Rc::clone(&self.ids),
                position: 0,
            }))))
        }
    }
}
