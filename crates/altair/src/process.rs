//! Processes, frames, and the interpreter loop.
//!
//! A process is a script-level thread of control: a frame stack, an
//! operand stack, a state, and the static variables that survive across
//! its calls. The interpreter is a plain state machine; the scheduler
//! resumes a process by calling [`Process::run`], which steps the VM
//! until the process leaves the `Running` state.
//!
//! Exceptions are VM-level unwinding: a raised error walks the catch
//! records installed by `Try`, restoring the recorded operand-stack and
//! context-stack depths, and fails the process when no handler remains.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    context::{ContextValue, context_for_value},
    error::Error,
    names::{NameMap, Segment},
    opcode::{
        BinaryOp, IM_CALL, IM_LOAD, IM_OP_MASK, IM_POP, IM_REFUSE_FUNCTIONS, IM_STORE,
        Instruction, JUMP_ALWAYS, JUMP_CATCH, JUMP_IF_EMPTY, JUMP_IF_FALSE, JUMP_IF_TRUE,
        JUMP_POP_ALWAYS, JUMP_SYMBOLIC, Major, Scope, SpecialOp, StackOp, TernaryOp, UnaryOp,
    },
    ops,
    process_list::{ProcessGroupId, ProcessId},
    types::{ArrayValue, HashValue, StructureValue},
    value::{BcoRef, CallableValue, Value},
    world::{GlobalStore, World},
};

/// Life-cycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Created or stopped; waiting for the host to resume it.
    Suspended,
    /// Long-term suspended (kept across save/restore).
    Frozen,
    /// Eligible for scheduling.
    Runnable,
    /// Currently executing. At most one process is in this state.
    Running,
    /// Waiting for an external continuation.
    Waiting,
    /// Finished normally; the result is on top of the stack.
    Ended,
    /// Finished with an uncaught error.
    Failed,
    /// Killed by the `End` statement or the host.
    Terminated,
}

impl ProcessState {
    /// True for states a process never leaves by itself.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Failed | Self::Terminated)
    }
}

/// A catch record installed by `Try`.
#[derive(Debug, Clone, Copy)]
struct CatchHandler {
    target: u16,
    symbolic: bool,
    stack_depth: usize,
    context_depth: usize,
}

/// Activation record of one callable.
pub struct Frame {
    bco: BcoRef,
    ip: usize,
    local_names: NameMap,
    locals: Segment,
    context_stack: SmallVec<[ContextValue; 4]>,
    catches: SmallVec<[CatchHandler; 2]>,
    base_sp: usize,
    wants_result: bool,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("bco", &self.bco)
            .field("ip", &self.ip)
            .field("local_names", &self.local_names)
            .field("locals", &self.locals)
            .field("context_stack_len", &self.context_stack.len())
            .field("catches", &self.catches)
            .field("base_sp", &self.base_sp)
            .field("wants_result", &self.wants_result)
            .finish()
    }
}

impl Frame {
    fn new(bco: BcoRef, base_sp: usize, wants_result: bool) -> Self {
        let local_names = bco.local_variables().clone();
        let locals = Segment::with_size(local_names.len());
        Self {
            bco,
            ip: 0,
            local_names,
            locals,
            context_stack: SmallVec::new(),
            catches: SmallVec::new(),
            base_sp,
            wants_result,
        }
    }
}

/// Environment handed to builtin callables.
pub struct BuiltinEnv<'a> {
    /// The world.
    pub world: &'a mut World,
    /// Id of the calling process.
    pub process_id: ProcessId,
    requested_state: Option<ProcessState>,
}

impl BuiltinEnv<'_> {
    /// Requests suspension until the host continues the process; used by
    /// builtins that post a UI action and must wait for its result.
    pub fn suspend_for_ui(&mut self) {
        self.requested_state = Some(ProcessState::Waiting);
    }
}

/// Finalizer closure invoked once when the process reaches a terminal
/// state. Errors are logged, never propagated.
pub type Finalizer = Box<dyn FnOnce(&Process) -> Result<(), Error>>;

/// A script-level thread of control.
pub struct Process {
    name: String,
    process_id: ProcessId,
    priority: i32,
    group: Option<ProcessGroupId>,
    state: ProcessState,

    frames: Vec<Frame>,
    stack: Vec<Value>,
    statics: GlobalStore,
    base_contexts: Vec<ContextValue>,

    error: Option<Error>,
    pending_error: Option<Error>,
    finalizer: Option<Finalizer>,
}

impl Process {
    /// Creates a process in `Suspended` state.
    #[must_use]
    pub fn new(name: impl Into<String>, process_id: ProcessId, priority: i32) -> Self {
        Self {
            name: name.into(),
            process_id,
            priority,
            group: None,
            state: ProcessState::Suspended,
            frames: Vec::new(),
            stack: Vec::new(),
            statics: GlobalStore::default(),
            base_contexts: Vec::new(),
            error: None,
            pending_error: None,
            finalizer: None,
        }
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process id.
    #[must_use]
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Scheduling priority; smaller runs earlier.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Changes the priority; takes effect at the next scheduling
    /// decision.
    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    /// The process group, once assigned.
    #[must_use]
    pub fn group(&self) -> Option<ProcessGroupId> {
        self.group
    }

    pub(crate) fn set_group(&mut self, group: ProcessGroupId) {
        self.group = Some(group);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    /// The uncaught error of a `Failed` process.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// The result of an `Ended` process: the top of its operand stack.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.stack.last()
    }

    /// Installs the finalizer.
    pub fn set_finalizer(&mut self, finalizer: Finalizer) {
        self.finalizer = Some(finalizer);
    }

    pub(crate) fn take_finalizer(&mut self) -> Option<Finalizer> {
        self.finalizer.take()
    }

    pub(crate) fn set_pending_error(&mut self, error: Error) {
        self.pending_error = Some(error);
    }

    /// Adds an object context consulted by name lookup after the frame
    /// scopes. Set up by the host at creation time.
    pub fn push_base_context(&mut self, context: ContextValue) {
        self.base_contexts.push(context);
    }

    /// Pushes a frame executing `bco`. `wants_result` keeps the frame's
    /// produced value on the stack when it returns.
    pub fn push_frame(&mut self, bco: BcoRef, wants_result: bool) {
        self.frames
            .push(Frame::new(bco, self.stack.len(), wants_result));
    }

    /// Number of live frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Current operand-stack depth; useful for balance checks.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Runs the process until it leaves the `Running` state.
    pub fn run(&mut self, world: &mut World) {
        self.state = ProcessState::Running;
        if let Some(error) = self.pending_error.take() {
            // failure injected at the suspension point
            self.handle_error(error);
        }
        while self.state == ProcessState::Running {
            if let Err(error) = self.step(world) {
                self.handle_error(error);
            }
        }
    }

    /// Executes a single instruction.
    fn step(&mut self, world: &mut World) -> Result<(), Error> {
        let Some(frame) = self.frames.last_mut() else {
            self.state = ProcessState::Ended;
            return Ok(());
        };
        let bco = Rc::clone(&frame.bco);
        let ip = frame.ip;
        if ip >= bco.instructions().len() {
            // running off the end is an implicit return
            let result = if frame.wants_result && self.stack.len() > frame.base_sp {
                self.stack.pop()
            } else {
                None
            };
            self.return_from_frame(result);
            return Ok(());
        }
        frame.ip = ip + 1;
        let insn = bco.instructions()[ip];

        match insn.major {
            Major::Push => self.execute_push(world, &bco, insn),
            Major::Pop | Major::Store => self.execute_store(world, &bco, insn),
            Major::Stack => self.execute_stack(insn),
            Major::Unary => {
                let op = UnaryOp::from_repr(insn.minor)
                    .ok_or_else(|| Error::internal("bad unary opcode"))?;
                let value = self.pop()?;
                let result = ops::execute_unary(world, op, value)?;
                self.stack.push(result);
                Ok(())
            }
            Major::Binary => {
                let op = BinaryOp::from_repr(insn.minor)
                    .ok_or_else(|| Error::internal("bad binary opcode"))?;
                let b = self.pop()?;
                let a = self.pop()?;
                let result = ops::execute_binary(world, op, a, b)?;
                self.stack.push(result);
                Ok(())
            }
            Major::Ternary => {
                let op = TernaryOp::from_repr(insn.minor)
                    .ok_or_else(|| Error::internal("bad ternary opcode"))?;
                let c = self.pop()?;
                let b = self.pop()?;
                let a = self.pop()?;
                let result = ops::execute_ternary(world, op, a, b, c)?;
                self.stack.push(result);
                Ok(())
            }
            Major::Jump => self.execute_jump(&bco, insn),
            Major::Indirect => self.execute_indirect(world, insn),
            Major::Memref => self.execute_memref(&bco, insn),
            Major::Dim => self.execute_dim(world, &bco, insn),
            Major::Special => self.execute_special(world, &bco, insn),
        }
    }

    fn execute_push(
        &mut self,
        world: &mut World,
        bco: &BcoRef,
        insn: Instruction,
    ) -> Result<(), Error> {
        let scope =
            Scope::from_repr(insn.minor).ok_or_else(|| Error::internal("bad push scope"))?;
        let value = match scope {
            Scope::Local => self.frame()?.locals.get(usize::from(insn.arg)),
            Scope::Static => self.statics.values.get(usize::from(insn.arg)),
            Scope::Shared => world.globals_store().borrow().values.get(usize::from(insn.arg)),
            Scope::NamedShared => {
                let name = pool_name(bco, insn.arg)?;
                let globals = world.globals_store().borrow();
                let index = globals
                    .names
                    .get_index_by_name(name)
                    .ok_or_else(|| Error::unknown_identifier(name))?;
                globals.values.get(index)
            }
            Scope::NamedVariable => {
                let name = pool_name(bco, insn.arg)?;
                self.lookup_name(world, name)?
                    .ok_or_else(|| Error::unknown_identifier(name))?
            }
            Scope::Literal => bco
                .literal(insn.arg)
                .ok_or_else(|| Error::internal("bad literal index"))?
                .clone(),
            Scope::Integer => Value::Int(i32::from(insn.arg as i16)),
            Scope::Boolean => {
                if insn.arg == 0xFFFF {
                    Value::Null
                } else {
                    Value::Bool(insn.arg != 0)
                }
            }
        };
        self.stack.push(value);
        Ok(())
    }

    fn execute_store(
        &mut self,
        world: &mut World,
        bco: &BcoRef,
        insn: Instruction,
    ) -> Result<(), Error> {
        let value = if insn.major == Major::Pop {
            self.pop()?
        } else {
            self.peek()?.clone()
        };
        let value = value.store_copy();
        let scope =
            Scope::from_repr(insn.minor).ok_or_else(|| Error::internal("bad store scope"))?;
        match scope {
            Scope::Local => {
                self.frame_mut()?.locals.set(usize::from(insn.arg), value);
            }
            Scope::Static => self.statics.values.set(usize::from(insn.arg), value),
            Scope::Shared => world
                .globals_store()
                .borrow_mut()
                .values
                .set(usize::from(insn.arg), value),
            Scope::NamedShared => {
                let name = pool_name(bco, insn.arg)?;
                world.set_new_global_value(name, value);
            }
            Scope::NamedVariable => {
                let name = pool_name(bco, insn.arg)?;
                if !self.set_name(world, name, value)? {
                    return Err(Error::unknown_identifier(name));
                }
            }
            Scope::Literal | Scope::Integer | Scope::Boolean => {
                return Err(Error::internal("store into immediate"));
            }
        }
        Ok(())
    }

    fn execute_stack(&mut self, insn: Instruction) -> Result<(), Error> {
        let op =
            StackOp::from_repr(insn.minor).ok_or_else(|| Error::internal("bad stack opcode"))?;
        match op {
            StackOp::Dup => {
                let depth = usize::from(insn.arg);
                let index = self
                    .stack
                    .len()
                    .checked_sub(depth + 1)
                    .ok_or_else(|| Error::internal("stack underflow"))?;
                self.stack.push(self.stack[index].clone());
                Ok(())
            }
            StackOp::Drop => {
                let count = usize::from(insn.arg);
                if self.stack.len() < count {
                    return Err(Error::internal("stack underflow"));
                }
                self.stack.truncate(self.stack.len() - count);
                Ok(())
            }
            StackOp::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(Error::internal("stack underflow"));
                }
                self.stack.swap(len - 1, len - 2);
                Ok(())
            }
        }
    }

    fn execute_jump(&mut self, bco: &BcoRef, insn: Instruction) -> Result<(), Error> {
        if insn.is_label() {
            return Ok(());
        }
        if insn.minor & JUMP_CATCH != 0 {
            let stack_depth = self.stack.len();
            let frame = self.frame_mut()?;
            let handler = CatchHandler {
                target: insn.arg,
                symbolic: insn.minor & JUMP_SYMBOLIC != 0,
                stack_depth,
                context_depth: frame.context_stack.len(),
            };
            frame.catches.push(handler);
            return Ok(());
        }

        let taken = if insn.minor & JUMP_ALWAYS == JUMP_ALWAYS {
            true
        } else {
            let value = self.peek()?;
            let flag = match value.truth() {
                None => JUMP_IF_EMPTY,
                Some(true) => JUMP_IF_TRUE,
                Some(false) => JUMP_IF_FALSE,
            };
            if insn.minor & JUMP_POP_ALWAYS != 0 {
                self.stack.pop();
            }
            insn.minor & flag != 0
        };

        if taken {
            let target = if insn.minor & JUMP_SYMBOLIC != 0 {
                bco.find_label(insn.arg)
                    .ok_or_else(|| Error::internal("unresolved jump target"))?
            } else {
                usize::from(insn.arg)
            };
            self.frame_mut()?.ip = target;
        }
        Ok(())
    }

    fn execute_indirect(&mut self, world: &mut World, insn: Instruction) -> Result<(), Error> {
        let op = insn.minor & IM_OP_MASK;
        let argc = usize::from(insn.arg);
        match op {
            IM_CALL | IM_LOAD => {
                let callable = self.pop()?;
                let args = self.pop_args(argc)?;
                self.call_callable(
                    world,
                    callable,
                    args,
                    op == IM_LOAD,
                    insn.minor & IM_REFUSE_FUNCTIONS != 0,
                )
            }
            IM_STORE | IM_POP => {
                let callable = self.pop()?;
                let value = self.pop()?;
                let args = self.pop_args(argc)?;
                match callable {
                    Value::Callable(CallableValue::Array(array)) => {
                        let indexes = int_indexes(&args)?
                            .ok_or_else(Error::range_error)?;
                        array.borrow_mut().set(&indexes, value.store_copy())?;
                    }
                    Value::Callable(CallableValue::Hash(hash)) => {
                        let key = hash_key(&args)?.ok_or_else(Error::range_error)?;
                        hash.borrow_mut().set(&key, value.store_copy());
                    }
                    _ => return Err(Error::not_assignable()),
                }
                if op == IM_STORE {
                    self.stack.push(value);
                }
                Ok(())
            }
            _ => Err(Error::internal("bad indirect opcode")),
        }
    }

    fn execute_memref(&mut self, bco: &BcoRef, insn: Instruction) -> Result<(), Error> {
        let op = insn.minor & IM_OP_MASK;
        let name = pool_name(bco, insn.arg)?.to_owned();
        match op {
            IM_LOAD => {
                let object = self.pop()?;
                let value = match object {
                    Value::Null => Value::Null,
                    Value::Context(ctx) => {
                        let mut ctx = ctx.borrow_mut();
                        let index = ctx
                            .lookup(&name)
                            .ok_or_else(|| Error::unknown_identifier(&name))?;
                        ctx.get(index)?
                    }
                    Value::Struct(s) => s.borrow().get(&name)?,
                    _ => return Err(Error::type_error()),
                };
                self.stack.push(value);
                Ok(())
            }
            IM_STORE | IM_POP => {
                let object = self.pop()?;
                let value = if op == IM_POP {
                    self.pop()?
                } else {
                    self.peek()?.clone()
                };
                match object {
                    Value::Context(ctx) => {
                        let mut ctx = ctx.borrow_mut();
                        let index = ctx
                            .lookup(&name)
                            .ok_or_else(|| Error::unknown_identifier(&name))?;
                        ctx.set(index, value.store_copy())?;
                    }
                    Value::Struct(s) => s.borrow_mut().set(&name, value.store_copy())?,
                    _ => return Err(Error::not_assignable()),
                }
                Ok(())
            }
            _ => Err(Error::internal("bad member opcode")),
        }
    }

    fn execute_dim(
        &mut self,
        world: &mut World,
        bco: &BcoRef,
        insn: Instruction,
    ) -> Result<(), Error> {
        let value = self.pop()?.store_copy();
        let name = pool_name(bco, insn.arg)?.to_owned();
        let scope =
            Scope::from_repr(insn.minor).ok_or_else(|| Error::internal("bad dim scope"))?;
        match scope {
            Scope::Local => {
                let frame = self.frame_mut()?;
                if frame.local_names.get_index_by_name(&name).is_none() {
                    let slot = frame.local_names.add(&name);
                    frame.locals.set(slot, value);
                }
            }
            Scope::Static => {
                if self.statics.names.get_index_by_name(&name).is_none() {
                    let slot = self.statics.names.add(&name);
                    self.statics.values.set(slot, value);
                }
            }
            Scope::Shared => {
                let mut globals = world.globals_store().borrow_mut();
                if globals.names.get_index_by_name(&name).is_none() {
                    let slot = globals.names.add(&name);
                    globals.values.set(slot, value);
                }
            }
            _ => return Err(Error::internal("bad dim scope")),
        }
        Ok(())
    }

    fn execute_special(
        &mut self,
        world: &mut World,
        bco: &BcoRef,
        insn: Instruction,
    ) -> Result<(), Error> {
        let op = SpecialOp::from_repr(insn.minor)
            .ok_or_else(|| Error::internal("bad special opcode"))?;
        match op {
            SpecialOp::Uncatch => {
                self.frame_mut()?
                    .catches
                    .pop()
                    .ok_or_else(|| Error::internal("uncatch without catch"))?;
                Ok(())
            }
            SpecialOp::Return => {
                let result = if insn.arg >= 1 { Some(self.pop()?) } else { None };
                self.return_from_frame(result);
                Ok(())
            }
            SpecialOp::With => {
                let value = self.pop()?;
                let context = context_for_value(value)?;
                self.frame_mut()?.context_stack.push(context);
                Ok(())
            }
            SpecialOp::EndWith => {
                self.frame_mut()?
                    .context_stack
                    .pop()
                    .ok_or_else(|| Error::internal("endwith without with"))?;
                Ok(())
            }
            SpecialOp::FirstIndex => {
                let set = self.pop()?;
                match set {
                    Value::Null => self.stack.push(Value::Null),
                    Value::Context(ctx) => {
                        let first = ctx.borrow().first_context()?;
                        match first {
                            Some(cursor) => {
                                self.frame_mut()?.context_stack.push(cursor);
                                self.stack.push(Value::Bool(true));
                            }
                            None => self.stack.push(Value::Bool(false)),
                        }
                    }
                    _ => return Err(Error::type_error()),
                }
                Ok(())
            }
            SpecialOp::NextIndex => {
                let advanced = {
                    let frame = self.frame_mut()?;
                    let cursor = frame
                        .context_stack
                        .last()
                        .ok_or_else(|| Error::internal("iteration without context"))?;
                    cursor.borrow_mut().next()
                };
                if !advanced {
                    self.frame_mut()?.context_stack.pop();
                }
                self.stack.push(Value::Bool(advanced));
                Ok(())
            }
            SpecialOp::EndIndex => {
                self.frame_mut()?
                    .context_stack
                    .pop()
                    .ok_or_else(|| Error::internal("iteration without context"))?;
                Ok(())
            }
            SpecialOp::First => {
                let set = self.pop()?;
                match set {
                    Value::Null => self.stack.push(Value::Null),
                    Value::Context(ctx) => {
                        let first = ctx.borrow().first_context()?;
                        self.stack
                            .push(first.map_or(Value::Null, Value::Context));
                    }
                    _ => return Err(Error::type_error()),
                }
                Ok(())
            }
            SpecialOp::Next => {
                let top = self.peek()?.clone();
                match top {
                    Value::Null => Ok(()),
                    Value::Context(ctx) => {
                        if !ctx.borrow_mut().next() {
                            *self.peek_mut()? = Value::Null;
                        }
                        Ok(())
                    }
                    _ => Err(Error::type_error()),
                }
            }
            SpecialOp::NewArray => {
                let dims = self.pop_dimensions(usize::from(insn.arg))?;
                let array = ArrayValue::new(dims)?;
                self.stack.push(Value::Callable(CallableValue::Array(
                    Rc::new(std::cell::RefCell::new(array)),
                )));
                Ok(())
            }
            SpecialOp::NewHash => {
                self.stack.push(Value::Callable(CallableValue::Hash(Rc::new(
                    std::cell::RefCell::new(HashValue::new()),
                ))));
                Ok(())
            }
            SpecialOp::Instance => {
                let ty = match self.pop()? {
                    Value::StructType(ty) => ty,
                    _ => return Err(Error::type_error()),
                };
                self.stack
                    .push(Value::Struct(Rc::new(std::cell::RefCell::new(
                        StructureValue::new(ty),
                    ))));
                Ok(())
            }
            SpecialOp::ResizeArray => {
                let dims = self.pop_dimensions(usize::from(insn.arg))?;
                match self.pop()? {
                    Value::Callable(CallableValue::Array(array)) => {
                        array.borrow_mut().resize(dims)
                    }
                    _ => Err(Error::type_error()),
                }
            }
            SpecialOp::DefSub => {
                let value = self.pop()?;
                let name = pool_name(bco, insn.arg)?.to_owned();
                world.set_new_global_value(&name, value);
                Ok(())
            }
            SpecialOp::DefShipProperty => {
                let name = pool_name(bco, insn.arg)?;
                world.ship_properties().borrow_mut().add_property(name);
                Ok(())
            }
            SpecialOp::DefPlanetProperty => {
                let name = pool_name(bco, insn.arg)?;
                world.planet_properties().borrow_mut().add_property(name);
                Ok(())
            }
            SpecialOp::AddHook => {
                let handler = self.pop()?;
                let name = self.pop()?;
                let Value::Str(name) = name else {
                    return Err(Error::type_error());
                };
                if !matches!(handler, Value::Callable(_)) {
                    return Err(Error::type_error());
                }
                world.add_hook(&name, handler);
                Ok(())
            }
            SpecialOp::RunHook => {
                let name = self.pop()?;
                let Value::Str(name) = name else {
                    return Err(Error::type_error());
                };
                let handlers = world.hooks(&name).to_vec();
                // frames execute LIFO, so push in reverse to run the
                // handlers in registration order
                for handler in handlers.into_iter().rev() {
                    self.call_callable(world, handler, Vec::new(), false, false)?;
                }
                Ok(())
            }
            SpecialOp::Throw => {
                let value = self.pop()?;
                let message = if value.is_null() {
                    "generic error".to_owned()
                } else {
                    value.to_text(false)
                };
                Err(Error::new(message))
            }
            SpecialOp::Suspend => {
                self.state = ProcessState::Suspended;
                Ok(())
            }
            SpecialOp::Terminate => {
                self.state = ProcessState::Terminated;
                Ok(())
            }
            SpecialOp::Freeze => {
                self.state = ProcessState::Frozen;
                Ok(())
            }
            SpecialOp::Load => {
                let name = match self.pop()? {
                    Value::Str(s) => s.to_string(),
                    Value::Null => return Err(Error::type_error()),
                    other => other.to_text(false),
                };
                match world.open_load_file(&name) {
                    Some((path, content)) => {
                        let sub = world.compile_file(
                            &path,
                            &content,
                            bco.origin(),
                            crate::compiler::DEFAULT_OPTIMISATION_LEVEL,
                        )?;
                        self.stack.push(Value::Null);
                        self.push_frame(sub, false);
                        Ok(())
                    }
                    None => {
                        self.stack
                            .push(Value::str(format!("File not found: {name}")));
                        Ok(())
                    }
                }
            }
            SpecialOp::EvalStatement => {
                let count = usize::from(insn.arg);
                let mut lines = Vec::with_capacity(count);
                for _ in 0..count {
                    match self.pop()? {
                        Value::Str(s) => lines.push(s.to_string()),
                        Value::Null => lines.push(String::new()),
                        _ => return Err(Error::type_error()),
                    }
                }
                lines.reverse();
                let sub = {
                    let resolver = ProcessResolver {
                        process: &*self,
                        global_contexts: world.global_contexts().to_vec(),
                    };
                    world.compile_eval_lines(&lines, Some(&resolver))?
                };
                self.push_frame(sub, false);
                Ok(())
            }
            SpecialOp::Print => {
                let value = self.pop()?;
                if !value.is_null() {
                    world.print_line(&value.to_text(false));
                }
                Ok(())
            }
        }
    }

    /// Calls a callable value: pushes a frame for script subroutines,
    /// executes builtins immediately, indexes arrays and hashes.
    fn call_callable(
        &mut self,
        world: &mut World,
        callable: Value,
        args: Vec<Value>,
        want_result: bool,
        refuse_functions: bool,
    ) -> Result<(), Error> {
        match callable {
            Value::Callable(CallableValue::Subroutine(sub)) => {
                if refuse_functions && !sub.is_procedure() {
                    return Err(Error::new("Not a procedure"));
                }
                if want_result && sub.is_procedure() {
                    return Err(Error::new("Not a function"));
                }
                check_argument_count(
                    sub.subroutine_name(),
                    args.len(),
                    sub.min_args(),
                    if sub.is_varargs() {
                        usize::MAX
                    } else {
                        sub.max_args()
                    },
                )?;

                self.push_frame(Rc::clone(&sub), want_result);
                let frame = self.frames.last_mut().expect("frame was just pushed");
                let fixed = sub.max_args().min(args.len());
                let mut args = args;
                let rest: Vec<Value> = args.split_off(fixed);
                for (slot, value) in args.into_iter().enumerate() {
                    frame.locals.set(slot, value.store_copy());
                }
                if sub.is_varargs() {
                    let mut array = ArrayValue::new(vec![rest.len()])?;
                    for (index, value) in rest.into_iter().enumerate() {
                        array.set(&[index as i32], value.store_copy())?;
                    }
                    frame.locals.set(
                        sub.max_args(),
                        Value::Callable(CallableValue::Array(Rc::new(
                            std::cell::RefCell::new(array),
                        ))),
                    );
                }
                Ok(())
            }
            Value::Callable(CallableValue::Builtin(builtin)) => {
                if refuse_functions && !builtin.is_procedure {
                    return Err(Error::new("Not a procedure"));
                }
                if want_result && builtin.is_procedure {
                    return Err(Error::new("Not a function"));
                }
                check_argument_count(builtin.name, args.len(), builtin.min_args, builtin.max_args)?;
                let mut env = BuiltinEnv {
                    world,
                    process_id: self.process_id,
                    requested_state: None,
                };
                let result = (builtin.handler)(&mut env, args)?;
                if let Some(state) = env.requested_state {
                    self.state = state;
                }
                if want_result {
                    self.stack.push(result.unwrap_or(Value::Null));
                }
                Ok(())
            }
            Value::Callable(CallableValue::Array(array)) => {
                if refuse_functions {
                    return Err(Error::new("Not a procedure"));
                }
                let value = match int_indexes(&args)? {
                    None => Value::Null,
                    Some(indexes) => array.borrow().get(&indexes)?,
                };
                if want_result {
                    self.stack.push(value);
                }
                Ok(())
            }
            Value::Callable(CallableValue::Hash(hash)) => {
                if refuse_functions {
                    return Err(Error::new("Not a procedure"));
                }
                check_argument_count("hash", args.len(), 1, 1)?;
                let value = match hash_key(&args)? {
                    None => Value::Null,
                    Some(key) => hash.borrow().get(&key),
                };
                if want_result {
                    self.stack.push(value);
                }
                Ok(())
            }
            _ => Err(Error::new("Not callable")),
        }
    }

    /// Unwinds after an error: walks the catch stack, popping frames
    /// without handlers, and fails the process when nothing catches.
    pub(crate) fn handle_error(&mut self, mut error: Error) {
        while let Some(frame) = self.frames.last_mut() {
            if let Some(handler) = frame.catches.pop() {
                let target = if handler.symbolic {
                    frame.bco.find_label(handler.target)
                } else {
                    Some(usize::from(handler.target))
                };
                if let Some(target) = target {
                    self.stack.truncate(handler.stack_depth);
                    frame.context_stack.truncate(handler.context_depth);
                    self.stack.push(Value::str(error.message()));
                    frame.ip = target;
                    return;
                }
                // broken handler: keep unwinding
            }

            let position = frame.ip.saturating_sub(1);
            let line = frame.bco.line_number_for(position);
            error.add_trace(frame_trace(frame, line));
            let base = frame.base_sp;
            self.frames.pop();
            self.stack.truncate(base);
        }
        self.state = ProcessState::Failed;
        self.error = Some(error);
    }

    fn return_from_frame(&mut self, result: Option<Value>) {
        let Some(frame) = self.frames.pop() else {
            self.state = ProcessState::Ended;
            return;
        };
        self.stack.truncate(frame.base_sp);
        if frame.wants_result {
            self.stack.push(result.unwrap_or(Value::Null));
        }
        if self.frames.is_empty() {
            self.state = ProcessState::Ended;
        }
    }

    /// Resolves a name through the full context precedence: the current
    /// frame's with-contexts, its locals, the process statics, the
    /// process object contexts, then the world's global contexts.
    fn lookup_name(&mut self, world: &World, name: &str) -> Result<Option<Value>, Error> {
        if let Some(frame) = self.frames.last() {
            for ctx in frame.context_stack.iter().rev() {
                let mut ctx = ctx.borrow_mut();
                if let Some(index) = ctx.lookup(name) {
                    return ctx.get(index).map(Some);
                }
            }
            if let Some(slot) = frame.local_names.get_index_by_name(name) {
                return Ok(Some(frame.locals.get(slot)));
            }
        }
        if let Some(slot) = self.statics.names.get_index_by_name(name) {
            return Ok(Some(self.statics.values.get(slot)));
        }
        for ctx in self.base_contexts.iter().rev() {
            let mut ctx = ctx.borrow_mut();
            if let Some(index) = ctx.lookup(name) {
                return ctx.get(index).map(Some);
            }
        }
        for ctx in world.global_contexts().iter().rev() {
            let mut ctx = ctx.borrow_mut();
            if let Some(index) = ctx.lookup(name) {
                return ctx.get(index).map(Some);
            }
        }
        Ok(None)
    }

    /// Stores into a name using the same precedence as
    /// [`Process::lookup_name`]; false when the name resolves nowhere.
    fn set_name(&mut self, world: &World, name: &str, value: Value) -> Result<bool, Error> {
        if let Some(frame) = self.frames.last_mut() {
            for ctx in frame.context_stack.iter().rev() {
                let mut ctx = ctx.borrow_mut();
                if let Some(index) = ctx.lookup(name) {
                    ctx.set(index, value)?;
                    return Ok(true);
                }
            }
            if let Some(slot) = frame.local_names.get_index_by_name(name) {
                frame.locals.set(slot, value);
                return Ok(true);
            }
        }
        if let Some(slot) = self.statics.names.get_index_by_name(name) {
            self.statics.values.set(slot, value);
            return Ok(true);
        }
        for ctx in self.base_contexts.iter().rev() {
            let mut ctx = ctx.borrow_mut();
            if let Some(index) = ctx.lookup(name) {
                ctx.set(index, value)?;
                return Ok(true);
            }
        }
        for ctx in world.global_contexts().iter().rev() {
            let mut ctx = ctx.borrow_mut();
            if let Some(index) = ctx.lookup(name) {
                ctx.set(index, value)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn frame(&self) -> Result<&Frame, Error> {
        self.frames
            .last()
            .ok_or_else(|| Error::internal("no active frame"))
    }

    fn frame_mut(&mut self) -> Result<&mut Frame, Error> {
        self.frames
            .last_mut()
            .ok_or_else(|| Error::internal("no active frame"))
    }

    fn pop(&mut self) -> Result<Value, Error> {
        self.stack
            .pop()
            .ok_or_else(|| Error::internal("stack underflow"))
    }

    fn peek(&self) -> Result<&Value, Error> {
        self.stack
            .last()
            .ok_or_else(|| Error::internal("stack underflow"))
    }

    fn peek_mut(&mut self) -> Result<&mut Value, Error> {
        self.stack
            .last_mut()
            .ok_or_else(|| Error::internal("stack underflow"))
    }

    fn pop_args(&mut self, count: usize) -> Result<Vec<Value>, Error> {
        if self.stack.len() < count {
            return Err(Error::internal("stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn pop_dimensions(&mut self, count: usize) -> Result<Vec<usize>, Error> {
        let args = self.pop_args(count)?;
        args.iter()
            .map(|value| match value {
                Value::Int(i) => usize::try_from(*i).map_err(|_| Error::range_error()),
                Value::Bool(b) => Ok(usize::from(*b)),
                _ => Err(Error::type_error()),
            })
            .collect()
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name)
            .field("process_id", &self.process_id)
            .field("state", &self.state)
            .field("frames", &self.frames.len())
            .finish_non_exhaustive()
    }
}

/// Name resolution against a live process, used to compile `Eval`
/// statements with direct addressing.
struct ProcessResolver<'a> {
    process: &'a Process,
    global_contexts: Vec<ContextValue>,
}

impl crate::compiler::StaticContext for ProcessResolver<'_> {
    fn lookup_kind(&self, name: &str) -> Option<crate::compiler::StaticKind> {
        let value = self.peek_value(name)?;
        match value {
            Value::Callable(c) if c.is_procedure_call() => {
                Some(crate::compiler::StaticKind::Procedure)
            }
            _ => Some(crate::compiler::StaticKind::Value),
        }
    }
}

impl ProcessResolver<'_> {
    fn peek_value(&self, name: &str) -> Option<Value> {
        if let Some(frame) = self.process.frames.last() {
            for ctx in frame.context_stack.iter().rev() {
                let mut ctx = ctx.borrow_mut();
                if let Some(index) = ctx.lookup(name) {
                    return ctx.get(index).ok();
                }
            }
            if let Some(slot) = frame.local_names.get_index_by_name(name) {
                return Some(frame.locals.get(slot));
            }
        }
        if let Some(slot) = self.process.statics.names.get_index_by_name(name) {
            return Some(self.process.statics.values.get(slot));
        }
        for ctx in self.process.base_contexts.iter().rev() {
            let mut ctx = ctx.borrow_mut();
            if let Some(index) = ctx.lookup(name) {
                return ctx.get(index).ok();
            }
        }
        for ctx in self.global_contexts.iter().rev() {
            let mut ctx = ctx.borrow_mut();
            if let Some(index) = ctx.lookup(name) {
                return ctx.get(index).ok();
            }
        }
        None
    }
}

fn pool_name(bco: &BcoRef, index: u16) -> Result<&str, Error> {
    bco.name(index)
        .ok_or_else(|| Error::internal("bad name index"))
}

fn frame_trace(frame: &Frame, line: Option<u32>) -> String {
    let mut text = String::from("in ");
    if frame.bco.subroutine_name().is_empty() {
        text.push_str("(anonymous)");
    } else {
        text.push_str(frame.bco.subroutine_name());
    }
    if let Some(line) = line {
        text.push_str(&format!(", line {line}"));
    }
    if !frame.bco.file_name().is_empty() {
        text.push_str(&format!(", file \"{}\"", frame.bco.file_name()));
    }
    text
}

fn check_argument_count(name: &str, got: usize, min: usize, max: usize) -> Result<(), Error> {
    let name = if name.is_empty() { "routine" } else { name };
    if got < min {
        Err(Error::too_few_arguments(name))
    } else if got > max {
        Err(Error::too_many_arguments(name))
    } else {
        Ok(())
    }
}

/// Converts subscript arguments into array indexes; `None` when any
/// index is null (null-propagating reads).
fn int_indexes(args: &[Value]) -> Result<Option<Vec<i32>>, Error> {
    let mut indexes = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Null => return Ok(None),
            Value::Int(i) => indexes.push(*i),
            Value::Bool(b) => indexes.push(i32::from(*b)),
            _ => return Err(Error::type_error()),
        }
    }
    Ok(Some(indexes))
}

/// Converts a subscript argument list into a hash key; `None` for null.
fn hash_key(args: &[Value]) -> Result<Option<String>, Error> {
    match args {
        [Value::Null] => Ok(None),
        [Value::Str(s)] => Ok(Some(s.to_string())),
        [_] => Err(Error::type_error()),
        _ => Err(Error::type_error()),
    }
}
