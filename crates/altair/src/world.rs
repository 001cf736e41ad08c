//! The world: process-wide language runtime state.
//!
//! One world exists per game session. It owns the shared variable space,
//! the per-object property maps, keymaps, atoms, mutexes, the file
//! table, the special-command registry, the process list, and the load
//! path, and it provides the compilation entry points.

use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    atom::AtomTable,
    bco::BytecodeObject,
    compiler::{
        CompilationFlag, FileCommandSource, MemoryCommandSource, SpecialCommand,
        StatementCompiler, StatementContext, StatementResult, StaticContext,
    },
    context::{ContextValue, GlobalContext},
    error::Error,
    filetable::FileTable,
    io::{PrintWriter, StdPrint},
    keymap::KeymapTable,
    mutex::MutexList,
    names::{NameMap, Segment},
    process_list::ProcessList,
    value::{BcoRef, Value},
};

/// A name map plus its value segment; the shape of the shared variable
/// space and the process static space.
#[derive(Debug, Default)]
pub struct GlobalStore {
    pub names: NameMap,
    pub values: Segment,
}

/// Per-object property storage: one name map, one segment per object id.
#[derive(Debug, Default)]
pub struct ObjectPropertyStore {
    names: NameMap,
    values: ahash::AHashMap<u32, Segment>,
}

impl ObjectPropertyStore {
    /// Declares a property, keeping existing indexes stable.
    pub fn add_property(&mut self, name: &str) -> usize {
        self.names.add_maybe(name)
    }

    /// Looks up a property name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.names.get_index_by_name(name)
    }

    /// The property name table.
    #[must_use]
    pub fn names(&self) -> &NameMap {
        &self.names
    }

    /// Reads a property of one object.
    #[must_use]
    pub fn get(&self, id: u32, index: usize) -> Value {
        self.values
            .get(&id)
            .map_or(Value::Null, |segment| segment.get(index))
    }

    /// Writes a property of one object.
    pub fn set(&mut self, id: u32, index: usize, value: Value) {
        self.values.entry(id).or_default().set(index, value);
    }
}

/// A one-shot alternate keymap requested by `UseKeymap`, to be consumed
/// by the host at the next keypress.
#[derive(Debug)]
pub struct PendingKeymap {
    /// Keymap table index.
    pub keymap: usize,
    /// Value of `UI.Prefix` at request time.
    pub prefix: Value,
}

/// Process-wide language runtime state.
pub struct World {
    globals: Rc<RefCell<GlobalStore>>,
    ship_properties: Rc<RefCell<ObjectPropertyStore>>,
    planet_properties: Rc<RefCell<ObjectPropertyStore>>,

    special_commands: IndexMap<String, Rc<dyn SpecialCommand>>,
    keymaps: KeymapTable,
    atoms: AtomTable,
    mutexes: MutexList,
    files: FileTable,
    hooks: IndexMap<String, Vec<Value>>,
    global_contexts: Vec<ContextValue>,
    pub(crate) process_list: ProcessList,

    console: Box<dyn PrintWriter>,
    local_load_directory: Option<PathBuf>,
    system_load_directory: Option<PathBuf>,
    pending_keymap: Option<PendingKeymap>,
}

impl World {
    /// Creates a world printing to the standard streams.
    #[must_use]
    pub fn new() -> Self {
        Self::with_console(Box::new(StdPrint))
    }

    /// Creates a world with a custom output sink.
    #[must_use]
    pub fn with_console(console: Box<dyn PrintWriter>) -> Self {
        let mut world = Self {
            globals: Rc::new(RefCell::new(GlobalStore::default())),
            ship_properties: Rc::new(RefCell::new(ObjectPropertyStore::default())),
            planet_properties: Rc::new(RefCell::new(ObjectPropertyStore::default())),
            special_commands: IndexMap::new(),
            keymaps: KeymapTable::new(),
            atoms: AtomTable::new(),
            mutexes: MutexList::new(),
            files: FileTable::new(),
            hooks: IndexMap::new(),
            global_contexts: Vec::new(),
            process_list: ProcessList::new(),
            console,
            local_load_directory: None,
            system_load_directory: None,
            pending_keymap: None,
        };
        world.init();
        world
    }

    /// Seeds the predefined names and registers the core builtins.
    fn init(&mut self) {
        {
            let mut ships = self.ship_properties.borrow_mut();
            ships.add_property("COMMENT");
            let mut planets = self.planet_properties.borrow_mut();
            planets.add_property("COMMENT");
        }
        {
            // the classic one-letter variables, plus the error slot
            let mut globals = self.globals.borrow_mut();
            for c in 'A'..'Z' {
                globals.names.add(&c.to_string());
            }
            globals.names.add("SYSTEM.ERR");
        }
        self.global_contexts
            .push(Rc::new(RefCell::new(GlobalContext::new(Rc::clone(
                &self.globals,
            )))));
        crate::builtins::register_builtins(self);
    }

    /// The shared-variable store.
    #[must_use]
    pub fn globals_store(&self) -> &Rc<RefCell<GlobalStore>> {
        &self.globals
    }

    /// Defines (or overwrites) a shared variable.
    pub fn set_new_global_value(&mut self, name: &str, value: Value) {
        let mut globals = self.globals.borrow_mut();
        let index = globals.names.add_maybe(name);
        globals.values.set(index, value);
    }

    /// Reads a shared variable; null when undefined.
    #[must_use]
    pub fn get_global_value(&self, name: &str) -> Value {
        let globals = self.globals.borrow();
        globals
            .names
            .get_index_by_name(name)
            .map_or(Value::Null, |index| globals.values.get(index))
    }

    /// The ship property store.
    #[must_use]
    pub fn ship_properties(&self) -> &Rc<RefCell<ObjectPropertyStore>> {
        &self.ship_properties
    }

    /// The planet property store.
    #[must_use]
    pub fn planet_properties(&self) -> &Rc<RefCell<ObjectPropertyStore>> {
        &self.planet_properties
    }

    /// Registers a special command under an upper-case name.
    pub fn add_new_special_command(&mut self, name: &str, command: Rc<dyn SpecialCommand>) {
        self.special_commands
            .insert(name.to_ascii_uppercase(), command);
    }

    /// Looks up a special command.
    #[must_use]
    pub fn lookup_special_command(&self, name: &str) -> Option<Rc<dyn SpecialCommand>> {
        self.special_commands
            .get(&name.to_ascii_uppercase())
            .cloned()
    }

    /// The keymap table.
    #[must_use]
    pub fn keymaps(&self) -> &KeymapTable {
        &self.keymaps
    }

    /// The keymap table, mutable.
    pub fn keymaps_mut(&mut self) -> &mut KeymapTable {
        &mut self.keymaps
    }

    /// The atom table.
    #[must_use]
    pub fn atom_table(&self) -> &AtomTable {
        &self.atoms
    }

    /// The atom table, mutable.
    pub fn atom_table_mut(&mut self) -> &mut AtomTable {
        &mut self.atoms
    }

    /// The mutex list, mutable.
    pub fn mutex_list_mut(&mut self) -> &mut MutexList {
        &mut self.mutexes
    }

    /// The mutex list.
    #[must_use]
    pub fn mutex_list(&self) -> &MutexList {
        &self.mutexes
    }

    /// The file table, mutable.
    pub fn file_table_mut(&mut self) -> &mut FileTable {
        &mut self.files
    }

    /// The process list.
    #[must_use]
    pub fn process_list(&self) -> &ProcessList {
        &self.process_list
    }

    /// The process list, mutable.
    pub fn process_list_mut(&mut self) -> &mut ProcessList {
        &mut self.process_list
    }

    /// Registers a handler for a hook.
    pub fn add_hook(&mut self, event: &str, handler: Value) {
        self.hooks
            .entry(event.to_ascii_uppercase())
            .or_default()
            .push(handler);
    }

    /// The handlers registered for a hook, in registration order.
    #[must_use]
    pub fn hooks(&self, event: &str) -> &[Value] {
        self.hooks
            .get(&event.to_ascii_uppercase())
            .map_or(&[], Vec::as_slice)
    }

    /// Adds a context to the global lookup chain.
    pub fn add_new_global_context(&mut self, context: ContextValue) {
        self.global_contexts.push(context);
    }

    /// The global context chain.
    #[must_use]
    pub fn global_contexts(&self) -> &[ContextValue] {
        &self.global_contexts
    }

    /// Requests the one-shot alternate keymap.
    pub fn set_pending_keymap(&mut self, keymap: usize, prefix: Value) {
        self.pending_keymap = Some(PendingKeymap { keymap, prefix });
    }

    /// Consumes the pending alternate keymap, if any.
    pub fn take_pending_keymap(&mut self) -> Option<PendingKeymap> {
        self.pending_keymap.take()
    }

    /// Sets the user-profile script directory.
    pub fn set_local_load_directory(&mut self, dir: Option<PathBuf>) {
        self.local_load_directory = dir;
    }

    /// Sets the installation script directory.
    pub fn set_system_load_directory(&mut self, dir: Option<PathBuf>) {
        self.system_load_directory = dir;
    }

    /// Opens a file through the load path: local directory, system
    /// directory, then the name as given. Returns the resolved path and
    /// the raw content.
    #[must_use]
    pub fn open_load_file(&self, name: &str) -> Option<(String, Vec<u8>)> {
        let candidates = [
            self.local_load_directory.as_deref(),
            self.system_load_directory.as_deref(),
            Some(Path::new("")),
        ];
        for dir in candidates.into_iter().flatten() {
            let path = if dir.as_os_str().is_empty() {
                PathBuf::from(name)
            } else {
                dir.join(name)
            };
            if let Ok(content) = std::fs::read(&path) {
                return Some((path.display().to_string(), content));
            }
        }
        None
    }

    /// Prints one line of script output.
    pub fn print_line(&mut self, line: &str) {
        self.console.print_line(line);
    }

    /// Logs an error with its trace.
    pub fn log_error(&mut self, error: &Error) {
        self.console.trace_line(&format!("error: {error}"));
    }

    /// Logs a warning with its trace.
    pub fn log_warning(&mut self, error: &Error) {
        self.console.trace_line(&format!("warning: {error}"));
    }

    /// Compiles a whole script file into a callable BCO.
    pub fn compile_file(
        &mut self,
        file_name: &str,
        content: &[u8],
        origin: &str,
        optimisation_level: i32,
    ) -> Result<BcoRef, Error> {
        let mut source = FileCommandSource::new(file_name, content);
        let mut bco = BytecodeObject::new();
        bco.set_file_name(file_name);
        bco.set_origin(origin);

        let scc = StatementContext::new()
            .with_globals(&self.globals)
            .with_flag(CompilationFlag::LocalContext)
            .with_flag(CompilationFlag::ExpressionsAreStatements)
            .with_flag(CompilationFlag::LinearExecution);

        let result = (|| {
            let mut compiler = StatementCompiler::new(&mut source, self)?;
            compiler.set_optimisation_level(optimisation_level);
            compiler.compile_list(&mut bco, &scc)?;
            compiler.finish_bco(&mut bco)
        })();
        match result {
            Ok(()) => Ok(Rc::new(bco)),
            Err(mut error) => {
                use crate::compiler::CommandSource as _;
                source.add_trace_to(&mut error);
                Err(error)
            }
        }
    }

    /// Compiles a one-line console command. Returns the BCO and whether
    /// running it leaves a result on the stack.
    pub fn compile_command(
        &mut self,
        command: &str,
        want_result: bool,
    ) -> Result<(BcoRef, bool), Error> {
        let mut source = MemoryCommandSource::with_line(command);
        let mut bco = BytecodeObject::new();

        let mut scc = StatementContext::new()
            .with_globals(&self.globals)
            .with_flag(CompilationFlag::RefuseBlocks)
            .with_flag(CompilationFlag::LinearExecution);
        if !want_result {
            scc = scc.with_flag(CompilationFlag::ExpressionsAreStatements);
        }

        let mut compiler = StatementCompiler::new(&mut source, self)?;
        let result = compiler.compile(&mut bco, &scc)?;
        compiler.finish_bco(&mut bco)?;
        Ok((Rc::new(bco), result == StatementResult::CompiledExpression))
    }

    /// Compiles the statement strings of an `Eval`, resolving ambiguous
    /// statements against the running process where possible.
    pub fn compile_eval_lines(
        &mut self,
        lines: &[String],
        static_context: Option<&dyn StaticContext>,
    ) -> Result<BcoRef, Error> {
        let mut source = MemoryCommandSource::new();
        for line in lines {
            source.add_line(line);
        }
        let mut bco = BytecodeObject::new();

        let mut scc = StatementContext::new()
            .with_globals(&self.globals)
            .with_flag(CompilationFlag::ExpressionsAreStatements)
            .with_flag(CompilationFlag::LinearExecution);

        let mut compiler = StatementCompiler::new(&mut source, self)?;
        if lines.len() == 1 {
            scc = scc
                .with_flag(CompilationFlag::RefuseBlocks)
                .with_static_context(static_context);
            compiler.compile(&mut bco, &scc)?;
        } else {
            compiler.compile_list(&mut bco, &scc)?;
        }
        compiler.finish_bco(&mut bco)?;
        Ok(Rc::new(bco))
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("globals", &self.globals.borrow().names.len())
            .field("keymaps", &self.keymaps.len())
            .field("processes", &self.process_list.len())
            .finish_non_exhaustive()
    }
}
