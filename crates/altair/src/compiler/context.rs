//! Compilation contexts.
//!
//! A `StatementContext` carries the options in effect while compiling one
//! statement: flag bits, an optional static execution context for
//! resolving ambiguous statements, and the chain of enclosing block
//! statements that determines what `Break`, `Continue` and `Return`
//! compile to. Nested blocks derive a child context that inherits the
//! parent's properties and prepends its own cleanup.

use std::{cell::RefCell, rc::Rc};

use crate::{
    bco::{BytecodeObject, Label},
    error::Error,
    opcode::{JUMP_ALWAYS, Major, SpecialOp, StackOp},
    world::GlobalStore,
};

/// Option bits for a compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompilationFlag {
    /// String operations are case-blind (`_NC` opcodes).
    CaseBlind = 1 << 0,
    /// Code executes directly in the BCO's own context, no `With` or
    /// `ForEach` active; local names may be addressed by slot.
    LocalContext = 1 << 1,
    /// With `LocalContext`: the next enclosing scope is the shared
    /// variables, so known globals may be addressed by name directly.
    AlsoGlobalContext = 1 << 2,
    /// Expressions are statements; compile them for their side effect.
    ExpressionsAreStatements = 1 << 3,
    /// Refuse multi-line blocks (one-line contexts).
    RefuseBlocks = 1 << 4,
    /// Terminators are reported to the caller; end of input is an error.
    WantTerminators = 1 << 5,
    /// Statements here execute linearly, exactly once, top to bottom.
    LinearExecution = 1 << 6,
    /// `Load <literal>` may be executed at compile time.
    PreexecuteLoad = 1 << 7,
}

/// Compile-time name resolution against a known execution context.
///
/// Present only when compiling a one-line statement that will run in a
/// context which cannot change underneath the compiler.
pub trait StaticContext {
    /// Resolves a name, classifying what it holds.
    fn lookup_kind(&self, name: &str) -> Option<StaticKind>;
}

/// What a statically resolved name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticKind {
    /// A callable used as a command.
    Procedure,
    /// A plain value or function.
    Value,
}

/// One enclosing block statement, linked towards the outermost.
pub struct BlockContext<'a> {
    pub(crate) kind: BlockKind,
    pub(crate) parent: Option<&'a BlockContext<'a>>,
}

/// What a block contributes to `Break`/`Continue`/`Return` code.
pub(crate) enum BlockKind {
    /// `Do`, `For`, and named `ForEach` loops.
    Loop {
        lcontinue: Label,
        lbreak: Label,
        /// Stack temporaries to drop before jumping to `lbreak`.
        break_drops: u16,
        /// Stack temporaries to drop on `Return` passing through.
        cleanup_drops: u16,
    },
    /// Unnamed `ForEach`, which parks its cursor on the frame context
    /// stack rather than the operand stack.
    IndexLoop { lcontinue: Label, lend: Label },
    /// `Try` body; exits must remove the catch handler.
    Try,
    /// `With` body; exits must pop the pushed context.
    With,
}

/// Options, hooks and scope information for compiling one statement.
#[derive(Clone)]
pub struct StatementContext<'a> {
    flags: u8,
    static_context: Option<&'a dyn StaticContext>,
    block: Option<&'a BlockContext<'a>>,
    /// Set in hook bodies, where `Return` is not allowed.
    refuse_return: bool,
    /// Shared-variable store used to resolve `AlsoGlobalContext` names.
    globals: Option<Rc<RefCell<GlobalStore>>>,
}

impl<'a> StatementContext<'a> {
    /// Creates a root context. String operations start out case-blind.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: CompilationFlag::CaseBlind as u8,
            static_context: None,
            block: None,
            refuse_return: false,
            globals: None,
        }
    }

    /// Adds a flag.
    #[must_use]
    pub fn with_flag(mut self, flag: CompilationFlag) -> Self {
        self.flags |= flag as u8;
        self
    }

    /// Removes a flag.
    #[must_use]
    pub fn without_flag(mut self, flag: CompilationFlag) -> Self {
        self.flags &= !(flag as u8);
        self
    }

    /// Tests a flag.
    #[must_use]
    pub fn has_flag(&self, flag: CompilationFlag) -> bool {
        self.flags & flag as u8 != 0
    }

    /// Sets the static context used to resolve ambiguous statements.
    #[must_use]
    pub fn with_static_context(mut self, sc: Option<&'a dyn StaticContext>) -> Self {
        self.static_context = sc;
        self
    }

    /// The static context, if set.
    #[must_use]
    pub fn static_context(&self) -> Option<&'a dyn StaticContext> {
        self.static_context
    }

    /// Attaches the shared-variable store for global name resolution.
    #[must_use]
    pub fn with_globals(mut self, globals: &Rc<RefCell<GlobalStore>>) -> Self {
        self.globals = Some(Rc::clone(globals));
        self
    }

    /// Derives a child context inheriting all properties.
    #[must_use]
    pub fn derive(&self) -> Self {
        self.clone()
    }

    /// True when `name` is a known shared variable.
    #[must_use]
    pub fn knows_global(&self, name: &str) -> bool {
        self.globals
            .as_ref()
            .is_some_and(|g| g.borrow().names.get_index_by_name(name).is_some())
    }

    /// Marks `Return` as forbidden (hook bodies).
    #[must_use]
    pub fn refusing_return(mut self) -> Self {
        self.refuse_return = true;
        self
    }

    /// Enters a nested block. The block node must outlive the child
    /// context; callers keep it on their stack frame.
    #[must_use]
    pub fn with_block(mut self, block: &'a BlockContext<'a>) -> Self {
        self.block = Some(block);
        self
    }

    /// The current block chain head.
    #[must_use]
    pub fn block(&self) -> Option<&'a BlockContext<'a>> {
        self.block
    }

    /// Flags for one-line statement syntax: refuse blocks, expressions
    /// are statements, terminators are not expected.
    #[must_use]
    pub fn one_line_syntax(self) -> Self {
        self.with_flag(CompilationFlag::RefuseBlocks)
            .with_flag(CompilationFlag::ExpressionsAreStatements)
            .without_flag(CompilationFlag::WantTerminators)
    }

    /// Flags for block statement syntax: blocks allowed, expressions are
    /// statements, the block terminator ends compilation.
    #[must_use]
    pub fn block_syntax(self) -> Self {
        self.without_flag(CompilationFlag::RefuseBlocks)
            .with_flag(CompilationFlag::ExpressionsAreStatements)
            .with_flag(CompilationFlag::WantTerminators)
    }

    /// Generates the code for a `Break` statement.
    pub fn compile_break(&self, bco: &mut BytecodeObject) -> Result<(), Error> {
        let mut node = self.block;
        while let Some(b) = node {
            match &b.kind {
                BlockKind::Try => {
                    bco.add_instruction(Major::Special, SpecialOp::Uncatch as u8, 0);
                }
                BlockKind::With => {
                    bco.add_instruction(Major::Special, SpecialOp::EndWith as u8, 0);
                }
                BlockKind::Loop {
                    lbreak,
                    break_drops,
                    ..
                } => {
                    if *break_drops > 0 {
                        bco.add_instruction(Major::Stack, StackOp::Drop as u8, *break_drops);
                    }
                    bco.add_jump(JUMP_ALWAYS, *lbreak);
                    return Ok(());
                }
                BlockKind::IndexLoop { lend, .. } => {
                    bco.add_instruction(Major::Special, SpecialOp::EndIndex as u8, 0);
                    bco.add_jump(JUMP_ALWAYS, *lend);
                    return Ok(());
                }
            }
            node = b.parent;
        }
        Err(Error::misplaced_keyword("Break"))
    }

    /// Generates the code for a `Continue` statement.
    pub fn compile_continue(&self, bco: &mut BytecodeObject) -> Result<(), Error> {
        let mut node = self.block;
        while let Some(b) = node {
            match &b.kind {
                BlockKind::Try => {
                    bco.add_instruction(Major::Special, SpecialOp::Uncatch as u8, 0);
                }
                BlockKind::With => {
                    bco.add_instruction(Major::Special, SpecialOp::EndWith as u8, 0);
                }
                BlockKind::Loop { lcontinue, .. } | BlockKind::IndexLoop { lcontinue, .. } => {
                    bco.add_jump(JUMP_ALWAYS, *lcontinue);
                    return Ok(());
                }
            }
            node = b.parent;
        }
        Err(Error::misplaced_keyword("Continue"))
    }

    /// Generates the stack cleanup preceding a `Return`.
    ///
    /// Frame exit already unwinds catch handlers and with-contexts, so
    /// only operand-stack temporaries held by enclosing loops matter.
    pub fn compile_cleanup(&self, bco: &mut BytecodeObject) -> Result<(), Error> {
        if self.refuse_return {
            return Err(Error::misplaced_keyword("Return"));
        }
        let mut node = self.block;
        while let Some(b) = node {
            if let BlockKind::Loop { cleanup_drops, .. } = &b.kind {
                if *cleanup_drops > 0 {
                    bco.add_instruction(Major::Stack, StackOp::Drop as u8, *cleanup_drops);
                }
            }
            node = b.parent;
        }
        Ok(())
    }
}

impl Default for StatementContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let scc = StatementContext::new();
        assert!(scc.has_flag(CompilationFlag::CaseBlind));
        assert!(!scc.has_flag(CompilationFlag::RefuseBlocks));

        let scc = scc.one_line_syntax();
        assert!(scc.has_flag(CompilationFlag::RefuseBlocks));
        assert!(scc.has_flag(CompilationFlag::ExpressionsAreStatements));

        let scc = scc.block_syntax();
        assert!(!scc.has_flag(CompilationFlag::RefuseBlocks));
        assert!(scc.has_flag(CompilationFlag::WantTerminators));
    }

    #[test]
    fn test_break_outside_loop_fails() {
        let scc = StatementContext::new();
        let mut bco = BytecodeObject::new();
        assert!(scc.compile_break(&mut bco).is_err());
        assert!(scc.compile_continue(&mut bco).is_err());
        assert!(scc.compile_cleanup(&mut bco).is_ok());
    }

    #[test]
    fn test_break_through_try_uncatches() {
        let mut bco = BytecodeObject::new();
        let lcontinue = bco.make_label();
        let lbreak = bco.make_label();

        let loop_block = BlockContext {
            kind: BlockKind::Loop {
                lcontinue,
                lbreak,
                break_drops: 0,
                cleanup_drops: 0,
            },
            parent: None,
        };
        let root = StatementContext::new();
        let in_loop = root.with_block(&loop_block);
        let try_block = BlockContext {
            kind: BlockKind::Try,
            parent: in_loop.block(),
        };
        let in_try = in_loop.with_block(&try_block);

        in_try.compile_break(&mut bco).unwrap();
        let insns = bco.instructions();
        assert_eq!(insns[0].major, Major::Special);
        assert_eq!(insns[0].minor, SpecialOp::Uncatch as u8);
        assert_eq!(insns[1].major, Major::Jump);
    }

    #[test]
    fn test_return_refused_in_hooks() {
        let scc = StatementContext::new().refusing_return();
        let mut bco = BytecodeObject::new();
        assert!(scc.compile_cleanup(&mut bco).is_err());
    }
}
