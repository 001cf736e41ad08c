//! Special commands: host-registered compiler extensions.
//!
//! A special command owns the syntax of one statement. The compiler
//! consults the world's registry after the keyword table; a match hands
//! the tokenizer over to the command, which emits whatever code it
//! wants. To the script author a special command is indistinguishable
//! from a statement implemented in the compiler core.

use crate::{
    bco::BytecodeObject, compiler::StatementContext, error::Error, tokenizer::Tokenizer,
};

/// A statement with host-defined syntax.
pub trait SpecialCommand {
    /// Compiles one occurrence. The tokenizer is positioned on the
    /// command name; the implementation must consume the whole
    /// statement.
    fn compile_command(
        &self,
        tok: &mut Tokenizer,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<(), Error>;
}

/// Function signature of a [`SimpleSpecialCommand`].
pub type SpecialCompileFn =
    fn(&mut Tokenizer, &mut BytecodeObject, &StatementContext<'_>) -> Result<(), Error>;

/// Adapter turning a plain function into a [`SpecialCommand`].
pub struct SimpleSpecialCommand(pub SpecialCompileFn);

impl SpecialCommand for SimpleSpecialCommand {
    fn compile_command(
        &self,
        tok: &mut Tokenizer,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<(), Error> {
        (self.0)(tok, bco, scc)
    }
}
