//! Script error type.
//!
//! There is exactly one error kind for everything the interpreter can
//! report: compile-time problems, runtime type/range errors, and errors
//! raised by scripts themselves via `Abort`. Sub-kinds are conveyed only
//! through the message text. An error optionally carries a trace (one line
//! per stack level or source position) that is accumulated as the error
//! travels outward.

use std::fmt;

/// Error raised by the tokenizer, compiler or virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    message: String,
    trace: Vec<String>,
}

impl Error {
    /// Creates an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Returns the bare error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the accumulated trace, one entry per level.
    #[must_use]
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// Appends one line to the trace.
    pub fn add_trace(&mut self, line: impl Into<String>) {
        self.trace.push(line.into());
    }

    /// "Expecting X" syntax error.
    pub fn expect_symbol(symbol: &str) -> Self {
        Self::new(format!("Expecting \"{symbol}\""))
    }

    /// "Expecting X or Y" syntax error.
    pub fn expect_symbol2(first: &str, second: &str) -> Self {
        Self::new(format!("Expecting \"{first}\" or \"{second}\""))
    }

    /// "Expecting keyword" syntax error.
    pub fn expect_keyword(keyword: &str) -> Self {
        Self::new(format!("Expecting \"{keyword}\""))
    }

    /// "Expecting one of two keywords" syntax error.
    pub fn expect_keyword2(first: &str, second: &str) -> Self {
        Self::new(format!("Expecting \"{first}\" or \"{second}\""))
    }

    /// "Expecting identifier" syntax error. \a what names the item.
    pub fn expect_identifier(what: &str) -> Self {
        Self::new(format!("Expecting identifier, {what}"))
    }

    /// Keyword appears where it is not allowed.
    pub fn misplaced_keyword(keyword: &str) -> Self {
        Self::new(format!("\"{keyword}\" not allowed here"))
    }

    /// Statement or expression ends but input continues.
    pub fn garbage_at_end(expression: bool) -> Self {
        if expression {
            Self::new("Expected operator")
        } else {
            Self::new("Expected end of statement")
        }
    }

    /// Multi-line statement in a single-line context.
    pub fn invalid_multiline() -> Self {
        Self::new("Multiline statements not allowed here")
    }

    /// Name does not resolve anywhere.
    pub fn unknown_identifier(name: &str) -> Self {
        Self::new(format!("Unknown identifier: {name}"))
    }

    /// Operand has the wrong type.
    pub fn type_error() -> Self {
        Self::new("Type mismatch")
    }

    /// Numeric operand out of range.
    pub fn range_error() -> Self {
        Self::new("Range error")
    }

    /// Assignment to something that cannot take a value.
    pub fn not_assignable() -> Self {
        Self::new("Not assignable")
    }

    /// Value cannot be stored in an external representation.
    pub fn not_serializable() -> Self {
        Self::new("Not serializable")
    }

    /// Too many arguments in a call of \a name.
    pub fn too_many_arguments(name: &str) -> Self {
        Self::new(format!("Too many arguments to \"{name}\""))
    }

    /// Too few arguments in a call of \a name.
    pub fn too_few_arguments(name: &str) -> Self {
        Self::new(format!("Too few arguments to \"{name}\""))
    }

    /// Internal consistency failure (compiler or VM bug surfaced to the user).
    pub fn internal(what: &str) -> Self {
        Self::new(format!("Internal error: {what}"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for line in &self.trace {
            write!(f, "\n{line}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_accumulates() {
        let mut e = Error::new("boom");
        assert_eq!(e.message(), "boom");
        assert!(e.trace().is_empty());

        e.add_trace("in line 10");
        e.add_trace("in file \"t.q\"");
        assert_eq!(e.to_string(), "boom\nin line 10\nin file \"t.q\"");
    }

    #[test]
    fn test_named_constructors() {
        assert_eq!(Error::expect_symbol(")").message(), "Expecting \")\"");
        assert_eq!(
            Error::unknown_identifier("FOO").message(),
            "Unknown identifier: FOO"
        );
        assert_eq!(Error::garbage_at_end(true).message(), "Expected operator");
        assert_eq!(
            Error::garbage_at_end(false).message(),
            "Expected end of statement"
        );
    }
}
