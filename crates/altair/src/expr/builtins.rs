//! Builtin expression functions.
//!
//! These are the fundamental functions the expression parser recognizes
//! by name when followed by an opening parenthesis. They are not values:
//! each one compiles into a fixed instruction shape. Because they do not
//! appear in any symbol table, the ambiguity resolver consults this table
//! before rejecting an unknown name.

use crate::opcode::{BinaryOp, UnaryOp};

/// How a builtin function call turns into code.
#[derive(Debug, Clone, Copy)]
pub enum BuiltinGen {
    /// A single unary instruction.
    Unary(UnaryOp),
    /// A left fold over a binary instruction (`Min`, `Max`).
    Fold(BinaryOp),
    /// `If(cond, then[, else])` through condition mode.
    If,
    /// `ByName(expr)`: valid only where a keymap or hook name is
    /// expected; anywhere else it is a compile error.
    ByName,
}

/// Table entry for a builtin function.
#[derive(Debug)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub kind: BuiltinGen,
}

const fn unary(name: &'static str, op: UnaryOp) -> BuiltinFunction {
    BuiltinFunction {
        name,
        min_args: 1,
        max_args: 1,
        kind: BuiltinGen::Unary(op),
    }
}

static FUNCTIONS: &[BuiltinFunction] = &[
    unary("ABS", UnaryOp::Abs),
    unary("ASC", UnaryOp::Asc),
    unary("ATOM", UnaryOp::Atom),
    unary("ATOMSTR", UnaryOp::AtomStr),
    BuiltinFunction {
        name: "BYNAME",
        min_args: 1,
        max_args: 1,
        kind: BuiltinGen::ByName,
    },
    unary("CHR", UnaryOp::Chr),
    unary("CHR$", UnaryOp::Chr),
    BuiltinFunction {
        name: "IF",
        min_args: 2,
        max_args: 3,
        kind: BuiltinGen::If,
    },
    BuiltinFunction {
        name: "IIF",
        min_args: 2,
        max_args: 3,
        kind: BuiltinGen::If,
    },
    unary("ISEMPTY", UnaryOp::IsEmpty),
    unary("ISNUM", UnaryOp::IsNum),
    unary("ISSTRING", UnaryOp::IsString),
    unary("LEN", UnaryOp::Length),
    BuiltinFunction {
        name: "MAX",
        min_args: 1,
        max_args: usize::MAX,
        kind: BuiltinGen::Fold(BinaryOp::Max),
    },
    BuiltinFunction {
        name: "MIN",
        min_args: 1,
        max_args: usize::MAX,
        kind: BuiltinGen::Fold(BinaryOp::Min),
    },
    unary("STR", UnaryOp::Str),
    unary("TRIM", UnaryOp::Trim),
    unary("VAL", UnaryOp::Val),
    unary("Z", UnaryOp::Zap),
    unary("ZAP", UnaryOp::Zap),
];

/// Looks up a builtin function by upper-case name.
#[must_use]
pub fn lookup_builtin_function(name: &str) -> Option<&'static BuiltinFunction> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert!(lookup_builtin_function("ABS").is_some());
        assert!(lookup_builtin_function("Z").is_some());
        assert!(lookup_builtin_function("NOSUCH").is_none());
    }

    #[test]
    fn test_table_is_upper_case() {
        for f in FUNCTIONS {
            assert_eq!(f.name, f.name.to_ascii_uppercase());
            assert!(f.min_args <= f.max_args);
        }
    }
}
