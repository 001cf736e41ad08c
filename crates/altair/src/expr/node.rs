//! Expression tree nodes and their code generation.
//!
//! Every node compiles in up to four modes: value (result on stack),
//! effect (side effects only), condition (two-way jump), and store
//! (assignable nodes). Assignable nodes additionally support the
//! read/write halves of a read-modify-write cycle used by special
//! commands that update a value in place.

use crate::{
    bco::{BytecodeObject, Label},
    compiler::{CompilationFlag, StatementContext},
    error::Error,
    expr::builtins::{BuiltinFunction, BuiltinGen},
    opcode::{
        BinaryOp, IM_CALL, IM_LOAD, IM_STORE, JUMP_ALWAYS, JUMP_IF_EMPTY, JUMP_IF_FALSE,
        JUMP_IF_TRUE, JUMP_POP_ALWAYS, Major, StackOp, UnaryOp,
    },
    value::Value,
};

/// Logical connective with ternary-logic shortcut behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Xor,
}

/// One expression tree node.
#[derive(Debug)]
pub enum Node {
    /// A literal value.
    Literal(Value),
    /// A variable reference by name.
    Identifier(String),
    /// `source->NAME` or `source.NAME` member access.
    Member { source: Box<Node>, name: String },
    /// `function(args...)`: function call or array/hash subscript.
    Call { function: Box<Node>, args: Vec<Node> },
    /// Call of a compiler-expanded builtin function.
    Builtin {
        function: &'static BuiltinFunction,
        args: Vec<Node>,
    },
    /// Unary operator.
    Unary { op: UnaryOp, operand: Box<Node> },
    /// Plain binary operator.
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// `AND` / `OR` / `XOR` with shortcut evaluation.
    Logical {
        op: LogicalOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// `target := value`.
    Assignment { target: Box<Node>, value: Box<Node> },
    /// `left = right`: equality comparison that a statement position may
    /// reinterpret as an assignment.
    Case { left: Box<Node>, right: Box<Node> },
    /// `first; second` sequence.
    Sequence { first: Box<Node>, second: Box<Node> },
}

impl Node {
    /// True when the node may be the target of an assignment.
    #[must_use]
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Self::Identifier(_) | Self::Member { .. } | Self::Call { .. }
        )
    }

    /// Reinterprets a top-level `a = b` as assignment, for statement
    /// position compatibility. A left side that cannot take a value
    /// keeps the node as the comparison it parsed as.
    #[must_use]
    pub fn case_to_assignment(self) -> Self {
        match self {
            Self::Case { left, right } if left.is_assignable() => Self::Assignment {
                target: left,
                value: right,
            },
            other => other,
        }
    }

    /// True when the node is a unary instruction with the given operator;
    /// used by `Print` to recognize `#fd` arguments and by `Call` to warn
    /// about leading binary operators.
    #[must_use]
    pub fn is_unary(&self, op: UnaryOp) -> bool {
        matches!(self, Self::Unary { op: o, .. } if *o == op)
    }

    /// True when the node is a binary instruction with the given operator.
    #[must_use]
    pub fn is_binary(&self, op: BinaryOp) -> bool {
        matches!(self, Self::Binary { op: o, .. } if *o == op)
    }

    /// The literal value, when this is a literal node.
    #[must_use]
    pub fn literal_value(&self) -> Option<&Value> {
        match self {
            Self::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Emits code that leaves the node's value on the stack.
    pub fn compile_value(
        &self,
        bco: &mut BytecodeObject,
        cc: &StatementContext<'_>,
    ) -> Result<(), Error> {
        match self {
            Self::Literal(v) => {
                bco.add_push_literal(v);
                Ok(())
            }
            Self::Identifier(name) => {
                bco.add_variable_reference(Major::Push, name, cc);
                Ok(())
            }
            Self::Member { source, name } => {
                source.compile_value(bco, cc)?;
                let index = bco.add_name(name);
                bco.add_instruction(Major::Memref, IM_LOAD, index);
                Ok(())
            }
            Self::Call { function, args } => {
                for arg in args {
                    arg.compile_value(bco, cc)?;
                }
                function.compile_value(bco, cc)?;
                bco.add_instruction(Major::Indirect, IM_LOAD, arg_count(args)?);
                Ok(())
            }
            Self::Builtin { function, args } => compile_builtin(bco, cc, function, args),
            Self::Unary { op, operand } => {
                operand.compile_value(bco, cc)?;
                bco.add_instruction(Major::Unary, *op as u8, 0);
                Ok(())
            }
            Self::Binary { op, left, right } => {
                left.compile_value(bco, cc)?;
                right.compile_value(bco, cc)?;
                bco.add_instruction(Major::Binary, adjust_case(*op, cc) as u8, 0);
                Ok(())
            }
            Self::Logical { op, left, right } => {
                let lend = bco.make_label();
                left.compile_value(bco, cc)?;
                bco.add_instruction(Major::Unary, UnaryOp::Bool as u8, 0);
                let (shortcut, merge) = match op {
                    LogicalOp::And => (JUMP_IF_FALSE, BinaryOp::And),
                    LogicalOp::Or => (JUMP_IF_TRUE, BinaryOp::Or),
                    LogicalOp::Xor => (JUMP_IF_EMPTY, BinaryOp::Xor),
                };
                bco.add_jump(shortcut, lend);
                right.compile_value(bco, cc)?;
                bco.add_instruction(Major::Unary, UnaryOp::Bool as u8, 0);
                bco.add_instruction(Major::Binary, merge as u8, 0);
                bco.add_label(lend);
                Ok(())
            }
            Self::Assignment { target, value } => target.compile_store(bco, cc, value),
            Self::Case { left, right } => {
                left.compile_value(bco, cc)?;
                right.compile_value(bco, cc)?;
                bco.add_instruction(Major::Binary, adjust_case(BinaryOp::CompareEq, cc) as u8, 0);
                Ok(())
            }
            Self::Sequence { first, second } => {
                first.compile_effect(bco, cc)?;
                second.compile_value(bco, cc)
            }
        }
    }

    /// Emits code for the node's side effects only.
    pub fn compile_effect(
        &self,
        bco: &mut BytecodeObject,
        cc: &StatementContext<'_>,
    ) -> Result<(), Error> {
        match self {
            Self::Call { function, args } => {
                for arg in args {
                    arg.compile_value(bco, cc)?;
                }
                function.compile_value(bco, cc)?;
                bco.add_instruction(Major::Indirect, IM_CALL, arg_count(args)?);
                Ok(())
            }
            Self::Sequence { first, second } => {
                first.compile_effect(bco, cc)?;
                second.compile_effect(bco, cc)
            }
            _ => {
                // compute and discard; the optimizer fuses store/drop
                self.compile_value(bco, cc)?;
                bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
                Ok(())
            }
        }
    }

    /// Emits code that jumps to `ift` when the value is true and to
    /// `iff` when it is false or null. Leaves the stack unchanged.
    pub fn compile_condition(
        &self,
        bco: &mut BytecodeObject,
        cc: &StatementContext<'_>,
        ift: Label,
        iff: Label,
    ) -> Result<(), Error> {
        match self {
            Self::Logical {
                op: LogicalOp::And,
                left,
                right,
            } => {
                let lnext = bco.make_label();
                left.compile_condition(bco, cc, lnext, iff)?;
                bco.add_label(lnext);
                right.compile_condition(bco, cc, ift, iff)
            }
            Self::Logical {
                op: LogicalOp::Or,
                left,
                right,
            } => {
                let lnext = bco.make_label();
                left.compile_condition(bco, cc, ift, lnext)?;
                bco.add_label(lnext);
                right.compile_condition(bco, cc, ift, iff)
            }
            _ => {
                // general form: value plus a two-way jump
                self.compile_value(bco, cc)?;
                bco.add_jump(JUMP_IF_TRUE | JUMP_POP_ALWAYS, ift);
                bco.add_jump(JUMP_ALWAYS, iff);
                Ok(())
            }
        }
    }

    /// Emits code that evaluates `rhs` and stores it into this node,
    /// leaving the stored value on the stack.
    pub fn compile_store(
        &self,
        bco: &mut BytecodeObject,
        cc: &StatementContext<'_>,
        rhs: &Node,
    ) -> Result<(), Error> {
        match self {
            Self::Identifier(name) => {
                rhs.compile_value(bco, cc)?;
                bco.add_variable_reference(Major::Store, name, cc);
                Ok(())
            }
            Self::Member { source, name } => {
                rhs.compile_value(bco, cc)?;
                source.compile_value(bco, cc)?;
                let index = bco.add_name(name);
                bco.add_instruction(Major::Memref, IM_STORE, index);
                Ok(())
            }
            Self::Call { function, args } => {
                for arg in args {
                    arg.compile_value(bco, cc)?;
                }
                rhs.compile_value(bco, cc)?;
                function.compile_value(bco, cc)?;
                bco.add_instruction(Major::Indirect, IM_STORE, arg_count(args)?);
                Ok(())
            }
            _ => Err(Error::not_assignable()),
        }
    }

    /// Emits the read half of a read-modify-write cycle: the current
    /// value ends up on top of the stack, with any addressing state kept
    /// below it for the write half.
    pub fn compile_read(
        &self,
        bco: &mut BytecodeObject,
        cc: &StatementContext<'_>,
    ) -> Result<(), Error> {
        match self {
            Self::Identifier(name) => {
                bco.add_variable_reference(Major::Push, name, cc);
                Ok(())
            }
            Self::Member { source, name } => {
                source.compile_value(bco, cc)?;
                bco.add_instruction(Major::Stack, StackOp::Dup as u8, 0);
                let index = bco.add_name(name);
                bco.add_instruction(Major::Memref, IM_LOAD, index);
                Ok(())
            }
            Self::Call { function, args } => {
                for arg in args {
                    arg.compile_value(bco, cc)?;
                }
                function.compile_value(bco, cc)?;
                let argc = arg_count(args)?;
                // duplicate the whole argument pack plus the callable
                for _ in 0..=argc {
                    bco.add_instruction(Major::Stack, StackOp::Dup as u8, argc);
                }
                bco.add_instruction(Major::Indirect, IM_LOAD, argc);
                Ok(())
            }
            _ => Err(Error::not_assignable()),
        }
    }

    /// Emits the write half of a read-modify-write cycle: consumes the
    /// updated value and the addressing state left by
    /// [`Node::compile_read`], leaving the value on top.
    pub fn compile_write(
        &self,
        bco: &mut BytecodeObject,
        cc: &StatementContext<'_>,
    ) -> Result<(), Error> {
        match self {
            Self::Identifier(name) => {
                bco.add_variable_reference(Major::Store, name, cc);
                Ok(())
            }
            Self::Member { source: _, name } => {
                // stack: object, value -- swap into store order
                bco.add_instruction(Major::Stack, StackOp::Swap as u8, 0);
                let index = bco.add_name(name);
                bco.add_instruction(Major::Memref, IM_STORE, index);
                Ok(())
            }
            Self::Call { function: _, args } => {
                // stack: args..., callable, value -- swap into store order
                bco.add_instruction(Major::Stack, StackOp::Swap as u8, 0);
                bco.add_instruction(Major::Indirect, IM_STORE, arg_count(args)?);
                Ok(())
            }
            _ => Err(Error::not_assignable()),
        }
    }

}

/// Emits the fixed instruction shape of a builtin function call.
fn compile_builtin(
    bco: &mut BytecodeObject,
    cc: &StatementContext<'_>,
    function: &BuiltinFunction,
    args: &[Node],
) -> Result<(), Error> {
    if args.len() < function.min_args {
        return Err(Error::too_few_arguments(function.name));
    }
    if args.len() > function.max_args {
        return Err(Error::too_many_arguments(function.name));
    }
    match function.kind {
        BuiltinGen::Unary(op) => {
            args[0].compile_value(bco, cc)?;
            bco.add_instruction(Major::Unary, op as u8, 0);
            Ok(())
        }
        BuiltinGen::Fold(op) => {
            args[0].compile_value(bco, cc)?;
            for arg in &args[1..] {
                arg.compile_value(bco, cc)?;
                bco.add_instruction(Major::Binary, adjust_case(op, cc) as u8, 0);
            }
            Ok(())
        }
        BuiltinGen::If => {
            let ift = bco.make_label();
            let iff = bco.make_label();
            let lend = bco.make_label();
            args[0].compile_condition(bco, cc, ift, iff)?;
            bco.add_label(ift);
            args[1].compile_value(bco, cc)?;
            bco.add_jump(JUMP_ALWAYS, lend);
            bco.add_label(iff);
            match args.get(2) {
                Some(other) => other.compile_value(bco, cc)?,
                None => bco.add_push_literal(&Value::Null),
            }
            bco.add_label(lend);
            Ok(())
        }
        BuiltinGen::ByName => Err(Error::misplaced_keyword("ByName")),
    }
}

/// Applies the case-blindness option to an operator.
fn adjust_case(op: BinaryOp, cc: &StatementContext<'_>) -> BinaryOp {
    if cc.has_flag(CompilationFlag::CaseBlind) {
        op.case_blind()
    } else {
        op
    }
}

fn arg_count(args: &[Node]) -> Result<u16, Error> {
    u16::try_from(args.len()).map_err(|_| Error::new("Too many arguments"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Scope;

    fn ident(name: &str) -> Node {
        Node::Identifier(name.to_owned())
    }

    #[test]
    fn test_case_to_assignment() {
        let case = Node::Case {
            left: Box::new(ident("X")),
            right: Box::new(Node::Literal(Value::Int(1))),
        };
        assert!(matches!(
            case.case_to_assignment(),
            Node::Assignment { .. }
        ));

        let case = Node::Case {
            left: Box::new(Node::Literal(Value::Int(2))),
            right: Box::new(Node::Literal(Value::Int(1))),
        };
        assert!(matches!(case.case_to_assignment(), Node::Case { .. }));
    }

    #[test]
    fn test_store_through_non_assignable_fails() {
        let mut bco = BytecodeObject::new();
        let cc = StatementContext::new();
        let lit = Node::Literal(Value::Int(1));
        assert!(
            lit.compile_store(&mut bco, &cc, &Node::Literal(Value::Int(2)))
                .is_err()
        );
        assert!(lit.compile_read(&mut bco, &cc).is_err());
    }

    #[test]
    fn test_value_of_binary_is_case_blind_by_default() {
        let mut bco = BytecodeObject::new();
        let cc = StatementContext::new();
        let node = Node::Binary {
            op: BinaryOp::CompareEq,
            left: Box::new(Node::Literal(Value::str("a"))),
            right: Box::new(Node::Literal(Value::str("A"))),
        };
        node.compile_value(&mut bco, &cc).unwrap();
        let last = bco.instructions().last().unwrap();
        assert_eq!(last.minor, BinaryOp::CompareEqNc as u8);
    }

    #[test]
    fn test_identifier_uses_local_slot_in_local_context() {
        let mut bco = BytecodeObject::new();
        bco.add_local_variable("X");
        let cc = StatementContext::new().with_flag(CompilationFlag::LocalContext);
        ident("X").compile_value(&mut bco, &cc).unwrap();
        let insn = bco.instructions()[0];
        assert_eq!(insn.major, Major::Push);
        assert_eq!(insn.minor, Scope::Local as u8);
        assert_eq!(insn.arg, 0);
    }

    #[test]
    fn test_member_read_write_cycle_balances() {
        let mut bco = BytecodeObject::new();
        let cc = StatementContext::new();
        let node = Node::Member {
            source: Box::new(ident("OBJ")),
            name: "FIELD".to_owned(),
        };
        node.compile_read(&mut bco, &cc).unwrap();
        node.compile_write(&mut bco, &cc).unwrap();
        // read: push obj, dup, load; write: swap, store
        let minors: Vec<(Major, u8)> = bco
            .instructions()
            .iter()
            .map(|i| (i.major, i.minor))
            .collect();
        assert_eq!(
            minors,
            [
                (Major::Push, Scope::NamedVariable as u8),
                (Major::Stack, StackOp::Dup as u8),
                (Major::Memref, IM_LOAD),
                (Major::Stack, StackOp::Swap as u8),
                (Major::Memref, IM_STORE),
            ]
        );
    }
}
