//! Bytecode objects.
//!
//! A `BytecodeObject` (BCO) is one compiled routine: the instruction
//! vector plus the literal pool, name pool, local-variable table, argument
//! descriptor and line-number table the instructions refer to. The
//! compiler emits into a mutable BCO; after [`BytecodeObject::relocate`]
//! the object is effectively immutable and can be shared between any
//! number of callable values and processes.
//!
//! Labels are symbolic while compiling: `add_label` places a marker
//! instruction, jumps carry the label id with the `JUMP_SYMBOLIC` flag,
//! and `relocate` resolves both to instruction addresses. The VM can also
//! execute unrelocated code by scanning for markers, which is what keeps
//! optimisation level -1 honest.

use crate::{
    compiler::{CompilationFlag, StatementContext},
    error::Error,
    names::NameMap,
    opcode::{
        Instruction, JUMP_SYMBOLIC, Major, Scope, SpecialOp,
    },
    value::Value,
};

/// Symbolic jump target used during compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(pub(crate) u16);

/// One compiled routine.
#[derive(Debug, Default)]
pub struct BytecodeObject {
    instructions: Vec<Instruction>,
    literals: Vec<Value>,
    names: NameMap,
    local_variables: NameMap,

    min_args: usize,
    max_args: usize,
    is_varargs: bool,
    is_procedure: bool,

    label_count: u16,
    /// Sparse `(instruction index, source line)` pairs, ascending.
    line_numbers: Vec<(usize, u32)>,

    file_name: String,
    origin: String,
    subroutine_name: String,

    /// Set when the code can call back into user code, which makes
    /// compile-time assumptions about the symbol table unsafe.
    has_user_call: bool,
}

impl BytecodeObject {
    /// Creates an empty BCO. New objects are procedures until told
    /// otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            is_procedure: true,
            ..Self::default()
        }
    }

    /// True when this routine produces no return value.
    #[must_use]
    pub fn is_procedure(&self) -> bool {
        self.is_procedure
    }

    /// Marks this routine as procedure or function.
    pub fn set_is_procedure(&mut self, is_procedure: bool) {
        self.is_procedure = is_procedure;
    }

    /// True when extra arguments are collected into an array.
    #[must_use]
    pub fn is_varargs(&self) -> bool {
        self.is_varargs
    }

    /// Enables varargs collection into the last local variable.
    pub fn set_is_varargs(&mut self, is_varargs: bool) {
        self.is_varargs = is_varargs;
    }

    /// Minimum number of call arguments.
    #[must_use]
    pub fn min_args(&self) -> usize {
        self.min_args
    }

    /// Maximum number of fixed call arguments.
    #[must_use]
    pub fn max_args(&self) -> usize {
        self.max_args
    }

    /// Declares the next argument. Arguments occupy the first local slots
    /// in declaration order.
    pub fn add_argument(&mut self, name: &str, optional: bool) {
        self.local_variables.add_maybe(name);
        self.max_args += 1;
        if !optional {
            self.min_args += 1;
        }
    }

    /// Adds a local variable, returning its slot.
    pub fn add_local_variable(&mut self, name: &str) -> usize {
        self.local_variables.add_maybe(name)
    }

    /// True when `name` is a known local variable.
    #[must_use]
    pub fn has_local_variable(&self, name: &str) -> bool {
        self.local_variables.get_index_by_name(name).is_some()
    }

    /// The local-variable table.
    #[must_use]
    pub fn local_variables(&self) -> &NameMap {
        &self.local_variables
    }

    /// Copies another BCO's local-variable table. Used when compiling
    /// alternative code sequences for the same scope.
    pub fn copy_local_variables_from(&mut self, other: &Self) {
        self.local_variables = other.local_variables.clone();
    }

    /// Interns a name, returning its pool index.
    pub fn add_name(&mut self, name: &str) -> u16 {
        let index = self.names.add_maybe(name);
        u16::try_from(index).expect("name pool exceeds u16 range")
    }

    /// True when `name` is in the name pool.
    #[must_use]
    pub fn has_name(&self, name: &str) -> bool {
        self.names.get_index_by_name(name).is_some()
    }

    /// Reads a name pool entry.
    #[must_use]
    pub fn name(&self, index: u16) -> Option<&str> {
        self.names.get_name_by_index(usize::from(index))
    }

    /// Interns a literal, returning its pool index.
    pub fn add_literal(&mut self, value: Value) -> u16 {
        let index = self.literals.len();
        self.literals.push(value);
        u16::try_from(index).expect("literal pool exceeds u16 range")
    }

    /// Reads a literal pool entry.
    #[must_use]
    pub fn literal(&self, index: u16) -> Option<&Value> {
        self.literals.get(usize::from(index))
    }

    /// True when the emitted code may call back into user code.
    #[must_use]
    pub fn has_user_call(&self) -> bool {
        self.has_user_call
    }

    /// Source file name, for diagnostics.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Sets the source file name.
    pub fn set_file_name(&mut self, name: impl Into<String>) {
        self.file_name = name.into();
    }

    /// Origin tag (plugin name or similar).
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Sets the origin tag.
    pub fn set_origin(&mut self, origin: impl Into<String>) {
        self.origin = origin.into();
    }

    /// Subroutine name, empty for anonymous code.
    #[must_use]
    pub fn subroutine_name(&self) -> &str {
        &self.subroutine_name
    }

    /// Sets the subroutine name.
    pub fn set_subroutine_name(&mut self, name: impl Into<String>) {
        self.subroutine_name = name.into();
    }

    /// Appends a raw instruction.
    pub fn add_instruction(&mut self, major: Major, minor: u8, arg: u16) {
        if major == Major::Indirect
            || (major == Major::Special
                && matches!(
                    SpecialOp::from_repr(minor),
                    Some(SpecialOp::Load | SpecialOp::EvalStatement | SpecialOp::RunHook)
                ))
        {
            self.has_user_call = true;
        }
        self.instructions.push(Instruction::new(major, minor, arg));
    }

    /// Allocates a fresh label.
    pub fn make_label(&mut self) -> Label {
        let label = Label(self.label_count);
        self.label_count = self
            .label_count
            .checked_add(1)
            .expect("label count exceeds u16 range");
        label
    }

    /// Places a label at the current position.
    pub fn add_label(&mut self, label: Label) {
        self.instructions
            .push(Instruction::new(Major::Jump, JUMP_SYMBOLIC, label.0));
    }

    /// Emits a jump with the given `JUMP_*` flags to a label.
    pub fn add_jump(&mut self, flags: u8, label: Label) {
        self.instructions.push(Instruction::new(
            Major::Jump,
            flags | JUMP_SYMBOLIC,
            label.0,
        ));
    }

    /// Emits the cheapest push for a literal value.
    ///
    /// Small integers, booleans and null encode into the instruction
    /// itself; everything else goes through the literal pool.
    pub fn add_push_literal(&mut self, value: &Value) {
        match value {
            Value::Null => self.add_instruction(Major::Push, Scope::Boolean as u8, 0xFFFF),
            Value::Bool(b) => self.add_instruction(Major::Push, Scope::Boolean as u8, u16::from(*b)),
            Value::Int(i) if i16::try_from(*i).is_ok() => {
                self.add_instruction(Major::Push, Scope::Integer as u8, *i as i16 as u16);
            }
            other => {
                let index = self.add_literal(other.clone());
                self.add_instruction(Major::Push, Scope::Literal as u8, index);
            }
        }
    }

    /// Emits a variable access, choosing local-slot addressing when the
    /// compilation context permits it and falling back to lookup by name.
    pub fn add_variable_reference(&mut self, major: Major, name: &str, scc: &StatementContext<'_>) {
        if scc.has_flag(CompilationFlag::LocalContext) {
            if let Some(slot) = self.local_variables.get_index_by_name(name) {
                let arg = u16::try_from(slot).expect("local slot exceeds u16 range");
                self.add_instruction(major, Scope::Local as u8, arg);
                return;
            }
            if scc.has_flag(CompilationFlag::AlsoGlobalContext) && scc.knows_global(name) {
                let index = self.add_name(name);
                self.add_instruction(major, Scope::NamedShared as u8, index);
                return;
            }
        }
        let index = self.add_name(name);
        self.add_instruction(major, Scope::NamedVariable as u8, index);
    }

    /// Records the source line for the instructions emitted from here on.
    pub fn add_line_number(&mut self, line: u32) {
        let position = self.instructions.len();
        match self.line_numbers.last_mut() {
            Some((last_pos, last_line)) if *last_pos == position => *last_line = line,
            Some((_, last_line)) if *last_line == line => {}
            _ => self.line_numbers.push((position, line)),
        }
    }

    /// The source line of the instruction at `ip`, if known.
    #[must_use]
    pub fn line_number_for(&self, ip: usize) -> Option<u32> {
        let mut result = None;
        for &(pos, line) in &self.line_numbers {
            if pos > ip {
                break;
            }
            result = Some(line);
        }
        result
    }

    /// The instruction vector.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Finds the address of a still-symbolic label (unrelocated code).
    #[must_use]
    pub fn find_label(&self, label: u16) -> Option<usize> {
        self.instructions
            .iter()
            .position(|insn| insn.is_label() && insn.arg == label)
    }

    /// Mutable instruction access for the optimizer.
    pub(crate) fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.instructions
    }

    /// Removes one instruction, keeping the line table consistent.
    /// Only valid while jumps are still symbolic.
    pub(crate) fn remove_instruction(&mut self, index: usize) {
        self.instructions.remove(index);
        for (pos, _) in &mut self.line_numbers {
            if *pos > index {
                *pos -= 1;
            }
        }
    }

    /// Resolves labels to instruction addresses and removes the markers.
    ///
    /// After this, no instruction carries `JUMP_SYMBOLIC`, and every jump
    /// target is an address in `0..=len`. Fails when a jump references a
    /// label that was never placed.
    pub fn relocate(&mut self) -> Result<(), Error> {
        let mut label_address: Vec<Option<u16>> = vec![None; usize::from(self.label_count)];
        let mut index_map: Vec<usize> = Vec::with_capacity(self.instructions.len());

        let mut address: u16 = 0;
        for insn in &self.instructions {
            index_map.push(usize::from(address));
            if insn.is_label() {
                label_address[usize::from(insn.arg)] = Some(address);
            } else {
                address += 1;
            }
        }

        let mut relocated = Vec::with_capacity(usize::from(address));
        for insn in &self.instructions {
            if insn.is_label() {
                continue;
            }
            let mut insn = *insn;
            if insn.is_symbolic_jump() {
                let target = label_address
                    .get(usize::from(insn.arg))
                    .copied()
                    .flatten()
                    .ok_or_else(|| Error::internal("unresolved label"))?;
                insn.arg = target;
                insn.minor &= !JUMP_SYMBOLIC;
            }
            relocated.push(insn);
        }

        for (pos, _) in &mut self.line_numbers {
            *pos = index_map.get(*pos).copied().unwrap_or(relocated.len());
        }
        self.instructions = relocated;
        Ok(())
    }

    /// Inlines another BCO's instructions, remapping its literal, name and
    /// label references into this object's pools.
    ///
    /// The other object's local-variable table must be compatible (it is
    /// normally initialized via [`BytecodeObject::copy_local_variables_from`]).
    pub fn append(&mut self, other: Self) {
        let label_offset = self.label_count;
        self.label_count = self
            .label_count
            .checked_add(other.label_count)
            .expect("label count exceeds u16 range");
        let base_index = self.instructions.len();

        let Self {
            instructions,
            literals,
            names,
            line_numbers,
            has_user_call,
            ..
        } = other;

        for mut insn in instructions {
            match insn.major {
                Major::Jump => {
                    if insn.minor & JUMP_SYMBOLIC != 0 {
                        insn.arg += label_offset;
                    }
                }
                Major::Push | Major::Pop | Major::Store => match Scope::from_repr(insn.minor) {
                    Some(Scope::Literal) => {
                        let value = literals[usize::from(insn.arg)].clone();
                        insn.arg = self.add_literal(value);
                    }
                    Some(Scope::NamedShared | Scope::NamedVariable) => {
                        let name = names
                            .get_name_by_index(usize::from(insn.arg))
                            .expect("name pool index out of range");
                        insn.arg = self.add_name(name);
                    }
                    _ => {}
                },
                Major::Memref | Major::Dim => {
                    let name = names
                        .get_name_by_index(usize::from(insn.arg))
                        .expect("name pool index out of range");
                    insn.arg = self.add_name(name);
                }
                Major::Special => {
                    if matches!(
                        SpecialOp::from_repr(insn.minor),
                        Some(
                            SpecialOp::DefSub
                                | SpecialOp::DefShipProperty
                                | SpecialOp::DefPlanetProperty
                        )
                    ) {
                        let name = names
                            .get_name_by_index(usize::from(insn.arg))
                            .expect("name pool index out of range");
                        insn.arg = self.add_name(name);
                    }
                }
                _ => {}
            }
            self.instructions.push(insn);
        }

        for (pos, line) in line_numbers {
            self.line_numbers.push((pos + base_index, line));
        }
        self.has_user_call |= has_user_call;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{JUMP_ALWAYS, JUMP_IF_FALSE, StackOp, UnaryOp};

    #[test]
    fn test_push_literal_encodings() {
        let mut bco = BytecodeObject::new();
        bco.add_push_literal(&Value::Null);
        bco.add_push_literal(&Value::Bool(true));
        bco.add_push_literal(&Value::Int(-7));
        bco.add_push_literal(&Value::Int(100_000));
        bco.add_push_literal(&Value::str("x"));

        let insns = bco.instructions();
        assert_eq!(insns[0], Instruction::new(Major::Push, Scope::Boolean as u8, 0xFFFF));
        assert_eq!(insns[1], Instruction::new(Major::Push, Scope::Boolean as u8, 1));
        assert_eq!(
            insns[2],
            Instruction::new(Major::Push, Scope::Integer as u8, (-7i16) as u16)
        );
        assert_eq!(insns[3], Instruction::new(Major::Push, Scope::Literal as u8, 0));
        assert_eq!(insns[4], Instruction::new(Major::Push, Scope::Literal as u8, 1));
        assert_eq!(bco.literal(0), Some(&Value::Int(100_000)));
    }

    #[test]
    fn test_relocate_resolves_jumps() {
        let mut bco = BytecodeObject::new();
        let skip = bco.make_label();
        bco.add_jump(JUMP_ALWAYS, skip);
        bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
        bco.add_label(skip);
        bco.add_instruction(Major::Unary, UnaryOp::Inc as u8, 0);
        bco.relocate().unwrap();

        let insns = bco.instructions();
        assert_eq!(insns.len(), 3);
        assert_eq!(insns[0].major, Major::Jump);
        assert_eq!(insns[0].minor, JUMP_ALWAYS);
        assert_eq!(insns[0].arg, 2);
        // every jump target is a valid address
        for insn in insns {
            if insn.major == Major::Jump {
                assert!(usize::from(insn.arg) <= insns.len());
            }
        }
    }

    #[test]
    fn test_relocate_rejects_missing_label() {
        let mut bco = BytecodeObject::new();
        let dangling = bco.make_label();
        bco.add_jump(JUMP_IF_FALSE, dangling);
        assert!(bco.relocate().is_err());
    }

    #[test]
    fn test_find_label_in_unrelocated_code() {
        let mut bco = BytecodeObject::new();
        let l = bco.make_label();
        bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
        bco.add_label(l);
        assert_eq!(bco.find_label(0), Some(1));
        assert_eq!(bco.find_label(7), None);
    }

    #[test]
    fn test_append_remaps_pools_and_labels() {
        let mut inner = BytecodeObject::new();
        let l = inner.make_label();
        inner.add_push_literal(&Value::str("inner"));
        inner.add_jump(JUMP_ALWAYS, l);
        inner.add_label(l);
        let name = inner.add_name("TARGET");
        inner.add_instruction(Major::Pop, Scope::NamedVariable as u8, name);

        let mut outer = BytecodeObject::new();
        let outer_label = outer.make_label();
        outer.add_push_literal(&Value::str("outer"));
        outer.add_label(outer_label);
        outer.append(inner);

        // inner's label 0 became label 1, its literal index 0 became 1
        let insns = outer.instructions();
        assert_eq!(insns[2], Instruction::new(Major::Push, Scope::Literal as u8, 1));
        assert!(insns[3].is_symbolic_jump());
        assert_eq!(insns[3].arg, 1);
        assert_eq!(outer.literal(1), Some(&Value::str("inner")));
        assert_eq!(outer.name(insns[5].arg), Some("TARGET"));
        outer.relocate().unwrap();
    }

    #[test]
    fn test_line_numbers() {
        let mut bco = BytecodeObject::new();
        bco.add_line_number(1);
        bco.add_instruction(Major::Stack, StackOp::Drop as u8, 0);
        bco.add_instruction(Major::Stack, StackOp::Drop as u8, 0);
        bco.add_line_number(2);
        bco.add_instruction(Major::Stack, StackOp::Drop as u8, 0);
        assert_eq!(bco.line_number_for(0), Some(1));
        assert_eq!(bco.line_number_for(1), Some(1));
        assert_eq!(bco.line_number_for(2), Some(2));
    }

    #[test]
    fn test_arguments() {
        let mut bco = BytecodeObject::new();
        bco.add_argument("A", false);
        bco.add_argument("B", false);
        bco.add_argument("C", true);
        assert_eq!(bco.min_args(), 2);
        assert_eq!(bco.max_args(), 3);
        assert!(bco.has_local_variable("b"));
    }
}
