//! Peephole optimizer.
//!
//! Rewrites a finished BCO before label relocation, while jumps are still
//! symbolic; deleting an instruction therefore never invalidates a jump
//! target. The passes run depends on the optimisation level:
//!
//! - level 1: store/drop fusion, drop merging, no-op removal, integer
//!   folding, dead-code removal, unused-label removal
//! - level 2: additionally jump threading
//!
//! Level 0 performs relocation only, level -1 not even that.

use crate::{
    bco::BytecodeObject,
    opcode::{Instruction, JUMP_ALWAYS, JUMP_SYMBOLIC, Major, Scope, SpecialOp, StackOp, UnaryOp},
};

/// Runs the passes appropriate for `level` (expected >= 1).
pub fn optimize(bco: &mut BytecodeObject, level: i32) {
    let mut again = true;
    while again {
        again = false;
        again |= fuse_store_drop(bco);
        again |= merge_drops(bco);
        again |= remove_null_ops(bco);
        again |= fold_integer_unary(bco);
        again |= remove_dead_code(bco);
        if level >= 2 {
            again |= thread_jumps(bco);
        }
    }
    remove_unused_labels(bco);
}

/// `store X; drop 1` is a pop. The sequence is what assignments compile
/// to in effect position.
fn fuse_store_drop(bco: &mut BytecodeObject) -> bool {
    let mut changed = false;
    let mut index = 0;
    while index + 1 < bco.instructions().len() {
        let here = bco.instructions()[index];
        let next = bco.instructions()[index + 1];
        if here.major == Major::Store
            && next.major == Major::Stack
            && next.minor == StackOp::Drop as u8
            && next.arg >= 1
        {
            let insns = bco.instructions_mut();
            insns[index].major = Major::Pop;
            if next.arg == 1 {
                bco.remove_instruction(index + 1);
            } else {
                bco.instructions_mut()[index + 1].arg -= 1;
            }
            changed = true;
        } else {
            index += 1;
        }
    }
    changed
}

/// Adjacent drops become one drop.
fn merge_drops(bco: &mut BytecodeObject) -> bool {
    let mut changed = false;
    let mut index = 0;
    while index + 1 < bco.instructions().len() {
        let here = bco.instructions()[index];
        let next = bco.instructions()[index + 1];
        if is_drop(&here) && is_drop(&next) {
            bco.instructions_mut()[index].arg = here.arg.saturating_add(next.arg);
            bco.remove_instruction(index + 1);
            changed = true;
        } else {
            index += 1;
        }
    }
    changed
}

/// `drop 0` and `dup`-less leftovers do nothing.
fn remove_null_ops(bco: &mut BytecodeObject) -> bool {
    let mut changed = false;
    let mut index = 0;
    while index < bco.instructions().len() {
        let here = bco.instructions()[index];
        if is_drop(&here) && here.arg == 0 {
            bco.remove_instruction(index);
            changed = true;
        } else {
            index += 1;
        }
    }
    changed
}

/// Folds unary operators applied to immediate integer pushes.
fn fold_integer_unary(bco: &mut BytecodeObject) -> bool {
    let mut changed = false;
    let mut index = 0;
    while index + 1 < bco.instructions().len() {
        let here = bco.instructions()[index];
        let next = bco.instructions()[index + 1];
        let foldable = here.major == Major::Push
            && here.minor == Scope::Integer as u8
            && next.major == Major::Unary;
        if !foldable {
            index += 1;
            continue;
        }
        let value = here.arg as i16;
        let replacement = match UnaryOp::from_repr(next.minor) {
            Some(UnaryOp::Neg) => value
                .checked_neg()
                .map(|v| Instruction::new(Major::Push, Scope::Integer as u8, v as u16)),
            Some(UnaryOp::Pos) => Some(here),
            Some(UnaryOp::Inc) => value
                .checked_add(1)
                .map(|v| Instruction::new(Major::Push, Scope::Integer as u8, v as u16)),
            Some(UnaryOp::Dec) => value
                .checked_sub(1)
                .map(|v| Instruction::new(Major::Push, Scope::Integer as u8, v as u16)),
            Some(UnaryOp::Not) => Some(Instruction::new(
                Major::Push,
                Scope::Boolean as u8,
                u16::from(value == 0),
            )),
            Some(UnaryOp::Bool) => Some(Instruction::new(
                Major::Push,
                Scope::Boolean as u8,
                u16::from(value != 0),
            )),
            Some(UnaryOp::IsEmpty) => {
                Some(Instruction::new(Major::Push, Scope::Boolean as u8, 0))
            }
            _ => None,
        };
        if let Some(insn) = replacement {
            bco.instructions_mut()[index] = insn;
            bco.remove_instruction(index + 1);
            changed = true;
        } else {
            index += 1;
        }
    }
    changed
}

/// Removes instructions that can never execute: everything between an
/// unconditional control transfer and the next label.
fn remove_dead_code(bco: &mut BytecodeObject) -> bool {
    let mut changed = false;
    let mut index = 0;
    while index < bco.instructions().len() {
        let here = bco.instructions()[index];
        let is_barrier = here.is_unconditional_jump()
            || (here.major == Major::Special
                && matches!(
                    SpecialOp::from_repr(here.minor),
                    Some(SpecialOp::Return | SpecialOp::Terminate | SpecialOp::Throw)
                ));
        index += 1;
        if !is_barrier {
            continue;
        }
        while index < bco.instructions().len() && !bco.instructions()[index].is_label() {
            bco.remove_instruction(index);
            changed = true;
        }
    }
    changed
}

/// Retargets jumps whose destination is immediately another unconditional
/// jump.
fn thread_jumps(bco: &mut BytecodeObject) -> bool {
    let mut changed = false;
    for index in 0..bco.instructions().len() {
        let insn = bco.instructions()[index];
        if !insn.is_symbolic_jump() {
            continue;
        }
        let mut target = insn.arg;
        let mut hops = 0;
        loop {
            let Some(label_pos) = bco.find_label(target) else {
                break;
            };
            let Some(next) = bco
                .instructions()
                .get(label_pos + 1..)
                .and_then(|rest| rest.iter().find(|i| !i.is_label()))
            else {
                break;
            };
            if next.is_unconditional_jump() && next.minor & JUMP_SYMBOLIC != 0 && next.arg != target
            {
                target = next.arg;
                hops += 1;
                // a jump cycle would loop forever; leave it to run time
                if hops > bco.instructions().len() {
                    return changed;
                }
            } else {
                break;
            }
        }
        if target != insn.arg {
            bco.instructions_mut()[index].arg = target;
            changed = true;
        }
    }
    changed
}

/// Deletes label markers no jump refers to.
fn remove_unused_labels(bco: &mut BytecodeObject) {
    let mut max_label = 0u16;
    for insn in bco.instructions() {
        if insn.major == Major::Jump {
            max_label = max_label.max(insn.arg);
        }
    }
    let mut used = vec![false; usize::from(max_label) + 1];
    for insn in bco.instructions() {
        if insn.is_symbolic_jump() {
            used[usize::from(insn.arg)] = true;
        }
    }

    let mut index = 0;
    while index < bco.instructions().len() {
        let insn = bco.instructions()[index];
        if insn.is_label() && !used[usize::from(insn.arg)] {
            bco.remove_instruction(index);
        } else {
            index += 1;
        }
    }
}

fn is_drop(insn: &Instruction) -> bool {
    insn.major == Major::Stack && insn.minor == StackOp::Drop as u8
}

/// Counts instructions of one family; test helper.
#[cfg(test)]
fn count_kind(bco: &BytecodeObject, major: Major) -> usize {
    bco.instructions().iter().filter(|i| i.major == major).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{JUMP_IF_FALSE, JUMP_POP_ALWAYS};

    fn drop1() -> (Major, u8, u16) {
        (Major::Stack, StackOp::Drop as u8, 1)
    }

    #[test]
    fn test_store_drop_becomes_pop() {
        let mut bco = BytecodeObject::new();
        bco.add_instruction(Major::Push, Scope::Integer as u8, 1);
        let name = bco.add_name("X");
        bco.add_instruction(Major::Store, Scope::NamedVariable as u8, name);
        let (a, b, c) = drop1();
        bco.add_instruction(a, b, c);
        optimize(&mut bco, 1);

        assert_eq!(bco.instructions().len(), 2);
        assert_eq!(bco.instructions()[1].major, Major::Pop);
    }

    #[test]
    fn test_merge_drops() {
        let mut bco = BytecodeObject::new();
        let (a, b, _) = drop1();
        bco.add_instruction(a, b, 1);
        bco.add_instruction(a, b, 2);
        bco.add_instruction(a, b, 0);
        optimize(&mut bco, 1);
        assert_eq!(bco.instructions().len(), 1);
        assert_eq!(bco.instructions()[0].arg, 3);
    }

    #[test]
    fn test_fold_negate() {
        let mut bco = BytecodeObject::new();
        bco.add_instruction(Major::Push, Scope::Integer as u8, 5);
        bco.add_instruction(Major::Unary, UnaryOp::Neg as u8, 0);
        optimize(&mut bco, 1);
        assert_eq!(bco.instructions().len(), 1);
        assert_eq!(bco.instructions()[0].arg as i16, -5);
    }

    #[test]
    fn test_dead_code_after_jump_removed() {
        let mut bco = BytecodeObject::new();
        let target = bco.make_label();
        bco.add_jump(JUMP_ALWAYS, target);
        bco.add_instruction(Major::Push, Scope::Integer as u8, 1); // unreachable
        let (a, b, c) = drop1();
        bco.add_instruction(a, b, c); // unreachable
        bco.add_label(target);
        bco.add_instruction(Major::Push, Scope::Integer as u8, 2);
        optimize(&mut bco, 1);
        assert_eq!(count_kind(&bco, Major::Push), 1);
        bco.relocate().unwrap();
    }

    #[test]
    fn test_jump_threading() {
        let mut bco = BytecodeObject::new();
        let first = bco.make_label();
        let second = bco.make_label();
        bco.add_instruction(Major::Push, Scope::Boolean as u8, 0);
        bco.add_jump(JUMP_IF_FALSE | JUMP_POP_ALWAYS, first);
        bco.add_instruction(Major::Push, Scope::Integer as u8, 1);
        bco.add_label(first);
        bco.add_jump(JUMP_ALWAYS, second);
        bco.add_label(second);
        bco.add_instruction(Major::Push, Scope::Integer as u8, 2);
        optimize(&mut bco, 2);

        // the conditional jump now goes straight to `second`
        let cond = bco
            .instructions()
            .iter()
            .find(|i| i.is_symbolic_jump() && i.minor & JUMP_ALWAYS != JUMP_ALWAYS)
            .unwrap();
        assert_eq!(cond.arg, 1);
        bco.relocate().unwrap();
    }

    #[test]
    fn test_unused_labels_removed() {
        let mut bco = BytecodeObject::new();
        let used = bco.make_label();
        let unused = bco.make_label();
        bco.add_jump(JUMP_ALWAYS, used);
        bco.add_label(unused);
        bco.add_label(used);
        optimize(&mut bco, 1);
        assert_eq!(
            bco.instructions().iter().filter(|i| i.is_label()).count(),
            1
        );
    }
}
