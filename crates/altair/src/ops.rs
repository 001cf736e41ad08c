//! Operator semantics.
//!
//! Every operator takes values and returns a value. Null propagates
//! through most operations ("unknown in, unknown out"); genuine type
//! mismatches raise. Integers are 32-bit and promote to float on
//! overflow; comparisons use ternary logic with the `_NC` variants
//! comparing strings after ASCII upcasing.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::{
    error::Error,
    filetable::FileTable,
    keymap::parse_key,
    opcode::{BinaryOp, TernaryOp, UnaryOp},
    value::{CallableValue, Value},
    world::World,
};

/// A numeric operand after coercion.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i32),
    Float(f64),
}

/// Coerces a value to a number; `None` for null, error for non-numbers.
/// Booleans count as integers.
fn to_num(value: &Value) -> Result<Option<Num>, Error> {
    match value {
        Value::Null => Ok(None),
        Value::Int(i) => Ok(Some(Num::Int(*i))),
        Value::Float(f) => Ok(Some(Num::Float(*f))),
        Value::Bool(b) => Ok(Some(Num::Int(i32::from(*b)))),
        _ => Err(Error::type_error()),
    }
}

fn num_value(n: Num) -> Value {
    match n {
        Num::Int(i) => Value::Int(i),
        Num::Float(f) => Value::Float(f),
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => f64::from(i),
        Num::Float(f) => f,
    }
}

/// Executes a unary operator.
pub fn execute_unary(world: &mut World, op: UnaryOp, value: Value) -> Result<Value, Error> {
    match op {
        UnaryOp::Not => Ok(value.truth().map(|b| !b).into()),
        UnaryOp::Bool => Ok(value.truth().into()),
        UnaryOp::Neg => match to_num(&value)? {
            None => Ok(Value::Null),
            Some(Num::Int(i)) => Ok(i
                .checked_neg()
                .map_or(Value::Float(-f64::from(i)), Value::Int)),
            Some(Num::Float(f)) => Ok(Value::Float(-f)),
        },
        UnaryOp::Pos => Ok(to_num(&value)?.map_or(Value::Null, num_value)),
        UnaryOp::Abs => match to_num(&value)? {
            None => Ok(Value::Null),
            Some(Num::Int(i)) => Ok(i
                .checked_abs()
                .map_or(Value::Float(f64::from(i).abs()), Value::Int)),
            Some(Num::Float(f)) => Ok(Value::Float(f.abs())),
        },
        UnaryOp::IsEmpty => Ok(Value::Bool(value.is_null())),
        UnaryOp::IsNum => Ok(Value::Bool(matches!(
            value,
            Value::Int(_) | Value::Float(_) | Value::Bool(_)
        ))),
        UnaryOp::IsString => Ok(Value::Bool(matches!(value, Value::Str(_)))),
        UnaryOp::IsProcedure => match value {
            Value::Null => Ok(Value::Null),
            Value::Callable(c) => Ok(Value::Bool(c.is_procedure_call())),
            _ => Ok(Value::Bool(false)),
        },
        UnaryOp::Length => match value {
            Value::Null => Ok(Value::Null),
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i32)),
            _ => Err(Error::type_error()),
        },
        UnaryOp::Trim => match value {
            Value::Null => Ok(Value::Null),
            Value::Str(s) => Ok(Value::str(s.trim())),
            _ => Err(Error::type_error()),
        },
        UnaryOp::UCase => match value {
            Value::Null => Ok(Value::Null),
            Value::Str(s) => Ok(Value::str(s.to_ascii_uppercase())),
            _ => Err(Error::type_error()),
        },
        UnaryOp::Chr => match to_num(&value)? {
            None => Ok(Value::Null),
            Some(n) => {
                let code = match n {
                    Num::Int(i) => u32::try_from(i).map_err(|_| Error::range_error())?,
                    Num::Float(_) => return Err(Error::type_error()),
                };
                let ch = char::from_u32(code).ok_or_else(Error::range_error)?;
                Ok(Value::str(ch.to_string()))
            }
        },
        UnaryOp::Asc => match value {
            Value::Null => Ok(Value::Null),
            Value::Str(s) => Ok(s
                .chars()
                .next()
                .map_or(Value::Null, |ch| Value::Int(ch as i32))),
            _ => Err(Error::type_error()),
        },
        UnaryOp::Val => match value {
            Value::Null => Ok(Value::Null),
            Value::Int(_) | Value::Float(_) => Ok(value),
            Value::Str(s) => {
                let text = s.trim();
                if let Ok(i) = text.parse::<i32>() {
                    Ok(Value::Int(i))
                } else if let Ok(f) = text.parse::<f64>() {
                    Ok(Value::Float(f))
                } else {
                    Ok(Value::Null)
                }
            }
            _ => Err(Error::type_error()),
        },
        UnaryOp::Str => match value {
            Value::Null => Ok(Value::Null),
            other => Ok(Value::str(other.to_text(false))),
        },
        UnaryOp::Inc => match to_num(&value)? {
            None => Ok(Value::Null),
            Some(Num::Int(i)) => Ok(i
                .checked_add(1)
                .map_or(Value::Float(f64::from(i) + 1.0), Value::Int)),
            Some(Num::Float(f)) => Ok(Value::Float(f + 1.0)),
        },
        UnaryOp::Dec => match to_num(&value)? {
            None => Ok(Value::Null),
            Some(Num::Int(i)) => Ok(i
                .checked_sub(1)
                .map_or(Value::Float(f64::from(i) - 1.0), Value::Int)),
            Some(Num::Float(f)) => Ok(Value::Float(f - 1.0)),
        },
        UnaryOp::Atom => match value {
            Value::Null => Ok(Value::Null),
            Value::Str(s) => Ok(Value::Int(world.atom_table_mut().intern(&s) as i32)),
            _ => Err(Error::type_error()),
        },
        UnaryOp::AtomStr => match to_num(&value)? {
            None => Ok(Value::Null),
            Some(Num::Int(i)) => {
                let id = u32::try_from(i).map_err(|_| Error::range_error())?;
                Ok(Value::str(world.atom_table().get_by_id(id)))
            }
            Some(Num::Float(_)) => Err(Error::type_error()),
        },
        UnaryOp::KeyLookup => match value {
            Value::Null => Ok(Value::Null),
            Value::Keymap(index) => Ok(Value::Keymap(index)),
            Value::Str(name) => world
                .keymaps()
                .lookup(&name)
                .map(Value::Keymap)
                .ok_or_else(|| Error::new(format!("Unknown keymap: {name}"))),
            _ => Err(Error::type_error()),
        },
        UnaryOp::KeyCreate => match value {
            Value::Str(name) => Ok(Value::Keymap(world.keymaps_mut().create(&name)?)),
            _ => Err(Error::type_error()),
        },
        UnaryOp::FileNr => match value {
            Value::Null => Ok(Value::Null),
            Value::File(fd) => Ok(Value::File(fd)),
            Value::Int(fd) => {
                FileTable::check_file_number(fd)?;
                Ok(Value::File(fd))
            }
            _ => Err(Error::type_error()),
        },
        UnaryOp::Zap => match value.truth() {
            None | Some(false) => Ok(Value::Null),
            Some(true) => Ok(value),
        },
    }
}

/// Executes a binary operator.
pub fn execute_binary(world: &mut World, op: BinaryOp, a: Value, b: Value) -> Result<Value, Error> {
    match op {
        BinaryOp::Add => match (&a, &b) {
            (Value::Str(x), Value::Str(y)) => {
                let mut s = x.to_string();
                s.push_str(y);
                Ok(Value::str(s))
            }
            _ => arith(&a, &b, i32::checked_add, |x, y| x + y),
        },
        BinaryOp::Sub => arith(&a, &b, i32::checked_sub, |x, y| x - y),
        BinaryOp::Mul => arith(&a, &b, i32::checked_mul, |x, y| x * y),
        BinaryOp::Div => divide(&a, &b),
        BinaryOp::IntDiv => int_op(&a, &b, |x, y| {
            if y == 0 {
                Err(Error::new("Divide by zero"))
            } else {
                Ok(x.wrapping_div(y))
            }
        }),
        BinaryOp::Rem => int_op(&a, &b, |x, y| {
            if y == 0 {
                Err(Error::new("Divide by zero"))
            } else {
                Ok(x.wrapping_rem(y))
            }
        }),
        BinaryOp::Pow => power(&a, &b),
        BinaryOp::Concat => match (&a, &b) {
            (Value::Null, Value::Null) => Ok(Value::Null),
            _ => {
                let mut s = a.to_text(false);
                s.push_str(&b.to_text(false));
                Ok(Value::str(s))
            }
        },
        BinaryOp::ConcatEmpty => match (&a, &b) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            _ => {
                let mut s = a.to_text(false);
                s.push_str(&b.to_text(false));
                Ok(Value::str(s))
            }
        },
        BinaryOp::CompareEq | BinaryOp::CompareEqNc => {
            compare_with(&a, &b, op, |o| o == Ordering::Equal)
        }
        BinaryOp::CompareNe | BinaryOp::CompareNeNc => {
            compare_with(&a, &b, op, |o| o != Ordering::Equal)
        }
        BinaryOp::CompareLt | BinaryOp::CompareLtNc => {
            compare_with(&a, &b, op, |o| o == Ordering::Less)
        }
        BinaryOp::CompareLe | BinaryOp::CompareLeNc => {
            compare_with(&a, &b, op, |o| o != Ordering::Greater)
        }
        BinaryOp::CompareGt | BinaryOp::CompareGtNc => {
            compare_with(&a, &b, op, |o| o == Ordering::Greater)
        }
        BinaryOp::CompareGe | BinaryOp::CompareGeNc => {
            compare_with(&a, &b, op, |o| o != Ordering::Less)
        }
        BinaryOp::Min | BinaryOp::MinNc => pick(a, b, op, Ordering::Greater),
        BinaryOp::Max | BinaryOp::MaxNc => pick(a, b, op, Ordering::Less),
        BinaryOp::And => Ok(ternary_and(a.truth(), b.truth()).into()),
        BinaryOp::Or => Ok(ternary_or(a.truth(), b.truth()).into()),
        BinaryOp::Xor => match (a.truth(), b.truth()) {
            (None, _) | (_, None) => Ok(Value::Null),
            (Some(x), Some(y)) => Ok(Value::Bool(x != y)),
        },
        BinaryOp::BitAnd => int_op(&a, &b, |x, y| Ok(x & y)),
        BinaryOp::BitOr => int_op(&a, &b, |x, y| Ok(x | y)),
        BinaryOp::BitXor => int_op(&a, &b, |x, y| Ok(x ^ y)),
        BinaryOp::ArrayDim => array_dim(&a, &b),
        BinaryOp::KeyAddParent => {
            let (Value::Keymap(child), Value::Keymap(parent)) = (&a, &b) else {
                return Err(Error::type_error());
            };
            world.keymaps_mut().add_parent(*child, *parent)?;
            Ok(a)
        }
    }
}

/// Executes a ternary operator.
pub fn execute_ternary(
    world: &mut World,
    op: TernaryOp,
    a: Value,
    b: Value,
    c: Value,
) -> Result<Value, Error> {
    match op {
        TernaryOp::KeyAdd => {
            let Value::Keymap(index) = a else {
                return Err(Error::type_error());
            };
            let Value::Str(key_text) = &b else {
                return Err(Error::type_error());
            };
            let key = parse_key(key_text)
                .ok_or_else(|| Error::new(format!("Invalid key: {key_text}")))?;
            let command = match &c {
                Value::Null => 0,
                Value::Int(i) => u32::try_from(*i).map_err(|_| Error::range_error())?,
                Value::Str(text) => world.atom_table_mut().intern(text),
                _ => return Err(Error::type_error()),
            };
            world.keymaps_mut().add_key(index, key, command)?;
            Ok(Value::Keymap(index))
        }
    }
}

/// Integer arithmetic with float promotion on overflow or mixed types.
fn arith(
    a: &Value,
    b: &Value,
    int_op: fn(i32, i32) -> Option<i32>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, Error> {
    match (to_num(a)?, to_num(b)?) {
        (None, _) | (_, None) => Ok(Value::Null),
        (Some(Num::Int(x)), Some(Num::Int(y))) => Ok(int_op(x, y)
            .map_or_else(|| Value::Float(float_op(f64::from(x), f64::from(y))), Value::Int)),
        (Some(x), Some(y)) => Ok(Value::Float(float_op(as_f64(x), as_f64(y)))),
    }
}

/// `/`: real division; an integer result stays integer.
fn divide(a: &Value, b: &Value) -> Result<Value, Error> {
    match (to_num(a)?, to_num(b)?) {
        (None, _) | (_, None) => Ok(Value::Null),
        (Some(Num::Int(x)), Some(Num::Int(y))) => {
            if y == 0 {
                Err(Error::new("Divide by zero"))
            } else if x % y == 0 {
                Ok(Value::Int(x.wrapping_div(y)))
            } else {
                Ok(Value::Float(f64::from(x) / f64::from(y)))
            }
        }
        (Some(x), Some(y)) => {
            let y = as_f64(y);
            if y == 0.0 {
                Err(Error::new("Divide by zero"))
            } else {
                Ok(Value::Float(as_f64(x) / y))
            }
        }
    }
}

fn power(a: &Value, b: &Value) -> Result<Value, Error> {
    match (to_num(a)?, to_num(b)?) {
        (None, _) | (_, None) => Ok(Value::Null),
        (Some(Num::Int(x)), Some(Num::Int(y))) => {
            if let Ok(exp) = u32::try_from(y) {
                if let Some(result) = x.checked_pow(exp) {
                    return Ok(Value::Int(result));
                }
            }
            Ok(Value::Float(f64::from(x).powf(f64::from(y))))
        }
        (Some(x), Some(y)) => Ok(Value::Float(as_f64(x).powf(as_f64(y)))),
    }
}

/// Integer-only operators (`\`, `Mod`, bit operations).
fn int_op(
    a: &Value,
    b: &Value,
    op: impl Fn(i32, i32) -> Result<i32, Error>,
) -> Result<Value, Error> {
    match (to_num(a)?, to_num(b)?) {
        (None, _) | (_, None) => Ok(Value::Null),
        (Some(Num::Int(x)), Some(Num::Int(y))) => Ok(Value::Int(op(x, y)?)),
        _ => Err(Error::type_error()),
    }
}

/// Three-way comparison; `None` when either side is null.
fn compare(a: &Value, b: &Value, case_blind: bool) -> Result<Option<Ordering>, Error> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Ok(None),
        (Value::Str(x), Value::Str(y)) => {
            if case_blind {
                Ok(Some(
                    x.to_ascii_uppercase().cmp(&y.to_ascii_uppercase()),
                ))
            } else {
                Ok(Some(x.as_ref().cmp(y.as_ref())))
            }
        }
        _ => match (to_num(a)?, to_num(b)?) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => Ok(Some(x.cmp(&y))),
            (Some(x), Some(y)) => as_f64(x)
                .partial_cmp(&as_f64(y))
                .map(Some)
                .ok_or_else(Error::range_error),
            _ => Err(Error::type_error()),
        },
    }
}

fn compare_with(
    a: &Value,
    b: &Value,
    op: BinaryOp,
    test: impl Fn(Ordering) -> bool,
) -> Result<Value, Error> {
    Ok(compare(a, b, is_case_blind(op))?.map(test).into())
}

/// `Min`/`Max`: keeps the preferred operand, null propagates.
fn pick(a: Value, b: Value, op: BinaryOp, replace_when: Ordering) -> Result<Value, Error> {
    match compare(&a, &b, is_case_blind(op))? {
        None => Ok(Value::Null),
        Some(ordering) if ordering == replace_when => Ok(b),
        Some(_) => Ok(a),
    }
}

fn is_case_blind(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::CompareEqNc
            | BinaryOp::CompareNeNc
            | BinaryOp::CompareLtNc
            | BinaryOp::CompareLeNc
            | BinaryOp::CompareGtNc
            | BinaryOp::CompareGeNc
            | BinaryOp::MinNc
            | BinaryOp::MaxNc
    )
}

fn ternary_and(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn ternary_or(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn array_dim(a: &Value, b: &Value) -> Result<Value, Error> {
    let Value::Callable(CallableValue::Array(array)) = a else {
        return Err(Error::type_error());
    };
    match to_num(b)? {
        None => Ok(Value::Null),
        Some(Num::Int(n)) => {
            let n = usize::try_from(n).map_err(|_| Error::range_error())?;
            array
                .borrow()
                .dimension(n)
                .map(|d| Value::Int(d as i32))
                .ok_or_else(Error::range_error)
        }
        Some(Num::Float(_)) => Err(Error::type_error()),
    }
}

/// Helper for blob read-modify-write commands: reads little-endian
/// integers of the given width out of a blob value.
pub fn blob_get_int(blob: &[u8], position: usize, width: usize, signed: bool) -> Option<i32> {
    let bytes = blob.get(position..position + width)?;
    let mut value: u32 = 0;
    for (shift, &byte) in bytes.iter().enumerate() {
        value |= u32::from(byte) << (8 * shift);
    }
    if signed && width < 4 {
        let sign_bit = 1u32 << (8 * width - 1);
        if value & sign_bit != 0 {
            value |= !0u32 << (8 * width);
        }
    }
    Some(value as i32)
}

/// Helper for blob read-modify-write commands: writes a little-endian
/// integer of the given width into a blob value, growing it as needed.
pub fn blob_set_int(blob: &mut Rc<Vec<u8>>, position: usize, width: usize, value: i32) {
    let buffer = Rc::make_mut(blob);
    if buffer.len() < position + width {
        buffer.resize(position + width, 0);
    }
    for shift in 0..width {
        buffer[position + shift] = ((value as u32) >> (8 * shift)) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w() -> World {
        World::with_console(Box::new(crate::io::CollectStringPrint::new()))
    }

    #[test]
    fn test_arithmetic() {
        let mut world = w();
        let add = |world: &mut World, a, b| execute_binary(world, BinaryOp::Add, a, b).unwrap();
        assert_eq!(add(&mut world, Value::Int(2), Value::Int(3)), Value::Int(5));
        assert_eq!(add(&mut world, Value::Int(2), Value::Null), Value::Null);
        assert_eq!(
            add(&mut world, Value::Int(i32::MAX), Value::Int(1)),
            Value::Float(f64::from(i32::MAX) + 1.0)
        );
        assert_eq!(
            add(&mut world, Value::str("a"), Value::str("b")),
            Value::str("ab")
        );
        assert!(execute_binary(&mut world, BinaryOp::Add, Value::str("a"), Value::Int(1)).is_err());
    }

    #[test]
    fn test_division() {
        let mut world = w();
        assert_eq!(
            execute_binary(&mut world, BinaryOp::Div, Value::Int(6), Value::Int(3)).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            execute_binary(&mut world, BinaryOp::Div, Value::Int(5), Value::Int(2)).unwrap(),
            Value::Float(2.5)
        );
        assert!(
            execute_binary(&mut world, BinaryOp::Div, Value::Int(1), Value::Int(0)).is_err()
        );
        assert_eq!(
            execute_binary(&mut world, BinaryOp::IntDiv, Value::Int(7), Value::Int(2)).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            execute_binary(&mut world, BinaryOp::Rem, Value::Int(7), Value::Int(2)).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn test_concat() {
        let mut world = w();
        assert_eq!(
            execute_binary(&mut world, BinaryOp::Concat, Value::Null, Value::str("x")).unwrap(),
            Value::str("x")
        );
        assert_eq!(
            execute_binary(&mut world, BinaryOp::Concat, Value::Null, Value::Null).unwrap(),
            Value::Null
        );
        assert_eq!(
            execute_binary(&mut world, BinaryOp::ConcatEmpty, Value::Null, Value::str("x"))
                .unwrap(),
            Value::Null
        );
        assert_eq!(
            execute_binary(&mut world, BinaryOp::Concat, Value::Int(1), Value::str("x")).unwrap(),
            Value::str("1x")
        );
    }

    #[test]
    fn test_case_blind_comparison_matches_upcased() {
        let mut world = w();
        let pairs = [("abc", "ABC"), ("Hello", "hellO"), ("a", "B")];
        for (x, y) in pairs {
            let blind = execute_binary(
                &mut world,
                BinaryOp::CompareLtNc,
                Value::str(x),
                Value::str(y),
            )
            .unwrap();
            let upcased = execute_binary(
                &mut world,
                BinaryOp::CompareLt,
                Value::str(x.to_ascii_uppercase()),
                Value::str(y.to_ascii_uppercase()),
            )
            .unwrap();
            assert_eq!(blind, upcased, "{x} vs {y}");
        }
    }

    #[test]
    fn test_ternary_logic() {
        let mut world = w();
        let and = |world: &mut World, a, b| execute_binary(world, BinaryOp::And, a, b).unwrap();
        assert_eq!(and(&mut world, Value::Bool(false), Value::Null), Value::Bool(false));
        assert_eq!(and(&mut world, Value::Null, Value::Bool(false)), Value::Bool(false));
        assert_eq!(and(&mut world, Value::Null, Value::Bool(true)), Value::Null);
        assert_eq!(and(&mut world, Value::Bool(true), Value::Bool(true)), Value::Bool(true));

        let or = |world: &mut World, a, b| execute_binary(world, BinaryOp::Or, a, b).unwrap();
        assert_eq!(or(&mut world, Value::Null, Value::Bool(true)), Value::Bool(true));
        assert_eq!(or(&mut world, Value::Null, Value::Bool(false)), Value::Null);
    }

    #[test]
    fn test_unary_not_and_zap() {
        let mut world = w();
        assert_eq!(
            execute_unary(&mut world, UnaryOp::Not, Value::Null).unwrap(),
            Value::Null
        );
        assert_eq!(
            execute_unary(&mut world, UnaryOp::Not, Value::Int(0)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            execute_unary(&mut world, UnaryOp::Zap, Value::Int(0)).unwrap(),
            Value::Null
        );
        assert_eq!(
            execute_unary(&mut world, UnaryOp::Zap, Value::Int(7)).unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn test_atoms_via_ops() {
        let mut world = w();
        let id = execute_unary(&mut world, UnaryOp::Atom, Value::str("CMD")).unwrap();
        let Value::Int(id_int) = id else { panic!() };
        assert_eq!(
            execute_unary(&mut world, UnaryOp::AtomStr, Value::Int(id_int)).unwrap(),
            Value::str("CMD")
        );
    }

    #[test]
    fn test_blob_int_roundtrip() {
        let mut blob = Rc::new(Vec::new());
        blob_set_int(&mut blob, 3, 2, 0x1234);
        assert_eq!(blob_get_int(&blob, 3, 2, false), Some(0x1234));

        blob_set_int(&mut blob, 0, 1, 0x80);
        assert_eq!(blob_get_int(&blob, 0, 1, false), Some(0x80));
        assert_eq!(blob_get_int(&blob, 0, 1, true), Some(-128));

        blob_set_int(&mut blob, 5, 2, -2);
        assert_eq!(blob_get_int(&blob, 5, 2, true), Some(-2));
        assert_eq!(blob_get_int(&blob, 5, 2, false), Some(0xFFFE));

        assert_eq!(blob_get_int(&blob, 100, 2, false), None);
    }
}
