//! Tag-node serialization of values.
//!
//! Every serializable value is identified by a `TagNode`, a `{tag,
//! value}` pair; variable-size payloads (strings, blobs, floats) follow
//! in an auxiliary byte stream. Host-managed contexts serialize through
//! the `SaveContext`/`LoadContext` hooks which map between live contexts
//! and well-known tags plus a 32-bit object id. Unknown tags are refused
//! on load, failing the containing container.

use serde::{Deserialize, Serialize};

use crate::{
    context::{Context, ContextValue},
    error::Error,
    value::Value,
};

/// The empty value.
pub const TAG_EMPTY: u16 = 0x0000;
/// 32-bit integer; `value` holds the bits.
pub const TAG_INT: u16 = 0x0001;
/// Boolean; `value` is 0 or 1.
pub const TAG_BOOL: u16 = 0x0002;
/// Float; eight payload bytes follow.
pub const TAG_FLOAT: u16 = 0x0003;
/// String; `value` payload bytes follow.
pub const TAG_STRING: u16 = 0x0004;
/// Blob; `value` payload bytes follow.
pub const TAG_BLOB: u16 = 0x0005;
/// File handle; `value` is the file number.
pub const TAG_FILE: u16 = 0x0006;

/// Ship context; `value` is the ship id.
pub const TAG_SHIP: u16 = 0x4001;
/// Planet context.
pub const TAG_PLANET: u16 = 0x4002;
/// Minefield context.
pub const TAG_MINEFIELD: u16 = 0x4003;
/// Ion storm context.
pub const TAG_ION_STORM: u16 = 0x4004;
/// Hull context.
pub const TAG_HULL: u16 = 0x4005;
/// Engine context.
pub const TAG_ENGINE: u16 = 0x4006;
/// Beam weapon context.
pub const TAG_BEAM: u16 = 0x4007;
/// Torpedo context.
pub const TAG_TORPEDO: u16 = 0x4008;
/// Torpedo launcher context.
pub const TAG_LAUNCHER: u16 = 0x4009;
/// Iterator context.
pub const TAG_ITERATOR: u16 = 0x400A;
/// Global variables context.
pub const TAG_GLOBAL: u16 = 0x400B;
/// Player context.
pub const TAG_PLAYER: u16 = 0x400C;

/// Serialized identity of one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagNode {
    /// Type tag.
    pub tag: u16,
    /// Inline payload: scalar bits, object id, or payload length.
    pub value: u32,
}

/// Host hook mapping live contexts to tag nodes.
pub trait SaveContext {
    /// Serializes a context, or fails when it has no external identity.
    fn save_context(&mut self, context: &dyn Context) -> Result<TagNode, Error>;
}

/// Host hook mapping tag nodes back to live contexts.
pub trait LoadContext {
    /// Restores a context; `None` when the tag is not a context tag this
    /// host knows.
    fn load_context(&mut self, node: TagNode) -> Option<ContextValue>;
}

/// Serializes a value into a tag node, appending payload to `aux`.
pub fn save_value(
    value: &Value,
    aux: &mut Vec<u8>,
    ctx: &mut dyn SaveContext,
) -> Result<TagNode, Error> {
    match value {
        Value::Null => Ok(TagNode {
            tag: TAG_EMPTY,
            value: 0,
        }),
        Value::Int(i) => Ok(TagNode {
            tag: TAG_INT,
            value: *i as u32,
        }),
        Value::Bool(b) => Ok(TagNode {
            tag: TAG_BOOL,
            value: u32::from(*b),
        }),
        Value::Float(f) => {
            aux.extend_from_slice(&f.to_le_bytes());
            Ok(TagNode {
                tag: TAG_FLOAT,
                value: 8,
            })
        }
        Value::Str(s) => {
            aux.extend_from_slice(s.as_bytes());
            Ok(TagNode {
                tag: TAG_STRING,
                value: length_u32(s.len())?,
            })
        }
        Value::Blob(b) => {
            aux.extend_from_slice(b);
            Ok(TagNode {
                tag: TAG_BLOB,
                value: length_u32(b.len())?,
            })
        }
        Value::File(fd) => Ok(TagNode {
            tag: TAG_FILE,
            value: *fd as u32,
        }),
        Value::Context(c) => ctx.save_context(&*c.borrow()),
        _ => Err(Error::not_serializable()),
    }
}

/// Restores a value from a tag node, consuming payload from `aux`.
pub fn load_value(
    node: TagNode,
    aux: &mut &[u8],
    ctx: &mut dyn LoadContext,
) -> Result<Value, Error> {
    match node.tag {
        TAG_EMPTY => Ok(Value::Null),
        TAG_INT => Ok(Value::Int(node.value as i32)),
        TAG_BOOL => Ok(Value::Bool(node.value != 0)),
        TAG_FLOAT => {
            let bytes: [u8; 8] = take(aux, 8)?
                .try_into()
                .map_err(|_| Error::not_serializable())?;
            Ok(Value::Float(f64::from_le_bytes(bytes)))
        }
        TAG_STRING => {
            let bytes = take(aux, node.value as usize)?;
            Ok(Value::str(String::from_utf8_lossy(bytes)))
        }
        TAG_BLOB => {
            let bytes = take(aux, node.value as usize)?;
            Ok(Value::Blob(std::rc::Rc::new(bytes.to_vec())))
        }
        TAG_FILE => Ok(Value::File(node.value as i32)),
        _ => ctx
            .load_context(node)
            .map(Value::Context)
            .ok_or_else(Error::not_serializable),
    }
}

fn length_u32(len: usize) -> Result<u32, Error> {
    u32::try_from(len).map_err(|_| Error::not_serializable())
}

fn take<'a>(aux: &mut &'a [u8], n: usize) -> Result<&'a [u8], Error> {
    if aux.len() < n {
        return Err(Error::not_serializable());
    }
    let (head, tail) = aux.split_at(n);
    *aux = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A host that refuses every context.
    struct NoContexts;

    impl SaveContext for NoContexts {
        fn save_context(&mut self, _context: &dyn Context) -> Result<TagNode, Error> {
            Err(Error::not_serializable())
        }
    }

    impl LoadContext for NoContexts {
        fn load_context(&mut self, _node: TagNode) -> Option<ContextValue> {
            None
        }
    }

    fn roundtrip(value: &Value) -> Value {
        let mut aux = Vec::new();
        let node = save_value(value, &mut aux, &mut NoContexts).unwrap();
        let mut reader: &[u8] = &aux;
        load_value(node, &mut reader, &mut NoContexts).unwrap()
    }

    #[test]
    fn test_scalar_roundtrips() {
        for value in [
            Value::Null,
            Value::Int(-123),
            Value::Bool(true),
            Value::Float(2.75),
            Value::str("hello"),
            Value::Blob(std::rc::Rc::new(vec![1, 2, 255])),
            Value::File(7),
        ] {
            assert_eq!(roundtrip(&value), value);
        }
    }

    #[test]
    fn test_unknown_tag_is_refused() {
        let node = TagNode {
            tag: 0x7777,
            value: 1,
        };
        let mut reader: &[u8] = &[];
        assert!(load_value(node, &mut reader, &mut NoContexts).is_err());
    }

    #[test]
    fn test_callable_is_not_serializable() {
        let mut aux = Vec::new();
        let value = Value::subroutine(std::rc::Rc::new(crate::bco::BytecodeObject::new()));
        assert!(save_value(&value, &mut aux, &mut NoContexts).is_err());
    }

    #[test]
    fn test_tag_node_binary_roundtrip() {
        let node = TagNode {
            tag: TAG_SHIP,
            value: 42,
        };
        let bytes = postcard::to_allocvec(&node).unwrap();
        let back: TagNode = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, node);
    }
}
