//! The host-object protocol.
//!
//! A `Context` is a host object participating in name lookup. The VM
//! consults contexts for `With` bodies, `ForEach` iteration, and named
//! variable access; the compiler consults them (through a static
//! context) to resolve ambiguous statements. Game objects, the global
//! variable space, and structure instances all speak this protocol.
//!
//! Contexts are cheap cursors: cloning one duplicates only its
//! identifying state (object kind and id), never the data behind it.

use std::{cell::RefCell, rc::Rc};

use crate::{
    error::Error,
    serialize::{SaveContext, TagNode},
    types::StructureValue,
    value::Value,
    world::GlobalStore,
};

/// Index of a property resolved by [`Context::lookup`].
pub type PropertyIndex = usize;

/// Bare reference to a host game object: kind tag plus id.
///
/// Contexts over host objects are modeled as handles into host-side
/// storage rather than object graphs; this is the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    /// Object kind, using the serialization tags.
    pub kind: u16,
    /// Object id within its kind.
    pub id: u32,
}

/// Receiver for property enumeration.
pub trait PropertyAcceptor {
    /// Called once per property name.
    fn add_property(&mut self, name: &str);
}

impl<F: FnMut(&str)> PropertyAcceptor for F {
    fn add_property(&mut self, name: &str) {
        self(name);
    }
}

/// Shared handle to a context.
pub type ContextValue = Rc<RefCell<dyn Context>>;

/// A host object participating in name lookup.
///
/// `lookup` resolves a name to a property index; `get`/`set` then access
/// the storage. A forwarding context resolves the name and delegates the
/// accesses to whatever actually owns the property.
pub trait Context {
    /// Resolves a name within this context.
    fn lookup(&mut self, name: &str) -> Option<PropertyIndex>;

    /// Reads a property by resolved index.
    fn get(&mut self, index: PropertyIndex) -> Result<Value, Error>;

    /// Writes a property by resolved index. Read-only properties fail
    /// with a not-assignable error.
    fn set(&mut self, index: PropertyIndex, value: Value) -> Result<(), Error>;

    /// Advances to the next peer object. False when there is none, which
    /// also ends `ForEach` iteration.
    fn next(&mut self) -> bool;

    /// Duplicates the cursor.
    fn clone_context(&self) -> ContextValue;

    /// The bare game object behind this context, if any.
    fn get_object(&self) -> Option<ObjectRef> {
        None
    }

    /// Enumerates the property names for reflection.
    fn enum_properties(&self, acceptor: &mut dyn PropertyAcceptor);

    /// Renders the context for diagnostics (`readable` for output that
    /// parses back where possible).
    fn context_text(&self, readable: bool) -> String;

    /// A cursor positioned on the first object of the sequence, `None`
    /// for an empty sequence. Contexts that do not iterate keep the
    /// default, which refuses `ForEach`.
    fn first_context(&self) -> Result<Option<ContextValue>, Error> {
        Err(Error::type_error())
    }

    /// Serializes this context's identity through the host hook.
    fn save(&self, _ctx: &mut dyn SaveContext) -> Result<TagNode, Error> {
        Err(Error::not_serializable())
    }
}

/// Context over the world's shared variables.
///
/// The world installs one of these as its global context; `With`-less
/// name lookup ends here.
#[derive(Debug)]
pub struct GlobalContext {
    store: Rc<RefCell<GlobalStore>>,
}

impl GlobalContext {
    /// Creates a context over a shared-variable store.
    #[must_use]
    pub fn new(store: Rc<RefCell<GlobalStore>>) -> Self {
        Self { store }
    }
}

impl Context for GlobalContext {
    fn lookup(&mut self, name: &str) -> Option<PropertyIndex> {
        self.store.borrow().names.get_index_by_name(name)
    }

    fn get(&mut self, index: PropertyIndex) -> Result<Value, Error> {
        Ok(self.store.borrow().values.get(index))
    }

    fn set(&mut self, index: PropertyIndex, value: Value) -> Result<(), Error> {
        self.store.borrow_mut().values.set(index, value);
        Ok(())
    }

    fn next(&mut self) -> bool {
        false
    }

    fn clone_context(&self) -> ContextValue {
        Rc::new(RefCell::new(Self {
            store: Rc::clone(&self.store),
        }))
    }

    fn enum_properties(&self, acceptor: &mut dyn PropertyAcceptor) {
        for name in self.store.borrow().names.iter() {
            acceptor.add_property(name);
        }
    }

    fn context_text(&self, _readable: bool) -> String {
        "#<global>".to_owned()
    }

    fn save(&self, _ctx: &mut dyn SaveContext) -> Result<TagNode, Error> {
        Ok(TagNode {
            tag: crate::serialize::TAG_GLOBAL,
            value: 0,
        })
    }
}

/// Context over one structure instance, as entered by `With`.
#[derive(Debug)]
pub struct StructContext {
    value: Rc<RefCell<StructureValue>>,
}

impl StructContext {
    /// Creates a context over a structure instance.
    #[must_use]
    pub fn new(value: Rc<RefCell<StructureValue>>) -> Self {
        Self { value }
    }
}

impl Context for StructContext {
    fn lookup(&mut self, name: &str) -> Option<PropertyIndex> {
        self.value.borrow().type_def().field_index(name)
    }

    fn get(&mut self, index: PropertyIndex) -> Result<Value, Error> {
        Ok(self.value.borrow().get_by_index(index))
    }

    fn set(&mut self, index: PropertyIndex, value: Value) -> Result<(), Error> {
        self.value.borrow_mut().set_by_index(index, value);
        Ok(())
    }

    fn next(&mut self) -> bool {
        false
    }

    fn clone_context(&self) -> ContextValue {
        Rc::new(RefCell::new(Self {
            value: Rc::clone(&self.value),
        }))
    }

    fn enum_properties(&self, acceptor: &mut dyn PropertyAcceptor) {
        let value = self.value.borrow();
        let ty = value.type_def();
        for index in 0..ty.field_count() {
            if let Some(name) = ty.field_name(index) {
                acceptor.add_property(&name);
            }
        }
    }

    fn context_text(&self, _readable: bool) -> String {
        "#<struct>".to_owned()
    }
}

/// Builds the with-context for a value: contexts pass through,
/// structures are wrapped, everything else is a type error.
pub fn context_for_value(value: Value) -> Result<ContextValue, Error> {
    match value {
        Value::Context(ctx) => Ok(ctx),
        Value::Struct(s) => Ok(Rc::new(RefCell::new(StructContext::new(s)))),
        _ => Err(Error::type_error()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{NameMap, Segment};

    fn store() -> Rc<RefCell<GlobalStore>> {
        let mut names = NameMap::new();
        names.add("PLAYER");
        Rc::new(RefCell::new(GlobalStore {
            names,
            values: Segment::new(),
        }))
    }

    #[test]
    fn test_global_context_roundtrip() {
        let store = store();
        let mut ctx = GlobalContext::new(Rc::clone(&store));
        let index = ctx.lookup("player").unwrap();
        assert_eq!(ctx.get(index).unwrap(), Value::Null);
        ctx.set(index, Value::Int(4)).unwrap();
        assert_eq!(store.borrow().values.get(index), Value::Int(4));
        assert!(ctx.lookup("NOSUCH").is_none());
        assert!(!ctx.next());
    }

    #[test]
    fn test_global_context_enumerates() {
        let mut names = Vec::new();
        GlobalContext::new(store()).enum_properties(&mut |n: &str| names.push(n.to_owned()));
        assert_eq!(names, ["PLAYER"]);
    }

    #[test]
    fn test_struct_context() {
        let ty = crate::types::StructureTypeDef::new();
        ty.add_field("FIRST");
        let instance = Rc::new(RefCell::new(StructureValue::new(Rc::new(ty))));
        let mut ctx = StructContext::new(Rc::clone(&instance));
        let index = ctx.lookup("FIRST").unwrap();
        ctx.set(index, Value::Int(1)).unwrap();
        assert_eq!(instance.borrow().get("FIRST").unwrap(), Value::Int(1));
    }
}
