//! Script-level container types: arrays, hashes, structures.
//!
//! These are the heap objects scripts build with `Dim a(10)`, `Dim h As
//! Hash` and `Struct`. All of them are shared by reference: assigning an
//! array to a second variable aliases the same storage.

use indexmap::IndexMap;

use crate::{
    error::Error,
    names::{NameMap, Segment},
    value::Value,
};

/// Upper bound on the total number of array elements.
///
/// Keeps a script from taking the host down with `Dim a(100000,100000)`.
const MAX_ARRAY_ELEMENTS: usize = 10_000_000;

/// Multi-dimensional script array.
///
/// Storage is a flat row-major vector; the dimension list is fixed at
/// creation and can only be resized to the same number of dimensions.
#[derive(Debug, Clone, Default)]
pub struct ArrayValue {
    dims: Vec<usize>,
    values: Vec<Value>,
}

impl ArrayValue {
    /// Creates an array with the given dimensions, all elements null.
    pub fn new(dims: Vec<usize>) -> Result<Self, Error> {
        let total = checked_total(&dims)?;
        Ok(Self {
            dims,
            values: vec![Value::Null; total],
        })
    }

    /// Returns the dimension list.
    #[must_use]
    pub fn dimensions(&self) -> &[usize] {
        &self.dims
    }

    /// Resizes to new dimensions, preserving elements whose position exists
    /// in both shapes. The number of dimensions must not change.
    pub fn resize(&mut self, dims: Vec<usize>) -> Result<(), Error> {
        if dims.len() != self.dims.len() {
            return Err(Error::new("Incompatible number of dimensions"));
        }
        let total = checked_total(&dims)?;
        let mut values = vec![Value::Null; total];
        if self.values.is_empty() {
            self.dims = dims;
            self.values = values;
            return Ok(());
        }
        // Walk the old array and copy everything that still has a position.
        let mut index = vec![0usize; self.dims.len()];
        'copy: loop {
            if index.iter().zip(&dims).all(|(i, d)| i < d) {
                let from = flatten(&self.dims, &index);
                let to = flatten(&dims, &index);
                values[to] = std::mem::take(&mut self.values[from]);
            }
            // increment the multi-index, least significant dimension last
            for pos in (0..index.len()).rev() {
                index[pos] += 1;
                if index[pos] < self.dims[pos] {
                    continue 'copy;
                }
                index[pos] = 0;
            }
            break;
        }
        self.dims = dims;
        self.values = values;
        Ok(())
    }

    /// Maps an index list to the flat element position.
    pub fn element_index(&self, indexes: &[i32]) -> Result<usize, Error> {
        if indexes.len() != self.dims.len() {
            return Err(Error::new("Incompatible number of dimensions"));
        }
        let mut flat = 0usize;
        for (&i, &d) in indexes.iter().zip(&self.dims) {
            if i < 0 || (i as usize) >= d {
                return Err(Error::range_error());
            }
            flat = flat * d + i as usize;
        }
        Ok(flat)
    }

    /// Reads the element at the given index list.
    pub fn get(&self, indexes: &[i32]) -> Result<Value, Error> {
        Ok(self.values[self.element_index(indexes)?].clone())
    }

    /// Stores an element at the given index list.
    pub fn set(&mut self, indexes: &[i32], value: Value) -> Result<(), Error> {
        let flat = self.element_index(indexes)?;
        self.values[flat] = value;
        Ok(())
    }

    /// Size of dimension `n` (1-based, as reported to scripts).
    #[must_use]
    pub fn dimension(&self, n: usize) -> Option<usize> {
        if n >= 1 { self.dims.get(n - 1).copied() } else { None }
    }
}

fn checked_total(dims: &[usize]) -> Result<usize, Error> {
    if dims.is_empty() {
        return Err(Error::new("Incompatible number of dimensions"));
    }
    let mut total = 1usize;
    for &d in dims {
        total = total.checked_mul(d).ok_or_else(Error::range_error)?;
    }
    if total > MAX_ARRAY_ELEMENTS {
        return Err(Error::range_error());
    }
    Ok(total)
}

fn flatten(dims: &[usize], index: &[usize]) -> usize {
    let mut flat = 0usize;
    for (&i, &d) in index.iter().zip(dims) {
        flat = flat * d + i;
    }
    flat
}

/// Script hash: string keys to values, insertion-ordered.
#[derive(Debug, Clone, Default)]
pub struct HashValue {
    values: IndexMap<String, Value>,
}

impl HashValue {
    /// Creates an empty hash.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a key; null when absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        self.values.get(key).cloned().unwrap_or(Value::Null)
    }

    /// Stores a key.
    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_owned(), value);
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the hash has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Type descriptor created by a `Struct` block.
///
/// Shared between the constructor function and every instance, so field
/// lookup is a name-map query against one table. The table sits behind a
/// `RefCell` because the constructor BCO already holds the type as a
/// literal while the compiler is still reading field lines.
#[derive(Debug, Default)]
pub struct StructureTypeDef {
    names: std::cell::RefCell<NameMap>,
}

impl StructureTypeDef {
    /// Creates an empty type.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a field name.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.names.borrow().get_index_by_name(name)
    }

    /// Field name by index.
    #[must_use]
    pub fn field_name(&self, index: usize) -> Option<String> {
        self.names.borrow().get_name_by_index(index).map(str::to_owned)
    }

    /// Number of fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.names.borrow().len()
    }

    /// Adds a field during compilation.
    pub fn add_field(&self, name: &str) -> usize {
        self.names.borrow_mut().add(name)
    }
}

/// Structure instance: a type tag plus a field segment.
#[derive(Debug)]
pub struct StructureValue {
    ty: std::rc::Rc<StructureTypeDef>,
    values: Segment,
}

impl StructureValue {
    /// Creates an instance with all fields null.
    #[must_use]
    pub fn new(ty: std::rc::Rc<StructureTypeDef>) -> Self {
        Self {
            ty,
            values: Segment::new(),
        }
    }

    /// The instance's type.
    #[must_use]
    pub fn type_def(&self) -> &std::rc::Rc<StructureTypeDef> {
        &self.ty
    }

    /// Reads a field by name.
    pub fn get(&self, name: &str) -> Result<Value, Error> {
        let index = self
            .ty
            .field_index(name)
            .ok_or_else(|| Error::unknown_identifier(name))?;
        Ok(self.values.get(index))
    }

    /// Writes a field by name.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), Error> {
        let index = self
            .ty
            .field_index(name)
            .ok_or_else(|| Error::unknown_identifier(name))?;
        self.values.set(index, value);
        Ok(())
    }

    /// Reads a field by index.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Value {
        self.values.get(index)
    }

    /// Writes a field by index.
    pub fn set_by_index(&mut self, index: usize, value: Value) {
        self.values.set(index, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_roundtrip() {
        let mut a = ArrayValue::new(vec![3, 4]).unwrap();
        a.set(&[2, 3], Value::Int(42)).unwrap();
        assert_eq!(a.get(&[2, 3]).unwrap(), Value::Int(42));
        assert_eq!(a.get(&[0, 0]).unwrap(), Value::Null);
        assert!(a.get(&[3, 0]).is_err());
        assert!(a.get(&[0]).is_err());
        assert_eq!(a.dimension(1), Some(3));
        assert_eq!(a.dimension(2), Some(4));
    }

    #[test]
    fn test_array_resize_preserves() {
        let mut a = ArrayValue::new(vec![2, 2]).unwrap();
        a.set(&[1, 1], Value::Int(7)).unwrap();
        a.set(&[0, 1], Value::Int(3)).unwrap();
        a.resize(vec![3, 2]).unwrap();
        assert_eq!(a.get(&[1, 1]).unwrap(), Value::Int(7));
        assert_eq!(a.get(&[0, 1]).unwrap(), Value::Int(3));
        assert_eq!(a.get(&[2, 1]).unwrap(), Value::Null);
        assert!(a.resize(vec![4]).is_err());
    }

    #[test]
    fn test_array_refuses_excessive_size() {
        assert!(ArrayValue::new(vec![100_000, 100_000]).is_err());
    }

    #[test]
    fn test_hash() {
        let mut h = HashValue::new();
        assert_eq!(h.get("K"), Value::Null);
        h.set("K", Value::Int(1));
        assert_eq!(h.get("K"), Value::Int(1));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_structure_fields() {
        let ty = StructureTypeDef::new();
        ty.add_field("FIRST");
        ty.add_field("SECOND");
        let mut s = StructureValue::new(std::rc::Rc::new(ty));
        assert_eq!(s.get("FIRST").unwrap(), Value::Null);
        s.set("second", Value::Int(2)).unwrap();
        assert_eq!(s.get("SECOND").unwrap(), Value::Int(2));
        assert!(s.get("THIRD").is_err());
    }
}
