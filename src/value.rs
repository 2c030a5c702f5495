//! Representation of values in Lox.

use std::fmt;

use crate::heap::{Heap, StrRef};

extern crate static_assertions as sa;

/// A Lox runtime value.
///
/// Numbers ([f64]), booleans, nil, and strings are supported. Values are
/// plain `Copy` data; string contents live in a [Heap] and are referred to by
/// a [StrRef] handle.
///
/// You can create a Lox value from its equivalent Rust type:
///
/// ```
/// # use rilox::value::Value;
/// let v: Value = 0.5.into();
/// assert!(v.is_number());
///
/// let v: Value = false.into();
/// assert!(v.is_falsy());
/// ```
///
/// # Strings
///
/// String data is owned by a [Heap], so turning a value back into text
/// requires one:
///
/// ```
/// # use rilox::heap::Heap;
/// # use rilox::value::Value;
/// let mut heap = Heap::new();
/// let v = Value::Str(heap.intern_copy("Hello"));
/// assert!(v.is_string());
/// assert_eq!("Hello", v.show(&heap).to_string());
/// ```
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub enum Value {
    /// Nil. Doing anything with this is usually an error.
    #[default]
    Nil,
    /// A boolean.
    Boolean(bool),
    /// All numbers in Lox are 64-bit floating point.
    Number(f64),
    /// A string (the owned contents belong to a [Heap]).
    ///
    /// Handles compare by identity. Thanks to interning, that is the same
    /// thing as comparing by content.
    Str(StrRef),
}

// A Value should stay two machine words: one for the tag, one for the payload.
sa::assert_eq_size!(Value, [u64; 2]);

/// A collection of values. Used as a chunk's constant pool.
#[derive(Default, Debug, Clone)]
pub struct ValueArray {
    values: Vec<Value>,
}

/// Borrows a [Value] together with the [Heap] so that it can be formatted.
/// Obtained from [Value::show()].
pub struct ShowValue<'a> {
    value: Value,
    heap: &'a Heap,
}

///////////////////////////////////////// Implementation //////////////////////////////////////////

impl Value {
    /// Returns true if this value is a Lox boolean.
    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }

    /// Returns true if this value is Lox's nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns true if this value is a Lox number.
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    /// Returns true if this value is a Lox string.
    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    /// Returns true if this value is "falsy": only nil and false are.
    /// Everything else is truthy, including 0 and the empty string.
    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Returns something that can be formatted with `{}`. The [Heap] is
    /// needed to resolve string handles to their contents.
    pub fn show<'a>(&self, heap: &'a Heap) -> ShowValue<'a> {
        ShowValue { value: *self, heap }
    }
}

// Lox's equality rules line up with a derived PartialEq:
//
//  - values of different types are never equal (and never an error);
//  - numbers follow IEEE 754, so NaN != NaN;
//  - strings compare by handle, which interning makes equivalent to content.

impl fmt::Display for ShowValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.value {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(value) => write!(f, "{value}"),
            Value::Number(num) => write!(f, "{num}"),
            Value::Str(handle) => write!(f, "{}", self.heap.get_str(handle)),
        }
    }
}

// Convert any Rust float into a Lox value.
impl From<f64> for Value {
    #[inline(always)]
    fn from(float: f64) -> Value {
        Value::Number(float)
    }
}

// Convert any Rust bool into a Lox value.
impl From<bool> for Value {
    #[inline(always)]
    fn from(value: bool) -> Value {
        Value::Boolean(value)
    }
}

impl From<StrRef> for Value {
    #[inline(always)]
    fn from(handle: StrRef) -> Value {
        Value::Str(handle)
    }
}

impl ValueArray {
    /// Return an empty [ValueArray].
    pub fn new() -> Self {
        ValueArray::default()
    }

    /// Returns a [Value] at the given index. If the index is out of bounds, this returns `None`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.values.get(index).copied()
    }

    /// Appends a new [Value] to the array. Returns its index.
    pub fn write(&mut self, value: Value) -> usize {
        self.values.push(value);
        self.values.len() - 1
    }

    /// Returns how many values are in the pool.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn falsiness() {
        assert!(Value::Nil.is_falsy());
        assert!(Value::Boolean(false).is_falsy());

        assert!(!Value::Boolean(true).is_falsy());
        assert!(!Value::Number(0.0).is_falsy());

        let mut heap = Heap::new();
        let empty = Value::Str(heap.intern_copy(""));
        assert!(!empty.is_falsy());
    }

    #[test]
    fn cross_type_equality_is_false() {
        let zero: Value = 0.0.into();
        let fals: Value = false.into();

        assert_ne!(zero, Value::Nil);
        assert_ne!(zero, fals);
        assert_ne!(fals, Value::Nil);

        // NaN is not equal to itself, per IEEE 754.
        let nan: Value = f64::NAN.into();
        assert_ne!(nan, nan);
    }

    #[test]
    fn canonical_number_formatting() {
        let heap = Heap::new();
        assert_eq!("3", Value::Number(3.0).show(&heap).to_string());
        assert_eq!("0.5", Value::Number(0.5).show(&heap).to_string());
        assert_eq!("-5", Value::Number(-5.0).show(&heap).to_string());
        assert_eq!("nil", Value::Nil.show(&heap).to_string());
        assert_eq!("true", Value::Boolean(true).show(&heap).to_string());
    }

    #[test]
    fn value_array_returns_increasing_indices() {
        let mut pool = ValueArray::new();
        for i in 0..10 {
            assert_eq!(i, pool.write(Value::Number(i as f64)));
        }
        assert_eq!(10, pool.len());
        assert_eq!(Some(Value::Number(7.0)), pool.get(7));
        assert_eq!(None, pool.get(10));
    }
}
