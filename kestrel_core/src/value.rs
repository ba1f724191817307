//! Runtime value representation.
//!
//! A `Value` is either an immediate (None, bool, int, float) or a
//! reference-counted handle to a heap object. Cloning a reference variant is
//! the reference-count increment; dropping it is the decrement. Identity of a
//! reference variant is the address of its allocation, which is also the key
//! the cycle collector uses to match traversal edges to tracked objects.
//!
//! | Variant  | Payload                     | Identity          |
//! |----------|-----------------------------|-------------------|
//! | `None`   | -                           | singleton         |
//! | `Bool`   | `bool`                      | by value          |
//! | `Int`    | `i64`                       | by value          |
//! | `Float`  | `f64`                       | by value          |
//! | `Str`    | `Rc<str>`                   | allocation        |
//! | `Cell`   | `Rc<CellObject>`            | allocation        |
//! | `Dict`   | `Rc<DictObject>`            | allocation        |
//! | `Object` | `Rc<dyn Object>`            | allocation        |

use crate::cell::CellObject;
use crate::dict::DictObject;
use crate::mapping::Mapping;
use crate::object::Object;
use crate::trace::address_of;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    /// The `None` singleton.
    None,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// An immutable string.
    Str(Rc<str>),
    /// A closure cell.
    Cell(Rc<CellObject>),
    /// A name-keyed dictionary.
    Dict(Rc<DictObject>),
    /// Any other heap object.
    Object(Rc<dyn Object>),
}

impl Value {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a None value.
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self::None
    }

    /// Create a boolean value.
    #[inline]
    #[must_use]
    pub const fn bool(b: bool) -> Self {
        Self::Bool(b)
    }

    /// Create an integer value.
    #[inline]
    #[must_use]
    pub const fn int(i: i64) -> Self {
        Self::Int(i)
    }

    /// Create a float value.
    #[inline]
    #[must_use]
    pub const fn float(f: f64) -> Self {
        Self::Float(f)
    }

    /// Create a string value.
    #[inline]
    #[must_use]
    pub fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    /// Wrap a cell.
    #[inline]
    #[must_use]
    pub fn cell(cell: Rc<CellObject>) -> Self {
        Self::Cell(cell)
    }

    /// Wrap a dictionary.
    #[inline]
    #[must_use]
    pub fn dict(dict: Rc<DictObject>) -> Self {
        Self::Dict(dict)
    }

    /// Wrap an arbitrary heap object.
    #[inline]
    #[must_use]
    pub fn object(obj: Rc<dyn Object>) -> Self {
        Self::Object(obj)
    }

    // =========================================================================
    // Type Checking
    // =========================================================================

    /// Check if this is None.
    #[inline]
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Check if this is a cell.
    #[inline]
    #[must_use]
    pub const fn is_cell(&self) -> bool {
        matches!(self, Self::Cell(_))
    }

    /// Check if this value refers to a heap allocation.
    #[inline]
    #[must_use]
    pub const fn is_heap(&self) -> bool {
        matches!(
            self,
            Self::Str(_) | Self::Cell(_) | Self::Dict(_) | Self::Object(_)
        )
    }

    // =========================================================================
    // Value Extraction
    // =========================================================================

    /// Try to extract as a boolean.
    #[inline]
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to extract as an integer.
    #[inline]
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to extract as a float.
    #[inline]
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Try to extract as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Try to extract as a cell.
    #[inline]
    #[must_use]
    pub fn as_cell(&self) -> Option<&Rc<CellObject>> {
        match self {
            Self::Cell(c) => Some(c),
            _ => None,
        }
    }

    /// Try to extract as a dictionary.
    #[inline]
    #[must_use]
    pub fn as_dict(&self) -> Option<&Rc<DictObject>> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Try to extract as a generic heap object.
    #[inline]
    #[must_use]
    pub fn as_object(&self) -> Option<&Rc<dyn Object>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Borrow the concrete object behind an `Object` value.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_object()?.as_any().downcast_ref::<T>()
    }

    /// Clone out a typed handle to the object behind an `Object` value.
    #[must_use]
    pub fn downcast_rc<T: Any>(&self) -> Option<Rc<T>> {
        let obj = self.as_object()?;
        Rc::clone(obj).into_any_rc().downcast::<T>().ok()
    }

    /// View this value through the mapping protocol, if it supports it.
    #[must_use]
    pub fn as_mapping(&self) -> Option<&dyn Mapping> {
        match self {
            Self::Dict(d) => Some(&**d),
            Self::Object(o) => o.as_mapping(),
            _ => None,
        }
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Address of the referenced allocation, for reference variants.
    #[inline]
    #[must_use]
    pub fn heap_address(&self) -> Option<usize> {
        match self {
            Self::Str(s) => Some(address_of(s)),
            Self::Cell(c) => Some(address_of(c)),
            Self::Dict(d) => Some(address_of(d)),
            Self::Object(o) => Some(address_of(o)),
            _ => None,
        }
    }

    /// Identity comparison (`is`).
    ///
    /// Immediates compare by value, references by allocation.
    #[must_use]
    pub fn is(&self, other: &Value) -> bool {
        match (self.heap_address(), other.heap_address()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self == other,
            _ => false,
        }
    }

    /// Current strong reference count for reference variants.
    #[must_use]
    pub fn ref_count(&self) -> Option<usize> {
        match self {
            Self::Str(s) => Some(Rc::strong_count(s)),
            Self::Cell(c) => Some(Rc::strong_count(c)),
            Self::Dict(d) => Some(Rc::strong_count(d)),
            Self::Object(o) => Some(Rc::strong_count(o)),
            _ => None,
        }
    }

    // =========================================================================
    // Type Name
    // =========================================================================

    /// Get the type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Cell(_) => "cell",
            Self::Dict(_) => "dict",
            Self::Object(o) => o.type_name(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => match (self.heap_address(), other.heap_address()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::none()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "Value(None)"),
            Self::Bool(b) => write!(f, "Value({})", if *b { "True" } else { "False" }),
            Self::Int(i) => write!(f, "Value({i})"),
            Self::Float(fl) => write!(f, "Value({fl:?})"),
            Self::Str(s) => write!(f, "Value({s:?})"),
            other => write!(
                f,
                "Value({}@{:#x})",
                other.type_name(),
                other.heap_address().unwrap_or(0)
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(fl) => {
                if fl.fract() == 0.0 && fl.is_finite() {
                    write!(f, "{fl:.1}")
                } else {
                    write!(f, "{fl}")
                }
            }
            Self::Str(s) => write!(f, "'{s}'"),
            other => write!(
                f,
                "<{} object at {:#x}>",
                other.type_name(),
                other.heap_address().unwrap_or(0)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediates_compare_by_value() {
        assert_eq!(Value::int(42), Value::int(42));
        assert_ne!(Value::int(42), Value::int(43));
        assert_ne!(Value::int(1), Value::bool(true));
        assert!(Value::none().is(&Value::None));
    }

    #[test]
    fn test_references_compare_by_identity() {
        let a = Value::dict(Rc::new(DictObject::new()));
        let b = Value::dict(Rc::new(DictObject::new()));
        assert!(a.is(&a.clone()));
        assert!(!a.is(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_ref_count_tracks_clones() {
        let a = Value::cell(Rc::new(CellObject::new(None)));
        assert_eq!(a.ref_count(), Some(1));
        let b = a.clone();
        assert_eq!(a.ref_count(), Some(2));
        drop(b);
        assert_eq!(a.ref_count(), Some(1));
        assert_eq!(Value::int(3).ref_count(), None);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::none().type_name(), "NoneType");
        assert_eq!(Value::float(1.5).type_name(), "float");
        assert_eq!(Value::str("x").type_name(), "str");
        assert_eq!(Value::dict(Rc::new(DictObject::new())).type_name(), "dict");
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::float(2.0).to_string(), "2.0");
        assert_eq!(Value::bool(false).to_string(), "False");
        assert_eq!(Value::str("hi").to_string(), "'hi'");
    }

    #[test]
    fn test_as_mapping_for_dict() {
        let d = Value::dict(Rc::new(DictObject::new()));
        assert!(d.as_mapping().is_some());
        assert!(Value::int(1).as_mapping().is_none());
    }
}
