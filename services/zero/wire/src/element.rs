//! Zero element model.
//!
//! A Zero element is one tagged value: a scalar, a homogeneous primitive
//! array, or one of the two composites ([`ZeroMap`] and [`ZeroArray`]).

use crate::ZeroError;
use serde::{Deserialize, Serialize};

/// Type tags as written on the wire
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZeroType {
    /// Null value
    Null = 0,
    /// Boolean
    Boolean = 1,
    /// Single byte
    Byte = 2,
    /// 16-bit signed integer
    Short = 3,
    /// 32-bit signed integer
    Integer = 4,
    /// 64-bit signed integer
    Long = 5,
    /// 32-bit float
    Float = 6,
    /// 64-bit float
    Double = 7,
    /// UTF-8 string
    String = 8,
    /// Boolean array
    BooleanArray = 9,
    /// Byte array (4-byte length)
    ByteArray = 10,
    /// Short array
    ShortArray = 11,
    /// Integer array
    IntegerArray = 12,
    /// Long array
    LongArray = 13,
    /// Float array
    FloatArray = 14,
    /// Double array
    DoubleArray = 15,
    /// String array
    StringArray = 16,
    /// Heterogeneous element array
    ZeroArray = 17,
    /// String-keyed element map
    ZeroMap = 18,
}

impl TryFrom<u8> for ZeroType {
    type Error = ZeroError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ZeroType::Null),
            1 => Ok(ZeroType::Boolean),
            2 => Ok(ZeroType::Byte),
            3 => Ok(ZeroType::Short),
            4 => Ok(ZeroType::Integer),
            5 => Ok(ZeroType::Long),
            6 => Ok(ZeroType::Float),
            7 => Ok(ZeroType::Double),
            8 => Ok(ZeroType::String),
            9 => Ok(ZeroType::BooleanArray),
            10 => Ok(ZeroType::ByteArray),
            11 => Ok(ZeroType::ShortArray),
            12 => Ok(ZeroType::IntegerArray),
            13 => Ok(ZeroType::LongArray),
            14 => Ok(ZeroType::FloatArray),
            15 => Ok(ZeroType::DoubleArray),
            16 => Ok(ZeroType::StringArray),
            17 => Ok(ZeroType::ZeroArray),
            18 => Ok(ZeroType::ZeroMap),
            _ => Err(ZeroError::UnknownType(value)),
        }
    }
}

/// One tagged value
#[derive(Debug, Clone, PartialEq)]
pub enum ZeroElement {
    /// Null
    Null,
    /// Boolean
    Bool(bool),
    /// Byte
    Byte(u8),
    /// Short
    Short(i16),
    /// Integer
    Int(i32),
    /// Long
    Long(i64),
    /// Float
    Float(f32),
    /// Double
    Double(f64),
    /// String
    String(String),
    /// Boolean array
    BoolArray(Vec<bool>),
    /// Byte array
    ByteArray(Vec<u8>),
    /// Short array
    ShortArray(Vec<i16>),
    /// Integer array
    IntArray(Vec<i32>),
    /// Long array
    LongArray(Vec<i64>),
    /// Float array
    FloatArray(Vec<f32>),
    /// Double array
    DoubleArray(Vec<f64>),
    /// String array
    StringArray(Vec<String>),
    /// Nested array
    Array(ZeroArray),
    /// Nested map
    Map(ZeroMap),
}

impl ZeroElement {
    /// Wire tag for this element
    pub fn zero_type(&self) -> ZeroType {
        match self {
            ZeroElement::Null => ZeroType::Null,
            ZeroElement::Bool(_) => ZeroType::Boolean,
            ZeroElement::Byte(_) => ZeroType::Byte,
            ZeroElement::Short(_) => ZeroType::Short,
            ZeroElement::Int(_) => ZeroType::Integer,
            ZeroElement::Long(_) => ZeroType::Long,
            ZeroElement::Float(_) => ZeroType::Float,
            ZeroElement::Double(_) => ZeroType::Double,
            ZeroElement::String(_) => ZeroType::String,
            ZeroElement::BoolArray(_) => ZeroType::BooleanArray,
            ZeroElement::ByteArray(_) => ZeroType::ByteArray,
            ZeroElement::ShortArray(_) => ZeroType::ShortArray,
            ZeroElement::IntArray(_) => ZeroType::IntegerArray,
            ZeroElement::LongArray(_) => ZeroType::LongArray,
            ZeroElement::FloatArray(_) => ZeroType::FloatArray,
            ZeroElement::DoubleArray(_) => ZeroType::DoubleArray,
            ZeroElement::StringArray(_) => ZeroType::StringArray,
            ZeroElement::Array(_) => ZeroType::ZeroArray,
            ZeroElement::Map(_) => ZeroType::ZeroMap,
        }
    }

    /// Whether this element can stand alone as a message
    pub fn is_collection(&self) -> bool {
        matches!(self, ZeroElement::Array(_) | ZeroElement::Map(_))
    }

    /// Borrow as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ZeroElement::String(s) => Some(s),
            _ => None,
        }
    }

    /// Widen any integral scalar to i64
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ZeroElement::Byte(v) => Some(v as i64),
            ZeroElement::Short(v) => Some(v as i64),
            ZeroElement::Int(v) => Some(v as i64),
            ZeroElement::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow as a map
    pub fn as_map(&self) -> Option<&ZeroMap> {
        match self {
            ZeroElement::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow as an array
    pub fn as_array(&self) -> Option<&ZeroArray> {
        match self {
            ZeroElement::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl From<ZeroMap> for ZeroElement {
    fn from(map: ZeroMap) -> Self {
        ZeroElement::Map(map)
    }
}

impl From<ZeroArray> for ZeroElement {
    fn from(array: ZeroArray) -> Self {
        ZeroElement::Array(array)
    }
}

impl From<&str> for ZeroElement {
    fn from(value: &str) -> Self {
        ZeroElement::String(value.to_string())
    }
}

impl From<String> for ZeroElement {
    fn from(value: String) -> Self {
        ZeroElement::String(value)
    }
}

impl From<bool> for ZeroElement {
    fn from(value: bool) -> Self {
        ZeroElement::Bool(value)
    }
}

impl From<i32> for ZeroElement {
    fn from(value: i32) -> Self {
        ZeroElement::Int(value)
    }
}

impl From<i64> for ZeroElement {
    fn from(value: i64) -> Self {
        ZeroElement::Long(value)
    }
}

/// String-keyed map of elements.
///
/// Keys are unique. Insertion order is kept so encoding is stable, but two
/// maps with the same entries compare equal regardless of order.
#[derive(Debug, Clone, Default)]
pub struct ZeroMap {
    entries: Vec<(String, ZeroElement)>,
}

impl ZeroMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty map with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Insert or replace a value, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ZeroElement>) -> Option<ZeroElement> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Append an entry whose key the caller knows is not present yet
    pub(crate) fn push_unique(&mut self, key: String, value: ZeroElement) {
        self.entries.push((key, value));
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ZeroElement>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&ZeroElement> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<ZeroElement> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Look up a string value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ZeroElement::as_str)
    }

    /// Look up a nested map
    pub fn get_map(&self, key: &str) -> Option<&ZeroMap> {
        self.get(key).and_then(ZeroElement::as_map)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ZeroElement)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl PartialEq for ZeroMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| o == v))
    }
}

/// Ordered sequence of elements; element types may differ
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZeroArray {
    items: Vec<ZeroElement>,
}

impl ZeroArray {
    /// Create an empty array
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty array with room for `capacity` elements
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Append an element
    pub fn push(&mut self, value: impl Into<ZeroElement>) {
        self.items.push(value.into());
    }

    /// Builder-style append
    pub fn with(mut self, value: impl Into<ZeroElement>) -> Self {
        self.push(value);
        self
    }

    /// Remove and return the last element
    pub fn pop(&mut self) -> Option<ZeroElement> {
        self.items.pop()
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Option<&ZeroElement> {
        self.items.get(index)
    }

    /// Last element
    pub fn last(&self) -> Option<&ZeroElement> {
        self.items.last()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Elements in order
    pub fn iter(&self) -> impl Iterator<Item = &ZeroElement> {
        self.items.iter()
    }
}

impl FromIterator<ZeroElement> for ZeroArray {
    fn from_iter<T: IntoIterator<Item = ZeroElement>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}
