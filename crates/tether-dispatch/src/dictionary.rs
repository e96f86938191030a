//! Keyed tuple dictionaries exchanged with the device.
//!
//! Every packet travelling between the host and the device is a dictionary of
//! integer keys mapped to typed tuples. Inbound packets carry their
//! destination in the unsigned integer stored under
//! [`DESTINATION_KEY`]; handler modules interpret the remaining keys.

use std::collections::BTreeMap;
use std::fmt;

/// Key holding the destination id of every inbound packet.
pub const DESTINATION_KEY: u32 = 0;

/// Storage width of an integer tuple, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    /// One byte.
    One,
    /// Two bytes.
    Two,
    /// Four bytes.
    Four,
}

impl IntWidth {
    /// Maps a byte count onto a supported width.
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Option<Self> {
        match bytes {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            4 => Some(Self::Four),
            _ => None,
        }
    }

    /// Number of bytes the width occupies.
    #[must_use]
    pub const fn bytes(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
        }
    }

    /// Largest unsigned value representable at this width.
    #[must_use]
    pub const fn unsigned_max(self) -> u32 {
        match self {
            Self::One => u8::MAX as u32,
            Self::Two => u16::MAX as u32,
            Self::Four => u32::MAX,
        }
    }

    /// Inclusive signed range representable at this width.
    #[must_use]
    pub const fn signed_range(self) -> (i32, i32) {
        match self {
            Self::One => (i8::MIN as i32, i8::MAX as i32),
            Self::Two => (i16::MIN as i32, i16::MAX as i32),
            Self::Four => (i32::MIN, i32::MAX),
        }
    }
}

/// A single typed value stored in a [`Dictionary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleValue {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    String(String),
    /// Unsigned integer stored at the given width.
    Uint {
        /// Storage width.
        width: IntWidth,
        /// Stored value.
        value: u32,
    },
    /// Signed integer stored at the given width.
    Int {
        /// Storage width.
        width: IntWidth,
        /// Stored value.
        value: i32,
    },
}

impl TupleValue {
    /// Short type label used in logs and in the JSON wire form.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::String(_) => "string",
            Self::Uint { .. } => "uint",
            Self::Int { .. } => "int",
        }
    }
}

/// Ordered mapping from tuple keys to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    tuples: BTreeMap<u32, TupleValue>,
}

impl Dictionary {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a tuple, replacing any value previously held under `key`.
    pub fn insert(&mut self, key: u32, value: TupleValue) -> Option<TupleValue> {
        self.tuples.insert(key, value)
    }

    /// Stores a one-byte unsigned integer.
    pub fn insert_u8(&mut self, key: u32, value: u8) {
        self.insert(
            key,
            TupleValue::Uint {
                width: IntWidth::One,
                value: u32::from(value),
            },
        );
    }

    /// Stores a two-byte unsigned integer.
    pub fn insert_u16(&mut self, key: u32, value: u16) {
        self.insert(
            key,
            TupleValue::Uint {
                width: IntWidth::Two,
                value: u32::from(value),
            },
        );
    }

    /// Stores a four-byte unsigned integer.
    pub fn insert_u32(&mut self, key: u32, value: u32) {
        self.insert(
            key,
            TupleValue::Uint {
                width: IntWidth::Four,
                value,
            },
        );
    }

    /// Stores a four-byte signed integer.
    pub fn insert_i32(&mut self, key: u32, value: i32) {
        self.insert(
            key,
            TupleValue::Int {
                width: IntWidth::Four,
                value,
            },
        );
    }

    /// Stores a string.
    pub fn insert_string(&mut self, key: u32, value: impl Into<String>) {
        self.insert(key, TupleValue::String(value.into()));
    }

    /// Stores a byte array.
    pub fn insert_bytes(&mut self, key: u32, value: impl Into<Vec<u8>>) {
        self.insert(key, TupleValue::Bytes(value.into()));
    }

    /// Returns the tuple stored under `key`.
    #[must_use]
    pub fn get(&self, key: u32) -> Option<&TupleValue> {
        self.tuples.get(&key)
    }

    /// Returns the unsigned integer stored under `key`, if the tuple is one.
    #[must_use]
    pub fn unsigned(&self, key: u32) -> Option<u32> {
        match self.tuples.get(&key)? {
            TupleValue::Uint { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Returns the signed integer stored under `key`, if the tuple is one.
    #[must_use]
    pub fn signed(&self, key: u32) -> Option<i32> {
        match self.tuples.get(&key)? {
            TupleValue::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Returns the string stored under `key`, if the tuple is one.
    #[must_use]
    pub fn string(&self, key: u32) -> Option<&str> {
        match self.tuples.get(&key)? {
            TupleValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the bytes stored under `key`, if the tuple is one.
    #[must_use]
    pub fn bytes(&self, key: u32) -> Option<&[u8]> {
        match self.tuples.get(&key)? {
            TupleValue::Bytes(value) => Some(value.as_slice()),
            _ => None,
        }
    }

    /// Iterates tuples in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &TupleValue)> {
        self.tuples.iter().map(|(key, value)| (*key, value))
    }

    /// Number of tuples held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// Returns `true` when the dictionary holds no tuples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

impl fmt::Display for Dictionary {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("{")?;
        for (index, (key, value)) in self.iter().enumerate() {
            if index > 0 {
                formatter.write_str(", ")?;
            }
            match value {
                TupleValue::Bytes(bytes) => write!(formatter, "{key}: bytes[{}]", bytes.len())?,
                TupleValue::String(text) => write!(formatter, "{key}: {text:?}")?,
                TupleValue::Uint { value, .. } => write!(formatter, "{key}: {value}u")?,
                TupleValue::Int { value, .. } => write!(formatter, "{key}: {value}i")?,
            }
        }
        formatter.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn typed_accessors_reject_mismatched_tuples() {
        let mut dictionary = Dictionary::new();
        dictionary.insert_u8(DESTINATION_KEY, 7);
        dictionary.insert_string(1, "hello");

        assert_eq!(dictionary.unsigned(DESTINATION_KEY), Some(7));
        assert_eq!(dictionary.unsigned(1), None);
        assert_eq!(dictionary.string(1), Some("hello"));
        assert_eq!(dictionary.signed(DESTINATION_KEY), None);
        assert_eq!(dictionary.bytes(2), None);
    }

    #[rstest]
    fn insert_replaces_existing_key() {
        let mut dictionary = Dictionary::new();
        dictionary.insert_u32(3, 1);
        let previous = dictionary.insert(3, TupleValue::String(String::from("two")));

        assert!(matches!(previous, Some(TupleValue::Uint { value: 1, .. })));
        assert_eq!(dictionary.len(), 1);
    }

    #[rstest]
    fn display_lists_tuples_in_key_order() {
        let mut dictionary = Dictionary::new();
        dictionary.insert_bytes(2, vec![1, 2, 3]);
        dictionary.insert_u16(0, 9);
        dictionary.insert_i32(1, -4);

        assert_eq!(dictionary.to_string(), "{0: 9u, 1: -4i, 2: bytes[3]}");
    }

    #[rstest]
    #[case(1, Some(IntWidth::One))]
    #[case(2, Some(IntWidth::Two))]
    #[case(4, Some(IntWidth::Four))]
    #[case(3, None)]
    #[case(8, None)]
    fn widths_map_from_byte_counts(#[case] bytes: u64, #[case] expected: Option<IntWidth>) {
        assert_eq!(IntWidth::from_bytes(bytes), expected);
    }
}
