//! Core data types for the edgeseries storage engine
//!
//! This module defines the fundamental types used throughout the storage layer:
//! - `ValueType` and `Value`: the closed set of series value types
//! - `Point`: a single (timestamp, value) sample
//! - `TimeRange`: a half-open interval used to constrain queries
//! - `Period`: a closed interval produced by interval-discovery queries

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Timestamp in the engine's resolution (seconds by default).
///
/// `0` is reserved as the "assign current time" sentinel on insert.
pub type Timestamp = i64;

/// Sentinel timestamp meaning "use the current clock value"
pub const NOW: Timestamp = 0;

/// Value type of a series, fixed at creation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// 64-bit floating point
    Float,
    /// Signed 64-bit integer
    Long,
    /// Signed 32-bit integer
    Int,
    /// Signed 16-bit integer
    Int16,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Unsigned 32-bit integer
    UInt32,
    /// Unsigned 64-bit integer
    UInt64,
    /// Single character
    Char,
    /// UTF-8 string
    Str,
    /// Boolean
    Bool,
    /// Opaque binary blob
    Blob,
}

/// Comparison class of a value type.
///
/// Values are only comparable within one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    Numeric,
    Char,
    Str,
    Bool,
    Blob,
}

impl ValueType {
    /// Get all value types for iteration
    pub fn all() -> &'static [ValueType] {
        &[
            ValueType::Float,
            ValueType::Long,
            ValueType::Int,
            ValueType::Int16,
            ValueType::UInt8,
            ValueType::UInt16,
            ValueType::UInt32,
            ValueType::UInt64,
            ValueType::Char,
            ValueType::Str,
            ValueType::Bool,
            ValueType::Blob,
        ]
    }

    pub fn class(&self) -> ValueClass {
        match self {
            ValueType::Float
            | ValueType::Long
            | ValueType::Int
            | ValueType::Int16
            | ValueType::UInt8
            | ValueType::UInt16
            | ValueType::UInt32
            | ValueType::UInt64 => ValueClass::Numeric,
            ValueType::Char => ValueClass::Char,
            ValueType::Str => ValueClass::Str,
            ValueType::Bool => ValueClass::Bool,
            ValueType::Blob => ValueClass::Blob,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.class() == ValueClass::Numeric
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "float" | "double" | "f64" => Some(Self::Float),
            "long" | "i64" => Some(Self::Long),
            "int" | "i32" => Some(Self::Int),
            "int16" | "i16" => Some(Self::Int16),
            "uint8" | "u8" => Some(Self::UInt8),
            "uint16" | "u16" => Some(Self::UInt16),
            "uint32" | "u32" => Some(Self::UInt32),
            "uint64" | "u64" => Some(Self::UInt64),
            "char" => Some(Self::Char),
            "str" | "string" => Some(Self::Str),
            "bool" | "boolean" => Some(Self::Bool),
            "blob" | "bytes" => Some(Self::Blob),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Float => "float",
            ValueType::Long => "long",
            ValueType::Int => "int",
            ValueType::Int16 => "int16",
            ValueType::UInt8 => "uint8",
            ValueType::UInt16 => "uint16",
            ValueType::UInt32 => "uint32",
            ValueType::UInt64 => "uint64",
            ValueType::Char => "char",
            ValueType::Str => "str",
            ValueType::Bool => "bool",
            ValueType::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// A typed series value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Float(f64),
    Long(i64),
    Int(i32),
    Int16(i16),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Char(char),
    Str(String),
    Bool(bool),
    Blob(Vec<u8>),
}

impl Value {
    /// The type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Float(_) => ValueType::Float,
            Value::Long(_) => ValueType::Long,
            Value::Int(_) => ValueType::Int,
            Value::Int16(_) => ValueType::Int16,
            Value::UInt8(_) => ValueType::UInt8,
            Value::UInt16(_) => ValueType::UInt16,
            Value::UInt32(_) => ValueType::UInt32,
            Value::UInt64(_) => ValueType::UInt64,
            Value::Char(_) => ValueType::Char,
            Value::Str(_) => ValueType::Str,
            Value::Bool(_) => ValueType::Bool,
            Value::Blob(_) => ValueType::Blob,
        }
    }

    /// Integer view of the value, `None` for floats and non-numeric values
    pub fn as_i128(&self) -> Option<i128> {
        Some(match self {
            Value::Long(v) => *v as i128,
            Value::Int(v) => *v as i128,
            Value::Int16(v) => *v as i128,
            Value::UInt8(v) => *v as i128,
            Value::UInt16(v) => *v as i128,
            Value::UInt32(v) => *v as i128,
            Value::UInt64(v) => *v as i128,
            _ => return None,
        })
    }

    /// Floating point view of any numeric value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            other => other.as_i128().map(|v| v as f64),
        }
    }

    /// Ordering between two values of the same comparison class.
    ///
    /// Returns `None` when the classes differ or a float comparison involves NaN.
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_i128(), b.as_i128()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "'{}'", v),
            Value::Str(v) => write!(f, "\"{}\"", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// A single time-series sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Point {
    /// Timestamp in engine resolution
    pub time: Timestamp,
    /// The typed value
    pub value: Value,
}

impl Point {
    pub fn new(time: Timestamp, value: Value) -> Self {
        Self { time, value }
    }
}

/// Time range for queries (half-open interval: [start, end))
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (exclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range. Validity is checked by the query layer.
    pub const fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Create a time range, returning None if start > end
    pub fn try_new(start: Timestamp, end: Timestamp) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// The unbounded range
    pub const fn all() -> Self {
        Self::new(Timestamp::MIN, Timestamp::MAX)
    }

    /// Everything at or after `start`
    pub const fn since(start: Timestamp) -> Self {
        Self::new(start, Timestamp::MAX)
    }

    /// Everything strictly before `end`
    pub const fn until(end: Timestamp) -> Self {
        Self::new(Timestamp::MIN, end)
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Check if this range overlaps with another
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Get intersection with another range, if any
    pub fn intersection(&self, other: &TimeRange) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A closed interval [start, end] produced by interval discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// Timestamp of the first point of the run
    pub start: Timestamp,
    /// Timestamp of the last point of the run
    pub end: Timestamp,
}

impl Period {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Length of the period in engine resolution; a single-point run lasts 0
    pub fn duration(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_tags() {
        assert_eq!(Value::Float(1.0).value_type(), ValueType::Float);
        assert_eq!(Value::UInt8(3).value_type(), ValueType::UInt8);
        assert_eq!(Value::Str("a".into()).value_type(), ValueType::Str);
        assert!(ValueType::Int16.is_numeric());
        assert!(!ValueType::Blob.is_numeric());
        assert_eq!(ValueType::from_str("U16"), Some(ValueType::UInt16));
        assert_eq!(ValueType::from_str("nope"), None);
    }

    #[test]
    fn test_numeric_comparison_across_variants() {
        assert_eq!(
            Value::Int(3).partial_compare(&Value::Float(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::UInt64(u64::MAX).partial_compare(&Value::Long(-1)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Long(7).partial_compare(&Value::UInt8(7)),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::Float(f64::NAN).partial_compare(&Value::Float(1.0)), None);
    }

    #[test]
    fn test_cross_class_comparison_is_undefined() {
        assert_eq!(Value::Str("1".into()).partial_compare(&Value::Int(1)), None);
        assert_eq!(Value::Bool(true).partial_compare(&Value::UInt8(1)), None);
        assert_eq!(
            Value::Bool(false).partial_compare(&Value::Bool(true)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_time_range_contains() {
        let range = TimeRange::new(1000, 2000);

        assert!(!range.contains(999));
        assert!(range.contains(1000));
        assert!(range.contains(1999));
        assert!(!range.contains(2000));
        assert!(TimeRange::all().contains(-5));
        assert!(!TimeRange::until(10).contains(10));
    }

    #[test]
    fn test_time_range_intersection() {
        let a = TimeRange::new(0, 100);
        let b = TimeRange::new(50, 150);

        assert_eq!(a.intersection(&b), Some(TimeRange::new(50, 100)));
        assert_eq!(a.intersection(&TimeRange::new(100, 200)), None);
        assert!(a.overlaps(&b));
        assert!(TimeRange::try_new(5, 1).is_none());
    }

    #[test]
    fn test_point_serialization() {
        let point = Point::new(42, Value::Str("open".into()));
        let json = serde_json::to_string(&point).unwrap();
        let restored: Point = serde_json::from_str(&json).unwrap();
        assert_eq!(point, restored);
    }

    #[test]
    fn test_period_duration() {
        assert_eq!(Period::new(10, 70).duration(), 60);
        assert_eq!(Period::new(5, 5).duration(), 0);
    }
}
