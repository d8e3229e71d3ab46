//! Query building blocks
//!
//! Conditions over values and calendar fields, duration conditions for interval
//! discovery, and the aggregation/grouping vocabulary.
//!
//! # Example
//!
//! ```text
//! value >= 20 AND hour < 18 IN [1000, 2000)    -> Filter
//! duration >= 60                              -> DurationCondition
//! SUM GROUP BY minute                         -> AggregationFunc + GroupBy
//! ```

use crate::storage::{TimeRange, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Greater than or equal to
    Gte,
    /// Less than
    Lt,
    /// Less than or equal to
    Lte,
}

impl Operator {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            _ => None,
        }
    }

    /// Whether the ordering of `lhs` relative to the operand satisfies this operator.
    ///
    /// `None` means the two sides are unordered (NaN): only `Ne` holds.
    pub fn holds(&self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Self::Ne, None) => true,
            (_, None) => false,
            (Self::Eq, Some(o)) => o == Ordering::Equal,
            (Self::Ne, Some(o)) => o != Ordering::Equal,
            (Self::Gt, Some(o)) => o == Ordering::Greater,
            (Self::Gte, Some(o)) => o != Ordering::Less,
            (Self::Lt, Some(o)) => o == Ordering::Less,
            (Self::Lte, Some(o)) => o != Ordering::Greater,
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "!="),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
        }
    }
}

/// An operator applied against a fixed operand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition<T> {
    pub op: Operator,
    pub operand: T,
}

impl<T> Condition<T> {
    pub fn new(op: Operator, operand: T) -> Self {
        Self { op, operand }
    }
}

impl<T: Ord> Condition<T> {
    /// Evaluate for a totally ordered left-hand side
    pub fn matches(&self, lhs: &T) -> bool {
        self.op.holds(Some(lhs.cmp(&self.operand)))
    }
}

impl<T: std::fmt::Display> std::fmt::Display for Condition<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.op, self.operand)
    }
}

/// Condition on a point's value
pub type ValueCondition = Condition<Value>;

/// Calendar fields a timestamp decomposes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeField {
    Year,
    Month,
    Day,
    Hour,
    Minute,
}

impl TimeField {
    pub fn all() -> &'static [TimeField] {
        &[
            TimeField::Year,
            TimeField::Month,
            TimeField::Day,
            TimeField::Hour,
            TimeField::Minute,
        ]
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "year" | "y" => Some(Self::Year),
            "month" | "mon" => Some(Self::Month),
            "day" | "d" => Some(Self::Day),
            "hour" | "h" => Some(Self::Hour),
            "minute" | "min" | "m" => Some(Self::Minute),
            _ => None,
        }
    }
}

impl std::fmt::Display for TimeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Year => write!(f, "year"),
            Self::Month => write!(f, "month"),
            Self::Day => write!(f, "day"),
            Self::Hour => write!(f, "hour"),
            Self::Minute => write!(f, "minute"),
        }
    }
}

/// Condition on one calendar field of a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: TimeField,
    pub op: Operator,
    pub operand: i32,
}

impl FieldCondition {
    pub fn new(field: TimeField, op: Operator, operand: i32) -> Self {
        Self { field, op, operand }
    }

    pub fn matches(&self, value: i32) -> bool {
        self.op.holds(Some(value.cmp(&self.operand)))
    }
}

impl std::fmt::Display for FieldCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.operand)
    }
}

/// Conjunction of calendar field conditions. Absent fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeCondition {
    pub fields: Vec<FieldCondition>,
}

impl TimeCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: TimeField, op: Operator, operand: i32) -> Self {
        self.fields.push(FieldCondition::new(field, op, operand));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Conjunction of conditions on the length of a discovered period
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationCondition {
    pub conditions: Vec<Condition<i64>>,
}

impl DurationCondition {
    /// Accept every duration
    pub fn any() -> Self {
        Self::default()
    }

    pub fn and(mut self, op: Operator, duration: i64) -> Self {
        self.conditions.push(Condition::new(op, duration));
        self
    }

    pub fn matches(&self, duration: i64) -> bool {
        self.conditions.iter().all(|c| c.matches(&duration))
    }
}

/// Everything a selection constrains: values (AND), calendar fields (AND) and
/// time ranges (OR). An empty filter selects every point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub values: Vec<ValueCondition>,
    pub time: TimeCondition,
    pub ranges: Vec<TimeRange>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value condition
    pub fn value(mut self, op: Operator, operand: Value) -> Self {
        self.values.push(Condition::new(op, operand));
        self
    }

    /// Add a calendar field condition
    pub fn time_field(mut self, field: TimeField, op: Operator, operand: i32) -> Self {
        self.time = self.time.field(field, op, operand);
        self
    }

    /// Add a time range
    pub fn range(mut self, range: TimeRange) -> Self {
        self.ranges.push(range);
        self
    }
}

/// Aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationFunc {
    /// Sum of values
    Sum,
    /// Average of values
    Avg,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Count of values
    Count,
}

impl AggregationFunc {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "avg" | "average" | "mean" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            _ => None,
        }
    }

    /// Whether this function needs numeric values
    pub fn is_arithmetic(&self) -> bool {
        matches!(self, Self::Sum | Self::Avg)
    }
}

impl std::fmt::Display for AggregationFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sum => write!(f, "SUM"),
            Self::Avg => write!(f, "AVG"),
            Self::Min => write!(f, "MIN"),
            Self::Max => write!(f, "MAX"),
            Self::Count => write!(f, "COUNT"),
        }
    }
}

/// How aggregation partitions points
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// One group for the whole selection
    #[default]
    None,
    /// By the value of a calendar field
    Field(TimeField),
    /// By `floor(value / width)` of a numeric value
    Bucket(f64),
}

impl std::fmt::Display for GroupBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Field(field) => write!(f, "{}", field),
            Self::Bucket(width) => write!(f, "bucket:{}", width),
        }
    }
}
