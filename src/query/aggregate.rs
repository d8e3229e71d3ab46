//! Grouped aggregation
//!
//! Points are partitioned by a group key and each non-empty partition reduces to
//! one row. `sum` and `avg` work in `f64`; `min` and `max` keep the winning point
//! itself, earliest first on ties.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::query::ast::{AggregationFunc, GroupBy};
use crate::query::calendar::Calendar;
use crate::query::error::{QueryError, QueryResult};
use crate::storage::{Point, Timestamp, Value, ValueType};

/// Key identifying one aggregation group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKey {
    /// The single group of an ungrouped aggregation
    All,
    /// Calendar field value
    Field(i32),
    /// Value bucket index, `floor(value / width)`
    Bucket(i64),
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupKey::All => write!(f, "*"),
            GroupKey::Field(v) => write!(f, "{}", v),
            GroupKey::Bucket(b) => write!(f, "#{}", b),
        }
    }
}

/// One aggregated group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub group: GroupKey,
    /// Timestamp of the chosen point for min/max, otherwise the group's earliest
    pub time: Timestamp,
    pub value: Value,
    /// Number of points in the group
    pub count: u64,
}

#[derive(Debug)]
struct Accumulator {
    first_time: Timestamp,
    count: u64,
    sum: f64,
    best: usize,
}

fn is_nan(value: &Value) -> bool {
    matches!(value, Value::Float(v) if v.is_nan())
}

/// Check that `func` and `group_by` make sense for a series of `value_type`
pub fn validate(value_type: ValueType, func: AggregationFunc, group_by: GroupBy) -> QueryResult<()> {
    if func.is_arithmetic() && !value_type.is_numeric() {
        return Err(QueryError::invalid(format!(
            "{} needs a numeric series, found {}",
            func, value_type
        )));
    }
    if let GroupBy::Bucket(width) = group_by {
        if !(width.is_finite() && width > 0.0) {
            return Err(QueryError::invalid(format!(
                "bucket width must be finite and positive, got {}",
                width
            )));
        }
        if !value_type.is_numeric() {
            return Err(QueryError::invalid(format!(
                "cannot bucket {} values",
                value_type
            )));
        }
    }
    Ok(())
}

fn group_key(point: &Point, group_by: GroupBy, calendar: &Calendar) -> Option<GroupKey> {
    match group_by {
        GroupBy::None => Some(GroupKey::All),
        GroupBy::Field(field) => calendar.field(point.time, field).map(GroupKey::Field),
        GroupBy::Bucket(width) => {
            let v = point.value.as_f64()?;
            if v.is_nan() {
                return None;
            }
            Some(GroupKey::Bucket((v / width).floor() as i64))
        }
    }
}

/// Reduce time-ordered `points` per group.
///
/// Points with no group key (a timestamp outside the calendar when grouping by
/// field, a NaN when bucketing) are left out. Rows come back ordered by key.
pub fn aggregate(
    points: &[Point],
    value_type: ValueType,
    func: AggregationFunc,
    group_by: GroupBy,
    calendar: &Calendar,
) -> QueryResult<Vec<AggregateRow>> {
    validate(value_type, func, group_by)?;

    let mut groups: BTreeMap<GroupKey, Accumulator> = BTreeMap::new();
    for (idx, point) in points.iter().enumerate() {
        let Some(key) = group_key(point, group_by, calendar) else {
            continue;
        };
        let acc = groups.entry(key).or_insert(Accumulator {
            first_time: point.time,
            count: 0,
            sum: 0.0,
            best: idx,
        });
        acc.count += 1;
        if func.is_arithmetic() {
            acc.sum += point.value.as_f64().unwrap_or(f64::NAN);
        }

        let current = &points[acc.best].value;
        let better = match func {
            AggregationFunc::Min => point.value.partial_compare(current) == Some(std::cmp::Ordering::Less),
            AggregationFunc::Max => {
                point.value.partial_compare(current) == Some(std::cmp::Ordering::Greater)
            }
            _ => false,
        };
        if better || (is_nan(current) && !is_nan(&point.value)) {
            acc.best = idx;
        }
    }

    let mut rows = Vec::new();
    rows.try_reserve_exact(groups.len())
        .map_err(|_| QueryError::OutOfMemory(groups.len()))?;

    for (group, acc) in groups {
        let row = match func {
            AggregationFunc::Sum => AggregateRow {
                group,
                time: acc.first_time,
                value: Value::Float(acc.sum),
                count: acc.count,
            },
            AggregationFunc::Avg => AggregateRow {
                group,
                time: acc.first_time,
                value: Value::Float(acc.sum / acc.count as f64),
                count: acc.count,
            },
            AggregationFunc::Count => AggregateRow {
                group,
                time: acc.first_time,
                value: Value::UInt64(acc.count),
                count: acc.count,
            },
            AggregationFunc::Min | AggregationFunc::Max => {
                let best = &points[acc.best];
                AggregateRow {
                    group,
                    time: best.time,
                    value: best.value.clone(),
                    count: acc.count,
                }
            }
        };
        rows.push(row);
    }

    Ok(rows)
}
