//! Predicate evaluation over points
//!
//! Value conditions compare within one comparison class (see `ValueClass`); any
//! cross-class comparison is rejected up front instead of quietly evaluating false.

use crate::query::ast::{Operator, TimeCondition, ValueCondition};
use crate::query::calendar::Calendar;
use crate::query::error::{QueryError, QueryResult};
use crate::storage::{Point, Value, ValueType};

/// Evaluate `value <op> operand`.
pub fn evaluate(value: &Value, op: Operator, operand: &Value) -> QueryResult<bool> {
    check_operand(value.value_type(), operand)?;
    Ok(op.holds(value.partial_compare(operand)))
}

/// Ensure `operand` can be compared with values of `series_type`
pub fn check_operand(series_type: ValueType, operand: &Value) -> QueryResult<()> {
    let operand_type = operand.value_type();
    if series_type.class() != operand_type.class() {
        return Err(QueryError::invalid(format!(
            "cannot compare {} values with a {} operand",
            series_type, operand_type
        )));
    }
    Ok(())
}

/// Combined value and calendar predicate, validated against one series type
#[derive(Debug, Clone)]
pub struct Predicate<'a> {
    values: &'a [ValueCondition],
    time: &'a TimeCondition,
    calendar: &'a Calendar,
}

impl<'a> Predicate<'a> {
    pub fn new(
        value_type: ValueType,
        values: &'a [ValueCondition],
        time: &'a TimeCondition,
        calendar: &'a Calendar,
    ) -> QueryResult<Self> {
        for cond in values {
            check_operand(value_type, &cond.operand)?;
        }
        Ok(Self {
            values,
            time,
            calendar,
        })
    }

    /// True when the predicate holds for every point
    pub fn is_trivial(&self) -> bool {
        self.values.is_empty() && self.time.is_empty()
    }

    pub fn matches_value(&self, value: &Value) -> bool {
        self.values
            .iter()
            .all(|c| c.op.holds(value.partial_compare(&c.operand)))
    }

    /// Calendar conditions. A timestamp outside the calendar matches only when
    /// there are no field conditions.
    pub fn matches_time(&self, time: i64) -> bool {
        if self.time.is_empty() {
            return true;
        }
        match self.calendar.fields(time) {
            Some(fields) => self.time.fields.iter().all(|c| c.matches(fields.get(c.field))),
            None => false,
        }
    }

    pub fn matches(&self, point: &Point) -> bool {
        self.matches_value(&point.value) && self.matches_time(point.time)
    }
}
