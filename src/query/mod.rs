//! Edgeseries Query Engine
//!
//! Selection, interval discovery and grouped aggregation over stored series:
//!
//! - **ast**: Operators, conditions, filters, aggregation vocabulary
//! - **calendar**: Timestamp to calendar field decomposition
//! - **predicate**: Value and calendar predicate evaluation
//! - **ranges**: Time range normalization and period discovery
//! - **aggregate**: Grouped reduction
//! - **executor**: Runs queries against the series store
//! - **parser**: Textual condition syntax
//!
//! # Examples
//!
//! ```rust,ignore
//! use edgeseries::query::{Filter, Operator, TimeField, AggregationFunc, GroupBy};
//!
//! // Points above 20 during working hours
//! let filter = Filter::new()
//!     .value(Operator::Gt, Value::Float(20.0))
//!     .time_field(TimeField::Hour, Operator::Gte, 8)
//!     .time_field(TimeField::Hour, Operator::Lt, 18);
//! let points = executor.select("boiler/temp", &filter).await?;
//!
//! // Per-minute sums
//! let rows = executor
//!     .aggregate("boiler/temp", AggregationFunc::Sum, &Filter::new(), GroupBy::Field(TimeField::Minute))
//!     .await?;
//! ```

mod aggregate;
mod ast;
mod calendar;
mod error;
mod executor;
mod parser;
mod predicate;
mod ranges;

pub use aggregate::{AggregateRow, GroupKey};
pub use ast::{
    AggregationFunc, Condition, DurationCondition, FieldCondition, Filter, GroupBy, Operator,
    TimeCondition, TimeField, ValueCondition,
};
pub use calendar::{Calendar, CalendarFields};
pub use error::{QueryError, QueryResult};
pub use executor::QueryExecutor;
pub use parser::{
    parse_condition, parse_duration_condition, parse_filter, parse_group_by, parse_range,
    parse_typed_value, parse_value_condition, ParsedCondition,
};
pub use predicate::{check_operand, evaluate, Predicate};
pub use ranges::{find_periods, normalize as normalize_ranges};
