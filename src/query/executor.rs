//! Query Executor
//!
//! Runs selections and aggregations against the `SeriesStore`:
//! 1. Normalize the requested time ranges
//! 2. Copy the matching slice of the series under its lock
//! 3. Validate operands against the series type
//! 4. Filter, discover periods or aggregate outside the lock
//!
//! # Execution Pipeline
//!
//! ```text
//! Filter → Ranges → Snapshot → Predicate → (Periods | Aggregate) → Result
//! ```

use crate::query::aggregate::{self, AggregateRow};
use crate::query::ast::{AggregationFunc, DurationCondition, Filter, GroupBy, ValueCondition};
use crate::query::calendar::Calendar;
use crate::query::error::QueryResult;
use crate::query::predicate::{check_operand, Predicate};
use crate::query::ranges;
use crate::storage::{Period, Point, SeriesStore, TimeRange};
use std::sync::Arc;
use std::time::Instant;

/// Query executor
pub struct QueryExecutor {
    store: Arc<SeriesStore>,
    calendar: Calendar,
}

impl QueryExecutor {
    pub fn new(store: Arc<SeriesStore>, calendar: Calendar) -> Self {
        Self { store, calendar }
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    /// Up to `n` most recent points matching `cond`, oldest first
    pub async fn select_last_n(
        &self,
        id: &str,
        n: usize,
        cond: Option<&ValueCondition>,
    ) -> QueryResult<Vec<Point>> {
        let snapshot = self.store.snapshot(id, &[TimeRange::all()]).await?;
        if let Some(cond) = cond {
            check_operand(snapshot.value_type, &cond.operand)?;
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut matched: Vec<Point> = snapshot
            .points
            .into_iter()
            .rev()
            .filter(|p| cond.map_or(true, |c| c.op.holds(p.value.partial_compare(&c.operand))))
            .take(n)
            .collect();
        matched.reverse();
        Ok(matched)
    }

    /// Points in `[range.start, range.end)` matching `cond`
    pub async fn select_between(
        &self,
        id: &str,
        range: TimeRange,
        cond: Option<&ValueCondition>,
    ) -> QueryResult<Vec<Point>> {
        let filter = Filter {
            values: cond.into_iter().cloned().collect(),
            ranges: vec![range],
            ..Default::default()
        };
        self.select(id, &filter).await
    }

    /// Points satisfying every value condition, every calendar condition and at
    /// least one time range
    pub async fn select(&self, id: &str, filter: &Filter) -> QueryResult<Vec<Point>> {
        let start = Instant::now();
        let ranges = ranges::normalize(&filter.ranges)?;
        let snapshot = self.store.snapshot(id, &ranges).await?;
        let scanned = snapshot.points.len();

        let predicate = Predicate::new(
            snapshot.value_type,
            &filter.values,
            &filter.time,
            &self.calendar,
        )?;

        let mut points = snapshot.points;
        if !predicate.is_trivial() {
            points.retain(|p| predicate.matches(p));
        }

        tracing::debug!(
            "select {}: {} of {} points in {:?}",
            id,
            points.len(),
            scanned,
            start.elapsed()
        );
        Ok(points)
    }

    /// Maximal periods where `filter` holds continuously, kept when their
    /// duration satisfies `duration`
    pub async fn select_time_ranges(
        &self,
        id: &str,
        filter: &Filter,
        duration: &DurationCondition,
    ) -> QueryResult<Vec<Period>> {
        let ranges = ranges::normalize(&filter.ranges)?;
        let snapshot = self.store.snapshot(id, &ranges).await?;
        let predicate = Predicate::new(
            snapshot.value_type,
            &filter.values,
            &filter.time,
            &self.calendar,
        )?;

        let periods = ranges::find_periods(&snapshot.points, &ranges, &predicate, duration)?;
        tracing::debug!("select_time_ranges {}: {} periods", id, periods.len());
        Ok(periods)
    }

    /// Aggregate the points selected by `filter`
    pub async fn aggregate(
        &self,
        id: &str,
        func: AggregationFunc,
        filter: &Filter,
        group_by: GroupBy,
    ) -> QueryResult<Vec<AggregateRow>> {
        let value_type = self.store.value_type(id).await?;
        aggregate::validate(value_type, func, group_by)?;

        let points = self.select(id, filter).await?;
        let rows = aggregate::aggregate(&points, value_type, func, group_by, &self.calendar)?;
        tracing::debug!(
            "aggregate {} {} by {}: {} rows from {} points",
            func,
            id,
            group_by,
            rows.len(),
            points.len()
        );
        Ok(rows)
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("calendar", &self.calendar)
            .finish()
    }
}
