//! Time range handling and interval discovery
//!
//! Input ranges are half-open and unioned before use. Discovered periods are
//! closed `[first.time, last.time]` spans of consecutive matching points.

use crate::query::ast::DurationCondition;
use crate::query::error::{QueryError, QueryResult};
use crate::query::predicate::Predicate;
use crate::storage::{Period, Point, TimeRange};

/// Validate, sort and merge requested ranges.
///
/// No ranges means the unbounded range. Empty ranges (`start == end`) are dropped;
/// an inverted range is rejected.
pub fn normalize(ranges: &[TimeRange]) -> QueryResult<Vec<TimeRange>> {
    if ranges.is_empty() {
        return Ok(vec![TimeRange::all()]);
    }

    if let Some(bad) = ranges.iter().find(|r| !r.is_valid()) {
        return Err(QueryError::invalid(format!(
            "time range start is after its end: {}",
            bad
        )));
    }

    let mut sorted: Vec<TimeRange> = ranges.iter().copied().filter(|r| !r.is_empty()).collect();
    sorted.sort_by_key(|r| r.start);

    let mut merged: Vec<TimeRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    Ok(merged)
}

/// Find maximal runs of consecutive points satisfying `predicate`.
///
/// `points` must be in time order; `ranges` normalized. A run never crosses a
/// range boundary. Runs whose duration fails `duration` are discarded.
pub fn find_periods(
    points: &[Point],
    ranges: &[TimeRange],
    predicate: &Predicate<'_>,
    duration: &DurationCondition,
) -> QueryResult<Vec<Period>> {
    let mut periods = Vec::new();

    for range in ranges {
        let lo = points.partition_point(|p| p.time < range.start);
        let hi = points.partition_point(|p| p.time < range.end).max(lo);

        let mut run: Option<Period> = None;
        for point in &points[lo..hi] {
            if predicate.matches(point) {
                match run.as_mut() {
                    Some(period) => period.end = point.time,
                    None => run = Some(Period::new(point.time, point.time)),
                }
            } else if let Some(period) = run.take() {
                push_period(&mut periods, period, duration)?;
            }
        }
        if let Some(period) = run {
            push_period(&mut periods, period, duration)?;
        }
    }

    Ok(periods)
}

fn push_period(
    periods: &mut Vec<Period>,
    period: Period,
    duration: &DurationCondition,
) -> QueryResult<()> {
    if duration.matches(period.duration()) {
        periods
            .try_reserve(1)
            .map_err(|_| QueryError::OutOfMemory(periods.len() + 1))?;
        periods.push(period);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{Operator, TimeCondition, ValueCondition};
    use crate::query::calendar::Calendar;
    use crate::storage::{Value, ValueType};

    fn points(samples: &[(i64, f64)]) -> Vec<Point> {
        samples
            .iter()
            .map(|&(t, v)| Point::new(t, Value::Float(v)))
            .collect()
    }

    #[test]
    fn test_normalize_default_and_merge() {
        assert_eq!(normalize(&[]).unwrap(), vec![TimeRange::all()]);

        let merged = normalize(&[
            TimeRange::new(50, 60),
            TimeRange::new(0, 10),
            TimeRange::new(5, 20),
            TimeRange::new(20, 30),
            TimeRange::new(40, 40),
        ])
        .unwrap();
        assert_eq!(merged, vec![TimeRange::new(0, 30), TimeRange::new(50, 60)]);

        assert!(normalize(&[TimeRange::new(5, 5)]).unwrap().is_empty());
        assert!(normalize(&[TimeRange::new(10, 5)]).is_err());
    }

    #[test]
    fn test_find_periods() {
        let pts = points(&[
            (0, 1.0),
            (10, 25.0),
            (20, 30.0),
            (30, 28.0),
            (40, 5.0),
            (50, 22.0),
            (60, 3.0),
            (70, 40.0),
            (80, 41.0),
        ]);
        let values = vec![ValueCondition::new(Operator::Gte, Value::Float(20.0))];
        let time = TimeCondition::new();
        let cal = Calendar::utc();
        let pred = Predicate::new(ValueType::Float, &values, &time, &cal).unwrap();

        let all = normalize(&[]).unwrap();
        let periods = find_periods(&pts, &all, &pred, &DurationCondition::any()).unwrap();
        assert_eq!(
            periods,
            vec![Period::new(10, 30), Period::new(50, 50), Period::new(70, 80)]
        );

        let long = DurationCondition::any().and(Operator::Gte, 15);
        let periods = find_periods(&pts, &all, &pred, &long).unwrap();
        assert_eq!(periods, vec![Period::new(10, 30)]);
    }

    #[test]
    fn test_runs_split_at_range_boundaries() {
        let pts = points(&[(1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0), (5, 1.0)]);
        let values: Vec<ValueCondition> = Vec::new();
        let time = TimeCondition::new();
        let cal = Calendar::utc();
        let pred = Predicate::new(ValueType::Float, &values, &time, &cal).unwrap();

        let ranges = normalize(&[TimeRange::new(1, 3), TimeRange::new(4, 10)]).unwrap();
        let periods = find_periods(&pts, &ranges, &pred, &DurationCondition::any()).unwrap();
        assert_eq!(periods, vec![Period::new(1, 2), Period::new(4, 5)]);
    }

    #[test]
    fn test_no_points() {
        let values: Vec<ValueCondition> = Vec::new();
        let time = TimeCondition::new();
        let cal = Calendar::utc();
        let pred = Predicate::new(ValueType::Float, &values, &time, &cal).unwrap();
        let periods =
            find_periods(&[], &[TimeRange::all()], &pred, &DurationCondition::any()).unwrap();
        assert!(periods.is_empty());
    }
}
