//! A single typed, time-ordered series

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Point, TimeRange, Timestamp, Value, ValueType, NOW};

/// Ordered points of one series.
///
/// Points are strictly increasing by timestamp. Mutation is append or trim only;
/// an existing point is never updated in place.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    id: String,
    value_type: ValueType,
    points: Vec<Point>,
}

impl TimeSeries {
    pub fn new(id: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            id: id.into(),
            value_type,
            points: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Timestamp of the newest point
    pub fn latest(&self) -> Option<Timestamp> {
        self.points.last().map(|p| p.time)
    }

    /// Timestamp of the oldest point
    pub fn earliest(&self) -> Option<Timestamp> {
        self.points.first().map(|p| p.time)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn check_type(&self, value: &Value) -> StorageResult<()> {
        let found = value.value_type();
        if found != self.value_type {
            return Err(StorageError::TypeMismatch {
                expected: self.value_type,
                found,
            });
        }
        Ok(())
    }

    /// Work out the timestamp an insert at `requested` would be stored under.
    ///
    /// The sentinel resolves to `max(now, latest + 1)`. An explicit timestamp must be
    /// strictly newer than the latest stored point.
    pub fn resolve_time(&self, requested: Timestamp, now: Timestamp) -> StorageResult<Timestamp> {
        match (requested, self.latest()) {
            (NOW, None) => Ok(now),
            (NOW, Some(latest)) => Ok(now.max(latest.saturating_add(1))),
            (time, Some(latest)) if time <= latest => Err(StorageError::OutOfOrder {
                series: self.id.clone(),
                time,
                latest,
            }),
            (time, _) => Ok(time),
        }
    }

    /// Validate a point without applying it
    pub fn validate(&self, point: &Point) -> StorageResult<()> {
        self.check_type(&point.value)?;
        if let Some(latest) = self.latest() {
            if point.time <= latest {
                return Err(StorageError::OutOfOrder {
                    series: self.id.clone(),
                    time: point.time,
                    latest,
                });
            }
        }
        Ok(())
    }

    /// Append a point after checking its type and order
    pub fn push(&mut self, point: Point) -> StorageResult<()> {
        self.validate(&point)?;
        self.reserve(1)?;
        self.points.push(point);
        Ok(())
    }

    /// Make room for `additional` points up front
    pub fn reserve(&mut self, additional: usize) -> StorageResult<()> {
        self.points
            .try_reserve(additional)
            .map_err(|_| StorageError::OutOfMemory(self.points.len() + additional))
    }

    /// Remove the `count` oldest points, returning how many were removed
    pub fn delete_oldest(&mut self, count: usize) -> usize {
        let n = count.min(self.points.len());
        self.points.drain(..n);
        n
    }

    /// Remove every point strictly older than `time`
    pub fn delete_before(&mut self, time: Timestamp) -> usize {
        let n = self.points.partition_point(|p| p.time < time);
        self.points.drain(..n);
        n
    }

    /// Copy the points falling inside `ranges`.
    ///
    /// `ranges` must be sorted and non-overlapping, so the copy stays in time order.
    pub fn snapshot(&self, ranges: &[TimeRange]) -> StorageResult<Vec<Point>> {
        let spans: Vec<(usize, usize)> = ranges
            .iter()
            .map(|r| {
                let lo = self.points.partition_point(|p| p.time < r.start);
                let hi = self.points.partition_point(|p| p.time < r.end);
                (lo, hi.max(lo))
            })
            .collect();

        let total: usize = spans.iter().map(|(lo, hi)| hi - lo).sum();
        let mut out = Vec::new();
        out.try_reserve_exact(total)
            .map_err(|_| StorageError::OutOfMemory(total))?;
        for (lo, hi) in spans {
            out.extend_from_slice(&self.points[lo..hi]);
        }
        Ok(out)
    }

    /// Copy every point
    pub fn snapshot_all(&self) -> StorageResult<Vec<Point>> {
        self.snapshot(&[TimeRange::all()])
    }
}
