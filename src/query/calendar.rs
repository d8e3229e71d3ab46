//! Calendar decomposition of timestamps
//!
//! Timestamps are offsets from the Unix epoch in the engine resolution. They are
//! decomposed with the proleptic Gregorian calendar at a fixed UTC offset (UTC by
//! default). Daylight-saving rules are never applied.

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};

use crate::query::ast::TimeField;
use crate::query::error::{QueryError, QueryResult};
use crate::storage::{Resolution, Timestamp};

/// Calendar fields of one timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFields {
    pub year: i32,
    /// 1-12
    pub month: i32,
    /// 1-31
    pub day: i32,
    /// 0-23
    pub hour: i32,
    /// 0-59
    pub minute: i32,
}

impl CalendarFields {
    pub fn get(&self, field: TimeField) -> i32 {
        match field {
            TimeField::Year => self.year,
            TimeField::Month => self.month,
            TimeField::Day => self.day,
            TimeField::Hour => self.hour,
            TimeField::Minute => self.minute,
        }
    }
}

/// Timestamp to calendar field rule
#[derive(Debug, Clone, Copy)]
pub struct Calendar {
    offset: FixedOffset,
    resolution: Resolution,
}

impl Calendar {
    /// UTC calendar over second timestamps
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
            resolution: Resolution::Seconds,
        }
    }

    /// Calendar at a fixed offset east of UTC, in minutes
    pub fn with_offset_minutes(offset_minutes: i32, resolution: Resolution) -> QueryResult<Self> {
        let offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                QueryError::invalid(format!("UTC offset out of range: {} minutes", offset_minutes))
            })?;
        Ok(Self { offset, resolution })
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn datetime(&self, ts: Timestamp) -> Option<DateTime<FixedOffset>> {
        let utc = match self.resolution {
            Resolution::Seconds => DateTime::from_timestamp(ts, 0),
            Resolution::Milliseconds => DateTime::from_timestamp_millis(ts),
        }?;
        Some(utc.with_timezone(&self.offset))
    }

    /// Decompose a timestamp. `None` when it lies outside the representable calendar.
    pub fn fields(&self, ts: Timestamp) -> Option<CalendarFields> {
        let dt = self.datetime(ts)?;
        Some(CalendarFields {
            year: dt.year(),
            month: dt.month() as i32,
            day: dt.day() as i32,
            hour: dt.hour() as i32,
            minute: dt.minute() as i32,
        })
    }

    /// Value of a single calendar field
    pub fn field(&self, ts: Timestamp, field: TimeField) -> Option<i32> {
        self.fields(ts).map(|f| f.get(field))
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}
