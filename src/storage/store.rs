//! Series store
//!
//! Owns every series. The registry sits behind an async `RwLock`; each series has
//! its own `Mutex`, held for exactly one operation. Reads copy a snapshot under the
//! lock and filter outside it.
//!
//! Lock order is registry, then series, then journal.

use crate::storage::clock::{Clock, SystemClock};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::series::TimeSeries;
use crate::storage::types::{Point, TimeRange, Timestamp, Value, ValueType};
use crate::storage::wal::{Journal, JournalRecord, JournalSync};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Configuration for the series store
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Journal file; `None` keeps the store purely in memory
    pub journal: Option<PathBuf>,
    /// Journal sync strategy
    pub journal_sync: JournalSync,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_journal(path: impl Into<PathBuf>) -> Self {
        Self {
            journal: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Point-in-time copy of one series
#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub value_type: ValueType,
    pub points: Vec<Point>,
}

type SeriesHandle = Arc<Mutex<TimeSeries>>;

/// Registry of all series
pub struct SeriesStore {
    series: RwLock<HashMap<String, SeriesHandle>>,
    clock: Arc<dyn Clock>,
    journal: Option<Mutex<Journal>>,
}

impl SeriesStore {
    /// Purely in-memory store on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::default()))
    }

    /// Purely in-memory store on the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            clock,
            journal: None,
        }
    }

    /// Open a store, replaying the journal if one is configured
    pub async fn open(config: StorageConfig, clock: Arc<dyn Clock>) -> StorageResult<Self> {
        let Some(path) = config.journal else {
            return Ok(Self::with_clock(clock));
        };

        let (journal, records) = Journal::open(&path, config.journal_sync)?;
        let mut series = HashMap::new();
        let replayed = records.len();
        for record in records {
            if let Err(e) = Self::replay(&mut series, record) {
                tracing::warn!("Skipping journal record: {}", e);
            }
        }

        tracing::info!(
            "Opened journal {} ({} records, {} series)",
            path.display(),
            replayed,
            series.len()
        );

        Ok(Self {
            series: RwLock::new(
                series
                    .into_iter()
                    .map(|(id, s)| (id, Arc::new(Mutex::new(s))))
                    .collect(),
            ),
            clock,
            journal: Some(Mutex::new(journal)),
        })
    }

    fn replay(series: &mut HashMap<String, TimeSeries>, record: JournalRecord) -> StorageResult<()> {
        match record {
            JournalRecord::Create { id, value_type } => {
                if series.contains_key(&id) {
                    return Err(StorageError::AlreadyExists(id));
                }
                series.insert(id.clone(), TimeSeries::new(id, value_type));
            }
            JournalRecord::Insert { id, point } => {
                let s = series
                    .get_mut(&id)
                    .ok_or(StorageError::SeriesNotFound(id))?;
                s.push(point)?;
            }
            JournalRecord::DeleteOldest { id, count } => {
                let s = series
                    .get_mut(&id)
                    .ok_or(StorageError::SeriesNotFound(id))?;
                s.delete_oldest(count);
            }
            JournalRecord::DeleteBefore { id, time } => {
                let s = series
                    .get_mut(&id)
                    .ok_or(StorageError::SeriesNotFound(id))?;
                s.delete_before(time);
            }
        }
        Ok(())
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    async fn get(&self, id: &str) -> StorageResult<SeriesHandle> {
        let registry = self.series.read().await;
        registry
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::SeriesNotFound(id.to_string()))
    }

    async fn log(&self, record: JournalRecord) -> StorageResult<()> {
        if let Some(journal) = &self.journal {
            journal.lock().await.append(&record)?;
        }
        Ok(())
    }

    /// Create an empty series
    pub async fn create(&self, id: &str, value_type: ValueType) -> StorageResult<()> {
        let mut registry = self.series.write().await;
        if registry.contains_key(id) {
            return Err(StorageError::AlreadyExists(id.to_string()));
        }
        if id.is_empty() {
            return Err(StorageError::InvalidArgument(
                "series id must not be empty".to_string(),
            ));
        }

        self.log(JournalRecord::Create {
            id: id.to_string(),
            value_type,
        })
        .await?;
        registry.insert(
            id.to_string(),
            Arc::new(Mutex::new(TimeSeries::new(id, value_type))),
        );

        tracing::debug!("Created series {} ({})", id, value_type);
        Ok(())
    }

    /// Append a value, returning the timestamp it was stored under.
    ///
    /// `time == NOW` assigns the current clock value, bumped past the latest point
    /// when the clock has not advanced.
    pub async fn insert(&self, id: &str, time: Timestamp, value: Value) -> StorageResult<Timestamp> {
        let handle = self.get(id).await?;
        let mut series = handle.lock().await;

        series.check_type(&value)?;
        let time = series.resolve_time(time, self.clock.now())?;
        series.reserve(1)?;

        let point = Point::new(time, value);
        self.log(JournalRecord::Insert {
            id: id.to_string(),
            point: point.clone(),
        })
        .await?;
        series.push(point)?;
        Ok(time)
    }

    /// Remove the `count` oldest points. Zero is a no-op.
    pub async fn delete_oldest(&self, id: &str, count: usize) -> StorageResult<usize> {
        let handle = self.get(id).await?;
        let mut series = handle.lock().await;

        if count == 0 || series.is_empty() {
            return Ok(0);
        }

        self.log(JournalRecord::DeleteOldest {
            id: id.to_string(),
            count,
        })
        .await?;
        let removed = series.delete_oldest(count);
        tracing::debug!("Deleted {} oldest points from {}", removed, id);
        Ok(removed)
    }

    /// Remove every point strictly older than `time`
    pub async fn delete_before(&self, id: &str, time: Timestamp) -> StorageResult<usize> {
        let handle = self.get(id).await?;
        let mut series = handle.lock().await;

        if series.earliest().map_or(true, |t| t >= time) {
            return Ok(0);
        }

        self.log(JournalRecord::DeleteBefore {
            id: id.to_string(),
            time,
        })
        .await?;
        let removed = series.delete_before(time);
        tracing::debug!("Deleted {} points before {} from {}", removed, time, id);
        Ok(removed)
    }

    pub async fn value_type(&self, id: &str) -> StorageResult<ValueType> {
        let handle = self.get(id).await?;
        let series = handle.lock().await;
        Ok(series.value_type())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.series.read().await.contains_key(id)
    }

    pub async fn len(&self, id: &str) -> StorageResult<usize> {
        let handle = self.get(id).await?;
        let series = handle.lock().await;
        Ok(series.len())
    }

    /// Sorted ids of every series
    pub async fn series_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.series.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copy the points inside `ranges` (sorted, non-overlapping)
    pub async fn snapshot(&self, id: &str, ranges: &[TimeRange]) -> StorageResult<SeriesSnapshot> {
        let handle = self.get(id).await?;
        let series = handle.lock().await;
        Ok(SeriesSnapshot {
            value_type: series.value_type(),
            points: series.snapshot(ranges)?,
        })
    }

    /// Rewrite the journal so it holds only the live state
    pub async fn compact(&self) -> StorageResult<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        let registry = self.series.write().await;
        let mut ids: Vec<&String> = registry.keys().collect();
        ids.sort();

        // Every series stays locked until the rewrite lands so no append slips between.
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(registry[id].lock().await);
        }

        let mut records = Vec::new();
        for series in &guards {
            records.push(JournalRecord::Create {
                id: series.id().to_string(),
                value_type: series.value_type(),
            });
            records.extend(series.points().iter().map(|p| JournalRecord::Insert {
                id: series.id().to_string(),
                point: p.clone(),
            }));
        }

        journal.lock().await.rewrite(&records)
    }

    /// Flush the journal to disk
    pub async fn sync(&self) -> StorageResult<()> {
        if let Some(journal) = &self.journal {
            journal.lock().await.sync()?;
        }
        Ok(())
    }

    pub async fn stats(&self) -> StoreStats {
        let handles: Vec<SeriesHandle> = self.series.read().await.values().cloned().collect();
        let mut total_points = 0;
        for handle in &handles {
            total_points += handle.lock().await.len();
        }

        let journal_entries = match &self.journal {
            Some(journal) => Some(journal.lock().await.entry_count()),
            None => None,
        };

        StoreStats {
            series_count: handles.len(),
            total_points,
            journal_entries,
        }
    }
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Store statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub series_count: usize,
    pub total_points: usize,
    pub journal_entries: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::clock::ManualClock;
    use crate::storage::types::NOW;
    use crate::storage::ErrorKind;
    use tempfile::tempdir;

    fn manual_store(start: Timestamp) -> (SeriesStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        (SeriesStore::with_clock(clock.clone()), clock)
    }

    async fn times(store: &SeriesStore, id: &str) -> Vec<Timestamp> {
        store
            .snapshot(id, &[TimeRange::all()])
            .await
            .unwrap()
            .points
            .iter()
            .map(|p| p.time)
            .collect()
    }

    #[tokio::test]
    async fn test_create_twice() {
        let store = SeriesStore::new();
        store.create("temp", ValueType::Float).await.unwrap();
        let err = store.create("temp", ValueType::Int).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(store.value_type("temp").await.unwrap(), ValueType::Float);
    }

    #[tokio::test]
    async fn test_insert_unknown_series() {
        let store = SeriesStore::new();
        let err = store.insert("nope", 1, Value::Float(1.0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_sentinel_inserts_are_strictly_increasing() {
        let (store, clock) = manual_store(1_000);
        store.create("s", ValueType::Int).await.unwrap();

        for i in 0..5 {
            store.insert("s", NOW, Value::Int(i)).await.unwrap();
        }
        clock.advance(100);
        store.insert("s", NOW, Value::Int(5)).await.unwrap();

        assert_eq!(
            times(&store, "s").await,
            vec![1_000, 1_001, 1_002, 1_003, 1_004, 1_100]
        );
    }

    #[tokio::test]
    async fn test_out_of_order_leaves_series_unchanged() {
        let (store, _) = manual_store(0);
        store.create("s", ValueType::Float).await.unwrap();
        store.insert("s", 10, Value::Float(1.0)).await.unwrap();
        store.insert("s", 20, Value::Float(2.0)).await.unwrap();

        for t in [20, 15, -3] {
            let err = store.insert("s", t, Value::Float(9.0)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OutOfOrder);
        }
        let err = store.insert("s", 30, Value::Bool(true)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);

        assert_eq!(store.len("s").await.unwrap(), 2);
        assert_eq!(times(&store, "s").await, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_delete_oldest_and_before() {
        let (store, _) = manual_store(0);
        store.create("s", ValueType::Long).await.unwrap();
        for t in 1..=6 {
            store.insert("s", t, Value::Long(t)).await.unwrap();
        }

        assert_eq!(store.delete_oldest("s", 0).await.unwrap(), 0);
        assert_eq!(store.delete_oldest("s", 2).await.unwrap(), 2);
        assert_eq!(times(&store, "s").await, vec![3, 4, 5, 6]);

        assert_eq!(store.delete_before("s", 5).await.unwrap(), 2);
        assert_eq!(times(&store, "s").await, vec![5, 6]);

        assert_eq!(store.delete_oldest("s", 10).await.unwrap(), 2);
        assert!(times(&store, "s").await.is_empty());
    }

    #[tokio::test]
    async fn test_journal_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("edgeseries.journal");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(500));

        {
            let store = SeriesStore::open(StorageConfig::with_journal(&path), clock.clone())
                .await
                .unwrap();
            store.create("a", ValueType::Float).await.unwrap();
            store.create("b", ValueType::Str).await.unwrap();
            for t in 1..=4 {
                store.insert("a", t, Value::Float(t as f64)).await.unwrap();
            }
            store.insert("b", NOW, Value::Str("on".into())).await.unwrap();
            store.delete_oldest("a", 1).await.unwrap();
            store.delete_before("a", 3).await.unwrap();
            assert!(store.insert("a", 2, Value::Float(0.0)).await.is_err());
            store.sync().await.unwrap();
        }

        let store = SeriesStore::open(StorageConfig::with_journal(&path), clock)
            .await
            .unwrap();
        assert_eq!(store.series_ids().await, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(times(&store, "a").await, vec![3, 4]);
        assert_eq!(times(&store, "b").await, vec![500]);

        let stats = store.stats().await;
        assert_eq!(stats.series_count, 2);
        assert_eq!(stats.total_points, 3);
        assert_eq!(stats.journal_entries, Some(9));
    }

    #[tokio::test]
    async fn test_compact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("edgeseries.journal");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));

        {
            let store = SeriesStore::open(StorageConfig::with_journal(&path), clock.clone())
                .await
                .unwrap();
            store.create("a", ValueType::Int).await.unwrap();
            for t in 1..=100 {
                store.insert("a", t, Value::Int(t as i32)).await.unwrap();
            }
            store.delete_before("a", 99).await.unwrap();
            store.compact().await.unwrap();
            assert_eq!(store.stats().await.journal_entries, Some(3));
            store.insert("a", 101, Value::Int(101)).await.unwrap();
        }

        let store = SeriesStore::open(StorageConfig::with_journal(&path), clock)
            .await
            .unwrap();
        assert_eq!(times(&store, "a").await, vec![99, 100, 101]);
    }
}
