//! Edgeseries Engine
//!
//! One explicit instance owning everything a deployment needs:
//! - **SeriesStore**: typed series, optional journal
//! - **QueryExecutor**: selection, periods, aggregation
//! - **IndexManager**: tag cache over the asset model
//! - **SessionManager**: adapter session bracketing
//!
//! Store-only calls never touch the adapter. Calls that do open a session
//! first, apply queued change events, and close the session before returning.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edgeseries::{Engine, EngineConfig, MemoryModel, ValueType, Value, NOW};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::open(EngineConfig::default(), Arc::new(MemoryModel::new())).await?;
//! engine.create_series("boiler/temp", ValueType::Float).await?;
//! engine.insert("boiler/temp", NOW, Value::Float(21.5)).await?;
//! let last = engine.select_last_n("boiler/temp", 10, None).await?;
//! engine.close().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::index::{IndexManager, NotifyMode};
use crate::model::{
    AdapterError, AssetModel, Device, Node, NodeId, NodeRef, Owned, Tag, Variable, VariableRef,
};
use crate::query::{
    check_operand, AggregateRow, AggregationFunc, Calendar, DurationCondition, Filter, GroupBy,
    QueryError, QueryExecutor, QueryResult, ValueCondition,
};
use crate::session::{QuerySession, SessionManager};
use crate::storage::{
    Clock, Period, Point, Resolution, SeriesStore, StorageConfig, StorageError, SystemClock,
    TimeRange, Timestamp, Value, ValueType, NOW,
};

/// Runtime configuration of an engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    /// Calendar offset east of UTC, in minutes
    pub utc_offset_minutes: i32,
    /// Timestamp resolution
    pub resolution: Resolution,
    /// Concurrent adapter sessions
    pub max_sessions: usize,
    /// Register for adapter change notifications
    pub notifications: bool,
    /// Create a variable's series on its first sample
    pub auto_create_series: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::in_memory(),
            utc_offset_minutes: 0,
            resolution: Resolution::Seconds,
            max_sessions: 1,
            notifications: true,
            auto_create_series: true,
        }
    }
}

/// Engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub series_count: usize,
    pub total_points: usize,
    pub journal_entries: Option<u64>,
    pub cached_tags: usize,
    pub cached_nodes: usize,
    pub notify_mode: NotifyMode,
    pub active_sessions: usize,
}

/// Points selected from one tagged variable's series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedSeries {
    pub variable: VariableRef,
    pub series_id: String,
    pub points: Vec<Point>,
}

/// Time-series engine over a pluggable asset model
pub struct Engine {
    store: Arc<SeriesStore>,
    executor: QueryExecutor,
    index: IndexManager,
    sessions: SessionManager,
    model: Arc<dyn AssetModel>,
    config: EngineConfig,
}

impl Engine {
    /// Open an engine on the system clock
    pub async fn open(config: EngineConfig, model: Arc<dyn AssetModel>) -> QueryResult<Self> {
        let clock = Arc::new(SystemClock::new(config.resolution));
        Self::open_with_clock(config, model, clock).await
    }

    /// Open an engine on the given clock
    pub async fn open_with_clock(
        config: EngineConfig,
        model: Arc<dyn AssetModel>,
        clock: Arc<dyn Clock>,
    ) -> QueryResult<Self> {
        let calendar = Calendar::with_offset_minutes(config.utc_offset_minutes, config.resolution)?;
        let store = Arc::new(SeriesStore::open(config.storage.clone(), clock).await?);
        model.open().await?;

        let index = if config.notifications {
            IndexManager::new()
        } else {
            IndexManager::without_notifications()
        };

        let stats = store.stats().await;
        tracing::info!(
            adapter = model.name(),
            series = stats.series_count,
            points = stats.total_points,
            "engine opened"
        );

        Ok(Self {
            executor: QueryExecutor::new(store.clone(), calendar),
            store,
            index,
            sessions: SessionManager::new(config.max_sessions),
            model,
            config,
        })
    }

    /// Refuse new sessions, close the adapter and flush the journal
    pub async fn close(&self) -> QueryResult<()> {
        self.sessions.close();
        self.index.clear().await;
        let adapter = self.model.close().await;
        self.store.sync().await?;
        adapter?;
        tracing::info!(adapter = self.model.name(), "engine closed");
        Ok(())
    }

    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    pub fn model(&self) -> &Arc<dyn AssetModel> {
        &self.model
    }

    pub fn calendar(&self) -> &Calendar {
        self.executor.calendar()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ----- series -----

    pub async fn create_series(&self, id: &str, value_type: ValueType) -> QueryResult<()> {
        Ok(self.store.create(id, value_type).await?)
    }

    /// Append a point; `time == NOW` stamps it with the clock. Returns the
    /// stored timestamp.
    pub async fn insert(&self, id: &str, time: Timestamp, value: Value) -> QueryResult<Timestamp> {
        Ok(self.store.insert(id, time, value).await?)
    }

    pub async fn delete_oldest(&self, id: &str, count: usize) -> QueryResult<usize> {
        Ok(self.store.delete_oldest(id, count).await?)
    }

    pub async fn delete_before(&self, id: &str, time: Timestamp) -> QueryResult<usize> {
        Ok(self.store.delete_before(id, time).await?)
    }

    pub async fn series_ids(&self) -> Vec<String> {
        self.store.series_ids().await
    }

    pub async fn compact(&self) -> QueryResult<()> {
        Ok(self.store.compact().await?)
    }

    pub async fn sync(&self) -> QueryResult<()> {
        Ok(self.store.sync().await?)
    }

    // ----- queries -----

    pub async fn select_last_n(
        &self,
        id: &str,
        n: usize,
        cond: Option<&ValueCondition>,
    ) -> QueryResult<Vec<Point>> {
        self.executor.select_last_n(id, n, cond).await
    }

    pub async fn select_between(
        &self,
        id: &str,
        range: TimeRange,
        cond: Option<&ValueCondition>,
    ) -> QueryResult<Vec<Point>> {
        self.executor.select_between(id, range, cond).await
    }

    pub async fn select(&self, id: &str, filter: &Filter) -> QueryResult<Vec<Point>> {
        self.executor.select(id, filter).await
    }

    pub async fn select_time_ranges(
        &self,
        id: &str,
        filter: &Filter,
        duration: &DurationCondition,
    ) -> QueryResult<Vec<Period>> {
        self.executor.select_time_ranges(id, filter, duration).await
    }

    pub async fn aggregate(
        &self,
        id: &str,
        func: AggregationFunc,
        filter: &Filter,
        group_by: GroupBy,
    ) -> QueryResult<Vec<AggregateRow>> {
        self.executor.aggregate(id, func, filter, group_by).await
    }

    // ----- asset model -----

    async fn begin(&self) -> QueryResult<QuerySession> {
        let session = self.sessions.open(&self.model).await?;
        self.index.drain_events().await;
        Ok(session)
    }

    async fn finish<T>(session: QuerySession, result: QueryResult<T>) -> QueryResult<T> {
        let closed = session.close().await;
        let value = result?;
        closed?;
        Ok(value)
    }

    fn own<T: Into<Node>>(&self, value: T) -> Owned<T> {
        Owned::new(value, self.model.clone())
    }

    /// Devices carrying at least one of `tags`
    pub async fn find_devices(&self, tags: &[Tag]) -> QueryResult<Vec<NodeId>> {
        let session = self.begin().await?;
        let result = self.index.find_devices(&self.model, tags).await;
        Self::finish(session, result.map_err(QueryError::from)).await
    }

    /// Variables carrying at least one of `tags`
    pub async fn find_variables(&self, tags: &[Tag]) -> QueryResult<Vec<VariableRef>> {
        let session = self.begin().await?;
        let result = self.index.find_variables(&self.model, tags).await;
        Self::finish(session, result.map_err(QueryError::from)).await
    }

    async fn tagged_variables(&self, tags: &[Tag]) -> QueryResult<BTreeSet<VariableRef>> {
        let mut variables = BTreeSet::new();
        for node in self.index.lookup(&self.model, tags).await? {
            match node {
                NodeRef::Variable(v) => {
                    variables.insert(v);
                }
                NodeRef::Device(device_id) => {
                    let ids = match self.model.device_variable_ids(&device_id).await {
                        Ok(ids) => self.own(ids),
                        Err(AdapterError::NotFound(_)) => continue,
                        Err(e) => return Err(e.into()),
                    };
                    variables.extend(ids.iter().map(|v| VariableRef::new(&device_id, v)));
                }
            }
        }
        Ok(variables)
    }

    /// Select `filter` from the series of every variable that carries one of
    /// `tags` or belongs to a device that does.
    ///
    /// Variables without a series, or whose series type cannot be compared with
    /// the filter's operands, are skipped.
    pub async fn select_tagged(&self, tags: &[Tag], filter: &Filter) -> QueryResult<Vec<TaggedSeries>> {
        let session = self.begin().await?;
        let result = self.tagged_variables(tags).await;
        let variables = Self::finish(session, result).await?;

        let mut selected = Vec::new();
        for variable in variables {
            let series_id = variable.series_id();
            let value_type = match self.store.value_type(&series_id).await {
                Ok(t) => t,
                Err(StorageError::SeriesNotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            if filter
                .values
                .iter()
                .any(|c| check_operand(value_type, &c.operand).is_err())
            {
                tracing::debug!("select_tagged: skipping {} ({})", series_id, value_type);
                continue;
            }

            let points = self.executor.select(&series_id, filter).await?;
            selected.push(TaggedSeries {
                variable,
                series_id,
                points,
            });
        }
        Ok(selected)
    }

    pub async fn device(&self, device_id: &str) -> QueryResult<Owned<Device>> {
        let session = self.begin().await?;
        let result = self.model.device(device_id).await;
        Self::finish(session, result.map(|d| self.own(d)).map_err(QueryError::from)).await
    }

    pub async fn device_children(&self, device_id: &str) -> QueryResult<Owned<Vec<NodeId>>> {
        let session = self.begin().await?;
        let result = self.model.device_children_ids(device_id).await;
        Self::finish(session, result.map(|ids| self.own(ids)).map_err(QueryError::from)).await
    }

    pub async fn device_parent(&self, device_id: &str) -> QueryResult<Owned<Option<NodeId>>> {
        let session = self.begin().await?;
        let result = self.model.device_parent_id(device_id).await;
        Self::finish(session, result.map(|id| self.own(id)).map_err(QueryError::from)).await
    }

    pub async fn variable(&self, device_id: &str, variable_id: &str) -> QueryResult<Owned<Variable>> {
        let session = self.begin().await?;
        let result = self.model.variable(device_id, variable_id).await;
        Self::finish(session, result.map(|v| self.own(v)).map_err(QueryError::from)).await
    }

    /// Read a variable's current value and append it to its series
    pub async fn sample_variable(&self, device_id: &str, variable_id: &str) -> QueryResult<Point> {
        let session = self.begin().await?;
        let result = async {
            let value_type = *self.own(self.model.variable_type(device_id, variable_id).await?);
            let value = self
                .own(self.model.variable_value(device_id, variable_id).await?)
                .to_inner();
            Ok::<_, QueryError>((value_type, value))
        }
        .await;
        let (value_type, value) = Self::finish(session, result).await?;

        if value.value_type() != value_type {
            return Err(StorageError::TypeMismatch {
                expected: value_type,
                found: value.value_type(),
            }
            .into());
        }

        let series_id = VariableRef::new(device_id, variable_id).series_id();
        if !self.store.contains(&series_id).await {
            if !self.config.auto_create_series {
                return Err(StorageError::SeriesNotFound(series_id).into());
            }
            match self.store.create(&series_id, value_type).await {
                Ok(()) | Err(StorageError::AlreadyExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let time = self.store.insert(&series_id, NOW, value.clone()).await?;
        Ok(Point::new(time, value))
    }

    /// Write a variable through the adapter after checking its type
    pub async fn set_variable(
        &self,
        device_id: &str,
        variable_id: &str,
        value: Value,
    ) -> QueryResult<()> {
        let session = self.begin().await?;
        let result = async {
            let expected = *self.own(self.model.variable_type(device_id, variable_id).await?);
            let found = value.value_type();
            if expected != found {
                return Err(QueryError::from(StorageError::TypeMismatch { expected, found }));
            }
            self.model.set_variable(device_id, variable_id, value).await?;
            Ok::<_, QueryError>(())
        }
        .await;
        Self::finish(session, result).await
    }

    pub async fn stats(&self) -> EngineStats {
        let store = self.store.stats().await;
        let index = self.index.stats().await;
        EngineStats {
            series_count: store.series_count,
            total_points: store.total_points,
            journal_entries: store.journal_entries,
            cached_tags: index.cached_tags,
            cached_nodes: index.cached_nodes,
            notify_mode: index.mode,
            active_sessions: self.sessions.active(),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("adapter", &self.model.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryModel;
    use crate::query::{Operator, TimeField};
    use crate::storage::{ErrorKind, ManualClock};
    use tempfile::tempdir;

    fn temperature() -> Tag {
        Tag::new("usage", "Temperature")
    }

    fn create_test_model() -> Arc<MemoryModel> {
        let model = MemoryModel::new();
        model.add_device("plant", "Plant", None, vec![]).unwrap();
        model
            .add_device("d1", "Boiler", Some("plant"), vec![temperature()])
            .unwrap();
        model
            .add_variable("d1", "temp", Value::Float(21.5), vec![])
            .unwrap();
        model
            .add_variable("d1", "mode", Value::Str("auto".into()), vec![])
            .unwrap();
        model.add_device("d2", "Pump", Some("plant"), vec![]).unwrap();
        model
            .add_variable("d2", "inlet", Value::Float(40.0), vec![temperature()])
            .unwrap();
        Arc::new(model)
    }

    async fn create_test_engine(model: Arc<MemoryModel>) -> Engine {
        Engine::open_with_clock(
            EngineConfig::default(),
            model,
            Arc::new(ManualClock::new(1_000)),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_series_lifecycle() {
        let engine = create_test_engine(create_test_model()).await;
        engine.create_series("s", ValueType::Float).await.unwrap();
        for (t, v) in [(1, 1.0), (2, 2.0), (3, 3.0), (61, 10.0), (62, 20.0)] {
            engine.insert("s", t, Value::Float(v)).await.unwrap();
        }

        let err = engine.insert("s", 62, Value::Float(0.0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfOrder);
        assert_eq!(engine.store().len("s").await.unwrap(), 5);

        let err = engine.create_series("s", ValueType::Long).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let rows = engine
            .aggregate("s", AggregationFunc::Sum, &Filter::new(), GroupBy::Field(TimeField::Minute))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].value, Value::Float(30.0));

        assert_eq!(engine.delete_oldest("s", 2).await.unwrap(), 2);
        assert_eq!(engine.delete_before("s", 61).await.unwrap(), 1);
        assert!(engine
            .select_between("s", TimeRange::until(61), None)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(engine.delete_oldest("s", 10).await.unwrap(), 2);
        assert_eq!(engine.store().len("s").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tag_cache_consistency() {
        let memory = create_test_model();
        let engine = create_test_engine(memory.clone()).await;

        let devices = engine.find_devices(&[temperature()]).await.unwrap();
        assert_eq!(devices, vec!["d1".to_string()]);

        memory.remove_device("d1").unwrap();
        let devices = engine.find_devices(&[temperature()]).await.unwrap();
        assert!(devices.is_empty());

        let variables = engine.find_variables(&[temperature()]).await.unwrap();
        assert_eq!(variables, vec![VariableRef::new("d2", "inlet")]);
        assert_eq!(memory.outstanding(), 0);
        assert_eq!(memory.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_owned_results_release_once() {
        let memory = create_test_model();
        let engine = create_test_engine(memory.clone()).await;

        {
            let plant = engine.device("plant").await.unwrap();
            assert_eq!(plant.children.len(), 2);
            let kids = engine.device_children("plant").await.unwrap();
            assert_eq!(kids.len(), 2);
            let parent = engine.device_parent("d1").await.unwrap();
            assert_eq!(parent.as_deref(), Some("plant"));
            let variable = engine.variable("d1", "temp").await.unwrap();
            assert_eq!(variable.value_type, ValueType::Float);
            assert!(memory.outstanding() > 0);
        }
        assert_eq!(memory.outstanding(), 0);

        let err = engine.device("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(memory.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_sample_and_select_tagged() {
        let memory = create_test_model();
        let engine = create_test_engine(memory.clone()).await;

        let first = engine.sample_variable("d1", "temp").await.unwrap();
        assert_eq!(first, Point::new(1_000, Value::Float(21.5)));
        engine
            .set_variable("d1", "temp", Value::Float(23.0))
            .await
            .unwrap();
        let second = engine.sample_variable("d1", "temp").await.unwrap();
        assert_eq!(second.time, 1_001);
        engine.sample_variable("d1", "mode").await.unwrap();
        engine.sample_variable("d2", "inlet").await.unwrap();

        let filter = Filter::new().value(Operator::Gt, Value::Float(22.0));
        let tagged = engine.select_tagged(&[temperature()], &filter).await.unwrap();
        let got: Vec<_> = tagged
            .iter()
            .map(|t| (t.series_id.as_str(), t.points.len()))
            .collect();
        assert_eq!(got, vec![("d1/temp", 1), ("d2/inlet", 1)]);
        assert_eq!(memory.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_set_variable_type_checked() {
        let memory = create_test_model();
        let engine = create_test_engine(memory.clone()).await;

        let err = engine
            .set_variable("d1", "temp", Value::Bool(true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(
            memory.variable_value("d1", "temp").await.unwrap(),
            Value::Float(21.5)
        );
    }

    #[tokio::test]
    async fn test_sample_without_auto_create() {
        let config = EngineConfig {
            auto_create_series: false,
            ..Default::default()
        };
        let engine = Engine::open(config, create_test_model()).await.unwrap();
        let err = engine.sample_variable("d1", "temp").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(engine.series_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_session_unavailable_does_no_work() {
        let memory = create_test_model();
        let engine = create_test_engine(memory.clone()).await;
        memory.set_sessions_available(false);

        let err = engine.sample_variable("d1", "temp").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionUnavailable);
        assert!(engine.series_ids().await.is_empty());
        assert_eq!(memory.fetch_count(), 0);

        let err = engine.find_devices(&[temperature()]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionUnavailable);
        assert_eq!(engine.stats().await.cached_tags, 0);
    }

    #[tokio::test]
    async fn test_journal_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = EngineConfig {
            storage: StorageConfig::with_journal(dir.path().join("edgeseries.journal")),
            ..Default::default()
        };

        {
            let engine = Engine::open(config.clone(), create_test_model()).await.unwrap();
            engine.create_series("s", ValueType::Long).await.unwrap();
            engine.insert("s", 10, Value::Long(1)).await.unwrap();
            engine.insert("s", 20, Value::Long(2)).await.unwrap();
            engine.delete_oldest("s", 1).await.unwrap();
            engine.close().await.unwrap();
        }

        let engine = Engine::open(config, create_test_model()).await.unwrap();
        let points = engine.select_last_n("s", 10, None).await.unwrap();
        assert_eq!(points, vec![Point::new(20, Value::Long(2))]);
        let stats = engine.stats().await;
        assert_eq!(stats.series_count, 1);
        assert_eq!(stats.journal_entries, Some(4));
    }

    #[tokio::test]
    async fn test_closed_engine_refuses_sessions() {
        let engine = create_test_engine(create_test_model()).await;
        engine.close().await.unwrap();
        let err = engine.find_devices(&[temperature()]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionUnavailable);
    }
}
