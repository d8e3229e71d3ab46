//! # Edgeseries
//!
//! Embeddable time-series storage and query engine for gateway devices,
//! overlaid on a pluggable asset model of devices, variables and tags.
//!
//! ## Features
//!
//! - **Typed series**: Strictly time-ordered points, sentinel timestamps from a clock
//! - **Rich selection**: Value, calendar-field and time-range conditions combined
//! - **Interval discovery**: Periods where a condition held, filtered by duration
//! - **Aggregation**: sum/avg/min/max/count grouped by calendar field or value bucket
//! - **Tag lookups**: Cached tag index kept fresh by adapter change events
//! - **Durability**: Optional CRC-framed mutation journal
//!
//! ## Modules
//!
//! - [`storage`]: Series store, clock and journal
//! - [`query`]: Conditions, predicates, executor and text syntax
//! - [`model`]: Asset model adapter boundary
//! - [`index`]: Tag index cache
//! - [`session`]: Adapter query sessions
//! - [`engine`]: The engine instance tying it all together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgeseries::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = Arc::new(MemoryModel::new());
//!     model.add_device("boiler", "Boiler", None, vec![Tag::new("usage", "Temperature")])?;
//!     model.add_variable("boiler", "temp", Value::Float(21.5), vec![])?;
//!
//!     let engine = Engine::open(EngineConfig::default(), model).await?;
//!
//!     // Sample the variable into its series "boiler/temp"
//!     engine.sample_variable("boiler", "temp").await?;
//!
//!     // Points above 20 during working hours
//!     let filter = Filter::new()
//!         .value(Operator::Gt, Value::Float(20.0))
//!         .time_field(TimeField::Hour, Operator::Gte, 8)
//!         .time_field(TimeField::Hour, Operator::Lt, 18);
//!     let points = engine.select("boiler/temp", &filter).await?;
//!     println!("Found {} points", points.len());
//!
//!     engine.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod index;
pub mod model;
pub mod query;
pub mod session;
pub mod storage;

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig};

pub use engine::{Engine, EngineConfig, EngineStats, TaggedSeries};

pub use index::{IndexManager, IndexStats, NotifyMode, TagIndexCache};

pub use model::{
    change_channel, AdapterError, AdapterResult, AssetModel, ChangeEvent, ChangeKind,
    ChangeReceiver, ChangeSink, Device, MemoryModel, Node, NodeId, NodeKind, NodeRef, Owned,
    SessionId, Tag, Variable, VariableRef,
};

pub use query::{
    AggregateRow, AggregationFunc, Calendar, Condition, DurationCondition, Filter, GroupBy,
    GroupKey, Operator, QueryError, QueryResult, TimeCondition, TimeField, ValueCondition,
};

pub use session::{QuerySession, SessionManager};

pub use storage::{
    Clock, ErrorKind, ManualClock, Period, Point, Resolution, SeriesStore, StorageConfig,
    StorageError, StorageResult, SystemClock, TimeRange, Timestamp, Value, ValueType, NOW,
};
