//! Edgeseries storage layer
//!
//! - **types**: Core data structures (`Value`, `Point`, `TimeRange`, `Period`)
//! - **series**: One ordered, typed series
//! - **store**: Registry of series with per-series locking
//! - **clock**: Time sources for sentinel inserts
//! - **wal**: Optional mutation journal
//! - **error**: Error types and the shared `ErrorKind` taxonomy
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   insert → validate (type, order) → journal (optional) → append
//!
//! Read Path:
//!   query → lock series → copy points in range → unlock → filter
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use edgeseries::storage::{SeriesStore, TimeRange, Value, ValueType, NOW};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SeriesStore::new();
//!     store.create("boiler/temp", ValueType::Float).await?;
//!     store.insert("boiler/temp", NOW, Value::Float(71.5)).await?;
//!
//!     let snapshot = store.snapshot("boiler/temp", &[TimeRange::all()]).await?;
//!     println!("{} points", snapshot.points.len());
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod error;
pub mod series;
pub mod store;
pub mod types;
pub mod wal;

pub use clock::{Clock, ManualClock, Resolution, SystemClock};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use series::TimeSeries;
pub use store::{SeriesSnapshot, SeriesStore, StorageConfig, StoreStats};
pub use types::{Period, Point, TimeRange, Timestamp, Value, ValueClass, ValueType, NOW};
pub use wal::{Journal, JournalRecord, JournalSync};
