//! Edgeseries Tag Index
//!
//! Answers "which devices and variables carry these tags" without walking the
//! adapter's device graph on every query:
//!
//! - **TagIndexCache**: Inverted index tag → node identifiers
//! - **IndexManager**: Loads, invalidates and repairs the cache
//!
//! # Architecture
//!
//! ```text
//! Adapter ──ChangeEvent──▶ queue ──(session open)──▶ IndexManager ──▶ TagIndexCache
//!    ▲                                                   │
//!    └──────────── lazy re-fetch on next lookup ─────────┘
//! ```

mod manager;
mod tag_cache;

pub use manager::{IndexManager, IndexStats, NotifyMode};
pub use tag_cache::TagIndexCache;
