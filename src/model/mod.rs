//! Asset Model Adapter Boundary
//!
//! The engine reads devices, variables and tags from an externally supplied
//! [`AssetModel`]:
//! - **types**: Devices, variables, tags and node identities
//! - **node**: Kind-tagged payloads and the [`Owned`] release guard
//! - **events**: Change notifications pushed by the adapter
//! - **memory**: In-process reference adapter
//!
//! # Contract
//!
//! Every value an adapter returns is a fresh copy owned by the caller and is
//! handed back once through [`AssetModel::release`]. Adapters never keep a
//! handle into something they returned.

mod events;
mod memory;
mod node;
mod types;

pub use events::{change_channel, ChangeEvent, ChangeKind, ChangeReceiver, ChangeSink};
pub use memory::MemoryModel;
pub use node::{Node, NodeKind, Owned};
pub use types::{Device, NodeId, NodeRef, SessionId, Tag, Variable, VariableRef};

use async_trait::async_trait;

use crate::storage::{Value, ValueType};

/// Capability set the engine needs from an asset model backend
#[async_trait]
pub trait AssetModel: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &str;

    async fn open(&self) -> AdapterResult<()>;

    async fn close(&self) -> AdapterResult<()>;

    /// Device with its variables and child subtree
    async fn device(&self, device_id: &str) -> AdapterResult<Device>;

    async fn device_variable_ids(&self, device_id: &str) -> AdapterResult<Vec<NodeId>>;

    async fn device_tags(&self, device_id: &str) -> AdapterResult<Vec<Tag>>;

    /// `None` for a root device
    async fn device_parent_id(&self, device_id: &str) -> AdapterResult<Option<NodeId>>;

    async fn device_children_ids(&self, device_id: &str) -> AdapterResult<Vec<NodeId>>;

    /// Devices without a parent.
    ///
    /// Optional; without it the engine cannot cover the whole forest with
    /// change registrations and re-derives tag entries on every lookup.
    async fn root_device_ids(&self) -> AdapterResult<Vec<NodeId>> {
        Err(AdapterError::Unsupported("root enumeration".to_string()))
    }

    async fn variable(&self, device_id: &str, variable_id: &str) -> AdapterResult<Variable>;

    async fn variable_type(&self, device_id: &str, variable_id: &str) -> AdapterResult<ValueType>;

    async fn variable_value(&self, device_id: &str, variable_id: &str) -> AdapterResult<Value>;

    async fn variable_tags(&self, device_id: &str, variable_id: &str) -> AdapterResult<Vec<Tag>>;

    /// Devices carrying at least one of `tags`
    async fn devices_by_tags(&self, tags: &[Tag]) -> AdapterResult<Vec<Device>>;

    /// Variables carrying at least one of `tags`
    async fn variables_by_tags(&self, tags: &[Tag]) -> AdapterResult<Vec<Variable>>;

    async fn set_variable(
        &self,
        device_id: &str,
        variable_id: &str,
        value: Value,
    ) -> AdapterResult<()>;

    /// Take back a structure previously returned by this adapter.
    ///
    /// `recursive` covers everything reachable from `node`; otherwise only
    /// the head is released.
    fn release(&self, node: Node, recursive: bool) {
        let _ = recursive;
        drop(node);
    }

    async fn open_session(&self) -> AdapterResult<SessionId>;

    async fn close_session(&self, session: SessionId) -> AdapterResult<()>;

    /// Register `sink` for changes of a device, or of one of its variables.
    ///
    /// A device registration covers the device's variables and its whole
    /// child subtree. `Added` events reach every registered sink, whatever
    /// the node. Optional; backends without push support keep the default.
    async fn notify_on_change(
        &self,
        device_id: &str,
        variable_id: Option<&str>,
        sink: ChangeSink,
    ) -> AdapterResult<()> {
        let _ = (device_id, variable_id, sink);
        Err(AdapterError::Unsupported("change notification".to_string()))
    }
}

/// Errors reported by an asset model backend
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Unsupported capability: {0}")]
    Unsupported(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;
