//! Index Manager - Keeps the tag cache in step with the adapter
//!
//! Serializes every cache read and invalidation behind one lock and decides
//! how the cache learns about changes. Registrations are made per root
//! device; each covers the root's whole subtree.
//!
//! ```text
//! every root registered         → Push:     events queue up, drained at session open
//! notify_on_change Unsupported  → Rederive: requested tags rebuilt on every lookup
//! no root to register with yet  → Unknown:  rebuilt like Rederive, retried per lookup
//! ```
//!
//! Lookup pipeline:
//!
//! ```text
//! 1. Drain queued change events    → invalidate entries
//! 2. Unknown mode only             → register with every root device
//! 3. Push: register added roots    / otherwise forget requested tags
//! 4. Re-fetch tags of stale nodes  → vanished or untagged nodes are dropped
//! 5. Load tags never seen before   → devices_by_tags + variables_by_tags
//! 6. Answer from the cache
//! ```

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::index::tag_cache::TagIndexCache;
use crate::model::{
    change_channel, AdapterError, AdapterResult, AssetModel, ChangeKind, ChangeReceiver,
    ChangeSink, NodeId, NodeRef, Owned, Tag, VariableRef,
};

/// How the cache hears about adapter-side changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    /// No registration attempted yet
    Unknown,
    /// Adapter pushes change events
    Push,
    /// Adapter cannot notify; entries are rebuilt per query
    Rederive,
}

impl std::fmt::Display for NotifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotifyMode::Unknown => "unknown",
            NotifyMode::Push => "push",
            NotifyMode::Rederive => "rederive",
        };
        write!(f, "{}", s)
    }
}

/// Statistics about the tag cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub cached_tags: usize,
    pub cached_nodes: usize,
    pub mode: NotifyMode,
}

struct IndexState {
    cache: TagIndexCache,
    mode: NotifyMode,
    /// Root devices registered for change notification
    watched: HashSet<NodeId>,
    /// Devices announced since the last lookup, possibly new roots
    added: BTreeSet<NodeId>,
    events: ChangeReceiver,
}

impl IndexState {
    fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(event) = self.events.try_recv() {
            if let NodeRef::Device(id) = &event.node {
                match event.kind {
                    ChangeKind::Added => {
                        self.added.insert(id.clone());
                    }
                    ChangeKind::Removed => {
                        self.added.remove(id);
                        self.watched.remove(id);
                    }
                    ChangeKind::TagsChanged => {}
                }
            }
            self.cache.invalidate(&event);
            drained += 1;
        }

        if self.mode == NotifyMode::Push && self.watched.is_empty() {
            tracing::debug!("every watched root removed, renegotiating change notification");
            self.mode = NotifyMode::Unknown;
        }
        drained
    }

    fn unsupported(&mut self, model: &Arc<dyn AssetModel>) {
        tracing::warn!(
            adapter = model.name(),
            "change notification unsupported, re-deriving tag entries per query"
        );
        self.mode = NotifyMode::Rederive;
        self.watched.clear();
        self.added.clear();
    }

    /// Register for changes anywhere under `device_id`
    async fn register(
        &mut self,
        model: &Arc<dyn AssetModel>,
        sink: &ChangeSink,
        device_id: &str,
    ) -> AdapterResult<()> {
        match model.notify_on_change(device_id, None, sink.clone()).await {
            Ok(()) => {
                self.watched.insert(device_id.to_string());
                Ok(())
            }
            Err(AdapterError::Unsupported(_)) => {
                self.unsupported(model);
                Ok(())
            }
            Err(AdapterError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Cover every root device with a registration, then switch to Push.
    ///
    /// Roots are enumerated a second time once the first registration is in
    /// place; roots added after that arrive as `Added` events.
    async fn negotiate(
        &mut self,
        model: &Arc<dyn AssetModel>,
        sink: &ChangeSink,
    ) -> AdapterResult<()> {
        for _ in 0..2 {
            let roots = match model.root_device_ids().await {
                Ok(roots) => Owned::new(roots, model.clone()),
                Err(AdapterError::Unsupported(_)) => {
                    self.unsupported(model);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let fresh: Vec<NodeId> = roots
                .iter()
                .filter(|id| !self.watched.contains(*id))
                .cloned()
                .collect();
            for id in fresh {
                self.register(model, sink, &id).await?;
                if self.mode == NotifyMode::Rederive {
                    return Ok(());
                }
            }
            if self.watched.is_empty() {
                return Ok(());
            }
        }

        tracing::info!(
            adapter = model.name(),
            roots = self.watched.len(),
            "change notification enabled"
        );
        self.mode = NotifyMode::Push;
        self.added.clear();
        // Entries loaded before registration may have missed changes
        self.cache.clear();
        Ok(())
    }

    /// Register added devices that turned out to be roots
    async fn watch_added(
        &mut self,
        model: &Arc<dyn AssetModel>,
        sink: &ChangeSink,
    ) -> AdapterResult<()> {
        while let Some(id) = self.added.pop_first() {
            if self.watched.contains(&id) {
                continue;
            }
            match model.device_parent_id(&id).await {
                Ok(parent) => {
                    let parent = Owned::new(parent, model.clone());
                    if parent.is_none() {
                        self.register(model, sink, &id).await?;
                    }
                }
                Err(AdapterError::NotFound(_)) => {}
                Err(e) => {
                    self.added.insert(id);
                    return Err(e);
                }
            }
            if self.mode != NotifyMode::Push {
                break;
            }
        }
        Ok(())
    }

    async fn repair_stale(&mut self, model: &Arc<dyn AssetModel>) -> AdapterResult<()> {
        for node in self.cache.stale_nodes() {
            let fetched = match &node {
                NodeRef::Device(id) => model.device_tags(id).await,
                NodeRef::Variable(v) => model.variable_tags(&v.device_id, &v.variable_id).await,
            };
            match fetched {
                Ok(tags) => {
                    let tags = Owned::new(tags, model.clone());
                    if self.cache.covers(&tags) {
                        self.cache.insert_node(node, tags.to_inner());
                    } else {
                        self.cache.remove_node(&node);
                    }
                }
                Err(AdapterError::NotFound(_)) => self.cache.remove_node(&node),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn load(&mut self, model: &Arc<dyn AssetModel>, tags: &[Tag]) -> AdapterResult<()> {
        let devices = Owned::new(model.devices_by_tags(tags).await?, model.clone());
        let variables = Owned::new(model.variables_by_tags(tags).await?, model.clone());

        let nodes: Vec<(NodeRef, Vec<Tag>)> = devices
            .iter()
            .map(|d| (NodeRef::device(&d.id), d.tags.clone()))
            .chain(
                variables
                    .iter()
                    .map(|v| (NodeRef::Variable(v.reference()), v.tags.clone())),
            )
            .collect();

        tracing::debug!("tag cache loaded {} tags, {} nodes", tags.len(), nodes.len());
        self.cache.load(tags, nodes);
        Ok(())
    }
}

/// Coordinates the tag cache with the adapter
pub struct IndexManager {
    state: Mutex<IndexState>,
    sink: ChangeSink,
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexManager {
    pub fn new() -> Self {
        Self::with_mode(NotifyMode::Unknown)
    }

    /// Never register with the adapter; rebuild entries on every lookup
    pub fn without_notifications() -> Self {
        Self::with_mode(NotifyMode::Rederive)
    }

    fn with_mode(mode: NotifyMode) -> Self {
        let (sink, events) = change_channel();
        Self {
            state: Mutex::new(IndexState {
                cache: TagIndexCache::new(),
                mode,
                watched: HashSet::new(),
                added: BTreeSet::new(),
                events,
            }),
            sink,
        }
    }

    /// Apply queued change events; returns how many were applied
    pub async fn drain_events(&self) -> usize {
        let drained = self.state.lock().await.drain();
        if drained > 0 {
            tracing::debug!("applied {} change events to tag cache", drained);
        }
        drained
    }

    /// Nodes carrying at least one of `tags`, consistent with the adapter as of
    /// this call
    pub async fn lookup(
        &self,
        model: &Arc<dyn AssetModel>,
        tags: &[Tag],
    ) -> AdapterResult<BTreeSet<NodeRef>> {
        let mut state = self.state.lock().await;
        state.drain();

        if state.mode == NotifyMode::Unknown {
            state.negotiate(model, &self.sink).await?;
        }
        if state.mode == NotifyMode::Push {
            state.watch_added(model, &self.sink).await?;
        }
        if state.mode != NotifyMode::Push {
            state.cache.forget(tags);
        }
        state.repair_stale(model).await?;

        let missing = state.cache.missing(tags);
        if !missing.is_empty() {
            state.load(model, &missing).await?;
        }
        Ok(state.cache.lookup(tags))
    }

    pub async fn find_devices(
        &self,
        model: &Arc<dyn AssetModel>,
        tags: &[Tag],
    ) -> AdapterResult<Vec<NodeId>> {
        Ok(self
            .lookup(model, tags)
            .await?
            .into_iter()
            .filter_map(|node| match node {
                NodeRef::Device(id) => Some(id),
                NodeRef::Variable(_) => None,
            })
            .collect())
    }

    pub async fn find_variables(
        &self,
        model: &Arc<dyn AssetModel>,
        tags: &[Tag],
    ) -> AdapterResult<Vec<VariableRef>> {
        Ok(self
            .lookup(model, tags)
            .await?
            .into_iter()
            .filter_map(|node| match node {
                NodeRef::Variable(v) => Some(v),
                NodeRef::Device(_) => None,
            })
            .collect())
    }

    pub async fn mode(&self) -> NotifyMode {
        self.state.lock().await.mode
    }

    pub async fn stats(&self) -> IndexStats {
        let state = self.state.lock().await;
        IndexStats {
            cached_tags: state.cache.tag_count(),
            cached_nodes: state.cache.node_count(),
            mode: state.mode,
        }
    }

    /// Drop all cached entries; registrations stay in place
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.drain();
        state.cache.clear();
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryModel;
    use crate::storage::Value;

    fn temp() -> Tag {
        Tag::new("usage", "Temperature")
    }

    fn create_test_model(notifications: bool) -> Arc<MemoryModel> {
        let model = if notifications {
            MemoryModel::new()
        } else {
            MemoryModel::without_notifications()
        };
        model.add_device("d1", "Boiler", None, vec![temp()]).unwrap();
        model.add_device("d2", "Pump", None, vec![]).unwrap();
        model
            .add_variable("d2", "t", Value::Float(40.0), vec![temp()])
            .unwrap();
        Arc::new(model)
    }

    #[tokio::test]
    async fn test_removed_device_disappears() {
        let memory = create_test_model(true);
        let model: Arc<dyn AssetModel> = memory.clone();
        let manager = IndexManager::new();

        let devices = manager.find_devices(&model, &[temp()]).await.unwrap();
        assert_eq!(devices, vec!["d1".to_string()]);
        assert_eq!(manager.mode().await, NotifyMode::Push);

        memory.remove_device("d1").unwrap();
        assert!(manager.find_devices(&model, &[temp()]).await.unwrap().is_empty());
        assert_eq!(memory.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_push_mode_serves_from_cache() {
        let memory = create_test_model(true);
        let model: Arc<dyn AssetModel> = memory.clone();
        let manager = IndexManager::new();

        manager.find_variables(&model, &[temp()]).await.unwrap();
        let fetches = memory.fetch_count();
        let vars = manager.find_variables(&model, &[temp()]).await.unwrap();
        assert_eq!(vars, vec![VariableRef::new("d2", "t")]);
        assert_eq!(memory.fetch_count(), fetches);

        memory.set_variable_tags("d2", "t", vec![]).unwrap();
        assert_eq!(manager.drain_events().await, 1);
        assert!(manager.find_variables(&model, &[temp()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_added_node_picked_up() {
        let memory = create_test_model(true);
        let model: Arc<dyn AssetModel> = memory.clone();
        let manager = IndexManager::new();

        assert_eq!(manager.find_devices(&model, &[temp()]).await.unwrap().len(), 1);
        memory.add_device("d3", "Tank", None, vec![temp()]).unwrap();
        let devices = manager.find_devices(&model, &[temp()]).await.unwrap();
        assert_eq!(devices, vec!["d1".to_string(), "d3".to_string()]);
        assert_eq!(memory.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_rederive_without_notifications() {
        let memory = create_test_model(false);
        let model: Arc<dyn AssetModel> = memory.clone();
        let manager = IndexManager::new();

        assert_eq!(manager.find_devices(&model, &[temp()]).await.unwrap().len(), 1);
        assert_eq!(manager.mode().await, NotifyMode::Rederive);

        memory.remove_device("d1").unwrap();
        assert!(manager.find_devices(&model, &[temp()]).await.unwrap().is_empty());

        memory.set_device_tags("d2", vec![temp()]).unwrap();
        let devices = manager.find_devices(&model, &[temp()]).await.unwrap();
        assert_eq!(devices, vec!["d2".to_string()]);

        let stats = manager.stats().await;
        assert_eq!(stats.cached_tags, 1);
        assert_eq!(stats.mode, NotifyMode::Rederive);
        assert_eq!(memory.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_notifications_disabled() {
        let memory = create_test_model(true);
        let model: Arc<dyn AssetModel> = memory.clone();
        let manager = IndexManager::without_notifications();

        manager.find_devices(&model, &[temp()]).await.unwrap();
        let fetches = memory.fetch_count();
        manager.find_devices(&model, &[temp()]).await.unwrap();
        assert_eq!(memory.fetch_count(), fetches + 2);
        assert_eq!(manager.mode().await, NotifyMode::Rederive);
    }

    #[tokio::test]
    async fn test_empty_model_learns_first_device() {
        let memory = Arc::new(MemoryModel::new());
        let model: Arc<dyn AssetModel> = memory.clone();
        let manager = IndexManager::new();

        assert!(manager.find_devices(&model, &[temp()]).await.unwrap().is_empty());
        assert_eq!(manager.mode().await, NotifyMode::Unknown);

        memory.add_device("d1", "Boiler", None, vec![temp()]).unwrap();
        let devices = manager.find_devices(&model, &[temp()]).await.unwrap();
        assert_eq!(devices, vec!["d1".to_string()]);
        assert_eq!(manager.mode().await, NotifyMode::Push);

        memory.add_device("d2", "Tank", None, vec![temp()]).unwrap();
        let devices = manager.find_devices(&model, &[temp()]).await.unwrap();
        assert_eq!(devices, vec!["d1".to_string(), "d2".to_string()]);
        assert_eq!(memory.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_empty_model_without_notifications() {
        let memory = Arc::new(MemoryModel::without_notifications());
        let model: Arc<dyn AssetModel> = memory.clone();
        let manager = IndexManager::new();

        assert!(manager.find_devices(&model, &[temp()]).await.unwrap().is_empty());

        memory.add_device("d1", "Boiler", None, vec![temp()]).unwrap();
        let devices = manager.find_devices(&model, &[temp()]).await.unwrap();
        assert_eq!(devices, vec!["d1".to_string()]);
        assert_eq!(manager.mode().await, NotifyMode::Rederive);
        assert_eq!(memory.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_untagged_nodes_gaining_tags() {
        let memory = Arc::new(MemoryModel::new());
        memory.add_device("d0", "Pump", None, vec![]).unwrap();
        memory.add_device("d1", "Boiler", None, vec![temp()]).unwrap();
        memory.add_device("c0", "Valve", Some("d0"), vec![]).unwrap();
        memory
            .add_variable("c0", "v", Value::Float(1.0), vec![])
            .unwrap();
        let model: Arc<dyn AssetModel> = memory.clone();
        let manager = IndexManager::new();

        assert_eq!(manager.find_devices(&model, &[temp()]).await.unwrap(), vec!["d1".to_string()]);
        assert_eq!(manager.mode().await, NotifyMode::Push);

        memory.set_device_tags("d0", vec![temp()]).unwrap();
        let devices = manager.find_devices(&model, &[temp()]).await.unwrap();
        assert_eq!(devices, vec!["d0".to_string(), "d1".to_string()]);

        memory.set_device_tags("c0", vec![temp()]).unwrap();
        memory.set_variable_tags("c0", "v", vec![temp()]).unwrap();
        let devices = manager.find_devices(&model, &[temp()]).await.unwrap();
        assert_eq!(devices, vec!["c0".to_string(), "d0".to_string(), "d1".to_string()]);
        let vars = manager.find_variables(&model, &[temp()]).await.unwrap();
        assert_eq!(vars, vec![VariableRef::new("c0", "v")]);
        assert_eq!(memory.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_untagged_added_node_not_cached() {
        let memory = create_test_model(true);
        let model: Arc<dyn AssetModel> = memory.clone();
        let manager = IndexManager::new();

        manager.find_devices(&model, &[temp()]).await.unwrap();
        let cached = manager.stats().await.cached_nodes;

        memory.add_device("d9", "Spare", None, vec![]).unwrap();
        memory
            .add_variable("d9", "x", Value::Int(0), vec![Tag::new("usage", "Spare")])
            .unwrap();
        assert_eq!(manager.find_devices(&model, &[temp()]).await.unwrap().len(), 1);
        assert_eq!(manager.stats().await.cached_nodes, cached);

        // Still watched: a later tag change on the new root is seen
        memory.set_device_tags("d9", vec![temp()]).unwrap();
        let devices = manager.find_devices(&model, &[temp()]).await.unwrap();
        assert_eq!(devices, vec!["d1".to_string(), "d9".to_string()]);
    }

    #[tokio::test]
    async fn test_renegotiates_after_last_root_removed() {
        let memory = Arc::new(MemoryModel::new());
        memory.add_device("d1", "Boiler", None, vec![temp()]).unwrap();
        let model: Arc<dyn AssetModel> = memory.clone();
        let manager = IndexManager::new();

        assert_eq!(manager.find_devices(&model, &[temp()]).await.unwrap().len(), 1);
        memory.remove_device("d1").unwrap();
        assert!(manager.find_devices(&model, &[temp()]).await.unwrap().is_empty());
        assert_eq!(manager.mode().await, NotifyMode::Unknown);

        memory.add_device("d5", "Tank", None, vec![temp()]).unwrap();
        let devices = manager.find_devices(&model, &[temp()]).await.unwrap();
        assert_eq!(devices, vec!["d5".to_string()]);
        assert_eq!(manager.mode().await, NotifyMode::Push);
        assert_eq!(memory.outstanding(), 0);
    }

}
