//! In-memory asset model
//!
//! A complete [`AssetModel`] backed by a device map. Used by tests, benches and
//! the CLI demo. It counts the nodes it has handed out and not yet got back so
//! leaks show up as a non-zero [`MemoryModel::outstanding`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::model::events::{ChangeEvent, ChangeKind, ChangeSink};
use crate::model::node::Node;
use crate::model::types::{Device, NodeId, NodeRef, SessionId, Tag, Variable};
use crate::model::{AdapterError, AdapterResult, AssetModel};
use crate::storage::{Value, ValueType};

#[derive(Debug)]
struct VariableEntry {
    name: String,
    unit: Option<String>,
    value: Value,
    tags: Vec<Tag>,
}

#[derive(Debug)]
struct DeviceEntry {
    name: String,
    parent: Option<NodeId>,
    tags: Vec<Tag>,
    variables: BTreeMap<NodeId, VariableEntry>,
}

#[derive(Debug, Default)]
struct State {
    devices: BTreeMap<NodeId, DeviceEntry>,
    subscribers: Vec<(NodeRef, ChangeSink)>,
}

impl State {
    fn device(&self, id: &str) -> AdapterResult<&DeviceEntry> {
        self.devices
            .get(id)
            .ok_or_else(|| AdapterError::NotFound(format!("device {}", id)))
    }

    fn variable(&self, device_id: &str, variable_id: &str) -> AdapterResult<&VariableEntry> {
        self.device(device_id)?
            .variables
            .get(variable_id)
            .ok_or_else(|| AdapterError::NotFound(format!("variable {}/{}", device_id, variable_id)))
    }

    fn children_ids(&self, id: &str) -> Vec<NodeId> {
        self.devices
            .iter()
            .filter(|(_, d)| d.parent.as_deref() == Some(id))
            .map(|(child, _)| child.clone())
            .collect()
    }

    fn build_variable(&self, device_id: &str, variable_id: &str) -> AdapterResult<Variable> {
        let entry = self.variable(device_id, variable_id)?;
        Ok(Variable {
            id: variable_id.to_string(),
            device_id: device_id.to_string(),
            name: entry.name.clone(),
            unit: entry.unit.clone(),
            value_type: entry.value.value_type(),
            value: entry.value.clone(),
            tags: entry.tags.clone(),
        })
    }

    fn build_device(&self, id: &str) -> AdapterResult<Device> {
        let entry = self.device(id)?;
        let variables = entry
            .variables
            .keys()
            .map(|v| self.build_variable(id, v))
            .collect::<AdapterResult<Vec<_>>>()?;
        let children = self
            .children_ids(id)
            .iter()
            .map(|c| self.build_device(c))
            .collect::<AdapterResult<Vec<_>>>()?;

        Ok(Device {
            id: id.to_string(),
            name: entry.name.clone(),
            parent_id: entry.parent.clone(),
            tags: entry.tags.clone(),
            variables,
            children,
        })
    }

    /// Whether a registration on `subscriber` covers `node`
    fn covers(&self, subscriber: &NodeRef, node: &NodeRef) -> bool {
        let NodeRef::Device(root) = subscriber else {
            return subscriber == node;
        };
        let mut current = Some(node.device_id());
        while let Some(id) = current {
            if id == root.as_str() {
                return true;
            }
            current = self.devices.get(id).and_then(|d| d.parent.as_deref());
        }
        false
    }

    /// Deliver `event` once per subscribed channel
    fn emit(&mut self, event: ChangeEvent) {
        self.subscribers.retain(|(_, sink)| !sink.is_closed());

        let mut delivered: Vec<&ChangeSink> = Vec::new();
        for (node, sink) in &self.subscribers {
            let interested = event.kind == ChangeKind::Added || self.covers(node, &event.node);
            if interested && !delivered.iter().any(|s| s.same_channel(sink)) {
                sink.send(event.clone());
                delivered.push(sink);
            }
        }
    }
}

/// Reference adapter holding its asset graph in memory
#[derive(Debug)]
pub struct MemoryModel {
    state: RwLock<State>,
    notifications: bool,
    open: AtomicBool,
    sessions_available: AtomicBool,
    next_session: AtomicU64,
    active_sessions: AtomicUsize,
    outstanding: AtomicI64,
    fetches: AtomicU64,
}

impl Default for MemoryModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryModel {
    /// Empty model with change notification support
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            notifications: true,
            open: AtomicBool::new(false),
            sessions_available: AtomicBool::new(true),
            next_session: AtomicU64::new(1),
            active_sessions: AtomicUsize::new(0),
            outstanding: AtomicI64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    /// Empty model that rejects change notification registration
    pub fn without_notifications() -> Self {
        Self {
            notifications: false,
            ..Self::new()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Account for a structure leaving the model
    fn hand_out<T: Clone + Into<Node>>(&self, value: T) -> T {
        let node: Node = value.clone().into();
        let count = node.node_count(true);
        self.outstanding.fetch_add(count as i64, Ordering::SeqCst);
        value
    }

    pub fn add_device(
        &self,
        id: &str,
        name: &str,
        parent: Option<&str>,
        tags: Vec<Tag>,
    ) -> AdapterResult<()> {
        let mut state = self.write();
        if state.devices.contains_key(id) {
            return Err(AdapterError::Backend(format!("device {} already exists", id)));
        }
        if let Some(parent) = parent {
            state.device(parent)?;
        }
        state.devices.insert(
            id.to_string(),
            DeviceEntry {
                name: name.to_string(),
                parent: parent.map(str::to_string),
                tags,
                variables: BTreeMap::new(),
            },
        );
        state.emit(ChangeEvent::new(NodeRef::device(id), ChangeKind::Added));
        Ok(())
    }

    /// Attach a variable; its type is the type of `value`
    pub fn add_variable(
        &self,
        device_id: &str,
        variable_id: &str,
        value: Value,
        tags: Vec<Tag>,
    ) -> AdapterResult<()> {
        let mut state = self.write();
        let device = state
            .devices
            .get_mut(device_id)
            .ok_or_else(|| AdapterError::NotFound(format!("device {}", device_id)))?;
        if device.variables.contains_key(variable_id) {
            return Err(AdapterError::Backend(format!(
                "variable {}/{} already exists",
                device_id, variable_id
            )));
        }
        device.variables.insert(
            variable_id.to_string(),
            VariableEntry {
                name: variable_id.to_string(),
                unit: None,
                value,
                tags,
            },
        );
        state.emit(ChangeEvent::new(
            NodeRef::variable(device_id, variable_id),
            ChangeKind::Added,
        ));
        Ok(())
    }

    pub fn set_variable_unit(&self, device_id: &str, variable_id: &str, unit: &str) -> AdapterResult<()> {
        let mut state = self.write();
        let entry = state
            .devices
            .get_mut(device_id)
            .and_then(|d| d.variables.get_mut(variable_id))
            .ok_or_else(|| AdapterError::NotFound(format!("variable {}/{}", device_id, variable_id)))?;
        entry.unit = Some(unit.to_string());
        Ok(())
    }

    /// Remove a device together with its variables and child devices
    pub fn remove_device(&self, id: &str) -> AdapterResult<()> {
        let mut state = self.write();
        state.device(id)?;

        let mut pending = vec![id.to_string()];
        let mut subtree = Vec::new();
        while let Some(next) = pending.pop() {
            pending.extend(state.children_ids(&next));
            subtree.push(next);
        }

        // Emit while the subtree is still linked so ancestor registrations see it
        for device_id in &subtree {
            let variables: Vec<NodeId> = state
                .devices
                .get(device_id)
                .map(|d| d.variables.keys().cloned().collect())
                .unwrap_or_default();
            for variable_id in variables {
                state.emit(ChangeEvent::new(
                    NodeRef::variable(device_id, variable_id),
                    ChangeKind::Removed,
                ));
            }
            state.emit(ChangeEvent::new(NodeRef::device(device_id), ChangeKind::Removed));
        }
        for device_id in &subtree {
            state.devices.remove(device_id);
        }
        Ok(())
    }

    pub fn remove_variable(&self, device_id: &str, variable_id: &str) -> AdapterResult<()> {
        let mut state = self.write();
        state
            .devices
            .get_mut(device_id)
            .and_then(|d| d.variables.remove(variable_id))
            .ok_or_else(|| AdapterError::NotFound(format!("variable {}/{}", device_id, variable_id)))?;
        state.emit(ChangeEvent::new(
            NodeRef::variable(device_id, variable_id),
            ChangeKind::Removed,
        ));
        Ok(())
    }

    pub fn set_device_tags(&self, id: &str, tags: Vec<Tag>) -> AdapterResult<()> {
        let mut state = self.write();
        let device = state
            .devices
            .get_mut(id)
            .ok_or_else(|| AdapterError::NotFound(format!("device {}", id)))?;
        device.tags = tags;
        state.emit(ChangeEvent::new(NodeRef::device(id), ChangeKind::TagsChanged));
        Ok(())
    }

    pub fn set_variable_tags(
        &self,
        device_id: &str,
        variable_id: &str,
        tags: Vec<Tag>,
    ) -> AdapterResult<()> {
        let mut state = self.write();
        let entry = state
            .devices
            .get_mut(device_id)
            .and_then(|d| d.variables.get_mut(variable_id))
            .ok_or_else(|| AdapterError::NotFound(format!("variable {}/{}", device_id, variable_id)))?;
        entry.tags = tags;
        state.emit(ChangeEvent::new(
            NodeRef::variable(device_id, variable_id),
            ChangeKind::TagsChanged,
        ));
        Ok(())
    }

    /// Make `open_session` fail while false
    pub fn set_sessions_available(&self, available: bool) {
        self.sessions_available.store(available, Ordering::SeqCst);
    }

    /// Nodes handed out and not yet released
    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Number of read calls served so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AssetModel for MemoryModel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self) -> AdapterResult<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> AdapterResult<()> {
        self.open.store(false, Ordering::SeqCst);
        self.write().subscribers.clear();
        Ok(())
    }

    async fn device(&self, device_id: &str) -> AdapterResult<Device> {
        let device = self.read().build_device(device_id)?;
        Ok(self.hand_out(device))
    }

    async fn device_variable_ids(&self, device_id: &str) -> AdapterResult<Vec<NodeId>> {
        let ids: Vec<NodeId> = self.read().device(device_id)?.variables.keys().cloned().collect();
        Ok(self.hand_out(ids))
    }

    async fn device_tags(&self, device_id: &str) -> AdapterResult<Vec<Tag>> {
        let tags = self.read().device(device_id)?.tags.clone();
        Ok(self.hand_out(tags))
    }

    async fn device_parent_id(&self, device_id: &str) -> AdapterResult<Option<NodeId>> {
        let parent = self.read().device(device_id)?.parent.clone();
        Ok(self.hand_out(parent))
    }

    async fn device_children_ids(&self, device_id: &str) -> AdapterResult<Vec<NodeId>> {
        let ids = {
            let state = self.read();
            state.device(device_id)?;
            state.children_ids(device_id)
        };
        Ok(self.hand_out(ids))
    }

    async fn root_device_ids(&self) -> AdapterResult<Vec<NodeId>> {
        let ids: Vec<NodeId> = self
            .read()
            .devices
            .iter()
            .filter(|(_, d)| d.parent.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        Ok(self.hand_out(ids))
    }

    async fn variable(&self, device_id: &str, variable_id: &str) -> AdapterResult<Variable> {
        let variable = self.read().build_variable(device_id, variable_id)?;
        Ok(self.hand_out(variable))
    }

    async fn variable_type(&self, device_id: &str, variable_id: &str) -> AdapterResult<ValueType> {
        let value_type = self.read().variable(device_id, variable_id)?.value.value_type();
        Ok(self.hand_out(value_type))
    }

    async fn variable_value(&self, device_id: &str, variable_id: &str) -> AdapterResult<Value> {
        let value = self.read().variable(device_id, variable_id)?.value.clone();
        Ok(self.hand_out(value))
    }

    async fn variable_tags(&self, device_id: &str, variable_id: &str) -> AdapterResult<Vec<Tag>> {
        let tags = self.read().variable(device_id, variable_id)?.tags.clone();
        Ok(self.hand_out(tags))
    }

    async fn devices_by_tags(&self, tags: &[Tag]) -> AdapterResult<Vec<Device>> {
        let devices = {
            let state = self.read();
            state
                .devices
                .iter()
                .filter(|(_, d)| d.tags.iter().any(|t| tags.contains(t)))
                .map(|(id, _)| state.build_device(id))
                .collect::<AdapterResult<Vec<_>>>()?
        };
        Ok(self.hand_out(devices))
    }

    async fn variables_by_tags(&self, tags: &[Tag]) -> AdapterResult<Vec<Variable>> {
        let variables = {
            let state = self.read();
            let mut found = Vec::new();
            for (device_id, device) in &state.devices {
                for (variable_id, entry) in &device.variables {
                    if entry.tags.iter().any(|t| tags.contains(t)) {
                        found.push(state.build_variable(device_id, variable_id)?);
                    }
                }
            }
            found
        };
        Ok(self.hand_out(variables))
    }

    async fn set_variable(
        &self,
        device_id: &str,
        variable_id: &str,
        value: Value,
    ) -> AdapterResult<()> {
        let mut state = self.write();
        let entry = state
            .devices
            .get_mut(device_id)
            .and_then(|d| d.variables.get_mut(variable_id))
            .ok_or_else(|| AdapterError::NotFound(format!("variable {}/{}", device_id, variable_id)))?;
        if entry.value.value_type() != value.value_type() {
            return Err(AdapterError::Backend(format!(
                "variable {}/{} holds {}, got {}",
                device_id,
                variable_id,
                entry.value.value_type(),
                value.value_type()
            )));
        }
        entry.value = value;
        Ok(())
    }

    fn release(&self, node: Node, recursive: bool) {
        let count = node.node_count(recursive);
        self.outstanding.fetch_sub(count as i64, Ordering::SeqCst);
    }

    async fn open_session(&self) -> AdapterResult<SessionId> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable("model is not open".to_string()));
        }
        if !self.sessions_available.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable("no session available".to_string()));
        }
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(SessionId(self.next_session.fetch_add(1, Ordering::SeqCst)))
    }

    async fn close_session(&self, _session: SessionId) -> AdapterResult<()> {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }

    async fn notify_on_change(
        &self,
        device_id: &str,
        variable_id: Option<&str>,
        sink: ChangeSink,
    ) -> AdapterResult<()> {
        if !self.notifications {
            return Err(AdapterError::Unsupported("change notification".to_string()));
        }
        let mut state = self.write();
        let node = match variable_id {
            Some(v) => {
                state.variable(device_id, v)?;
                NodeRef::variable(device_id, v)
            }
            None => {
                state.device(device_id)?;
                NodeRef::device(device_id)
            }
        };
        let already = state
            .subscribers
            .iter()
            .any(|(n, s)| *n == node && s.same_channel(&sink));
        if !already {
            state.subscribers.push((node, sink));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::events::change_channel;

    fn temperature() -> Tag {
        Tag::new("usage", "Temperature")
    }

    fn sample_model() -> MemoryModel {
        let model = MemoryModel::new();
        model.add_device("plant", "Plant", None, vec![]).unwrap();
        model
            .add_device("boiler", "Boiler", Some("plant"), vec![temperature()])
            .unwrap();
        model
            .add_variable("boiler", "temp", Value::Float(21.5), vec![temperature()])
            .unwrap();
        model
            .add_variable("boiler", "on", Value::Bool(true), vec![])
            .unwrap();
        model
    }

    #[tokio::test]
    async fn test_device_graph() {
        let model = sample_model();
        let plant = model.device("plant").await.unwrap();
        assert_eq!(plant.children.len(), 1);
        assert_eq!(plant.children[0].variables.len(), 2);
        assert_eq!(model.outstanding(), 4);
        model.release(Node::from(plant), true);
        assert_eq!(model.outstanding(), 0);

        let parent = model.device_parent_id("boiler").await.unwrap();
        assert_eq!(parent.as_deref(), Some("plant"));
        model.release(Node::from(parent), true);

        let kids = model.device_children_ids("plant").await.unwrap();
        assert_eq!(kids, vec!["boiler".to_string()]);
        model.release(Node::from(kids), true);
        assert_eq!(model.outstanding(), 0);

        let err = model.device("nope").await.unwrap_err();
        assert!(matches!(err, AdapterError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_lookup_by_tags() {
        let model = sample_model();
        let devices = model.devices_by_tags(&[temperature()]).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "boiler");

        let variables = model.variables_by_tags(&[temperature()]).await.unwrap();
        assert_eq!(variables.len(), 1);
        assert_eq!(variables[0].reference().series_id(), "boiler/temp");

        let none = model.devices_by_tags(&[Tag::new("usage", "Pressure")]).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_set_variable_checks_type() {
        let model = sample_model();
        model
            .set_variable("boiler", "temp", Value::Float(30.0))
            .await
            .unwrap();
        assert_eq!(
            model.variable_value("boiler", "temp").await.unwrap(),
            Value::Float(30.0)
        );
        assert!(model
            .set_variable("boiler", "temp", Value::Bool(false))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_sessions() {
        let model = sample_model();
        assert!(model.open_session().await.is_err());

        model.open().await.unwrap();
        let session = model.open_session().await.unwrap();
        assert_eq!(model.active_sessions(), 1);
        model.close_session(session).await.unwrap();
        assert_eq!(model.active_sessions(), 0);

        model.set_sessions_available(false);
        assert!(matches!(
            model.open_session().await,
            Err(AdapterError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_change_notification() {
        let model = sample_model();
        let (sink, mut rx) = change_channel();
        model
            .notify_on_change("boiler", None, sink.clone())
            .await
            .unwrap();
        model
            .notify_on_change("boiler", Some("temp"), sink)
            .await
            .unwrap();

        model.set_variable_tags("boiler", "temp", vec![]).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.node, NodeRef::variable("boiler", "temp"));
        assert_eq!(event.kind, ChangeKind::TagsChanged);
        assert!(rx.try_recv().is_err());

        model.remove_device("plant").unwrap();
        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| (e.node, e.kind))
            .collect();
        assert!(kinds.contains(&(NodeRef::device("boiler"), ChangeKind::Removed)));
        assert!(kinds.contains(&(NodeRef::variable("boiler", "temp"), ChangeKind::Removed)));

        let plain = MemoryModel::without_notifications();
        plain.add_device("d", "D", None, vec![]).unwrap();
        let (sink, _rx) = change_channel();
        assert!(matches!(
            plain.notify_on_change("d", None, sink).await,
            Err(AdapterError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_root_registration_covers_subtree() {
        let model = sample_model();
        model.add_device("yard", "Yard", None, vec![]).unwrap();

        let roots = model.root_device_ids().await.unwrap();
        assert_eq!(roots, vec!["plant".to_string(), "yard".to_string()]);
        model.release(Node::from(roots), true);
        assert_eq!(model.outstanding(), 0);

        let (sink, mut rx) = change_channel();
        model.notify_on_change("plant", None, sink).await.unwrap();

        model.set_variable_tags("boiler", "on", vec![temperature()]).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.node, NodeRef::variable("boiler", "on"));
        assert_eq!(event.kind, ChangeKind::TagsChanged);

        model.set_device_tags("yard", vec![temperature()]).unwrap();
        assert!(rx.try_recv().is_err());

        model.add_device("shed", "Shed", Some("yard"), vec![]).unwrap();
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Added);

        model.remove_device("plant").unwrap();
        let removed: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| e.kind == ChangeKind::Removed)
            .map(|e| e.node)
            .collect();
        assert!(removed.contains(&NodeRef::device("plant")));
        assert!(removed.contains(&NodeRef::device("boiler")));
        assert!(removed.contains(&NodeRef::variable("boiler", "on")));
    }

}
