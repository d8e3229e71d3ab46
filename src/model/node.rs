//! Ownership of adapter-returned structures
//!
//! Everything an adapter hands back belongs to the caller, who gives it back
//! exactly once through [`AssetModel::release`]. [`Owned`] does that on drop.

use std::ops::Deref;
use std::sync::Arc;

use crate::model::types::{Device, NodeId, Tag, Variable};
use crate::model::AssetModel;
use crate::storage::{Value, ValueType};

/// Kind tag of a returned structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Device,
    DeviceList,
    Variable,
    VariableList,
    TagList,
    IdList,
    Id,
    Type,
    Value,
}

/// A structure returned by an adapter, tagged with its kind
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Device(Device),
    Devices(Vec<Device>),
    Variable(Variable),
    Variables(Vec<Variable>),
    Tags(Vec<Tag>),
    Ids(Vec<NodeId>),
    Id(Option<NodeId>),
    Type(ValueType),
    Value(Value),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Device(_) => NodeKind::Device,
            Node::Devices(_) => NodeKind::DeviceList,
            Node::Variable(_) => NodeKind::Variable,
            Node::Variables(_) => NodeKind::VariableList,
            Node::Tags(_) => NodeKind::TagList,
            Node::Ids(_) => NodeKind::IdList,
            Node::Id(_) => NodeKind::Id,
            Node::Type(_) => NodeKind::Type,
            Node::Value(_) => NodeKind::Value,
        }
    }

    /// Number of nodes a release reaches.
    ///
    /// Recursive counts the whole graph below this node; otherwise only the
    /// head (nothing for an empty list or a missing id).
    pub fn node_count(&self, recursive: bool) -> usize {
        fn list<T>(items: &[T], recursive: bool, each: impl Fn(&T) -> usize) -> usize {
            match (items.is_empty(), recursive) {
                (true, _) => 0,
                (false, false) => 1,
                (false, true) => items.iter().map(each).sum(),
            }
        }

        match self {
            Node::Device(d) => device_count(d, recursive),
            Node::Devices(ds) => list(ds, recursive, |d| device_count(d, true)),
            Node::Variable(_) | Node::Type(_) | Node::Value(_) => 1,
            Node::Variables(vs) => list(vs, recursive, |_| 1),
            Node::Tags(ts) => list(ts, recursive, |_| 1),
            Node::Ids(ids) => list(ids, recursive, |_| 1),
            Node::Id(id) => usize::from(id.is_some()),
        }
    }
}

fn device_count(device: &Device, recursive: bool) -> usize {
    if !recursive {
        return 1;
    }
    1 + device.variables.len()
        + device
            .children
            .iter()
            .map(|c| device_count(c, true))
            .sum::<usize>()
}

macro_rules! into_node {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Node {
            fn from(value: $ty) -> Self {
                Node::$variant(value)
            }
        })*
    };
}

into_node! {
    Device => Device,
    Vec<Device> => Devices,
    Variable => Variable,
    Vec<Variable> => Variables,
    Vec<Tag> => Tags,
    Vec<NodeId> => Ids,
    Option<NodeId> => Id,
    ValueType => Type,
    Value => Value,
}

/// An adapter-returned value released exactly once when dropped
pub struct Owned<T: Into<Node>> {
    value: Option<T>,
    model: Arc<dyn AssetModel>,
}

impl<T: Into<Node>> Owned<T> {
    pub fn new(value: T, model: Arc<dyn AssetModel>) -> Self {
        Self {
            value: Some(value),
            model,
        }
    }

    /// Copy the payload out; the original is still released on drop
    pub fn to_inner(&self) -> T
    where
        T: Clone,
    {
        (**self).clone()
    }
}

impl<T: Into<Node>> Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("owned node accessed after release"),
        }
    }
}

impl<T: Into<Node>> Drop for Owned<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.model.release(value.into(), true);
        }
    }
}

impl<T: Into<Node> + std::fmt::Debug> std::fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Owned").field(&self.value).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, children: Vec<Device>) -> Device {
        Device {
            id: id.into(),
            children,
            ..Default::default()
        }
    }

    #[test]
    fn test_node_count() {
        let tree = device("root", vec![device("a", vec![device("b", vec![])])]);
        let node = Node::from(tree);
        assert_eq!(node.kind(), NodeKind::Device);
        assert_eq!(node.node_count(true), 3);
        assert_eq!(node.node_count(false), 1);

        let ids = Node::from(vec!["x".to_string(), "y".to_string()]);
        assert_eq!(ids.node_count(true), 2);
        assert_eq!(ids.node_count(false), 1);
        assert_eq!(Node::Ids(Vec::new()).node_count(true), 0);
        assert_eq!(Node::Id(None).node_count(true), 0);
        assert_eq!(Node::from(ValueType::Float).node_count(false), 1);
    }
}
