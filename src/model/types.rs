//! Asset model entities
//!
//! Devices form a forest (each device has at most one parent) and carry
//! variables. Both can be labelled with tags.

use serde::{Deserialize, Serialize};

use crate::storage::{Value, ValueType};

/// Identifier of a device or variable inside the adapter
pub type NodeId = String;

/// A `(namespace, instance)` label, e.g. `("usage", "Temperature")`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub namespace: String,
    pub instance: String,
}

impl Tag {
    pub fn new(namespace: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            instance: instance.into(),
        }
    }

    /// Parse `namespace:instance`
    pub fn parse(s: &str) -> Option<Self> {
        let (namespace, instance) = s.split_once(':')?;
        let (namespace, instance) = (namespace.trim(), instance.trim());
        if namespace.is_empty() || instance.is_empty() {
            return None;
        }
        Some(Self::new(namespace, instance))
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.instance)
    }
}

/// Device payload as returned by the adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: NodeId,
    pub name: String,
    pub parent_id: Option<NodeId>,
    pub tags: Vec<Tag>,
    pub variables: Vec<Variable>,
    pub children: Vec<Device>,
}

impl Device {
    pub fn has_any_tag(&self, tags: &[Tag]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

/// Variable payload as returned by the adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: NodeId,
    pub device_id: NodeId,
    pub name: String,
    pub unit: Option<String>,
    pub value_type: ValueType,
    pub value: Value,
    pub tags: Vec<Tag>,
}

impl Variable {
    pub fn reference(&self) -> VariableRef {
        VariableRef::new(&self.device_id, &self.id)
    }

    pub fn has_any_tag(&self, tags: &[Tag]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

/// A variable addressed by its owning device
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariableRef {
    pub device_id: NodeId,
    pub variable_id: NodeId,
}

impl VariableRef {
    pub fn new(device_id: impl Into<String>, variable_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            variable_id: variable_id.into(),
        }
    }

    /// Name of the series holding this variable's samples
    pub fn series_id(&self) -> String {
        format!("{}/{}", self.device_id, self.variable_id)
    }
}

impl std::fmt::Display for VariableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.device_id, self.variable_id)
    }
}

/// Identity of any node in the asset model
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRef {
    Device(NodeId),
    Variable(VariableRef),
}

impl NodeRef {
    pub fn device(id: impl Into<String>) -> Self {
        NodeRef::Device(id.into())
    }

    pub fn variable(device_id: impl Into<String>, variable_id: impl Into<String>) -> Self {
        NodeRef::Variable(VariableRef::new(device_id, variable_id))
    }

    /// Owning device id (the device itself for a device node)
    pub fn device_id(&self) -> &str {
        match self {
            NodeRef::Device(id) => id,
            NodeRef::Variable(v) => &v.device_id,
        }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRef::Device(id) => write!(f, "device {}", id),
            NodeRef::Variable(v) => write!(f, "variable {}", v),
        }
    }
}

/// Handle of one adapter-side query session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_parse() {
        assert_eq!(
            Tag::parse("usage:Temperature"),
            Some(Tag::new("usage", "Temperature"))
        );
        assert_eq!(Tag::parse("usage"), None);
        assert_eq!(Tag::parse(":x"), None);
        assert_eq!(Tag::parse(" :x"), None);
        assert_eq!(Tag::parse("usage:  "), None);
        assert_eq!(Tag::parse(" usage : Flow "), Some(Tag::new("usage", "Flow")));
        assert_eq!(Tag::new("a", "b").to_string(), "a:b");
    }

    #[test]
    fn test_series_id() {
        let v = VariableRef::new("boiler", "temp");
        assert_eq!(v.series_id(), "boiler/temp");
        assert_eq!(NodeRef::Variable(v).device_id(), "boiler");
    }
}
