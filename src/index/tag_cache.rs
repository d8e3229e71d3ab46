//! Tag Index Cache - Inverted index from tag to asset nodes
//!
//! Maps `namespace:instance` → set of devices and variables carrying it.
//! Only identifiers are kept; payloads stay with the adapter.
//!
//! # Example
//! ```ignore
//! cache.load(&[temperature], nodes);
//! let hits = cache.lookup(&[temperature]);
//! // hits = {Device("boiler"), Variable("boiler/temp")}
//! ```
//!
//! # Design Notes
//! - A tag is either fully loaded or absent; a lookup on an absent tag is a miss
//! - Invalidation only touches the cache, never the adapter
//! - Stale nodes are re-fetched by the caller before the next lookup

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::model::{ChangeEvent, ChangeKind, NodeRef, Tag};

/// Inverted index for tag-based lookups
#[derive(Debug, Default)]
pub struct TagIndexCache {
    /// tag → nodes carrying it
    index: HashMap<Tag, BTreeSet<NodeRef>>,
    /// node → its tags, for invalidation
    nodes: HashMap<NodeRef, Vec<Tag>>,
    /// Tags whose node sets are complete
    loaded: HashSet<Tag>,
    /// Nodes invalidated since they were loaded
    stale: BTreeSet<NodeRef>,
}

impl TagIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested tags that have not been loaded
    pub fn missing(&self, tags: &[Tag]) -> Vec<Tag> {
        let mut missing: Vec<Tag> = tags
            .iter()
            .filter(|t| !self.loaded.contains(*t))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Record the complete node set for `tags`
    pub fn load(&mut self, tags: &[Tag], nodes: Vec<(NodeRef, Vec<Tag>)>) {
        for (node, node_tags) in nodes {
            self.insert_node(node, node_tags);
        }
        self.loaded.extend(tags.iter().cloned());
    }

    /// Index `node` under exactly `tags`, replacing what was known about it
    pub fn insert_node(&mut self, node: NodeRef, tags: Vec<Tag>) {
        self.remove_node(&node);
        for tag in &tags {
            self.index.entry(tag.clone()).or_default().insert(node.clone());
        }
        self.stale.remove(&node);
        self.nodes.insert(node, tags);
    }

    /// Drop every trace of `node`
    pub fn remove_node(&mut self, node: &NodeRef) {
        self.stale.remove(node);
        let Some(tags) = self.nodes.remove(node) else {
            return;
        };
        for tag in tags {
            if let Some(set) = self.index.get_mut(&tag) {
                set.remove(node);
                if set.is_empty() && !self.loaded.contains(&tag) {
                    self.index.remove(&tag);
                }
            }
        }
    }

    /// Apply one change notification.
    ///
    /// Removals take effect at once (a removed device takes its variables
    /// along). Additions and tag changes mark the node stale.
    pub fn invalidate(&mut self, event: &ChangeEvent) {
        match (event.kind, &event.node) {
            (ChangeKind::Removed, NodeRef::Device(device_id)) => {
                let doomed: Vec<NodeRef> = self
                    .nodes
                    .keys()
                    .chain(self.stale.iter())
                    .filter(|n| n.device_id() == device_id.as_str())
                    .cloned()
                    .collect();
                for node in doomed {
                    self.remove_node(&node);
                }
            }
            (ChangeKind::Removed, node) => self.remove_node(node),
            (ChangeKind::Added | ChangeKind::TagsChanged, node) => {
                self.stale.insert(node.clone());
            }
        }
    }

    /// Forget `tags` so the next lookup loads them again
    pub fn forget(&mut self, tags: &[Tag]) {
        for tag in tags {
            self.loaded.remove(tag);
            let Some(members) = self.index.remove(tag) else {
                continue;
            };
            for node in members {
                if let Some(node_tags) = self.nodes.get_mut(&node) {
                    node_tags.retain(|t| t != tag);
                    if node_tags.is_empty() {
                        self.nodes.remove(&node);
                    }
                }
            }
        }
    }

    /// Whether any of `tags` is loaded
    pub fn covers(&self, tags: &[Tag]) -> bool {
        tags.iter().any(|t| self.loaded.contains(t))
    }

    pub fn stale_nodes(&self) -> Vec<NodeRef> {
        self.stale.iter().cloned().collect()
    }

    /// Nodes carrying at least one of `tags`
    pub fn lookup(&self, tags: &[Tag]) -> BTreeSet<NodeRef> {
        tags.iter()
            .filter_map(|t| self.index.get(t))
            .flat_map(|set| set.iter().cloned())
            .collect()
    }

    pub fn tag_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.loaded.clear();
        self.stale.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp() -> Tag {
        Tag::new("usage", "Temperature")
    }

    fn pressure() -> Tag {
        Tag::new("usage", "Pressure")
    }

    fn loaded_cache() -> TagIndexCache {
        let mut cache = TagIndexCache::new();
        cache.load(
            &[temp()],
            vec![
                (NodeRef::device("d1"), vec![temp()]),
                (NodeRef::variable("d1", "t"), vec![temp(), pressure()]),
                (NodeRef::variable("d2", "t"), vec![temp()]),
            ],
        );
        cache
    }

    #[test]
    fn test_load_and_lookup() {
        let cache = loaded_cache();
        assert_eq!(cache.missing(&[temp(), pressure(), pressure()]), vec![pressure()]);
        assert_eq!(cache.lookup(&[temp()]).len(), 3);
        assert_eq!(cache.tag_count(), 1);
        assert_eq!(cache.node_count(), 3);

        let empty = TagIndexCache::new();
        assert!(empty.lookup(&[temp()]).is_empty());
    }

    #[test]
    fn test_device_removal_drops_variables() {
        let mut cache = loaded_cache();
        cache.invalidate(&ChangeEvent::new(NodeRef::device("d1"), ChangeKind::Removed));

        let hits = cache.lookup(&[temp()]);
        assert_eq!(hits.len(), 1);
        assert!(hits.contains(&NodeRef::variable("d2", "t")));
        assert!(cache.missing(&[temp()]).is_empty());
    }

    #[test]
    fn test_tag_change_marks_stale() {
        let mut cache = loaded_cache();
        let node = NodeRef::variable("d2", "t");
        cache.invalidate(&ChangeEvent::new(node.clone(), ChangeKind::TagsChanged));
        assert_eq!(cache.stale_nodes(), vec![node.clone()]);

        cache.insert_node(node.clone(), vec![pressure()]);
        assert!(cache.stale_nodes().is_empty());
        assert!(!cache.lookup(&[temp()]).contains(&node));
        assert!(cache.lookup(&[pressure()]).contains(&node));
    }

    #[test]
    fn test_forget() {
        let mut cache = loaded_cache();
        cache.forget(&[temp()]);
        assert_eq!(cache.missing(&[temp()]), vec![temp()]);
        assert!(cache.lookup(&[temp()]).is_empty());
        assert_eq!(cache.node_count(), 1);

        cache.clear();
        assert_eq!(cache.node_count(), 0);
    }

    #[test]
    fn test_covers() {
        let cache = loaded_cache();
        assert!(cache.covers(&[temp()]));
        assert!(cache.covers(&[pressure(), temp()]));
        assert!(!cache.covers(&[pressure()]));
        assert!(!cache.covers(&[]));
    }
}
