// Canonical node observations and their per-partition aggregation

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Partition a node is attributed to when it reports none
pub const NO_PARTITION: &str = "(none)";

/// Feature token marking a node with local scratch storage
pub const SCRATCH_FEATURE: &str = "scratch-node";

/// State token used when a node reports no usable state
pub const UNKNOWN_STATE: &str = "UNKNOWN";

/// One node as reported by the node-status command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeInfo {
    pub partitions: Vec<String>,
    pub state: String,
    pub features: BTreeSet<String>,
}

impl NodeInfo {
    pub fn has_scratch(&self) -> bool {
        self.features.contains(SCRATCH_FEATURE)
    }

    /// Partitions with duplicates removed; the placeholder when empty
    pub fn effective_partitions(&self) -> BTreeSet<&str> {
        let parts: BTreeSet<&str> = self.partitions.iter().map(String::as_str).collect();
        if parts.is_empty() {
            BTreeSet::from([NO_PARTITION])
        } else {
            parts
        }
    }
}

/// Node count and per-state counts for one group of nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateGroup {
    pub nodes: u64,
    pub states: BTreeMap<String, u64>,
}

impl StateGroup {
    fn add(&mut self, state: &str) {
        self.nodes += 1;
        *self.states.entry(state.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, state: &str) -> u64 {
        self.states.get(state).copied().unwrap_or(0)
    }
}

/// Nodes of one partition split by scratch capability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionState {
    pub scratch: StateGroup,
    pub no_scratch: StateGroup,
}

impl PartitionState {
    pub fn total_nodes(&self) -> u64 {
        self.scratch.nodes + self.no_scratch.nodes
    }
}

/// Partition name to scratch / no-scratch aggregates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NodeStateSnapshot {
    pub partitions: BTreeMap<String, PartitionState>,
}

impl NodeStateSnapshot {
    /// Count every node once per partition it belongs to
    pub fn from_nodes(nodes: &[NodeInfo]) -> Self {
        let mut partitions: BTreeMap<String, PartitionState> = BTreeMap::new();

        for node in nodes {
            let state = if node.state.is_empty() {
                UNKNOWN_STATE
            } else {
                node.state.as_str()
            };
            for partition in node.effective_partitions() {
                let entry = partitions.entry(partition.to_string()).or_default();
                let group = if node.has_scratch() {
                    &mut entry.scratch
                } else {
                    &mut entry.no_scratch
                };
                group.add(state);
            }
        }

        Self { partitions }
    }

    pub fn get(&self, partition: &str) -> Option<&PartitionState> {
        self.partitions.get(partition)
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(partitions: &[&str], state: &str, features: &[&str]) -> NodeInfo {
        NodeInfo {
            partitions: partitions.iter().map(|s| s.to_string()).collect(),
            state: state.to_string(),
            features: features.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_groups_by_scratch_feature() {
        let nodes = vec![
            node(&["compute"], "IDLE", &["scratch-node"]),
            node(&["compute"], "IDLE", &[]),
            node(&["compute"], "MIXED", &["gpu"]),
        ];
        let snapshot = NodeStateSnapshot::from_nodes(&nodes);
        let compute = snapshot.get("compute").unwrap();

        assert_eq!(compute.scratch.nodes, 1);
        assert_eq!(compute.scratch.count("IDLE"), 1);
        assert_eq!(compute.no_scratch.nodes, 2);
        assert_eq!(compute.no_scratch.count("IDLE"), 1);
        assert_eq!(compute.no_scratch.count("MIXED"), 1);
        assert_eq!(compute.total_nodes(), 3);
    }

    #[test]
    fn test_node_counted_in_each_partition() {
        let snapshot =
            NodeStateSnapshot::from_nodes(&[node(&["compute", "long", "compute"], "ALLOCATED", &[])]);
        assert_eq!(snapshot.partitions.len(), 2);
        assert_eq!(snapshot.get("compute").unwrap().no_scratch.nodes, 1);
        assert_eq!(snapshot.get("long").unwrap().no_scratch.nodes, 1);
    }

    #[test]
    fn test_node_without_partition_is_not_dropped() {
        let snapshot = NodeStateSnapshot::from_nodes(&[node(&[], "DOWN", &["scratch-node"])]);
        let none = snapshot.get(NO_PARTITION).unwrap();
        assert_eq!(none.scratch.nodes, 1);
        assert_eq!(none.scratch.count("DOWN"), 1);
    }

    #[test]
    fn test_empty_state_counts_as_unknown() {
        let snapshot = NodeStateSnapshot::from_nodes(&[node(&["compute"], "", &[])]);
        assert_eq!(snapshot.get("compute").unwrap().no_scratch.count(UNKNOWN_STATE), 1);
    }

    #[test]
    fn test_serializes_as_partition_map() {
        let snapshot = NodeStateSnapshot::from_nodes(&[node(&["compute"], "IDLE", &[])]);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["compute"]["no_scratch"]["nodes"], 1);
        assert_eq!(json["compute"]["no_scratch"]["states"]["IDLE"], 1);
        assert_eq!(json["compute"]["scratch"]["nodes"], 0);
    }
}
