//! Expected steady-state replication factor for a cluster.

/// Replication factor the deployment policy asks for.
pub const DESIRED_REPLICATION_FACTOR: usize = 3;

/// A cluster smaller than the desired factor cannot hold that many replicas,
/// so the achievable target is capped by cluster size.
pub fn target_replication_factor(node_count: usize) -> usize {
    capped_replication_factor(DESIRED_REPLICATION_FACTOR, node_count)
}

pub fn capped_replication_factor(desired: usize, node_count: usize) -> usize {
    desired.min(node_count)
}
