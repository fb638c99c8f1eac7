/// Immutable freeze of the selected hub-side resource set,
/// versioned by a monotonically increasing resource index. Multiple snapshots may share
/// an index when a group is too large for a single object; exactly one bears the
/// `resourceGroupHash` annotation (the master).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceSnapshot {
    pub name: String,
    pub placement_name: String,
    pub resource_index: u64,
    pub is_latest: bool,
    /// `Some` only on the master snapshot of a (possibly grouped) index.
    pub resource_group_hash: Option<String>,
    /// `subindexOfResourceSnapshot`: position within a grouped snapshot set.
    pub subindex: Option<u32>,
}

impl ResourceSnapshot {
    pub fn is_master(&self) -> bool {
        self.resource_group_hash.is_some()
    }
}
