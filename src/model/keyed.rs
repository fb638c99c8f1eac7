//! [`Keyed`] implementations wiring each entity into the store's label-indexed queries.

use std::collections::BTreeMap;

use crate::store::Keyed;

use super::{
    ApprovalRequest, Binding, MemberCluster, Placement, PolicySnapshot, ResourceSnapshot,
    UpdateRun,
};

pub const LABEL_PLACEMENT_TRACKING: &str = "placementTracking";
pub const LABEL_IS_LATEST_SNAPSHOT: &str = "isLatestSnapshot";
pub const LABEL_POLICY_INDEX: &str = "policyIndex";
pub const LABEL_RESOURCE_INDEX: &str = "resourceIndex";
pub const LABEL_TARGET_UPDATE_RUN: &str = "targetUpdateRun";
pub const LABEL_TARGET_UPDATING_STAGE_NAME: &str = "targetUpdatingStageName";
pub const LABEL_IS_LATEST_UPDATE_RUN_APPROVAL: &str = "isLatestUpdateRunApproval";

impl Keyed for Placement {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

impl Keyed for MemberCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.labels.clone()
    }
}

impl Keyed for PolicySnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_PLACEMENT_TRACKING.to_string(), self.placement_name.clone()),
            (LABEL_IS_LATEST_SNAPSHOT.to_string(), self.is_latest.to_string()),
            (LABEL_POLICY_INDEX.to_string(), self.policy_index.to_string()),
        ])
    }
}

impl Keyed for ResourceSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_PLACEMENT_TRACKING.to_string(), self.placement_name.clone()),
            (LABEL_IS_LATEST_SNAPSHOT.to_string(), self.is_latest.to_string()),
            (LABEL_RESOURCE_INDEX.to_string(), self.resource_index.to_string()),
        ])
    }
}

impl Keyed for Binding {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            LABEL_PLACEMENT_TRACKING.to_string(),
            self.placement_name.clone(),
        )])
    }
}

impl Keyed for UpdateRun {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            LABEL_PLACEMENT_TRACKING.to_string(),
            self.placement_name.clone(),
        )])
    }
}

impl Keyed for ApprovalRequest {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_TARGET_UPDATE_RUN.to_string(), self.update_run_name.clone()),
            (
                LABEL_TARGET_UPDATING_STAGE_NAME.to_string(),
                self.stage_name.clone(),
            ),
            (
                LABEL_IS_LATEST_UPDATE_RUN_APPROVAL.to_string(),
                self.is_latest.to_string(),
            ),
        ])
    }
}
