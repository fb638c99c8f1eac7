//! A small label-selector implementation modeled on `kvp::label::selector::LabelSelectorExt`:
//! selects [`crate::model::MemberCluster`]s by matching labels, independent of any live
//! store (the in-memory inventory and the fake store both use this).

use std::collections::BTreeMap;

use crate::model::MemberCluster;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SelectorRequirement {
    In { key: String, values: Vec<String> },
    NotIn { key: String, values: Vec<String> },
    Exists { key: String },
    DoesNotExist { key: String },
}

/// Mirrors Kubernetes' `LabelSelector`: an optional exact-match map plus a list of
/// requirement expressions, all of which must hold (logical AND).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
    pub match_expressions: Vec<SelectorRequirement>,
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_match = self
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v));
        if !labels_match {
            return false;
        }

        self.match_expressions.iter().all(|req| match req {
            SelectorRequirement::In { key, values } => {
                labels.get(key).is_some_and(|v| values.contains(v))
            }
            SelectorRequirement::NotIn { key, values } => {
                !labels.get(key).is_some_and(|v| values.contains(v))
            }
            SelectorRequirement::Exists { key } => labels.contains_key(key),
            SelectorRequirement::DoesNotExist { key } => !labels.contains_key(key),
        })
    }

    pub fn matches_cluster(&self, cluster: &MemberCluster) -> bool {
        self.matches(&cluster.labels)
    }

    pub fn everything() -> Self {
        Self::default()
    }
}
