//! The three scheduling pipelines: PickAll, PickFixed, and the two-phase filter/score
//! PickN. Each produces one [`ClusterPick`] per relevant cluster name, selected entries
//! first, so callers can cap the emitted decision array without re-sorting.

use std::collections::{HashMap, HashSet};

use crate::model::{
    toleration_matches, AffinityTerm, ClusterDecision, ClusterScore, EligibilityChecker,
    MemberCluster, PolicyAffinity, ScoredCluster, Toleration, TolerationMatch,
    TopologySpreadConstraint, WeightedAffinityTerm, WhenUnsatisfiable,
};

#[derive(Debug, Clone)]
pub struct ClusterPick {
    pub cluster_name: String,
    pub decision: ClusterDecision,
}

fn required_affinity_satisfied(cluster: &MemberCluster, required: &[AffinityTerm]) -> bool {
    required.iter().all(|term| term_matches(cluster, term))
}

fn term_matches(cluster: &MemberCluster, term: &AffinityTerm) -> bool {
    cluster
        .properties
        .get(&term.key)
        .or_else(|| cluster.labels.get(&term.key))
        .is_some_and(|v| term.values.is_empty() || term.values.contains(v))
}

fn preferred_affinity_score(cluster: &MemberCluster, preferred: &[WeightedAffinityTerm]) -> i32 {
    preferred
        .iter()
        .filter(|w| term_matches(cluster, &w.term))
        .map(|w| w.weight)
        .sum()
}

/// PickAll: every eligible cluster satisfying the required affinity terms is selected.
/// No scoring; the result has no unselected entries.
pub fn pick_all(
    clusters: &[MemberCluster],
    eligibility: &dyn EligibilityChecker,
    affinity: &PolicyAffinity,
) -> Vec<ClusterPick> {
    clusters
        .iter()
        .filter_map(|cluster| {
            let elig = eligibility.check(cluster);
            if !elig.eligible {
                return None;
            }
            if !required_affinity_satisfied(cluster, &affinity.required) {
                return None;
            }
            Some(ClusterPick {
                cluster_name: cluster.name.clone(),
                decision: ClusterDecision::selected(None, "succeeded"),
            })
        })
        .collect()
}

/// PickFixed: evaluates the requested cluster names in order, classifying each as a
/// valid target, an ineligible one, or not-found.
pub fn pick_fixed(
    requested_names: &[String],
    clusters: &[MemberCluster],
    eligibility: &dyn EligibilityChecker,
) -> Vec<ClusterPick> {
    let by_name: HashMap<&str, &MemberCluster> =
        clusters.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut selected = Vec::new();
    let mut unselected = Vec::new();
    for name in requested_names {
        match by_name.get(name.as_str()) {
            None => unselected.push(ClusterPick {
                cluster_name: name.clone(),
                decision: ClusterDecision::unselected("cluster not found"),
            }),
            Some(cluster) => {
                let elig = eligibility.check(cluster);
                if elig.eligible {
                    selected.push(ClusterPick {
                        cluster_name: name.clone(),
                        decision: ClusterDecision::selected(None, "succeeded"),
                    });
                } else {
                    unselected.push(ClusterPick {
                        cluster_name: name.clone(),
                        decision: ClusterDecision::unselected(elig.reason),
                    });
                }
            }
        }
    }
    selected.extend(unselected);
    selected
}

pub struct PickNInputs<'a> {
    pub desired_count: u32,
    pub affinity: &'a PolicyAffinity,
    pub topology_spread_constraints: &'a [TopologySpreadConstraint],
    pub tolerations: &'a [Toleration],
    /// Already-satisfied count toward `desired_count`: clusters with a non-Unscheduled
    /// binding for the latest policy snapshot don't need to be re-picked.
    pub already_satisfied: &'a HashSet<String>,
    /// Clusters backing any steady-state binding (scheduled/bound, any snapshot), used as
    /// the topology-spread baseline: new picks are scored to balance against this set
    /// rather than against a simulated pick-by-pick update.
    pub existing_steady_state: &'a [MemberCluster],
    pub batch_limit: Option<u32>,
}

fn topology_score(
    cluster: &MemberCluster,
    constraints: &[TopologySpreadConstraint],
    baseline: &[MemberCluster],
) -> Option<i32> {
    let mut score = 0;
    for constraint in constraints {
        let Some(value) = cluster.properties.get(&constraint.topology_key) else {
            continue;
        };
        let count = baseline
            .iter()
            .filter(|c| c.properties.get(&constraint.topology_key) == Some(value))
            .count() as i32;
        if constraint.when_unsatisfiable == WhenUnsatisfiable::DoNotSchedule
            && count >= constraint.max_skew as i32
        {
            return None;
        }
        score -= count;
    }
    Some(score)
}

/// PickN: filter by eligibility, required affinity and taint tolerations, then score the
/// survivors and take the top `desired_count - already_satisfied` by [`ClusterScore`]
/// ordering (topology spread, then affinity, then obsolete-placement affinity, ties broken
/// by reverse cluster name).
pub fn pick_n(clusters: &[MemberCluster], eligibility: &dyn EligibilityChecker, inputs: &PickNInputs) -> Vec<ClusterPick> {
    let mut selected = Vec::new();
    let mut unselected = Vec::new();

    let mut candidates = Vec::new();
    for cluster in clusters {
        if inputs.already_satisfied.contains(&cluster.name) {
            continue;
        }
        let elig = eligibility.check(cluster);
        if !elig.eligible {
            unselected.push(ClusterPick {
                cluster_name: cluster.name.clone(),
                decision: ClusterDecision::unselected(elig.reason),
            });
            continue;
        }
        if !required_affinity_satisfied(cluster, &inputs.affinity.required) {
            unselected.push(ClusterPick {
                cluster_name: cluster.name.clone(),
                decision: ClusterDecision::unselected("required affinity not satisfied"),
            });
            continue;
        }
        if toleration_matches(&cluster.taints, inputs.tolerations) == TolerationMatch::Untolerated
        {
            unselected.push(ClusterPick {
                cluster_name: cluster.name.clone(),
                decision: ClusterDecision::unselected("untolerated taint"),
            });
            continue;
        }
        let Some(topology_spread_score) =
            topology_score(cluster, inputs.topology_spread_constraints, inputs.existing_steady_state)
        else {
            unselected.push(ClusterPick {
                cluster_name: cluster.name.clone(),
                decision: ClusterDecision::unselected("topology spread constraint violated"),
            });
            continue;
        };
        let affinity_score = preferred_affinity_score(cluster, &inputs.affinity.preferred);
        let obsolete_placement_affinity_score = i32::from(
            inputs
                .existing_steady_state
                .iter()
                .any(|c| c.name == cluster.name),
        );
        candidates.push((
            cluster.name.clone(),
            ClusterScore {
                topology_spread_score,
                affinity_score,
                obsolete_placement_affinity_score,
            },
        ));
    }

    // Route through `ScoredCluster`'s `Ord` rather than re-deriving the tiebreak here, so
    // precedence by score is decided in exactly one place.
    candidates.sort_by_cached_key(|(name, score)| {
        std::cmp::Reverse(ScoredCluster {
            cluster_name: name.clone(),
            score: Some(*score),
        })
    });

    let remaining_desired = inputs
        .desired_count
        .saturating_sub(inputs.already_satisfied.len() as u32);
    let take = [
        remaining_desired,
        inputs.batch_limit.unwrap_or(u32::MAX),
        candidates.len() as u32,
    ]
    .into_iter()
    .min()
    .unwrap_or(0) as usize;

    for (name, score) in candidates.iter().take(take) {
        selected.push(ClusterPick {
            cluster_name: name.clone(),
            decision: ClusterDecision::selected(Some(*score), "succeeded"),
        });
    }
    for (name, _) in candidates.iter().skip(take) {
        unselected.push(ClusterPick {
            cluster_name: name.clone(),
            decision: ClusterDecision::unselected("not picked: desired count already satisfied"),
        });
    }

    selected.extend(unselected);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Eligibility;
    use std::collections::BTreeMap;

    struct AlwaysEligible;
    impl EligibilityChecker for AlwaysEligible {
        fn check(&self, _cluster: &MemberCluster) -> Eligibility {
            Eligibility::eligible()
        }
    }

    fn cluster(name: &str, props: &[(&str, &str)]) -> MemberCluster {
        MemberCluster {
            name: name.into(),
            labels: BTreeMap::new(),
            taints: vec![],
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            deletion_timestamp: None,
        }
    }

    #[test]
    fn pick_all_selects_every_eligible_cluster() {
        let clusters = vec![cluster("a", &[]), cluster("b", &[])];
        let picks = pick_all(&clusters, &AlwaysEligible, &PolicyAffinity {
            required: vec![],
            preferred: vec![],
        });
        assert_eq!(picks.len(), 2);
        assert!(picks.iter().all(|p| p.decision.selected));
    }

    #[test]
    fn pick_fixed_classifies_not_found_and_ineligible() {
        let clusters = vec![cluster("a", &[])];
        let picks = pick_fixed(
            &["a".to_string(), "missing".to_string()],
            &clusters,
            &AlwaysEligible,
        );
        assert_eq!(picks.len(), 2);
        assert!(picks[0].decision.selected);
        assert!(!picks[1].decision.selected);
        assert_eq!(picks[1].cluster_name, "missing");
    }

    #[test]
    fn pick_n_prefers_higher_affinity_score() {
        let clusters = vec![
            cluster("a", &[("tier", "gold")]),
            cluster("b", &[("tier", "silver")]),
        ];
        let affinity = PolicyAffinity {
            required: vec![],
            preferred: vec![WeightedAffinityTerm {
                term: AffinityTerm {
                    key: "tier".into(),
                    values: vec!["gold".into()],
                },
                weight: 10,
            }],
        };
        let inputs = PickNInputs {
            desired_count: 1,
            affinity: &affinity,
            topology_spread_constraints: &[],
            tolerations: &[],
            already_satisfied: &HashSet::new(),
            existing_steady_state: &[],
            batch_limit: None,
        };
        let picks = pick_n(&clusters, &AlwaysEligible, &inputs);
        assert_eq!(picks[0].cluster_name, "a");
        assert!(picks[0].decision.selected);
        assert!(!picks[1].decision.selected);
    }

    #[test]
    fn pick_n_respects_batch_limit_and_marks_rest_unselected() {
        let clusters = vec![cluster("a", &[]), cluster("b", &[]), cluster("c", &[])];
        let affinity = PolicyAffinity {
            required: vec![],
            preferred: vec![],
        };
        let inputs = PickNInputs {
            desired_count: 3,
            affinity: &affinity,
            topology_spread_constraints: &[],
            tolerations: &[],
            already_satisfied: &HashSet::new(),
            existing_steady_state: &[],
            batch_limit: Some(1),
        };
        let picks = pick_n(&clusters, &AlwaysEligible, &inputs);
        assert_eq!(picks.iter().filter(|p| p.decision.selected).count(), 1);
    }
}
