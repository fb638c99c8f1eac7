//! Condition infrastructure shared by every entity that reports status: bindings,
//! policy snapshots, placements, update runs, stages and approval requests.
//!
//! This generalizes the `ClusterCondition` / `ClusterConditionSet` / `ConditionBuilder`
//! pattern to an arbitrary condition-type enum `T`, since this core tracks several
//! distinct condition vocabularies (binding conditions, placement conditions, update-run
//! conditions, ...) rather than a single one.

mod aggregate;
mod condition;

pub use aggregate::{aggregate_binding_condition, PlacementStatusAggregator};
pub use condition::{Condition, ConditionSet, ConditionStatus};
