//! The store interface: a watchable object store with label/annotation indexing,
//! Create/Get/List-by-label/Update/Patch/Delete per entity.
//!
//! The reference implementation backs this with a real Kubernetes-style API server; here it
//! is a trait so the scheduler, rollout controller and staged update runner can be exercised
//! against [`FakeStore`] in tests without any external dependency.

mod fake;

pub use fake::FakeStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use snafu::Snafu;

use crate::error::{ErrorClass, ErrorClassify};
use crate::label_selector::LabelSelector;

/// Implemented by every entity kept in a [`Store`]: the name it is keyed by, and the
/// labels the store's list-by-selector query indexes on.
pub trait Keyed {
    fn name(&self) -> &str;
    fn labels(&self) -> BTreeMap<String, String>;
}

/// A value plus the store's opaque optimistic-concurrency token (a stand-in for
/// Kubernetes' `resourceVersion`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum StoreError {
    #[snafu(display("{kind} {name:?} not found"))]
    NotFound { kind: &'static str, name: String },

    #[snafu(display("optimistic concurrency conflict updating {kind} {name:?}"))]
    Conflict { kind: &'static str, name: String },

    #[snafu(display("{kind} {name:?} already exists"))]
    AlreadyExists { kind: &'static str, name: String },
}

impl ErrorClassify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            // A conflicting write is exactly the sort of thing that resolves itself on
            // retry once the other writer's change has landed.
            StoreError::Conflict { .. } => ErrorClass::Transient,
            StoreError::NotFound { .. } | StoreError::AlreadyExists { .. } => {
                ErrorClass::UnexpectedBehavior
            }
        }
    }
}

#[async_trait]
pub trait Store<T: Keyed + Clone + Send + Sync>: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Versioned<T>>, StoreError>;

    async fn list_by_label(&self, selector: &LabelSelector) -> Result<Vec<Versioned<T>>, StoreError>;

    async fn create(&self, value: T) -> Result<Versioned<T>, StoreError>;

    /// Optimistic update: fails with [`StoreError::Conflict`] if `stored.version` no longer
    /// matches what is on record.
    async fn update(&self, stored: Versioned<T>) -> Result<Versioned<T>, StoreError>;

    async fn delete(&self, name: &str, expected_version: u64) -> Result<(), StoreError>;
}
