use jiff::Timestamp;

/// The status of a single condition. Declaration order matters: it is used by
/// `Ord`/`max` when several underlying signals are folded into one aggregate condition
/// (e.g. "Available" across every work object of a binding), so that folding in a single
/// `False` always wins over any number of `True`s, and an `Unknown` beats a `True` but
/// loses to a `False`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConditionStatus {
    True,
    Unknown,
    False,
}

impl ConditionStatus {
    pub fn from_bool(b: bool) -> Self {
        if b {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }

    pub fn is_true(self) -> bool {
        matches!(self, ConditionStatus::True)
    }

    pub fn is_false(self) -> bool {
        matches!(self, ConditionStatus::False)
    }
}

/// A single condition on some entity's status. `T` is the condition-type vocabulary for
/// that entity (e.g. `BindingConditionType`, `PlacementConditionType`, ...).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Condition<T> {
    pub type_: T,
    pub status: ConditionStatus,
    pub reason: Option<String>,
    pub message: Option<String>,
    /// The entity generation this condition was last evaluated against. Used by readiness
    /// checks to detect staleness (observed_generation < current generation).
    pub observed_generation: Option<i64>,
    pub last_transition_time: Option<Timestamp>,
}

impl<T> Condition<T> {
    pub fn new(type_: T, status: ConditionStatus) -> Self {
        Self {
            type_,
            status,
            reason: None,
            message: None,
            observed_generation: None,
            last_transition_time: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }

    pub fn with_transition_time(mut self, at: Timestamp) -> Self {
        self.last_transition_time = Some(at);
        self
    }

    pub fn observed_at_generation(&self, generation: i64) -> bool {
        self.observed_generation == Some(generation)
    }
}

/// An ordered collection of conditions for one entity, keyed by condition type.
///
/// Conditions are looked up by type and upserted with a fresh transition time only when
/// the status actually changes, avoiding condition churn.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConditionSet<T> {
    conditions: Vec<Condition<T>>,
}

impl<T: PartialEq + Clone> ConditionSet<T> {
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    pub fn get(&self, type_: &T) -> Option<&Condition<T>> {
        self.conditions.iter().find(|c| &c.type_ == type_)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition<T>> {
        self.conditions.iter()
    }

    /// Upserts a condition. Returns `true` if the status changed (i.e. the caller should
    /// stamp `last_transition_time` freshly) or the condition is new.
    pub fn set(&mut self, new: Condition<T>) -> bool {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == new.type_) {
            let status_changed = existing.status != new.status;
            *existing = new;
            status_changed
        } else {
            self.conditions.push(new);
            true
        }
    }

    /// Upserts a condition, only stamping a fresh `last_transition_time` (via `now`) if the
    /// status changed from what was previously recorded; otherwise the previous transition
    /// time is preserved. This is the idempotent-transition behavior the rollout controller
    /// and staged update runner rely on.
    pub fn set_with_fresh_transition(&mut self, mut new: Condition<T>, now: Timestamp) -> bool {
        let previous_transition = self.get(&new.type_).and_then(|c| c.last_transition_time);
        let status_changed = self
            .get(&new.type_)
            .is_none_or(|c| c.status != new.status);

        new.last_transition_time = if status_changed {
            Some(now)
        } else {
            previous_transition.or(Some(now))
        };
        self.set(new);
        status_changed
    }
}

impl<T: PartialEq + Clone> From<Vec<Condition<T>>> for ConditionSet<T> {
    fn from(conditions: Vec<Condition<T>>) -> Self {
        Self { conditions }
    }
}
