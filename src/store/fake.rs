use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::label_selector::LabelSelector;
use crate::store::{AlreadyExistsSnafu, ConflictSnafu, Keyed, NotFoundSnafu, Store, StoreError, Versioned};

/// An in-memory [`Store`] for tests: no watches, no persistence, just a `HashMap` behind a
/// mutex with a monotonic version counter per entity kind.
pub struct FakeStore<T> {
    kind: &'static str,
    entries: Mutex<HashMap<String, Versioned<T>>>,
    next_version: Mutex<u64>,
    _marker: PhantomData<T>,
}

impl<T: Clone> FakeStore<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
            next_version: Mutex::new(1),
            _marker: PhantomData,
        }
    }

    fn alloc_version(&self) -> u64 {
        let mut next = self.next_version.lock().expect("fake store mutex poisoned");
        let version = *next;
        *next += 1;
        version
    }

    /// Test convenience: seed the store with a value, bypassing `create`'s semantics.
    pub fn seed(&self, value: T)
    where
        T: Keyed,
    {
        let version = self.alloc_version();
        let name = value.name().to_string();
        self.entries
            .lock()
            .expect("fake store mutex poisoned")
            .insert(name, Versioned { value, version });
    }

    pub fn snapshot(&self) -> Vec<Versioned<T>> {
        self.entries
            .lock()
            .expect("fake store mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl<T: Keyed + Clone + Send + Sync> Store<T> for FakeStore<T> {
    async fn get(&self, name: &str) -> Result<Option<Versioned<T>>, StoreError> {
        Ok(self
            .entries
            .lock()
            .expect("fake store mutex poisoned")
            .get(name)
            .cloned())
    }

    async fn list_by_label(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<Versioned<T>>, StoreError> {
        Ok(self
            .entries
            .lock()
            .expect("fake store mutex poisoned")
            .values()
            .filter(|v| selector.matches(&v.value.labels()))
            .cloned()
            .collect())
    }

    async fn create(&self, value: T) -> Result<Versioned<T>, StoreError> {
        let name = value.name().to_string();
        let mut entries = self.entries.lock().expect("fake store mutex poisoned");
        if entries.contains_key(&name) {
            return AlreadyExistsSnafu {
                kind: self.kind,
                name,
            }
            .fail();
        }
        let version = self.alloc_version();
        let versioned = Versioned { value, version };
        entries.insert(name, versioned.clone());
        Ok(versioned)
    }

    async fn update(&self, stored: Versioned<T>) -> Result<Versioned<T>, StoreError> {
        let name = stored.value.name().to_string();
        let mut entries = self.entries.lock().expect("fake store mutex poisoned");
        let current = entries.get(&name).ok_or_else(|| {
            NotFoundSnafu {
                kind: self.kind,
                name: name.clone(),
            }
            .build()
        })?;
        if current.version != stored.version {
            return ConflictSnafu {
                kind: self.kind,
                name,
            }
            .fail();
        }
        let version = self.alloc_version();
        let versioned = Versioned {
            value: stored.value,
            version,
        };
        entries.insert(name, versioned.clone());
        Ok(versioned)
    }

    async fn delete(&self, name: &str, expected_version: u64) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("fake store mutex poisoned");
        let current = entries.get(name).ok_or_else(|| {
            NotFoundSnafu {
                kind: self.kind,
                name: name.to_string(),
            }
            .build()
        })?;
        if current.version != expected_version {
            return ConflictSnafu {
                kind: self.kind,
                name: name.to_string(),
            }
            .fail();
        }
        entries.remove(name);
        Ok(())
    }
}
