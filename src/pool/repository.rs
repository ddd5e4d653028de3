//! Storage of Available and Used allocation records.
//!
//! The repository is a plain record store. Serializing the read-modify-write
//! sequences on top of it is the job of [`super::ResourcePool`].

use super::types::{FabricId, PoolKind};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("duplicate entry {unit} for fabric {fabric_id} category {category}")]
    Duplicate {
        fabric_id: FabricId,
        category: String,
        unit: String,
    },
    #[error("repository lock poisoned")]
    Poisoned,
}

/// Durable store consumed by the pools
pub trait PoolRepository<K: PoolKind>: Send + Sync {
    /// Insert every unit or none of them
    fn insert_available(
        &self,
        fabric_id: FabricId,
        category: &str,
        units: Vec<K::Unit>,
    ) -> Result<(), RepositoryError>;

    /// Lowest available unit of the category
    fn first_available(&self, fabric_id: FabricId, category: &str) -> Result<Option<K::Unit>, RepositoryError>;

    /// Remove a unit from Available, returning whether it was present
    fn take_available(&self, fabric_id: FabricId, category: &str, unit: &K::Unit) -> Result<bool, RepositoryError>;

    /// Return a unit to Available. Units outside the populated ranges are
    /// dropped; returns whether the unit went back.
    fn restore_available(&self, fabric_id: FabricId, category: &str, unit: K::Unit) -> Result<bool, RepositoryError>;

    fn count_available(&self, fabric_id: FabricId, category: &str, unit: &K::Unit) -> Result<usize, RepositoryError>;

    fn find_used(
        &self,
        fabric_id: FabricId,
        category: &str,
        binding: &K::Binding,
    ) -> Result<Option<K::Unit>, RepositoryError>;

    fn insert_used(
        &self,
        fabric_id: FabricId,
        category: &str,
        binding: K::Binding,
        unit: K::Unit,
    ) -> Result<(), RepositoryError>;

    fn delete_used(&self, fabric_id: FabricId, category: &str, binding: &K::Binding) -> Result<Option<K::Unit>, RepositoryError>;

    /// Whether any binding of the category holds the unit (any orientation)
    fn is_bound(&self, fabric_id: FabricId, category: &str, unit: &K::Unit) -> Result<bool, RepositoryError>;

    /// Drop every record of a fabric
    fn drop_fabric(&self, fabric_id: FabricId) -> Result<(), RepositoryError>;
}

type TableKey = (FabricId, String);

struct Tables<K: PoolKind> {
    /// Every unit ever populated, in pooled form
    populated: HashMap<TableKey, BTreeSet<K::Unit>>,
    available: HashMap<TableKey, BTreeSet<K::Unit>>,
    used: HashMap<TableKey, BTreeMap<K::Binding, K::Unit>>,
}

/// In-process repository used by the CLI and the tests
pub struct InMemoryPoolRepository<K: PoolKind> {
    tables: Mutex<Tables<K>>,
}

impl<K: PoolKind> Default for InMemoryPoolRepository<K> {
    fn default() -> Self {
        Self {
            tables: Mutex::new(Tables {
                populated: HashMap::new(),
                available: HashMap::new(),
                used: HashMap::new(),
            }),
        }
    }
}

impl<K: PoolKind> InMemoryPoolRepository<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables<K>>, RepositoryError> {
        self.tables.lock().map_err(|_| RepositoryError::Poisoned)
    }
}

fn key(fabric_id: FabricId, category: &str) -> TableKey {
    (fabric_id, category.to_string())
}

impl<K: PoolKind> PoolRepository<K> for InMemoryPoolRepository<K> {
    fn insert_available(
        &self,
        fabric_id: FabricId,
        category: &str,
        units: Vec<K::Unit>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        let table_key = key(fabric_id, category);
        let existing = tables.populated.get(&table_key);
        let used = tables.used.get(&table_key);

        let mut staged = BTreeSet::new();
        for unit in units {
            let pooled = K::pooled(&unit);
            let bound = used
                .map(|held| held.values().any(|u| K::pooled(u) == pooled))
                .unwrap_or(false);
            let present = existing.map(|set| set.contains(&pooled)).unwrap_or(false);
            if bound || present || !staged.insert(pooled) {
                return Err(RepositoryError::Duplicate {
                    fabric_id,
                    category: category.to_string(),
                    unit: format!("{:?}", unit),
                });
            }
        }

        tables.populated.entry(table_key.clone()).or_default().extend(staged.iter().cloned());
        tables.available.entry(table_key).or_default().extend(staged);
        Ok(())
    }

    fn first_available(&self, fabric_id: FabricId, category: &str) -> Result<Option<K::Unit>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .available
            .get(&key(fabric_id, category))
            .and_then(|set| set.iter().next().cloned()))
    }

    fn take_available(&self, fabric_id: FabricId, category: &str, unit: &K::Unit) -> Result<bool, RepositoryError> {
        let mut tables = self.tables()?;
        Ok(tables
            .available
            .get_mut(&key(fabric_id, category))
            .map(|set| set.remove(unit))
            .unwrap_or(false))
    }

    fn restore_available(&self, fabric_id: FabricId, category: &str, unit: K::Unit) -> Result<bool, RepositoryError> {
        let mut tables = self.tables()?;
        let table_key = key(fabric_id, category);
        let in_range = tables
            .populated
            .get(&table_key)
            .map(|set| set.contains(&unit))
            .unwrap_or(false);
        if !in_range {
            return Ok(false);
        }
        tables.available.entry(table_key).or_default().insert(unit);
        Ok(true)
    }

    fn count_available(&self, fabric_id: FabricId, category: &str, unit: &K::Unit) -> Result<usize, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .available
            .get(&key(fabric_id, category))
            .map(|set| usize::from(set.contains(unit)))
            .unwrap_or(0))
    }

    fn find_used(
        &self,
        fabric_id: FabricId,
        category: &str,
        binding: &K::Binding,
    ) -> Result<Option<K::Unit>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .used
            .get(&key(fabric_id, category))
            .and_then(|held| held.get(binding).cloned()))
    }

    fn insert_used(
        &self,
        fabric_id: FabricId,
        category: &str,
        binding: K::Binding,
        unit: K::Unit,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        let held = tables.used.entry(key(fabric_id, category)).or_default();
        if held.contains_key(&binding) {
            return Err(RepositoryError::Duplicate {
                fabric_id,
                category: category.to_string(),
                unit: format!("{:?}", binding),
            });
        }
        held.insert(binding, unit);
        Ok(())
    }

    fn delete_used(&self, fabric_id: FabricId, category: &str, binding: &K::Binding) -> Result<Option<K::Unit>, RepositoryError> {
        let mut tables = self.tables()?;
        Ok(tables
            .used
            .get_mut(&key(fabric_id, category))
            .and_then(|held| held.remove(binding)))
    }

    fn is_bound(&self, fabric_id: FabricId, category: &str, unit: &K::Unit) -> Result<bool, RepositoryError> {
        let tables = self.tables()?;
        let pooled = K::pooled(unit);
        Ok(tables
            .used
            .get(&key(fabric_id, category))
            .map(|held| held.values().any(|u| K::pooled(u) == pooled))
            .unwrap_or(false))
    }

    fn drop_fabric(&self, fabric_id: FabricId) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        tables.populated.retain(|(fabric, _), _| *fabric != fabric_id);
        tables.available.retain(|(fabric, _), _| *fabric != fabric_id);
        tables.used.retain(|(fabric, _), _| *fabric != fabric_id);
        Ok(())
    }
}
