//! Generic allocation pool shared by the ASN, IP and IP-pair instances.

use super::repository::{InMemoryPoolRepository, PoolRepository, RepositoryError};
use super::types::{AsnKind, FabricId, IpKind, IpPairKind, PoolKind};
use super::PoolError;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

pub type AsnPool = ResourcePool<AsnKind>;
pub type IpPool = ResourcePool<IpKind>;
pub type IpPairPool = ResourcePool<IpPairKind>;

/// Allocation pool for one kind of resource.
///
/// Every operation that reads and then writes the repository runs under a
/// mutex keyed by `(fabric, category)`, so concurrent callers of
/// [`ResourcePool::get_next`] never receive the same unit.
pub struct ResourcePool<K: PoolKind, R: PoolRepository<K> = InMemoryPoolRepository<K>> {
    repository: R,
    locks: Mutex<HashMap<(FabricId, String), Arc<Mutex<()>>>>,
    _kind: PhantomData<K>,
}

impl<K: PoolKind> ResourcePool<K> {
    pub fn in_memory() -> Self {
        Self::new(InMemoryPoolRepository::new())
    }
}

impl<K: PoolKind> Default for ResourcePool<K> {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl<K: PoolKind, R: PoolRepository<K>> ResourcePool<K, R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            locks: Mutex::new(HashMap::new()),
            _kind: PhantomData,
        }
    }

    fn category_lock(&self, fabric_id: FabricId, category: &str) -> Result<Arc<Mutex<()>>, PoolError> {
        let mut locks = self.locks.lock().map_err(|_| RepositoryError::Poisoned)?;
        Ok(locks
            .entry((fabric_id, category.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Expand `range` and insert every unit as Available.
    ///
    /// Nothing is inserted when the range is malformed or any unit collides
    /// with an existing record.
    pub fn populate(
        &self,
        fabric_id: FabricId,
        range: &str,
        category: &str,
        allow_small: bool,
    ) -> Result<usize, PoolError> {
        let init_failed = |reason: String| {
            warn!("{} pool population of {} for {} failed: {}", K::LABEL, range, category, reason);
            PoolError::InitializationFailed {
                pool: K::LABEL,
                noun: K::CATEGORY_NOUN,
                category: category.to_string(),
                reason,
            }
        };

        let units = K::expand(range, allow_small).map_err(init_failed)?;
        let count = units.len();

        let lock = self.category_lock(fabric_id, category)?;
        let _guard = lock.lock().map_err(|_| RepositoryError::Poisoned)?;
        self.repository
            .insert_available(fabric_id, category, units)
            .map_err(|e| init_failed(e.to_string()))?;

        info!("Populated {} {} units of {} for fabric {} from {}", count, K::LABEL, category, fabric_id, range);
        Ok(count)
    }

    /// Draw the lowest available unit and bind it to `binding`
    pub fn get_next(&self, fabric_id: FabricId, category: &str, binding: K::Binding) -> Result<K::Unit, PoolError> {
        let lock = self.category_lock(fabric_id, category)?;
        let _guard = lock.lock().map_err(|_| RepositoryError::Poisoned)?;

        let (key, swapped) = K::canonical(&binding);
        if self.repository.find_used(fabric_id, category, &key)?.is_some() {
            return Err(PoolError::BindingOccupied {
                pool: K::LABEL,
                fabric_id,
                owner: K::describe(&binding),
            });
        }

        let unit = self
            .repository
            .first_available(fabric_id, category)?
            .ok_or(PoolError::Exhausted { pool: K::LABEL, fabric_id })?;
        self.repository.take_available(fabric_id, category, &unit)?;

        let stored = if swapped { K::flip(unit.clone()) } else { unit.clone() };
        self.repository.insert_used(fabric_id, category, key, stored)?;

        info!("Allocated {} {:?} ({}) to {}", K::LABEL, unit, category, K::describe(&binding));
        Ok(unit)
    }

    /// The unit already bound to `binding`, oriented like the query
    pub fn get_already_allocated(
        &self,
        fabric_id: FabricId,
        category: &str,
        binding: &K::Binding,
    ) -> Result<K::Unit, PoolError> {
        let (key, swapped) = K::canonical(binding);
        let stored = self
            .repository
            .find_used(fabric_id, category, &key)?
            .ok_or_else(|| PoolError::NotAllocated {
                pool: K::LABEL,
                fabric_id,
                owner: K::describe(binding),
            })?;

        let unit = if swapped { K::flip(stored) } else { stored };
        debug!("{} {:?} ({}) already allocated to {}", K::LABEL, unit, category, K::describe(binding));
        Ok(unit)
    }

    /// Bind an externally chosen unit to `binding`
    pub fn reserve(
        &self,
        fabric_id: FabricId,
        category: &str,
        binding: K::Binding,
        unit: K::Unit,
    ) -> Result<(), PoolError> {
        let lock = self.category_lock(fabric_id, category)?;
        let _guard = lock.lock().map_err(|_| RepositoryError::Poisoned)?;

        let (key, swapped) = K::canonical(&binding);
        let stored = if swapped { K::flip(unit.clone()) } else { unit.clone() };
        let pooled = K::pooled(&unit);

        let held = self.repository.find_used(fabric_id, category, &key)?;
        if let Some(held) = &held {
            if *held == stored {
                debug!("{} {:?} already reserved for {}", K::LABEL, unit, K::describe(&binding));
                return Ok(());
            }
            if !K::REPLACE_HELD {
                return Err(PoolError::BindingOccupied {
                    pool: K::LABEL,
                    fabric_id,
                    owner: K::describe(&binding),
                });
            }
        }

        let held_same_unit = held.as_ref().map(|h| K::pooled(h) == pooled).unwrap_or(false);
        let was_available = self.repository.take_available(fabric_id, category, &pooled)?;
        if !was_available && !held_same_unit {
            if let Some(err) = K::reservation_error(fabric_id, &binding, &unit) {
                warn!("{}", err);
                return Err(err);
            }
        }

        if let Some(previous) = held {
            self.repository.delete_used(fabric_id, category, &key)?;
            if K::pooled(&previous) != pooled {
                info!("Releasing {} {:?} held by {} before reservation", K::LABEL, previous, K::describe(&binding));
                self.restore_if_unbound(fabric_id, category, previous)?;
            }
        }
        self.repository.insert_used(fabric_id, category, key, stored)?;

        info!("Reserved {} {:?} ({}) for {}", K::LABEL, unit, category, K::describe(&binding));
        Ok(())
    }

    /// Unbind `unit` from `binding` and make it available again
    pub fn release(
        &self,
        fabric_id: FabricId,
        category: &str,
        binding: &K::Binding,
        unit: K::Unit,
    ) -> Result<(), PoolError> {
        let lock = self.category_lock(fabric_id, category)?;
        let _guard = lock.lock().map_err(|_| RepositoryError::Poisoned)?;

        let (key, swapped) = K::canonical(binding);
        let stored = if swapped { K::flip(unit.clone()) } else { unit.clone() };

        match self.repository.find_used(fabric_id, category, &key)? {
            Some(held) if held == stored => {
                self.repository.delete_used(fabric_id, category, &key)?;
            }
            _ => {
                return Err(PoolError::NotAllocated {
                    pool: K::LABEL,
                    fabric_id,
                    owner: K::describe(binding),
                })
            }
        }

        self.restore_if_unbound(fabric_id, category, unit.clone())?;
        info!("Released {} {:?} ({}) from {}", K::LABEL, unit, category, K::describe(binding));
        Ok(())
    }

    /// Number of Available entries matching `unit`
    pub fn count_in_pool(&self, fabric_id: FabricId, category: &str, unit: &K::Unit) -> Result<usize, PoolError> {
        Ok(self
            .repository
            .count_available(fabric_id, category, &K::pooled(unit))?)
    }

    /// Drop every Available and Used record of a fabric
    pub fn teardown(&self, fabric_id: FabricId) -> Result<(), PoolError> {
        self.repository.drop_fabric(fabric_id)?;
        if let Ok(mut locks) = self.locks.lock() {
            locks.retain(|(fabric, _), _| *fabric != fabric_id);
        }
        info!("Tore down {} pools of fabric {}", K::LABEL, fabric_id);
        Ok(())
    }

    fn restore_if_unbound(&self, fabric_id: FabricId, category: &str, unit: K::Unit) -> Result<(), PoolError> {
        // Shared units stay out of Available until their last binding is gone
        if self.repository.is_bound(fabric_id, category, &unit)? {
            return Ok(());
        }
        if !self.repository.restore_available(fabric_id, category, K::pooled(&unit))? {
            debug!("{} {:?} ({}) lies outside the populated ranges, not returned", K::LABEL, unit, category);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::types::{IpBinding, PairBinding};
    use std::net::Ipv4Addr;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_asn_exhaustion() {
        let pool = AsnPool::in_memory();
        assert_eq!(pool.populate(1, "64512-64513", "Leaf", false).unwrap(), 2);

        assert_eq!(pool.get_next(1, "Leaf", 10).unwrap(), 64512);
        assert_eq!(pool.get_next(1, "Leaf", 11).unwrap(), 64513);
        let err = pool.get_next(1, "Leaf", 12).unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { fabric_id: 1, .. }));
        assert_eq!(err.to_string(), "ASN Exhausted for 1");
    }

    #[test]
    fn test_populate_failure_message() {
        let pool = AsnPool::in_memory();
        let err = pool.populate(1, "64600-64500", "Spine", false).unwrap_err();
        assert!(err.to_string().starts_with("ASN Pool Initialization Failed for Role Spine"));

        let pool = IpPool::in_memory();
        let err = pool.populate(1, "10.0.0.0/40", "Loopback", false).unwrap_err();
        assert!(err.to_string().starts_with("IP Pool Initialization Failed for type Loopback"));
    }

    #[test]
    fn test_populate_twice_keeps_first_population() {
        let pool = IpPool::in_memory();
        pool.populate(1, "10.0.0.0/30", "Loopback", false).unwrap();
        assert!(pool.populate(1, "10.0.0.0/29", "Loopback", false).is_err());
        assert_eq!(pool.count_in_pool(1, "Loopback", &ip("10.0.0.4")).unwrap(), 0);
        assert_eq!(pool.count_in_pool(1, "Loopback", &ip("10.0.0.3")).unwrap(), 1);
    }

    #[test]
    fn test_get_next_rejects_occupied_binding() {
        let pool = IpPool::in_memory();
        pool.populate(1, "10.0.0.0/30", "Loopback", false).unwrap();
        let binding = IpBinding::new(1, 1);
        pool.get_next(1, "Loopback", binding).unwrap();
        assert!(matches!(
            pool.get_next(1, "Loopback", binding),
            Err(PoolError::BindingOccupied { .. })
        ));
    }

    #[test]
    fn test_asn_shared_reservation() {
        let pool = AsnPool::in_memory();
        pool.populate(1, "65000-65003", "Leaf", false).unwrap();

        // MCT pair members share an ASN
        pool.reserve(1, "Leaf", 1, 65001).unwrap();
        pool.reserve(1, "Leaf", 2, 65001).unwrap();
        assert_eq!(pool.count_in_pool(1, "Leaf", &65001).unwrap(), 0);

        pool.release(1, "Leaf", &1, 65001).unwrap();
        assert_eq!(pool.count_in_pool(1, "Leaf", &65001).unwrap(), 0);
        pool.release(1, "Leaf", &2, 65001).unwrap();
        assert_eq!(pool.count_in_pool(1, "Leaf", &65001).unwrap(), 1);
    }

    #[test]
    fn test_reserve_is_idempotent() {
        let pool = IpPool::in_memory();
        pool.populate(1, "10.0.0.0/30", "Loopback", false).unwrap();
        let binding = IpBinding::new(5, 1);
        pool.reserve(1, "Loopback", binding, ip("10.0.0.2")).unwrap();
        pool.reserve(1, "Loopback", binding, ip("10.0.0.2")).unwrap();
        assert!(matches!(
            pool.reserve(1, "Loopback", binding, ip("10.0.0.3")),
            Err(PoolError::BindingOccupied { .. })
        ));
        assert_eq!(pool.get_already_allocated(1, "Loopback", &binding).unwrap(), ip("10.0.0.2"));
    }

    #[test]
    fn test_release_requires_binding() {
        let pool = IpPool::in_memory();
        pool.populate(1, "10.0.0.0/30", "Loopback", false).unwrap();
        let err = pool
            .release(1, "Loopback", &IpBinding::new(9, 9), ip("10.0.0.0"))
            .unwrap_err();
        assert!(matches!(err, PoolError::NotAllocated { .. }));
    }

    #[test]
    fn test_pair_reserve_requires_pairing_unit() {
        let pool = IpPairPool::in_memory();
        pool.populate(1, "10.3.0.0/29", "P2P", false).unwrap();
        let binding = PairBinding::new(1, 2, 1, 1);

        let err = pool
            .reserve(1, "P2P", binding, (ip("10.3.0.1"), ip("10.3.0.2")))
            .unwrap_err();
        assert!(matches!(err, PoolError::ReservationMismatch(_)));

        pool.reserve(1, "P2P", binding, (ip("10.3.0.3"), ip("10.3.0.2"))).unwrap();
        assert_eq!(
            pool.get_already_allocated(1, "P2P", &binding).unwrap(),
            (ip("10.3.0.3"), ip("10.3.0.2"))
        );
        assert_eq!(
            pool.get_already_allocated(1, "P2P", &binding.reversed()).unwrap(),
            (ip("10.3.0.2"), ip("10.3.0.3"))
        );
    }

    #[test]
    fn test_pair_re_reservation_releases_previous_pair() {
        let pool = IpPairPool::in_memory();
        pool.populate(1, "10.3.0.0/29", "P2P", false).unwrap();
        let binding = PairBinding::new(1, 2, 1, 1);

        let first = pool.get_next(1, "P2P", binding).unwrap();
        assert_eq!(first, (ip("10.3.0.0"), ip("10.3.0.1")));

        pool.reserve(1, "P2P", binding, (ip("10.3.0.4"), ip("10.3.0.5"))).unwrap();
        assert_eq!(pool.count_in_pool(1, "P2P", &first).unwrap(), 1);
        assert_eq!(pool.count_in_pool(1, "P2P", &(ip("10.3.0.4"), ip("10.3.0.5"))).unwrap(), 0);
    }

    #[test]
    fn test_teardown_empties_fabric() {
        let pool = IpPool::in_memory();
        pool.populate(1, "10.0.0.0/30", "Loopback", false).unwrap();
        pool.populate(2, "10.0.0.0/30", "Loopback", false).unwrap();
        pool.get_next(1, "Loopback", IpBinding::new(1, 1)).unwrap();

        pool.teardown(1).unwrap();
        assert!(pool.get_already_allocated(1, "Loopback", &IpBinding::new(1, 1)).is_err());
        assert!(matches!(
            pool.get_next(1, "Loopback", IpBinding::new(2, 1)),
            Err(PoolError::Exhausted { .. })
        ));
        assert_eq!(pool.get_next(2, "Loopback", IpBinding::new(2, 1)).unwrap(), ip("10.0.0.0"));
    }
}
