use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::{
    error::Error,
    pool::{PortPool, PortRange},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub owner_key: String,
    pub lb_id: String,
    pub ports: Vec<i32>,
}

impl Allocation {
    pub fn is_compatible(&self, candidates: &[String], count: usize) -> bool {
        self.ports.len() == count && candidates.iter().any(|c| c.eq(&self.lb_id))
    }
}

/// Port pools and the allocation index of one plugin instance.
/// Both are guarded by a single lock.
#[derive(Debug)]
pub struct PortAllocator {
    pub inner: Arc<Mutex<PortAllocatorInner>>,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> PortAllocator {
        PortAllocator {
            inner: Arc::new(Mutex::new(PortAllocatorInner::new(range))),
        }
    }
}

#[derive(Debug)]
pub struct PortAllocatorInner {
    range: PortRange,
    pub pools: HashMap<String, PortPool>,
    pub allocations: HashMap<String, Allocation>,
    recovered: bool,
}

impl PortAllocatorInner {
    pub fn new(range: PortRange) -> PortAllocatorInner {
        PortAllocatorInner {
            range,
            pools: HashMap::new(),
            allocations: HashMap::new(),
            recovered: false,
        }
    }

    pub fn range(&self) -> &PortRange {
        &self.range
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    pub fn ensure(&mut self, lb_id: &str) -> &mut PortPool {
        self.pools
            .entry(lb_id.to_string())
            .or_insert_with(|| PortPool::new(lb_id, &self.range))
    }

    // First-fit across candidates in the given order.
    // None means no candidate has enough free ports.
    pub fn try_allocate(
        &mut self,
        candidates: &[String],
        count: usize,
    ) -> Result<Option<(String, Vec<i32>)>, Error> {
        if count == 0 {
            return Err(Error::InvalidCount);
        }
        for lb_id in candidates.iter() {
            let pool = self.ensure(lb_id);
            if pool.free() < count {
                continue;
            }
            let ports = pool.claim(count)?;
            return Ok(Some((lb_id.clone(), ports)));
        }
        Ok(None)
    }

    pub fn get(&self, owner_key: &str) -> Option<&Allocation> {
        self.allocations.get(owner_key)
    }

    pub fn lookup_or_allocate(
        &mut self,
        owner_key: &str,
        candidates: &[String],
        count: usize,
    ) -> Result<Allocation, Error> {
        if !self.recovered {
            return Err(Error::NotRecovered);
        }
        if let Some(allocation) = self.allocations.get(owner_key) {
            return Ok(allocation.clone());
        }
        let (lb_id, ports) =
            self.try_allocate(candidates, count)?
                .ok_or_else(|| Error::InsufficientPorts {
                    candidates: candidates.to_vec(),
                    count,
                })?;
        let allocation = Allocation {
            owner_key: owner_key.to_string(),
            lb_id,
            ports,
        };
        self.allocations
            .insert(owner_key.to_string(), allocation.clone());
        Ok(allocation)
    }

    // Keep the existing allocation when it still fits the requested shape.
    // Otherwise release it and allocate again. On failure the previous allocation is restored.
    pub fn lookup_or_reallocate(
        &mut self,
        owner_key: &str,
        candidates: &[String],
        count: usize,
    ) -> Result<Allocation, Error> {
        if !self.recovered {
            return Err(Error::NotRecovered);
        }
        let previous = match self.allocations.get(owner_key) {
            Some(allocation) if allocation.is_compatible(candidates, count) => {
                return Ok(allocation.clone())
            }
            Some(_) => self.release(owner_key),
            None => None,
        };
        match self.lookup_or_allocate(owner_key, candidates, count) {
            Ok(allocation) => Ok(allocation),
            Err(e) => {
                if let Some(prev) = previous {
                    self.ensure(&prev.lb_id).mark(&prev.ports);
                    self.allocations.insert(owner_key.to_string(), prev);
                }
                Err(e)
            }
        }
    }

    // Same as lookup_or_reallocate, but the allocation moves away from previous_key.
    // The previous allocation is restored when allocating fails.
    pub fn reallocate_from(
        &mut self,
        previous_key: &str,
        owner_key: &str,
        candidates: &[String],
        count: usize,
    ) -> Result<Allocation, Error> {
        if !self.recovered {
            return Err(Error::NotRecovered);
        }
        if previous_key.eq(owner_key) {
            return self.lookup_or_reallocate(owner_key, candidates, count);
        }
        let previous = self.release(previous_key);
        match self.lookup_or_reallocate(owner_key, candidates, count) {
            Ok(allocation) => Ok(allocation),
            Err(e) => {
                if let Some(prev) = previous {
                    self.ensure(&prev.lb_id).mark(&prev.ports);
                    self.allocations.insert(previous_key.to_string(), prev);
                }
                Err(e)
            }
        }
    }

    // Track an allocation found on a cluster object after recovery.
    // Fails when a port is out of the range or held by another owner.
    pub fn adopt(&mut self, owner_key: &str, lb_id: &str, ports: &[i32]) -> Result<Allocation, Error> {
        if !self.recovered {
            return Err(Error::NotRecovered);
        }
        if let Some(existing) = self.allocations.get(owner_key) {
            if existing.lb_id.eq(lb_id) && existing.ports.eq(ports) {
                return Ok(existing.clone());
            }
            return Err(Error::AllocationConflict(owner_key.to_string()));
        }
        let range = self.range.clone();
        let pool = self.ensure(lb_id);
        // Blocked ports are always marked used.
        if ports.is_empty()
            || ports
                .iter()
                .any(|p| !range.contains(*p) || pool.is_used(*p))
        {
            return Err(Error::AllocationConflict(owner_key.to_string()));
        }
        let ports = pool.mark(ports);
        let allocation = Allocation {
            owner_key: owner_key.to_string(),
            lb_id: lb_id.to_string(),
            ports,
        };
        self.allocations
            .insert(owner_key.to_string(), allocation.clone());
        Ok(allocation)
    }

    // Release is a no-op when the key is absent.
    // Only the caller that removes the entry gets the released allocation.
    pub fn release(&mut self, owner_key: &str) -> Option<Allocation> {
        let allocation = self.allocations.remove(owner_key)?;
        if let Some(pool) = self.pools.get_mut(&allocation.lb_id) {
            pool.release(&allocation.ports);
        }
        Some(allocation)
    }

    // Replay an allocation found on an existing cluster object.
    // Ports out of the range are ignored.
    // Returns false when the same allocation is already known.
    pub fn recover(&mut self, owner_key: &str, lb_id: &str, ports: &[i32]) -> Result<bool, Error> {
        let managed = ports
            .iter()
            .copied()
            .filter(|p| self.range.contains(*p))
            .collect::<Vec<i32>>();
        if let Some(existing) = self.allocations.get(owner_key) {
            if existing.lb_id.eq(lb_id) && existing.ports.eq(&managed) {
                return Ok(false);
            }
            return Err(Error::AllocationConflict(owner_key.to_string()));
        }
        let marked = self.ensure(lb_id).mark(&managed);
        self.allocations.insert(
            owner_key.to_string(),
            Allocation {
                owner_key: owner_key.to_string(),
                lb_id: lb_id.to_string(),
                ports: marked,
            },
        );
        Ok(true)
    }

    pub fn finish_recovery(&mut self) {
        self.recovered = true;
    }

    pub fn used_ports(&self, lb_id: &str) -> Vec<i32> {
        self.pools
            .get(lb_id)
            .map(|p| p.used_ports())
            .unwrap_or_default()
    }

    pub fn free(&self, lb_id: &str) -> usize {
        match self.pools.get(lb_id) {
            Some(p) => p.free(),
            None => PortPool::new(lb_id, &self.range).free(),
        }
    }
}
