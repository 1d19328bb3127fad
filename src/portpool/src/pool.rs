use std::collections::BTreeSet;

use super::{bitset::BitSet, error::Error};

/// Inclusive port range shared by every load balancer of one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRange {
    min_port: i32,
    max_port: i32,
    blocked_ports: BTreeSet<i32>,
}

impl PortRange {
    pub fn new(min_port: i32, max_port: i32, blocked_ports: &[i32]) -> Result<PortRange, Error> {
        if min_port <= 0 || max_port > u16::MAX as i32 || min_port > max_port {
            return Err(Error::InvalidRange(min_port, max_port));
        }
        let blocked_ports = blocked_ports
            .iter()
            .copied()
            .filter(|p| {
                let in_range = *p >= min_port && *p <= max_port;
                if !in_range {
                    tracing::warn!(port = p, min_port, max_port, "blocked port is out of range");
                }
                in_range
            })
            .collect();
        Ok(PortRange {
            min_port,
            max_port,
            blocked_ports,
        })
    }

    pub fn with_limit(self, limit: usize) -> Result<PortRange, Error> {
        if self.size() > limit {
            return Err(Error::RangeTooLarge(self.min_port, self.max_port, limit));
        }
        Ok(self)
    }

    pub fn min_port(&self) -> i32 {
        self.min_port
    }

    pub fn max_port(&self) -> i32 {
        self.max_port
    }

    pub fn blocked_ports(&self) -> &BTreeSet<i32> {
        &self.blocked_ports
    }

    pub fn size(&self) -> usize {
        (self.max_port - self.min_port + 1) as usize
    }

    pub fn contains(&self, port: i32) -> bool {
        port >= self.min_port && port <= self.max_port
    }

    fn index(&self, port: i32) -> Option<usize> {
        self.contains(port)
            .then(|| (port - self.min_port) as usize)
    }

    fn port(&self, index: usize) -> i32 {
        self.min_port + index as i32
    }
}

/// Port usage bitmap of one load balancer.
#[derive(Debug, Clone)]
pub struct PortPool {
    pub lb_id: String,
    range: PortRange,
    bits: BitSet,
}

impl PortPool {
    pub fn new(lb_id: &str, range: &PortRange) -> PortPool {
        let mut pool = PortPool {
            lb_id: lb_id.to_string(),
            range: range.clone(),
            bits: BitSet::new(range.size()),
        };
        pool.block();
        pool
    }

    fn block(&mut self) {
        for port in self.range.blocked_ports.iter() {
            if let Some(index) = self.range.index(*port) {
                // index is always within the bitset
                let _ = self.bits.set(index, true);
            }
        }
    }

    pub fn free(&self) -> usize {
        self.bits.count_unset()
    }

    pub fn capacity(&self) -> usize {
        self.bits.size() - self.range.blocked_ports.len()
    }

    pub fn is_used(&self, port: i32) -> bool {
        match self.range.index(port) {
            Some(index) => self.bits.get(index).unwrap_or(false),
            None => false,
        }
    }

    // Ports held by allocations. Blocked ports are excluded.
    pub fn used_ports(&self) -> Vec<i32> {
        (self.range.min_port..=self.range.max_port)
            .filter(|p| self.is_used(*p) && !self.range.blocked_ports.contains(p))
            .collect()
    }

    // Claim the lowest `count` free ports in ascending order.
    pub fn claim(&mut self, count: usize) -> Result<Vec<i32>, Error> {
        if count == 0 {
            return Err(Error::InvalidCount);
        }
        let indices = self.bits.min_unset_indices(count).map_err(Error::BitSet)?;
        for index in indices.iter() {
            self.bits.set(*index, true).map_err(Error::BitSet)?;
        }
        Ok(indices.into_iter().map(|i| self.range.port(i)).collect())
    }

    // Mark given ports as used. Ports out of the range are ignored.
    // This returns ports actually marked.
    pub fn mark(&mut self, ports: &[i32]) -> Vec<i32> {
        let mut marked = Vec::new();
        for port in ports.iter() {
            match self.range.index(*port) {
                Some(index) => {
                    if self.bits.set(index, true).is_ok() {
                        marked.push(*port);
                    }
                }
                None => {
                    tracing::warn!(
                        lb_id = self.lb_id,
                        port,
                        "ignore the port out of the managed range"
                    );
                }
            }
        }
        marked
    }

    pub fn release(&mut self, ports: &[i32]) {
        for port in ports.iter() {
            if let Some(index) = self.range.index(*port) {
                let _ = self.bits.set(index, false);
            }
        }
        self.block();
    }
}
