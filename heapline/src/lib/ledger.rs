use std::collections::HashMap;

use crate::utils::*;

/// Allocations seen but not yet freed, by block address.
///
/// An address holds at most one outstanding size. Reusing an address
/// before its free was observed overwrites the older size, which is then
/// lost for good.
#[derive(Clone, Debug, Default)]
pub struct AllocationLedger {
    live:   HashMap<u32, u32, FastHash>,
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a live block. Returns the size it replaced, if any.
    pub fn insert(&mut self, address: u32, size: u32) -> Option<u32> {
        self.live.insert(address, size)
    }

    /// Forgets a block, handing back its size.
    pub fn take(&mut self, address: u32) -> Option<u32> {
        self.live.remove(&address)
    }

    pub fn get(&self, address: u32) -> Option<u32> {
        self.live.get(&address).copied()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Sum of all outstanding sizes.
    pub fn outstanding(&self) -> u64 {
        self.live.values().map(|&s| s as u64).sum()
    }
}
