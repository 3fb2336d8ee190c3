/// Allocation ledger for memory the marshaller creates inside the target.
/// Every allocation is recorded immediately after it succeeds, so a failed
/// write that follows still leaves the block tracked for release.
/// Release is idempotent: each address goes back to the target at most once.
use crate::config::types::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::SystemTime;

/// One block of target memory owned by the session
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRecord {
    pub address: u64,
    pub size: usize,
    pub recorded_at: SystemTime,
}

/// Outcome of releasing the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseReport {
    pub released: Vec<u64>,
    pub failed: Vec<(u64, String)>,
    /// Addresses skipped because they had already been released
    pub skipped: Vec<u64>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ledger of live marshaller allocations
#[derive(Debug, Default)]
pub struct AllocationLedger {
    entries: Vec<AllocationRecord>,
    released: HashSet<u64>,
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation. Must be called right after the allocation succeeds.
    pub fn record(&mut self, address: u64, size: usize) {
        // The target allocator may hand back an address we released earlier
        self.released.remove(&address);
        self.entries.retain(|e| e.address != address);

        let entry = AllocationRecord {
            address,
            size,
            recorded_at: SystemTime::now(),
        };
        debug!("Recording allocation: {:#x} ({} bytes)", address, size);
        self.entries.push(entry);
    }

    pub fn contains(&self, address: u64) -> bool {
        self.entries.iter().any(|e| e.address == address)
    }

    pub fn get(&self, address: u64) -> Option<&AllocationRecord> {
        self.entries.iter().find(|e| e.address == address)
    }

    /// Stop tracking a block the target released on its own
    pub fn forget(&mut self, address: u64) -> Option<AllocationRecord> {
        let index = self.entries.iter().position(|e| e.address == address)?;
        debug!("Forgetting allocation released by the target: {:#x}", address);
        self.released.insert(address);
        Some(self.entries.remove(index))
    }

    /// Entries in reverse creation order (release order)
    pub fn reverse_order(&self) -> Vec<&AllocationRecord> {
        self.entries.iter().rev().collect()
    }

    pub fn addresses(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.address).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Release every tracked block through `release`, newest first, then
    /// clear the ledger. Failures are logged and reported, never retried.
    /// Safe to call repeatedly.
    pub fn release_all<F>(&mut self, mut release: F) -> ReleaseReport
    where
        F: FnMut(&AllocationRecord) -> Result<()>,
    {
        let mut report = ReleaseReport::default();
        if self.entries.is_empty() {
            return report;
        }

        info!("Releasing {} target allocations", self.entries.len());
        let entries = std::mem::take(&mut self.entries);
        for entry in entries.iter().rev() {
            if !self.released.insert(entry.address) {
                debug!("Allocation already released: {:#x}", entry.address);
                report.skipped.push(entry.address);
                continue;
            }
            match release(entry) {
                Ok(()) => {
                    debug!("Released {:#x}", entry.address);
                    report.released.push(entry.address);
                }
                Err(e) => {
                    warn!("Failed to release {:#x}: {}", entry.address, e);
                    report.failed.push((entry.address, e.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ProbeError;

    #[test]
    fn test_ledger_basic_operations() {
        let mut ledger = AllocationLedger::new();
        assert!(ledger.is_empty());

        ledger.record(0x1000, 16);
        ledger.record(0x2000, 8);
        assert_eq!(ledger.count(), 2);
        assert_eq!(ledger.total_bytes(), 24);
        assert!(ledger.contains(0x2000));

        let order: Vec<u64> = ledger.reverse_order().iter().map(|e| e.address).collect();
        assert_eq!(order, vec![0x2000, 0x1000]);
    }

    #[test]
    fn test_release_all_is_idempotent() {
        let mut ledger = AllocationLedger::new();
        ledger.record(0x1000, 16);
        ledger.record(0x2000, 8);

        let mut calls = Vec::new();
        let report = ledger.release_all(|e| {
            calls.push(e.address);
            Ok(())
        });
        assert_eq!(report.released, vec![0x2000, 0x1000]);
        assert!(ledger.is_empty());

        let again = ledger.release_all(|e| {
            calls.push(e.address);
            Ok(())
        });
        assert!(again.released.is_empty());
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn test_release_failures_are_reported_and_cleared() {
        let mut ledger = AllocationLedger::new();
        ledger.record(0x1000, 16);
        ledger.record(0x2000, 8);

        let report = ledger.release_all(|e| {
            if e.address == 0x1000 {
                Err(ProbeError::target_access("boom"))
            } else {
                Ok(())
            }
        });
        assert!(!report.is_clean());
        assert_eq!(report.failed.len(), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_forgotten_block_is_not_released() {
        let mut ledger = AllocationLedger::new();
        ledger.record(0x1000, 16);
        assert!(ledger.forget(0x1000).is_some());
        assert!(ledger.forget(0x1000).is_none());

        let report = ledger.release_all(|_| panic!("nothing to release"));
        assert!(report.released.is_empty());
    }

    #[test]
    fn test_reused_address_is_tracked_again() {
        let mut ledger = AllocationLedger::new();
        ledger.record(0x1000, 16);
        ledger.forget(0x1000);
        ledger.record(0x1000, 32);
        assert_eq!(ledger.get(0x1000).map(|e| e.size), Some(32));

        let report = ledger.release_all(|_| Ok(()));
        assert_eq!(report.released, vec![0x1000]);
    }
}
