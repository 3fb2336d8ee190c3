//! Breakpoint protocol executed while the target is stopped.
//!
//! Entry to an intercepted location runs one atomic step:
//! 1. snapshot the frame's arguments (calls without a resolvable frame are
//!    left out of stats)
//! 2. run the always-on deallocation hook
//! 3. consult the active failure's `when` set
//! 4. forced path: errno, pointee overrides, immediate return
//! 5. normal path: arm a one-shot return trap for this invocation
//!
//! Watched calls are counted together with their arguments before either
//! return path completes.

use crate::config::types::Result;
use crate::intercept::failure::ArmedFailure;
use crate::intercept::registry::InterceptionRegistry;
use crate::intercept::stats::{ArgSnapshot, StatsMap};
use crate::observability::audit::{self, CorrelationIds};
use crate::target::control::{ReturnTrapId, StopHandler, StoppedTarget, TrapUnavailable};
use crate::values::encoded::EncodedValue;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Live heap blocks returned by watched allocation primitives.
///
/// Blocks the session marshals are not tracked here, the marshaller's ledger
/// owns them. Every completed call to the deallocation primitive removes its
/// block, watched or not. A deallocation call forced to fail does not: its
/// body never runs, so the block stays live in the target.
#[derive(Clone, Debug, Default)]
pub struct HeapTracker {
    live: BTreeMap<u64, usize>,
}

impl HeapTracker {
    pub fn record(&mut self, address: u64, size: usize) {
        self.live.insert(address, size);
    }

    pub fn release(&mut self, address: u64) -> Option<usize> {
        self.live.remove(&address)
    }

    /// Whether `address` falls inside a live block
    pub fn contains(&self, address: u64) -> bool {
        match self.live.range(..=address).next_back() {
            Some((&start, &size)) => address == start || address - start < size as u64,
            None => false,
        }
    }

    pub fn total_size(&self) -> usize {
        self.live.values().sum()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[derive(Debug)]
struct PendingReturn {
    location: String,
    call: Option<usize>,
    allocation_size: Option<usize>,
}

/// Stop handler owning the registry, the stats map and heap liveness
#[derive(Debug)]
pub struct Interceptor {
    registry: InterceptionRegistry,
    stats: StatsMap,
    heap: HeapTracker,
    dealloc_function: String,
    alloc_functions: BTreeSet<String>,
    pending: HashMap<ReturnTrapId, PendingReturn>,
    released_by_target: Vec<u64>,
    in_stop: bool,
    correlation: CorrelationIds,
}

impl Interceptor {
    pub fn new<S: Into<String>>(dealloc_function: S, alloc_functions: &[String]) -> Self {
        Self {
            registry: InterceptionRegistry::new(),
            stats: StatsMap::default(),
            heap: HeapTracker::default(),
            dealloc_function: dealloc_function.into(),
            alloc_functions: alloc_functions.iter().cloned().collect(),
            pending: HashMap::new(),
            released_by_target: Vec::new(),
            in_stop: false,
            correlation: CorrelationIds::new(),
        }
    }

    pub fn with_correlation(mut self, correlation: CorrelationIds) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn correlation(&self) -> &CorrelationIds {
        &self.correlation
    }

    pub fn set_correlation(&mut self, correlation: CorrelationIds) {
        self.correlation = correlation;
    }

    pub fn registry(&self) -> &InterceptionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut InterceptionRegistry {
        &mut self.registry
    }

    pub fn stats(&self) -> &StatsMap {
        &self.stats
    }

    /// Drop recorded stats. Returns still pending are no longer recorded.
    pub fn clear_stats(&mut self) {
        self.stats.clear();
        for pending in self.pending.values_mut() {
            pending.call = None;
        }
    }

    pub fn heap(&self) -> &HeapTracker {
        &self.heap
    }

    pub fn dealloc_function(&self) -> &str {
        &self.dealloc_function
    }

    pub fn alloc_functions(&self) -> impl Iterator<Item = &String> {
        self.alloc_functions.iter()
    }

    /// Addresses the target released itself since the last call
    pub fn take_released(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.released_by_target)
    }

    pub fn pending_returns(&self) -> usize {
        self.pending.len()
    }

    /// Drop return traps that can no longer fire
    pub fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!("Discarding {} pending return traps", self.pending.len());
            self.pending.clear();
        }
    }

    fn handle_stop(&mut self, target: &mut dyn StoppedTarget) -> Result<()> {
        let location = target.function().to_string();
        let watched = self.registry.is_watched(&location);
        let mut args = target.frame_arguments();
        if args.is_none() {
            debug!("Arguments of {} unavailable, call left out of stats", location);
        }

        let forced = match self.registry.active_failure_mut(&location) {
            Some(failure) => {
                let occurrence = failure.calls_seen();
                failure.fires().then(|| (occurrence, failure.clone()))
            }
            None => None,
        };

        if location == self.dealloc_function && forced.is_none() {
            self.observe_release(&location, args.as_deref());
        }

        if let Some((occurrence, failure)) = forced {
            self.force(target, &location, watched, args.as_mut(), occurrence, &failure)?;
            if let (true, Some(args)) = (watched, args) {
                let stats = self.stats.entry(&location);
                let call = stats.record_call(args);
                stats.record_return(call, failure.forced_return.clone());
            }
            return Ok(());
        }

        let allocation_size = if watched && self.alloc_functions.contains(&location) {
            args.as_deref().and_then(requested_size)
        } else {
            None
        };
        let call = match args {
            Some(args) if watched => Some(self.stats.entry(&location).record_call(args)),
            _ => None,
        };
        if !watched && allocation_size.is_none() {
            return Ok(());
        }

        match target.arm_return_trap() {
            Ok(trap) => {
                self.pending.insert(
                    trap,
                    PendingReturn {
                        location,
                        call,
                        allocation_size,
                    },
                );
            }
            Err(TrapUnavailable::SyntheticCaller) => {
                debug!("{} called from a synthetic frame, return not captured", location);
            }
            Err(TrapUnavailable::Unsupported(reason)) => {
                warn!("Cannot trap return of {}: {}", location, reason);
                audit::return_trap_unavailable(&self.correlation, &location, &reason);
            }
        }
        Ok(())
    }

    fn force(
        &mut self,
        target: &mut dyn StoppedTarget,
        location: &str,
        watched: bool,
        mut args: Option<&mut Vec<ArgSnapshot>>,
        occurrence: usize,
        failure: &ArmedFailure,
    ) -> Result<()> {
        if let Some(errno) = failure.errno {
            if let Err(e) = target.write_errno(errno) {
                warn!("Failed to set errno={} in {}: {}", errno, location, e);
                audit::errno_injection_failed(&self.correlation, location, errno, &e.to_string());
            }
        }

        for (index, replacement) in &failure.arg_overrides {
            let snapshot = args.as_deref_mut().and_then(|args| args.get_mut(*index));
            let Some(snapshot) = snapshot else {
                warn!(
                    "Argument {} of {} unavailable, override skipped",
                    index, location
                );
                continue;
            };
            match snapshot.value.address() {
                Ok(address) if address != 0 => {
                    target.write_memory(address, &replacement.bytes)?;
                    snapshot.pointee = match &replacement.value {
                        Some(value) => Some(value.clone()),
                        None => raw_pointee(target, &replacement.bytes),
                    };
                }
                _ => warn!(
                    "Argument {} of {} is not a valid pointer, override skipped",
                    index, location
                ),
            }
        }

        target.force_return(failure.forced_return.as_ref())?;
        debug!(
            "Forced return from {} (call #{}, watched: {})",
            location, occurrence, watched
        );
        audit::failure_injected(&self.correlation, location, occurrence);
        Ok(())
    }

    fn observe_release(&mut self, location: &str, args: Option<&[ArgSnapshot]>) {
        let address = args
            .and_then(|args| args.first())
            .and_then(|arg| arg.value.address().ok());
        match address {
            Some(0) => {}
            Some(address) => {
                if self.heap.release(address).is_none() {
                    debug!("{}({:#x}) on an untracked block", location, address);
                }
                self.released_by_target.push(address);
            }
            None => warn!("{} called without a readable address", location),
        }
    }
}

/// Byte count asked of an allocation primitive: `malloc(n)` or `calloc(n, size)`
fn requested_size(args: &[ArgSnapshot]) -> Option<usize> {
    let sizes: Vec<u64> = args.iter().filter_map(|arg| arg.value.as_u64().ok()).collect();
    let total = match sizes.as_slice() {
        [size] => *size,
        [count, size] => count.checked_mul(*size)?,
        _ => return None,
    };
    usize::try_from(total).ok()
}

fn raw_pointee(target: &dyn StoppedTarget, bytes: &[u8]) -> Option<EncodedValue> {
    let byte = target.resolve_type("unsigned char").ok()?;
    Some(EncodedValue::new(
        byte.array_of(bytes.len()),
        bytes.to_vec(),
        target.byte_order(),
    ))
}

impl StopHandler for Interceptor {
    fn on_breakpoint(&mut self, target: &mut dyn StoppedTarget) -> Result<()> {
        if self.in_stop {
            debug!(
                "Ignoring stop in {} while another stop is being handled",
                target.function()
            );
            return Ok(());
        }
        self.in_stop = true;
        let result = self.handle_stop(target);
        self.in_stop = false;
        result
    }

    fn on_return(&mut self, trap: ReturnTrapId, value: Option<EncodedValue>) {
        let Some(pending) = self.pending.remove(&trap) else {
            debug!("Return trap {} is not pending", trap);
            return;
        };

        if let Some(size) = pending.allocation_size {
            match value.as_ref().and_then(|v| v.address().ok()) {
                Some(address) if address != 0 => self.heap.record(address, size),
                _ => debug!("{} returned no block", pending.location),
            }
        }
        if let Some(call) = pending.call {
            if let Some(stats) = self.stats.get_mut(&pending.location) {
                stats.record_return(call, value);
            }
        }
    }
}
