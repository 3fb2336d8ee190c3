//! Interception registry: one entry per intercepted location.
//!
//! Every `watch`/`fail` opens a scope that records its own contribution to each
//! entry. Closing a scope withdraws exactly that contribution, so a watch
//! added on top of a failure (or the reverse) survives the other being
//! removed, and scopes may be closed in any order.
//!
//! Breakpoints are owned here: a location is hooked while it has an entry or
//! is an always-on hook, and unhooked once neither holds.

use crate::config::types::{ProbeError, Result};
use crate::intercept::failure::ArmedFailure;
use crate::target::control::ProcessControl;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};

pub type ScopeId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Watch,
    Fail,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Watch => "watch",
            ScopeKind::Fail => "fail",
        }
    }
}

/// Handle for an open scope, consumed by `close`
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an interception scope stays active until it is closed"]
pub struct InterceptScope {
    id: ScopeId,
    kind: ScopeKind,
    locations: Vec<String>,
}

impl InterceptScope {
    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }
}

/// Observable state of one location
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Untouched,
    Watching,
    Failing,
    WatchingAndFailing,
}

/// Live binding of one location to the scopes acting on it
#[derive(Clone, Debug, Default)]
pub struct InterceptionEntry {
    watchers: BTreeSet<ScopeId>,
    /// Most recently opened failure wins
    failures: Vec<(ScopeId, ArmedFailure)>,
}

impl InterceptionEntry {
    pub fn is_watched(&self) -> bool {
        !self.watchers.is_empty()
    }

    pub fn failure(&self) -> Option<&ArmedFailure> {
        self.failures.last().map(|(_, failure)| failure)
    }

    pub fn failure_mut(&mut self) -> Option<&mut ArmedFailure> {
        self.failures.last_mut().map(|(_, failure)| failure)
    }

    pub fn state(&self) -> EntryState {
        match (self.is_watched(), self.failure().is_some()) {
            (false, false) => EntryState::Untouched,
            (true, false) => EntryState::Watching,
            (false, true) => EntryState::Failing,
            (true, true) => EntryState::WatchingAndFailing,
        }
    }

    fn is_idle(&self) -> bool {
        self.watchers.is_empty() && self.failures.is_empty()
    }

    fn withdraw(&mut self, scope: ScopeId) {
        self.watchers.remove(&scope);
        self.failures.retain(|(id, _)| *id != scope);
    }
}

#[derive(Debug, Default)]
pub struct InterceptionRegistry {
    entries: BTreeMap<String, InterceptionEntry>,
    always_on: BTreeSet<String>,
    open: BTreeMap<ScopeId, Vec<String>>,
    next_scope: ScopeId,
}

impl InterceptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, location: &str) -> Option<&InterceptionEntry> {
        self.entries.get(location)
    }

    pub fn state(&self, location: &str) -> EntryState {
        self.entries
            .get(location)
            .map_or(EntryState::Untouched, InterceptionEntry::state)
    }

    pub fn is_watched(&self, location: &str) -> bool {
        self.entries
            .get(location)
            .map_or(false, InterceptionEntry::is_watched)
    }

    pub fn active_failure_mut(&mut self, location: &str) -> Option<&mut ArmedFailure> {
        self.entries
            .get_mut(location)
            .and_then(InterceptionEntry::failure_mut)
    }

    pub fn is_always_on(&self, location: &str) -> bool {
        self.always_on.contains(location)
    }

    /// Locations that currently need a breakpoint
    pub fn hooked_locations(&self) -> BTreeSet<String> {
        self.entries
            .keys()
            .chain(self.always_on.iter())
            .cloned()
            .collect()
    }

    pub fn open_scopes(&self) -> usize {
        self.open.len()
    }

    /// Hook `location` for the registry's whole lifetime, independent of scopes
    pub fn hook_always<E: ProcessControl + ?Sized>(
        &mut self,
        engine: &mut E,
        location: &str,
    ) -> Result<()> {
        if !self.needs_breakpoint(location) {
            engine.set_breakpoint(location)?;
        }
        self.always_on.insert(location.to_string());
        Ok(())
    }

    pub fn watch<E: ProcessControl + ?Sized>(
        &mut self,
        engine: &mut E,
        locations: &[String],
    ) -> Result<InterceptScope> {
        let id = self.allocate_scope();
        let mut unique: Vec<String> = Vec::with_capacity(locations.len());
        for location in locations {
            if !unique.contains(location) {
                unique.push(location.clone());
            }
        }

        let mut hooked = Vec::new();
        for location in &unique {
            if let Err(e) = self.ensure_hooked(engine, location, &mut hooked) {
                self.rollback_hooks(engine, &hooked);
                return Err(e);
            }
        }
        for location in &unique {
            self.entries
                .entry(location.clone())
                .or_default()
                .watchers
                .insert(id);
        }
        self.open.insert(id, unique.clone());
        debug!("Scope {} watches {:?}", id, unique);

        Ok(InterceptScope {
            id,
            kind: ScopeKind::Watch,
            locations: unique,
        })
    }

    pub fn fail<E: ProcessControl + ?Sized>(
        &mut self,
        engine: &mut E,
        failure: ArmedFailure,
    ) -> Result<InterceptScope> {
        let id = self.allocate_scope();
        let location = failure.location.clone();

        let mut hooked = Vec::new();
        self.ensure_hooked(engine, &location, &mut hooked)?;
        self.entries
            .entry(location.clone())
            .or_default()
            .failures
            .push((id, failure));
        self.open.insert(id, vec![location.clone()]);
        debug!("Scope {} fails {}", id, location);

        Ok(InterceptScope {
            id,
            kind: ScopeKind::Fail,
            locations: vec![location],
        })
    }

    /// Withdraw everything `scope` contributed. Locations left without
    /// watchers or failures are unhooked.
    pub fn close<E: ProcessControl + ?Sized>(
        &mut self,
        engine: &mut E,
        scope: InterceptScope,
    ) -> Result<()> {
        let locations = self.open.remove(&scope.id).ok_or_else(|| {
            ProbeError::usage(format!("interception scope {} is not open", scope.id))
        })?;

        let mut first_error = None;
        for location in locations {
            let idle = match self.entries.get_mut(&location) {
                Some(entry) => {
                    entry.withdraw(scope.id);
                    entry.is_idle()
                }
                None => false,
            };
            if idle {
                self.entries.remove(&location);
                if !self.always_on.contains(&location) {
                    if let Err(e) = engine.remove_breakpoint(&location) {
                        warn!("Failed to remove breakpoint on {}: {}", location, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        debug!("Scope {} closed", scope.id);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close every open scope, newest first, and drop the always-on hooks
    pub fn clear<E: ProcessControl + ?Sized>(&mut self, engine: &mut E) -> Result<()> {
        let mut first_error = None;
        let open: Vec<(ScopeId, Vec<String>)> =
            self.open.iter().rev().map(|(id, l)| (*id, l.clone())).collect();
        for (id, locations) in open {
            let scope = InterceptScope {
                id,
                kind: ScopeKind::Watch,
                locations,
            };
            if let Err(e) = self.close(engine, scope) {
                first_error.get_or_insert(e);
            }
        }
        for location in std::mem::take(&mut self.always_on) {
            if let Err(e) = engine.remove_breakpoint(&location) {
                warn!("Failed to remove breakpoint on {}: {}", location, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn allocate_scope(&mut self) -> ScopeId {
        let id = self.next_scope;
        self.next_scope += 1;
        id
    }

    fn needs_breakpoint(&self, location: &str) -> bool {
        self.entries.contains_key(location) || self.always_on.contains(location)
    }

    fn ensure_hooked<E: ProcessControl + ?Sized>(
        &self,
        engine: &mut E,
        location: &str,
        hooked: &mut Vec<String>,
    ) -> Result<()> {
        if !self.needs_breakpoint(location) {
            engine.set_breakpoint(location)?;
            hooked.push(location.to_string());
        }
        Ok(())
    }

    fn rollback_hooks<E: ProcessControl + ?Sized>(&self, engine: &mut E, hooked: &[String]) {
        for location in hooked {
            if let Err(e) = engine.remove_breakpoint(location) {
                warn!("Failed to roll back breakpoint on {}: {}", location, e);
            }
        }
    }
}
