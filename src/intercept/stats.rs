//! Per-location call statistics visible to the harness.

use crate::values::encoded::EncodedValue;
use std::collections::BTreeMap;
use std::ops::Index;

/// One argument captured at a call
#[derive(Clone, Debug, PartialEq)]
pub struct ArgSnapshot {
    pub name: String,
    pub value: EncodedValue,
    /// Contents written through this pointer argument by a failure override
    pub pointee: Option<EncodedValue>,
}

impl ArgSnapshot {
    pub fn new<S: Into<String>>(name: S, value: EncodedValue) -> Self {
        Self {
            name: name.into(),
            value,
            pointee: None,
        }
    }
}

/// Calls observed at one watched location.
/// `args[i]` and `returns[i]` belong to the i-th recorded call.
#[derive(Clone, Debug, PartialEq)]
pub struct FuncStats {
    pub location: String,
    pub called: usize,
    pub args: Vec<Vec<ArgSnapshot>>,
    /// None for a forced void return, a call whose return could not be
    /// trapped, or a call that has not returned yet
    pub returns: Vec<Option<EncodedValue>>,
}

impl FuncStats {
    fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            called: 0,
            args: Vec::new(),
            returns: Vec::new(),
        }
    }

    /// Count a call together with its arguments. Returns the call's index.
    pub(crate) fn record_call(&mut self, args: Vec<ArgSnapshot>) -> usize {
        self.called += 1;
        self.args.push(args);
        self.returns.push(None);
        self.called - 1
    }

    pub(crate) fn record_return(&mut self, call: usize, value: Option<EncodedValue>) {
        if let Some(slot) = self.returns.get_mut(call) {
            *slot = value;
        }
    }

    /// Argument `index` of call `call`
    pub fn arg(&self, call: usize, index: usize) -> Option<&ArgSnapshot> {
        self.args.get(call).and_then(|args| args.get(index))
    }

    pub fn return_value(&self, call: usize) -> Option<&EncodedValue> {
        self.returns.get(call).and_then(Option::as_ref)
    }
}

/// Stats for every watched location, created lazily on the first recorded call
#[derive(Clone, Debug, Default)]
pub struct StatsMap {
    entries: BTreeMap<String, FuncStats>,
}

impl StatsMap {
    pub fn get(&self, location: &str) -> Option<&FuncStats> {
        self.entries.get(location)
    }

    pub fn contains(&self, location: &str) -> bool {
        self.entries.contains_key(location)
    }

    /// Call count, 0 for a location never recorded
    pub fn called(&self, location: &str) -> usize {
        self.entries.get(location).map_or(0, |s| s.called)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FuncStats> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn entry(&mut self, location: &str) -> &mut FuncStats {
        self.entries
            .entry(location.to_string())
            .or_insert_with(|| FuncStats::new(location))
    }

    pub(crate) fn get_mut(&mut self, location: &str) -> Option<&mut FuncStats> {
        self.entries.get_mut(location)
    }
}

impl Index<&str> for StatsMap {
    type Output = FuncStats;

    /// Panics when `location` was never recorded
    fn index(&self, location: &str) -> &FuncStats {
        match self.entries.get(location) {
            Some(stats) => stats,
            None => panic!("no stats recorded for `{}`", location),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::types::{ByteOrder, TargetType, TypeKind};

    fn int(v: i128) -> EncodedValue {
        EncodedValue::from_int(
            TargetType::new("int", 4, 4, TypeKind::Int { signed: true }),
            v,
            ByteOrder::Little,
        )
    }

    #[test]
    fn test_calls_and_returns_stay_aligned() {
        let mut stats = StatsMap::default();
        let first = stats.entry("f").record_call(vec![ArgSnapshot::new("x", int(1))]);
        let second = stats.entry("f").record_call(vec![ArgSnapshot::new("x", int(2))]);
        stats.entry("f").record_return(second, Some(int(20)));

        let f = &stats["f"];
        assert_eq!(f.called, 2);
        assert_eq!(f.args.len(), 2);
        assert_eq!(f.returns.len(), 2);
        assert!(f.return_value(first).is_none());
        assert_eq!(f.return_value(second).unwrap().as_i64().unwrap(), 20);
        assert_eq!(f.arg(1, 0).unwrap().value.as_i64().unwrap(), 2);
    }

    #[test]
    fn test_unknown_location() {
        let stats = StatsMap::default();
        assert_eq!(stats.called("nope"), 0);
        assert!(stats.get("nope").is_none());
    }

    #[test]
    #[should_panic(expected = "no stats recorded")]
    fn test_index_panics_for_unknown_location() {
        let stats = StatsMap::default();
        let _ = &stats["nope"];
    }
}
