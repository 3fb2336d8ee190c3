//! Fault-injection specifications.
//!
//! A [`FailureSpec`] is what the caller asks for. Arming it against the
//! function's signature encodes every template up front, so nothing has to be
//! encoded or allocated while the target is stopped inside the call.

use crate::config::types::{ProbeError, Result};
use crate::target::control::RemoteHeap;
use crate::target::types::{FunctionSignature, TargetType};
use crate::values::encoded::EncodedValue;
use crate::values::marshaller::ValueMarshaller;
use crate::values::template::ValueTemplate;
use log::warn;
use std::collections::{BTreeMap, BTreeSet};

/// Replacement contents for the memory a pointer argument points to
#[derive(Clone, Debug, PartialEq)]
pub enum ArgOverride {
    /// Encoded against the parameter's pointee type
    Template(ValueTemplate),
    /// Written verbatim
    Bytes(Vec<u8>),
}

/// Requested outcome of an intercepted call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FailureSpec {
    pub returning: Option<ValueTemplate>,
    pub errno: Option<i32>,
    pub arg_overrides: BTreeMap<usize, ArgOverride>,
    /// 0-based call occurrences that fail; every call fails when unset
    pub when: Option<BTreeSet<usize>>,
}

impl FailureSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the call to return `value`
    pub fn returning<T: Into<ValueTemplate>>(mut self, value: T) -> Self {
        self.returning = Some(value.into());
        self
    }

    /// Set errno when the failure fires
    pub fn errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }

    /// Overwrite what pointer argument `index` points to
    pub fn override_arg<T: Into<ValueTemplate>>(mut self, index: usize, value: T) -> Self {
        self.arg_overrides
            .insert(index, ArgOverride::Template(value.into()));
        self
    }

    pub fn override_arg_bytes(mut self, index: usize, bytes: Vec<u8>) -> Self {
        self.arg_overrides.insert(index, ArgOverride::Bytes(bytes));
        self
    }

    /// Only fail on these call occurrences
    pub fn when<I: IntoIterator<Item = usize>>(mut self, calls: I) -> Self {
        self.when = Some(calls.into_iter().collect());
        self
    }

    /// Encode the failure against `signature`
    pub fn arm(
        &self,
        signature: &FunctionSignature,
        heap: &mut dyn RemoteHeap,
        marshaller: &mut ValueMarshaller,
    ) -> Result<ArmedFailure> {
        let location = signature.name.clone();

        if let (Some(_), None) = (&self.returning, &signature.return_type) {
            return Err(ProbeError::usage(format!(
                "`{}` returns void, a forced return value makes no sense",
                location
            )));
        }

        let mut targets = Vec::with_capacity(self.arg_overrides.len());
        for (index, replacement) in &self.arg_overrides {
            let param = signature.param(*index).ok_or_else(|| {
                ProbeError::usage(format!(
                    "`{}` has {} parameters, cannot override argument {}",
                    location,
                    signature.params.len(),
                    index
                ))
            })?;
            let pointee = param.ty.pointee().ok_or_else(|| {
                ProbeError::usage(format!(
                    "argument {} (`{}`) of `{}` is not a pointer",
                    index, param.name, location
                ))
            })?;
            let resolved = match replacement {
                ArgOverride::Bytes(bytes) => ResolvedOverride::Bytes(bytes),
                ArgOverride::Template(template) => {
                    ResolvedOverride::Template(template, heap.resolve_type(pointee)?)
                }
            };
            targets.push((*index, resolved));
        }

        // Nothing below is a usage error, encoding may allocate
        let forced_return = match (&self.returning, &signature.return_type) {
            (Some(template), Some(ty)) => Some(marshaller.encode(heap, ty, template)?),
            _ => None,
        };

        let mut arg_overrides = BTreeMap::new();
        for (index, resolved) in targets {
            let encoded = match resolved {
                ResolvedOverride::Bytes(bytes) => EncodedOverride {
                    bytes: bytes.clone(),
                    value: None,
                },
                ResolvedOverride::Template(template, pointee_ty) => {
                    let value = marshaller.encode(heap, &pointee_ty, template)?;
                    EncodedOverride {
                        bytes: value.bytes().to_vec(),
                        value: Some(value),
                    }
                }
            };
            arg_overrides.insert(index, encoded);
        }

        if matches!(&self.when, Some(calls) if calls.is_empty()) {
            warn!("Failure on `{}` has an empty `when` set and never fires", location);
        }

        Ok(ArmedFailure {
            location,
            forced_return,
            void_return: signature.return_type.is_none(),
            errno: self.errno,
            arg_overrides,
            when: self.when.clone(),
            calls: 0,
        })
    }
}

/// Override whose parameter was checked but not yet encoded
enum ResolvedOverride<'a> {
    Bytes(&'a Vec<u8>),
    Template(&'a ValueTemplate, TargetType),
}

/// Pre-encoded pointee replacement
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedOverride {
    pub bytes: Vec<u8>,
    pub value: Option<EncodedValue>,
}

/// A failure bound to a location, with its private call counter
#[derive(Clone, Debug, PartialEq)]
pub struct ArmedFailure {
    pub location: String,
    pub forced_return: Option<EncodedValue>,
    pub void_return: bool,
    pub errno: Option<i32>,
    pub arg_overrides: BTreeMap<usize, EncodedOverride>,
    pub when: Option<BTreeSet<usize>>,
    calls: usize,
}

impl ArmedFailure {
    /// Force an immediate return from `location` with no value, errno or overrides
    pub fn for_location<S: Into<String>>(location: S) -> Self {
        Self {
            location: location.into(),
            forced_return: None,
            void_return: false,
            errno: None,
            arg_overrides: BTreeMap::new(),
            when: None,
            calls: 0,
        }
    }

    /// Consult the `when` set for this invocation and advance the counter
    pub fn fires(&mut self) -> bool {
        let occurrence = self.calls;
        self.calls += 1;
        match &self.when {
            None => true,
            Some(calls) => calls.contains(&occurrence),
        }
    }

    /// Invocations seen since the failure was armed
    pub fn calls_seen(&self) -> usize {
        self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed(when: Option<BTreeSet<usize>>) -> ArmedFailure {
        ArmedFailure {
            when,
            ..ArmedFailure::for_location("f")
        }
    }

    #[test]
    fn test_fires_every_call_without_when() {
        let mut failure = armed(None);
        assert!((0..5).all(|_| failure.fires()));
        assert_eq!(failure.calls_seen(), 5);
    }

    #[test]
    fn test_when_selects_occurrences() {
        let mut failure = armed(Some([0, 1, 4, 7, 4, 2].into_iter().collect()));
        let fired: Vec<bool> = (0..9).map(|_| failure.fires()).collect();
        assert_eq!(
            fired,
            vec![true, true, true, false, true, false, false, true, false]
        );
    }

    #[test]
    fn test_builder() {
        let spec = FailureSpec::new()
            .returning(-1)
            .errno(libc::ENOENT)
            .override_arg_bytes(1, vec![0xff])
            .when([0, 2]);
        assert_eq!(spec.returning, Some(ValueTemplate::int(-1)));
        assert_eq!(spec.errno, Some(libc::ENOENT));
        assert_eq!(spec.arg_overrides.len(), 1);
        assert_eq!(spec.when.unwrap().len(), 2);
    }
}
