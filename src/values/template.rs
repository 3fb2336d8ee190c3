//! Value templates: caller-built descriptions of values to materialize in the target.

use crate::config::types::{ProbeError, Result};
use serde_json::Value as JsonValue;

/// Scalar leaf of a template
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Int(i128),
    Float(f64),
    Char(char),
}

/// Description of a value, encoded against a target type by the marshaller
#[derive(Clone, Debug, PartialEq)]
pub enum ValueTemplate {
    Scalar(Scalar),
    /// Address used verbatim for a pointer, never allocated
    RawAddress(u64),
    Array(Vec<ValueTemplate>),
    /// Every member of the struct, by name
    Struct(Vec<(String, ValueTemplate)>),
    /// Members written in order at offset 0; the last one written wins
    Union(Vec<(String, ValueTemplate)>),
    /// Text encoded as a NUL-terminated character array. Also names an
    /// enumerator of an enum type, or a single character for a char type.
    StringBytes(String),
}

impl ValueTemplate {
    pub fn int<T: Into<i128>>(value: T) -> Self {
        ValueTemplate::Scalar(Scalar::Int(value.into()))
    }

    pub fn float(value: f64) -> Self {
        ValueTemplate::Scalar(Scalar::Float(value))
    }

    pub fn character(value: char) -> Self {
        ValueTemplate::Scalar(Scalar::Char(value))
    }

    /// Null pointer
    pub fn null() -> Self {
        ValueTemplate::RawAddress(0)
    }

    pub fn address(address: u64) -> Self {
        ValueTemplate::RawAddress(address)
    }

    pub fn string<S: Into<String>>(text: S) -> Self {
        ValueTemplate::StringBytes(text.into())
    }

    pub fn array<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ValueTemplate>,
    {
        ValueTemplate::Array(items.into_iter().map(Into::into).collect())
    }

    pub fn fields<I, K, T>(members: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Into<ValueTemplate>,
    {
        ValueTemplate::Struct(
            members
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn union_of<I, K, T>(members: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Into<ValueTemplate>,
    {
        ValueTemplate::Union(
            members
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Shape name used in error messages
    pub fn shape_name(&self) -> &'static str {
        match self {
            ValueTemplate::Scalar(Scalar::Int(_)) => "integer",
            ValueTemplate::Scalar(Scalar::Float(_)) => "float",
            ValueTemplate::Scalar(Scalar::Char(_)) => "character",
            ValueTemplate::RawAddress(_) => "raw address",
            ValueTemplate::Array(_) => "array",
            ValueTemplate::Struct(_) => "struct mapping",
            ValueTemplate::Union(_) => "union mapping",
            ValueTemplate::StringBytes(_) => "string",
        }
    }

    /// Members of a struct or union mapping
    pub fn members(&self) -> Option<&[(String, ValueTemplate)]> {
        match self {
            ValueTemplate::Struct(members) | ValueTemplate::Union(members) => Some(members),
            _ => None,
        }
    }

    /// Dimensions of a nested array template, outer to inner, following the
    /// first element at each level
    pub fn array_dims(&self) -> Vec<usize> {
        let mut dims = Vec::new();
        let mut current = self;
        while let ValueTemplate::Array(items) = current {
            dims.push(items.len());
            match items.first() {
                Some(first) => current = first,
                None => break,
            }
        }
        dims
    }

    /// Build a template from JSON.
    ///
    /// `null` is a null pointer, `{"$addr": n}` a raw address and
    /// `{"$union": {...}}` a union mapping; other objects are struct mappings.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        Ok(match value {
            JsonValue::Null => ValueTemplate::null(),
            JsonValue::Bool(b) => ValueTemplate::int(i32::from(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ValueTemplate::int(i)
                } else if let Some(u) = n.as_u64() {
                    ValueTemplate::int(u)
                } else {
                    ValueTemplate::float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => ValueTemplate::StringBytes(s.clone()),
            JsonValue::Array(items) => ValueTemplate::Array(
                items
                    .iter()
                    .map(ValueTemplate::from_json)
                    .collect::<Result<_>>()?,
            ),
            JsonValue::Object(map) => {
                if let Some(addr) = map.get("$addr") {
                    let addr = addr.as_u64().ok_or_else(|| {
                        ProbeError::usage("`$addr` must be a non-negative integer")
                    })?;
                    return Ok(ValueTemplate::RawAddress(addr));
                }
                if let Some(JsonValue::Object(members)) = map.get("$union") {
                    return Ok(ValueTemplate::Union(
                        members
                            .iter()
                            .map(|(k, v)| Ok((k.clone(), ValueTemplate::from_json(v)?)))
                            .collect::<Result<_>>()?,
                    ));
                }
                ValueTemplate::Struct(
                    map.iter()
                        .map(|(k, v)| Ok((k.clone(), ValueTemplate::from_json(v)?)))
                        .collect::<Result<_>>()?,
                )
            }
        })
    }
}

macro_rules! int_template {
    ($($t:ty),*) => {
        $(impl From<$t> for ValueTemplate {
            fn from(value: $t) -> Self {
                ValueTemplate::int(value)
            }
        })*
    };
}

int_template!(i8, i16, i32, i64, u8, u16, u32, u64);

impl From<usize> for ValueTemplate {
    fn from(value: usize) -> Self {
        ValueTemplate::int(value as u64)
    }
}

impl From<bool> for ValueTemplate {
    fn from(value: bool) -> Self {
        ValueTemplate::int(i32::from(value))
    }
}

impl From<f64> for ValueTemplate {
    fn from(value: f64) -> Self {
        ValueTemplate::float(value)
    }
}

impl From<f32> for ValueTemplate {
    fn from(value: f32) -> Self {
        ValueTemplate::float(f64::from(value))
    }
}

impl From<char> for ValueTemplate {
    fn from(value: char) -> Self {
        ValueTemplate::character(value)
    }
}

impl From<&str> for ValueTemplate {
    fn from(value: &str) -> Self {
        ValueTemplate::string(value)
    }
}

impl From<String> for ValueTemplate {
    fn from(value: String) -> Self {
        ValueTemplate::StringBytes(value)
    }
}

impl<T: Into<ValueTemplate>> From<Vec<T>> for ValueTemplate {
    fn from(items: Vec<T>) -> Self {
        ValueTemplate::array(items)
    }
}

impl<T: Into<ValueTemplate>> From<Option<T>> for ValueTemplate {
    /// `None` is a null pointer
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(ValueTemplate::null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_dims() {
        let t = ValueTemplate::from(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert_eq!(t.array_dims(), vec![2, 3]);
        assert_eq!(ValueTemplate::from(7).array_dims(), Vec::<usize>::new());
    }

    #[test]
    fn test_from_json_shapes() {
        let t = ValueTemplate::from_json(&json!({"value": 42, "next": null})).unwrap();
        assert_eq!(
            t,
            ValueTemplate::fields([
                ("value", ValueTemplate::int(42)),
                ("next", ValueTemplate::null())
            ])
        );

        let t = ValueTemplate::from_json(&json!({"$addr": 4096})).unwrap();
        assert_eq!(t, ValueTemplate::RawAddress(4096));

        let t = ValueTemplate::from_json(&json!({"$union": {"c": 1, "l": 421}})).unwrap();
        assert_eq!(
            t,
            ValueTemplate::union_of([("c", 1), ("l", 421)])
        );
    }

    #[test]
    fn test_from_json_rejects_negative_address() {
        assert!(ValueTemplate::from_json(&json!({"$addr": -1})).is_err());
    }

    #[test]
    fn test_option_is_nullable_pointer() {
        assert_eq!(ValueTemplate::from(None::<i32>), ValueTemplate::null());
        assert_eq!(ValueTemplate::from(Some(3)), ValueTemplate::int(3));
    }
}
