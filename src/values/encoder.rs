//! Template → ABI bytes compiler.
//!
//! Encoding happens in two passes. [`Encoder::plan`] resolves every type and
//! checks every template shape without touching the target, producing an
//! [`EncodingPlan`]. Only a plan that was built completely is ever emitted, so
//! a mismatch deep inside a pointer graph leaves nothing allocated.

use crate::config::types::{EncodingError, ProbeError, Result};
use crate::target::catalog::align_up;
use crate::target::control::TypeResolver;
use crate::target::types::{ByteOrder, Field, TargetType, TypeKind};
use crate::values::encoded::encode_uint;
use crate::values::template::{Scalar, ValueTemplate};

/// One node of an encoding plan
#[derive(Clone, Debug, PartialEq)]
pub enum PlanNode {
    Bytes(Vec<u8>),
    Zeros(usize),
    Concat(Vec<PlanNode>),
    /// Layers written at offset 0 in order over `size` zero bytes
    Overlay { size: usize, layers: Vec<PlanNode> },
    /// Contents placed in a fresh target allocation; the node encodes its address
    Allocate {
        contents: Box<PlanNode>,
        pointer_size: usize,
    },
}

impl PlanNode {
    /// Encoded length of this node in its parent
    pub fn len(&self) -> usize {
        match self {
            PlanNode::Bytes(bytes) => bytes.len(),
            PlanNode::Zeros(n) => *n,
            PlanNode::Concat(nodes) => nodes.iter().map(PlanNode::len).sum(),
            PlanNode::Overlay { size, .. } => *size,
            PlanNode::Allocate { pointer_size, .. } => *pointer_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of target allocations emitting this node performs
    pub fn allocation_count(&self) -> usize {
        match self {
            PlanNode::Bytes(_) | PlanNode::Zeros(_) => 0,
            PlanNode::Concat(nodes) => nodes.iter().map(PlanNode::allocation_count).sum(),
            PlanNode::Overlay { layers, .. } => {
                layers.iter().map(PlanNode::allocation_count).sum()
            }
            PlanNode::Allocate { contents, .. } => 1 + contents.allocation_count(),
        }
    }

    /// Flatten a node that needs no allocation
    pub fn flatten(&self, out: &mut Vec<u8>) -> Option<()> {
        match self {
            PlanNode::Bytes(bytes) => out.extend_from_slice(bytes),
            PlanNode::Zeros(n) => out.resize(out.len() + n, 0),
            PlanNode::Concat(nodes) => {
                for node in nodes {
                    node.flatten(out)?;
                }
            }
            PlanNode::Overlay { size, layers } => {
                let mut buf = vec![0u8; *size];
                for layer in layers {
                    let mut bytes = Vec::new();
                    layer.flatten(&mut bytes)?;
                    overlay(&mut buf, &bytes);
                }
                out.extend_from_slice(&buf);
            }
            PlanNode::Allocate { .. } => return None,
        }
        Some(())
    }
}

/// Write `layer` at offset 0 of `buf`
pub(crate) fn overlay(buf: &mut [u8], layer: &[u8]) {
    let n = layer.len().min(buf.len());
    buf[..n].copy_from_slice(&layer[..n]);
}

/// A fully validated encoding: the concrete type and the plan to produce it
#[derive(Clone, Debug, PartialEq)]
pub struct EncodingPlan {
    pub ty: TargetType,
    pub root: PlanNode,
    pub byte_order: ByteOrder,
}

impl EncodingPlan {
    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn allocation_count(&self) -> usize {
        self.root.allocation_count()
    }

    /// Bytes of a plan that performs no allocation
    pub fn static_bytes(&self) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len());
        self.root.flatten(&mut out)?;
        Some(out)
    }
}

/// Plans encodings against types supplied by a resolver
pub struct Encoder<'a, R: TypeResolver + ?Sized> {
    resolver: &'a R,
    byte_order: ByteOrder,
}

impl<'a, R: TypeResolver + ?Sized> Encoder<'a, R> {
    pub fn new(resolver: &'a R) -> Self {
        Self {
            byte_order: resolver.byte_order(),
            resolver,
        }
    }

    /// Plan `template` as a value of `ty`. A nested array template given for
    /// a non-array type is an array of that type whose dimensions come from
    /// the template's nesting.
    pub fn plan(&self, ty: &TargetType, template: &ValueTemplate) -> Result<EncodingPlan> {
        let (root, ty) = self.plan_node(ty, template, true)?;
        Ok(EncodingPlan {
            ty,
            root,
            byte_order: self.byte_order,
        })
    }

    pub fn plan_named(&self, type_name: &str, template: &ValueTemplate) -> Result<EncodingPlan> {
        let ty = self.resolver.resolve_type(type_name)?;
        self.plan(&ty, template)
    }

    fn plan_node(
        &self,
        ty: &TargetType,
        template: &ValueTemplate,
        root: bool,
    ) -> Result<(PlanNode, TargetType)> {
        match &ty.kind {
            TypeKind::Array { element, length } => {
                self.plan_array(ty, element, *length, template, root)
            }
            _ if root && matches!(template, ValueTemplate::Array(_)) && !ty.is_pointer() => {
                let inferred = infer_array_type(ty, template);
                self.plan_node(&inferred, template, false)
            }
            TypeKind::Void => Err(unsupported(ty, "void has no values")),
            TypeKind::Bool | TypeKind::Int { .. } => {
                let value = self.expect_int(ty, template)?;
                Ok((self.int_bytes(ty, value)?, ty.clone()))
            }
            TypeKind::Char { .. } => {
                let value = match template {
                    ValueTemplate::Scalar(Scalar::Char(c)) => char_ordinal(ty, *c)?,
                    ValueTemplate::StringBytes(s) if s.chars().count() == 1 => {
                        let c = s.chars().next().unwrap_or('\0');
                        char_ordinal(ty, c)?
                    }
                    ValueTemplate::Scalar(Scalar::Int(v)) => *v,
                    other => return Err(mismatch(ty, "character", other)),
                };
                Ok((self.int_bytes(ty, value)?, ty.clone()))
            }
            TypeKind::Float => {
                let value = match template {
                    ValueTemplate::Scalar(Scalar::Float(f)) => *f,
                    ValueTemplate::Scalar(Scalar::Int(i)) => *i as f64,
                    other => return Err(mismatch(ty, "number", other)),
                };
                let raw = match ty.size {
                    4 => u128::from((value as f32).to_bits()),
                    8 => u128::from(value.to_bits()),
                    n => {
                        return Err(unsupported(ty, &format!("{}-byte floating point", n)));
                    }
                };
                Ok((
                    PlanNode::Bytes(encode_uint(raw, ty.size, self.byte_order)),
                    ty.clone(),
                ))
            }
            TypeKind::Enum { enumerators, .. } => {
                let value = match template {
                    ValueTemplate::Scalar(Scalar::Int(v)) => *v,
                    ValueTemplate::StringBytes(name) => enumerators
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| i128::from(*v))
                        .ok_or_else(|| EncodingError::UnknownEnumerator {
                            ty: ty.name.clone(),
                            name: name.clone(),
                        })?,
                    other => return Err(mismatch(ty, "integer or enumerator name", other)),
                };
                Ok((self.int_bytes(ty, value)?, ty.clone()))
            }
            TypeKind::Pointer { pointee } => {
                let node = self.plan_pointer(ty, pointee, template)?;
                Ok((node, ty.clone()))
            }
            TypeKind::Struct { fields } => {
                let members = self.expect_mapping(ty, template)?;
                self.plan_struct(ty, fields, members)
            }
            TypeKind::Union { fields } => {
                let members = self.expect_mapping(ty, template)?;
                let mut layers = Vec::with_capacity(members.len());
                for (name, member) in members {
                    let field = fields.iter().find(|f| &f.name == name).ok_or_else(|| {
                        EncodingError::UnknownField {
                            ty: ty.name.clone(),
                            field: name.clone(),
                        }
                    })?;
                    let (node, _) = self.plan_node(&field.ty, member, false)?;
                    layers.push(node);
                }
                Ok((
                    PlanNode::Overlay {
                        size: ty.size,
                        layers,
                    },
                    ty.clone(),
                ))
            }
        }
    }

    fn plan_array(
        &self,
        ty: &TargetType,
        element: &TargetType,
        length: Option<usize>,
        template: &ValueTemplate,
        root: bool,
    ) -> Result<(PlanNode, TargetType)> {
        if let ValueTemplate::StringBytes(text) = template {
            if !matches!(element.kind, TypeKind::Char { .. }) {
                return Err(mismatch(ty, "array", template));
            }
            let mut bytes = string_bytes(element, text)?;
            let concrete = match length {
                Some(length) => {
                    if bytes.len() > length {
                        return Err(EncodingError::SizeMismatch {
                            ty: ty.name.clone(),
                            expected: length * element.size,
                            actual: bytes.len(),
                        }
                        .into());
                    }
                    bytes.resize(length, 0);
                    ty.clone()
                }
                None => element.array_of(bytes.len()),
            };
            return Ok((PlanNode::Bytes(bytes), concrete));
        }

        let items = match template {
            ValueTemplate::Array(items) => items,
            other => return Err(mismatch(ty, "array", other)),
        };

        let concrete = match length {
            Some(length) if items.len() > length => {
                return Err(EncodingError::SizeMismatch {
                    ty: ty.name.clone(),
                    expected: ty.size,
                    actual: items.len() * element.size,
                }
                .into())
            }
            Some(_) => ty.clone(),
            None if root || element.size > 0 => element.array_of(items.len()),
            None => return Err(unsupported(ty, "array length cannot be inferred here")),
        };

        let mut nodes = Vec::with_capacity(items.len() + 1);
        for item in items {
            let (node, _) = self.plan_node(element, item, false)?;
            nodes.push(node);
        }
        let encoded: usize = nodes.iter().map(PlanNode::len).sum();
        if encoded < concrete.size {
            nodes.push(PlanNode::Zeros(concrete.size - encoded));
        }
        Ok((PlanNode::Concat(nodes), concrete))
    }

    fn plan_struct(
        &self,
        ty: &TargetType,
        fields: &[Field],
        members: &[(String, ValueTemplate)],
    ) -> Result<(PlanNode, TargetType)> {
        if let Some((name, _)) = members
            .iter()
            .find(|(name, _)| !fields.iter().any(|f| &f.name == name))
        {
            return Err(EncodingError::UnknownField {
                ty: ty.name.clone(),
                field: name.clone(),
            }
            .into());
        }

        // sizeof not a multiple of alignof marks a packed layout
        let cap = if ty.is_packed() { 1 } else { ty.align.max(1) };
        let mut nodes = Vec::with_capacity(fields.len() * 2);
        let mut offset = 0usize;
        let mut flexible = false;

        for (index, field) in fields.iter().enumerate() {
            let is_flexible = index + 1 == fields.len()
                && matches!(field.ty.kind, TypeKind::Array { length: None, .. });
            let member = members.iter().find(|(name, _)| name == &field.name);
            let member = match (member, is_flexible) {
                (Some((_, member)), _) => member,
                (None, true) => continue,
                (None, false) => {
                    return Err(EncodingError::MissingField {
                        ty: ty.name.clone(),
                        field: field.name.clone(),
                    }
                    .into())
                }
            };

            let aligned = align_up(offset, field.ty.align.clamp(1, cap));
            if aligned > offset {
                nodes.push(PlanNode::Zeros(aligned - offset));
                offset = aligned;
            }
            let (node, _) = self.plan_node(&field.ty, member, is_flexible)?;
            offset += node.len();
            nodes.push(node);
            flexible |= is_flexible;
        }

        let expected = if flexible {
            align_up(offset, cap).max(ty.size)
        } else {
            ty.size
        };
        if offset > expected {
            return Err(EncodingError::SizeMismatch {
                ty: ty.name.clone(),
                expected,
                actual: offset,
            }
            .into());
        }
        if offset < expected {
            nodes.push(PlanNode::Zeros(expected - offset));
        }
        Ok((PlanNode::Concat(nodes), ty.clone()))
    }

    fn plan_pointer(
        &self,
        ty: &TargetType,
        pointee: &str,
        template: &ValueTemplate,
    ) -> Result<PlanNode> {
        if let ValueTemplate::RawAddress(address) = template {
            return Ok(PlanNode::Bytes(encode_uint(
                u128::from(*address),
                ty.size,
                self.byte_order,
            )));
        }

        let target = self.resolver.resolve_type(pointee)?;
        let contents = match (template, &target.kind) {
            (ValueTemplate::StringBytes(text), TypeKind::Char { .. }) => {
                PlanNode::Bytes(string_bytes(&target, text)?)
            }
            (ValueTemplate::StringBytes(text), TypeKind::Void) => {
                let mut bytes = text.as_bytes().to_vec();
                bytes.push(0);
                PlanNode::Bytes(bytes)
            }
            (_, TypeKind::Void) => {
                return Err(unsupported(ty, "cannot build the contents of a void pointer"))
            }
            (ValueTemplate::Array(items), _) if !target.is_array() => {
                let mut nodes = Vec::with_capacity(items.len());
                for item in items {
                    let (node, _) = self.plan_node(&target, item, false)?;
                    nodes.push(node);
                }
                PlanNode::Concat(nodes)
            }
            _ => self.plan_node(&target, template, true)?.0,
        };

        Ok(PlanNode::Allocate {
            contents: Box::new(contents),
            pointer_size: ty.size,
        })
    }

    fn expect_int(&self, ty: &TargetType, template: &ValueTemplate) -> Result<i128> {
        match template {
            ValueTemplate::Scalar(Scalar::Int(v)) => Ok(*v),
            ValueTemplate::Scalar(Scalar::Char(c)) => Ok(i128::from(u32::from(*c))),
            other => Err(mismatch(ty, "integer", other)),
        }
    }

    fn expect_mapping<'t>(
        &self,
        ty: &TargetType,
        template: &'t ValueTemplate,
    ) -> Result<&'t [(String, ValueTemplate)]> {
        template
            .members()
            .ok_or_else(|| mismatch(ty, "mapping", template))
    }

    fn int_bytes(&self, ty: &TargetType, value: i128) -> Result<PlanNode> {
        check_range(ty, value)?;
        Ok(PlanNode::Bytes(encode_uint(
            value as u128,
            ty.size,
            self.byte_order,
        )))
    }
}

/// Concrete array type for a root array template given with its element type
fn infer_array_type(element: &TargetType, template: &ValueTemplate) -> TargetType {
    template
        .array_dims()
        .iter()
        .rev()
        .fold(element.clone(), |inner, length| inner.array_of(*length))
}

fn check_range(ty: &TargetType, value: i128) -> Result<()> {
    let bits = ty.size * 8;
    if bits == 0 || bits >= 128 {
        return Ok(());
    }
    let (min, max) = if ty.is_signed() {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };
    if value < min || value > max {
        return Err(EncodingError::OutOfRange {
            ty: ty.name.clone(),
            value: value.to_string(),
        }
        .into());
    }
    Ok(())
}

fn char_ordinal(ty: &TargetType, c: char) -> Result<i128> {
    let ordinal = u32::from(c);
    if ordinal > 0xFF {
        return Err(EncodingError::OutOfRange {
            ty: ty.name.clone(),
            value: format!("{:?}", c),
        }
        .into());
    }
    // Ordinals above 0x7F keep their bit pattern in a signed char
    if ty.is_signed() && ordinal > 0x7F {
        Ok(i128::from(ordinal) - 0x100)
    } else {
        Ok(i128::from(ordinal))
    }
}

/// Characters of `text` followed by NUL, one byte each
fn string_bytes(element: &TargetType, text: &str) -> Result<Vec<u8>> {
    if element.size != 1 {
        return Err(unsupported(element, "strings need one-byte characters"));
    }
    let mut bytes = Vec::with_capacity(text.len() + 1);
    for c in text.chars() {
        bytes.push(char_ordinal(element, c)? as u8);
    }
    bytes.push(0);
    Ok(bytes)
}

fn mismatch(
    ty: &TargetType,
    expected: &'static str,
    found: &ValueTemplate,
) -> ProbeError {
    EncodingError::ShapeMismatch {
        ty: ty.name.clone(),
        expected,
        found: found.shape_name(),
    }
    .into()
}

fn unsupported(ty: &TargetType, reason: &str) -> ProbeError {
    EncodingError::Unsupported {
        ty: ty.name.clone(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::catalog::TypeCatalog;

    fn catalog() -> TypeCatalog {
        TypeCatalog::lp64()
            .with_struct("pair", &[("a", "int"), ("b", "char")])
            .unwrap()
            .with_packed_struct("packed_pair", &[("a", "int"), ("b", "char")])
            .unwrap()
            .with_union("u", &[("c", "char"), ("l", "long")])
            .unwrap()
            .with_struct("node", &[("value", "int"), ("next", "struct node *")])
            .unwrap()
            .with_struct("msg", &[("len", "int"), ("data", "char[]")])
            .unwrap()
            .with_enum("color", &[("RED", 0), ("GREEN", 1), ("BLUE", 2)])
            .unwrap()
    }

    fn bytes(catalog: &TypeCatalog, ty: &str, template: ValueTemplate) -> Vec<u8> {
        Encoder::new(catalog)
            .plan_named(ty, &template)
            .unwrap()
            .static_bytes()
            .unwrap()
    }

    #[test]
    fn test_struct_trailing_padding() {
        let c = catalog();
        let out = bytes(
            &c,
            "struct pair",
            ValueTemplate::fields([("a", 1), ("b", 2)]),
        );
        assert_eq!(out, vec![1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_packed_struct_has_no_padding() {
        let c = catalog();
        let out = bytes(
            &c,
            "struct packed_pair",
            ValueTemplate::fields([("a", 1), ("b", 2)]),
        );
        assert_eq!(out, vec![1, 0, 0, 0, 2]);
    }

    #[test]
    fn test_packed_detected_from_size() {
        // sizeof 5 with alignof 4: the resolver reports a packed struct this way
        let c = catalog();
        let mut odd = c.lookup("struct pair").unwrap();
        odd.size = 5;
        let plan = Encoder::new(&c)
            .plan(&odd, &ValueTemplate::fields([("a", 1), ("b", 2)]))
            .unwrap();
        assert_eq!(plan.static_bytes().unwrap().len(), 5);
    }

    #[test]
    fn test_interior_padding() {
        let c = TypeCatalog::lp64()
            .with_struct("s", &[("c", "char"), ("d", "double")])
            .unwrap();
        let out = bytes(&c, "struct s", ValueTemplate::fields([
                ("c", ValueTemplate::character('x')),
                ("d", ValueTemplate::float(0.0)),
            ]));
        assert_eq!(out.len(), 16);
        assert_eq!(out[0], b'x');
        assert!(out[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_union_last_write_wins() {
        let c = catalog();
        let plan = Encoder::new(&c)
            .plan_named("union u", &ValueTemplate::union_of([("c", 1), ("l", 421)]))
            .unwrap();
        let out = plan.static_bytes().unwrap();
        assert_eq!(out.len(), 8);
        assert_eq!(out, 421i64.to_le_bytes().to_vec());

        let out = bytes(&c, "union u", ValueTemplate::union_of([("l", 421), ("c", 1)]));
        assert_eq!(out[0], 1);
        assert_eq!(out[1], 1);
    }

    #[test]
    fn test_root_array_dimension_inference() {
        let c = catalog();
        let plan = Encoder::new(&c)
            .plan_named("int", &ValueTemplate::from(vec![vec![1, 2, 3], vec![4, 5, 6]]))
            .unwrap();
        assert_eq!(plan.ty.name, "int[2][3]");
        assert_eq!(plan.len(), 24);
        let out = plan.static_bytes().unwrap();
        assert_eq!(&out[20..24], &6i32.to_le_bytes());
    }

    #[test]
    fn test_fixed_array_is_zero_filled() {
        let c = catalog();
        let out = bytes(&c, "short[4]", ValueTemplate::from(vec![7i16, 8]));
        assert_eq!(out, vec![7, 0, 8, 0, 0, 0, 0, 0]);

        let err = Encoder::new(&c)
            .plan_named("short[1]", &ValueTemplate::from(vec![7i16, 8]))
            .unwrap_err();
        assert!(matches!(err, ProbeError::Encoding(EncodingError::SizeMismatch { .. })));
    }

    #[test]
    fn test_string_into_char_array() {
        let c = catalog();
        let plan = Encoder::new(&c)
            .plan_named("char[]", &ValueTemplate::string("hey"))
            .unwrap();
        assert_eq!(plan.ty.name, "char[4]");
        assert_eq!(plan.static_bytes().unwrap(), b"hey\0".to_vec());

        assert_eq!(bytes(&c, "char[6]", ValueTemplate::string("hey")), b"hey\0\0\0".to_vec());
    }

    #[test]
    fn test_char_from_single_character_string() {
        let c = catalog();
        assert_eq!(bytes(&c, "char", ValueTemplate::string("A")), vec![65]);
        assert_eq!(bytes(&c, "char", ValueTemplate::character('\u{e9}')), vec![0xe9]);
        assert!(Encoder::new(&c)
            .plan_named("char", &ValueTemplate::string("AB"))
            .is_err());
    }

    #[test]
    fn test_scalar_ranges() {
        let c = catalog();
        assert_eq!(bytes(&c, "signed char", ValueTemplate::int(-128)), vec![0x80]);
        let err = Encoder::new(&c)
            .plan_named("unsigned char", &ValueTemplate::int(256))
            .unwrap_err();
        assert!(matches!(err, ProbeError::Encoding(EncodingError::OutOfRange { .. })));
        let err = Encoder::new(&c)
            .plan_named("unsigned int", &ValueTemplate::int(-1))
            .unwrap_err();
        assert!(matches!(err, ProbeError::Encoding(EncodingError::OutOfRange { .. })));
    }

    #[test]
    fn test_floats_by_size() {
        let c = catalog();
        assert_eq!(bytes(&c, "float", ValueTemplate::float(1.5)), 1.5f32.to_le_bytes().to_vec());
        assert_eq!(bytes(&c, "double", ValueTemplate::float(1.5)), 1.5f64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_enum_by_name_or_value() {
        let c = catalog();
        assert_eq!(bytes(&c, "enum color", ValueTemplate::string("BLUE")), vec![2, 0, 0, 0]);
        assert_eq!(bytes(&c, "enum color", ValueTemplate::int(1)), vec![1, 0, 0, 0]);
        let err = Encoder::new(&c)
            .plan_named("enum color", &ValueTemplate::string("PINK"))
            .unwrap_err();
        assert!(matches!(err, ProbeError::Encoding(EncodingError::UnknownEnumerator { .. })));
    }

    #[test]
    fn test_pointer_templates_plan_allocations() {
        let c = catalog();
        let template = ValueTemplate::fields([
            ("value", ValueTemplate::int(1)),
            (
                "next",
                ValueTemplate::fields([
                    ("value", ValueTemplate::int(2)),
                    ("next", ValueTemplate::null()),
                ]),
            ),
        ]);
        let plan = Encoder::new(&c).plan_named("struct node *", &template).unwrap();
        assert_eq!(plan.allocation_count(), 2);
        assert_eq!(plan.len(), 8);
        assert!(plan.static_bytes().is_none());

        let raw = bytes(&c, "struct node *", ValueTemplate::address(0x1000));
        assert_eq!(raw, 0x1000u64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_shape_mismatch_inside_pointer_graph() {
        let c = catalog();
        let template = ValueTemplate::fields([
            ("value", ValueTemplate::int(1)),
            (
                "next",
                ValueTemplate::fields([
                    ("value", ValueTemplate::fields([("oops", 1)])),
                    ("next", ValueTemplate::null()),
                ]),
            ),
        ]);
        let err = Encoder::new(&c)
            .plan_named("struct node", &template)
            .unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Encoding(EncodingError::ShapeMismatch { expected: "integer", .. })
        ));
    }

    #[test]
    fn test_struct_field_errors() {
        let c = catalog();
        let err = Encoder::new(&c)
            .plan_named("struct pair", &ValueTemplate::fields([("a", 1)]))
            .unwrap_err();
        assert!(matches!(err, ProbeError::Encoding(EncodingError::MissingField { .. })));

        let err = Encoder::new(&c)
            .plan_named(
                "struct pair",
                &ValueTemplate::fields([("a", 1), ("b", 2), ("z", 3)]),
            )
            .unwrap_err();
        assert!(matches!(err, ProbeError::Encoding(EncodingError::UnknownField { .. })));
    }

    #[test]
    fn test_flexible_array_member() {
        let c = catalog();
        let out = bytes(
            &c,
            "struct msg",
            ValueTemplate::fields([
                ("len", ValueTemplate::int(3)),
                ("data", ValueTemplate::string("ab")),
            ]),
        );
        assert_eq!(out, vec![3, 0, 0, 0, b'a', b'b', 0, 0]);

        let empty = bytes(&c, "struct msg", ValueTemplate::fields([("len", 0)]));
        assert_eq!(empty, vec![0, 0, 0, 0]);
    }
}
