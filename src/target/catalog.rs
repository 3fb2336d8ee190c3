//! Declarative C type catalog.
//!
//! Computes System V (LP64) layouts for struct, union and enum declarations
//! and resolves C type spellings such as `struct node *`, `int[2][3]` or
//! `char[]`. Used by the CLI, the simulated inferior and any engine that can
//! describe its types as declarations instead of resolving them itself.

use crate::config::types::{EncodingError, ProbeError, Result};
use crate::target::control::TypeResolver;
use crate::target::types::{ByteOrder, Field, FunctionSignature, Param, TargetType, TypeKind};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const POINTER_SIZE: usize = 8;
const MAX_RESOLVE_DEPTH: usize = 32;

/// One catalog entry, as written in a JSON catalog file
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Declaration {
    Struct {
        name: String,
        fields: Vec<(String, String)>,
        #[serde(default)]
        packed: bool,
    },
    Union {
        name: String,
        fields: Vec<(String, String)>,
    },
    Enum {
        name: String,
        enumerators: Vec<(String, i64)>,
    },
    Typedef {
        name: String,
        target: String,
    },
    Function {
        name: String,
        #[serde(default = "void_name")]
        returns: String,
        #[serde(default)]
        params: Vec<(String, String)>,
        #[serde(default)]
        variadic: bool,
    },
}

fn void_name() -> String {
    "void".to_string()
}

/// Catalog of named types and function signatures
#[derive(Clone, Debug)]
pub struct TypeCatalog {
    types: BTreeMap<String, TargetType>,
    typedefs: BTreeMap<String, String>,
    functions: BTreeMap<String, FunctionSignature>,
    byte_order: ByteOrder,
}

fn builtin(name: &str, size: usize, kind: TypeKind) -> (String, TargetType) {
    (name.to_string(), TargetType::new(name, size, size.max(1), kind))
}

impl TypeCatalog {
    /// Catalog with the LP64 builtin scalar types
    pub fn lp64() -> Self {
        use TypeKind::*;
        let signed = |signed| Int { signed };
        let types = [
            builtin("void", 0, Void),
            builtin("_Bool", 1, Bool),
            builtin("bool", 1, Bool),
            builtin("char", 1, Char { signed: true }),
            builtin("signed char", 1, Char { signed: true }),
            builtin("unsigned char", 1, Char { signed: false }),
            builtin("short", 2, signed(true)),
            builtin("unsigned short", 2, signed(false)),
            builtin("int", 4, signed(true)),
            builtin("unsigned int", 4, signed(false)),
            builtin("long", 8, signed(true)),
            builtin("unsigned long", 8, signed(false)),
            builtin("long long", 8, signed(true)),
            builtin("unsigned long long", 8, signed(false)),
            builtin("float", 4, Float),
            builtin("double", 8, Float),
            builtin("int8_t", 1, signed(true)),
            builtin("uint8_t", 1, signed(false)),
            builtin("int16_t", 2, signed(true)),
            builtin("uint16_t", 2, signed(false)),
            builtin("int32_t", 4, signed(true)),
            builtin("uint32_t", 4, signed(false)),
            builtin("int64_t", 8, signed(true)),
            builtin("uint64_t", 8, signed(false)),
            builtin("size_t", 8, signed(false)),
            builtin("ssize_t", 8, signed(true)),
            builtin("intptr_t", 8, signed(true)),
            builtin("uintptr_t", 8, signed(false)),
        ]
        .into_iter()
        .collect();

        let typedefs = [
            ("unsigned", "unsigned int"),
            ("signed", "int"),
            ("short int", "short"),
            ("short unsigned int", "unsigned short"),
            ("long int", "long"),
            ("long unsigned int", "unsigned long"),
            ("long long int", "long long"),
            ("long long unsigned int", "unsigned long long"),
        ]
        .into_iter()
        .map(|(alias, target)| (alias.to_string(), target.to_string()))
        .collect();

        Self {
            types,
            typedefs,
            functions: BTreeMap::new(),
            byte_order: ByteOrder::Little,
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Add a declaration, computing its layout
    pub fn declare(&mut self, declaration: Declaration) -> Result<()> {
        match declaration {
            Declaration::Struct {
                name,
                fields,
                packed,
            } => {
                let ty = self.layout_struct(&format!("struct {}", name), &fields, packed)?;
                self.insert(ty);
            }
            Declaration::Union { name, fields } => {
                let ty = self.layout_union(&format!("union {}", name), &fields)?;
                self.insert(ty);
            }
            Declaration::Enum { name, enumerators } => {
                let signed = enumerators.iter().any(|(_, v)| *v < 0);
                let wide = enumerators
                    .iter()
                    .any(|(_, v)| *v > i64::from(u32::MAX) || *v < i64::from(i32::MIN));
                let size = if wide { 8 } else { 4 };
                self.insert(TargetType::new(
                    format!("enum {}", name),
                    size,
                    size,
                    TypeKind::Enum {
                        signed,
                        enumerators,
                    },
                ));
            }
            Declaration::Typedef { name, target } => {
                // Resolve now so dangling typedefs are reported at declaration time
                self.lookup(&target)?;
                self.typedefs.insert(name, normalize(&target));
            }
            Declaration::Function {
                name,
                returns,
                params,
                variadic,
            } => {
                let return_type = self.lookup(&returns)?;
                let return_type = if return_type.is_void() {
                    None
                } else {
                    Some(return_type)
                };
                let params = params
                    .iter()
                    .map(|(pname, ptype)| {
                        Ok(Param {
                            name: pname.clone(),
                            ty: self.lookup(ptype)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.functions.insert(
                    name.clone(),
                    FunctionSignature {
                        name,
                        return_type,
                        params,
                        variadic,
                    },
                );
            }
        }
        Ok(())
    }

    /// Builder form of [`declare`](Self::declare) for a struct
    pub fn with_struct(mut self, name: &str, fields: &[(&str, &str)]) -> Result<Self> {
        self.declare(Declaration::Struct {
            name: name.to_string(),
            fields: owned_pairs(fields),
            packed: false,
        })?;
        Ok(self)
    }

    pub fn with_packed_struct(mut self, name: &str, fields: &[(&str, &str)]) -> Result<Self> {
        self.declare(Declaration::Struct {
            name: name.to_string(),
            fields: owned_pairs(fields),
            packed: true,
        })?;
        Ok(self)
    }

    pub fn with_union(mut self, name: &str, fields: &[(&str, &str)]) -> Result<Self> {
        self.declare(Declaration::Union {
            name: name.to_string(),
            fields: owned_pairs(fields),
        })?;
        Ok(self)
    }

    pub fn with_enum(mut self, name: &str, enumerators: &[(&str, i64)]) -> Result<Self> {
        self.declare(Declaration::Enum {
            name: name.to_string(),
            enumerators: enumerators
                .iter()
                .map(|(n, v)| (n.to_string(), *v))
                .collect(),
        })?;
        Ok(self)
    }

    pub fn with_typedef(mut self, name: &str, target: &str) -> Result<Self> {
        self.declare(Declaration::Typedef {
            name: name.to_string(),
            target: target.to_string(),
        })?;
        Ok(self)
    }

    pub fn with_function(
        mut self,
        name: &str,
        returns: &str,
        params: &[(&str, &str)],
    ) -> Result<Self> {
        self.declare(Declaration::Function {
            name: name.to_string(),
            returns: returns.to_string(),
            params: owned_pairs(params),
            variadic: false,
        })?;
        Ok(self)
    }

    /// Resolve a C type spelling
    pub fn lookup(&self, name: &str) -> Result<TargetType> {
        self.lookup_depth(&normalize(name), 0)
    }

    pub fn signature(&self, function: &str) -> Option<&FunctionSignature> {
        self.functions.get(function)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionSignature> {
        self.functions.values()
    }

    fn insert(&mut self, ty: TargetType) {
        debug!("Declared {} (size={}, align={})", ty.name, ty.size, ty.align);
        self.types.insert(ty.name.clone(), ty);
    }

    fn lookup_depth(&self, name: &str, depth: usize) -> Result<TargetType> {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(ProbeError::Config(format!(
                "typedef chain too deep while resolving {}",
                name
            )));
        }

        if let Some(pointee) = name.strip_suffix('*') {
            let pointee = pointee.trim_end();
            return Ok(TargetType::new(
                format!("{} *", pointee),
                POINTER_SIZE,
                POINTER_SIZE,
                TypeKind::Pointer {
                    pointee: pointee.to_string(),
                },
            ));
        }

        if let Some(idx) = name.find('[') {
            let base = self.lookup_depth(name[..idx].trim_end(), depth + 1)?;
            let dims = parse_dims(name, &name[idx..])?;
            let mut ty = base;
            for (position, dim) in dims.iter().enumerate().rev() {
                ty = match dim {
                    Some(length) => ty.array_of(*length),
                    None if position == 0 => ty.unsized_array_of(),
                    None => {
                        return Err(EncodingError::UnknownType(format!(
                            "{} (only the outermost dimension may be unsized)",
                            name
                        ))
                        .into())
                    }
                };
            }
            return Ok(ty);
        }

        let unqualified = name
            .strip_prefix("const ")
            .or_else(|| name.strip_prefix("volatile "))
            .or_else(|| name.strip_suffix(" const"));
        if let Some(unqualified) = unqualified {
            return self.lookup_depth(unqualified, depth + 1);
        }

        if let Some(ty) = self.types.get(name) {
            return Ok(ty.clone());
        }

        if let Some(target) = self.typedefs.get(name) {
            let mut ty = self.lookup_depth(target, depth + 1)?;
            ty.name = name.to_string();
            return Ok(ty);
        }

        Err(EncodingError::UnknownType(name.to_string()).into())
    }

    fn layout_struct(
        &self,
        name: &str,
        members: &[(String, String)],
        packed: bool,
    ) -> Result<TargetType> {
        let mut fields = Vec::with_capacity(members.len());
        let mut offset = 0usize;
        let mut align = 1usize;

        for (index, (fname, ftype)) in members.iter().enumerate() {
            let ty = self.lookup(ftype)?;
            let flexible = matches!(ty.kind, TypeKind::Array { length: None, .. });
            if flexible && index + 1 != members.len() {
                return Err(ProbeError::Config(format!(
                    "{}: flexible array member `{}` must be the last field",
                    name, fname
                )));
            }
            if ty.is_void() {
                return Err(ProbeError::Config(format!(
                    "{}: field `{}` has type void",
                    name, fname
                )));
            }

            let field_align = if packed { 1 } else { ty.align.max(1) };
            offset = align_up(offset, field_align);
            align = align.max(field_align);
            let size = ty.size;
            fields.push(Field {
                name: fname.clone(),
                offset,
                ty,
            });
            offset += size;
        }

        Ok(TargetType::new(
            name,
            align_up(offset, align),
            align,
            TypeKind::Struct { fields },
        ))
    }

    fn layout_union(&self, name: &str, members: &[(String, String)]) -> Result<TargetType> {
        let mut fields = Vec::with_capacity(members.len());
        let mut size = 0usize;
        let mut align = 1usize;

        for (fname, ftype) in members {
            let ty = self.lookup(ftype)?;
            size = size.max(ty.size);
            align = align.max(ty.align.max(1));
            fields.push(Field {
                name: fname.clone(),
                offset: 0,
                ty,
            });
        }

        Ok(TargetType::new(
            name,
            align_up(size, align),
            align,
            TypeKind::Union { fields },
        ))
    }
}

impl TypeResolver for TypeCatalog {
    fn resolve_type(&self, name: &str) -> Result<TargetType> {
        self.lookup(name)
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn pointer_size(&self) -> usize {
        POINTER_SIZE
    }
}

pub(crate) fn align_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

fn owned_pairs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

/// Canonical spelling: single spaces, `T *` for pointers, no space before `[`
fn normalize(name: &str) -> String {
    let spaced = name.replace('*', " * ");
    let mut out = String::with_capacity(name.len());
    for token in spaced.split_whitespace() {
        if !out.is_empty() && !token.starts_with('[') {
            out.push(' ');
        }
        out.push_str(token);
    }
    // "char * *" -> "char **"
    while out.contains("* *") {
        out = out.replace("* *", "**");
    }
    out
}

fn parse_dims(name: &str, mut rest: &str) -> Result<Vec<Option<usize>>> {
    let mut dims = Vec::new();
    while !rest.is_empty() {
        let close = match (rest.strip_prefix('['), rest.find(']')) {
            (Some(_), Some(close)) => close,
            _ => return Err(EncodingError::UnknownType(name.to_string()).into()),
        };
        let inner = rest[1..close].trim();
        if inner.is_empty() {
            dims.push(None);
        } else {
            let length = inner
                .parse::<usize>()
                .map_err(|_| EncodingError::UnknownType(name.to_string()))?;
            dims.push(Some(length));
        }
        rest = rest[close + 1..].trim_start();
    }
    Ok(dims)
}
