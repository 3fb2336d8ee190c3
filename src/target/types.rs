//! Structural descriptions of native types as reported by a type resolver.
//!
//! Pointer pointees are carried by name and resolved on demand, so
//! self-referential types (`struct node { struct node *next; }`) stay finite.

use serde::{Deserialize, Serialize};

/// Byte order of the target ABI
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the controlling host
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// A named member of a struct or union
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub ty: TargetType,
}

/// Closed set of type kinds the marshaller knows how to encode
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TypeKind {
    Void,
    Bool,
    Int {
        signed: bool,
    },
    Char {
        signed: bool,
    },
    Float,
    Enum {
        signed: bool,
        enumerators: Vec<(String, i64)>,
    },
    Pointer {
        pointee: String,
    },
    /// `length == None` is an array whose extent is inferred from the template
    /// (or a flexible array member when it ends a struct).
    Array {
        element: Box<TargetType>,
        length: Option<usize>,
    },
    Struct {
        fields: Vec<Field>,
    },
    Union {
        fields: Vec<Field>,
    },
}

/// Structural description of a native type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetType {
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub kind: TypeKind,
}

impl TargetType {
    pub fn new<S: Into<String>>(name: S, size: usize, align: usize, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            size,
            align,
            kind,
        }
    }

    /// Pointer type `<self> *`
    pub fn pointer_to(&self, pointer_size: usize) -> TargetType {
        TargetType::new(
            format!("{} *", self.name),
            pointer_size,
            pointer_size,
            TypeKind::Pointer {
                pointee: self.name.clone(),
            },
        )
    }

    /// Fixed-length array of `self`, named the way C spells it (`int[2][3]`)
    pub fn array_of(&self, length: usize) -> TargetType {
        let (base, dims) = split_array_name(&self.name);
        TargetType::new(
            format!("{}[{}]{}", base, length, dims),
            self.size * length,
            self.align,
            TypeKind::Array {
                element: Box::new(self.clone()),
                length: Some(length),
            },
        )
    }

    /// Array of `self` whose length is not fixed yet (`int[]`)
    pub fn unsized_array_of(&self) -> TargetType {
        let (base, dims) = split_array_name(&self.name);
        TargetType::new(
            format!("{}[]{}", base, dims),
            0,
            self.align,
            TypeKind::Array {
                element: Box::new(self.clone()),
                length: None,
            },
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            TypeKind::Void => "void",
            TypeKind::Bool => "bool",
            TypeKind::Int { .. } => "integer",
            TypeKind::Char { .. } => "character",
            TypeKind::Float => "floating point",
            TypeKind::Enum { .. } => "enum",
            TypeKind::Pointer { .. } => "pointer",
            TypeKind::Array { .. } => "array",
            TypeKind::Struct { .. } => "struct",
            TypeKind::Union { .. } => "union",
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    /// Whether the integer representation is signed (false for non-integers)
    pub fn is_signed(&self) -> bool {
        match self.kind {
            TypeKind::Int { signed } | TypeKind::Char { signed } | TypeKind::Enum { signed, .. } => {
                signed
            }
            _ => false,
        }
    }

    /// Pointee name of a pointer type
    pub fn pointee(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Pointer { pointee } => Some(pointee),
            _ => None,
        }
    }

    /// Element type of an array type
    pub fn element(&self) -> Option<&TargetType> {
        match &self.kind {
            TypeKind::Array { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Member list of a struct or union
    pub fn fields(&self) -> &[Field] {
        match &self.kind {
            TypeKind::Struct { fields } | TypeKind::Union { fields } => fields,
            _ => &[],
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// A struct whose sizeof is not a multiple of its alignof is laid out packed
    pub fn is_packed(&self) -> bool {
        matches!(self.kind, TypeKind::Struct { .. }) && self.align > 0 && self.size % self.align != 0
    }
}

fn split_array_name(name: &str) -> (&str, &str) {
    match name.find('[') {
        Some(idx) => (&name[..idx], &name[idx..]),
        None => (name, ""),
    }
}

/// A named function parameter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TargetType,
}

/// Declared signature of a target function
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    /// None for `void`
    pub return_type: Option<TargetType>,
    pub params: Vec<Param>,
    pub variadic: bool,
}

impl FunctionSignature {
    pub fn param(&self, index: usize) -> Option<&Param> {
        self.params.get(index)
    }
}
