//! Encoded values: ABI bytes paired with the concrete type they were built against.

use crate::config::types::{ProbeError, Result};
use crate::target::types::{ByteOrder, TargetType, TypeKind};
use std::fmt;

/// Byte buffer plus the concrete type it encodes
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedValue {
    ty: TargetType,
    bytes: Vec<u8>,
    byte_order: ByteOrder,
}

impl EncodedValue {
    pub fn new(ty: TargetType, bytes: Vec<u8>, byte_order: ByteOrder) -> Self {
        Self {
            ty,
            bytes,
            byte_order,
        }
    }

    /// Integer-like value of `ty` (integers, characters, enums, pointers)
    pub fn from_int(ty: TargetType, value: i128, byte_order: ByteOrder) -> Self {
        let bytes = encode_uint(value as u128, ty.size, byte_order);
        Self::new(ty, bytes, byte_order)
    }

    pub fn ty(&self) -> &TargetType {
        &self.ty
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn integer_bits(&self) -> Result<(u128, bool)> {
        match self.ty.kind {
            TypeKind::Int { signed } | TypeKind::Char { signed } | TypeKind::Enum { signed, .. } => {
                Ok((decode_uint(&self.bytes, self.byte_order), signed))
            }
            TypeKind::Bool | TypeKind::Pointer { .. } => {
                Ok((decode_uint(&self.bytes, self.byte_order), false))
            }
            _ => Err(ProbeError::usage(format!(
                "{} ({}) is not an integer",
                self.ty.name,
                self.ty.kind_name()
            ))),
        }
    }

    /// Integer value with the type's signedness applied
    pub fn as_i128(&self) -> Result<i128> {
        let (raw, signed) = self.integer_bits()?;
        let bits = (self.bytes.len() * 8) as u32;
        if signed && bits > 0 && bits < 128 {
            let shift = 128 - bits;
            Ok(((raw << shift) as i128) >> shift)
        } else {
            Ok(raw as i128)
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        let value = self.as_i128()?;
        i64::try_from(value)
            .map_err(|_| ProbeError::usage(format!("{} does not fit in i64", value)))
    }

    pub fn as_u64(&self) -> Result<u64> {
        let (raw, _) = self.integer_bits()?;
        u64::try_from(raw).map_err(|_| ProbeError::usage(format!("{} does not fit in u64", raw)))
    }

    pub fn as_f64(&self) -> Result<f64> {
        if self.ty.kind != TypeKind::Float {
            return Err(ProbeError::usage(format!(
                "{} is not a floating point value",
                self.ty.name
            )));
        }
        let raw = decode_uint(&self.bytes, self.byte_order);
        match self.bytes.len() {
            4 => Ok(f64::from(f32::from_bits(raw as u32))),
            8 => Ok(f64::from_bits(raw as u64)),
            n => Err(ProbeError::usage(format!("unsupported float width {}", n))),
        }
    }

    pub fn as_char(&self) -> Result<char> {
        match self.ty.kind {
            TypeKind::Char { .. } => Ok(char::from(self.bytes.first().copied().unwrap_or(0))),
            _ => Err(ProbeError::usage(format!("{} is not a character", self.ty.name))),
        }
    }

    /// Address held by a pointer value
    pub fn address(&self) -> Result<u64> {
        if !self.ty.is_pointer() {
            return Err(ProbeError::usage(format!("{} is not a pointer", self.ty.name)));
        }
        self.as_u64()
    }

    pub fn is_null(&self) -> bool {
        self.ty.is_pointer() && self.bytes.iter().all(|b| *b == 0)
    }

    /// Member of a struct or union value
    pub fn field(&self, name: &str) -> Result<EncodedValue> {
        let field = self.ty.field(name).ok_or_else(|| {
            ProbeError::usage(format!("{} has no member `{}`", self.ty.name, name))
        })?;
        let size = match &field.ty.kind {
            // Flexible array member: whatever follows the fixed part
            TypeKind::Array { length: None, .. } => {
                self.bytes.len().saturating_sub(field.offset)
            }
            _ => field.ty.size,
        };
        let mut ty = field.ty.clone();
        if let TypeKind::Array {
            element,
            length: None,
        } = &field.ty.kind
        {
            if element.size > 0 {
                ty = element.array_of(size / element.size);
            }
        }
        self.slice(ty, field.offset, size)
    }

    /// Element of an array value
    pub fn element(&self, index: usize) -> Result<EncodedValue> {
        let element = self
            .ty
            .element()
            .ok_or_else(|| ProbeError::usage(format!("{} is not an array", self.ty.name)))?
            .clone();
        let size = element.size;
        self.slice(element, index * size, size)
    }

    /// Number of elements of an array value
    pub fn element_count(&self) -> usize {
        match self.ty.element() {
            Some(element) if element.size > 0 => self.bytes.len() / element.size,
            _ => 0,
        }
    }

    /// Reinterpret the leading bytes as `ty`
    pub fn cast(&self, ty: TargetType) -> Result<EncodedValue> {
        let size = ty.size;
        self.slice(ty, 0, size)
    }

    /// Text of a character array, up to the first NUL
    pub fn as_c_string(&self) -> Result<String> {
        match self.ty.element().map(|e| &e.kind) {
            Some(TypeKind::Char { .. }) => {
                let end = self
                    .bytes
                    .iter()
                    .position(|b| *b == 0)
                    .unwrap_or(self.bytes.len());
                Ok(String::from_utf8_lossy(&self.bytes[..end]).into_owned())
            }
            _ => Err(ProbeError::usage(format!(
                "{} is not a character array",
                self.ty.name
            ))),
        }
    }

    fn slice(&self, ty: TargetType, offset: usize, size: usize) -> Result<EncodedValue> {
        let end = offset + size;
        if end > self.bytes.len() {
            return Err(ProbeError::usage(format!(
                "range {}..{} is outside {} ({} bytes)",
                offset,
                end,
                self.ty.name,
                self.bytes.len()
            )));
        }
        Ok(EncodedValue::new(
            ty,
            self.bytes[offset..end].to_vec(),
            self.byte_order,
        ))
    }
}

impl fmt::Display for EncodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ty.kind {
            TypeKind::Void => write!(f, "void"),
            TypeKind::Bool => write!(f, "{}", self.bytes.iter().any(|b| *b != 0)),
            TypeKind::Int { .. } => match self.as_i128() {
                Ok(v) => write!(f, "{}", v),
                Err(_) => write!(f, "?"),
            },
            TypeKind::Char { .. } => {
                let v = self.as_i128().unwrap_or(0);
                let c = self.bytes.first().copied().unwrap_or(0);
                if c.is_ascii_graphic() || c == b' ' {
                    write!(f, "{} '{}'", v, char::from(c))
                } else {
                    write!(f, "{} '\\{:03o}'", v, c)
                }
            }
            TypeKind::Float => match self.as_f64() {
                Ok(v) => write!(f, "{}", v),
                Err(_) => write!(f, "?"),
            },
            TypeKind::Enum { enumerators, .. } => {
                let v = self.as_i128().unwrap_or(0);
                match enumerators.iter().find(|(_, value)| i128::from(*value) == v) {
                    Some((name, _)) => write!(f, "{}", name),
                    None => write!(f, "{}", v),
                }
            }
            TypeKind::Pointer { .. } => write!(f, "{:#x}", self.as_u64().unwrap_or(0)),
            TypeKind::Array { .. } => {
                write!(f, "{{")?;
                for i in 0..self.element_count() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match self.element(i) {
                        Ok(element) => write!(f, "{}", element)?,
                        Err(_) => write!(f, "?")?,
                    }
                }
                write!(f, "}}")
            }
            TypeKind::Struct { fields } | TypeKind::Union { fields } => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match self.field(&field.name) {
                        Ok(member) => write!(f, "{} = {}", field.name, member)?,
                        Err(_) => write!(f, "{} = ?", field.name)?,
                    }
                }
                write!(f, "}}")
            }
        }
    }
}

/// Fixed-width two's complement bytes of `value`
pub(crate) fn encode_uint(value: u128, size: usize, byte_order: ByteOrder) -> Vec<u8> {
    let le = value.to_le_bytes();
    let mut bytes: Vec<u8> = (0..size)
        .map(|i| le.get(i).copied().unwrap_or(0))
        .collect();
    if byte_order == ByteOrder::Big {
        bytes.reverse();
    }
    bytes
}

pub(crate) fn decode_uint(bytes: &[u8], byte_order: ByteOrder) -> u128 {
    let mut value = 0u128;
    let take = bytes.len().min(16);
    match byte_order {
        ByteOrder::Little => {
            for (i, b) in bytes.iter().take(take).enumerate() {
                value |= u128::from(*b) << (8 * i);
            }
        }
        ByteOrder::Big => {
            for b in bytes.iter().skip(bytes.len() - take) {
                value = (value << 8) | u128::from(*b);
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_type(name: &str, size: usize, signed: bool) -> TargetType {
        TargetType::new(name, size, size, TypeKind::Int { signed })
    }

    #[test]
    fn test_integer_roundtrip_all_widths() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            for size in [1usize, 2, 4, 8] {
                let bits = size * 8;
                let smin = -(1i128 << (bits - 1));
                let smax = (1i128 << (bits - 1)) - 1;
                let umax = (1i128 << bits) - 1;
                for v in [smin, -1, 0, 1, smax] {
                    let value = EncodedValue::from_int(int_type("s", size, true), v, order);
                    assert_eq!(value.as_i128().unwrap(), v, "signed {} bytes {:?}", size, order);
                }
                for v in [0, 1, umax] {
                    let value = EncodedValue::from_int(int_type("u", size, false), v, order);
                    assert_eq!(value.as_i128().unwrap(), v, "unsigned {} bytes {:?}", size, order);
                }
            }
        }
    }

    #[test]
    fn test_big_endian_layout() {
        let value = EncodedValue::from_int(int_type("int", 4, true), 0x01020304, ByteOrder::Big);
        assert_eq!(value.bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_float_decoding() {
        let ty = TargetType::new("float", 4, 4, TypeKind::Float);
        let value = EncodedValue::new(ty, 1.5f32.to_le_bytes().to_vec(), ByteOrder::Little);
        assert_eq!(value.as_f64().unwrap(), 1.5);
        assert!(value.as_i64().is_err());
    }

    #[test]
    fn test_display() {
        let char_ty = TargetType::new("char", 1, 1, TypeKind::Char { signed: true });
        let value = EncodedValue::new(char_ty.array_of(3), b"hi\0".to_vec(), ByteOrder::Little);
        assert_eq!(value.to_string(), "{104 'h', 105 'i', 0 '\\000'}");
        assert_eq!(value.as_c_string().unwrap(), "hi");

        let ptr = EncodedValue::from_int(char_ty.pointer_to(8), 0x1000, ByteOrder::Little);
        assert_eq!(ptr.to_string(), "0x1000");
        assert!(!ptr.is_null());
    }
}
