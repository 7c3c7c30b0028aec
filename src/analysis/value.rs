//! Abstract values produced by argument recovery and consumed by evaluators.

use std::{fmt, sync::Arc};

use crate::metadata::{ElementType, MemberRefRc};

/// A compile-time constant.
///
/// Integer pushes decode to the generic `I4`/`I8` encodings; the narrower
/// variants only appear after [`Literal::coerce_to`] applied a declared
/// parameter type, or when an evaluator hands one back.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `null`
    Null,
    /// `bool`
    Bool(bool),
    /// `char`
    Char(u16),
    /// `int8`
    I1(i8),
    /// `uint8`
    U1(u8),
    /// `int16`
    I2(i16),
    /// `uint16`
    U2(u16),
    /// `int32`
    I4(i32),
    /// `uint32`
    U4(u32),
    /// `int64`
    I8(i64),
    /// `uint64`
    U8(u64),
    /// `float32`
    R4(f32),
    /// `float64`
    R8(f64),
    /// `string`
    String(Arc<str>),
    /// A field or token handle (`ldsfld`, `ldtoken` operands)
    Member(MemberRefRc),
}

impl Literal {
    /// Narrows a generic integer encoding to `ty`, truncating like a store to that type.
    ///
    /// Non-integer literals and non-integral targets are returned unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cflowkit::{analysis::Literal, metadata::ElementType};
    ///
    /// assert_eq!(Literal::I4(1).coerce_to(ElementType::Boolean), Literal::Bool(true));
    /// assert_eq!(Literal::I4(-1).coerce_to(ElementType::U2), Literal::U2(0xFFFF));
    /// ```
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn coerce_to(self, ty: ElementType) -> Literal {
        let raw = match self {
            Literal::I4(v) => i64::from(v),
            Literal::I8(v) => v,
            other => return other,
        };
        match ty {
            ElementType::Boolean => Literal::Bool(raw != 0),
            ElementType::Char => Literal::Char(raw as u16),
            ElementType::I1 => Literal::I1(raw as i8),
            ElementType::U1 => Literal::U1(raw as u8),
            ElementType::I2 => Literal::I2(raw as i16),
            ElementType::U2 => Literal::U2(raw as u16),
            ElementType::I4 => Literal::I4(raw as i32),
            ElementType::U4 => Literal::U4(raw as u32),
            ElementType::I8 => Literal::I8(raw),
            ElementType::U8 => Literal::U8(raw as u64),
            ElementType::Void
            | ElementType::R4
            | ElementType::R8
            | ElementType::IntPtr
            | ElementType::String
            | ElementType::Object
            | ElementType::Class => self,
        }
    }

    /// The string payload, if this is a string literal.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for string literals.
    #[must_use]
    pub fn is_string(&self) -> bool {
        matches!(self, Literal::String(_))
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(Arc::from(value))
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Literal::I4(value)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::Char(v) => match char::from_u32(u32::from(*v)) {
                Some(c) => write!(f, "{c:?}"),
                None => write!(f, "'\\u{v:04x}'"),
            },
            Literal::I1(v) => write!(f, "{v}"),
            Literal::U1(v) => write!(f, "{v}"),
            Literal::I2(v) => write!(f, "{v}"),
            Literal::U2(v) => write!(f, "{v}"),
            Literal::I4(v) => write!(f, "{v}"),
            Literal::U4(v) => write!(f, "{v}"),
            Literal::I8(v) => write!(f, "{v}L"),
            Literal::U8(v) => write!(f, "{v}UL"),
            Literal::R4(v) => write!(f, "{v}f"),
            Literal::R8(v) => write!(f, "{v}"),
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::Member(m) => write!(f, "{}", m.full_name()),
        }
    }
}

/// A possibly-known stack value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A recovered constant
    Known(Literal),
    /// A value that could not be determined statically
    Unknown,
}

impl Value {
    /// Returns `true` for [`Value::Known`].
    #[must_use]
    pub fn is_known(&self) -> bool {
        matches!(self, Value::Known(_))
    }

    /// The constant, if known.
    #[must_use]
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Value::Known(literal) => Some(literal),
            Value::Unknown => None,
        }
    }

    /// Consumes the value, returning the constant if known.
    #[must_use]
    pub fn into_literal(self) -> Option<Literal> {
        match self {
            Value::Known(literal) => Some(literal),
            Value::Unknown => None,
        }
    }
}

impl From<Literal> for Value {
    fn from(literal: Literal) -> Self {
        Value::Known(literal)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Known(literal) => write!(f, "{literal}"),
            Value::Unknown => f.write_str("?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_narrow_integers() {
        assert_eq!(Literal::I4(0).coerce_to(ElementType::Boolean), Literal::Bool(false));
        assert_eq!(Literal::I4(0x41).coerce_to(ElementType::Char), Literal::Char(0x41));
        assert_eq!(Literal::I4(0x1FF).coerce_to(ElementType::U1), Literal::U1(0xFF));
        assert_eq!(Literal::I4(0x1FF).coerce_to(ElementType::I1), Literal::I1(-1));
        assert_eq!(Literal::I4(-2).coerce_to(ElementType::U4), Literal::U4(0xFFFF_FFFE));
    }

    #[test]
    fn test_coerce_widens_with_sign_extension() {
        assert_eq!(Literal::I4(-1).coerce_to(ElementType::I8), Literal::I8(-1));
        assert_eq!(Literal::I4(-1).coerce_to(ElementType::U8), Literal::U8(u64::MAX));
        assert_eq!(
            Literal::I8(0x1_0000_0001).coerce_to(ElementType::I4),
            Literal::I4(1)
        );
    }

    #[test]
    fn test_coerce_leaves_other_literals() {
        let s = Literal::from("abc");
        assert_eq!(s.clone().coerce_to(ElementType::I4), s);
        assert_eq!(Literal::I4(7).coerce_to(ElementType::String), Literal::I4(7));
        assert_eq!(Literal::R8(1.5).coerce_to(ElementType::I4), Literal::R8(1.5));
    }

    #[test]
    fn test_display() {
        assert_eq!(Literal::from("a\"b").to_string(), "\"a\\\"b\"");
        assert_eq!(Literal::Char(0x61).to_string(), "'a'");
        assert_eq!(Value::Unknown.to_string(), "?");
        assert_eq!(Value::Known(Literal::I8(3)).to_string(), "3L");
    }

    #[test]
    fn test_value_accessors() {
        let known = Value::from(Literal::I4(3));
        assert!(known.is_known());
        assert_eq!(known.as_literal(), Some(&Literal::I4(3)));
        assert_eq!(Value::Unknown.into_literal(), None);
    }
}
