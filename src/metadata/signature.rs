//! Member references and the slice of method signatures the rewriter needs.
//!
//! Argument recovery only has to know how many values a call consumes, whether
//! it produces one, and the declared width of each parameter. Everything else
//! about a referenced member stays with the metadata layer that produced it.

use std::{fmt, sync::Arc};

use strum::{Display, EnumIter};

use crate::metadata::token::Token;

/// Shared handle to a member reference.
pub type MemberRefRc = Arc<MemberRef>;

/// Declared type of a parameter, return value or field.
///
/// Only the distinctions that influence literal coercion are kept; every
/// reference type other than `string` collapses to [`ElementType::Class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ElementType {
    /// No value (`void` return)
    #[strum(serialize = "void")]
    Void,
    /// `bool`
    #[strum(serialize = "bool")]
    Boolean,
    /// `char` (UTF-16 code unit)
    #[strum(serialize = "char")]
    Char,
    /// `int8`
    #[strum(serialize = "int8")]
    I1,
    /// `uint8`
    #[strum(serialize = "uint8")]
    U1,
    /// `int16`
    #[strum(serialize = "int16")]
    I2,
    /// `uint16`
    #[strum(serialize = "uint16")]
    U2,
    /// `int32`
    #[strum(serialize = "int32")]
    I4,
    /// `uint32`
    #[strum(serialize = "uint32")]
    U4,
    /// `int64`
    #[strum(serialize = "int64")]
    I8,
    /// `uint64`
    #[strum(serialize = "uint64")]
    U8,
    /// `float32`
    #[strum(serialize = "float32")]
    R4,
    /// `float64`
    #[strum(serialize = "float64")]
    R8,
    /// `native int`
    #[strum(serialize = "native int")]
    IntPtr,
    /// `string`
    #[strum(serialize = "string")]
    String,
    /// `object`
    #[strum(serialize = "object")]
    Object,
    /// Any other class, value type or generic instantiation
    #[strum(serialize = "class")]
    Class,
}

impl ElementType {
    /// Returns `true` for the integer-like types an `ldc.i4`/`ldc.i8` push can be narrowed to.
    #[must_use]
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::Char
                | Self::I1
                | Self::U1
                | Self::I2
                | Self::U2
                | Self::I4
                | Self::U4
                | Self::I8
                | Self::U8
        )
    }
}

/// A method signature reduced to its stack-relevant shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    /// The method takes an implicit `this` as its first stack argument
    pub has_this: bool,
    /// Declared parameter types, in declaration order
    pub params: Vec<ElementType>,
    /// Declared return type
    pub ret: ElementType,
}

impl MethodSig {
    /// Creates a static method signature.
    #[must_use]
    pub fn new(params: Vec<ElementType>, ret: ElementType) -> Self {
        Self {
            has_this: false,
            params,
            ret,
        }
    }

    /// Creates an instance method signature.
    #[must_use]
    pub fn instance(params: Vec<ElementType>, ret: ElementType) -> Self {
        Self {
            has_this: true,
            params,
            ret,
        }
    }

    /// Number of stack values a call consumes, `this` included.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }

    /// Declared type of stack argument `index`, counting `this` as argument 0.
    #[must_use]
    pub fn arg_type(&self, index: usize) -> Option<ElementType> {
        if self.has_this {
            if index == 0 {
                Some(ElementType::Object)
            } else {
                self.params.get(index - 1).copied()
            }
        } else {
            self.params.get(index).copied()
        }
    }

    /// Returns `true` when a call leaves a value on the stack.
    #[must_use]
    pub fn returns_value(&self) -> bool {
        self.ret != ElementType::Void
    }
}

/// What a [`MemberRef`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// A method; carries a [`MethodSig`]
    Method,
    /// A field
    Field,
    /// A type (used by `castclass`, `isinst`, `newarr` and friends)
    Type,
}

/// A reference to a declared member, as carried by instruction operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Metadata token of the member
    pub token: Token,
    /// Kind of member
    pub kind: MemberKind,
    /// Full name of the declaring type, or the namespace for a type reference
    pub declaring_type: String,
    /// Simple name of the member
    pub name: String,
    /// Signature, present for methods
    pub sig: Option<MethodSig>,
}

impl MemberRef {
    /// Creates a method reference.
    #[must_use]
    pub fn method(
        token: Token,
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        sig: MethodSig,
    ) -> Self {
        Self {
            token,
            kind: MemberKind::Method,
            declaring_type: declaring_type.into(),
            name: name.into(),
            sig: Some(sig),
        }
    }

    /// Creates a field reference.
    #[must_use]
    pub fn field(token: Token, declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            token,
            kind: MemberKind::Field,
            declaring_type: declaring_type.into(),
            name: name.into(),
            sig: None,
        }
    }

    /// Creates a type reference from a namespace and a type name.
    #[must_use]
    pub fn type_ref(token: Token, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            token,
            kind: MemberKind::Type,
            declaring_type: namespace.into(),
            name: name.into(),
            sig: None,
        }
    }

    /// `Namespace.Type` for types, `Declaring.Type::Member` otherwise.
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.kind {
            MemberKind::Type if self.declaring_type.is_empty() => self.name.clone(),
            MemberKind::Type => format!("{}.{}", self.declaring_type, self.name),
            MemberKind::Method | MemberKind::Field => {
                format!("{}::{}", self.declaring_type, self.name)
            }
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.full_name(), self.token)
    }
}
