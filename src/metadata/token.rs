//! Metadata tokens identifying methods, fields and types.
//!
//! A token is the identity the rest of the crate keys on: oracle targets are
//! registered by token, evaluators are asked to resolve a token, and every
//! recorded event names the token of the method it happened in.

use std::fmt;

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
///
/// # Examples
///
/// ```rust
/// use cflowkit::metadata::Token;
///
/// let token = Token::new(0x0600_0001);
/// assert_eq!(token.table(), 0x06);
/// assert_eq!(token.row(), 1);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// Table id of `MethodDef` rows.
    pub const METHOD_DEF: u8 = 0x06;
    /// Table id of `MemberRef` rows.
    pub const MEMBER_REF: u8 = 0x0A;
    /// Table id of `Field` rows.
    pub const FIELD: u8 = 0x04;
    /// Table id of `TypeRef` rows.
    pub const TYPE_REF: u8 = 0x01;
    /// Table id of `MethodSpec` rows.
    pub const METHOD_SPEC: u8 = 0x2B;

    /// Creates a new token from a raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a row index.
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the table id (high byte).
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Returns the row index (low 24 bits).
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns `true` for the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_parts() {
        let token = Token::from_parts(Token::MEMBER_REF, 0x12);
        assert_eq!(token.value(), 0x0A00_0012);
        assert_eq!(token.table(), Token::MEMBER_REF);
        assert_eq!(token.row(), 0x12);
    }

    #[test]
    fn test_token_row_is_masked() {
        let token = Token::from_parts(Token::METHOD_DEF, 0xFF00_0001);
        assert_eq!(token.table(), Token::METHOD_DEF);
        assert_eq!(token.row(), 1);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token::default().is_null());
        assert!(!Token(0x0600_0001).is_null());
    }

    #[test]
    fn test_token_display_and_debug() {
        let token = Token(0x0600_0001);
        assert_eq!(format!("{token}"), "0x06000001");
        let debug_str = format!("{token:?}");
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }

    #[test]
    fn test_token_as_map_key() {
        let mut map = HashMap::new();
        map.insert(Token(0x0600_0001), "decrypt");
        map.insert(Token(0x0600_0002), "proxy");
        assert_eq!(map.get(&Token(0x0600_0001)), Some(&"decrypt"));
        assert_eq!(map.len(), 2);
    }
}
