//! Metadata tokens as they appear in CIL operands, locals signatures and exception clauses.

use std::fmt;

use strum::{Display, EnumIter, FromRepr};

/// The metadata tables a coverage rewrite ever references.
///
/// Only the tables that show up in probe sequences, helper bodies and exception clauses are
/// listed; any other table byte is reported as `None` by [`Token::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u8)]
pub enum TokenKind {
    /// `TypeRef` (0x01), catch types declared outside the module
    TypeRef = 0x01,
    /// `TypeDef` (0x02), catch types declared in the module
    TypeDef = 0x02,
    /// `Field` (0x04), correlation id fields
    Field = 0x04,
    /// `MethodDef` (0x06), the cuckoo helpers themselves
    MethodDef = 0x06,
    /// `MemberRef` (0x0A), references to the safe helper from other modules
    MemberRef = 0x0A,
    /// `StandAloneSig` (0x11), `calli` signatures and locals signatures
    StandAloneSig = 0x11,
    /// `TypeSpec` (0x1B), generic catch types
    TypeSpec = 0x1B,
}

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// The nil token, used for "no locals signature" and "no catch type"
    pub const NULL: Token = Token(0);

    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table and a row index
    #[must_use]
    pub const fn from_parts(kind: TokenKind, row: u32) -> Self {
        Token(((kind as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The known table this token points into, if any
    #[must_use]
    pub fn kind(&self) -> Option<TokenKind> {
        TokenKind::from_repr(self.table())
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// `None` for the nil token, `Some(self)` otherwise
    #[must_use]
    pub fn non_null(self) -> Option<Token> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
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
