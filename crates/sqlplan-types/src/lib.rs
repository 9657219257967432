pub mod opcode;
pub mod schema;
pub mod value;

pub use opcode::{Label, Opcode, P4, ProgramBuilder, VdbeOp, VdbeProgram};
pub use schema::{
    Column, FkAction, FkColumn, ForeignKey, Index, IndexColumn, IndexOrigin, OnError, Schema,
    SortOrder, Table,
};
pub use value::SqliteValue;

use std::cmp::Ordering;

/// Name of the default collating sequence.
pub const BINARY: &str = "BINARY";
/// Name of the ASCII case-insensitive collating sequence.
pub const NOCASE: &str = "NOCASE";
/// Name of the trailing-space-insensitive collating sequence.
pub const RTRIM: &str = "RTRIM";

/// SQLite type affinity, used for column type resolution and comparison
/// coercion.
///
/// `Blob` doubles as the "no affinity" marker (`SQLITE_AFF_NONE`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum TypeAffinity {
    /// Column prefers integer storage. Includes INTEGER, INT, TINYINT, etc.
    Integer = b'D',
    /// Column prefers text storage. Includes TEXT, VARCHAR, CLOB.
    Text = b'B',
    /// Column has no preference. Includes BLOB or no type specified.
    Blob = b'A',
    /// Column prefers real (float) storage. Includes REAL, DOUBLE, FLOAT.
    Real = b'E',
    /// Column prefers numeric storage. Includes NUMERIC, DECIMAL, BOOLEAN,
    /// DATE, DATETIME.
    Numeric = b'C',
}

impl TypeAffinity {
    /// Determine the type affinity for a declared column type name.
    ///
    /// First-match rule:
    /// 1. Contains "INT" → INTEGER
    /// 2. Contains "CHAR", "CLOB", or "TEXT" → TEXT
    /// 3. Contains "BLOB" or is empty → BLOB
    /// 4. Contains "REAL", "FLOA", or "DOUB" → REAL
    /// 5. Otherwise → NUMERIC
    pub fn from_type_name(type_name: &str) -> Self {
        let upper = type_name.to_ascii_uppercase();

        if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Self::Text
        } else if upper.is_empty() || upper.contains("BLOB") {
            Self::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Real
        } else {
            Self::Numeric
        }
    }

    /// True for INTEGER, REAL and NUMERIC.
    #[inline]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real | Self::Numeric)
    }

    /// The single-character code used in affinity strings.
    #[inline]
    pub const fn as_char(self) -> char {
        self as u8 as char
    }

    /// Parse an affinity-string character.
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            'D' => Some(Self::Integer),
            'B' => Some(Self::Text),
            'A' => Some(Self::Blob),
            'E' => Some(Self::Real),
            'C' => Some(Self::Numeric),
            _ => None,
        }
    }

    /// Combine the affinities of the two operands of a comparison.
    ///
    /// `None` stands for an operand with no affinity (a literal or an
    /// arbitrary expression). If both sides have an affinity, numeric wins,
    /// otherwise the comparison is done without coercion (`Blob`). If only
    /// one side has an affinity, that one is used.
    pub const fn compare(left: Option<Self>, right: Option<Self>) -> Self {
        match (left, right) {
            (Some(l), Some(r)) => {
                if l.is_numeric() || r.is_numeric() {
                    Self::Numeric
                } else {
                    Self::Blob
                }
            }
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => Self::Blob,
        }
    }

    /// Whether an index column with affinity `index_affinity` can be used to
    /// evaluate a comparison whose combined affinity is `self`.
    pub const fn index_usable_for(self, index_affinity: Self) -> bool {
        match self {
            Self::Blob => true,
            Self::Text => matches!(index_affinity, Self::Text),
            _ => index_affinity.is_numeric(),
        }
    }
}

/// Case-insensitive equality of collating-sequence names.
#[inline]
pub fn collation_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Compare two strings under a named built-in collating sequence.
///
/// Unknown collation names compare as BINARY.
pub fn collate_str(a: &str, b: &str, collation: &str) -> Ordering {
    if collation_eq(collation, NOCASE) {
        let la = a.bytes().map(|c| c.to_ascii_lowercase());
        let lb = b.bytes().map(|c| c.to_ascii_lowercase());
        la.cmp(lb)
    } else if collation_eq(collation, RTRIM) {
        a.trim_end_matches(' ').cmp(b.trim_end_matches(' '))
    } else {
        a.as_bytes().cmp(b.as_bytes())
    }
}
