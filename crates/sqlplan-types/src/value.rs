use std::cmp::Ordering;
use std::fmt;

use crate::{TypeAffinity, collate_str};

/// A dynamically-typed SQLite value.
///
/// SQLite has five fundamental storage classes: NULL, INTEGER, REAL, TEXT,
/// and BLOB. Values appear here as bound parameters, histogram samples and
/// literal operands.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum SqliteValue {
    /// SQL NULL.
    Null,
    /// A 64-bit signed integer.
    Integer(i64),
    /// A 64-bit IEEE 754 floating-point number.
    Float(f64),
    /// A UTF-8 text string.
    Text(String),
    /// A binary large object.
    Blob(Vec<u8>),
}

impl SqliteValue {
    /// Returns the type affinity that best describes this value.
    pub const fn affinity(&self) -> TypeAffinity {
        match self {
            Self::Null | Self::Blob(_) => TypeAffinity::Blob,
            Self::Integer(_) => TypeAffinity::Integer,
            Self::Float(_) => TypeAffinity::Real,
            Self::Text(_) => TypeAffinity::Text,
        }
    }

    /// Sort class: NULL < numeric < text < blob.
    pub const fn sort_class(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Integer(_) | Self::Float(_) => 1,
            Self::Text(_) => 2,
            Self::Blob(_) => 3,
        }
    }

    /// Whether this is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this is an INTEGER or REAL.
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }

    /// Borrow the text content, if this is TEXT.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value as f64 (NULL, TEXT and BLOB read as 0.0 unless the text
    /// parses as a number).
    #[allow(clippy::cast_precision_loss)]
    pub fn to_float(&self) -> f64 {
        match self {
            Self::Integer(i) => *i as f64,
            Self::Float(f) => *f,
            Self::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            Self::Null | Self::Blob(_) => 0.0,
        }
    }

    /// Apply column type affinity coercion (advisory mode).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn apply_affinity(self, affinity: TypeAffinity) -> Self {
        match affinity {
            TypeAffinity::Blob => self,
            TypeAffinity::Text => match self {
                Self::Integer(i) => Self::Text(i.to_string()),
                Self::Float(f) => Self::Text(format_float(f)),
                other => other,
            },
            TypeAffinity::Numeric | TypeAffinity::Integer => match &self {
                Self::Text(s) => coerce_text_to_numeric(s).unwrap_or(self),
                Self::Float(f) if affinity == TypeAffinity::Integer => {
                    let i = *f as i64;
                    if (i as f64) == *f { Self::Integer(i) } else { self }
                }
                _ => self,
            },
            TypeAffinity::Real => match &self {
                Self::Text(s) => coerce_text_to_numeric(s)
                    .map(|v| match v {
                        Self::Integer(i) => Self::Float(i as f64),
                        other => other,
                    })
                    .unwrap_or(self),
                Self::Integer(i) => Self::Float(*i as f64),
                _ => self,
            },
        }
    }

    /// Compare two values in index order using a named collating sequence
    /// for TEXT operands.
    pub fn collate_cmp(&self, other: &Self, collation: &str) -> Ordering {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => collate_str(a, b, collation),
            _ => self.partial_cmp(other).unwrap_or(Ordering::Equal),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn coerce_text_to_numeric(s: &str) -> Option<SqliteValue> {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(SqliteValue::Integer(i));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(SqliteValue::Float)
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

#[allow(clippy::cast_precision_loss)]
fn int_float_cmp(i: i64, f: f64) -> Ordering {
    (i as f64).partial_cmp(&f).unwrap_or(Ordering::Less)
}

impl fmt::Display for SqliteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&format_float(*v)),
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Blob(b) => {
                f.write_str("X'")?;
                for byte in b {
                    write!(f, "{byte:02X}")?;
                }
                f.write_str("'")
            }
        }
    }
}

impl PartialEq for SqliteValue {
    fn eq(&self, other: &Self) -> bool {
        matches!(self.partial_cmp(other), Some(Ordering::Equal))
    }
}

impl PartialOrd for SqliteValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let class_a = self.sort_class();
        let class_b = other.sort_class();

        if class_a != class_b {
            return Some(class_a.cmp(&class_b));
        }

        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Integer(a), Self::Float(b)) => Some(int_float_cmp(*a, *b)),
            (Self::Float(a), Self::Integer(b)) => Some(int_float_cmp(*b, *a).reverse()),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Blob(a), Self::Blob(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<i64> for SqliteValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for SqliteValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for SqliteValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for SqliteValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for SqliteValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for SqliteValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Blob(b)
    }
}

impl<T: Into<Self>> From<Option<T>> for SqliteValue {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NOCASE;

    #[test]
    fn test_sort_class_ordering() {
        let null = SqliteValue::Null;
        let int = SqliteValue::Integer(5);
        let text = SqliteValue::from("a");
        let blob = SqliteValue::Blob(vec![0]);
        assert!(null < int);
        assert!(int < text);
        assert!(text < blob);
    }

    #[test]
    fn test_mixed_numeric_compare() {
        assert!(SqliteValue::Integer(2) < SqliteValue::Float(2.5));
        assert!(SqliteValue::Float(3.0) == SqliteValue::Integer(3));
    }

    #[test]
    fn test_collate_cmp_nocase() {
        let a = SqliteValue::from("Apple");
        let b = SqliteValue::from("apple");
        assert_eq!(a.collate_cmp(&b, NOCASE), Ordering::Equal);
        assert_ne!(a.collate_cmp(&b, "BINARY"), Ordering::Equal);
    }

    #[test]
    fn test_apply_affinity() {
        assert_eq!(
            SqliteValue::from("42").apply_affinity(TypeAffinity::Integer),
            SqliteValue::Integer(42)
        );
        assert_eq!(
            SqliteValue::Integer(7).apply_affinity(TypeAffinity::Text),
            SqliteValue::from("7")
        );
        assert_eq!(
            SqliteValue::Integer(7).apply_affinity(TypeAffinity::Real),
            SqliteValue::Float(7.0)
        );
        assert_eq!(
            SqliteValue::from("abc").apply_affinity(TypeAffinity::Numeric),
            SqliteValue::from("abc")
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(SqliteValue::Null.to_string(), "NULL");
        assert_eq!(SqliteValue::from("x").to_string(), "'x'");
        assert_eq!(SqliteValue::Blob(vec![0xAB]).to_string(), "X'AB'");
    }
}
