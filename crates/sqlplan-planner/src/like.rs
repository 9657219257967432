//! LIKE/GLOB prefix optimization.
//!
//! `col LIKE 'abc%'` can be answered by the range `col >= 'abc' AND
//! col < 'abd'` on an index whose collation matches the operator's case
//! sensitivity. This module recognizes the shape and computes the bounds.

use sqlplan_ast::{Expr, ExprKind, LikeOp};
use sqlplan_types::{SqliteValue, TypeAffinity};

/// The literal prefix of a LIKE/GLOB pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikePrefix {
    /// Characters before the first wildcard.
    pub prefix: String,
    /// The pattern is exactly `prefix` followed by one match-all wildcard,
    /// so the range alone decides the match.
    pub is_complete: bool,
    /// Case-insensitive comparison (LIKE without `case_sensitive_like`).
    pub no_case: bool,
    /// Bound parameter the pattern came from.
    pub variable: Option<i32>,
}

/// Recognize `column LIKE/GLOB pattern` with a usable literal prefix.
///
/// The left side must be a TEXT column; the pattern must be a string
/// literal or a bound parameter currently holding text. ESCAPE and NOT
/// disable the optimization.
pub fn is_like_or_glob(
    expr: &Expr,
    case_sensitive_like: bool,
    bound_values: &[SqliteValue],
) -> Option<LikePrefix> {
    let ExprKind::Like {
        op,
        expr: column,
        pattern,
        escape: None,
        not: false,
    } = &expr.kind
    else {
        return None;
    };
    let (wildcards, match_all, no_case): (&[char], char, bool) = match op {
        LikeOp::Like => (&['%', '_'], '%', !case_sensitive_like),
        LikeOp::Glob => (&['*', '?', '['], '*', false),
        LikeOp::Match | LikeOp::Regexp => return None,
    };
    if column.as_column().is_none() || column.affinity() != Some(TypeAffinity::Text) {
        return None;
    }

    let (text, variable) = match &pattern.kind {
        ExprKind::Literal(SqliteValue::Text(s)) => (s.as_str(), None),
        ExprKind::Variable(n) => {
            let idx = usize::try_from(*n).ok()?.checked_sub(1)?;
            match bound_values.get(idx) {
                Some(SqliteValue::Text(s)) => (s.as_str(), Some(*n)),
                _ => return None,
            }
        }
        _ => return None,
    };

    let cut = text.find(|c| wildcards.contains(&c)).unwrap_or(text.len());
    if cut == 0 {
        return None;
    }
    let prefix = &text[..cut];
    let rest = &text[cut..];
    let is_complete = rest.len() == match_all.len_utf8() && rest.starts_with(match_all);
    Some(LikePrefix {
        prefix: prefix.to_owned(),
        is_complete,
        no_case,
        variable,
    })
}

/// The smallest string greater than every string starting with `prefix`,
/// obtained by incrementing its last character.
///
/// Returns the successor and whether it is exact. Under case-insensitive
/// comparison the last character is folded to lower case first, and `@`
/// (which sorts just before the upper-case letters) cannot be bumped
/// exactly.
pub fn prefix_successor(prefix: &str, no_case: bool) -> Option<(String, bool)> {
    let mut chars: Vec<char> = prefix.chars().collect();
    let last = chars.pop()?;
    let mut exact = true;
    let mut c = last;
    if no_case {
        if c == '@' {
            exact = false;
        }
        c = c.to_ascii_lowercase();
    }
    let next = char::from_u32(u32::from(c) + 1)?;
    chars.push(next);
    Some((chars.into_iter().collect(), exact))
}
