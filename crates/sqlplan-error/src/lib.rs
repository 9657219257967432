use thiserror::Error;

/// Maximum number of FROM-list entries a single join may reference.
///
/// Bounded by the width of the cursor bitmask.
pub const MAX_JOIN_TABLES: usize = 64;

/// Primary error type for query planning and constraint code generation.
///
/// Every variant is a definite compilation outcome: no partial program is
/// emitted once one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    // === Schema Errors ===
    /// Too many FROM-list entries for the cursor bitmask.
    #[error("at most {max} tables in a join")]
    TooManyTables { max: usize },

    /// An `INDEXED BY` hint names an index the planner could not use.
    #[error("cannot use index: {name}")]
    CannotUseIndex { name: String },

    /// An `INDEXED BY` hint names an index that does not exist.
    #[error("no such index: {name}")]
    NoSuchIndex { name: String },

    /// No such table.
    #[error("no such table: {name}")]
    NoSuchTable { name: String },

    /// No such column.
    #[error("no such column: {name}")]
    NoSuchColumn { name: String },

    /// Column reference matches more than one FROM-list entry.
    #[error("ambiguous column name: {name}")]
    AmbiguousColumn { name: String },

    /// The parent key of a foreign key has no usable unique index.
    #[error("foreign key mismatch")]
    ForeignKeyMismatch { child: String, parent: String },

    // === Constraint Errors ===
    /// An immediate foreign-key constraint was violated.
    #[error("foreign key constraint failed")]
    ForeignKeyViolation,

    // === Virtual Table Errors ===
    /// A module consumed a constraint it was told was unusable.
    #[error("table {table}: xBestIndex returned an invalid plan")]
    VirtualTableInvalidPlan { table: String },

    /// A module reported an error from its planning callback.
    #[error("{0}")]
    VirtualTable(String),

    // === Resource Errors ===
    /// Allocation exhaustion during clause growth or plan construction.
    #[error("out of memory")]
    OutOfMemory,

    // === Internal Errors ===
    /// Internal planner defect.
    #[error("internal error: {0}")]
    Internal(String),

    /// Feature not yet implemented.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// SQLite result/error codes for compatibility with the surrounding engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Generic error.
    Error = 1,
    /// Internal logic error.
    Internal = 2,
    /// Out of memory.
    NoMem = 7,
    /// Constraint violation.
    Constraint = 19,
}

impl PlanError {
    /// Map this error to a SQLite error code.
    #[allow(clippy::match_same_arms)]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::TooManyTables { .. }
            | Self::CannotUseIndex { .. }
            | Self::NoSuchIndex { .. }
            | Self::NoSuchTable { .. }
            | Self::NoSuchColumn { .. }
            | Self::AmbiguousColumn { .. }
            | Self::ForeignKeyMismatch { .. }
            | Self::VirtualTableInvalidPlan { .. }
            | Self::VirtualTable(_)
            | Self::NotImplemented(_) => ErrorCode::Error,
            Self::ForeignKeyViolation => ErrorCode::Constraint,
            Self::OutOfMemory => ErrorCode::NoMem,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether this error reflects bad input against the schema (as opposed
    /// to a planner defect or resource exhaustion).
    pub const fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Self::TooManyTables { .. }
                | Self::CannotUseIndex { .. }
                | Self::NoSuchIndex { .. }
                | Self::NoSuchTable { .. }
                | Self::NoSuchColumn { .. }
                | Self::AmbiguousColumn { .. }
                | Self::ForeignKeyMismatch { .. }
                | Self::VirtualTableInvalidPlan { .. }
                | Self::VirtualTable(_)
        )
    }

    /// Whether this error indicates a defect in the planner itself.
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::TooManyTables { .. } => Some("Split the query or materialize part of the join"),
            Self::CannotUseIndex { .. } => {
                Some("Remove the INDEXED BY clause or add a constraint on the index columns")
            }
            Self::ForeignKeyMismatch { .. } => {
                Some("Create a UNIQUE index on the parent key columns using their default collation")
            }
            _ => None,
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a virtual-table module error.
    pub fn virtual_table(msg: impl Into<String>) -> Self {
        Self::VirtualTable(msg.into())
    }

    /// Create a not-implemented error.
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented(feature.into())
    }

    /// Create a cannot-use-index error.
    pub fn cannot_use_index(name: impl Into<String>) -> Self {
        Self::CannotUseIndex { name: name.into() }
    }
}

/// Result type alias using `PlanError`.
pub type Result<T> = std::result::Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_too_many_tables() {
        let err = PlanError::TooManyTables {
            max: MAX_JOIN_TABLES,
        };
        assert_eq!(err.to_string(), "at most 64 tables in a join");
    }

    #[test]
    fn error_display_index_hint() {
        assert_eq!(
            PlanError::cannot_use_index("i1").to_string(),
            "cannot use index: i1"
        );
        let err = PlanError::NoSuchIndex {
            name: "nope".to_owned(),
        };
        assert_eq!(err.to_string(), "no such index: nope");
    }

    #[test]
    fn error_display_foreign_key() {
        let err = PlanError::ForeignKeyMismatch {
            child: "c".to_owned(),
            parent: "p".to_owned(),
        };
        assert_eq!(err.to_string(), "foreign key mismatch");
        assert_eq!(
            PlanError::ForeignKeyViolation.to_string(),
            "foreign key constraint failed"
        );
    }

    #[test]
    fn error_display_virtual_table() {
        let err = PlanError::VirtualTableInvalidPlan {
            table: "vt".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "table vt: xBestIndex returned an invalid plan"
        );
        assert_eq!(
            PlanError::virtual_table("module said no").to_string(),
            "module said no"
        );
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(
            PlanError::cannot_use_index("x").error_code(),
            ErrorCode::Error
        );
        assert_eq!(
            PlanError::ForeignKeyViolation.error_code(),
            ErrorCode::Constraint
        );
        assert_eq!(PlanError::OutOfMemory.error_code(), ErrorCode::NoMem);
        assert_eq!(PlanError::internal("bug").error_code(), ErrorCode::Internal);
    }

    #[test]
    fn schema_error_classification() {
        assert!(PlanError::TooManyTables { max: 64 }.is_schema_error());
        assert!(PlanError::virtual_table("x").is_schema_error());
        assert!(!PlanError::OutOfMemory.is_schema_error());
        assert!(!PlanError::internal("bug").is_schema_error());
        assert!(PlanError::internal("bug").is_internal());
    }

    #[test]
    fn suggestions_present_for_schema_errors() {
        assert!(PlanError::TooManyTables { max: 64 }.suggestion().is_some());
        assert!(PlanError::OutOfMemory.suggestion().is_none());
    }
}
