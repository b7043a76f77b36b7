//! Error types for SQLEntity operations.
//!
//! The taxonomy is deliberately small:
//!
//! - [`MappingError`] - field access, conversion and metadata failures
//! - [`SqlExecutionError`] - anything the driver reported while running a statement
//! - [`IllegalStateError`] - an invalid transaction state transition
//!
//! A missing row is never an error; lookups return `Ok(None)` instead.

use std::fmt;

/// The primary error type for all SQLEntity operations.
#[derive(Debug)]
pub enum Error {
    /// Field access, value conversion or descriptor errors
    Mapping(MappingError),
    /// Driver-level failure while executing a statement
    Sql(SqlExecutionError),
    /// Invalid state transition (e.g. commit without begin)
    IllegalState(IllegalStateError),
    /// Configuration errors
    Config(ConfigError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    /// Entity type the failure relates to, if known
    pub entity: Option<&'static str>,
    /// Field name the failure relates to, if known
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// Reading or writing a field failed (includes poisoned entity locks)
    FieldAccess,
    /// A value could not be converted to the field's declared type
    Conversion,
    /// The entity has no id value where one is required
    MissingId,
    /// A field or column name is not part of the descriptor
    UnknownField,
    /// No descriptor is registered for the requested entity type
    UnregisteredType,
    /// Descriptor construction violated an invariant
    InvalidDescriptor,
    /// An eager relationship chain re-entered an entity still being loaded
    EagerCycle,
}

#[derive(Debug)]
pub struct SqlExecutionError {
    /// The SQL text that failed, when known
    pub sql: Option<String>,
    /// SQLSTATE code reported by the driver, if any
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct IllegalStateError {
    /// Operation that was attempted ("begin", "commit", "remove", ...)
    pub operation: &'static str,
    /// State the operation was attempted from
    pub state: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl MappingError {
    /// Create a mapping error of the given kind.
    pub fn new(kind: MappingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            entity: None,
            field: None,
            message: message.into(),
        }
    }

    /// Attach the entity type name.
    #[must_use]
    pub fn entity(mut self, entity: &'static str) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Attach the field name.
    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl SqlExecutionError {
    /// Create a driver error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            sql: None,
            sqlstate: None,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the SQL text.
    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Attach a SQLSTATE code.
    #[must_use]
    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23503")
    }
}

impl Error {
    /// Shorthand for a mapping error.
    pub fn mapping(kind: MappingErrorKind, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError::new(kind, message))
    }

    /// Shorthand for an illegal transaction-state transition.
    pub fn illegal_state(operation: &'static str, state: impl fmt::Display) -> Self {
        Error::IllegalState(IllegalStateError {
            operation,
            state: state.to_string(),
        })
    }

    /// Wrap this error as a [`SqlExecutionError`] for the given statement.
    ///
    /// Errors that already are SQL execution errors keep their details and only
    /// gain the SQL text if they did not carry one.
    #[must_use]
    pub fn into_sql_error(self, sql: &str) -> Self {
        match self {
            Error::Sql(mut e) => {
                if e.sql.is_none() {
                    e.sql = Some(sql.to_string());
                }
                Error::Sql(e)
            }
            other => Error::Sql(SqlExecutionError {
                sql: Some(sql.to_string()),
                sqlstate: None,
                message: other.to_string(),
                source: Some(Box::new(other)),
            }),
        }
    }

    /// The mapping error kind, if this is a mapping error.
    pub fn mapping_kind(&self) -> Option<MappingErrorKind> {
        match self {
            Error::Mapping(m) => Some(m.kind),
            _ => None,
        }
    }

    /// Is this an invalid transaction-state transition?
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Error::IllegalState(_))
    }

    /// Is this a wrapped driver failure?
    pub fn is_sql(&self) -> bool {
        matches!(self, Error::Sql(_))
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Sql(e) => e.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Sql(e) => e.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mapping(e) => write!(f, "Mapping error: {}", e),
            Error::Sql(e) => write!(f, "SQL execution error: {}", e),
            Error::IllegalState(e) => write!(f, "Illegal state: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Sql(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.entity, &self.field) {
            (Some(entity), Some(field)) => write!(f, "{}.{}: {}", entity, field, self.message),
            (Some(entity), None) => write!(f, "{}: {}", entity, self.message),
            (None, Some(field)) => write!(f, "field '{}': {}", field, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for SqlExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)?;
        } else {
            write!(f, "{}", self.message)?;
        }
        if let Some(sql) = &self.sql {
            write!(f, " [{}]", sql)?;
        }
        Ok(())
    }
}

impl fmt::Display for IllegalStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot {} in state {}",
            self.operation, self.state
        )
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<SqlExecutionError> for Error {
    fn from(err: SqlExecutionError) -> Self {
        Error::Sql(err)
    }
}

impl From<IllegalStateError> for Error {
    fn from(err: IllegalStateError) -> Self {
        Error::IllegalState(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for SQLEntity operations.
pub type Result<T> = std::result::Result<T, Error>;
