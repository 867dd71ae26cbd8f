//! Error types for the hudicat core library.
//!
//! Every failure carries one of a small set of kinds ([`ErrorKind`]) that the
//! catalog facade surfaces unchanged, so callers can tell "table doesn't
//! exist" apart from "table exists but cannot be safely interpreted".

use std::fmt;
use thiserror::Error;

/// Result type alias for hudicat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Catalog entity named in `NotFound` / `AlreadyExists` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Schema,
    Table,
    Partition,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Schema => write!(f, "Schema"),
            Entity::Table => write!(f, "Table"),
            Entity::Partition => write!(f, "Partition"),
        }
    }
}

/// Stable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Unauthorized,
    UnsupportedType,
    InvalidMetadata,
    TransientUnavailable,
    NotEmpty,
    InvalidArgument,
    Config,
    Io,
}

/// Top-level error type for hudicat.
#[derive(Error, Debug)]
pub enum Error {
    /// Schema, table or partition is absent
    #[error("{entity} not found: {name}")]
    NotFound { entity: Entity, name: String },

    /// Create collided with an existing entity
    #[error("{entity} already exists: {name}")]
    AlreadyExists { entity: Entity, name: String },

    /// Permission denied by the Metastore
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Type has no representation on the other side of the mapping
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Hudi metadata is unreadable, malformed, or inconsistent with the Metastore
    #[error("Invalid metadata for {target}: {source}")]
    InvalidMetadata {
        target: String,
        #[source]
        source: MetadataError,
    },

    /// Connection, pool exhaustion or transport timeout
    #[error("Metastore unavailable: {0}")]
    TransientUnavailable(String),

    /// Drop of a non-empty schema without cascade
    #[error("Schema is not empty: {0}")]
    NotEmpty(String),

    /// Rejected request argument (names, predicates)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons Hudi metadata could not be interpreted.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// The `.hoodie` directory or `hoodie.properties` is missing
    #[error("Hudi timeline not found at {0}")]
    TimelineMissing(String),

    /// A timeline instant file could not be read or parsed
    #[error("Corrupt instant {instant}: {message}")]
    CorruptInstant { instant: String, message: String },

    /// `hoodie.properties` is malformed
    #[error("Invalid hoodie.properties: {0}")]
    InvalidProperties(String),

    /// No commit and no create schema carries a table schema
    #[error("No committed schema found")]
    NoSchema,

    /// Avro schema JSON is malformed
    #[error("Malformed Avro schema: {0}")]
    MalformedSchema(String),

    /// Metastore and timeline disagree on a property
    #[error("Conflicting {property}: metastore has '{metastore}', timeline has '{timeline}'")]
    Conflict {
        property: String,
        metastore: String,
        timeline: String,
    },

    /// Storage error while reading the timeline
    #[error("Storage error: {0}")]
    Storage(String),

    /// Metastore descriptor is not something this catalog can represent
    #[error("{0}")]
    Unrepresentable(String),

    /// The Metastore rejected a request with a server-side exception
    #[error("Metastore exception: {0}")]
    Rejected(String),
}

impl Error {
    /// Build a `NotFound` error.
    pub fn not_found(entity: Entity, name: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            name: name.into(),
        }
    }

    /// Build an `AlreadyExists` error.
    pub fn already_exists(entity: Entity, name: impl Into<String>) -> Self {
        Error::AlreadyExists {
            entity,
            name: name.into(),
        }
    }

    /// Build an `InvalidMetadata` error.
    pub fn invalid_metadata(target: impl Into<String>, source: MetadataError) -> Self {
        Error::InvalidMetadata {
            target: target.into(),
            source,
        }
    }

    /// The stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::UnsupportedType(_) => ErrorKind::UnsupportedType,
            Error::InvalidMetadata { .. } => ErrorKind::InvalidMetadata,
            Error::TransientUnavailable(_) => ErrorKind::TransientUnavailable,
            Error::NotEmpty(_) => ErrorKind::NotEmpty,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether a retry of the same idempotent call may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientUnavailable
    }
}

// Conversion implementations for external error types

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<object_store::Error> for MetadataError {
    fn from(err: object_store::Error) -> Self {
        MetadataError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let err = Error::not_found(Entity::Table, "sales.orders");
        assert_eq!(err.to_string(), "Table not found: sales.orders");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::already_exists(Entity::Schema, "sales").kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            Error::UnsupportedType("time".into()).kind(),
            ErrorKind::UnsupportedType
        );
        assert!(Error::TransientUnavailable("pool exhausted".into()).is_transient());
        assert!(!Error::not_found(Entity::Schema, "x").is_transient());
    }

    #[test]
    fn test_invalid_metadata_keeps_source() {
        let err = Error::invalid_metadata(
            "s3://bucket/sales/orders",
            MetadataError::CorruptInstant {
                instant: "20240101000000000.commit".into(),
                message: "EOF while parsing".into(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::InvalidMetadata);
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("20240101000000000.commit"));
    }
}
