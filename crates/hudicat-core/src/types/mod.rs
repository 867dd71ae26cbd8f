//! Column type model and conversions.
//!
//! [`ColumnType`] is the catalog's native type system. Two external systems
//! map onto it:
//!
//! - Hive type strings as stored in Metastore column descriptors ([`hive`])
//! - Avro schemas as recorded in Hudi commit metadata ([`avro`])
//!
//! Conversions are pure and fail closed: a type with no exact counterpart is
//! an `UnsupportedType` error, never a silent fallback to `string`.

pub mod avro;
pub mod hive;

use crate::{Error, Result};
use std::fmt;

pub use avro::{fields_from_avro_schema, AvroSchemaError};
pub use hive::{to_catalog_type, to_external_type};

/// Largest decimal precision Hive can store.
pub const MAX_DECIMAL_PRECISION: u8 = 38;
/// Precision Hive assumes for a bare `decimal`.
pub const DEFAULT_DECIMAL_PRECISION: u8 = 10;
/// Longest `char(n)` Hive accepts.
pub const MAX_CHAR_LENGTH: u32 = 255;
/// Longest `varchar(n)` Hive accepts.
pub const MAX_VARCHAR_LENGTH: u32 = 65535;

/// Catalog column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    /// 8-bit signed integer
    Byte,
    /// 16-bit signed integer
    Short,
    /// 32-bit signed integer
    Integer,
    /// 64-bit signed integer
    Long,
    Float,
    Double,
    Decimal {
        precision: u8,
        scale: u8,
    },
    String,
    VarChar(u32),
    FixedChar(u32),
    Binary,
    Date,
    /// Timestamp without time zone
    Timestamp,
    /// Time of day; no Hive counterpart
    Time,
    IntervalYear,
    IntervalDay,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Struct(Vec<StructField>),
    Union(Vec<ColumnType>),
}

/// A named field of a struct type, or a top-level column read from a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub field_type: ColumnType,
    pub nullable: bool,
    pub comment: Option<String>,
}

impl StructField {
    /// Nullable field without a comment.
    pub fn new(name: impl Into<String>, field_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            comment: None,
        }
    }

    /// Set nullability.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set the comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

impl ColumnType {
    /// Validated decimal constructor.
    pub fn decimal(precision: u32, scale: u32) -> Result<Self> {
        if precision == 0 || precision > MAX_DECIMAL_PRECISION as u32 {
            return Err(Error::UnsupportedType(format!(
                "decimal precision {} outside 1..={}",
                precision, MAX_DECIMAL_PRECISION
            )));
        }
        if scale > precision {
            return Err(Error::UnsupportedType(format!(
                "decimal scale {} exceeds precision {}",
                scale, precision
            )));
        }
        Ok(ColumnType::Decimal {
            precision: precision as u8,
            scale: scale as u8,
        })
    }

    /// Validated `char(n)` constructor.
    pub fn fixed_char(length: u32) -> Result<Self> {
        if length == 0 || length > MAX_CHAR_LENGTH {
            return Err(Error::UnsupportedType(format!(
                "char length {} outside 1..={}",
                length, MAX_CHAR_LENGTH
            )));
        }
        Ok(ColumnType::FixedChar(length))
    }

    /// Validated `varchar(n)` constructor.
    pub fn varchar(length: u32) -> Result<Self> {
        if length == 0 || length > MAX_VARCHAR_LENGTH {
            return Err(Error::UnsupportedType(format!(
                "varchar length {} outside 1..={}",
                length, MAX_VARCHAR_LENGTH
            )));
        }
        Ok(ColumnType::VarChar(length))
    }

    /// Whether this is a non-nested type.
    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            ColumnType::List(_) | ColumnType::Map(..) | ColumnType::Struct(_) | ColumnType::Union(_)
        )
    }

    /// Storage width in bytes for fixed-width primitives.
    pub fn byte_width(&self) -> Option<usize> {
        match self {
            ColumnType::Boolean | ColumnType::Byte => Some(1),
            ColumnType::Short => Some(2),
            ColumnType::Integer | ColumnType::Float | ColumnType::Date => Some(4),
            ColumnType::IntervalYear => Some(4),
            ColumnType::Long | ColumnType::Double | ColumnType::Timestamp => Some(8),
            ColumnType::Time | ColumnType::IntervalDay => Some(8),
            ColumnType::Decimal { precision, .. } => Some(if *precision <= 18 { 8 } else { 16 }),
            ColumnType::FixedChar(n) => Some(*n as usize),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Byte => write!(f, "byte"),
            ColumnType::Short => write!(f, "short"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Long => write!(f, "long"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            ColumnType::String => write!(f, "string"),
            ColumnType::VarChar(n) => write!(f, "varchar({})", n),
            ColumnType::FixedChar(n) => write!(f, "char({})", n),
            ColumnType::Binary => write!(f, "binary"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Timestamp => write!(f, "timestamp"),
            ColumnType::Time => write!(f, "time"),
            ColumnType::IntervalYear => write!(f, "interval_year"),
            ColumnType::IntervalDay => write!(f, "interval_day"),
            ColumnType::List(element) => write!(f, "list<{}>", element),
            ColumnType::Map(key, value) => write!(f, "map<{},{}>", key, value),
            ColumnType::Struct(fields) => {
                write!(f, "struct<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", field.name, field.field_type)?;
                }
                write!(f, ">")
            }
            ColumnType::Union(types) => {
                write!(f, "union<")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ">")
            }
        }
    }
}
