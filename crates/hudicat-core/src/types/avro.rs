//! Avro schemas recorded in Hudi commit metadata.

use super::{ColumnType, StructField};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Why an Avro schema could not be mapped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AvroSchemaError {
    /// Not valid JSON or not a valid Avro schema
    #[error("{0}")]
    Malformed(String),

    /// Valid Avro with no catalog counterpart
    #[error("{0}")]
    Unsupported(String),
}

type AvroResult<T> = std::result::Result<T, AvroSchemaError>;

/// Map the top-level record of an Avro schema to ordered catalog fields.
pub fn fields_from_avro_schema(schema_json: &str) -> AvroResult<Vec<StructField>> {
    let schema: Value = serde_json::from_str(schema_json)
        .map_err(|e| AvroSchemaError::Malformed(format!("invalid JSON: {}", e)))?;

    let mut mapper = AvroMapper::default();
    let record = schema
        .as_object()
        .filter(|o| o.get("type").and_then(Value::as_str) == Some("record"))
        .ok_or_else(|| AvroSchemaError::Malformed("top-level schema is not a record".into()))?;

    mapper.enter(record, None);
    mapper.record_fields(record, None)
}

/// Named types seen so far, for references like `"com.acme.Address"`.
#[derive(Default)]
struct AvroMapper {
    named: HashMap<String, ColumnType>,
    /// Records whose fields are being mapped
    defining: HashSet<String>,
}

/// Full and short name of a named schema.
fn schema_names(object: &Map<String, Value>, namespace: Option<&str>) -> Option<(String, String)> {
    let name = object.get("name").and_then(Value::as_str)?;
    let namespace = object
        .get("namespace")
        .and_then(Value::as_str)
        .or(namespace);
    let full = match namespace {
        Some(ns) if !name.contains('.') && !ns.is_empty() => format!("{}.{}", ns, name),
        _ => name.to_string(),
    };
    let short = full.rsplit('.').next().unwrap_or(&full).to_string();
    Some((full, short))
}

impl AvroMapper {
    fn register(&mut self, object: &Map<String, Value>, namespace: Option<&str>, t: &ColumnType) {
        if let Some((full, short)) = schema_names(object, namespace) {
            self.named.insert(full, t.clone());
            self.named.entry(short).or_insert_with(|| t.clone());
        }
    }

    /// Mark a record as being defined; references to it are recursive.
    fn enter(&mut self, object: &Map<String, Value>, namespace: Option<&str>) -> Option<(String, String)> {
        let names = schema_names(object, namespace)?;
        self.defining.insert(names.0.clone());
        self.defining.insert(names.1.clone());
        Some(names)
    }

    fn leave(&mut self, names: Option<(String, String)>) {
        if let Some((full, short)) = names {
            self.defining.remove(&full);
            self.defining.remove(&short);
        }
    }

    fn record_fields(
        &mut self,
        record: &Map<String, Value>,
        namespace: Option<&str>,
    ) -> AvroResult<Vec<StructField>> {
        let namespace = record
            .get("namespace")
            .and_then(Value::as_str)
            .or(namespace)
            .map(String::from);
        let fields = record
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| AvroSchemaError::Malformed("record without fields".into()))?;

        let mut out = Vec::with_capacity(fields.len());
        for field in fields {
            let name = field
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| AvroSchemaError::Malformed("field without name".into()))?;
            let field_schema = field.get("type").ok_or_else(|| {
                AvroSchemaError::Malformed(format!("field '{}' without type", name))
            })?;
            let (field_type, nullable) = self
                .map_type(field_schema, namespace.as_deref())
                .map_err(|e| match e {
                    AvroSchemaError::Unsupported(msg) => {
                        AvroSchemaError::Unsupported(format!("field '{}': {}", name, msg))
                    }
                    other => other,
                })?;

            let mut mapped = StructField::new(name, field_type).with_nullable(nullable);
            if let Some(doc) = field.get("doc").and_then(Value::as_str) {
                mapped = mapped.with_comment(doc);
            }
            out.push(mapped);
        }
        Ok(out)
    }

    /// Map a schema node; returns the type and whether it admits null.
    fn map_type(&mut self, schema: &Value, namespace: Option<&str>) -> AvroResult<(ColumnType, bool)> {
        match schema {
            Value::String(name) => self.map_named(name).map(|t| (t, false)),
            Value::Array(branches) => self.map_union(branches, namespace),
            Value::Object(object) => self.map_complex(object, namespace).map(|t| (t, false)),
            other => Err(AvroSchemaError::Malformed(format!(
                "unexpected schema node {}",
                other
            ))),
        }
    }

    fn map_named(&self, name: &str) -> AvroResult<ColumnType> {
        match name {
            "boolean" => Ok(ColumnType::Boolean),
            "int" => Ok(ColumnType::Integer),
            "long" => Ok(ColumnType::Long),
            "float" => Ok(ColumnType::Float),
            "double" => Ok(ColumnType::Double),
            "bytes" => Ok(ColumnType::Binary),
            "string" => Ok(ColumnType::String),
            "null" => Err(AvroSchemaError::Unsupported(
                "bare null type has no catalog counterpart".into(),
            )),
            other if self.defining.contains(other) => Err(AvroSchemaError::Unsupported(format!(
                "recursive type '{}' has no catalog counterpart",
                other
            ))),
            other => self
                .named
                .get(other)
                .cloned()
                .ok_or_else(|| AvroSchemaError::Malformed(format!("unknown type '{}'", other))),
        }
    }

    fn map_union(&mut self, branches: &[Value], namespace: Option<&str>) -> AvroResult<(ColumnType, bool)> {
        let mut nullable = false;
        let mut members = Vec::with_capacity(branches.len());
        for branch in branches {
            if branch.as_str() == Some("null") {
                nullable = true;
                continue;
            }
            members.push(self.map_type(branch, namespace)?.0);
        }

        match members.len() {
            0 => Err(AvroSchemaError::Unsupported(
                "union of only null has no catalog counterpart".into(),
            )),
            1 => Ok((members.remove(0), nullable)),
            _ => Ok((ColumnType::Union(members), nullable)),
        }
    }

    fn map_complex(&mut self, object: &Map<String, Value>, namespace: Option<&str>) -> AvroResult<ColumnType> {
        let type_node = object
            .get("type")
            .ok_or_else(|| AvroSchemaError::Malformed("schema object without type".into()))?;

        if let Some(logical) = object.get("logicalType").and_then(Value::as_str) {
            if let Some(mapped) = self.map_logical(logical, object)? {
                return Ok(mapped);
            }
        }

        let type_name = match type_node {
            Value::String(name) => name.as_str(),
            // {"type": {...}} or {"type": [...]} wraps another schema
            nested => return self.map_type(nested, namespace).map(|(t, _)| t),
        };

        match type_name {
            "record" => {
                let names = self.enter(object, namespace);
                let fields = self.record_fields(object, namespace);
                self.leave(names);
                let fields = fields?;
                if fields.is_empty() {
                    return Err(AvroSchemaError::Unsupported("record without fields".into()));
                }
                let t = ColumnType::Struct(fields);
                self.register(object, namespace, &t);
                Ok(t)
            }
            "enum" => {
                let t = ColumnType::String;
                self.register(object, namespace, &t);
                Ok(t)
            }
            "fixed" => {
                let t = ColumnType::Binary;
                self.register(object, namespace, &t);
                Ok(t)
            }
            "array" => {
                let items = object
                    .get("items")
                    .ok_or_else(|| AvroSchemaError::Malformed("array without items".into()))?;
                let (element, _) = self.map_type(items, namespace)?;
                Ok(ColumnType::List(Box::new(element)))
            }
            "map" => {
                let values = object
                    .get("values")
                    .ok_or_else(|| AvroSchemaError::Malformed("map without values".into()))?;
                let (value, _) = self.map_type(values, namespace)?;
                Ok(ColumnType::Map(Box::new(ColumnType::String), Box::new(value)))
            }
            primitive => self.map_named(primitive),
        }
    }

    /// Logical types; unknown ones fall back to the underlying type.
    fn map_logical(&self, logical: &str, object: &Map<String, Value>) -> AvroResult<Option<ColumnType>> {
        let mapped = match logical {
            "decimal" => {
                let precision = object
                    .get("precision")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| AvroSchemaError::Malformed("decimal without precision".into()))?;
                let scale = object.get("scale").and_then(Value::as_u64).unwrap_or(0);
                let precision = u32::try_from(precision).map_err(|_| {
                    AvroSchemaError::Malformed(format!("decimal precision {} out of range", precision))
                })?;
                let scale = u32::try_from(scale).map_err(|_| {
                    AvroSchemaError::Malformed(format!("decimal scale {} out of range", scale))
                })?;
                let decimal = ColumnType::decimal(precision, scale)
                    .map_err(|e| AvroSchemaError::Unsupported(e.to_string()))?;
                Some(decimal)
            }
            "date" => Some(ColumnType::Date),
            "timestamp-millis" | "timestamp-micros" | "local-timestamp-millis"
            | "local-timestamp-micros" => Some(ColumnType::Timestamp),
            "time-millis" | "time-micros" => Some(ColumnType::Time),
            "uuid" => Some(ColumnType::String),
            _ => None,
        };
        Ok(mapped)
    }
}
