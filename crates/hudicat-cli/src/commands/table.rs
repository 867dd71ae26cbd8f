//! Table command implementations.

use super::print_json;
use anyhow::Result;
use hudicat_core::{CatalogTable, HudiCatalog, TableProvider};
use serde::Serialize;
use std::collections::BTreeMap;

/// JSON view of a resolved table.
#[derive(Debug, Serialize)]
struct TableView<'a> {
    name: String,
    location: Option<&'a str>,
    table_type: String,
    comment: Option<&'a str>,
    columns: Vec<ColumnView<'a>>,
    partition_keys: &'a [String],
    properties: BTreeMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hudi: Option<HudiView<'a>>,
}

#[derive(Debug, Serialize)]
struct ColumnView<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    column_type: String,
    nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct HudiView<'a> {
    table_type: &'static str,
    record_key_fields: &'a [String],
    precombine_field: Option<&'a str>,
    base_path: &'a str,
    base_file_format: &'a str,
    schema_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_time: Option<String>,
    schema_drift: &'a [String],
}

impl<'a> From<&'a CatalogTable> for TableView<'a> {
    fn from(table: &'a CatalogTable) -> Self {
        Self {
            name: table.qualified_name(),
            location: table.location.as_deref(),
            table_type: table.table_type.as_metastore_str().to_string(),
            comment: table.comment.as_deref(),
            columns: table
                .columns
                .iter()
                .map(|c| ColumnView {
                    name: &c.name,
                    column_type: c.column_type.to_string(),
                    nullable: c.nullable,
                    comment: c.comment.as_deref(),
                })
                .collect(),
            partition_keys: &table.partition_keys,
            properties: table
                .properties
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            hudi: table.hudi.as_ref().map(|h| HudiView {
                table_type: h.table_type.as_str(),
                record_key_fields: &h.record_key_fields,
                precombine_field: h.precombine_field.as_deref(),
                base_path: &h.base_path,
                base_file_format: &h.base_file_format,
                schema_source: h.schema_source.to_string(),
                commit_time: h.schema_source.commit_time().map(|t| t.to_string()),
                schema_drift: &h.schema_drift,
            }),
        }
    }
}

/// List tables of a schema.
pub async fn list(catalog: &HudiCatalog, schema: &str, json: bool) -> Result<()> {
    let tables = catalog.list_tables(schema).await?;
    if json {
        return print_json(&tables);
    }
    for table in &tables {
        println!("{}", table);
    }
    Ok(())
}

/// Resolve and describe a table.
pub async fn describe(catalog: &HudiCatalog, schema: &str, table: &str, json: bool) -> Result<()> {
    let resolved = catalog.load_table(schema, table).await?;
    let view = TableView::from(&resolved);
    if json {
        return print_json(&view);
    }

    println!("Table:      {}", view.name);
    println!("Type:       {}", view.table_type);
    println!("Location:   {}", view.location.unwrap_or("-"));
    if let Some(comment) = view.comment {
        println!("Comment:    {}", comment);
    }

    println!("\nColumns:");
    let width = view.columns.iter().map(|c| c.name.len()).max().unwrap_or(0);
    for column in &view.columns {
        let partition = if view.partition_keys.iter().any(|k| k == column.name) {
            "  (partition)"
        } else {
            ""
        };
        let nullability = if column.nullable { "" } else { " not null" };
        println!(
            "  {:width$}  {}{}{}",
            column.name,
            column.column_type,
            nullability,
            partition,
            width = width
        );
    }

    if let Some(hudi) = &view.hudi {
        println!("\nHudi:");
        println!("  Table type:       {}", hudi.table_type);
        println!("  Record key:       {}", hudi.record_key_fields.join(", "));
        println!("  Precombine field: {}", hudi.precombine_field.unwrap_or("-"));
        println!("  Base path:        {}", hudi.base_path);
        println!("  Base file format: {}", hudi.base_file_format);
        println!("  Schema source:    {}", hudi.schema_source);
        if let Some(time) = &hudi.commit_time {
            println!("  Committed at:     {}", time);
        }
        if !hudi.schema_drift.is_empty() {
            println!("  Schema drift:");
            for drift in hudi.schema_drift {
                println!("    - {}", drift);
            }
        }
    }
    Ok(())
}

/// Drop a table's Metastore registration.
pub async fn drop(catalog: &HudiCatalog, schema: &str, table: &str) -> Result<()> {
    if catalog.drop_table(schema, table).await? {
        println!("Dropped table {}.{}", schema.to_lowercase(), table.to_lowercase());
    } else {
        println!(
            "Table {}.{} does not exist",
            schema.to_lowercase(),
            table.to_lowercase()
        );
    }
    Ok(())
}
