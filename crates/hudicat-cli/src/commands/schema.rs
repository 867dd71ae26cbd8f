//! Schema command implementations.

use super::print_json;
use anyhow::Result;
use hudicat_core::{HudiCatalog, SchemaProvider};
use std::collections::HashMap;
use tracing::info;

/// List schemas.
pub async fn list(catalog: &HudiCatalog, json: bool) -> Result<()> {
    let schemas = catalog.list_schemas().await?;
    if json {
        return print_json(&schemas);
    }
    for schema in &schemas {
        println!("{}", schema);
    }
    Ok(())
}

/// Show one schema.
pub async fn show(catalog: &HudiCatalog, name: &str, json: bool) -> Result<()> {
    let schema = catalog.load_schema(name).await?;
    if json {
        return print_json(&schema);
    }

    println!("Schema:   {}.{}", schema.catalog, schema.name);
    println!("Location: {}", schema.location.as_deref().unwrap_or("-"));
    if let Some(comment) = &schema.comment {
        println!("Comment:  {}", comment);
    }
    if let Some(owner) = &schema.owner {
        println!("Owner:    {}", owner);
    }
    if !schema.properties.is_empty() {
        println!("Properties:");
        let mut properties: Vec<_> = schema.properties.iter().collect();
        properties.sort();
        for (key, value) in properties {
            println!("  {} = {}", key, value);
        }
    }
    Ok(())
}

/// Create a schema.
pub async fn create(
    catalog: &HudiCatalog,
    name: &str,
    comment: Option<String>,
    location: Option<String>,
    json: bool,
) -> Result<()> {
    let mut properties = HashMap::new();
    if let Some(location) = location {
        properties.insert("location".to_string(), location);
    }

    let schema = catalog
        .create_schema(name, comment.as_deref(), properties)
        .await?;
    info!(schema = %schema.name, "Schema created");

    if json {
        return print_json(&schema);
    }
    println!(
        "Created schema {} at {}",
        schema.name,
        schema.location.as_deref().unwrap_or("<metastore default>")
    );
    Ok(())
}

/// Drop a schema.
pub async fn drop(catalog: &HudiCatalog, name: &str, cascade: bool) -> Result<()> {
    catalog.drop_schema(name, cascade).await?;
    println!("Dropped schema {}", name.to_lowercase());
    Ok(())
}
