//! Partition command implementations.

use super::print_json;
use anyhow::Result;
use futures::TryStreamExt;
use hudicat_core::{HudiCatalog, PartitionPredicate, PartitionProvider};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct PartitionView {
    name: String,
    values: Vec<(String, String)>,
    location: Option<String>,
}

/// Combine `--filter` arguments into one predicate.
fn parse_filters(filters: &[String]) -> Result<Option<PartitionPredicate>> {
    if filters.is_empty() {
        return Ok(None);
    }
    let predicates = filters
        .iter()
        .map(|f| f.parse::<PartitionPredicate>())
        .collect::<hudicat_core::Result<Vec<_>>>()?;
    Ok(Some(PartitionPredicate::and(predicates)))
}

/// List partitions of a table.
pub async fn list(
    catalog: &HudiCatalog,
    schema: &str,
    table: &str,
    filters: &[String],
    names_only: bool,
    json: bool,
) -> Result<()> {
    let predicate = parse_filters(filters)?;

    if names_only && predicate.is_none() {
        let names = catalog.list_partition_names(schema, table).await?;
        if json {
            return print_json(&names);
        }
        for name in &names {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut stream = catalog.list_partitions(schema, table, predicate).await?;
    let mut views = Vec::new();
    while let Some(spec) = stream.try_next().await? {
        let name = spec.name();
        if json {
            views.push(PartitionView {
                name,
                values: spec.values,
                location: spec.location,
            });
        } else if names_only {
            println!("{}", name);
        } else {
            println!("{}\t{}", name, spec.location.as_deref().unwrap_or("-"));
        }
    }

    if json {
        print_json(&views)?;
    }
    Ok(())
}
