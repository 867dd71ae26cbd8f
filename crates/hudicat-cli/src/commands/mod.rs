//! CLI command implementations.

pub mod health;
pub mod partition;
pub mod schema;
pub mod table;

use anyhow::Result;
use serde::Serialize;

/// Print a value as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
