//! Health command implementation.

use super::print_json;
use anyhow::Result;
use hudicat_core::HudiCatalog;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    endpoint: String,
    response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    circuit_state: String,
    pool: PoolResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<hudicat_core::cache::CacheSnapshot>,
}

#[derive(Debug, Serialize)]
struct PoolResponse {
    max_size: usize,
    active: usize,
    idle: usize,
    total_created: u64,
    total_discarded: u64,
    acquire_timeouts: u64,
}

/// Check the Metastore connection. Returns whether it is healthy.
pub async fn run(catalog: &HudiCatalog, json: bool) -> Result<bool> {
    let health = catalog.health_check().await?;
    let response = HealthResponse {
        status: if health.is_healthy { "healthy" } else { "unhealthy" },
        endpoint: health.endpoint.clone(),
        response_time_ms: health.response_time_ms,
        message: health.message.clone(),
        circuit_state: format!("{:?}", health.circuit_state),
        pool: PoolResponse {
            max_size: health.pool.max_size,
            active: health.pool.active,
            idle: health.pool.idle,
            total_created: health.pool.total_created,
            total_discarded: health.pool.total_discarded,
            acquire_timeouts: health.pool.acquire_timeouts,
        },
        cache: catalog.cache().map(|c| c.snapshot()),
    };

    if json {
        print_json(&response)?;
        return Ok(health.is_healthy);
    }

    let marker = if health.is_healthy { "[OK]" } else { "[FAIL]" };
    println!(
        "{} Metastore {}: {} ({} ms)",
        marker,
        response.endpoint,
        response.status.to_uppercase(),
        response.response_time_ms
    );
    if let Some(message) = &response.message {
        println!("  {}", message);
    }
    println!("  Circuit: {}", response.circuit_state);
    println!(
        "  Pool:    {}/{} active, {} idle, {} created, {} discarded",
        response.pool.active,
        response.pool.max_size,
        response.pool.idle,
        response.pool.total_created,
        response.pool.total_discarded
    );
    if let Some(cache) = &response.cache {
        println!(
            "  Cache:   {} entries, hit rate {:.1}%",
            cache.entries,
            cache.hit_rate * 100.0
        );
    }
    Ok(health.is_healthy)
}
