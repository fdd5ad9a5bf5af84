use prettytable::{row, Table};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use warpscan_core::{
    detect::detect_local_node,
    types::network_name,
    upstream::{HttpTransport, Transport},
    CoreContext,
};
use std::sync::Arc;

use super::utils::{format_gwei, print_fields, print_info, print_json, print_success, OutputFormat};

pub async fn run_gas(ctx: &CoreContext, format: OutputFormat, cancel: &CancellationToken) -> anyhow::Result<()> {
    let prices = ctx.explorer().gas_prices(cancel).await?;
    match format {
        OutputFormat::Json => print_json(&prices),
        OutputFormat::Table => {
            print_fields(&[
                ("Slow", format_gwei(prices.slow)),
                ("Standard", format_gwei(prices.standard)),
                ("Fast", format_gwei(prices.fast)),
            ]);
            Ok(())
        }
    }
}

pub fn run_cache_stats(ctx: &CoreContext, format: OutputFormat) -> anyhow::Result<()> {
    let stats = ctx.cache().stats();
    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    let mut table = Table::new();
    table.add_row(row!["Kind", "Entries", "Capacity"]);
    for kind in &stats.kinds {
        table.add_row(row![kind.kind, kind.entries, kind.capacity]);
    }
    table.printstd();

    print_fields(&[
        ("Enabled", stats.enabled.to_string()),
        ("Hits", stats.hits.to_string()),
        ("Misses", stats.misses.to_string()),
        ("Fetches", stats.fetches.to_string()),
        ("Fetch errors", stats.fetch_errors.to_string()),
        ("Coalesced", stats.coalesced.to_string()),
        ("Invalidated", stats.invalidated.to_string()),
        ("Evictions", stats.evictions.to_string()),
    ]);
    Ok(())
}

pub async fn run_cache_clear(ctx: &CoreContext, format: OutputFormat) -> anyhow::Result<()> {
    let before: usize = ctx.cache().stats().kinds.iter().map(|k| k.entries).sum();
    ctx.cache().clear().await;
    match format {
        OutputFormat::Json => print_json(&json!({ "cleared": before })),
        OutputFormat::Table => {
            print_success(&format!("Cleared {before} cached entries"));
            Ok(())
        }
    }
}

/// Reads the chain head once, then shows what the endpoint pool looks like afterwards.
pub async fn run_status(ctx: &CoreContext, format: OutputFormat, cancel: &CancellationToken) -> anyhow::Result<()> {
    let head = ctx.explorer().block_number(cancel).await;
    let chain_id = ctx.explorer().chain_id(cancel).await.ok();
    let endpoints = ctx.dispatcher().pool().snapshot();
    let dispatcher = ctx.dispatcher().stats();

    if format == OutputFormat::Json {
        return print_json(&json!({
            "head": head.as_ref().ok(),
            "head_error": head.as_ref().err().map(ToString::to_string),
            "chain_id": chain_id,
            "network": chain_id.map(network_name),
            "endpoints": endpoints,
            "dispatcher": dispatcher,
        }));
    }

    match &head {
        Ok(height) => print_info(&format!("Head block {height}")),
        Err(e) => print_info(&format!("Head unavailable: {e}")),
    }
    if let Some(id) = chain_id {
        print_info(&format!("Chain {id} ({})", network_name(id)));
    }

    let mut table = Table::new();
    table.add_row(row!["Endpoint", "Health", "Failures", "Suspended", "Tokens", "Latency"]);
    for endpoint in &endpoints {
        table.add_row(row![
            endpoint.name,
            format!("{:.2}", endpoint.health),
            endpoint.consecutive_failures,
            endpoint.suspended_for_ms.map_or_else(|| "-".to_string(), |ms| format!("{ms} ms")),
            format!("{:.1}", endpoint.available_tokens),
            endpoint.last_latency_ms.map_or_else(|| "-".to_string(), |ms| format!("{ms} ms")),
        ]);
    }
    table.printstd();
    Ok(())
}

pub async fn run_detect_node(format: OutputFormat) -> anyhow::Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
    let detected = detect_local_node(transport).await;
    match (format, detected) {
        (OutputFormat::Json, detected) => print_json(&detected),
        (OutputFormat::Table, Some(node)) => {
            print_fields(&[
                ("RPC URL", node.rpc_url),
                ("Chain ID", node.chain_id.to_string()),
                ("Node", node.node_type.to_string()),
                ("Network", node.network_name.to_string()),
            ]);
            Ok(())
        }
        (OutputFormat::Table, None) => {
            print_info("No local node found on ports 8545/8546");
            Ok(())
        }
    }
}
