use tokio_util::sync::CancellationToken;
use warpscan_core::{
    resolver::Resolved,
    types::{BlockHeader, TransactionRecord},
    CoreContext,
};

use super::utils::{format_eth, format_gwei, print_fields, print_json, OutputFormat};

pub async fn run_query(
    ctx: &CoreContext,
    input: &str,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let resolved = ctx.resolver().resolve(input, cancel).await?;
    match format {
        OutputFormat::Json => print_json(&resolved),
        OutputFormat::Table => {
            print_resolved(&resolved);
            Ok(())
        }
    }
}

fn print_resolved(resolved: &Resolved) {
    match resolved {
        Resolved::Block(block) => print_block(block),
        Resolved::Transaction(tx) => print_transaction(tx),
        Resolved::Address { info, name } => {
            let mut fields = vec![
                ("Address", info.address.clone()),
                ("Balance", format_eth(info.balance)),
                ("Nonce", info.nonce.to_string()),
                ("Type", if info.is_contract { "contract" } else { "account" }.to_string()),
            ];
            if let Some(name) = name {
                fields.insert(0, ("Name", name.clone()));
            }
            if let Some(height) = info.as_of_block {
                fields.push(("As of block", height.to_string()));
            }
            print_fields(&fields);
        }
    }
}

fn print_block(block: &BlockHeader) {
    let mut fields = vec![
        ("Block", block.number.to_string()),
        ("Hash", block.hash.clone()),
        ("Parent", block.parent_hash.clone()),
        ("Timestamp", format_timestamp(block.timestamp)),
        ("Gas used", format!("{} / {}", block.gas_used, block.gas_limit)),
        ("Transactions", block.transactions.len().to_string()),
    ];
    if let Some(miner) = &block.miner {
        fields.push(("Miner", miner.clone()));
    }
    if let Some(base_fee) = block.base_fee_per_gas {
        fields.push(("Base fee", format_gwei(u128::from(base_fee))));
    }
    print_fields(&fields);
}

fn print_transaction(tx: &TransactionRecord) {
    let fields = vec![
        ("Hash", tx.hash.clone()),
        (
            "Block",
            tx.block_number.map_or_else(|| "pending".to_string(), |n| n.to_string()),
        ),
        ("From", tx.from.clone()),
        ("To", tx.to.clone().unwrap_or_else(|| "contract creation".to_string())),
        ("Value", format_eth(tx.value)),
        ("Nonce", tx.nonce.to_string()),
        ("Gas", tx.gas.to_string()),
    ];
    print_fields(&fields);
}

fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map_or_else(|| secs.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
