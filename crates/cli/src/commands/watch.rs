use anyhow::bail;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use warpscan_core::{
    live::{ChainEvent, Subscription, SubscriptionError, Topic},
    types::LogFilter,
    utils::hex::is_prefixed_hex,
    CoreContext,
};

use super::utils::{format_gwei, OutputFormat};

pub struct WatchOptions {
    pub gas: bool,
    pub contract: Option<String>,
    pub count: Option<usize>,
}

/// Streams live events until `cancel` fires or `count` events were printed.
pub async fn run_watch(
    ctx: &CoreContext,
    options: WatchOptions,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut topics = vec![Topic::NewBlock];
    if options.gas {
        topics.push(Topic::GasPrice);
    }
    if let Some(address) = &options.contract {
        if !is_prefixed_hex(address, 40) {
            bail!("{address} is not a contract address");
        }
        topics.push(Topic::ContractEvent(LogFilter::for_address(address.to_lowercase())));
    }

    let (tx, mut rx) = mpsc::channel(64);
    for topic in topics {
        forward(ctx.live().subscribe(topic), tx.clone(), cancel.clone());
    }
    drop(tx);

    let live = ctx.start_live(cancel.child_token());
    let mut printed = 0usize;
    while let Some(item) = rx.recv().await {
        match item {
            Ok(event) => {
                print_event(&event, format)?;
                printed += 1;
                if options.count.is_some_and(|limit| printed >= limit) {
                    break;
                }
            }
            Err(SubscriptionError::Overflowed { capacity }) => {
                warn!(capacity, "fell behind the live stream, stopping");
                break;
            }
            Err(SubscriptionError::Closed) => break,
        }
    }

    cancel.cancel();
    live.await?;
    Ok(())
}

fn forward(
    mut subscription: Subscription,
    tx: mpsc::Sender<Result<ChainEvent, SubscriptionError>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                () = cancel.cancelled() => return,
                item = subscription.recv() => item,
            };
            let stop = item.is_err();
            if tx.send(item).await.is_err() || stop {
                return;
            }
        }
    });
}

fn print_event(event: &ChainEvent, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        ChainEvent::BlockAdded { height, hash, .. } => println!("+ block {height} {hash}"),
        ChainEvent::BlockReverted { height, hash } => println!("- block {height} {hash} (reverted)"),
        ChainEvent::ReorgDetected { common_ancestor, depth } => {
            println!("! reorg of depth {depth}, common ancestor {common_ancestor}");
        }
        ChainEvent::GasPriceUpdated(tick) => println!(
            "~ gas slow {} | standard {} | fast {}",
            format_gwei(tick.prices.slow),
            format_gwei(tick.prices.standard),
            format_gwei(tick.prices.fast)
        ),
        ChainEvent::ContractLog(log) => println!(
            "* log {} block {} index {} tx {}",
            log.address,
            log.block_number.map_or_else(|| "?".to_string(), |n| n.to_string()),
            log.log_index.map_or_else(|| "?".to_string(), |n| n.to_string()),
            log.transaction_hash.as_deref().unwrap_or("?")
        ),
    }
    Ok(())
}
