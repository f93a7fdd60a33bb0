use crypto_ingest_sdk::{CycleController, CycleOutcome, IngestConfig, MemorySink};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "ingest.yaml".to_string());
    let watch = args.next().as_deref() == Some("--watch");

    let config = IngestConfig::from_path(&path)?;
    let mut controller = CycleController::new(&config)?;
    let sink = MemorySink::new();

    // Ctrl-C abandons the cycle in flight
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    if watch {
        let cycles = controller.run_until_cancelled(&sink, &cancel).await;
        println!("Ran {} cycle(s), {} snapshot(s) kept", cycles, sink.snapshots().await.len());
        return Ok(());
    }

    println!("Running one ingestion cycle with {}...", path);
    println!("-------------------------------------------");

    match controller.run_cycle_and_hand_off(&sink, &cancel).await {
        CycleOutcome::Completed { snapshot, events } => {
            println!("Cycle {} completed: {} rows", snapshot.cycle, snapshot.len());
            println!(
                "   Rows without ticker data: {}",
                snapshot.rows_missing_ticker().count()
            );
            println!("   Global refreshed this cycle: {}", snapshot.global_refreshed);
            for row in snapshot.rows.iter().take(10) {
                match row.price_usd {
                    Some(price) => println!("   {:>8} ${:.4}", row.symbol, price),
                    None => println!("   {:>8} (no ticker)", row.symbol),
                }
            }
            println!("   Events: {}", events.len());
            for event in events.iter().filter(|e| e.is_error()) {
                println!("   {}", event);
            }
        }
        CycleOutcome::Failed { error, events } => {
            eprintln!("Cycle failed: {}", error);
            for event in &events {
                eprintln!("   {}", event);
            }
        }
    }

    println!();
    println!("Endpoint metrics:");
    for metrics in controller.fetcher().metrics().snapshot().await {
        println!(
            "   {:<8} requests={} failed={} p50={:.1}ms p99={:.1}ms",
            metrics.family.as_str(),
            metrics.total_requests,
            metrics.failed_requests,
            metrics.latency_p50_ms,
            metrics.latency_p99_ms
        );
    }

    Ok(())
}
