use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cctp_tracker::chains::{build_adapter, AdapterError, ChainAdapter};
use cctp_tracker::correlation::Correlator;
use cctp_tracker::domain::DomainRegistry;
use cctp_tracker::pipeline::{recent_range, track_range, ScanSummary, TrackError};
use cctp_tracker::rpc::{HttpTransport, RateLimitConfig, RetryingRpcClient};
use cctp_tracker::types::config::{ChainConfig, RpcConfig, TrackerConfig};
use cctp_tracker::types::CorrelatedTransfer;

const SINK_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = config_path_from_args();
    let config = TrackerConfig::load(&config_path)?;
    load_required_env_vars(&config)?;

    tracing::info!(
        "Loaded config with {} chain(s), scanning {:?}",
        config.chains.len(),
        config.scan.sources
    );

    let registry = Arc::new(DomainRegistry::standard());
    let mut correlator = Correlator::new(registry.clone())
        .with_max_in_flight(config.scan.max_in_flight_chunks);
    let mut sources: Vec<Arc<dyn ChainAdapter>> = Vec::new();

    for chain in &config.chains {
        let client = build_client(&config.rpc, chain)?;
        let adapter = build_adapter(chain, client, registry.clone())
            .with_context(|| format!("Failed to build adapter for chain {}", chain.name))?;
        if config
            .scan
            .sources
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&chain.name))
        {
            sources.push(adapter.clone());
        }
        correlator = correlator.with_adapter(adapter);
    }
    let correlator = Arc::new(correlator);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling in-flight scans");
                cancel.cancel();
            }
        }
    });

    let (transfer_tx, transfer_rx) = mpsc::channel(SINK_CAPACITY);
    let sink = tokio::spawn(write_transfers(transfer_rx));

    let mut tasks: JoinSet<anyhow::Result<(String, ScanSummary)>> = JoinSet::new();
    for source in sources {
        let (correlator, sink, cancel) = (correlator.clone(), transfer_tx.clone(), cancel.clone());
        let lookback = config.scan.range;
        tasks.spawn(async move {
            let name = source.descriptor().name.clone();
            let range = recent_range(source.as_ref(), lookback, &cancel)
                .await
                .with_context(|| format!("Failed to read head of {}", name))?;
            let summary = track_range(source.as_ref(), range, &correlator, &sink, &cancel)
                .await
                .with_context(|| format!("Tracking failed for {}", name))?;
            Ok((name, summary))
        });
    }
    drop(transfer_tx);

    let mut total = ScanSummary::default();
    let mut failures = 0;
    while let Some(result) = tasks.join_next().await {
        match result.context("source task panicked")? {
            Ok((name, summary)) => {
                tracing::info!("Source {} done: {:?}", name, summary);
                total.processed += summary.processed;
                total.skipped += summary.skipped;
                total.matched += summary.matched;
                total.unmatched += summary.unmatched;
            }
            Err(e) if is_cancelled(&e) => tracing::info!("{:#}", e),
            Err(e) => {
                failures += 1;
                tracing::error!("{:#}", e);
            }
        }
    }

    let written = sink.await.context("sink task panicked")??;
    tracing::info!(
        "Wrote {} transfers: {} burns, {} matched, {} unmatched, {} skipped",
        written,
        total.processed,
        total.matched,
        total.unmatched,
        total.skipped
    );
    anyhow::ensure!(failures == 0, "{} source(s) failed", failures);
    Ok(())
}

/// `--config <path>`, defaulting to `config/config.json`.
fn config_path_from_args() -> PathBuf {
    let args: Vec<String> = env::args().collect();
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/config.json"))
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<TrackError>(),
        Some(TrackError::Cancelled)
    ) || matches!(
        error.downcast_ref::<AdapterError>(),
        Some(AdapterError::Cancelled)
    )
}

/// Ensures all required RPC URL env vars are set, loading .env if needed.
fn load_required_env_vars(config: &TrackerConfig) -> anyhow::Result<()> {
    let required: Vec<&str> = config
        .chains
        .iter()
        .map(|c| c.rpc_url_env_var.as_str())
        .collect();

    let missing: Vec<&&str> = required
        .iter()
        .filter(|var| env::var(var).is_err())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    dotenvy::dotenv().with_context(|| {
        format!(
            "Missing env vars {:?} and failed to load .env file",
            missing
        )
    })?;

    let still_missing: Vec<&str> = required
        .iter()
        .filter(|var| env::var(var).is_err())
        .copied()
        .collect();

    anyhow::ensure!(
        still_missing.is_empty(),
        "Missing required env vars after loading .env: {:?}",
        still_missing
    );

    Ok(())
}

fn build_client(rpc: &RpcConfig, chain: &ChainConfig) -> anyhow::Result<RetryingRpcClient> {
    let url = env::var(&chain.rpc_url_env_var).with_context(|| {
        format!(
            "env var {} not set for chain {}",
            chain.rpc_url_env_var, chain.name
        )
    })?;
    let transport = HttpTransport::new(&url, rpc.timeout())
        .with_context(|| format!("Invalid RPC URL for chain {}", chain.name))?;

    let default_policy = rpc.default_policy();
    let policy = match &chain.retry {
        Some(overrides) => overrides.apply(&default_policy),
        None => default_policy,
    };

    let mut client = RetryingRpcClient::new(Arc::new(transport), policy)
        .with_throttle(rpc.throttle())
        .with_label(&chain.name);
    if let Some(rps) = rpc.requests_per_second {
        client = client.with_rate_limit(RateLimitConfig::new(rps));
    }
    Ok(client)
}

/// Writes each transfer as one JSON line on stdout. Returns the count written.
async fn write_transfers(mut rx: mpsc::Receiver<CorrelatedTransfer>) -> anyhow::Result<usize> {
    let mut written = 0;
    while let Some(transfer) = rx.recv().await {
        let line = serde_json::to_string(&transfer).context("Failed to serialize transfer")?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line).context("Failed to write transfer")?;
        written += 1;
    }
    Ok(written)
}
