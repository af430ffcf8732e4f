//! Drives one source chain: burns in, correlated transfers out.

use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chains::{AdapterError, ChainAdapter, ScanItem};
use crate::correlation::{assemble, CorrelateError, Correlator, MintLookup};
use crate::types::{BlockRange, CorrelatedTransfer, TransferStatus};

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Burn scan failed: {0}")]
    Scan(#[source] AdapterError),

    #[error("Transfer sink closed")]
    SinkClosed,

    #[error("Tracking cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Burns decoded from the source.
    pub processed: usize,
    /// Source events that could not be decoded. They produce no record.
    pub skipped: usize,
    pub matched: usize,
    pub unmatched: usize,
}

/// The last `lookback` positions of `source`, ending at its current head.
pub async fn recent_range(
    source: &dyn ChainAdapter,
    lookback: u64,
    cancel: &CancellationToken,
) -> Result<BlockRange, AdapterError> {
    let head = source.head(cancel).await?;
    Ok(BlockRange::ending_at(head, lookback))
}

/// Scan `range` on `source`, correlate every burn and send one record per
/// burn to `sink`, in source order.
pub async fn track_range(
    source: &dyn ChainAdapter,
    range: BlockRange,
    correlator: &Correlator,
    sink: &mpsc::Sender<CorrelatedTransfer>,
    cancel: &CancellationToken,
) -> Result<ScanSummary, TrackError> {
    let chain = source.descriptor().name.as_str();
    tracing::info!("[{}] Tracking burns in {}", chain, range);

    let mut summary = ScanSummary::default();
    let mut burns = source.burn_events(range, cancel);

    while let Some(item) = burns.next().await {
        let burn = match item {
            Ok(ScanItem::Burn(burn)) => burn,
            Ok(ScanItem::Skipped(_)) => {
                summary.skipped += 1;
                continue;
            }
            Err(AdapterError::Cancelled) => return Err(TrackError::Cancelled),
            Err(e) => {
                tracing::error!(
                    "[{}] Burn scan of {} stopped after {} burns: {}",
                    chain,
                    range,
                    summary.processed,
                    e
                );
                return Err(TrackError::Scan(e));
            }
        };
        summary.processed += 1;

        let mint = match correlator.find_mint(&burn, cancel).await {
            Ok(MintLookup::Found(mint)) => Some(mint),
            Ok(MintLookup::Unmatched(reason)) => {
                tracing::debug!(
                    "[{}] No mint for burn {} (nonce {}): {:?}",
                    chain,
                    burn.tx_ref,
                    burn.nonce,
                    reason
                );
                None
            }
            Err(CorrelateError::Cancelled) => return Err(TrackError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    "[{}] Could not search for mint of {}: {}",
                    chain,
                    burn.tx_ref,
                    e
                );
                None
            }
        };

        let transfer = assemble(burn, mint);
        match transfer.status {
            TransferStatus::Matched => summary.matched += 1,
            TransferStatus::Unmatched => summary.unmatched += 1,
        }
        sink.send(transfer)
            .await
            .map_err(|_| TrackError::SinkClosed)?;
    }

    tracing::info!(
        "[{}] Finished {}: {} burns, {} matched, {} unmatched, {} skipped",
        chain,
        range,
        summary.processed,
        summary.matched,
        summary.unmatched,
        summary.skipped
    );
    Ok(summary)
}
