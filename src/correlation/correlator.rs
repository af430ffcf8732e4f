use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::chains::{AdapterError, ChainAdapter};
use crate::domain::DomainRegistry;
use crate::types::{BlockRange, BurnEvent, MintEvent};

#[derive(Debug, Error)]
pub enum CorrelateError {
    #[error("Correlation cancelled")]
    Cancelled,

    #[error("Failed to read destination head: {0}")]
    Head(AdapterError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedReason {
    UndeterminedNonce,
    UnsupportedDestination,
    /// The whole window was searched; `failed_chunks` of it could not be read.
    NotFound { failed_chunks: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintLookup {
    Found(MintEvent),
    Unmatched(UnmatchedReason),
}

impl MintLookup {
    pub fn into_mint(self) -> Option<MintEvent> {
        match self {
            MintLookup::Found(mint) => Some(mint),
            MintLookup::Unmatched(_) => None,
        }
    }
}

/// Finds the destination-chain mint for a burn by searching a bounded window
/// behind the destination head.
pub struct Correlator {
    registry: Arc<DomainRegistry>,
    adapters: HashMap<String, Arc<dyn ChainAdapter>>,
    max_in_flight: usize,
}

impl Correlator {
    pub fn new(registry: Arc<DomainRegistry>) -> Self {
        Self {
            registry,
            adapters: HashMap::new(),
            max_in_flight: 1,
        }
    }

    /// Registers a destination under its descriptor's chain name.
    pub fn with_adapter(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.adapters
            .insert(adapter.descriptor().name.clone(), adapter);
        self
    }

    /// Chunks requested concurrently. Results are still consumed in order.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub async fn find_mint(
        &self,
        burn: &BurnEvent,
        cancel: &CancellationToken,
    ) -> Result<MintLookup, CorrelateError> {
        let Some(key) = burn.correlation_key() else {
            return Ok(MintLookup::Unmatched(UnmatchedReason::UndeterminedNonce));
        };
        let destination = self.registry.chain_of(key.destination_domain);
        let Some(adapter) = destination.name().and_then(|name| self.adapters.get(name)) else {
            tracing::debug!(
                "No destination adapter for {} (burn {})",
                destination,
                burn.tx_ref
            );
            return Ok(MintLookup::Unmatched(UnmatchedReason::UnsupportedDestination));
        };

        let descriptor = adapter.descriptor();
        let head = adapter.head(cancel).await.map_err(|e| match e {
            AdapterError::Cancelled => CorrelateError::Cancelled,
            other => CorrelateError::Head(other),
        })?;
        let window = BlockRange::ending_at(head, descriptor.window.lookback);
        tracing::debug!(
            "[{}] Searching {} for nonce {} from domain {}",
            descriptor.name,
            window,
            key.nonce,
            key.source_domain
        );

        let adapter = adapter.as_ref();
        let mut outcomes = stream::iter(window.chunks(descriptor.window.chunk_size))
            .map(move |chunk| async move {
                if cancel.is_cancelled() {
                    return (chunk, Err(AdapterError::Cancelled));
                }
                (chunk, adapter.fetch_mint_event(&key, chunk, cancel).await)
            })
            .buffered(self.max_in_flight);

        let mut failed_chunks = 0;
        while let Some((chunk, outcome)) = outcomes.next().await {
            match outcome {
                Ok(Some(mint)) => {
                    tracing::info!(
                        "[{}] Found mint for nonce {} in {} (chunk {})",
                        descriptor.name,
                        key.nonce,
                        mint.tx_ref,
                        chunk
                    );
                    return Ok(MintLookup::Found(mint));
                }
                Ok(None) => {}
                Err(AdapterError::Cancelled) => return Err(CorrelateError::Cancelled),
                Err(e) => {
                    failed_chunks += 1;
                    tracing::warn!(
                        "[{}] Chunk {} failed for nonce {}: {}",
                        descriptor.name,
                        chunk,
                        key.nonce,
                        e
                    );
                }
            }
        }

        Ok(MintLookup::Unmatched(UnmatchedReason::NotFound {
            failed_chunks,
        }))
    }
}

/// Child of `parent` that is also cancelled once `after` has elapsed.
pub fn deadline_token(parent: &CancellationToken, after: Duration) -> CancellationToken {
    let token = parent.child_token();
    let deadline = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(after) => deadline.cancel(),
            _ = deadline.cancelled() => {}
        }
    });
    token
}
