//! Per-family access to protocol events on one chain.

pub mod evm;
pub mod solana;
pub mod sui;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::decoding::DecodeError;
use crate::domain::DomainRegistry;
use crate::rpc::{RetryingRpcClient, RpcError};
use crate::types::config::{ChainConfig, ChainDescriptor};
use crate::types::{BlockRange, BurnEvent, ChainAddress, ChainFamily, CorrelationKey, MintEvent};

pub use evm::EvmAdapter;
pub use solana::SolanaAdapter;
pub use sui::SuiAdapter;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Rpc(RpcError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Burn token {0} is not the configured USDC")]
    UnexpectedToken(ChainAddress),

    #[error("Chain scan cancelled")]
    Cancelled,
}

impl From<RpcError> for AdapterError {
    fn from(error: RpcError) -> Self {
        match error {
            RpcError::Cancelled => AdapterError::Cancelled,
            other => AdapterError::Rpc(other),
        }
    }
}

/// An event the adapter saw but could not turn into a record.
#[derive(Debug)]
pub struct SkippedEvent {
    pub tx_ref: Option<String>,
    /// Block, slot or checkpoint, when the event carried one.
    pub block_ref: Option<u64>,
    pub reason: AdapterError,
}

#[derive(Debug)]
pub enum ScanItem {
    Burn(BurnEvent),
    Skipped(SkippedEvent),
}

/// Lazy, finite scan of burns. Ends after the range, or after the first `Err`.
pub type BurnStream<'a> = BoxStream<'a, Result<ScanItem, AdapterError>>;

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn descriptor(&self) -> &ChainDescriptor;

    /// Latest block, slot or checkpoint.
    async fn head(&self, cancel: &CancellationToken) -> Result<u64, AdapterError>;

    fn burn_events<'a>(&'a self, range: BlockRange, cancel: &'a CancellationToken)
        -> BurnStream<'a>;

    /// First mint for `key` inside `range`, if any.
    async fn fetch_mint_event(
        &self,
        key: &CorrelationKey,
        range: BlockRange,
        cancel: &CancellationToken,
    ) -> Result<Option<MintEvent>, AdapterError>;
}

/// Build the adapter for a configured chain around an already-built client.
pub fn build_adapter(
    config: &ChainConfig,
    client: RetryingRpcClient,
    registry: Arc<DomainRegistry>,
) -> anyhow::Result<Arc<dyn ChainAdapter>> {
    let descriptor = config.descriptor(&registry)?;
    let adapter: Arc<dyn ChainAdapter> = match config.family {
        ChainFamily::Evm => Arc::new(EvmAdapter::from_config(config, descriptor, client, registry)?),
        ChainFamily::Solana => {
            Arc::new(SolanaAdapter::from_config(config, descriptor, client, registry)?)
        }
        ChainFamily::Sui => Arc::new(SuiAdapter::from_config(config, descriptor, client, registry)),
    };
    Ok(adapter)
}

/// Log and wrap a per-event failure so the scan can continue.
pub(crate) fn skip(
    chain: &str,
    tx_ref: Option<String>,
    block_ref: Option<u64>,
    reason: AdapterError,
) -> ScanItem {
    tracing::warn!(
        "[{}] Skipping event in tx {} at {}: {}",
        chain,
        tx_ref.as_deref().unwrap_or("?"),
        block_ref.map_or_else(|| "?".to_string(), |b| b.to_string()),
        reason
    );
    ScanItem::Skipped(SkippedEvent {
        tx_ref,
        block_ref,
        reason,
    })
}
