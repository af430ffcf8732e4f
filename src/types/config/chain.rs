use serde::Deserialize;

use crate::domain::{DomainId, DomainRegistry, RegistryError};
use crate::types::address::ChainFamily;
use crate::types::config::rpc::RetryPolicyConfig;

pub const DEFAULT_EVM_CHUNK_SIZE: u64 = 2_000;
pub const DEFAULT_EVM_LOOKBACK: u64 = 25_000;
pub const DEFAULT_SOLANA_LOOKBACK: u64 = 1_000;
pub const DEFAULT_SOLANA_CHUNK_SIZE: u64 = 50;
pub const DEFAULT_SUI_LOOKBACK: u64 = 20_000;
pub const DEFAULT_SUI_MAX_PAGES: u32 = 20;

/// Per-chain entry of `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub family: ChainFamily,
    pub rpc_url_env_var: String,
    /// Burn-side program: TokenMessenger (EVM), TokenMessengerMinter (Solana)
    /// or the burn package id (Sui).
    pub token_messenger: String,
    /// Mint-side program: MessageTransmitter, or the receive package id on Sui.
    pub message_transmitter: String,
    /// USDC mint whose balance deltas carry amounts (Solana), or the only
    /// burn token accepted (EVM).
    #[serde(default)]
    pub usdc: Option<String>,
    #[serde(default)]
    pub lookback: Option<u64>,
    #[serde(default)]
    pub chunk_size: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryPolicyConfig>,
    #[serde(default)]
    pub nonce_offset: Option<u16>,
    #[serde(default)]
    pub max_pages: Option<u32>,
}

/// How far back, and in what steps, the correlator searches a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub lookback: u64,
    pub chunk_size: u64,
}

impl SearchWindow {
    /// Chain defaults; faster chains get a longer lookback.
    pub fn default_for(family: ChainFamily, chain: &str) -> Self {
        match family {
            ChainFamily::Evm => {
                let lookback = match chain {
                    "arbitrum" => 100_000,
                    "base" | "optimism" => 50_000,
                    _ => DEFAULT_EVM_LOOKBACK,
                };
                Self {
                    lookback,
                    chunk_size: DEFAULT_EVM_CHUNK_SIZE,
                }
            }
            ChainFamily::Solana => Self {
                lookback: DEFAULT_SOLANA_LOOKBACK,
                chunk_size: DEFAULT_SOLANA_CHUNK_SIZE,
            },
            // Checkpoint ranges are mapped to timestamps and paged, so one chunk covers it.
            ChainFamily::Sui => Self {
                lookback: DEFAULT_SUI_LOOKBACK,
                chunk_size: DEFAULT_SUI_LOOKBACK + 1,
            },
        }
    }
}

/// Resolved identity of a configured chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub name: String,
    pub domain: DomainId,
    pub family: ChainFamily,
    pub window: SearchWindow,
}

impl ChainConfig {
    pub fn descriptor(&self, registry: &DomainRegistry) -> Result<ChainDescriptor, RegistryError> {
        let name = self.name.to_ascii_lowercase();
        let domain = registry.domain_of(&name)?;
        let defaults = SearchWindow::default_for(self.family, &name);
        let lookback = self.lookback.unwrap_or(defaults.lookback);
        let chunk_size = match (self.chunk_size, self.family) {
            (Some(size), _) => size.max(1),
            (None, ChainFamily::Sui) => lookback.saturating_add(1),
            (None, _) => defaults.chunk_size,
        };
        Ok(ChainDescriptor {
            name,
            domain,
            family: self.family,
            window: SearchWindow {
                lookback,
                chunk_size,
            },
        })
    }
}
