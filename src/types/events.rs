use std::fmt;

use alloy::primitives::utils::format_units;
use alloy::primitives::{Address, U256};
use serde::{Serialize, Serializer};

use crate::domain::DomainId;
use crate::types::address::ChainAddress;

/// Protocol nonce of a transfer, or the fact that it could not be read.
///
/// `Undetermined` is not a wildcard: use [`Nonce::matches`] for correlation,
/// which never pairs it with anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nonce {
    Known(u64),
    Undetermined,
}

impl Nonce {
    pub fn known(&self) -> Option<u64> {
        match self {
            Self::Known(nonce) => Some(*nonce),
            Self::Undetermined => None,
        }
    }

    pub fn matches(&self, other: &Nonce) -> bool {
        matches!((self, other), (Self::Known(a), Self::Known(b)) if a == b)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(nonce) => write!(f, "{}", nonce),
            Self::Undetermined => f.write_str("undetermined"),
        }
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(nonce) => serializer.serialize_u64(*nonce),
            Self::Undetermined => serializer.serialize_none(),
        }
    }
}

/// Inclusive range of block numbers, slots or checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// The `lookback` positions before `head`, plus `head` itself.
    pub fn ending_at(head: u64, lookback: u64) -> Self {
        Self::new(head.saturating_sub(lookback), head)
    }

    pub fn contains(&self, position: u64) -> bool {
        self.start <= position && position <= self.end
    }

    /// Consecutive sub-ranges of at most `size` positions, in increasing order.
    pub fn chunks(&self, size: u64) -> impl Iterator<Item = BlockRange> {
        let size = size.max(1);
        let end = self.end;
        let mut next = Some(self.start);
        std::iter::from_fn(move || {
            let start = next?;
            let chunk_end = start.saturating_add(size - 1).min(end);
            next = chunk_end.checked_add(1).filter(|n| *n <= end);
            Some(BlockRange::new(start, chunk_end))
        })
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// What identifies a mint for a given burn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CorrelationKey {
    pub nonce: u64,
    pub source_domain: DomainId,
    pub destination_domain: DomainId,
}

/// How an EVM transaction reached the protocol contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxShape {
    /// The transaction called the protocol contract directly.
    pub is_direct: bool,
    pub total_logs: usize,
    /// 1-based position of the protocol log among the receipt's logs.
    pub target_position: usize,
    pub first_contract: Option<Address>,
}

/// ERC-20 metadata of a burned token, read from the token contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}

impl TokenMetadata {
    /// `amount` in whole tokens, e.g. `2.500000` for 2_500_000 units of a 6-decimal token.
    pub fn format_amount(&self, amount: U256) -> Option<String> {
        format_units(amount, self.decimals).ok()
    }
}

fn decimal<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn decimal_opt<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.collect_str(value),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BurnEvent {
    pub source_chain: String,
    pub source_domain: DomainId,
    pub block_ref: u64,
    pub tx_ref: String,
    /// Unix seconds.
    pub timestamp: Option<u64>,
    pub nonce: Nonce,
    pub burn_token: ChainAddress,
    pub depositor: ChainAddress,
    /// Raw token units.
    #[serde(serialize_with = "decimal")]
    pub amount: U256,
    pub mint_recipient: ChainAddress,
    pub destination_domain: DomainId,
    pub destination_caller: Option<ChainAddress>,
    pub destination_token_messenger: Option<ChainAddress>,
    /// Account that signed the burn transaction.
    pub origin: Option<ChainAddress>,
    pub token: Option<TokenMetadata>,
    pub amount_formatted: Option<String>,
    pub tx_shape: Option<TxShape>,
}

impl BurnEvent {
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        Some(CorrelationKey {
            nonce: self.nonce.known()?,
            source_domain: self.source_domain,
            destination_domain: self.destination_domain,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MintEvent {
    pub destination_chain: String,
    pub block_ref: u64,
    pub tx_ref: String,
    pub timestamp: Option<u64>,
    pub nonce: Nonce,
    pub caller: ChainAddress,
    pub source_domain: Option<DomainId>,
    pub sender: Option<ChainAddress>,
    pub recipient: Option<ChainAddress>,
    #[serde(serialize_with = "decimal_opt")]
    pub amount: Option<U256>,
    /// Account that signed the receive transaction.
    pub origin: Option<ChainAddress>,
    pub tx_shape: Option<TxShape>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Matched,
    Unmatched,
}

/// One burn and, when found, its mint. Built once by the assembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelatedTransfer {
    pub burn: BurnEvent,
    pub mint: Option<MintEvent>,
    pub status: TransferStatus,
}
