//! Sui: protocol Move events are paged newest first and enriched with the
//! emitting transaction's balance changes.

use std::collections::VecDeque;
use std::sync::Arc;

use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{skip, AdapterError, BurnStream, ChainAdapter, ScanItem};
use crate::decoding::DecodeError;
use crate::domain::{DomainId, DomainRegistry};
use crate::rpc::RetryingRpcClient;
use crate::types::config::chain::DEFAULT_SUI_MAX_PAGES;
use crate::types::config::{ChainConfig, ChainDescriptor};
use crate::types::{
    BlockRange, BurnEvent, ChainAddress, ChainFamily, CorrelationKey, MintEvent, Nonce,
};

pub const BURN_PACKAGE: &str =
    "0x2aa6c5d56376c371f88a6cc42e852824994993cb9bab8d3e6450cbe3cb32b94e";
pub const RECEIVE_PACKAGE: &str =
    "0x08d87d37ba49e785dde270a83f8e979605b03dc552b5548f26fdf2f49bf7ed1b";

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPage {
    data: Vec<SuiEvent>,
    #[serde(default)]
    next_cursor: Option<Value>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuiEvent {
    id: EventId,
    #[serde(default)]
    parsed_json: Value,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    timestamp_ms: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventId {
    tx_digest: String,
}

impl SuiEvent {
    fn timestamp_ms(&self) -> Option<u64> {
        self.timestamp_ms.as_deref()?.parse().ok()
    }

    fn field(&self, name: &'static str) -> Result<&Value, DecodeError> {
        match self.parsed_json.get(name) {
            Some(Value::Null) | None => Err(DecodeError::MissingField(name)),
            Some(value) => Ok(value),
        }
    }

    fn u64_field(&self, name: &'static str) -> Result<u64, DecodeError> {
        json_u64(self.field(name)?)
            .ok_or_else(|| DecodeError::malformed(format!("{} is not an integer", name)))
    }

    fn word_field(&self, name: &'static str) -> Result<B256, DecodeError> {
        json_word(self.field(name)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionBlock {
    digest: String,
    #[serde(default)]
    checkpoint: Option<String>,
    #[serde(default)]
    timestamp_ms: Option<String>,
    #[serde(default)]
    balance_changes: Vec<BalanceChange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceChange {
    owner: Value,
    coin_type: String,
    amount: String,
}

impl BalanceChange {
    fn is_usdc(&self) -> bool {
        self.coin_type.to_ascii_lowercase().contains("usdc")
    }

    fn amount(&self) -> Option<i128> {
        self.amount.parse().ok()
    }

    fn address_owner(&self) -> Option<&str> {
        self.owner.get("AddressOwner")?.as_str()
    }

    /// Package address of the coin type, `0x..::usdc::USDC` → `0x..`.
    fn coin_package(&self) -> Option<&str> {
        self.coin_type.split("::").next()
    }
}

impl TransactionBlock {
    fn checkpoint(&self) -> Result<u64, DecodeError> {
        self.checkpoint
            .as_deref()
            .ok_or(DecodeError::MissingField("checkpoint"))?
            .parse()
            .map_err(|_| DecodeError::malformed("checkpoint is not an integer"))
    }

    fn usdc_changes(&self) -> impl Iterator<Item = &BalanceChange> {
        self.balance_changes.iter().filter(|c| c.is_usdc())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Checkpoint {
    timestamp_ms: String,
}

/// Integers arrive as JSON numbers or as decimal strings.
fn json_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// 32-byte value given as hex (possibly abbreviated) or as a byte array.
fn json_word(value: &Value) -> Result<B256, DecodeError> {
    match value {
        Value::String(text) => match ChainAddress::sui(text)? {
            ChainAddress::Sui(bytes) => Ok(B256::from(bytes)),
            _ => Err(DecodeError::malformed(text.clone())),
        },
        Value::Array(items) => {
            let bytes: Vec<u8> = items
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<_>>()
                .ok_or_else(|| DecodeError::malformed("byte array"))?;
            if bytes.len() != 32 {
                return Err(DecodeError::TooShort {
                    needed: 32,
                    actual: bytes.len(),
                });
            }
            Ok(B256::from_slice(&bytes))
        }
        other => Err(DecodeError::malformed(other.to_string())),
    }
}

fn seconds(ms: Option<u64>) -> Option<u64> {
    ms.map(|ms| ms / 1000)
}

pub struct SuiAdapter {
    descriptor: ChainDescriptor,
    client: RetryingRpcClient,
    registry: Arc<DomainRegistry>,
    burn_event_type: String,
    receive_event_type: String,
    max_pages: u32,
}

impl SuiAdapter {
    pub fn new(
        descriptor: ChainDescriptor,
        client: RetryingRpcClient,
        registry: Arc<DomainRegistry>,
        burn_package: &str,
        receive_package: &str,
    ) -> Self {
        Self {
            descriptor,
            client,
            registry,
            burn_event_type: format!("{}::deposit_for_burn::DepositForBurn", burn_package),
            receive_event_type: format!("{}::receive_message::MessageReceived", receive_package),
            max_pages: DEFAULT_SUI_MAX_PAGES,
        }
    }

    /// Upper bound on `suix_queryEvents` pages per listing.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn from_config(
        config: &ChainConfig,
        descriptor: ChainDescriptor,
        client: RetryingRpcClient,
        registry: Arc<DomainRegistry>,
    ) -> Self {
        Self::new(
            descriptor,
            client,
            registry,
            &config.token_messenger,
            &config.message_transmitter,
        )
        .with_max_pages(config.max_pages.unwrap_or(DEFAULT_SUI_MAX_PAGES))
    }

    fn family_of(&self, domain: DomainId) -> Option<ChainFamily> {
        self.registry
            .chain_of(domain)
            .name()
            .and_then(ChainFamily::of_chain)
    }

    async fn checkpoint_timestamp_ms(
        &self,
        sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, AdapterError> {
        let checkpoint: Checkpoint = self
            .client
            .request("sui_getCheckpoint", json!([sequence.to_string()]), cancel)
            .await?;
        checkpoint
            .timestamp_ms
            .parse()
            .map_err(|_| DecodeError::malformed("checkpoint timestampMs").into())
    }

    async fn transaction(
        &self,
        digest: &str,
        cancel: &CancellationToken,
    ) -> Result<TransactionBlock, AdapterError> {
        let params = json!([digest, {
            "showInput": false,
            "showRawInput": false,
            "showEffects": false,
            "showEvents": false,
            "showObjectChanges": false,
            "showBalanceChanges": true
        }]);
        Ok(self
            .client
            .request("sui_getTransactionBlock", params, cancel)
            .await?)
    }

    /// Events of `event_type` emitted inside the checkpoint range, oldest first.
    async fn events_in_range(
        &self,
        event_type: &str,
        range: BlockRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<SuiEvent>, AdapterError> {
        let start_ms = self.checkpoint_timestamp_ms(range.start, cancel).await?;
        let end_ms = self.checkpoint_timestamp_ms(range.end, cancel).await?;

        let mut events = Vec::new();
        let mut cursor = Value::Null;
        for page_number in 1..=self.max_pages {
            let params = json!([{"MoveEventType": event_type}, cursor, PAGE_SIZE, true]);
            let page: EventPage = self
                .client
                .request("suix_queryEvents", params, cancel)
                .await?;

            let mut reached_start = page.data.is_empty();
            for event in page.data {
                match event.timestamp_ms() {
                    Some(ts) if ts > end_ms => continue,
                    Some(ts) if ts < start_ms => {
                        reached_start = true;
                        break;
                    }
                    _ => events.push(event),
                }
            }

            match page.next_cursor {
                Some(next) if page.has_next_page && !reached_start && !next.is_null() => {
                    cursor = next;
                }
                _ => break,
            }
            if page_number == self.max_pages {
                tracing::warn!(
                    "[{}] Stopped paging {} after {} pages, range {} may be incomplete",
                    self.descriptor.name,
                    event_type,
                    self.max_pages,
                    range
                );
            }
        }

        events.reverse();
        Ok(events)
    }

    async fn decode_burn(
        &self,
        event: &SuiEvent,
        cancel: &CancellationToken,
    ) -> Result<BurnEvent, AdapterError> {
        let nonce = event.u64_field("nonce")?;
        let destination_domain = DomainId(
            u32::try_from(event.u64_field("destination_domain")?)
                .map_err(|_| DecodeError::Overflow { len: 8, bits: 32 })?,
        );
        let destination_family = self.family_of(destination_domain);
        let mint_recipient = event.word_field("mint_recipient")?;
        let caller = event.word_field("destination_caller").ok();
        let remote_messenger = event.word_field("destination_token_messenger").ok();
        let origin = event.sender.as_deref().map(ChainAddress::sui).transpose()?;

        let tx = self.transaction(&event.id.tx_digest, cancel).await?;
        let usdc = tx.usdc_changes().find(|c| c.amount().is_some_and(|a| a < 0));
        let amount = match usdc.and_then(BalanceChange::amount) {
            Some(delta) => U256::from(delta.unsigned_abs()),
            None => U256::from(event.u64_field("amount")?),
        };
        let burn_token = match usdc.and_then(BalanceChange::coin_package) {
            Some(package) => ChainAddress::sui(package)?,
            None => ChainAddress::from_word(Some(ChainFamily::Sui), &event.word_field("burn_token")?),
        };
        let depositor = match (event.field("depositor"), event.sender.as_deref()) {
            (Ok(value), _) => ChainAddress::from_word(Some(ChainFamily::Sui), &json_word(value)?),
            (Err(_), Some(sender)) => ChainAddress::sui(sender)?,
            (Err(e), None) => return Err(e.into()),
        };

        Ok(BurnEvent {
            source_chain: self.descriptor.name.clone(),
            source_domain: self.descriptor.domain,
            block_ref: tx.checkpoint()?,
            tx_ref: tx.digest.clone(),
            timestamp: seconds(event.timestamp_ms()),
            nonce: Nonce::Known(nonce),
            burn_token,
            depositor,
            amount,
            mint_recipient: ChainAddress::from_word(destination_family, &mint_recipient),
            destination_domain,
            destination_caller: caller
                .filter(|c| !c.is_zero())
                .map(|c| ChainAddress::from_word(destination_family, &c)),
            destination_token_messenger: remote_messenger
                .map(|m| ChainAddress::from_word(destination_family, &m)),
            origin,
            token: None,
            amount_formatted: None,
            tx_shape: None,
        })
    }

    fn is_candidate(&self, event: &SuiEvent, key: &CorrelationKey) -> bool {
        let nonce = event.u64_field("nonce").ok();
        let source = event.u64_field("source_domain").ok();
        nonce == Some(key.nonce) && source == Some(u64::from(key.source_domain.0))
    }

    async fn decode_mint(
        &self,
        event: &SuiEvent,
        key: &CorrelationKey,
        cancel: &CancellationToken,
    ) -> Result<MintEvent, AdapterError> {
        let tx = self.transaction(&event.id.tx_digest, cancel).await?;
        let credited = tx
            .usdc_changes()
            .filter_map(|c| Some((c, c.amount()?)))
            .filter(|(_, amount)| *amount > 0)
            .max_by_key(|(_, amount)| *amount);
        let (recipient, amount) = match credited {
            Some((change, delta)) => (
                change.address_owner().map(ChainAddress::sui).transpose()?,
                Some(U256::from(delta.unsigned_abs())),
            ),
            None => (None, None),
        };
        let caller = match (event.field("caller"), event.sender.as_deref()) {
            (Ok(value), _) => ChainAddress::from_word(Some(ChainFamily::Sui), &json_word(value)?),
            (Err(_), Some(sender)) => ChainAddress::sui(sender)?,
            (Err(e), None) => return Err(e.into()),
        };
        let sender = event
            .word_field("sender")
            .ok()
            .map(|w| ChainAddress::from_word(self.family_of(key.source_domain), &w));
        let timestamp_ms = event
            .timestamp_ms()
            .or_else(|| tx.timestamp_ms.as_deref().and_then(|t| t.parse().ok()));

        Ok(MintEvent {
            destination_chain: self.descriptor.name.clone(),
            block_ref: tx.checkpoint()?,
            tx_ref: tx.digest.clone(),
            timestamp: seconds(timestamp_ms),
            nonce: Nonce::Known(key.nonce),
            caller,
            source_domain: Some(key.source_domain),
            sender,
            recipient,
            amount,
            origin: event.sender.as_deref().map(ChainAddress::sui).transpose()?,
            tx_shape: None,
        })
    }
}

struct EventScan<'a> {
    adapter: &'a SuiAdapter,
    cancel: &'a CancellationToken,
    chunks: VecDeque<BlockRange>,
    pending: VecDeque<SuiEvent>,
    done: bool,
}

impl EventScan<'_> {
    async fn next_item(&mut self) -> Option<Result<ScanItem, AdapterError>> {
        loop {
            if self.done {
                return None;
            }
            if let Some(event) = self.pending.pop_front() {
                return match self.adapter.decode_burn(&event, self.cancel).await {
                    Ok(burn) => Some(Ok(ScanItem::Burn(burn))),
                    Err(AdapterError::Cancelled) => {
                        self.done = true;
                        Some(Err(AdapterError::Cancelled))
                    }
                    Err(reason) => Some(Ok(skip(
                        &self.adapter.descriptor.name,
                        Some(event.id.tx_digest.clone()),
                        None,
                        reason,
                    ))),
                };
            }
            let chunk = self.chunks.pop_front()?;
            if self.cancel.is_cancelled() {
                self.done = true;
                return Some(Err(AdapterError::Cancelled));
            }
            let event_type = self.adapter.burn_event_type.as_str();
            match self.adapter.events_in_range(event_type, chunk, self.cancel).await {
                Ok(events) => self.pending.extend(events),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for SuiAdapter {
    fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    async fn head(&self, cancel: &CancellationToken) -> Result<u64, AdapterError> {
        let sequence: String = self
            .client
            .request("sui_getLatestCheckpointSequenceNumber", json!([]), cancel)
            .await?;
        sequence
            .parse()
            .map_err(|_| DecodeError::malformed(format!("checkpoint sequence '{}'", sequence)).into())
    }

    fn burn_events<'a>(
        &'a self,
        range: BlockRange,
        cancel: &'a CancellationToken,
    ) -> BurnStream<'a> {
        let scan = EventScan {
            adapter: self,
            cancel,
            chunks: range.chunks(self.descriptor.window.chunk_size).collect(),
            pending: VecDeque::new(),
            done: false,
        };
        stream::unfold(scan, |mut scan| async move {
            let item = scan.next_item().await?;
            Some((item, scan))
        })
        .boxed()
    }

    async fn fetch_mint_event(
        &self,
        key: &CorrelationKey,
        range: BlockRange,
        cancel: &CancellationToken,
    ) -> Result<Option<MintEvent>, AdapterError> {
        let events = self
            .events_in_range(&self.receive_event_type, range, cancel)
            .await?;
        for event in events.iter().filter(|e| self.is_candidate(e, key)) {
            match self.decode_mint(event, key, cancel).await {
                Ok(mint) => return Ok(Some(mint)),
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => tracing::warn!(
                    "[{}] Skipping receive in {}: {}",
                    self.descriptor.name,
                    event.id.tx_digest,
                    e
                ),
            }
        }
        Ok(None)
    }
}
