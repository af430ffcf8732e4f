//! Solana: blocks are fetched slot by slot and protocol instructions are
//! matched by program id and Anchor discriminator.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use super::{skip, AdapterError, BurnStream, ChainAdapter, ScanItem};
use crate::decoding::wire::MESSAGE_VERSION;
use crate::decoding::{decode_cctp_message, CctpMessage, DecodeError};
use crate::domain::{DomainId, DomainRegistry};
use crate::rpc::{RetryingRpcClient, RpcError};
use crate::types::config::{ChainConfig, ChainDescriptor};
use crate::types::{
    BlockRange, BurnEvent, ChainAddress, ChainFamily, CorrelationKey, MintEvent, Nonce,
};

pub const MESSAGE_TRANSMITTER_PROGRAM: &str = "CCTPmbSD7gX1bxKPAmg77w8oFzNFpaQiQUWD43TKaecd";
pub const TOKEN_MESSENGER_MINTER_PROGRAM: &str = "CCTPiPYPc6AsJuwueEnWgSgucamXDZwBd53dQ11YiKX3";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Block not available, slot skipped, slot missing from long-term storage.
const EMPTY_SLOT_CODES: [i64; 3] = [-32004, -32007, -32009];

const DISCRIMINATOR_LEN: usize = 8;

/// First 8 bytes of `sha256("global:<instruction>")`.
pub fn anchor_discriminator(instruction: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = Sha256::digest(format!("global:{}", instruction).as_bytes());
    let mut discriminator = [0u8; DISCRIMINATOR_LEN];
    discriminator.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    discriminator
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolanaBlock {
    block_time: Option<i64>,
    #[serde(default)]
    transactions: Vec<BlockTransaction>,
}

#[derive(Debug, Deserialize)]
struct BlockTransaction {
    transaction: TransactionBody,
    meta: Option<TransactionMeta>,
}

#[derive(Debug, Deserialize)]
struct TransactionBody {
    signatures: Vec<String>,
    message: TransactionMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMessage {
    account_keys: Vec<String>,
    instructions: Vec<CompiledInstruction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompiledInstruction {
    program_id_index: usize,
    #[serde(default)]
    accounts: Vec<usize>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    #[serde(default)]
    err: Option<serde_json::Value>,
    #[serde(default)]
    pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    post_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    loaded_addresses: Option<LoadedAddresses>,
}

#[derive(Debug, Default, Deserialize)]
struct LoadedAddresses {
    #[serde(default)]
    writable: Vec<String>,
    #[serde(default)]
    readonly: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBalance {
    account_index: usize,
    mint: String,
    #[serde(default)]
    owner: Option<String>,
    ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Deserialize)]
struct UiTokenAmount {
    amount: String,
}

impl BlockTransaction {
    fn signature(&self) -> Option<String> {
        self.transaction.signatures.first().cloned()
    }

    fn succeeded(&self) -> bool {
        self.meta.as_ref().is_some_and(|meta| meta.err.is_none())
    }

    /// Static keys followed by keys loaded from lookup tables, in index order.
    fn account_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .transaction
            .message
            .account_keys
            .iter()
            .map(String::as_str)
            .collect();
        if let Some(loaded) = self.meta.as_ref().and_then(|m| m.loaded_addresses.as_ref()) {
            keys.extend(loaded.writable.iter().map(String::as_str));
            keys.extend(loaded.readonly.iter().map(String::as_str));
        }
        keys
    }

    /// Post minus pre balance of `mint` for every token account that holds it.
    fn balance_deltas(&self, mint: &str) -> Vec<(Option<&str>, i128)> {
        let Some(meta) = self.meta.as_ref() else {
            return Vec::new();
        };
        let amount = |b: &TokenBalance| b.ui_token_amount.amount.parse::<i128>().unwrap_or(0);
        let pre: HashMap<usize, i128> = meta
            .pre_token_balances
            .iter()
            .filter(|b| b.mint == mint)
            .map(|b| (b.account_index, amount(b)))
            .collect();
        let mut deltas: Vec<(Option<&str>, i128)> = meta
            .post_token_balances
            .iter()
            .filter(|b| b.mint == mint)
            .map(|b| {
                let before = pre.get(&b.account_index).copied().unwrap_or(0);
                (b.owner.as_deref(), amount(b) - before)
            })
            .collect();
        // Accounts closed in the transaction only appear before.
        for b in meta.pre_token_balances.iter().filter(|b| b.mint == mint) {
            let still_open = meta
                .post_token_balances
                .iter()
                .any(|p| p.mint == mint && p.account_index == b.account_index);
            if !still_open {
                deltas.push((b.owner.as_deref(), -amount(b)));
            }
        }
        deltas
    }
}

fn le_u32(bytes: &[u8], at: usize) -> Result<u32, DecodeError> {
    let raw = bytes.get(at..at + 4).ok_or(DecodeError::TooShort {
        needed: at + 4,
        actual: bytes.len(),
    })?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(raw);
    Ok(u32::from_le_bytes(buf))
}

fn le_u64(bytes: &[u8], at: usize) -> Result<u64, DecodeError> {
    let raw = bytes.get(at..at + 8).ok_or(DecodeError::TooShort {
        needed: at + 8,
        actual: bytes.len(),
    })?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Ok(u64::from_le_bytes(buf))
}

fn key32(bytes: &[u8], at: usize) -> Result<[u8; 32], DecodeError> {
    let raw = bytes.get(at..at + 32).ok_or(DecodeError::TooShort {
        needed: at + 32,
        actual: bytes.len(),
    })?;
    let mut key = [0u8; 32];
    key.copy_from_slice(raw);
    Ok(key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Instruction {
    ReceiveMessage,
    DepositForBurn,
    DepositForBurnWithCaller,
}

pub struct SolanaAdapter {
    descriptor: ChainDescriptor,
    client: RetryingRpcClient,
    registry: Arc<DomainRegistry>,
    message_transmitter: String,
    token_messenger_minter: String,
    usdc_mint: String,
    nonce_offset: Option<u16>,
    receive_message: [u8; DISCRIMINATOR_LEN],
    deposit_for_burn: [u8; DISCRIMINATOR_LEN],
    deposit_for_burn_with_caller: [u8; DISCRIMINATOR_LEN],
}

impl SolanaAdapter {
    pub fn new(
        descriptor: ChainDescriptor,
        client: RetryingRpcClient,
        registry: Arc<DomainRegistry>,
        message_transmitter: String,
        token_messenger_minter: String,
        usdc_mint: String,
    ) -> Self {
        Self {
            descriptor,
            client,
            registry,
            message_transmitter,
            token_messenger_minter,
            usdc_mint,
            nonce_offset: None,
            receive_message: anchor_discriminator("receive_message"),
            deposit_for_burn: anchor_discriminator("deposit_for_burn"),
            deposit_for_burn_with_caller: anchor_discriminator("deposit_for_burn_with_caller"),
        }
    }

    /// Fallback position of a little-endian u16 nonce in receive instruction data.
    pub fn with_nonce_offset(mut self, offset: Option<u16>) -> Self {
        self.nonce_offset = offset;
        self
    }

    pub fn from_config(
        config: &ChainConfig,
        descriptor: ChainDescriptor,
        client: RetryingRpcClient,
        registry: Arc<DomainRegistry>,
    ) -> anyhow::Result<Self> {
        for program in [&config.message_transmitter, &config.token_messenger] {
            ChainAddress::solana(program)
                .map_err(|e| anyhow::anyhow!("Invalid program id for {}: {}", config.name, e))?;
        }
        let usdc_mint = config.usdc.clone().unwrap_or_else(|| USDC_MINT.to_string());
        Ok(Self::new(
            descriptor,
            client,
            registry,
            config.message_transmitter.clone(),
            config.token_messenger.clone(),
            usdc_mint,
        )
        .with_nonce_offset(config.nonce_offset))
    }

    fn family_of(&self, domain: DomainId) -> Option<ChainFamily> {
        self.registry
            .chain_of(domain)
            .name()
            .and_then(ChainFamily::of_chain)
    }

    /// `None` for slots that hold no block.
    async fn block(
        &self,
        slot: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<SolanaBlock>, AdapterError> {
        let params = json!([slot, {
            "encoding": "json",
            "transactionDetails": "full",
            "maxSupportedTransactionVersion": 0,
            "rewards": false
        }]);
        match self.client.request("getBlock", params, cancel).await {
            Ok(block) => Ok(block),
            Err(RpcError::Application { code, message }) if EMPTY_SLOT_CODES.contains(&code) => {
                tracing::debug!("[{}] Slot {} is empty: {}", self.descriptor.name, slot, message);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn classify(&self, program: &str, data: &[u8]) -> Option<Instruction> {
        let discriminator = data.get(..DISCRIMINATOR_LEN)?;
        if program == self.message_transmitter && discriminator == self.receive_message {
            Some(Instruction::ReceiveMessage)
        } else if program == self.token_messenger_minter && discriminator == self.deposit_for_burn
        {
            Some(Instruction::DepositForBurn)
        } else if program == self.token_messenger_minter
            && discriminator == self.deposit_for_burn_with_caller
        {
            Some(Instruction::DepositForBurnWithCaller)
        } else {
            None
        }
    }

    /// Top-level protocol instructions of successful transactions, with decoded data.
    fn protocol_instructions<'b>(
        &self,
        block: &'b SolanaBlock,
    ) -> Vec<(&'b BlockTransaction, &'b CompiledInstruction, Instruction, Vec<u8>)> {
        let mut found = Vec::new();
        for tx in block.transactions.iter().filter(|tx| tx.succeeded()) {
            let keys = tx.account_keys();
            for ix in &tx.transaction.message.instructions {
                let Some(program) = keys.get(ix.program_id_index) else {
                    continue;
                };
                if *program != self.message_transmitter && *program != self.token_messenger_minter
                {
                    continue;
                }
                let Ok(data) = bs58::decode(&ix.data).into_vec() else {
                    continue;
                };
                if let Some(kind) = self.classify(program, &data) {
                    found.push((tx, ix, kind, data));
                }
            }
        }
        found
    }

    /// The protocol message carried by `receive_message`, if it is addressed here.
    fn received_message(&self, data: &[u8]) -> Option<CctpMessage> {
        let len = le_u32(data, DISCRIMINATOR_LEN).ok()? as usize;
        let start = DISCRIMINATOR_LEN + 4;
        let message = data.get(start..start.checked_add(len)?)?;
        let message = decode_cctp_message(message).ok()?;
        (message.version == MESSAGE_VERSION && message.destination_domain == self.descriptor.domain.0)
            .then_some(message)
    }

    fn offset_nonce(&self, data: &[u8]) -> Option<u64> {
        let at = usize::from(self.nonce_offset?);
        let raw = data.get(at..at + 2)?;
        Some(u64::from(u16::from_le_bytes([raw[0], raw[1]])))
    }

    fn decode_receive(
        &self,
        slot: u64,
        block_time: Option<u64>,
        tx: &BlockTransaction,
        data: &[u8],
    ) -> Result<MintEvent, AdapterError> {
        let keys = tx.account_keys();
        let payer = keys.first().ok_or(DecodeError::MissingField("accountKeys"))?;
        let message = self.received_message(data);
        let nonce = match (&message, self.offset_nonce(data)) {
            (Some(message), _) => Nonce::Known(message.nonce),
            (None, Some(nonce)) => Nonce::Known(nonce),
            (None, None) => Nonce::Undetermined,
        };
        let source_domain = message.as_ref().map(|m| DomainId(m.source_domain));
        let sender = message.as_ref().map(|m| {
            ChainAddress::from_word(
                self.family_of(DomainId(m.source_domain)),
                &m.sender,
            )
        });

        let credited = tx
            .balance_deltas(&self.usdc_mint)
            .into_iter()
            .filter(|(_, delta)| *delta > 0)
            .max_by_key(|(_, delta)| *delta);
        let (recipient, amount) = match credited {
            Some((owner, delta)) => (
                owner.map(ChainAddress::solana).transpose()?,
                Some(U256::from(delta.unsigned_abs())),
            ),
            None => (None, None),
        };

        Ok(MintEvent {
            destination_chain: self.descriptor.name.clone(),
            block_ref: slot,
            tx_ref: tx.signature().unwrap_or_default(),
            timestamp: block_time,
            nonce,
            caller: ChainAddress::solana(payer)?,
            source_domain,
            sender,
            recipient,
            amount,
            origin: Some(ChainAddress::solana(payer)?),
            tx_shape: None,
        })
    }

    fn decode_deposit(
        &self,
        slot: u64,
        block_time: Option<u64>,
        tx: &BlockTransaction,
        ix: &CompiledInstruction,
        data: &[u8],
        with_caller: bool,
    ) -> Result<BurnEvent, AdapterError> {
        let keys = tx.account_keys();
        let amount = le_u64(data, DISCRIMINATOR_LEN)?;
        let destination_domain = DomainId(le_u32(data, DISCRIMINATOR_LEN + 8)?);
        let destination_family = self.family_of(destination_domain);
        let recipient = key32(data, DISCRIMINATOR_LEN + 12)?;
        let caller = if with_caller {
            Some(key32(data, DISCRIMINATOR_LEN + 44)?)
        } else {
            None
        };

        let depositor = ix
            .accounts
            .first()
            .and_then(|i| keys.get(*i))
            .or_else(|| keys.first())
            .ok_or(DecodeError::MissingField("accountKeys"))?;

        let debited = tx
            .balance_deltas(&self.usdc_mint)
            .into_iter()
            .filter(|(_, delta)| *delta < 0)
            .min_by_key(|(_, delta)| *delta);
        if let Some((_, delta)) = debited {
            if delta.unsigned_abs() != u128::from(amount) {
                tracing::warn!(
                    "[{}] Burn of {} in {} but USDC balance moved by {}",
                    self.descriptor.name,
                    amount,
                    tx.signature().unwrap_or_default(),
                    delta
                );
            }
        }

        Ok(BurnEvent {
            source_chain: self.descriptor.name.clone(),
            source_domain: self.descriptor.domain,
            block_ref: slot,
            tx_ref: tx.signature().unwrap_or_default(),
            timestamp: block_time,
            nonce: Nonce::Undetermined,
            burn_token: ChainAddress::solana(&self.usdc_mint)?,
            depositor: ChainAddress::solana(depositor)?,
            amount: U256::from(amount),
            mint_recipient: ChainAddress::from_word(destination_family, &recipient.into()),
            destination_domain,
            destination_caller: caller
                .filter(|c| c.iter().any(|b| *b != 0))
                .map(|c| ChainAddress::from_word(destination_family, &c.into())),
            destination_token_messenger: None,
            origin: keys.first().map(|k| ChainAddress::solana(k)).transpose()?,
            token: None,
            amount_formatted: None,
            tx_shape: None,
        })
    }

    fn burns_in_block(&self, slot: u64, block: &SolanaBlock) -> Vec<ScanItem> {
        let block_time = block.block_time.and_then(|t| u64::try_from(t).ok());
        self.protocol_instructions(block)
            .into_iter()
            .filter_map(|(tx, ix, kind, data)| {
                let with_caller = match kind {
                    Instruction::DepositForBurn => false,
                    Instruction::DepositForBurnWithCaller => true,
                    Instruction::ReceiveMessage => return None,
                };
                Some(
                    match self.decode_deposit(slot, block_time, tx, ix, &data, with_caller) {
                        Ok(burn) => ScanItem::Burn(burn),
                        Err(reason) => skip(&self.descriptor.name, tx.signature(), Some(slot), reason),
                    },
                )
            })
            .collect()
    }

    fn mints_in_block(&self, slot: u64, block: &SolanaBlock) -> Vec<MintEvent> {
        let block_time = block.block_time.and_then(|t| u64::try_from(t).ok());
        self.protocol_instructions(block)
            .into_iter()
            .filter(|(_, _, kind, _)| *kind == Instruction::ReceiveMessage)
            .filter_map(|(tx, _, _, data)| {
                match self.decode_receive(slot, block_time, tx, &data) {
                    Ok(mint) => Some(mint),
                    Err(e) => {
                        tracing::warn!(
                            "[{}] Skipping receive in {}: {}",
                            self.descriptor.name,
                            tx.signature().unwrap_or_default(),
                            e
                        );
                        None
                    }
                }
            })
            .collect()
    }
}

struct SlotScan<'a> {
    adapter: &'a SolanaAdapter,
    cancel: &'a CancellationToken,
    next_slot: Option<u64>,
    end: u64,
    pending: VecDeque<ScanItem>,
    done: bool,
}

impl SlotScan<'_> {
    async fn next_item(&mut self) -> Option<Result<ScanItem, AdapterError>> {
        loop {
            if self.done {
                return None;
            }
            if let Some(item) = self.pending.pop_front() {
                return Some(Ok(item));
            }
            let slot = self.next_slot?;
            self.next_slot = slot.checked_add(1).filter(|s| *s <= self.end);
            if self.cancel.is_cancelled() {
                self.done = true;
                return Some(Err(AdapterError::Cancelled));
            }
            match self.adapter.block(slot, self.cancel).await {
                Ok(Some(block)) => self.pending.extend(self.adapter.burns_in_block(slot, &block)),
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    async fn head(&self, cancel: &CancellationToken) -> Result<u64, AdapterError> {
        let slot: u64 = self
            .client
            .request("getSlot", json!([{"commitment": "finalized"}]), cancel)
            .await?;
        Ok(slot)
    }

    fn burn_events<'a>(
        &'a self,
        range: BlockRange,
        cancel: &'a CancellationToken,
    ) -> BurnStream<'a> {
        let scan = SlotScan {
            adapter: self,
            cancel,
            next_slot: Some(range.start),
            end: range.end,
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
        let wanted = Nonce::Known(key.nonce);
        // Offset-read nonces carry no source domain; keep the first as a
        // fallback in case no receive names the key's source.
        let mut unverified = None;
        for slot in range.start..=range.end {
            if cancel.is_cancelled() {
                return Err(AdapterError::Cancelled);
            }
            let Some(block) = self.block(slot, cancel).await? else {
                continue;
            };
            for mint in self.mints_in_block(slot, &block) {
                if mint.nonce == Nonce::Undetermined {
                    tracing::debug!(
                        "[{}] Receive {} has no readable nonce",
                        self.descriptor.name,
                        mint.tx_ref
                    );
                    continue;
                }
                if !mint.nonce.matches(&wanted) {
                    continue;
                }
                match mint.source_domain {
                    Some(domain) if domain == key.source_domain => return Ok(Some(mint)),
                    Some(_) => {}
                    None if unverified.is_none() => unverified = Some(mint),
                    None => {}
                }
            }
        }
        Ok(unverified)
    }
}
