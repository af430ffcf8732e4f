//! EVM chains: events come from `eth_getLogs` on the protocol contracts.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use alloy::rpc::types::{Block, Filter, Log, TransactionReceipt, TransactionRequest};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use anyhow::Context;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{skip, AdapterError, BurnStream, ChainAdapter, ScanItem};
use crate::decoding::{decode_message_body, DecodeError};
use crate::domain::{DomainId, DomainRegistry};
use crate::rpc::RetryingRpcClient;
use crate::types::config::{ChainConfig, ChainDescriptor};
use crate::types::{
    BlockRange, BurnEvent, ChainAddress, ChainFamily, CorrelationKey, MintEvent, Nonce,
    TokenMetadata, TxShape,
};

sol! {
    /// Emitted by TokenMessenger for every burn.
    #[derive(Debug, PartialEq, Eq)]
    event DepositForBurn(
        uint64 indexed nonce,
        address indexed burnToken,
        uint256 amount,
        address indexed depositor,
        bytes32 mintRecipient,
        uint32 destinationDomain,
        bytes32 destinationTokenMessenger,
        bytes32 destinationCaller
    );

    /// Emitted by MessageTransmitter when a message is received.
    #[derive(Debug, PartialEq, Eq)]
    event MessageReceived(
        address indexed caller,
        uint32 sourceDomain,
        uint64 indexed nonce,
        bytes32 sender,
        bytes messageBody
    );

    interface IERC20Metadata {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }
}

fn tx_ref(hash: B256) -> String {
    format!("0x{}", hex::encode(hash))
}

fn abi_error(error: alloy::sol_types::Error) -> DecodeError {
    DecodeError::malformed(error.to_string())
}

fn block_of(log: &Log) -> Result<u64, DecodeError> {
    log.block_number
        .ok_or(DecodeError::MissingField("blockNumber"))
}

fn tx_hash_of(log: &Log) -> Result<B256, DecodeError> {
    log.transaction_hash
        .ok_or(DecodeError::MissingField("transactionHash"))
}

fn tx_ref_of(log: &Log) -> Option<String> {
    log.transaction_hash.map(tx_ref)
}

/// Where `log` sits among its transaction's logs, and whether the
/// transaction called `target` directly.
fn tx_shape(log: &Log, receipt: &TransactionReceipt, target: Address) -> TxShape {
    let logs = receipt.inner.logs();
    let position = logs
        .iter()
        .position(|l| log.log_index.is_some() && l.log_index == log.log_index)
        .or_else(|| logs.iter().position(|l| l.address() == target))
        .map_or(0, |p| p + 1);

    TxShape {
        is_direct: receipt.to == Some(target),
        total_logs: logs.len(),
        target_position: position,
        first_contract: logs.first().map(|l| l.address()),
    }
}

/// Per-scan lookups shared by every burn in the scan.
#[derive(Debug, Default)]
struct ScanCache {
    timestamps: HashMap<u64, u64>,
    tokens: HashMap<Address, Option<TokenMetadata>>,
}

/// One adapter for every EVM chain, parameterized by its descriptor and contracts.
pub struct EvmAdapter {
    descriptor: ChainDescriptor,
    client: RetryingRpcClient,
    registry: Arc<DomainRegistry>,
    token_messenger: Address,
    message_transmitter: Address,
    /// When set, burns of any other token are skipped.
    usdc: Option<Address>,
}

impl EvmAdapter {
    pub fn new(
        descriptor: ChainDescriptor,
        client: RetryingRpcClient,
        registry: Arc<DomainRegistry>,
        token_messenger: Address,
        message_transmitter: Address,
    ) -> Self {
        Self {
            descriptor,
            client,
            registry,
            token_messenger,
            message_transmitter,
            usdc: None,
        }
    }

    pub fn with_usdc(mut self, usdc: Option<Address>) -> Self {
        self.usdc = usdc;
        self
    }

    pub fn from_config(
        config: &ChainConfig,
        descriptor: ChainDescriptor,
        client: RetryingRpcClient,
        registry: Arc<DomainRegistry>,
    ) -> anyhow::Result<Self> {
        let token_messenger: Address = config
            .token_messenger
            .parse()
            .with_context(|| format!("Invalid token_messenger for {}", config.name))?;
        let message_transmitter: Address = config
            .message_transmitter
            .parse()
            .with_context(|| format!("Invalid message_transmitter for {}", config.name))?;
        let usdc = config
            .usdc
            .as_deref()
            .map(str::parse::<Address>)
            .transpose()
            .with_context(|| format!("Invalid usdc address for {}", config.name))?;
        Ok(Self::new(
            descriptor,
            client,
            registry,
            token_messenger,
            message_transmitter,
        )
        .with_usdc(usdc))
    }

    fn family_of(&self, domain: DomainId) -> Option<ChainFamily> {
        self.registry
            .chain_of(domain)
            .name()
            .and_then(ChainFamily::of_chain)
    }

    fn filter(&self, address: Address, signature: B256, range: BlockRange) -> Filter {
        Filter::new()
            .address(address)
            .event_signature(signature)
            .from_block(range.start)
            .to_block(range.end)
    }

    async fn get_logs(
        &self,
        filter: Filter,
        range: BlockRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<Log>, AdapterError> {
        let logs: Vec<Log> = self
            .client
            .request("eth_getLogs", json!([filter]), cancel)
            .await?;
        tracing::debug!(
            "[{}] eth_getLogs {} returned {} logs",
            self.descriptor.name,
            range,
            logs.len()
        );
        Ok(logs.into_iter().filter(|log| !log.removed).collect())
    }

    async fn block_timestamp(
        &self,
        log: &Log,
        cache: &mut HashMap<u64, u64>,
        cancel: &CancellationToken,
    ) -> Result<u64, AdapterError> {
        if let Some(timestamp) = log.block_timestamp {
            return Ok(timestamp);
        }
        let number = block_of(log)?;
        if let Some(timestamp) = cache.get(&number) {
            return Ok(*timestamp);
        }
        let block: Option<Block> = self
            .client
            .request(
                "eth_getBlockByNumber",
                json!([U64::from(number), false]),
                cancel,
            )
            .await?;
        let timestamp = block
            .ok_or(DecodeError::MissingField("block"))?
            .header
            .timestamp;
        cache.insert(number, timestamp);
        Ok(timestamp)
    }

    /// The receipt is informational; only cancellation is allowed to fail the event.
    async fn optional_receipt(
        &self,
        log: &Log,
        cancel: &CancellationToken,
    ) -> Result<Option<TransactionReceipt>, AdapterError> {
        let hash = tx_hash_of(log)?;
        let receipt: Result<Option<TransactionReceipt>, AdapterError> = self
            .client
            .request("eth_getTransactionReceipt", json!([hash]), cancel)
            .await
            .map_err(AdapterError::from);
        match receipt {
            Ok(receipt) => Ok(receipt),
            Err(AdapterError::Cancelled) => Err(AdapterError::Cancelled),
            Err(e) => {
                tracing::debug!(
                    "[{}] No receipt for {}: {}",
                    self.descriptor.name,
                    tx_ref(hash),
                    e
                );
                Ok(None)
            }
        }
    }

    async fn call(
        &self,
        to: Address,
        calldata: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, AdapterError> {
        let request = TransactionRequest::default()
            .to(to)
            .input(Bytes::from(calldata).into());
        Ok(self
            .client
            .request("eth_call", json!([request, "latest"]), cancel)
            .await?)
    }

    async fn token_metadata(
        &self,
        token: Address,
        cancel: &CancellationToken,
    ) -> Result<TokenMetadata, AdapterError> {
        let symbol = self
            .call(token, IERC20Metadata::symbolCall {}.abi_encode(), cancel)
            .await?;
        let decimals = self
            .call(token, IERC20Metadata::decimalsCall {}.abi_encode(), cancel)
            .await?;
        Ok(TokenMetadata {
            symbol: String::abi_decode(&symbol).map_err(abi_error)?,
            decimals: <alloy::sol_types::sol_data::Uint<8> as alloy::sol_types::SolType>::abi_decode(&decimals).map_err(abi_error)?,
        })
    }

    /// Metadata of `token`, read once per scan. Tokens that do not answer
    /// `symbol()`/`decimals()` are remembered as unknown.
    async fn cached_token(
        &self,
        token: Address,
        cache: &mut ScanCache,
        cancel: &CancellationToken,
    ) -> Result<Option<TokenMetadata>, AdapterError> {
        if let Some(known) = cache.tokens.get(&token) {
            return Ok(known.clone());
        }
        let metadata = match self.token_metadata(token, cancel).await {
            Ok(metadata) => Some(metadata),
            Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
            Err(e) => {
                tracing::debug!(
                    "[{}] No metadata for token {}: {}",
                    self.descriptor.name,
                    token,
                    e
                );
                None
            }
        };
        cache.tokens.insert(token, metadata.clone());
        Ok(metadata)
    }

    async fn decode_burn(
        &self,
        log: &Log,
        cache: &mut ScanCache,
        cancel: &CancellationToken,
    ) -> Result<BurnEvent, AdapterError> {
        let event = DepositForBurn::decode_log_data(log.data()).map_err(abi_error)?;
        let block_ref = block_of(log)?;
        let hash = tx_hash_of(log)?;
        if let Some(usdc) = self.usdc {
            if event.burnToken != usdc {
                return Err(AdapterError::UnexpectedToken(ChainAddress::Evm(event.burnToken)));
            }
        }

        let destination_domain = DomainId(event.destinationDomain);
        let destination_family = self.family_of(destination_domain);
        let remote = |word: &B256| {
            (!word.is_zero()).then(|| ChainAddress::from_word(destination_family, word))
        };

        let timestamp = self
            .block_timestamp(log, &mut cache.timestamps, cancel)
            .await?;
        let receipt = self.optional_receipt(log, cancel).await?;
        let token = self.cached_token(event.burnToken, cache, cancel).await?;

        Ok(BurnEvent {
            source_chain: self.descriptor.name.clone(),
            source_domain: self.descriptor.domain,
            block_ref,
            tx_ref: tx_ref(hash),
            timestamp: Some(timestamp),
            nonce: Nonce::Known(event.nonce),
            burn_token: ChainAddress::Evm(event.burnToken),
            depositor: ChainAddress::Evm(event.depositor),
            amount: event.amount,
            mint_recipient: ChainAddress::from_word(destination_family, &event.mintRecipient),
            destination_domain,
            destination_caller: remote(&event.destinationCaller),
            destination_token_messenger: remote(&event.destinationTokenMessenger),
            origin: receipt.as_ref().map(|r| ChainAddress::Evm(r.from)),
            amount_formatted: token.as_ref().and_then(|t| t.format_amount(event.amount)),
            token,
            tx_shape: receipt
                .as_ref()
                .map(|r| tx_shape(log, r, self.token_messenger)),
        })
    }

    async fn burn_item(
        &self,
        log: Log,
        cache: &mut ScanCache,
        cancel: &CancellationToken,
    ) -> Result<ScanItem, AdapterError> {
        match self.decode_burn(&log, cache, cancel).await {
            Ok(burn) => Ok(ScanItem::Burn(burn)),
            Err(AdapterError::Cancelled) => Err(AdapterError::Cancelled),
            Err(reason) => Ok(skip(
                &self.descriptor.name,
                tx_ref_of(&log),
                log.block_number,
                reason,
            )),
        }
    }

    /// The mint fields carried by the log itself. `None` when the log belongs
    /// to another transfer.
    fn decode_mint(
        &self,
        log: &Log,
        key: &CorrelationKey,
    ) -> Result<Option<MintEvent>, AdapterError> {
        let event = MessageReceived::decode_log_data(log.data()).map_err(abi_error)?;
        if event.nonce != key.nonce {
            return Ok(None);
        }
        let source_domain = DomainId(event.sourceDomain);
        if source_domain != key.source_domain {
            tracing::debug!(
                "[{}] Nonce {} received from domain {}, looking for {}",
                self.descriptor.name,
                event.nonce,
                source_domain,
                key.source_domain
            );
            return Ok(None);
        }

        let (recipient, amount) = match decode_message_body(&event.messageBody) {
            Ok(body) => (Some(ChainAddress::Evm(body.recipient)), Some(body.amount)),
            Err(e) => {
                tracing::warn!(
                    "[{}] Undecodable message body in {}: {}",
                    self.descriptor.name,
                    tx_ref_of(log).unwrap_or_default(),
                    e
                );
                (None, None)
            }
        };

        Ok(Some(MintEvent {
            destination_chain: self.descriptor.name.clone(),
            block_ref: block_of(log)?,
            tx_ref: tx_ref(tx_hash_of(log)?),
            timestamp: None,
            nonce: Nonce::Known(event.nonce),
            caller: ChainAddress::Evm(event.caller),
            source_domain: Some(source_domain),
            sender: Some(ChainAddress::from_word(
                self.family_of(source_domain),
                &event.sender,
            )),
            recipient,
            amount,
            origin: None,
            tx_shape: None,
        }))
    }
}

struct BurnScan<'a> {
    adapter: &'a EvmAdapter,
    cancel: &'a CancellationToken,
    chunks: VecDeque<BlockRange>,
    pending: VecDeque<Log>,
    cache: ScanCache,
    done: bool,
}

impl BurnScan<'_> {
    async fn next_item(&mut self) -> Option<Result<ScanItem, AdapterError>> {
        loop {
            if self.done {
                return None;
            }
            if let Some(log) = self.pending.pop_front() {
                let item = self
                    .adapter
                    .burn_item(log, &mut self.cache, self.cancel)
                    .await;
                self.done = item.is_err();
                return Some(item);
            }
            let chunk = self.chunks.pop_front()?;
            if self.cancel.is_cancelled() {
                self.done = true;
                return Some(Err(AdapterError::Cancelled));
            }
            let filter = self.adapter.filter(
                self.adapter.token_messenger,
                DepositForBurn::SIGNATURE_HASH,
                chunk,
            );
            match self.adapter.get_logs(filter, chunk, self.cancel).await {
                Ok(logs) => self.pending.extend(logs),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    async fn head(&self, cancel: &CancellationToken) -> Result<u64, AdapterError> {
        let head: U64 = self
            .client
            .request("eth_blockNumber", json!([]), cancel)
            .await?;
        Ok(head.to::<u64>())
    }

    fn burn_events<'a>(
        &'a self,
        range: BlockRange,
        cancel: &'a CancellationToken,
    ) -> BurnStream<'a> {
        let scan = BurnScan {
            adapter: self,
            cancel,
            chunks: range.chunks(self.descriptor.window.chunk_size).collect(),
            pending: VecDeque::new(),
            cache: ScanCache::default(),
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
        let filter = self
            .filter(self.message_transmitter, MessageReceived::SIGNATURE_HASH, range)
            .topic2(B256::from(U256::from(key.nonce)));
        let logs = self.get_logs(filter, range, cancel).await?;

        for log in logs {
            let mint = match self.decode_mint(&log, key) {
                Ok(Some(mint)) => mint,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        "[{}] Skipping receive log in {}: {}",
                        self.descriptor.name,
                        tx_ref_of(&log).unwrap_or_default(),
                        e
                    );
                    continue;
                }
            };

            let timestamp = match self.block_timestamp(&log, &mut HashMap::new(), cancel).await {
                Ok(timestamp) => Some(timestamp),
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        "[{}] No timestamp for {}: {}",
                        self.descriptor.name,
                        mint.tx_ref,
                        e
                    );
                    None
                }
            };
            let receipt = self.optional_receipt(&log, cancel).await?;

            return Ok(Some(MintEvent {
                timestamp,
                origin: receipt.as_ref().map(|r| ChainAddress::Evm(r.from)),
                tx_shape: receipt
                    .as_ref()
                    .map(|r| tx_shape(&log, r, self.message_transmitter)),
                ..mint
            }));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, b256, keccak256};
    use serde_json::Value;

    use super::*;
    use crate::decoding::wire::{address_word, burn_body};
    use crate::testing::{
        evm_block, evm_receipt, fast_client, hex_quantity, parse_quantity, BurnLogFixture,
        MintLogFixture, MockTransport, Reply,
    };
    use crate::types::config::SearchWindow;

    const MESSENGER: Address = address!("bd3fa81b58ba92a82136038b25adec7066af3155");
    const TRANSMITTER: Address = address!("ad09780d193884d503182ad4588450c416d6f9d4");
    const USDC: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    const EURC: Address = address!("1abaea1f7c830bd89acc67ec4af516284b1bc33c");
    const DEPOSITOR: Address = address!("1111111111111111111111111111111111111111");
    const RELAYER: Address = address!("2222222222222222222222222222222222222222");
    const RECIPIENT: Address = address!("742d35cc6634c0532925a3b844bc9e7595f8fa0d");
    const REMOTE_MESSENGER: Address = address!("1682ae6375c4e4a97e4b583bc394c861a46d8962");

    fn descriptor(name: &str, domain: u32) -> ChainDescriptor {
        ChainDescriptor {
            name: name.to_string(),
            domain: DomainId(domain),
            family: ChainFamily::Evm,
            window: SearchWindow {
                lookback: 10_000,
                chunk_size: 100,
            },
        }
    }

    fn adapter(mock: &Arc<MockTransport>, name: &str, domain: u32) -> EvmAdapter {
        EvmAdapter::new(
            descriptor(name, domain),
            fast_client(mock),
            Arc::new(DomainRegistry::standard()),
            MESSENGER,
            TRANSMITTER,
        )
    }

    fn burn_fixture(nonce: u64, destination_domain: u32, recipient: B256) -> BurnLogFixture {
        BurnLogFixture {
            messenger: MESSENGER,
            nonce,
            burn_token: USDC,
            depositor: DEPOSITOR,
            amount: U256::from(2_500_000u64),
            mint_recipient: recipient,
            destination_domain,
            destination_token_messenger: REMOTE_MESSENGER.into_word(),
            destination_caller: B256::ZERO,
        }
    }

    /// `symbol()` answers "USDC", `decimals()` answers 6.
    fn token_calls(params: &Value) -> Reply {
        let symbol = hex::encode(IERC20Metadata::symbolCall::SELECTOR);
        let encoded = if params[0].to_string().contains(&symbol) {
            "USDC".to_string().abi_encode()
        } else {
            <alloy::sol_types::sol_data::Uint<8> as alloy::sol_types::SolType>::abi_encode(&6u8)
        };
        Reply::Result(json!(Bytes::from(encoded)))
    }

    fn with_enrichment(mock: MockTransport, to: Address) -> MockTransport {
        mock.with("eth_getBlockByNumber", |params| {
            let number = parse_quantity(&params[0]);
            Reply::Result(evm_block(number, 0x65000000))
        })
        .with("eth_getTransactionReceipt", move |params| {
            let hash: B256 = serde_json::from_value(params[0].clone()).unwrap();
            let transfer = json!({
                "address": USDC,
                "topics": [B256::repeat_byte(0x0f)],
                "data": "0x",
                "blockNumber": "0x64",
                "transactionHash": hash,
                "logIndex": "0x0",
                "removed": false
            });
            let mut protocol = transfer.clone();
            protocol["address"] = json!(to);
            protocol["logIndex"] = json!("0x1");
            Reply::Result(evm_receipt(hash, 0x64, DEPOSITOR, Some(to), vec![transfer, protocol]))
        })
        .with("eth_call", token_calls)
    }

    #[test]
    fn test_event_signatures() {
        assert_eq!(
            keccak256("DepositForBurn(uint64,address,uint256,address,bytes32,uint32,bytes32,bytes32)"),
            DepositForBurn::SIGNATURE_HASH
        );
        assert_eq!(
            MessageReceived::SIGNATURE_HASH,
            b256!("58200b4c34ae05ee816d710053fff3fb75af4395915d3d2a771b24aa10e3cc5d")
        );
    }

    #[tokio::test]
    async fn test_burn_scan_decodes_and_skips() {
        let solana_recipient = B256::repeat_byte(0x5c);
        let good = burn_fixture(42, 6, B256::from(address_word(RECIPIENT)));
        let to_solana = burn_fixture(43, 5, solana_recipient);
        let mut broken = to_solana.log(150, B256::repeat_byte(0x03), 2);
        broken["topics"].as_array_mut().unwrap().truncate(2);

        let logs_by_chunk = move |params: &Value| {
            let from = parse_quantity(&params[0]["fromBlock"]);
            match from {
                100 => Reply::Result(json!([
                    good.log(120, B256::repeat_byte(0x01), 1),
                    to_solana.log(120, B256::repeat_byte(0x02), 1)
                ])),
                200 => Reply::Result(json!([broken.clone()])),
                _ => Reply::Result(json!([])),
            }
        };
        let mock = Arc::new(with_enrichment(
            MockTransport::new().with("eth_getLogs", logs_by_chunk),
            MESSENGER,
        ));
        let adapter = adapter(&mock, "ethereum", 0);
        let cancel = CancellationToken::new();

        let items: Vec<_> = adapter
            .burn_events(BlockRange::new(100, 299), &cancel)
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        let burn = match &items[0] {
            Ok(ScanItem::Burn(burn)) => burn,
            other => panic!("expected burn, got {:?}", other),
        };
        assert_eq!(burn.nonce, Nonce::Known(42));
        assert_eq!(burn.source_domain, DomainId(0));
        assert_eq!(burn.destination_domain, DomainId(6));
        assert_eq!(burn.amount, U256::from(2_500_000u64));
        assert_eq!(burn.burn_token, ChainAddress::Evm(USDC));
        assert_eq!(burn.depositor, ChainAddress::Evm(DEPOSITOR));
        assert_eq!(burn.mint_recipient, ChainAddress::Evm(RECIPIENT));
        assert_eq!(burn.destination_caller, None);
        assert_eq!(
            burn.destination_token_messenger,
            Some(ChainAddress::Evm(REMOTE_MESSENGER))
        );
        assert_eq!(burn.origin, Some(ChainAddress::Evm(DEPOSITOR)));
        assert_eq!(
            burn.token,
            Some(TokenMetadata {
                symbol: "USDC".to_string(),
                decimals: 6
            })
        );
        assert_eq!(burn.amount_formatted.as_deref(), Some("2.500000"));
        assert_eq!(burn.timestamp, Some(0x65000000));
        assert_eq!(burn.block_ref, 120);
        let shape = burn.tx_shape.as_ref().unwrap();
        assert!(shape.is_direct);
        assert_eq!(shape.total_logs, 2);
        assert_eq!(shape.target_position, 2);
        assert_eq!(shape.first_contract, Some(USDC));

        match &items[1] {
            Ok(ScanItem::Burn(burn)) => {
                assert_eq!(burn.mint_recipient, ChainAddress::Solana([0x5c; 32]));
                assert!(matches!(
                    burn.destination_token_messenger,
                    Some(ChainAddress::Solana(_))
                ));
            }
            other => panic!("expected burn, got {:?}", other),
        }
        match &items[2] {
            Ok(ScanItem::Skipped(skipped)) => {
                assert_eq!(skipped.block_ref, Some(150));
                assert!(matches!(skipped.reason, AdapterError::Decode(_)));
            }
            other => panic!("expected skip, got {:?}", other),
        }

        // Both burns share a block and a token; each is looked up once.
        assert_eq!(mock.calls_to("eth_getBlockByNumber"), 1);
        assert_eq!(mock.calls_to("eth_call"), 2);
        assert_eq!(mock.calls_to("eth_getLogs"), 2);
        let params = mock.params_of("eth_getLogs");
        assert_eq!(
            params[0][0]["topics"][0],
            json!(DepositForBurn::SIGNATURE_HASH)
        );
    }

    #[tokio::test]
    async fn test_burn_scan_ends_on_listing_failure() {
        let mock = Arc::new(MockTransport::new().with_sequence(
            "eth_getLogs",
            vec![Reply::Error {
                code: -32005,
                message: "query returned more than 10000 results".into(),
            }],
        ));
        let adapter = adapter(&mock, "ethereum", 0);
        let cancel = CancellationToken::new();

        let items: Vec<_> = adapter
            .burn_events(BlockRange::new(0, 999), &cancel)
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AdapterError::Rpc(_))));
        assert_eq!(mock.calls_to("eth_getLogs"), 1);
    }

    #[tokio::test]
    async fn test_missing_enrichment_keeps_burn() {
        let fixture = burn_fixture(9, 6, B256::from(address_word(RECIPIENT)));
        let mut log = fixture.log(10, B256::repeat_byte(0x09), 0);
        log["blockTimestamp"] = json!(hex_quantity(1_700_000_000));
        let mock = Arc::new(
            MockTransport::new()
                .with("eth_getLogs", move |_| Reply::Result(json!([log.clone()])))
                .with("eth_getTransactionReceipt", |_| Reply::Result(Value::Null))
                .with("eth_call", |_| Reply::Error {
                    code: 3,
                    message: "execution reverted".into(),
                }),
        );
        let adapter = adapter(&mock, "ethereum", 0);
        let cancel = CancellationToken::new();

        let items: Vec<_> = adapter
            .burn_events(BlockRange::new(0, 99), &cancel)
            .collect()
            .await;

        match &items[0] {
            Ok(ScanItem::Burn(burn)) => {
                assert_eq!(burn.timestamp, Some(1_700_000_000));
                assert!(burn.tx_shape.is_none());
                assert!(burn.origin.is_none());
                assert!(burn.token.is_none());
                assert!(burn.amount_formatted.is_none());
            }
            other => panic!("expected burn, got {:?}", other),
        }
        assert_eq!(mock.calls_to("eth_getBlockByNumber"), 0);
    }

    #[tokio::test]
    async fn test_burns_of_other_tokens_are_skipped_when_usdc_is_set() {
        let usdc_burn = burn_fixture(1, 6, B256::from(address_word(RECIPIENT)));
        let eurc_burn = BurnLogFixture {
            burn_token: EURC,
            nonce: 2,
            ..usdc_burn.clone()
        };
        let logs = json!([
            eurc_burn.log(20, B256::repeat_byte(0x02), 0),
            usdc_burn.log(21, B256::repeat_byte(0x01), 0)
        ]);
        let mock = Arc::new(with_enrichment(
            MockTransport::new().with("eth_getLogs", move |_| Reply::Result(logs.clone())),
            MESSENGER,
        ));
        let adapter = adapter(&mock, "ethereum", 0).with_usdc(Some(USDC));
        let cancel = CancellationToken::new();

        let items: Vec<_> = adapter
            .burn_events(BlockRange::new(0, 99), &cancel)
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        match &items[0] {
            Ok(ScanItem::Skipped(skipped)) => {
                assert!(matches!(
                    skipped.reason,
                    AdapterError::UnexpectedToken(ChainAddress::Evm(token)) if token == EURC
                ));
                assert_eq!(skipped.block_ref, Some(20));
            }
            other => panic!("expected skip, got {:?}", other),
        }
        assert!(matches!(&items[1], Ok(ScanItem::Burn(burn)) if burn.nonce == Nonce::Known(1)));
        // The skipped burn is rejected before any enrichment.
        assert_eq!(mock.calls_to("eth_getTransactionReceipt"), 1);
    }

    #[tokio::test]
    async fn test_fetch_mint_filters_by_source_domain() {
        let body = burn_body(USDC, RECIPIENT, U256::from(2_500_000u64));
        let wrong_source = MintLogFixture {
            transmitter: TRANSMITTER,
            caller: RELAYER,
            nonce: 42,
            source_domain: 3,
            sender: B256::from(address_word(MESSENGER)),
            message_body: body.clone(),
        };
        let right_source = MintLogFixture {
            source_domain: 0,
            ..wrong_source.clone()
        };
        let logs = json!([
            wrong_source.log(500, B256::repeat_byte(0x0a), 4),
            right_source.log(510, B256::repeat_byte(0x0b), 1)
        ]);
        let mock = Arc::new(with_enrichment(
            MockTransport::new().with("eth_getLogs", move |_| Reply::Result(logs.clone())),
            TRANSMITTER,
        ));
        let adapter = adapter(&mock, "base", 6);
        let key = CorrelationKey {
            nonce: 42,
            source_domain: DomainId(0),
            destination_domain: DomainId(6),
        };

        let mint = adapter
            .fetch_mint_event(&key, BlockRange::new(500, 599), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(mint.block_ref, 510);
        assert_eq!(mint.nonce, Nonce::Known(42));
        assert_eq!(mint.source_domain, Some(DomainId(0)));
        assert_eq!(mint.caller, ChainAddress::Evm(RELAYER));
        assert_eq!(mint.sender, Some(ChainAddress::Evm(MESSENGER)));
        assert_eq!(mint.recipient, Some(ChainAddress::Evm(RECIPIENT)));
        assert_eq!(mint.amount, Some(U256::from(2_500_000u64)));
        assert_eq!(mint.timestamp, Some(0x65000000));
        assert_eq!(mint.origin, Some(ChainAddress::Evm(DEPOSITOR)));
        let shape = mint.tx_shape.as_ref().unwrap();
        assert!(shape.is_direct);
        assert_eq!(shape.target_position, 2);

        let params = mock.params_of("eth_getLogs");
        assert_eq!(
            params[0][0]["topics"][2],
            json!(B256::from(U256::from(42u64)))
        );
        assert_eq!(parse_quantity(&params[0][0]["toBlock"]), 599);
    }

    #[tokio::test]
    async fn test_fetch_mint_decodes_body_from_non_evm_source() {
        // Solana burn: the token word is a full 32-byte mint key.
        let mut body = 0u32.to_be_bytes().to_vec();
        body.extend_from_slice(&[0xc6; 32]);
        body.extend_from_slice(&address_word(RECIPIENT));
        body.extend_from_slice(&U256::from(1_000_000u64).to_be_bytes::<32>());
        body.extend_from_slice(&[0x9a; 32]);
        let mint_log = MintLogFixture {
            transmitter: TRANSMITTER,
            caller: RELAYER,
            nonce: 7,
            source_domain: 5,
            sender: B256::repeat_byte(0xa5),
            message_body: body,
        }
        .log(800, B256::repeat_byte(0x0c), 0);
        let mock = Arc::new(with_enrichment(
            MockTransport::new().with("eth_getLogs", move |_| Reply::Result(json!([mint_log.clone()]))),
            TRANSMITTER,
        ));
        let adapter = adapter(&mock, "base", 6);
        let key = CorrelationKey {
            nonce: 7,
            source_domain: DomainId(5),
            destination_domain: DomainId(6),
        };

        let mint = adapter
            .fetch_mint_event(&key, BlockRange::new(700, 899), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(mint.recipient, Some(ChainAddress::Evm(RECIPIENT)));
        assert_eq!(mint.amount, Some(U256::from(1_000_000u64)));
        assert_eq!(mint.sender, Some(ChainAddress::Solana([0xa5; 32])));
    }

    #[tokio::test]
    async fn test_fetch_mint_none_when_absent() {
        let mock = Arc::new(MockTransport::new().with("eth_getLogs", |_| Reply::Result(json!([]))));
        let adapter = adapter(&mock, "base", 6);
        let key = CorrelationKey {
            nonce: 1,
            source_domain: DomainId(0),
            destination_domain: DomainId(6),
        };
        let found = adapter
            .fetch_mint_event(&key, BlockRange::new(0, 10), &CancellationToken::new())
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
