//! Scripted transport and chain fixtures for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bloom, Bytes, LogData, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::chains::evm::{DepositForBurn, MessageReceived};
use crate::rpc::{
    JsonRpcRequest, RawResponse, RetryPolicy, RetryingRpcClient, Transport, TransportError,
};

#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    Error { code: i64, message: String },
    Status(u16),
    Disconnect,
}

impl Reply {
    fn into_response(self, id: u64) -> Result<RawResponse, TransportError> {
        match self {
            Reply::Result(result) => Ok(RawResponse::ok(
                json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string(),
            )),
            Reply::Error { code, message } => Ok(RawResponse::ok(
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
                    .to_string(),
            )),
            Reply::Status(status) => Ok(RawResponse {
                status,
                body: "upstream unavailable".to_string(),
            }),
            Reply::Disconnect => Err(TransportError("connection reset by peer".to_string())),
        }
    }
}

type Handler = Box<dyn Fn(&Value) -> Reply + Send + Sync>;

/// Transport answering from per-method handlers and recording every request.
#[derive(Default)]
pub struct MockTransport {
    handlers: HashMap<String, Handler>,
    requests: Mutex<Vec<JsonRpcRequest>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        method: &str,
        handler: impl Fn(&Value) -> Reply + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(method.to_string(), Box::new(handler));
        self
    }

    /// Replies in order; the last one repeats.
    pub fn with_sequence(self, method: &str, replies: Vec<Reply>) -> Self {
        let next = AtomicUsize::new(0);
        self.with(method, move |_| {
            let index = next.fetch_add(1, Ordering::SeqCst);
            replies
                .get(index)
                .or_else(|| replies.last())
                .cloned()
                .unwrap_or(Reply::Disconnect)
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    pub fn params_of(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .map(|r| r.params.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &JsonRpcRequest) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = match self.handlers.get(&request.method) {
            Some(handler) => handler(&request.params),
            None => Reply::Error {
                code: -32601,
                message: format!("method {} not found", request.method),
            },
        };
        reply.into_response(request.id)
    }
}

/// Client with no throttle and millisecond backoff.
pub fn fast_client(mock: &Arc<MockTransport>) -> RetryingRpcClient {
    let policy = RetryPolicy::new(3).with_base_delay(Duration::from_millis(1));
    RetryingRpcClient::new(mock.clone(), policy).with_throttle(Duration::ZERO)
}

pub fn hex_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

/// `0x` followed by the hex of an `eth_getLogs` range bound.
pub fn parse_quantity(value: &Value) -> u64 {
    let text = value.as_str().unwrap().trim_start_matches("0x");
    u64::from_str_radix(text, 16).unwrap()
}

/// JSON log object as returned by `eth_getLogs`.
pub fn evm_log(
    address: Address,
    topics: &[B256],
    data: &[u8],
    block: u64,
    tx_hash: B256,
    log_index: u64,
) -> Value {
    json!({
        "address": address,
        "topics": topics,
        "data": format!("0x{}", hex::encode(data)),
        "blockHash": B256::repeat_byte(0xbb),
        "blockNumber": hex_quantity(block),
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "logIndex": hex_quantity(log_index),
        "removed": false
    })
}

fn event_log(address: Address, data: &LogData, block: u64, tx_hash: B256, log_index: u64) -> Value {
    evm_log(address, data.topics(), &data.data, block, tx_hash, log_index)
}

/// Full `eth_getBlockByNumber` header with no transactions.
pub fn evm_block(number: u64, timestamp: u64) -> Value {
    json!({
        "hash": B256::from(U256::from(number)),
        "parentHash": B256::ZERO,
        "sha3Uncles": B256::ZERO,
        "miner": Address::ZERO,
        "stateRoot": B256::ZERO,
        "transactionsRoot": B256::ZERO,
        "receiptsRoot": B256::ZERO,
        "logsBloom": Bloom::ZERO,
        "difficulty": "0x0",
        "number": hex_quantity(number),
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x0",
        "timestamp": hex_quantity(timestamp),
        "extraData": "0x",
        "mixHash": B256::ZERO,
        "nonce": "0x0000000000000000",
        "baseFeePerGas": "0x3b9aca00",
        "uncles": [],
        "transactions": []
    })
}

/// `eth_getTransactionReceipt` of a successful EIP-1559 transaction.
pub fn evm_receipt(
    tx_hash: B256,
    block: u64,
    from: Address,
    to: Option<Address>,
    logs: Vec<Value>,
) -> Value {
    json!({
        "type": "0x2",
        "status": "0x1",
        "cumulativeGasUsed": "0x1e8480",
        "logsBloom": Bloom::ZERO,
        "logs": logs,
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "blockHash": B256::repeat_byte(0xbb),
        "blockNumber": hex_quantity(block),
        "from": from,
        "to": to,
        "gasUsed": "0x2dc6c",
        "effectiveGasPrice": "0x3b9aca00",
        "contractAddress": null
    })
}

#[derive(Debug, Clone)]
pub struct BurnLogFixture {
    pub messenger: Address,
    pub nonce: u64,
    pub burn_token: Address,
    pub depositor: Address,
    pub amount: U256,
    pub mint_recipient: B256,
    pub destination_domain: u32,
    pub destination_token_messenger: B256,
    pub destination_caller: B256,
}

impl BurnLogFixture {
    pub fn event(&self) -> DepositForBurn {
        DepositForBurn {
            nonce: self.nonce,
            burnToken: self.burn_token,
            amount: self.amount,
            depositor: self.depositor,
            mintRecipient: self.mint_recipient,
            destinationDomain: self.destination_domain,
            destinationTokenMessenger: self.destination_token_messenger,
            destinationCaller: self.destination_caller,
        }
    }

    pub fn log(&self, block: u64, tx_hash: B256, log_index: u64) -> Value {
        event_log(self.messenger, &self.event().encode_log_data(), block, tx_hash, log_index)
    }
}

#[derive(Debug, Clone)]
pub struct MintLogFixture {
    pub transmitter: Address,
    pub caller: Address,
    pub nonce: u64,
    pub source_domain: u32,
    pub sender: B256,
    pub message_body: Vec<u8>,
}

impl MintLogFixture {
    pub fn log(&self, block: u64, tx_hash: B256, log_index: u64) -> Value {
        let event = MessageReceived {
            caller: self.caller,
            sourceDomain: self.source_domain,
            nonce: self.nonce,
            sender: self.sender,
            messageBody: Bytes::from(self.message_body.clone()),
        };
        event_log(self.transmitter, &event.encode_log_data(), block, tx_hash, log_index)
    }
}
