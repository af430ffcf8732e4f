mod client;
mod error;
mod retry;
mod transport;

pub use client::{RateLimitConfig, RetryingRpcClient, StandardRateLimiter};
pub use error::RpcError;
pub use retry::{jitter_sample, RetryPolicy, RATE_LIMIT_MULTIPLIER};
pub use transport::{
    HttpTransport, JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse, RawResponse, Transport,
    TransportError,
};
