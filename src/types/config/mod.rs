pub mod chain;
pub mod rpc;
pub mod tracker;

pub use chain::{ChainConfig, ChainDescriptor, SearchWindow};
pub use rpc::{RetryPolicyConfig, RpcConfig};
pub use tracker::{ScanConfig, TrackerConfig};
