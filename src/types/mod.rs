pub mod address;
pub mod config;
pub mod events;

pub use address::{ChainAddress, ChainFamily};
pub use events::{
    BlockRange, BurnEvent, CorrelatedTransfer, CorrelationKey, MintEvent, Nonce, TokenMetadata,
    TransferStatus, TxShape,
};
