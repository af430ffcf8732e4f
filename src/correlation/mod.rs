//! Pairing source-chain burns with destination-chain mints.

pub mod assembler;
pub mod correlator;

pub use assembler::assemble;
pub use correlator::{deadline_token, CorrelateError, Correlator, MintLookup, UnmatchedReason};
