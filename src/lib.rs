pub mod chains;
pub mod correlation;
pub mod decoding;
pub mod domain;
pub mod pipeline;
pub mod rpc;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
