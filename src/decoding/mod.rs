mod error;
pub mod wire;

pub use error::DecodeError;
pub use wire::{
    decode_address, decode_cctp_message, decode_message_body, decode_u32, decode_u64,
    decode_uint, CctpMessage, MessageBody, WordInput,
};
