//! Fixed-layout decoding of protocol payloads.
//!
//! Every numeric or address field on the wire is a 32-byte big-endian word.
//! Addresses are right-aligned, so the EVM address is always the low 20 bytes
//! of its word regardless of what the high 12 bytes contain.

use alloy::primitives::{Address, B256, U256};

use super::error::DecodeError;

pub const WORD_SIZE: usize = 32;
pub const ADDRESS_SIZE: usize = 20;
const ADDRESS_PADDING: usize = WORD_SIZE - ADDRESS_SIZE;

/// Burn message body version this decoder knows the fixed layout of.
pub const BURN_MESSAGE_VERSION: u32 = 0;
/// Burn message body: version (4) | burn token (32) | mint recipient (32) | amount (32) | sender (32).
pub const BURN_MESSAGE_TOKEN_OFFSET: usize = 4;
const BURN_MESSAGE_LEN: usize = BURN_MESSAGE_TOKEN_OFFSET + 4 * WORD_SIZE;
const BODY_FIELDS_LEN: usize = 3 * WORD_SIZE;

/// Message header: version (4) | source domain (4) | destination domain (4) | nonce (8)
/// | sender (32) | recipient (32) | destination caller (32).
pub const MESSAGE_VERSION: u32 = 0;
pub const MESSAGE_HEADER_LEN: usize = 116;

/// Raw bytes or hex text holding (at least) one right-aligned address.
#[derive(Debug, Clone, Copy)]
pub enum WordInput<'a> {
    Bytes(&'a [u8]),
    Hex(&'a str),
}

impl<'a> From<&'a [u8]> for WordInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for WordInput<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Self::Bytes(bytes.as_slice())
    }
}

impl<'a> From<&'a Vec<u8>> for WordInput<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Self::Bytes(bytes.as_slice())
    }
}

impl<'a> From<&'a B256> for WordInput<'a> {
    fn from(word: &'a B256) -> Self {
        Self::Bytes(word.as_slice())
    }
}

impl<'a> From<&'a str> for WordInput<'a> {
    fn from(text: &'a str) -> Self {
        Self::Hex(text)
    }
}

impl<'a> From<&'a String> for WordInput<'a> {
    fn from(text: &'a String) -> Self {
        Self::Hex(text.as_str())
    }
}

/// Big-endian unsigned integer of any width. Leading zero bytes are ignored,
/// so a 64-byte input is fine as long as the value fits in 256 bits.
pub fn decode_uint(bytes: &[u8]) -> Result<U256, DecodeError> {
    let first_significant = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first_significant..];
    if significant.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::try_from_be_slice(significant).ok_or(DecodeError::Overflow {
        len: significant.len(),
        bits: 256,
    })
}

pub fn decode_u64(bytes: &[u8]) -> Result<u64, DecodeError> {
    let value = decode_uint(bytes)?;
    u64::try_from(value).map_err(|_| DecodeError::Overflow {
        len: bytes.len(),
        bits: 64,
    })
}

pub fn decode_u32(bytes: &[u8]) -> Result<u32, DecodeError> {
    let value = decode_u64(bytes)?;
    u32::try_from(value).map_err(|_| DecodeError::Overflow {
        len: bytes.len(),
        bits: 32,
    })
}

/// Last 20 bytes of the input as an EVM address.
pub fn decode_address<'a>(input: impl Into<WordInput<'a>>) -> Result<Address, DecodeError> {
    match input.into() {
        WordInput::Bytes(bytes) => {
            if bytes.len() < ADDRESS_SIZE {
                return Err(DecodeError::TooShort {
                    needed: ADDRESS_SIZE,
                    actual: bytes.len(),
                });
            }
            Ok(Address::from_slice(&bytes[bytes.len() - ADDRESS_SIZE..]))
        }
        WordInput::Hex(text) => {
            let text = text.trim();
            let digits = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .unwrap_or(text);
            if !digits.is_ascii() {
                return Err(DecodeError::InvalidHex(text.to_string()));
            }
            if digits.len() < ADDRESS_SIZE * 2 {
                return Err(DecodeError::TooShort {
                    needed: ADDRESS_SIZE,
                    actual: digits.len() / 2,
                });
            }
            let tail = &digits[digits.len() - ADDRESS_SIZE * 2..];
            let bytes =
                hex::decode(tail).map_err(|e| DecodeError::InvalidHex(format!("{}: {}", text, e)))?;
            Ok(Address::from_slice(&bytes))
        }
    }
}

/// The `index`-th 32-byte word of an ABI data section.
pub fn word(data: &[u8], index: usize) -> Result<B256, DecodeError> {
    let start = index * WORD_SIZE;
    let end = start + WORD_SIZE;
    if data.len() < end {
        return Err(DecodeError::TooShort {
            needed: end,
            actual: data.len(),
        });
    }
    Ok(B256::from_slice(&data[start..end]))
}

/// How the body fields were located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLayout {
    /// Bare burn message body of the known version.
    Versioned,
    /// Burn message body inside a full message of the known version.
    Enveloped,
    /// First zero-padded address anchor found by scanning, at this offset.
    Scanned { anchor: usize },
}

/// Token, recipient and amount carried by a burn message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBody {
    pub token: Address,
    pub recipient: Address,
    /// Recipient as the full word, for destinations with 32-byte addresses.
    pub recipient_word: B256,
    pub amount: U256,
    pub layout: BodyLayout,
}

fn is_padded_address_word(word: &[u8]) -> bool {
    word.len() >= WORD_SIZE && word[..ADDRESS_PADDING].iter().all(|b| *b == 0)
}

fn read_version(bytes: &[u8], at: usize) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(raw))
}

fn fields_at(bytes: &[u8], at: usize, layout: BodyLayout) -> Result<MessageBody, DecodeError> {
    let fields = bytes.get(at..at + BODY_FIELDS_LEN).ok_or(DecodeError::TooShort {
        needed: at + BODY_FIELDS_LEN,
        actual: bytes.len(),
    })?;
    let recipient_word = word(fields, 1)?;
    Ok(MessageBody {
        token: decode_address(&fields[..WORD_SIZE])?,
        recipient: decode_address(&recipient_word)?,
        recipient_word,
        amount: decode_uint(&fields[2 * WORD_SIZE..])?,
        layout,
    })
}

/// A complete versioned burn message at `at`. The burn token word is not
/// checked: it is the source chain's token and may be a 32-byte address.
fn versioned_body_at(bytes: &[u8], at: usize) -> bool {
    let recipient = at + BURN_MESSAGE_TOKEN_OFFSET + WORD_SIZE;
    bytes.len() >= at + BURN_MESSAGE_LEN
        && read_version(bytes, at) == Some(BURN_MESSAGE_VERSION)
        && is_padded_address_word(&bytes[recipient..])
}

fn find_anchor(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < BODY_FIELDS_LEN {
        return None;
    }
    (0..=bytes.len() - BODY_FIELDS_LEN).find(|&i| {
        bytes[i..i + ADDRESS_PADDING].iter().all(|b| *b == 0)
            && bytes[i + ADDRESS_PADDING] != 0
            && is_padded_address_word(&bytes[i + WORD_SIZE..])
    })
}

/// Decode token, recipient and amount from a burn message body, a full
/// message, or another envelope that ends with the body fields.
///
/// The known versioned layouts are tried first. Otherwise the first run of 12
/// zero bytes directly followed by address bytes, with a zero-padded recipient
/// word after it, is taken as the token word. No anchor is an error.
pub fn decode_message_body(bytes: &[u8]) -> Result<MessageBody, DecodeError> {
    if versioned_body_at(bytes, 0) {
        return fields_at(bytes, BURN_MESSAGE_TOKEN_OFFSET, BodyLayout::Versioned);
    }
    if read_version(bytes, 0) == Some(MESSAGE_VERSION)
        && versioned_body_at(bytes, MESSAGE_HEADER_LEN)
    {
        return fields_at(
            bytes,
            MESSAGE_HEADER_LEN + BURN_MESSAGE_TOKEN_OFFSET,
            BodyLayout::Enveloped,
        );
    }
    let anchor = find_anchor(bytes).ok_or(DecodeError::AnchorNotFound)?;
    fields_at(bytes, anchor, BodyLayout::Scanned { anchor })
}

/// A full protocol message: header plus opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CctpMessage {
    pub version: u32,
    pub source_domain: u32,
    pub destination_domain: u32,
    pub nonce: u64,
    pub sender: B256,
    pub recipient: B256,
    pub destination_caller: B256,
    pub body: Vec<u8>,
}

pub fn decode_cctp_message(bytes: &[u8]) -> Result<CctpMessage, DecodeError> {
    if bytes.len() < MESSAGE_HEADER_LEN {
        return Err(DecodeError::TooShort {
            needed: MESSAGE_HEADER_LEN,
            actual: bytes.len(),
        });
    }
    Ok(CctpMessage {
        version: decode_u32(&bytes[0..4])?,
        source_domain: decode_u32(&bytes[4..8])?,
        destination_domain: decode_u32(&bytes[8..12])?,
        nonce: decode_u64(&bytes[12..20])?,
        sender: B256::from_slice(&bytes[20..52]),
        recipient: B256::from_slice(&bytes[52..84]),
        destination_caller: B256::from_slice(&bytes[84..116]),
        body: bytes[MESSAGE_HEADER_LEN..].to_vec(),
    })
}

#[cfg(test)]
pub(crate) fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[ADDRESS_PADDING..].copy_from_slice(address.as_slice());
    word
}

#[cfg(test)]
pub(crate) fn burn_body(token: Address, recipient: Address, amount: U256) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + 4 * WORD_SIZE);
    body.extend_from_slice(&BURN_MESSAGE_VERSION.to_be_bytes());
    body.extend_from_slice(&address_word(token));
    body.extend_from_slice(&address_word(recipient));
    body.extend_from_slice(&amount.to_be_bytes::<32>());
    body.extend_from_slice(&address_word(Address::repeat_byte(0x77)));
    body
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    const USDC: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    const RECIPIENT: Address = address!("742d35cc6634c0532925a3b844bc9e7595f8fa0d");

    #[test]
    fn test_decode_uint_zero_and_one() {
        assert_eq!(decode_uint(&[0u8; 32]).unwrap(), U256::ZERO);
        let mut one = [0u8; 32];
        one[31] = 1;
        assert_eq!(decode_uint(&one).unwrap(), U256::from(1u64));
        assert_eq!(decode_uint(&[]).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_decode_uint_round_trips_with_encoder() {
        for value in [U256::from(42u64), U256::from(1_000_000u64), U256::MAX] {
            assert_eq!(decode_uint(&value.to_be_bytes::<32>()).unwrap(), value);
        }
    }

    #[test]
    fn test_decode_uint_any_width() {
        assert_eq!(decode_uint(&[0x01, 0x00]).unwrap(), U256::from(256u64));
        let mut wide = vec![0u8; 64];
        wide[63] = 7;
        assert_eq!(decode_uint(&wide).unwrap(), U256::from(7u64));
        let too_wide = vec![0xffu8; 33];
        assert!(matches!(
            decode_uint(&too_wide),
            Err(DecodeError::Overflow { len: 33, .. })
        ));
    }

    #[test]
    fn test_decode_u32_rejects_wide_values() {
        assert_eq!(decode_u32(&U256::from(6u64).to_be_bytes::<32>()).unwrap(), 6);
        assert!(decode_u32(&U256::from(u64::MAX).to_be_bytes::<32>()).is_err());
    }

    #[test]
    fn test_decode_address_ignores_high_bytes() {
        for high in [0x00u8, 0x01, 0xab, 0xff] {
            let mut word = address_word(USDC);
            word[..12].fill(high);
            assert_eq!(decode_address(&word).unwrap(), USDC);
        }
    }

    #[test]
    fn test_decode_address_from_hex() {
        let padded = format!("0x000000000000000000000000{}", hex::encode(USDC));
        assert_eq!(decode_address(padded.as_str()).unwrap(), USDC);
        assert_eq!(
            decode_address("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap(),
            USDC
        );
        assert_eq!(
            decode_address(padded.as_str()).unwrap().to_checksum(None),
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
        );
    }

    #[test]
    fn test_decode_address_errors() {
        assert!(matches!(
            decode_address(&[0u8; 19]),
            Err(DecodeError::TooShort { needed: 20, actual: 19 })
        ));
        assert!(matches!(
            decode_address("0x1234"),
            Err(DecodeError::TooShort { .. })
        ));
        let bad = format!("0x{}", "zz".repeat(20));
        assert!(matches!(
            decode_address(bad.as_str()),
            Err(DecodeError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_decode_message_body_versioned() {
        let body = burn_body(USDC, RECIPIENT, U256::from(1_500_000u64));
        let decoded = decode_message_body(&body).unwrap();
        assert_eq!(decoded.token, USDC);
        assert_eq!(decoded.recipient, RECIPIENT);
        assert_eq!(decoded.amount, U256::from(1_500_000u64));
        assert_eq!(decoded.layout, BodyLayout::Versioned);
    }

    #[test]
    fn test_decode_message_body_with_non_evm_burn_token() {
        // Solana or Sui source: the burn token is a full 32-byte key.
        let mut body = Vec::new();
        body.extend_from_slice(&BURN_MESSAGE_VERSION.to_be_bytes());
        body.extend_from_slice(&[0xc6; 32]);
        body.extend_from_slice(&address_word(RECIPIENT));
        body.extend_from_slice(&U256::from(1_000_000u64).to_be_bytes::<32>());
        body.extend_from_slice(&[0x9a; 32]);

        let decoded = decode_message_body(&body).unwrap();
        assert_eq!(decoded.layout, BodyLayout::Versioned);
        assert_eq!(decoded.recipient, RECIPIENT);
        assert_eq!(decoded.amount, U256::from(1_000_000u64));
        assert_eq!(decoded.token, Address::repeat_byte(0xc6));
    }

    #[test]
    fn test_decode_message_body_inside_full_message() {
        let mut message = Vec::new();
        message.extend_from_slice(&MESSAGE_VERSION.to_be_bytes());
        message.extend_from_slice(&0u32.to_be_bytes());
        message.extend_from_slice(&6u32.to_be_bytes());
        message.extend_from_slice(&42u64.to_be_bytes());
        message.extend_from_slice(&[0x11; 96]);
        message.extend_from_slice(&burn_body(USDC, RECIPIENT, U256::from(5u64)));

        let decoded = decode_message_body(&message).unwrap();
        assert_eq!(decoded.layout, BodyLayout::Enveloped);
        assert_eq!(decoded.token, USDC);
        assert_eq!(decoded.recipient, RECIPIENT);
        assert_eq!(decoded.amount, U256::from(5u64));

        let header = decode_cctp_message(&message).unwrap();
        assert_eq!(header.nonce, 42);
        assert_eq!(header.destination_domain, 6);
        assert_eq!(header.body.len(), 4 + 4 * WORD_SIZE);
    }

    #[test]
    fn test_decode_message_body_scans_for_anchor() {
        // Unknown envelope: seven non-zero bytes before the fields.
        let mut bytes = vec![0x5a; 7];
        bytes.extend_from_slice(&address_word(USDC));
        bytes.extend_from_slice(&address_word(RECIPIENT));
        bytes.extend_from_slice(&U256::from(99u64).to_be_bytes::<32>());

        let decoded = decode_message_body(&bytes).unwrap();
        assert_eq!(decoded.layout, BodyLayout::Scanned { anchor: 7 });
        assert_eq!(decoded.token, USDC);
        assert_eq!(decoded.recipient, RECIPIENT);
        assert_eq!(decoded.amount, U256::from(99u64));
    }

    #[test]
    fn test_decode_message_body_without_anchor() {
        assert_eq!(
            decode_message_body(&[0xff; 200]),
            Err(DecodeError::AnchorNotFound)
        );
        assert_eq!(decode_message_body(&[]), Err(DecodeError::AnchorNotFound));
    }
}
