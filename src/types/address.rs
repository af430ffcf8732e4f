use std::fmt;

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize, Serializer};

use crate::decoding::DecodeError;

/// Address and execution model of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Solana,
    Sui,
}

impl ChainFamily {
    /// Family of a chain in the standard domain table, if it is one we render natively.
    pub fn of_chain(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ethereum" | "avalanche" | "optimism" | "arbitrum" | "base" | "polygon"
            | "unichain" | "linea" => Some(Self::Evm),
            "solana" => Some(Self::Solana),
            "sui" => Some(Self::Sui),
            _ => None,
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evm => f.write_str("evm"),
            Self::Solana => f.write_str("solana"),
            Self::Sui => f.write_str("sui"),
        }
    }
}

/// An account address in the canonical textual form of its chain.
///
/// `Raw` holds a protocol word for a chain whose native rendering is not
/// supported, shown as plain hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainAddress {
    Evm(Address),
    Solana([u8; 32]),
    Sui([u8; 32]),
    Raw(B256),
}

impl ChainAddress {
    /// Interpret a 32-byte protocol word as an address of the given family.
    pub fn from_word(family: Option<ChainFamily>, word: &B256) -> Self {
        match family {
            Some(ChainFamily::Evm) => Self::Evm(Address::from_word(*word)),
            Some(ChainFamily::Solana) => Self::Solana(word.0),
            Some(ChainFamily::Sui) => Self::Sui(word.0),
            None => Self::Raw(*word),
        }
    }

    pub fn solana(text: &str) -> Result<Self, DecodeError> {
        let bytes = bs58::decode(text)
            .into_vec()
            .map_err(|e| DecodeError::malformed(format!("base58 '{}': {}", text, e)))?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| DecodeError::TooShort {
            needed: 32,
            actual: bytes.len(),
        })?;
        Ok(Self::Solana(key))
    }

    /// Sui addresses may be abbreviated (`0x2`); they are left-padded to 32 bytes.
    pub fn sui(text: &str) -> Result<Self, DecodeError> {
        let text = text.trim();
        let digits = text.strip_prefix("0x").unwrap_or(text);
        if digits.is_empty() || digits.len() > 64 {
            return Err(DecodeError::InvalidHex(text.to_string()));
        }
        let padded = format!("{:0>64}", digits);
        let bytes =
            hex::decode(&padded).map_err(|e| DecodeError::InvalidHex(format!("{}: {}", text, e)))?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self::Sui(key))
    }

    pub fn family(&self) -> Option<ChainFamily> {
        match self {
            Self::Evm(_) => Some(ChainFamily::Evm),
            Self::Solana(_) => Some(ChainFamily::Solana),
            Self::Sui(_) => Some(ChainFamily::Sui),
            Self::Raw(_) => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Self::Evm(address) => address.is_zero(),
            Self::Solana(bytes) | Self::Sui(bytes) => bytes.iter().all(|b| *b == 0),
            Self::Raw(word) => word.is_zero(),
        }
    }
}

impl From<Address> for ChainAddress {
    fn from(address: Address) -> Self {
        Self::Evm(address)
    }
}

impl fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evm(address) => f.write_str(&address.to_checksum(None)),
            Self::Solana(bytes) => f.write_str(&bs58::encode(bytes).into_string()),
            Self::Sui(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            Self::Raw(word) => write!(f, "0x{}", hex::encode(word)),
        }
    }
}

impl Serialize for ChainAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
