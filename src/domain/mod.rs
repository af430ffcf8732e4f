//! Protocol domain identifiers and the domain-to-chain registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol-wide identifier of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(pub u32);

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DomainId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No domain registered for chain '{0}'")]
    NotFound(String),

    #[error("Domain {id} already maps to '{existing}', cannot register '{requested}'")]
    Conflict {
        id: DomainId,
        existing: String,
        requested: String,
    },

    #[error("Chain '{name}' already has domain {existing}, cannot register {requested}")]
    NameTaken {
        name: String,
        existing: DomainId,
        requested: DomainId,
    },
}

/// Result of resolving a domain id. Unknown ids are a value, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainLookup<'a> {
    Known(&'a str),
    Unknown(DomainId),
}

impl ChainLookup<'_> {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Known(name) => Some(name),
            Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for ChainLookup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(name) => f.write_str(name),
            Self::Unknown(id) => write!(f, "unknown({})", id),
        }
    }
}

const STANDARD_DOMAINS: &[(u32, &str)] = &[
    (0, "ethereum"),
    (1, "avalanche"),
    (2, "optimism"),
    (3, "arbitrum"),
    (4, "noble"),
    (5, "solana"),
    (6, "base"),
    (7, "polygon"),
    (8, "sui"),
    (9, "aptos"),
    (10, "unichain"),
    (11, "linea"),
];

/// Bidirectional mapping between domain ids and lower-case chain names.
#[derive(Debug, Clone, Default)]
pub struct DomainRegistry {
    by_id: BTreeMap<DomainId, String>,
}

impl DomainRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The protocol's published domain table.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for (id, name) in STANDARD_DOMAINS {
            registry.by_id.insert(DomainId(*id), (*name).to_string());
        }
        registry
    }

    /// Process-wide standard registry, built on first use and read-only after.
    pub fn global() -> &'static DomainRegistry {
        static REGISTRY: OnceLock<DomainRegistry> = OnceLock::new();
        REGISTRY.get_or_init(DomainRegistry::standard)
    }

    /// Add a mapping. Re-registering the same pair is a no-op.
    pub fn register(&mut self, id: DomainId, name: &str) -> Result<(), RegistryError> {
        let name = name.to_ascii_lowercase();
        if let Some(existing) = self.by_id.get(&id) {
            if *existing == name {
                return Ok(());
            }
            return Err(RegistryError::Conflict {
                id,
                existing: existing.clone(),
                requested: name,
            });
        }
        if let Ok(other) = self.domain_of(&name) {
            return Err(RegistryError::NameTaken {
                name,
                existing: other,
                requested: id,
            });
        }
        self.by_id.insert(id, name);
        Ok(())
    }

    pub fn chain_of(&self, id: DomainId) -> ChainLookup<'_> {
        match self.by_id.get(&id) {
            Some(name) => ChainLookup::Known(name),
            None => ChainLookup::Unknown(id),
        }
    }

    pub fn domain_of(&self, chain: &str) -> Result<DomainId, RegistryError> {
        self.by_id
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(chain))
            .map(|(id, _)| *id)
            .ok_or_else(|| RegistryError::NotFound(chain.to_string()))
    }

    pub fn chains(&self) -> impl Iterator<Item = (DomainId, &str)> {
        self.by_id.iter().map(|(id, name)| (*id, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
