use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::domain::DomainRegistry;
use crate::types::config::chain::ChainConfig;
use crate::types::config::rpc::RpcConfig;

fn default_max_in_flight() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Chains whose burns are scanned.
    pub sources: Vec<String>,
    /// Positions before the source head to scan.
    pub range: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_chunks: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub rpc: RpcConfig,
    pub scan: ScanConfig,
}

impl TrackerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: TrackerConfig = serde_json::from_str(content)?;
        config.validate(DomainRegistry::global())?;
        Ok(config)
    }

    /// Every chain must be in the registry, once, and every source configured.
    pub fn validate(&self, registry: &DomainRegistry) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for chain in &self.chains {
            chain
                .descriptor(registry)
                .with_context(|| format!("Chain '{}' has no protocol domain", chain.name))?;
            anyhow::ensure!(
                seen.insert(chain.name.to_ascii_lowercase()),
                "Chain '{}' is configured twice",
                chain.name
            );
        }
        for source in &self.scan.sources {
            anyhow::ensure!(
                seen.contains(&source.to_ascii_lowercase()),
                "Scan source '{}' is not a configured chain",
                source
            );
        }
        anyhow::ensure!(
            self.scan.max_in_flight_chunks > 0,
            "max_in_flight_chunks must be at least 1"
        );
        Ok(())
    }

    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}
