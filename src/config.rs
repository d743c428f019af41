use crate::application::ledger::MintSupply;
use crate::application::ordering::ConflictRule;
use crate::domain::ports::{PeerId, Tick};
use crate::error::{LedgerError, Result};
use crate::infrastructure::simulated::NetworkConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Authority,
    Latency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub kind: PolicyKind,
    /// Node index acting as authority under `PolicyKind::Authority`.
    pub authority: PeerId,
    /// Finality delay under `PolicyKind::Latency`.
    pub delta: Tick,
    pub conflict_rule: ConflictRule,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::Authority,
            authority: 0,
            delta: 5,
            conflict_rule: ConflictRule::FirstSeen,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Node index allowed to mint, if any.
    pub minter: Option<PeerId>,
    pub mint_supply: MintSupply,
}

/// Everything needed to build a simulation.
///
/// Every section is optional in the JSON form; missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub nodes: usize,
    /// Balance every node's address starts with.
    pub genesis_balance: u64,
    pub seed: u64,
    /// Upper bound on ticks spent waiting for the network to drain.
    pub max_steps: Tick,
    pub network: NetworkConfig,
    pub policy: PolicyConfig,
    pub ledger: LedgerSettings,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: 5,
            genesis_balance: 100,
            seed: 42,
            max_steps: 500,
            network: NetworkConfig::default(),
            policy: PolicyConfig::default(),
            ledger: LedgerSettings::default(),
        }
    }
}

impl SimulationConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            return Err(LedgerError::ConfigError(
                "at least one node is required".to_string(),
            ));
        }
        if self.policy.kind == PolicyKind::Authority && self.policy.authority >= self.nodes {
            return Err(LedgerError::ConfigError(format!(
                "authority index {} out of range for {} nodes",
                self.policy.authority, self.nodes
            )));
        }
        if let Some(minter) = self.ledger.minter
            && minter >= self.nodes
        {
            return Err(LedgerError::ConfigError(format!(
                "minter index {minter} out of range for {} nodes",
                self.nodes
            )));
        }
        if !(0.0..=1.0).contains(&self.network.packet_loss_rate) {
            return Err(LedgerError::ConfigError(format!(
                "packet loss rate {} outside 0.0..=1.0",
                self.network.packet_loss_rate
            )));
        }
        Ok(())
    }
}
