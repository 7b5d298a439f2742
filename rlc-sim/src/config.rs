//! YAML Configuration Structures for the RLC Bearer Simulator

use rlc::config::RlcTxUmConfig;
use serde::{Deserialize, Serialize};

/// Main simulator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    /// UM bearer configuration
    #[serde(default = "default_rlc_config")]
    pub rlc: RlcTxUmConfig,
    /// Upper-layer traffic model
    #[serde(default)]
    pub traffic: TrafficConfig,
    /// MAC grant model
    #[serde(default)]
    pub grants: GrantConfig,
}

fn default_rlc_config() -> RlcTxUmConfig {
    RlcTxUmConfig {
        metrics_enabled: true,
        ..RlcTxUmConfig::default()
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rlc: default_rlc_config(),
            traffic: TrafficConfig::default(),
            grants: GrantConfig::default(),
        }
    }
}

/// Upper-layer traffic generation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficConfig {
    /// Number of SDUs to generate
    #[serde(default = "default_num_sdus")]
    pub num_sdus: u32,
    /// SDU size in bytes
    #[serde(default = "default_sdu_size")]
    pub sdu_size: usize,
    /// Gap between SDUs in microseconds
    #[serde(default = "default_sdu_gap_us")]
    pub sdu_gap_us: u64,
}

fn default_num_sdus() -> u32 {
    1000
}

fn default_sdu_size() -> usize {
    1500
}

fn default_sdu_gap_us() -> u64 {
    100
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            num_sdus: default_num_sdus(),
            sdu_size: default_sdu_size(),
            sdu_gap_us: default_sdu_gap_us(),
        }
    }
}

/// MAC transmission opportunities
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GrantConfig {
    /// Grant size in bytes per opportunity
    #[serde(default = "default_grant_size")]
    pub grant_size: usize,
    /// Opportunity period in microseconds
    #[serde(default = "default_grant_period_us")]
    pub grant_period_us: u64,
}

fn default_grant_size() -> usize {
    600
}

fn default_grant_period_us() -> u64 {
    50
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            grant_size: default_grant_size(),
            grant_period_us: default_grant_period_us(),
        }
    }
}

impl SimConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
