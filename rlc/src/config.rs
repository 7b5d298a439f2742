//! RLC Layer Configuration

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// RLC operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RlcMode {
    /// Transparent Mode
    Tm,
    /// Unacknowledged Mode
    Um,
    /// Acknowledged Mode
    Am,
}

/// SN field length in bits for UM bearers
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum SnFieldLength {
    /// 5-bit sequence numbers
    Bits5 = 5,
    /// 10-bit sequence numbers
    Bits10 = 10,
}

impl SnFieldLength {
    /// Field width in bits
    pub fn bits(&self) -> u8 {
        *self as u8
    }

    /// Sequence number space, i.e. the wraparound modulus
    pub fn cardinality(&self) -> u32 {
        1u32 << self.bits()
    }
}

impl TryFrom<u8> for SnFieldLength {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        <Self as num_traits::FromPrimitive>::from_u8(value)
            .ok_or_else(|| format!("invalid UM SN field length: {} bits", value))
    }
}

impl From<SnFieldLength> for u8 {
    fn from(value: SnFieldLength) -> Self {
        value.bits()
    }
}

/// Configuration of a UM transmitting entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlcTxUmConfig {
    /// SN field length in bits
    pub sn_field_length: SnFieldLength,
    /// SDU queue capacity in number of SDUs
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Enable metrics collection
    #[serde(default)]
    pub metrics_enabled: bool,
}

fn default_queue_capacity() -> usize {
    4096
}

impl Default for RlcTxUmConfig {
    fn default() -> Self {
        Self {
            sn_field_length: SnFieldLength::Bits10,
            queue_capacity: default_queue_capacity(),
            metrics_enabled: false,
        }
    }
}
