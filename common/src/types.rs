//! Common Types for the RLC Subsystem
//!
//! Defines bearer and user identifiers used throughout the protocol stack

use serde::{Deserialize, Serialize};
use std::fmt;

/// UE index within the DU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UeIndex(pub u16);

impl UeIndex {
    /// Maximum valid UE index (DU-wide table size minus one)
    pub const MAX: u16 = 1023;

    /// Create a new UE index with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Get the UE index value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for UeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ue={}", self.0)
    }
}

/// Radio bearer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RbId {
    /// Signalling radio bearer
    Srb(u8),
    /// Data radio bearer
    Drb(u8),
}

impl RbId {
    /// Highest DRB identity allowed by RRC
    pub const MAX_DRB: u8 = 32;

    /// True for signalling radio bearers
    pub fn is_srb(&self) -> bool {
        matches!(self, RbId::Srb(_))
    }
}

impl fmt::Display for RbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RbId::Srb(id) => write!(f, "SRB{}", id),
            RbId::Drb(id) => write!(f, "DRB{}", id),
        }
    }
}
