//! Radio Link Control (RLC) Layer Implementation
//!
//! Implements the transmit side of the 5G NR RLC layer according to
//! 3GPP TS 38.322, currently covering the Unacknowledged Mode (UM) entity.

pub mod config;
pub mod executor;
pub mod metrics;
pub mod sdu_queue;
pub mod um;

use thiserror::Error;

/// Common errors for the RLC layer
#[derive(Error, Debug)]
pub enum RlcError {
    #[error("Invalid protocol data unit: {0}")]
    InvalidPdu(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Upper-layer data notification surface of a transmitting entity.
///
/// Calls are dispatched on the bearer's task executor, never on the
/// thread that pulled the PDU, so implementations may safely call back
/// into the entity.
pub trait RlcTxUpperLayerDataNotifier: Send + Sync {
    /// Called once per SDU when its first byte is pulled for transmission
    fn on_transmitted_sdu(&self, pdcp_count: u32);
}

/// Lower-layer notification surface for buffer status reporting.
///
/// Invoked synchronously while the entity's state lock is held.
/// Implementations must be non-blocking and must not call back into
/// the entity.
pub trait RlcTxLowerLayerNotifier: Send + Sync {
    /// Reports the minimum number of bytes needed to drain the entity
    fn on_buffer_state_update(&self, pending_bytes: usize);
}
