//! RLC Unacknowledged Mode (UM)
//!
//! Transmit-side UM entity and the UM data PDU wire format
//! according to 3GPP TS 38.322

pub mod pdu;
pub mod tx;

pub use pdu::{RlcUmPduHeader, SegmentationInfo};
pub use tx::{RlcTxUmEntity, RlcUmPdu};
