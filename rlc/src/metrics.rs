//! RLC TX Metrics
//!
//! Thread-safe, mode-aware counters for the transmitting side of a bearer.

use crate::config::RlcMode;
use serde::Serialize;
use std::sync::Mutex;

/// TM-specific TX counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RlcTmTxMetrics {
    /// Grants too small to fit the SDU at the head of the queue
    pub num_small_allocs: u32,
}

/// UM-specific TX counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RlcUmTxMetrics {
    /// PDUs that carried an SDU segment rather than a complete SDU
    pub num_sdu_segments: u32,
}

/// AM-specific TX counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RlcAmTxMetrics {
    /// Retransmitted PDUs
    pub num_retx_pdus: u32,
    /// Retransmitted PDU bytes
    pub num_retx_pdu_bytes: u64,
    /// Status (control) PDUs
    pub num_ctrl_pdus: u32,
    /// Status (control) PDU bytes
    pub num_ctrl_pdu_bytes: u64,
}

/// Mode-specific counter payload, tagged by the bearer's RLC mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RlcTxMetricsModeSpecific {
    Tm(RlcTmTxMetrics),
    Um(RlcUmTxMetrics),
    Am(RlcAmTxMetrics),
}

impl RlcTxMetricsModeSpecific {
    /// Zeroed payload for the given mode
    fn new(mode: RlcMode) -> Self {
        match mode {
            RlcMode::Tm => Self::Tm(RlcTmTxMetrics::default()),
            RlcMode::Um => Self::Um(RlcUmTxMetrics::default()),
            RlcMode::Am => Self::Am(RlcAmTxMetrics::default()),
        }
    }

    /// The mode tag of this payload
    pub fn mode(&self) -> RlcMode {
        match self {
            Self::Tm(_) => RlcMode::Tm,
            Self::Um(_) => RlcMode::Um,
            Self::Am(_) => RlcMode::Am,
        }
    }
}

/// Aggregated TX metrics of one RLC bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RlcTxMetrics {
    /// SDUs accepted from the upper layer
    pub num_sdus: u32,
    /// Accepted SDU bytes
    pub num_sdu_bytes: u64,
    /// SDUs dropped on enqueue
    pub num_dropped_sdus: u32,
    /// SDUs discarded on upper-layer request
    pub num_discarded_sdus: u32,
    /// Discard requests that found no matching SDU
    pub num_discard_failures: u32,
    /// PDUs produced
    pub num_pdus: u32,
    /// Produced PDU bytes, headers included
    pub num_pdu_bytes: u64,
    /// Mode-specific counters
    pub mode_specific: RlcTxMetricsModeSpecific,
}

impl RlcTxMetrics {
    fn new(mode: RlcMode) -> Self {
        Self {
            num_sdus: 0,
            num_sdu_bytes: 0,
            num_dropped_sdus: 0,
            num_discarded_sdus: 0,
            num_discard_failures: 0,
            num_pdus: 0,
            num_pdu_bytes: 0,
            mode_specific: RlcTxMetricsModeSpecific::new(mode),
        }
    }
}

impl Default for RlcTxMetrics {
    fn default() -> Self {
        Self::new(RlcMode::Um)
    }
}

/// Lock-guarded metrics container shared between the entity and pollers.
///
/// The `enabled` flag is fixed at construction; when disabled every
/// mutator is a no-op and every reader returns a default record. The
/// internal lock is independent of the entity's state lock and is only
/// held for the duration of a single counter update or snapshot.
#[derive(Debug)]
pub struct RlcTxMetricsContainer {
    metrics: Mutex<RlcTxMetrics>,
    enabled: bool,
}

impl RlcTxMetricsContainer {
    /// Create a new container; `enabled` cannot change afterwards
    pub fn new(enabled: bool) -> Self {
        Self {
            metrics: Mutex::new(RlcTxMetrics::default()),
            enabled,
        }
    }

    /// Whether metrics collection is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Tag the record with the bearer's mode. Idempotent: re-setting the
    /// current mode preserves the accumulated sub-counters.
    pub fn set_mode(&self, mode: RlcMode) {
        if !self.enabled {
            return;
        }
        let mut metrics = self.metrics.lock().unwrap();
        if metrics.mode_specific.mode() != mode {
            metrics.mode_specific = RlcTxMetricsModeSpecific::new(mode);
        }
    }

    pub fn add_sdus(&self, num_sdus: u32, num_sdu_bytes: u64) {
        if !self.enabled {
            return;
        }
        let mut metrics = self.metrics.lock().unwrap();
        metrics.num_sdus += num_sdus;
        metrics.num_sdu_bytes += num_sdu_bytes;
    }

    pub fn add_lost_sdus(&self, num_sdus: u32) {
        if !self.enabled {
            return;
        }
        self.metrics.lock().unwrap().num_dropped_sdus += num_sdus;
    }

    pub fn add_pdus(&self, num_pdus: u32, num_pdu_bytes: u64) {
        if !self.enabled {
            return;
        }
        let mut metrics = self.metrics.lock().unwrap();
        metrics.num_pdus += num_pdus;
        metrics.num_pdu_bytes += num_pdu_bytes;
    }

    pub fn add_discard(&self, num_discarded_sdus: u32) {
        if !self.enabled {
            return;
        }
        self.metrics.lock().unwrap().num_discarded_sdus += num_discarded_sdus;
    }

    pub fn add_discard_failure(&self, num_discard_failures: u32) {
        if !self.enabled {
            return;
        }
        self.metrics.lock().unwrap().num_discard_failures += num_discard_failures;
    }

    // TM specific metrics
    pub fn add_small_allocs(&self, num_allocs: u32) {
        if !self.enabled {
            return;
        }
        let mut metrics = self.metrics.lock().unwrap();
        debug_assert!(
            matches!(metrics.mode_specific, RlcTxMetricsModeSpecific::Tm(_)),
            "wrong mode for TM metrics"
        );
        if let RlcTxMetricsModeSpecific::Tm(tm) = &mut metrics.mode_specific {
            tm.num_small_allocs += num_allocs;
        }
    }

    // UM specific metrics
    pub fn add_segments(&self, num_segments: u32) {
        if !self.enabled {
            return;
        }
        let mut metrics = self.metrics.lock().unwrap();
        debug_assert!(
            matches!(metrics.mode_specific, RlcTxMetricsModeSpecific::Um(_)),
            "wrong mode for UM metrics"
        );
        if let RlcTxMetricsModeSpecific::Um(um) = &mut metrics.mode_specific {
            um.num_sdu_segments += num_segments;
        }
    }

    // AM specific metrics
    pub fn add_retx_pdus(&self, num_retx_pdus: u32, num_retx_pdu_bytes: u64) {
        if !self.enabled {
            return;
        }
        let mut guard = self.metrics.lock().unwrap();
        let metrics = &mut *guard;
        debug_assert!(
            matches!(metrics.mode_specific, RlcTxMetricsModeSpecific::Am(_)),
            "wrong mode for AM metrics"
        );
        if let RlcTxMetricsModeSpecific::Am(am) = &mut metrics.mode_specific {
            am.num_retx_pdus += num_retx_pdus;
            am.num_retx_pdu_bytes += num_retx_pdu_bytes;
            metrics.num_pdus += num_retx_pdus;
            metrics.num_pdu_bytes += num_retx_pdu_bytes;
        }
    }

    pub fn add_ctrl_pdus(&self, num_ctrl_pdus: u32, num_ctrl_pdu_bytes: u64) {
        if !self.enabled {
            return;
        }
        let mut guard = self.metrics.lock().unwrap();
        let metrics = &mut *guard;
        debug_assert!(
            matches!(metrics.mode_specific, RlcTxMetricsModeSpecific::Am(_)),
            "wrong mode for AM metrics"
        );
        if let RlcTxMetricsModeSpecific::Am(am) = &mut metrics.mode_specific {
            am.num_ctrl_pdus += num_ctrl_pdus;
            am.num_ctrl_pdu_bytes += num_ctrl_pdu_bytes;
            metrics.num_pdus += num_ctrl_pdus;
            metrics.num_pdu_bytes += num_ctrl_pdu_bytes;
        }
    }

    /// Snapshot the current counters
    pub fn get_metrics(&self) -> RlcTxMetrics {
        if !self.enabled {
            return RlcTxMetrics::default();
        }
        *self.metrics.lock().unwrap()
    }

    /// Atomically snapshot and clear the counters, preserving the mode tag
    pub fn get_and_reset_metrics(&self) -> RlcTxMetrics {
        if !self.enabled {
            return RlcTxMetrics::default();
        }
        let mut metrics = self.metrics.lock().unwrap();
        let snapshot = *metrics;
        *metrics = RlcTxMetrics::new(snapshot.mode_specific.mode());
        snapshot
    }

    /// Clear the counters in place, preserving the mode tag
    pub fn reset_metrics(&self) {
        if !self.enabled {
            return;
        }
        let mut metrics = self.metrics.lock().unwrap();
        *metrics = RlcTxMetrics::new(metrics.mode_specific.mode());
    }
}
