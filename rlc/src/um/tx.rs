//! UM Transmitting Entity
//!
//! Segmentation state machine turning queued SDUs into grant-sized PDUs
//! according to 3GPP TS 38.322 Sec. 5.2.2

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use common::types::{RbId, UeIndex};
use common::utils::bytes_to_hex_prefix;

use crate::config::{RlcMode, RlcTxUmConfig};
use crate::executor::TaskExecutor;
use crate::metrics::{RlcTxMetrics, RlcTxMetricsContainer};
use crate::sdu_queue::{RlcSdu, SduQueue};
use crate::um::pdu::{self, RlcUmPduHeader, SegmentationInfo};
use crate::{RlcError, RlcTxLowerLayerNotifier, RlcTxUpperLayerDataNotifier};

/// Largest SDU whose segment offsets are representable in the 16-bit SO field
pub const MAX_SDU_LEN: usize = u16::MAX as usize;

/// A PDU assembled for one transmission opportunity.
///
/// Header and payload are kept as separate buffers so the payload stays
/// a zero-copy slice of the SDU it came from.
#[derive(Debug, Clone, Default)]
pub struct RlcUmPdu {
    header: Bytes,
    payload: Bytes,
}

impl RlcUmPdu {
    fn new(header: Bytes, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// The empty PDU returned when an opportunity cannot be used
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when this opportunity carried nothing
    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    /// Total length in bytes, header included
    pub fn len(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    /// Packed header bytes
    pub fn header(&self) -> &Bytes {
        &self.header
    }

    /// Payload slice of the originating SDU
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Copy header and payload into one contiguous buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        buf.extend_from_slice(&self.header);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// Mutable transmit state, guarded by the entity's lock
#[derive(Debug)]
struct TxState {
    /// SN reserved for the SDU currently (or next) under transmission
    tx_next: u32,
    /// Byte offset into the in-flight SDU where the next segment starts.
    /// Invariant: zero whenever `sdu` is None.
    next_so: usize,
    /// SDU currently being segmented
    sdu: Option<RlcSdu>,
    /// SDUs waiting to enter segmentation
    sdu_queue: SduQueue,
}

/// UM transmitting entity of one radio bearer.
///
/// The producing path (`handle_sdu`/`discard_sdu`) and the grant-driven
/// path (`pull_pdu`/`get_buffer_state`) may run on different threads;
/// both serialize through the state lock. Metric updates take the
/// container's own lock and are applied only after the state lock has
/// been released.
pub struct RlcTxUmEntity {
    ue_index: UeIndex,
    rb_id: RbId,
    cfg: RlcTxUmConfig,
    /// SN modulus derived from the configured SN field length
    sn_mod: u32,
    head_len_full: usize,
    head_len_first: usize,
    head_len_not_first: usize,
    state: Mutex<TxState>,
    metrics: RlcTxMetricsContainer,
    upper_dn: Arc<dyn RlcTxUpperLayerDataNotifier>,
    lower_dn: Arc<dyn RlcTxLowerLayerNotifier>,
    ue_executor: Arc<dyn TaskExecutor>,
}

impl RlcTxUmEntity {
    /// Create the entity for one bearer
    pub fn new(
        ue_index: UeIndex,
        rb_id: RbId,
        cfg: RlcTxUmConfig,
        upper_dn: Arc<dyn RlcTxUpperLayerDataNotifier>,
        lower_dn: Arc<dyn RlcTxLowerLayerNotifier>,
        ue_executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, RlcError> {
        if cfg.queue_capacity == 0 {
            return Err(RlcError::InvalidConfiguration(
                "SDU queue capacity must be non-zero".to_string(),
            ));
        }

        let metrics = RlcTxMetricsContainer::new(cfg.metrics_enabled);
        metrics.set_mode(RlcMode::Um);

        let sn_len = cfg.sn_field_length;
        info!(
            "{} {}: creating UM TX entity (sn_field_length={} bits, queue_capacity={})",
            ue_index,
            rb_id,
            sn_len.bits(),
            cfg.queue_capacity
        );

        Ok(Self {
            ue_index,
            rb_id,
            sn_mod: sn_len.cardinality(),
            head_len_full: pdu::header_size_no_so(sn_len),
            head_len_first: pdu::header_size_no_so(sn_len),
            head_len_not_first: pdu::header_size_with_so(sn_len),
            state: Mutex::new(TxState {
                tx_next: 0,
                next_so: 0,
                sdu: None,
                sdu_queue: SduQueue::new(cfg.queue_capacity),
            }),
            metrics,
            upper_dn,
            lower_dn,
            ue_executor,
            cfg,
        })
    }

    /// Accept an SDU from the upper layer. Returns false when the SDU was
    /// dropped (queue full, or length not representable on the wire).
    pub fn handle_sdu(&self, sdu: RlcSdu) -> bool {
        let sdu_len = sdu.buf.len();
        let pdcp_count = sdu.pdcp_count;

        if sdu_len == 0 || sdu_len > MAX_SDU_LEN {
            warn!(
                "{} {}: dropped TX SDU, invalid length (sdu_len={} B, pdcp_count={:?})",
                self.ue_index, self.rb_id, sdu_len, pdcp_count
            );
            self.metrics.add_lost_sdus(1);
            return false;
        }

        trace!(
            "{} {}: TX SDU bytes: {}",
            self.ue_index,
            self.rb_id,
            bytes_to_hex_prefix(&sdu.buf, 16)
        );

        let accepted = {
            let mut state = self.state.lock().unwrap();
            debug!(
                "{} {}: TX SDU (sdu_len={} B, pdcp_count={:?}, enqueued_sdus={})",
                self.ue_index,
                self.rb_id,
                sdu_len,
                pdcp_count,
                state.sdu_queue.size_sdus()
            );
            if state.sdu_queue.write(sdu) {
                self.update_buffer_state_nolock(&state);
                true
            } else {
                false
            }
        };

        if accepted {
            self.metrics.add_sdus(1, sdu_len as u64);
        } else {
            info!(
                "{} {}: dropped TX SDU, queue full (sdu_len={} B, pdcp_count={:?})",
                self.ue_index, self.rb_id, sdu_len, pdcp_count
            );
            self.metrics.add_lost_sdus(1);
        }
        accepted
    }

    /// Discard the still-queued SDU matching `pdcp_count`. An SDU that
    /// already entered segmentation is not discardable.
    pub fn discard_sdu(&self, pdcp_count: u32) -> bool {
        let discarded = {
            let mut state = self.state.lock().unwrap();
            if state.sdu_queue.discard(pdcp_count) {
                self.update_buffer_state_nolock(&state);
                true
            } else {
                false
            }
        };

        if discarded {
            debug!(
                "{} {}: discarded SDU (pdcp_count={})",
                self.ue_index, self.rb_id, pdcp_count
            );
            self.metrics.add_discard(1);
        } else {
            info!(
                "{} {}: could not discard SDU (pdcp_count={})",
                self.ue_index, self.rb_id, pdcp_count
            );
            self.metrics.add_discard_failure(1);
        }
        discarded
    }

    /// Build one PDU sized to `grant_len`. Returns an empty PDU when the
    /// grant cannot carry any payload or nothing is pending.
    pub fn pull_pdu(&self, grant_len: usize) -> RlcUmPdu {
        debug!(
            "{} {}: MAC opportunity (grant_len={})",
            self.ue_index, self.rb_id, grant_len
        );

        // Need at least the smallest header plus one payload byte
        if grant_len <= self.head_len_full {
            debug!(
                "{} {}: cannot fit SDU into grant_len={}: head_len_full={}",
                self.ue_index, self.rb_id, grant_len, self.head_len_full
            );
            return RlcUmPdu::empty();
        }

        let pdu_len;
        let is_segment;

        let pdu = {
            let mut state = self.state.lock().unwrap();

            // Take a new SDU if none is currently being transmitted
            if state.sdu.is_none() {
                debug_assert!(
                    state.next_so == 0,
                    "new TX SDU, but next_so is not 0 (next_so={})",
                    state.next_so
                );
                let Some(sdu) = state.sdu_queue.read() else {
                    debug!(
                        "{} {}: no SDUs left in the SDU queue (grant_len={})",
                        self.ue_index, self.rb_id, grant_len
                    );
                    return RlcUmPdu::empty();
                };
                debug!(
                    "{} {}: read SDU (SN={}, pdcp_count={:?}, sdu_len={})",
                    self.ue_index,
                    self.rb_id,
                    state.tx_next,
                    sdu.pdcp_count,
                    sdu.buf.len()
                );

                // Tell the upper layer the transfer of this SDU begins.
                // Deferred onto the UE executor so upper-layer code never
                // runs under the state lock.
                if let Some(pdcp_count) = sdu.pdcp_count {
                    let upper_dn = Arc::clone(&self.upper_dn);
                    let queued = self
                        .ue_executor
                        .execute(Box::new(move || upper_dn.on_transmitted_sdu(pdcp_count)));
                    if !queued {
                        warn!(
                            "{} {}: failed to defer transmitted-SDU notification (pdcp_count={})",
                            self.ue_index, self.rb_id, pdcp_count
                        );
                    }
                }

                state.sdu = Some(sdu);
            }

            let (sdu_len, sdu_buf) = {
                let Some(sdu) = state.sdu.as_ref() else {
                    return RlcUmPdu::empty();
                };
                (sdu.buf.len(), sdu.buf.clone())
            };
            let next_so = state.next_so;

            let Some((si, head_len)) = self.get_si_and_head_len(next_so, sdu_len, grant_len)
            else {
                debug!(
                    "{} {}: cannot fit segment into grant_len={} (next_so={}, sdu_len={})",
                    self.ue_index, self.rb_id, grant_len, next_so, sdu_len
                );
                return RlcUmPdu::empty();
            };

            let header = RlcUmPduHeader {
                si,
                sn: state.tx_next as u16,
                so: next_so as u16,
            };
            let mut header_buf = BytesMut::with_capacity(head_len);
            let written = pdu::write_um_pdu_header(&header, self.cfg.sn_field_length, &mut header_buf);
            debug_assert_eq!(
                written, head_len,
                "header length and expected header length do not match"
            );
            if written != head_len {
                warn!(
                    "{} {}: aborting PDU, packed header is {} B, expected {} B",
                    self.ue_index, self.rb_id, written, head_len
                );
                return RlcUmPdu::empty();
            }

            // Amount of payload this opportunity can carry
            let space = grant_len - head_len;
            let payload_len = space.min(sdu_len - next_so);

            debug_assert!(
                head_len + payload_len <= grant_len,
                "resulting pdu_len={} exceeds grant_len={}",
                head_len + payload_len,
                grant_len
            );
            if head_len + payload_len > grant_len {
                warn!(
                    "{} {}: aborting PDU, pdu_len={} exceeds grant_len={}",
                    self.ue_index,
                    self.rb_id,
                    head_len + payload_len,
                    grant_len
                );
                return RlcUmPdu::empty();
            }

            debug!(
                "{} {}: TX PDU ({}): SN={}, SO={}, head_len={}, payload_len={}, sdu_len={}, grant_len={}",
                self.ue_index,
                self.rb_id,
                si,
                header.sn,
                header.so,
                head_len,
                payload_len,
                sdu_len,
                grant_len
            );

            // Release the SDU on completion, otherwise advance the offset
            if matches!(si, SegmentationInfo::FullSdu | SegmentationInfo::LastSegment) {
                state.sdu = None;
                state.next_so = 0;
                // One SN per SDU, consumed when it completes
                state.tx_next = (state.tx_next + 1) % self.sn_mod;
            } else {
                state.next_so += payload_len;
            }

            let payload = sdu_buf.slice(next_so..next_so + payload_len);
            let pdu = RlcUmPdu::new(header_buf.freeze(), payload);
            pdu_len = pdu.len();
            is_segment = si != SegmentationInfo::FullSdu;

            trace!(
                "{} {}: TX PDU bytes: {}",
                self.ue_index,
                self.rb_id,
                bytes_to_hex_prefix(&pdu.to_bytes(), 16)
            );

            // Buffer state changed; report within the same lock scope
            self.update_buffer_state_nolock(&state);

            debug!(
                "{} {}: TX entity state (tx_next={}, next_so={})",
                self.ue_index, self.rb_id, state.tx_next, state.next_so
            );

            pdu
        };

        self.metrics.add_pdus(1, pdu_len as u64);
        if is_segment {
            self.metrics.add_segments(1);
        }
        pdu
    }

    /// Decide the SI value and header length for the next PDU given the
    /// segmentation offset, the SDU length and the grant. None when the
    /// grant cannot carry a single payload byte behind the required header.
    fn get_si_and_head_len(
        &self,
        so: usize,
        sdu_len: usize,
        grant_len: usize,
    ) -> Option<(SegmentationInfo, usize)> {
        if so == 0 {
            if sdu_len <= grant_len - self.head_len_full {
                // The whole SDU fits behind the short header
                return Some((SegmentationInfo::FullSdu, self.head_len_full));
            }
            if grant_len <= self.head_len_first {
                return None;
            }
            return Some((SegmentationInfo::FirstSegment, self.head_len_first));
        }

        if grant_len <= self.head_len_not_first {
            return None;
        }
        let si = if sdu_len - so <= grant_len - self.head_len_not_first {
            SegmentationInfo::LastSegment
        } else {
            SegmentationInfo::MiddleSegment
        };
        Some((si, self.head_len_not_first))
    }

    /// Minimum number of bytes needed to transmit everything pending,
    /// header overhead included. An estimate for scheduling purposes,
    /// not an exact transmission cost.
    pub fn get_buffer_state(&self) -> usize {
        let state = self.state.lock().unwrap();
        self.get_buffer_state_nolock(&state)
    }

    fn get_buffer_state_nolock(&self, state: &TxState) -> usize {
        // Queued SDUs are assumed to go out unsegmented
        let queue_bytes =
            state.sdu_queue.size_bytes() + state.sdu_queue.size_sdus() * self.head_len_full;
        // The in-flight remainder will at least carry an SO header
        let segment_bytes = match &state.sdu {
            Some(sdu) => (sdu.buf.len() - state.next_so) + self.head_len_not_first,
            None => 0,
        };
        queue_bytes + segment_bytes
    }

    fn update_buffer_state_nolock(&self, state: &TxState) {
        let pending_bytes = self.get_buffer_state_nolock(state);
        debug!(
            "{} {}: buffer state update ({} B pending)",
            self.ue_index, self.rb_id, pending_bytes
        );
        self.lower_dn.on_buffer_state_update(pending_bytes);
    }

    /// Snapshot the TX metrics
    pub fn get_metrics(&self) -> RlcTxMetrics {
        self.metrics.get_metrics()
    }

    /// Snapshot and clear the TX metrics
    pub fn get_and_reset_metrics(&self) -> RlcTxMetrics {
        self.metrics.get_and_reset_metrics()
    }

    /// Clear the TX metrics
    pub fn reset_metrics(&self) {
        self.metrics.reset_metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnFieldLength;
    use crate::executor::Task;
    use crate::metrics::RlcTxMetricsModeSpecific;
    use crate::um::pdu::read_um_pdu_header;
    use rand::Rng;

    #[derive(Default)]
    struct UpperDnSpy {
        transmitted: Mutex<Vec<u32>>,
    }

    impl RlcTxUpperLayerDataNotifier for UpperDnSpy {
        fn on_transmitted_sdu(&self, pdcp_count: u32) {
            self.transmitted.lock().unwrap().push(pdcp_count);
        }
    }

    #[derive(Default)]
    struct LowerDnSpy {
        updates: Mutex<Vec<usize>>,
    }

    impl LowerDnSpy {
        fn last(&self) -> Option<usize> {
            self.updates.lock().unwrap().last().copied()
        }
    }

    impl RlcTxLowerLayerNotifier for LowerDnSpy {
        fn on_buffer_state_update(&self, pending_bytes: usize) {
            self.updates.lock().unwrap().push(pending_bytes);
        }
    }

    /// Executor that parks tasks until the test drains them
    #[derive(Default)]
    struct ManualExecutor {
        tasks: Mutex<Vec<Task>>,
    }

    impl ManualExecutor {
        fn pending(&self) -> usize {
            self.tasks.lock().unwrap().len()
        }

        fn run_all(&self) -> usize {
            let tasks: Vec<Task> = std::mem::take(&mut *self.tasks.lock().unwrap());
            let count = tasks.len();
            for task in tasks {
                task();
            }
            count
        }
    }

    impl TaskExecutor for ManualExecutor {
        fn execute(&self, task: Task) -> bool {
            self.tasks.lock().unwrap().push(task);
            true
        }
    }

    struct TestBearer {
        entity: RlcTxUmEntity,
        upper: Arc<UpperDnSpy>,
        lower: Arc<LowerDnSpy>,
        exec: Arc<ManualExecutor>,
    }

    fn make_bearer(cfg: RlcTxUmConfig) -> TestBearer {
        let upper = Arc::new(UpperDnSpy::default());
        let lower = Arc::new(LowerDnSpy::default());
        let exec = Arc::new(ManualExecutor::default());
        let entity = RlcTxUmEntity::new(
            UeIndex(1),
            RbId::Drb(1),
            cfg,
            upper.clone(),
            lower.clone(),
            exec.clone(),
        )
        .unwrap();
        TestBearer {
            entity,
            upper,
            lower,
            exec,
        }
    }

    fn cfg5() -> RlcTxUmConfig {
        RlcTxUmConfig {
            sn_field_length: SnFieldLength::Bits5,
            queue_capacity: 16,
            metrics_enabled: true,
        }
    }

    fn cfg10() -> RlcTxUmConfig {
        RlcTxUmConfig {
            sn_field_length: SnFieldLength::Bits10,
            ..cfg5()
        }
    }

    fn sdu(len: usize, pdcp_count: Option<u32>) -> RlcSdu {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        RlcSdu::new(Bytes::from(payload), pdcp_count)
    }

    fn parse_header(bearer: &TestBearer, pdu: &RlcUmPdu) -> RlcUmPduHeader {
        let (header, consumed) =
            read_um_pdu_header(pdu.header(), bearer.entity.cfg.sn_field_length).unwrap();
        assert_eq!(consumed, pdu.header().len());
        header
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let upper = Arc::new(UpperDnSpy::default());
        let lower = Arc::new(LowerDnSpy::default());
        let exec = Arc::new(ManualExecutor::default());
        let cfg = RlcTxUmConfig {
            queue_capacity: 0,
            ..cfg5()
        };
        assert!(RlcTxUmEntity::new(UeIndex(1), RbId::Drb(1), cfg, upper, lower, exec).is_err());
    }

    #[test]
    fn test_pull_from_empty_queue() {
        let bearer = make_bearer(cfg5());
        let pdu = bearer.entity.pull_pdu(1500);
        assert!(pdu.is_empty());
        assert_eq!(pdu.len(), 0);
        assert_eq!(bearer.entity.get_buffer_state(), 0);
        assert_eq!(bearer.entity.get_metrics().num_pdus, 0);
    }

    #[test]
    fn test_full_sdu_in_one_pdu() {
        let bearer = make_bearer(cfg5());
        assert!(bearer.entity.handle_sdu(sdu(50, Some(0))));
        assert_eq!(bearer.entity.get_buffer_state(), 51);
        assert_eq!(bearer.lower.last(), Some(51));

        let pdu = bearer.entity.pull_pdu(1000);
        assert_eq!(pdu.len(), 51);
        let header = parse_header(&bearer, &pdu);
        assert_eq!(header.si, SegmentationInfo::FullSdu);
        assert_eq!(header.sn, 0);
        assert_eq!(pdu.payload(), &sdu(50, None).buf);
        assert_eq!(bearer.entity.get_buffer_state(), 0);
        assert_eq!(bearer.lower.last(), Some(0));

        // SN was consumed by the completed SDU
        assert!(bearer.entity.handle_sdu(sdu(50, Some(1))));
        let header = parse_header(&bearer, &bearer.entity.pull_pdu(1000));
        assert_eq!(header.sn, 1);

        let m = bearer.entity.get_metrics();
        assert_eq!(m.num_sdus, 2);
        assert_eq!(m.num_sdu_bytes, 100);
        assert_eq!(m.num_pdus, 2);
        assert_eq!(m.num_pdu_bytes, 102);
        assert_eq!(
            m.mode_specific,
            RlcTxMetricsModeSpecific::Um(Default::default())
        );
    }

    #[test]
    fn test_segmentation_over_three_grants() {
        let bearer = make_bearer(cfg5());
        let original = sdu(1493, Some(7));
        assert!(bearer.entity.handle_sdu(original.clone()));
        assert_eq!(bearer.entity.get_buffer_state(), 1494);

        // First segment: 1 B header, 499 B payload
        let pdu1 = bearer.entity.pull_pdu(500);
        assert_eq!(pdu1.len(), 500);
        let h1 = parse_header(&bearer, &pdu1);
        assert_eq!(h1.si, SegmentationInfo::FirstSegment);
        assert_eq!(h1.sn, 0);
        // 994 B left plus the 3 B header of a not-first segment
        assert_eq!(bearer.entity.get_buffer_state(), 997);

        // Middle segment: 3 B header, 497 B payload at SO 499
        let pdu2 = bearer.entity.pull_pdu(500);
        assert_eq!(pdu2.len(), 500);
        let h2 = parse_header(&bearer, &pdu2);
        assert_eq!(h2.si, SegmentationInfo::MiddleSegment);
        assert_eq!(h2.so, 499);
        assert_eq!(h2.sn, 0);

        // Last segment: 3 B header, the remaining 497 B at SO 996
        let pdu3 = bearer.entity.pull_pdu(500);
        assert_eq!(pdu3.len(), 500);
        let h3 = parse_header(&bearer, &pdu3);
        assert_eq!(h3.si, SegmentationInfo::LastSegment);
        assert_eq!(h3.so, 996);
        assert_eq!(h3.sn, 0);
        assert_eq!(bearer.entity.get_buffer_state(), 0);

        // Gap-free reconstruction
        let mut rebuilt = BytesMut::new();
        for pdu in [&pdu1, &pdu2, &pdu3] {
            rebuilt.extend_from_slice(pdu.payload());
        }
        assert_eq!(rebuilt.freeze(), original.buf);

        // SN advanced once, at completion
        assert!(bearer.entity.handle_sdu(sdu(10, Some(8))));
        let header = parse_header(&bearer, &bearer.entity.pull_pdu(100));
        assert_eq!(header.sn, 1);

        let m = bearer.entity.get_metrics();
        assert_eq!(m.num_pdus, 4);
        assert_eq!(m.num_pdu_bytes, 1511);
        assert_eq!(
            m.mode_specific,
            RlcTxMetricsModeSpecific::Um(crate::metrics::RlcUmTxMetrics {
                num_sdu_segments: 3
            })
        );
    }

    #[test]
    fn test_grant_too_small() {
        let bearer = make_bearer(cfg5());
        assert!(bearer.entity.handle_sdu(sdu(100, Some(0))));

        // Not even one payload byte behind the 1 B header
        assert!(bearer.entity.pull_pdu(0).is_empty());
        assert!(bearer.entity.pull_pdu(1).is_empty());

        // Start segmentation, then offer grants below the SO header size
        let pdu = bearer.entity.pull_pdu(51);
        let header = parse_header(&bearer, &pdu);
        assert_eq!(header.si, SegmentationInfo::FirstSegment);
        assert!(bearer.entity.pull_pdu(2).is_empty());
        assert!(bearer.entity.pull_pdu(3).is_empty());

        // A sufficient grant finishes the SDU
        let pdu = bearer.entity.pull_pdu(53);
        assert_eq!(pdu.len(), 53);
        let header = parse_header(&bearer, &pdu);
        assert_eq!(header.si, SegmentationInfo::LastSegment);
        assert_eq!(header.so, 50);

        // Failed opportunities produced no PDUs and no metrics
        let m = bearer.entity.get_metrics();
        assert_eq!(m.num_pdus, 2);
    }

    #[test]
    fn test_buffer_state_sums_queued_sdus() {
        let bearer = make_bearer(cfg5());
        bearer.entity.handle_sdu(sdu(10, Some(0)));
        bearer.entity.handle_sdu(sdu(20, Some(1)));
        bearer.entity.handle_sdu(sdu(30, Some(2)));
        // Payload bytes plus one full-SDU header per queued SDU
        assert_eq!(bearer.entity.get_buffer_state(), 63);
        assert_eq!(bearer.lower.last(), Some(63));
    }

    #[test]
    fn test_discard_queued_sdu() {
        let bearer = make_bearer(cfg5());
        bearer.entity.handle_sdu(sdu(100, Some(42)));
        assert!(bearer.entity.discard_sdu(42));
        assert_eq!(bearer.entity.get_buffer_state(), 0);
        assert!(bearer.entity.pull_pdu(1500).is_empty());

        let m = bearer.entity.get_metrics();
        assert_eq!(m.num_sdus, 1);
        assert_eq!(m.num_discarded_sdus, 1);
        assert_eq!(m.num_pdus, 0);
    }

    #[test]
    fn test_discard_miss_changes_nothing() {
        let bearer = make_bearer(cfg5());
        bearer.entity.handle_sdu(sdu(100, Some(1)));
        let bs_before = bearer.entity.get_buffer_state();

        assert!(!bearer.entity.discard_sdu(2));
        assert_eq!(bearer.entity.get_buffer_state(), bs_before);

        let m = bearer.entity.get_metrics();
        assert_eq!(m.num_discard_failures, 1);
        assert_eq!(m.num_discarded_sdus, 0);

        // The queued SDU is still transmittable
        let pdu = bearer.entity.pull_pdu(1500);
        assert_eq!(pdu.len(), 101);
    }

    #[test]
    fn test_discard_in_flight_sdu_fails() {
        let bearer = make_bearer(cfg5());
        bearer.entity.handle_sdu(sdu(100, Some(5)));

        // Pull the first segment so the SDU leaves the queue
        let pdu = bearer.entity.pull_pdu(51);
        assert_eq!(parse_header(&bearer, &pdu).si, SegmentationInfo::FirstSegment);

        assert!(!bearer.entity.discard_sdu(5));
        assert_eq!(bearer.entity.get_metrics().num_discard_failures, 1);

        // Segmentation continues unaffected
        let pdu = bearer.entity.pull_pdu(1000);
        assert_eq!(parse_header(&bearer, &pdu).si, SegmentationInfo::LastSegment);
    }

    #[test]
    fn test_upper_notification_is_deferred_and_unique() {
        let bearer = make_bearer(cfg5());
        bearer.entity.handle_sdu(sdu(100, Some(9)));
        assert_eq!(bearer.exec.pending(), 0);

        // The notification is queued on the executor by the first pull
        bearer.entity.pull_pdu(51);
        assert_eq!(bearer.exec.pending(), 1);
        assert!(bearer.upper.transmitted.lock().unwrap().is_empty());

        // Further segments of the same SDU queue nothing new
        bearer.entity.pull_pdu(51);
        bearer.entity.pull_pdu(1000);
        assert_eq!(bearer.exec.pending(), 1);

        assert_eq!(bearer.exec.run_all(), 1);
        assert_eq!(*bearer.upper.transmitted.lock().unwrap(), vec![9]);

        // The next SDU triggers its own notification
        bearer.entity.handle_sdu(sdu(10, Some(10)));
        bearer.entity.pull_pdu(1000);
        bearer.exec.run_all();
        assert_eq!(*bearer.upper.transmitted.lock().unwrap(), vec![9, 10]);
    }

    #[test]
    fn test_sdu_without_pdcp_count_notifies_nobody() {
        let bearer = make_bearer(cfg5());
        bearer.entity.handle_sdu(sdu(10, None));
        bearer.entity.pull_pdu(100);
        assert_eq!(bearer.exec.pending(), 0);
    }

    #[test]
    fn test_sn_wraps_at_modulus() {
        let bearer = make_bearer(cfg5());
        for count in 0..33u32 {
            assert!(bearer.entity.handle_sdu(sdu(8, Some(count))));
            let pdu = bearer.entity.pull_pdu(100);
            let header = parse_header(&bearer, &pdu);
            assert_eq!(header.si, SegmentationInfo::FullSdu);
            assert_eq!(header.sn as u32, count % 32);
        }
    }

    #[test]
    fn test_invalid_sdu_lengths_are_dropped() {
        let bearer = make_bearer(cfg5());
        assert!(!bearer.entity.handle_sdu(RlcSdu::new(Bytes::new(), Some(0))));
        assert!(!bearer.entity.handle_sdu(sdu(MAX_SDU_LEN + 1, Some(1))));
        assert_eq!(bearer.entity.get_metrics().num_dropped_sdus, 2);
        assert_eq!(bearer.entity.get_buffer_state(), 0);
    }

    #[test]
    fn test_queue_full_drops_sdu() {
        let cfg = RlcTxUmConfig {
            queue_capacity: 2,
            ..cfg5()
        };
        let bearer = make_bearer(cfg);
        assert!(bearer.entity.handle_sdu(sdu(10, Some(0))));
        assert!(bearer.entity.handle_sdu(sdu(10, Some(1))));
        assert!(!bearer.entity.handle_sdu(sdu(10, Some(2))));

        let m = bearer.entity.get_metrics();
        assert_eq!(m.num_sdus, 2);
        assert_eq!(m.num_dropped_sdus, 1);
        assert_eq!(bearer.entity.get_buffer_state(), 22);
    }

    #[test]
    fn test_ten_bit_sn_header_lengths() {
        let bearer = make_bearer(cfg10());

        // 2 B headers: a 10 B SDU fills a 12 B grant exactly
        bearer.entity.handle_sdu(sdu(10, Some(0)));
        let pdu = bearer.entity.pull_pdu(12);
        assert_eq!(pdu.len(), 12);
        assert_eq!(parse_header(&bearer, &pdu).si, SegmentationInfo::FullSdu);

        // Not-first headers carry 2 B of SO on top
        bearer.entity.handle_sdu(sdu(100, Some(1)));
        let pdu = bearer.entity.pull_pdu(52);
        assert_eq!(parse_header(&bearer, &pdu).si, SegmentationInfo::FirstSegment);
        assert_eq!(pdu.payload().len(), 50);
        assert_eq!(bearer.entity.get_buffer_state(), 54);

        let pdu = bearer.entity.pull_pdu(54);
        let header = parse_header(&bearer, &pdu);
        assert_eq!(header.si, SegmentationInfo::LastSegment);
        assert_eq!(header.so, 50);
        assert_eq!(pdu.len(), 54);
    }

    #[test]
    fn test_pdu_never_exceeds_grant() {
        let bearer = make_bearer(cfg5());
        let mut rng = rand::thread_rng();
        let mut pending = 0u32;

        for round in 0..400u32 {
            if pending == 0 {
                let len = rng.gen_range(1..2000);
                assert!(bearer.entity.handle_sdu(sdu(len, Some(round))));
                pending = 1;
            }
            let grant_len = rng.gen_range(1..64);
            let pdu = bearer.entity.pull_pdu(grant_len);
            assert!(pdu.len() <= grant_len);
            if !pdu.is_empty() {
                let header = parse_header(&bearer, &pdu);
                if matches!(
                    header.si,
                    SegmentationInfo::FullSdu | SegmentationInfo::LastSegment
                ) {
                    pending = 0;
                }
            }
        }
    }

    #[test]
    fn test_random_grants_reconstruct_sdus() {
        let bearer = make_bearer(cfg5());
        let mut rng = rand::thread_rng();
        let originals: Vec<RlcSdu> = (0..5u32)
            .map(|i| sdu(rng.gen_range(1..3000), Some(i)))
            .collect();
        for original in &originals {
            assert!(bearer.entity.handle_sdu(original.clone()));
        }

        let mut rebuilt: Vec<BytesMut> = Vec::new();
        let mut current = BytesMut::new();
        while bearer.entity.get_buffer_state() > 0 {
            let grant_len = rng.gen_range(4..512);
            let pdu = bearer.entity.pull_pdu(grant_len);
            if pdu.is_empty() {
                continue;
            }
            let header = parse_header(&bearer, &pdu);
            // Payload offsets line up with what was already collected
            if header.si.has_so() {
                assert_eq!(header.so as usize, current.len());
            }
            current.extend_from_slice(pdu.payload());
            if matches!(
                header.si,
                SegmentationInfo::FullSdu | SegmentationInfo::LastSegment
            ) {
                rebuilt.push(std::mem::take(&mut current));
            }
        }

        assert_eq!(rebuilt.len(), originals.len());
        for (rebuilt, original) in rebuilt.iter().zip(&originals) {
            assert_eq!(&rebuilt[..], &original.buf[..]);
        }
    }

    #[test]
    fn test_parallel_producer_and_puller() {
        let cfg = RlcTxUmConfig {
            queue_capacity: 32,
            ..cfg5()
        };
        let bearer = make_bearer(cfg);
        let entity = &bearer.entity;
        let num_sdus = 64u32;

        let mut rebuilt: Vec<BytesMut> = Vec::new();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for count in 0..num_sdus {
                    let sdu = sdu(100 + (count as usize % 400), Some(count));
                    // Retry while the puller drains the queue
                    while !entity.handle_sdu(sdu.clone()) {
                        std::thread::yield_now();
                    }
                }
            });

            let mut current = BytesMut::new();
            while rebuilt.len() < num_sdus as usize {
                let pdu = entity.pull_pdu(64);
                if pdu.is_empty() {
                    std::thread::yield_now();
                    continue;
                }
                let (header, _) =
                    read_um_pdu_header(pdu.header(), SnFieldLength::Bits5).unwrap();
                current.extend_from_slice(pdu.payload());
                if matches!(
                    header.si,
                    SegmentationInfo::FullSdu | SegmentationInfo::LastSegment
                ) {
                    rebuilt.push(std::mem::take(&mut current));
                }
            }
        });

        // FIFO order survived the thread handoff, byte-exactly
        for (count, rebuilt) in rebuilt.iter().enumerate() {
            let expected = sdu(100 + (count % 400), None);
            assert_eq!(&rebuilt[..], &expected.buf[..]);
        }

        // Accepted SDUs count once each, no matter how often the
        // producer had to retry against a full queue
        assert_eq!(entity.get_metrics().num_sdus, num_sdus);
    }
}
