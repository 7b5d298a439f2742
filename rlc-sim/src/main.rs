//! RLC UM Bearer Simulator
//!
//! Drives a UM transmitting entity with generated upper-layer traffic on
//! one task and scheduler grants on another, the way a DU user plane and
//! MAC would, then reports the bearer's TX metrics.

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::types::{RbId, UeIndex};
use rlc::config::RlcTxUmConfig;
use rlc::executor::UeExecutor;
use rlc::metrics::RlcTxMetricsModeSpecific;
use rlc::sdu_queue::RlcSdu;
use rlc::um::RlcTxUmEntity;
use rlc::{RlcTxLowerLayerNotifier, RlcTxUpperLayerDataNotifier};

mod config;
use config::SimConfig;

/// RLC UM bearer simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print the final metrics snapshot as JSON
    #[arg(long)]
    json_metrics: bool,
}

/// Upper layer standing in for PDCP
struct PdcpStub;

impl RlcTxUpperLayerDataNotifier for PdcpStub {
    fn on_transmitted_sdu(&self, pdcp_count: u32) {
        debug!("Transmission started for SDU (pdcp_count={})", pdcp_count);
    }
}

/// Tracks the latest buffer state the way a MAC scheduler would
#[derive(Default)]
struct SchedulerStub {
    pending_bytes: AtomicUsize,
}

impl RlcTxLowerLayerNotifier for SchedulerStub {
    fn on_buffer_state_update(&self, pending_bytes: usize) {
        self.pending_bytes.store(pending_bytes, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting RLC UM bearer simulator");

    let sim_config = match &args.config {
        Some(path) => {
            info!("Configuration file: {}", path);
            SimConfig::from_yaml_file(path)?
        }
        None => SimConfig::default(),
    };

    info!("Bearer configuration:");
    info!("  SN field length: {} bits", sim_config.rlc.sn_field_length.bits());
    info!("  SDU queue capacity: {}", sim_config.rlc.queue_capacity);
    info!(
        "  Traffic: {} SDUs of {} B every {} us",
        sim_config.traffic.num_sdus, sim_config.traffic.sdu_size, sim_config.traffic.sdu_gap_us
    );
    info!(
        "  Grants: {} B every {} us",
        sim_config.grants.grant_size, sim_config.grants.grant_period_us
    );

    let rlc_config = RlcTxUmConfig {
        metrics_enabled: true,
        ..sim_config.rlc.clone()
    };

    let upper_dn = Arc::new(PdcpStub);
    let lower_dn = Arc::new(SchedulerStub::default());
    let ue_executor = Arc::new(UeExecutor::spawn(&tokio::runtime::Handle::current()));

    let entity = Arc::new(RlcTxUmEntity::new(
        UeIndex(0),
        RbId::Drb(1),
        rlc_config,
        upper_dn,
        lower_dn.clone(),
        ue_executor,
    )?);

    // Upper-layer traffic producer
    let producer = {
        let entity = entity.clone();
        let traffic = sim_config.traffic.clone();
        tokio::spawn(async move {
            for pdcp_count in 0..traffic.num_sdus {
                let payload = vec![(pdcp_count & 0xFF) as u8; traffic.sdu_size];
                if !entity.handle_sdu(RlcSdu::new(Bytes::from(payload), Some(pdcp_count))) {
                    warn!("SDU dropped (pdcp_count={})", pdcp_count);
                }
                tokio::time::sleep(Duration::from_micros(traffic.sdu_gap_us)).await;
            }
            info!("Producer finished after {} SDUs", traffic.num_sdus);
        })
    };

    // Grant-driven consumer standing in for the MAC
    let consumer = {
        let entity = entity.clone();
        let lower_dn = lower_dn.clone();
        let grants = sim_config.grants.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_micros(grants.grant_period_us));
            let mut tx_bytes: u64 = 0;
            let mut idle_opportunities = 0u32;
            loop {
                interval.tick().await;
                let pdu = entity.pull_pdu(grants.grant_size);
                if pdu.is_empty() {
                    idle_opportunities += 1;
                    // Stop once the bearer has been drained for a while
                    if idle_opportunities > 200
                        && lower_dn.pending_bytes.load(Ordering::Relaxed) == 0
                    {
                        break;
                    }
                    continue;
                }
                idle_opportunities = 0;
                tx_bytes += pdu.len() as u64;
            }
            tx_bytes
        })
    };

    producer.await?;
    let tx_bytes = consumer.await?;
    info!("Transmitted {} B over the air interface", tx_bytes);

    let metrics = entity.get_and_reset_metrics();
    if args.json_metrics {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        info!("TX metrics:");
        info!("  SDUs: {} ({} B), dropped: {}", metrics.num_sdus, metrics.num_sdu_bytes, metrics.num_dropped_sdus);
        info!("  PDUs: {} ({} B)", metrics.num_pdus, metrics.num_pdu_bytes);
        info!(
            "  Discards: {}, discard failures: {}",
            metrics.num_discarded_sdus, metrics.num_discard_failures
        );
        if let RlcTxMetricsModeSpecific::Um(um) = metrics.mode_specific {
            info!("  SDU segments: {}", um.num_sdu_segments);
        }
    }

    info!("Simulator shutdown complete");
    Ok(())
}
