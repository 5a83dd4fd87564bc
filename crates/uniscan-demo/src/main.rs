//! # uniscan-demo
//!
//! Runs the scanning engine against a simulated radio with no offload
//! capabilities, so filtering, batching and first-match/match-lost
//! classification are all emulated in software.
//!
//! Two scans run side by side: a batched scan filtered to heart-rate
//! beacons, and an unfiltered presence scan reporting devices entering and
//! leaving range.
//!
//! ## Running
//!
//! ```bash
//! cargo run --package uniscan-demo
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use uniscan_core::{
    uuid_from_u16, CallbackType, CallbackTypes, CapabilityTier, ScanCallback, ScanFailure,
    ScanFilter, ScanMode, ScanResult, ScanSettings, UniScanner,
};

mod logging;
mod platform;

/// Logs every delivery, labelled with the scan it belongs to.
struct LogCallback {
    scan: &'static str,
}

impl ScanCallback for LogCallback {
    fn on_scan_result(&self, callback_type: CallbackType, result: ScanResult) {
        info!(
            scan = self.scan,
            ?callback_type,
            address = result.device_address(),
            rssi = result.rssi(),
            name = result.record().and_then(|record| record.local_name()),
            "result"
        );
    }

    fn on_batch_scan_results(&self, results: Vec<ScanResult>) {
        info!(scan = self.scan, devices = results.len(), "batch");
        for result in &results {
            info!(
                scan = self.scan,
                address = result.device_address(),
                rssi = result.rssi(),
                "  batched result"
            );
        }
    }

    fn on_scan_failed(&self, failure: ScanFailure) {
        info!(scan = self.scan, code = failure.code(), "scan failed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init()?;

    info!("Starting uniscan-demo");

    let platform = Arc::new(platform::SimulatedPlatform::new());
    let scanner = UniScanner::new(platform, CapabilityTier::Offload);

    // Batched scan for heart-rate beacons, one report every two seconds.
    let heart_rate = ScanFilter::builder()
        .service_uuid(uuid_from_u16(0x180D))
        .build()?;
    let batch_settings = ScanSettings::builder()
        .scan_mode(ScanMode::Balanced)
        .report_delay(Duration::from_millis(2000))
        .build();
    let batch_callback: Arc<dyn ScanCallback> = Arc::new(LogCallback { scan: "heart-rate" });
    scanner.start(vec![heart_rate], batch_settings, Arc::clone(&batch_callback))?;

    // Unfiltered presence scan with tight match-lost timers, so the tag
    // going quiet is reported within the demo's runtime.
    let presence_settings = ScanSettings::builder()
        .callback_type(CallbackTypes::FIRST_MATCH.union(CallbackTypes::MATCH_LOST))?
        .match_options(Duration::from_secs(3), Duration::from_secs(1))?
        .build();
    let presence_callback: Arc<dyn ScanCallback> = Arc::new(LogCallback { scan: "presence" });
    scanner.start(Vec::new(), presence_settings, Arc::clone(&presence_callback))?;

    tokio::time::sleep(Duration::from_secs(8)).await;

    scanner.flush(&batch_callback)?;
    scanner.stop(&batch_callback)?;
    scanner.stop(&presence_callback)?;

    info!("Demo finished");
    Ok(())
}
