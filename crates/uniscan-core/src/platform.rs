//! Platform scanner abstraction.
//!
//! The engine never talks to a radio directly. A [`PlatformScanner`]
//! implementation receives a [`NativeScanRequest`] describing what the
//! engine wants offloaded to the hardware, and pushes raw advertisement
//! events back through a [`RawEventSender`]. Fields left `None` on the
//! request are concerns the engine keeps in software.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, ScanFailure};
use crate::filter::ScanFilter;
use crate::record::AdvertisementRecord;
use crate::result::ScanResult;
use crate::settings::{CallbackType, CallbackTypes, MatchMode, NumOfMatches, Phy, ScanMode};

/// Hardware features the platform can take over from the engine.
///
/// Anything reported as unsupported is emulated in software instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCapabilities {
    /// Filters can be pushed down to the controller.
    pub offloaded_filtering: bool,
    /// The controller can accumulate results and deliver them in batches.
    pub offloaded_batching: bool,
    /// The controller reports first-match and match-lost transitions itself.
    pub hardware_callback_types: bool,
}

/// What the engine asks the platform to do natively.
///
/// Built by the scanner per capability tier; a `None` field means the
/// engine emulates that concern and the platform should run a plain scan
/// with respect to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeScanRequest {
    /// Requested duty cycle, where the platform honors one.
    pub scan_mode: Option<ScanMode>,
    /// Filters to offload. `None` means filtering stays in software.
    pub filters: Option<Vec<ScanFilter>>,
    /// Batch report delay to offload. `None` means batching stays in software.
    pub report_delay_millis: Option<u64>,
    /// Callback types to offload. `None` means first-match and match-lost
    /// stay in software.
    pub callback_types: Option<CallbackTypes>,
    /// Hardware match mode, where the platform honors one.
    pub match_mode: Option<MatchMode>,
    /// Hardware match count hint, where the platform honors one.
    pub num_of_matches: Option<NumOfMatches>,
    /// Restrict scanning to legacy advertisements.
    pub legacy: Option<bool>,
    /// PHY to scan on.
    pub phy: Option<Phy>,
}

/// Opaque handle identifying one native scan at the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanId(u64);

impl ScanId {
    /// Wraps a platform-assigned scan id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Packet-level metadata some platforms report alongside the payload.
///
/// Field semantics and sentinels match the accessors on
/// [`ScanResult`](crate::result::ScanResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct RawAdvertisementMetadata {
    pub event_type: u8,
    pub primary_phy: u8,
    pub secondary_phy: u8,
    pub advertising_sid: u8,
    pub tx_power: i32,
    pub periodic_advertising_interval: u16,
}

/// One advertisement as the platform saw it, payload unparsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawScanResult {
    /// Address of the advertising device.
    pub device_address: String,
    /// Received signal strength in dBm.
    pub rssi: i32,
    /// Raw advertisement payload; the engine parses it.
    pub data: Vec<u8>,
    /// Capture time, if the platform timestamps packets itself. Carried
    /// through to [`ScanResult::timestamp_nanos`] for reporting; the engine
    /// ages devices out of range by its own receipt clock, so a platform
    /// clock with a different epoch is fine here.
    pub timestamp_nanos: Option<u64>,
    pub metadata: Option<RawAdvertisementMetadata>,
}

impl RawScanResult {
    /// Parses the payload and lifts this into an engine [`ScanResult`],
    /// using `default_timestamp_nanos` when the platform did not timestamp
    /// the packet.
    #[must_use]
    pub fn into_scan_result(self, default_timestamp_nanos: u64) -> ScanResult {
        let record = if self.data.is_empty() {
            None
        } else {
            Some(AdvertisementRecord::parse(&self.data))
        };
        let timestamp = self.timestamp_nanos.unwrap_or(default_timestamp_nanos);
        match self.metadata {
            None => ScanResult::new(self.device_address, record, self.rssi, timestamp),
            Some(meta) => ScanResult::with_metadata(
                self.device_address,
                record,
                self.rssi,
                timestamp,
                meta.event_type,
                meta.primary_phy,
                meta.secondary_phy,
                meta.advertising_sid,
                meta.tx_power,
                meta.periodic_advertising_interval,
            ),
        }
    }
}

/// Events a platform pushes back to the engine for one native scan.
#[derive(Debug, Clone)]
pub enum RawScanEvent {
    /// A single advertisement arrived. Platforms with hardware callback
    /// types report the classification they made; plain platforms always
    /// report [`CallbackType::AllMatches`].
    Result(CallbackType, RawScanResult),
    /// The platform flushed a hardware batch.
    Batch(Vec<RawScanResult>),
    /// The native scan failed and has stopped.
    Failed(ScanFailure),
}

/// Sending half of the engine's raw event channel, handed to the platform
/// on `start_scan`.
///
/// Sends after the engine stops listening are silently dropped, so a
/// platform may keep pushing during teardown without special-casing it.
#[derive(Debug, Clone)]
pub struct RawEventSender {
    tx: mpsc::UnboundedSender<RawScanEvent>,
}

impl RawEventSender {
    pub(crate) const fn new(tx: mpsc::UnboundedSender<RawScanEvent>) -> Self {
        Self { tx }
    }

    /// Reports one advertisement.
    pub fn send_result(&self, callback_type: CallbackType, result: RawScanResult) {
        let _ = self.tx.send(RawScanEvent::Result(callback_type, result));
    }

    /// Reports a hardware batch flush.
    pub fn send_batch(&self, results: Vec<RawScanResult>) {
        let _ = self.tx.send(RawScanEvent::Batch(results));
    }

    /// Reports a fatal scan failure.
    pub fn send_failure(&self, failure: ScanFailure) {
        let _ = self.tx.send(RawScanEvent::Failed(failure));
    }
}

/// A scanning backend.
///
/// `start_scan` must either return a [`ScanId`] for a running scan or an
/// error; a scan that dies later reports through the sender instead.
pub trait PlatformScanner: Send + Sync {
    /// What this platform can offload.
    fn capabilities(&self) -> PlatformCapabilities;

    /// Starts a native scan and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ScanError::Platform`] when the radio rejects the
    /// request outright.
    fn start_scan(&self, request: &NativeScanRequest, events: RawEventSender) -> Result<ScanId>;

    /// Stops a native scan. Stopping an unknown id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ScanError::Platform`] when the radio fails the stop.
    fn stop_scan(&self, id: ScanId) -> Result<()>;

    /// Asks the platform to flush hardware-batched results now. Platforms
    /// without offloaded batching may ignore this.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ScanError::Platform`] when the radio fails the flush.
    fn flush_batched_results(&self, id: ScanId) -> Result<()>;
}
