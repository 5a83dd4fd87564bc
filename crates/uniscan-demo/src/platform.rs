//! A simulated radio: a handful of virtual beacons advertising on timers.
//!
//! The simulation reports no offload capabilities at all, so every scan run
//! against it exercises the software emulation paths.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use uniscan_core::{
    CallbackType, NativeScanRequest, PlatformCapabilities, PlatformScanner, RawEventSender,
    RawScanResult, Result, ScanId,
};

/// One virtual beacon in radio range.
#[derive(Clone)]
struct Beacon {
    address: &'static str,
    rssi: i32,
    interval: Duration,
    payload: Vec<u8>,
    /// Stop advertising after this many packets, simulating a device that
    /// leaves range mid-scan. `None` advertises until the scan stops.
    packet_limit: Option<u32>,
}

#[derive(Default)]
struct PlatformState {
    next_id: u64,
    /// Emitter handles live here until `stop_scan`, even for emitters that
    /// already ran to their packet limit; aborting a finished task is a
    /// no-op.
    emitters: HashMap<u64, Vec<JoinHandle<()>>>,
}

/// Scanning backend over the simulated neighborhood.
pub struct SimulatedPlatform {
    beacons: Vec<Beacon>,
    state: Mutex<PlatformState>,
}

impl SimulatedPlatform {
    /// A neighborhood with two heart-rate beacons and one tag that goes
    /// quiet after a few packets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            beacons: vec![
                Beacon {
                    address: "C4:11:7E:00:00:01",
                    rssi: -52,
                    interval: Duration::from_millis(350),
                    payload: advertisement("Polar H10", Some(0x180D), None),
                    packet_limit: None,
                },
                Beacon {
                    address: "C4:11:7E:00:00:02",
                    rssi: -71,
                    interval: Duration::from_millis(500),
                    payload: advertisement("Wahoo TICKR", Some(0x180D), None),
                    packet_limit: None,
                },
                Beacon {
                    address: "F9:3A:DD:00:00:03",
                    rssi: -64,
                    interval: Duration::from_millis(400),
                    payload: advertisement("KeyTag", None, Some((0x004C, vec![0x02, 0x15]))),
                    packet_limit: Some(5),
                },
            ],
            state: Mutex::new(PlatformState::default()),
        }
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformScanner for SimulatedPlatform {
    fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities::default()
    }

    fn start_scan(&self, request: &NativeScanRequest, events: RawEventSender) -> Result<ScanId> {
        debug!(?request, "simulated scan starting");
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;

        let emitters = self
            .beacons
            .iter()
            .cloned()
            .map(|beacon| {
                let events = events.clone();
                tokio::spawn(async move {
                    let mut sent = 0u32;
                    loop {
                        tokio::time::sleep(beacon.interval).await;
                        events.send_result(
                            CallbackType::AllMatches,
                            RawScanResult {
                                device_address: beacon.address.to_owned(),
                                rssi: beacon.rssi,
                                data: beacon.payload.clone(),
                                timestamp_nanos: None,
                                metadata: None,
                            },
                        );
                        sent += 1;
                        if beacon.packet_limit.is_some_and(|limit| sent >= limit) {
                            debug!(address = beacon.address, "beacon left range");
                            break;
                        }
                    }
                })
            })
            .collect();
        state.emitters.insert(id, emitters);
        Ok(ScanId::new(id))
    }

    fn stop_scan(&self, id: ScanId) -> Result<()> {
        if let Some(emitters) = self.state.lock().unwrap().emitters.remove(&id.value()) {
            for emitter in emitters {
                emitter.abort();
            }
        }
        Ok(())
    }

    fn flush_batched_results(&self, _id: ScanId) -> Result<()> {
        // No hardware batching to flush.
        Ok(())
    }
}

/// Builds a legacy advertisement payload: flags, complete local name, and
/// optionally a 16-bit service UUID list and manufacturer data.
fn advertisement(
    name: &str,
    service_uuid: Option<u16>,
    manufacturer: Option<(u16, Vec<u8>)>,
) -> Vec<u8> {
    let mut payload = vec![0x02, 0x01, 0x06];
    if let Some(uuid) = service_uuid {
        payload.push(0x03);
        payload.push(0x03);
        payload.extend(uuid.to_le_bytes());
    }
    if let Some((id, data)) = manufacturer {
        payload.push(u8::try_from(3 + data.len()).unwrap_or(u8::MAX));
        payload.push(0xFF);
        payload.extend(id.to_le_bytes());
        payload.extend(data);
    }
    payload.push(u8::try_from(1 + name.len()).unwrap_or(u8::MAX));
    payload.push(0x09);
    payload.extend(name.as_bytes());
    payload
}
