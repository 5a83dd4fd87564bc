//! Per-registration capability-emulation state machine.
//!
//! One [`ScanSession`] exists per active scan registration. It receives the
//! raw event stream from the platform and upgrades it to the behavior the
//! caller's settings requested, emulating in software whatever the platform
//! could not offload: filtering, batching with per-interval duplicate
//! suppression, and first-match / match-lost classification.
//!
//! All handlers are invoked from the scanner's serialized dispatch task, so
//! events for one session arrive in order. State is still behind a mutex
//! because the periodic flush and match-lost tasks run concurrently with
//! dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::callback::ScanCallback;
use crate::error::ScanFailure;
use crate::filter::{matches_any, ScanFilter};
use crate::platform::PlatformCapabilities;
use crate::result::ScanResult;
use crate::settings::{CallbackType, CallbackTypes, ScanSettings};

/// Monotonic timestamp for scan results, in nanoseconds since an arbitrary
/// process-local epoch.
pub(crate) fn now_nanos() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Which concerns this session emulates in software.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EmulationFlags {
    pub filtering: bool,
    pub batching: bool,
    pub found_or_lost: bool,
}

impl EmulationFlags {
    /// Derives the emulation surface from what the caller asked for and
    /// what the platform can take over.
    pub(crate) fn derive(
        settings: &ScanSettings,
        filters: &[ScanFilter],
        capabilities: PlatformCapabilities,
    ) -> Self {
        Self {
            filtering: !filters.is_empty()
                && (!capabilities.offloaded_filtering || !settings.use_hardware_filtering()),
            batching: !settings.report_delay().is_zero()
                && (!capabilities.offloaded_batching || !settings.use_hardware_batching()),
            found_or_lost: settings.callback_type() != CallbackTypes::ALL_MATCHES
                && (!capabilities.hardware_callback_types
                    || !settings.use_hardware_callback_types()),
        }
    }
}

#[derive(Default)]
struct SessionState {
    stopped: bool,
    /// Buffer of an emulated batch interval.
    pending_batch: Vec<ScanResult>,
    /// Device addresses already captured in the current interval's buffer.
    devices_in_batch: HashSet<String>,
    /// Last result seen per in-range device, keyed by address, together
    /// with the engine-clock receipt time. Aging uses the receipt time, not
    /// the result's own timestamp, which may come from a platform clock
    /// with a different epoch.
    devices_in_range: HashMap<String, (u64, ScanResult)>,
    /// The match-lost poll task is running.
    match_lost_armed: bool,
}

#[derive(Default)]
struct SessionTasks {
    flush: Option<JoinHandle<()>>,
    match_lost: Option<JoinHandle<()>>,
}

pub(crate) struct ScanSession {
    filters: Vec<ScanFilter>,
    settings: Arc<ScanSettings>,
    callback: Arc<dyn ScanCallback>,
    emulation: EmulationFlags,
    state: Mutex<SessionState>,
    tasks: Mutex<SessionTasks>,
}

impl ScanSession {
    pub(crate) fn new(
        filters: Vec<ScanFilter>,
        settings: Arc<ScanSettings>,
        callback: Arc<dyn ScanCallback>,
        emulation: EmulationFlags,
    ) -> Arc<Self> {
        debug!(
            emulate_filtering = emulation.filtering,
            emulate_batching = emulation.batching,
            emulate_found_or_lost = emulation.found_or_lost,
            "scan session created"
        );
        Arc::new(Self {
            filters,
            settings,
            callback,
            emulation,
            state: Mutex::new(SessionState::default()),
            tasks: Mutex::new(SessionTasks::default()),
        })
    }

    pub(crate) fn emulation(&self) -> EmulationFlags {
        self.emulation
    }

    pub(crate) fn callback(&self) -> &Arc<dyn ScanCallback> {
        &self.callback
    }

    pub(crate) fn settings(&self) -> &Arc<ScanSettings> {
        &self.settings
    }

    pub(crate) fn filters(&self) -> &[ScanFilter] {
        &self.filters
    }

    /// Starts the periodic flush task when batching is emulated. Must run
    /// inside a tokio runtime.
    pub(crate) fn start_tasks(self: &Arc<Self>) {
        if !self.emulation.batching {
            return;
        }
        let session = Arc::clone(self);
        let interval = self.settings.report_delay();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !session.flush_pending() {
                    break;
                }
            }
        });
        self.tasks.lock().unwrap().flush = Some(handle);
    }

    /// Handles one result from the platform.
    pub(crate) fn handle_result(self: &Arc<Self>, callback_type: CallbackType, result: ScanResult) {
        if !self.filters.is_empty() && !matches_any(&self.filters, &result) {
            trace!(address = result.device_address(), "result dropped by filters");
            return;
        }

        let mut arm_match_lost = false;
        let emit = {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return;
            }
            if self.emulation.found_or_lost {
                let map_was_empty = state.devices_in_range.is_empty();
                let first_seen = state
                    .devices_in_range
                    .insert(
                        result.device_address().to_owned(),
                        (now_nanos(), result.clone()),
                    )
                    .is_none();
                if first_seen
                    && map_was_empty
                    && !state.match_lost_armed
                    && self
                        .settings
                        .callback_type()
                        .contains(CallbackTypes::MATCH_LOST)
                {
                    state.match_lost_armed = true;
                    arm_match_lost = true;
                }
                if first_seen
                    && self
                        .settings
                        .callback_type()
                        .contains(CallbackTypes::FIRST_MATCH)
                {
                    Some((CallbackType::FirstMatch, result))
                } else {
                    None
                }
            } else if self.emulation.batching {
                if !state.devices_in_batch.contains(result.device_address()) {
                    state
                        .devices_in_batch
                        .insert(result.device_address().to_owned());
                    state.pending_batch.push(result);
                }
                None
            } else {
                Some((callback_type, result))
            }
        };

        if arm_match_lost {
            self.arm_match_lost_task();
        }
        if let Some((callback_type, result)) = emit {
            self.callback.on_scan_result(callback_type, result);
        }
    }

    /// Handles a batch the platform accumulated itself.
    pub(crate) fn handle_batch(&self, results: Vec<ScanResult>) {
        if self.state.lock().unwrap().stopped {
            return;
        }
        let results = if self.emulation.filtering {
            results
                .into_iter()
                .filter(|result| matches_any(&self.filters, result))
                .collect()
        } else {
            results
        };
        self.callback.on_batch_scan_results(results);
    }

    /// Forwards a fatal scan failure, unless the session is already stopped.
    pub(crate) fn handle_failure(&self, failure: ScanFailure) {
        if self.state.lock().unwrap().stopped {
            return;
        }
        self.callback.on_scan_failed(failure);
    }

    /// Delivers the pending emulated batch, including an empty one, and
    /// opens a fresh interval. Returns `false` once the session is stopped
    /// so the flush task knows to lapse.
    pub(crate) fn flush_pending(&self) -> bool {
        let batch = {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return false;
            }
            state.devices_in_batch.clear();
            std::mem::take(&mut state.pending_batch)
        };
        self.callback.on_batch_scan_results(batch);
        true
    }

    /// Sweeps the in-range map and emits a match-lost event for every device
    /// not sighted for longer than the configured timeout. `now_nanos` is
    /// the engine clock, the same one receipt times are stamped with.
    /// Returns `true` while the poll task should keep running.
    ///
    /// A no-op unless the caller asked for MATCH_LOST events: without that
    /// bit the in-range map is never purged, so a device that goes briefly
    /// quiet does not produce a second first-match on return.
    pub(crate) fn notify_match_lost(&self, now_nanos: u64) -> bool {
        if !self
            .settings
            .callback_type()
            .contains(CallbackTypes::MATCH_LOST)
        {
            return false;
        }
        let timeout = u64::try_from(self.settings.match_lost_device_timeout().as_nanos())
            .unwrap_or(u64::MAX);
        let deadline = now_nanos.saturating_sub(timeout);

        let (lost, keep_polling) = {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                state.match_lost_armed = false;
                return false;
            }
            let lost: Vec<ScanResult> = state
                .devices_in_range
                .values()
                .filter(|(seen_at, _)| *seen_at < deadline)
                .map(|(_, result)| result.clone())
                .collect();
            for result in &lost {
                state.devices_in_range.remove(result.device_address());
            }
            let keep_polling = !state.devices_in_range.is_empty();
            if !keep_polling {
                state.match_lost_armed = false;
            }
            (lost, keep_polling)
        };

        for result in lost {
            debug!(address = result.device_address(), "device out of range");
            self.callback.on_scan_result(CallbackType::MatchLost, result);
        }
        keep_polling
    }

    /// Stops the session: no handler delivers anything after this returns,
    /// even for events already queued.
    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.stopped = true;
            state.pending_batch.clear();
            state.devices_in_batch.clear();
            state.devices_in_range.clear();
            state.match_lost_armed = false;
        }
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(handle) = tasks.flush.take() {
            handle.abort();
        }
        if let Some(handle) = tasks.match_lost.take() {
            handle.abort();
        }
    }

    /// Spawns the poll task that ages devices out of the in-range map. Runs
    /// only while the map is non-empty; `handle_result` re-arms it when a
    /// device repopulates an empty map. Outside a runtime the state is kept
    /// and sweeps are driven by calling [`Self::notify_match_lost`].
    fn arm_match_lost_task(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session = Arc::clone(self);
        let interval = self.settings.match_lost_task_interval();
        let handle = runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !session.notify_match_lost(now_nanos()) {
                    break;
                }
            }
        });
        self.tasks.lock().unwrap().match_lost = Some(handle);
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("filters", &self.filters.len())
            .field("emulation", &self.emulation)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
