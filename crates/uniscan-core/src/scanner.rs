//! The scanner façade: registration bookkeeping, capability tiers and the
//! dispatch loop between the platform and the emulation sessions.
//!
//! A [`UniScanner`] wraps one [`PlatformScanner`] at one [`CapabilityTier`]
//! and exposes the generic start/stop/flush surface. Per registration it
//! derives the emulation surface, translates settings and filters into the
//! native request the tier supports, and runs one dispatch task that lifts
//! raw platform events into the session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::callback::ScanCallback;
use crate::error::{Result, ScanError, ScanFailure};
use crate::filter::ScanFilter;
use crate::platform::{
    NativeScanRequest, PlatformCapabilities, PlatformScanner, RawEventSender, RawScanEvent, ScanId,
};
use crate::session::{now_nanos, EmulationFlags, ScanSession};
use crate::settings::{CallbackTypes, ScanSettings};

/// Ascending native-capability tiers a platform generation may provide.
///
/// A tier caps what the scanner will ask the platform to do natively;
/// everything above the tier is emulated even when the radio itself could
/// do more. The emulation logic is tier-independent, a higher tier merely
/// shrinks its surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CapabilityTier {
    /// Plain scanning only. Filtering, batching and match classification
    /// are all emulated.
    Baseline,
    /// Adds scan modes plus offloaded filtering and batching, radio
    /// permitting.
    Offload,
    /// Adds hardware first-match / match-lost classification and the
    /// match-mode and match-count hints.
    MatchEvents,
    /// Adds the legacy-only flag and PHY selection for extended
    /// advertising.
    Extended,
}

impl CapabilityTier {
    /// Intersects what the radio reports with what this tier may use.
    #[must_use]
    pub fn effective_capabilities(self, radio: PlatformCapabilities) -> PlatformCapabilities {
        match self {
            Self::Baseline => PlatformCapabilities::default(),
            Self::Offload => PlatformCapabilities {
                hardware_callback_types: false,
                ..radio
            },
            Self::MatchEvents | Self::Extended => radio,
        }
    }

    /// Translates generic settings and filters into the native request this
    /// tier supports. Concerns the session emulates are left unset so the
    /// platform runs a plain scan with respect to them.
    #[must_use]
    pub(crate) fn native_request(
        self,
        settings: &ScanSettings,
        filters: &[ScanFilter],
        emulation: EmulationFlags,
    ) -> NativeScanRequest {
        let mut request = NativeScanRequest::default();
        if self == Self::Baseline {
            return request;
        }

        request.scan_mode = Some(settings.scan_mode());
        if !emulation.filtering && !filters.is_empty() {
            request.filters = Some(filters.to_vec());
        }
        if !emulation.batching && !settings.report_delay().is_zero() {
            request.report_delay_millis =
                Some(u64::try_from(settings.report_delay().as_millis()).unwrap_or(u64::MAX));
        }
        if self == Self::Offload {
            return request;
        }

        request.callback_types = if emulation.found_or_lost {
            Some(CallbackTypes::ALL_MATCHES)
        } else {
            Some(settings.callback_type())
        };
        request.match_mode = Some(settings.match_mode());
        request.num_of_matches = Some(settings.num_of_matches());
        if self == Self::MatchEvents {
            return request;
        }

        request.legacy = Some(settings.legacy());
        request.phy = Some(settings.phy());
        request
    }
}

struct Registration {
    session: Arc<ScanSession>,
    scan_id: ScanId,
    /// The one permitted downgrade-and-restart has been spent.
    downgraded: bool,
}

struct ScannerInner {
    platform: Arc<dyn PlatformScanner>,
    tier: CapabilityTier,
    /// Active registrations keyed by callback identity.
    registrations: Mutex<HashMap<usize, Registration>>,
}

/// Unified scanner over one platform backend.
///
/// Cheap to clone; clones share the registration table. All methods must be
/// called from within a tokio runtime, which hosts the per-registration
/// dispatch and timer tasks.
#[derive(Clone)]
pub struct UniScanner {
    inner: Arc<ScannerInner>,
}

impl UniScanner {
    /// Creates a scanner over `platform` at the given capability tier. The
    /// tier is probed externally; the scanner only consumes the choice.
    #[must_use]
    pub fn new(platform: Arc<dyn PlatformScanner>, tier: CapabilityTier) -> Self {
        Self {
            inner: Arc::new(ScannerInner {
                platform,
                tier,
                registrations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The tier this scanner operates at.
    #[must_use]
    pub fn tier(&self) -> CapabilityTier {
        self.inner.tier
    }

    /// Starts a scan delivering to `callback`. An empty filter list
    /// disables filtering.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::ScannerAlreadyStarted`] when `callback` is
    /// already registered, or [`ScanError::Platform`] when the native scan
    /// cannot be started.
    pub fn start(
        &self,
        filters: Vec<ScanFilter>,
        settings: ScanSettings,
        callback: Arc<dyn ScanCallback>,
    ) -> Result<()> {
        let key = callback_key(&callback);
        let settings = Arc::new(settings);

        let mut registrations = self.inner.registrations.lock().unwrap();
        if registrations.contains_key(&key) {
            return Err(ScanError::ScannerAlreadyStarted);
        }

        let registration = self.inner.launch(filters, settings, callback, key)?;
        registrations.insert(key, registration);
        Ok(())
    }

    /// Stops the scan registered for `callback`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::CallbackNotRegistered`] when `callback` has no
    /// active scan, or [`ScanError::Platform`] when the native stop fails.
    pub fn stop(&self, callback: &Arc<dyn ScanCallback>) -> Result<()> {
        let registration = self
            .inner
            .registrations
            .lock()
            .unwrap()
            .remove(&callback_key(callback))
            .ok_or(ScanError::CallbackNotRegistered)?;
        registration.session.close();
        info!(scan_id = registration.scan_id.value(), "scan stopped");
        self.inner.platform.stop_scan(registration.scan_id)
    }

    /// Delivers any batched results for `callback` now instead of at the
    /// next report-delay boundary.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::CallbackNotRegistered`] when `callback` has no
    /// active scan, or [`ScanError::Platform`] when the native flush fails.
    pub fn flush(&self, callback: &Arc<dyn ScanCallback>) -> Result<()> {
        let (session, scan_id) = {
            let registrations = self.inner.registrations.lock().unwrap();
            let registration = registrations
                .get(&callback_key(callback))
                .ok_or(ScanError::CallbackNotRegistered)?;
            (Arc::clone(&registration.session), registration.scan_id)
        };
        if session.emulation().batching {
            session.flush_pending();
            Ok(())
        } else {
            self.inner.platform.flush_batched_results(scan_id)
        }
    }
}

impl std::fmt::Debug for UniScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniScanner")
            .field("tier", &self.inner.tier)
            .field(
                "registrations",
                &self.inner.registrations.lock().unwrap().len(),
            )
            .finish()
    }
}

impl ScannerInner {
    /// Builds a session, starts the native scan and spawns its dispatch
    /// task. The caller inserts the returned registration.
    fn launch(
        self: &Arc<Self>,
        filters: Vec<ScanFilter>,
        settings: Arc<ScanSettings>,
        callback: Arc<dyn ScanCallback>,
        key: usize,
    ) -> Result<Registration> {
        let capabilities = self.tier.effective_capabilities(self.platform.capabilities());
        let emulation = EmulationFlags::derive(&settings, &filters, capabilities);
        let request = self.tier.native_request(&settings, &filters, emulation);
        let session = ScanSession::new(filters, settings, callback, emulation);

        let (tx, rx) = mpsc::unbounded_channel();
        let scan_id = self.platform.start_scan(&request, RawEventSender::new(tx))?;
        session.start_tasks();
        info!(scan_id = scan_id.value(), tier = ?self.tier, "scan started");

        tokio::spawn(dispatch(
            Arc::clone(&session),
            rx,
            Arc::downgrade(self),
            key,
        ));
        Ok(Registration {
            session,
            scan_id,
            downgraded: false,
        })
    }

    /// Clears the hardware-callback-types opt-in and restarts the scan in
    /// emulation mode. Runs at most once per registration; a repeat failure
    /// or a failed restart surfaces as an internal error.
    fn downgrade_and_restart(self: &Arc<Self>, key: usize) {
        // Invoked outside the registrations lock so the callback may call
        // back into the scanner.
        let failed_callback = {
            let mut registrations = self.registrations.lock().unwrap();
            let Some(registration) = registrations.get_mut(&key) else {
                return;
            };
            if registration.downgraded {
                let session = Arc::clone(&registration.session);
                drop(registrations);
                session.handle_failure(ScanFailure::FeatureUnsupported);
                return;
            }
            registration.downgraded = true;

            let session = Arc::clone(&registration.session);
            let settings = Arc::clone(session.settings());
            settings.disable_hardware_callback_types();
            warn!("hardware callback types unsupported, restarting scan in emulation mode");

            // The old native scan may already be dead.
            let _ = self.platform.stop_scan(registration.scan_id);
            session.close();

            match self.launch(
                session.filters().to_vec(),
                settings,
                Arc::clone(session.callback()),
                key,
            ) {
                Ok(mut replacement) => {
                    replacement.downgraded = true;
                    registrations.insert(key, replacement);
                    None
                }
                Err(error) => {
                    registrations.remove(&key);
                    warn!(%error, "restart after downgrade failed");
                    Some(Arc::clone(session.callback()))
                }
            }
        };
        if let Some(callback) = failed_callback {
            callback.on_scan_failed(ScanFailure::InternalError);
        }
    }
}

/// Identity of a callback registration: the address of its shared allocation.
fn callback_key(callback: &Arc<dyn ScanCallback>) -> usize {
    Arc::as_ptr(callback).cast::<()>() as usize
}

/// Lifts raw platform events into the session, serialized per registration.
/// Exits when the platform drops its sender, which `stop_scan` implies.
async fn dispatch(
    session: Arc<ScanSession>,
    mut rx: mpsc::UnboundedReceiver<RawScanEvent>,
    inner: Weak<ScannerInner>,
    key: usize,
) {
    while let Some(event) = rx.recv().await {
        match event {
            RawScanEvent::Result(callback_type, raw) => {
                session.handle_result(callback_type, raw.into_scan_result(now_nanos()));
            }
            RawScanEvent::Batch(raws) => {
                let received = now_nanos();
                session.handle_batch(
                    raws.into_iter()
                        .map(|raw| raw.into_scan_result(received))
                        .collect(),
                );
            }
            RawScanEvent::Failed(failure) => {
                let hardware_classification_in_use = !session.emulation().found_or_lost
                    && session.settings().callback_type() != CallbackTypes::ALL_MATCHES;
                if failure == ScanFailure::FeatureUnsupported && hardware_classification_in_use {
                    if let Some(inner) = inner.upgrade() {
                        inner.downgrade_and_restart(key);
                    }
                    // The replacement session has its own dispatch task.
                    return;
                }
                debug!(code = failure.code(), "scan failure forwarded");
                session.handle_failure(failure);
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::RawScanResult;
    use crate::result::ScanResult;
    use crate::settings::{CallbackType, Phy, ScanMode};
    use std::time::Duration;

    #[derive(Default)]
    struct MockState {
        next_id: u64,
        requests: Vec<NativeScanRequest>,
        senders: HashMap<u64, RawEventSender>,
        fail_starts_after: Option<usize>,
    }

    struct MockPlatform {
        capabilities: PlatformCapabilities,
        state: Mutex<MockState>,
    }

    impl MockPlatform {
        fn new(capabilities: PlatformCapabilities) -> Arc<Self> {
            Arc::new(Self {
                capabilities,
                state: Mutex::new(MockState::default()),
            })
        }

        fn full() -> Arc<Self> {
            Self::new(PlatformCapabilities {
                offloaded_filtering: true,
                offloaded_batching: true,
                hardware_callback_types: true,
            })
        }

        fn fail_starts_after(&self, successful_starts: usize) {
            self.state.lock().unwrap().fail_starts_after = Some(successful_starts);
        }

        fn requests(&self) -> Vec<NativeScanRequest> {
            self.state.lock().unwrap().requests.clone()
        }

        fn sender(&self, id: u64) -> RawEventSender {
            self.state.lock().unwrap().senders[&id].clone()
        }

        fn active_scans(&self) -> usize {
            self.state.lock().unwrap().senders.len()
        }
    }

    impl PlatformScanner for MockPlatform {
        fn capabilities(&self) -> PlatformCapabilities {
            self.capabilities
        }

        fn start_scan(
            &self,
            request: &NativeScanRequest,
            events: RawEventSender,
        ) -> Result<ScanId> {
            let mut state = self.state.lock().unwrap();
            if let Some(limit) = state.fail_starts_after {
                if state.requests.len() >= limit {
                    return Err(ScanError::Platform("scan rejected".to_owned()));
                }
            }
            let id = state.next_id;
            state.next_id += 1;
            state.requests.push(request.clone());
            state.senders.insert(id, events);
            Ok(ScanId::new(id))
        }

        fn stop_scan(&self, id: ScanId) -> Result<()> {
            self.state.lock().unwrap().senders.remove(&id.value());
            Ok(())
        }

        fn flush_batched_results(&self, _id: ScanId) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(Option<CallbackType>, String)>>,
        failures: Mutex<Vec<ScanFailure>>,
    }

    impl ScanCallback for Recorder {
        fn on_scan_result(&self, callback_type: CallbackType, result: ScanResult) {
            self.events
                .lock()
                .unwrap()
                .push((Some(callback_type), result.device_address().to_owned()));
        }

        fn on_batch_scan_results(&self, results: Vec<ScanResult>) {
            let mut events = self.events.lock().unwrap();
            for result in results {
                events.push((None, result.device_address().to_owned()));
            }
        }

        fn on_scan_failed(&self, failure: ScanFailure) {
            self.failures.lock().unwrap().push(failure);
        }
    }

    fn recorder() -> (Arc<Recorder>, Arc<dyn ScanCallback>) {
        let recorder = Arc::new(Recorder::default());
        let callback = Arc::clone(&recorder) as Arc<dyn ScanCallback>;
        (recorder, callback)
    }

    fn raw_result(address: &str) -> RawScanResult {
        RawScanResult {
            device_address: address.to_owned(),
            rssi: -60,
            data: vec![0x02, 0x01, 0x06],
            timestamp_nanos: None,
            metadata: None,
        }
    }

    fn first_match_settings() -> ScanSettings {
        ScanSettings::builder()
            .callback_type(CallbackTypes::FIRST_MATCH.union(CallbackTypes::MATCH_LOST))
            .unwrap()
            .build()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_baseline_tier_requests_plain_scan() {
        let platform = MockPlatform::full();
        let scanner = UniScanner::new(
            Arc::clone(&platform) as Arc<dyn PlatformScanner>,
            CapabilityTier::Baseline,
        );
        let (_, callback) = recorder();
        let filter = ScanFilter::builder()
            .device_name("Beacon")
            .build()
            .unwrap();
        let settings = ScanSettings::builder()
            .report_delay(Duration::from_millis(1000))
            .build();

        scanner.start(vec![filter], settings, callback).unwrap();
        assert_eq!(platform.requests(), vec![NativeScanRequest::default()]);
    }

    #[tokio::test]
    async fn test_offload_tier_pushes_filters_and_batching_down() {
        let platform = MockPlatform::full();
        let scanner = UniScanner::new(
            Arc::clone(&platform) as Arc<dyn PlatformScanner>,
            CapabilityTier::Offload,
        );
        let (_, callback) = recorder();
        let filter = ScanFilter::builder()
            .device_name("Beacon")
            .build()
            .unwrap();
        let settings = ScanSettings::builder()
            .scan_mode(ScanMode::LowLatency)
            .report_delay(Duration::from_millis(1000))
            .build();

        scanner
            .start(vec![filter.clone()], settings, callback)
            .unwrap();
        let request = &platform.requests()[0];
        assert_eq!(request.scan_mode, Some(ScanMode::LowLatency));
        assert_eq!(request.filters, Some(vec![filter]));
        assert_eq!(request.report_delay_millis, Some(1000));
        assert_eq!(request.callback_types, None);
        assert_eq!(request.phy, None);
    }

    #[tokio::test]
    async fn test_offload_tier_keeps_concerns_software_on_weak_radio() {
        let platform = MockPlatform::new(PlatformCapabilities::default());
        let scanner = UniScanner::new(
            Arc::clone(&platform) as Arc<dyn PlatformScanner>,
            CapabilityTier::Offload,
        );
        let (_, callback) = recorder();
        let filter = ScanFilter::builder()
            .device_name("Beacon")
            .build()
            .unwrap();
        let settings = ScanSettings::builder()
            .report_delay(Duration::from_millis(1000))
            .build();

        scanner.start(vec![filter], settings, callback).unwrap();
        let request = &platform.requests()[0];
        assert_eq!(request.filters, None);
        assert_eq!(request.report_delay_millis, None);
    }

    #[tokio::test]
    async fn test_extended_tier_requests_hardware_classification() {
        let platform = MockPlatform::full();
        let scanner = UniScanner::new(
            Arc::clone(&platform) as Arc<dyn PlatformScanner>,
            CapabilityTier::Extended,
        );
        let (_, callback) = recorder();
        let settings = ScanSettings::builder()
            .callback_type(CallbackTypes::FIRST_MATCH)
            .unwrap()
            .legacy(false)
            .phy(Phy::LeCoded)
            .build();

        scanner.start(Vec::new(), settings, callback).unwrap();
        let request = &platform.requests()[0];
        assert_eq!(request.callback_types, Some(CallbackTypes::FIRST_MATCH));
        assert_eq!(request.legacy, Some(false));
        assert_eq!(request.phy, Some(Phy::LeCoded));
    }

    #[tokio::test]
    async fn test_results_flow_through_to_callback() {
        let platform = MockPlatform::full();
        let scanner = UniScanner::new(
            Arc::clone(&platform) as Arc<dyn PlatformScanner>,
            CapabilityTier::Extended,
        );
        let (recorder, callback) = recorder();

        scanner
            .start(Vec::new(), ScanSettings::default(), callback)
            .unwrap();
        platform
            .sender(0)
            .send_result(CallbackType::AllMatches, raw_result("AA:BB:CC:DD:EE:FF"));
        settle().await;

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![(
                Some(CallbackType::AllMatches),
                "AA:BB:CC:DD:EE:FF".to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let scanner = UniScanner::new(
            MockPlatform::full() as Arc<dyn PlatformScanner>,
            CapabilityTier::Extended,
        );
        let (_, callback) = recorder();

        scanner
            .start(Vec::new(), ScanSettings::default(), Arc::clone(&callback))
            .unwrap();
        assert!(matches!(
            scanner.start(Vec::new(), ScanSettings::default(), callback),
            Err(ScanError::ScannerAlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_stop_and_flush_require_registration() {
        let scanner = UniScanner::new(
            MockPlatform::full() as Arc<dyn PlatformScanner>,
            CapabilityTier::Extended,
        );
        let (_, callback) = recorder();

        assert!(matches!(
            scanner.stop(&callback),
            Err(ScanError::CallbackNotRegistered)
        ));
        assert!(matches!(
            scanner.flush(&callback),
            Err(ScanError::CallbackNotRegistered)
        ));
    }

    #[tokio::test]
    async fn test_stop_tears_down_native_scan() {
        let platform = MockPlatform::full();
        let scanner = UniScanner::new(
            Arc::clone(&platform) as Arc<dyn PlatformScanner>,
            CapabilityTier::Extended,
        );
        let (_, callback) = recorder();

        scanner
            .start(Vec::new(), ScanSettings::default(), Arc::clone(&callback))
            .unwrap();
        assert_eq!(platform.active_scans(), 1);
        scanner.stop(&callback).unwrap();
        assert_eq!(platform.active_scans(), 0);

        // The registration is gone, a restart is allowed.
        scanner
            .start(Vec::new(), ScanSettings::default(), callback)
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_classification_downgrades_and_restarts() {
        let platform = MockPlatform::full();
        let scanner = UniScanner::new(
            Arc::clone(&platform) as Arc<dyn PlatformScanner>,
            CapabilityTier::MatchEvents,
        );
        let (recorder, callback) = recorder();

        scanner
            .start(Vec::new(), first_match_settings(), Arc::clone(&callback))
            .unwrap();
        let first = &platform.requests()[0];
        assert_eq!(
            first.callback_types,
            Some(CallbackTypes::FIRST_MATCH.union(CallbackTypes::MATCH_LOST))
        );

        platform.sender(0).send_failure(ScanFailure::FeatureUnsupported);
        settle().await;

        // Restarted natively as a plain all-matches scan, no error surfaced.
        let requests = platform.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].callback_types, Some(CallbackTypes::ALL_MATCHES));
        assert!(recorder.failures.lock().unwrap().is_empty());

        // Emulated first-match still reaches the application.
        platform
            .sender(1)
            .send_result(CallbackType::AllMatches, raw_result("AA:BB:CC:DD:EE:FF"));
        settle().await;
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![(
                Some(CallbackType::FirstMatch),
                "AA:BB:CC:DD:EE:FF".to_owned()
            )]
        );

        scanner.stop(&callback).unwrap();
    }

    #[tokio::test]
    async fn test_failed_restart_surfaces_internal_error() {
        let platform = MockPlatform::full();
        let scanner = UniScanner::new(
            Arc::clone(&platform) as Arc<dyn PlatformScanner>,
            CapabilityTier::MatchEvents,
        );
        let (recorder, callback) = recorder();

        scanner
            .start(Vec::new(), first_match_settings(), Arc::clone(&callback))
            .unwrap();
        platform.fail_starts_after(1);
        platform.sender(0).send_failure(ScanFailure::FeatureUnsupported);
        settle().await;

        assert_eq!(
            *recorder.failures.lock().unwrap(),
            vec![ScanFailure::InternalError]
        );
        // The registration was torn down.
        assert!(matches!(
            scanner.stop(&callback),
            Err(ScanError::CallbackNotRegistered)
        ));
    }

    #[tokio::test]
    async fn test_other_failures_forwarded_to_callback() {
        let platform = MockPlatform::full();
        let scanner = UniScanner::new(
            Arc::clone(&platform) as Arc<dyn PlatformScanner>,
            CapabilityTier::Extended,
        );
        let (recorder, callback) = recorder();

        scanner
            .start(Vec::new(), ScanSettings::default(), callback)
            .unwrap();
        platform.sender(0).send_failure(ScanFailure::InternalError);
        settle().await;

        assert_eq!(
            *recorder.failures.lock().unwrap(),
            vec![ScanFailure::InternalError]
        );
    }
}
