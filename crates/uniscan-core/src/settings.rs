//! Scan settings: mode, callback types, batching and match-lost options.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// The default time a device may stay undiscovered before it is assumed lost.
pub const MATCH_LOST_DEVICE_TIMEOUT_DEFAULT: Duration = Duration::from_millis(10_000);

/// The default interval of the task that reports match-lost events.
pub const MATCH_LOST_TASK_INTERVAL_DEFAULT: Duration = Duration::from_millis(10_000);

/// Bluetooth LE scan mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    /// Passively listen for results of scans started by others. Platforms
    /// without opportunistic support fall back to [`ScanMode::LowPower`].
    Opportunistic,
    /// Scan with the lowest duty cycle. This is the default.
    LowPower,
    /// A trade-off between scan frequency and power consumption.
    Balanced,
    /// Scan using the highest duty cycle. Recommended only while the
    /// application is in the foreground.
    LowLatency,
}

impl ScanMode {
    /// Stable integer value of this mode.
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::Opportunistic => -1,
            Self::LowPower => 0,
            Self::Balanced => 1,
            Self::LowLatency => 2,
        }
    }
}

/// Hardware hint: how eagerly the controller reports a filter match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMode {
    /// Determine a match sooner, even on feeble signal strength and few
    /// sightings. This is the default.
    Aggressive,
    /// Require a higher signal-strength and sighting threshold before
    /// reporting a match.
    Sticky,
}

impl MatchMode {
    /// Stable integer value of this mode.
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::Aggressive => 1,
            Self::Sticky => 2,
        }
    }
}

/// Hardware hint: how many advertisements to match per filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumOfMatches {
    /// Match one advertisement per filter.
    One,
    /// Match a few advertisements per filter, hardware permitting.
    Few,
    /// Match as many advertisements per filter as the hardware allows.
    /// This is the default.
    Max,
}

impl NumOfMatches {
    /// Stable integer value of this hint.
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::One => 1,
            Self::Few => 2,
            Self::Max => 3,
        }
    }
}

/// Physical layer selector for extended scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phy {
    /// The 1Mbit PHY.
    Le1M,
    /// The 2Mbit PHY.
    Le2M,
    /// The long-range coded PHY.
    LeCoded,
    /// Scan on all PHYs the controller supports. This is the default.
    AllSupported,
}

impl Phy {
    /// Stable integer value of this selector.
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::Le1M => 1,
            Self::Le2M => 2,
            Self::LeCoded => 3,
            Self::AllSupported => 255,
        }
    }
}

/// Classification attached to a single delivered scan result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallbackType {
    /// A regular sighting of an advertisement that passed the filters.
    AllMatches,
    /// The first sighting of a device since it entered range.
    FirstMatch,
    /// The device has not been sighted for longer than the configured timeout.
    MatchLost,
}

impl CallbackType {
    /// Stable bit value of this callback type.
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::AllMatches => CallbackTypes::ALL_MATCHES.bits(),
            Self::FirstMatch => CallbackTypes::FIRST_MATCH.bits(),
            Self::MatchLost => CallbackTypes::MATCH_LOST.bits(),
        }
    }
}

/// Bitmask of the callback types a scan requests.
///
/// Valid values are [`CallbackTypes::ALL_MATCHES`],
/// [`CallbackTypes::FIRST_MATCH`], [`CallbackTypes::MATCH_LOST`] and the
/// union of the latter two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackTypes(u8);

impl CallbackTypes {
    /// Trigger a callback for every advertisement matching the filter
    /// criteria. If no filter is active, all advertisements are reported.
    pub const ALL_MATCHES: Self = Self(1);

    /// Trigger a callback only for the first advertisement received from each
    /// device that matches the filter criteria.
    pub const FIRST_MATCH: Self = Self(2);

    /// Trigger a callback when advertisements are no longer received from a
    /// device previously reported by a first-match callback.
    pub const MATCH_LOST: Self = Self(4);

    /// Returns the union of two masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bitmask value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    const fn is_valid(self) -> bool {
        matches!(self.0, 1 | 2 | 4 | 6)
    }
}

/// Immutable per-scan configuration.
///
/// Built with [`ScanSettings::builder`]. The one exception to immutability is
/// the hardware-callback-types opt-in, which the engine clears in place when
/// the platform reports the feature unsupported mid-scan.
#[derive(Debug)]
pub struct ScanSettings {
    scan_mode: ScanMode,
    callback_type: CallbackTypes,
    report_delay: Duration,
    match_mode: MatchMode,
    num_of_matches: NumOfMatches,
    legacy: bool,
    phy: Phy,
    use_hardware_filtering: bool,
    use_hardware_batching: bool,
    use_hardware_callback_types: AtomicBool,
    match_lost_device_timeout: Duration,
    match_lost_task_interval: Duration,
    power_save_scan_interval: Duration,
    power_save_rest_interval: Duration,
}

impl Clone for ScanSettings {
    fn clone(&self) -> Self {
        Self {
            scan_mode: self.scan_mode,
            callback_type: self.callback_type,
            report_delay: self.report_delay,
            match_mode: self.match_mode,
            num_of_matches: self.num_of_matches,
            legacy: self.legacy,
            phy: self.phy,
            use_hardware_filtering: self.use_hardware_filtering,
            use_hardware_batching: self.use_hardware_batching,
            use_hardware_callback_types: AtomicBool::new(self.use_hardware_callback_types()),
            match_lost_device_timeout: self.match_lost_device_timeout,
            match_lost_task_interval: self.match_lost_task_interval,
            power_save_scan_interval: self.power_save_scan_interval,
            power_save_rest_interval: self.power_save_rest_interval,
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ScanSettings {
    /// Returns a builder with the default settings.
    #[must_use]
    pub fn builder() -> ScanSettingsBuilder {
        ScanSettingsBuilder::default()
    }

    /// The scan mode.
    #[inline]
    #[must_use]
    pub const fn scan_mode(&self) -> ScanMode {
        self.scan_mode
    }

    /// The requested callback type bitmask.
    #[inline]
    #[must_use]
    pub const fn callback_type(&self) -> CallbackTypes {
        self.callback_type
    }

    /// The batch report delay. Zero means results are delivered immediately.
    #[inline]
    #[must_use]
    pub const fn report_delay(&self) -> Duration {
        self.report_delay
    }

    /// Hardware hint: match eagerness. Ignored when callback types are emulated.
    #[inline]
    #[must_use]
    pub const fn match_mode(&self) -> MatchMode {
        self.match_mode
    }

    /// Hardware hint: matches per filter. Ignored when callback types are emulated.
    #[inline]
    #[must_use]
    pub const fn num_of_matches(&self) -> NumOfMatches {
        self.num_of_matches
    }

    /// Whether only legacy advertisements are requested.
    #[inline]
    #[must_use]
    pub const fn legacy(&self) -> bool {
        self.legacy
    }

    /// The physical layer selector.
    #[inline]
    #[must_use]
    pub const fn phy(&self) -> Phy {
        self.phy
    }

    /// Whether hardware offloaded filtering should be used when supported.
    #[inline]
    #[must_use]
    pub const fn use_hardware_filtering(&self) -> bool {
        self.use_hardware_filtering
    }

    /// Whether hardware offloaded batching should be used when supported.
    #[inline]
    #[must_use]
    pub const fn use_hardware_batching(&self) -> bool {
        self.use_hardware_batching
    }

    /// Whether hardware callback-type classification should be used when
    /// supported.
    #[inline]
    #[must_use]
    pub fn use_hardware_callback_types(&self) -> bool {
        self.use_hardware_callback_types.load(Ordering::Acquire)
    }

    /// Clears the hardware callback-types opt-in.
    ///
    /// Some platforms report hardware filtering and batching capabilities up
    /// front but only reveal missing first-match/lost classification by
    /// failing the scan. The engine then disables the hardware path and
    /// restarts in emulation mode.
    pub(crate) fn disable_hardware_callback_types(&self) {
        self.use_hardware_callback_types
            .store(false, Ordering::Release);
    }

    /// Time a device may stay undiscovered before a match-lost event.
    #[inline]
    #[must_use]
    pub const fn match_lost_device_timeout(&self) -> Duration {
        self.match_lost_device_timeout
    }

    /// Interval of the periodic task that checks for lost devices.
    #[inline]
    #[must_use]
    pub const fn match_lost_task_interval(&self) -> Duration {
        self.match_lost_task_interval
    }

    /// Whether power-save duty cycling applies on platforms that scan
    /// continuously otherwise.
    #[inline]
    #[must_use]
    pub fn has_power_save_mode(&self) -> bool {
        !self.power_save_scan_interval.is_zero() && !self.power_save_rest_interval.is_zero()
    }

    /// Power-save scan interval.
    #[inline]
    #[must_use]
    pub const fn power_save_scan_interval(&self) -> Duration {
        self.power_save_scan_interval
    }

    /// Power-save rest interval.
    #[inline]
    #[must_use]
    pub const fn power_save_rest_interval(&self) -> Duration {
        self.power_save_rest_interval
    }
}

/// Builder for [`ScanSettings`].
#[derive(Debug, Clone)]
pub struct ScanSettingsBuilder {
    scan_mode: ScanMode,
    callback_type: CallbackTypes,
    report_delay: Duration,
    match_mode: MatchMode,
    num_of_matches: NumOfMatches,
    legacy: bool,
    phy: Phy,
    use_hardware_filtering: bool,
    use_hardware_batching: bool,
    use_hardware_callback_types: bool,
    match_lost_device_timeout: Duration,
    match_lost_task_interval: Duration,
    power_save_scan_interval: Duration,
    power_save_rest_interval: Duration,
}

impl Default for ScanSettingsBuilder {
    fn default() -> Self {
        Self {
            scan_mode: ScanMode::LowPower,
            callback_type: CallbackTypes::ALL_MATCHES,
            report_delay: Duration::ZERO,
            match_mode: MatchMode::Aggressive,
            num_of_matches: NumOfMatches::Max,
            legacy: true,
            phy: Phy::AllSupported,
            use_hardware_filtering: true,
            use_hardware_batching: true,
            use_hardware_callback_types: true,
            match_lost_device_timeout: MATCH_LOST_DEVICE_TIMEOUT_DEFAULT,
            match_lost_task_interval: MATCH_LOST_TASK_INTERVAL_DEFAULT,
            power_save_scan_interval: Duration::ZERO,
            power_save_rest_interval: Duration::ZERO,
        }
    }
}

impl ScanSettingsBuilder {
    /// Sets the scan mode.
    #[must_use]
    pub const fn scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.scan_mode = scan_mode;
        self
    }

    /// Sets the callback type bitmask.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidCallbackType`] for any combination other
    /// than a single flag or `FIRST_MATCH | MATCH_LOST`.
    pub fn callback_type(mut self, callback_type: CallbackTypes) -> Result<Self> {
        if !callback_type.is_valid() {
            return Err(ScanError::InvalidCallbackType(callback_type.bits()));
        }
        self.callback_type = callback_type;
        Ok(self)
    }

    /// Sets the batch report delay. Zero delivers results immediately; larger
    /// values queue results and deliver them once per interval.
    #[must_use]
    pub const fn report_delay(mut self, report_delay: Duration) -> Self {
        self.report_delay = report_delay;
        self
    }

    /// Sets the hardware match-eagerness hint.
    #[must_use]
    pub const fn match_mode(mut self, match_mode: MatchMode) -> Self {
        self.match_mode = match_mode;
        self
    }

    /// Sets the hardware matches-per-filter hint.
    #[must_use]
    pub const fn num_of_matches(mut self, num_of_matches: NumOfMatches) -> Self {
        self.num_of_matches = num_of_matches;
        self
    }

    /// Restricts results to legacy advertisements when `true` (the default,
    /// for compatibility with older applications).
    #[must_use]
    pub const fn legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    /// Sets the physical layer selector. Only consulted when
    /// [`legacy`](Self::legacy) is `false` and the platform supports
    /// extended scanning.
    #[must_use]
    pub const fn phy(mut self, phy: Phy) -> Self {
        self.phy = phy;
        self
    }

    /// Opts in or out of hardware offloaded filtering. Several controllers
    /// misbehave with offloaded filters; passing `false` forces the software
    /// matcher at the cost of extra wakeups.
    #[must_use]
    pub const fn use_hardware_filtering(mut self, use_hardware: bool) -> Self {
        self.use_hardware_filtering = use_hardware;
        self
    }

    /// Opts in or out of hardware offloaded batching. The software fallback
    /// reports batches at steady intervals and works everywhere, at the cost
    /// of extra wakeups.
    #[must_use]
    pub const fn use_hardware_batching(mut self, use_hardware: bool) -> Self {
        self.use_hardware_batching = use_hardware;
        self
    }

    /// Opts in or out of hardware first-match/match-lost classification. In
    /// the software fallback the values of [`match_mode`](Self::match_mode)
    /// and [`num_of_matches`](Self::num_of_matches) are ignored; use
    /// [`match_options`](Self::match_options) to tune the timers instead.
    #[must_use]
    pub const fn use_hardware_callback_types(mut self, use_hardware: bool) -> Self {
        self.use_hardware_callback_types = use_hardware;
        self
    }

    /// Sets the match-lost device timeout and check interval used when
    /// first-match/lost classification is emulated.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidMatchOptions`] if either duration is zero.
    pub fn match_options(
        mut self,
        device_timeout: Duration,
        task_interval: Duration,
    ) -> Result<Self> {
        if device_timeout.is_zero() || task_interval.is_zero() {
            return Err(ScanError::InvalidMatchOptions);
        }
        self.match_lost_device_timeout = device_timeout;
        self.match_lost_task_interval = task_interval;
        Ok(self)
    }

    /// Sets explicit power-save intervals for platforms that would otherwise
    /// scan continuously: scan for `scan_interval`, rest for `rest_interval`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidPowerSaveIntervals`] if either duration is
    /// zero.
    pub fn power_save(mut self, scan_interval: Duration, rest_interval: Duration) -> Result<Self> {
        if scan_interval.is_zero() || rest_interval.is_zero() {
            return Err(ScanError::InvalidPowerSaveIntervals);
        }
        self.power_save_scan_interval = scan_interval;
        self.power_save_rest_interval = rest_interval;
        Ok(self)
    }

    /// Builds the settings, deriving power-save intervals from the scan mode
    /// when none were set explicitly.
    #[must_use]
    pub fn build(mut self) -> ScanSettings {
        if self.power_save_scan_interval.is_zero() && self.power_save_rest_interval.is_zero() {
            let (scan, rest) = match self.scan_mode {
                ScanMode::LowLatency => (Duration::ZERO, Duration::ZERO),
                ScanMode::Balanced => (Duration::from_millis(2000), Duration::from_millis(3000)),
                // Opportunistic scanning cannot be emulated; the low-power
                // duty cycle is the closest approximation.
                ScanMode::Opportunistic | ScanMode::LowPower => {
                    (Duration::from_millis(500), Duration::from_millis(4500))
                }
            };
            self.power_save_scan_interval = scan;
            self.power_save_rest_interval = rest;
        }

        ScanSettings {
            scan_mode: self.scan_mode,
            callback_type: self.callback_type,
            report_delay: self.report_delay,
            match_mode: self.match_mode,
            num_of_matches: self.num_of_matches,
            legacy: self.legacy,
            phy: self.phy,
            use_hardware_filtering: self.use_hardware_filtering,
            use_hardware_batching: self.use_hardware_batching,
            use_hardware_callback_types: AtomicBool::new(self.use_hardware_callback_types),
            match_lost_device_timeout: self.match_lost_device_timeout,
            match_lost_task_interval: self.match_lost_task_interval,
            power_save_scan_interval: self.power_save_scan_interval,
            power_save_rest_interval: self.power_save_rest_interval,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
