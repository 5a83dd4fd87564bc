//! Unified error types for the uniscan core library.
//!
//! This module provides the library error type [`ScanError`], covering filter
//! and settings construction failures as well as scan registration misuse,
//! and the [`ScanFailure`] codes that the platform reports asynchronously
//! through [`ScanCallback::on_scan_failed`](crate::callback::ScanCallback::on_scan_failed).
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide callers toward resolution
//! - **Rejected early**: Invalid filters and settings never make it past
//!   construction; they are never coerced silently

use thiserror::Error;

/// The unified error type for all uniscan operations.
#[derive(Debug, Error)]
pub enum ScanError {
    // =========================================================================
    // FILTER CONSTRUCTION ERRORS
    // =========================================================================
    /// The device address does not look like a Bluetooth MAC address.
    #[error("Invalid device address: '{0}'. Expected the format '01:02:03:AB:CD:EF'.")]
    InvalidDeviceAddress(String),

    /// A data mask was supplied without the data it is meant to mask.
    #[error("{field} mask set without {field} data. Set the data or drop the mask.")]
    MaskWithoutData {
        /// The filter field the mask belongs to.
        field: &'static str,
    },

    /// A data mask and its data have different lengths.
    #[error("Size mismatch for {field}: data is {data_len} bytes but mask is {mask_len} bytes")]
    MaskLengthMismatch {
        /// The filter field the mask belongs to.
        field: &'static str,
        /// Length of the filter data.
        data_len: usize,
        /// Length of the mask.
        mask_len: usize,
    },

    /// The manufacturer id is negative.
    #[error("Invalid manufacturer id: {0}. Manufacturer ids are non-negative 16-bit values.")]
    InvalidManufacturerId(i32),

    // =========================================================================
    // SETTINGS CONSTRUCTION ERRORS
    // =========================================================================
    /// The callback type bitmask is not one of the supported combinations.
    #[error("Invalid callback type bitmask: {0:#04x}. Use ALL_MATCHES, FIRST_MATCH, MATCH_LOST or FIRST_MATCH | MATCH_LOST.")]
    InvalidCallbackType(u8),

    /// A match-lost timeout or task interval of zero was requested.
    #[error("Match options must be greater than zero (device timeout and task interval)")]
    InvalidMatchOptions,

    /// A power-save scan or rest interval of zero was requested.
    #[error("Power-save scan and rest intervals must be greater than zero")]
    InvalidPowerSaveIntervals,

    // =========================================================================
    // SCAN REGISTRATION ERRORS
    // =========================================================================
    /// A scan was started twice with the same callback instance.
    #[error("Scanner already started with the given callback")]
    ScannerAlreadyStarted,

    /// A stop or flush was requested for a callback that never started a scan.
    #[error("Callback not registered. Use the same callback instance that started the scan.")]
    CallbackNotRegistered,

    /// The platform scanner rejected a start, stop or flush call.
    #[error("Platform scanner error: {0}")]
    Platform(String),
}

/// A specialized [`Result`] type for uniscan operations.
pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// Returns `true` if this error was raised while validating a filter
    /// or settings object at construction time.
    #[inline]
    #[must_use]
    pub const fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidDeviceAddress(_)
                | Self::MaskWithoutData { .. }
                | Self::MaskLengthMismatch { .. }
                | Self::InvalidManufacturerId(_)
                | Self::InvalidCallbackType(_)
                | Self::InvalidMatchOptions
                | Self::InvalidPowerSaveIntervals
        )
    }

    /// Returns `true` if this error indicates caller misuse of the scan
    /// registration API rather than a runtime condition.
    #[inline]
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        matches!(self, Self::ScannerAlreadyStarted | Self::CallbackNotRegistered)
    }
}

/// Asynchronous scan failure reported through the scan callback.
///
/// The integer codes are stable and match the values callers of the native
/// scanning stack expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFailure {
    /// A scan with the same settings is already started by the platform.
    AlreadyStarted,
    /// The application could not be registered with the platform scanner.
    ApplicationRegistrationFailed,
    /// An internal error occurred while scanning or restarting a scan.
    InternalError,
    /// The platform does not support the requested scan feature.
    FeatureUnsupported,
    /// A platform-specific code outside the stable set.
    Other(i32),
}

impl ScanFailure {
    /// Stable integer code for [`ScanFailure::AlreadyStarted`].
    pub const SCAN_FAILED_ALREADY_STARTED: i32 = 1;
    /// Stable integer code for [`ScanFailure::ApplicationRegistrationFailed`].
    pub const SCAN_FAILED_APPLICATION_REGISTRATION_FAILED: i32 = 2;
    /// Stable integer code for [`ScanFailure::InternalError`].
    pub const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;
    /// Stable integer code for [`ScanFailure::FeatureUnsupported`].
    pub const SCAN_FAILED_FEATURE_UNSUPPORTED: i32 = 4;

    /// Returns the stable integer code for this failure.
    #[inline]
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::AlreadyStarted => Self::SCAN_FAILED_ALREADY_STARTED,
            Self::ApplicationRegistrationFailed => {
                Self::SCAN_FAILED_APPLICATION_REGISTRATION_FAILED
            }
            Self::InternalError => Self::SCAN_FAILED_INTERNAL_ERROR,
            Self::FeatureUnsupported => Self::SCAN_FAILED_FEATURE_UNSUPPORTED,
            Self::Other(code) => code,
        }
    }

    /// Maps a raw platform failure code back to a [`ScanFailure`].
    #[inline]
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            Self::SCAN_FAILED_ALREADY_STARTED => Self::AlreadyStarted,
            Self::SCAN_FAILED_APPLICATION_REGISTRATION_FAILED => {
                Self::ApplicationRegistrationFailed
            }
            Self::SCAN_FAILED_INTERNAL_ERROR => Self::InternalError,
            Self::SCAN_FAILED_FEATURE_UNSUPPORTED => Self::FeatureUnsupported,
            other => Self::Other(other),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_classification() {
        assert!(ScanError::InvalidDeviceAddress("nope".into()).is_validation_error());
        assert!(ScanError::MaskWithoutData {
            field: "service data"
        }
        .is_validation_error());
        assert!(ScanError::MaskLengthMismatch {
            field: "manufacturer data",
            data_len: 4,
            mask_len: 2,
        }
        .is_validation_error());
        assert!(ScanError::InvalidManufacturerId(-1).is_validation_error());
        assert!(ScanError::InvalidCallbackType(0x08).is_validation_error());

        assert!(!ScanError::ScannerAlreadyStarted.is_validation_error());
    }

    #[test]
    fn test_usage_error_classification() {
        assert!(ScanError::ScannerAlreadyStarted.is_usage_error());
        assert!(ScanError::CallbackNotRegistered.is_usage_error());

        assert!(!ScanError::InvalidMatchOptions.is_usage_error());
        assert!(!ScanError::Platform("boom".into()).is_usage_error());
    }

    #[test]
    fn test_failure_codes_are_stable() {
        assert_eq!(ScanFailure::AlreadyStarted.code(), 1);
        assert_eq!(ScanFailure::ApplicationRegistrationFailed.code(), 2);
        assert_eq!(ScanFailure::InternalError.code(), 3);
        assert_eq!(ScanFailure::FeatureUnsupported.code(), 4);
        assert_eq!(ScanFailure::Other(7).code(), 7);
    }

    #[test]
    fn test_failure_code_round_trip() {
        for code in 1..=4 {
            assert_eq!(ScanFailure::from_code(code).code(), code);
        }
        assert_eq!(ScanFailure::from_code(42), ScanFailure::Other(42));
    }

    #[test]
    fn test_error_display_messages() {
        let err = ScanError::InvalidDeviceAddress("XY".into());
        assert!(format!("{err}").contains("XY"));

        let err = ScanError::MaskLengthMismatch {
            field: "service data",
            data_len: 4,
            mask_len: 2,
        };
        let message = format!("{err}");
        assert!(message.contains("service data"));
        assert!(message.contains('4'));
        assert!(message.contains('2'));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ScanError>();
        assert_sync::<ScanError>();
    }
}
