//! Scan results delivered to the application.

use serde::{Deserialize, Serialize};

use crate::record::AdvertisementRecord;

/// A single observation of a BLE device.
///
/// Carries the device identity, the parsed advertisement (when raw bytes were
/// present), the signal strength, a monotonic timestamp and the extended
/// advertising metadata. Results produced from legacy advertisements use the
/// documented "not present" sentinels for the extended fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    device_address: String,
    record: Option<AdvertisementRecord>,
    rssi: i32,
    timestamp_nanos: u64,
    event_type: u8,
    primary_phy: u8,
    secondary_phy: u8,
    advertising_sid: u8,
    tx_power: i32,
    periodic_advertising_interval: u16,
}

impl ScanResult {
    /// For chained advertisements, the data in this result is complete.
    pub const DATA_COMPLETE: u8 = 0x00;

    /// For chained advertisements, the controller was unable to receive all
    /// chained packets and this result contains truncated data.
    pub const DATA_TRUNCATED: u8 = 0x02;

    /// The secondary physical layer was not used.
    pub const PHY_UNUSED: u8 = 0x00;

    /// The 1Mbit physical layer.
    pub const PHY_LE_1M: u8 = 0x01;

    /// The advertising set id is not present in the packet.
    pub const SID_NOT_PRESENT: u8 = 0xFF;

    /// The TX power is not present in the packet.
    pub const TX_POWER_NOT_PRESENT: i32 = 127;

    /// The periodic advertising interval is not present in the packet.
    pub const PERIODIC_INTERVAL_NOT_PRESENT: u16 = 0x00;

    /// Event-type bit marking a legacy advertisement.
    pub(crate) const ET_LEGACY_MASK: u8 = 0x10;

    /// Event-type bit marking a connectable advertisement.
    pub(crate) const ET_CONNECTABLE_MASK: u8 = 0x01;

    /// Creates a result for a legacy advertisement.
    ///
    /// The extended metadata takes the values a legacy, connectable,
    /// complete advertisement received on the 1Mbit PHY would have.
    #[must_use]
    pub fn new(
        device_address: impl Into<String>,
        record: Option<AdvertisementRecord>,
        rssi: i32,
        timestamp_nanos: u64,
    ) -> Self {
        Self {
            device_address: device_address.into(),
            record,
            rssi,
            timestamp_nanos,
            event_type: (Self::DATA_COMPLETE << 5)
                | Self::ET_LEGACY_MASK
                | Self::ET_CONNECTABLE_MASK,
            primary_phy: Self::PHY_LE_1M,
            secondary_phy: Self::PHY_UNUSED,
            advertising_sid: Self::SID_NOT_PRESENT,
            tx_power: Self::TX_POWER_NOT_PRESENT,
            periodic_advertising_interval: Self::PERIODIC_INTERVAL_NOT_PRESENT,
        }
    }

    /// Creates a result carrying full extended advertising metadata.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn with_metadata(
        device_address: impl Into<String>,
        record: Option<AdvertisementRecord>,
        rssi: i32,
        timestamp_nanos: u64,
        event_type: u8,
        primary_phy: u8,
        secondary_phy: u8,
        advertising_sid: u8,
        tx_power: i32,
        periodic_advertising_interval: u16,
    ) -> Self {
        Self {
            device_address: device_address.into(),
            record,
            rssi,
            timestamp_nanos,
            event_type,
            primary_phy,
            secondary_phy,
            advertising_sid,
            tx_power,
            periodic_advertising_interval,
        }
    }

    /// Composes the event-type bits from their components.
    #[must_use]
    pub const fn event_type_bits(data_status: u8, legacy: bool, connectable: bool) -> u8 {
        (data_status << 5)
            | if legacy { Self::ET_LEGACY_MASK } else { 0 }
            | if connectable {
                Self::ET_CONNECTABLE_MASK
            } else {
                0
            }
    }

    /// Address of the remote device.
    #[inline]
    #[must_use]
    pub fn device_address(&self) -> &str {
        &self.device_address
    }

    /// Parsed advertisement and scan-response data.
    ///
    /// `None` only when the platform delivered no raw bytes at all.
    #[inline]
    #[must_use]
    pub const fn record(&self) -> Option<&AdvertisementRecord> {
        self.record.as_ref()
    }

    /// Received signal strength in dBm. The valid range is [-127, 126].
    #[inline]
    #[must_use]
    pub const fn rssi(&self) -> i32 {
        self.rssi
    }

    /// Monotonic timestamp in nanoseconds since boot when this result was observed.
    #[inline]
    #[must_use]
    pub const fn timestamp_nanos(&self) -> u64 {
        self.timestamp_nanos
    }

    /// Whether this result represents a legacy advertisement, as specified by
    /// Bluetooth core 4.2 and below.
    #[inline]
    #[must_use]
    pub const fn is_legacy(&self) -> bool {
        self.event_type & Self::ET_LEGACY_MASK != 0
    }

    /// Whether the advertising device is connectable.
    #[inline]
    #[must_use]
    pub const fn is_connectable(&self) -> bool {
        self.event_type & Self::ET_CONNECTABLE_MASK != 0
    }

    /// Data status of chained advertisements, one of [`Self::DATA_COMPLETE`]
    /// or [`Self::DATA_TRUNCATED`].
    #[inline]
    #[must_use]
    pub const fn data_status(&self) -> u8 {
        (self.event_type >> 5) & 0x03
    }

    /// The primary physical layer this advertisement was received on.
    #[inline]
    #[must_use]
    pub const fn primary_phy(&self) -> u8 {
        self.primary_phy
    }

    /// The secondary physical layer, or [`Self::PHY_UNUSED`].
    #[inline]
    #[must_use]
    pub const fn secondary_phy(&self) -> u8 {
        self.secondary_phy
    }

    /// The advertising set id, or [`Self::SID_NOT_PRESENT`].
    #[inline]
    #[must_use]
    pub const fn advertising_sid(&self) -> u8 {
        self.advertising_sid
    }

    /// The transmit power in dBm, or [`Self::TX_POWER_NOT_PRESENT`].
    #[inline]
    #[must_use]
    pub const fn tx_power(&self) -> i32 {
        self.tx_power
    }

    /// The periodic advertising interval in units of 1.25 ms, or
    /// [`Self::PERIODIC_INTERVAL_NOT_PRESENT`].
    #[inline]
    #[must_use]
    pub const fn periodic_advertising_interval(&self) -> u16 {
        self.periodic_advertising_interval
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_result_defaults() {
        let result = ScanResult::new("AA:BB:CC:DD:EE:FF", None, -60, 1_000);

        assert_eq!(result.device_address(), "AA:BB:CC:DD:EE:FF");
        assert!(result.record().is_none());
        assert_eq!(result.rssi(), -60);
        assert_eq!(result.timestamp_nanos(), 1_000);
        assert!(result.is_legacy());
        assert!(result.is_connectable());
        assert_eq!(result.data_status(), ScanResult::DATA_COMPLETE);
        assert_eq!(result.primary_phy(), ScanResult::PHY_LE_1M);
        assert_eq!(result.secondary_phy(), ScanResult::PHY_UNUSED);
        assert_eq!(result.advertising_sid(), ScanResult::SID_NOT_PRESENT);
        assert_eq!(result.tx_power(), ScanResult::TX_POWER_NOT_PRESENT);
        assert_eq!(
            result.periodic_advertising_interval(),
            ScanResult::PERIODIC_INTERVAL_NOT_PRESENT
        );
    }

    #[test]
    fn test_event_type_bits() {
        let bits = ScanResult::event_type_bits(ScanResult::DATA_TRUNCATED, false, true);
        let result =
            ScanResult::with_metadata("AA:BB:CC:DD:EE:FF", None, -70, 0, bits, 3, 2, 1, -8, 160);

        assert!(!result.is_legacy());
        assert!(result.is_connectable());
        assert_eq!(result.data_status(), ScanResult::DATA_TRUNCATED);
        assert_eq!(result.primary_phy(), 3);
        assert_eq!(result.secondary_phy(), 2);
        assert_eq!(result.advertising_sid(), 1);
        assert_eq!(result.tx_power(), -8);
        assert_eq!(result.periodic_advertising_interval(), 160);
    }

    #[test]
    fn test_json_round_trip() {
        let record = crate::record::AdvertisementRecord::parse(&[0x02, 0x01, 0x06]);
        let result = ScanResult::new("AA:BB:CC:DD:EE:FF", Some(record), -60, 1_000);

        let json = serde_json::to_string(&result).unwrap();
        let decoded: ScanResult = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, result);
    }
}
