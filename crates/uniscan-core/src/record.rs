//! Advertisement and scan-response payload parsing.
//!
//! A BLE advertisement is a sequence of length-prefixed structures as defined
//! in the Bluetooth Core specification, Volume 3, Part C, Sections 11 and 18.
//! [`AdvertisementRecord::parse`] decodes such a buffer into structured
//! fields. Parsing is infallible by contract: a truncated or internally
//! inconsistent buffer yields a record with every field empty or at its
//! sentinel, with the raw bytes preserved for the caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

// Data type values assigned by the Bluetooth SIG.
const DATA_TYPE_FLAGS: u8 = 0x01;
const DATA_TYPE_SERVICE_UUIDS_16_BIT_PARTIAL: u8 = 0x02;
const DATA_TYPE_SERVICE_UUIDS_16_BIT_COMPLETE: u8 = 0x03;
const DATA_TYPE_SERVICE_UUIDS_32_BIT_PARTIAL: u8 = 0x04;
const DATA_TYPE_SERVICE_UUIDS_32_BIT_COMPLETE: u8 = 0x05;
const DATA_TYPE_SERVICE_UUIDS_128_BIT_PARTIAL: u8 = 0x06;
const DATA_TYPE_SERVICE_UUIDS_128_BIT_COMPLETE: u8 = 0x07;
const DATA_TYPE_LOCAL_NAME_SHORT: u8 = 0x08;
const DATA_TYPE_LOCAL_NAME_COMPLETE: u8 = 0x09;
const DATA_TYPE_TX_POWER_LEVEL: u8 = 0x0A;
const DATA_TYPE_SERVICE_DATA_16_BIT: u8 = 0x16;
const DATA_TYPE_SERVICE_DATA_32_BIT: u8 = 0x20;
const DATA_TYPE_SERVICE_DATA_128_BIT: u8 = 0x21;
const DATA_TYPE_MANUFACTURER_SPECIFIC_DATA: u8 = 0xFF;

const UUID_BYTES_16_BIT: usize = 2;
const UUID_BYTES_32_BIT: usize = 4;
const UUID_BYTES_128_BIT: usize = 16;

/// The Bluetooth base UUID, `00000000-0000-1000-8000-00805F9B34FB`, into
/// which 16-bit and 32-bit short UUIDs are expanded.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Expands a 16-bit short UUID into a full 128-bit UUID.
#[inline]
#[must_use]
pub fn uuid_from_u16(value: u16) -> Uuid {
    uuid_from_u32(u32::from(value))
}

/// Expands a 32-bit short UUID into a full 128-bit UUID.
#[inline]
#[must_use]
pub fn uuid_from_u32(value: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(value) << 96))
}

/// Decodes a little-endian UUID of 2, 4 or 16 bytes, expanding short forms.
///
/// Returns `None` when `bytes` has any other length.
pub(crate) fn uuid_from_le_bytes(bytes: &[u8]) -> Option<Uuid> {
    match bytes.len() {
        UUID_BYTES_16_BIT => {
            let value = u16::from_le_bytes([bytes[0], bytes[1]]);
            Some(uuid_from_u16(value))
        }
        UUID_BYTES_32_BIT => {
            let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Some(uuid_from_u32(value))
        }
        UUID_BYTES_128_BIT => {
            let mut be = [0u8; UUID_BYTES_128_BIT];
            for (dst, src) in be.iter_mut().zip(bytes.iter().rev()) {
                *dst = *src;
            }
            Some(Uuid::from_bytes(be))
        }
        _ => None,
    }
}

/// Structured view of a raw advertisement / scan-response payload.
///
/// Obtained from [`AdvertisementRecord::parse`]. All fields are immutable
/// once parsed; the raw bytes are always retained, including when parsing
/// fell back to an empty record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementRecord {
    advertise_flags: i32,
    service_uuids: Vec<Uuid>,
    service_data: BTreeMap<Uuid, Vec<u8>>,
    manufacturer_data: BTreeMap<u16, Vec<u8>>,
    tx_power_level: i32,
    local_name: Option<String>,
    bytes: Vec<u8>,
}

impl AdvertisementRecord {
    /// Value of [`advertise_flags`](Self::advertise_flags) when the flags
    /// field is absent.
    pub const FLAGS_NOT_PRESENT: i32 = -1;

    /// Value of [`tx_power_level`](Self::tx_power_level) when the tx power
    /// field is absent.
    pub const TX_POWER_NOT_PRESENT: i32 = i32::MIN;

    /// Parses a raw advertisement buffer.
    ///
    /// Never fails: on any structural inconsistency (a structure running past
    /// the end of the buffer, a short UUID list with a partial entry, a
    /// manufacturer field too small to carry its id) the parsed fields are
    /// discarded and an empty record carrying the raw bytes is returned.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        Self::parse_structures(raw).unwrap_or_else(|| {
            warn!(bytes = raw.len(), "unable to parse advertisement record");
            Self::raw_only(raw)
        })
    }

    /// Advertising flags, or [`Self::FLAGS_NOT_PRESENT`] if the field is absent.
    #[inline]
    #[must_use]
    pub const fn advertise_flags(&self) -> i32 {
        self.advertise_flags
    }

    /// Service UUIDs advertised by the device, in order of appearance.
    #[inline]
    #[must_use]
    pub fn service_uuids(&self) -> &[Uuid] {
        &self.service_uuids
    }

    /// Service data associated with `service_uuid`, if present.
    #[must_use]
    pub fn service_data(&self, service_uuid: &Uuid) -> Option<&[u8]> {
        self.service_data.get(service_uuid).map(Vec::as_slice)
    }

    /// All service data entries keyed by service UUID.
    #[inline]
    #[must_use]
    pub const fn service_data_map(&self) -> &BTreeMap<Uuid, Vec<u8>> {
        &self.service_data
    }

    /// Manufacturer specific data associated with `manufacturer_id`, if present.
    #[must_use]
    pub fn manufacturer_data(&self, manufacturer_id: u16) -> Option<&[u8]> {
        self.manufacturer_data
            .get(&manufacturer_id)
            .map(Vec::as_slice)
    }

    /// All manufacturer data entries keyed by manufacturer id.
    #[inline]
    #[must_use]
    pub const fn manufacturer_data_map(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.manufacturer_data
    }

    /// Transmission power level in dBm, or [`Self::TX_POWER_NOT_PRESENT`] if
    /// the field is absent. Can be used to estimate path loss as
    /// `tx_power_level - rssi`.
    #[inline]
    #[must_use]
    pub const fn tx_power_level(&self) -> i32 {
        self.tx_power_level
    }

    /// Local name of the device, decoded as UTF-8.
    #[inline]
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Raw bytes the record was parsed from.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn raw_only(raw: &[u8]) -> Self {
        Self {
            advertise_flags: Self::FLAGS_NOT_PRESENT,
            service_uuids: Vec::new(),
            service_data: BTreeMap::new(),
            manufacturer_data: BTreeMap::new(),
            tx_power_level: Self::TX_POWER_NOT_PRESENT,
            local_name: None,
            bytes: raw.to_vec(),
        }
    }

    /// Walks the length-prefixed structures. Returns `None` on any structural
    /// inconsistency; every read is bounds-checked.
    fn parse_structures(raw: &[u8]) -> Option<Self> {
        let mut advertise_flags = Self::FLAGS_NOT_PRESENT;
        let mut tx_power_level = Self::TX_POWER_NOT_PRESENT;
        let mut local_name = None;
        let mut service_uuids = Vec::new();
        let mut service_data = BTreeMap::new();
        let mut manufacturer_data = BTreeMap::new();

        let mut pos = 0usize;
        while pos < raw.len() {
            // The length byte covers the field type byte and the payload.
            let length = raw[pos] as usize;
            if length == 0 {
                break;
            }
            let structure = raw.get(pos + 1..pos + 1 + length)?;
            let field_type = structure[0];
            let payload = &structure[1..];

            match field_type {
                DATA_TYPE_FLAGS => advertise_flags = i32::from(*payload.first()?),
                DATA_TYPE_SERVICE_UUIDS_16_BIT_PARTIAL
                | DATA_TYPE_SERVICE_UUIDS_16_BIT_COMPLETE => {
                    parse_service_uuids(payload, UUID_BYTES_16_BIT, &mut service_uuids)?;
                }
                DATA_TYPE_SERVICE_UUIDS_32_BIT_PARTIAL
                | DATA_TYPE_SERVICE_UUIDS_32_BIT_COMPLETE => {
                    parse_service_uuids(payload, UUID_BYTES_32_BIT, &mut service_uuids)?;
                }
                DATA_TYPE_SERVICE_UUIDS_128_BIT_PARTIAL
                | DATA_TYPE_SERVICE_UUIDS_128_BIT_COMPLETE => {
                    parse_service_uuids(payload, UUID_BYTES_128_BIT, &mut service_uuids)?;
                }
                DATA_TYPE_LOCAL_NAME_SHORT | DATA_TYPE_LOCAL_NAME_COMPLETE => {
                    // Complete overwrites short when both appear.
                    local_name = Some(String::from_utf8_lossy(payload).into_owned());
                }
                DATA_TYPE_TX_POWER_LEVEL => {
                    tx_power_level = i32::from(*payload.first()? as i8);
                }
                DATA_TYPE_SERVICE_DATA_16_BIT
                | DATA_TYPE_SERVICE_DATA_32_BIT
                | DATA_TYPE_SERVICE_DATA_128_BIT => {
                    let uuid_len = match field_type {
                        DATA_TYPE_SERVICE_DATA_32_BIT => UUID_BYTES_32_BIT,
                        DATA_TYPE_SERVICE_DATA_128_BIT => UUID_BYTES_128_BIT,
                        _ => UUID_BYTES_16_BIT,
                    };
                    let uuid = uuid_from_le_bytes(payload.get(..uuid_len)?)?;
                    // Later occurrences overwrite earlier ones for the same UUID.
                    service_data.insert(uuid, payload[uuid_len..].to_vec());
                }
                DATA_TYPE_MANUFACTURER_SPECIFIC_DATA => {
                    // The first two bytes are the manufacturer id in little endian.
                    let id_bytes = payload.get(..2)?;
                    let manufacturer_id = u16::from_le_bytes([id_bytes[0], id_bytes[1]]);
                    manufacturer_data.insert(manufacturer_id, payload[2..].to_vec());
                }
                // Unknown data types are skipped, not treated as errors.
                _ => {}
            }

            pos += 1 + length;
        }

        Some(Self {
            advertise_flags,
            service_uuids,
            service_data,
            manufacturer_data,
            tx_power_level,
            local_name,
            bytes: raw.to_vec(),
        })
    }
}

/// Decodes a back-to-back sequence of little-endian UUIDs of fixed width.
///
/// Returns `None` when the payload is not a whole multiple of the width.
fn parse_service_uuids(payload: &[u8], uuid_len: usize, out: &mut Vec<Uuid>) -> Option<()> {
    if payload.len() % uuid_len != 0 {
        return None;
    }
    for chunk in payload.chunks_exact(uuid_len) {
        out.push(uuid_from_le_bytes(chunk)?);
    }
    Some(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            uuid_from_u16(0x180D),
            "0000180d-0000-1000-8000-00805f9b34fb".parse::<Uuid>().unwrap()
        );
        assert_eq!(
            uuid_from_u32(0xDEAD_BEEF),
            "deadbeef-0000-1000-8000-00805f9b34fb".parse::<Uuid>().unwrap()
        );
    }

    #[test]
    fn test_parse_flags_only() {
        // Length 2, type 0x01 (flags), value 0x06, terminator.
        let record = AdvertisementRecord::parse(&[0x02, 0x01, 0x06, 0x00]);

        assert_eq!(record.advertise_flags(), 6);
        assert!(record.service_uuids().is_empty());
        assert!(record.service_data_map().is_empty());
        assert!(record.manufacturer_data_map().is_empty());
        assert_eq!(
            record.tx_power_level(),
            AdvertisementRecord::TX_POWER_NOT_PRESENT
        );
        assert_eq!(record.local_name(), None);
        assert_eq!(record.bytes(), &[0x02, 0x01, 0x06, 0x00]);
    }

    #[test]
    fn test_parse_well_formed_record_round_trip() {
        let raw = [
            0x02, 0x01, 0x06, // flags = 6
            0x05, 0x03, 0x0D, 0x18, 0x0F, 0x18, // 16-bit UUIDs 0x180D, 0x180F
            0x06, 0x09, b'P', b'o', b'l', b'a', b'r', // complete name "Polar"
            0x02, 0x0A, 0xF4, // tx power = -12
            0x05, 0x16, 0x0D, 0x18, 0x12, 0x34, // service data under 0x180D
            0x05, 0xFF, 0x4C, 0x00, 0xAA, 0xBB, // manufacturer 0x004C
        ];
        let record = AdvertisementRecord::parse(&raw);

        assert_eq!(record.advertise_flags(), 6);
        assert_eq!(
            record.service_uuids(),
            &[uuid_from_u16(0x180D), uuid_from_u16(0x180F)]
        );
        assert_eq!(record.local_name(), Some("Polar"));
        assert_eq!(record.tx_power_level(), -12);
        assert_eq!(
            record.service_data(&uuid_from_u16(0x180D)),
            Some(&[0x12, 0x34][..])
        );
        assert_eq!(record.manufacturer_data(0x004C), Some(&[0xAA, 0xBB][..]));
        assert_eq!(record.bytes(), &raw);
    }

    #[test]
    fn test_parse_128_bit_service_uuid() {
        // UUID bytes in little-endian order.
        let mut raw = vec![0x11, 0x07];
        raw.extend((1..=16).rev());
        let record = AdvertisementRecord::parse(&raw);

        let expected = Uuid::from_bytes([
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
        ]);
        assert_eq!(record.service_uuids(), &[expected]);
    }

    #[test]
    fn test_complete_name_overwrites_short() {
        let raw = [
            0x03, 0x08, b'H', b'R', // short name "HR"
            0x06, 0x09, b'H', b'R', b'-', b'0', b'1', // complete name "HR-01"
        ];
        let record = AdvertisementRecord::parse(&raw);
        assert_eq!(record.local_name(), Some("HR-01"));
    }

    #[test]
    fn test_later_service_data_overwrites_earlier() {
        let raw = [
            0x04, 0x16, 0x0D, 0x18, 0x01, // service data [0x01] under 0x180D
            0x04, 0x16, 0x0D, 0x18, 0x02, // service data [0x02] under 0x180D
        ];
        let record = AdvertisementRecord::parse(&raw);
        assert_eq!(
            record.service_data(&uuid_from_u16(0x180D)),
            Some(&[0x02][..])
        );
    }

    #[test]
    fn test_zero_length_terminates_record() {
        let raw = [0x02, 0x01, 0x06, 0x00, 0x02, 0x0A, 0x05];
        let record = AdvertisementRecord::parse(&raw);

        // Fields after the terminator are padding and must be ignored.
        assert_eq!(record.advertise_flags(), 6);
        assert_eq!(
            record.tx_power_level(),
            AdvertisementRecord::TX_POWER_NOT_PRESENT
        );
    }

    #[test]
    fn test_unknown_data_types_are_ignored() {
        let raw = [
            0x03, 0x19, 0xC1, 0x03, // appearance (unhandled type)
            0x02, 0x01, 0x05, // flags = 5
        ];
        let record = AdvertisementRecord::parse(&raw);
        assert_eq!(record.advertise_flags(), 5);
    }

    #[test]
    fn test_truncated_buffers_never_panic() {
        let raw = [
            0x02, 0x01, 0x06, 0x05, 0x03, 0x0D, 0x18, 0x0F, 0x18, 0x06, 0x09, b'P', b'o', b'l',
            b'a', b'r', 0x05, 0xFF, 0x4C, 0x00, 0xAA,
        ];
        for cut in 0..raw.len() {
            let truncated = &raw[..cut];
            let record = AdvertisementRecord::parse(truncated);
            assert_eq!(record.bytes(), truncated);
        }
    }

    #[test]
    fn test_structure_running_past_buffer_falls_back_to_raw() {
        // Claims 9 bytes of payload but only 2 follow.
        let raw = [0x0A, 0x09, b'A', b'B'];
        let record = AdvertisementRecord::parse(&raw);

        assert_eq!(record.local_name(), None);
        assert_eq!(record.advertise_flags(), AdvertisementRecord::FLAGS_NOT_PRESENT);
        assert_eq!(record.bytes(), &raw);
    }

    #[test]
    fn test_partial_uuid_entry_falls_back_to_raw() {
        // 16-bit UUID list with three payload bytes: not a whole number of UUIDs.
        let raw = [0x04, 0x03, 0x0D, 0x18, 0x0F];
        let record = AdvertisementRecord::parse(&raw);

        assert!(record.service_uuids().is_empty());
        assert_eq!(record.bytes(), &raw);
    }

    #[test]
    fn test_manufacturer_field_too_short_falls_back_to_raw() {
        // Manufacturer data with a single payload byte cannot carry its id.
        let raw = [0x02, 0xFF, 0x4C];
        let record = AdvertisementRecord::parse(&raw);

        assert!(record.manufacturer_data_map().is_empty());
        assert_eq!(record.bytes(), &raw);
    }

    #[test]
    fn test_empty_buffer() {
        let record = AdvertisementRecord::parse(&[]);
        assert!(record.bytes().is_empty());
        assert_eq!(record.advertise_flags(), AdvertisementRecord::FLAGS_NOT_PRESENT);
    }
}
