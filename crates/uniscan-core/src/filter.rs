//! Scan filters and the software filter matcher.
//!
//! A [`ScanFilter`] matches a [`ScanResult`] when every field that is set on
//! the filter matches (AND semantics); an unset field always matches. A list
//! of filters matches when at least one filter does (OR across the list).
//! The engine treats an empty filter list as "filtering disabled", not as
//! "never matches".

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ScanError};
use crate::result::ScanResult;

static MAC_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("valid regex"));

/// Returns `true` if `address` is a well-formed Bluetooth MAC address such as
/// `01:02:03:AB:CD:EF`.
#[must_use]
pub fn is_valid_device_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

/// Criteria for matching advertisements during a scan.
///
/// Immutable once built. Construct with [`ScanFilter::builder`], which
/// validates the field combinations before the filter exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilter {
    device_address: Option<String>,
    device_name: Option<String>,
    service_uuid: Option<Uuid>,
    service_uuid_mask: Option<Uuid>,
    service_data_uuid: Option<Uuid>,
    service_data: Option<Vec<u8>>,
    service_data_mask: Option<Vec<u8>>,
    manufacturer_id: Option<u16>,
    manufacturer_data: Option<Vec<u8>>,
    manufacturer_data_mask: Option<Vec<u8>>,
}

impl ScanFilter {
    /// Returns an empty builder.
    #[must_use]
    pub fn builder() -> ScanFilterBuilder {
        ScanFilterBuilder::default()
    }

    /// The device address filter, if set.
    #[inline]
    #[must_use]
    pub fn device_address(&self) -> Option<&str> {
        self.device_address.as_deref()
    }

    /// The device name filter, if set.
    #[inline]
    #[must_use]
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// The service UUID filter, if set.
    #[inline]
    #[must_use]
    pub const fn service_uuid(&self) -> Option<Uuid> {
        self.service_uuid
    }

    /// The service UUID mask, if set.
    #[inline]
    #[must_use]
    pub const fn service_uuid_mask(&self) -> Option<Uuid> {
        self.service_uuid_mask
    }

    /// The service data UUID filter, if set.
    #[inline]
    #[must_use]
    pub const fn service_data_uuid(&self) -> Option<Uuid> {
        self.service_data_uuid
    }

    /// The service data pattern, if set.
    #[inline]
    #[must_use]
    pub fn service_data(&self) -> Option<&[u8]> {
        self.service_data.as_deref()
    }

    /// The service data mask, if set.
    #[inline]
    #[must_use]
    pub fn service_data_mask(&self) -> Option<&[u8]> {
        self.service_data_mask.as_deref()
    }

    /// The manufacturer id filter, if set.
    #[inline]
    #[must_use]
    pub const fn manufacturer_id(&self) -> Option<u16> {
        self.manufacturer_id
    }

    /// The manufacturer data pattern, if set.
    #[inline]
    #[must_use]
    pub fn manufacturer_data(&self) -> Option<&[u8]> {
        self.manufacturer_data.as_deref()
    }

    /// The manufacturer data mask, if set.
    #[inline]
    #[must_use]
    pub fn manufacturer_data_mask(&self) -> Option<&[u8]> {
        self.manufacturer_data_mask.as_deref()
    }

    /// Returns `true` if no field is set, meaning the filter matches
    /// everything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.device_address.is_none()
            && self.device_name.is_none()
            && self.service_uuid.is_none()
            && self.service_data_uuid.is_none()
            && self.manufacturer_id.is_none()
    }

    /// Checks whether `result` satisfies every field set on this filter.
    #[must_use]
    pub fn matches(&self, result: &ScanResult) -> bool {
        if let Some(address) = &self.device_address {
            if address != result.device_address() {
                return false;
            }
        }

        let record = result.record();

        // A content constraint cannot be satisfied without advertisement content.
        if record.is_none()
            && (self.device_name.is_some()
                || self.service_uuid.is_some()
                || self.service_data_uuid.is_some()
                || self.manufacturer_id.is_some())
        {
            return false;
        }
        let Some(record) = record else {
            return true;
        };

        if let Some(name) = &self.device_name {
            if record.local_name() != Some(name.as_str()) {
                return false;
            }
        }

        if let Some(uuid) = self.service_uuid {
            let any_match = record
                .service_uuids()
                .iter()
                .any(|candidate| matches_service_uuid(uuid, self.service_uuid_mask, *candidate));
            if !any_match {
                return false;
            }
        }

        if let Some(service_data_uuid) = self.service_data_uuid {
            if !matches_partial_data(
                self.service_data.as_deref(),
                self.service_data_mask.as_deref(),
                record.service_data(&service_data_uuid),
            ) {
                return false;
            }
        }

        if let Some(manufacturer_id) = self.manufacturer_id {
            if !matches_partial_data(
                self.manufacturer_data.as_deref(),
                self.manufacturer_data_mask.as_deref(),
                record.manufacturer_data(manufacturer_id),
            ) {
                return false;
            }
        }

        true
    }
}

/// Returns `true` if at least one filter in `filters` matches `result`.
///
/// An empty list matches nothing here; callers that treat an empty list as
/// "filtering disabled" must check for emptiness first.
#[must_use]
pub fn matches_any(filters: &[ScanFilter], result: &ScanResult) -> bool {
    filters.iter().any(|filter| filter.matches(result))
}

/// Compares a candidate UUID against the filter UUID under an optional mask,
/// taken over both 64-bit halves.
fn matches_service_uuid(uuid: Uuid, mask: Option<Uuid>, candidate: Uuid) -> bool {
    let Some(mask) = mask else {
        return uuid == candidate;
    };
    let (filter_hi, filter_lo) = uuid.as_u64_pair();
    let (mask_hi, mask_lo) = mask.as_u64_pair();
    let (candidate_hi, candidate_lo) = candidate.as_u64_pair();
    filter_hi & mask_hi == candidate_hi & mask_hi && filter_lo & mask_lo == candidate_lo & mask_lo
}

/// Compares filter data against parsed record data.
///
/// An unset filter pattern matches any present data. Without a mask, the
/// parsed data must start with the filter data. With a mask, each byte is
/// compared under the mask over the filter data's length.
fn matches_partial_data(
    data: Option<&[u8]>,
    data_mask: Option<&[u8]>,
    parsed_data: Option<&[u8]>,
) -> bool {
    let Some(data) = data else {
        return parsed_data.is_some();
    };
    let Some(parsed_data) = parsed_data else {
        return false;
    };
    if parsed_data.len() < data.len() {
        return false;
    }
    match data_mask {
        None => parsed_data[..data.len()] == *data,
        Some(mask) => data
            .iter()
            .zip(mask)
            .zip(parsed_data)
            .all(|((d, m), p)| m & p == m & d),
    }
}

/// Builder for [`ScanFilter`].
///
/// Field combinations are validated in [`build`](Self::build): masks require
/// data of the same length, and manufacturer ids must be non-negative.
#[derive(Debug, Clone, Default)]
pub struct ScanFilterBuilder {
    device_address: Option<String>,
    device_name: Option<String>,
    service_uuid: Option<Uuid>,
    service_uuid_mask: Option<Uuid>,
    service_data_uuid: Option<Uuid>,
    service_data: Option<Vec<u8>>,
    service_data_mask: Option<Vec<u8>>,
    manufacturer_id: Option<i32>,
    manufacturer_data: Option<Vec<u8>>,
    manufacturer_data_mask: Option<Vec<u8>>,
}

impl ScanFilterBuilder {
    /// Filters on the device address, e.g. `01:02:03:AB:CD:EF`.
    #[must_use]
    pub fn device_address(mut self, device_address: impl Into<String>) -> Self {
        self.device_address = Some(device_address.into());
        self
    }

    /// Filters on the advertised local name.
    #[must_use]
    pub fn device_name(mut self, device_name: impl Into<String>) -> Self {
        self.device_name = Some(device_name.into());
        self
    }

    /// Filters on an advertised service UUID.
    #[must_use]
    pub const fn service_uuid(mut self, service_uuid: Uuid) -> Self {
        self.service_uuid = Some(service_uuid);
        self.service_uuid_mask = None;
        self
    }

    /// Filters on a partial service UUID. Bits set in `mask` must match
    /// between the filter UUID and a candidate; cleared bits are ignored.
    #[must_use]
    pub const fn service_uuid_masked(mut self, service_uuid: Uuid, mask: Uuid) -> Self {
        self.service_uuid = Some(service_uuid);
        self.service_uuid_mask = Some(mask);
        self
    }

    /// Requires the record to carry any service data under `service_data_uuid`.
    #[must_use]
    pub fn service_data_uuid(mut self, service_data_uuid: Uuid) -> Self {
        self.service_data_uuid = Some(service_data_uuid);
        self.service_data = None;
        self.service_data_mask = None;
        self
    }

    /// Requires the record's service data under `service_data_uuid` to start
    /// with `service_data`.
    #[must_use]
    pub fn service_data(mut self, service_data_uuid: Uuid, service_data: Vec<u8>) -> Self {
        self.service_data_uuid = Some(service_data_uuid);
        self.service_data = Some(service_data);
        self.service_data_mask = None;
        self
    }

    /// Like [`service_data`](Self::service_data) with a bit mask: a bit set
    /// in the mask must match, a cleared bit is ignored. The mask must have
    /// the same length as the data.
    #[must_use]
    pub fn service_data_masked(
        mut self,
        service_data_uuid: Uuid,
        service_data: Vec<u8>,
        mask: Vec<u8>,
    ) -> Self {
        self.service_data_uuid = Some(service_data_uuid);
        self.service_data = Some(service_data);
        self.service_data_mask = Some(mask);
        self
    }

    /// Requires the record to carry any manufacturer data under
    /// `manufacturer_id`. Negative ids are rejected at build time.
    #[must_use]
    pub fn manufacturer_id(mut self, manufacturer_id: i32) -> Self {
        self.manufacturer_id = Some(manufacturer_id);
        self.manufacturer_data = None;
        self.manufacturer_data_mask = None;
        self
    }

    /// Requires the record's manufacturer data under `manufacturer_id` to
    /// start with `manufacturer_data`.
    #[must_use]
    pub fn manufacturer_data(mut self, manufacturer_id: i32, manufacturer_data: Vec<u8>) -> Self {
        self.manufacturer_id = Some(manufacturer_id);
        self.manufacturer_data = Some(manufacturer_data);
        self.manufacturer_data_mask = None;
        self
    }

    /// Like [`manufacturer_data`](Self::manufacturer_data) with a bit mask
    /// of the same length as the data.
    #[must_use]
    pub fn manufacturer_data_masked(
        mut self,
        manufacturer_id: i32,
        manufacturer_data: Vec<u8>,
        mask: Vec<u8>,
    ) -> Self {
        self.manufacturer_id = Some(manufacturer_id);
        self.manufacturer_data = Some(manufacturer_data);
        self.manufacturer_data_mask = Some(mask);
        self
    }

    /// Validates the field combinations and builds the filter.
    ///
    /// # Errors
    ///
    /// - [`ScanError::InvalidDeviceAddress`] for a malformed address
    /// - [`ScanError::MaskWithoutData`] for a mask without its data
    /// - [`ScanError::MaskLengthMismatch`] for a mask of the wrong length
    /// - [`ScanError::InvalidManufacturerId`] for a negative manufacturer id
    pub fn build(self) -> Result<ScanFilter> {
        if let Some(address) = &self.device_address {
            if !is_valid_device_address(address) {
                return Err(ScanError::InvalidDeviceAddress(address.clone()));
            }
        }

        check_mask("service data", &self.service_data, &self.service_data_mask)?;
        check_mask(
            "manufacturer data",
            &self.manufacturer_data,
            &self.manufacturer_data_mask,
        )?;

        let manufacturer_id = match self.manufacturer_id {
            None => None,
            Some(id) => Some(
                u16::try_from(id).map_err(|_| ScanError::InvalidManufacturerId(id))?,
            ),
        };

        Ok(ScanFilter {
            device_address: self.device_address,
            device_name: self.device_name,
            service_uuid: self.service_uuid,
            service_uuid_mask: self.service_uuid_mask,
            service_data_uuid: self.service_data_uuid,
            service_data: self.service_data,
            service_data_mask: self.service_data_mask,
            manufacturer_id,
            manufacturer_data: self.manufacturer_data,
            manufacturer_data_mask: self.manufacturer_data_mask,
        })
    }
}

fn check_mask(
    field: &'static str,
    data: &Option<Vec<u8>>,
    mask: &Option<Vec<u8>>,
) -> Result<()> {
    match (data, mask) {
        (None, Some(_)) => Err(ScanError::MaskWithoutData { field }),
        (Some(data), Some(mask)) if data.len() != mask.len() => {
            Err(ScanError::MaskLengthMismatch {
                field,
                data_len: data.len(),
                mask_len: mask.len(),
            })
        }
        _ => Ok(()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
