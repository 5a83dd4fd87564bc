//! # uniscan-core
//!
//! Unified Bluetooth Low Energy advertisement scanning across platforms with
//! uneven hardware support. One scanning API and one event stream regardless
//! of what the underlying radio can do: features the platform cannot offload
//! (filtering, batched delivery, first-match / match-lost classification)
//! are emulated in software, transparently to the caller.
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`record`] - TLV advertisement payload parsing
//! - [`filter`] - Scan filters and the software filter matcher
//! - [`settings`] - Scan settings and their builder
//! - [`result`] - Scan results with extended advertising metadata
//! - [`callback`] - The application-facing callback trait
//! - [`platform`] - The platform scanner abstraction
//! - [`scanner`] - The tiered scanner façade
//! - [`error`] - Unified error types for the crate
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uniscan_core::{
//!     CapabilityTier, PlatformScanner, ScanFilter, ScanSettings, UniScanner,
//! };
//!
//! fn scan(platform: Arc<dyn PlatformScanner>) -> uniscan_core::Result<()> {
//!     let scanner = UniScanner::new(platform, CapabilityTier::Extended);
//!     let filter = ScanFilter::builder().device_name("Beacon").build()?;
//!     let settings = ScanSettings::default();
//!     // scanner.start(vec![filter], settings, callback)?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod callback;
pub mod error;
pub mod filter;
pub mod platform;
pub mod record;
pub mod result;
pub mod scanner;
pub mod settings;

mod session;

// Re-export primary types for convenience
pub use callback::ScanCallback;
pub use error::{Result, ScanError, ScanFailure};
pub use filter::{is_valid_device_address, matches_any, ScanFilter, ScanFilterBuilder};
pub use platform::{
    NativeScanRequest, PlatformCapabilities, PlatformScanner, RawAdvertisementMetadata,
    RawEventSender, RawScanEvent, RawScanResult, ScanId,
};
pub use record::{uuid_from_u16, uuid_from_u32, AdvertisementRecord};
pub use result::ScanResult;
pub use scanner::{CapabilityTier, UniScanner};
pub use settings::{
    CallbackType, CallbackTypes, MatchMode, NumOfMatches, Phy, ScanMode, ScanSettings,
    ScanSettingsBuilder,
};
