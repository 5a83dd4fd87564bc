//! Application-facing scan callback trait.

use crate::error::ScanFailure;
use crate::result::ScanResult;
use crate::settings::CallbackType;

/// Receives scan events for one registered scan.
///
/// Implementations are invoked from the scanner's dispatch task. Callbacks
/// for one scan are serialized; keep them short and hand heavy work to a
/// channel or task of your own.
pub trait ScanCallback: Send + Sync {
    /// A single advertisement was received, or a match transition occurred.
    ///
    /// `callback_type` is exactly one of [`CallbackType::AllMatches`],
    /// [`CallbackType::FirstMatch`] or [`CallbackType::MatchLost`]. For
    /// [`CallbackType::MatchLost`] the result carries the last data seen
    /// from the device before it went silent.
    fn on_scan_result(&self, callback_type: CallbackType, result: ScanResult);

    /// A batch of results accumulated over the report delay. May be empty.
    fn on_batch_scan_results(&self, results: Vec<ScanResult>);

    /// The scan could not be started or has stopped with an error. No
    /// further events follow.
    fn on_scan_failed(&self, failure: ScanFailure);
}
